//! Circuit representation and assembly.
//!
//! This module turns a flat list of [`Declaration`]s into a [`Circuit`]:
//! the devices with their companion models, the node map, and the MNA
//! system in CSR form. Parameter and model lookups go through
//! [`ParamMap`] and [`crate::components::ModelLibrary`].

mod graph;
mod params;
mod spread;
mod types;
mod validate;

pub use graph::{assemble, assemble_with_retry, AssemblyOutcome, Circuit};
pub use params::{parse_number, ParamMap, ScopedMap};
pub use spread::{Spread, SpreadKind};
pub use types::*;
pub use validate::validate_circuit;
