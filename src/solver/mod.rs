//! MNA (Modified Nodal Analysis) solver.
//!
//! This module provides the numerical engine for transient simulation.
//!
//! ## Modified Nodal Analysis
//!
//! Every timestep solves a sparse linear system Ax = b where:
//! - x holds the node unknowns (voltages or phases) followed by branch
//!   unknowns (currents, junction phase or voltage)
//! - A is built from the device companion stamps in CSR form
//! - b is refilled each step from device histories and sources
//!
//! The matrix rows are laid out as:
//! ```text
//! [ node rows   : KCL, +-1 entries at branch columns ]
//! [ device rows : one per branch, in device order    ]
//! ```
//!
//! Reactive devices use the second-order backward differentiation
//! formula (BDF2). Josephson junctions are linearized around a predicted
//! phase, so the only runtime matrix changes come from junction
//! quasiparticle regions, which trigger a numeric refactorization that
//! reuses the pivot order.

mod iv;
mod lu;
mod mna;
mod results;
mod simulator;

pub use iv::{IvCurve, IvPoint, IvSweep};
pub use lu::SparseLu;
pub use mna::CsrMatrix;
pub use results::{Tap, Results, Trace, TraceRequest};
pub use simulator::{
    simulate, DivergencePolicy, NoiseConfig, Progress, Transient, TransientConfig,
};

/// Largest phase jump a junction may predict in one step before the step
/// counts as diverged (a quarter period).
pub const PHASE_GUARD: f64 = 0.25 * 2.0 * std::f64::consts::PI;
