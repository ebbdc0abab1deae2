//! # jjsim
//!
//! A transient simulator for superconducting Josephson-junction circuits.
//!
//! This library provides:
//! - A flat netlist deck reader
//! - Modified Nodal Analysis (MNA) assembly into a compressed-row matrix
//! - Companion models for R, L, C, mutual inductance, independent and
//!   controlled sources, lossless transmission lines and Josephson junctions
//! - A transient engine with phase prediction and step refinement
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`dsl`] - Reader for the netlist deck format
//! - [`circuit`] - Declarations, parameters and the matrix assembler
//! - [`components`] - Device companion models and waveforms
//! - [`solver`] - CSR matrix, sparse LU, transient engine and results
//! - [`output`] - CSV output (CLI only)
//!
//! ## Usage
//!
//! ### Native CLI
//!
//! ```bash
//! jjsim circuit.cir -o out.csv
//! ```
//!
//! ### Library
//!
//! ```no_run
//! use jjsim::{dsl, solver::simulate, AnalysisType};
//!
//! let deck = dsl::parse(&std::fs::read_to_string("circuit.cir").unwrap()).unwrap();
//! let config = deck.transient_config(AnalysisType::Phase);
//! let (results, _) = simulate(&deck.declarations, &deck.params, &deck.models, &config, &deck.traces).unwrap();
//! println!("{} points", results.len());
//! ```
//!
//! ## Simulation Method
//!
//! Each device contributes a small block of rows ("stamp") to a square
//! sparse system. Reactive devices are discretized with the second-order
//! backward differentiation formula, so for a fixed timestep the matrix
//! only changes when a junction's quasiparticle region changes. For each
//! timestep:
//!
//! 1. Update junction regions and predict junction phases
//! 2. Refactor the matrix if any junction changed region
//! 3. Fill the right-hand side from device histories and sources
//! 4. Solve Ax = b and shift the device histories
//!
//! Node unknowns are either voltages or superconducting phases
//! ([`AnalysisType`]).

pub mod circuit;
pub mod components;
pub mod dsl;
pub mod error;
pub mod solver;

#[cfg(feature = "cli")]
pub mod output;

// Re-export main types for convenience
pub use circuit::{AnalysisType, Circuit};
pub use error::{Result, SimError};
pub use solver::{Results, Transient, TransientConfig};

/// Magnetic flux quantum h/2e (Wb)
pub const PHI_ZERO: f64 = 2.067833831170082e-15;

/// Boltzmann constant (J/K)
pub const BOLTZMANN: f64 = 1.38064852e-23;

/// Elementary charge (C)
pub const EV: f64 = 1.6021766208e-19;

/// Reduced Planck constant (J s)
pub const HBAR: f64 = 1.0545718001391127e-34;

/// Reduced flux quantum ħ/2e, i.e. PHI_ZERO / 2π (Wb)
pub const SIGMA: f64 = HBAR / (2.0 * EV);

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_sigma_matches_flux_quantum() {
        assert_relative_eq!(SIGMA, PHI_ZERO / (2.0 * std::f64::consts::PI), max_relative = 1e-12);
    }
}
