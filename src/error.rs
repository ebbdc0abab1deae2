//! Error types for the jjsim circuit simulator.
//!
//! This module provides a unified error type [`SimError`] that covers
//! all error conditions that can occur while reading a deck, assembling
//! the MNA system and running a transient simulation.

use thiserror::Error;

/// Result type alias using [`SimError`].
pub type Result<T> = std::result::Result<T, SimError>;

/// Unified error type for all jjsim operations.
#[derive(Error, Debug)]
pub enum SimError {
    // ============ Deck Parsing Errors ============
    /// Error while reading the netlist deck
    #[error("Parse error at line {line}: {message}")]
    ParseError { line: usize, message: String },

    /// Trace request that does not name a node or device of the circuit
    #[error("Cannot trace '{target}': {message}")]
    UnknownTrace { target: String, message: String },

    // ============ Declaration / Topology Errors ============
    /// Two devices share a label
    #[error("Duplicate device label '{label}'")]
    DuplicateLabel { label: String },

    /// Declaration lacks the tokens its device kind requires
    #[error("Device '{label}' needs at least {expected} tokens, found {found}: '{line}'")]
    TooFewTokens {
        label: String,
        expected: usize,
        found: usize,
        line: String,
    },

    /// Leading letter of a declaration is not a known device kind
    #[error("Unknown device type '{kind}' in declaration '{line}'")]
    UnknownDevice { kind: String, line: String },

    /// Junction references a model that is not defined
    #[error("Undefined model '{model}' referenced by device '{label}'")]
    MissingModel { model: String, label: String },

    /// Mutual inductance references an inductor that does not exist
    #[error("Mutual inductance '{label}' references unknown inductor '{inductor}'")]
    UnresolvedMutual { label: String, inductor: String },

    /// Token is neither a number nor a defined parameter
    #[error("Cannot resolve value '{token}' of device '{label}'")]
    UnresolvedParameter { label: String, token: String },

    /// Both terminals of a two-terminal device are ground
    #[error("Both terminals of device '{label}' are grounded")]
    BothTerminalsGrounded { label: String },

    /// Model card carries an unknown key or an unusable value
    #[error("Invalid parameter '{param}' in model '{model}': {message}")]
    InvalidModelParameter {
        model: String,
        param: String,
        message: String,
    },

    /// A stamp entry is zero, infinite or NaN
    #[error("Device '{label}' produced an unusable matrix entry ({value})")]
    InvalidStamp { label: String, value: f64 },

    // ============ Waveform Errors ============
    /// Malformed source function
    #[error("Invalid waveform '{spec}': {message}")]
    InvalidWaveform { spec: String, message: String },

    // ============ Simulation Errors ============
    /// Matrix is singular and cannot be factorized
    #[error("Singular matrix at pivot {pivot} - circuit may contain a floating node or a source loop")]
    SingularMatrix { pivot: usize },

    /// Junction phase guess moved more than a quarter period in one step
    #[error("Phase guess of junction '{label}' diverged at t = {time:.3e} s (step {delta:.3} rad)")]
    PhaseDivergence {
        label: String,
        time: f64,
        delta: f64,
    },

    /// Timestep was halved below the allowed minimum
    #[error("Timestep {timestep:.3e} s fell below the minimum of {minimum:.3e} s")]
    TimestepTooSmall { timestep: f64, minimum: f64 },

    /// Invalid simulation parameter
    #[error("Invalid simulation parameter: {message}")]
    InvalidSimulationParam { message: String },

    // ============ I/O Errors ============
    /// Error reading an input file (deck or custom waveform)
    #[error("Failed to read file '{path}': {source}")]
    FileReadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Error writing simulation output
    #[error("Failed to write output '{path}': {source}")]
    FileWriteError {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl SimError {
    /// Create a parse error
    pub fn parse(line: usize, message: impl Into<String>) -> Self {
        Self::ParseError {
            line,
            message: message.into(),
        }
    }

    /// Create an invalid waveform error
    pub fn waveform(spec: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidWaveform {
            spec: spec.into(),
            message: message.into(),
        }
    }

    /// Create an invalid simulation parameter error
    pub fn invalid_param(message: impl Into<String>) -> Self {
        Self::InvalidSimulationParam {
            message: message.into(),
        }
    }

    /// Create an unresolved parameter error
    pub fn unresolved(label: impl Into<String>, token: impl Into<String>) -> Self {
        Self::UnresolvedParameter {
            label: label.into(),
            token: token.into(),
        }
    }
}
