//! Parsed deck contents.

use std::path::PathBuf;

use crate::circuit::{AnalysisType, Declaration, ParamMap, Spread};
use crate::components::ModelLibrary;
use crate::solver::{TraceRequest, TransientConfig};

/// Values from a `.tran` line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TranSpec {
    pub timestep: f64,
    pub stop_time: f64,
    pub print_start: f64,
    pub print_step: Option<f64>,
}

/// A `.iv` line: sweep a junction model and write its curve.
#[derive(Debug, Clone, PartialEq)]
pub struct IvRequest {
    pub model: String,
    pub max_current: f64,
    pub output: PathBuf,
}

/// Complete contents of a parsed deck.
#[derive(Debug, Clone, Default)]
pub struct Deck {
    /// Device declarations in deck order
    pub declarations: Vec<Declaration>,
    /// `.param` values
    pub params: ParamMap,
    /// `.model` junction models
    pub models: ModelLibrary,
    /// Transient control, if the deck has a `.tran` line
    pub tran: Option<TranSpec>,
    /// `.print` requests in deck order
    pub traces: Vec<TraceRequest>,
    /// Noise temperature from `.temp`
    pub temperature: Option<f64>,
    /// Noise bandwidth from `.neb`
    pub bandwidth: Option<f64>,
    /// `.spread` settings
    pub spread: Spread,
    /// `.iv` requests in deck order
    pub iv: Vec<IvRequest>,
}

impl Deck {
    /// Create an empty deck.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the simulation configuration described by the deck.
    ///
    /// Values the deck does not set keep their defaults. Noise is enabled
    /// by a `.temp` line.
    pub fn transient_config(&self, analysis: AnalysisType) -> TransientConfig {
        let mut config = TransientConfig::new()
            .with_analysis(analysis)
            .with_spread(self.spread);
        if let Some(tran) = &self.tran {
            config = config
                .with_timestep(tran.timestep)
                .with_stop_time(tran.stop_time)
                .with_print_start(tran.print_start);
            if let Some(step) = tran.print_step {
                config = config.with_print_step(step);
            }
        }
        if let Some(temperature) = self.temperature {
            config = config.with_noise(temperature, self.bandwidth);
        }
        config
    }
}
