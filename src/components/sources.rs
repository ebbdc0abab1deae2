//! Independent current, voltage and phase sources.

use super::{Stamp, Waveform};
use crate::circuit::{across, column, AnalysisType, BranchIndex, NodeConfig, Terminal};
use crate::error::Result;
use crate::SIGMA;

/// A current source.
///
/// Current sources add directly to the RHS of the node rows and own no
/// branch. Positive current flows from n+ through the source to n-.
#[derive(Debug, Clone)]
pub struct CurrentSource {
    pub label: String,
    pub nodes: [Terminal; 2],
    pub waveform: Waveform,
    pub stamp: Stamp,
}

impl CurrentSource {
    /// Create a new current source.
    pub fn new(label: String, nodes: [Terminal; 2], waveform: Waveform) -> Result<Self> {
        NodeConfig::checked(&label, nodes)?;
        Ok(Self {
            label,
            nodes,
            waveform,
            stamp: Stamp::new(),
        })
    }

    pub fn fill_rhs(&self, rhs: &mut [f64], t: f64) {
        let value = self.waveform.value(t);
        if let Some(pos) = self.nodes[0] {
            rhs[pos.0] -= value;
        }
        if let Some(neg) = self.nodes[1] {
            rhs[neg.0] += value;
        }
    }
}

/// A voltage source.
///
/// Voltage sources require a branch current. The source enforces
/// v+ - v- = V(t); in phase mode the constraint is integrated with BDF2:
///   φ+ - φ- = (4φ1 - φ2)/3 + (2h/3σ)*V(t)
#[derive(Debug, Clone)]
pub struct VoltageSource {
    pub label: String,
    pub nodes: [Terminal; 2],
    pub waveform: Waveform,
    pub branch: BranchIndex,
    pub analysis: AnalysisType,
    pub timestep: f64,
    pub stamp: Stamp,
    pub phase_history: [f64; 2],
}

impl VoltageSource {
    /// Create a new voltage source.
    pub fn new(
        label: String,
        nodes: [Terminal; 2],
        waveform: Waveform,
        branch: BranchIndex,
        analysis: AnalysisType,
        timestep: f64,
    ) -> Result<Self> {
        NodeConfig::checked(&label, nodes)?;
        let mut stamp = Stamp::new();
        stamp.push_row(&[(column(nodes[0]), 1.0), (column(nodes[1]), -1.0)]);
        Ok(Self {
            label,
            nodes,
            waveform,
            branch,
            analysis,
            timestep,
            stamp,
            phase_history: [0.0; 2],
        })
    }

    pub fn rescale(&mut self, h: f64) {
        self.timestep = h;
    }

    pub fn fill_rhs(&self, rhs: &mut [f64], t: f64) {
        let value = self.waveform.value(t);
        rhs[self.branch.0] = match self.analysis {
            AnalysisType::Voltage => value,
            AnalysisType::Phase => {
                let [p1, p2] = self.phase_history;
                (4.0 * p1 - p2) / 3.0 + 2.0 * self.timestep / (3.0 * SIGMA) * value
            }
        };
    }

    pub fn advance(&mut self, x: &[f64]) {
        self.phase_history = [across(x, self.nodes), self.phase_history[0]];
    }

    pub fn reset_history(&mut self) {
        self.phase_history = [0.0; 2];
    }
}

/// A phase source.
///
/// Enforces φ+ - φ- = P(t). In voltage mode the source drives the BDF2
/// derivative of the phase instead:
///   v+ - v- = σ(3P(t) - 4P(t-h) + P(t-2h))/(2h)
#[derive(Debug, Clone)]
pub struct PhaseSource {
    pub label: String,
    pub nodes: [Terminal; 2],
    pub waveform: Waveform,
    pub branch: BranchIndex,
    pub analysis: AnalysisType,
    pub timestep: f64,
    pub stamp: Stamp,
}

impl PhaseSource {
    /// Create a new phase source.
    pub fn new(
        label: String,
        nodes: [Terminal; 2],
        waveform: Waveform,
        branch: BranchIndex,
        analysis: AnalysisType,
        timestep: f64,
    ) -> Result<Self> {
        NodeConfig::checked(&label, nodes)?;
        let mut stamp = Stamp::new();
        stamp.push_row(&[(column(nodes[0]), 1.0), (column(nodes[1]), -1.0)]);
        Ok(Self {
            label,
            nodes,
            waveform,
            branch,
            analysis,
            timestep,
            stamp,
        })
    }

    pub fn rescale(&mut self, h: f64) {
        self.timestep = h;
    }

    pub fn fill_rhs(&self, rhs: &mut [f64], t: f64) {
        let h = self.timestep;
        rhs[self.branch.0] = match self.analysis {
            AnalysisType::Phase => self.waveform.value(t),
            AnalysisType::Voltage => {
                let p = |t: f64| self.waveform.value(t);
                SIGMA * (3.0 * p(t) - 4.0 * p(t - h) + p(t - 2.0 * h)) / (2.0 * h)
            }
        };
    }
}
