//! Linear controlled sources.
//!
//! Declared as `label o+ o- c+ c- gain`. Current-controlled sources sense
//! the current through a zero-volt source placed between `c+` and `c-`.

use super::{terminal_connections, NodeConnection, Stamp};
use crate::circuit::{across, column, AnalysisType, BranchIndex, NodeConfig, Terminal};
use crate::error::Result;
use crate::SIGMA;

/// Voltage-controlled voltage source: v_out = A*v_ctrl.
///
/// The relation is linear, so it holds for phases as well and the row is
/// the same in both analysis modes.
#[derive(Debug, Clone)]
pub struct Vcvs {
    pub label: String,
    pub out: [Terminal; 2],
    pub ctrl: [Terminal; 2],
    pub gain: f64,
    pub branch: BranchIndex,
    pub stamp: Stamp,
}

impl Vcvs {
    pub fn new(
        label: String,
        out: [Terminal; 2],
        ctrl: [Terminal; 2],
        gain: f64,
        branch: BranchIndex,
    ) -> Result<Self> {
        NodeConfig::checked(&label, out)?;
        NodeConfig::checked(&label, ctrl)?;
        let mut stamp = Stamp::new();
        stamp.push_row(&[
            (column(out[0]), 1.0),
            (column(out[1]), -1.0),
            (column(ctrl[0]), -gain),
            (column(ctrl[1]), gain),
        ]);
        Ok(Self {
            label,
            out,
            ctrl,
            gain,
            branch,
            stamp,
        })
    }
}

/// Voltage-controlled current source: i_out = gm*v_ctrl.
///
/// In phase mode the control voltage is the BDF2 derivative of the
/// control phase.
#[derive(Debug, Clone)]
pub struct Vccs {
    pub label: String,
    pub out: [Terminal; 2],
    pub ctrl: [Terminal; 2],
    pub gain: f64,
    pub branch: BranchIndex,
    pub analysis: AnalysisType,
    pub timestep: f64,
    pub stamp: Stamp,
    /// Control phase at the previous two steps
    pub control_history: [f64; 2],
}

impl Vccs {
    pub fn new(
        label: String,
        out: [Terminal; 2],
        ctrl: [Terminal; 2],
        gain: f64,
        branch: BranchIndex,
        analysis: AnalysisType,
        timestep: f64,
    ) -> Result<Self> {
        NodeConfig::checked(&label, out)?;
        NodeConfig::checked(&label, ctrl)?;
        let mut vccs = Self {
            label,
            out,
            ctrl,
            gain,
            branch,
            analysis,
            timestep,
            stamp: Stamp::new(),
            control_history: [0.0; 2],
        };
        vccs.build_stamp();
        Ok(vccs)
    }

    pub fn build_stamp(&mut self) {
        let g = match self.analysis {
            AnalysisType::Voltage => self.gain,
            AnalysisType::Phase => 3.0 * SIGMA * self.gain / (2.0 * self.timestep),
        };
        let mut stamp = Stamp::new();
        stamp.push_row(&[
            (column(self.ctrl[0]), g),
            (column(self.ctrl[1]), -g),
            (Some(self.branch.0), -1.0),
        ]);
        self.stamp = stamp;
    }

    pub fn rescale(&mut self, h: f64) {
        self.timestep = h;
        self.build_stamp();
    }

    pub fn fill_rhs(&self, rhs: &mut [f64]) {
        if self.analysis == AnalysisType::Phase {
            let [p1, p2] = self.control_history;
            rhs[self.branch.0] = SIGMA * self.gain / (2.0 * self.timestep) * (4.0 * p1 - p2);
        }
    }

    pub fn advance(&mut self, x: &[f64]) {
        self.control_history = [across(x, self.ctrl), self.control_history[0]];
    }

    pub fn reset_history(&mut self) {
        self.control_history = [0.0; 2];
    }
}

/// Current-controlled current source: i_out = β*i_sense.
///
/// Only the sense row is stamped; the output current appears as a β
/// coefficient of the sense current in the output node rows.
#[derive(Debug, Clone)]
pub struct Cccs {
    pub label: String,
    pub out: [Terminal; 2],
    pub ctrl: [Terminal; 2],
    pub gain: f64,
    pub sense: BranchIndex,
    pub stamp: Stamp,
}

impl Cccs {
    pub fn new(
        label: String,
        out: [Terminal; 2],
        ctrl: [Terminal; 2],
        gain: f64,
        sense: BranchIndex,
    ) -> Result<Self> {
        NodeConfig::checked(&label, out)?;
        NodeConfig::checked(&label, ctrl)?;
        let mut stamp = Stamp::new();
        stamp.push_row(&[(column(ctrl[0]), 1.0), (column(ctrl[1]), -1.0)]);
        Ok(Self {
            label,
            out,
            ctrl,
            gain,
            sense,
            stamp,
        })
    }

    pub fn node_connections(&self) -> Vec<NodeConnection> {
        let mut out = terminal_connections(self.ctrl, self.sense);
        out.extend(terminal_connections(self.out, self.sense).into_iter().map(|c| NodeConnection {
            value: c.value * self.gain,
            ..c
        }));
        out
    }
}

/// Current-controlled voltage source: v_out = r*i_sense.
///
/// Uses two branches, the sense current and the output current.
#[derive(Debug, Clone)]
pub struct Ccvs {
    pub label: String,
    pub out: [Terminal; 2],
    pub ctrl: [Terminal; 2],
    pub gain: f64,
    pub sense: BranchIndex,
    pub output: BranchIndex,
    pub analysis: AnalysisType,
    pub timestep: f64,
    pub stamp: Stamp,
    /// Output phase at the previous two steps
    pub output_history: [f64; 2],
}

impl Ccvs {
    pub fn new(
        label: String,
        out: [Terminal; 2],
        ctrl: [Terminal; 2],
        gain: f64,
        branches: [BranchIndex; 2],
        analysis: AnalysisType,
        timestep: f64,
    ) -> Result<Self> {
        NodeConfig::checked(&label, out)?;
        NodeConfig::checked(&label, ctrl)?;
        let mut ccvs = Self {
            label,
            out,
            ctrl,
            gain,
            sense: branches[0],
            output: branches[1],
            analysis,
            timestep,
            stamp: Stamp::new(),
            output_history: [0.0; 2],
        };
        ccvs.build_stamp();
        Ok(ccvs)
    }

    pub fn build_stamp(&mut self) {
        let r = match self.analysis {
            AnalysisType::Voltage => self.gain,
            AnalysisType::Phase => 2.0 * self.timestep * self.gain / (3.0 * SIGMA),
        };
        let mut stamp = Stamp::new();
        stamp.push_row(&[(column(self.ctrl[0]), 1.0), (column(self.ctrl[1]), -1.0)]);
        stamp.push_row(&[
            (column(self.out[0]), 1.0),
            (column(self.out[1]), -1.0),
            (Some(self.sense.0), -r),
        ]);
        self.stamp = stamp;
    }

    pub fn rescale(&mut self, h: f64) {
        self.timestep = h;
        self.build_stamp();
    }

    pub fn node_connections(&self) -> Vec<NodeConnection> {
        let mut out = terminal_connections(self.ctrl, self.sense);
        out.extend(terminal_connections(self.out, self.output));
        out
    }

    pub fn fill_rhs(&self, rhs: &mut [f64]) {
        if self.analysis == AnalysisType::Phase {
            let [p1, p2] = self.output_history;
            rhs[self.output.0] = (4.0 * p1 - p2) / 3.0;
        }
    }

    pub fn advance(&mut self, x: &[f64]) {
        self.output_history = [across(x, self.out), self.output_history[0]];
    }

    pub fn reset_history(&mut self) {
        self.output_history = [0.0; 2];
    }
}
