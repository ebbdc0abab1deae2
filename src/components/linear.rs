//! Linear passive devices: Resistor, Inductor, Capacitor, mutual inductance.

use super::Stamp;
use crate::circuit::{across, column, AnalysisType, BranchIndex, NodeConfig, Terminal};
use crate::error::Result;
use crate::SIGMA;

/// A resistor.
///
/// Every resistor owns a branch current `i`. In voltage mode the row is
/// plain Ohm's law:
///   v+ - v- - R*i = 0
///
/// In phase mode the node unknowns are phases, so the voltage is replaced
/// by the BDF2 derivative of the phase, v = σ(3φ - 4φ1 + φ2)/(2h):
///   φ+ - φ- - (2hR/3σ)*i = (4φ1 - φ2)/3
#[derive(Debug, Clone)]
pub struct Resistor {
    pub label: String,
    pub nodes: [Terminal; 2],
    pub resistance: f64,
    pub branch: BranchIndex,
    pub analysis: AnalysisType,
    pub timestep: f64,
    pub stamp: Stamp,
    /// Phase across the resistor at the previous two steps
    pub phase_history: [f64; 2],
}

impl Resistor {
    /// Create a new resistor.
    pub fn new(
        label: String,
        nodes: [Terminal; 2],
        resistance: f64,
        branch: BranchIndex,
        analysis: AnalysisType,
        timestep: f64,
    ) -> Result<Self> {
        NodeConfig::checked(&label, nodes)?;
        let mut resistor = Self {
            label,
            nodes,
            resistance,
            branch,
            analysis,
            timestep,
            stamp: Stamp::new(),
            phase_history: [0.0; 2],
        };
        resistor.build_stamp();
        Ok(resistor)
    }

    /// Coefficient of the branch current in the device row.
    pub fn coefficient(&self) -> f64 {
        match self.analysis {
            AnalysisType::Voltage => -self.resistance,
            AnalysisType::Phase => -2.0 * self.timestep * self.resistance / (3.0 * SIGMA),
        }
    }

    pub fn build_stamp(&mut self) {
        let mut stamp = Stamp::new();
        stamp.push_row(&[
            (column(self.nodes[0]), 1.0),
            (column(self.nodes[1]), -1.0),
            (Some(self.branch.0), self.coefficient()),
        ]);
        self.stamp = stamp;
    }

    pub fn rescale(&mut self, h: f64) {
        self.timestep = h;
        self.build_stamp();
    }

    pub fn fill_rhs(&self, rhs: &mut [f64]) {
        if self.analysis == AnalysisType::Phase {
            let [p1, p2] = self.phase_history;
            rhs[self.branch.0] = (4.0 * p1 - p2) / 3.0;
        }
    }

    pub fn advance(&mut self, x: &[f64]) {
        self.phase_history = [across(x, self.nodes), self.phase_history[0]];
    }

    pub fn reset_history(&mut self) {
        self.phase_history = [0.0; 2];
    }
}

/// Magnetic coupling from one inductor to a partner.
#[derive(Debug, Clone, PartialEq)]
pub struct Coupling {
    /// Label of the partner inductor
    pub partner: String,
    /// Branch current of the partner inductor
    pub branch: BranchIndex,
    /// Mutual inductance M = k*sqrt(L1*L2)
    pub mutual: f64,
    /// Partner current at the previous two steps
    pub current_history: [f64; 2],
}

/// An inductor.
///
/// Voltage mode uses BDF2 on the flux, v = L*di/dt + Σ M*di_k/dt:
///   v+ - v- - (3L/2h)*i - Σ (3M/2h)*i_k = -(L/2h)(4i1 - i2) - Σ (M/2h)(4i_k1 - i_k2)
///
/// Phase mode needs no integration because flux and phase are proportional:
///   φ+ - φ- - (L/σ)*i - Σ (M/σ)*i_k = 0
#[derive(Debug, Clone)]
pub struct Inductor {
    pub label: String,
    pub nodes: [Terminal; 2],
    pub inductance: f64,
    pub branch: BranchIndex,
    pub analysis: AnalysisType,
    pub timestep: f64,
    pub stamp: Stamp,
    pub couplings: Vec<Coupling>,
    /// Own current at the previous two steps
    pub current_history: [f64; 2],
}

impl Inductor {
    /// Create a new inductor.
    pub fn new(
        label: String,
        nodes: [Terminal; 2],
        inductance: f64,
        branch: BranchIndex,
        analysis: AnalysisType,
        timestep: f64,
    ) -> Result<Self> {
        NodeConfig::checked(&label, nodes)?;
        let mut inductor = Self {
            label,
            nodes,
            inductance,
            branch,
            analysis,
            timestep,
            stamp: Stamp::new(),
            couplings: Vec::new(),
            current_history: [0.0; 2],
        };
        inductor.build_stamp();
        Ok(inductor)
    }

    /// Add a mutual coupling to another inductor's branch.
    pub fn couple(&mut self, partner: &str, branch: BranchIndex, mutual: f64) {
        self.couplings.push(Coupling {
            partner: partner.to_string(),
            branch,
            mutual,
            current_history: [0.0; 2],
        });
        self.build_stamp();
    }

    fn scale(&self) -> f64 {
        match self.analysis {
            AnalysisType::Voltage => -3.0 / (2.0 * self.timestep),
            AnalysisType::Phase => -1.0 / SIGMA,
        }
    }

    pub fn build_stamp(&mut self) {
        let scale = self.scale();
        let mut entries = vec![
            (column(self.nodes[0]), 1.0),
            (column(self.nodes[1]), -1.0),
            (Some(self.branch.0), scale * self.inductance),
        ];
        entries.extend(self.couplings.iter().map(|c| (Some(c.branch.0), scale * c.mutual)));

        let mut stamp = Stamp::new();
        stamp.push_row(&entries);
        self.stamp = stamp;
    }

    pub fn rescale(&mut self, h: f64) {
        self.timestep = h;
        self.build_stamp();
    }

    pub fn fill_rhs(&self, rhs: &mut [f64]) {
        if self.analysis == AnalysisType::Voltage {
            let k = 1.0 / (2.0 * self.timestep);
            let [i1, i2] = self.current_history;
            let mut value = -k * self.inductance * (4.0 * i1 - i2);
            for c in &self.couplings {
                let [c1, c2] = c.current_history;
                value -= k * c.mutual * (4.0 * c1 - c2);
            }
            rhs[self.branch.0] = value;
        }
    }

    pub fn advance(&mut self, x: &[f64]) {
        self.current_history = [x[self.branch.0], self.current_history[0]];
        for c in &mut self.couplings {
            c.current_history = [x[c.branch.0], c.current_history[0]];
        }
    }

    pub fn reset_history(&mut self) {
        self.current_history = [0.0; 2];
        for c in &mut self.couplings {
            c.current_history = [0.0; 2];
        }
    }
}

/// A capacitor.
///
/// In voltage mode BDF2 is solved for the voltage, giving
///   v+ - v- - (2h/3C)*i = (4v1 - v2)/3
///
/// In phase mode the phase is the integral of the voltage, so BDF2 is
/// applied twice:
///   φ+ - φ- - (4h²/9σC)*i = (24φ1 - 22φ2 + 8φ3 - φ4)/9
#[derive(Debug, Clone)]
pub struct Capacitor {
    pub label: String,
    pub nodes: [Terminal; 2],
    pub capacitance: f64,
    pub branch: BranchIndex,
    pub analysis: AnalysisType,
    pub timestep: f64,
    pub stamp: Stamp,
    /// Node quantity across the capacitor at the previous four steps
    pub history: [f64; 4],
}

impl Capacitor {
    /// Create a new capacitor.
    pub fn new(
        label: String,
        nodes: [Terminal; 2],
        capacitance: f64,
        branch: BranchIndex,
        analysis: AnalysisType,
        timestep: f64,
    ) -> Result<Self> {
        NodeConfig::checked(&label, nodes)?;
        let mut capacitor = Self {
            label,
            nodes,
            capacitance,
            branch,
            analysis,
            timestep,
            stamp: Stamp::new(),
            history: [0.0; 4],
        };
        capacitor.build_stamp();
        Ok(capacitor)
    }

    pub fn coefficient(&self) -> f64 {
        let h = self.timestep;
        match self.analysis {
            AnalysisType::Voltage => -2.0 * h / (3.0 * self.capacitance),
            AnalysisType::Phase => -4.0 * h * h / (9.0 * SIGMA * self.capacitance),
        }
    }

    pub fn build_stamp(&mut self) {
        let mut stamp = Stamp::new();
        stamp.push_row(&[
            (column(self.nodes[0]), 1.0),
            (column(self.nodes[1]), -1.0),
            (Some(self.branch.0), self.coefficient()),
        ]);
        self.stamp = stamp;
    }

    pub fn rescale(&mut self, h: f64) {
        self.timestep = h;
        self.build_stamp();
    }

    pub fn fill_rhs(&self, rhs: &mut [f64]) {
        let [h1, h2, h3, h4] = self.history;
        rhs[self.branch.0] = match self.analysis {
            AnalysisType::Voltage => (4.0 * h1 - h2) / 3.0,
            AnalysisType::Phase => (24.0 * h1 - 22.0 * h2 + 8.0 * h3 - h4) / 9.0,
        };
    }

    pub fn advance(&mut self, x: &[f64]) {
        self.history.rotate_right(1);
        self.history[0] = across(x, self.nodes);
    }

    pub fn reset_history(&mut self) {
        self.history = [0.0; 4];
    }
}

/// Mutual inductance between two inductors.
///
/// Carries no rows of its own; the assembler folds M into both inductor
/// stamps through [`Inductor::couple`].
#[derive(Debug, Clone)]
pub struct MutualInductance {
    pub label: String,
    pub inductors: [String; 2],
    /// Coupling factor k
    pub factor: f64,
    /// M = k*sqrt(L1*L2)
    pub mutual: f64,
    pub stamp: Stamp,
}

impl MutualInductance {
    pub fn new(label: String, inductors: [String; 2], factor: f64, l1: f64, l2: f64) -> Self {
        Self {
            label,
            inductors,
            factor,
            mutual: factor * (l1 * l2).sqrt(),
            stamp: Stamp::new(),
        }
    }
}
