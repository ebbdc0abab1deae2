//! Lossless transmission line.

use std::collections::VecDeque;

use super::{terminal_connections, NodeConnection, Stamp};
use crate::circuit::{across, column, AnalysisType, BranchIndex, NodeConfig, Terminal};
use crate::error::Result;
use crate::SIGMA;

/// Lossless transmission line with delay TD = k*h.
///
/// Each port sees the wave launched from the other port k steps earlier:
///   v1(t) - Z0*i1(t) = W2(t - TD),   W2 = v2 + Z0*i2
///   v2(t) - Z0*i2(t) = W1(t - TD),   W1 = v1 + Z0*i1
///
/// Outgoing waves are kept in a ring of the last k+3 base steps. During a
/// refined step the delayed time falls between base steps and the ring is
/// interpolated linearly.
#[derive(Debug, Clone)]
pub struct TransmissionLine {
    pub label: String,
    pub ports: [[Terminal; 2]; 2],
    pub impedance: f64,
    /// Delay in base timesteps
    pub steps: usize,
    pub branches: [BranchIndex; 2],
    pub analysis: AnalysisType,
    pub timestep: f64,
    pub base_timestep: f64,
    pub stamp: Stamp,
    /// Port phases at the previous two steps
    pub phase_history: [[f64; 2]; 2],
    /// Outgoing waves computed by the last `advance`
    pub last_wave: [f64; 2],
    waves: VecDeque<[f64; 2]>,
    recorded: usize,
}

const SNAP: f64 = 1e-6;

impl TransmissionLine {
    pub fn new(
        label: String,
        ports: [[Terminal; 2]; 2],
        impedance: f64,
        steps: usize,
        branches: [BranchIndex; 2],
        analysis: AnalysisType,
        timestep: f64,
    ) -> Result<Self> {
        NodeConfig::checked(&label, ports[0])?;
        NodeConfig::checked(&label, ports[1])?;
        let mut line = Self {
            label,
            ports,
            impedance,
            steps,
            branches,
            analysis,
            timestep,
            base_timestep: timestep,
            stamp: Stamp::new(),
            phase_history: [[0.0; 2]; 2],
            last_wave: [0.0; 2],
            waves: VecDeque::with_capacity(steps + 3),
            recorded: 0,
        };
        line.build_stamp();
        Ok(line)
    }

    pub fn build_stamp(&mut self) {
        let z = match self.analysis {
            AnalysisType::Voltage => -self.impedance,
            AnalysisType::Phase => -2.0 * self.timestep * self.impedance / (3.0 * SIGMA),
        };
        let mut stamp = Stamp::new();
        for (port, branch) in self.ports.iter().zip(self.branches) {
            stamp.push_row(&[(column(port[0]), 1.0), (column(port[1]), -1.0), (Some(branch.0), z)]);
        }
        self.stamp = stamp;
    }

    pub fn rescale(&mut self, h: f64) {
        self.timestep = h;
        self.build_stamp();
    }

    pub fn node_connections(&self) -> Vec<NodeConnection> {
        let mut out = terminal_connections(self.ports[0], self.branches[0]);
        out.extend(terminal_connections(self.ports[1], self.branches[1]));
        out
    }

    fn stored(&self, step: usize, port: usize) -> f64 {
        let first = self.recorded - self.waves.len();
        step.checked_sub(first)
            .and_then(|i| self.waves.get(i))
            .map_or(0.0, |w| w[port])
    }

    /// Outgoing wave of `port` at time `t - TD`.
    pub fn delayed_wave(&self, t: f64, port: usize) -> f64 {
        let h = self.base_timestep;
        let position = (t - self.steps as f64 * h) / h;
        if position < 0.0 {
            return 0.0;
        }
        let nearest = position.round();
        if (position - nearest).abs() < SNAP {
            return self.stored(nearest as usize, port);
        }
        let below = position.floor();
        let frac = position - below;
        let a = self.stored(below as usize, port);
        let b = self.stored(below as usize + 1, port);
        a + (b - a) * frac
    }

    pub fn fill_rhs(&self, rhs: &mut [f64], t: f64) {
        let incoming = [self.delayed_wave(t, 1), self.delayed_wave(t, 0)];
        for (i, branch) in self.branches.iter().enumerate() {
            rhs[branch.0] = match self.analysis {
                AnalysisType::Voltage => incoming[i],
                AnalysisType::Phase => {
                    let [p1, p2] = self.phase_history[i];
                    (4.0 * p1 - p2) / 3.0 + 2.0 * self.timestep / (3.0 * SIGMA) * incoming[i]
                }
            };
        }
    }

    pub fn advance(&mut self, x: &[f64]) {
        let h = self.timestep;
        for i in 0..2 {
            let value = across(x, self.ports[i]);
            let voltage = match self.analysis {
                AnalysisType::Voltage => value,
                AnalysisType::Phase => {
                    let [p1, p2] = self.phase_history[i];
                    SIGMA * (3.0 * value - 4.0 * p1 + p2) / (2.0 * h)
                }
            };
            self.last_wave[i] = voltage + self.impedance * x[self.branches[i].0];
            self.phase_history[i] = [value, self.phase_history[i][0]];
        }
    }

    /// Store the waves of the base step just completed.
    pub fn record(&mut self) {
        if self.waves.len() == self.steps + 3 {
            self.waves.pop_front();
        }
        self.waves.push_back(self.last_wave);
        self.recorded += 1;
    }

    /// Clear port history; the recorded waves are kept.
    pub fn reset_history(&mut self) {
        self.phase_history = [[0.0; 2]; 2];
        self.last_wave = [0.0; 2];
    }

    /// Number of base steps recorded so far.
    pub fn recorded(&self) -> usize {
        self.recorded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::NodeIndex;
    use approx::assert_relative_eq;

    const H: f64 = 1e-12;

    fn line(steps: usize) -> TransmissionLine {
        TransmissionLine::new(
            "T1".into(),
            [[Some(NodeIndex(0)), None], [Some(NodeIndex(1)), None]],
            50.0,
            steps,
            [BranchIndex(2), BranchIndex(3)],
            AnalysisType::Voltage,
            H,
        )
        .unwrap()
    }

    fn record_wave(t: &mut TransmissionLine, v1: f64) {
        t.advance(&[v1, 0.0, 0.0, 0.0]);
        t.record();
    }

    #[test]
    fn test_rows_and_connections() {
        let t = line(3);
        assert_eq!(t.stamp.row_counts, vec![2, 2]);
        assert_eq!(t.stamp.non_zeros, vec![1.0, -50.0, 1.0, -50.0]);
        assert_eq!(t.node_connections().len(), 2);
    }

    #[test]
    fn test_delayed_lookup() {
        let mut t = line(2);
        for v in [1.0, 2.0, 3.0, 4.0] {
            record_wave(&mut t, v);
        }
        assert_eq!(t.recorded(), 4);
        // Steps 0..3 hold 1..4; delay is two steps
        assert_relative_eq!(t.delayed_wave(3.0 * H, 0), 2.0);
        assert_relative_eq!(t.delayed_wave(2.5 * H, 0), 1.5);
        assert_relative_eq!(t.delayed_wave(1.0 * H, 0), 0.0);
        assert_relative_eq!(t.delayed_wave(3.0 * H * (1.0 + 1e-9), 0), 2.0);

        let mut rhs = vec![0.0; 4];
        t.fill_rhs(&mut rhs, 5.0 * H);
        assert_relative_eq!(rhs[3], 4.0);
        assert_relative_eq!(rhs[2], 0.0);
    }

    #[test]
    fn test_ring_is_bounded() {
        let mut t = line(1);
        for i in 0..10 {
            record_wave(&mut t, i as f64);
        }
        assert_eq!(t.waves.len(), 4);
        assert_relative_eq!(t.delayed_wave(10.0 * H, 0), 9.0);
        assert_relative_eq!(t.delayed_wave(7.0 * H, 0), 6.0);
    }

    #[test]
    fn test_reset_keeps_waves() {
        let mut t = line(1);
        record_wave(&mut t, 5.0);
        t.reset_history();
        assert_eq!(t.last_wave, [0.0; 2]);
        assert_relative_eq!(t.delayed_wave(H, 0), 5.0);
    }
}
