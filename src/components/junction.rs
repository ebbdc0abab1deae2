//! Josephson junction: resistively and capacitively shunted model with a
//! piecewise-linear quasiparticle branch.

use std::f64::consts::PI;

use super::Stamp;
use crate::circuit::{across, column, AnalysisType, BranchIndex, NodeConfig, ScopedMap, Terminal};
use crate::error::{Result, SimError};
use crate::{BOLTZMANN, EV, SIGMA};

/// Junction model parameters, as written on a `.model` card.
#[derive(Debug, Clone, PartialEq)]
pub struct JjModel {
    pub name: String,
    /// Gap voltage
    pub vg: f64,
    /// Critical current
    pub ic: f64,
    /// Resistance type; only type 1 switches between quasiparticle regions
    pub rtype: i32,
    /// Normal-state resistance
    pub rn: f64,
    /// Subgap resistance
    pub r0: f64,
    /// Junction capacitance
    pub c: f64,
    /// Operating temperature
    pub t: f64,
    /// Critical temperature
    pub tc: f64,
    /// Width of the transition around the gap voltage
    pub delta_v: f64,
    /// Transparency
    pub d: f64,
    /// Ratio of critical current to the current jump at the gap
    pub icfact: f64,
    /// Phase the junction rests at before the first step (π for π-junctions)
    pub phase_offset: f64,
}

impl JjModel {
    /// Model with default parameters.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            vg: 2.8e-3,
            ic: 1e-3,
            rtype: 1,
            rn: 5.0,
            r0: 30.0,
            c: 2.5e-12,
            t: 4.2,
            tc: 9.1,
            delta_v: 0.1e-3,
            d: 0.0,
            icfact: PI / 4.0,
            phase_offset: 0.0,
        }
    }

    /// Build a model from `key=value` pairs; unlisted keys keep their defaults.
    pub fn from_parameters<'a>(
        name: &str,
        pairs: impl IntoIterator<Item = (&'a str, f64)>,
    ) -> Result<Self> {
        let mut model = Self::new(name);
        for (key, value) in pairs {
            model.set(key, value)?;
        }
        model.validate()?;
        Ok(model)
    }

    /// Set one parameter by its card name.
    pub fn set(&mut self, key: &str, value: f64) -> Result<()> {
        match key.to_lowercase().as_str() {
            "vg" | "vgap" => self.vg = value,
            "ic" | "icrit" => self.ic = value,
            "rtype" => self.rtype = value.round() as i32,
            "rn" => self.rn = value,
            "r0" => self.r0 = value,
            "cap" | "c" => self.c = value,
            "t" => self.t = value,
            "tc" => self.tc = value,
            "delv" => self.delta_v = value,
            "d" => self.d = value,
            "icfact" | "icfct" => self.icfact = value,
            "phi" => self.phase_offset = value,
            other => {
                return Err(SimError::InvalidModelParameter {
                    model: self.name.clone(),
                    param: other.to_string(),
                    message: "unknown junction model parameter".to_string(),
                })
            }
        }
        Ok(())
    }

    fn invalid(&self, param: &str, message: &str) -> SimError {
        SimError::InvalidModelParameter {
            model: self.name.clone(),
            param: param.to_string(),
            message: message.to_string(),
        }
    }

    /// Reject values that make the junction equations meaningless.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("rn", self.rn),
            ("r0", self.r0),
            ("c", self.c),
            ("delv", self.delta_v),
            ("icfact", self.icfact),
            ("tc", self.tc),
        ];
        if !self.phase_offset.is_finite() {
            return Err(self.invalid("phi", "phase offset must be finite"));
        }
        for (param, value) in positive {
            if !(value > 0.0 && value.is_finite()) {
                return Err(self.invalid(param, "must be positive"));
            }
        }
        if self.t < 0.0 || self.t >= self.tc {
            return Err(self.invalid("t", "temperature must lie below the critical temperature"));
        }
        if !(0.0..1.0).contains(&self.d) {
            return Err(self.invalid("d", "transparency must lie in [0, 1)"));
        }
        Ok(())
    }

    /// Superconducting gap energy Δ(T).
    pub fn gap(&self) -> f64 {
        let ratio = self.t / self.tc;
        1.76 * BOLTZMANN * self.tc * (PI / 2.0 * ratio * ratio).cos().sqrt()
    }

    /// Copy of the model with area scaling applied.
    pub fn scaled(&self, area: f64) -> Self {
        Self {
            c: self.c * area,
            rn: self.rn / area,
            r0: self.r0 / area,
            ic: self.ic * area,
            ..self.clone()
        }
    }
}

/// Library of junction models keyed by name and subcircuit.
pub type ModelLibrary = ScopedMap<JjModel>;

/// Quasiparticle region of the junction's I-V curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    /// |v| below the gap: leakage through R0
    Subgap,
    /// Steep rise around the gap voltage
    Transition,
    /// |v| above the gap: normal resistance Rn
    Normal,
}

/// A Josephson junction.
///
/// Owns two branches. The `variable` branch carries the quantity that is
/// not a node unknown (phase in voltage mode, voltage in phase mode) and
/// links it to the node difference with BDF2. The `current` branch carries
/// the junction current:
///   i = Is(φ0) + G*v + iT - (C/2h)(4v1 - v2)
/// with G = g_region + 3C/(2h) and φ0 the extrapolated phase of this step.
#[derive(Debug, Clone)]
pub struct Junction {
    pub label: String,
    pub nodes: [Terminal; 2],
    /// Area-scaled model
    pub model: JjModel,
    pub area: f64,
    pub variable: BranchIndex,
    pub current: BranchIndex,
    pub analysis: AnalysisType,
    pub timestep: f64,
    pub stamp: Stamp,
    pub region: Region,
    /// Voltage at the previous three steps
    pub voltage_history: [f64; 3],
    /// Phase at the previous two steps
    pub phase_history: [f64; 2],
    /// Extrapolated phase for the step being solved
    pub predicted_phase: f64,
    lower: f64,
    upper: f64,
    g_large: f64,
    rn_calc: f64,
    gap: f64,
}

impl Junction {
    /// Create a new junction.
    pub fn new(
        label: String,
        nodes: [Terminal; 2],
        model: &JjModel,
        area: f64,
        branches: [BranchIndex; 2],
        analysis: AnalysisType,
        timestep: f64,
    ) -> Result<Self> {
        NodeConfig::checked(&label, nodes)?;
        if !(area > 0.0 && area.is_finite()) {
            return Err(SimError::InvalidModelParameter {
                model: model.name.clone(),
                param: "area".to_string(),
                message: format!("junction {} needs a positive area", label),
            });
        }
        let model = model.scaled(area);
        let gap = model.gap();
        let thermal = (gap / (2.0 * BOLTZMANN * model.t)).tanh();
        let rn_calc = PI * gap / (2.0 * EV * model.ic) * thermal;
        let offset = model.phase_offset;

        let mut junction = Self {
            label,
            nodes,
            lower: model.vg - 0.5 * model.delta_v,
            upper: model.vg + 0.5 * model.delta_v,
            g_large: model.ic / (model.icfact * model.delta_v),
            model,
            area,
            variable: branches[0],
            current: branches[1],
            analysis,
            timestep,
            stamp: Stamp::new(),
            region: Region::Subgap,
            voltage_history: [0.0; 3],
            phase_history: [offset; 2],
            predicted_phase: offset,
            rn_calc,
            gap,
        };
        junction.build_stamp();
        Ok(junction)
    }

    /// Quasiparticle conductance of a region, without the capacitive part.
    pub fn region_conductance(&self, region: Region) -> f64 {
        match region {
            Region::Subgap => 1.0 / self.model.r0,
            Region::Transition => self.g_large,
            Region::Normal => 1.0 / self.model.rn,
        }
    }

    /// Total companion conductance G for the current region.
    pub fn conductance(&self) -> f64 {
        self.region_conductance(self.region) + 3.0 * self.model.c / (2.0 * self.timestep)
    }

    pub fn build_stamp(&mut self) {
        let h = self.timestep;
        let (pos, neg) = (column(self.nodes[0]), column(self.nodes[1]));
        let var = Some(self.variable.0);
        let cur = Some(self.current.0);
        let g = -1.0 / self.conductance();

        let mut stamp = Stamp::new();
        match self.analysis {
            AnalysisType::Voltage => {
                stamp.push_row(&[(pos, 1.0), (neg, -1.0), (var, -3.0 * SIGMA / (2.0 * h))]);
                stamp.push_row(&[(pos, 1.0), (neg, -1.0), (cur, g)]);
            }
            AnalysisType::Phase => {
                stamp.push_row(&[(pos, 1.0), (neg, -1.0), (var, -2.0 * h / (3.0 * SIGMA))]);
                stamp.push_row(&[(var, 1.0), (cur, g)]);
            }
        }
        self.stamp = stamp;
    }

    pub fn rescale(&mut self, h: f64) {
        self.timestep = h;
        self.build_stamp();
    }

    fn last_entry(&self) -> f64 {
        self.stamp.non_zeros.last().copied().unwrap_or(0.0)
    }

    /// Select the quasiparticle region from the last solved voltage.
    ///
    /// Returns true only if the stamp's conductance entry changed.
    pub fn update_value(&mut self, v: f64) -> bool {
        if self.model.rtype != 1 {
            return false;
        }
        let magnitude = v.abs();
        self.region = if magnitude < self.lower {
            Region::Subgap
        } else if magnitude < self.upper {
            Region::Transition
        } else {
            Region::Normal
        };

        let entry = -1.0 / self.conductance();
        let previous = self.last_entry();
        if let Some(last) = self.stamp.non_zeros.last_mut() {
            *last = entry;
        }
        entry != previous
    }

    /// Extrapolate the phase for the coming step.
    ///
    /// Returns the size of the jump from the previous phase.
    pub fn predict(&mut self) -> f64 {
        let [v1, v2, v3] = self.voltage_history;
        let [p1, p2] = self.phase_history;
        let v0 = 2.5 * v1 - 2.0 * v2 + 0.5 * v3;
        self.predicted_phase =
            (4.0 / 3.0) * p1 - (1.0 / 3.0) * p2 + 2.0 * self.timestep / (3.0 * SIGMA) * v0;
        (self.predicted_phase - p1).abs()
    }

    /// Supercurrent at phase `phi`.
    pub fn supercurrent(&self, phi: f64) -> f64 {
        let half = (phi / 2.0).sin();
        let root = (1.0 - self.model.d * half * half).sqrt();
        PI * self.gap / (2.0 * EV * self.rn_calc) * phi.sin() / root
            * (self.gap / (2.0 * BOLTZMANN * self.model.t) * root).tanh()
    }

    /// Offset current of the piecewise quasiparticle branch.
    pub fn transition_current(&self) -> f64 {
        let sign = if self.voltage_history[0] < 0.0 { -1.0 } else { 1.0 };
        match self.region {
            Region::Subgap => 0.0,
            Region::Transition => sign * self.lower * (1.0 / self.model.r0 - self.g_large),
            Region::Normal => {
                sign * (self.model.ic / self.model.icfact + self.model.vg / self.model.r0
                    - self.lower / self.model.rn)
            }
        }
    }

    pub fn fill_rhs(&self, rhs: &mut [f64]) {
        let h = self.timestep;
        let [v1, v2, _] = self.voltage_history;
        let [p1, p2] = self.phase_history;

        rhs[self.variable.0] = match self.analysis {
            AnalysisType::Voltage => SIGMA / (2.0 * h) * (p2 - 4.0 * p1),
            AnalysisType::Phase => (4.0 * p1 - p2) / 3.0,
        };

        let source = self.supercurrent(self.predicted_phase) + self.transition_current()
            - self.model.c / (2.0 * h) * (4.0 * v1 - v2);
        rhs[self.current.0] = self.last_entry() * source;
    }

    /// Voltage across the junction in a solved vector.
    pub fn voltage(&self, x: &[f64]) -> f64 {
        match self.analysis {
            AnalysisType::Voltage => across(x, self.nodes),
            AnalysisType::Phase => x[self.variable.0],
        }
    }

    /// Phase across the junction in a solved vector.
    pub fn phase(&self, x: &[f64]) -> f64 {
        match self.analysis {
            AnalysisType::Voltage => x[self.variable.0],
            AnalysisType::Phase => across(x, self.nodes),
        }
    }

    pub fn advance(&mut self, x: &[f64]) {
        let (v, phi) = (self.voltage(x), self.phase(x));
        let [v1, v2, _] = self.voltage_history;
        self.voltage_history = [v, v1, v2];
        self.phase_history = [phi, self.phase_history[0]];
    }

    /// Return to rest at the model's phase offset.
    pub fn reset_history(&mut self) {
        self.voltage_history = [0.0; 3];
        self.phase_history = [self.model.phase_offset; 2];
        self.predicted_phase = self.model.phase_offset;
    }

    /// Lower and upper edges of the transition region.
    pub fn thresholds(&self) -> (f64, f64) {
        (self.lower, self.upper)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::NodeIndex;
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    const H: f64 = 0.25e-12;

    fn junction(analysis: AnalysisType) -> Junction {
        Junction::new(
            "B1".into(),
            [Some(NodeIndex(0)), None],
            &JjModel::new("jj1"),
            1.0,
            [BranchIndex(1), BranchIndex(2)],
            analysis,
            H,
        )
        .unwrap()
    }

    #[test]
    fn test_model_keys_and_aliases() {
        let model = JjModel::from_parameters("jjx", [("ICRIT", 0.1e-3), ("c", 0.07e-12), ("vgap", 2.5e-3)]).unwrap();
        assert_relative_eq!(model.ic, 0.1e-3);
        assert_relative_eq!(model.c, 0.07e-12);
        assert_relative_eq!(model.vg, 2.5e-3);
        assert_relative_eq!(model.rn, 5.0);

        let err = JjModel::from_parameters("jjx", [("bogus", 1.0)]).unwrap_err();
        assert!(matches!(err, SimError::InvalidModelParameter { ref param, .. } if param == "bogus"));
    }

    #[test]
    fn test_model_rejects_hot_junction() {
        assert!(JjModel::from_parameters("hot", [("t", 10.0)]).is_err());
    }

    #[test]
    fn test_area_scaling() {
        let model = JjModel::new("jj1").scaled(2.0);
        assert_relative_eq!(model.ic, 2e-3);
        assert_relative_eq!(model.c, 5e-12);
        assert_relative_eq!(model.rn, 2.5);
        assert_relative_eq!(model.r0, 15.0);
    }

    #[test]
    fn test_supercurrent_reduces_to_sine() {
        let jj = junction(AnalysisType::Phase);
        for phi in [0.3, 1.0, PI / 2.0, 2.5] {
            assert_relative_eq!(jj.supercurrent(phi), 1e-3 * phi.sin(), max_relative = 1e-9);
        }
    }

    #[test]
    fn test_region_sweep_changes_twice() {
        let mut jj = junction(AnalysisType::Voltage);
        let initial = jj.stamp.clone();
        let mut changes = 0;
        // Sweep from zero through the gap to well above it
        for i in 0..=400 {
            let v = 4e-3 * i as f64 / 400.0;
            if jj.update_value(v) {
                changes += 1;
            }
        }
        assert_eq!(changes, 2);
        assert_eq!(jj.region, Region::Normal);
        assert_relative_eq!(
            *jj.stamp.non_zeros.last().unwrap(),
            -1.0 / (1.0 / 5.0 + 3.0 * 2.5e-12 / (2.0 * H))
        );
        // Only the conductance entry moved
        let n = initial.len();
        assert_eq!(initial.non_zeros[..n - 1], jj.stamp.non_zeros[..n - 1]);
    }

    #[test]
    fn test_rtype_zero_never_changes() {
        let mut model = JjModel::new("jj0");
        model.rtype = 0;
        let mut jj = Junction::new(
            "B1".into(),
            [Some(NodeIndex(0)), None],
            &model,
            1.0,
            [BranchIndex(1), BranchIndex(2)],
            AnalysisType::Phase,
            H,
        )
        .unwrap();
        assert!(!jj.update_value(5e-3));
        assert_eq!(jj.region, Region::Subgap);
    }

    #[test]
    fn test_phase_mode_rows() {
        let jj = junction(AnalysisType::Phase);
        assert_eq!(jj.stamp.row_counts, vec![2, 2]);
        assert_eq!(jj.stamp.column_indices, vec![0, 1, 1, 2]);
        assert_relative_eq!(jj.stamp.non_zeros[1], -2.0 * H / (3.0 * SIGMA));
    }

    #[test]
    fn test_prediction_follows_voltage() {
        let mut jj = junction(AnalysisType::Voltage);
        // Constant voltage: phase grows linearly
        let v = 1e-3;
        let dphi = v * H / SIGMA;
        jj.advance(&[v, 0.0, 0.0]);
        jj.advance(&[v, dphi, 0.0]);
        jj.advance(&[v, 2.0 * dphi, 0.0]);
        let jump = jj.predict();
        assert_relative_eq!(jj.predicted_phase, 3.0 * dphi, max_relative = 1e-9);
        assert_relative_eq!(jump, dphi, max_relative = 1e-9);
    }

    #[test]
    fn test_current_row_rhs() {
        let mut jj = junction(AnalysisType::Voltage);
        jj.advance(&[1e-4, 0.0, 0.0]);
        jj.predict();
        let mut rhs = vec![0.0; 3];
        jj.fill_rhs(&mut rhs);
        let source = jj.supercurrent(jj.predicted_phase) - 2.5e-12 / (2.0 * H) * 4e-4;
        assert_relative_eq!(rhs[2], -source / jj.conductance(), max_relative = 1e-12);
    }

    #[test]
    fn test_pi_junction_rests_at_offset() {
        let model = JjModel::from_parameters("pi", [("phi", PI)]).unwrap();
        let mut jj = Junction::new(
            "B1".into(),
            [Some(NodeIndex(0)), None],
            &model,
            1.0,
            [BranchIndex(1), BranchIndex(2)],
            AnalysisType::Phase,
            H,
        )
        .unwrap();
        // No bias: the prediction stays put
        assert_abs_diff_eq!(jj.predict(), 0.0, epsilon = 1e-12);
        assert_relative_eq!(jj.predicted_phase, PI, max_relative = 1e-12);

        // Phase row pins the node phase to the offset
        let mut rhs = vec![0.0; 3];
        jj.fill_rhs(&mut rhs);
        assert_relative_eq!(rhs[1], PI, max_relative = 1e-12);

        // A small excursion draws supercurrent opposite to an ordinary junction
        let plain = junction(AnalysisType::Phase);
        assert_relative_eq!(jj.supercurrent(PI + 0.2), -plain.supercurrent(0.2), max_relative = 1e-9);
        assert!(jj.supercurrent(PI + 0.2) < 0.0);

        jj.advance(&[1.0, 1e-4, 0.0]);
        jj.reset_history();
        assert_eq!(jj.phase_history, [PI, PI]);
        assert_eq!(jj.predicted_phase, PI);
    }
}
