//! Transient simulation driver.

use std::collections::VecDeque;

use crate::circuit::{
    assemble_with_retry, AnalysisType, Circuit, Declaration, ParamMap, Spread,
};
use crate::components::{Device, ModelLibrary};
use crate::error::{Result, SimError};

use super::results::{Results, TraceRequest};
use super::{SparseLu, PHASE_GUARD};

/// What to do when a junction's predicted phase jumps too far in one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DivergencePolicy {
    /// Abort with [`SimError::PhaseDivergence`]
    #[default]
    Fatal,
    /// Re-solve the step with a finer timestep
    Refine,
}

/// Thermal noise settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoiseConfig {
    /// Noise temperature (K)
    pub temperature: f64,
    /// Noise effective bandwidth (Hz); defaults to 1/h
    pub bandwidth: Option<f64>,
}

/// Configuration for a transient run.
#[derive(Debug, Clone)]
pub struct TransientConfig {
    /// Quantity represented by node unknowns.
    pub analysis: AnalysisType,
    /// Base timestep (s).
    pub timestep: f64,
    /// Simulated time span (s).
    pub stop_time: f64,
    /// First time stored in the results (s).
    pub print_start: f64,
    /// Spacing of stored points; the timestep when unset.
    pub print_step: Option<f64>,
    /// Reaction to a diverging phase prediction.
    pub divergence: DivergencePolicy,
    /// Sub-steps per refined step.
    pub refine_factor: usize,
    /// Smallest timestep the assembler may fall back to.
    pub min_timestep: f64,
    /// Thermal noise on every resistor, when set.
    pub noise: Option<NoiseConfig>,
    /// Variation of device values applied during assembly.
    pub spread: Spread,
    /// Seed for noise sources and spread draws.
    pub seed: u64,
}

impl Default for TransientConfig {
    fn default() -> Self {
        Self {
            analysis: AnalysisType::Phase,
            timestep: 0.25e-12,
            stop_time: 1e-9,
            print_start: 0.0,
            print_step: None,
            divergence: DivergencePolicy::Fatal,
            refine_factor: 2,
            min_timestep: 1e-18,
            noise: None,
            spread: Spread::new(),
            seed: 0x5EED,
        }
    }
}

impl TransientConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the analysis type.
    pub fn with_analysis(mut self, analysis: AnalysisType) -> Self {
        self.analysis = analysis;
        self
    }

    /// Set the base timestep.
    pub fn with_timestep(mut self, timestep: f64) -> Self {
        self.timestep = timestep;
        self
    }

    /// Set the stop time.
    pub fn with_stop_time(mut self, stop_time: f64) -> Self {
        self.stop_time = stop_time;
        self
    }

    /// Set the first stored time.
    pub fn with_print_start(mut self, print_start: f64) -> Self {
        self.print_start = print_start;
        self
    }

    /// Set the spacing of stored points.
    pub fn with_print_step(mut self, print_step: f64) -> Self {
        self.print_step = Some(print_step);
        self
    }

    /// Set the divergence policy.
    pub fn with_divergence(mut self, divergence: DivergencePolicy) -> Self {
        self.divergence = divergence;
        self
    }

    /// Set the number of sub-steps used when refining.
    pub fn with_refine_factor(mut self, refine_factor: usize) -> Self {
        self.refine_factor = refine_factor;
        self
    }

    /// Set the smallest timestep allowed during assembly retries.
    pub fn with_min_timestep(mut self, min_timestep: f64) -> Self {
        self.min_timestep = min_timestep;
        self
    }

    /// Enable thermal noise.
    pub fn with_noise(mut self, temperature: f64, bandwidth: Option<f64>) -> Self {
        self.noise = Some(NoiseConfig {
            temperature,
            bandwidth,
        });
        self
    }

    /// Set the device value spread.
    pub fn with_spread(mut self, spread: Spread) -> Self {
        self.spread = spread;
        self
    }

    /// Set the seed for noise and spread.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Effective spacing of stored points.
    pub fn print_step(&self) -> f64 {
        self.print_step.unwrap_or(self.timestep)
    }

    /// Number of base steps, including t = 0.
    pub fn step_count(&self) -> usize {
        let ratio = self.stop_time / self.timestep;
        let nearest = ratio.round();
        let steps = if (ratio - nearest).abs() < 1e-6 { nearest } else { ratio.floor() };
        steps as usize + 1
    }

    /// Check that the values describe a runnable simulation.
    pub fn validate(&self) -> Result<()> {
        let positive = |value: f64| value > 0.0 && value.is_finite();
        if !positive(self.timestep) {
            return Err(SimError::invalid_param(format!("timestep must be positive, got {}", self.timestep)));
        }
        if !positive(self.stop_time) {
            return Err(SimError::invalid_param(format!("stop time must be positive, got {}", self.stop_time)));
        }
        if !positive(self.print_step()) {
            return Err(SimError::invalid_param("print step must be positive"));
        }
        if self.print_start < 0.0 || self.print_start > self.stop_time {
            return Err(SimError::invalid_param("print start must lie within the simulated span"));
        }
        if self.refine_factor < 2 {
            return Err(SimError::invalid_param("refine factor must be at least 2"));
        }
        if let Some(noise) = &self.noise {
            if noise.temperature < 0.0 || noise.bandwidth.map_or(false, |b| !positive(b)) {
                return Err(SimError::invalid_param("noise temperature and bandwidth must be positive"));
            }
        }
        Ok(())
    }
}

/// Progress report handed to the callback once per base step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    pub step: usize,
    pub total: usize,
    pub time: f64,
}

impl Progress {
    /// Completed fraction in [0, 1].
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.step as f64 / self.total as f64
        }
    }
}

/// Result of solving one (sub-)step.
enum StepStatus {
    Solved,
    Diverged { label: String, delta: f64 },
}

/// Number of base solutions kept for refinement.
const SOLUTION_HISTORY: usize = 4;

/// The transient simulator.
pub struct Transient {
    /// The circuit being simulated
    circuit: Circuit,
    config: TransientConfig,
    lu: SparseLu,
    /// Right-hand side, overwritten by the solution
    rhs: Vec<f64>,
    /// Latest solution
    x: Vec<f64>,
    /// Latest base solutions, newest first
    solutions: VecDeque<Vec<f64>>,
    /// Device indices in right-hand-side fill order
    fill_order: Vec<usize>,
    junctions: Vec<usize>,
    lines: Vec<usize>,
    refinements: usize,
    factorizations: usize,
}

impl Transient {
    /// Create a simulator for an assembled circuit.
    ///
    /// The circuit's stamps must have been built for `config.timestep`.
    pub fn new(circuit: Circuit, config: TransientConfig) -> Result<Self> {
        config.validate()?;
        if circuit.timestep != config.timestep || circuit.analysis != config.analysis {
            return Err(SimError::invalid_param(
                "circuit was assembled for a different timestep or analysis",
            ));
        }

        let mut lu = SparseLu::analyze(&circuit.matrix);
        lu.factorize(&circuit.matrix, false)?;

        let size = circuit.matrix_size();
        let mut fill_order: Vec<usize> = (0..circuit.devices.len()).collect();
        fill_order.sort_by_key(|&i| circuit.devices[i].rhs_order());
        let junctions = indices_of(&circuit.devices, Device::is_nonlinear);
        let lines = indices_of(&circuit.devices, |d| matches!(d, Device::TransmissionLine(_)));

        Ok(Self {
            circuit,
            config,
            lu,
            rhs: vec![0.0; size],
            x: vec![0.0; size],
            solutions: VecDeque::from(vec![vec![0.0; size]; SOLUTION_HISTORY]),
            fill_order,
            junctions,
            lines,
            refinements: 0,
            factorizations: 1,
        })
    }

    /// The simulated circuit.
    pub fn circuit(&self) -> &Circuit {
        &self.circuit
    }

    /// The configuration in use.
    pub fn config(&self) -> &TransientConfig {
        &self.config
    }

    /// Latest solution vector.
    pub fn solution(&self) -> &[f64] {
        &self.x
    }

    /// Number of refined steps so far.
    pub fn refinements(&self) -> usize {
        self.refinements
    }

    /// Number of numeric factorizations so far.
    pub fn factorizations(&self) -> usize {
        self.factorizations
    }

    /// Run the simulation.
    pub fn run(&mut self, traces: &[TraceRequest]) -> Result<Results> {
        self.run_with_progress(traces, |_| {})
    }

    /// Run the simulation, reporting progress after every base step.
    pub fn run_with_progress(
        &mut self,
        traces: &[TraceRequest],
        mut progress: impl FnMut(Progress),
    ) -> Result<Results> {
        let mut results = Results::for_requests(&self.circuit, traces)?;
        let h = self.config.timestep;
        let total = self.config.step_count();
        let print_step = self.config.print_step();
        let mut next_print = self.config.print_start;

        log::info!(
            "transient: {} analysis, h = {:e} s, {} steps, {} unknowns",
            self.config.analysis,
            h,
            total,
            self.circuit.matrix_size()
        );

        for n in 0..total {
            let t = n as f64 * h;
            let check = t > 0.01 * self.config.stop_time;

            match self.solve_at(t, check)? {
                StepStatus::Solved => self.finish_base_step(),
                StepStatus::Diverged { label, delta } => match self.config.divergence {
                    DivergencePolicy::Fatal => {
                        return Err(SimError::PhaseDivergence { label, time: t, delta });
                    }
                    DivergencePolicy::Refine => {
                        log::info!(
                            "refining step {} at t = {:e} s ({} jumped {:.3} rad)",
                            n,
                            t,
                            label,
                            delta
                        );
                        self.refine_step(n, self.config.refine_factor)?;
                    }
                },
            }

            if t + 0.5 * h >= self.config.print_start && t + 0.5 * h >= next_print {
                results.store(t, &self.x);
                while next_print <= t + 0.5 * h {
                    next_print += print_step;
                }
            }

            progress(Progress {
                step: n + 1,
                total,
                time: t,
            });
        }

        log::info!(
            "transient done: {} points stored, {} factorizations, {} refined steps",
            results.len(),
            self.factorizations,
            self.refinements
        );
        Ok(results)
    }

    /// Solve the system at time `t` with the current device histories.
    ///
    /// Junction regions are updated from the last solved voltage and the
    /// matrix is refactored only when one of them changed.
    fn solve_at(&mut self, t: f64, check_divergence: bool) -> Result<StepStatus> {
        self.rhs.fill(0.0);

        let mut changed = Vec::new();
        let mut diverged = None;
        for &i in &self.junctions {
            if let Device::Junction(jj) = &mut self.circuit.devices[i] {
                if jj.update_value(jj.voltage_history[0]) {
                    changed.push(i);
                }
                let delta = jj.predict();
                if check_divergence && delta > PHASE_GUARD && diverged.is_none() {
                    diverged = Some((jj.label.clone(), delta));
                }
            }
        }
        if let Some((label, delta)) = diverged {
            return Ok(StepStatus::Diverged { label, delta });
        }

        if !changed.is_empty() {
            for &i in &changed {
                self.circuit.matrix.refresh_device(i, &self.circuit.devices[i]);
            }
            self.factorize(true)?;
            log::trace!("refactored at t = {:e} s after {} junction state changes", t, changed.len());
        }

        for &i in &self.fill_order {
            self.circuit.devices[i].fill_rhs(&mut self.rhs, t);
        }
        self.lu.solve(&mut self.rhs)?;
        self.x.copy_from_slice(&self.rhs);
        Ok(StepStatus::Solved)
    }

    fn factorize(&mut self, reuse_pattern: bool) -> Result<()> {
        self.lu.factorize(&self.circuit.matrix, reuse_pattern)?;
        self.factorizations += 1;
        Ok(())
    }

    fn advance_devices(&mut self, x: &[f64]) {
        for device in &mut self.circuit.devices {
            device.advance(x);
        }
    }

    fn record_lines(&mut self) {
        for &i in &self.lines {
            if let Device::TransmissionLine(line) = &mut self.circuit.devices[i] {
                line.record();
            }
        }
    }

    fn push_solution(&mut self) {
        self.solutions.pop_back();
        self.solutions.push_front(self.x.clone());
    }

    fn finish_base_step(&mut self) {
        let x = std::mem::take(&mut self.x);
        self.advance_devices(&x);
        self.x = x;
        self.record_lines();
        self.push_solution();
    }

    fn rescale_all(&mut self, h: f64) -> Result<()> {
        for device in &mut self.circuit.devices {
            device.reset_history();
            device.rescale(h);
        }
        for i in 0..self.circuit.devices.len() {
            self.circuit.matrix.refresh_device(i, &self.circuit.devices[i]);
        }
        self.factorize(false)
    }

    /// Re-solve base step `n` as `factor` sub-steps of h/factor.
    ///
    /// Fine histories are seeded by quadratic interpolation of the last
    /// three base solutions. Afterwards the base timestep is restored and
    /// the device histories are rebuilt from the base solutions, the new
    /// one included.
    pub fn refine_step(&mut self, n: usize, factor: usize) -> Result<()> {
        let h = self.config.timestep;
        let fine = h / factor as f64;
        let start = n.saturating_sub(1) as f64 * h;
        self.refinements += 1;

        let seeds: Vec<Vec<f64>> = (0..SOLUTION_HISTORY)
            .rev()
            .map(|back| self.interpolate(-(back as f64) / factor as f64))
            .collect();

        self.rescale_all(fine)?;
        for seed in &seeds {
            self.advance_devices(seed);
        }

        for sub in 1..=factor {
            let t = start + sub as f64 * fine;
            match self.solve_at(t, true)? {
                StepStatus::Solved => {
                    let x = std::mem::take(&mut self.x);
                    self.advance_devices(&x);
                    self.x = x;
                }
                StepStatus::Diverged { label, delta } => {
                    return Err(SimError::PhaseDivergence { label, time: t, delta });
                }
            }
        }

        self.rescale_all(h)?;
        let replay: Vec<Vec<f64>> = self
            .solutions
            .iter()
            .take(SOLUTION_HISTORY - 1)
            .rev()
            .cloned()
            .collect();
        for x in &replay {
            self.advance_devices(x);
        }
        let x = std::mem::take(&mut self.x);
        self.advance_devices(&x);
        self.x = x;
        self.record_lines();
        self.push_solution();
        Ok(())
    }

    /// Quadratic through the last three base solutions, at `s` base steps
    /// from the newest (s <= 0).
    fn interpolate(&self, s: f64) -> Vec<f64> {
        let w0 = (s + 1.0) * (s + 2.0) / 2.0;
        let w1 = -s * (s + 2.0);
        let w2 = s * (s + 1.0) / 2.0;
        let (x0, x1, x2) = (&self.solutions[0], &self.solutions[1], &self.solutions[2]);
        (0..x0.len())
            .map(|i| w0 * x0[i] + w1 * x1[i] + w2 * x2[i])
            .collect()
    }
}

fn indices_of(devices: &[Device], pred: impl Fn(&Device) -> bool) -> Vec<usize> {
    devices
        .iter()
        .enumerate()
        .filter(|(_, d)| pred(d))
        .map(|(i, _)| i)
        .collect()
}

/// Assemble and run a transient simulation in one call.
///
/// The timestep may be halved during assembly; the configuration actually
/// used is returned with the results.
pub fn simulate(
    decls: &[Declaration],
    params: &ParamMap,
    models: &ModelLibrary,
    config: &TransientConfig,
    traces: &[TraceRequest],
) -> Result<(Results, TransientConfig)> {
    let (circuit, config) = assemble_with_retry(decls, params, models, config)?;
    let mut sim = Transient::new(circuit, config.clone())?;
    let results = sim.run(traces)?;
    Ok((results, config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::{assemble, AssemblyOutcome};
    use approx::assert_relative_eq;

    fn build(lines: &[&str], config: &TransientConfig) -> Transient {
        let decls: Vec<Declaration> = lines.iter().map(|l| Declaration::new(l.split_whitespace())).collect();
        match assemble(&decls, &ParamMap::new(), &ModelLibrary::new(), config).unwrap() {
            AssemblyOutcome::Ready(c) => Transient::new(c, config.clone()).unwrap(),
            AssemblyOutcome::NeedsSmallerTimestep => panic!("unexpected retry"),
        }
    }

    #[test]
    fn test_config_defaults() {
        let c = TransientConfig::default();
        assert_eq!(c.analysis, AnalysisType::Phase);
        assert_eq!(c.print_step(), 0.25e-12);
        assert_eq!(c.divergence, DivergencePolicy::Fatal);
        assert_eq!(c.step_count(), 4001);
        assert!(c.validate().is_ok());
        assert!(c.clone().with_refine_factor(1).validate().is_err());
        assert!(c.with_timestep(0.0).validate().is_err());
    }

    #[test]
    fn test_resistive_divider() {
        let config = TransientConfig::new()
            .with_analysis(AnalysisType::Voltage)
            .with_timestep(1e-12)
            .with_stop_time(10e-12);
        let mut sim = build(&["V1 a 0 3", "R1 a b 1", "R2 b 0 2"], &config);
        let results = sim.run(&[TraceRequest::Node("b".into())]).unwrap();
        assert_eq!(results.len(), 11);
        for v in &results.traces[0].values {
            assert_relative_eq!(*v, 2.0, max_relative = 1e-12);
        }
        assert_eq!(sim.factorizations(), 1);
    }

    #[test]
    fn test_rc_charging() {
        // tau = 1 ps, h = 0.01 ps
        let config = TransientConfig::new()
            .with_analysis(AnalysisType::Voltage)
            .with_timestep(0.01e-12)
            .with_stop_time(5e-12);
        let mut sim = build(&["V1 a 0 1", "R1 a b 1", "C1 b 0 1p"], &config);
        let results = sim.run(&[TraceRequest::Node("b".into())]).unwrap();
        let values = &results.traces[0].values;
        let t_tau = 100;
        assert_relative_eq!(values[t_tau], 1.0 - (-1.0f64).exp(), max_relative = 1e-2);
        assert_relative_eq!(*values.last().unwrap(), 1.0 - (-5.0f64).exp(), max_relative = 1e-2);
    }

    #[test]
    fn test_print_schedule() {
        let config = TransientConfig::new()
            .with_analysis(AnalysisType::Voltage)
            .with_timestep(1e-12)
            .with_stop_time(20e-12)
            .with_print_start(5e-12)
            .with_print_step(5e-12);
        let mut sim = build(&["I1 0 a 1m", "R1 a 0 1"], &config);
        let results = sim.run(&[]).unwrap();
        assert_eq!(results.len(), 4);
        assert_relative_eq!(results.time[0], 5e-12, max_relative = 1e-9);
        assert_relative_eq!(results.time[3], 20e-12, max_relative = 1e-9);
    }

    #[test]
    fn test_progress_callback() {
        let config = TransientConfig::new().with_timestep(1e-12).with_stop_time(9e-12);
        let mut sim = build(&["I1 0 a 1u", "R1 a 0 1"], &config);
        let mut seen = Vec::new();
        sim.run_with_progress(&[], |p| seen.push(p.step)).unwrap();
        assert_eq!(seen, (1..=10).collect::<Vec<_>>());
    }

    #[test]
    fn test_mismatched_circuit_rejected() {
        let config = TransientConfig::new().with_timestep(1e-12);
        let decls = vec![Declaration::new(["R1", "a", "0", "1"])];
        let circuit = match assemble(&decls, &ParamMap::new(), &ModelLibrary::new(), &config).unwrap() {
            AssemblyOutcome::Ready(c) => c,
            AssemblyOutcome::NeedsSmallerTimestep => panic!("unexpected retry"),
        };
        assert!(Transient::new(circuit, config.with_timestep(2e-12)).is_err());
    }
}
