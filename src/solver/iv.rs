//! Current-voltage curves of a single junction.
//!
//! Each point is its own transient run: a junction of the model under test
//! is driven by a current source that first moves to a starting bias, then
//! ramps to the target bias. The point's voltage is the mean junction
//! voltage over the second half of the run. Starting the down-going
//! branches from the maximum bias reproduces the hysteresis of
//! underdamped junctions.

use std::io::{self, Write};

use crate::circuit::{AnalysisType, Declaration, ParamMap};
use crate::components::{JjModel, ModelLibrary};
use crate::error::{Result, SimError};

use super::results::TraceRequest;
use super::simulator::{simulate, DivergencePolicy, TransientConfig};

/// Time the bias reaches its starting value.
const SETTLE_TIME: f64 = 10e-12;
/// Time the bias reaches its target value.
const RAMP_END: f64 = 50e-12;

/// Settings of an I-V sweep.
#[derive(Debug, Clone, PartialEq)]
pub struct IvSweep {
    /// Largest bias magnitude (A)
    pub max_current: f64,
    /// Bias spacing between points (A)
    pub increment: f64,
    /// Timestep of each point's run (s)
    pub timestep: f64,
    /// Length of each point's run (s)
    pub stop_time: f64,
}

/// One point of an I-V curve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IvPoint {
    pub voltage: f64,
    pub current: f64,
}

/// A swept I-V curve, in sweep order.
#[derive(Debug, Clone, Default)]
pub struct IvCurve {
    pub model: String,
    pub points: Vec<IvPoint>,
}

impl IvCurve {
    /// Write the curve as `V,I` CSV.
    pub fn write_csv<W: Write + ?Sized>(&self, out: &mut W) -> io::Result<()> {
        writeln!(out, "V,I")?;
        for point in &self.points {
            writeln!(out, "{:e},{:e}", point.voltage, point.current)?;
        }
        Ok(())
    }
}

impl IvSweep {
    /// Sweep up to `max_current` with the default resolution.
    pub fn new(max_current: f64) -> Self {
        Self {
            max_current,
            increment: 2.5e-6,
            timestep: 0.05e-12,
            stop_time: 500e-12,
        }
    }

    /// Set the bias spacing.
    pub fn with_increment(mut self, increment: f64) -> Self {
        self.increment = increment;
        self
    }

    /// Set the timestep and length of each run.
    pub fn with_timing(mut self, timestep: f64, stop_time: f64) -> Self {
        self.timestep = timestep;
        self.stop_time = stop_time;
        self
    }

    fn validate(&self) -> Result<()> {
        let positive = |v: f64| v > 0.0 && v.is_finite();
        if !positive(self.max_current) || !positive(self.increment) {
            return Err(SimError::invalid_param("I-V sweep needs a positive maximum current and increment"));
        }
        if self.increment > self.max_current {
            return Err(SimError::invalid_param("I-V increment exceeds the maximum current"));
        }
        if self.stop_time <= RAMP_END {
            return Err(SimError::invalid_param(format!(
                "I-V runs must last longer than the {:e} s bias ramp",
                RAMP_END
            )));
        }
        Ok(())
    }

    /// Sweep 0 → +max → 0 → −max → 0.
    pub fn run(&self, model: &JjModel) -> Result<IvCurve> {
        self.validate()?;
        let steps = (self.max_current / self.increment).round() as usize;
        let max = steps as f64 * self.increment;
        let bias = |k: usize| k as f64 * self.increment;

        let mut schedule = Vec::with_capacity(4 * steps);
        schedule.extend((1..=steps).map(|k| (0.0, bias(k))));
        schedule.extend((0..steps).rev().map(|k| (max, bias(k))));
        schedule.extend((1..=steps).map(|k| (0.0, -bias(k))));
        schedule.extend((0..steps).rev().map(|k| (-max, -bias(k))));

        log::info!("I-V sweep of {}: {} points up to {:e} A", model.name, schedule.len(), max);
        let points = schedule
            .into_iter()
            .map(|(start, target)| self.bias_point(model, start, target))
            .collect::<Result<Vec<_>>>()?;

        Ok(IvCurve {
            model: model.name.clone(),
            points,
        })
    }

    /// Mean junction voltage at a bias reached from `start`.
    fn bias_point(&self, model: &JjModel, start: f64, target: f64) -> Result<IvPoint> {
        let mut models = ModelLibrary::new();
        models.insert(&model.name, None, model.clone());
        let decls = [
            Declaration::new(["B01", "1", "0", model.name.as_str()]),
            Declaration::new([
                "IB01".to_string(),
                "0".to_string(),
                "1".to_string(),
                format!("pwl(0 0 {:e} {:e} {:e} {:e})", SETTLE_TIME, start, RAMP_END, target),
            ]),
        ];
        let config = TransientConfig::new()
            .with_analysis(AnalysisType::Voltage)
            .with_timestep(self.timestep)
            .with_stop_time(self.stop_time)
            .with_divergence(DivergencePolicy::Refine);

        let (results, _) = simulate(
            &decls,
            &ParamMap::new(),
            &models,
            &config,
            &[TraceRequest::Node("1".to_string())],
        )?;
        let voltage = results.traces.first().map(|t| t.values.as_slice()).unwrap_or(&[]);
        let tail = &voltage[voltage.len() / 2..];
        let mean = if tail.is_empty() {
            0.0
        } else {
            tail.iter().sum::<f64>() / tail.len() as f64
        };

        Ok(IvPoint {
            voltage: mean,
            current: target,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sweep_rejects_bad_settings() {
        let model = JjModel::new("jj1");
        assert!(IvSweep::new(0.0).run(&model).is_err());
        assert!(IvSweep::new(1e-3).with_increment(2e-3).run(&model).is_err());
        assert!(IvSweep::new(1e-3).with_timing(0.1e-12, 40e-12).run(&model).is_err());
    }

    #[test]
    fn test_curve_csv() {
        let curve = IvCurve {
            model: "jj1".into(),
            points: vec![IvPoint {
                voltage: 2.5e-3,
                current: 1e-3,
            }],
        };
        let mut buffer = Vec::new();
        curve.write_csv(&mut buffer).unwrap();
        assert_eq!(String::from_utf8(buffer).unwrap(), "V,I\n2.5e-3,1e-3\n");
    }
}
