//! Statistical variation of device values.
//!
//! A spread `s` draws each value from a normal distribution centred on the
//! nominal value with a standard deviation of `value * s / 3`, so that the
//! range `value * (1 ± s)` covers three sigma.
//!
//! Draws are deterministic: each device hashes its label together with
//! the run seed, so reassembling at a smaller timestep or reordering the
//! deck yields the same values.

use crate::components::{gaussian, splitmix64};
use crate::error::{Result, SimError};

/// Device classes with their own spread setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpreadKind {
    Resistor,
    Inductor,
    Capacitor,
    /// Applied to the junction area
    Junction,
}

/// Spread settings from a `.spread` line.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Spread {
    /// Used for any class without its own setting
    pub global: Option<f64>,
    pub resistor: Option<f64>,
    pub inductor: Option<f64>,
    pub capacitor: Option<f64>,
    pub junction: Option<f64>,
}

const SPREAD_STREAM: u64 = 0x5350_5245_4144;

impl Spread {
    /// No variation.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the value for a `.spread` key: `R`, `L`, `C`, `B`, or `None`
    /// for the global value.
    pub fn set(&mut self, key: Option<&str>, fraction: f64) -> Result<()> {
        if !(fraction >= 0.0 && fraction.is_finite()) {
            return Err(SimError::invalid_param(format!(
                "spread must be a non-negative fraction, got {}",
                fraction
            )));
        }
        let slot = match key.map(|k| k.to_ascii_uppercase()) {
            None => &mut self.global,
            Some(k) if k.starts_with('R') => &mut self.resistor,
            Some(k) if k.starts_with('L') => &mut self.inductor,
            Some(k) if k.starts_with('C') => &mut self.capacitor,
            Some(k) if k.starts_with('B') => &mut self.junction,
            Some(k) => {
                return Err(SimError::invalid_param(format!("unknown spread class '{}'", k)));
            }
        };
        *slot = Some(fraction);
        Ok(())
    }

    /// Returns true if no device class varies.
    pub fn is_empty(&self) -> bool {
        [self.global, self.resistor, self.inductor, self.capacitor, self.junction]
            .iter()
            .all(|s| s.map_or(true, |v| v == 0.0))
    }

    /// Effective fraction for a device: its own `spread=` value, then its
    /// class, then the global value.
    pub fn fraction(&self, kind: SpreadKind, local: Option<f64>) -> f64 {
        let class = match kind {
            SpreadKind::Resistor => self.resistor,
            SpreadKind::Inductor => self.inductor,
            SpreadKind::Capacitor => self.capacitor,
            SpreadKind::Junction => self.junction,
        };
        local.or(class).or(self.global).unwrap_or(0.0)
    }

    /// Draw the value of `label` around `nominal`.
    pub fn apply(&self, nominal: f64, kind: SpreadKind, local: Option<f64>, label: &str, seed: u64) -> f64 {
        let fraction = self.fraction(kind, local);
        if fraction == 0.0 {
            return nominal;
        }
        let stream = splitmix64(seed ^ SPREAD_STREAM);
        nominal + nominal * fraction / 3.0 * gaussian(stream, label_key(label))
    }
}

/// Stable hash of a label, case-insensitive.
fn label_key(label: &str) -> u64 {
    label
        .bytes()
        .fold(0xcbf2_9ce4_8422_2325, |h, b| splitmix64(h ^ u64::from(b.to_ascii_uppercase())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_fraction_precedence() {
        let mut spread = Spread::new();
        spread.set(None, 0.1).unwrap();
        spread.set(Some("R"), 0.05).unwrap();
        assert_relative_eq!(spread.fraction(SpreadKind::Resistor, None), 0.05);
        assert_relative_eq!(spread.fraction(SpreadKind::Inductor, None), 0.1);
        assert_relative_eq!(spread.fraction(SpreadKind::Resistor, Some(0.2)), 0.2);
        assert_relative_eq!(spread.fraction(SpreadKind::Capacitor, Some(0.0)), 0.0);
    }

    #[test]
    fn test_no_spread_keeps_nominal() {
        let spread = Spread::new();
        assert!(spread.is_empty());
        assert_eq!(spread.apply(2.0, SpreadKind::Resistor, None, "R1", 7), 2.0);
    }

    #[test]
    fn test_draws_are_deterministic_per_label() {
        let mut spread = Spread::new();
        spread.set(Some("L"), 0.3).unwrap();
        let a = spread.apply(1e-12, SpreadKind::Inductor, None, "L1", 42);
        assert_eq!(a, spread.apply(1e-12, SpreadKind::Inductor, None, "l1", 42));
        assert_ne!(a, spread.apply(1e-12, SpreadKind::Inductor, None, "L2", 42));
        assert_ne!(a, 1e-12);
    }

    #[test]
    fn test_draws_follow_three_sigma_width() {
        let mut spread = Spread::new();
        spread.set(None, 0.3).unwrap();
        let n = 4000;
        let draws: Vec<f64> = (0..n)
            .map(|i| spread.apply(1.0, SpreadKind::Capacitor, None, &format!("C{}", i), 1))
            .collect();
        let mean = draws.iter().sum::<f64>() / n as f64;
        let var = draws.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / n as f64;
        assert!((mean - 1.0).abs() < 0.01, "mean {}", mean);
        assert!((var.sqrt() - 0.1).abs() < 0.01, "std {}", var.sqrt());
    }

    #[test]
    fn test_rejects_bad_settings() {
        let mut spread = Spread::new();
        assert!(spread.set(None, -0.1).is_err());
        assert!(spread.set(Some("Q"), 0.1).is_err());
    }
}
