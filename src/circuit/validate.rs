//! Circuit validation.

use crate::error::{Result, SimError};

use super::Circuit;

/// Validate an assembled circuit for simulation.
///
/// Checks:
/// - The CSR structure is a well-formed square matrix
/// - Every device stamp entry is finite and non-zero
/// - Every device owns exactly one row per branch
pub fn validate_circuit(circuit: &Circuit) -> Result<()> {
    if !circuit.matrix.check_invariant() {
        return Err(SimError::invalid_param(format!(
            "matrix of size {} is malformed ({} rows, {} entries)",
            circuit.matrix.size,
            circuit.matrix.rows(),
            circuit.matrix.nnz()
        )));
    }

    for device in &circuit.devices {
        if let Some(&value) = device
            .stamp()
            .non_zeros
            .iter()
            .find(|v| **v == 0.0 || !v.is_finite())
        {
            return Err(SimError::InvalidStamp {
                label: device.label().to_string(),
                value,
            });
        }
        if device.stamp().rows() != device.branches().len() {
            return Err(SimError::invalid_param(format!(
                "device {} has {} rows for {} branches",
                device.label(),
                device.stamp().rows(),
                device.branches().len()
            )));
        }
    }

    if circuit.devices.is_empty() {
        log::warn!("circuit has no devices");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::{assemble, AssemblyOutcome, Declaration, ParamMap};
    use crate::components::ModelLibrary;
    use crate::solver::TransientConfig;

    fn run(lines: &[&str]) -> Result<AssemblyOutcome> {
        let decls: Vec<Declaration> = lines.iter().map(|l| Declaration::new(l.split_whitespace())).collect();
        assemble(&decls, &ParamMap::new(), &ModelLibrary::new(), &TransientConfig::new())
    }

    #[test]
    fn test_zero_resistance_rejected() {
        let err = run(&["R1 a 0 0"]).unwrap_err();
        assert!(matches!(err, SimError::InvalidStamp { ref label, value } if label == "R1" && value == 0.0));
    }

    #[test]
    fn test_grounded_device_rejected() {
        let err = run(&["C1 0 gnd 1p"]).unwrap_err();
        assert!(matches!(err, SimError::BothTerminalsGrounded { .. }));
    }

    #[test]
    fn test_valid_circuit_passes() {
        assert!(matches!(run(&["R1 a 0 1", "C1 a 0 1p"]), Ok(AssemblyOutcome::Ready(_))));
    }
}
