//! MNA system in compressed sparse row form.

use crate::components::{Device, NodeConnection};

/// MNA system matrix A in CSR form.
///
/// Rows are laid out as node rows (in node order) followed by every
/// device's own rows (in device order). Because branches are allocated in
/// device order too, a device's rows sit exactly at its branch indices.
#[derive(Debug, Clone, PartialEq)]
pub struct CsrMatrix {
    /// Matrix dimension
    pub size: usize,
    /// Entry values, row after row
    pub non_zeros: Vec<f64>,
    /// Column of each entry
    pub column_indices: Vec<usize>,
    /// Start of each row in `non_zeros`, with a final end marker
    pub row_pointer: Vec<usize>,
    /// First entry of each device's stamp in `non_zeros`
    pub device_offsets: Vec<usize>,
}

impl CsrMatrix {
    /// Build the matrix from node connections and device stamps.
    ///
    /// Connections landing on the same node row and column are summed.
    pub fn from_parts(node_count: usize, size: usize, devices: &[Device]) -> Self {
        let mut node_rows: Vec<Vec<(usize, f64)>> = vec![Vec::new(); node_count];
        for device in devices {
            for NodeConnection { node, branch, value } in device.node_connections() {
                let row = &mut node_rows[node.0];
                match row.iter_mut().find(|(col, _)| *col == branch.0) {
                    Some(entry) => entry.1 += value,
                    None => row.push((branch.0, value)),
                }
            }
        }

        let mut non_zeros = Vec::new();
        let mut column_indices = Vec::new();
        let mut row_pointer = Vec::with_capacity(size + 1);
        row_pointer.push(0);

        for mut row in node_rows {
            row.sort_by_key(|(col, _)| *col);
            for (col, value) in row {
                column_indices.push(col);
                non_zeros.push(value);
            }
            row_pointer.push(non_zeros.len());
        }

        let mut device_offsets = Vec::with_capacity(devices.len());
        for device in devices {
            let stamp = device.stamp();
            device_offsets.push(non_zeros.len());
            non_zeros.extend_from_slice(&stamp.non_zeros);
            column_indices.extend_from_slice(&stamp.column_indices);
            for &count in &stamp.row_counts {
                let end = row_pointer[row_pointer.len() - 1] + count;
                row_pointer.push(end);
            }
        }

        Self {
            size,
            non_zeros,
            column_indices,
            row_pointer,
            device_offsets,
        }
    }

    /// Number of rows.
    pub fn rows(&self) -> usize {
        self.row_pointer.len().saturating_sub(1)
    }

    /// Number of stored entries.
    pub fn nnz(&self) -> usize {
        self.non_zeros.len()
    }

    /// Returns true if the structure is a valid square CSR matrix.
    pub fn check_invariant(&self) -> bool {
        self.row_pointer.len() == self.size + 1
            && self.row_pointer.first() == Some(&0)
            && self.row_pointer.last() == Some(&self.non_zeros.len())
            && self.row_pointer.windows(2).all(|w| w[0] <= w[1])
            && self.column_indices.len() == self.non_zeros.len()
            && self.column_indices.iter().all(|&c| c < self.size)
    }

    /// Copy a device's current stamp values back into the matrix.
    pub fn refresh_device(&mut self, index: usize, device: &Device) {
        let offset = self.device_offsets[index];
        let values = &device.stamp().non_zeros;
        self.non_zeros[offset..offset + values.len()].copy_from_slice(values);
    }

    /// Get matrix element at (row, col), summing duplicates.
    pub fn get(&self, row: usize, col: usize) -> f64 {
        (self.row_pointer[row]..self.row_pointer[row + 1])
            .filter(|&k| self.column_indices[k] == col)
            .map(|k| self.non_zeros[k])
            .sum()
    }

    /// Compute A*x.
    pub fn multiply(&self, x: &[f64]) -> Vec<f64> {
        (0..self.rows())
            .map(|row| {
                (self.row_pointer[row]..self.row_pointer[row + 1])
                    .map(|k| self.non_zeros[k] * x[self.column_indices[k]])
                    .sum()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::{AnalysisType, BranchIndex, NodeIndex};
    use crate::components::{Resistor, VoltageSource, Waveform};

    fn divider() -> Vec<Device> {
        let v = VoltageSource::new(
            "V1".into(),
            [Some(NodeIndex(0)), None],
            Waveform::Dc(1.0),
            BranchIndex(2),
            AnalysisType::Voltage,
            1e-12,
        )
        .unwrap();
        let r1 = Resistor::new(
            "R1".into(),
            [Some(NodeIndex(0)), Some(NodeIndex(1))],
            1.0,
            BranchIndex(3),
            AnalysisType::Voltage,
            1e-12,
        )
        .unwrap();
        let r2 = Resistor::new(
            "R2".into(),
            [Some(NodeIndex(1)), None],
            3.0,
            BranchIndex(4),
            AnalysisType::Voltage,
            1e-12,
        )
        .unwrap();
        vec![Device::VoltageSource(v), Device::Resistor(r1), Device::Resistor(r2)]
    }

    #[test]
    fn test_layout() {
        let devices = divider();
        let a = CsrMatrix::from_parts(2, 5, &devices);
        assert!(a.check_invariant());
        assert_eq!(a.rows(), 5);
        assert_eq!(a.device_offsets, vec![4, 5, 8]);
        // Node 0 sees V1 and R1 currents; node 1 sees R1 (in) and R2
        assert_eq!(a.get(0, 2), 1.0);
        assert_eq!(a.get(0, 3), 1.0);
        assert_eq!(a.get(1, 3), -1.0);
        assert_eq!(a.get(1, 4), 1.0);
        assert_eq!(a.get(4, 4), -3.0);
    }

    #[test]
    fn test_refresh_device() {
        let mut devices = divider();
        let mut a = CsrMatrix::from_parts(2, 5, &devices);
        if let Device::Resistor(r) = &mut devices[2] {
            r.resistance = 6.0;
            r.build_stamp();
        }
        a.refresh_device(2, &devices[2]);
        assert_eq!(a.get(4, 4), -6.0);
        assert_eq!(a.get(3, 3), -1.0);
    }

    #[test]
    fn test_invariant_detects_bad_column() {
        let mut a = CsrMatrix::from_parts(2, 5, &divider());
        a.column_indices[0] = 9;
        assert!(!a.check_invariant());
    }
}
