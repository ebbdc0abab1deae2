//! Sparse LU factorization of the MNA matrix.
//!
//! Left-looking column LU with threshold partial pivoting. The matrix is
//! converted to column form once by [`SparseLu::analyze`]; afterwards only
//! values move. Factorizing with `reuse_pattern` keeps the previous pivot
//! order, so the fill pattern (and the cost of a refactor) stays the same
//! across the many value-only updates of a transient run.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use super::CsrMatrix;
use crate::error::{Result, SimError};

/// Prefer the diagonal as pivot while it is at least this fraction of the
/// largest candidate.
const DIAGONAL_PREFERENCE: f64 = 1e-3;

/// LU factors of a sparse matrix: P*A = L*U.
#[derive(Debug, Clone)]
pub struct SparseLu {
    size: usize,
    nnz: usize,
    /// Column pattern of A
    col_ptr: Vec<usize>,
    row_idx: Vec<usize>,
    /// Column slot of every CSR entry (duplicates share a slot)
    csr_to_csc: Vec<usize>,
    values: Vec<f64>,
    /// Multipliers of each step, keyed by original row
    lower: Vec<Vec<(usize, f64)>>,
    /// Above-diagonal entries of each column, keyed by step
    upper: Vec<Vec<(usize, f64)>>,
    diag: Vec<f64>,
    /// Original row chosen at each step
    prow: Vec<usize>,
    /// Step at which each original row was chosen
    pinv: Vec<Option<usize>>,
    factored: bool,
    // Work space
    work: Vec<f64>,
    touched: Vec<bool>,
    queued: Vec<bool>,
}

impl SparseLu {
    /// Build the column pattern of `a`.
    pub fn analyze(a: &CsrMatrix) -> Self {
        let n = a.size;
        let mut triplets: Vec<(usize, usize, usize)> = Vec::with_capacity(a.nnz());
        for row in 0..a.rows() {
            for k in a.row_pointer[row]..a.row_pointer[row + 1] {
                triplets.push((a.column_indices[k], row, k));
            }
        }
        triplets.sort_unstable();

        let mut col_ptr = vec![0; n + 1];
        let mut row_idx = Vec::with_capacity(triplets.len());
        let mut csr_to_csc = vec![0; a.nnz()];
        let mut last: Option<(usize, usize)> = None;
        for &(col, row, k) in &triplets {
            if last != Some((col, row)) {
                row_idx.push(row);
                col_ptr[col + 1] += 1;
                last = Some((col, row));
            }
            csr_to_csc[k] = row_idx.len() - 1;
        }
        for j in 0..n {
            col_ptr[j + 1] += col_ptr[j];
        }

        Self {
            size: n,
            nnz: a.nnz(),
            values: vec![0.0; row_idx.len()],
            col_ptr,
            row_idx,
            csr_to_csc,
            lower: vec![Vec::new(); n],
            upper: vec![Vec::new(); n],
            diag: vec![0.0; n],
            prow: vec![0; n],
            pinv: vec![None; n],
            factored: false,
            work: vec![0.0; n],
            touched: vec![false; n],
            queued: vec![false; n],
        }
    }

    /// Matrix dimension.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Returns true once a factorization has succeeded.
    pub fn is_factored(&self) -> bool {
        self.factored
    }

    /// Number of stored entries in L and U, including the diagonal.
    pub fn factor_nnz(&self) -> usize {
        self.size
            + self.lower.iter().map(Vec::len).sum::<usize>()
            + self.upper.iter().map(Vec::len).sum::<usize>()
    }

    /// Numeric factorization.
    ///
    /// With `reuse_pattern` the pivot sequence of the previous factorization
    /// is kept; otherwise pivots are chosen afresh.
    pub fn factorize(&mut self, a: &CsrMatrix, reuse_pattern: bool) -> Result<()> {
        if a.size != self.size || a.nnz() != self.nnz {
            return Err(SimError::invalid_param(
                "matrix structure changed since analysis",
            ));
        }
        let reuse = reuse_pattern && self.factored;
        self.factored = false;

        self.values.fill(0.0);
        for (k, &value) in a.non_zeros.iter().enumerate() {
            self.values[self.csr_to_csc[k]] += value;
        }
        if !reuse {
            self.pinv.fill(None);
        }

        let mut heap = BinaryHeap::new();
        let mut rows: Vec<usize> = Vec::with_capacity(self.size);

        for j in 0..self.size {
            rows.clear();

            // Scatter A[:, j]
            for slot in self.col_ptr[j]..self.col_ptr[j + 1] {
                let r = self.row_idx[slot];
                self.work[r] += self.values[slot];
                if !self.touched[r] {
                    self.touched[r] = true;
                    rows.push(r);
                }
            }
            for &r in &rows {
                if let Some(s) = self.pinv[r].filter(|&s| s < j) {
                    if !self.queued[s] {
                        self.queued[s] = true;
                        heap.push(Reverse(s));
                    }
                }
            }

            // Eliminate with earlier steps in order
            let mut upper = Vec::new();
            while let Some(Reverse(k)) = heap.pop() {
                self.queued[k] = false;
                let xk = self.work[self.prow[k]];
                upper.push((k, xk));
                for &(r, l) in &self.lower[k] {
                    self.work[r] -= l * xk;
                    if !self.touched[r] {
                        self.touched[r] = true;
                        rows.push(r);
                    }
                    if let Some(s) = self.pinv[r].filter(|&s| s < j) {
                        if !self.queued[s] {
                            self.queued[s] = true;
                            heap.push(Reverse(s));
                        }
                    }
                }
            }

            let pinv = &self.pinv;
            let available = |r: usize| pinv[r].map_or(true, |s| s >= j);
            let pivot_row = if reuse {
                Some(self.prow[j])
            } else {
                let largest = rows
                    .iter()
                    .copied()
                    .filter(|&r| available(r))
                    .map(|r| self.work[r].abs())
                    .fold(0.0_f64, f64::max);
                if self.touched[j] && available(j) && self.work[j].abs() >= DIAGONAL_PREFERENCE * largest {
                    Some(j)
                } else {
                    rows.iter()
                        .copied()
                        .filter(|&r| available(r))
                        .max_by(|&a, &b| self.work[a].abs().total_cmp(&self.work[b].abs()))
                }
            };

            let p = match pivot_row {
                Some(p) => p,
                None => {
                    self.clear_work(&rows);
                    return Err(SimError::SingularMatrix { pivot: j });
                }
            };
            let pivot = self.work[p];
            if pivot == 0.0 || !pivot.is_finite() {
                self.clear_work(&rows);
                return Err(SimError::SingularMatrix { pivot: j });
            }

            self.diag[j] = pivot;
            self.prow[j] = p;
            self.pinv[p] = Some(j);

            let mut lower = Vec::new();
            for &r in &rows {
                if r != p && self.pinv[r].map_or(true, |s| s > j) {
                    lower.push((r, self.work[r] / pivot));
                }
            }
            self.lower[j] = lower;
            self.upper[j] = upper;
            self.clear_work(&rows);
        }

        self.factored = true;
        Ok(())
    }

    fn clear_work(&mut self, rows: &[usize]) {
        for &r in rows {
            self.work[r] = 0.0;
            self.touched[r] = false;
        }
    }

    /// Solve A*x = b in place.
    pub fn solve(&self, rhs: &mut [f64]) -> Result<()> {
        if !self.factored {
            return Err(SimError::invalid_param("solve called before a successful factorization"));
        }
        let n = self.size;

        // Forward substitution in original row space (L*y = P*b)
        let mut w = rhs.to_vec();
        let mut y = vec![0.0; n];
        for k in 0..n {
            let yk = w[self.prow[k]];
            y[k] = yk;
            for &(r, l) in &self.lower[k] {
                w[r] -= l * yk;
            }
        }

        // Back substitution by columns (U*x = y)
        for j in (0..n).rev() {
            let xj = y[j] / self.diag[j];
            rhs[j] = xj;
            for &(k, u) in &self.upper[j] {
                y[k] -= u * xj;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn csr(size: usize, rows: &[&[(usize, f64)]]) -> CsrMatrix {
        let mut m = CsrMatrix {
            size,
            non_zeros: Vec::new(),
            column_indices: Vec::new(),
            row_pointer: vec![0],
            device_offsets: Vec::new(),
        };
        for row in rows {
            for &(c, v) in *row {
                m.column_indices.push(c);
                m.non_zeros.push(v);
            }
            m.row_pointer.push(m.non_zeros.len());
        }
        m
    }

    fn check_solution(a: &CsrMatrix, x: &[f64], b: &[f64]) {
        let ax = a.multiply(x);
        for (lhs, rhs) in ax.iter().zip(b) {
            assert_relative_eq!(lhs, rhs, epsilon = 1e-12, max_relative = 1e-9);
        }
    }

    #[test]
    fn test_simple_system() {
        // 2x + y = 5, x + 3y = 10 -> x = 1, y = 3
        let a = csr(2, &[&[(0, 2.0), (1, 1.0)], &[(0, 1.0), (1, 3.0)]]);
        let mut lu = SparseLu::analyze(&a);
        lu.factorize(&a, false).unwrap();
        let mut b = vec![5.0, 10.0];
        lu.solve(&mut b).unwrap();
        assert_relative_eq!(b[0], 1.0, epsilon = 1e-12);
        assert_relative_eq!(b[1], 3.0, epsilon = 1e-12);
    }

    #[test]
    fn test_zero_diagonal_needs_pivoting() {
        // MNA-like: voltage source row has no diagonal entry
        let a = csr(
            3,
            &[
                &[(1, 1.0), (2, 1.0)],
                &[(0, 1.0)],
                &[(0, 1.0), (2, -4.0)],
            ],
        );
        let b = vec![0.0, 2.0, 0.0];
        let mut lu = SparseLu::analyze(&a);
        lu.factorize(&a, false).unwrap();
        let mut x = b.clone();
        lu.solve(&mut x).unwrap();
        check_solution(&a, &x, &b);
        assert_relative_eq!(x[0], 2.0, epsilon = 1e-12);
        assert_relative_eq!(x[2], 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_duplicates_are_summed() {
        let a = csr(2, &[&[(0, 1.0), (0, 1.0), (1, 1.0)], &[(1, 4.0)]]);
        let mut lu = SparseLu::analyze(&a);
        lu.factorize(&a, false).unwrap();
        let mut x = vec![6.0, 8.0];
        lu.solve(&mut x).unwrap();
        assert_relative_eq!(x[1], 2.0);
        assert_relative_eq!(x[0], 2.0);
    }

    #[test]
    fn test_refactor_with_same_pattern() {
        let mut a = csr(
            4,
            &[
                &[(0, 4.0), (1, -1.0), (3, 1.0)],
                &[(0, -1.0), (1, 4.0), (2, -1.0)],
                &[(1, -1.0), (2, 4.0)],
                &[(0, 1.0), (3, 0.5)],
            ],
        );
        let b = vec![1.0, 2.0, 3.0, 4.0];
        let mut lu = SparseLu::analyze(&a);
        lu.factorize(&a, false).unwrap();
        let nnz = lu.factor_nnz();

        a.non_zeros[0] = 9.0;
        a.non_zeros[5] = 2.5;
        lu.factorize(&a, true).unwrap();
        assert_eq!(lu.factor_nnz(), nnz);

        let mut x = b.clone();
        lu.solve(&mut x).unwrap();
        check_solution(&a, &x, &b);
    }

    #[test]
    fn test_factorize_is_idempotent() {
        let a = csr(3, &[&[(0, 3.0), (2, 1.0)], &[(1, 2.0)], &[(0, 1.0), (2, 5.0)]]);
        let b = vec![1.0, -2.0, 0.5];
        let mut lu = SparseLu::analyze(&a);
        lu.factorize(&a, false).unwrap();
        let mut first = b.clone();
        lu.solve(&mut first).unwrap();

        lu.factorize(&a, true).unwrap();
        lu.factorize(&a, true).unwrap();
        let mut second = b.clone();
        lu.solve(&mut second).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_singular_matrix() {
        let a = csr(2, &[&[(0, 1.0), (1, 1.0)], &[(0, 2.0), (1, 2.0)]]);
        let mut lu = SparseLu::analyze(&a);
        let err = lu.factorize(&a, false).unwrap_err();
        assert!(matches!(err, SimError::SingularMatrix { pivot: 1 }));
        assert!(!lu.is_factored());
    }

    #[test]
    fn test_empty_column_is_singular() {
        let a = csr(2, &[&[(0, 1.0)], &[(0, 1.0)]]);
        let mut lu = SparseLu::analyze(&a);
        assert!(matches!(
            lu.factorize(&a, false),
            Err(SimError::SingularMatrix { pivot: 1 })
        ));
    }
}
