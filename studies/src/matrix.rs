//! View factor matrix
//!
//! Assembles the tallied energy into the dense matrix `F[i][j]`, the fraction
//! of radiation leaving boundary `i` that lands on boundary `j`, checks it
//! against the conservation tolerance, and optionally repairs it. The repair
//! is a constrained least-squares correction: reciprocity is restored by
//! symmetrizing the exchange matrix `A_i F_ij`, then a Lagrange multiplier
//! per boundary shifts the rows so each sums to one exactly while keeping the
//! symmetric exchange structure.

use vf_core::common::{Float, PI};
use vf_core::error::{Result, ViewFactorError};
use vf_core::mesh::BoundaryId;
use nalgebra::{DMatrix, DVector};
use std::collections::HashMap;

use crate::trace::Tally;

/// Dense view factor matrix over a fixed boundary ordering.
pub struct ViewFactorMatrix {
    /// The boundaries, in row/column order.
    boundaries: Vec<BoundaryId>,

    /// Boundary id to row/column index.
    index: HashMap<BoundaryId, usize>,

    /// The view factors.
    f: DMatrix<Float>,

    /// Boundary measures, same ordering.
    areas: Vec<Float>,
}

impl ViewFactorMatrix {
    /// Assembles the matrix from a reduced tally.
    ///
    /// Each entry is the tallied energy divided by the emitting boundary's
    /// measure and the hemispherical constant (`2` in 2-D, `π` in 3-D). Rows
    /// must sum to one within `row_sum_tolerance` or assembly fails; a large
    /// defect means the quadrature was too coarse or the enclosure is open.
    ///
    /// * `boundaries`        - Boundary ordering for rows and columns.
    /// * `areas`             - Boundary measures, same ordering.
    /// * `tally`             - Reduced (from, to) energy tally.
    /// * `dimension`         - Spatial dimension, 2 or 3.
    /// * `row_sum_tolerance` - Largest accepted row sum defect.
    pub fn from_tally(
        boundaries: Vec<BoundaryId>,
        areas: Vec<Float>,
        tally: &Tally,
        dimension: usize,
        row_sum_tolerance: Float,
    ) -> Result<Self> {
        let n = boundaries.len();
        debug_assert_eq!(areas.len(), n, "size mismatch");

        let norm = if dimension == 2 { 2.0 } else { PI };
        let mut f = DMatrix::zeros(n, n);
        for (i, from) in boundaries.iter().enumerate() {
            if areas[i] <= 0.0 {
                return Err(ViewFactorError::InvalidParameter {
                    name: "areas",
                    reason: format!("boundary {from} has non-positive measure {}", areas[i]),
                });
            }
            for (j, to) in boundaries.iter().enumerate() {
                let energy = tally.get(&(*from, *to)).copied().unwrap_or(0.0);
                f[(i, j)] = energy / (areas[i] * norm);
            }
        }

        Self::from_entries(boundaries, areas, f, row_sum_tolerance)
    }

    /// Builds the matrix from already computed view factors, applying the
    /// same conservation check as [`ViewFactorMatrix::from_tally`].
    ///
    /// * `boundaries`        - Boundary ordering for rows and columns.
    /// * `areas`             - Boundary measures, same ordering.
    /// * `f`                 - The view factors.
    /// * `row_sum_tolerance` - Largest accepted row sum defect.
    pub fn from_entries(
        boundaries: Vec<BoundaryId>,
        areas: Vec<Float>,
        f: DMatrix<Float>,
        row_sum_tolerance: Float,
    ) -> Result<Self> {
        debug_assert_eq!(f.nrows(), boundaries.len());
        debug_assert_eq!(f.ncols(), boundaries.len());

        let index = boundaries.iter().copied().enumerate().map(|(i, b)| (b, i)).collect();
        let matrix = Self {
            boundaries,
            index,
            f,
            areas,
        };

        let defect = matrix.max_row_sum_deviation();
        if defect > row_sum_tolerance {
            return Err(ViewFactorError::FatalValidation(format!(
                "view factor row sum defect {defect:.6e} exceeds tolerance \
                 {row_sum_tolerance:.6e}; refine the quadrature or check that the \
                 enclosure is closed"
            )));
        }
        Ok(matrix)
    }

    /// The view factor from one boundary to another.
    pub fn get(&self, from: BoundaryId, to: BoundaryId) -> Result<Float> {
        let i = self.boundary_index(from)?;
        let j = self.boundary_index(to)?;
        Ok(self.f[(i, j)])
    }

    /// The boundaries, in row/column order.
    pub fn boundaries(&self) -> &[BoundaryId] {
        &self.boundaries
    }

    /// Number of boundaries.
    pub fn num_boundaries(&self) -> usize {
        self.boundaries.len()
    }

    /// Measure of a boundary.
    pub fn area(&self, bnd_id: BoundaryId) -> Result<Float> {
        self.boundary_index(bnd_id).map(|i| self.areas[i])
    }

    /// Largest row sum defect `|1 - Σ_j F_ij|`.
    pub fn max_row_sum_deviation(&self) -> Float {
        (0..self.f.nrows())
            .map(|i| (1.0 - self.f.row(i).sum()).abs())
            .fold(0.0, Float::max)
    }

    /// Largest reciprocity defect `|A_i F_ij - A_j F_ji|`.
    pub fn max_reciprocity_deviation(&self) -> Float {
        let n = self.f.nrows();
        let mut worst: Float = 0.0;
        for i in 0..n {
            for j in i + 1..n {
                let defect = (self.areas[i] * self.f[(i, j)] - self.areas[j] * self.f[(j, i)]).abs();
                worst = worst.max(defect);
            }
        }
        worst
    }

    /// Repairs the matrix so reciprocity and unit row sums hold exactly.
    ///
    /// Reciprocity first: the exchange matrix `A_i F_ij` is replaced by its
    /// symmetric part. The remaining row sum defect `r_i` is then removed by
    /// a symmetric shift `(λ_i + λ_j) / (2 A_i)` whose multipliers solve
    /// `(n λ_i + Σ_j λ_j) / 2 = A_i r_i`, the smallest symmetric correction
    /// in the least-squares sense.
    pub fn normalize(&mut self) -> Result<()> {
        let n = self.f.nrows();
        debug!(
            "normalizing view factors: row sum defect {:.3e}, reciprocity defect {:.3e}",
            self.max_row_sum_deviation(),
            self.max_reciprocity_deviation()
        );

        let mut f_tilde = DMatrix::zeros(n, n);
        for i in 0..n {
            for j in 0..n {
                f_tilde[(i, j)] =
                    0.5 * (self.f[(i, j)] + self.areas[j] / self.areas[i] * self.f[(j, i)]);
            }
        }

        // (n I + 1 1ᵀ) / 2 is symmetric positive definite.
        let system = (DMatrix::identity(n, n) * n as Float + DMatrix::from_element(n, n, 1.0)) * 0.5;
        let rhs = DVector::from_fn(n, |i, _| {
            self.areas[i] * (1.0 - f_tilde.row(i).sum())
        });

        let multipliers = match system.clone().cholesky() {
            Some(cholesky) => cholesky.solve(&rhs),
            None => system
                .lu()
                .solve(&rhs)
                .ok_or_else(|| {
                    ViewFactorError::FatalValidation(
                        "view factor normalization system is singular".into(),
                    )
                })?,
        };

        for i in 0..n {
            for j in 0..n {
                f_tilde[(i, j)] += (multipliers[i] + multipliers[j]) / (2.0 * self.areas[i]);
            }
        }
        self.f = f_tilde;

        debug!(
            "normalized view factors: row sum defect {:.3e}, reciprocity defect {:.3e}",
            self.max_row_sum_deviation(),
            self.max_reciprocity_deviation()
        );
        Ok(())
    }

    fn boundary_index(&self, bnd_id: BoundaryId) -> Result<usize> {
        self.index
            .get(&bnd_id)
            .copied()
            .ok_or_else(|| ViewFactorError::NotFound(format!("boundary {bnd_id}")))
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Tally matching F = [[0.4, 0.6], [0.4, 0.6]] for areas [2, 1] in 2-D.
    fn sample_tally() -> Tally {
        let mut tally = Tally::new();
        tally.insert((1, 1), 1.6);
        tally.insert((1, 2), 2.4);
        tally.insert((2, 1), 0.8);
        tally.insert((2, 2), 1.2);
        tally
    }

    #[test]
    fn assembly_divides_by_area_and_hemispherical_constant() {
        let matrix =
            ViewFactorMatrix::from_tally(vec![1, 2], vec![2.0, 1.0], &sample_tally(), 2, 0.01)
                .unwrap();
        assert_relative_eq!(matrix.get(1, 1).unwrap(), 0.4);
        assert_relative_eq!(matrix.get(1, 2).unwrap(), 0.6);
        assert_relative_eq!(matrix.get(2, 1).unwrap(), 0.4);
        assert_relative_eq!(matrix.get(2, 2).unwrap(), 0.6);
        assert_relative_eq!(matrix.area(1).unwrap(), 2.0);
    }

    #[test]
    fn unknown_boundary_is_reported() {
        let matrix =
            ViewFactorMatrix::from_tally(vec![1, 2], vec![2.0, 1.0], &sample_tally(), 2, 0.01)
                .unwrap();
        assert!(matches!(matrix.get(5, 2), Err(ViewFactorError::NotFound(_))));
    }

    #[test]
    fn row_sum_defect_beyond_tolerance_is_fatal() {
        let mut tally = sample_tally();
        for energy in tally.values_mut() {
            *energy *= 0.8;
        }
        let result = ViewFactorMatrix::from_tally(vec![1, 2], vec![2.0, 1.0], &tally, 2, 0.1);
        assert!(matches!(result, Err(ViewFactorError::FatalValidation(_))));
    }

    #[test]
    fn normalize_restores_reciprocity_and_row_sums() {
        let mut matrix =
            ViewFactorMatrix::from_tally(vec![1, 2], vec![2.0, 1.0], &sample_tally(), 2, 0.01)
                .unwrap();
        // A_1 F_12 = 1.2 against A_2 F_21 = 0.4.
        assert_relative_eq!(matrix.max_reciprocity_deviation(), 0.8);

        matrix.normalize().unwrap();
        assert!(matrix.max_row_sum_deviation() < 1e-10);
        assert!(matrix.max_reciprocity_deviation() < 1e-10);
    }

    #[test]
    fn normalize_keeps_a_consistent_matrix_fixed() {
        let f = DMatrix::from_row_slice(2, 2, &[0.5, 0.5, 0.5, 0.5]);
        let mut matrix =
            ViewFactorMatrix::from_entries(vec![1, 2], vec![1.0, 1.0], f, 1e-12).unwrap();
        matrix.normalize().unwrap();
        for (from, to) in [(1, 1), (1, 2), (2, 1), (2, 2)] {
            assert_relative_eq!(matrix.get(from, to).unwrap(), 0.5, epsilon = 1e-12);
        }
    }
}
