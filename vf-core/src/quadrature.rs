//! Angular quadrature
//!
//! A fixed, reusable set of unit directions and weights over a hemisphere (or
//! a mu-restricted band of one), built once and rotated to align with a
//! surface normal whenever rays are spawned from a face. The polar cosines
//! come from a Gauss-Legendre rule, the azimuthal angles from a uniform
//! Chebyshev rule.

use crate::common::{absolute_fuzzy_equal, Float, TWO_PI};
use crate::error::{Result, ViewFactorError};
use crate::geometry::Vector3f;
use nalgebra::DMatrix;

/// Default tolerance for merging projected directions in 2-D. Domain
/// specific; override with [`AngularQuadrature::set_merge_tolerance`].
pub const DEFAULT_MERGE_TOLERANCE: Float = 1e-8;

/// One base quadrature sample before rotation.
#[derive(Copy, Clone, Debug)]
struct BaseSample {
    /// Unit direction with the polar axis along +z.
    direction: Vector3f,

    /// Product weight (polar x azimuthal).
    weight: Float,

    /// Sine of the polar angle.
    polar_sin: Float,
}

/// One direction of the current (rotated, possibly merged) set. In 2-D,
/// several base samples can project onto the same in-plane direction; their
/// weights and polar sines are then carried as lists on a single direction.
#[derive(Clone, Debug)]
struct DirectionRecord {
    /// Unit direction.
    direction: Vector3f,

    /// Weights of every base sample merged into this direction.
    weights: Vec<Float>,

    /// Polar sines of every base sample merged into this direction.
    polar_sins: Vec<Float>,
}

/// Product angular quadrature over a mu band of the unit sphere.
pub struct AngularQuadrature {
    /// Spatial dimension, 2 or 3.
    dim: usize,

    /// Base samples; immutable after construction.
    base: Vec<BaseSample>,

    /// Current direction set; rebuilt by `rotate`.
    current: Vec<DirectionRecord>,

    /// Fuzzy-equality tolerance for the 2-D projection merge.
    merge_tolerance: Float,
}

impl AngularQuadrature {
    /// Builds the quadrature.
    ///
    /// * `dim`             - Spatial dimension, 2 or 3.
    /// * `polar_order`     - Gauss-Legendre order for the polar cosines.
    /// * `azimuthal_order` - Number of uniform azimuthal angles on [0, 2π].
    /// * `mu_min`          - Lower polar cosine bound, in [-1, 1).
    /// * `mu_max`          - Upper polar cosine bound, in (mu_min, 1].
    pub fn new(
        dim: usize,
        polar_order: usize,
        azimuthal_order: usize,
        mu_min: Float,
        mu_max: Float,
    ) -> Result<Self> {
        if dim != 2 && dim != 3 {
            return Err(ViewFactorError::InvalidParameter {
                name: "dim",
                reason: format!("dimension {dim} is not supported, must be 2 or 3"),
            });
        }
        if polar_order == 0 {
            return Err(ViewFactorError::InvalidParameter {
                name: "polar_order",
                reason: "must be positive".into(),
            });
        }
        if azimuthal_order == 0 {
            return Err(ViewFactorError::InvalidParameter {
                name: "azimuthal_order",
                reason: "must be positive".into(),
            });
        }
        if !(-1.0..=1.0).contains(&mu_min) || !(-1.0..=1.0).contains(&mu_max) || mu_min >= mu_max {
            return Err(ViewFactorError::InvalidParameter {
                name: "mu_range",
                reason: format!("[{mu_min}, {mu_max}] is not a valid polar cosine range"),
            });
        }

        // Polar rule on [0, 1], rescaled to [mu_min, mu_max].
        let (gl_points, gl_weights) = gauss_legendre(polar_order)?;

        // Uniform azimuthal rule on [0, 2π], offset to avoid the seam.
        let w_phi = TWO_PI / azimuthal_order as Float;

        let mut base = Vec::with_capacity(polar_order * azimuthal_order);
        for (x, wx) in gl_points.iter().zip(&gl_weights) {
            // In 2-D, samples below the mid-abscissa point out of the plane
            // after projection; discard them and rebalance so the
            // hemispherical integral is preserved.
            let mut polar_factor = 1.0;
            if dim == 2 {
                if absolute_fuzzy_equal(*x, 0.5, 1e-12) {
                    polar_factor = 0.5;
                } else if *x < 0.5 {
                    continue;
                } else {
                    polar_factor = 2.0;
                }
            }

            let mu = mu_min + (mu_max - mu_min) * x;
            let polar_sin = (1.0 - mu * mu).max(0.0).sqrt();
            let w_mu = wx * (mu_max - mu_min) * polar_factor;

            for j in 0..azimuthal_order {
                let phi = TWO_PI * (j as Float + 0.5) / azimuthal_order as Float;
                base.push(BaseSample {
                    direction: Vector3f::new(polar_sin * phi.cos(), polar_sin * phi.sin(), mu),
                    weight: w_mu * w_phi,
                    polar_sin,
                });
            }
        }

        let current = base
            .iter()
            .map(|s| DirectionRecord {
                direction: s.direction,
                weights: vec![s.weight],
                polar_sins: vec![s.polar_sin],
            })
            .collect();

        Ok(Self {
            dim,
            base,
            current,
            merge_tolerance: DEFAULT_MERGE_TOLERANCE,
        })
    }

    /// Overrides the 2-D projection merge tolerance.
    ///
    /// * `tol` - Absolute per-component tolerance.
    pub fn set_merge_tolerance(&mut self, tol: Float) {
        self.merge_tolerance = tol;
    }

    /// Rebuilds the current direction set so the polar axis aligns with
    /// `axis`. In 2-D the rotated directions are additionally projected onto
    /// the z = 0 plane and coinciding projections are merged. This is the
    /// only operation that mutates the current state.
    ///
    /// * `axis` - The new polar axis; must be nonzero.
    pub fn rotate(&mut self, axis: &Vector3f) -> Result<()> {
        let len = axis.length();
        if len == 0.0 || axis.has_nans() {
            return Err(ViewFactorError::InvalidParameter {
                name: "axis",
                reason: "rotation axis must be a nonzero vector".into(),
            });
        }
        let n = *axis / len;
        let t1 = orthonormal_vector(&n);
        let t2 = n.cross(&t1);

        self.current.clear();
        for sample in &self.base {
            let d = sample.direction;
            let mut rotated = t1 * d.x + t2 * d.y + n * d.z;

            if self.dim == 2 {
                // Project onto the rotation plane.
                rotated.z = 0.0;
                let norm = rotated.length();
                debug_assert!(norm > 1e-12, "projected direction degenerated");
                rotated /= norm;

                // Merge with a fuzzily equal projected direction if present.
                if let Some(record) = self.current.iter_mut().find(|r| {
                    absolute_fuzzy_equal(r.direction.x, rotated.x, self.merge_tolerance)
                        && absolute_fuzzy_equal(r.direction.y, rotated.y, self.merge_tolerance)
                        && absolute_fuzzy_equal(r.direction.z, rotated.z, self.merge_tolerance)
                }) {
                    record.weights.push(sample.weight);
                    record.polar_sins.push(sample.polar_sin);
                    continue;
                }
            }

            self.current.push(DirectionRecord {
                direction: rotated,
                weights: vec![sample.weight],
                polar_sins: vec![sample.polar_sin],
            });
        }
        Ok(())
    }

    /// Number of directions in the current set.
    pub fn num_directions(&self) -> usize {
        self.current.len()
    }

    /// Number of base samples before any 2-D merge.
    pub fn num_base_samples(&self) -> usize {
        self.base.len()
    }

    /// Spatial dimension.
    pub fn dimension(&self) -> usize {
        self.dim
    }

    /// The i-th current direction.
    pub fn get_direction(&self, i: usize) -> Result<Vector3f> {
        self.record(i).map(|r| r.direction)
    }

    /// The weights merged into the i-th current direction.
    pub fn get_weights(&self, i: usize) -> Result<&[Float]> {
        self.record(i).map(|r| r.weights.as_slice())
    }

    /// The polar sines merged into the i-th current direction.
    pub fn get_polar_sins(&self, i: usize) -> Result<&[Float]> {
        self.record(i).map(|r| r.polar_sins.as_slice())
    }

    /// Total weight of the i-th current direction.
    pub fn get_total_weight(&self, i: usize) -> Result<Float> {
        self.record(i).map(|r| r.weights.iter().sum())
    }

    fn record(&self, i: usize) -> Result<&DirectionRecord> {
        self.current.get(i).ok_or(ViewFactorError::IndexError {
            what: "angular quadrature directions",
            index: i,
            size: self.current.len(),
        })
    }
}

/// Gauss-Legendre rule of the given order on [0, 1], weights summing to one.
///
/// Nodes and weights come from the eigen decomposition of the tridiagonal
/// Jacobi matrix (Golub-Welsch): nodes are the rescaled eigenvalues, weights
/// the squared first eigenvector components. Pairs are sorted by node so the
/// result does not depend on eigen-solver ordering.
///
/// * `order` - Number of points; must be positive.
pub fn gauss_legendre(order: usize) -> Result<(Vec<Float>, Vec<Float>)> {
    if order == 0 {
        return Err(ViewFactorError::InvalidParameter {
            name: "order",
            reason: "must be positive".into(),
        });
    }

    let mut jacobi = DMatrix::<Float>::zeros(order, order);
    for k in 1..order {
        let b = k as Float / ((4 * k * k - 1) as Float).sqrt();
        jacobi[(k - 1, k)] = b;
        jacobi[(k, k - 1)] = b;
    }

    let eigen = jacobi.symmetric_eigen();
    let mut pairs: Vec<(Float, Float)> = (0..order)
        .map(|i| {
            let v0 = eigen.eigenvectors[(0, i)];
            // Eigenvalue on [-1, 1] mapped to [0, 1]; weight 2*v0^2 halved by
            // the same change of interval.
            ((eigen.eigenvalues[i] + 1.0) * 0.5, v0 * v0)
        })
        .collect();
    pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

    Ok(pairs.into_iter().unzip())
}

/// Any unit vector orthogonal to the given unit vector.
///
/// * `v` - A unit vector.
pub fn orthonormal_vector(v: &Vector3f) -> Vector3f {
    // Cross against the axis v is least aligned with.
    let helper = if v.x.abs() <= v.y.abs() && v.x.abs() <= v.z.abs() {
        Vector3f::new(1.0, 0.0, 0.0)
    } else if v.y.abs() <= v.z.abs() {
        Vector3f::new(0.0, 1.0, 0.0)
    } else {
        Vector3f::new(0.0, 0.0, 1.0)
    };
    v.cross(&helper).normalize()
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Dot;
    use approx::assert_relative_eq;

    #[test]
    fn rejects_invalid_parameters() {
        assert!(AngularQuadrature::new(4, 2, 2, 0.0, 1.0).is_err());
        assert!(AngularQuadrature::new(3, 0, 2, 0.0, 1.0).is_err());
        assert!(AngularQuadrature::new(3, 2, 0, 0.0, 1.0).is_err());
        assert!(AngularQuadrature::new(3, 2, 2, 0.5, 0.5).is_err());
        assert!(AngularQuadrature::new(3, 2, 2, -1.5, 1.0).is_err());
        assert!(AngularQuadrature::new(3, 2, 2, 0.0, 1.5).is_err());
    }

    #[test]
    fn gauss_legendre_nodes_are_sorted_and_symmetric() {
        let (x, w) = gauss_legendre(5).unwrap();
        assert_eq!(x.len(), 5);
        for i in 1..x.len() {
            assert!(x[i] > x[i - 1]);
        }
        for i in 0..x.len() {
            assert_relative_eq!(x[i] + x[x.len() - 1 - i], 1.0, epsilon = 1e-12);
        }
        assert_relative_eq!(w.iter().sum::<Float>(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn gauss_legendre_integrates_cubics() {
        // A 2-point rule is exact for polynomials up to degree 3.
        let (x, w) = gauss_legendre(2).unwrap();
        let integral: Float = x.iter().zip(&w).map(|(x, w)| w * x * x * x).sum();
        assert_relative_eq!(integral, 0.25, epsilon = 1e-14);
    }

    #[test]
    fn full_hemisphere_weight_is_two_pi() {
        let aq = AngularQuadrature::new(3, 4, 8, 0.0, 1.0).unwrap();
        let total: Float = (0..aq.num_directions())
            .map(|i| aq.get_total_weight(i).unwrap())
            .sum();
        assert_relative_eq!(total, TWO_PI, epsilon = 1e-10);
    }

    #[test]
    fn partial_mu_band_weight_matches_range() {
        let aq = AngularQuadrature::new(3, 3, 6, 0.2, 0.7).unwrap();
        let total: Float = (0..aq.num_directions())
            .map(|i| aq.get_total_weight(i).unwrap())
            .sum();
        assert_relative_eq!(total, TWO_PI * 0.5, epsilon = 1e-10);
    }

    #[test]
    fn rotation_preserves_total_weight() {
        let mut aq = AngularQuadrature::new(3, 4, 8, 0.0, 1.0).unwrap();
        let before: Float = (0..aq.num_directions())
            .map(|i| aq.get_total_weight(i).unwrap())
            .sum();

        aq.rotate(&Vector3f::new(1.0, -2.0, 3.0)).unwrap();
        let after: Float = (0..aq.num_directions())
            .map(|i| aq.get_total_weight(i).unwrap())
            .sum();
        assert_relative_eq!(before, after, epsilon = 1e-10);

        for i in 0..aq.num_directions() {
            assert_relative_eq!(aq.get_direction(i).unwrap().length(), 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn rotated_directions_align_with_axis() {
        let mut aq = AngularQuadrature::new(3, 4, 8, 0.0, 1.0).unwrap();
        let axis = Vector3f::new(0.0, 1.0, 0.0);
        aq.rotate(&axis).unwrap();
        // All directions live in the hemisphere around the new polar axis.
        for i in 0..aq.num_directions() {
            assert!(aq.get_direction(i).unwrap().dot(&axis) > 0.0);
        }
    }

    #[test]
    fn merge_tolerance_controls_coalescing() {
        let mut aq = AngularQuadrature::new(2, 4, 8, 0.0, 1.0).unwrap();
        let base_total: Float = (0..aq.num_directions())
            .map(|i| aq.get_total_weight(i).unwrap())
            .sum();

        // A tolerance wider than the unit circle collapses every projected
        // direction into the first record.
        aq.set_merge_tolerance(10.0);
        aq.rotate(&Vector3f::new(1.0, 0.0, 0.0)).unwrap();
        assert_eq!(aq.num_directions(), 1);
        assert_relative_eq!(aq.get_total_weight(0).unwrap(), base_total, epsilon = 1e-10);
    }

    #[test]
    fn two_d_projection_merges_directions() {
        let mut aq = AngularQuadrature::new(2, 4, 8, 0.0, 1.0).unwrap();
        let base_total: Float = (0..aq.num_directions())
            .map(|i| aq.get_total_weight(i).unwrap())
            .sum();
        let base_count = aq.num_base_samples();

        aq.rotate(&Vector3f::new(1.0, 0.0, 0.0)).unwrap();
        assert!(aq.num_directions() <= base_count);

        // The union of the per-direction weight lists recovers the base
        // weight set exactly.
        let merged_weights: usize = (0..aq.num_directions())
            .map(|i| aq.get_weights(i).unwrap().len())
            .sum();
        assert_eq!(merged_weights, base_count);

        let total: Float = (0..aq.num_directions())
            .map(|i| aq.get_total_weight(i).unwrap())
            .sum();
        assert_relative_eq!(total, base_total, epsilon = 1e-10);

        // Projected directions are in-plane units.
        for i in 0..aq.num_directions() {
            let d = aq.get_direction(i).unwrap();
            assert_eq!(d.z, 0.0);
            assert_relative_eq!(d.length(), 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn two_d_hemispherical_weight_is_two_pi() {
        // Even polar order: no sample sits exactly on the mid abscissa.
        let aq = AngularQuadrature::new(2, 4, 8, 0.0, 1.0).unwrap();
        let total: Float = (0..aq.num_directions())
            .map(|i| aq.get_total_weight(i).unwrap())
            .sum();
        assert_relative_eq!(total, TWO_PI, epsilon = 1e-10);
    }

    #[test]
    fn accessors_reject_out_of_range_indices() {
        let aq = AngularQuadrature::new(3, 2, 2, 0.0, 1.0).unwrap();
        let n = aq.num_directions();
        assert!(aq.get_direction(n).is_err());
        assert!(aq.get_weights(n).is_err());
        assert!(aq.get_polar_sins(n).is_err());
        assert!(aq.get_total_weight(n).is_err());
        assert!(aq.get_direction(n - 1).is_ok());
    }
}
