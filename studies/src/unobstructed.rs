//! Unobstructed closed-form view factors
//!
//! For a 2-D enclosure whose boundaries see each other without obstruction,
//! Hottel's crossed strings method gives every view factor in closed form:
//! the crossed diagonals between two segments minus the uncrossed sides,
//! over twice the emitting length. Cheap to evaluate and exact, so it doubles
//! as the oracle the ray traced results are checked against.

use crate::matrix::ViewFactorMatrix;
use vf_core::common::Float;
use vf_core::error::{Result, ViewFactorError};
use vf_core::geometry::Point3f;
use vf_core::mesh::BoundaryId;
use nalgebra::DMatrix;

/// One straight boundary segment of a 2-D enclosure.
#[derive(Clone, Copy, Debug)]
pub struct BoundarySegment {
    /// The boundary id.
    pub bnd_id: BoundaryId,

    /// First endpoint.
    pub a: Point3f,

    /// Second endpoint.
    pub b: Point3f,
}

impl BoundarySegment {
    /// Creates a segment.
    pub fn new(bnd_id: BoundaryId, a: Point3f, b: Point3f) -> Self {
        Self { bnd_id, a, b }
    }

    /// Segment length.
    pub fn length(&self) -> Float {
        self.a.distance(&self.b)
    }
}

/// Assembles the view factor matrix of an unobstructed 2-D enclosure of
/// straight segments with the crossed strings method.
///
/// The segments must wind consistently around the enclosure (each segment's
/// second endpoint leading into the next) and close it; the row sum check
/// inherited from [`ViewFactorMatrix`] rejects anything else.
///
/// * `segments`          - The enclosure boundaries, one segment each.
/// * `row_sum_tolerance` - Largest accepted row sum defect.
pub fn crossed_strings_matrix(
    segments: &[BoundarySegment],
    row_sum_tolerance: Float,
) -> Result<ViewFactorMatrix> {
    if segments.len() < 3 {
        return Err(ViewFactorError::InvalidParameter {
            name: "segments",
            reason: format!(
                "{} segments cannot close an enclosure, need at least 3",
                segments.len()
            ),
        });
    }
    for segment in segments {
        if segment.length() <= 0.0 {
            return Err(ViewFactorError::InvalidParameter {
                name: "segments",
                reason: format!("boundary {} has zero length", segment.bnd_id),
            });
        }
    }

    let n = segments.len();
    let mut f = DMatrix::zeros(n, n);
    for (i, from) in segments.iter().enumerate() {
        for (j, to) in segments.iter().enumerate() {
            if i != j {
                f[(i, j)] = crossed_strings(from, to);
            }
        }
    }

    let boundaries = segments.iter().map(|s| s.bnd_id).collect();
    let areas = segments.iter().map(|s| s.length()).collect();
    ViewFactorMatrix::from_entries(boundaries, areas, f, row_sum_tolerance)
}

/// The crossed strings view factor from one segment to another. With a
/// consistent winding, like-named endpoints sit diagonally across the gap,
/// so they form the crossed strings.
fn crossed_strings(from: &BoundarySegment, to: &BoundarySegment) -> Float {
    let crossed = from.a.distance(&to.a) + from.b.distance(&to.b);
    let uncrossed = from.a.distance(&to.b) + from.b.distance(&to.a);
    ((crossed - uncrossed) / (2.0 * from.length())).max(0.0)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Unit square, counter-clockwise: bottom, right, top, left.
    fn unit_square() -> Vec<BoundarySegment> {
        let p = |x, y| Point3f::new(x, y, 0.0);
        vec![
            BoundarySegment::new(1, p(0.0, 0.0), p(1.0, 0.0)),
            BoundarySegment::new(2, p(1.0, 0.0), p(1.0, 1.0)),
            BoundarySegment::new(3, p(1.0, 1.0), p(0.0, 1.0)),
            BoundarySegment::new(4, p(0.0, 1.0), p(0.0, 0.0)),
        ]
    }

    #[test]
    fn unit_square_factors_are_exact() {
        let matrix = crossed_strings_matrix(&unit_square(), 1e-12).unwrap();

        let opposite = Float::sqrt(2.0) - 1.0;
        let adjacent = (2.0 - Float::sqrt(2.0)) / 2.0;
        assert_relative_eq!(matrix.get(1, 3).unwrap(), opposite, epsilon = 1e-12);
        assert_relative_eq!(matrix.get(1, 2).unwrap(), adjacent, epsilon = 1e-12);
        assert_relative_eq!(matrix.get(1, 4).unwrap(), adjacent, epsilon = 1e-12);
        assert_eq!(matrix.get(1, 1).unwrap(), 0.0);

        assert!(matrix.max_row_sum_deviation() < 1e-12);
        assert!(matrix.max_reciprocity_deviation() < 1e-12);
    }

    #[test]
    fn rectangle_obeys_reciprocity_with_unequal_areas() {
        let p = |x, y| Point3f::new(x, y, 0.0);
        let segments = vec![
            BoundarySegment::new(1, p(0.0, 0.0), p(2.0, 0.0)),
            BoundarySegment::new(2, p(2.0, 0.0), p(2.0, 1.0)),
            BoundarySegment::new(3, p(2.0, 1.0), p(0.0, 1.0)),
            BoundarySegment::new(4, p(0.0, 1.0), p(0.0, 0.0)),
        ];
        let matrix = crossed_strings_matrix(&segments, 1e-12).unwrap();

        assert!(matrix.max_row_sum_deviation() < 1e-12);
        assert!(matrix.max_reciprocity_deviation() < 1e-12);
        assert_relative_eq!(matrix.area(1).unwrap(), 2.0);
        // The long side sees proportionally less of the short side.
        assert!(matrix.get(1, 2).unwrap() < matrix.get(2, 1).unwrap());
    }

    #[test]
    fn too_few_segments_are_rejected() {
        let segments = unit_square().into_iter().take(2).collect::<Vec<_>>();
        assert!(crossed_strings_matrix(&segments, 1e-12).is_err());
    }
}
