//! Scalar view factor output
//!
//! A named wrapper around a single matrix entry, for callers that consume
//! one scalar per output step instead of the whole matrix.

use crate::matrix::ViewFactorMatrix;
use vf_core::common::Float;
use vf_core::error::Result;
use vf_core::mesh::BoundaryId;

/// Exposes one view factor as a named scalar value.
pub struct ViewFactorPostprocessor {
    /// Output name.
    name: String,

    /// Emitting boundary.
    from: BoundaryId,

    /// Receiving boundary.
    to: BoundaryId,
}

impl ViewFactorPostprocessor {
    /// Creates the postprocessor.
    ///
    /// * `name` - Output name.
    /// * `from` - Emitting boundary.
    /// * `to`   - Receiving boundary.
    pub fn new(name: impl Into<String>, from: BoundaryId, to: BoundaryId) -> Self {
        Self {
            name: name.into(),
            from,
            to,
        }
    }

    /// Output name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Reads the wrapped view factor off a finalized matrix.
    pub fn value(&self, matrix: &ViewFactorMatrix) -> Result<Float> {
        matrix.get(self.from, self.to)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unobstructed::{crossed_strings_matrix, BoundarySegment};
    use approx::assert_relative_eq;
    use vf_core::geometry::Point3f;

    #[test]
    fn reads_a_named_scalar_off_the_matrix() {
        let p = |x, y| Point3f::new(x, y, 0.0);
        let segments = vec![
            BoundarySegment::new(1, p(0.0, 0.0), p(1.0, 0.0)),
            BoundarySegment::new(2, p(1.0, 0.0), p(1.0, 1.0)),
            BoundarySegment::new(3, p(1.0, 1.0), p(0.0, 1.0)),
            BoundarySegment::new(4, p(0.0, 1.0), p(0.0, 0.0)),
        ];
        let matrix = crossed_strings_matrix(&segments, 1e-12).unwrap();

        let pp = ViewFactorPostprocessor::new("vf_bottom_top", 1, 3);
        assert_eq!(pp.name(), "vf_bottom_top");
        assert_relative_eq!(
            pp.value(&matrix).unwrap(),
            Float::sqrt(2.0) - 1.0,
            epsilon = 1e-12
        );
        assert!(ViewFactorPostprocessor::new("missing", 1, 9).value(&matrix).is_err());
    }
}
