//! Start element records
//!
//! Ephemeral seeds for ray generation. The local worker scans its owned
//! boundary faces and produces one record per face; on internal boundaries
//! under the positive convention the physical trace must begin on the
//! neighboring element, so records whose true starting element lives on
//! another worker are packed and shipped there before any ray exists.

use vf_core::common::Float;
use vf_core::geometry::Point3f;
use vf_core::mesh::{BoundaryId, ElemId, Side};
use vf_core::packing::{PackBuffer, Packable, PackReader};

/// Seed record for spawning rays from one boundary face.
#[derive(Clone, Debug, PartialEq)]
pub struct StartElem {
    /// The element whose face lies on the boundary.
    pub elem: ElemId,

    /// The element the trace actually starts from. Differs from `elem` on
    /// internal boundaries under the positive convention.
    pub start_elem: ElemId,

    /// Incoming side of `start_elem`.
    pub incoming_side: Side,

    /// Boundary the face belongs to.
    pub bnd_id: BoundaryId,

    /// Face quadrature points.
    pub points: Vec<Point3f>,

    /// Face quadrature weights, one per point.
    pub weights: Vec<Float>,
}

impl StartElem {
    /// Creates a seed record.
    pub fn new(
        elem: ElemId,
        start_elem: ElemId,
        incoming_side: Side,
        bnd_id: BoundaryId,
        points: Vec<Point3f>,
        weights: Vec<Float>,
    ) -> Self {
        debug_assert_eq!(points.len(), weights.len(), "size mismatch");
        Self {
            elem,
            start_elem,
            incoming_side,
            bnd_id,
            points,
            weights,
        }
    }
}

impl Packable for StartElem {
    fn pack(&self, buf: &mut PackBuffer) {
        debug_assert_eq!(self.points.len(), self.weights.len(), "size mismatch");

        // Number of points first so the receiver knows how many fixed
        // fields follow.
        buf.pack_count(self.points.len());
        // Incoming side and boundary id coalesce into the same unit.
        buf.pack_small(self.incoming_side as u64, 16);
        buf.pack_small(self.bnd_id as u64, 32);
        buf.pack_id(Some(self.elem.0));
        buf.pack_id(Some(self.start_elem.0));
        for point in &self.points {
            buf.pack_float(point.x);
            buf.pack_float(point.y);
            buf.pack_float(point.z);
        }
        for weight in &self.weights {
            buf.pack_float(*weight);
        }
    }

    fn unpack(reader: &mut PackReader) -> Self {
        let num_points = reader.read_count();
        let incoming_side = reader.read_small(16) as Side;
        let bnd_id = reader.read_small(32) as BoundaryId;
        let elem = ElemId(reader.read_id().expect("start elem record without element"));
        let start_elem = ElemId(reader.read_id().expect("start elem record without element"));
        let points = (0..num_points)
            .map(|_| {
                Point3f::new(
                    reader.read_float(),
                    reader.read_float(),
                    reader.read_float(),
                )
            })
            .collect();
        let weights = (0..num_points).map(|_| reader.read_float()).collect();

        Self {
            elem,
            start_elem,
            incoming_side,
            bnd_id,
            points,
            weights,
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use vf_core::packing::{pack_vec, unpack_vec};

    fn sample(num_points: usize) -> StartElem {
        let points = (0..num_points)
            .map(|i| Point3f::new(i as Float * 0.25, 1.0 - i as Float * 0.125, 0.0))
            .collect();
        let weights = (0..num_points).map(|i| 0.5 + i as Float).collect();
        StartElem::new(ElemId(3), ElemId(8), 2, 11, points, weights)
    }

    #[test]
    fn round_trip_with_zero_one_and_many_points() {
        for num_points in [0, 1, 5] {
            let record = sample(num_points);
            let words = pack_vec(std::slice::from_ref(&record));
            let unpacked: Vec<StartElem> = unpack_vec(&words);
            assert_eq!(unpacked.len(), 1);
            assert_eq!(unpacked[0], record);
        }
    }

    #[test]
    fn batch_round_trip_preserves_order() {
        let records = vec![sample(2), sample(0), sample(4)];
        let words = pack_vec(&records);
        let unpacked: Vec<StartElem> = unpack_vec(&words);
        assert_eq!(unpacked, records);
    }
}
