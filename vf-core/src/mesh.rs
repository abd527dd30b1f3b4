//! Mesh collaborator interface
//!
//! The ray tracer never owns or mutates mesh topology. It consumes a narrow
//! set of primitives through the `Mesh` trait: enumerate boundary faces,
//! query side normals and face quadratures, cross element adjacency and
//! locate points. Elements are referred to by worker-independent numeric ids
//! resolved locally by the mesh, so ids can cross worker boundaries inside
//! packed records.

use crate::common::Float;
use crate::geometry::{Point3f, Vector3f};
use std::collections::BTreeSet;

/// Identifier of a boundary (sideset) in the mesh.
pub type BoundaryId = u32;

/// Local side index of an element.
pub type Side = u16;

/// Worker-independent element identifier.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElemId(pub u64);

/// One face of an element lying on a boundary.
#[derive(Copy, Clone, Debug)]
pub struct BndFace {
    /// The element.
    pub elem: ElemId,

    /// The element-local side index.
    pub side: Side,

    /// The boundary the face belongs to.
    pub bnd_id: BoundaryId,
}

/// Intersection of a ray with an element side.
#[derive(Copy, Clone, Debug)]
pub struct SideHit {
    /// The side that was hit.
    pub side: Side,

    /// The intersection point.
    pub point: Point3f,

    /// Distance traveled from the ray's previous point.
    pub distance: Float,
}

/// Read-only spatial partition queried by the ray tracer.
///
/// Implementations must be safe to read from multiple trace threads at once.
pub trait Mesh: Sync {
    /// Manifold dimension, 2 or 3.
    fn dimension(&self) -> usize;

    /// Every (element, side) pair carrying a boundary id, across all workers.
    fn boundary_faces(&self) -> Vec<BndFace>;

    /// Rank of the worker owning the element.
    fn elem_owner(&self, elem: ElemId) -> usize;

    /// Number of sides of the element.
    fn num_sides(&self, elem: ElemId) -> usize;

    /// The element across the given side, if any.
    fn neighbor(&self, elem: ElemId, side: Side) -> Option<ElemId>;

    /// The side of `elem` that touches `other`.
    fn which_side_touches(&self, elem: ElemId, other: ElemId) -> Side;

    /// Outward unit normal of the given element side.
    fn side_normal(&self, elem: ElemId, side: Side) -> Vector3f;

    /// Measure (length in 2-D, area in 3-D) of the given element side.
    fn side_area(&self, elem: ElemId, side: Side) -> Float;

    /// Corner points of the given element side.
    fn side_vertices(&self, elem: ElemId, side: Side) -> Vec<Point3f>;

    /// Boundary id carried by the given element side, if any.
    fn boundary_id(&self, elem: ElemId, side: Side) -> Option<BoundaryId>;

    /// Quadrature points and weights on a face. The weights sum to the face
    /// measure.
    ///
    /// * `order` - Number of quadrature points along the face.
    fn face_quadrature(&self, elem: ElemId, side: Side, order: usize) -> (Vec<Point3f>, Vec<Float>);

    /// Whether the side is geometrically planar. Reflection normals are only
    /// evaluated at a representative point, so non-planar sides degrade to a
    /// warning.
    fn side_is_planar(&self, _elem: ElemId, _side: Side) -> bool {
        true
    }

    /// Nearest forward intersection of the ray `(point, direction)` with the
    /// sides of `elem`, excluding `incoming_side`.
    ///
    /// * `tol` - Minimum accepted travel distance, rejects re-hits of the
    ///           starting point.
    fn next_intersection(
        &self,
        elem: ElemId,
        point: &Point3f,
        direction: &Vector3f,
        incoming_side: Option<Side>,
        tol: Float,
    ) -> Option<SideHit>;

    /// The element containing the given point, if any.
    fn locate_point(&self, point: &Point3f) -> Option<ElemId>;

    /// Boundary ids assigned to internal (two-sided) faces.
    fn internal_boundary_ids(&self) -> BTreeSet<BoundaryId> {
        self.boundary_faces()
            .iter()
            .filter(|f| self.neighbor(f.elem, f.side).is_some())
            .map(|f| f.bnd_id)
            .collect()
    }
}

/// One polygonal element of a [`PolyMesh2d`].
struct PolyElem {
    /// Vertex indices, counter-clockwise.
    verts: Vec<usize>,

    /// Owning worker rank.
    owner: usize,

    /// Per-side neighbor element, if any.
    neighbors: Vec<Option<ElemId>>,

    /// Per-side boundary id, if any.
    bnd_ids: Vec<Option<BoundaryId>>,
}

/// A planar mesh of simple polygonal elements with explicit adjacency and
/// worker ownership. Side `s` of an element runs from vertex `s` to vertex
/// `s + 1` (wrapping), counter-clockwise, so outward normals point to the
/// right of the edge direction.
pub struct PolyMesh2d {
    /// Shared vertex coordinates (z = 0).
    vertices: Vec<Point3f>,

    /// The elements, indexed by `ElemId`.
    elems: Vec<PolyElem>,
}

impl PolyMesh2d {
    /// Creates a mesh from shared vertices and per-element vertex loops.
    /// Adjacency is derived by matching shared edges.
    ///
    /// * `vertices`   - Vertex coordinates.
    /// * `elem_verts` - Per-element vertex indices, counter-clockwise.
    /// * `owners`     - Per-element owning worker rank.
    pub fn new(vertices: Vec<Point3f>, elem_verts: Vec<Vec<usize>>, owners: Vec<usize>) -> Self {
        assert_eq!(elem_verts.len(), owners.len());

        let mut elems: Vec<PolyElem> = elem_verts
            .into_iter()
            .zip(owners)
            .map(|(verts, owner)| {
                assert!(verts.len() >= 3);
                let n = verts.len();
                PolyElem {
                    verts,
                    owner,
                    neighbors: vec![None; n],
                    bnd_ids: vec![None; n],
                }
            })
            .collect();

        // Match edges (a, b) against reversed edges (b, a) of other elements.
        let mut edge_owner = std::collections::HashMap::new();
        for e in 0..elems.len() {
            let n = elems[e].verts.len();
            for s in 0..n {
                let a = elems[e].verts[s];
                let b = elems[e].verts[(s + 1) % n];
                edge_owner.insert((a, b), (e, s));
            }
        }
        for e in 0..elems.len() {
            let n = elems[e].verts.len();
            for s in 0..n {
                let a = elems[e].verts[s];
                let b = elems[e].verts[(s + 1) % n];
                if let Some(&(other, _)) = edge_owner.get(&(b, a)) {
                    elems[e].neighbors[s] = Some(ElemId(other as u64));
                }
            }
        }

        Self { vertices, elems }
    }

    /// Assigns a boundary id to an element side.
    ///
    /// * `elem`   - The element.
    /// * `side`   - The element-local side.
    /// * `bnd_id` - The boundary id.
    pub fn set_boundary(&mut self, elem: ElemId, side: Side, bnd_id: BoundaryId) {
        self.elems[elem.0 as usize].bnd_ids[side as usize] = Some(bnd_id);
    }

    /// A closed unit-square cavity as a single element owned by rank 0, with
    /// boundary ids assigned counter-clockwise starting at the bottom side.
    /// Reference geometry for the demos and integration tests.
    ///
    /// * `bnd_ids` - Boundary ids for bottom, right, top, left.
    pub fn unit_square_cavity(bnd_ids: [BoundaryId; 4]) -> Self {
        let vertices = vec![
            Point3f::new(0.0, 0.0, 0.0),
            Point3f::new(1.0, 0.0, 0.0),
            Point3f::new(1.0, 1.0, 0.0),
            Point3f::new(0.0, 1.0, 0.0),
        ];
        let mut mesh = Self::new(vertices, vec![vec![0, 1, 2, 3]], vec![0]);
        for (side, bnd_id) in bnd_ids.into_iter().enumerate() {
            mesh.set_boundary(ElemId(0), side as Side, bnd_id);
        }
        mesh
    }

    /// The unit-square cavity split into left/right halves, with the shared
    /// face carrying an internal boundary id.
    ///
    /// * `bnd_ids`  - External boundary ids for bottom, right, top, left.
    /// * `internal` - Boundary id of the shared internal face.
    /// * `owners`   - Owning worker ranks of the left and right halves.
    pub fn split_square_cavity(
        bnd_ids: [BoundaryId; 4],
        internal: BoundaryId,
        owners: [usize; 2],
    ) -> Self {
        let vertices = vec![
            Point3f::new(0.0, 0.0, 0.0),
            Point3f::new(0.5, 0.0, 0.0),
            Point3f::new(1.0, 0.0, 0.0),
            Point3f::new(1.0, 1.0, 0.0),
            Point3f::new(0.5, 1.0, 0.0),
            Point3f::new(0.0, 1.0, 0.0),
        ];
        // Left half: 0-1-4-5; right half: 1-2-3-4.
        let mut mesh = Self::new(
            vertices,
            vec![vec![0, 1, 4, 5], vec![1, 2, 3, 4]],
            owners.to_vec(),
        );
        let left = ElemId(0);
        let right = ElemId(1);
        mesh.set_boundary(left, 0, bnd_ids[0]); // bottom-left
        mesh.set_boundary(right, 0, bnd_ids[0]); // bottom-right
        mesh.set_boundary(right, 1, bnd_ids[1]); // right
        mesh.set_boundary(right, 2, bnd_ids[2]); // top-right
        mesh.set_boundary(left, 2, bnd_ids[2]); // top-left
        mesh.set_boundary(left, 3, bnd_ids[3]); // left
        mesh.set_boundary(left, 1, internal); // shared face, left element side
        mesh
    }

    fn elem(&self, elem: ElemId) -> &PolyElem {
        &self.elems[elem.0 as usize]
    }

    /// Endpoints of side `s` of an element.
    fn edge(&self, elem: ElemId, side: Side) -> (Point3f, Point3f) {
        let e = self.elem(elem);
        let n = e.verts.len();
        let a = self.vertices[e.verts[side as usize]];
        let b = self.vertices[e.verts[(side as usize + 1) % n]];
        (a, b)
    }
}

impl Mesh for PolyMesh2d {
    fn dimension(&self) -> usize {
        2
    }

    fn boundary_faces(&self) -> Vec<BndFace> {
        let mut faces = Vec::new();
        for (e, elem) in self.elems.iter().enumerate() {
            for (s, bnd_id) in elem.bnd_ids.iter().enumerate() {
                if let Some(bnd_id) = bnd_id {
                    faces.push(BndFace {
                        elem: ElemId(e as u64),
                        side: s as Side,
                        bnd_id: *bnd_id,
                    });
                }
            }
        }
        faces
    }

    fn elem_owner(&self, elem: ElemId) -> usize {
        self.elem(elem).owner
    }

    fn num_sides(&self, elem: ElemId) -> usize {
        self.elem(elem).verts.len()
    }

    fn neighbor(&self, elem: ElemId, side: Side) -> Option<ElemId> {
        self.elem(elem).neighbors[side as usize]
    }

    fn which_side_touches(&self, elem: ElemId, other: ElemId) -> Side {
        self.elem(elem)
            .neighbors
            .iter()
            .position(|n| *n == Some(other))
            .expect("elements are not adjacent") as Side
    }

    fn side_normal(&self, elem: ElemId, side: Side) -> Vector3f {
        let (a, b) = self.edge(elem, side);
        let e = b - a;
        // Outward for counter-clockwise vertex order.
        Vector3f::new(e.y, -e.x, 0.0).normalize()
    }

    fn side_area(&self, elem: ElemId, side: Side) -> Float {
        let (a, b) = self.edge(elem, side);
        a.distance(&b)
    }

    fn side_vertices(&self, elem: ElemId, side: Side) -> Vec<Point3f> {
        let (a, b) = self.edge(elem, side);
        vec![a, b]
    }

    fn boundary_id(&self, elem: ElemId, side: Side) -> Option<BoundaryId> {
        self.elem(elem).bnd_ids[side as usize]
    }

    fn face_quadrature(&self, elem: ElemId, side: Side, order: usize) -> (Vec<Point3f>, Vec<Float>) {
        assert!(order > 0);
        let (a, b) = self.edge(elem, side);
        let e = b - a;
        let len = e.length();

        // Midpoint (grid) rule along the face.
        let points = (0..order)
            .map(|i| a + e * ((i as Float + 0.5) / order as Float))
            .collect();
        let weights = vec![len / order as Float; order];
        (points, weights)
    }

    fn next_intersection(
        &self,
        elem: ElemId,
        point: &Point3f,
        direction: &Vector3f,
        incoming_side: Option<Side>,
        tol: Float,
    ) -> Option<SideHit> {
        let cross2 = |u: &Vector3f, v: &Vector3f| u.x * v.y - u.y * v.x;

        let mut best: Option<SideHit> = None;
        for s in 0..self.num_sides(elem) {
            let side = s as Side;
            if incoming_side == Some(side) {
                continue;
            }
            let (a, b) = self.edge(elem, side);
            let e = b - a;
            let denom = cross2(direction, &e);
            if denom.abs() < Float::EPSILON {
                // Parallel to the side.
                continue;
            }
            let to_a = a - *point;
            let t = cross2(&to_a, &e) / denom;
            let u = cross2(&to_a, direction) / denom;
            if t <= tol || u < -tol || u > 1.0 + tol {
                continue;
            }
            if best.as_ref().map_or(true, |hit| t < hit.distance) {
                best = Some(SideHit {
                    side,
                    point: *point + *direction * t,
                    distance: t,
                });
            }
        }
        best
    }

    fn locate_point(&self, point: &Point3f) -> Option<ElemId> {
        // Even-odd crossing test per element, in the xy plane.
        for (e, elem) in self.elems.iter().enumerate() {
            let n = elem.verts.len();
            let mut inside = false;
            for s in 0..n {
                let a = self.vertices[elem.verts[s]];
                let b = self.vertices[elem.verts[(s + 1) % n]];
                if (a.y > point.y) != (b.y > point.y) {
                    let x = a.x + (point.y - a.y) / (b.y - a.y) * (b.x - a.x);
                    if point.x < x {
                        inside = !inside;
                    }
                }
            }
            if inside {
                return Some(ElemId(e as u64));
            }
        }
        None
    }

}

/// Returns true if `point` lies fuzzily on a corner shared by the given side.
///
/// * `side_vertices` - Corner points of the side.
/// * `point`         - The candidate point.
/// * `tol`           - Absolute tolerance.
pub fn point_on_side_corner(side_vertices: &[Point3f], point: &Point3f, tol: Float) -> bool {
    side_vertices.iter().any(|v| v.fuzzy_equal(point, tol))
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn square_cavity_normals_point_outward() {
        let mesh = PolyMesh2d::unit_square_cavity([1, 2, 3, 4]);
        let e = ElemId(0);
        assert_eq!(mesh.side_normal(e, 0), Vector3f::new(0.0, -1.0, 0.0));
        assert_eq!(mesh.side_normal(e, 1), Vector3f::new(1.0, 0.0, 0.0));
        assert_eq!(mesh.side_normal(e, 2), Vector3f::new(0.0, 1.0, 0.0));
        assert_eq!(mesh.side_normal(e, 3), Vector3f::new(-1.0, 0.0, 0.0));
    }

    #[test]
    fn face_quadrature_weights_sum_to_length() {
        let mesh = PolyMesh2d::unit_square_cavity([1, 2, 3, 4]);
        for order in [1, 2, 5] {
            let (points, weights) = mesh.face_quadrature(ElemId(0), 0, order);
            assert_eq!(points.len(), order);
            assert_relative_eq!(weights.iter().sum::<Float>(), 1.0, epsilon = 1e-14);
        }
    }

    #[test]
    fn next_intersection_crosses_the_cavity() {
        let mesh = PolyMesh2d::unit_square_cavity([1, 2, 3, 4]);
        let hit = mesh
            .next_intersection(
                ElemId(0),
                &Point3f::new(0.25, 0.0, 0.0),
                &Vector3f::new(0.0, 1.0, 0.0),
                Some(0),
                1e-12,
            )
            .unwrap();
        assert_eq!(hit.side, 2);
        assert_relative_eq!(hit.distance, 1.0, epsilon = 1e-12);
        assert!(hit.point.fuzzy_equal(&Point3f::new(0.25, 1.0, 0.0), 1e-12));
    }

    #[test]
    fn split_cavity_adjacency() {
        let mesh = PolyMesh2d::split_square_cavity([1, 2, 3, 4], 9, [0, 1]);
        let left = ElemId(0);
        let right = ElemId(1);
        assert_eq!(mesh.neighbor(left, 1), Some(right));
        assert_eq!(mesh.neighbor(right, 3), Some(left));
        assert_eq!(mesh.which_side_touches(right, left), 3);
        assert_eq!(mesh.elem_owner(left), 0);
        assert_eq!(mesh.elem_owner(right), 1);
        assert_eq!(mesh.internal_boundary_ids().into_iter().collect::<Vec<_>>(), vec![9]);
    }

    #[test]
    fn locate_point_picks_the_owning_half() {
        let mesh = PolyMesh2d::split_square_cavity([1, 2, 3, 4], 9, [0, 1]);
        assert_eq!(mesh.locate_point(&Point3f::new(0.25, 0.5, 0.0)), Some(ElemId(0)));
        assert_eq!(mesh.locate_point(&Point3f::new(0.75, 0.5, 0.0)), Some(ElemId(1)));
        assert_eq!(mesh.locate_point(&Point3f::new(2.0, 0.5, 0.0)), None);
    }
}
