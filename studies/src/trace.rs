//! Ray trace loop
//!
//! Advances a ray element by element through a worker's partition. Interior
//! crossings follow mesh adjacency; a neighbor owned by another worker turns
//! the trace into an ownership transfer; a face carrying a boundary
//! condition invokes it, with an applying count so corner hits shared by
//! several faces are neither double-counted nor half-reflected.

use crate::bcs::{assert_valid_weight, reflected_direction, BcKind};
use vf_core::common::Float;
use vf_core::mesh::{point_on_side_corner, BoundaryId, ElemId, Mesh, Side, SideHit};
use vf_core::ray::Ray;
use std::collections::HashMap;

/// View factor tally, owned by one trace thread.
pub type Tally = HashMap<(BoundaryId, BoundaryId), Float>;

/// Non-fatal geometric edge cases, aggregated during tracing and reported
/// once at the end.
#[derive(Clone, Copy, Debug, Default)]
pub struct TraceWarnings {
    /// Reflections off faces that are not geometrically planar.
    pub non_planar_reflections: u64,

    /// Rays that crossed an element boundary exactly at a corner, where the
    /// bin assignment is ambiguous.
    pub division_boundary_hits: u64,

    /// Rays that could not be advanced and were dropped.
    pub rays_lost: u64,
}

impl TraceWarnings {
    /// Accumulates another set of warning counters.
    pub fn merge(&mut self, other: &TraceWarnings) {
        self.non_planar_reflections += other.non_planar_reflections;
        self.division_boundary_hits += other.division_boundary_hits;
        self.rays_lost += other.rays_lost;
    }

    /// Total number of warnings.
    pub fn total(&self) -> u64 {
        self.non_planar_reflections + self.division_boundary_hits + self.rays_lost
    }
}

/// Outcome of tracing one ray on this worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TraceResult {
    /// The ray terminated here.
    Terminated,

    /// The ray crossed into a partition owned by the given worker and must
    /// be handed off.
    Transferred(usize),
}

/// Trace driver for one worker. Read-only over the mesh and the boundary
/// condition table, so one instance per thread is cheap.
pub struct TraceRay<'a, M: Mesh> {
    /// The local partition (thread-safe to read).
    mesh: &'a M,

    /// This worker's rank.
    rank: usize,

    /// Behavior per boundary id.
    bc_table: &'a HashMap<BoundaryId, BcKind>,

    /// Aux slot carrying the boundary the ray started from.
    aux_start_bnd_id: usize,

    /// Aux slot carrying the ray's starting weight.
    aux_start_weight: usize,

    /// Fuzzy tolerance for on-corner detection and minimum advance.
    edge_tolerance: Float,

    /// Step budget per ray.
    max_intersections: u32,
}

impl<'a, M: Mesh> TraceRay<'a, M> {
    /// Creates a trace driver.
    pub fn new(
        mesh: &'a M,
        rank: usize,
        bc_table: &'a HashMap<BoundaryId, BcKind>,
        aux_start_bnd_id: usize,
        aux_start_weight: usize,
        edge_tolerance: Float,
        max_intersections: u32,
    ) -> Self {
        Self {
            mesh,
            rank,
            bc_table,
            aux_start_bnd_id,
            aux_start_weight,
            edge_tolerance,
            max_intersections,
        }
    }

    /// Traces one ray until it terminates or must be handed off.
    ///
    /// * `ray`      - The ray; must be resolved to an element on this worker.
    /// * `tally`    - This thread's view factor tally.
    /// * `warnings` - This thread's warning counters.
    pub fn trace(&self, ray: &mut Ray, tally: &mut Tally, warnings: &mut TraceWarnings) -> TraceResult {
        while ray.should_continue() {
            let elem = ray.current_elem().expect("ray not resolved to an element");
            debug_assert_eq!(self.mesh.elem_owner(elem), self.rank, "ray traced off-worker");

            let Some(hit) = self.mesh.next_intersection(
                elem,
                ray.current_point(),
                ray.direction(),
                ray.current_incoming_side(),
                self.edge_tolerance,
            ) else {
                warnings.rays_lost += 1;
                ray.set_should_continue(false);
                break;
            };

            ray.set_current_point(hit.point);
            ray.add_distance(hit.distance);
            ray.add_intersection();

            // Faces with a defined interaction at this location. More than
            // one means the hit sits exactly on a shared corner.
            let applying = self.applying_faces(elem, &hit);
            let redirected = if applying.is_empty() {
                false
            } else {
                self.apply_bcs(ray, elem, &applying, tally, warnings);
                if !ray.should_continue() {
                    break;
                }
                true
            };

            if ray.distance() >= ray.max_distance() || ray.intersections() >= self.max_intersections {
                ray.set_should_continue(false);
                break;
            }

            if redirected {
                // Redirected in place; keep tracing the same element.
                ray.set_current_incoming_side(Some(hit.side));
                continue;
            }

            // Interior crossing.
            let Some(next) = self.mesh.neighbor(elem, hit.side) else {
                // Setup validation guarantees every reachable external
                // boundary has a condition.
                debug_assert!(false, "ray died on an uncovered external boundary");
                warnings.rays_lost += 1;
                ray.set_should_continue(false);
                break;
            };

            if point_on_side_corner(
                &self.mesh.side_vertices(elem, hit.side),
                &hit.point,
                self.edge_tolerance,
            ) {
                warnings.division_boundary_hits += 1;
            }

            let incoming = self.mesh.which_side_touches(next, elem);
            ray.set_current_elem(Some(next));
            ray.set_current_incoming_side(Some(incoming));

            let owner = self.mesh.elem_owner(next);
            if owner != self.rank {
                return TraceResult::Transferred(owner);
            }
        }
        TraceResult::Terminated
    }

    /// The (side, boundary, behavior) triples firing at the hit location.
    fn applying_faces(&self, elem: ElemId, hit: &SideHit) -> Vec<(Side, BoundaryId, BcKind)> {
        let mut applying = Vec::new();
        if let Some((bnd_id, kind)) = self.face_bc(elem, hit.side) {
            applying.push((hit.side, bnd_id, kind));
        }

        // A hit exactly on a corner also fires the adjacent faces that share
        // that corner and carry a condition.
        for s in 0..self.mesh.num_sides(elem) {
            let side = s as Side;
            if side == hit.side {
                continue;
            }
            if let Some((bnd_id, kind)) = self.face_bc(elem, side) {
                if point_on_side_corner(
                    &self.mesh.side_vertices(elem, side),
                    &hit.point,
                    self.edge_tolerance,
                ) {
                    applying.push((side, bnd_id, kind));
                }
            }
        }
        applying
    }

    /// The boundary id and behavior of a face, looking through to the
    /// neighbor's matching side for internal sidesets.
    fn face_bc(&self, elem: ElemId, side: Side) -> Option<(BoundaryId, BcKind)> {
        let bnd_id = self.mesh.boundary_id(elem, side).or_else(|| {
            let neighbor = self.mesh.neighbor(elem, side)?;
            self.mesh
                .boundary_id(neighbor, self.mesh.which_side_touches(neighbor, elem))
        })?;
        self.bc_table.get(&bnd_id).map(|kind| (bnd_id, *kind))
    }

    /// Applies every firing condition, dividing scored energy by the
    /// applying count and bypassing the already-redirected guard at corners
    /// so each reflecting face still applies once.
    fn apply_bcs(
        &self,
        ray: &mut Ray,
        elem: ElemId,
        applying: &[(Side, BoundaryId, BcKind)],
        tally: &mut Tally,
        warnings: &mut TraceWarnings,
    ) {
        let num_applying = applying.len();
        let mut redirected = false;

        for (side, bnd_id, kind) in applying {
            match kind {
                BcKind::Kill => ray.set_should_continue(false),
                BcKind::ScoreAndKill => {
                    let from = ray.aux_data(self.aux_start_bnd_id) as BoundaryId;
                    let weight = ray.aux_data(self.aux_start_weight) / num_applying as Float;
                    assert_valid_weight(weight);
                    *tally.entry((from, *bnd_id)).or_insert(0.0) += weight;
                    ray.set_should_continue(false);
                }
                BcKind::Reflect => {
                    if redirected && num_applying == 1 {
                        continue;
                    }
                    if !self.mesh.side_is_planar(elem, *side) {
                        warnings.non_planar_reflections += 1;
                    }
                    let normal = self.mesh.side_normal(elem, *side);
                    ray.set_direction(reflected_direction(ray.direction(), &normal));
                    ray.add_trajectory_change();
                    redirected = true;
                }
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
