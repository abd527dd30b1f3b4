//! View factor ray study
//!
//! The orchestrator: validates the configuration once, scans owned boundary
//! faces into start element records (handing off records whose true starting
//! element lives on another worker), spawns one ray per face quadrature point
//! and angular direction, drives the trace in rounds interleaved with ray
//! exchanges until no worker has work left, then reduces the tallies into a
//! [`ViewFactorMatrix`].

use crate::bcs::{bc_table, validate_bcs, BcKind, RayBoundaryCondition};
use crate::matrix::ViewFactorMatrix;
use crate::start_elem::StartElem;
use crate::trace::{Tally, TraceRay, TraceResult, TraceWarnings};
use vf_core::comm::Communicator;
use vf_core::common::{Float, PI, PI_OVER_TWO, TRACE_TOLERANCE};
use vf_core::error::{Result, ViewFactorError};
use vf_core::geometry::{Dot, Vector3f};
use vf_core::mesh::{BoundaryId, Mesh};
use vf_core::packing::{pack_vec, unpack_vec};
use vf_core::quadrature::{gauss_legendre, AngularQuadrature};
use vf_core::ray::{Ray, RayDataRegistry};
use itertools::iproduct;
use std::collections::{BTreeSet, HashMap};
use std::thread;

/// Direction convention for rays spawned from internal boundaries, named for
/// the sign of the dot product between a spawned ray and the outward normal
/// of the boundary side.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum InternalConvention {
    /// Rays leave through the face; the physical trace starts on the
    /// neighboring element, which may live on another worker.
    #[default]
    Positive,

    /// Rays stay on the face's own element.
    Negative,
}

/// Study parameters.
#[derive(Clone, Debug)]
pub struct StudyConfig {
    /// Boundaries to compute view factors between.
    pub boundaries: Vec<BoundaryId>,

    /// Gauss-Legendre order for the polar angle; must be even.
    pub polar_quad_order: usize,

    /// Azimuthal order per quadrant; 3-D only.
    pub azimuthal_quad_order: usize,

    /// Number of quadrature points per boundary face.
    pub face_order: usize,

    /// Direction convention on internal boundaries.
    pub internal_convention: InternalConvention,

    /// Whether to repair reciprocity and row sums after assembly.
    pub normalize: bool,

    /// Largest accepted row sum defect before normalization.
    pub row_sum_tolerance: Float,

    /// Fuzzy tolerance for corner detection and minimum travel per step.
    pub edge_tolerance: Float,

    /// Trace threads per worker.
    pub num_threads: usize,

    /// Step budget per ray.
    pub max_intersections: u32,
}

impl Default for StudyConfig {
    fn default() -> Self {
        Self {
            boundaries: Vec::new(),
            polar_quad_order: 16,
            azimuthal_quad_order: 8,
            face_order: 1,
            internal_convention: InternalConvention::default(),
            normalize: true,
            row_sum_tolerance: 0.1,
            edge_tolerance: TRACE_TOLERANCE,
            num_threads: 1,
            max_intersections: 10_000,
        }
    }
}

/// Counters accumulated by one execution, local to this worker.
#[derive(Clone, Copy, Debug, Default)]
pub struct StudyStats {
    /// Rays spawned on this worker.
    pub rays_started: u64,

    /// Rays skipped because they would exit through their non-planar
    /// starting side.
    pub rays_skipped: u64,

    /// Rays that terminated on this worker.
    pub rays_finished: u64,

    /// Rays this worker handed off.
    pub processor_crossings: u64,

    /// Geometric edge cases hit while tracing.
    pub warnings: TraceWarnings,
}

/// A Monte Carlo view factor computation over one mesh partition per worker.
pub struct ViewFactorRayStudy<'a, M: Mesh> {
    /// The local partition.
    mesh: &'a M,

    /// This worker's communicator endpoint.
    comm: Communicator,

    /// The validated configuration.
    config: StudyConfig,

    /// Behavior per boundary id, derived from the validated conditions.
    bc_table: HashMap<BoundaryId, BcKind>,

    /// The scored boundary set.
    scored: BTreeSet<BoundaryId>,

    /// Aux slot carrying the starting boundary id.
    aux_start_bnd_id: usize,

    /// Aux slot carrying the starting weight.
    aux_start_weight: usize,

    /// Number of registered aux slots.
    aux_size: usize,

    /// Hemispherical quadrature, 3-D only; rotated per start element.
    aq_3d: Option<AngularQuadrature>,

    /// In-plane angles between ray and normal, 2-D only.
    aq_2d_angles: Vec<Float>,

    /// Weights paired with `aq_2d_angles`.
    aq_2d_weights: Vec<Float>,

    /// Directions per start point.
    num_dir: usize,

    /// Seed records owned by this worker, after the handoff exchange.
    start_elems: Vec<StartElem>,

    /// Next local ray id; combined with the rank for global uniqueness.
    next_ray_id: u64,

    /// Counters from the last execution.
    stats: StudyStats,

    /// The finalized matrix, present after `execute`.
    matrix: Option<ViewFactorMatrix>,
}

impl<'a, M: Mesh> ViewFactorRayStudy<'a, M> {
    /// Creates a study, validating the whole configuration up front.
    ///
    /// * `mesh`   - The local partition.
    /// * `comm`   - This worker's communicator endpoint.
    /// * `config` - Study parameters.
    /// * `bcs`    - Boundary conditions; must contain exactly one
    ///              score-and-kill condition covering `config.boundaries`.
    pub fn new(
        mesh: &'a M,
        comm: Communicator,
        config: StudyConfig,
        bcs: Vec<RayBoundaryCondition>,
    ) -> Result<Self> {
        let dim = mesh.dimension();
        if dim != 2 && dim != 3 {
            return Err(ViewFactorError::Config(format!(
                "mesh dimension {dim} is not supported, must be 2 or 3"
            )));
        }
        if config.boundaries.is_empty() {
            return Err(ViewFactorError::Config(
                "at least one boundary is required".into(),
            ));
        }
        if config.polar_quad_order == 0 || config.polar_quad_order % 2 != 0 {
            return Err(ViewFactorError::InvalidParameter {
                name: "polar_quad_order",
                reason: "must be positive and even".into(),
            });
        }
        if config.face_order == 0 {
            return Err(ViewFactorError::InvalidParameter {
                name: "face_order",
                reason: "must be positive".into(),
            });
        }

        let scored: BTreeSet<BoundaryId> = config.boundaries.iter().copied().collect();
        if scored.len() != config.boundaries.len() {
            return Err(ViewFactorError::Config(
                "the boundary list contains duplicates".into(),
            ));
        }

        let internal = mesh.internal_boundary_ids();
        let mut external = BTreeSet::new();
        for face in mesh.boundary_faces() {
            if mesh.neighbor(face.elem, face.side).is_none() {
                external.insert(face.bnd_id);
            }
        }
        for bnd_id in &scored {
            if !internal.contains(bnd_id) && !external.contains(bnd_id) {
                return Err(ViewFactorError::NotFound(format!("boundary {bnd_id}")));
            }
        }
        validate_bcs(&bcs, &scored, &internal, &external)?;

        let mut aux_registry = RayDataRegistry::new();
        let aux_start_bnd_id = aux_registry.register("start_bnd_id");
        let aux_start_weight = aux_registry.register("start_total_weight");

        // In 2-D we integrate over the angle theta between ray and normal
        // instead of mu = cos(theta), with the cosine folded into the
        // angular weight at spawn time.
        let (aq_3d, aq_2d_angles, aq_2d_weights, num_dir) = if dim == 3 {
            if config.azimuthal_quad_order == 0 {
                return Err(ViewFactorError::InvalidParameter {
                    name: "azimuthal_quad_order",
                    reason: "must be positive".into(),
                });
            }
            let aq = AngularQuadrature::new(
                3,
                config.polar_quad_order,
                4 * config.azimuthal_quad_order,
                0.0,
                1.0,
            )?;
            let num_dir = aq.num_directions();
            (Some(aq), Vec::new(), Vec::new(), num_dir)
        } else {
            let (x, w) = gauss_legendre(2 * config.polar_quad_order)?;
            let angles: Vec<Float> = x.iter().map(|x| (2.0 * x - 1.0) * PI_OVER_TWO).collect();
            let weights: Vec<Float> = w.iter().map(|w| w * PI).collect();
            let num_dir = angles.len();
            (None, angles, weights, num_dir)
        };

        Ok(Self {
            mesh,
            comm,
            bc_table: bc_table(&bcs),
            config,
            scored,
            aux_start_bnd_id,
            aux_start_weight,
            aux_size: aux_registry.size(),
            aq_3d,
            aq_2d_angles,
            aq_2d_weights,
            num_dir,
            start_elems: Vec::new(),
            next_ray_id: 0,
            stats: StudyStats::default(),
            matrix: None,
        })
    }

    /// Runs the whole pipeline. A synchronization point: every worker must
    /// call it.
    pub fn execute(&mut self) -> Result<()> {
        self.generate_start_elems();
        let rays = self.generate_rays()?;
        let (tally, warnings) = self.trace_rays(rays);
        self.stats.warnings = warnings;

        let non_planar = self.comm.sum_count(warnings.non_planar_reflections);
        let ambiguous = self.comm.sum_count(warnings.division_boundary_hits);
        let lost = self.comm.sum_count(warnings.rays_lost);
        if self.comm.rank() == 0 {
            if non_planar > 0 {
                warn!(
                    "{non_planar} reflections off non-planar sides; the reflected \
                     directions use the normal at a single point"
                );
            }
            if ambiguous > 0 {
                warn!("{ambiguous} rays crossed exactly on element corners");
            }
            if lost > 0 {
                warn!("{lost} rays could not be advanced and were dropped");
            }
        }

        let finished = self.comm.sum_count(self.stats.rays_finished);
        let crossings = self.comm.sum_count(self.stats.processor_crossings);
        info!("traced {finished} rays with {crossings} worker crossings");

        self.finalize(&tally)
    }

    /// The view factor from one boundary to another; requires `execute`.
    pub fn view_factor(&self, from: BoundaryId, to: BoundaryId) -> Result<Float> {
        self.matrix().and_then(|matrix| matrix.get(from, to))
    }

    /// The finalized matrix; requires `execute`.
    pub fn matrix(&self) -> Result<&ViewFactorMatrix> {
        self.matrix.as_ref().ok_or_else(|| {
            ViewFactorError::Config("the study has not been executed".into())
        })
    }

    /// Consumes the study, returning the finalized matrix; requires
    /// `execute`.
    pub fn into_matrix(self) -> Result<ViewFactorMatrix> {
        self.matrix.ok_or_else(|| {
            ViewFactorError::Config("the study has not been executed".into())
        })
    }

    /// Counters from the last execution, local to this worker.
    pub fn stats(&self) -> &StudyStats {
        &self.stats
    }

    /// Scans owned boundary faces into start element records. Under the
    /// positive convention the trace on an internal face starts from the
    /// neighboring element; records whose true starting element belongs to
    /// another worker are packed and shipped there.
    fn generate_start_elems(&mut self) {
        let rank = self.comm.rank();
        let positive = self.config.internal_convention == InternalConvention::Positive;

        self.start_elems.clear();
        let mut send: Vec<Vec<StartElem>> = vec![Vec::new(); self.comm.size()];
        for face in self.mesh.boundary_faces() {
            if self.mesh.elem_owner(face.elem) != rank || !self.scored.contains(&face.bnd_id) {
                continue;
            }
            let (points, weights) =
                self.mesh.face_quadrature(face.elem, face.side, self.config.face_order);

            // The trace needs an incoming side whose normal opposes the ray
            // directions, so the positive convention starts from the other
            // element of the face.
            let mut start_elem = face.elem;
            let mut start_side = face.side;
            if let Some(neighbor) = self.mesh.neighbor(face.elem, face.side) {
                if positive {
                    start_side = self.mesh.which_side_touches(neighbor, face.elem);
                    start_elem = neighbor;
                }
            }

            let record =
                StartElem::new(face.elem, start_elem, start_side, face.bnd_id, points, weights);
            let dest = self.mesh.elem_owner(start_elem);
            if dest == rank {
                self.start_elems.push(record);
            } else {
                send[dest].push(record);
            }
        }

        // Exchange the handed-off records; every worker enters even with
        // nothing to send.
        let outgoing = send.iter().map(|records| pack_vec(records)).collect();
        let incoming = self.comm.all_to_all(outgoing);
        for (src, words) in incoming.iter().enumerate() {
            if src != rank && !words.is_empty() {
                self.start_elems.extend(unpack_vec::<StartElem>(words));
            }
        }
    }

    /// Spawns one ray per start point and angular direction.
    fn generate_rays(&mut self) -> Result<Vec<Ray>> {
        let num_local_points: usize = self.start_elems.iter().map(|se| se.points.len()).sum();
        let num_local_rays = num_local_points * self.num_dir;

        let total_points = self.comm.sum_count(num_local_points as u64);
        let total_rays = self.comm.sum_count(num_local_rays as u64);
        info!(
            "generated {total_points} start points with {} directions per point, \
             {total_rays} rays total",
            self.num_dir
        );

        let rank = self.comm.rank();
        let positive = self.config.internal_convention == InternalConvention::Positive;
        let mut next_id = self.next_ray_id;
        let mut skipped = 0u64;
        let mut rays = Vec::with_capacity(num_local_rays);

        for se in &self.start_elems {
            // We want the inward normal of the original element; the side
            // normal belongs to the (possibly swapped) starting element, so
            // undo the swap, and flip on external faces where the outward
            // normal points out of the domain.
            let mut inward_normal = self.mesh.side_normal(se.start_elem, se.incoming_side);
            if se.start_elem != se.elem {
                inward_normal = -inward_normal;
            }
            let external = self.mesh.neighbor(se.start_elem, se.incoming_side).is_none();
            if positive && external {
                inward_normal = -inward_normal;
            }

            if let Some(aq) = self.aq_3d.as_mut() {
                aq.rotate(&inward_normal)?;
            }
            let non_planar_start = self.aq_3d.is_some()
                && external
                && !self.mesh.side_is_planar(se.start_elem, se.incoming_side);

            for (start_i, l) in iproduct!(0..se.points.len(), 0..self.num_dir) {
                let (direction, awf) = if let Some(aq) = self.aq_3d.as_ref() {
                    let direction = aq.get_direction(l)?;
                    (direction, inward_normal.dot(&direction) * aq.get_total_weight(l)?)
                } else {
                    let (sin_theta, cos_theta) = self.aq_2d_angles[l].sin_cos();
                    let direction = Vector3f::new(
                        cos_theta * inward_normal.x - sin_theta * inward_normal.y,
                        sin_theta * inward_normal.x + cos_theta * inward_normal.y,
                        0.0,
                    );
                    (direction, cos_theta * self.aq_2d_weights[l])
                };

                // A ray grazing out of a curved starting side has no element
                // to track it on.
                if non_planar_start && inward_normal.dot(&direction) <= 0.0 {
                    skipped += 1;
                    continue;
                }

                let id = ((rank as u64) << 48) | next_id;
                next_id += 1;
                let mut ray = Ray::new(id, 0, self.aux_size);
                ray.set_start(se.points[start_i], Some(se.start_elem), Some(se.incoming_side));
                ray.set_starting_direction(direction);
                ray.set_aux_data(self.aux_start_bnd_id, se.bnd_id as Float);
                ray.set_aux_data(self.aux_start_weight, se.weights[start_i] * awf);
                rays.push(ray);
            }
        }

        self.next_ray_id = next_id;
        self.stats.rays_started = rays.len() as u64;
        self.stats.rays_skipped = skipped;
        let total_skipped = self.comm.sum_count(skipped);
        if total_skipped > 0 && self.comm.rank() == 0 {
            info!(
                "skipped {total_skipped} rays exiting the domain through their \
                 non-planar starting side"
            );
        }
        Ok(rays)
    }

    /// Traces rays in rounds; each round drains the local buffer across the
    /// trace threads, exchanges transferred rays, and stops when no worker
    /// handed any off.
    fn trace_rays(&mut self, rays: Vec<Ray>) -> (Tally, TraceWarnings) {
        let mesh = self.mesh;
        let rank = self.comm.rank();
        let size = self.comm.size();
        let bc_table = &self.bc_table;
        let aux_start_bnd_id = self.aux_start_bnd_id;
        let aux_start_weight = self.aux_start_weight;
        let edge_tolerance = self.config.edge_tolerance;
        let max_intersections = self.config.max_intersections;
        let num_threads = self.config.num_threads.max(1);

        let mut tally = Tally::new();
        let mut warnings = TraceWarnings::default();
        let mut active = rays;

        loop {
            let batch_size = (active.len() / num_threads + 1).max(1);
            let mut batches: Vec<Vec<Ray>> = Vec::with_capacity(num_threads);
            while !active.is_empty() {
                let tail = active.split_off(active.len().saturating_sub(batch_size));
                batches.push(tail);
            }

            let results: Vec<(Tally, TraceWarnings, Vec<(usize, Ray)>, u64)> =
                thread::scope(|scope| {
                    let handles: Vec<_> = batches
                        .into_iter()
                        .map(|batch| {
                            scope.spawn(move || {
                                let tracer = TraceRay::new(
                                    mesh,
                                    rank,
                                    bc_table,
                                    aux_start_bnd_id,
                                    aux_start_weight,
                                    edge_tolerance,
                                    max_intersections,
                                );
                                let mut tally = Tally::new();
                                let mut warnings = TraceWarnings::default();
                                let mut transfers = Vec::new();
                                let mut finished = 0u64;
                                for mut ray in batch {
                                    match tracer.trace(&mut ray, &mut tally, &mut warnings) {
                                        TraceResult::Terminated => finished += 1,
                                        TraceResult::Transferred(dest) => {
                                            ray.add_processor_crossing();
                                            transfers.push((dest, ray));
                                        }
                                    }
                                }
                                (tally, warnings, transfers, finished)
                            })
                        })
                        .collect();
                    handles
                        .into_iter()
                        .map(|handle| handle.join().expect("trace thread panicked"))
                        .collect()
                });

            // Merge per-thread results in thread order so the floating point
            // sums are reproducible.
            let mut outgoing_rays: Vec<Vec<Ray>> = vec![Vec::new(); size];
            let mut sent = 0u64;
            for (thread_tally, thread_warnings, transfers, finished) in results {
                for (key, energy) in thread_tally {
                    *tally.entry(key).or_insert(0.0) += energy;
                }
                warnings.merge(&thread_warnings);
                self.stats.rays_finished += finished;
                for (dest, ray) in transfers {
                    outgoing_rays[dest].push(ray);
                    sent += 1;
                }
            }
            self.stats.processor_crossings += sent;

            // Exchange and adopt handed-off rays. Workers with nothing to
            // send still participate: the round only ends when no worker
            // transferred anything.
            let outgoing = outgoing_rays.iter().map(|rays| pack_vec(rays)).collect();
            let incoming = self.comm.all_to_all(outgoing);
            active = Vec::new();
            for (src, words) in incoming.iter().enumerate() {
                if src != rank && !words.is_empty() {
                    active.extend(unpack_vec::<Ray>(words));
                }
            }

            if self.comm.sum_count(sent) == 0 {
                break;
            }
        }
        (tally, warnings)
    }

    /// Reduces boundary measures and tallies across workers and assembles
    /// the matrix.
    fn finalize(&mut self, tally: &Tally) -> Result<()> {
        let rank = self.comm.rank();
        let boundaries = self.config.boundaries.clone();
        let faces = self.mesh.boundary_faces();

        let local_areas: Vec<Float> = boundaries
            .iter()
            .map(|bnd_id| {
                faces
                    .iter()
                    .filter(|f| f.bnd_id == *bnd_id && self.mesh.elem_owner(f.elem) == rank)
                    .map(|f| self.mesh.side_area(f.elem, f.side))
                    .sum()
            })
            .collect();
        let areas = self.comm.sum_floats(&local_areas);

        // Reduce over the fixed boundary pair grid, in rank order per pair.
        let pairs: Vec<(BoundaryId, BoundaryId)> =
            iproduct!(boundaries.iter(), boundaries.iter())
                .map(|(from, to)| (*from, *to))
                .collect();
        let local: Vec<Float> = pairs
            .iter()
            .map(|pair| tally.get(pair).copied().unwrap_or(0.0))
            .collect();
        let reduced = self.comm.sum_floats(&local);
        let global_tally: Tally = pairs.into_iter().zip(reduced).collect();

        let mut matrix = ViewFactorMatrix::from_tally(
            boundaries,
            areas,
            &global_tally,
            self.mesh.dimension(),
            self.config.row_sum_tolerance,
        )?;
        if self.config.normalize {
            matrix.normalize()?;
        }
        self.matrix = Some(matrix);
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use vf_core::mesh::PolyMesh2d;

    fn score_all() -> Vec<RayBoundaryCondition> {
        vec![RayBoundaryCondition::new(BcKind::ScoreAndKill, [1, 2, 3, 4])]
    }

    fn cavity_config() -> StudyConfig {
        StudyConfig {
            boundaries: vec![1, 2, 3, 4],
            polar_quad_order: 64,
            face_order: 8,
            ..StudyConfig::default()
        }
    }

    #[test]
    fn square_cavity_matches_the_closed_form() {
        let mesh = PolyMesh2d::unit_square_cavity([1, 2, 3, 4]);
        let comm = Communicator::create(1).remove(0);
        let mut study =
            ViewFactorRayStudy::new(&mesh, comm, cavity_config(), score_all()).unwrap();
        study.execute().unwrap();

        let matrix = study.matrix().unwrap();
        assert!(matrix.max_row_sum_deviation() < 1e-10);
        assert!(matrix.max_reciprocity_deviation() < 1e-10);

        // Opposite unit sides see sqrt(2) - 1 of each other, adjacent sides
        // (2 - sqrt(2)) / 2; quadrature noise stays well under the gap.
        let opposite = Float::sqrt(2.0) - 1.0;
        let adjacent = (2.0 - Float::sqrt(2.0)) / 2.0;

        // The raw self view factors are exactly zero on a convex enclosure;
        // the least-squares correction perturbs every entry, so after
        // normalization the diagonal is zero only to solver precision.
        for bnd_id in 1..=4 {
            assert!(study.view_factor(bnd_id, bnd_id).unwrap().abs() < 1e-12);
        }
        assert!((study.view_factor(1, 3).unwrap() - opposite).abs() < 0.02);
        assert!((study.view_factor(1, 2).unwrap() - adjacent).abs() < 0.02);

        // The angle set is symmetric, so the two adjacent sides tie exactly.
        let left = study.view_factor(1, 4).unwrap();
        let right = study.view_factor(1, 2).unwrap();
        assert!((left - right).abs() < 1e-12);
    }

    #[test]
    fn raw_self_view_factors_are_exactly_zero_on_a_convex_cavity() {
        let mesh = PolyMesh2d::unit_square_cavity([1, 2, 3, 4]);
        let comm = Communicator::create(1).remove(0);
        let config = StudyConfig {
            normalize: false,
            ..cavity_config()
        };
        let mut study = ViewFactorRayStudy::new(&mesh, comm, config, score_all()).unwrap();
        study.execute().unwrap();

        // No ray leaving a side of a convex enclosure can hit that side
        // again, so without the normalization correction the diagonal never
        // receives a tally at all.
        for bnd_id in 1..=4 {
            assert_eq!(study.view_factor(bnd_id, bnd_id).unwrap(), 0.0);
        }
    }

    #[test]
    fn multiple_trace_threads_agree_with_one() {
        let mesh = PolyMesh2d::unit_square_cavity([1, 2, 3, 4]);

        let comm = Communicator::create(1).remove(0);
        let mut single =
            ViewFactorRayStudy::new(&mesh, comm, cavity_config(), score_all()).unwrap();
        single.execute().unwrap();

        let threaded_run = || {
            let config = StudyConfig {
                num_threads: 3,
                ..cavity_config()
            };
            let comm = Communicator::create(1).remove(0);
            let mut study = ViewFactorRayStudy::new(&mesh, comm, config, score_all()).unwrap();
            study.execute().unwrap();
            study
        };
        let threaded = threaded_run();
        let repeated = threaded_run();

        for (from, to) in iproduct!(1..=4u32, 1..=4u32) {
            // Splitting the work regroups the sums, so thread counts agree
            // only to roundoff; the same thread count reproduces exactly.
            let single_f = single.view_factor(from, to).unwrap();
            let threaded_f = threaded.view_factor(from, to).unwrap();
            assert!((single_f - threaded_f).abs() < 1e-12);
            assert_eq!(threaded_f, repeated.view_factor(from, to).unwrap());
        }
    }

    #[test]
    fn two_workers_match_a_single_worker() {
        let config = StudyConfig {
            boundaries: vec![1, 2, 3, 4],
            face_order: 2,
            ..StudyConfig::default()
        };

        // Same split mesh, all elements on one worker.
        let serial_mesh = PolyMesh2d::split_square_cavity([1, 2, 3, 4], 9, [0, 0]);
        let comm = Communicator::create(1).remove(0);
        let mut serial =
            ViewFactorRayStudy::new(&serial_mesh, comm, config.clone(), score_all()).unwrap();
        serial.execute().unwrap();
        assert_eq!(serial.stats().processor_crossings, 0);

        // Left half on rank 0, right half on rank 1; rays crossing the
        // internal face are handed off mid-trace.
        let parallel_mesh = PolyMesh2d::split_square_cavity([1, 2, 3, 4], 9, [0, 1]);
        let comms = Communicator::create(2);
        let results: Vec<(Vec<Float>, u64)> = thread::scope(|scope| {
            let handles: Vec<_> = comms
                .into_iter()
                .map(|comm| {
                    let config = config.clone();
                    let mesh = &parallel_mesh;
                    scope.spawn(move || {
                        let mut study =
                            ViewFactorRayStudy::new(mesh, comm, config, score_all()).unwrap();
                        study.execute().unwrap();
                        let factors = iproduct!(1..=4u32, 1..=4u32)
                            .map(|(from, to)| study.view_factor(from, to).unwrap())
                            .collect();
                        (factors, study.stats().processor_crossings)
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        // Both ranks reduce in rank order, so they agree exactly.
        assert_eq!(results[0].0, results[1].0);
        let crossings: u64 = results.iter().map(|(_, c)| c).sum();
        assert!(crossings > 0);

        // Distribution regroups the sums, so serial agrees to roundoff.
        for ((from, to), parallel_f) in iproduct!(1..=4u32, 1..=4u32).zip(&results[0].0) {
            let serial_f = serial.view_factor(from, to).unwrap();
            assert!((serial_f - parallel_f).abs() < 1e-12);
        }
    }

    #[test]
    fn internal_start_elems_are_handed_to_the_neighbor_rank() {
        // Scoring the shared face puts a start element on the internal
        // boundary; under the positive convention its true starting element
        // is the neighbor, which lives on the other rank, so the record must
        // travel through the start-element exchange before any ray spawns.
        let bnds = [1u32, 2, 3, 4, 9];
        let config = StudyConfig {
            boundaries: bnds.to_vec(),
            face_order: 2,
            normalize: false,
            ..StudyConfig::default()
        };
        let bcs = vec![RayBoundaryCondition::new(BcKind::ScoreAndKill, bnds)];

        let serial_mesh = PolyMesh2d::split_square_cavity([1, 2, 3, 4], 9, [0, 0]);
        let comm = Communicator::create(1).remove(0);
        let mut serial =
            ViewFactorRayStudy::new(&serial_mesh, comm, config.clone(), bcs.clone()).unwrap();
        serial.execute().unwrap();

        let parallel_mesh = PolyMesh2d::split_square_cavity([1, 2, 3, 4], 9, [0, 1]);
        let comms = Communicator::create(2);
        let results: Vec<(Vec<Float>, u64)> = thread::scope(|scope| {
            let handles: Vec<_> = comms
                .into_iter()
                .map(|comm| {
                    let config = config.clone();
                    let bcs = bcs.clone();
                    let mesh = &parallel_mesh;
                    scope.spawn(move || {
                        let mut study =
                            ViewFactorRayStudy::new(mesh, comm, config, bcs).unwrap();
                        study.execute().unwrap();
                        let factors = iproduct!(bnds, bnds)
                            .map(|(from, to)| study.view_factor(from, to).unwrap())
                            .collect();
                        (factors, study.stats().rays_started)
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        // The shared face is owned by rank 0 but starts on rank 1: rank 0
        // spawns rays for its three external faces only, rank 1 for its
        // three plus the adopted internal face.
        let per_face = results[0].1 / 3;
        assert_eq!(results[0].1, 3 * per_face);
        assert_eq!(results[1].1, 4 * per_face);

        assert_eq!(results[0].0, results[1].0);
        for ((from, to), parallel_f) in iproduct!(bnds, bnds).zip(&results[0].0) {
            let serial_f = serial.view_factor(from, to).unwrap();
            assert!((serial_f - parallel_f).abs() < 1e-12);
        }
    }

    #[test]
    fn rejects_odd_polar_order() {
        let mesh = PolyMesh2d::unit_square_cavity([1, 2, 3, 4]);
        let comm = Communicator::create(1).remove(0);
        let config = StudyConfig {
            boundaries: vec![1, 2, 3, 4],
            polar_quad_order: 15,
            ..StudyConfig::default()
        };
        assert!(ViewFactorRayStudy::new(&mesh, comm, config, score_all()).is_err());
    }

    #[test]
    fn rejects_unknown_boundaries() {
        let mesh = PolyMesh2d::unit_square_cavity([1, 2, 3, 4]);
        let comm = Communicator::create(1).remove(0);
        let config = StudyConfig {
            boundaries: vec![1, 2, 3, 7],
            ..StudyConfig::default()
        };
        let result = ViewFactorRayStudy::new(&mesh, comm, config, score_all());
        assert!(matches!(result, Err(ViewFactorError::NotFound(_))));
    }

    #[test]
    fn rejects_uncovered_external_boundaries() {
        let mesh = PolyMesh2d::unit_square_cavity([1, 2, 3, 4]);
        let comm = Communicator::create(1).remove(0);
        let config = StudyConfig {
            boundaries: vec![1, 2],
            ..StudyConfig::default()
        };
        let bcs = vec![RayBoundaryCondition::new(BcKind::ScoreAndKill, [1, 2])];
        assert!(ViewFactorRayStudy::new(&mesh, comm, config, bcs).is_err());
    }

    #[test]
    fn querying_before_execute_is_an_error() {
        let mesh = PolyMesh2d::unit_square_cavity([1, 2, 3, 4]);
        let comm = Communicator::create(1).remove(0);
        let study =
            ViewFactorRayStudy::new(&mesh, comm, cavity_config(), score_all()).unwrap();
        assert!(study.view_factor(1, 2).is_err());
    }
}
