//! Rays
//!
//! A `Ray` is the mutable unit of work: a directed line segment with typed
//! numeric payloads, tracked across element boundaries until it terminates.
//! Its lifecycle is spawn -> trace -> terminate or transfer; a transferred
//! ray is packed, sent to the worker owning its current element and dropped
//! locally, so a single logical owner exists at all times. There is no
//! explicit state enum; membership in a work buffer plus `should_continue`
//! express the state, and a transfer re-enters tracing on the receiver.

use crate::common::{Float, INFINITY};
use crate::geometry::{Point3f, Vector3f};
use crate::mesh::{ElemId, Side};
use crate::packing::{PackBuffer, Packable, PackReader};

/// Globally unique ray identifier.
pub type RayId = u64;

/// Registry mapping names to slots in the rays' fixed-size payloads. The
/// study registers its slots once at setup; every ray it spawns carries that
/// many values.
#[derive(Default)]
pub struct RayDataRegistry {
    /// Registered slot names, in slot order.
    names: Vec<String>,
}

impl RayDataRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a named slot and returns its index.
    ///
    /// * `name` - The slot name; must be unique.
    pub fn register(&mut self, name: &str) -> usize {
        assert!(
            !self.names.iter().any(|n| n == name),
            "ray data slot '{name}' registered twice"
        );
        self.names.push(name.to_string());
        self.names.len() - 1
    }

    /// Number of registered slots.
    pub fn size(&self) -> usize {
        self.names.len()
    }
}

/// A traced directed line segment.
#[derive(Clone, Debug, PartialEq)]
pub struct Ray {
    /// Globally unique id.
    id: RayId,

    /// Current position along the trace.
    current_point: Point3f,

    /// Unit direction of travel.
    direction: Vector3f,

    /// Element the ray is currently in, if resolved on this worker.
    current_elem: Option<ElemId>,

    /// Side of `current_elem` the ray entered through, if any.
    current_incoming_side: Option<Side>,

    /// Total distance traveled so far.
    distance: Float,

    /// Maximum distance the ray may travel.
    max_distance: Float,

    /// Whether the trace should keep advancing this ray.
    should_continue: bool,

    /// Whether this ray may spawn other rays. Rays created mid-trace by a
    /// boundary handler must not, to prevent unbounded branching.
    spawnable: bool,

    /// Number of times a handler rewrote the trajectory.
    trajectory_changes: u32,

    /// Number of element intersections so far.
    intersections: u32,

    /// Number of worker-to-worker transfers so far.
    processor_crossings: u32,

    /// Fixed-size numeric payload, sized by the study's data registry.
    data: Vec<Float>,

    /// Fixed-size auxiliary payload, sized by the study's aux registry.
    aux_data: Vec<Float>,
}

impl Ray {
    /// Creates a ray in the spawned state.
    ///
    /// * `id`     - Globally unique id.
    /// * `n_data` - Number of data slots.
    /// * `n_aux`  - Number of auxiliary data slots.
    pub fn new(id: RayId, n_data: usize, n_aux: usize) -> Self {
        Self {
            id,
            current_point: Point3f::ORIGIN,
            direction: Vector3f::ZERO,
            current_elem: None,
            current_incoming_side: None,
            distance: 0.0,
            max_distance: INFINITY,
            should_continue: true,
            spawnable: true,
            trajectory_changes: 0,
            intersections: 0,
            processor_crossings: 0,
            data: vec![0.0; n_data],
            aux_data: vec![0.0; n_aux],
        }
    }

    /// Sets the starting point, element and incoming side.
    ///
    /// * `point` - Starting point.
    /// * `elem`  - Starting element, if known.
    /// * `side`  - Incoming side of the starting element, if any.
    pub fn set_start(&mut self, point: Point3f, elem: Option<ElemId>, side: Option<Side>) {
        self.current_point = point;
        self.current_elem = elem;
        self.current_incoming_side = side;
    }

    /// Sets the starting direction; normalized internally.
    ///
    /// * `direction` - Direction of travel; must be nonzero.
    pub fn set_starting_direction(&mut self, direction: Vector3f) {
        debug_assert!(!direction.has_nans() && direction.length_squared() > 0.0);
        self.direction = direction.normalize();
    }

    /// Sets the direction from the current point towards `end_point` and
    /// the maximum distance to the separation, so the trace stops there.
    ///
    /// * `end_point` - The end point.
    pub fn set_starting_end_point(&mut self, end_point: Point3f) {
        let to_end = end_point - self.current_point;
        debug_assert!(to_end.length_squared() > 0.0);
        self.max_distance = to_end.length();
        self.direction = to_end / self.max_distance;
    }

    /// Sets the maximum distance this ray may travel.
    ///
    /// * `max_distance` - The distance budget; must be non-negative.
    pub fn set_starting_max_distance(&mut self, max_distance: Float) {
        debug_assert!(max_distance >= 0.0);
        self.max_distance = max_distance;
    }

    /// The ray's id.
    pub fn id(&self) -> RayId {
        self.id
    }

    /// Current position.
    pub fn current_point(&self) -> &Point3f {
        &self.current_point
    }

    /// Advances the current position.
    pub fn set_current_point(&mut self, point: Point3f) {
        self.current_point = point;
    }

    /// Unit direction of travel.
    pub fn direction(&self) -> &Vector3f {
        &self.direction
    }

    /// Rewrites the direction without terminating; counted as a trajectory
    /// change by the caller.
    pub fn set_direction(&mut self, direction: Vector3f) {
        debug_assert!(!direction.has_nans());
        self.direction = direction;
    }

    /// Element the ray is currently in, if resolved on this worker.
    pub fn current_elem(&self) -> Option<ElemId> {
        self.current_elem
    }

    /// Moves the ray into another element.
    pub fn set_current_elem(&mut self, elem: Option<ElemId>) {
        self.current_elem = elem;
    }

    /// Side of the current element the ray entered through.
    pub fn current_incoming_side(&self) -> Option<Side> {
        self.current_incoming_side
    }

    /// Sets the incoming side of the current element.
    pub fn set_current_incoming_side(&mut self, side: Option<Side>) {
        self.current_incoming_side = side;
    }

    /// Total distance traveled.
    pub fn distance(&self) -> Float {
        self.distance
    }

    /// Adds traveled distance.
    pub fn add_distance(&mut self, add: Float) {
        debug_assert!(add >= 0.0);
        self.distance += add;
    }

    /// Maximum distance this ray may travel.
    pub fn max_distance(&self) -> Float {
        self.max_distance
    }

    /// Whether the trace should keep advancing this ray.
    pub fn should_continue(&self) -> bool {
        self.should_continue
    }

    /// Terminates or resumes the ray; handlers use this to kill it.
    pub fn set_should_continue(&mut self, should_continue: bool) {
        self.should_continue = should_continue;
    }

    /// Whether this ray may spawn other rays.
    pub fn spawnable(&self) -> bool {
        self.spawnable
    }

    /// Marks the ray as created mid-trace, unable to spawn further rays.
    pub fn mark_non_spawnable(&mut self) {
        self.spawnable = false;
    }

    /// Number of trajectory rewrites so far.
    pub fn trajectory_changes(&self) -> u32 {
        self.trajectory_changes
    }

    /// Records a trajectory rewrite.
    pub fn add_trajectory_change(&mut self) {
        self.trajectory_changes += 1;
    }

    /// Number of element intersections so far.
    pub fn intersections(&self) -> u32 {
        self.intersections
    }

    /// Records an element intersection.
    pub fn add_intersection(&mut self) {
        self.intersections += 1;
    }

    /// Number of worker-to-worker transfers so far.
    pub fn processor_crossings(&self) -> u32 {
        self.processor_crossings
    }

    /// Records a worker-to-worker transfer.
    pub fn add_processor_crossing(&mut self) {
        self.processor_crossings += 1;
    }

    /// A data slot value.
    pub fn data(&self, index: usize) -> Float {
        self.data[index]
    }

    /// Writes a data slot.
    pub fn set_data(&mut self, index: usize, value: Float) {
        self.data[index] = value;
    }

    /// An auxiliary data slot value.
    pub fn aux_data(&self, index: usize) -> Float {
        self.aux_data[index]
    }

    /// Writes an auxiliary data slot.
    pub fn set_aux_data(&mut self, index: usize, value: Float) {
        self.aux_data[index] = value;
    }
}

impl Packable for Ray {
    fn pack(&self, buf: &mut PackBuffer) {
        buf.pack_count(self.data.len());
        buf.pack_count(self.aux_data.len());
        buf.pack_small(self.id, 64);
        // Side, flags and trajectory counter coalesce into one unit.
        buf.pack_small(self.current_incoming_side.map_or(Side::MAX, |s| s) as u64, 16);
        buf.pack_small(u64::from(self.should_continue), 1);
        buf.pack_small(u64::from(self.spawnable), 1);
        buf.pack_small(self.trajectory_changes as u64, 32);
        buf.pack_small(self.intersections as u64, 32);
        buf.pack_small(self.processor_crossings as u64, 32);
        buf.pack_id(self.current_elem.map(|e| e.0));
        for i in 0..3 {
            buf.pack_float(self.current_point[i]);
        }
        for i in 0..3 {
            buf.pack_float(self.direction[i]);
        }
        buf.pack_float(self.distance);
        buf.pack_float(self.max_distance);
        for v in &self.data {
            buf.pack_float(*v);
        }
        for v in &self.aux_data {
            buf.pack_float(*v);
        }
    }

    fn unpack(reader: &mut PackReader) -> Self {
        let n_data = reader.read_count();
        let n_aux = reader.read_count();
        let id = reader.read_small(64);
        let side = reader.read_small(16) as Side;
        let should_continue = reader.read_small(1) != 0;
        let spawnable = reader.read_small(1) != 0;
        let trajectory_changes = reader.read_small(32) as u32;
        let intersections = reader.read_small(32) as u32;
        let processor_crossings = reader.read_small(32) as u32;
        let current_elem = reader.read_id().map(ElemId);
        let current_point = Point3f::new(
            reader.read_float(),
            reader.read_float(),
            reader.read_float(),
        );
        let direction = Vector3f::new(
            reader.read_float(),
            reader.read_float(),
            reader.read_float(),
        );
        let distance = reader.read_float();
        let max_distance = reader.read_float();
        let data = (0..n_data).map(|_| reader.read_float()).collect();
        let aux_data = (0..n_aux).map(|_| reader.read_float()).collect();

        Self {
            id,
            current_point,
            direction,
            current_elem,
            current_incoming_side: (side != Side::MAX).then_some(side),
            distance,
            max_distance,
            should_continue,
            spawnable,
            trajectory_changes,
            intersections,
            processor_crossings,
            data,
            aux_data,
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packing::{pack_vec, unpack_vec};
    use approx::assert_relative_eq;

    #[test]
    fn registry_assigns_slots_in_order() {
        let mut registry = RayDataRegistry::new();
        assert_eq!(registry.register("start_bnd_id"), 0);
        assert_eq!(registry.register("start_total_weight"), 1);
        assert_eq!(registry.size(), 2);
    }

    #[test]
    #[should_panic]
    fn registry_rejects_duplicate_names() {
        let mut registry = RayDataRegistry::new();
        registry.register("start_bnd_id");
        registry.register("start_bnd_id");
    }

    #[test]
    fn starting_end_point_sets_direction_and_budget() {
        let mut ray = Ray::new(7, 0, 0);
        ray.set_start(Point3f::new(1.0, 0.0, 0.0), None, None);
        ray.set_starting_end_point(Point3f::new(1.0, 2.0, 0.0));
        assert_eq!(*ray.direction(), Vector3f::new(0.0, 1.0, 0.0));
        assert_relative_eq!(ray.max_distance(), 2.0);
    }

    #[test]
    fn pack_round_trip_preserves_every_field() {
        let mut ray = Ray::new(123, 1, 2);
        ray.set_start(Point3f::new(0.25, 0.5, 0.0), Some(ElemId(9)), Some(3));
        ray.set_starting_direction(Vector3f::new(-1.0, 2.0, 0.5));
        ray.set_starting_max_distance(42.0);
        ray.add_distance(1.5);
        ray.add_trajectory_change();
        ray.add_intersection();
        ray.add_processor_crossing();
        ray.mark_non_spawnable();
        ray.set_data(0, -3.5);
        ray.set_aux_data(0, 2.0);
        ray.set_aux_data(1, 0.125);

        let words = pack_vec(std::slice::from_ref(&ray));
        let unpacked: Vec<Ray> = unpack_vec(&words);
        assert_eq!(unpacked.len(), 1);
        assert_eq!(unpacked[0], ray);
    }

    #[test]
    fn pack_round_trip_with_unresolved_elem() {
        let mut ray = Ray::new(1, 0, 0);
        ray.set_start(Point3f::new(0.0, 0.0, 0.0), None, None);
        ray.set_starting_direction(Vector3f::new(1.0, 0.0, 0.0));

        let words = pack_vec(std::slice::from_ref(&ray));
        let unpacked: Vec<Ray> = unpack_vec(&words);
        assert_eq!(unpacked[0].current_elem(), None);
        assert_eq!(unpacked[0], ray);
    }
}
