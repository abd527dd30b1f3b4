//! Ray boundary conditions
//!
//! Behavior invoked when a ray reaches a face on a boundary of interest. The
//! handler set is closed: a ray is either killed, specularly reflected, or
//! scored into the view factor tally and killed. Keeping the set closed lets
//! the study validate the whole configuration up front instead of failing
//! per ray.

use vf_core::common::Float;
use vf_core::error::{Result, ViewFactorError};
use vf_core::geometry::{Dot, Vector3f};
use vf_core::mesh::BoundaryId;
use std::collections::BTreeSet;

/// The closed set of boundary behaviors.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BcKind {
    /// Terminate the ray unconditionally. No scoring.
    Kill,

    /// Specularly reflect the ray about the face normal and continue.
    Reflect,

    /// Accumulate the ray's starting weight into the view factor tally for
    /// (starting boundary, hit boundary), then terminate.
    ScoreAndKill,
}

/// One boundary condition object with its boundary restriction.
#[derive(Clone, Debug)]
pub struct RayBoundaryCondition {
    /// The behavior.
    pub kind: BcKind,

    /// Boundaries this condition applies to.
    pub boundaries: BTreeSet<BoundaryId>,
}

impl RayBoundaryCondition {
    /// Creates a boundary condition restricted to the given boundaries.
    ///
    /// * `kind`       - The behavior.
    /// * `boundaries` - The boundary restriction.
    pub fn new(kind: BcKind, boundaries: impl IntoIterator<Item = BoundaryId>) -> Self {
        Self {
            kind,
            boundaries: boundaries.into_iter().collect(),
        }
    }

    /// Whether this condition applies on the given boundary.
    pub fn has_boundary(&self, bnd_id: BoundaryId) -> bool {
        self.boundaries.contains(&bnd_id)
    }
}

/// Specular reflection of `direction` about the outward unit `normal`.
///
/// * `direction` - Incoming unit direction.
/// * `normal`    - Outward unit normal of the face.
pub fn reflected_direction(direction: &Vector3f, normal: &Vector3f) -> Vector3f {
    *direction - *normal * (2.0 * direction.dot(normal))
}

/// Validates the boundary condition set for a view factor study.
///
/// Fatal configuration errors, caught once at setup:
/// - anything other than exactly one score-and-kill condition;
/// - a score-and-kill restriction that does not cover the scored set;
/// - a reflecting condition on a scored boundary;
/// - a reflecting condition on an internal boundary;
/// - an external boundary with no condition at all.
///
/// * `bcs`                 - The configured conditions.
/// * `scored_boundaries`   - Boundaries whose view factors are requested.
/// * `internal_boundaries` - Boundary ids on internal (two-sided) faces.
/// * `external_boundaries` - Boundary ids on external faces.
pub fn validate_bcs(
    bcs: &[RayBoundaryCondition],
    scored_boundaries: &BTreeSet<BoundaryId>,
    internal_boundaries: &BTreeSet<BoundaryId>,
    external_boundaries: &BTreeSet<BoundaryId>,
) -> Result<()> {
    let score_bcs: Vec<_> = bcs.iter().filter(|bc| bc.kind == BcKind::ScoreAndKill).collect();
    if score_bcs.len() != 1 {
        return Err(ViewFactorError::Config(format!(
            "requires one and only one score-and-kill boundary condition, found {}",
            score_bcs.len()
        )));
    }
    if !scored_boundaries.is_subset(&score_bcs[0].boundaries) {
        return Err(ViewFactorError::Config(
            "the boundary restriction of the score-and-kill condition does not cover the \
             requested boundaries"
                .into(),
        ));
    }

    for bc in bcs.iter().filter(|bc| bc.kind == BcKind::Reflect) {
        if let Some(bnd_id) = bc.boundaries.intersection(scored_boundaries).next() {
            return Err(ViewFactorError::Config(format!(
                "a reflecting boundary condition cannot include scored boundary {bnd_id}"
            )));
        }
        if let Some(bnd_id) = bc.boundaries.intersection(internal_boundaries).next() {
            return Err(ViewFactorError::Config(format!(
                "a reflecting boundary condition is defined on internal boundary {bnd_id}; \
                 this is not allowed for view factor computation"
            )));
        }
    }

    // Every external boundary a ray can die on needs a defined interaction.
    for bnd_id in external_boundaries {
        if !bcs.iter().any(|bc| bc.has_boundary(*bnd_id)) {
            return Err(ViewFactorError::Config(format!(
                "external boundary {bnd_id} has no boundary condition"
            )));
        }
    }
    Ok(())
}

/// Per-boundary lookup table derived from a validated condition set.
pub fn bc_table(bcs: &[RayBoundaryCondition]) -> std::collections::HashMap<BoundaryId, BcKind> {
    let mut table = std::collections::HashMap::new();
    for bc in bcs {
        for bnd_id in &bc.boundaries {
            table.insert(*bnd_id, bc.kind);
        }
    }
    table
}

/// The angular weight of a scored hit must stay finite and non-negative.
#[inline]
pub fn assert_valid_weight(weight: Float) {
    debug_assert!(weight.is_finite() && weight >= 0.0, "invalid scoring weight");
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn scored() -> BTreeSet<BoundaryId> {
        [1, 2].into_iter().collect()
    }

    #[test]
    fn reflection_law() {
        let d = Vector3f::new(1.0, -1.0, 0.5).normalize();
        let n = Vector3f::new(0.0, 1.0, 0.0);
        let r = reflected_direction(&d, &n);
        assert_relative_eq!(r.length(), 1.0, epsilon = 1e-14);
        assert_relative_eq!(r.dot(&n), -d.dot(&n), epsilon = 1e-14);
        // Tangential component is untouched.
        assert_relative_eq!(r.x, d.x, epsilon = 1e-14);
        assert_relative_eq!(r.z, d.z, epsilon = 1e-14);
    }

    #[test]
    fn requires_exactly_one_score_bc() {
        let none = vec![RayBoundaryCondition::new(BcKind::Kill, [1, 2])];
        assert!(validate_bcs(&none, &scored(), &BTreeSet::new(), &scored()).is_err());

        let two = vec![
            RayBoundaryCondition::new(BcKind::ScoreAndKill, [1]),
            RayBoundaryCondition::new(BcKind::ScoreAndKill, [2]),
        ];
        assert!(validate_bcs(&two, &scored(), &BTreeSet::new(), &scored()).is_err());

        let one = vec![RayBoundaryCondition::new(BcKind::ScoreAndKill, [1, 2])];
        assert!(validate_bcs(&one, &scored(), &BTreeSet::new(), &scored()).is_ok());
    }

    #[test]
    fn score_bc_must_cover_requested_boundaries() {
        let bcs = vec![RayBoundaryCondition::new(BcKind::ScoreAndKill, [1])];
        assert!(validate_bcs(&bcs, &scored(), &BTreeSet::new(), &scored()).is_err());
    }

    #[test]
    fn reflect_rejected_on_scored_and_internal_boundaries() {
        let on_scored = vec![
            RayBoundaryCondition::new(BcKind::ScoreAndKill, [1, 2]),
            RayBoundaryCondition::new(BcKind::Reflect, [2]),
        ];
        assert!(validate_bcs(&on_scored, &scored(), &BTreeSet::new(), &scored()).is_err());

        let internal: BTreeSet<BoundaryId> = [9].into_iter().collect();
        let on_internal = vec![
            RayBoundaryCondition::new(BcKind::ScoreAndKill, [1, 2]),
            RayBoundaryCondition::new(BcKind::Reflect, [9]),
        ];
        assert!(validate_bcs(&on_internal, &scored(), &internal, &scored()).is_err());
    }

    #[test]
    fn uncovered_external_boundary_is_rejected() {
        let bcs = vec![RayBoundaryCondition::new(BcKind::ScoreAndKill, [1, 2])];
        let external: BTreeSet<BoundaryId> = [1, 2, 3].into_iter().collect();
        assert!(validate_bcs(&bcs, &scored(), &BTreeSet::new(), &external).is_err());

        let covered = vec![
            RayBoundaryCondition::new(BcKind::ScoreAndKill, [1, 2]),
            RayBoundaryCondition::new(BcKind::Kill, [3]),
        ];
        assert!(validate_bcs(&covered, &scored(), &BTreeSet::new(), &external).is_ok());
    }
}
