use std::collections::BTreeMap;

use nalgebra::Vector3;

use crate::error::{PoseSpaceError, Result};

// ─── Index aliases ────────────────────────────────────────────────────────────

/// Stable joint slot index shared by every pose of a deformer.
pub type JointIndex = usize;
/// Pose index in recording order. Never reused within a session.
pub type PoseIndex = usize;
/// Target index within a single pose.
pub type TargetIndex = usize;
/// Mesh vertex index.
pub type VertexIndex = usize;
/// Influence (skinned joint) index as numbered by the skinning collaborator.
pub type InfluenceIndex = usize;

/// Live joint rotations keyed by joint slot.
pub type LiveJoints = BTreeMap<JointIndex, JointRotation>;

// ─── Constants ────────────────────────────────────────────────────────────────

/// Falloff assigned to a recorded joint when the caller does not pick one.
pub const DEFAULT_FALLOFF_DEG: f64 = 90.0;

/// Generic tolerance for "effectively zero" weights, envelopes and deltas.
pub const FLOAT_TOLERANCE: f64 = 1e-7;

// ─── Joint samples ────────────────────────────────────────────────────────────

/// Euler rotation of a joint in degrees, in the skeleton's rotation order.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct JointRotation {
    pub degrees: Vector3<f64>,
}

impl JointRotation {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self {
            degrees: Vector3::new(x, y, z),
        }
    }

    /// Builds a rotation from host-side radians.
    pub fn from_radians(radians: Vector3<f64>) -> Self {
        Self {
            degrees: radians.map(f64::to_degrees),
        }
    }

    /// Euclidean distance between the raw Euler triples, in degrees.
    ///
    /// This is not a geodesic rotation distance: it is sensitive to angle
    /// wraparound and axis order. Recorded falloffs are tuned against it.
    pub fn distance_to(&self, other: &JointRotation) -> f64 {
        (self.degrees - other.degrees).norm()
    }
}

/// Linear falloff of a single joint: `1 - distance / falloff` inside the
/// radius, `0` at or beyond it.
pub fn falloff_weight(distance: f64, falloff: f64) -> f64 {
    if distance < falloff {
        1.0 - distance / falloff
    } else {
        0.0
    }
}

/// One joint's recorded rotation and radius of influence within a pose.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoseJoint {
    pub rotation: JointRotation,
    /// Falloff angle in degrees.
    pub falloff: f64,
}

impl PoseJoint {
    pub fn new(rotation: JointRotation, falloff: f64) -> Result<Self> {
        validate_falloff(falloff)?;
        Ok(Self { rotation, falloff })
    }

    /// Weight this joint contributes when the live joint sits at `rotation`.
    pub fn weight_at(&self, rotation: &JointRotation) -> f64 {
        falloff_weight(self.rotation.distance_to(rotation), self.falloff)
    }
}

pub(crate) fn validate_falloff(falloff: f64) -> Result<()> {
    if falloff.is_finite() && falloff > 0.0 {
        Ok(())
    } else {
        Err(PoseSpaceError::InvalidFalloff { falloff })
    }
}

// ─── Targets ──────────────────────────────────────────────────────────────────

/// Sparse bind-space displacement field attached to a pose.
///
/// `components` and `deltas` are parallel arrays and always have the same
/// length.
#[derive(Debug, Clone, PartialEq)]
pub struct PoseTarget {
    pub name: Option<String>,
    pub envelope: f64,
    components: Vec<VertexIndex>,
    deltas: Vec<Vector3<f64>>,
}

impl PoseTarget {
    pub fn new(components: Vec<VertexIndex>, deltas: Vec<Vector3<f64>>) -> Result<Self> {
        check_target_lengths(&components, &deltas)?;
        Ok(Self {
            name: None,
            envelope: 1.0,
            components,
            deltas,
        })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn components(&self) -> &[VertexIndex] {
        &self.components
    }

    pub fn deltas(&self) -> &[Vector3<f64>] {
        &self.deltas
    }

    /// Vertex/delta pairs in stored order.
    pub fn iter(&self) -> impl Iterator<Item = (VertexIndex, &Vector3<f64>)> {
        self.components.iter().copied().zip(self.deltas.iter())
    }

    /// Replaces the displacement field, keeping the parallel-array invariant.
    pub fn set_deltas(
        &mut self,
        components: Vec<VertexIndex>,
        deltas: Vec<Vector3<f64>>,
    ) -> Result<()> {
        check_target_lengths(&components, &deltas)?;
        self.components = components;
        self.deltas = deltas;
        Ok(())
    }
}

fn check_target_lengths(components: &[VertexIndex], deltas: &[Vector3<f64>]) -> Result<()> {
    if components.len() != deltas.len() {
        return Err(PoseSpaceError::InvalidTargetDelta {
            components: components.len(),
            deltas: deltas.len(),
        });
    }
    Ok(())
}

// ─── Poses ────────────────────────────────────────────────────────────────────

/// A recorded pose: joint samples that define where it activates, plus the
/// targets it blends in.
#[derive(Debug, Clone, PartialEq)]
pub struct Pose {
    pub name: Option<String>,
    /// Scales every target of this pose. Not part of the joint definition.
    pub envelope: f64,
    pub(crate) joints: BTreeMap<JointIndex, PoseJoint>,
    pub(crate) targets: BTreeMap<TargetIndex, PoseTarget>,
    pub(crate) next_target: TargetIndex,
}

impl Default for Pose {
    fn default() -> Self {
        Self {
            name: None,
            envelope: 1.0,
            joints: BTreeMap::new(),
            targets: BTreeMap::new(),
            next_target: 0,
        }
    }
}

impl Pose {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_joint(mut self, joint: JointIndex, sample: PoseJoint) -> Self {
        self.joints.insert(joint, sample);
        self
    }

    pub fn with_target(mut self, target: PoseTarget) -> Self {
        self.push_target(target);
        self
    }

    pub fn joints(&self) -> &BTreeMap<JointIndex, PoseJoint> {
        &self.joints
    }

    pub fn joint(&self, joint: JointIndex) -> Option<&PoseJoint> {
        self.joints.get(&joint)
    }

    pub fn targets(&self) -> &BTreeMap<TargetIndex, PoseTarget> {
        &self.targets
    }

    pub fn target(&self, target: TargetIndex) -> Option<&PoseTarget> {
        self.targets.get(&target)
    }

    pub(crate) fn push_target(&mut self, target: PoseTarget) -> TargetIndex {
        let index = self.next_target;
        self.targets.insert(index, target);
        self.next_target += 1;
        index
    }
}
