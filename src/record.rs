use std::collections::HashMap;

use nalgebra::Point3;

use crate::error::{PoseSpaceError, Result};
use crate::skinning::{SkinCluster, skin_to_bind};
use crate::types::{JointIndex, JointRotation, PoseTarget};

/// A joint to attach to a newly recorded pose.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordJoint {
    /// Host-side joint name, resolved to a stable slot by [`JointSlots`].
    pub name: String,
    /// Rotation of the joint at record time.
    pub rotation: JointRotation,
    /// Falloff in degrees; the deformer default applies when `None`.
    pub falloff: Option<f64>,
}

impl RecordJoint {
    pub fn new(name: impl Into<String>, rotation: JointRotation) -> Self {
        Self {
            name: name.into(),
            rotation,
            falloff: None,
        }
    }

    pub fn with_falloff(mut self, falloff: f64) -> Self {
        self.falloff = Some(falloff);
        self
    }
}

/// Maps host joint names to joint slots. A slot, once handed out, keeps its
/// index for the lifetime of the registry.
#[derive(Debug, Clone, Default)]
pub struct JointSlots {
    slots: HashMap<String, JointIndex>,
    next: JointIndex,
}

impl JointSlots {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the slot of `name`, allocating the next free one when the
    /// joint has not been seen before.
    pub fn bind(&mut self, name: &str) -> JointIndex {
        if let Some(&slot) = self.slots.get(name) {
            return slot;
        }

        let slot = self.next;
        self.slots.insert(name.to_string(), slot);
        self.next += 1;
        slot
    }

    pub fn get(&self, name: &str) -> Option<JointIndex> {
        self.slots.get(name).copied()
    }

    /// Joint names sorted by slot.
    pub fn names(&self) -> Vec<(JointIndex, &str)> {
        let mut names: Vec<(JointIndex, &str)> = self
            .slots
            .iter()
            .map(|(name, slot)| (*slot, name.as_str()))
            .collect();
        names.sort_unstable_by_key(|(slot, _)| *slot);
        names
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Computes the bind-space displacement that turns `source` into `target`.
///
/// Every vertex that moved by at least `tolerance` has its world delta carried
/// back through the inverse of its blended skin matrix, so that evaluating
/// the resulting target at the recording pose reproduces the sculpted shape.
///
/// # Arguments
///
/// * `source` - Deformed mesh positions at record time.
/// * `target` - Artist-sculpted positions with the same topology.
/// * `skin` - Skinning state active on `source`.
/// * `tolerance` - Minimum displacement length for a vertex to be kept.
///
/// # Errors
///
/// * `PoseSpaceError::VertexCountMismatch` when the snapshots differ in size.
/// * `PoseSpaceError::PoseTargetDoesNotDiffer` when no vertex moved.
/// * Skin cluster inconsistencies and non-invertible blended matrices.
pub fn extract_bind_space_deltas(
    source: &[Point3<f64>],
    target: &[Point3<f64>],
    skin: &SkinCluster,
    tolerance: f64,
) -> Result<PoseTarget> {
    if source.len() != target.len() {
        return Err(PoseSpaceError::VertexCountMismatch {
            source_count: source.len(),
            target_count: target.len(),
        });
    }

    let transforms = skin.skin_transforms()?;

    let mut components = Vec::new();
    let mut deltas = Vec::new();
    for (vertex, (from, to)) in source.iter().zip(target).enumerate() {
        let world_delta = to - from;
        if world_delta.norm() < tolerance {
            continue;
        }

        let blended = transforms.blended_matrix(vertex, skin.influences(vertex))?;
        let bind_delta = skin_to_bind(&world_delta, &blended).ok_or_else(|| {
            PoseSpaceError::NonInvertibleMatrix {
                context: format!("skin matrix of vertex {vertex}"),
            }
        })?;

        components.push(vertex);
        deltas.push(bind_delta);
    }

    if components.is_empty() {
        return Err(PoseSpaceError::PoseTargetDoesNotDiffer);
    }

    PoseTarget::new(components, deltas)
}
