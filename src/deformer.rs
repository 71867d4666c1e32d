use std::collections::BTreeMap;

use nalgebra::{DMatrix, Point3, Vector3};

use crate::error::{PoseSpaceError, Result};
use crate::evaluate::{
    EvaluationContext, EvaluationReport, PoseWeights, compute_pose_weights, evaluate_poses,
};
use crate::logging::ResultExt;
use crate::record::{JointSlots, RecordJoint, extract_bind_space_deltas};
use crate::settings::EngineSettings;
use crate::skinning::SkinCluster;
use crate::solver::{similarity_matrix, solve_pose_weights};
use crate::types::{
    JointIndex, JointRotation, LiveJoints, Pose, PoseIndex, PoseJoint, PoseTarget, TargetIndex,
    VertexIndex, validate_falloff,
};

/// Cached solver state.
#[derive(Debug, Clone, PartialEq)]
enum CacheState {
    /// A pose definition changed since the last solve.
    Dirty,
    /// Correction matrix is valid for the current pose set.
    Clean(DMatrix<f64>),
    /// The last solve failed; stays failed until a pose definition changes.
    Failed(PoseSpaceError),
}

/// Pose-space corrective deformer for a single mesh.
///
/// Owns its poses, the joint slot registry and the cached correction matrix.
/// Every edit that touches joint membership, rotations or falloffs marks the
/// cache dirty; the next evaluation re-solves before blending.
#[derive(Debug, Clone)]
pub struct PoseSpaceDeformer {
    settings: EngineSettings,
    poses: BTreeMap<PoseIndex, Pose>,
    next_pose: PoseIndex,
    joint_slots: JointSlots,
    cache: CacheState,
    solve_count: usize,
}

impl Default for PoseSpaceDeformer {
    fn default() -> Self {
        Self::new()
    }
}

impl PoseSpaceDeformer {
    pub fn new() -> Self {
        Self::with_settings(EngineSettings::default())
    }

    pub fn with_settings(settings: EngineSettings) -> Self {
        Self {
            settings,
            poses: BTreeMap::new(),
            next_pose: 0,
            joint_slots: JointSlots::new(),
            cache: CacheState::Dirty,
            solve_count: 0,
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn joint_slots(&self) -> &JointSlots {
        &self.joint_slots
    }

    /// Resolves a host joint name to its slot, allocating one if needed.
    pub fn bind_joint(&mut self, name: &str) -> JointIndex {
        self.joint_slots.bind(name)
    }

    pub fn poses(&self) -> &BTreeMap<PoseIndex, Pose> {
        &self.poses
    }

    pub fn pose(&self, pose: PoseIndex) -> Option<&Pose> {
        self.poses.get(&pose)
    }

    pub fn pose_count(&self) -> usize {
        self.poses.len()
    }

    /// True when the next evaluation will re-solve the correction matrix.
    pub fn is_dirty(&self) -> bool {
        matches!(self.cache, CacheState::Dirty)
    }

    /// Number of correction-matrix solves performed so far.
    pub fn solve_count(&self) -> usize {
        self.solve_count
    }

    fn mark_dirty(&mut self) {
        self.cache = CacheState::Dirty;
    }

    fn pose_mut(&mut self, pose: PoseIndex) -> Result<&mut Pose> {
        self.poses
            .get_mut(&pose)
            .ok_or(PoseSpaceError::InvalidPoseIndex(pose))
    }

    fn target_mut(&mut self, pose: PoseIndex, target: TargetIndex) -> Result<&mut PoseTarget> {
        self.pose_mut(pose)?
            .targets
            .get_mut(&target)
            .ok_or(PoseSpaceError::InvalidTargetIndex { pose, target })
    }

    // ─── Pose editing ─────────────────────────────────────────────────────────

    /// Registers a pose and returns its index.
    ///
    /// A pose needs at least one joint: without one it would be fully
    /// active everywhere and make the pose matrix singular.
    pub fn add_pose(&mut self, pose: Pose) -> Result<PoseIndex> {
        if pose.joints().is_empty() {
            return Err(PoseSpaceError::NoJointsProvided);
        }
        for sample in pose.joints().values() {
            validate_falloff(sample.falloff)?;
        }

        let index = self.next_pose;
        self.poses.insert(index, pose);
        self.next_pose += 1;
        self.mark_dirty();
        Ok(index)
    }

    pub fn remove_pose(&mut self, pose: PoseIndex) -> Result<Pose> {
        let removed = self
            .poses
            .remove(&pose)
            .ok_or(PoseSpaceError::InvalidPoseIndex(pose))?;
        self.mark_dirty();
        Ok(removed)
    }

    /// Inserts or replaces a joint sample of a pose.
    pub fn set_pose_joint(
        &mut self,
        pose: PoseIndex,
        joint: JointIndex,
        sample: PoseJoint,
    ) -> Result<()> {
        validate_falloff(sample.falloff)?;
        self.pose_mut(pose)?.joints.insert(joint, sample);
        self.mark_dirty();
        Ok(())
    }

    pub fn set_joint_rotation(
        &mut self,
        pose: PoseIndex,
        joint: JointIndex,
        rotation: JointRotation,
    ) -> Result<()> {
        self.pose_joint_mut(pose, joint)?.rotation = rotation;
        self.mark_dirty();
        Ok(())
    }

    pub fn set_joint_falloff(
        &mut self,
        pose: PoseIndex,
        joint: JointIndex,
        falloff: f64,
    ) -> Result<()> {
        validate_falloff(falloff)?;
        self.pose_joint_mut(pose, joint)?.falloff = falloff;
        self.mark_dirty();
        Ok(())
    }

    /// Removes a joint sample from a pose. The last joint of a pose cannot be
    /// removed; remove the pose instead.
    pub fn remove_pose_joint(&mut self, pose: PoseIndex, joint: JointIndex) -> Result<PoseJoint> {
        let joints = &mut self.pose_mut(pose)?.joints;
        if !joints.contains_key(&joint) {
            return Err(PoseSpaceError::InvalidPoseJoint { pose, joint });
        }
        if joints.len() == 1 {
            return Err(PoseSpaceError::LastPoseJoint { pose, joint });
        }
        let removed = joints
            .remove(&joint)
            .ok_or(PoseSpaceError::InvalidPoseJoint { pose, joint })?;
        self.mark_dirty();
        Ok(removed)
    }

    fn pose_joint_mut(&mut self, pose: PoseIndex, joint: JointIndex) -> Result<&mut PoseJoint> {
        self.pose_mut(pose)?
            .joints
            .get_mut(&joint)
            .ok_or(PoseSpaceError::InvalidPoseJoint { pose, joint })
    }

    // Envelopes, names and targets do not feed the solver, so these leave the
    // cache alone.

    pub fn set_pose_name(&mut self, pose: PoseIndex, name: Option<String>) -> Result<()> {
        self.pose_mut(pose)?.name = name;
        Ok(())
    }

    pub fn set_pose_envelope(&mut self, pose: PoseIndex, envelope: f64) -> Result<()> {
        self.pose_mut(pose)?.envelope = envelope;
        Ok(())
    }

    pub fn add_target(&mut self, pose: PoseIndex, target: PoseTarget) -> Result<TargetIndex> {
        Ok(self.pose_mut(pose)?.push_target(target))
    }

    pub fn remove_target(&mut self, pose: PoseIndex, target: TargetIndex) -> Result<PoseTarget> {
        self.pose_mut(pose)?
            .targets
            .remove(&target)
            .ok_or(PoseSpaceError::InvalidTargetIndex { pose, target })
    }

    pub fn set_target_envelope(
        &mut self,
        pose: PoseIndex,
        target: TargetIndex,
        envelope: f64,
    ) -> Result<()> {
        self.target_mut(pose, target)?.envelope = envelope;
        Ok(())
    }

    pub fn set_target_deltas(
        &mut self,
        pose: PoseIndex,
        target: TargetIndex,
        components: Vec<VertexIndex>,
        deltas: Vec<Vector3<f64>>,
    ) -> Result<()> {
        self.target_mut(pose, target)?.set_deltas(components, deltas)
    }

    // ─── Recording ────────────────────────────────────────────────────────────

    /// Records a new pose from a deformed mesh snapshot and its sculpted
    /// counterpart.
    ///
    /// The sculpted displacement is stored in bind space, and each joint in
    /// `joints` is attached to the pose with its current rotation. Joints are
    /// resolved to existing slots by name; unknown names get a new slot.
    ///
    /// # Arguments
    ///
    /// * `source` - Deformed mesh positions at record time.
    /// * `target` - Sculpted positions with the same topology.
    /// * `skin` - Skinning state active on `source`.
    /// * `joints` - Joints that define where the pose activates.
    ///
    /// # Returns
    ///
    /// Index of the new pose.
    ///
    /// # Errors
    ///
    /// Fails without modifying the deformer when `joints` is empty, a
    /// falloff is invalid, or extraction fails.
    pub fn record_pose(
        &mut self,
        source: &[Point3<f64>],
        target: &[Point3<f64>],
        skin: &SkinCluster,
        joints: &[RecordJoint],
    ) -> Result<PoseIndex> {
        if joints.is_empty() {
            return Err(PoseSpaceError::NoJointsProvided);
        }

        let samples = joints
            .iter()
            .map(|joint| {
                let falloff = joint.falloff.unwrap_or(self.settings.default_falloff_deg);
                PoseJoint::new(joint.rotation, falloff).map(|sample| (joint.name.as_str(), sample))
            })
            .collect::<Result<Vec<_>>>()?;

        let recorded =
            extract_bind_space_deltas(source, target, skin, self.settings.record_tolerance)?;
        let vertex_count = recorded.components().len();

        let mut pose = Pose::new().with_target(recorded);
        for (name, sample) in samples {
            let slot = self.joint_slots.bind(name);
            pose.joints.insert(slot, sample);
        }

        let index = self.add_pose(pose)?;
        log::info!(
            "recorded pose {index} with {} joints and {vertex_count} displaced vertices",
            joints.len()
        );
        Ok(index)
    }

    /// Records an additional target on an existing pose.
    pub fn record_target(
        &mut self,
        pose: PoseIndex,
        source: &[Point3<f64>],
        target: &[Point3<f64>],
        skin: &SkinCluster,
    ) -> Result<TargetIndex> {
        if !self.poses.contains_key(&pose) {
            return Err(PoseSpaceError::InvalidPoseIndex(pose));
        }

        let recorded =
            extract_bind_space_deltas(source, target, skin, self.settings.record_tolerance)?;
        self.add_target(pose, recorded)
    }

    // ─── Solving and evaluation ───────────────────────────────────────────────

    fn dense_poses(&self) -> Vec<(PoseIndex, &Pose)> {
        self.poses.iter().map(|(index, pose)| (*index, pose)).collect()
    }

    /// Re-solves the correction matrix when dirty. Returns whether a solve
    /// ran.
    fn refresh_correction(&mut self) -> Result<bool> {
        let solved = matches!(self.cache, CacheState::Dirty);
        if solved {
            let poses: Vec<&Pose> = self.poses.values().collect();
            let result = solve_pose_weights(&poses, self.settings.singular_pivot_tolerance)
                .log_error(Some("solve pose weights"));
            self.solve_count += 1;
            self.cache = match result {
                Ok(correction) => CacheState::Clean(correction),
                Err(error) => CacheState::Failed(error),
            };
        }

        match &self.cache {
            CacheState::Failed(error) => Err(error.clone()),
            _ => Ok(solved),
        }
    }

    fn cached_correction(&self) -> Option<&DMatrix<f64>> {
        match &self.cache {
            CacheState::Clean(correction) => Some(correction),
            _ => None,
        }
    }

    /// Raw pose-to-pose similarity matrix of the current pose set.
    pub fn similarity_matrix(&self) -> DMatrix<f64> {
        let poses: Vec<&Pose> = self.poses.values().collect();
        similarity_matrix(&poses)
    }

    /// Correction matrix, solving first if the cache is dirty.
    pub fn correction_matrix(&mut self) -> Result<&DMatrix<f64>> {
        self.refresh_correction()?;
        self.cached_correction()
            .ok_or(PoseSpaceError::SingularPoseMatrix {
                pose_count: self.poses.len(),
            })
    }

    /// Raw and final weights of every pose for the given live joints.
    pub fn pose_weights(&mut self, live_joints: &LiveJoints) -> Result<PoseWeights> {
        self.refresh_correction()?;
        let correction = self
            .cached_correction()
            .ok_or(PoseSpaceError::SingularPoseMatrix {
                pose_count: self.poses.len(),
            })?;
        Ok(compute_pose_weights(
            &self.dense_poses(),
            live_joints,
            correction,
        ))
    }

    /// Deforms `positions` in place with the blended correctives.
    ///
    /// Skips silently when the envelope is near zero or no pose is
    /// registered. A singular pose set is reported on every call until a pose
    /// definition is edited; the mesh is not touched in that case.
    pub fn evaluate(
        &mut self,
        context: &EvaluationContext<'_>,
        positions: &mut [Point3<f64>],
    ) -> Result<EvaluationReport> {
        if context.envelope < self.settings.weight_epsilon || self.poses.is_empty() {
            return Ok(EvaluationReport::default());
        }

        let solved = self.refresh_correction()?;
        let Some(correction) = self.cached_correction() else {
            return Ok(EvaluationReport::default());
        };

        let mut report = evaluate_poses(
            &self.dense_poses(),
            correction,
            context,
            positions,
            self.settings.weight_epsilon,
        )?;
        report.solved = solved;
        Ok(report)
    }
}
