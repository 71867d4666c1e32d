use std::collections::BTreeMap;

use nalgebra::{DMatrix, DVector, Point3, Vector3};

use crate::error::Result;
use crate::skinning::{SkinCluster, bind_to_skin};
use crate::types::{LiveJoints, Pose, PoseIndex, VertexIndex};

/// Sparse per-vertex displacement accumulator.
pub type DeltaMap = BTreeMap<VertexIndex, Vector3<f64>>;

/// Live inputs of one evaluation pass.
#[derive(Debug, Clone, Copy)]
pub struct EvaluationContext<'a> {
    /// Current joint rotations keyed by joint slot.
    pub live_joints: &'a LiveJoints,
    /// Skinning state of the deformed geometry.
    pub skin: &'a SkinCluster,
    /// Overall deformer envelope.
    pub envelope: f64,
    /// Per-vertex paint weights. Missing entries count as 1.
    pub paint_weights: Option<&'a [f64]>,
}

impl<'a> EvaluationContext<'a> {
    pub fn new(live_joints: &'a LiveJoints, skin: &'a SkinCluster) -> Self {
        Self {
            live_joints,
            skin,
            envelope: 1.0,
            paint_weights: None,
        }
    }

    pub fn with_envelope(mut self, envelope: f64) -> Self {
        self.envelope = envelope;
        self
    }

    pub fn with_paint_weights(mut self, paint_weights: &'a [f64]) -> Self {
        self.paint_weights = Some(paint_weights);
        self
    }

    fn paint_weight(&self, vertex: VertexIndex) -> f64 {
        self.paint_weights
            .and_then(|weights| weights.get(vertex).copied())
            .unwrap_or(1.0)
    }
}

/// Raw proximity weights and their corrected interpolation weights, one entry
/// per pose in pose-index order.
#[derive(Debug, Clone, PartialEq)]
pub struct PoseWeights {
    pub raw: DVector<f64>,
    pub final_weights: DVector<f64>,
}

/// Outcome of a single evaluation pass.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EvaluationReport {
    /// Pose indices in the order used by `raw_weights` and `final_weights`.
    pub poses: Vec<PoseIndex>,
    pub raw_weights: Vec<f64>,
    pub final_weights: Vec<f64>,
    /// Number of mesh vertices that were moved.
    pub deformed_vertices: usize,
    /// True when the correction matrix was recomputed for this pass.
    pub solved: bool,
}

/// Proximity of the live joints to a pose: the product of each joint's
/// falloff weight.
///
/// Returns `None` when a joint of the pose has no live sample.
pub fn pose_weight(pose: &Pose, live_joints: &LiveJoints) -> Option<f64> {
    pose.joints()
        .iter()
        .try_fold(1.0, |weight, (joint, sample)| {
            live_joints
                .get(joint)
                .map(|rotation| weight * sample.weight_at(rotation))
        })
}

/// Raw weight of every pose against the live joints.
///
/// A pose that references a joint missing from `live_joints` gets weight 0;
/// the other poses are unaffected.
pub fn raw_pose_weights(poses: &[(PoseIndex, &Pose)], live_joints: &LiveJoints) -> DVector<f64> {
    DVector::from_iterator(
        poses.len(),
        poses.iter().map(|(index, pose)| {
            pose_weight(pose, live_joints).unwrap_or_else(|| {
                log::warn!(
                    "pose {index} references a joint without a live rotation; weight forced to 0"
                );
                0.0
            })
        }),
    )
}

/// `finalW[i] = Σ_j raw[j] · X[j][i]`.
pub fn final_pose_weights(raw: &DVector<f64>, correction: &DMatrix<f64>) -> DVector<f64> {
    correction.tr_mul(raw)
}

/// Weighted sum of every active target's bind-space deltas.
///
/// Poses whose final weight is below `epsilon` and targets whose combined
/// envelope is below `epsilon` in magnitude contribute nothing.
pub fn accumulate_deltas(
    poses: &[(PoseIndex, &Pose)],
    final_weights: &DVector<f64>,
    epsilon: f64,
) -> DeltaMap {
    let mut deltas = DeltaMap::new();

    for ((_, pose), &weight) in poses.iter().zip(final_weights.iter()) {
        if weight < epsilon {
            continue;
        }

        for target in pose.targets().values() {
            let envelope = target.envelope * pose.envelope;
            if envelope.abs() < epsilon {
                continue;
            }

            let scale = envelope * weight;
            for (vertex, delta) in target.iter() {
                *deltas.entry(vertex).or_insert_with(Vector3::zeros) += delta * scale;
            }
        }
    }

    deltas
}

/// Carries accumulated bind-space deltas into the current skin space.
///
/// # Errors
///
/// Fails when the skin cluster's matrix lists are inconsistent or a touched
/// vertex is weighted to an unknown influence.
pub fn deltas_to_skin_space(deltas: &mut DeltaMap, skin: &SkinCluster) -> Result<()> {
    let transforms = skin.skin_transforms()?;

    for (vertex, delta) in deltas.iter_mut() {
        let blended = transforms.blended_matrix(*vertex, skin.influences(*vertex))?;
        *delta = bind_to_skin(delta, &blended);
    }

    Ok(())
}

/// Adds `delta · paintWeight · envelope` to every touched vertex.
///
/// Deltas addressing vertices past the end of `positions` are ignored.
/// Returns the number of vertices moved.
pub fn apply_deltas(
    positions: &mut [Point3<f64>],
    deltas: &DeltaMap,
    context: &EvaluationContext<'_>,
) -> usize {
    let mut moved = 0;
    for (&vertex, delta) in deltas {
        if let Some(position) = positions.get_mut(vertex) {
            *position += delta * (context.paint_weight(vertex) * context.envelope);
            moved += 1;
        }
    }
    moved
}

/// Raw and final weights for a dense pose list and its correction matrix.
pub fn compute_pose_weights(
    poses: &[(PoseIndex, &Pose)],
    live_joints: &LiveJoints,
    correction: &DMatrix<f64>,
) -> PoseWeights {
    let raw = raw_pose_weights(poses, live_joints);
    let final_weights = final_pose_weights(&raw, correction);
    PoseWeights { raw, final_weights }
}

/// Runs weighting, accumulation, bind-to-skin conversion and application for
/// a solved pose set.
///
/// When no pose has a nonzero raw weight, or no target survives the epsilon
/// filters, the mesh is left untouched. Final weights are all zero in the
/// first case.
///
/// # Arguments
///
/// * `poses` - Dense pose list in the order the correction matrix was solved.
/// * `correction` - Solved correction matrix `X`.
/// * `context` - Live joints, skin cluster, envelope and paint weights.
/// * `positions` - Mesh positions, mutated in place.
/// * `epsilon` - Threshold below which weights and envelopes are ignored.
pub fn evaluate_poses(
    poses: &[(PoseIndex, &Pose)],
    correction: &DMatrix<f64>,
    context: &EvaluationContext<'_>,
    positions: &mut [Point3<f64>],
    epsilon: f64,
) -> Result<EvaluationReport> {
    let mut report = EvaluationReport {
        poses: poses.iter().map(|(index, _)| *index).collect(),
        ..EvaluationReport::default()
    };

    let raw = raw_pose_weights(poses, context.live_joints);
    report.raw_weights = raw.iter().copied().collect();
    if raw.iter().all(|weight| *weight == 0.0) {
        report.final_weights = vec![0.0; raw.len()];
        return Ok(report);
    }

    let final_weights = final_pose_weights(&raw, correction);
    report.final_weights = final_weights.iter().copied().collect();
    log::trace!(
        "pose weights: raw {:?}, final {:?}",
        report.raw_weights,
        report.final_weights
    );

    let mut deltas = accumulate_deltas(poses, &final_weights, epsilon);
    if deltas.is_empty() {
        return Ok(report);
    }

    deltas_to_skin_space(&mut deltas, context.skin)?;
    report.deformed_vertices = apply_deltas(positions, &deltas, context);

    Ok(report)
}
