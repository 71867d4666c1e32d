use thiserror::Error;

use crate::types::{InfluenceIndex, JointIndex, PoseIndex, TargetIndex, VertexIndex};

/// Error values returned by the pose solver, evaluation and recording.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PoseSpaceError {
    /// The pose-to-pose similarity matrix has no inverse.
    #[error(
        "no two or more poses can have the same set of joints and joint values; \
         failed to calculate pose weights for {pose_count} poses"
    )]
    SingularPoseMatrix {
        /// Number of poses in the system that failed to solve.
        pose_count: usize,
    },

    /// The skinning collaborator's bind-inverse and current matrix lists do
    /// not cover the same influences.
    #[error(
        "influence matrices and bind pre-matrices do not match \
         (bind only: {bind_only:?}, current only: {current_only:?})"
    )]
    MismatchedInfluences {
        bind_only: Vec<InfluenceIndex>,
        current_only: Vec<InfluenceIndex>,
    },

    /// A vertex is weighted to an influence that has no skin transform.
    #[error("vertex {vertex} is weighted to unknown influence {influence}")]
    UnknownInfluence {
        vertex: VertexIndex,
        influence: InfluenceIndex,
    },

    #[error("failed to invert {context}")]
    NonInvertibleMatrix { context: String },

    #[error(
        "posed mesh and deformed mesh differ in vertex count ({source_count} vs {target_count}); \
         failed to add pose"
    )]
    VertexCountMismatch {
        source_count: usize,
        target_count: usize,
    },

    /// Recording found no vertex that moved beyond tolerance.
    #[error("posed mesh is similar to the deformed mesh; nothing to add")]
    PoseTargetDoesNotDiffer,

    #[error("no joints provided to be added to pose")]
    NoJointsProvided,

    #[error("no pose found at pose index {0}")]
    InvalidPoseIndex(PoseIndex),

    #[error("no pose target found at target index {target} of pose {pose}")]
    InvalidTargetIndex { pose: PoseIndex, target: TargetIndex },

    #[error("pose {pose} has no joint {joint}")]
    InvalidPoseJoint { pose: PoseIndex, joint: JointIndex },

    #[error("joint {joint} is the last joint of pose {pose}; remove the pose instead")]
    LastPoseJoint { pose: PoseIndex, joint: JointIndex },

    /// Components and deltas of a target must be parallel arrays.
    #[error("invalid pose target delta: {components} components but {deltas} deltas")]
    InvalidTargetDelta { components: usize, deltas: usize },

    #[error("falloff must be a positive finite angle, got {falloff}")]
    InvalidFalloff { falloff: f64 },
}

pub type Result<T, E = PoseSpaceError> = std::result::Result<T, E>;
