//! Pose-space corrective deformation.
//!
//! Artists record corrective vertex displacements for specific skeletal
//! poses; this crate blends them back onto a linear-blend-skinned mesh
//! whenever the live joints approach a recorded pose. It covers the pose
//! weight solver, the per-evaluation blending engine and the bind-space
//! extraction used when recording a pose.

pub mod deformer;
pub mod error;
pub mod evaluate;
pub mod logging;
pub mod record;
pub mod settings;
pub mod skinning;
pub mod solver;
pub mod types;

pub use deformer::PoseSpaceDeformer;
pub use error::{PoseSpaceError, Result};
pub use evaluate::{EvaluationContext, EvaluationReport, PoseWeights};
pub use logging::ResultExt;
pub use record::{JointSlots, RecordJoint, extract_bind_space_deltas};
pub use settings::EngineSettings;
pub use skinning::{Influence, SkinCluster, SkinTransforms};
pub use types::{
    InfluenceIndex, JointIndex, JointRotation, LiveJoints, Pose, PoseIndex, PoseJoint, PoseTarget,
    TargetIndex, VertexIndex,
};
