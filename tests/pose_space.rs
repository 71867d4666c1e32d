use nalgebra::{DMatrix, Matrix4, Point3, Rotation3, Translation3, Vector3};
use posespace::{
    EvaluationContext, Influence, JointRotation, LiveJoints, Pose, PoseJoint, PoseSpaceDeformer,
    PoseSpaceError, PoseTarget, RecordJoint, SkinCluster,
};

const EPS: f64 = 1e-9;

fn joint(y: f64, falloff: f64) -> PoseJoint {
    PoseJoint::new(JointRotation::new(0.0, y, 0.0), falloff).expect("valid falloff")
}

fn live_y(y: f64) -> LiveJoints {
    LiveJoints::from([(0, JointRotation::new(0.0, y, 0.0))])
}

fn identity_skin(vertex_count: usize) -> SkinCluster {
    SkinCluster::new(Matrix4::identity())
        .with_influence(0, Matrix4::identity(), Matrix4::identity())
        .with_weights(vec![vec![Influence::new(0, 1.0)]; vertex_count])
}

/// Two-bone arm: influence 0 is static, influence 1 is an elbow at y = 2
/// bent about z by `elbow_deg`.
fn arm_skin(elbow_deg: f64) -> SkinCluster {
    let elbow_bind = Translation3::new(0.0, 2.0, 0.0).to_homogeneous();
    let elbow_posed = elbow_bind
        * Rotation3::from_euler_angles(0.0, 0.0, elbow_deg.to_radians()).to_homogeneous();
    let elbow_bind_pre = elbow_bind.try_inverse().expect("invertible elbow bind");

    SkinCluster::new(Translation3::new(0.5, 0.0, 0.0).to_homogeneous())
        .with_influence(0, Matrix4::identity(), Matrix4::identity())
        .with_influence(1, elbow_bind_pre, elbow_posed)
        .with_weights(vec![
            vec![Influence::new(0, 1.0)],
            vec![Influence::new(0, 0.6), Influence::new(1, 0.4)],
            vec![Influence::new(0, 0.2), Influence::new(1, 0.8)],
            vec![Influence::new(1, 1.0)],
        ])
}

fn arm_rest() -> Vec<Point3<f64>> {
    vec![
        Point3::new(0.0, 0.0, 0.0),
        Point3::new(0.0, 1.5, 0.0),
        Point3::new(0.0, 2.5, 0.0),
        Point3::new(0.0, 3.5, 0.0),
    ]
}

fn skinned(skin: &SkinCluster, rest: &[Point3<f64>]) -> Vec<Point3<f64>> {
    let transforms = skin.skin_transforms().expect("skin transforms");
    rest.iter()
        .enumerate()
        .map(|(vertex, point)| {
            transforms
                .deform_point(vertex, skin.influences(vertex), point)
                .expect("skinned point")
        })
        .collect()
}

fn scenario_deformer(falloff: f64) -> PoseSpaceDeformer {
    let mut deformer = PoseSpaceDeformer::new();
    let pose_a = Pose::new()
        .with_joint(0, joint(0.0, falloff))
        .with_target(PoseTarget::new(vec![5], vec![Vector3::new(0.0, 1.0, 0.0)]).expect("A"));
    let pose_b = Pose::new()
        .with_joint(0, joint(90.0, falloff))
        .with_target(PoseTarget::new(vec![5], vec![Vector3::new(0.0, 0.0, 1.0)]).expect("B"));
    deformer.add_pose(pose_a).expect("pose A");
    deformer.add_pose(pose_b).expect("pose B");
    deformer
}

#[test]
fn given_poses_ninety_degrees_apart_when_halfway_then_each_pose_contributes_half() {
    let mut deformer = scenario_deformer(90.0);
    let skin = identity_skin(6);
    let joints = live_y(45.0);
    let mut positions = vec![Point3::origin(); 6];

    assert!((deformer.similarity_matrix() - DMatrix::identity(2, 2)).norm() < EPS);

    let report = deformer
        .evaluate(&EvaluationContext::new(&joints, &skin), &mut positions)
        .expect("evaluation");

    assert!((report.raw_weights[0] - 0.5).abs() < EPS);
    assert!((report.raw_weights[1] - 0.5).abs() < EPS);
    assert!((report.final_weights[0] - 0.5).abs() < EPS);
    assert!((report.final_weights[1] - 0.5).abs() < EPS);
    assert!((positions[5] - Point3::new(0.0, 0.5, 0.5)).norm() < EPS);
    assert_eq!(report.deformed_vertices, 1);
}

#[test]
fn given_overlapping_falloffs_when_solving_then_correction_is_inverse_of_similarity() {
    let mut deformer = scenario_deformer(180.0);
    let skin = identity_skin(6);
    let joints = live_y(45.0);
    let mut positions = vec![Point3::origin(); 6];

    let similarity = deformer.similarity_matrix();
    let expected_similarity = DMatrix::from_row_slice(2, 2, &[1.0, 0.5, 0.5, 1.0]);
    assert!((similarity - expected_similarity).norm() < EPS);

    let correction = deformer.correction_matrix().expect("correction").clone();
    let expected_correction =
        DMatrix::from_row_slice(2, 2, &[4.0 / 3.0, -2.0 / 3.0, -2.0 / 3.0, 4.0 / 3.0]);
    assert!((correction - expected_correction).norm() < EPS);

    let report = deformer
        .evaluate(&EvaluationContext::new(&joints, &skin), &mut positions)
        .expect("evaluation");

    assert!((report.raw_weights[0] - 0.75).abs() < EPS);
    assert!((report.final_weights[0] - 0.5).abs() < EPS);
    assert!((report.final_weights[1] - 0.5).abs() < EPS);
    assert!((positions[5] - Point3::new(0.0, 0.5, 0.5)).norm() < EPS);
}

#[test]
fn given_recorded_poses_when_evaluated_at_own_configuration_then_sculpt_is_reproduced() {
    let rest = arm_rest();
    let mut deformer = PoseSpaceDeformer::new();
    let sculpts = [
        (0.0, vec![Vector3::new(0.0, 0.0, 0.0), Vector3::new(0.2, 0.0, 0.0)]),
        (60.0, vec![Vector3::new(0.0, 0.1, 0.0), Vector3::new(-0.3, 0.0, 0.1)]),
        (100.0, vec![Vector3::new(0.0, 0.0, 0.4), Vector3::new(0.1, 0.1, 0.1)]),
    ];

    for (elbow, offsets) in &sculpts {
        let source = skinned(&arm_skin(*elbow), &rest);
        let mut target = source.clone();
        target[1] += offsets[0];
        target[2] += offsets[1];

        deformer
            .record_pose(
                &source,
                &target,
                &arm_skin(*elbow),
                &[RecordJoint::new("elbow", JointRotation::new(0.0, 0.0, *elbow))
                    .with_falloff(120.0)],
            )
            .expect("recorded pose");
    }

    for (pose_index, (elbow, offsets)) in sculpts.iter().enumerate() {
        let skin = arm_skin(*elbow);
        let joints = LiveJoints::from([(0, JointRotation::new(0.0, 0.0, *elbow))]);
        let mut positions = skinned(&skin, &rest);
        let expected = positions.clone();

        let report = deformer
            .evaluate(&EvaluationContext::new(&joints, &skin), &mut positions)
            .expect("evaluation");

        for (index, weight) in report.final_weights.iter().enumerate() {
            let kronecker = if index == pose_index { 1.0 } else { 0.0 };
            assert!((weight - kronecker).abs() < EPS, "pose {index}: {weight}");
        }
        assert!((positions[1] - (expected[1] + offsets[0])).norm() < EPS);
        assert!((positions[2] - (expected[2] + offsets[1])).norm() < EPS);
        assert!((positions[0] - expected[0]).norm() < EPS);
        assert!((positions[3] - expected[3]).norm() < EPS);
    }
}

#[test]
fn given_single_joint_pose_when_moving_away_then_weight_strictly_decreases_to_zero() {
    let mut deformer = PoseSpaceDeformer::new();
    deformer
        .add_pose(Pose::new().with_joint(0, joint(20.0, 90.0)))
        .expect("pose");

    let weights: Vec<f64> = (0..=12)
        .map(|step| {
            let live = live_y(20.0 + 10.0 * step as f64);
            deformer.pose_weights(&live).expect("weights").final_weights[0]
        })
        .collect();

    for pair in weights[..10].windows(2) {
        assert!(pair[0] > pair[1]);
    }
    assert!((weights[0] - 1.0).abs() < EPS);
    assert!(weights[9..].iter().all(|weight| *weight == 0.0));
}

#[test]
fn given_poses_without_shared_joints_when_comparing_then_similarity_is_one_both_ways() {
    let mut deformer = PoseSpaceDeformer::new();
    deformer
        .add_pose(Pose::new().with_joint(0, joint(170.0, 5.0)))
        .expect("pose 0");
    deformer
        .add_pose(
            Pose::new().with_joint(
                1,
                PoseJoint::new(JointRotation::new(-80.0, 0.0, 0.0), 5.0).expect("valid"),
            ),
        )
        .expect("pose 1");

    let similarity = deformer.similarity_matrix();

    assert_eq!(similarity[(0, 1)], 1.0);
    assert_eq!(similarity[(1, 0)], 1.0);
}

#[test]
fn given_two_poses_with_disjoint_joints_when_evaluating_then_pose_matrix_is_singular() {
    let mut deformer = PoseSpaceDeformer::new();
    deformer
        .add_pose(
            Pose::new()
                .with_joint(0, joint(0.0, 90.0))
                .with_target(PoseTarget::new(vec![0], vec![Vector3::x()]).expect("target")),
        )
        .expect("pose 0");
    deformer
        .add_pose(
            Pose::new()
                .with_joint(1, joint(30.0, 90.0))
                .with_target(PoseTarget::new(vec![0], vec![Vector3::y()]).expect("target")),
        )
        .expect("pose 1");
    let skin = identity_skin(1);
    let joints = LiveJoints::from([
        (0, JointRotation::new(0.0, 0.0, 0.0)),
        (1, JointRotation::new(0.0, 30.0, 0.0)),
    ]);
    let mut positions = vec![Point3::origin()];

    let result = deformer.evaluate(&EvaluationContext::new(&joints, &skin), &mut positions);

    assert_eq!(result, Err(PoseSpaceError::SingularPoseMatrix { pose_count: 2 }));
    assert_eq!(positions[0], Point3::origin());
}

#[test]
fn given_identical_poses_when_evaluating_then_failure_is_reported_and_mesh_is_kept() {
    let mut deformer = PoseSpaceDeformer::new();
    for _ in 0..2 {
        deformer
            .add_pose(
                Pose::new()
                    .with_joint(0, joint(15.0, 45.0))
                    .with_target(PoseTarget::new(vec![0], vec![Vector3::x()]).expect("target")),
            )
            .expect("pose");
    }
    let skin = identity_skin(1);
    let joints = live_y(15.0);
    let mut positions = vec![Point3::new(1.0, 1.0, 1.0)];

    let error = deformer
        .evaluate(&EvaluationContext::new(&joints, &skin), &mut positions)
        .expect_err("singular pose set");

    assert!(matches!(error, PoseSpaceError::SingularPoseMatrix { pose_count: 2 }));
    assert_eq!(positions[0], Point3::new(1.0, 1.0, 1.0));
}

#[test]
fn given_pose_with_missing_live_joint_when_evaluating_then_other_poses_still_apply() {
    let mut deformer = PoseSpaceDeformer::new();
    deformer
        .add_pose(
            Pose::new()
                .with_joint(0, joint(0.0, 90.0))
                .with_target(PoseTarget::new(vec![0], vec![Vector3::x()]).expect("target")),
        )
        .expect("pose 0");
    deformer
        .add_pose(
            Pose::new()
                .with_joint(0, joint(60.0, 90.0))
                .with_joint(7, joint(0.0, 90.0))
                .with_target(PoseTarget::new(vec![0], vec![Vector3::y()]).expect("target")),
        )
        .expect("pose 1");
    let skin = identity_skin(1);
    let joints = live_y(0.0);
    let mut positions = vec![Point3::origin()];

    let report = deformer
        .evaluate(&EvaluationContext::new(&joints, &skin), &mut positions)
        .expect("evaluation");

    assert_eq!(report.raw_weights, vec![1.0, 0.0]);
    assert!(positions[0].x > 0.0);
}

#[test]
fn given_envelope_and_paint_weights_when_evaluating_then_offsets_are_scaled() {
    let mut deformer = scenario_deformer(90.0);
    let skin = identity_skin(6);
    let joints = live_y(0.0);
    let paint = [1.0, 1.0, 1.0, 1.0, 1.0, 0.5];
    let context = EvaluationContext::new(&joints, &skin)
        .with_envelope(0.5)
        .with_paint_weights(&paint);
    let mut positions = vec![Point3::origin(); 6];

    deformer.evaluate(&context, &mut positions).expect("evaluation");

    assert!((positions[5] - Point3::new(0.0, 0.25, 0.0)).norm() < EPS);
}

#[test]
fn given_inconsistent_skin_when_evaluating_then_data_error_is_returned() {
    let mut deformer = scenario_deformer(90.0);
    let mut skin = identity_skin(6);
    skin.bind_pre_matrices.insert(3, Matrix4::identity());
    let joints = live_y(0.0);
    let mut positions = vec![Point3::origin(); 6];

    let error = deformer
        .evaluate(&EvaluationContext::new(&joints, &skin), &mut positions)
        .expect_err("mismatched influence lists");

    assert_eq!(
        error,
        PoseSpaceError::MismatchedInfluences {
            bind_only: vec![3],
            current_only: vec![],
        }
    );
    assert!(positions.iter().all(|p| *p == Point3::origin()));
}
