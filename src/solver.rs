use nalgebra::DMatrix;

use crate::error::{PoseSpaceError, Result};
use crate::logging::format_matrix_table;
use crate::types::{Pose, falloff_weight};

/// Similarity of two poses seen from each other.
///
/// Returns `(i_sees_j, j_sees_i)`. Every joint of `pose_i` is compared with
/// the same joint of `pose_j`: `i_sees_j` uses `pose_j`'s falloff and
/// `j_sees_i` uses `pose_i`'s falloff. When `pose_j` lacks one of
/// `pose_i`'s joints the pair cannot be compared and both directions are 1.
///
/// # Arguments
///
/// * `pose_i` - Pose whose joints drive the comparison.
/// * `pose_j` - Pose being compared against.
///
/// # Returns
///
/// The two directed similarity values.
pub fn pair_similarity(pose_i: &Pose, pose_j: &Pose) -> (f64, f64) {
    let mut i_sees_j = 1.0;
    let mut j_sees_i = 1.0;

    for (joint, sample_i) in pose_i.joints() {
        let Some(sample_j) = pose_j.joint(*joint) else {
            return (1.0, 1.0);
        };

        let distance = sample_i.rotation.distance_to(&sample_j.rotation);
        i_sees_j *= falloff_weight(distance, sample_j.falloff);
        j_sees_i *= falloff_weight(distance, sample_i.falloff);
    }

    (i_sees_j, j_sees_i)
}

/// Builds the pose-to-pose similarity matrix `P` over a dense pose list.
///
/// `P[i][j]` is how visible pose `j` is from pose `i`. The diagonal is 1 and
/// the matrix is generally asymmetric.
pub fn similarity_matrix(poses: &[&Pose]) -> DMatrix<f64> {
    let n = poses.len();
    let mut matrix = DMatrix::identity(n, n);

    for i in 0..n {
        for j in (i + 1)..n {
            let (i_sees_j, j_sees_i) = pair_similarity(poses[i], poses[j]);
            matrix[(i, j)] = i_sees_j;
            matrix[(j, i)] = j_sees_i;
        }
    }

    matrix
}

/// Solves `P · X = I` for the correction matrix `X` with LU decomposition
/// and partial pivoting.
///
/// # Arguments
///
/// * `similarity` - Square pose-to-pose similarity matrix.
/// * `pivot_tolerance` - Pivots with a smaller magnitude count as zero.
///
/// # Errors
///
/// Returns `PoseSpaceError::SingularPoseMatrix` when `P` is rank-deficient,
/// which happens when two or more poses share the same joints, rotations and
/// falloffs.
pub fn solve_correction_matrix(
    similarity: &DMatrix<f64>,
    pivot_tolerance: f64,
) -> Result<DMatrix<f64>> {
    let n = similarity.nrows();
    if n == 0 {
        return Ok(DMatrix::zeros(0, 0));
    }
    let singular = PoseSpaceError::SingularPoseMatrix { pose_count: n };

    let lu = similarity.clone().lu();
    if lu.u().diagonal().iter().any(|pivot| pivot.abs() < pivot_tolerance) {
        return Err(singular);
    }

    lu.solve(&DMatrix::identity(n, n)).ok_or(singular)
}

/// Full solver pass: similarity matrix, then correction matrix.
pub fn solve_pose_weights(poses: &[&Pose], pivot_tolerance: f64) -> Result<DMatrix<f64>> {
    let similarity = similarity_matrix(poses);
    log::debug!("{}", format_matrix_table("Pose-to-pose similarity", &similarity));

    let correction = solve_correction_matrix(&similarity, pivot_tolerance)?;
    log::debug!("{}", format_matrix_table("Pose correction", &correction));

    Ok(correction)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{JointRotation, PoseJoint};

    fn pose(joints: &[(usize, [f64; 3], f64)]) -> Pose {
        joints
            .iter()
            .fold(Pose::new(), |pose, (joint, [x, y, z], falloff)| {
                let sample = PoseJoint::new(JointRotation::new(*x, *y, *z), *falloff)
                    .expect("valid falloff");
                pose.with_joint(*joint, sample)
            })
    }

    #[test]
    fn given_shared_joint_when_comparing_then_each_side_uses_the_other_falloff() {
        let a = pose(&[(0, [0.0, 0.0, 0.0], 90.0)]);
        let b = pose(&[(0, [0.0, 45.0, 0.0], 180.0)]);

        let (a_sees_b, b_sees_a) = pair_similarity(&a, &b);

        assert!((a_sees_b - 0.75).abs() < 1e-12);
        assert!((b_sees_a - 0.5).abs() < 1e-12);
    }

    #[test]
    fn given_disjoint_joint_sets_when_comparing_then_both_directions_are_one() {
        let a = pose(&[(0, [10.0, 0.0, 0.0], 5.0)]);
        let b = pose(&[(1, [0.0, 170.0, 0.0], 5.0)]);

        let matrix = similarity_matrix(&[&a, &b]);

        assert_eq!(matrix[(0, 1)], 1.0);
        assert_eq!(matrix[(1, 0)], 1.0);
    }

    #[test]
    fn given_multi_joint_poses_when_comparing_then_joint_weights_multiply() {
        let a = pose(&[(0, [0.0, 0.0, 0.0], 100.0), (1, [0.0, 0.0, 0.0], 100.0)]);
        let b = pose(&[(0, [50.0, 0.0, 0.0], 100.0), (1, [0.0, 0.0, 20.0], 100.0)]);

        let (a_sees_b, _) = pair_similarity(&a, &b);

        assert!((a_sees_b - 0.5 * 0.8).abs() < 1e-12);
    }

    #[test]
    fn given_overlapping_poses_when_solving_then_product_is_identity() {
        let a = pose(&[(0, [0.0, 0.0, 0.0], 180.0)]);
        let b = pose(&[(0, [0.0, 90.0, 0.0], 180.0)]);
        let poses = [&a, &b];

        let similarity = similarity_matrix(&poses);
        let correction = solve_correction_matrix(&similarity, 1e-12).expect("solvable");

        let expected =
            DMatrix::from_row_slice(2, 2, &[4.0 / 3.0, -2.0 / 3.0, -2.0 / 3.0, 4.0 / 3.0]);
        assert!((&correction - expected).norm() < 1e-12);
        assert!((similarity * correction - DMatrix::identity(2, 2)).norm() < 1e-12);
    }

    #[test]
    fn given_duplicate_poses_when_solving_then_singular_error_is_returned() {
        let a = pose(&[(0, [0.0, 30.0, 0.0], 90.0)]);
        let b = pose(&[(0, [0.0, 30.0, 0.0], 90.0)]);
        let c = pose(&[(0, [0.0, -60.0, 0.0], 90.0)]);

        let result = solve_pose_weights(&[&a, &b, &c], 1e-12);

        assert_eq!(result, Err(PoseSpaceError::SingularPoseMatrix { pose_count: 3 }));
    }

    #[test]
    fn given_no_poses_when_solving_then_empty_matrix_is_returned() {
        let correction = solve_pose_weights(&[], 1e-12).expect("empty system");

        assert_eq!(correction.nrows(), 0);
    }
}
