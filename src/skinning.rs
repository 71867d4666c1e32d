use std::collections::BTreeMap;

use nalgebra::{Matrix3, Matrix4, Point3, Vector3};

use crate::error::{PoseSpaceError, Result};
use crate::types::{InfluenceIndex, VertexIndex};

/// One skinning weight of a vertex.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Influence {
    pub index: InfluenceIndex,
    pub weight: f64,
}

impl Influence {
    pub fn new(index: InfluenceIndex, weight: f64) -> Self {
        Self { index, weight }
    }
}

/// Skinning state handed over by the skinning collaborator.
///
/// All matrices use nalgebra's column-vector convention.
#[derive(Debug, Clone)]
pub struct SkinCluster {
    /// Bind-pose world matrix of the deformed geometry.
    pub geometry_world: Matrix4<f64>,
    /// Inverse bind matrix of each influence.
    pub bind_pre_matrices: BTreeMap<InfluenceIndex, Matrix4<f64>>,
    /// Current world matrix of each influence.
    pub influence_matrices: BTreeMap<InfluenceIndex, Matrix4<f64>>,
    /// Sparse weights per vertex. Vertices past the end have no influences.
    pub weights: Vec<Vec<Influence>>,
}

impl SkinCluster {
    pub fn new(geometry_world: Matrix4<f64>) -> Self {
        Self {
            geometry_world,
            bind_pre_matrices: BTreeMap::new(),
            influence_matrices: BTreeMap::new(),
            weights: Vec::new(),
        }
    }

    /// Registers an influence with its inverse bind and current world matrix.
    pub fn with_influence(
        mut self,
        index: InfluenceIndex,
        bind_pre_matrix: Matrix4<f64>,
        world_matrix: Matrix4<f64>,
    ) -> Self {
        self.bind_pre_matrices.insert(index, bind_pre_matrix);
        self.influence_matrices.insert(index, world_matrix);
        self
    }

    pub fn with_weights(mut self, weights: Vec<Vec<Influence>>) -> Self {
        self.weights = weights;
        self
    }

    pub fn influences(&self, vertex: VertexIndex) -> &[Influence] {
        self.weights.get(vertex).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Computes `world⁻¹ · current · bindInverse · world` for every influence.
    ///
    /// This is the column-vector form of the row-vector product
    /// `world · bindInverse · current · world⁻¹`: it maps a bind-space
    /// vector of the geometry to where linear blend skinning puts it.
    ///
    /// # Errors
    ///
    /// Returns `PoseSpaceError::MismatchedInfluences` when the bind and
    /// current matrix lists do not name the same influences, and
    /// `PoseSpaceError::NonInvertibleMatrix` when the geometry world matrix is
    /// singular.
    pub fn skin_transforms(&self) -> Result<SkinTransforms> {
        let bind_only: Vec<InfluenceIndex> = self
            .bind_pre_matrices
            .keys()
            .filter(|index| !self.influence_matrices.contains_key(index))
            .copied()
            .collect();
        let current_only: Vec<InfluenceIndex> = self
            .influence_matrices
            .keys()
            .filter(|index| !self.bind_pre_matrices.contains_key(index))
            .copied()
            .collect();
        if !bind_only.is_empty() || !current_only.is_empty() {
            return Err(PoseSpaceError::MismatchedInfluences {
                bind_only,
                current_only,
            });
        }

        let world_inverse =
            self.geometry_world
                .try_inverse()
                .ok_or_else(|| PoseSpaceError::NonInvertibleMatrix {
                    context: "geometry world matrix".to_string(),
                })?;

        let matrices = self
            .bind_pre_matrices
            .iter()
            .map(|(index, bind_pre)| {
                let current = &self.influence_matrices[index];
                (
                    *index,
                    world_inverse * current * bind_pre * self.geometry_world,
                )
            })
            .collect();

        Ok(SkinTransforms { matrices })
    }
}

/// Per-influence skin transforms for one evaluation or recording pass.
#[derive(Debug, Clone, Default)]
pub struct SkinTransforms {
    matrices: BTreeMap<InfluenceIndex, Matrix4<f64>>,
}

impl SkinTransforms {
    pub fn get(&self, index: InfluenceIndex) -> Option<&Matrix4<f64>> {
        self.matrices.get(&index)
    }

    /// Weighted sum of the skin transforms influencing `vertex`.
    ///
    /// A vertex without influences gets the identity.
    pub fn blended_matrix(
        &self,
        vertex: VertexIndex,
        influences: &[Influence],
    ) -> Result<Matrix4<f64>> {
        if influences.is_empty() {
            return Ok(Matrix4::identity());
        }

        influences
            .iter()
            .try_fold(Matrix4::zeros(), |blended, influence| -> Result<Matrix4<f64>> {
                let matrix =
                    self.get(influence.index)
                        .ok_or(PoseSpaceError::UnknownInfluence {
                            vertex,
                            influence: influence.index,
                        })?;
                Ok(blended + *matrix * influence.weight)
            })
    }

    /// Linear blend skinning of a bind-space point.
    pub fn deform_point(
        &self,
        vertex: VertexIndex,
        influences: &[Influence],
        point: &Point3<f64>,
    ) -> Result<Point3<f64>> {
        let matrix = self.blended_matrix(vertex, influences)?;
        Ok(matrix.transform_point(point))
    }
}

fn linear_block(matrix: &Matrix4<f64>) -> Matrix3<f64> {
    matrix.fixed_view::<3, 3>(0, 0).into_owned()
}

/// Carries a bind-space delta into skin space. Translation does not apply to
/// displacements.
pub fn bind_to_skin(delta: &Vector3<f64>, blended: &Matrix4<f64>) -> Vector3<f64> {
    linear_block(blended) * delta
}

/// Inverse of [`bind_to_skin`]. Returns `None` when the blended matrix
/// collapses space (for example a vertex whose weights sum to zero).
pub fn skin_to_bind(delta: &Vector3<f64>, blended: &Matrix4<f64>) -> Option<Vector3<f64>> {
    linear_block(blended)
        .try_inverse()
        .map(|inverse| inverse * delta)
}
