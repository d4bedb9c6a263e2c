use crate::center::{bounds, Center};
use crate::error::FitError;
use crate::quadric::QuadricCoefficients;
use log::warn;
use nalgebra::{Matrix3, Matrix4, SymmetricEigen, Vector3, Vector4};

/// Affine map from the unit sphere onto the raw sample cloud.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CalibrationTransform {
    pub matrix: Matrix4<f64>,
    /// Mean of the per axis scale factors.
    pub avg_scale: f64,
}

impl CalibrationTransform {
    pub fn new(matrix: Matrix4<f64>, avg_scale: f64) -> Self {
        Self { matrix, avg_scale }
    }

    pub fn identity() -> Self {
        Self::new(Matrix4::identity(), 1.0)
    }

    /// translation * rotation * scale * rotation^T
    fn scaled_in_frame(center: &Center, rotation: &Matrix3<f64>, scale: &Vector3<f64>) -> Self {
        let matrix = Matrix4::new_translation(center)
            * rotation.to_homogeneous()
            * Matrix4::new_nonuniform_scaling(scale)
            * rotation.transpose().to_homogeneous();

        Self::new(matrix, scale.mean())
    }

    pub fn linear(&self) -> Matrix3<f64> {
        self.matrix.fixed_view::<3, 3>(0, 0).into_owned()
    }

    pub fn translation(&self) -> Vector3<f64> {
        self.matrix.fixed_view::<3, 1>(0, 3).into_owned()
    }

    pub fn inverse(&self) -> Result<Matrix4<f64>, FitError> {
        self.matrix
            .try_inverse()
            .ok_or(FitError::SingularMatrix("calibration transform"))
    }

    /// Maps a raw sample back toward the unit sphere.
    pub fn correct(&self, raw: &Vector3<f64>) -> Result<Vector3<f64>, FitError> {
        Ok(apply_homogeneous(&self.inverse()?, raw))
    }
}

pub(crate) fn apply_homogeneous(m: &Matrix4<f64>, p: &Vector3<f64>) -> Vector3<f64> {
    (m * Vector4::new(p.x, p.y, p.z, 1.0)).xyz()
}

// Kris Winer's method, which is much simpler if the data is reliable:
// https://github.com/kriswiner/MPU6050/wiki/Simple-and-Effective-Magnetometer-Calibration
pub fn from_axis_aligned_bounding_box(
    cloud: &[Vector3<f64>],
    center: Center,
) -> Result<CalibrationTransform, FitError> {
    let (min, max) = bounds(cloud)?;
    let half_range = (max - min) / 2.0;

    let matrix = Matrix4::new_translation(&center) * Matrix4::new_nonuniform_scaling(&half_range);
    Ok(CalibrationTransform::new(matrix, half_range.mean()))
}

pub fn from_sphere(cloud: &[Vector3<f64>], center: Center) -> Result<CalibrationTransform, FitError> {
    if cloud.is_empty() {
        return Err(FitError::Underdetermined { needed: 1, got: 0 });
    }

    let r_avg = cloud.iter().map(|p| (p - center).norm()).sum::<f64>() / cloud.len() as f64;

    let matrix =
        Matrix4::new_translation(&center) * Matrix4::new_nonuniform_scaling(&Vector3::repeat(r_avg));
    Ok(CalibrationTransform::new(matrix, r_avg))
}

pub fn from_pca(cloud: &[Vector3<f64>], center: Center) -> Result<CalibrationTransform, FitError> {
    const MIN_SAMPLES: usize = 4;

    if cloud.len() < MIN_SAMPLES {
        return Err(FitError::Underdetermined {
            needed: MIN_SAMPLES,
            got: cloud.len(),
        });
    }

    // sample covariance about the cloud's own mean
    let n = cloud.len() as f64;
    let mean = cloud.iter().sum::<Vector3<f64>>() / n;
    let covariance = cloud
        .iter()
        .map(|p| {
            let d = p - mean;
            d * d.transpose()
        })
        .sum::<Matrix3<f64>>()
        / (n - 1.0);

    let eigen = SymmetricEigen::new(covariance);
    let largest = eigen.eigenvalues.max();
    let eps = largest.abs() * 1e-12;
    let rank = eigen.eigenvalues.iter().filter(|v| **v > eps).count();
    if rank < 3 {
        return Err(FitError::RankDeficient { rank, needed: 3 });
    }

    let scale = eigen.eigenvalues.map(|variance| 2.0 * variance.sqrt());

    Ok(CalibrationTransform::scaled_in_frame(
        &center,
        &eigen.eigenvectors,
        &scale,
    ))
}

/// Shape from the quadric moved to `center`. Eigenvalues of the centered
/// quadratic block are 1 / radius^2.
pub fn from_ellipsoid(
    center: Center,
    quadric: &QuadricCoefficients,
) -> Result<CalibrationTransform, FitError> {
    let form = quadric.form_matrix();

    let mut t_ofs = Matrix4::identity();
    t_ofs.fixed_view_mut::<1, 3>(3, 0).copy_from(&center.transpose());
    let r = t_ofs * form * t_ofs.transpose();

    // the quadric has to stay clear of zero at the center, relative to its size
    let s1 = -r[(3, 3)];
    if !s1.is_finite() || s1.abs() <= 1e-9 * form.norm() {
        return Err(FitError::SingularMatrix("quadric at the ellipsoid center"));
    }
    let r3 = r.fixed_view::<3, 3>(0, 0).into_owned() / s1;

    let eigen = SymmetricEigen::new(r3);
    if eigen.eigenvalues.iter().any(|v| *v < 0.0) {
        // a hyperboloid or worse; the radii below still use |eigenvalue|
        warn!(
            "quadric is not an ellipsoid (eigenvalues {:?}), shape fit is unreliable",
            eigen.eigenvalues.as_slice()
        );
    }

    let radii = eigen.eigenvalues.map(|v| (1.0 / v.abs()).sqrt());
    if radii.iter().any(|r| !r.is_finite()) {
        return Err(FitError::SingularMatrix("ellipsoid axes"));
    }

    Ok(CalibrationTransform::scaled_in_frame(
        &center,
        &eigen.eigenvectors,
        &radii,
    ))
}
