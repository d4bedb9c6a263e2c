use crate::error::FitError;
use crate::quadric::{least_squares, try_invert, QuadricCoefficients};
use nalgebra::{vector, DMatrix, DVector, Vector3};

pub type Center = Vector3<f64>;

pub fn by_zero(_cloud: &[Vector3<f64>]) -> Center {
    Vector3::zeros()
}

pub fn by_bounds(cloud: &[Vector3<f64>]) -> Result<Center, FitError> {
    let (min, max) = bounds(cloud)?;
    Ok((max + min) / 2.0)
}

pub fn by_average(cloud: &[Vector3<f64>]) -> Result<Center, FitError> {
    if cloud.is_empty() {
        return Err(FitError::Underdetermined { needed: 1, got: 0 });
    }
    let sum: Vector3<f64> = cloud.iter().sum();
    Ok(sum / cloud.len() as f64)
}

/// Linearized sphere equation per sample:
/// 2 c . p + (r^2 - |c|^2) = |p|^2, solved for 2c and the constant.
pub fn by_sphere_fit(cloud: &[Vector3<f64>]) -> Result<Center, FitError> {
    // thanks: https://wuyang-li1990.medium.com/point-cloud-sphere-fitting-cc619c0f7ced
    if cloud.len() < 4 {
        return Err(FitError::Underdetermined {
            needed: 4,
            got: cloud.len(),
        });
    }

    let mut a = DMatrix::<f64>::from_element(cloud.len(), 4, 1.0);
    for (row, p) in cloud.iter().enumerate() {
        a[(row, 0)] = p.x;
        a[(row, 1)] = p.y;
        a[(row, 2)] = p.z;
    }
    let f = DVector::from_iterator(cloud.len(), cloud.iter().map(|p| p.norm_squared()));

    let sol = least_squares(a, &f)?;

    Ok(vector![sol[0], sol[1], sol[2]] / 2.0)
}

pub fn by_ellipsoid_fit(quadric: &QuadricCoefficients) -> Result<Center, FitError> {
    let a3 = quadric.form_matrix().fixed_view::<3, 3>(0, 0).into_owned();
    let a3_inv = try_invert(&a3, "ellipsoid quadratic block")?;

    Ok(a3_inv * -quadric.linear_terms())
}

/// Per axis (min, max).
pub(crate) fn bounds(cloud: &[Vector3<f64>]) -> Result<(Vector3<f64>, Vector3<f64>), FitError> {
    let first = cloud
        .first()
        .ok_or(FitError::Underdetermined { needed: 1, got: 0 })?;

    Ok(cloud
        .iter()
        .fold((*first, *first), |(min, max), p| (min.inf(p), max.sup(p))))
}
