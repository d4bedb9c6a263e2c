//! Least squares quadric fit
//!
//! Ax^2 + By^2 + Cz^2 + Dxy + Exz + Fyz + Gx + Hy + Iz = 1
//!
//! refs:
//! http://www.juddzone.com/ALGORITHMS/least_squares_3D_ellipsoid.html

use crate::error::FitError;
use nalgebra::{DMatrix, DVector, Matrix3, Matrix4, Vector3};

#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct QuadricCoefficients(pub [f64; 10]);

impl QuadricCoefficients {
    /// One sample per unknown.
    pub const MIN_SAMPLES: usize = 9;

    pub fn coefficients(&self) -> &[f64; 10] {
        &self.0
    }

    /// Symmetric matrix of the quadratic form, scaled by two so the cross and
    /// linear terms need no halving: `X^T M X = 2 * poly(x)` for `X = [x, 1]`.
    pub fn form_matrix(&self) -> Matrix4<f64> {
        let [a, b, c, d, e, f, g, h, i, j] = self.0;

        #[rustfmt::skip]
        let m = Matrix4::new(
            2.0 * a, d, e, g,
            d, 2.0 * b, f, h,
            e, f, 2.0 * c, i,
            g, h, i, 2.0 * j,
        );
        m
    }

    pub fn linear_terms(&self) -> Vector3<f64> {
        Vector3::new(self.0[6], self.0[7], self.0[8])
    }

    pub fn evaluate(&self, p: &Vector3<f64>) -> f64 {
        monomials(p)
            .iter()
            .zip(&self.0[..9])
            .map(|(m, k)| m * k)
            .sum::<f64>()
            + self.0[9]
    }
}

fn monomials(p: &Vector3<f64>) -> [f64; 9] {
    [
        p.x * p.x,
        p.y * p.y,
        p.z * p.z,
        p.x * p.y,
        p.x * p.z,
        p.y * p.z,
        p.x,
        p.y,
        p.z,
    ]
}

pub fn fit(cloud: &[Vector3<f64>]) -> Result<QuadricCoefficients, FitError> {
    if cloud.len() < QuadricCoefficients::MIN_SAMPLES {
        return Err(FitError::Underdetermined {
            needed: QuadricCoefficients::MIN_SAMPLES,
            got: cloud.len(),
        });
    }

    let mut design = DMatrix::<f64>::zeros(cloud.len(), 9);
    for (row, p) in cloud.iter().enumerate() {
        for (col, m) in monomials(p).into_iter().enumerate() {
            design[(row, col)] = m;
        }
    }
    let ones = DVector::<f64>::from_element(cloud.len(), 1.0);

    let sol = least_squares(design, &ones)?;

    // move the 1 to the other side: ... + Iz + J = 0 with J = -1
    let mut coefficients = [0.0; 10];
    coefficients[..9].copy_from_slice(sol.as_slice());
    coefficients[9] = -1.0;

    Ok(QuadricCoefficients(coefficients))
}

/// Minimum norm solution of `a x = b` through the SVD. Fails instead of
/// returning a meaningless solution when `a` has less than full column rank.
pub(crate) fn least_squares(a: DMatrix<f64>, b: &DVector<f64>) -> Result<DVector<f64>, FitError> {
    let needed = a.ncols();
    let longest = a.nrows().max(a.ncols());

    let svd = a.svd(true, true);
    let eps = svd.singular_values.max() * longest as f64 * f64::EPSILON;
    let rank = svd.rank(eps);
    if rank < needed {
        return Err(FitError::RankDeficient { rank, needed });
    }

    svd.solve(b, eps)
        .map_err(|_| FitError::RankDeficient { rank, needed })
}

/// Inverts a 3x3 matrix, rejecting ones whose determinant vanishes relative to
/// their magnitude.
pub(crate) fn try_invert(m: &Matrix3<f64>, what: &'static str) -> Result<Matrix3<f64>, FitError> {
    let scale = m.norm();
    if scale == 0.0 || !scale.is_finite() || m.determinant().abs() <= 1e-12 * scale.powi(3) {
        return Err(FitError::SingularMatrix(what));
    }

    m.try_inverse().ok_or(FitError::SingularMatrix(what))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::synthetic;
    use approx::assert_relative_eq;
    use nalgebra::vector;

    #[test]
    fn fit_passes_through_ellipsoid() {
        let center = vector![10.0, -5.0, 3.0];
        let cloud = synthetic::ellipsoid(300, vector![4.0, 2.0, 1.0], center);

        let q = fit(&cloud).unwrap();
        assert_eq!(q.coefficients()[9], -1.0);

        for p in &cloud {
            assert_relative_eq!(q.evaluate(p), 0.0, epsilon = 1e-8);
        }
        // points away from the surface are not on it
        assert!(q.evaluate(&center).abs() > 1e-3);
    }

    #[test]
    fn fit_unit_sphere() {
        let cloud = synthetic::fibonacci_sphere(100);
        let q = fit(&cloud).unwrap();

        let expected = [1.0, 1.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, -1.0];
        for (k, e) in q.coefficients().iter().zip(expected) {
            assert_relative_eq!(*k, e, epsilon = 1e-9);
        }
    }

    #[test]
    fn too_few_samples() {
        let cloud = synthetic::fibonacci_sphere(8);
        assert_eq!(
            fit(&cloud),
            Err(FitError::Underdetermined { needed: 9, got: 8 })
        );
    }

    #[test]
    fn planar_cloud_is_rank_deficient() {
        let cloud: Vec<_> = (0..40)
            .map(|i| {
                let t = i as f64 * 0.3;
                vector![t.cos() * 3.0, t.sin() * 2.0 + 0.1 * t, 0.0]
            })
            .collect();

        assert!(matches!(
            fit(&cloud),
            Err(FitError::RankDeficient { needed: 9, .. })
        ));
    }

    #[test]
    fn singular_inverse() {
        let m = Matrix3::new(1.0, 2.0, 3.0, 2.0, 4.0, 6.0, 0.0, 1.0, 1.0);
        assert!(try_invert(&m, "m").is_err());
        assert!(try_invert(&Matrix3::zeros(), "m").is_err());

        let inv = try_invert(&Matrix3::from_diagonal(&vector![2.0, 4.0, 8.0]), "m").unwrap();
        assert_relative_eq!(inv, Matrix3::from_diagonal(&vector![0.5, 0.25, 0.125]));
    }
}
