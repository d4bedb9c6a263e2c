//! Deterministic point clouds for tests.

use nalgebra::{vector, Vector3};
use std::f64::consts::PI;

/// `n` points spread evenly over the unit sphere.
pub fn fibonacci_sphere(n: usize) -> Vec<Vector3<f64>> {
    let golden_angle = PI * (3.0 - 5f64.sqrt());

    (0..n)
        .map(|i| {
            let y = 1.0 - 2.0 * (i as f64 + 0.5) / n as f64;
            let r = (1.0 - y * y).sqrt();
            let theta = golden_angle * i as f64;
            vector![r * theta.cos(), y, r * theta.sin()]
        })
        .collect()
}

pub fn ellipsoid(n: usize, radii: Vector3<f64>, center: Vector3<f64>) -> Vec<Vector3<f64>> {
    fibonacci_sphere(n)
        .iter()
        .map(|p| p.component_mul(&radii) + center)
        .collect()
}

/// The six axis extremes of an axis-aligned ellipsoid.
pub fn axis_points(radii: Vector3<f64>, center: Vector3<f64>) -> Vec<Vector3<f64>> {
    (0..3)
        .flat_map(|axis| {
            let mut e = Vector3::zeros();
            e[axis] = radii[axis];
            [center + e, center - e]
        })
        .collect()
}
