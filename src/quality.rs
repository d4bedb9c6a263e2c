// Residuals of a calibration transform: how close does the inverse transform
// bring every sample to the unit sphere?

use crate::error::FitError;
use crate::fit::{apply_homogeneous, CalibrationTransform};
use nalgebra::Vector3;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Residuals {
    /// Standard deviation of the corrected norms. The mean is one, so this is
    /// already relative.
    pub relative_std: f64,
    pub mean_abs_error: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum Grade {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl Grade {
    fn from_thresholds(value: f64, thresholds: [f64; 3]) -> Self {
        match value.abs() {
            v if v < thresholds[0] => Grade::Excellent,
            v if v < thresholds[1] => Grade::Good,
            v if v < thresholds[2] => Grade::Fair,
            _ => Grade::Poor,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Grades {
    pub relative_std: Grade,
    pub mean_abs_error: Grade,
}

impl Residuals {
    pub fn grades(&self) -> Grades {
        Grades {
            relative_std: Grade::from_thresholds(self.relative_std, [0.005, 0.05, 0.5]),
            mean_abs_error: Grade::from_thresholds(self.mean_abs_error, [0.01, 0.1, 1.0]),
        }
    }
}

/// Distance of a corrected norm from one. Shrinking toward zero is mapped
/// onto the same scale as growing toward infinity: a norm of k < 1 scores
/// like a norm of 1 / k.
pub fn relative_distance(norm: f64) -> f64 {
    let d = norm - 1.0;
    if d < 0.0 {
        -1.0 / (d + 1.0) + 1.0
    } else {
        d
    }
}

pub fn evaluate(
    cloud: &[Vector3<f64>],
    transform: &CalibrationTransform,
) -> Result<Residuals, FitError> {
    if cloud.is_empty() {
        return Err(FitError::Underdetermined { needed: 1, got: 0 });
    }

    let inverse = transform.inverse()?;
    let rel_dist: Vec<f64> = cloud
        .iter()
        .map(|p| relative_distance(apply_homogeneous(&inverse, p).norm()))
        .collect();

    let n = rel_dist.len() as f64;
    let mean = rel_dist.iter().map(|d| d + 1.0).sum::<f64>() / n;
    let variance = rel_dist
        .iter()
        .map(|d| {
            let diff = d + 1.0 - mean;
            diff * diff
        })
        .sum::<f64>()
        / n;

    Ok(Residuals {
        relative_std: variance.sqrt(),
        mean_abs_error: rel_dist.iter().map(|d| d.abs()).sum::<f64>() / n,
    })
}
