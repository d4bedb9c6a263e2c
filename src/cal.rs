use crate::center;
use crate::data_provider::DataSelector;
use crate::error::{ConfigError, FitError};
use crate::fit::{self, CalibrationTransform};
use crate::quadric::{self, QuadricCoefficients};
use crate::quality::{self, Grades, Residuals};
use crate::store::SampleStore;
use log::{debug, warn};
use nalgebra::Vector3;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CenterStrategy {
    Zero,
    Bounds,
    Average,
    Sphere,
    Ellipsoid,
}

impl CenterStrategy {
    pub const ALL: [CenterStrategy; 5] = [
        CenterStrategy::Zero,
        CenterStrategy::Bounds,
        CenterStrategy::Average,
        CenterStrategy::Sphere,
        CenterStrategy::Ellipsoid,
    ];

    pub fn label(self) -> &'static str {
        match self {
            CenterStrategy::Zero => "Zero",
            CenterStrategy::Bounds => "Bounds",
            CenterStrategy::Average => "Avg",
            CenterStrategy::Sphere => "Sphere",
            CenterStrategy::Ellipsoid => "Ellipsoid",
        }
    }
}

impl fmt::Display for CenterStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for CenterStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "zero" => Ok(CenterStrategy::Zero),
            "bounds" => Ok(CenterStrategy::Bounds),
            "avg" | "average" => Ok(CenterStrategy::Average),
            "sphere" => Ok(CenterStrategy::Sphere),
            "ellipsoid" => Ok(CenterStrategy::Ellipsoid),
            _ => Err(ConfigError::UnknownStrategy(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShapeStrategy {
    #[serde(rename = "aabb")]
    AxisAlignedBoundingBox,
    Pca,
    Sphere,
    Ellipsoid,
}

impl ShapeStrategy {
    pub const ALL: [ShapeStrategy; 4] = [
        ShapeStrategy::AxisAlignedBoundingBox,
        ShapeStrategy::Pca,
        ShapeStrategy::Sphere,
        ShapeStrategy::Ellipsoid,
    ];

    pub fn label(self) -> &'static str {
        match self {
            ShapeStrategy::AxisAlignedBoundingBox => "AABB",
            ShapeStrategy::Pca => "PCA",
            ShapeStrategy::Sphere => "Sphere",
            ShapeStrategy::Ellipsoid => "Ellipsoid",
        }
    }
}

impl fmt::Display for ShapeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for ShapeStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "aabb" => Ok(ShapeStrategy::AxisAlignedBoundingBox),
            "pca" => Ok(ShapeStrategy::Pca),
            "sphere" => Ok(ShapeStrategy::Sphere),
            "ellipsoid" => Ok(ShapeStrategy::Ellipsoid),
            _ => Err(ConfigError::UnknownStrategy(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    Center,
    Shape,
}

pub fn list_strategies(kind: StrategyKind) -> Vec<&'static str> {
    match kind {
        StrategyKind::Center => CenterStrategy::ALL.iter().map(|s| s.label()).collect(),
        StrategyKind::Shape => ShapeStrategy::ALL.iter().map(|s| s.label()).collect(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct FitLabels {
    pub data: &'static str,
    pub center: &'static str,
    pub shape: &'static str,
}

impl FitLabels {
    pub fn new(data: DataSelector, center: CenterStrategy, shape: ShapeStrategy) -> Self {
        Self {
            data: data.label(),
            center: center.label(),
            shape: shape.label(),
        }
    }
}

impl fmt::Display for FitLabels {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, {}, {}", self.data, self.center, self.shape)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct Fit {
    pub transform: CalibrationTransform,
    pub labels: FitLabels,
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("{labels}: fit unavailable, collect more data ({error})")]
pub struct FitFailure {
    pub labels: FitLabels,
    #[source]
    pub error: FitError,
}

/// Runs one center strategy followed by one shape strategy. An ellipsoid
/// quadric is only fitted once when both strategies need it.
pub fn fit_cloud(
    cloud: &[Vector3<f64>],
    center: CenterStrategy,
    shape: ShapeStrategy,
) -> Result<CalibrationTransform, FitError> {
    let mut cached: Option<QuadricCoefficients> = None;

    let c = match center {
        CenterStrategy::Zero => center::by_zero(cloud),
        CenterStrategy::Bounds => center::by_bounds(cloud)?,
        CenterStrategy::Average => center::by_average(cloud)?,
        CenterStrategy::Sphere => center::by_sphere_fit(cloud)?,
        CenterStrategy::Ellipsoid => {
            center::by_ellipsoid_fit(cached.insert(quadric::fit(cloud)?))?
        }
    };

    match shape {
        ShapeStrategy::AxisAlignedBoundingBox => fit::from_axis_aligned_bounding_box(cloud, c),
        ShapeStrategy::Pca => fit::from_pca(cloud, c),
        ShapeStrategy::Sphere => fit::from_sphere(cloud, c),
        ShapeStrategy::Ellipsoid => {
            let q = match cached {
                Some(q) => q,
                None => quadric::fit(cloud)?,
            };
            fit::from_ellipsoid(c, &q)
        }
    }
}

pub fn compute_fit(
    store: &SampleStore,
    data: DataSelector,
    center: CenterStrategy,
    shape: ShapeStrategy,
) -> Result<Fit, FitFailure> {
    let labels = FitLabels::new(data, center, shape);
    let cloud = store.cloud(data);
    debug!("fitting {labels} on {} samples", cloud.len());

    match fit_cloud(&cloud, center, shape) {
        Ok(transform) => Ok(Fit { transform, labels }),
        Err(error) => {
            warn!("{labels}: {error}");
            Err(FitFailure { labels, error })
        }
    }
}

pub fn evaluate_fit(
    store: &SampleStore,
    data: DataSelector,
    transform: &CalibrationTransform,
) -> Result<Residuals, FitError> {
    quality::evaluate(&store.cloud(data), transform)
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct CalibrationReport {
    pub fit: Fit,
    pub residuals: Residuals,
    pub grades: Grades,
    pub samples: usize,
}

impl CalibrationReport {
    pub fn new(fit: Fit, residuals: Residuals, samples: usize) -> Self {
        Self {
            fit,
            grades: residuals.grades(),
            residuals,
            samples,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::synthetic;
    use approx::assert_relative_eq;
    use nalgebra::{vector, Matrix3};

    #[test]
    fn strategies_listed_in_order() {
        assert_eq!(
            list_strategies(StrategyKind::Center),
            ["Zero", "Bounds", "Avg", "Sphere", "Ellipsoid"]
        );
        assert_eq!(
            list_strategies(StrategyKind::Shape),
            ["AABB", "PCA", "Sphere", "Ellipsoid"]
        );
    }

    #[test]
    fn strategies_from_str() {
        for s in CenterStrategy::ALL {
            assert_eq!(s.label().parse::<CenterStrategy>().unwrap(), s);
        }
        for s in ShapeStrategy::ALL {
            assert_eq!(s.label().parse::<ShapeStrategy>().unwrap(), s);
        }
        assert!(matches!(
            "median".parse::<CenterStrategy>(),
            Err(ConfigError::UnknownStrategy(name)) if name == "median"
        ));
    }

    #[test]
    fn every_combination_fits_an_ellipsoid() {
        let c = vector![5.0, -3.0, 2.0];
        let cloud = synthetic::ellipsoid(300, vector![3.0, 2.5, 2.0], c);

        for center in CenterStrategy::ALL {
            for shape in ShapeStrategy::ALL {
                let t = fit_cloud(&cloud, center, shape).unwrap();
                assert!(t.avg_scale > 0.0, "{center} {shape}");
                assert!(quality::evaluate(&cloud, &t).is_ok(), "{center} {shape}");
            }
        }
    }

    #[test]
    fn ellipsoid_pair_is_exact() {
        let c = vector![5.0, -3.0, 2.0];
        let cloud = synthetic::ellipsoid(300, vector![3.0, 2.5, 2.0], c);

        let t = fit_cloud(&cloud, CenterStrategy::Ellipsoid, ShapeStrategy::Ellipsoid).unwrap();
        assert_relative_eq!(t.translation(), c, epsilon = 1e-6);
        assert_relative_eq!(
            t.linear(),
            Matrix3::from_diagonal(&vector![3.0, 2.5, 2.0]),
            epsilon = 1e-6
        );
    }

    #[test]
    fn too_few_samples_is_labelled() {
        let cloud = synthetic::fibonacci_sphere(5);
        let err = fit_cloud(&cloud, CenterStrategy::Bounds, ShapeStrategy::Ellipsoid).unwrap_err();
        assert!(err.is_underdetermined());

        let failure = FitFailure {
            labels: FitLabels::new(
                DataSelector::Magnetometer,
                CenterStrategy::Bounds,
                ShapeStrategy::Ellipsoid,
            ),
            error: err,
        };
        assert_eq!(
            failure.to_string(),
            "Mag, Bounds, Ellipsoid: fit unavailable, collect more data (need at least 9 samples, got 5)"
        );
    }
}
