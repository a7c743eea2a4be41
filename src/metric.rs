//! Pluggable "closeness" functions between two points.
//!
//! Distances only need to be symmetric and non-negative; none of the
//! built-in metrics take a square root, so they compare cheaply.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::DitherError;
use crate::geom::Point;

/// A distance function usable by the clustering engine and the k-d tree.
pub trait Metric: Sync {
    /// Distance between two points of the same dimension.
    fn distance(&self, a: &Point, b: &Point) -> f64;

    /// Smallest point dimension the metric can work on.
    fn min_dimension(&self) -> usize {
        1
    }

    /// Lower bound on the distance contributed by a coordinate difference
    /// `diff` along `axis`. The k-d tree uses it as the hyperplane distance.
    fn axis_bound(&self, _axis: usize, diff: f64) -> f64 {
        diff * diff
    }

    fn name(&self) -> &str {
        "custom"
    }
}

impl<F> Metric for F
where
    F: Fn(&Point, &Point) -> f64 + Sync,
{
    fn distance(&self, a: &Point, b: &Point) -> f64 {
        self(a, b)
    }
}

/// Built-in distance metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum DistanceMetric {
    /// Squared euclidean distance.
    Euclidean,
    /// Perceptual colour distance weighting red and blue by average redness.
    /// Only the first three coordinates (r, g, b) are compared.
    #[default]
    #[serde(alias = "redmean")]
    RedMean,
}

impl Metric for DistanceMetric {
    fn distance(&self, a: &Point, b: &Point) -> f64 {
        match self {
            DistanceMetric::Euclidean => squared_euclidean(&a.coords, &b.coords),
            DistanceMetric::RedMean => red_mean(&a.coords, &b.coords),
        }
    }

    fn min_dimension(&self) -> usize {
        match self {
            DistanceMetric::Euclidean => 1,
            DistanceMetric::RedMean => 3,
        }
    }

    fn axis_bound(&self, axis: usize, diff: f64) -> f64 {
        match self {
            DistanceMetric::Euclidean => diff * diff,
            // Every channel weight is at least 1 for values in 0..=255;
            // alpha and beyond never contribute.
            DistanceMetric::RedMean if axis < 3 => diff * diff,
            DistanceMetric::RedMean => 0.0,
        }
    }

    fn name(&self) -> &str {
        match self {
            DistanceMetric::Euclidean => "euclidean",
            DistanceMetric::RedMean => "red-mean",
        }
    }
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for DistanceMetric {
    type Err = DitherError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "euclidean" | "euclidian" => Ok(Self::Euclidean),
            "red-mean" | "redmean" => Ok(Self::RedMean),
            other => Err(DitherError::InvalidConfig(format!(
                "unsupported distance metric '{other}'"
            ))),
        }
    }
}

/// Sum of squared coordinate differences.
pub fn squared_euclidean(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let diff = x - y;
            diff * diff
        })
        .sum()
}

/// Redmean colour distance over the first three channels.
///
/// # Panics
///
/// If either slice has fewer than three elements.
pub fn red_mean(a: &[f64], b: &[f64]) -> f64 {
    let red_mean = (a[0] + b[0]) / 2.0;
    let dr = a[0] - b[0];
    let dg = a[1] - b[1];
    let db = a[2] - b[2];

    (2.0 + red_mean / 256.0) * dr * dr
        + 4.0 * dg * dg
        + (2.0 + (255.0 - red_mean) / 256.0) * db * db
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(coords: &[f64]) -> Point {
        Point::new(coords.to_vec(), 0)
    }

    #[test]
    fn euclidean_is_squared() {
        let d = DistanceMetric::Euclidean.distance(&p(&[0.0, 0.0]), &p(&[3.0, 4.0]));
        assert_eq!(d, 25.0);
    }

    #[test]
    fn red_mean_weights_channels() {
        let black = p(&[0.0, 0.0, 0.0, 255.0]);
        let green = p(&[0.0, 10.0, 0.0, 255.0]);
        assert_eq!(DistanceMetric::RedMean.distance(&black, &green), 400.0);

        let red = p(&[10.0, 0.0, 0.0, 0.0]);
        // red mean = 5 -> weight 2 + 5/256
        let expected = (2.0 + 5.0 / 256.0) * 100.0;
        let got = DistanceMetric::RedMean.distance(&black, &red);
        assert!((got - expected).abs() < 1e-12);
    }

    #[test]
    fn red_mean_ignores_alpha() {
        let a = p(&[10.0, 20.0, 30.0, 0.0]);
        let b = p(&[10.0, 20.0, 30.0, 255.0]);
        assert_eq!(DistanceMetric::RedMean.distance(&a, &b), 0.0);
        assert_eq!(DistanceMetric::RedMean.axis_bound(3, 255.0), 0.0);
    }

    #[test]
    fn metrics_are_symmetric() {
        let a = p(&[12.0, 200.0, 3.0]);
        let b = p(&[250.0, 1.0, 99.0]);
        for metric in [DistanceMetric::Euclidean, DistanceMetric::RedMean] {
            assert_eq!(metric.distance(&a, &b), metric.distance(&b, &a));
        }
    }

    #[test]
    fn parses_names() {
        assert_eq!(
            "RedMean".parse::<DistanceMetric>().unwrap(),
            DistanceMetric::RedMean
        );
        assert_eq!(
            "euclidean".parse::<DistanceMetric>().unwrap(),
            DistanceMetric::Euclidean
        );
        assert!("manhattan".parse::<DistanceMetric>().is_err());
        let json = serde_json::to_string(&DistanceMetric::RedMean).unwrap();
        assert_eq!(json, "\"red-mean\"");
    }

    #[test]
    fn closures_are_metrics() {
        let manhattan = |a: &Point, b: &Point| -> f64 {
            a.coords
                .iter()
                .zip(&b.coords)
                .map(|(x, y)| (x - y).abs())
                .sum()
        };
        assert_eq!(manhattan.distance(&p(&[1.0, 1.0]), &p(&[2.0, 3.0])), 3.0);
        assert_eq!(manhattan.name(), "custom");
    }
}
