//! Typed tuning knobs passed explicitly into clustering and palette builds.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{DitherError, Result};
use crate::metric::DistanceMetric;

/// Configurable knobs for one k-means run.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ClusteringConfig {
    /// Largest centroid change, in percent of the bounding-box distance,
    /// that still counts as a stable iteration.
    pub accuracy_percent: f64,
    /// Stable iterations required in a row before declaring convergence.
    pub consecutive_stable: usize,
    /// Hard cap on iterations, converged or not.
    pub max_iterations: usize,
    /// Upper bound on points handled by one round of assignment workers.
    pub max_batch_size: usize,
    /// Number of assignment workers; `None` uses the rayon pool size.
    pub workers: Option<usize>,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            accuracy_percent: 0.01,
            consecutive_stable: 2,
            max_iterations: 100,
            max_batch_size: 30_000,
            workers: None,
        }
    }
}

impl ClusteringConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.accuracy_percent.is_finite() || self.accuracy_percent <= 0.0 {
            return Err(DitherError::InvalidConfig(
                "accuracy_percent must be a positive number".into(),
            ));
        }
        if self.consecutive_stable == 0 {
            return Err(DitherError::InvalidConfig(
                "consecutive_stable must be at least 1".into(),
            ));
        }
        if self.max_iterations == 0 {
            return Err(DitherError::InvalidConfig(
                "max_iterations must be greater than zero".into(),
            ));
        }
        if self.max_batch_size == 0 {
            return Err(DitherError::InvalidConfig(
                "max_batch_size must be greater than zero".into(),
            ));
        }
        if self.workers == Some(0) {
            return Err(DitherError::InvalidConfig(
                "workers must be at least 1 when set".into(),
            ));
        }
        Ok(())
    }

    /// Resolve the worker count against the current rayon pool.
    pub fn worker_count(&self) -> usize {
        self.workers
            .unwrap_or_else(rayon::current_num_threads)
            .max(1)
    }
}

/// How many independently seeded runs to make and how to schedule them.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct RestartConfig {
    /// Number of random restarts (best run selected by total error).
    pub restarts: usize,
    /// Run restarts concurrently rather than one after another.
    pub parallel: bool,
}

impl Default for RestartConfig {
    fn default() -> Self {
        Self {
            restarts: 3,
            parallel: false,
        }
    }
}

impl RestartConfig {
    pub fn validate(&self) -> Result<()> {
        if self.restarts == 0 {
            return Err(DitherError::InvalidConfig(
                "restarts must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Settings for extracting a colour palette from an image.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct PaletteConfig {
    /// Number of palette colours.
    pub k: usize,
    /// Sample every `sample_factor`-th pixel along both axes.
    pub sample_factor: usize,
    pub metric: DistanceMetric,
    /// Reduce the samples to bucket means of a depth-limited k-d tree first.
    pub mean_cut_depth: Option<usize>,
    pub seed: u64,
    pub restarts: RestartConfig,
    pub clustering: ClusteringConfig,
}

impl Default for PaletteConfig {
    fn default() -> Self {
        Self {
            k: 8,
            sample_factor: 5,
            metric: DistanceMetric::RedMean,
            mean_cut_depth: None,
            seed: 42,
            restarts: RestartConfig::default(),
            clustering: ClusteringConfig::default(),
        }
    }
}

impl PaletteConfig {
    pub fn validate(&self) -> Result<()> {
        if self.k == 0 {
            return Err(DitherError::InvalidConfig(
                "k must be greater than zero".into(),
            ));
        }
        if self.sample_factor == 0 {
            return Err(DitherError::InvalidConfig(
                "sample_factor must be greater than zero".into(),
            ));
        }
        self.restarts.validate()?;
        self.clustering.validate()
    }

    /// Load a configuration from a JSON file; missing fields take defaults.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        ClusteringConfig::default().validate().unwrap();
        RestartConfig::default().validate().unwrap();
        PaletteConfig::default().validate().unwrap();
    }

    #[test]
    fn rejects_bad_values() {
        let bad = [
            ClusteringConfig {
                accuracy_percent: 0.0,
                ..ClusteringConfig::default()
            },
            ClusteringConfig {
                accuracy_percent: f64::NAN,
                ..ClusteringConfig::default()
            },
            ClusteringConfig {
                consecutive_stable: 0,
                ..ClusteringConfig::default()
            },
            ClusteringConfig {
                max_iterations: 0,
                ..ClusteringConfig::default()
            },
            ClusteringConfig {
                max_batch_size: 0,
                ..ClusteringConfig::default()
            },
            ClusteringConfig {
                workers: Some(0),
                ..ClusteringConfig::default()
            },
        ];
        for config in bad {
            assert!(matches!(
                config.validate(),
                Err(DitherError::InvalidConfig(_))
            ));
        }

        let palette = PaletteConfig {
            sample_factor: 0,
            ..PaletteConfig::default()
        };
        assert!(palette.validate().is_err());
        let palette = PaletteConfig {
            restarts: RestartConfig {
                restarts: 0,
                parallel: true,
            },
            ..PaletteConfig::default()
        };
        assert!(palette.validate().is_err());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{ "k": 4, "metric": "euclidean", "clustering": { "max_iterations": 7 } }"#,
        )
        .unwrap();
        let config = PaletteConfig::from_json_file(&path).unwrap();
        assert_eq!(config.k, 4);
        assert_eq!(config.metric, DistanceMetric::Euclidean);
        assert_eq!(config.clustering.max_iterations, 7);
        assert_eq!(config.clustering.consecutive_stable, 2);
        assert_eq!(config.sample_factor, 5);
        assert_eq!(config.restarts.restarts, 3);
    }

    #[test]
    fn worker_count_honours_override() {
        let config = ClusteringConfig {
            workers: Some(3),
            ..ClusteringConfig::default()
        };
        assert_eq!(config.worker_count(), 3);
        assert!(ClusteringConfig::default().worker_count() >= 1);
    }
}
