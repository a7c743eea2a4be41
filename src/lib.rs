//! Parallel k-means clustering and k-d tree nearest-neighbour search, put
//! together into colour palette extraction and error-diffusion dithering.
//!
//! The building blocks are usable on their own:
//!
//! * [`PointSet`] holds points of one dimension and the primitives the
//!   algorithms are made of (means, bounds, median splits, worker chunks).
//! * [`Clustering`] runs k-means with concurrent assignment and update
//!   phases; [`best_of_restarts`] keeps the lowest-error of several runs.
//! * [`KdTree`] answers exact nearest-neighbour queries under any
//!   [`Metric`]; [`BucketTree`] and [`mean_cut`] reduce a set to bucket
//!   means.
//! * [`build_palette`], [`PaletteMapper`] and [`floyd_steinberg`] turn
//!   pixels into a palette and a dithered image.
//!
//! ```no_run
//! use palette_dither::{build_palette, floyd_steinberg, PaletteConfig, PaletteMapper, PixelGrid};
//!
//! # fn main() -> palette_dither::Result<()> {
//! let grid = PixelGrid::filled(64, 64, [200, 120, 40, 255]);
//! let config = PaletteConfig::default();
//! let run = build_palette(&grid, &config)?;
//! let mapper = PaletteMapper::new(run.palette, config.metric)?;
//! let dithered = floyd_steinberg(&grid, &mapper);
//! assert_eq!(dithered.indices.len(), 64 * 64);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dither;
pub mod error;
pub mod geom;
pub mod io;
pub mod kdtree;
pub mod kmeans;
pub mod metric;
pub mod palette;

pub use config::{ClusteringConfig, PaletteConfig, RestartConfig};
pub use dither::{floyd_steinberg, Dithered};
pub use error::{DitherError, Result};
pub use geom::{
    generate_clustered_points, generate_points, nearest_linear, Bounds, DataMatrix, Point,
    PointSet,
};
pub use io::DataLoader;
pub use kdtree::{mean_cut, BucketTree, KdTree};
pub use kmeans::{
    best_of_restarts, closest_mean_index, Clustering, ClusteringRun, IterationStats, RunSummary,
    StopReason,
};
pub use metric::{red_mean, squared_euclidean, DistanceMetric, Metric};
pub use palette::{
    build_palette, sample_points, ColorPalette, PaletteMapper, PaletteRun, PixelGrid, Rgba,
};
