//! Colour palettes: extraction from pixels with k-means and nearest-colour
//! lookup through a k-d tree.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use crate::config::PaletteConfig;
use crate::error::{DitherError, Result};
use crate::geom::{Point, PointSet};
use crate::kdtree::{mean_cut, KdTree};
use crate::kmeans::{best_of_restarts, ClusteringRun};
use crate::metric::{DistanceMetric, Metric};

/// One pixel as red, green, blue, alpha.
pub type Rgba = [u8; 4];

/// Row-major RGBA pixel buffer holding exactly `width * height` pixels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawPixelGrid")]
pub struct PixelGrid {
    width: usize,
    height: usize,
    pixels: Vec<Rgba>,
}

#[derive(Deserialize)]
struct RawPixelGrid {
    width: usize,
    height: usize,
    pixels: Vec<Rgba>,
}

impl TryFrom<RawPixelGrid> for PixelGrid {
    type Error = DitherError;

    fn try_from(raw: RawPixelGrid) -> Result<Self> {
        Self::new(raw.width, raw.height, raw.pixels)
    }
}

impl PixelGrid {
    pub fn new(width: usize, height: usize, pixels: Vec<Rgba>) -> Result<Self> {
        let expected = width.checked_mul(height).ok_or_else(|| {
            DitherError::InvalidData(format!("{width}x{height} grid is too large"))
        })?;
        if pixels.len() != expected {
            return Err(DitherError::InvalidData(format!(
                "{width}x{height} grid needs {expected} pixels, got {}",
                pixels.len()
            )));
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    pub fn filled(width: usize, height: usize, color: Rgba) -> Self {
        Self {
            width,
            height,
            pixels: vec![color; width * height],
        }
    }

    pub fn get(&self, x: usize, y: usize) -> Option<Rgba> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.pixels.get(x + y * self.width).copied()
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Pixels in row-major order.
    pub fn pixels(&self) -> &[Rgba] {
        &self.pixels
    }

    pub fn into_pixels(self) -> Vec<Rgba> {
        self.pixels
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }
}

/// A named list of colours, stored on disk as JSON
/// (`{"name": ..., "colors": [[r, g, b, a], ...]}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorPalette {
    pub name: String,
    pub colors: Vec<Rgba>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PaletteFile {
    Many(Vec<ColorPalette>),
    One(ColorPalette),
}

impl ColorPalette {
    pub fn new(name: impl Into<String>, colors: Vec<Rgba>) -> Self {
        Self {
            name: name.into(),
            colors,
        }
    }

    /// Opaque black and white.
    pub fn bw() -> Self {
        Self::new("BW", vec![[0, 0, 0, 255], [255, 255, 255, 255]])
    }

    /// Convert centroids to colours, rounding and clamping every channel.
    /// Three-channel points become opaque.
    pub fn from_points(name: impl Into<String>, points: &PointSet) -> Result<Self> {
        let colors = points
            .iter()
            .map(|point| match point.coords.as_slice() {
                [r, g, b] => Ok([channel(*r), channel(*g), channel(*b), 255]),
                [r, g, b, a] => Ok([channel(*r), channel(*g), channel(*b), channel(*a)]),
                other => Err(DitherError::InvalidData(format!(
                    "palette colours need 3 or 4 channels, point {} has {}",
                    point.id,
                    other.len()
                ))),
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(name, colors))
    }

    /// Colours as 4-dimensional points; ids are palette indices.
    pub fn to_points(&self) -> PointSet {
        self.colors
            .iter()
            .enumerate()
            .map(|(index, &color)| color_to_point(color, index))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }

    /// Read palettes from a JSON file holding either a list of palettes or
    /// a single one.
    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Vec<ColorPalette>> {
        let reader = BufReader::new(File::open(path)?);
        let palettes = match serde_json::from_reader(reader)? {
            PaletteFile::Many(palettes) => palettes,
            PaletteFile::One(palette) => vec![palette],
        };
        Ok(palettes)
    }

    pub fn save_json<P: AsRef<Path>>(&self, path: P, pretty: bool) -> Result<()> {
        let writer = BufWriter::new(File::create(path)?);
        if pretty {
            serde_json::to_writer_pretty(writer, self)?;
        } else {
            serde_json::to_writer(writer, self)?;
        }
        Ok(())
    }

    /// Collect the swatch colours along the middle row (`left_to_right`) or
    /// the middle column of `grid`.
    ///
    /// A colour is added each time it has been repeated [`SWATCH_RUN`]
    /// times right after its first pixel. White counts as background and is
    /// never added.
    pub fn traverse(grid: &PixelGrid, left_to_right: bool, name: impl Into<String>) -> Self {
        const WHITE: Rgba = [255, 255, 255, 255];
        let line: Vec<Rgba> = if left_to_right {
            let y = grid.height / 2;
            (0..grid.width).filter_map(|x| grid.get(x, y)).collect()
        } else {
            let x = grid.width / 2;
            (0..grid.height).filter_map(|y| grid.get(x, y)).collect()
        };

        let mut colors = Vec::new();
        let mut current = WHITE;
        let mut repeats = 0usize;
        for color in line {
            if color == current {
                repeats += 1;
            } else {
                repeats = 0;
                current = color;
            }
            if repeats == SWATCH_RUN && current != WHITE {
                colors.push(current);
            }
        }
        Self::new(name, colors)
    }

    /// The palette called `name`, or a one-colour black palette named
    /// "New" when there is none.
    pub fn find_by_name(name: &str, palettes: &[ColorPalette]) -> ColorPalette {
        palettes
            .iter()
            .find(|palette| palette.name == name)
            .cloned()
            .unwrap_or_else(|| Self::new("New", vec![[0, 0, 0, 255]]))
    }
}

/// Repeats after the first pixel that make a run a swatch in
/// [`ColorPalette::traverse`].
pub const SWATCH_RUN: usize = 8;

fn channel(value: f64) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

pub(crate) fn color_to_point(color: Rgba, id: usize) -> Point {
    Point::new(color.iter().map(|&c| f64::from(c)).collect(), id)
}

/// Every `sample_factor`-th pixel along both axes, as 4-dimensional points
/// with id `x + y * width`.
pub fn sample_points(grid: &PixelGrid, sample_factor: usize) -> Result<PointSet> {
    if sample_factor == 0 {
        return Err(DitherError::InvalidConfig(
            "sample_factor must be greater than zero".into(),
        ));
    }
    let mut samples = PointSet::new();
    for x in (0..grid.width).step_by(sample_factor) {
        for y in (0..grid.height).step_by(sample_factor) {
            let id = x + y * grid.width;
            if let Some(&color) = grid.pixels.get(id) {
                samples.push(color_to_point(color, id));
            }
        }
    }
    Ok(samples)
}

/// A palette extracted from an image along with the clustering that
/// produced it.
#[derive(Debug, Clone, Serialize)]
pub struct PaletteRun {
    pub palette: ColorPalette,
    /// Pixels sampled from the grid.
    pub samples: usize,
    /// Points clustered after the optional mean-cut reduction.
    pub clustered: usize,
    pub clustering: ClusteringRun,
}

/// Extract a `config.k` colour palette from `grid`.
pub fn build_palette(grid: &PixelGrid, config: &PaletteConfig) -> Result<PaletteRun> {
    config.validate()?;
    let mut points = sample_points(grid, config.sample_factor)?;
    let samples = points.len();
    if samples == 0 {
        return Err(DitherError::EmptyPointSet);
    }
    if let Some(depth) = config.mean_cut_depth {
        points = mean_cut(points, depth)?;
    }
    let clustered = points.len();

    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    let clustering = best_of_restarts(
        &points,
        config.k,
        config.metric,
        &config.clustering,
        &config.restarts,
        &mut rng,
    )?;
    let palette = ColorPalette::from_points("FromImage", &clustering.centroids)?;
    tracing::info!(
        colors = palette.len(),
        samples,
        clustered,
        total_error = clustering.total_error,
        restart = clustering.restart,
        "built palette"
    );
    Ok(PaletteRun {
        palette,
        samples,
        clustered,
        clustering,
    })
}

/// Nearest-colour lookup for a fixed palette.
#[derive(Debug, Clone)]
pub struct PaletteMapper {
    palette: ColorPalette,
    tree: KdTree,
    metric: DistanceMetric,
}

impl PaletteMapper {
    pub fn new(palette: ColorPalette, metric: DistanceMetric) -> Result<Self> {
        let tree = KdTree::build(palette.to_points())?;
        if tree.dimension() < metric.min_dimension() {
            return Err(DitherError::MetricDimension {
                metric: metric.name().to_string(),
                required: metric.min_dimension(),
                found: tree.dimension(),
            });
        }
        Ok(Self {
            palette,
            tree,
            metric,
        })
    }

    pub fn palette(&self) -> &ColorPalette {
        &self.palette
    }

    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    /// Index of the palette colour closest to `color`, and its distance.
    pub fn nearest(&self, color: Rgba) -> (usize, f64) {
        let (point, distance) = self
            .tree
            .nearest_unchecked(&color_to_point(color, 0), &self.metric);
        (point.id, distance)
    }

    pub fn color(&self, index: usize) -> Option<Rgba> {
        self.palette.colors.get(index).copied()
    }
}
