//! Floyd–Steinberg error diffusion onto a fixed palette.

use serde::Serialize;

use crate::palette::{PaletteMapper, PixelGrid, Rgba};

/// Share of the quantisation error pushed to each neighbour, as
/// `(dx, dy, weight)`.
const DIFFUSION: [(isize, usize, f64); 4] = [
    (1, 0, 7.0 / 16.0),
    (-1, 1, 3.0 / 16.0),
    (0, 1, 5.0 / 16.0),
    (1, 1, 1.0 / 16.0),
];

/// A dithered image: palette indices plus the matching colours, row-major.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Dithered {
    pub width: usize,
    pub height: usize,
    pub indices: Vec<usize>,
    pub pixels: Vec<Rgba>,
}

impl Dithered {
    /// How often each palette index occurs.
    pub fn histogram(&self, palette_len: usize) -> Vec<usize> {
        let mut counts = vec![0; palette_len];
        for &index in &self.indices {
            if let Some(count) = counts.get_mut(index) {
                *count += 1;
            }
        }
        counts
    }
}

/// Quantise `grid` to the mapper's palette, scanning rows top to bottom and
/// spreading each pixel's error onto the pixels not yet visited.
pub fn floyd_steinberg(grid: &PixelGrid, mapper: &PaletteMapper) -> Dithered {
    let (width, height) = (grid.width(), grid.height());
    let mut work = grid.pixels().to_vec();
    let mut indices = Vec::with_capacity(work.len());
    let mut pixels = Vec::with_capacity(work.len());

    for y in 0..height {
        for x in 0..width {
            let old = work[x + y * width];
            let (index, _) = mapper.nearest(old);
            let new = mapper.color(index).unwrap_or(old);
            indices.push(index);
            pixels.push(new);

            let error: [i16; 4] =
                std::array::from_fn(|c| i16::from(old[c]) - i16::from(new[c]));
            if error == [0; 4] {
                continue;
            }
            for &(dx, dy, weight) in &DIFFUSION {
                let Some(nx) = x.checked_add_signed(dx) else {
                    continue;
                };
                let ny = y + dy;
                if nx >= width || ny >= height {
                    continue;
                }
                diffuse(&mut work[nx + ny * width], &error, weight);
            }
        }
    }

    tracing::debug!(width, height, colors = mapper.palette().len(), "dithered image");
    Dithered {
        width,
        height,
        indices,
        pixels,
    }
}

fn diffuse(pixel: &mut Rgba, error: &[i16; 4], weight: f64) {
    for (channel, &err) in pixel.iter_mut().zip(error) {
        let share = (f64::from(err) * weight) as i16;
        *channel = (i16::from(*channel) + share).clamp(0, 255) as u8;
    }
}
