//! Client-side matting models.
//!
//! A model turns an RGBA image into the same image with the background made
//! transparent. Inference is CPU-bound and runs on the blocking pool.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use image::RgbaImage;
use tracing::debug;

use crate::error::MediaResult;

/// A background matting model.
pub trait MattingModel: Send + Sync {
    fn name(&self) -> &str;

    /// Return `image` with background pixels made transparent. The output
    /// must have the input's dimensions.
    fn remove_background(&self, image: &RgbaImage) -> MediaResult<RgbaImage>;
}

/// Loads a model on first use.
#[async_trait]
pub trait ModelLoader: Send + Sync {
    async fn load(&self) -> MediaResult<Arc<dyn MattingModel>>;
}

/// Loader for the built-in [`BorderFloodModel`].
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinModelLoader;

#[async_trait]
impl ModelLoader for BuiltinModelLoader {
    async fn load(&self) -> MediaResult<Arc<dyn MattingModel>> {
        Ok(Arc::new(BorderFloodModel::default()))
    }
}

/// Flood-fills the background from the image border.
///
/// The dominant border colour is taken as the background colour. Every
/// pixel connected to the border whose colour is within `tolerance` of it
/// becomes fully transparent. Works well for studio-style photos and
/// generated illustrations on plain backdrops.
#[derive(Debug, Clone, Copy)]
pub struct BorderFloodModel {
    /// Max per-channel distance from the background colour
    pub tolerance: u8,
}

impl Default for BorderFloodModel {
    fn default() -> Self {
        Self { tolerance: 40 }
    }
}

impl BorderFloodModel {
    fn border_pixels(width: u32, height: u32) -> impl Iterator<Item = (u32, u32)> {
        let top_bottom = (0..width).flat_map(move |x| [(x, 0), (x, height - 1)]);
        let sides = (0..height).flat_map(move |y| [(0, y), (width - 1, y)]);
        top_bottom.chain(sides)
    }

    /// Most common border colour, quantized to 16 levels per channel.
    fn dominant_border_colour(image: &RgbaImage) -> [u8; 3] {
        let (width, height) = image.dimensions();
        let mut buckets: HashMap<[u8; 3], (u32, [u32; 3])> = HashMap::new();
        for (x, y) in Self::border_pixels(width, height) {
            let [r, g, b, _] = image.get_pixel(x, y).0;
            let entry = buckets.entry([r >> 4, g >> 4, b >> 4]).or_insert((0, [0; 3]));
            entry.0 += 1;
            entry.1[0] += u32::from(r);
            entry.1[1] += u32::from(g);
            entry.1[2] += u32::from(b);
        }
        buckets
            .into_values()
            .max_by_key(|(count, _)| *count)
            .map(|(count, sum)| {
                [
                    (sum[0] / count) as u8,
                    (sum[1] / count) as u8,
                    (sum[2] / count) as u8,
                ]
            })
            .unwrap_or([255, 255, 255])
    }

    fn matches(&self, pixel: [u8; 4], background: [u8; 3]) -> bool {
        pixel[..3]
            .iter()
            .zip(background.iter())
            .all(|(a, b)| a.abs_diff(*b) <= self.tolerance)
    }
}

impl MattingModel for BorderFloodModel {
    fn name(&self) -> &str {
        "border-flood"
    }

    fn remove_background(&self, image: &RgbaImage) -> MediaResult<RgbaImage> {
        let (width, height) = image.dimensions();
        let mut output = image.clone();
        if width == 0 || height == 0 {
            return Ok(output);
        }

        let background = Self::dominant_border_colour(image);
        let mut visited = vec![false; (width as usize) * (height as usize)];
        let index = |x: u32, y: u32| (y as usize) * (width as usize) + x as usize;
        let mut queue: VecDeque<(u32, u32)> = VecDeque::new();

        for (x, y) in Self::border_pixels(width, height) {
            if !visited[index(x, y)] && self.matches(image.get_pixel(x, y).0, background) {
                visited[index(x, y)] = true;
                queue.push_back((x, y));
            }
        }

        let mut cleared = 0usize;
        while let Some((x, y)) = queue.pop_front() {
            output.get_pixel_mut(x, y).0[3] = 0;
            cleared += 1;

            let neighbours = [
                (x.wrapping_sub(1), y),
                (x + 1, y),
                (x, y.wrapping_sub(1)),
                (x, y + 1),
            ];
            for (nx, ny) in neighbours {
                if nx >= width || ny >= height || visited[index(nx, ny)] {
                    continue;
                }
                if self.matches(image.get_pixel(nx, ny).0, background) {
                    visited[index(nx, ny)] = true;
                    queue.push_back((nx, ny));
                }
            }
        }

        debug!(
            width,
            height,
            cleared,
            background = ?background,
            "Border flood matting finished"
        );
        Ok(output)
    }
}
