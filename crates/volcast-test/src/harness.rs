//! Headless rendering and image comparison.

use volcast_render::{RenderConfig, RenderRequest, RenderStatus, VolumeRenderer};

use crate::{Result, TestError};

/// A rendered frame resampled to viewport pixels.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderedImage {
    pub width: usize,
    pub height: usize,
    pub pixels: Vec<[u16; 4]>,
}

impl RenderedImage {
    pub fn pixel(&self, x: usize, y: usize) -> [u16; 4] {
        self.pixels[y * self.width + x]
    }

    /// Number of pixels with any opacity.
    pub fn covered(&self) -> usize {
        self.pixels.iter().filter(|p| p[3] > 0).count()
    }

    /// Largest per-channel difference to `other`.
    pub fn max_difference(&self, other: &Self) -> Result<u16> {
        if (self.width, self.height) != (other.width, other.height) {
            return Err(TestError::ImageComparison(format!(
                "Image dimensions don't match: {}x{} vs {}x{}",
                self.width, self.height, other.width, other.height
            )));
        }
        Ok(self
            .pixels
            .iter()
            .zip(&other.pixels)
            .flat_map(|(a, b)| a.iter().zip(b).map(|(&a, &b)| a.abs_diff(b)))
            .max()
            .unwrap_or(0))
    }

    /// Fail when any channel differs by more than `tolerance`.
    pub fn assert_matches(&self, other: &Self, tolerance: u16) -> Result<()> {
        let diff = self.max_difference(other)?;
        if diff > tolerance {
            return Err(TestError::ImageComparison(format!(
                "Image difference {diff} exceeds tolerance {tolerance}"
            )));
        }
        Ok(())
    }
}

/// Renders requests with one renderer and reads the result back.
#[derive(Debug)]
pub struct RenderHarness {
    renderer: VolumeRenderer,
}

impl RenderHarness {
    pub fn new(config: RenderConfig) -> Self {
        Self {
            renderer: VolumeRenderer::new(config),
        }
    }

    pub const fn renderer(&self) -> &VolumeRenderer {
        &self.renderer
    }

    pub fn renderer_mut(&mut self) -> &mut VolumeRenderer {
        &mut self.renderer
    }

    /// Render and resample; an invisible volume yields a transparent image.
    pub fn render(&mut self, request: &RenderRequest<'_>) -> Result<RenderedImage> {
        let [width, height] = request.viewport;
        match self.renderer.render(request) {
            RenderStatus::Rendered => {}
            RenderStatus::NothingVisible => {
                tracing::debug!("Nothing visible, returning an empty image");
                return Ok(RenderedImage {
                    width,
                    height,
                    pixels: vec![[0; 4]; width * height],
                });
            }
            RenderStatus::Aborted => return Err(TestError::Render("aborted".into())),
            RenderStatus::Failed(e) => return Err(e.into()),
        }

        let image = self.renderer.image();
        let isd = self.renderer.image_sample_distance();
        let mut pixels = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                pixels.push(image.viewport_pixel(image_coordinate(x, isd), image_coordinate(y, isd)));
            }
        }
        Ok(RenderedImage {
            width,
            height,
            pixels,
        })
    }
}

#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn image_coordinate(screen: usize, image_sample_distance: f32) -> usize {
    (screen as f32 / image_sample_distance) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(pixels: Vec<[u16; 4]>) -> RenderedImage {
        RenderedImage {
            width: 2,
            height: pixels.len() / 2,
            pixels,
        }
    }

    #[test]
    fn difference_is_per_channel_maximum() {
        let a = image(vec![[0, 0, 0, 0], [10, 20, 30, 40]]);
        let b = image(vec![[1, 0, 0, 0], [10, 25, 30, 39]]);
        assert_eq!(a.max_difference(&b).unwrap(), 5);
        assert!(a.assert_matches(&b, 5).is_ok());
        assert!(matches!(
            a.assert_matches(&b, 4),
            Err(TestError::ImageComparison(_))
        ));
        assert_eq!(a.covered(), 1);
    }

    #[test]
    fn mismatched_sizes_are_reported() {
        let a = image(vec![[0; 4]; 2]);
        let b = image(vec![[0; 4]; 4]);
        assert!(a.max_difference(&b).is_err());
    }
}
