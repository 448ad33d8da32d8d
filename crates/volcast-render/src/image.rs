//! The intermediate ray-cast image and its per-row work bounds.
//!
//! The image covers only the screen rectangle the volume projects to. Its
//! memory is a power-of-two buffer reused across frames, so only the parts
//! of rows that were drawn last frame and fall outside this frame's row
//! bounds need clearing.

use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};

use glam::{Mat4, Vec3};
use volcast_core::math::transform_homogeneous;
use volcast_core::{try_alloc, Aabb, Result};

/// Smallest view depth the volume is treated as starting at.
const NEAR_DEPTH: f32 = 0.001;
/// Depth beyond which the projected bounds are not trusted.
const FAR_DEPTH: f32 = 0.9999;
/// Pixels of slack added around the projected bounds.
const MARGIN: f32 = 2.0;
/// Rows cleared between abort checks.
const ABORT_CHECK_ROWS: usize = 64;

/// Inclusive span of pixels to cast on one row; empty when `first > last`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RowSpan {
    pub first: isize,
    pub last: isize,
}

impl Default for RowSpan {
    fn default() -> Self {
        Self::empty(0)
    }
}

impl RowSpan {
    /// The empty span for a row of memory width `width`.
    #[inline]
    pub const fn empty(width: usize) -> Self {
        Self {
            first: width as isize,
            last: -1,
        }
    }

    #[inline]
    pub const fn new(first: usize, last: usize) -> Self {
        Self {
            first: first as isize,
            last: last as isize,
        }
    }

    #[inline]
    pub const fn is_empty(self) -> bool {
        self.first > self.last
    }

    /// Pixel indices covered by the span.
    #[inline]
    pub fn range(self) -> Range<usize> {
        if self.is_empty() {
            0..0
        } else {
            self.first as usize..self.last as usize + 1
        }
    }
}

/// Outcome of fitting the image to the projected volume.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Coverage {
    /// The volume covers some pixels; row bounds are ready
    Visible,
    /// The volume projects entirely off screen
    Hidden,
    /// The abort flag was raised while clearing
    Aborted,
}

/// RGBA image with 15-bit premultiplied channels.
#[derive(Debug, Default)]
pub struct RayCastImage {
    pixels: Vec<[u16; 4]>,
    memory_size: [usize; 2],
    in_use_size: [usize; 2],
    origin: [usize; 2],
    viewport_size: [usize; 2],
    rows: Vec<RowSpan>,
    old_rows: Vec<RowSpan>,
    min_view_distance: f32,
}

impl RayCastImage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Full size of the image plane in image pixels.
    pub fn set_viewport_size(&mut self, size: [usize; 2]) {
        self.viewport_size = size;
    }

    pub const fn viewport_size(&self) -> [usize; 2] {
        self.viewport_size
    }

    pub const fn memory_size(&self) -> [usize; 2] {
        self.memory_size
    }

    pub const fn in_use_size(&self) -> [usize; 2] {
        self.in_use_size
    }

    /// Lower-left corner of the in-use region within the viewport.
    pub const fn origin(&self) -> [usize; 2] {
        self.origin
    }

    /// Nearest view depth of the volume, clamped to `[0.001, 0.999]`.
    pub const fn min_view_distance(&self) -> f32 {
        self.min_view_distance
    }

    pub fn rows(&self) -> &[RowSpan] {
        &self.rows
    }

    pub fn pixels(&self) -> &[[u16; 4]] {
        &self.pixels
    }

    /// Raw bytes of the whole memory buffer.
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.pixels)
    }

    /// Pixel at in-use coordinates; transparent outside the buffer.
    pub fn pixel(&self, x: usize, y: usize) -> [u16; 4] {
        if x >= self.memory_size[0] || y >= self.memory_size[1] {
            return [0; 4];
        }
        self.pixels[y * self.memory_size[0] + x]
    }

    /// Pixel at viewport coordinates; transparent outside the in-use region.
    pub fn viewport_pixel(&self, x: usize, y: usize) -> [u16; 4] {
        let (Some(ix), Some(iy)) = (x.checked_sub(self.origin[0]), y.checked_sub(self.origin[1]))
        else {
            return [0; 4];
        };
        if ix >= self.in_use_size[0] || iy >= self.in_use_size[1] {
            return [0; 4];
        }
        self.pixel(ix, iy)
    }

    /// Zero every pixel.
    pub fn clear(&mut self) {
        self.pixels.fill([0; 4]);
    }

    /// Row bounds and pixel memory split for the casting pass.
    pub(crate) fn rows_and_pixels(&mut self) -> (&[RowSpan], &mut [[u16; 4]]) {
        (&self.rows, &mut self.pixels)
    }

    /// Fit the image to the projected `bounds` and compute the row bounds.
    ///
    /// `bounds` are in voxel space, `camera` is the eye position in voxel
    /// space. Pixels drawn last frame that fall outside the new bounds are
    /// cleared.
    pub fn fit(
        &mut self,
        voxels_to_view: Mat4,
        bounds: &Aabb,
        camera: Vec3,
        abort: &AtomicBool,
    ) -> Result<Coverage> {
        let mut inside = bounds.contains_point(camera);

        let mut min = Vec3::new(f32::INFINITY, f32::INFINITY, 1.0);
        let mut max = Vec3::new(f32::NEG_INFINITY, f32::NEG_INFINITY, 0.0);
        let mut corners = [Vec3::ZERO; 8];
        if inside {
            min = Vec3::new(-1.0, -1.0, NEAR_DEPTH);
            max = Vec3::new(1.0, 1.0, NEAR_DEPTH);
        } else {
            for (corner, view) in bounds.corners().iter().zip(corners.iter_mut()) {
                match transform_homogeneous(voxels_to_view, *corner) {
                    Some(p) => {
                        *view = p;
                        min = min.min(p);
                        max = max.max(p);
                    }
                    None => inside = true,
                }
            }
        }

        if inside || min.z < NEAR_DEPTH || max.z > FAR_DEPTH {
            min.x = -1.0;
            min.y = -1.0;
            max.x = 1.0;
            max.y = 1.0;
            inside = true;
        }
        self.min_view_distance = min.z.clamp(NEAR_DEPTH, 0.999);

        let [vw, vh] = self.viewport_size.map(|v| v as f32);
        let mut low_x = (min.x + 1.0) * 0.5 * vw - MARGIN;
        let mut low_y = (min.y + 1.0) * 0.5 * vh - MARGIN;
        let mut high_x = (max.x + 1.0) * 0.5 * vw + MARGIN;
        let mut high_y = (max.y + 1.0) * 0.5 * vh + MARGIN;

        if (low_x < 0.0 && high_x < 0.0)
            || (low_y < 0.0 && high_y < 0.0)
            || (low_x > vw - 1.0 && high_x > vw - 1.0)
            || (low_y > vh - 1.0 && high_y > vh - 1.0)
            || vw < 1.0
            || vh < 1.0
        {
            return Ok(Coverage::Hidden);
        }

        low_x = low_x.max(0.0);
        low_y = low_y.max(0.0);
        high_x = high_x.min(vw - 1.0);
        high_y = high_y.min(vh - 1.0);

        let in_use = [
            (high_x - low_x + 1.0) as usize,
            (high_y - low_y + 1.0) as usize,
        ];
        let mut memory = [32usize; 2];
        for (m, &u) in memory.iter_mut().zip(&in_use) {
            while *m < u {
                *m *= 2;
            }
        }

        // Keep the old buffer unless it is far too big, so sizes do not thrash
        let mut old_memory = self.memory_size;
        if old_memory[0] > 4 * memory[0] || old_memory[1] > 4 * memory[1] {
            old_memory = [0, 0];
        }
        if old_memory[0] >= memory[0] && old_memory[1] >= memory[1] {
            memory = old_memory;
        }

        self.origin = [low_x as usize, low_y as usize];
        self.in_use_size = in_use;
        if memory != self.memory_size || self.pixels.len() != memory[0] * memory[1] {
            self.allocate(memory)?;
        }

        std::mem::swap(&mut self.rows, &mut self.old_rows);
        let width = self.memory_size[0];

        if inside {
            let full = RowSpan::new(0, in_use[0] - 1);
            self.rows[..in_use[1]].fill(full);
        } else {
            self.trace_edges(&corners);
        }
        self.rows[in_use[1]..].fill(RowSpan::empty(width));

        Ok(self.clear_stale_rows(abort))
    }

    fn allocate(&mut self, memory: [usize; 2]) -> Result<()> {
        self.pixels = try_alloc(memory[0] * memory[1], "ray-cast image")?;
        let mut rows = try_alloc(memory[1], "row bounds")?;
        rows.fill(RowSpan::empty(memory[0]));
        self.old_rows = rows.clone();
        self.rows = rows;
        self.memory_size = memory;
        tracing::debug!(width = memory[0], height = memory[1], "allocated ray-cast image");
        Ok(())
    }

    /// Row bounds from where the twelve projected box edges cross each row.
    fn trace_edges(&mut self, corners: &[Vec3; 8]) {
        let [vw, vh] = self.viewport_size.map(|v| v as f32);
        let [ox, oy] = self.origin.map(|v| v as f32);
        let to_pixel = |p: Vec3| ((p.x + 1.0) * 0.5 * vw - ox, (p.y + 1.0) * 0.5 * vh - oy);

        let lines = Aabb::EDGES.map(|(a, b)| {
            let (x1, y1) = to_pixel(corners[a]);
            let (x2, y2) = to_pixel(corners[b]);
            if y1 < y2 {
                [x1, y1, x2, y2]
            } else {
                [x2, y2, x1, y1]
            }
        });

        let width = self.memory_size[0];
        let last = (self.in_use_size[0] - 1) as isize;
        for (j, row) in self.rows[..self.in_use_size[1]].iter_mut().enumerate() {
            let y = j as f32;
            *row = RowSpan::empty(width);
            for &[x1, y1, x2, y2] in &lines {
                if y >= y1 && y <= y2 && y1 != y2 {
                    let x = x1 + (y - y1) / (y2 - y1) * (x2 - x1);
                    let low = ((x + 1.5) as isize).clamp(0, last);
                    let high = ((x - 1.0) as isize).clamp(0, last);
                    row.first = row.first.min(low);
                    row.last = row.last.max(high);
                }
            }
            // A single pixel is a corner touch or every edge was off to one side
            if row.first == row.last {
                *row = RowSpan::empty(width);
            }
        }
    }

    /// Zero the parts of last frame's rows the new bounds no longer cover.
    fn clear_stale_rows(&mut self, abort: &AtomicBool) -> Coverage {
        let width = self.memory_size[0];
        for (j, (new, old)) in self.rows.iter().zip(&self.old_rows).enumerate() {
            if j % ABORT_CHECK_ROWS == 1 && abort.load(Ordering::Relaxed) {
                return Coverage::Aborted;
            }
            if old.is_empty() {
                continue;
            }
            let row = &mut self.pixels[j * width..(j + 1) * width];
            if new.last < old.first || new.first > old.last {
                row[old.range()].fill([0; 4]);
            } else {
                if new.first > old.first {
                    row[old.first as usize..new.first as usize].fill([0; 4]);
                }
                if old.last > new.last {
                    row[(new.last + 1) as usize..=old.last as usize].fill([0; 4]);
                }
            }
        }
        Coverage::Visible
    }
}

/// Depth values captured from the surrounding scene, one per viewport pixel.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DepthBuffer {
    size: [usize; 2],
    values: Vec<f32>,
}

impl DepthBuffer {
    /// Wrap row-major depths in `[0, 1]`. Returns `None` on a size mismatch.
    pub fn new(size: [usize; 2], values: Vec<f32>) -> Option<Self> {
        (values.len() == size[0] * size[1] && !values.is_empty()).then_some(Self { size, values })
    }

    pub const fn size(&self) -> [usize; 2] {
        self.size
    }

    /// Depth under image pixel `(x, y)` of an image with the given origin
    /// and image sample distance.
    pub fn depth_at(&self, x: usize, y: usize, origin: [usize; 2], image_sample_distance: f32) -> f32 {
        let px = (((x + origin[0]) as f32 * image_sample_distance) as usize).min(self.size[0] - 1);
        let py = (((y + origin[1]) as f32 * image_sample_distance) as usize).min(self.size[1] - 1);
        self.values[py * self.size[0] + px]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::Camera;

    fn front_view() -> Mat4 {
        let camera = Camera::orthographic(
            Vec3::new(7.5, 7.5, 40.0),
            Vec3::new(7.5, 7.5, 0.0),
            Vec3::Y,
            16.0,
            1.0,
            100.0,
        );
        camera.view_projection_matrix(1.0)
    }

    fn fitted(viewport: [usize; 2]) -> RayCastImage {
        let mut image = RayCastImage::new();
        image.set_viewport_size(viewport);
        let coverage = image
            .fit(
                front_view(),
                &Aabb::from_dims([16, 16, 16]),
                Vec3::new(7.5, 7.5, 40.0),
                &AtomicBool::new(false),
            )
            .unwrap();
        assert_eq!(coverage, Coverage::Visible);
        image
    }

    #[test]
    fn row_span_basics() {
        assert!(RowSpan::empty(32).is_empty());
        assert_eq!(RowSpan::empty(32).range(), 0..0);
        assert_eq!(RowSpan::new(3, 5).range(), 3..6);
    }

    #[test]
    fn image_fits_projected_volume() {
        let image = fitted([64, 64]);
        // The box spans x and y in [0, 15] which is view [-0.47, 0.47]
        assert_eq!(image.memory_size(), [64, 64]);
        let [w, h] = image.in_use_size();
        assert!((30..=36).contains(&w) && (30..=36).contains(&h), "{w}x{h}");
        let [ox, oy] = image.origin();
        assert!((14..=16).contains(&ox) && (14..=16).contains(&oy));
        // Front face at z = 15, 25 units from the camera over a 99 unit range
        let expected = (25.0 - 1.0) / 99.0;
        assert!((image.min_view_distance() - expected).abs() < 1e-3);
    }

    #[test]
    fn rows_cover_the_projected_square() {
        let image = fitted([64, 64]);
        let [w, h] = image.in_use_size();
        let middle = image.rows()[h / 2];
        assert!(!middle.is_empty());
        assert!(middle.first <= 3 && middle.last >= w as isize - 6);
        for row in &image.rows()[h..] {
            assert!(row.is_empty());
        }
    }

    #[test]
    fn hidden_when_off_screen() {
        let mut image = RayCastImage::new();
        image.set_viewport_size([64, 64]);
        let bounds = Aabb::new(Vec3::new(200.0, 0.0, 0.0), Vec3::new(210.0, 10.0, 10.0));
        let coverage = image
            .fit(front_view(), &bounds, Vec3::new(7.5, 7.5, 40.0), &AtomicBool::new(false))
            .unwrap();
        assert_eq!(coverage, Coverage::Hidden);
    }

    #[test]
    fn camera_inside_casts_everything() {
        let mut image = RayCastImage::new();
        image.set_viewport_size([40, 20]);
        let coverage = image
            .fit(
                front_view(),
                &Aabb::from_dims([100, 100, 100]),
                Vec3::new(7.5, 7.5, 40.0),
                &AtomicBool::new(false),
            )
            .unwrap();
        assert_eq!(coverage, Coverage::Visible);
        assert_eq!(image.in_use_size(), [40, 20]);
        assert_eq!(image.origin(), [0, 0]);
        assert_eq!(image.memory_size(), [64, 32]);
        assert!(image.rows()[..20].iter().all(|r| *r == RowSpan::new(0, 39)));
        assert!((image.min_view_distance() - NEAR_DEPTH).abs() < 1e-6);
    }

    #[test]
    fn stale_pixels_are_cleared() {
        let mut image = fitted([64, 64]);
        // Pretend the last frame drew every in-use pixel
        let [w, h] = image.in_use_size();
        let width = image.memory_size()[0];
        for j in 0..h {
            image.pixels[j * width..j * width + w].fill([1, 2, 3, 4]);
            image.rows[j] = RowSpan::new(0, w - 1);
        }
        image
            .fit(
                front_view(),
                &Aabb::from_dims([16, 16, 16]),
                Vec3::new(7.5, 7.5, 40.0),
                &AtomicBool::new(false),
            )
            .unwrap();
        for j in 0..h {
            let span = image.rows()[j];
            for i in 0..w {
                let covered = span.range().contains(&i);
                if !covered {
                    assert_eq!(image.pixel(i, j), [0; 4], "pixel ({i}, {j})");
                }
            }
        }
    }

    #[test]
    fn memory_is_kept_unless_far_too_big() {
        let mut image = RayCastImage::new();
        image.set_viewport_size([300, 300]);
        let abort = AtomicBool::new(false);
        let big = Aabb::from_dims([100, 100, 100]);
        image.fit(front_view(), &big, Vec3::new(7.5, 7.5, 40.0), &abort).unwrap();
        assert_eq!(image.memory_size(), [512, 512]);

        image.set_viewport_size([200, 200]);
        image.fit(front_view(), &big, Vec3::new(7.5, 7.5, 40.0), &abort).unwrap();
        assert_eq!(image.memory_size(), [512, 512]);

        image.set_viewport_size([20, 20]);
        image.fit(front_view(), &big, Vec3::new(7.5, 7.5, 40.0), &abort).unwrap();
        assert_eq!(image.memory_size(), [32, 32]);
    }

    #[test]
    fn depth_lookup_scales_to_viewport() {
        let depth = DepthBuffer::new([4, 2], vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8]).unwrap();
        assert_eq!(depth.depth_at(0, 0, [0, 0], 1.0), 0.1);
        assert_eq!(depth.depth_at(1, 0, [0, 0], 2.0), 0.3);
        assert_eq!(depth.depth_at(1, 1, [0, 0], 2.0), 0.7);
        assert_eq!(depth.depth_at(5, 0, [1, 0], 1.0), 0.4);
        assert!(DepthBuffer::new([2, 2], vec![0.0; 3]).is_none());
    }
}
