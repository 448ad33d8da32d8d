//! Per-pixel ray construction and clipping.
//!
//! A ray runs from view depth 0 to the captured depth (or 1) through the
//! pixel centre. It is clipped to the volume, to the user planes, and to a
//! simple crop box, then scaled so one step covers the sample distance in
//! world units and snapped onto the lattice of the unclipped ray so that
//! neighbouring pixels sample consistently.

use glam::{Mat4, Vec3};
use volcast_core::math::transform_homogeneous;
use volcast_core::{Aabb, FixedDirection, FixedPosition, Plane};

/// How far inside the bounds a clipped endpoint is moved.
const BOUNDS_EPSILON: f32 = 0.01;
/// Fraction of the segment trimmed from both ends after clipping.
const SHRINK: f32 = 0.001;

/// Fixed-point description of one ray.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RayInfo {
    pub start: FixedPosition,
    pub direction: [FixedDirection; 3],
    pub steps: u32,
}

#[inline]
fn outside(p: Vec3, bounds: &Aabb) -> bool {
    p.cmpge(bounds.max).any() || p.cmplt(bounds.min).any()
}

/// Nudge one endpoint inside `bounds` along the ray.
///
/// `forward` moves only along the ray direction (start), otherwise only
/// against it (end).
fn pull_inside(point: &mut Vec3, direction: Vec3, bounds: &Aabb, forward: bool) {
    for axis in 0..3 {
        let low = bounds.min[axis] + BOUNDS_EPSILON;
        let high = bounds.max[axis] - BOUNDS_EPSILON;
        let diff = if point[axis] < low {
            low - point[axis]
        } else if point[axis] > high {
            high - point[axis]
        } else {
            continue;
        };
        if direction[axis] == 0.0 {
            continue;
        }
        let t = diff / direction[axis];
        if (forward && t > 0.0) || (!forward && t < 0.0) {
            *point += direction * t;
        }
    }
}

/// Clip a segment to an axis-aligned box. Returns `false` when nothing is
/// left.
pub fn clip_to_box(start: &mut Vec3, end: &mut Vec3, bounds: &Aabb) -> bool {
    let direction = *end - *start;

    if outside(*start, bounds) {
        pull_inside(start, direction, bounds, true);
    }
    if outside(*start, bounds) {
        return false;
    }

    if outside(*end, bounds) {
        pull_inside(end, direction, bounds, false);
    }

    let offset = (*end - *start) * SHRINK;
    *start += offset;
    *end -= offset;

    if outside(*end, bounds) {
        return false;
    }
    // Clipping must not flip the segment
    ((*end - *start) * direction).cmpge(Vec3::ZERO).all()
}

/// Clip a segment to the intersection of half-spaces `n · p + d >= 0`.
pub fn clip_to_planes(start: &mut Vec3, end: &mut Vec3, planes: &[Plane]) -> bool {
    for plane in planes {
        let direction = *end - *start;
        let dp = plane.normal.dot(direction);
        let side = plane.signed_distance(*start);

        if dp == 0.0 {
            if side < 0.0 {
                return false;
            }
            continue;
        }

        let t = -side / dp;
        if t > 0.0 && t < 1.0 {
            let point = *start + direction * t;
            if dp > 0.0 {
                *start = point;
            } else {
                *end = point;
            }
        } else if (dp > 0.0 && t >= 1.0) || (dp < 0.0 && t <= 0.0) {
            return false;
        }
    }
    true
}

/// Per-frame ray construction state.
#[derive(Clone, Debug)]
pub struct RaySetup {
    pub view_to_voxels: Mat4,
    /// Full image size in image pixels
    pub image_viewport: [usize; 2],
    /// Offset of the in-use region inside the full image
    pub image_origin: [usize; 2],
    pub bounds: Aabb,
    pub crop_box: Option<Aabb>,
    /// Clip planes in voxel space
    pub planes: Vec<Plane>,
    pub spacing: Vec3,
    pub sample_distance: f32,
}

impl RaySetup {
    /// View-space x or y of a pixel centre.
    #[inline]
    fn view_coordinate(pixel: usize, origin: usize, size: usize) -> f32 {
        let size = size as f32;
        ((pixel + origin) as f32 / size).mul_add(2.0, -1.0) + 1.0 / size
    }

    /// Build the ray through in-use pixel `(x, y)` ending at view depth
    /// `far_depth`. `None` means the pixel has no work.
    pub fn cast(&self, x: usize, y: usize, far_depth: f32) -> Option<RayInfo> {
        let vx = Self::view_coordinate(x, self.image_origin[0], self.image_viewport[0]);
        let vy = Self::view_coordinate(y, self.image_origin[1], self.image_viewport[1]);

        let mut start = transform_homogeneous(self.view_to_voxels, Vec3::new(vx, vy, 0.0))?;
        let mut end = transform_homogeneous(self.view_to_voxels, Vec3::new(vx, vy, far_depth))?;
        let unclipped_start = start;

        if !clip_to_box(&mut start, &mut end, &self.bounds) {
            return None;
        }
        if !self.planes.is_empty() && !clip_to_planes(&mut start, &mut end, &self.planes) {
            return None;
        }
        if let Some(crop) = &self.crop_box {
            if !clip_to_box(&mut start, &mut end, crop) {
                return None;
            }
        }

        // One step spans the sample distance in world units
        let direction = end - start;
        let world_length = (direction * self.spacing).length() / self.sample_distance;
        if world_length == 0.0 || !world_length.is_finite() {
            return None;
        }
        let direction = direction / world_length;

        // Snap onto the unclipped ray's sample lattice
        let travelled = (start - unclipped_start).dot(direction) / direction.length_squared();
        let steps_to_start = travelled.max(0.0).floor() + 1.0;
        let start = unclipped_start + direction * steps_to_start;

        if start.cmple(Vec3::ZERO).any() {
            return None;
        }

        let position = FixedPosition::from_vec3(start);
        let end_position = FixedPosition::from_vec3(end.max(Vec3::ZERO));
        let fixed_direction = direction.to_array().map(FixedDirection::from_f32);

        let mut steps = u32::MAX;
        for axis in 0..3 {
            let d = fixed_direction[axis];
            let magnitude = d.magnitude();
            if magnitude == 0 {
                continue;
            }
            let (from, to) = (position.0[axis], end_position.0[axis]);
            let axis_steps = if d.is_forward() {
                if to > from {
                    (to - from) / magnitude + 1
                } else {
                    0
                }
            } else if from > to {
                (from - to) / magnitude + 1
            } else {
                0
            };
            steps = steps.min(axis_steps);
        }
        if steps == u32::MAX || steps == 0 {
            return None;
        }

        Some(RayInfo {
            start: position,
            direction: fixed_direction,
            steps,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn cube(size: f32) -> Aabb {
        Aabb::new(Vec3::ZERO, Vec3::splat(size))
    }

    #[test]
    fn box_clip_moves_both_ends_inside() {
        let bounds = cube(10.0);
        let mut start = Vec3::new(-5.0, 5.0, 5.0);
        let mut end = Vec3::new(15.0, 5.0, 5.0);
        assert!(clip_to_box(&mut start, &mut end, &bounds));
        assert!(bounds.contains_point(start));
        assert!(bounds.contains_point(end));
        assert_relative_eq!(start.x, 0.01, epsilon = 0.05);
        assert_relative_eq!(end.x, 9.99, epsilon = 0.05);
    }

    #[test]
    fn box_clip_rejects_misses() {
        let bounds = cube(10.0);
        let mut start = Vec3::new(-5.0, 20.0, 5.0);
        let mut end = Vec3::new(15.0, 20.0, 5.0);
        assert!(!clip_to_box(&mut start, &mut end, &bounds));

        // Pointing away from the box
        let mut start = Vec3::new(-5.0, 5.0, 5.0);
        let mut end = Vec3::new(-15.0, 5.0, 5.0);
        assert!(!clip_to_box(&mut start, &mut end, &bounds));
    }

    #[test]
    fn plane_clip_stays_in_convex_region() {
        // Six planes bounding [2, 8]^3
        let mut planes = Vec::new();
        for axis in 0..3 {
            let mut n = Vec3::ZERO;
            n[axis] = 1.0;
            planes.push(Plane::from_point_normal(Vec3::splat(2.0), n));
            planes.push(Plane::from_point_normal(Vec3::splat(8.0), -n));
        }
        let region = Aabb::new(Vec3::splat(2.0), Vec3::splat(8.0));

        let mut state = 7u32;
        let mut next = || {
            state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            (state >> 8) as f32 / (1u32 << 24) as f32 * 14.0 - 2.0
        };
        let epsilon = 1e-4;
        let mut kept = 0;
        for _ in 0..500 {
            let mut start = Vec3::new(next(), next(), next());
            let mut end = Vec3::new(next(), next(), next());
            if clip_to_planes(&mut start, &mut end, &planes) {
                kept += 1;
                for p in [start, end] {
                    assert!(
                        p.cmpge(region.min - epsilon).all() && p.cmple(region.max + epsilon).all(),
                        "{p} escaped the region"
                    );
                }
            }
        }
        assert!(kept > 0);
    }

    #[test]
    fn plane_clip_rejects_segments_behind() {
        let plane = Plane::from_point_normal(Vec3::splat(5.0), Vec3::X);
        let mut start = Vec3::new(0.0, 1.0, 1.0);
        let mut end = Vec3::new(4.0, 1.0, 1.0);
        assert!(!clip_to_planes(&mut start, &mut end, &[plane]));

        let mut start = Vec3::new(0.0, 1.0, 1.0);
        let mut end = Vec3::new(0.0, 9.0, 1.0);
        assert!(!clip_to_planes(&mut start, &mut end, &[plane]));

        let mut start = Vec3::new(0.0, 1.0, 1.0);
        let mut end = Vec3::new(10.0, 1.0, 1.0);
        assert!(clip_to_planes(&mut start, &mut end, &[plane]));
        assert_relative_eq!(start.x, 5.0);
    }

    fn front_setup() -> RaySetup {
        // Orthographic view straight down -z onto a 16^3 grid
        let camera = crate::camera::Camera::orthographic(
            Vec3::new(7.5, 7.5, 40.0),
            Vec3::new(7.5, 7.5, 0.0),
            Vec3::Y,
            16.0,
            1.0,
            100.0,
        );
        let view_to_voxels = camera.view_projection_matrix(1.0).inverse();
        RaySetup {
            view_to_voxels,
            image_viewport: [64, 64],
            image_origin: [0, 0],
            bounds: Aabb::from_dims([16, 16, 16]),
            crop_box: None,
            planes: Vec::new(),
            spacing: Vec3::ONE,
            sample_distance: 0.5,
        }
    }

    #[test]
    fn ray_through_centre_crosses_volume() {
        let setup = front_setup();
        let ray = setup.cast(32, 32, 1.0).unwrap();
        // Marching along -z at half a voxel per step
        assert!(!ray.direction[2].is_forward());
        assert_eq!(ray.direction[2].magnitude(), 1 << 14);
        assert_eq!(ray.direction[0].magnitude(), 0);
        // About 15 voxels of depth at two samples per voxel
        assert!((28..=31).contains(&ray.steps), "steps = {}", ray.steps);
        let start = ray.start.to_vec3();
        assert!(start.z <= 15.0 && start.z > 14.0);
    }

    #[test]
    fn rays_beside_the_volume_have_no_work() {
        let setup = front_setup();
        assert!(setup.cast(0, 0, 1.0).is_none());
        assert!(setup.cast(63, 32, 1.0).is_none());
    }

    #[test]
    fn depth_buffer_shortens_rays() {
        let setup = front_setup();
        let full = setup.cast(32, 32, 1.0).unwrap();
        // Depth 0.38 sits at z = 40 - (1 + 0.38 * 99) ~ 1.4 in voxels
        let short = setup.cast(32, 32, 0.38).unwrap();
        assert!(short.steps < full.steps);
        assert!(setup.cast(32, 32, 0.2).is_none());
    }

    #[test]
    fn crop_box_tightens_rays() {
        let mut setup = front_setup();
        let full = setup.cast(32, 32, 1.0).unwrap();
        setup.crop_box = Some(Aabb::new(Vec3::ZERO, Vec3::new(15.0, 15.0, 7.0)));
        let cropped = setup.cast(32, 32, 1.0).unwrap();
        assert!(cropped.steps < full.steps);
        assert!(cropped.start.to_vec3().z <= 7.0);
    }
}
