//! Cropping regions.
//!
//! Six axis-aligned planes split the volume into 27 regions, numbered
//! `x + 3y + 9z` with 0 being the low side on every axis. A 27-bit mask
//! selects which regions are rendered.

use glam::{Mat4, Vec3};
use serde::{Deserialize, Serialize};
use volcast_core::fixed::to_fixed;
use volcast_core::{Aabb, FixedPosition};

/// Only the centre region.
pub const SUBVOLUME: u32 = 0x000_2000;
/// The centre region and its six face neighbours.
pub const CROSS: u32 = 0x041_7410;
/// Everything except [`CROSS`].
pub const INVERTED_CROSS: u32 = 0x7be_8bef;
/// All 27 regions.
pub const ALL_REGIONS: u32 = 0x7ff_ffff;

/// Cropping configuration in world space.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Cropping {
    pub enabled: bool,
    /// `[xmin, xmax, ymin, ymax, zmin, zmax]`
    pub planes: [f32; 6],
    pub regions: u32,
}

impl Default for Cropping {
    fn default() -> Self {
        Self {
            enabled: false,
            planes: [0.0; 6],
            regions: SUBVOLUME,
        }
    }
}

impl Cropping {
    /// Crop to a single world-space box.
    pub fn subvolume(min: Vec3, max: Vec3) -> Self {
        Self {
            enabled: true,
            planes: [min.x, max.x, min.y, max.y, min.z, max.z],
            regions: SUBVOLUME,
        }
    }

    /// A single box, clipped up front instead of per sample.
    pub const fn is_simple(&self) -> bool {
        self.enabled && self.regions == SUBVOLUME
    }

    /// Whether samples must be tested one by one.
    pub const fn needs_sample_test(&self) -> bool {
        self.enabled && !self.is_simple() && self.regions & ALL_REGIONS != ALL_REGIONS
    }
}

/// Cropping planes converted to the current voxel space.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VoxelCropping {
    /// Crop box in voxel coordinates
    pub bounds: Aabb,
    fixed_planes: [u32; 6],
    regions: u32,
}

impl VoxelCropping {
    pub fn new(cropping: &Cropping, world_to_voxels: Mat4) -> Self {
        let p = cropping.planes;
        let a = world_to_voxels.transform_point3(Vec3::new(p[0], p[2], p[4]));
        let b = world_to_voxels.transform_point3(Vec3::new(p[1], p[3], p[5]));
        let bounds = Aabb::from_corners(a, b);
        let clamped_min = bounds.min.max(Vec3::ZERO);
        let clamped_max = bounds.max.max(Vec3::ZERO);
        Self {
            bounds,
            fixed_planes: [
                to_fixed(clamped_min.x),
                to_fixed(clamped_max.x),
                to_fixed(clamped_min.y),
                to_fixed(clamped_max.y),
                to_fixed(clamped_min.z),
                to_fixed(clamped_max.z),
            ],
            regions: cropping.regions,
        }
    }

    /// Region index of a position.
    #[inline]
    pub const fn region(&self, pos: FixedPosition) -> u32 {
        let [x, y, z] = pos.0;
        let p = &self.fixed_planes;
        let mut index = if z < p[4] {
            0
        } else if z > p[5] {
            18
        } else {
            9
        };
        if y >= p[2] {
            index += if y > p[3] { 6 } else { 3 };
        }
        if x >= p[0] {
            index += if x > p[1] { 2 } else { 1 };
        }
        index
    }

    /// Whether the sample at `pos` is cropped away.
    #[inline]
    pub const fn is_cropped(&self, pos: FixedPosition) -> bool {
        self.regions & (1 << self.region(pos)) == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cropping(regions: u32) -> VoxelCropping {
        let c = Cropping {
            enabled: true,
            planes: [2.0, 5.0, 2.0, 5.0, 2.0, 5.0],
            regions,
        };
        VoxelCropping::new(&c, Mat4::IDENTITY)
    }

    fn at(x: f32, y: f32, z: f32) -> FixedPosition {
        FixedPosition::from_vec3(Vec3::new(x, y, z))
    }

    #[test]
    fn region_numbering() {
        let c = cropping(SUBVOLUME);
        assert_eq!(c.region(at(0.0, 0.0, 0.0)), 0);
        assert_eq!(c.region(at(3.0, 3.0, 3.0)), 13);
        assert_eq!(c.region(at(9.0, 9.0, 9.0)), 26);
        assert_eq!(c.region(at(3.0, 0.0, 9.0)), 19);
    }

    #[test]
    fn subvolume_keeps_centre() {
        let c = cropping(SUBVOLUME);
        assert!(!c.is_cropped(at(3.0, 4.0, 2.5)));
        assert!(c.is_cropped(at(1.0, 4.0, 2.5)));
        assert!(c.is_cropped(at(3.0, 4.0, 6.0)));
    }

    #[test]
    fn cross_masks() {
        let cross = cropping(CROSS);
        assert!(!cross.is_cropped(at(0.0, 3.0, 3.0)));
        assert!(cross.is_cropped(at(0.0, 0.0, 3.0)));
        let inverted = cropping(INVERTED_CROSS);
        assert!(inverted.is_cropped(at(0.0, 3.0, 3.0)));
        assert!(!inverted.is_cropped(at(0.0, 0.0, 3.0)));
        assert_eq!(CROSS | INVERTED_CROSS, ALL_REGIONS);
        assert_eq!(CROSS & INVERTED_CROSS, 0);
    }

    #[test]
    fn simple_detection() {
        assert!(Cropping::subvolume(Vec3::ZERO, Vec3::ONE).is_simple());
        let mut c = Cropping::subvolume(Vec3::ZERO, Vec3::ONE);
        c.regions = CROSS;
        assert!(!c.is_simple());
        assert!(c.needs_sample_test());
        c.enabled = false;
        assert!(!c.needs_sample_test());
    }
}
