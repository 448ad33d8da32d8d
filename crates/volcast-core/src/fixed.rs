//! Fixed-point positions and directions for the marching loop.
//!
//! Positions are unsigned with 15 fractional bits, so a voxel index is a
//! shift away and the interpolation weight is a mask away. Directions are
//! stored sign-and-magnitude: the top bit set means "add" and a clear top
//! bit means "subtract", which keeps the per-step update branch-free of
//! floating comparisons.

use bytemuck::{Pod, Zeroable};
use glam::Vec3;

use crate::constants::{FP_MASK, FP_ONE, FP_SHIFT};

/// Direction word bit meaning "add the magnitude".
pub const DIRECTION_SIGN_BIT: u32 = 0x8000_0000;

/// Convert a non-negative value to fixed point, rounding to nearest.
#[inline]
pub fn to_fixed(v: f32) -> u32 {
    v.mul_add(FP_ONE as f32, 0.5) as u32
}

/// Convert a fixed-point value back to floating point.
#[inline]
pub fn to_float(v: u32) -> f32 {
    v as f32 / FP_ONE as f32
}

/// One packed component of a ray direction.
#[repr(transparent)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct FixedDirection(pub u32);

impl FixedDirection {
    /// Pack a signed direction component.
    #[inline]
    pub fn from_f32(d: f32) -> Self {
        if d >= 0.0 {
            Self(to_fixed(d) | DIRECTION_SIGN_BIT)
        } else {
            Self(to_fixed(-d))
        }
    }

    /// Step length in fixed-point units.
    #[inline]
    pub const fn magnitude(self) -> u32 {
        self.0 & !DIRECTION_SIGN_BIT
    }

    /// Whether a step adds to the position.
    #[inline]
    pub const fn is_forward(self) -> bool {
        self.0 & DIRECTION_SIGN_BIT != 0
    }

    /// Unpack to a signed float.
    #[inline]
    pub fn to_f32(self) -> f32 {
        let m = to_float(self.magnitude());
        if self.is_forward() {
            m
        } else {
            -m
        }
    }

    /// Apply `steps` increments to one position component.
    ///
    /// Wraps instead of panicking: the position one step past the last
    /// sample may leave the volume and is never read.
    #[inline]
    pub const fn apply(self, position: u32, steps: u32) -> u32 {
        let delta = self.magnitude().wrapping_mul(steps);
        if self.is_forward() {
            position.wrapping_add(delta)
        } else {
            position.wrapping_sub(delta)
        }
    }
}

/// A ray position in voxel space.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct FixedPosition(pub [u32; 3]);

impl FixedPosition {
    /// Convert a voxel-space point. Components must be non-negative.
    #[inline]
    pub fn from_vec3(v: Vec3) -> Self {
        Self([to_fixed(v.x), to_fixed(v.y), to_fixed(v.z)])
    }

    #[inline]
    pub fn to_vec3(self) -> Vec3 {
        Vec3::new(to_float(self.0[0]), to_float(self.0[1]), to_float(self.0[2]))
    }

    /// Advance by one step.
    #[inline]
    pub fn step(&mut self, direction: &[FixedDirection; 3]) {
        self.advance(direction, 1);
    }

    /// Advance by `steps` steps at once.
    #[inline]
    pub fn advance(&mut self, direction: &[FixedDirection; 3], steps: u32) {
        for (p, d) in self.0.iter_mut().zip(direction) {
            *p = d.apply(*p, steps);
        }
    }

    /// Integer voxel containing the position.
    #[inline]
    pub const fn voxel(self) -> [usize; 3] {
        [
            (self.0[0] >> FP_SHIFT) as usize,
            (self.0[1] >> FP_SHIFT) as usize,
            (self.0[2] >> FP_SHIFT) as usize,
        ]
    }

    /// Fractional offset inside the voxel, in `[0, FP_ONE)`.
    #[inline]
    pub const fn fraction(self) -> [u32; 3] {
        [self.0[0] & FP_MASK, self.0[1] & FP_MASK, self.0[2] & FP_MASK]
    }
}
