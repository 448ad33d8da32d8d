//! Core types, numerics, and math for the volcast volume ray caster.
//!
//! This crate provides the foundational pieces shared by every stage:
//! - Fixed-point positions and packed directions for ray marching
//! - Bounding boxes, planes, and homogeneous transforms
//! - Generation counters used to detect stale caches
//! - Common error types

pub mod error;
pub mod fixed;
pub mod generation;
pub mod math;

pub use error::{try_alloc, Error, Result};
pub use fixed::{FixedDirection, FixedPosition};
pub use generation::Generation;
pub use math::{Aabb, Plane};

/// Engine-wide constants
pub mod constants {
    /// Fractional bits of a fixed-point ray position
    pub const FP_SHIFT: u32 = 15;
    /// One voxel in fixed-point units
    pub const FP_ONE: u32 = 1 << FP_SHIFT;
    /// Mask selecting the fractional part of a fixed-point position
    pub const FP_MASK: u32 = FP_ONE - 1;
    /// Full scale of a lookup table entry (opacity 1.0, full color)
    pub const TABLE_MAX: u32 = 0x7fff;
    /// Largest scalar lookup table
    pub const MAX_TABLE_SIZE: usize = 32768;
    /// Entries in a gradient opacity table (one per 8-bit magnitude)
    pub const GRADIENT_TABLE_SIZE: usize = 256;
    /// Edge length of a space-leap block in voxels
    pub const BLOCK_SIZE: usize = 4;
    /// Shift converting a voxel index into a block index
    pub const BLOCK_SHIFT: u32 = 2;
    /// Maximum number of user clip planes
    pub const MAX_CLIP_PLANES: usize = 6;
    /// Maximum number of scalar components per voxel
    pub const MAX_COMPONENTS: usize = 4;
}
