//! CPU volume ray casting for volcast.
//!
//! This crate provides:
//! - Camera and per-frame voxel/world/view transforms
//! - Ray setup with box, clip-plane, and cropping clipping
//! - Image fitting with per-row bounds
//! - The multi-threaded fixed-point march and composite kernel
//! - [`VolumeRenderer`], which ties the stages together per frame

pub mod camera;
pub mod config;
pub mod crop;
pub mod image;
pub mod kernel;
pub mod ray;
pub mod renderer;
pub mod shading;
pub mod transform;

pub use camera::Camera;
pub use config::RenderConfig;
pub use crop::{Cropping, VoxelCropping};
pub use image::{Coverage, DepthBuffer, RayCastImage, RowSpan};
pub use kernel::{CompositeAccumulator, KernelVariant};
pub use ray::{RayInfo, RaySetup};
pub use renderer::{orbit_position, AbortHandle, RenderRequest, RenderStatus, VolumeRenderer};
pub use shading::{Light, ShadingTables};
pub use transform::VolumeTransforms;
