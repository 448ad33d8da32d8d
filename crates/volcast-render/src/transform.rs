//! Per-frame matrices between voxel, world, and view space.
//!
//! View space is normalised device space: x and y in `[-1, 1]`, depth in
//! `[0, 1]` from the near to the far plane.

use glam::{Mat3, Mat4, Vec3};
use volcast_core::{Aabb, Error, Result};
use volcast_volume::ScalarVolume;

use crate::camera::Camera;

/// Immutable snapshot of the frame's transforms.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VolumeTransforms {
    pub voxels_to_world: Mat4,
    pub world_to_voxels: Mat4,
    pub voxels_to_view: Mat4,
    pub view_to_voxels: Mat4,
    /// Carries voxel-space gradients to world-space normals
    pub normal_to_world: Mat3,
    /// Sample-point bounds, `[0, dim - 1]`
    pub bounds: Aabb,
    pub spacing: Vec3,
}

impl VolumeTransforms {
    /// Build the transforms for one frame.
    pub fn compute(
        camera: &Camera,
        aspect: f32,
        actor_pose: Mat4,
        volume: &ScalarVolume,
    ) -> Result<Self> {
        let spacing = volume.spacing();
        let voxels_to_world =
            actor_pose * Mat4::from_translation(volume.origin()) * Mat4::from_scale(spacing);
        if voxels_to_world.determinant() == 0.0 || !voxels_to_world.is_finite() {
            return Err(Error::InvalidSpacing(format!(
                "voxel to world transform is singular (spacing {spacing})"
            )));
        }
        let world_to_voxels = voxels_to_world.inverse();

        let voxels_to_view = camera.view_projection_matrix(aspect) * voxels_to_world;
        if voxels_to_view.determinant() == 0.0 || !voxels_to_view.is_finite() {
            return Err(Error::InvalidConfig("degenerate camera projection".into()));
        }
        let view_to_voxels = voxels_to_view.inverse();

        Ok(Self {
            voxels_to_world,
            world_to_voxels,
            voxels_to_view,
            view_to_voxels,
            normal_to_world: Mat3::from_mat4(actor_pose).inverse().transpose(),
            bounds: Aabb::from_dims(volume.dims()),
            spacing,
        })
    }

    /// A world point in voxel coordinates.
    #[inline]
    pub fn to_voxels(&self, world: Vec3) -> Vec3 {
        self.world_to_voxels.transform_point3(world)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn volume() -> ScalarVolume {
        ScalarVolume::new([4, 4, 4], 1, vec![0u8; 64])
            .unwrap()
            .with_spacing(Vec3::new(2.0, 1.0, 0.5))
            .unwrap()
            .with_origin(Vec3::new(10.0, 0.0, -1.0))
    }

    #[test]
    fn voxels_map_through_origin_and_spacing() {
        let camera = Camera::default();
        let t = VolumeTransforms::compute(&camera, 1.0, Mat4::IDENTITY, &volume()).unwrap();
        let world = t.voxels_to_world.transform_point3(Vec3::new(1.0, 2.0, 4.0));
        assert_relative_eq!(world.x, 12.0);
        assert_relative_eq!(world.y, 2.0);
        assert_relative_eq!(world.z, 1.0);

        let back = t.to_voxels(world);
        assert_relative_eq!(back.x, 1.0, epsilon = 1e-5);
        assert_relative_eq!(back.z, 4.0, epsilon = 1e-5);
        assert_eq!(t.bounds.max, Vec3::splat(3.0));
    }

    #[test]
    fn view_round_trip() {
        let camera = Camera::new(
            Vec3::new(20.0, 10.0, 30.0),
            Vec3::new(12.0, 2.0, 0.0),
            Vec3::Y,
            0.8,
            1.0,
            100.0,
        );
        let pose = Mat4::from_rotation_y(0.3);
        let t = VolumeTransforms::compute(&camera, 1.5, pose, &volume()).unwrap();
        let p = Vec3::new(1.5, 2.0, 0.5);
        let view = t.voxels_to_view.project_point3(p);
        let back = t.view_to_voxels.project_point3(view);
        assert_relative_eq!(back.x, p.x, epsilon = 1e-3);
        assert_relative_eq!(back.y, p.y, epsilon = 1e-3);
        assert_relative_eq!(back.z, p.z, epsilon = 1e-3);
    }
}
