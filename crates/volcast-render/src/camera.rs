//! Camera and view management.

use glam::{Mat4, Vec3};

/// Camera for rendering.
///
/// Projections map the near plane to view depth 0 and the far plane to 1.
#[derive(Debug, Clone, PartialEq)]
pub struct Camera {
    pub position: Vec3,
    pub direction: Vec3,
    pub up: Vec3,
    /// Vertical field of view in radians
    pub fov: f32,
    pub near: f32,
    pub far: f32,
    /// Half-height of the view for parallel projection
    pub parallel_scale: Option<f32>,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 0.0, 5.0),
            direction: Vec3::NEG_Z,
            up: Vec3::Y,
            fov: std::f32::consts::FRAC_PI_4,
            near: 0.1,
            far: 1000.0,
            parallel_scale: None,
        }
    }
}

impl Camera {
    /// Create a perspective camera looking at `target`.
    pub fn new(position: Vec3, target: Vec3, up: Vec3, fov: f32, near: f32, far: f32) -> Self {
        Self {
            position,
            direction: (target - position).normalize(),
            up,
            fov,
            near,
            far,
            parallel_scale: None,
        }
    }

    /// Create a parallel-projection camera looking at `target`.
    pub fn orthographic(
        position: Vec3,
        target: Vec3,
        up: Vec3,
        half_height: f32,
        near: f32,
        far: f32,
    ) -> Self {
        Self {
            parallel_scale: Some(half_height),
            ..Self::new(position, target, up, std::f32::consts::FRAC_PI_4, near, far)
        }
    }

    /// Set the camera position.
    pub fn set_position(&mut self, position: Vec3) {
        self.position = position;
    }

    /// Look at a target position.
    pub fn look_at(&mut self, target: Vec3) {
        self.direction = (target - self.position).normalize();
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_to_rh(self.position, self.direction, self.up)
    }

    pub fn projection_matrix(&self, aspect: f32) -> Mat4 {
        match self.parallel_scale {
            Some(h) => {
                let w = h * aspect;
                Mat4::orthographic_rh(-w, w, -h, h, self.near, self.far)
            }
            None => Mat4::perspective_rh(self.fov, aspect, self.near, self.far),
        }
    }

    /// Get the view-projection matrix.
    pub fn view_projection_matrix(&self, aspect: f32) -> Mat4 {
        self.projection_matrix(aspect) * self.view_matrix()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn depth_range_is_zero_to_one() {
        for camera in [
            Camera::new(Vec3::ZERO, Vec3::NEG_Z, Vec3::Y, 1.0, 1.0, 10.0),
            Camera::orthographic(Vec3::ZERO, Vec3::NEG_Z, Vec3::Y, 5.0, 1.0, 10.0),
        ] {
            let m = camera.view_projection_matrix(1.0);
            assert_relative_eq!(m.project_point3(Vec3::new(0.0, 0.0, -1.0)).z, 0.0, epsilon = 1e-6);
            assert_relative_eq!(m.project_point3(Vec3::new(0.0, 0.0, -10.0)).z, 1.0, epsilon = 1e-5);
        }
    }

    #[test]
    fn orthographic_depth_is_linear() {
        let camera = Camera::orthographic(Vec3::ZERO, Vec3::NEG_Z, Vec3::Y, 5.0, 1.0, 11.0);
        let m = camera.view_projection_matrix(2.0);
        let p = m.project_point3(Vec3::new(10.0, 5.0, -6.0));
        assert_relative_eq!(p.z, 0.5, epsilon = 1e-6);
        assert_relative_eq!(p.x, 1.0, epsilon = 1e-6);
        assert_relative_eq!(p.y, 1.0, epsilon = 1e-6);
    }
}
