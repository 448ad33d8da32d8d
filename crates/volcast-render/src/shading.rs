//! Diffuse and specular tables indexed by encoded normal direction.

use glam::{Mat3, Vec3};
use serde::{Deserialize, Serialize};
use tracing::debug;
use volcast_core::constants::TABLE_MAX;
use volcast_volume::direction::{self, ENCODED_DIRECTIONS};
use volcast_volume::ShadingCoefficients;

use crate::camera::Camera;

/// A directional light.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Light {
    /// Direction the light travels, world space
    pub direction: Vec3,
    pub color: Vec3,
    pub intensity: f32,
}

impl Light {
    /// White light shining along the view direction.
    pub fn headlight(camera: &Camera) -> Self {
        Self {
            direction: camera.direction,
            color: Vec3::ONE,
            intensity: 1.0,
        }
    }
}

/// Fixed-point lighting terms of one component set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SetShading {
    pub diffuse: Vec<[u16; 3]>,
    pub specular: Vec<[u16; 3]>,
}

#[derive(Clone, Debug, PartialEq)]
struct ShadingKey {
    lights: Vec<Light>,
    coefficients: Vec<ShadingCoefficients>,
    normal_to_world: Mat3,
    view_direction: Vec3,
    two_sided: bool,
}

/// Shading tables for every component set.
#[derive(Clone, Debug)]
pub struct ShadingTables {
    sets: Vec<SetShading>,
    key: ShadingKey,
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn quantize(v: Vec3) -> [u16; 3] {
    v.clamp(Vec3::ZERO, Vec3::ONE)
        .to_array()
        .map(|c| c.mul_add(TABLE_MAX as f32, 0.5) as u16)
}

impl ShadingTables {
    /// Evaluate every encoded direction under the lights.
    pub fn build(
        lights: &[Light],
        coefficients: &[ShadingCoefficients],
        normal_to_world: Mat3,
        view_direction: Vec3,
        two_sided: bool,
    ) -> Self {
        let _span = tracing::trace_span!("build_shading_tables").entered();
        let key = ShadingKey {
            lights: lights.to_vec(),
            coefficients: coefficients.to_vec(),
            normal_to_world,
            view_direction,
            two_sided,
        };

        let to_viewer = -view_direction.normalize_or_zero();
        let normals: Vec<Vec3> = (0..ENCODED_DIRECTIONS)
            .map(|i| (normal_to_world * direction::decode(i as u16)).normalize_or_zero())
            .collect();

        let sets = coefficients
            .iter()
            .map(|material| {
                let (diffuse, specular) = normals
                    .iter()
                    .map(|&n| shade(n, lights, material, to_viewer, two_sided))
                    .map(|(d, s)| (quantize(d), quantize(s)))
                    .unzip();
                SetShading { diffuse, specular }
            })
            .collect();

        debug!(lights = lights.len(), sets = coefficients.len(), "Built shading tables");
        Self { sets, key }
    }

    /// Whether the tables match these inputs.
    pub fn is_current(
        &self,
        lights: &[Light],
        coefficients: &[ShadingCoefficients],
        normal_to_world: Mat3,
        view_direction: Vec3,
        two_sided: bool,
    ) -> bool {
        self.key.lights == lights
            && self.key.coefficients == coefficients
            && self.key.normal_to_world == normal_to_world
            && self.key.view_direction == view_direction
            && self.key.two_sided == two_sided
    }

    #[inline]
    pub fn set(&self, index: usize) -> &SetShading {
        &self.sets[index]
    }
}

/// Blinn-Phong terms for one normal.
///
/// A zero normal has no orientation and is lit as if facing the light.
fn shade(
    normal: Vec3,
    lights: &[Light],
    material: &ShadingCoefficients,
    to_viewer: Vec3,
    two_sided: bool,
) -> (Vec3, Vec3) {
    let ambient = Vec3::splat(material.ambient);
    if normal == Vec3::ZERO {
        return (ambient + Vec3::splat(material.diffuse), Vec3::ZERO);
    }

    let mut diffuse = Vec3::ZERO;
    let mut specular = Vec3::ZERO;
    for light in lights {
        let to_light = -light.direction.normalize_or_zero();
        let radiance = light.color * light.intensity;
        let mut n = normal;
        let mut n_dot_l = n.dot(to_light);
        if two_sided && n_dot_l < 0.0 {
            n = -n;
            n_dot_l = -n_dot_l;
        }
        if n_dot_l <= 0.0 {
            continue;
        }
        diffuse += radiance * (material.diffuse * n_dot_l);

        let half = (to_light + to_viewer).normalize_or_zero();
        let n_dot_h = n.dot(half);
        if n_dot_h > 0.0 {
            specular += radiance * (material.specular * n_dot_h.powf(material.specular_power));
        }
    }
    (ambient + diffuse, specular)
}
