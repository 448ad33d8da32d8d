//! Volumes, properties, and cameras shared by the scenario tests.

use glam::Vec3;
use volcast_core::Result;
use volcast_render::{orbit_position, Camera};
use volcast_volume::{
    ColorCurve, ColorTransferFunction, ComponentProperty, PiecewiseFunction, ScalarVolume,
    VolumeProperty,
};

/// Cube of one value, centred on the world origin with unit spacing.
pub fn uniform_volume(size: usize, value: u8) -> Result<ScalarVolume> {
    centred(size, vec![value; size * size * size])
}

/// Radial ramp: 255 at the centre falling to 0 at the inscribed sphere.
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn sphere_volume(size: usize) -> Result<ScalarVolume> {
    let centre = (size - 1) as f32 / 2.0;
    let mut data = Vec::with_capacity(size * size * size);
    for z in 0..size {
        for y in 0..size {
            for x in 0..size {
                let r = Vec3::new(x as f32, y as f32, z as f32).distance(Vec3::splat(centre));
                data.push((255.0 * (1.0 - r / centre)).clamp(0.0, 255.0) as u8);
            }
        }
    }
    centred(size, data)
}

#[allow(clippy::cast_precision_loss)]
fn centred(size: usize, data: Vec<u8>) -> Result<ScalarVolume> {
    let half = (size - 1) as f32 / 2.0;
    Ok(ScalarVolume::new([size; 3], 1, data)?.with_origin(Vec3::splat(-half)))
}

/// Fully opaque everywhere with a constant color.
pub fn opaque_property(rgb: [f64; 3]) -> VolumeProperty {
    VolumeProperty::new().with_component(
        0,
        ComponentProperty {
            color: ColorCurve::Rgb(ColorTransferFunction::from_points([
                (0.0, rgb),
                (255.0, rgb),
            ])),
            scalar_opacity: PiecewiseFunction::constant(1.0),
            ..Default::default()
        },
    )
}

/// Transparent up to `threshold`, opaque from `threshold + 1`.
pub fn threshold_property(threshold: f64) -> VolumeProperty {
    VolumeProperty::new().with_component(
        0,
        ComponentProperty {
            scalar_opacity: PiecewiseFunction::from_points([
                (threshold, 0.0),
                (threshold + 1.0, 1.0),
            ]),
            ..Default::default()
        },
    )
}

/// Grey ramp with partial opacity, for exercising accumulation.
pub fn ramp_property() -> VolumeProperty {
    VolumeProperty::new().with_component(
        0,
        ComponentProperty {
            color: ColorCurve::Gray(PiecewiseFunction::from_points([(0.0, 0.2), (255.0, 1.0)])),
            scalar_opacity: PiecewiseFunction::from_points([(30.0, 0.0), (255.0, 0.4)]),
            ..Default::default()
        },
    )
}

/// Parallel projection down the -z axis showing `half_height` world units
/// above and below the centre.
pub fn front_camera(half_height: f32) -> Camera {
    Camera::orthographic(
        Vec3::new(0.0, 0.0, 50.0),
        Vec3::ZERO,
        Vec3::Y,
        half_height,
        1.0,
        100.0,
    )
}

/// Perspective camera orbiting the origin.
pub fn orbit_camera(distance: f32, azimuth: f32, elevation: f32) -> Camera {
    Camera::new(
        orbit_position(Vec3::ZERO, distance, azimuth, elevation),
        Vec3::ZERO,
        Vec3::Y,
        std::f32::consts::FRAC_PI_4,
        1.0,
        distance * 3.0,
    )
}
