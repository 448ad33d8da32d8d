//! Spherical direction encoding.
//!
//! Unit vectors are bucketed by azimuth (256 steps) and elevation (255
//! steps, both poles included). One extra index marks the zero vector so
//! flat regions can be shaded without a direction.

use std::f32::consts::{FRAC_PI_2, PI, TAU};

use glam::Vec3;

/// Azimuth buckets.
pub const AZIMUTH_STEPS: usize = 256;
/// Elevation buckets, pole to pole.
pub const ELEVATION_STEPS: usize = 255;
/// Index reserved for the zero vector.
pub const ZERO_DIRECTION: u16 = (AZIMUTH_STEPS * ELEVATION_STEPS) as u16;
/// Number of distinct encoded directions.
pub const ENCODED_DIRECTIONS: usize = ZERO_DIRECTION as usize + 1;

/// Encode a direction; the input need not be normalised.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn encode(direction: Vec3) -> u16 {
    let length = direction.length();
    if length == 0.0 || !length.is_finite() {
        return ZERO_DIRECTION;
    }
    let n = direction / length;
    let azimuth = ((n.y.atan2(n.x) + PI) / TAU * AZIMUTH_STEPS as f32).round() as usize
        % AZIMUTH_STEPS;
    let elevation = ((n.z.clamp(-1.0, 1.0).asin() + FRAC_PI_2) / PI
        * (ELEVATION_STEPS - 1) as f32)
        .round() as usize;
    (elevation.min(ELEVATION_STEPS - 1) * AZIMUTH_STEPS + azimuth) as u16
}

/// Unit vector of an encoded direction, zero for [`ZERO_DIRECTION`].
pub fn decode(index: u16) -> Vec3 {
    if index >= ZERO_DIRECTION {
        return Vec3::ZERO;
    }
    let index = usize::from(index);
    let azimuth = (index % AZIMUTH_STEPS) as f32 / AZIMUTH_STEPS as f32 * TAU - PI;
    let elevation = (index / AZIMUTH_STEPS) as f32 / (ELEVATION_STEPS - 1) as f32 * PI - FRAC_PI_2;
    let (sin_e, cos_e) = elevation.sin_cos();
    let (sin_a, cos_a) = azimuth.sin_cos();
    Vec3::new(cos_e * cos_a, cos_e * sin_a, sin_e)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn zero_vector_has_its_own_index() {
        assert_eq!(encode(Vec3::ZERO), ZERO_DIRECTION);
        assert_eq!(encode(Vec3::splat(f32::NAN)), ZERO_DIRECTION);
        assert_eq!(decode(ZERO_DIRECTION), Vec3::ZERO);
    }

    #[test]
    fn decoded_directions_are_unit() {
        for index in (0..ZERO_DIRECTION).step_by(97) {
            assert_relative_eq!(decode(index).length(), 1.0, epsilon = 1e-5);
        }
    }

    #[test]
    fn encoding_error_is_small() {
        let max_error = 1.5f32.to_radians();
        let mut state = 0x1234_5678u32;
        let mut next = || {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            state as f32 / u32::MAX as f32 * 2.0 - 1.0
        };
        for _ in 0..2000 {
            let v = Vec3::new(next(), next(), next());
            if v.length() < 0.1 {
                continue;
            }
            let n = v.normalize();
            let back = decode(encode(v));
            let angle = n.dot(back).clamp(-1.0, 1.0).acos();
            assert!(angle <= max_error, "{n} -> {back}: {angle}");
        }
    }

    #[test]
    fn axis_directions() {
        assert_relative_eq!(decode(encode(Vec3::Z)).z, 1.0, epsilon = 1e-5);
        assert_relative_eq!(decode(encode(Vec3::NEG_Z)).z, -1.0, epsilon = 1e-5);
        assert_relative_eq!(decode(encode(Vec3::X)).x, 1.0, epsilon = 1e-3);
        assert_relative_eq!(decode(encode(Vec3::NEG_Y)).y, -1.0, epsilon = 1e-3);
    }
}
