//! Per-voxel gradient estimation.
//!
//! Each voxel gets an encoded normal and an 8-bit magnitude per component
//! set. Differences are central where both neighbours exist and one-sided
//! at the faces. When the radius-1 gradient is below tolerance the radius
//! grows to 2 and then 3 to find a direction, so flat regions get a zero
//! normal instead of amplified noise.

use glam::Vec3;
use rayon::prelude::*;
use tracing::debug;
use volcast_core::error::try_alloc;
use volcast_core::{Generation, Result};

use crate::direction;
use crate::scalar::{SampleVisitor, Scalar, ScalarVolume};

/// Largest neighbour radius tried when searching for a direction.
const MAX_RADIUS: usize = 3;

/// Encoded normals and magnitudes for every voxel.
#[derive(Clone, Debug)]
pub struct GradientField {
    dims: [usize; 3],
    sets: usize,
    normals: Vec<u16>,
    magnitudes: Vec<u8>,
    independent: bool,
    source: Generation,
    generation: Generation,
}

/// Estimation parameters of one component set.
#[derive(Clone, Copy, Debug)]
struct SetParams {
    component: usize,
    magnitude_scale: f32,
    tolerance: f32,
}

/// Neighbourhood geometry shared by every voxel.
#[derive(Clone, Copy, Debug)]
struct Estimator {
    dims: [usize; 3],
    components: usize,
    aspect: Vec3,
}

struct GradientVisitor<'a> {
    estimator: Estimator,
    params: &'a [SetParams],
    normals: &'a mut [u16],
    magnitudes: &'a mut [u8],
}

impl SampleVisitor for GradientVisitor<'_> {
    type Output = ();

    fn visit<T: Scalar>(self, samples: &[T]) {
        let Self {
            estimator,
            params,
            normals,
            magnitudes,
        } = self;
        let [dx, dy, _] = estimator.dims;
        let sets = params.len();
        let slice = dx * dy * sets;

        normals
            .par_chunks_mut(slice)
            .zip(magnitudes.par_chunks_mut(slice))
            .enumerate()
            .for_each(|(z, (normals, magnitudes))| {
                for y in 0..dy {
                    for x in 0..dx {
                        for (s, set) in params.iter().enumerate() {
                            let (normal, magnitude) = estimator.estimate(samples, [x, y, z], set);
                            let i = (x + dx * y) * sets + s;
                            normals[i] = normal;
                            magnitudes[i] = magnitude;
                        }
                    }
                }
            });
    }
}

impl Estimator {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn estimate<T: Scalar>(&self, samples: &[T], voxel: [usize; 3], set: &SetParams) -> (u16, u8) {
        let [dx, dy, _] = self.dims;
        let strides = [1, dx, dx * dy];
        let base = voxel[0] + dx * (voxel[1] + dy * voxel[2]);
        let value = |index: usize| samples[index * self.components + set.component].to_f32();

        let mut magnitude = 0u8;
        for radius in 1..=MAX_RADIUS {
            let mut n = Vec3::ZERO;
            for axis in 0..3 {
                let p = voxel[axis];
                let dim = self.dims[axis];
                let step = strides[axis] * radius;
                let diff = if p >= radius && p + radius < dim {
                    value(base - step) - value(base + step)
                } else if p + radius < dim {
                    2.0 * (value(base) - value(base + step))
                } else if p >= radius {
                    2.0 * (value(base - step) - value(base))
                } else {
                    0.0
                };
                n[axis] = diff / (radius as f32 * self.aspect[axis]);
            }

            let length = n.length();
            // Only the radius-1 estimate carries magnitude
            if radius == 1 {
                magnitude = ((length * set.magnitude_scale).clamp(0.0, 255.0) + 0.5) as u8;
            }
            if length > set.tolerance {
                return (direction::encode(n / length), magnitude);
            }
        }
        (direction::ZERO_DIRECTION, magnitude)
    }
}

impl GradientField {
    /// Estimate gradients for every voxel.
    ///
    /// Independent data gets one set per component; dependent data gets a
    /// single set from its last component.
    pub fn compute(volume: &ScalarVolume, independent: bool) -> Result<Self> {
        let _span = tracing::trace_span!("compute_gradients").entered();
        let dims = volume.dims();
        let components = volume.components();
        let independent = independent || components == 1;

        let spacing = volume.spacing();
        let average = (spacing.x + spacing.y + spacing.z) / 3.0;
        let aspect = spacing * 2.0 / average;

        let components_used: Vec<usize> = if independent {
            (0..components).collect()
        } else {
            vec![components - 1]
        };
        let params: Vec<SetParams> = components_used
            .into_iter()
            .map(|component| {
                let (min, max) = volume.component_range(component);
                let range = (max - min) as f32;
                let magnitude_scale = if range > 0.0 {
                    255.0 / (0.25 * range)
                } else if independent {
                    1.0
                } else {
                    0.0
                };
                SetParams {
                    component,
                    magnitude_scale,
                    tolerance: range * 1.0e-5,
                }
            })
            .collect();

        let sets = params.len();
        let len = volume.voxel_count() * sets;
        let mut normals = try_alloc::<u16>(len, "gradient normals")?;
        let mut magnitudes = try_alloc::<u8>(len, "gradient magnitudes")?;

        volume.data().visit(GradientVisitor {
            estimator: Estimator {
                dims,
                components,
                aspect,
            },
            params: &params,
            normals: &mut normals,
            magnitudes: &mut magnitudes,
        });

        debug!(?dims, sets, "Computed gradient field");

        Ok(Self {
            dims,
            sets,
            normals,
            magnitudes,
            independent,
            source: volume.generation(),
            generation: Generation::next(),
        })
    }

    /// Whether the field still matches the volume.
    pub fn is_current(&self, volume: &ScalarVolume, independent: bool) -> bool {
        self.source == volume.generation()
            && self.dims == volume.dims()
            && self.independent == (independent || volume.components() == 1)
    }

    /// Changes on every rebuild.
    pub const fn generation(&self) -> Generation {
        self.generation
    }

    pub const fn sets(&self) -> usize {
        self.sets
    }

    pub const fn dims(&self) -> [usize; 3] {
        self.dims
    }

    #[inline]
    pub fn normal(&self, voxel_index: usize, set: usize) -> u16 {
        self.normals[voxel_index * self.sets + set]
    }

    #[inline]
    pub fn magnitude(&self, voxel_index: usize, set: usize) -> u8 {
        self.magnitudes[voxel_index * self.sets + set]
    }

    pub fn magnitudes(&self) -> &[u8] {
        &self.magnitudes
    }
}
