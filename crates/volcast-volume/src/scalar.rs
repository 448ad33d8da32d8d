//! Dense scalar grids.
//!
//! Samples are stored x-fastest with components interleaved. The element
//! type is kept as-is; consumers that need per-sample speed go through a
//! [`SampleVisitor`] so the inner loops are monomorphised once per type.

use glam::Vec3;
use volcast_core::constants::MAX_COMPONENTS;
use volcast_core::{Error, Generation, Result};

/// Element type of a scalar grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ScalarType {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    F32,
    F64,
}

impl ScalarType {
    /// Floating types always get full-size quantised lookup tables.
    pub const fn is_floating(self) -> bool {
        matches!(self, Self::F32 | Self::F64)
    }
}

/// A sample element type.
pub trait Scalar: Copy + Send + Sync + 'static {
    const TYPE: ScalarType;

    fn to_f32(self) -> f32;
}

macro_rules! impl_scalar {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl Scalar for $ty {
                const TYPE: ScalarType = ScalarType::$variant;

                #[inline]
                #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
                fn to_f32(self) -> f32 {
                    self as f32
                }
            }

            impl From<Vec<$ty>> for ScalarData {
                fn from(samples: Vec<$ty>) -> Self {
                    Self::$variant(samples)
                }
            }
        )*
    };
}

/// Owned sample storage.
#[derive(Clone, Debug, PartialEq)]
pub enum ScalarData {
    U8(Vec<u8>),
    I8(Vec<i8>),
    U16(Vec<u16>),
    I16(Vec<i16>),
    U32(Vec<u32>),
    I32(Vec<i32>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

impl_scalar! {
    u8 => U8,
    i8 => I8,
    u16 => U16,
    i16 => I16,
    u32 => U32,
    i32 => I32,
    f32 => F32,
    f64 => F64,
}

/// Callback receiving the typed sample slice.
pub trait SampleVisitor {
    type Output;

    fn visit<T: Scalar>(self, samples: &[T]) -> Self::Output;
}

impl ScalarData {
    pub fn len(&self) -> usize {
        match self {
            Self::U8(v) => v.len(),
            Self::I8(v) => v.len(),
            Self::U16(v) => v.len(),
            Self::I16(v) => v.len(),
            Self::U32(v) => v.len(),
            Self::I32(v) => v.len(),
            Self::F32(v) => v.len(),
            Self::F64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub const fn scalar_type(&self) -> ScalarType {
        match self {
            Self::U8(_) => ScalarType::U8,
            Self::I8(_) => ScalarType::I8,
            Self::U16(_) => ScalarType::U16,
            Self::I16(_) => ScalarType::I16,
            Self::U32(_) => ScalarType::U32,
            Self::I32(_) => ScalarType::I32,
            Self::F32(_) => ScalarType::F32,
            Self::F64(_) => ScalarType::F64,
        }
    }

    /// Dispatch on the element type.
    pub fn visit<V: SampleVisitor>(&self, visitor: V) -> V::Output {
        match self {
            Self::U8(v) => visitor.visit(v),
            Self::I8(v) => visitor.visit(v),
            Self::U16(v) => visitor.visit(v),
            Self::I16(v) => visitor.visit(v),
            Self::U32(v) => visitor.visit(v),
            Self::I32(v) => visitor.visit(v),
            Self::F32(v) => visitor.visit(v),
            Self::F64(v) => visitor.visit(v),
        }
    }
}

/// Per-component `(min, max)` over the whole grid.
struct RangeVisitor {
    components: usize,
}

impl SampleVisitor for RangeVisitor {
    type Output = Vec<(f64, f64)>;

    fn visit<T: Scalar>(self, samples: &[T]) -> Self::Output {
        let mut ranges = vec![(f64::INFINITY, f64::NEG_INFINITY); self.components];
        for voxel in samples.chunks_exact(self.components) {
            for (range, &s) in ranges.iter_mut().zip(voxel) {
                let v = f64::from(s.to_f32());
                range.0 = range.0.min(v);
                range.1 = range.1.max(v);
            }
        }
        ranges
    }
}

/// A dense 3D grid of 1 to 4 component samples.
#[derive(Clone, Debug)]
pub struct ScalarVolume {
    dims: [usize; 3],
    components: usize,
    spacing: Vec3,
    origin: Vec3,
    data: ScalarData,
    ranges: Vec<(f64, f64)>,
    generation: Generation,
}

impl ScalarVolume {
    /// Create a volume with unit spacing at the origin.
    pub fn new(dims: [usize; 3], components: usize, data: impl Into<ScalarData>) -> Result<Self> {
        let data = data.into();
        Self::validate(dims, components, &data)?;
        let ranges = data.visit(RangeVisitor { components });
        Ok(Self {
            dims,
            components,
            spacing: Vec3::ONE,
            origin: Vec3::ZERO,
            data,
            ranges,
            generation: Generation::next(),
        })
    }

    /// Builder-style spacing setter.
    pub fn with_spacing(mut self, spacing: Vec3) -> Result<Self> {
        self.set_spacing(spacing)?;
        Ok(self)
    }

    /// Builder-style origin setter.
    #[must_use]
    pub fn with_origin(mut self, origin: Vec3) -> Self {
        self.set_origin(origin);
        self
    }

    fn validate(dims: [usize; 3], components: usize, data: &ScalarData) -> Result<()> {
        if dims.iter().any(|&d| d == 0) {
            return Err(Error::InvalidData(format!("dimensions {dims:?} must be >= 1")));
        }
        if !(1..=MAX_COMPONENTS).contains(&components) {
            return Err(Error::InvalidData(format!(
                "{components} components, expected 1..={MAX_COMPONENTS}"
            )));
        }
        let expected = dims[0] * dims[1] * dims[2] * components;
        if data.len() != expected {
            return Err(Error::InvalidData(format!(
                "buffer holds {} samples, extent needs {expected}",
                data.len()
            )));
        }
        Ok(())
    }

    /// Replace the samples, keeping geometry.
    pub fn set_data(&mut self, data: impl Into<ScalarData>) -> Result<()> {
        let data = data.into();
        Self::validate(self.dims, self.components, &data)?;
        self.ranges = data.visit(RangeVisitor {
            components: self.components,
        });
        self.data = data;
        self.generation = Generation::next();
        Ok(())
    }

    pub fn set_spacing(&mut self, spacing: Vec3) -> Result<()> {
        if !spacing.is_finite() || spacing.cmpeq(Vec3::ZERO).any() {
            return Err(Error::InvalidSpacing(format!("{spacing}")));
        }
        self.spacing = spacing;
        // Gradients depend on spacing
        self.generation = Generation::next();
        Ok(())
    }

    pub fn set_origin(&mut self, origin: Vec3) {
        self.origin = origin;
    }

    #[inline]
    pub const fn dims(&self) -> [usize; 3] {
        self.dims
    }

    #[inline]
    pub const fn components(&self) -> usize {
        self.components
    }

    #[inline]
    pub const fn spacing(&self) -> Vec3 {
        self.spacing
    }

    #[inline]
    pub const fn origin(&self) -> Vec3 {
        self.origin
    }

    #[inline]
    pub const fn data(&self) -> &ScalarData {
        &self.data
    }

    #[inline]
    pub const fn scalar_type(&self) -> ScalarType {
        self.data.scalar_type()
    }

    /// Changes whenever samples or spacing change.
    #[inline]
    pub const fn generation(&self) -> Generation {
        self.generation
    }

    /// `(min, max)` of one component.
    #[inline]
    pub fn component_range(&self, component: usize) -> (f64, f64) {
        self.ranges[component]
    }

    #[inline]
    pub const fn voxel_count(&self) -> usize {
        self.dims[0] * self.dims[1] * self.dims[2]
    }

    /// Linear voxel index, x fastest.
    #[inline]
    pub const fn voxel_index(&self, x: usize, y: usize, z: usize) -> usize {
        x + self.dims[0] * (y + self.dims[1] * z)
    }

    /// Read one sample as `f64`.
    pub fn value(&self, x: usize, y: usize, z: usize, component: usize) -> f64 {
        struct Read(usize);
        impl SampleVisitor for Read {
            type Output = f64;
            fn visit<T: Scalar>(self, samples: &[T]) -> f64 {
                f64::from(samples[self.0].to_f32())
            }
        }
        self.data
            .visit(Read(self.voxel_index(x, y, z) * self.components + component))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_extent() {
        assert!(matches!(
            ScalarVolume::new([2, 2, 2], 1, vec![0u8; 7]),
            Err(Error::InvalidData(_))
        ));
        assert!(ScalarVolume::new([0, 2, 2], 1, Vec::<u8>::new()).is_err());
        assert!(ScalarVolume::new([1, 1, 1], 5, vec![0u8; 5]).is_err());
    }

    #[test]
    fn rejects_zero_spacing() {
        let volume = ScalarVolume::new([2, 2, 2], 1, vec![0u8; 8]).unwrap();
        assert!(matches!(
            volume.with_spacing(Vec3::new(1.0, 0.0, 1.0)),
            Err(Error::InvalidSpacing(_))
        ));
    }

    #[test]
    fn ranges_per_component() {
        let data: Vec<i16> = vec![-5, 100, 7, 3, 0, -200, 12, 50];
        let volume = ScalarVolume::new([2, 2, 1], 2, data).unwrap();
        assert_eq!(volume.scalar_type(), ScalarType::I16);
        assert_eq!(volume.component_range(0), (-5.0, 12.0));
        assert_eq!(volume.component_range(1), (-200.0, 100.0));
        assert_eq!(volume.value(1, 1, 0, 1), 50.0);
    }

    #[test]
    fn modification_bumps_generation() {
        let mut volume = ScalarVolume::new([2, 1, 1], 1, vec![1.0f32, 2.0]).unwrap();
        let before = volume.generation();
        volume.set_data(vec![3.0f32, 4.0]).unwrap();
        assert!(volume.generation() > before);
        assert_eq!(volume.component_range(0), (3.0, 4.0));

        let before = volume.generation();
        volume.set_origin(Vec3::ONE);
        assert_eq!(volume.generation(), before);
    }
}
