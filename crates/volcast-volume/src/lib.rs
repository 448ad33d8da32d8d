//! Volume data and the classification structures built from it.
//!
//! Everything here is built once per change and read by the render kernel:
//! - [`ScalarVolume`]: typed, multi-component sample grid
//! - [`VolumeProperty`]: transfer curves and shading coefficients
//! - [`LookupTables`]: fixed-point tables sampled from the curves
//! - [`GradientField`]: encoded normals and 8-bit magnitudes
//! - [`SpaceLeapIndex`]: min/max block index used to skip empty space

pub mod direction;
pub mod gradient;
pub mod scalar;
pub mod space_leap;
pub mod tables;
pub mod transfer;

pub use gradient::GradientField;
pub use scalar::{SampleVisitor, Scalar, ScalarData, ScalarType, ScalarVolume};
pub use space_leap::{BlockEntry, IndexUpdate, SpaceLeapIndex};
pub use tables::{BlendMode, ComponentTables, IndexMapping, LookupTables};
pub use transfer::{
    ColorCurve, ColorTransferFunction, ComponentProperty, Interpolation, PiecewiseFunction,
    ShadingCoefficients, VolumeProperty,
};
