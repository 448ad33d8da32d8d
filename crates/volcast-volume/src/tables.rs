//! Fixed-point lookup tables sampled from transfer curves.
//!
//! Tables are indexed by a quantised scalar: `(value + shift) * scale`,
//! truncated. Integer data with a narrow range maps one table entry per
//! integer value; floating or wide data is squeezed into the largest table.

use serde::{Deserialize, Serialize};
use tracing::debug;
use volcast_core::constants::{GRADIENT_TABLE_SIZE, MAX_TABLE_SIZE, TABLE_MAX};
use volcast_core::{Error, Generation, Result};

use crate::scalar::ScalarVolume;
use crate::transfer::VolumeProperty;

/// How samples along a ray are combined.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlendMode {
    #[default]
    Composite,
    MaximumIntensity,
    MinimumIntensity,
}

impl BlendMode {
    /// Whether the mode accumulates opacity along the ray.
    pub const fn is_compositing(self) -> bool {
        matches!(self, Self::Composite)
    }
}

/// Mapping from a scalar value to a table index.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct IndexMapping {
    pub shift: f32,
    pub scale: f32,
    pub size: usize,
}

impl IndexMapping {
    /// Pick the table layout for a component range.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn for_range((min, max): (f64, f64), floating: bool) -> Self {
        let range = max - min;
        if floating || range > f64::from(TABLE_MAX) {
            Self {
                shift: -min as f32,
                scale: if range > 0.0 {
                    (f64::from(TABLE_MAX) / range) as f32
                } else {
                    1.0
                },
                size: MAX_TABLE_SIZE,
            }
        } else {
            Self {
                shift: -min as f32,
                scale: 1.0,
                size: range as usize + 1,
            }
        }
    }

    /// Table index of a (possibly interpolated) scalar value.
    #[inline]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn index(&self, value: f32) -> u16 {
        let i = ((value + self.shift) * self.scale) as usize;
        i.min(self.size - 1) as u16
    }

    /// Scalar value at the centre of a table entry.
    pub fn value_at(&self, index: usize) -> f64 {
        index as f64 / f64::from(self.scale) - f64::from(self.shift)
    }
}

/// Classification tables of one component set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ComponentTables {
    /// RGB at [0, 32767]
    pub color: Vec<[u16; 3]>,
    /// Opacity at [0, 32767], already corrected for the sample distance
    pub scalar_opacity: Vec<u16>,
    /// Opacity scale per 8-bit gradient magnitude
    pub gradient_opacity: Vec<u16>,
    pub gradient_opacity_required: bool,
    /// First index with non-zero opacity, table length when none
    pub first_visible_scalar: usize,
    /// First magnitude with non-zero gradient opacity, 256 when none
    pub first_visible_gradient: usize,
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct TableKey {
    volume: Generation,
    property: Generation,
    blend_mode: BlendMode,
    sample_distance: f32,
    components: usize,
}

/// All lookup tables for one volume/property pair.
#[derive(Clone, Debug)]
pub struct LookupTables {
    mappings: Vec<IndexMapping>,
    sets: Vec<ComponentTables>,
    independent: bool,
    key: TableKey,
    generation: Generation,
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn quantize(v: f64) -> u16 {
    v.clamp(0.0, 1.0).mul_add(f64::from(TABLE_MAX), 0.5) as u16
}

impl LookupTables {
    pub fn build(
        volume: &ScalarVolume,
        property: &VolumeProperty,
        sample_distance: f32,
        blend_mode: BlendMode,
    ) -> Result<Self> {
        let _span = tracing::trace_span!("build_lookup_tables").entered();
        let components = volume.components();
        let independent = property.independent() || components == 1;
        if !independent && components != 2 && components != 4 {
            return Err(Error::InvalidConfig(format!(
                "dependent components need 2 or 4 channels, got {components}"
            )));
        }
        let floating = volume.scalar_type().is_floating();
        let mappings: Vec<IndexMapping> = (0..components)
            .map(|c| IndexMapping::for_range(volume.component_range(c), floating))
            .collect();

        let sets = if independent {
            (0..components)
                .map(|c| {
                    Self::build_set(volume, property, &mappings, c, c, c, sample_distance, blend_mode)
                })
                .collect()
        } else {
            // Dependent data uses the first property; color follows
            // component 0 and opacity the last component
            vec![Self::build_set(
                volume,
                property,
                &mappings,
                0,
                0,
                components - 1,
                sample_distance,
                blend_mode,
            )]
        };

        debug!(
            components,
            independent,
            table_size = mappings[0].size,
            ?blend_mode,
            "Built lookup tables"
        );

        Ok(Self {
            mappings,
            sets,
            independent,
            key: TableKey {
                volume: volume.generation(),
                property: property.generation(),
                blend_mode,
                sample_distance,
                components,
            },
            generation: Generation::next(),
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn build_set(
        volume: &ScalarVolume,
        property: &VolumeProperty,
        mappings: &[IndexMapping],
        property_index: usize,
        color_component: usize,
        opacity_component: usize,
        sample_distance: f32,
        blend_mode: BlendMode,
    ) -> ComponentTables {
        let curves = property.component(property_index);

        let color_mapping = mappings[color_component];
        let (cmin, _) = volume.component_range(color_component);
        let cmax = color_mapping.value_at(color_mapping.size - 1);
        let mut color = vec![[0.0f64; 3]; color_mapping.size];
        curves.color.sample(cmin, cmax.max(cmin), &mut color);

        let opacity_mapping = mappings[opacity_component];
        let (omin, omax) = volume.component_range(opacity_component);
        let oend = opacity_mapping.value_at(opacity_mapping.size - 1);
        let mut opacity = vec![0.0f64; opacity_mapping.size];
        curves.scalar_opacity.sample(omin, oend.max(omin), &mut opacity);

        let exponent = f64::from(sample_distance) / f64::from(curves.unit_distance);
        let scalar_opacity: Vec<u16> = opacity
            .iter()
            .map(|&a| {
                if blend_mode.is_compositing() && a > 0.0001 {
                    quantize(1.0 - (1.0 - a.min(1.0)).powf(exponent))
                } else {
                    quantize(a)
                }
            })
            .collect();

        let range = omax - omin;
        let mut gradient = vec![0.0f64; GRADIENT_TABLE_SIZE];
        if range > 0.0 {
            curves.gradient_opacity.sample(0.0, range * 0.25, &mut gradient);
        }
        let gradient_opacity: Vec<u16> = gradient.iter().map(|&g| quantize(g)).collect();

        let first_visible_scalar = scalar_opacity
            .iter()
            .position(|&a| a != 0)
            .unwrap_or(scalar_opacity.len());
        let first_visible_gradient = gradient_opacity
            .iter()
            .position(|&a| a != 0)
            .unwrap_or(GRADIENT_TABLE_SIZE);

        ComponentTables {
            color: color.iter().map(|rgb| rgb.map(quantize)).collect(),
            scalar_opacity,
            gradient_opacity,
            gradient_opacity_required: curves.gradient_opacity_required(),
            first_visible_scalar,
            first_visible_gradient,
        }
    }

    /// Whether these tables were built from exactly these inputs.
    pub fn is_current(
        &self,
        volume: &ScalarVolume,
        property: &VolumeProperty,
        sample_distance: f32,
        blend_mode: BlendMode,
    ) -> bool {
        self.key
            == TableKey {
                volume: volume.generation(),
                property: property.generation(),
                blend_mode,
                sample_distance,
                components: volume.components(),
            }
    }

    /// Changes on every rebuild.
    pub const fn generation(&self) -> Generation {
        self.generation
    }

    /// Mapping of one data component.
    #[inline]
    pub fn mapping(&self, component: usize) -> &IndexMapping {
        &self.mappings[component]
    }

    pub fn mappings(&self) -> &[IndexMapping] {
        &self.mappings
    }

    /// Tables of one classification set.
    #[inline]
    pub fn set(&self, index: usize) -> &ComponentTables {
        &self.sets[index]
    }

    /// One set per component when independent, else a single set.
    pub fn sets(&self) -> &[ComponentTables] {
        &self.sets
    }

    pub const fn independent(&self) -> bool {
        self.independent
    }

    /// Data component driving opacity for a set.
    #[inline]
    pub fn opacity_component(&self, set: usize) -> usize {
        if self.independent {
            set
        } else {
            self.mappings.len() - 1
        }
    }

    /// Whether any set modulates opacity by gradient magnitude.
    pub fn gradient_opacity_required(&self) -> bool {
        self.sets.iter().any(|s| s.gradient_opacity_required)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::{ComponentProperty, PiecewiseFunction};

    fn ramp_volume() -> ScalarVolume {
        let data: Vec<u8> = (0..=255).collect();
        ScalarVolume::new([16, 16, 1], 1, data).unwrap()
    }

    #[test]
    fn exact_tables_for_narrow_integers() {
        let m = IndexMapping::for_range((-10.0, 20.0), false);
        assert_eq!(m.size, 31);
        assert_eq!(m.scale, 1.0);
        assert_eq!(m.index(-10.0), 0);
        assert_eq!(m.index(20.0), 30);
        assert_eq!(m.index(5.7), 15);
    }

    #[test]
    fn quantised_tables_for_floats_and_wide_ranges() {
        let m = IndexMapping::for_range((0.0, 1.0), true);
        assert_eq!(m.size, MAX_TABLE_SIZE);
        assert_eq!(m.index(1.0), 32767);
        assert_eq!(m.index(0.0), 0);

        let wide = IndexMapping::for_range((0.0, 65535.0), false);
        assert_eq!(wide.size, MAX_TABLE_SIZE);

        let flat = IndexMapping::for_range((3.0, 3.0), true);
        assert_eq!(flat.scale, 1.0);
        assert_eq!(flat.index(3.0), 0);
    }

    #[test]
    fn opacity_correction_only_when_compositing() {
        let volume = ramp_volume();
        let property = VolumeProperty::new().with_component(
            0,
            ComponentProperty {
                scalar_opacity: PiecewiseFunction::constant(0.5),
                unit_distance: 1.0,
                ..ComponentProperty::default()
            },
        );

        let composite = LookupTables::build(&volume, &property, 2.0, BlendMode::Composite).unwrap();
        let mip =
            LookupTables::build(&volume, &property, 2.0, BlendMode::MaximumIntensity).unwrap();

        // 1 - 0.5^2 = 0.75
        assert_eq!(composite.set(0).scalar_opacity[10], quantize(0.75));
        assert_eq!(mip.set(0).scalar_opacity[10], quantize(0.5));
    }

    #[test]
    fn rebuild_is_byte_identical() {
        let volume = ramp_volume();
        let property = VolumeProperty::new();
        let a = LookupTables::build(&volume, &property, 0.7, BlendMode::Composite).unwrap();
        let b = LookupTables::build(&volume, &property, 0.7, BlendMode::Composite).unwrap();
        assert_eq!(a.sets(), b.sets());
        assert_eq!(a.mappings(), b.mappings());
        assert_ne!(a.generation(), b.generation());
    }

    #[test]
    fn staleness_tracks_inputs() {
        let volume = ramp_volume();
        let mut property = VolumeProperty::new();
        let tables = LookupTables::build(&volume, &property, 1.0, BlendMode::Composite).unwrap();
        assert!(tables.is_current(&volume, &property, 1.0, BlendMode::Composite));
        assert!(!tables.is_current(&volume, &property, 2.0, BlendMode::Composite));
        assert!(!tables.is_current(&volume, &property, 1.0, BlendMode::MaximumIntensity));
        property.component_mut(0).weight = 0.5;
        assert!(!tables.is_current(&volume, &property, 1.0, BlendMode::Composite));
    }

    #[test]
    fn first_visible_indices() {
        let volume = ramp_volume();
        let property = VolumeProperty::new().with_component(
            0,
            ComponentProperty {
                scalar_opacity: PiecewiseFunction::from_points([
                    (0.0, 0.0),
                    (100.0, 0.0),
                    (101.0, 1.0),
                ]),
                gradient_opacity: PiecewiseFunction::from_points([(0.0, 0.0), (63.75, 1.0)]),
                ..ComponentProperty::default()
            },
        );
        let tables = LookupTables::build(&volume, &property, 1.0, BlendMode::Composite).unwrap();
        let set = tables.set(0);
        assert_eq!(set.first_visible_scalar, 101);
        assert_eq!(set.first_visible_gradient, 1);
        assert!(set.gradient_opacity_required);
        assert_eq!(set.gradient_opacity[255], quantize(1.0));
    }

    #[test]
    fn flat_range_zeroes_gradient_table() {
        let volume = ScalarVolume::new([2, 2, 2], 1, vec![7u8; 8]).unwrap();
        let tables =
            LookupTables::build(&volume, &VolumeProperty::new(), 1.0, BlendMode::Composite)
                .unwrap();
        assert_eq!(tables.set(0).scalar_opacity.len(), 1);
        assert!(tables.set(0).gradient_opacity.iter().all(|&g| g == 0));
    }

    #[test]
    fn dependent_needs_two_or_four_components() {
        let volume = ScalarVolume::new([1, 1, 1], 3, vec![0u8; 3]).unwrap();
        let mut property = VolumeProperty::new();
        property.set_independent(false);
        assert!(matches!(
            LookupTables::build(&volume, &property, 1.0, BlendMode::Composite),
            Err(Error::InvalidConfig(_))
        ));
    }
}
