//! Transfer function curves and per-component volume properties.

use serde::{Deserialize, Serialize};
use volcast_core::constants::MAX_COMPONENTS;
use volcast_core::Generation;

/// Piecewise-linear scalar function, clamped outside its breakpoints.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PiecewiseFunction {
    points: Vec<(f64, f64)>,
}

impl PiecewiseFunction {
    pub const fn new() -> Self {
        Self { points: Vec::new() }
    }

    /// Build from breakpoints in any order.
    pub fn from_points(points: impl IntoIterator<Item = (f64, f64)>) -> Self {
        let mut f = Self::new();
        for (x, y) in points {
            f.add_point(x, y);
        }
        f
    }

    /// A function returning `value` everywhere.
    pub fn constant(value: f64) -> Self {
        Self::from_points([(0.0, value)])
    }

    /// Insert a breakpoint, replacing one at the same `x`.
    pub fn add_point(&mut self, x: f64, y: f64) {
        match self.points.binary_search_by(|p| p.0.total_cmp(&x)) {
            Ok(i) => self.points[i].1 = y,
            Err(i) => self.points.insert(i, (x, y)),
        }
    }

    pub fn clear(&mut self) {
        self.points.clear();
    }

    pub fn points(&self) -> &[(f64, f64)] {
        &self.points
    }

    /// Evaluate at `x`; an empty function is zero.
    pub fn value(&self, x: f64) -> f64 {
        interpolate(&self.points, x, |a, b, t| (b - a).mul_add(t, a)).unwrap_or(0.0)
    }

    /// Whether every breakpoint maps to 1.
    pub fn is_constant_one(&self) -> bool {
        !self.points.is_empty() && self.points.iter().all(|&(_, y)| y == 1.0)
    }

    /// Sample `out.len()` evenly spaced values over `[min, max]`.
    pub fn sample(&self, min: f64, max: f64, out: &mut [f64]) {
        for (x, slot) in sample_positions(min, max, out.len()).zip(out) {
            *slot = self.value(x);
        }
    }
}

/// Piecewise-linear RGB function.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ColorTransferFunction {
    points: Vec<(f64, [f64; 3])>,
}

impl ColorTransferFunction {
    pub const fn new() -> Self {
        Self { points: Vec::new() }
    }

    pub fn from_points(points: impl IntoIterator<Item = (f64, [f64; 3])>) -> Self {
        let mut f = Self::new();
        for (x, rgb) in points {
            f.add_rgb_point(x, rgb);
        }
        f
    }

    pub fn add_rgb_point(&mut self, x: f64, rgb: [f64; 3]) {
        match self.points.binary_search_by(|p| p.0.total_cmp(&x)) {
            Ok(i) => self.points[i].1 = rgb,
            Err(i) => self.points.insert(i, (x, rgb)),
        }
    }

    pub fn value(&self, x: f64) -> [f64; 3] {
        interpolate(&self.points, x, |a, b, t| {
            std::array::from_fn(|i| (b[i] - a[i]).mul_add(t, a[i]))
        })
        .unwrap_or([0.0; 3])
    }

    pub fn sample(&self, min: f64, max: f64, out: &mut [[f64; 3]]) {
        for (x, slot) in sample_positions(min, max, out.len()).zip(out) {
            *slot = self.value(x);
        }
    }
}

fn interpolate<V: Copy>(
    points: &[(f64, V)],
    x: f64,
    lerp: impl Fn(V, V, f64) -> V,
) -> Option<V> {
    let (first, last) = (points.first()?, points.last()?);
    if x <= first.0 {
        return Some(first.1);
    }
    if x >= last.0 {
        return Some(last.1);
    }
    let upper = points.partition_point(|p| p.0 <= x);
    let (x0, v0) = points[upper - 1];
    let (x1, v1) = points[upper];
    Some(lerp(v0, v1, (x - x0) / (x1 - x0)))
}

fn sample_positions(min: f64, max: f64, n: usize) -> impl Iterator<Item = f64> {
    let step = if n > 1 {
        (max - min) / (n - 1) as f64
    } else {
        0.0
    };
    (0..n).map(move |i| (i as f64).mul_add(step, min))
}

/// Scalar-to-color mapping of one component.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ColorCurve {
    Gray(PiecewiseFunction),
    Rgb(ColorTransferFunction),
}

impl Default for ColorCurve {
    fn default() -> Self {
        Self::Gray(PiecewiseFunction::from_points([(0.0, 0.0), (255.0, 1.0)]))
    }
}

impl ColorCurve {
    /// Sample as RGB; grey curves are replicated on all channels.
    pub fn sample(&self, min: f64, max: f64, out: &mut [[f64; 3]]) {
        match self {
            Self::Rgb(f) => f.sample(min, max, out),
            Self::Gray(f) => {
                for (x, slot) in sample_positions(min, max, out.len()).zip(out) {
                    *slot = [f.value(x); 3];
                }
            }
        }
    }
}

/// Phong material coefficients.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ShadingCoefficients {
    pub ambient: f32,
    pub diffuse: f32,
    pub specular: f32,
    pub specular_power: f32,
}

impl Default for ShadingCoefficients {
    fn default() -> Self {
        Self {
            ambient: 0.1,
            diffuse: 0.7,
            specular: 0.2,
            specular_power: 10.0,
        }
    }
}

/// Sample reconstruction between grid points.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interpolation {
    Nearest,
    #[default]
    Linear,
}

/// Classification and material of one scalar component.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ComponentProperty {
    pub color: ColorCurve,
    pub scalar_opacity: PiecewiseFunction,
    /// Opacity scale as a function of gradient magnitude
    pub gradient_opacity: PiecewiseFunction,
    /// Ray length over which `scalar_opacity` is defined
    pub unit_distance: f32,
    /// Share of this component in independent blending
    pub weight: f32,
    pub shading: ShadingCoefficients,
}

impl Default for ComponentProperty {
    fn default() -> Self {
        Self {
            color: ColorCurve::default(),
            scalar_opacity: PiecewiseFunction::from_points([(0.0, 0.0), (255.0, 1.0)]),
            gradient_opacity: PiecewiseFunction::constant(1.0),
            unit_distance: 1.0,
            weight: 1.0,
            shading: ShadingCoefficients::default(),
        }
    }
}

impl ComponentProperty {
    pub fn gradient_opacity_required(&self) -> bool {
        !self.gradient_opacity.is_constant_one()
    }
}

/// How the volume's components are classified and lit.
///
/// Mutation goes through accessors so the generation always reflects the
/// current curves.
#[derive(Clone, Debug)]
pub struct VolumeProperty {
    components: [ComponentProperty; MAX_COMPONENTS],
    independent: bool,
    shade: bool,
    interpolation: Interpolation,
    generation: Generation,
}

impl Default for VolumeProperty {
    fn default() -> Self {
        Self {
            components: Default::default(),
            independent: true,
            shade: false,
            interpolation: Interpolation::Linear,
            generation: Generation::next(),
        }
    }
}

impl VolumeProperty {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn component(&self, index: usize) -> &ComponentProperty {
        &self.components[index]
    }

    /// Mutable access to one component's curves.
    pub fn component_mut(&mut self, index: usize) -> &mut ComponentProperty {
        self.generation = Generation::next();
        &mut self.components[index]
    }

    #[must_use]
    pub fn with_component(mut self, index: usize, component: ComponentProperty) -> Self {
        *self.component_mut(index) = component;
        self
    }

    pub const fn independent(&self) -> bool {
        self.independent
    }

    pub fn set_independent(&mut self, independent: bool) {
        self.independent = independent;
        self.generation = Generation::next();
    }

    pub const fn shade(&self) -> bool {
        self.shade
    }

    pub fn set_shade(&mut self, shade: bool) {
        self.shade = shade;
        self.generation = Generation::next();
    }

    pub const fn interpolation(&self) -> Interpolation {
        self.interpolation
    }

    pub fn set_interpolation(&mut self, interpolation: Interpolation) {
        self.interpolation = interpolation;
        self.generation = Generation::next();
    }

    pub const fn generation(&self) -> Generation {
        self.generation
    }
}
