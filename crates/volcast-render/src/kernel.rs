//! The march-and-composite kernel.
//!
//! One [`KernelVariant`] is chosen per frame. The sample type is resolved
//! once through a [`SampleVisitor`], and the variant picks a monomorphised
//! marcher, so the per-sample loop carries no dynamic dispatch.
//!
//! Rows are dealt to workers by interleaving: worker `t` of `T` owns rows
//! `t, t + T, ...` and holds them as disjoint `&mut` slices, so the image
//! needs no locking. Every input the marcher reads is built before the
//! workers start.

use std::sync::atomic::{AtomicBool, Ordering};

use volcast_core::constants::{BLOCK_SHIFT, FP_SHIFT, MAX_COMPONENTS, TABLE_MAX};
use volcast_core::{Error, FixedDirection, FixedPosition, Result};
use volcast_volume::{
    BlendMode, BlockEntry, GradientField, Interpolation, LookupTables, SampleVisitor, Scalar, ScalarVolume,
    SpaceLeapIndex,
};

use crate::crop::VoxelCropping;
use crate::image::{DepthBuffer, RayCastImage, RowSpan};
use crate::ray::{RayInfo, RaySetup};
use crate::shading::ShadingTables;

const FP_HALF: u32 = 1 << (FP_SHIFT - 1);

/// Marching policy, resolved once per frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum KernelVariant {
    MaximumIntensity,
    MinimumIntensity,
    Composite,
    CompositeGradientOpacity,
    CompositeShade,
    CompositeShadeGradientOpacity,
}

impl KernelVariant {
    pub const fn select(blend_mode: BlendMode, shade: bool, gradient_opacity: bool) -> Self {
        match (blend_mode, shade, gradient_opacity) {
            (BlendMode::MaximumIntensity, ..) => Self::MaximumIntensity,
            (BlendMode::MinimumIntensity, ..) => Self::MinimumIntensity,
            (BlendMode::Composite, false, false) => Self::Composite,
            (BlendMode::Composite, false, true) => Self::CompositeGradientOpacity,
            (BlendMode::Composite, true, false) => Self::CompositeShade,
            (BlendMode::Composite, true, true) => Self::CompositeShadeGradientOpacity,
        }
    }

    pub const fn shades(self) -> bool {
        matches!(self, Self::CompositeShade | Self::CompositeShadeGradientOpacity)
    }

    pub const fn uses_gradient_opacity(self) -> bool {
        matches!(
            self,
            Self::CompositeGradientOpacity | Self::CompositeShadeGradientOpacity
        )
    }

    /// Whether the variant reads the gradient field.
    pub const fn needs_gradients(self) -> bool {
        self.shades() || self.uses_gradient_opacity()
    }
}

/// `a * b` on the 15-bit scale, rounded.
#[inline]
const fn fp_mul(a: u32, b: u32) -> u32 {
    (a * b + TABLE_MAX) >> FP_SHIFT
}

/// Front-to-back "over" accumulation in 15-bit fixed point.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CompositeAccumulator {
    color: [u32; 3],
    /// Transparency still left on the ray
    remaining: u32,
    limit: u32,
}

impl CompositeAccumulator {
    /// `termination` is the accumulated opacity at which the ray stops.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn new(termination: f32) -> Self {
        let limit = ((1.0 - termination.clamp(0.0, 1.0)) * TABLE_MAX as f32) as u32;
        Self {
            color: [0; 3],
            remaining: TABLE_MAX,
            // An untouched ray never counts as opaque
            limit: limit.min(TABLE_MAX - 1),
        }
    }

    /// Blend a premultiplied `[r, g, b, a]` sample behind what is there.
    #[inline]
    pub fn add(&mut self, sample: [u32; 4]) {
        for (c, s) in self.color.iter_mut().zip(sample) {
            *c += fp_mul(s, self.remaining);
        }
        self.remaining = fp_mul(self.remaining, TABLE_MAX - sample[3]);
    }

    #[inline]
    pub const fn is_opaque(&self) -> bool {
        self.remaining <= self.limit
    }

    #[allow(clippy::cast_possible_truncation)]
    pub fn pixel(&self) -> [u16; 4] {
        let [r, g, b] = self.color.map(|c| c.min(TABLE_MAX) as u16);
        [r, g, b, (TABLE_MAX - self.remaining) as u16]
    }
}

/// Deal the first `height` rows of width `width` to `threads` workers.
///
/// Worker `t` receives rows `t, t + threads, ...` in increasing order.
pub fn partition_rows<P>(
    pixels: &mut [P],
    width: usize,
    height: usize,
    threads: usize,
) -> Vec<Vec<(usize, &mut [P])>> {
    let threads = threads.max(1);
    let mut buckets: Vec<Vec<(usize, &mut [P])>> = (0..threads)
        .map(|_| Vec::with_capacity(height / threads + 1))
        .collect();
    if width == 0 {
        return buckets;
    }
    for (j, row) in pixels.chunks_exact_mut(width).take(height).enumerate() {
        buckets[j % threads].push((j, row));
    }
    buckets
}

/// Steps needed to leave the space-leap block holding `cell`.
///
/// The result lands on the same sample lattice as single steps would and
/// is clamped to `[1, remaining]`.
pub fn steps_to_leave_block(
    position: FixedPosition,
    direction: &[FixedDirection; 3],
    cell: [usize; 3],
    remaining: u32,
) -> u32 {
    let mut steps = remaining;
    for axis in 0..3 {
        let d = direction[axis];
        let magnitude = d.magnitude();
        if magnitude == 0 {
            continue;
        }
        let block = (cell[axis] >> BLOCK_SHIFT) as u32;
        let p = position.0[axis];
        let k = if d.is_forward() {
            let upper = ((block + 1) << BLOCK_SHIFT) << FP_SHIFT;
            upper.saturating_sub(p).div_ceil(magnitude)
        } else {
            let lower = (block << BLOCK_SHIFT) << FP_SHIFT;
            p.saturating_sub(lower) / magnitude + 1
        };
        steps = steps.min(k);
    }
    steps.max(1).min(remaining)
}

/// Everything the kernel reads during one frame.
#[derive(Debug)]
pub struct Frame<'a> {
    pub volume: &'a ScalarVolume,
    pub tables: &'a LookupTables,
    pub gradients: Option<&'a GradientField>,
    pub shading: Option<&'a ShadingTables>,
    pub space_leap: Option<&'a SpaceLeapIndex>,
    /// Region test for multi-region cropping
    pub cropping: Option<VoxelCropping>,
    pub depth: Option<&'a DepthBuffer>,
    pub rays: RaySetup,
    pub image_sample_distance: f32,
    pub interpolation: Interpolation,
    pub weights: [f32; MAX_COMPONENTS],
    /// Accumulated opacity that ends a composite ray
    pub termination: f32,
    pub variant: KernelVariant,
}

/// Cast every ray in the image's row bounds on `threads` workers.
///
/// Returns `Ok(false)` when `abort` was raised before all rows were done;
/// rows not yet reached are left untouched.
#[cfg_attr(feature = "profiling", tracing::instrument(level = "trace", skip_all))]
pub fn cast(
    frame: &Frame<'_>,
    image: &mut RayCastImage,
    threads: usize,
    abort: &AtomicBool,
) -> Result<bool> {
    let variant = frame.variant;
    let _span = tracing::trace_span!("cast_rays", ?variant, threads).entered();
    if variant.needs_gradients() && frame.gradients.is_none() {
        return Err(Error::InvalidConfig(format!(
            "{variant:?} needs a gradient field"
        )));
    }
    if variant.shades() && frame.shading.is_none() {
        return Err(Error::InvalidConfig(format!(
            "{variant:?} needs shading tables"
        )));
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads.max(1))
        .thread_name(|i| format!("volcast-cast-{i}"))
        .build()
        .map_err(|e| Error::Allocation(format!("worker pool: {e}")))?;

    frame.volume.data().visit(CastVisitor {
        frame,
        image,
        pool: &pool,
        threads: threads.max(1),
        abort,
    });
    Ok(!abort.load(Ordering::Relaxed))
}

struct CastVisitor<'f, 'a> {
    frame: &'f Frame<'a>,
    image: &'f mut RayCastImage,
    pool: &'f rayon::ThreadPool,
    threads: usize,
    abort: &'f AtomicBool,
}

impl SampleVisitor for CastVisitor<'_, '_> {
    type Output = ();

    fn visit<T: Scalar>(self, samples: &[T]) {
        let Self {
            frame,
            image,
            pool,
            threads,
            abort,
        } = self;
        let sampler = Sampler::new(frame, samples);
        let march = sampler.marcher();

        let width = image.memory_size()[0];
        let height = image.in_use_size()[1];
        let (rows, pixels) = image.rows_and_pixels();
        let buckets = partition_rows(pixels, width, height, threads);

        let sampler = &sampler;
        pool.scope(|scope| {
            for bucket in buckets {
                scope.spawn(move |_| {
                    for (j, row) in bucket {
                        if abort.load(Ordering::Relaxed) {
                            return;
                        }
                        sampler.cast_row(march, j, rows[j], row);
                    }
                });
            }
        });
    }
}

/// How components map onto classification sets.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Layout {
    /// One set per component
    Independent(usize),
    /// Color table on component 0, opacity on the last component
    DependentTable,
    /// RGB read directly from components 0..3, opacity on component 3
    DependentRgb,
}

/// Corners and weights of one reconstruction.
#[derive(Clone, Copy, Debug)]
struct Cell {
    base: usize,
    corners: usize,
    offsets: [usize; 8],
    weights: [f32; 8],
}

type Marcher<T> = fn(&Sampler<'_, T>, RayInfo) -> [u16; 4];

struct Sampler<'s, T> {
    frame: &'s Frame<'s>,
    samples: &'s [T],
    dims: [usize; 3],
    strides: [usize; 3],
    last_cell: [usize; 3],
    components: usize,
    layout: Layout,
    weights: [u32; MAX_COMPONENTS],
}

impl<'s, T: Scalar> Sampler<'s, T> {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn new(frame: &'s Frame<'s>, samples: &'s [T]) -> Self {
        let volume = frame.volume;
        let dims = volume.dims();
        let components = volume.components();
        let layout = if frame.tables.independent() {
            Layout::Independent(components)
        } else if components == 4 {
            Layout::DependentRgb
        } else {
            Layout::DependentTable
        };
        Self {
            frame,
            samples,
            dims,
            strides: [1, dims[0], dims[0] * dims[1]],
            last_cell: dims.map(|d| d.saturating_sub(2)),
            components,
            layout,
            weights: frame
                .weights
                .map(|w| w.clamp(0.0, 1.0).mul_add((TABLE_MAX + 1) as f32, 0.5) as u32),
        }
    }

    fn marcher(&self) -> Marcher<T> {
        match self.frame.variant {
            KernelVariant::MaximumIntensity => march_extreme::<T, true>,
            KernelVariant::MinimumIntensity => march_extreme::<T, false>,
            KernelVariant::Composite => march_composite::<T, false, false>,
            KernelVariant::CompositeGradientOpacity => march_composite::<T, false, true>,
            KernelVariant::CompositeShade => march_composite::<T, true, false>,
            KernelVariant::CompositeShadeGradientOpacity => march_composite::<T, true, true>,
        }
    }

    fn cast_row(&self, march: Marcher<T>, j: usize, span: RowSpan, row: &mut [[u16; 4]]) {
        let frame = self.frame;
        for i in span.range() {
            let far = frame.depth.map_or(1.0, |depth| {
                depth.depth_at(i, j, frame.rays.image_origin, frame.image_sample_distance)
            });
            row[i] = frame.rays.cast(i, j, far).map_or([0; 4], |ray| march(self, ray));
        }
    }

    #[inline]
    fn cell_of(&self, position: FixedPosition) -> [usize; 3] {
        let voxel = position.voxel();
        [
            voxel[0].min(self.last_cell[0]),
            voxel[1].min(self.last_cell[1]),
            voxel[2].min(self.last_cell[2]),
        ]
    }

    #[inline]
    fn is_cropped(&self, position: FixedPosition) -> bool {
        self.frame
            .cropping
            .as_ref()
            .is_some_and(|c| c.is_cropped(position))
    }

    fn reconstruct(&self, position: FixedPosition) -> Cell {
        let mut cell = Cell {
            base: 0,
            corners: 1,
            offsets: [0; 8],
            weights: [1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
        };
        match self.frame.interpolation {
            Interpolation::Nearest => {
                for axis in 0..3 {
                    let v = (position.0[axis].saturating_add(FP_HALF) >> FP_SHIFT) as usize;
                    cell.base += v.min(self.dims[axis] - 1) * self.strides[axis];
                }
            }
            Interpolation::Linear => {
                let c = self.cell_of(position);
                let p = position.to_vec3();
                let mut f = [0.0f32; 3];
                let mut step = [0usize; 3];
                for axis in 0..3 {
                    cell.base += c[axis] * self.strides[axis];
                    f[axis] = (p[axis] - c[axis] as f32).clamp(0.0, 1.0);
                    step[axis] = if self.dims[axis] > 1 { self.strides[axis] } else { 0 };
                }
                cell.corners = 8;
                for k in 0..8 {
                    let (bx, by, bz) = (k & 1, (k >> 1) & 1, (k >> 2) & 1);
                    cell.offsets[k] = bx * step[0] + by * step[1] + bz * step[2];
                    let wx = if bx == 1 { f[0] } else { 1.0 - f[0] };
                    let wy = if by == 1 { f[1] } else { 1.0 - f[1] };
                    let wz = if bz == 1 { f[2] } else { 1.0 - f[2] };
                    cell.weights[k] = wx * wy * wz;
                }
            }
        }
        cell
    }

    #[inline]
    fn value(&self, cell: &Cell, component: usize) -> f32 {
        let mut v = 0.0;
        for k in 0..cell.corners {
            let index = (cell.base + cell.offsets[k]) * self.components + component;
            v += cell.weights[k] * self.samples[index].to_f32();
        }
        v
    }

    #[inline]
    fn table_index(&self, cell: &Cell, component: usize) -> usize {
        usize::from(self.frame.tables.mapping(component).index(self.value(cell, component)))
    }

    #[inline]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn magnitude(&self, gradients: &GradientField, cell: &Cell, set: usize) -> usize {
        let mut m = 0.0;
        for k in 0..cell.corners {
            m += cell.weights[k] * f32::from(gradients.magnitude(cell.base + cell.offsets[k], set));
        }
        (m + 0.5) as usize
    }

    /// Interpolated diffuse and specular terms.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn lighting(
        &self,
        gradients: &GradientField,
        shading: &ShadingTables,
        cell: &Cell,
        set: usize,
    ) -> ([u32; 3], [u32; 3]) {
        let tables = shading.set(set);
        let mut diffuse = [0.0f32; 3];
        let mut specular = [0.0f32; 3];
        for k in 0..cell.corners {
            let w = cell.weights[k];
            let n = usize::from(gradients.normal(cell.base + cell.offsets[k], set));
            for ch in 0..3 {
                diffuse[ch] += w * f32::from(tables.diffuse[n][ch]);
                specular[ch] += w * f32::from(tables.specular[n][ch]);
            }
        }
        (
            diffuse.map(|d| (d + 0.5) as u32),
            specular.map(|s| (s + 0.5) as u32),
        )
    }

    /// Apply gradient opacity and shading to a classified sample.
    #[inline]
    fn finish<const SHADE: bool, const GO: bool>(
        &self,
        cell: &Cell,
        set: usize,
        color: [u32; 3],
        mut alpha: u32,
    ) -> [u32; 4] {
        if GO && alpha != 0 {
            if let Some(gradients) = self.frame.gradients {
                let table = &self.frame.tables.set(set).gradient_opacity;
                let m = self.magnitude(gradients, cell, set).min(table.len() - 1);
                alpha = fp_mul(alpha, u32::from(table[m]));
            }
        }
        if alpha == 0 {
            return [0; 4];
        }
        let mut rgb = color.map(|c| fp_mul(c, alpha));
        if SHADE {
            if let (Some(gradients), Some(shading)) = (self.frame.gradients, self.frame.shading) {
                let (diffuse, specular) = self.lighting(gradients, shading, cell, set);
                for ch in 0..3 {
                    rgb[ch] = (fp_mul(rgb[ch], diffuse[ch]) + fp_mul(alpha, specular[ch])).min(alpha);
                }
            }
        }
        [rgb[0], rgb[1], rgb[2], alpha]
    }

    /// Premultiplied color and opacity of one set at a table index.
    #[inline]
    fn lookup(&self, set: usize, index: usize) -> ([u32; 3], u32) {
        let tables = self.frame.tables.set(set);
        (
            tables.color[index].map(u32::from),
            u32::from(tables.scalar_opacity[index]),
        )
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn raw_rgb(&self, values: [f32; 3]) -> [u32; 3] {
        values.map(|v| ((v.clamp(0.0, 255.0) / 255.0).mul_add(TABLE_MAX as f32, 0.5)) as u32)
    }

    /// Sum of weighted per-set samples, clamped to full scale.
    fn blend_sets(&self, sets: usize, mut sample: impl FnMut(usize) -> [u32; 4]) -> [u32; 4] {
        if sets == 1 {
            return sample(0);
        }
        let mut out = [0u32; 4];
        for s in 0..sets {
            let weight = self.weights[s];
            if weight == 0 {
                continue;
            }
            for (o, v) in out.iter_mut().zip(sample(s)) {
                *o += fp_mul(v, weight);
            }
        }
        out.map(|v| v.min(TABLE_MAX))
    }

    fn classify<const SHADE: bool, const GO: bool>(&self, cell: &Cell) -> [u32; 4] {
        match self.layout {
            Layout::Independent(sets) => self.blend_sets(sets, |s| {
                let (color, alpha) = self.lookup(s, self.table_index(cell, s));
                self.finish::<SHADE, GO>(cell, s, color, alpha)
            }),
            Layout::DependentTable => {
                let last = self.components - 1;
                let color = self.lookup(0, self.table_index(cell, 0)).0;
                let alpha = self.lookup(0, self.table_index(cell, last)).1;
                self.finish::<SHADE, GO>(cell, 0, color, alpha)
            }
            Layout::DependentRgb => {
                let alpha = self.lookup(0, self.table_index(cell, 3)).1;
                if alpha == 0 {
                    return [0; 4];
                }
                let color = self.raw_rgb([
                    self.value(cell, 0),
                    self.value(cell, 1),
                    self.value(cell, 2),
                ]);
                self.finish::<SHADE, GO>(cell, 0, color, alpha)
            }
        }
    }

    /// Number of sets tracked by the extreme-value marchers.
    const fn extreme_sets(&self) -> usize {
        match self.layout {
            Layout::Independent(sets) => sets,
            Layout::DependentTable | Layout::DependentRgb => 1,
        }
    }

    /// Classify the extreme sample of each set.
    #[allow(clippy::cast_possible_truncation)]
    fn classify_extreme(&self, extreme: &Extreme) -> [u16; 4] {
        let sample = self.blend_sets(self.extreme_sets(), |s| {
            let Some(key) = extreme.keys[s] else {
                return [0; 4];
            };
            let key = usize::from(key);
            let (color, alpha) = match self.layout {
                Layout::Independent(_) => self.lookup(s, key),
                Layout::DependentTable => {
                    let index = self.frame.tables.mapping(0).index(extreme.values[0]);
                    (self.lookup(0, usize::from(index)).0, self.lookup(0, key).1)
                }
                Layout::DependentRgb => {
                    let [r, g, b, _] = extreme.values;
                    (self.raw_rgb([r, g, b]), self.lookup(0, key).1)
                }
            };
            let rgb = color.map(|c| fp_mul(c, alpha));
            [rgb[0], rgb[1], rgb[2], alpha]
        });
        sample.map(|v| v.min(TABLE_MAX) as u16)
    }
}

/// Running extreme of each set along an intensity-projection ray.
#[derive(Clone, Copy, Debug, Default)]
struct Extreme {
    keys: [Option<u16>; MAX_COMPONENTS],
    /// Component values at the extreme sample of dependent data
    values: [f32; MAX_COMPONENTS],
}

impl Extreme {
    #[inline]
    const fn beats<const MAX: bool>(candidate: u16, current: Option<u16>) -> bool {
        match current {
            None => true,
            Some(c) if MAX => candidate > c,
            Some(c) => candidate < c,
        }
    }

    /// Whether a block with these extrema cannot change any set.
    fn dominates<const MAX: bool>(&self, block: &[BlockEntry]) -> bool {
        block.iter().zip(&self.keys).all(|(entry, key)| match key {
            None => false,
            Some(k) if MAX => entry.max <= *k,
            Some(k) => entry.min >= *k,
        })
    }
}

fn march_composite<T: Scalar, const SHADE: bool, const GO: bool>(
    sampler: &Sampler<'_, T>,
    ray: RayInfo,
) -> [u16; 4] {
    let mut accumulator = CompositeAccumulator::new(sampler.frame.termination);
    let mut position = ray.start;
    let mut remaining = ray.steps;
    let index = sampler.frame.space_leap;

    while remaining > 0 {
        if let Some(index) = index {
            let cell = sampler.cell_of(position);
            if !index.is_visible(index.block_of(cell)) {
                let skip = steps_to_leave_block(position, &ray.direction, cell, remaining);
                position.advance(&ray.direction, skip);
                remaining -= skip;
                continue;
            }
        }

        if !sampler.is_cropped(position) {
            let cell = sampler.reconstruct(position);
            let sample = sampler.classify::<SHADE, GO>(&cell);
            if sample[3] != 0 {
                accumulator.add(sample);
                if accumulator.is_opaque() {
                    break;
                }
            }
        }
        position.step(&ray.direction);
        remaining -= 1;
    }
    accumulator.pixel()
}

#[allow(clippy::cast_possible_truncation)]
fn march_extreme<T: Scalar, const MAX: bool>(sampler: &Sampler<'_, T>, ray: RayInfo) -> [u16; 4] {
    let mut extreme = Extreme::default();
    let mut position = ray.start;
    let mut remaining = ray.steps;
    let index = sampler.frame.space_leap;
    let sets = sampler.extreme_sets();
    let dependent = !matches!(sampler.layout, Layout::Independent(_));

    while remaining > 0 {
        if let Some(index) = index {
            let cell = sampler.cell_of(position);
            if extreme.dominates::<MAX>(index.block(index.block_of(cell))) {
                let skip = steps_to_leave_block(position, &ray.direction, cell, remaining);
                position.advance(&ray.direction, skip);
                remaining -= skip;
                continue;
            }
        }

        if !sampler.is_cropped(position) {
            let cell = sampler.reconstruct(position);
            for s in 0..sets {
                let component = sampler.frame.tables.opacity_component(s);
                let key = sampler.table_index(&cell, component) as u16;
                if Extreme::beats::<MAX>(key, extreme.keys[s]) {
                    extreme.keys[s] = Some(key);
                    if dependent {
                        for c in 0..sampler.components {
                            extreme.values[c] = sampler.value(&cell, c);
                        }
                    }
                }
            }
        }
        position.step(&ray.direction);
        remaining -= 1;
    }
    sampler.classify_extreme(&extreme)
}
