//! Min/max block index for skipping empty space.
//!
//! The grid is covered by 4x4x4 blocks of cells. Each block stores, per
//! component set, the smallest and largest table index of any sample that
//! touches one of its cells, the largest gradient magnitude, and a flag
//! telling whether any value in that range can be visible under the
//! current lookup tables.
//!
//! A sample on a block boundary belongs to both neighbouring blocks, so a
//! block's range covers every value trilinear interpolation can produce
//! inside it.

use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};
use tracing::debug;
use volcast_core::constants::{BLOCK_SHIFT, BLOCK_SIZE};
use volcast_core::error::try_alloc;
use volcast_core::{Generation, Result};

use crate::gradient::GradientField;
use crate::scalar::{SampleVisitor, Scalar, ScalarVolume};
use crate::tables::{IndexMapping, LookupTables};

bitflags! {
    /// Parts of the index that are stale.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct IndexUpdate: u8 {
        /// Visibility flags, after any table change
        const FLAGS = 0x01;
        /// Scalar extrema, after a data change
        const SCALARS = 0x02;
        /// Gradient extrema, after a gradient change
        const GRADIENTS = 0x04;
    }
}

/// One block of one component set.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct BlockEntry {
    pub min: u16,
    pub max: u16,
    /// Max gradient magnitude in the high byte, visibility in the low byte
    pub gradient_flag: u16,
}

impl BlockEntry {
    pub const UNTOUCHED: Self = Self {
        min: 0xffff,
        max: 0,
        gradient_flag: 0,
    };

    #[inline]
    pub const fn max_gradient(self) -> u16 {
        self.gradient_flag >> 8
    }

    #[inline]
    pub const fn is_visible(self) -> bool {
        self.gradient_flag & 0x00ff != 0
    }

    #[inline]
    fn include(&mut self, index: u16) {
        if index < self.min {
            self.min = index;
        }
        if index > self.max {
            self.max = index;
        }
    }
}

impl Default for BlockEntry {
    fn default() -> Self {
        Self::UNTOUCHED
    }
}

/// Blocks per axis: `1 + (dim - 2) / 4`, or 1 below two samples.
pub fn block_dims(dims: [usize; 3]) -> [usize; 3] {
    dims.map(|d| if d < 2 { 1 } else { 1 + (d - 2) / BLOCK_SIZE })
}

/// Blocks a sample at `i` contributes to along one axis, inclusive.
#[inline]
const fn block_span(i: usize, dim: usize) -> (usize, usize) {
    let first = if i < 1 { 0 } else { (i - 1) / BLOCK_SIZE };
    let last = if i + 1 >= dim { first } else { i / BLOCK_SIZE };
    (first, last)
}

/// The space-leap index of one volume.
#[derive(Clone, Debug)]
pub struct SpaceLeapIndex {
    dims: [usize; 3],
    block_dims: [usize; 3],
    sets: usize,
    entries: Vec<BlockEntry>,
    scalars_from: Generation,
    gradients_from: Generation,
    flags_from: Generation,
    flags_gradient_opacity: bool,
}

struct ScalarFill<'a> {
    dims: [usize; 3],
    block_dims: [usize; 3],
    components: usize,
    set_components: &'a [usize],
    mappings: &'a [IndexMapping],
    entries: &'a mut [BlockEntry],
}

impl SampleVisitor for ScalarFill<'_> {
    type Output = ();

    fn visit<T: Scalar>(self, samples: &[T]) {
        let [dx, dy, dz] = self.dims;
        let [bx, by, _] = self.block_dims;
        let sets = self.set_components.len();
        let mut indices = [0u16; 4];

        let mut voxel = 0;
        for z in 0..dz {
            let (z0, z1) = block_span(z, dz);
            for y in 0..dy {
                let (y0, y1) = block_span(y, dy);
                for x in 0..dx {
                    let (x0, x1) = block_span(x, dx);
                    let values = &samples[voxel * self.components..][..self.components];
                    for (s, &c) in self.set_components.iter().enumerate() {
                        indices[s] = self.mappings[c].index(values[c].to_f32());
                    }
                    for bz in z0..=z1 {
                        for by_ in y0..=y1 {
                            let row = (bz * by + by_) * bx;
                            for bx_ in x0..=x1 {
                                let block = (row + bx_) * sets;
                                for s in 0..sets {
                                    self.entries[block + s].include(indices[s]);
                                }
                            }
                        }
                    }
                    voxel += 1;
                }
            }
        }
    }
}

impl SpaceLeapIndex {
    /// Allocate an index for the volume with every entry untouched.
    pub fn new(volume: &ScalarVolume, independent: bool) -> Result<Self> {
        let dims = volume.dims();
        let block_dims = block_dims(dims);
        let sets = if independent { volume.components() } else { 1 };
        let count = block_dims[0] * block_dims[1] * block_dims[2] * sets;
        let entries = try_alloc::<BlockEntry>(count, "space-leap index")?;
        Ok(Self {
            dims,
            block_dims,
            sets,
            entries,
            scalars_from: Generation::NEVER,
            gradients_from: Generation::NEVER,
            flags_from: Generation::NEVER,
            flags_gradient_opacity: false,
        })
    }

    /// Whether the index layout fits this volume and tables.
    pub fn fits(&self, volume: &ScalarVolume, tables: &LookupTables) -> bool {
        self.dims == volume.dims() && self.sets == tables.sets().len()
    }

    /// Which parts must be rebuilt before the index can be used.
    pub fn pending(
        &self,
        volume: &ScalarVolume,
        gradients: Option<&GradientField>,
        tables: &LookupTables,
    ) -> IndexUpdate {
        let mut update = IndexUpdate::empty();
        if self.scalars_from != volume.generation() {
            update |= IndexUpdate::SCALARS | IndexUpdate::FLAGS;
        }
        let gradient_opacity = tables.gradient_opacity_required();
        if gradient_opacity {
            let gradients_changed =
                gradients.is_some_and(|g| g.generation() != self.gradients_from);
            if update.contains(IndexUpdate::SCALARS) || gradients_changed {
                update |= IndexUpdate::GRADIENTS | IndexUpdate::FLAGS;
            }
        }
        if self.flags_from != tables.generation() || self.flags_gradient_opacity != gradient_opacity
        {
            update |= IndexUpdate::FLAGS;
        }
        update
    }

    /// Bring the index up to date; returns what was rebuilt.
    ///
    /// `gradients` must be current when the tables require gradient
    /// opacity.
    pub fn update(
        &mut self,
        volume: &ScalarVolume,
        gradients: Option<&GradientField>,
        tables: &LookupTables,
    ) -> IndexUpdate {
        let update = self.pending(volume, gradients, tables);
        if update.is_empty() {
            return update;
        }
        let _span = tracing::trace_span!("update_space_leap").entered();

        if update.contains(IndexUpdate::SCALARS) {
            self.fill_scalars(volume, tables);
        }
        if update.contains(IndexUpdate::GRADIENTS) {
            if let Some(gradients) = gradients {
                self.fill_gradients(gradients);
            }
        }
        if update.contains(IndexUpdate::FLAGS) {
            self.update_flags(tables);
        }
        debug!(?update, blocks = ?self.block_dims, "Updated space-leap index");
        update
    }

    fn fill_scalars(&mut self, volume: &ScalarVolume, tables: &LookupTables) {
        self.entries.fill(BlockEntry::UNTOUCHED);
        let set_components: Vec<usize> = (0..self.sets).map(|s| tables.opacity_component(s)).collect();
        volume.data().visit(ScalarFill {
            dims: self.dims,
            block_dims: self.block_dims,
            components: volume.components(),
            set_components: &set_components,
            mappings: tables.mappings(),
            entries: &mut self.entries,
        });
        self.scalars_from = volume.generation();
    }

    fn fill_gradients(&mut self, gradients: &GradientField) {
        for entry in &mut self.entries {
            entry.gradient_flag &= 0x00ff;
        }
        let [dx, dy, dz] = self.dims;
        let [bx, by, _] = self.block_dims;
        let sets = self.sets.min(gradients.sets());

        let mut voxel = 0;
        for z in 0..dz {
            let (z0, z1) = block_span(z, dz);
            for y in 0..dy {
                let (y0, y1) = block_span(y, dy);
                for x in 0..dx {
                    let (x0, x1) = block_span(x, dx);
                    for s in 0..sets {
                        let g = u16::from(gradients.magnitude(voxel, s));
                        for bz in z0..=z1 {
                            for by_ in y0..=y1 {
                                for bx_ in x0..=x1 {
                                    let e = &mut self.entries
                                        [((bz * by + by_) * bx + bx_) * self.sets + s];
                                    if g > e.max_gradient() {
                                        e.gradient_flag = (g << 8) | (e.gradient_flag & 0x00ff);
                                    }
                                }
                            }
                        }
                    }
                    voxel += 1;
                }
            }
        }
        self.gradients_from = gradients.generation();
    }

    fn update_flags(&mut self, tables: &LookupTables) {
        let gradient_opacity = tables.gradient_opacity_required();
        for block in self.entries.chunks_exact_mut(self.sets) {
            for (entry, set) in block.iter_mut().zip(tables.sets()) {
                let (min, max) = (usize::from(entry.min), usize::from(entry.max));
                let visible = if min > max || max < set.first_visible_scalar {
                    false
                } else if gradient_opacity
                    && usize::from(entry.max_gradient()) < set.first_visible_gradient
                {
                    false
                } else if min < set.first_visible_scalar {
                    true
                } else {
                    set.scalar_opacity[min..=max.min(set.scalar_opacity.len() - 1)]
                        .iter()
                        .any(|&a| a != 0)
                };
                entry.gradient_flag = (entry.gradient_flag & 0xff00) | u16::from(visible);
            }
        }
        self.flags_from = tables.generation();
        self.flags_gradient_opacity = gradient_opacity;
    }

    pub const fn block_dims(&self) -> [usize; 3] {
        self.block_dims
    }

    pub const fn sets(&self) -> usize {
        self.sets
    }

    /// Linear block index of the block holding a voxel's cell.
    #[inline]
    pub const fn block_of(&self, voxel: [usize; 3]) -> usize {
        let bx = voxel[0] >> BLOCK_SHIFT;
        let by = voxel[1] >> BLOCK_SHIFT;
        let bz = voxel[2] >> BLOCK_SHIFT;
        (bz * self.block_dims[1] + by) * self.block_dims[0] + bx
    }

    /// Entries of every set for one block.
    #[inline]
    pub fn block(&self, block: usize) -> &[BlockEntry] {
        &self.entries[block * self.sets..][..self.sets]
    }

    /// Whether any set may be visible inside the block.
    #[inline]
    pub fn is_visible(&self, block: usize) -> bool {
        self.block(block).iter().any(|e| e.is_visible())
    }

    /// Number of blocks flagged visible.
    pub fn visible_blocks(&self) -> usize {
        let count = self.block_dims[0] * self.block_dims[1] * self.block_dims[2];
        (0..count).filter(|&b| self.is_visible(b)).count()
    }
}
