//! Monotonic generation counters.
//!
//! Every mutable input (volume data, transfer curves, properties) carries a
//! generation drawn from one process-wide counter. Derived structures record
//! the generations they were built from and rebuild when those differ. A
//! fresh object never shares a generation with an older one, so the counter
//! doubles as an identity check.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

/// A version stamp for cache invalidation.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[repr(transparent)]
pub struct Generation(u64);

impl Generation {
    /// The generation of something that was never built.
    pub const NEVER: Self = Self(0);

    /// Draw a new, strictly larger generation.
    pub fn next() -> Self {
        Self(NEXT_GENERATION.fetch_add(1, Ordering::Relaxed))
    }

    #[inline]
    pub const fn get(self) -> u64 {
        self.0
    }

    #[inline]
    pub const fn is_never(self) -> bool {
        self.0 == 0
    }
}
