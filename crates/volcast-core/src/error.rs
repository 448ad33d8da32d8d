//! Error types for the ray caster.

use thiserror::Error;

/// Ray caster error type.
#[derive(Error, Debug)]
pub enum Error {
    /// No volume was supplied to render
    #[error("No input volume")]
    NoInput,

    /// Spacing is zero or not finite on some axis
    #[error("Invalid spacing: {0}")]
    InvalidSpacing(String),

    /// Invalid data error
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Invalid renderer or property configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A working buffer could not be allocated
    #[error("Allocation failed: {0}")]
    Allocation(String),
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Allocate a zero-initialised buffer, reporting failure instead of aborting.
pub fn try_alloc<T: Clone + Default>(len: usize, what: &str) -> Result<Vec<T>> {
    let mut buffer = Vec::new();
    buffer
        .try_reserve_exact(len)
        .map_err(|e| Error::Allocation(format!("{what} ({len} entries): {e}")))?;
    buffer.resize(len, T::default());
    Ok(buffer)
}
