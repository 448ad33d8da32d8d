//! Test harness for volcast.
//!
//! Provides headless rendering into plain pixel buffers, image comparison,
//! and the small volumes and properties the scenario tests share.

pub mod fixtures;
pub mod harness;

pub use harness::{RenderHarness, RenderedImage};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TestError {
    #[error("Render did not complete: {0}")]
    Render(String),
    #[error("Image comparison failed: {0}")]
    ImageComparison(String),
    #[error(transparent)]
    Volcast(#[from] volcast_core::Error),
}

pub type Result<T> = std::result::Result<T, TestError>;
