//! Per-source synchronization pipeline.
//!
//! A [`SyncController`] drives one configured source: it computes the
//! locally missing date range, walks the remote tree for matching
//! files, resamples them onto the canonical grids of the configured
//! regions and persists one calendar step at a time. Gap detection
//! re-runs the same per-step loop over single periods.

pub mod controller;
pub mod descriptor;

pub use controller::{GapReport, StepOutcome, SyncController, SyncReport};
pub use descriptor::{PipelinePaths, Protocol, SourceDescriptor};

use thiserror::Error;

/// Errors raised by the sync pipeline.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Invalid source descriptor; raised at registration time.
    #[error("configuration error: {0}")]
    Config(String),

    /// Region lookup or grid construction failed.
    #[error(transparent)]
    Region(#[from] region_grid::RegionError),

    /// Remote walking or fetching failed beyond the bounded retry.
    #[error(transparent)]
    Walker(#[from] source_walker::WalkerError),

    /// Canonical store failure.
    #[error(transparent)]
    Store(#[from] canonical_store::StoreError),

    /// Source file decoding failure.
    #[error(transparent)]
    Reader(#[from] format_readers::ReaderError),

    /// Resampling failure.
    #[error(transparent)]
    Resample(#[from] resample::ResampleError),

    /// Local filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, SyncError>;
