//! Error types for the wave solver.
//!
//! Per-cell loops never fail; everything here originates at a configuration
//! or I/O boundary, or from the driver's finiteness check.

use std::path::PathBuf;

use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, WaveError>;

/// Grid construction and addressing errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GridError {
    #[error("grid must be at least 3x3, got {rows}x{cols}")]
    TooSmall { rows: usize, cols: usize },

    #[error("grid {rows}x{cols} overflows the address space")]
    Overflow { rows: usize, cols: usize },

    #[error("buffer holds {len} values, expected {rows}x{cols}")]
    LengthMismatch { rows: usize, cols: usize, len: usize },

    #[error("cell ({i}, {j}) is outside the {rows}x{cols} grid")]
    OutOfBounds {
        i: usize,
        j: usize,
        rows: usize,
        cols: usize,
    },

    #[error("displacement is {u_rows}x{u_cols} but velocity is {v_rows}x{v_cols}")]
    ShapeMismatch {
        u_rows: usize,
        u_cols: usize,
        v_rows: usize,
        v_cols: usize,
    },
}

/// Errors reading or writing scenario (`.wo`) files.
#[derive(Error, Debug)]
pub enum ScenarioError {
    #[error("failed to read scenario {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write scenario {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("scenario {path} is malformed: {detail}")]
    Malformed { path: PathBuf, detail: String },
}

/// Checkpoint persistence errors.
///
/// `NotFound` is kept apart from the corruption variants: a missing file is
/// a legitimate fresh start, a damaged one is not.
#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("checkpoint {0} does not exist")]
    NotFound(PathBuf),

    #[error("failed to read checkpoint {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write checkpoint {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("checkpoint {0} has invalid magic bytes")]
    InvalidMagic(PathBuf),

    #[error("checkpoint {path} has unsupported format version {found}")]
    UnsupportedVersion { path: PathBuf, found: u32 },

    #[error("checkpoint {path} is truncated: expected {expected} bytes, found {found}")]
    Truncated {
        path: PathBuf,
        expected: usize,
        found: usize,
    },

    #[error("checkpoint {path} has {extra} trailing bytes")]
    TrailingBytes { path: PathBuf, extra: usize },

    #[error("checkpoint {path} checksum mismatch: stored={stored:#018x}, computed={computed:#018x}")]
    ChecksumMismatch {
        path: PathBuf,
        stored: u64,
        computed: u64,
    },

    #[error("checkpoint {path} describes an invalid grid: {source}")]
    InvalidGrid {
        path: PathBuf,
        #[source]
        source: GridError,
    },
}

/// Top-level error for solver runs.
#[derive(Error, Debug)]
pub enum WaveError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Grid(#[from] GridError),

    #[error(transparent)]
    Scenario(#[from] ScenarioError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error("state became non-finite at step {step}")]
    NonFinite { step: u64 },

    #[error("failed to build thread pool: {0}")]
    ThreadPool(String),
}
