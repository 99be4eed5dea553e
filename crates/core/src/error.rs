use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failure to load a byte source. Fatal for the run.
#[derive(Debug, Error)]
pub enum FileError {
    #[error("Failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to read byte source: {0}")]
    Read(#[source] io::Error),
    #[error("Byte source is empty")]
    Empty,
    #[error("Byte source has already been loaded")]
    AlreadyLoaded,
    #[error("Byte source has not been loaded")]
    NotLoaded,
}

/// Invalid configuration value, reported at the setter that received it.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Thread count must be at least 1 (got {0})")]
    InvalidThreadCount(usize),
    #[error("Unknown extraction mode '{0}' (expected 'block' or 'function')")]
    UnknownMode(String),
    #[error("Unknown architecture '{0}'")]
    UnknownArchitecture(String),
    #[error("Unknown format '{0}' (expected auto, raw, pe, elf or macho)")]
    UnknownFormat(String),
    #[error("Tag must not be empty")]
    EmptyTag,
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to parse config: {0}")]
    Parse(String),
}

/// Container parse failure.
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("Malformed {format} container: {reason}")]
    Malformed { format: &'static str, reason: String },
    #[error("Unsupported container: {0}")]
    Unsupported(String),
}

/// A code region that could not be decoded. Recovered locally: the region is
/// skipped and extraction continues.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DisassemblyError {
    #[error("Decode failed at 0x{offset:X}: {reason}")]
    Decode { offset: u64, reason: String },
    #[error("Decode oracle unavailable: {0}")]
    Oracle(String),
}

/// The output sink failed. Fatal: the remaining write is aborted.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Failed to open output {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Output sink failed after {written} records: {source}")]
    Write {
        written: usize,
        #[source]
        source: io::Error,
    },
    #[error("Failed to serialize trait at 0x{address:X}: {source}")]
    Serialize {
        address: u64,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors raised while constructing a disassembler.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    File(#[from] FileError),
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Failed to build worker pool: {0}")]
    ThreadPool(String),
    #[error("Decode oracle init failed: {0}")]
    Oracle(String),
}
