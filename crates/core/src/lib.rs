//! binlex-core
//!
//! Core library for extracting normalized block and function traits from
//! binaries, independent of the container format.
//!
//! A run borrows a loaded [`source::ByteSource`], takes an immutable
//! [`config::ExtractionConfig`], picks a per-format [`disassembler`] through
//! [`disassembler::DisassemblerBuilder`], and yields [`model::TraitRecord`]s
//! that [`writer::TraitWriter`] serializes as JSON Lines.

pub mod config;
pub mod disassembler;
pub mod error;
pub mod formats;
pub mod model;
pub mod services;
pub mod source;
pub mod writer;

pub use config::{Architecture, ExtractionConfig, Mode};
pub use disassembler::{AnyDisassembler, Disassembler, DisassemblerBuilder};
pub use error::{ConfigError, DisassemblyError, EngineError, FileError, FormatError, SinkError};
pub use formats::Format;
pub use model::{CodeRegion, Extraction, SkippedRegion, TraitRecord};
pub use source::{ByteSource, FileSource, RawSource};
pub use writer::{Sink, TraitWriter, WriteSummary};

/// Returns the library version as encoded at compile time.
///
/// Useful for tests and for frontends to report consistent version info.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
