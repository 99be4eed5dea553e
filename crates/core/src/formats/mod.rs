//! Container format parsers.
//!
//! A parser only has to report executable regions and function entries in
//! file-offset space, plus the architecture if the container records one.

use std::fmt;
use std::str::FromStr;

use goblin::Object;
use serde::{Deserialize, Serialize};

use crate::config::Architecture;
use crate::error::{ConfigError, FormatError};
use crate::model::CodeRegion;

pub mod elf;
pub mod macho;
pub mod pe;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    Raw,
    Pe,
    Elf,
    MachO,
}

impl Format {
    /// Sniff the container format; anything goblin does not recognize is raw.
    pub fn detect(bytes: &[u8]) -> Format {
        match Object::parse(bytes) {
            Ok(Object::Elf(_)) => Format::Elf,
            Ok(Object::PE(_)) => Format::Pe,
            Ok(Object::Mach(_)) => Format::MachO,
            _ => Format::Raw,
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Format::Raw => "raw",
            Format::Pe => "pe",
            Format::Elf => "elf",
            Format::MachO => "macho",
        };
        f.write_str(name)
    }
}

impl FromStr for Format {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "raw" | "shellcode" => Ok(Format::Raw),
            "pe" => Ok(Format::Pe),
            "elf" => Ok(Format::Elf),
            "macho" | "mach-o" => Ok(Format::MachO),
            _ => Err(ConfigError::UnknownFormat(s.to_string())),
        }
    }
}

/// What a format parser hands to the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedContainer {
    pub regions: Vec<CodeRegion>,
    pub architecture: Option<Architecture>,
}

impl ParsedContainer {
    pub fn code_regions(&self) -> impl Iterator<Item = &CodeRegion> {
        self.regions.iter().filter(|r| !r.is_function_entry)
    }

    pub fn function_entries(&self) -> impl Iterator<Item = &CodeRegion> {
        self.regions.iter().filter(|r| r.is_function_entry)
    }
}

/// The whole buffer is one code region with a function entry at offset 0.
pub fn parse_raw(bytes: &[u8]) -> ParsedContainer {
    if bytes.is_empty() {
        return ParsedContainer::default();
    }
    let len = bytes.len() as u64;
    ParsedContainer {
        regions: vec![CodeRegion::code(0, len), CodeRegion::function(0, 0)],
        architecture: None,
    }
}

/// Executable area of a container, in both address spaces.
#[derive(Debug, Clone, Copy)]
pub(crate) struct MappedSection {
    pub addr: u64,
    pub size: u64,
    pub offset: u64,
}

impl MappedSection {
    /// File range of `addr..addr+size` (or up to the section end when `size`
    /// is unknown), clipped to the file.
    pub fn file_range(&self, addr: u64, size: Option<u64>, bytes_len: usize) -> Option<(u64, u64)> {
        if addr < self.addr || addr >= self.addr.saturating_add(self.size) {
            return None;
        }
        let offset_in_section = addr - self.addr;
        let start = self.offset.saturating_add(offset_in_section);
        if start >= bytes_len as u64 {
            return None;
        }
        let available = self.size - offset_in_section;
        let length = size.unwrap_or(available).min(available);
        let end = start.saturating_add(length).min(bytes_len as u64);
        if end <= start {
            None
        } else {
            Some((start, end))
        }
    }

    pub fn region(&self, bytes_len: usize) -> Option<CodeRegion> {
        self.file_range(self.addr, None, bytes_len)
            .map(|(start, end)| CodeRegion::code(start, end - start))
    }
}

/// Function entry at virtual address `addr`, resolved through `sections`.
/// A `size` of `None` leaves the function length open.
pub(crate) fn entry_region(
    sections: &[MappedSection],
    addr: u64,
    size: Option<u64>,
    bytes_len: usize,
) -> Option<CodeRegion> {
    sections.iter().find_map(|sec| {
        let (start, end) = sec.file_range(addr, size, bytes_len)?;
        let length = if size.is_some() { end - start } else { 0 };
        Some(CodeRegion::function(start, length))
    })
}

pub(crate) fn malformed(format: &'static str, err: goblin::error::Error) -> FormatError {
    FormatError::Malformed { format, reason: err.to_string() }
}
