//! Core data model: code regions fed into the engine and the trait records
//! it emits.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::{Architecture, ExtractionConfig, Mode};
use crate::error::DisassemblyError;

/// Executable span reported by a format parser, in file-offset space.
///
/// Regions with `is_function_entry == false` are areas to sweep for code.
/// Regions with `is_function_entry == true` mark a function starting at
/// `start`; a `length` of 0 means the size is unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CodeRegion {
    pub start: u64,
    pub length: u64,
    pub is_function_entry: bool,
}

impl CodeRegion {
    pub fn code(start: u64, length: u64) -> Self {
        Self { start, length, is_function_entry: false }
    }

    pub fn function(start: u64, length: u64) -> Self {
        Self { start, length, is_function_entry: true }
    }

    pub fn end(&self) -> u64 {
        self.start.saturating_add(self.length)
    }
}

/// Byte span covered by a function trait, end exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: u64,
    pub end: u64,
}

/// One normalized trait: a basic block or a whole function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraitRecord {
    pub address: u64,
    #[serde(with = "hex::serde")]
    pub bytes: Vec<u8>,
    pub mnemonics: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edges: Option<Vec<u64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span: Option<Span>,
    pub mode: Mode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub corpus: Option<String>,
    pub tags: BTreeSet<String>,
    pub architecture: Architecture,
    pub size: usize,
    pub instructions: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocks: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cyclomatic_complexity: Option<usize>,
    pub sha256: String,
    pub entropy: f64,
}

impl TraitRecord {
    /// Block trait stamped with the run's corpus and tags.
    pub fn block(
        config: &ExtractionConfig,
        architecture: Architecture,
        address: u64,
        bytes: Vec<u8>,
        mnemonics: Vec<String>,
        edges: Vec<u64>,
    ) -> Self {
        Self::stamped(config, architecture, Mode::Block, address, bytes, mnemonics)
            .with_edges(edges)
    }

    /// Function trait stamped with the run's corpus and tags.
    #[allow(clippy::too_many_arguments)]
    pub fn function(
        config: &ExtractionConfig,
        architecture: Architecture,
        span: Span,
        bytes: Vec<u8>,
        mnemonics: Vec<String>,
        blocks: usize,
        edges: usize,
    ) -> Self {
        let mut record =
            Self::stamped(config, architecture, Mode::Function, span.start, bytes, mnemonics);
        record.span = Some(span);
        record.blocks = Some(blocks);
        record.cyclomatic_complexity = Some((edges + 2).saturating_sub(blocks).max(1));
        record
    }

    fn stamped(
        config: &ExtractionConfig,
        architecture: Architecture,
        mode: Mode,
        address: u64,
        bytes: Vec<u8>,
        mnemonics: Vec<String>,
    ) -> Self {
        Self {
            address,
            sha256: format!("{:x}", Sha256::digest(&bytes)),
            entropy: entropy(&bytes),
            size: bytes.len(),
            instructions: mnemonics.len(),
            bytes,
            mnemonics,
            edges: None,
            span: None,
            mode,
            corpus: config.corpus().map(str::to_string),
            tags: config.tags().clone(),
            architecture,
            blocks: None,
            cyclomatic_complexity: None,
        }
    }

    fn with_edges(mut self, edges: Vec<u64>) -> Self {
        self.edges = Some(edges);
        self
    }
}

/// Shannon entropy of `data` in bits per byte (0.0 to 8.0).
pub fn entropy(data: &[u8]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }

    let mut freq: HashMap<u8, usize> = HashMap::new();
    for &byte in data {
        *freq.entry(byte).or_insert(0) += 1;
    }

    let len = data.len() as f64;
    freq.values().fold(0.0, |acc, count| {
        let p = *count as f64 / len;
        acc - p * p.log2()
    })
}

/// Bytes that did not decode, starting at `offset`. Extraction continues past them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedRegion {
    pub offset: u64,
    pub reason: String,
}

impl SkippedRegion {
    pub fn new(offset: u64, err: &DisassemblyError) -> Self {
        Self { offset, reason: err.to_string() }
    }
}

/// Fully materialized result of one extraction run. Record order is
/// unspecified; sort if a deterministic order is needed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extraction {
    pub records: Vec<TraitRecord>,
    pub skipped: Vec<SkippedRegion>,
}

impl Extraction {
    pub fn skipped_count(&self) -> usize {
        self.skipped.len()
    }

    pub fn addresses(&self) -> BTreeSet<u64> {
        self.records.iter().map(|r| r.address).collect()
    }
}
