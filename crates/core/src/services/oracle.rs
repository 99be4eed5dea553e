//! The decode oracle seam: turns a byte span into one decoded instruction.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Control-flow classification of a decoded instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlFlow {
    Sequential,
    Call { target: Option<u64> },
    Jump { target: Option<u64>, conditional: bool },
    Return,
}

impl ControlFlow {
    /// Whether this instruction ends a basic block.
    pub fn ends_block(&self) -> bool {
        !matches!(self, ControlFlow::Sequential)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    pub address: u64,
    pub length: usize,
    pub mnemonic: String,
    pub operands: String,
    pub flow: ControlFlow,
}

impl Instruction {
    /// "mnemonic operands", trimmed.
    pub fn summary(&self) -> String {
        format!("{} {}", self.mnemonic, self.operands).trim().to_string()
    }

    pub fn end(&self) -> u64 {
        self.address + self.length as u64
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct DecodeError(pub String);

/// Decodes a single instruction at the start of `code`, which lives at
/// `address` in the byte source.
pub trait DecodeOracle {
    fn decode(&mut self, code: &[u8], address: u64) -> Result<Instruction, DecodeError>;
}

/// Hands out one oracle per worker. Oracles themselves need not be `Send`.
pub trait OracleProvider: Send + Sync {
    fn oracle(&self) -> Result<Box<dyn DecodeOracle>, DecodeError>;

    fn name(&self) -> &'static str;
}
