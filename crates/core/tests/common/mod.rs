//! Deterministic toy instruction set for engine tests.
//!
//! | byte | instruction          | length |
//! |------|----------------------|--------|
//! | 0x90 | nop                  | 1      |
//! | 0xC3 | ret                  | 1      |
//! | 0xE8 | call rel8            | 2      |
//! | 0xEB | jmp rel8             | 2      |
//! | 0x74 | je rel8              | 2      |
//! | else | invalid              |        |
#![allow(dead_code)]

use binlex_core::services::oracle::{
    ControlFlow, DecodeError, DecodeOracle, Instruction, OracleProvider,
};

pub struct ToyOracle;

impl DecodeOracle for ToyOracle {
    fn decode(&mut self, code: &[u8], address: u64) -> Result<Instruction, DecodeError> {
        let rel_target = |code: &[u8]| -> Result<u64, DecodeError> {
            let rel = *code.get(1).ok_or_else(|| DecodeError("truncated".into()))? as i8;
            Ok((address as i64 + 2 + rel as i64) as u64)
        };
        let (mnemonic, length, flow) = match code.first() {
            Some(0x90) => ("nop", 1, ControlFlow::Sequential),
            Some(0xC3) => ("ret", 1, ControlFlow::Return),
            Some(0xE8) => ("call", 2, ControlFlow::Call { target: Some(rel_target(code)?) }),
            Some(0xEB) => {
                ("jmp", 2, ControlFlow::Jump { target: Some(rel_target(code)?), conditional: false })
            }
            Some(0x74) => {
                ("je", 2, ControlFlow::Jump { target: Some(rel_target(code)?), conditional: true })
            }
            Some(other) => return Err(DecodeError(format!("invalid opcode 0x{other:02X}"))),
            None => return Err(DecodeError("empty".into())),
        };
        Ok(Instruction {
            address,
            length,
            mnemonic: mnemonic.to_string(),
            operands: String::new(),
            flow,
        })
    }
}

pub struct ToyProvider;

impl OracleProvider for ToyProvider {
    fn oracle(&self) -> Result<Box<dyn DecodeOracle>, DecodeError> {
        Ok(Box::new(ToyOracle))
    }

    fn name(&self) -> &'static str {
        "toy"
    }
}

pub fn toy() -> Box<dyn OracleProvider> {
    Box::new(ToyProvider)
}
