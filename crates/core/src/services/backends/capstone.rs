use capstone::{arch, prelude::*, Capstone, InsnGroupId};

use crate::config::Architecture;
use crate::services::oracle::{ControlFlow, DecodeError, DecodeOracle, Instruction, OracleProvider};

/// Capstone-backed oracle provider for one architecture.
#[derive(Debug, Clone, Copy)]
pub struct CapstoneProvider {
    pub arch: Architecture,
}

impl CapstoneProvider {
    pub fn new(arch: Architecture) -> Self {
        Self { arch }
    }
}

impl OracleProvider for CapstoneProvider {
    fn oracle(&self) -> Result<Box<dyn DecodeOracle>, DecodeError> {
        Ok(Box::new(CapstoneOracle::new(self.arch)?))
    }

    fn name(&self) -> &'static str {
        "capstone"
    }
}

pub struct CapstoneOracle {
    cs: Capstone,
    arch: Architecture,
}

fn capstone_version() -> String {
    let (major, minor) = Capstone::lib_version();
    format!("{major}.{minor}")
}

fn make_cs(arch: Architecture) -> Result<Capstone, DecodeError> {
    let built = match arch {
        Architecture::X86_64 => {
            Capstone::new().x86().mode(arch::x86::ArchMode::Mode64).detail(true).build()
        }
        Architecture::X86 => {
            Capstone::new().x86().mode(arch::x86::ArchMode::Mode32).detail(true).build()
        }
        Architecture::Arm => {
            Capstone::new().arm().mode(arch::arm::ArchMode::Arm).detail(true).build()
        }
        Architecture::Arm64 => {
            Capstone::new().arm64().mode(arch::arm64::ArchMode::Arm).detail(true).build()
        }
    };
    built.map_err(|e| {
        DecodeError(format!("capstone {} init failed for {arch}: {e}", capstone_version()))
    })
}

fn decode_branch_target(detail: &capstone::InsnDetail) -> Option<u64> {
    detail.arch_detail().operands().iter().find_map(|op| match op {
        capstone::arch::ArchOperand::X86Operand(op) => {
            if let capstone::arch::x86::X86OperandType::Imm(imm) = op.op_type {
                Some(imm as u64)
            } else {
                None
            }
        }
        capstone::arch::ArchOperand::ArmOperand(op) => {
            if let capstone::arch::arm::ArmOperandType::Imm(imm) = op.op_type {
                Some(imm as u64)
            } else {
                None
            }
        }
        capstone::arch::ArchOperand::Arm64Operand(op) => {
            if let capstone::arch::arm64::Arm64OperandType::Imm(imm) = op.op_type {
                Some(imm as u64)
            } else {
                None
            }
        }
        _ => None,
    })
}

fn is_conditional(arch: Architecture, mnemonic: &str) -> bool {
    let m = mnemonic.to_lowercase();
    match arch {
        Architecture::X86 | Architecture::X86_64 => {
            (m.starts_with('j') && m != "jmp") || m.starts_with("loop")
        }
        Architecture::Arm64 => {
            m.starts_with("b.") || matches!(m.as_str(), "cbz" | "cbnz" | "tbz" | "tbnz")
        }
        Architecture::Arm => {
            if matches!(m.as_str(), "cbz" | "cbnz") {
                return true;
            }
            let base = m.trim_end_matches(".w").trim_end_matches(".n");
            !matches!(base, "b" | "bl" | "blx" | "bx") && base.starts_with('b') && base.len() >= 3
        }
    }
}

fn has_group(groups: &[InsnGroupId], group: u8) -> bool {
    groups.iter().any(|g| *g == InsnGroupId(group))
}

impl CapstoneOracle {
    pub fn new(arch: Architecture) -> Result<Self, DecodeError> {
        Ok(Self { cs: make_cs(arch)?, arch })
    }
}

impl DecodeOracle for CapstoneOracle {
    fn decode(&mut self, code: &[u8], address: u64) -> Result<Instruction, DecodeError> {
        let insns = self
            .cs
            .disasm_count(code, address, 1)
            .map_err(|e| DecodeError(format!("capstone: {e}")))?;
        let Some(i) = insns.iter().next() else {
            return Err(DecodeError("invalid instruction".into()));
        };

        let mnemonic = i.mnemonic().unwrap_or("").to_string();
        let detail =
            self.cs.insn_detail(i).map_err(|e| DecodeError(format!("capstone detail: {e}")))?;
        let groups = detail.groups();

        let flow = if has_group(groups, capstone::InsnGroupType::CS_GRP_CALL as u8) {
            ControlFlow::Call { target: decode_branch_target(&detail) }
        } else if has_group(groups, capstone::InsnGroupType::CS_GRP_RET as u8) {
            ControlFlow::Return
        } else if has_group(groups, capstone::InsnGroupType::CS_GRP_JUMP as u8) {
            ControlFlow::Jump {
                target: decode_branch_target(&detail),
                conditional: is_conditional(self.arch, &mnemonic),
            }
        } else {
            ControlFlow::Sequential
        };

        Ok(Instruction {
            address: i.address(),
            length: i.bytes().len(),
            operands: i.op_str().unwrap_or("").to_string(),
            mnemonic,
            flow,
        })
    }
}
