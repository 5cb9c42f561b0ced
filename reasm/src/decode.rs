// instruction decoding, one capstone instance per run

use crate::error::ReasmError;
use capstone::arch::x86::{ArchMode, ArchSyntax, X86OperandType};
use capstone::prelude::*;
use capstone::Capstone;

#[derive(Debug, Copy, Clone, PartialEq)]
pub enum InsnFlow {
    Sequential,
    Call,
    Jump,
    CondJump,
    Return,
}

impl InsnFlow {
    pub fn is_branch(&self) -> bool {
        matches!(self, InsnFlow::Call | InsnFlow::Jump | InsnFlow::CondJump)
    }
}

/// one decoded instruction, everything the analysis needs to know
#[derive(Debug, Clone)]
pub struct DecodedInsn {
    pub addr: u64,
    pub len: u64,
    pub mnemonic: String,
    pub op_str: String,
    pub flow: InsnFlow,
    /// resolved direct branch target
    pub target: Option<u64>,
    /// displacements of memory operands with no base register, the
    /// shape absolute data addresses and jump tables take
    pub mem_disps: Vec<u64>,
}

impl DecodedInsn {
    pub fn end(&self) -> u64 {
        self.addr + self.len
    }
}

pub trait InsnDecoder {
    fn decode(&self, bytes: &[u8], addr: u64) -> Result<DecodedInsn, ReasmError>;
}

pub struct CapstoneDecoder {
    cs: Capstone,
}

impl CapstoneDecoder {
    pub fn new(intel_syntax: bool) -> Result<Self, ReasmError> {
        let syntax = if intel_syntax {
            ArchSyntax::Intel
        } else {
            ArchSyntax::Att
        };
        let cs = Capstone::new()
            .x86()
            .mode(ArchMode::Mode32)
            .syntax(syntax)
            .detail(true)
            .build()
            .map_err(|e| ReasmError::Decoder(e.to_string()))?;
        Ok(Self { cs })
    }
}

fn classify(mnemonic: &str) -> InsnFlow {
    match mnemonic {
        "call" | "lcall" => InsnFlow::Call,
        "jmp" | "ljmp" => InsnFlow::Jump,
        "ret" | "retf" | "iret" | "iretd" => InsnFlow::Return,
        m if m.starts_with('j') => InsnFlow::CondJump,
        _ => InsnFlow::Sequential,
    }
}

impl InsnDecoder for CapstoneDecoder {
    fn decode(&self, bytes: &[u8], addr: u64) -> Result<DecodedInsn, ReasmError> {
        let insns = self
            .cs
            .disasm_count(bytes, addr, 1)
            .map_err(|_| ReasmError::Decode(addr))?;
        // capstone reports garbage as an empty result, not an error
        let insn = insns.as_ref().first().ok_or(ReasmError::Decode(addr))?;

        let mnemonic = insn.mnemonic().unwrap_or("").to_string();
        let op_str = insn.op_str().unwrap_or("").to_string();
        let flow = classify(&mnemonic);

        let mut target = None;
        let mut mem_disps = vec![];
        if let Ok(detail) = self.cs.insn_detail(insn) {
            let arch = detail.arch_detail();
            if let Some(x86) = arch.x86() {
                for op in x86.operands() {
                    match op.op_type {
                        X86OperandType::Imm(v) => {
                            if flow.is_branch() {
                                // capstone already folded pc-relative
                                // offsets into an absolute address
                                target = Some(v as u64);
                            }
                        }
                        X86OperandType::Mem(mem) => {
                            if mem.base().0 == 0 {
                                mem_disps.push(mem.disp() as u32 as u64);
                            }
                        }
                        _ => {}
                    }
                }
            }
        }

        Ok(DecodedInsn {
            addr,
            len: insn.len() as u64,
            mnemonic,
            op_str,
            flow,
            target,
            mem_disps,
        })
    }
}
