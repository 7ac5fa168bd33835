//! Turns loaded instruction records into typed instructions.

use std::borrow::Cow;
use std::{error, fmt};

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::memory::{InstructionRecord, Word};

use super::Opcode;

/// Number of registers in the register file
pub const REGISTER_COUNT: usize = 32;

/// Registers with an architectural role
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
pub enum Alias {
    /// Stack pointer
    SP = 28,
    /// Program counter
    PC = 29,
    /// Link register
    LR = 30,
    /// Zero register, always reads 0
    XZR = 31,
}

impl Alias {
    pub fn name(&self) -> &'static str {
        match self {
            Alias::SP => "SP",
            Alias::PC => "PC",
            Alias::LR => "LR",
            Alias::XZR => "XZR",
        }
    }
}

/// Index into the register file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Reg(u8);

impl Reg {
    pub const SP: Reg = Reg(Alias::SP as u8);
    pub const PC: Reg = Reg(Alias::PC as u8);
    pub const LR: Reg = Reg(Alias::LR as u8);
    pub const XZR: Reg = Reg(Alias::XZR as u8);

    pub fn new(index: u8) -> Option<Self> {
        (usize::from(index) < REGISTER_COUNT).then(|| Reg(index))
    }

    pub fn index(self) -> usize {
        usize::from(self.0)
    }

    pub fn alias(self) -> Option<Alias> {
        Alias::try_from(self.0).ok()
    }
}

impl From<Alias> for Reg {
    fn from(alias: Alias) -> Self {
        Reg(alias.into())
    }
}

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.alias() {
            Some(alias) => f.write_str(alias.name()),
            None => write!(f, "X{}", self.0),
        }
    }
}

/// Resolves a register token. The tokenizer strips the `X` prefix, so the
/// zero register arrives as `ZR`.
pub fn resolve_register(token: &str) -> Option<Reg> {
    match token {
        "SP" => Some(Alias::SP.into()),
        "PC" => Some(Alias::PC.into()),
        "LR" => Some(Alias::LR.into()),
        "ZR" | "XZR" => Some(Alias::XZR.into()),
        _ => token.parse::<u8>().ok().and_then(Reg::new),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeErrorKind {
    MissingOperand,
    UnexpectedOperand,
    InvalidRegister,
    InvalidImmediate,
    NotAnInstruction,
    MisalignedPc,
    MisalignedSp,
    AddressOutOfRange { index: Word },
    NotData,
    ProgramWrite,
}

impl fmt::Display for DecodeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeErrorKind::MissingOperand => f.write_str("missing operand"),
            DecodeErrorKind::UnexpectedOperand => f.write_str("unexpected operand"),
            DecodeErrorKind::InvalidRegister => f.write_str("invalid register"),
            DecodeErrorKind::InvalidImmediate => f.write_str("invalid immediate"),
            DecodeErrorKind::NotAnInstruction => f.write_str("cell does not hold an instruction"),
            DecodeErrorKind::MisalignedPc => f.write_str("program counter is not word aligned"),
            DecodeErrorKind::MisalignedSp => {
                f.write_str("stack pointer is not double-word aligned")
            }
            DecodeErrorKind::AddressOutOfRange { index } => {
                write!(f, "memory has no cell `{}`", index)
            }
            DecodeErrorKind::NotData => f.write_str("cell does not hold data"),
            DecodeErrorKind::ProgramWrite => f.write_str("program memory is read-only"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeError {
    kind: DecodeErrorKind,
    context: Option<Cow<'static, str>>,
    address: Word,
}

impl DecodeError {
    pub(crate) fn new<C, S>(kind: DecodeErrorKind, context: C, address: Word) -> Self
    where
        C: Into<Option<S>>,
        S: Into<Cow<'static, str>>,
    {
        Self {
            kind,
            context: context.into().map(|inner| inner.into()),
            address,
        }
    }

    pub fn kind(&self) -> DecodeErrorKind {
        self.kind
    }

    /// Address of the instruction that failed
    pub fn address(&self) -> Word {
        self.address
    }
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(context) = &self.context {
            write!(f, "error [at: {}]: {} - {}", self.address, self.kind, context)
        } else {
            write!(f, "error [at: {}]: {}", self.address, self.kind)
        }
    }
}

impl error::Error for DecodeError {}

/// A decoded instruction with typed operands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    Addi { rd: Reg, rn: Reg, imm: Word },
    Add { rd: Reg, rn: Reg, rm: Reg },
    Subi { rd: Reg, rn: Reg, imm: Word },
    B { offset: Word },
    Bl { offset: Word },
    Br { rt: Reg },
    Cbz { rt: Reg, offset: Word },
    Ldur { rt: Reg, rn: Reg, offset: Word },
    Stur { rt: Reg, rn: Reg, offset: Word },
}

impl Instruction {
    pub fn decode(record: &InstructionRecord) -> Result<Self, DecodeError> {
        let mut ops = Operands {
            record,
            position: 0,
        };

        let instruction = match record.opcode {
            Opcode::ADDI => Instruction::Addi {
                rd: ops.register()?,
                rn: ops.register()?,
                imm: ops.immediate()?,
            },
            Opcode::ADD => Instruction::Add {
                rd: ops.register()?,
                rn: ops.register()?,
                rm: ops.register()?,
            },
            Opcode::SUBI => Instruction::Subi {
                rd: ops.register()?,
                rn: ops.register()?,
                imm: ops.immediate()?,
            },
            Opcode::B => Instruction::B {
                offset: ops.immediate()?,
            },
            Opcode::BL => Instruction::Bl {
                offset: ops.immediate()?,
            },
            Opcode::BR => Instruction::Br {
                rt: ops.register()?,
            },
            Opcode::CBZ => Instruction::Cbz {
                rt: ops.register()?,
                offset: ops.immediate()?,
            },
            Opcode::LDUR => Instruction::Ldur {
                rt: ops.register()?,
                rn: ops.register()?,
                offset: ops.immediate()?,
            },
            Opcode::STUR => Instruction::Stur {
                rt: ops.register()?,
                rn: ops.register()?,
                offset: ops.immediate()?,
            },
        };

        ops.finish()?;

        Ok(instruction)
    }
}

/// Cursor over the operand tokens of a record
struct Operands<'r> {
    record: &'r InstructionRecord,
    position: usize,
}

impl<'r> Operands<'r> {
    fn next(&mut self) -> Result<&'r str, DecodeError> {
        let token = self.record.operands.get(self.position).ok_or_else(|| {
            DecodeError::new(
                DecodeErrorKind::MissingOperand,
                format!("`{}` expects more operands", self.record.opcode),
                self.record.address,
            )
        })?;
        self.position += 1;

        Ok(token.as_str())
    }

    fn register(&mut self) -> Result<Reg, DecodeError> {
        let token = self.next()?;
        resolve_register(token).ok_or_else(|| {
            DecodeError::new(
                DecodeErrorKind::InvalidRegister,
                format!("`{}`", token),
                self.record.address,
            )
        })
    }

    fn immediate(&mut self) -> Result<Word, DecodeError> {
        let token = self.next()?;
        token.parse().map_err(|_| {
            DecodeError::new(
                DecodeErrorKind::InvalidImmediate,
                format!("`{}`", token),
                self.record.address,
            )
        })
    }

    fn finish(self) -> Result<(), DecodeError> {
        match self.record.operands.get(self.position) {
            Some(token) => Err(DecodeError::new(
                DecodeErrorKind::UnexpectedOperand,
                format!("`{}`", token),
                self.record.address,
            )),
            None => Ok(()),
        }
    }
}
