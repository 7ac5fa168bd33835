//! Program image loader. One record per line:
//!
//! ```text
//! 100 10 0 0
//! 200 ADDI X0, X0, #5
//! 204 STUR X0, [SP, #0]
//! 208 BR XZR
//! ```
//!
//! A line whose second token is a number is a data record, anything else is
//! an instruction.

use std::borrow::Cow;
use std::error;
use std::{fmt, str::Lines};

use crate::processor::Opcode;

use super::{Cell, DataRecord, InstructionRecord, Memory, Word, WORD_SIZE};

/// Characters separating tokens of a line. `X` is included so register names
/// like `X12` reduce to their index.
pub const DELIMITERS: &[char] = &[
    ' ', '#', 'X', ',', '\t', '\r', '\n', '\u{b}', '\u{c}', '[', ']',
];

/// Splits a line into its tokens
pub fn tokenize(line: &str) -> impl Iterator<Item = &str> {
    line.split(DELIMITERS).filter(|token| !token.is_empty())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadErrorKind {
    InvalidAddress,
    MisalignedAddress { address: Word },
    AddressOutOfRange { address: Word },
    DuplicateAddress { address: Word },
    MissingOpcode,
    InvalidInstruction,
    InvalidData,
}

impl fmt::Display for LoadErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadErrorKind::InvalidAddress => f.write_str("invalid address"),
            LoadErrorKind::MisalignedAddress { address } => {
                write!(f, "address `{}` is not a multiple of 4", address)
            }
            LoadErrorKind::AddressOutOfRange { address } => {
                write!(f, "memory has no address `{}`", address)
            }
            LoadErrorKind::DuplicateAddress { address } => {
                write!(f, "address `{}` is already occupied", address)
            }
            LoadErrorKind::MissingOpcode => f.write_str("missing opcode"),
            LoadErrorKind::InvalidInstruction => f.write_str("failed to resolve instruction"),
            LoadErrorKind::InvalidData => f.write_str("invalid data record"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadError {
    kind: LoadErrorKind,
    context: Option<Cow<'static, str>>,
    line_nr: usize,
}

impl LoadError {
    fn new<C, S>(kind: LoadErrorKind, context: C, line_nr: usize) -> Self
    where
        C: Into<Option<S>>,
        S: Into<Cow<'static, str>>,
    {
        Self {
            kind,
            context: context.into().map(|inner| inner.into()),
            line_nr,
        }
    }

    pub fn kind(&self) -> LoadErrorKind {
        self.kind
    }

    pub fn line_nr(&self) -> usize {
        self.line_nr
    }
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(context) = &self.context {
            write!(
                f,
                "error [ln: {}]: {} - {}",
                self.line_nr, self.kind, context
            )
        } else {
            write!(f, "error [ln: {}]: {}", self.line_nr, self.kind)
        }
    }
}

impl error::Error for LoadError {}

pub type Result<T, E = LoadError> = std::result::Result<T, E>;

#[derive(Debug, Clone)]
pub struct Parser<'a, const S: usize> {
    lines: Lines<'a>,
    line_nr: usize,
    memory: Memory<S>,
}

impl<'a, const S: usize> Parser<'a, S> {
    /// Creates a new parser for `data` which will try to populate `memory`.
    pub fn new(data: &'a str, memory: Memory<S>) -> Self {
        Self {
            lines: data.lines(),
            line_nr: 0,
            memory,
        }
    }

    /// Consumes `self` and tries to parse all lines into memory.
    ///
    /// # Errors
    ///
    /// All errors which may occur are collected and returned at the end.
    pub fn parse(mut self) -> Result<Memory<S>, Vec<LoadError>> {
        let mut errors = Vec::new();

        while let Some(res) = self.parse_next_line() {
            if let Err(err) = res {
                log::error!("{}", err);
                errors.push(err);
            }
        }

        if errors.is_empty() {
            Ok(self.memory)
        } else {
            Err(errors)
        }
    }

    fn parse_next_line(&mut self) -> Option<Result<()>> {
        let line = self.lines.next()?.trim();
        self.line_nr += 1;

        if line.is_empty() || line.starts_with("//") {
            // Comment or empty line; skip
            return Some(Ok(()));
        }

        Some(self.parse_record(line))
    }

    /// Tries to parse a whole line as either a data or an instruction record.
    ///
    /// # Examples
    ///
    /// - `100 42 0 0`
    /// - `212 LDUR X2, [X1, #0]`
    fn parse_record(&mut self, line: &str) -> Result<()> {
        let mut tokens = tokenize(line);

        let address_token = tokens
            .next()
            .ok_or_else(|| {
                LoadError::new(
                    LoadErrorKind::InvalidAddress,
                    "a record needs to start with an address",
                    self.line_nr,
                )
            })?;
        let address: Word = address_token.parse().map_err(|_| {
            LoadError::new(
                LoadErrorKind::InvalidAddress,
                format!("`{}` is not a decimal address", address_token),
                self.line_nr,
            )
        })?;

        if address % WORD_SIZE != 0 {
            return Err(LoadError::new(
                LoadErrorKind::MisalignedAddress { address },
                "instructions and data are word aligned",
                self.line_nr,
            ));
        }

        let index = Memory::<S>::word_index(address).ok_or_else(|| {
            LoadError::new(
                LoadErrorKind::AddressOutOfRange { address },
                format!("memory holds {} words", S),
                self.line_nr,
            )
        })?;

        if !self.memory.cells[index].is_empty() {
            return Err(LoadError::new(
                LoadErrorKind::DuplicateAddress { address },
                "each address may only be loaded once",
                self.line_nr,
            ));
        }

        let head = tokens.next().ok_or_else(|| {
            LoadError::new(
                LoadErrorKind::MissingOpcode,
                format!("nothing follows address `{}`", address),
                self.line_nr,
            )
        })?;

        let cell = if let Ok(value) = head.parse::<Word>() {
            log::debug!("[{}] Found data record at {}", self.line_nr, address);
            Cell::Data(self.parse_data(address, value, tokens)?)
        } else {
            let opcode = Opcode::from_name(head).ok_or_else(|| {
                LoadError::new(
                    LoadErrorKind::InvalidInstruction,
                    format!("no instruction named `{}`", head),
                    self.line_nr,
                )
            })?;

            log::debug!("[{}] Found instruction {} at {}", self.line_nr, opcode, address);

            Cell::Instruction(InstructionRecord {
                address,
                opcode,
                operands: tokens.map(str::to_owned).collect(),
                text: line.to_owned(),
            })
        };

        self.memory.cells[index] = cell;

        Ok(())
    }

    fn parse_data<'l>(
        &self,
        address: Word,
        value: Word,
        rest: impl Iterator<Item = &'l str>,
    ) -> Result<DataRecord> {
        let mut record = DataRecord::new(address, value);

        for (i, token) in rest.enumerate() {
            let slot = record.padding.get_mut(i).ok_or_else(|| {
                LoadError::new(
                    LoadErrorKind::InvalidData,
                    "a data record has at most two padding fields",
                    self.line_nr,
                )
            })?;
            *slot = token.parse().map_err(|_| {
                LoadError::new(
                    LoadErrorKind::InvalidData,
                    format!("padding `{}` is not a number", token),
                    self.line_nr,
                )
            })?;
        }

        Ok(record)
    }
}
