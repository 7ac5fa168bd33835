use std::fmt;

use crate::memory::{
    Cell, DataRecord, InstructionRecord, Memory, Word, DOUBLE_WORD_SIZE, PROGRAM_START, WORD_SIZE,
};
use crate::report::{Gate, Reporter};
use color_eyre::eyre::{eyre, Result, WrapErr};
use log::*;

pub mod decode;

use decode::{DecodeError, DecodeErrorKind, Instruction, Reg, REGISTER_COUNT};

/// Machine parameters that are fixed for a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Value of PC while the program is being loaded
    pub load_cursor: Word,
    /// Address of the first instruction to execute
    pub entrypoint: Word,
    /// Initial stack pointer, the highest stack address
    pub stack_top: Word,
    /// How far below `stack_top` SP may move
    pub stack_size: Word,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            load_cursor: 100,
            entrypoint: 200,
            stack_top: 4000,
            stack_size: 100,
        }
    }
}

impl Config {
    /// Lowest address SP may legally hold
    pub fn stack_bottom(&self) -> Word {
        self.stack_top - self.stack_size
    }

    /// Checks that the stack window is double-word aligned and lies between
    /// the start of the program region and the end of a memory of `S` cells.
    pub fn validate<const S: usize>(&self) -> Result<()> {
        if self.stack_top % DOUBLE_WORD_SIZE != 0 {
            return Err(eyre!(
                "Stack top {} is not a multiple of {}",
                self.stack_top,
                DOUBLE_WORD_SIZE
            ));
        }
        if Memory::<S>::double_word_index(self.stack_top).is_none() {
            return Err(eyre!("Stack top {} lies outside memory", self.stack_top));
        }
        if self.stack_size < 0 || self.stack_bottom() < self.program_start() {
            return Err(eyre!(
                "Stack size {} must be between 0 and {}",
                self.stack_size,
                self.stack_top - self.program_start()
            ));
        }

        Ok(())
    }

    /// First byte address of the program region
    fn program_start(&self) -> Word {
        PROGRAM_START as Word * WORD_SIZE
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Running,
    /// A branch set PC to 0
    HaltedPcZero,
    /// PC points at an empty cell
    HaltedEndOfProgram,
    /// SP left the stack window
    StackOverflow { stack_top: Word, sp: Word },
}

impl Status {
    pub fn is_terminal(&self) -> bool {
        *self != Status::Running
    }
}

/// Read-only view of the machine handed to a [`Reporter`]
#[derive(Debug, Clone)]
pub struct Snapshot<'a> {
    /// The instruction that was just executed
    pub instruction: Option<&'a InstructionRecord>,
    pub registers: &'a [Word; REGISTER_COUNT],
    pub data: Vec<&'a Cell>,
    pub program: Vec<&'a Cell>,
    /// Stack slots from the top downwards
    pub stack: Vec<&'a Cell>,
    pub stack_top: Word,
}

impl Snapshot<'_> {
    pub fn read(&self, reg: Reg) -> Word {
        self.registers[reg.index()]
    }
}

/// Emulates the CPU: register file plus the fetch-decode-execute loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Processor {
    /// General registers 0-27 followed by SP, PC, LR and XZR
    pub registers: [Word; REGISTER_COUNT],
    pub status: Status,
    pub config: Config,
}

impl Default for Processor {
    /// Initializes a new CPU with the default configuration
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl Processor {
    /// Initializes a new CPU. PC holds the load cursor until [`Processor::begin`].
    pub fn new(config: Config) -> Self {
        let mut registers = [0; REGISTER_COUNT];
        registers[Reg::PC.index()] = config.load_cursor;
        registers[Reg::SP.index()] = config.stack_top;

        Self {
            registers,
            status: Status::Running,
            config,
        }
    }

    pub fn pc(&self) -> Word {
        self.registers[Reg::PC.index()]
    }

    pub fn sp(&self) -> Word {
        self.registers[Reg::SP.index()]
    }

    pub fn lr(&self) -> Word {
        self.registers[Reg::LR.index()]
    }

    /// Reads a register. XZR always reads 0.
    pub fn read(&self, reg: Reg) -> Word {
        if reg == Reg::XZR {
            0
        } else {
            self.registers[reg.index()]
        }
    }

    /// Writes a register. Writes to XZR are dropped.
    pub fn write(&mut self, reg: Reg, value: Word) {
        if reg == Reg::XZR {
            debug!("Ignoring write of {} to XZR", value);
            return;
        }
        self.registers[reg.index()] = value;
    }

    fn set_pc(&mut self, value: Word) {
        self.registers[Reg::PC.index()] = value;
    }

    /// Points PC at the entrypoint and marks the CPU as running
    pub fn begin(&mut self) {
        self.set_pc(self.config.entrypoint);
        self.status = Status::Running;
    }

    /// Decodes every loaded instruction so operand errors surface before the
    /// first cycle.
    pub fn verify<const S: usize>(&self, memory: &Memory<S>) -> Result<()> {
        for cell in &memory.cells {
            if let Cell::Instruction(record) = cell {
                Instruction::decode(record)?;
            }
        }

        Ok(())
    }

    /// Executes a single decoded instruction. Returns whether SP was written.
    pub fn execute_instruction<const S: usize>(
        &mut self,
        instruction: Instruction,
        address: Word,
        memory: &mut Memory<S>,
    ) -> Result<bool> {
        let mut sp_modified = false;

        match instruction {
            Instruction::Addi { rd, rn, imm } => {
                let result = self.read(rn).wrapping_add(imm);
                self.write(rd, result);
                sp_modified = rd == Reg::SP;

                debug!("ADDI {} {} {}: {}", rd, rn, imm, result);
            }
            Instruction::Add { rd, rn, rm } => {
                let result = self.read(rn).wrapping_add(self.read(rm));
                self.write(rd, result);
                sp_modified = rd == Reg::SP;

                debug!("ADD {} {} {}: {}", rd, rn, rm, result);
            }
            Instruction::Subi { rd, rn, imm } => {
                let result = self.read(rn).wrapping_sub(imm);
                self.write(rd, result);
                sp_modified = rd == Reg::SP;

                debug!("SUBI {} {} {}: {}", rd, rn, imm, result);
            }
            Instruction::B { offset } => {
                let target = self.pc().wrapping_add(offset);
                self.set_pc(target);

                debug!("B {}: {}", offset, target);
            }
            Instruction::Bl { offset } => {
                let target = self.lr().wrapping_add(offset);
                self.set_pc(target);

                // unwind every frame between SP and the top of the stack
                let from = self.sp().clamp(self.config.stack_bottom(), self.config.stack_top);
                if let (Some(low), Some(high)) = (
                    Memory::<S>::double_word_index(from),
                    Memory::<S>::double_word_index(self.config.stack_top),
                ) {
                    memory.clear(low..=high);
                }
                self.write(Reg::SP, self.config.stack_top);
                sp_modified = true;

                debug!("BL {}: {}", offset, target);
            }
            Instruction::Br { rt } => {
                let target = self.read(rt);
                self.set_pc(target);

                debug!("BR {}: {}", rt, target);
            }
            Instruction::Cbz { rt, offset } => {
                let value = self.read(rt);
                if value == 0 {
                    self.set_pc(self.pc().wrapping_add(offset));
                }

                debug!("CBZ {} {}: {}", rt, offset, value);
            }
            Instruction::Ldur { rt, rn, offset } => {
                let (index, _) = self.effective_index::<S>(rn, offset, address)?;
                let value = match &memory.cells[index] {
                    Cell::Data(record) => record.value,
                    Cell::Empty => 0,
                    Cell::Instruction(_) => {
                        return Err(DecodeError::new(
                            DecodeErrorKind::NotData,
                            format!("LDUR from cell `{}`", index),
                            address,
                        )
                        .into())
                    }
                };
                self.write(rt, value);
                sp_modified = rt == Reg::SP;

                debug!("LDUR {} [{} {}]: {}", rt, rn, offset, value);
            }
            Instruction::Stur { rt, rn, offset } => {
                let (index, size) = self.effective_index::<S>(rn, offset, address)?;
                if let Cell::Instruction(_) = memory.cells[index] {
                    return Err(DecodeError::new(
                        DecodeErrorKind::ProgramWrite,
                        format!("STUR to cell `{}`", index),
                        address,
                    )
                    .into());
                }
                let value = self.read(rt);
                memory.write_cell(index, Cell::Data(DataRecord::new(index as Word * size, value)));

                debug!("STUR {} [{} {}]: {}", rt, rn, offset, value);
            }
        }

        Ok(sp_modified)
    }

    /// Cell index and granularity of a `[base, offset]` operand. SP-relative
    /// accesses address double words, everything else words.
    fn effective_index<const S: usize>(
        &self,
        base: Reg,
        offset: Word,
        address: Word,
    ) -> Result<(usize, Word), DecodeError> {
        let size = if base == Reg::SP {
            DOUBLE_WORD_SIZE
        } else {
            WORD_SIZE
        };
        let index = (self.read(base) / size).wrapping_add(offset / size);

        usize::try_from(index)
            .ok()
            .filter(|&index| index < S)
            .map(|index| (index, size))
            .ok_or_else(|| {
                DecodeError::new(
                    DecodeErrorKind::AddressOutOfRange { index },
                    format!("`[{}, {}]`", base, offset),
                    address,
                )
            })
    }

    /// Runs one execution step: fetch, decode, execute, stack check and PC
    /// update. Returns the status after the step.
    pub fn step<const S: usize>(&mut self, memory: &mut Memory<S>) -> Result<Status> {
        if self.status.is_terminal() {
            return Ok(self.status);
        }

        let address = self.pc();
        if address % WORD_SIZE != 0 {
            return Err(DecodeError::new(
                DecodeErrorKind::MisalignedPc,
                format!("PC = {}", address),
                address,
            )
            .into());
        }

        let record = match Memory::<S>::word_index(address).and_then(|index| memory.cell(index)) {
            Some(Cell::Instruction(record)) => record,
            Some(Cell::Data(_)) => {
                return Err(
                    DecodeError::new(
                        DecodeErrorKind::NotAnInstruction,
                        "PC points at a data record",
                        address,
                    )
                    .into(),
                )
            }
            Some(Cell::Empty) | None => {
                info!("Reached end of program at {}", address);
                self.status = Status::HaltedEndOfProgram;
                return Ok(self.status);
            }
        };

        let opcode = record.opcode;
        let instruction = Instruction::decode(record)?;
        let sp_modified = self
            .execute_instruction(instruction, address, memory)
            .wrap_err_with(|| format!("Failed to execute instruction at {}", address))?;

        let sp = self.sp();
        let config = self.config;
        if sp_modified && !(config.stack_bottom()..=config.stack_top).contains(&sp) {
            warn!("Stack overflow: SP = {}, stack top = {}", sp, config.stack_top);
            self.status = Status::StackOverflow {
                stack_top: config.stack_top,
                sp,
            };
        } else if sp_modified && sp % DOUBLE_WORD_SIZE != 0 {
            return Err(DecodeError::new(
                DecodeErrorKind::MisalignedSp,
                format!("SP = {}", sp),
                address,
            )
            .into());
        } else if self.pc() == 0 {
            info!("PC set to 0 at {}", address);
            self.status = Status::HaltedPcZero;
        } else if !opcode.is_branch() {
            self.set_pc(self.pc().wrapping_add(WORD_SIZE));
        }

        Ok(self.status)
    }

    /// Captures the machine state for reporting
    pub fn snapshot<'a, const S: usize>(
        &'a self,
        memory: &'a Memory<S>,
        executed: Option<Word>,
    ) -> Snapshot<'a> {
        let stack_bottom = Memory::<S>::double_word_index(self.config.stack_bottom()).unwrap_or(S);

        Snapshot {
            instruction: executed.and_then(|address| memory.instruction_at(address)),
            registers: &self.registers,
            data: memory.data_region(),
            program: memory.program_region(stack_bottom),
            stack: memory.stack_region(
                self.config.stack_bottom(),
                self.config.stack_top,
                self.sp(),
            ),
            stack_top: self.config.stack_top,
        }
    }

    /// Run the program from the entrypoint until a termination condition is
    /// met. Every executed step is handed to `reporter`, and `gate` is waited
    /// on between steps.
    pub fn run<const S: usize, R: Reporter, G: Gate>(
        &mut self,
        memory: &mut Memory<S>,
        reporter: &mut R,
        gate: &mut G,
    ) -> Result<Status> {
        self.begin();
        info!("Starting execution at {}", self.pc());

        loop {
            let address = self.pc();
            let status = self.step(memory)?;

            if status != Status::HaltedEndOfProgram {
                reporter
                    .executed(&self.snapshot(memory, Some(address)))
                    .wrap_err("Failed to report step")?;
            }

            if status.is_terminal() {
                break;
            }

            gate.wait().wrap_err("Failed to wait for next step")?;
        }

        info!("Program terminated: {:?}", self.status);
        reporter
            .terminated(&self.status, &self.snapshot(memory, None))
            .wrap_err("Failed to report termination")?;

        Ok(self.status)
    }
}

macro_rules! opcodes {
    ( $( $( #[doc = $doc:expr] )+ $name:ident , )+ ) => {
        /// The closed set of supported mnemonics
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Opcode {
            $(
                $( #[doc = $doc] )+
                $name,
            )+
        }

        impl Opcode {
            pub const ALL: &'static [Self] = &[
                $( Self::$name , )+
            ];

            pub fn name(&self) -> &'static str {
                match self {
                    $( Self::$name => stringify!($name) , )+
                }
            }
        }

        impl ::std::fmt::Display for Opcode {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                match self {
                    $( Self::$name => f.write_str(stringify!($name)) , )+
                }
            }
        }
    }
}

opcodes! {
    /// Add immediate
    /// @param rd, rn, constant
    ADDI,
    /// Add registers
    /// @param rd, rn, rm
    ADD,
    /// Subtract immediate
    /// @param rd, rn, constant
    SUBI,
    /// Branch relative to PC
    /// @param offset
    B,
    /// Branch relative to LR, unwinding the whole stack
    /// @param offset
    BL,
    /// Branch to the address in a register. `BR XZR` halts.
    /// @param rt
    BR,
    /// Branch relative to PC if a register is zero
    /// @param rt, offset
    CBZ,
    /// Load a value from memory
    /// @param rt, rn, offset
    LDUR,
    /// Store a value to memory
    /// @param rt, rn, offset
    STUR,
}

impl Opcode {
    /// Looks up a mnemonic
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|opcode| opcode.name() == name)
    }

    /// Branch-class opcodes set PC themselves and skip the auto-increment
    pub fn is_branch(&self) -> bool {
        matches!(self, Opcode::B | Opcode::BL | Opcode::BR | Opcode::CBZ)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Running => f.write_str("running"),
            Status::HaltedPcZero => f.write_str("halted: PC set to 0"),
            Status::HaltedEndOfProgram => f.write_str("halted: end of program"),
            Status::StackOverflow { stack_top, sp } => {
                write!(f, "stack overflow: SP = {} (stack top {})", sp, stack_top)
            }
        }
    }
}
