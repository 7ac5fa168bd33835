use std::fmt;
use std::path::Path;
use std::str::FromStr;

use color_eyre::eyre::{eyre, Result, WrapErr};

use crate::processor::Opcode;

pub mod parse;

pub type Word = i64; // registers and data values

/// Number of cells in the default memory
pub const MEMORY_SIZE: usize = 2000;

/// Default memory
pub type StdMem = Memory<MEMORY_SIZE>;

/// Size of a general memory word in bytes
pub const WORD_SIZE: Word = 4;
/// Size of a stack slot in bytes
pub const DOUBLE_WORD_SIZE: Word = 8;

/// First cell of the data region
pub const DATA_START: usize = 25;
/// First cell of the program region
pub const PROGRAM_START: usize = 50;

/// A loaded instruction. Never modified after load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstructionRecord {
    pub address: Word,
    pub opcode: Opcode,
    pub operands: Vec<String>,
    /// The source line, as written in the program image
    pub text: String,
}

impl fmt::Display for InstructionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// A data word living in memory, either loaded or written by `STUR`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataRecord {
    pub address: Word,
    pub value: Word,
    pub padding: [Word; 2],
}

impl DataRecord {
    pub fn new(address: Word, value: Word) -> Self {
        Self {
            address,
            value,
            padding: [0; 2],
        }
    }
}

impl fmt::Display for DataRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {}",
            self.address, self.value, self.padding[0], self.padding[1]
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cell {
    Empty,
    Instruction(InstructionRecord),
    Data(DataRecord),
}

impl Cell {
    pub fn is_empty(&self) -> bool {
        matches!(self, Cell::Empty)
    }
}

impl Default for Cell {
    fn default() -> Self {
        Cell::Empty
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Empty => Ok(()),
            Cell::Instruction(record) => record.fmt(f),
            Cell::Data(record) => record.fmt(f),
        }
    }
}

/// Emulates memory for use with the CPU. Holds `S` cells, each either empty
/// or a whole instruction/data record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Memory<const S: usize> {
    /// The actual cells of the memory
    pub cells: Vec<Cell>,
}

impl<const S: usize> Default for Memory<S> {
    /// Initializes the memory with every cell empty
    fn default() -> Self {
        Memory {
            cells: vec![Cell::Empty; S],
        }
    }
}

impl<const S: usize> Memory<S> {
    /// Cell index of a word-aligned byte address, if it lies inside memory
    pub fn word_index(address: Word) -> Option<usize> {
        Self::index(address, WORD_SIZE)
    }

    /// Cell index of a double-word-aligned (stack) byte address
    pub fn double_word_index(address: Word) -> Option<usize> {
        Self::index(address, DOUBLE_WORD_SIZE)
    }

    fn index(address: Word, size: Word) -> Option<usize> {
        if address < 0 {
            return None;
        }
        let index = usize::try_from(address / size).ok()?;
        (index < S).then(|| index)
    }

    /// Reads a cell from the memory
    pub fn cell(&self, index: usize) -> Option<&Cell> {
        self.cells.get(index)
    }

    /// Returns the instruction stored at the word address, if any
    pub fn instruction_at(&self, address: Word) -> Option<&InstructionRecord> {
        match Self::word_index(address).and_then(|index| self.cell(index)) {
            Some(Cell::Instruction(record)) => Some(record),
            _ => None,
        }
    }

    /// Overwrites a cell. Returns `false` if `index` is outside the memory.
    pub fn write_cell(&mut self, index: usize, cell: Cell) -> bool {
        match self.cells.get_mut(index) {
            Some(slot) => {
                *slot = cell;
                true
            }
            None => false,
        }
    }

    /// Resets every cell in `range` to empty
    pub fn clear(&mut self, range: std::ops::RangeInclusive<usize>) {
        let (start, end) = (*range.start(), (*range.end()).min(S.saturating_sub(1)));
        if start > end {
            return;
        }
        for cell in &mut self.cells[start..=end] {
            *cell = Cell::Empty;
        }
    }

    /// Non-empty cells of the data region, ascending
    pub fn data_region(&self) -> Vec<&Cell> {
        self.non_empty(DATA_START..PROGRAM_START.min(S))
    }

    /// Non-empty cells from the program region up to the stack
    pub fn program_region(&self, stack_bottom: usize) -> Vec<&Cell> {
        self.non_empty(PROGRAM_START.min(S)..stack_bottom.clamp(PROGRAM_START.min(S), S))
    }

    /// Non-empty stack slots from the top of the stack down to `sp`. Never
    /// reaches below `stack_bottom`, wherever SP points.
    pub fn stack_region(&self, stack_bottom: Word, stack_top: Word, sp: Word) -> Vec<&Cell> {
        let top = match Self::double_word_index(stack_top) {
            Some(top) => top,
            None => return Vec::new(),
        };
        let bottom = match Self::double_word_index(sp.max(stack_bottom).max(0)) {
            Some(bottom) => bottom.min(top),
            None => return Vec::new(),
        };

        (bottom..=top)
            .rev()
            .map(|index| &self.cells[index])
            .filter(|cell| !cell.is_empty())
            .collect()
    }

    fn non_empty(&self, range: std::ops::Range<usize>) -> Vec<&Cell> {
        self.cells[range]
            .iter()
            .filter(|cell| !cell.is_empty())
            .collect()
    }

    /// Loads a program image from a file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("Failed to read program `{}`", path.display()))?;

        data.parse().map_err(|errors: Vec<parse::LoadError>| {
            let messages: Vec<String> = errors.iter().map(ToString::to_string).collect();
            eyre!(
                "Failed to load `{}`:\n{}",
                path.display(),
                messages.join("\n")
            )
        })
    }
}

impl<const S: usize> FromStr for Memory<S> {
    type Err = Vec<parse::LoadError>;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        parse::Parser::new(s, Memory::default()).parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use color_eyre::eyre::Result;

    #[test]
    fn test_index() -> Result<()> {
        assert_eq!(StdMem::word_index(200), Some(50));
        assert_eq!(StdMem::word_index(203), Some(50));
        assert_eq!(StdMem::double_word_index(4000), Some(500));
        assert_eq!(StdMem::word_index(-4), None);
        assert_eq!(StdMem::word_index(8000), None);
        assert_eq!(StdMem::double_word_index(15_992), Some(1999));

        Ok(())
    }

    #[test]
    fn test_write_cell() -> Result<()> {
        let mut mem = StdMem::default();
        assert!(mem.write_cell(25, Cell::Data(DataRecord::new(100, 7))));
        assert!(!mem.write_cell(2000, Cell::Data(DataRecord::new(8000, 7))));
        assert_eq!(mem.cell(25), Some(&Cell::Data(DataRecord::new(100, 7))));

        Ok(())
    }

    #[test]
    fn test_clear() -> Result<()> {
        let mut mem = StdMem::default();
        for index in 495..=500 {
            mem.write_cell(index, Cell::Data(DataRecord::new(index as Word * 8, 1)));
        }
        mem.clear(497..=500);

        assert!(!mem.cells[495].is_empty());
        assert!(!mem.cells[496].is_empty());
        assert!(mem.cells[497..=500].iter().all(Cell::is_empty));

        Ok(())
    }

    #[test]
    fn test_data_region_skips_empty_cells() -> Result<()> {
        let mut mem = StdMem::default();
        mem.write_cell(25, Cell::Data(DataRecord::new(100, 1)));
        mem.write_cell(27, Cell::Data(DataRecord::new(108, 3)));
        mem.write_cell(50, Cell::Data(DataRecord::new(200, 9)));

        let region: Vec<String> = mem.data_region().iter().map(|c| c.to_string()).collect();
        assert_eq!(region, vec!["100 1 0 0", "108 3 0 0"]);

        Ok(())
    }

    #[test]
    fn test_stack_region_descends_from_top() -> Result<()> {
        let mut mem = StdMem::default();
        mem.write_cell(500, Cell::Data(DataRecord::new(4000, 1)));
        mem.write_cell(499, Cell::Data(DataRecord::new(3992, 2)));
        mem.write_cell(497, Cell::Data(DataRecord::new(3976, 4)));

        let region: Vec<String> = mem
            .stack_region(3900, 4000, 3984)
            .iter()
            .map(|c| c.to_string())
            .collect();
        assert_eq!(region, vec!["4000 1 0 0", "3992 2 0 0"]);
        assert!(mem.stack_region(3900, 4000, 4000).len() == 1);

        Ok(())
    }

    #[test]
    fn test_stack_region_stays_inside_window() -> Result<()> {
        let mut mem = StdMem::default();
        mem.write_cell(25, Cell::Data(DataRecord::new(100, 77)));
        mem.write_cell(487, Cell::Data(DataRecord::new(3896, 5)));
        mem.write_cell(490, Cell::Data(DataRecord::new(3920, 6)));

        let region: Vec<String> = mem
            .stack_region(3900, 4000, -8)
            .iter()
            .map(|c| c.to_string())
            .collect();
        assert_eq!(region, vec!["3920 6 0 0", "3896 5 0 0"]);
        assert_eq!(mem.stack_region(3900, 4000, 0).len(), 2);

        Ok(())
    }

    #[test]
    fn test_data_record_display() -> Result<()> {
        let record = DataRecord {
            address: 104,
            value: -3,
            padding: [1, 2],
        };
        assert_eq!(record.to_string(), "104 -3 1 2");

        Ok(())
    }
}
