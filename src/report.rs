//! Console output of machine state and the pause between steps.

use std::io::{self, BufRead, Write};

use crate::memory::Cell;
use crate::processor::decode::Reg;
use crate::processor::{Snapshot, Status};

/// Number of general purpose registers shown in a report
const GENERAL_REGISTERS: u8 = 28;

/// Observes the machine. Only ever sees read-only snapshots.
pub trait Reporter {
    /// Called once after the program has been loaded
    fn loaded(&mut self, snapshot: &Snapshot<'_>) -> io::Result<()>;

    /// Called after every executed instruction
    fn executed(&mut self, snapshot: &Snapshot<'_>) -> io::Result<()>;

    /// Called once when the machine reaches a terminal status
    fn terminated(&mut self, status: &Status, snapshot: &Snapshot<'_>) -> io::Result<()>;
}

/// Blocks between two steps until the operator lets the machine continue
pub trait Gate {
    fn wait(&mut self) -> io::Result<()>;
}

/// Never blocks. Used for headless runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct Continue;

impl Gate for Continue {
    fn wait(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Waits for a line on the given input. End of input also continues.
#[derive(Debug)]
pub struct StdinGate<I, O> {
    input: I,
    prompt: O,
}

impl StdinGate<io::StdinLock<'static>, io::Stdout> {
    pub fn new() -> Self {
        Self::with_io(io::stdin().lock(), io::stdout())
    }
}

impl<I: BufRead, O: Write> StdinGate<I, O> {
    pub fn with_io(input: I, prompt: O) -> Self {
        Self { input, prompt }
    }
}

impl<I: BufRead, O: Write> Gate for StdinGate<I, O> {
    fn wait(&mut self) -> io::Result<()> {
        writeln!(self.prompt, "Press enter for next instruction...")?;
        self.prompt.flush()?;

        let mut line = String::new();
        self.input.read_line(&mut line)?;

        Ok(())
    }
}

/// Prints machine state in the plain text layout operators are used to.
#[derive(Debug)]
pub struct ConsoleReporter<W> {
    out: W,
    program_name: String,
}

impl<W: Write> ConsoleReporter<W> {
    pub fn new<N: Into<String>>(out: W, program_name: N) -> Self {
        Self {
            out,
            program_name: program_name.into(),
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn section(&mut self, title: &str, cells: &[&Cell]) -> io::Result<()> {
        writeln!(self.out, "\n{}:", title)?;
        for cell in cells {
            writeln!(self.out, "{}", cell)?;
        }

        Ok(())
    }

    fn stack(&mut self, snapshot: &Snapshot<'_>) -> io::Result<()> {
        writeln!(self.out, "\nSTACK:")?;
        // nothing pushed yet
        if snapshot.stack.is_empty() && snapshot.read(Reg::SP) == snapshot.stack_top {
            writeln!(self.out, "EMPTY")?;
        }
        for cell in &snapshot.stack {
            writeln!(self.out, "{}", cell)?;
        }
        writeln!(self.out)
    }
}

impl<W: Write> Reporter for ConsoleReporter<W> {
    fn loaded(&mut self, snapshot: &Snapshot<'_>) -> io::Result<()> {
        self.section("DATA MEMORY", &snapshot.data)?;
        self.section("PROGRAM MEMORY", &snapshot.program)?;
        writeln!(self.out)?;
        self.out.flush()
    }

    fn executed(&mut self, snapshot: &Snapshot<'_>) -> io::Result<()> {
        if let Some(instruction) = snapshot.instruction {
            writeln!(self.out, "{}", instruction)?;
        }

        writeln!(self.out, "\nRESULT:")?;
        for reg in (0..GENERAL_REGISTERS).filter_map(Reg::new) {
            let value = snapshot.read(reg);
            if value != 0 {
                writeln!(self.out, "{} = {}", reg, value)?;
            }
        }
        writeln!(self.out)?;

        writeln!(self.out, "PC = {}", snapshot.read(Reg::PC))?;
        writeln!(self.out, "SP = {}", snapshot.read(Reg::SP))?;
        writeln!(self.out, "LR = {}", snapshot.read(Reg::LR))?;

        self.section("DATA MEMORY", &snapshot.data)?;
        self.stack(snapshot)?;
        self.out.flush()
    }

    fn terminated(&mut self, status: &Status, snapshot: &Snapshot<'_>) -> io::Result<()> {
        match status {
            Status::StackOverflow { stack_top, sp } => {
                writeln!(self.out, "{} {}", stack_top, sp)?;
                writeln!(self.out, "Stack overflow detected, terminating...")?;
            }
            Status::HaltedPcZero => writeln!(self.out, "PC set to 0, terminating...")?,
            Status::HaltedEndOfProgram | Status::Running => {}
        }

        writeln!(self.out, "End of {} reached", self.program_name)?;
        self.section("DATA MEMORY", &snapshot.data)?;
        self.section("PROGRAM MEMORY", &snapshot.program)?;
        self.stack(snapshot)?;
        self.out.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{DataRecord, StdMem};
    use crate::processor::Processor;
    use color_eyre::eyre::Result;

    fn render<F>(f: F) -> Result<String>
    where
        F: FnOnce(&mut ConsoleReporter<Vec<u8>>) -> io::Result<()>,
    {
        let mut reporter = ConsoleReporter::new(Vec::new(), "prog.txt");
        f(&mut reporter)?;
        Ok(String::from_utf8(reporter.into_inner())?)
    }

    #[test]
    fn test_loaded_report() -> Result<()> {
        let mem: StdMem = "100 5 0 0\n200 ADDI X0, X0, #1".parse().unwrap();
        let cpu = Processor::default();

        let output = render(|r| r.loaded(&cpu.snapshot(&mem, None)))?;
        assert_eq!(
            output,
            "\nDATA MEMORY:\n100 5 0 0\n\nPROGRAM MEMORY:\n200 ADDI X0, X0, #1\n\n"
        );

        Ok(())
    }

    #[test]
    fn test_executed_report() -> Result<()> {
        let mut mem: StdMem = "200 STUR X3, [SP, #0]".parse().unwrap();
        let mut cpu = Processor::default();
        cpu.begin();
        cpu.write(Reg::new(3).unwrap(), -4);
        cpu.step(&mut mem)?;

        let output = render(|r| r.executed(&cpu.snapshot(&mem, Some(200))))?;
        assert_eq!(
            output,
            "200 STUR X3, [SP, #0]\n\
             \n\
             RESULT:\n\
             X3 = -4\n\
             \n\
             PC = 204\n\
             SP = 4000\n\
             LR = 0\n\
             \n\
             DATA MEMORY:\n\
             \n\
             STACK:\n\
             4000 -4 0 0\n\
             \n"
        );

        Ok(())
    }

    #[test]
    fn test_empty_stack_marker() -> Result<()> {
        let mut mem = StdMem::default();
        mem.write_cell(25, Cell::Data(DataRecord::new(100, 1)));
        let cpu = Processor::default();

        let output = render(|r| r.executed(&cpu.snapshot(&mem, None)))?;
        assert!(output.ends_with("DATA MEMORY:\n100 1 0 0\n\nSTACK:\nEMPTY\n\n"));

        Ok(())
    }

    #[test]
    fn test_no_empty_marker_below_top() -> Result<()> {
        let mut mem: StdMem = "200 SUBI SP, SP, #16".parse().unwrap();
        let mut cpu = Processor::default();
        cpu.begin();
        cpu.step(&mut mem)?;

        let output = render(|r| r.executed(&cpu.snapshot(&mem, Some(200))))?;
        assert!(output.contains("SP = 3984"));
        assert!(output.ends_with("DATA MEMORY:\n\nSTACK:\n\n"));
        assert!(!output.contains("EMPTY"));

        Ok(())
    }

    #[test]
    fn test_terminated_report() -> Result<()> {
        let mem = StdMem::default();
        let cpu = Processor::default();
        let status = Status::StackOverflow {
            stack_top: 4000,
            sp: 3892,
        };

        let output = render(|r| r.terminated(&status, &cpu.snapshot(&mem, None)))?;
        assert!(output.starts_with(
            "4000 3892\nStack overflow detected, terminating...\nEnd of prog.txt reached\n"
        ));
        assert!(output.contains("PROGRAM MEMORY:"));

        Ok(())
    }

    #[test]
    fn test_stdin_gate() -> Result<()> {
        let mut prompt = Vec::new();
        let mut gate = StdinGate::with_io("\n".as_bytes(), &mut prompt);

        gate.wait()?;
        // end of input continues as well
        gate.wait()?;

        assert_eq!(
            String::from_utf8(prompt)?,
            "Press enter for next instruction...\n".repeat(2)
        );

        Ok(())
    }
}
