//! Instruction-set simulator for a small ARM-like assembly dialect.
//!
//! A program image is loaded into [`memory::Memory`] and stepped through by
//! [`processor::Processor`], which reports the machine state after every
//! instruction.

pub mod memory;
pub mod processor;
pub mod report;
