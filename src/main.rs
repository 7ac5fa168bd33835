use std::path::PathBuf;

use armsim::memory::{StdMem, MEMORY_SIZE};
use armsim::processor::{Config, Processor, Status};
use armsim::report::{ConsoleReporter, Continue, Reporter, StdinGate};
use clap::Parser;
use color_eyre::eyre::{eyre, Result};
use log::LevelFilter;
use simple_logger::SimpleLogger;

/// Step through an ARM-like program one instruction at a time
#[derive(Parser, Debug)]
#[command(name = "armsim", version)]
struct Cli {
    /// Program image, one `<address> <record>` per line
    program: PathBuf,

    /// Address of the first instruction to execute
    #[arg(long, default_value_t = Config::default().entrypoint)]
    entry: i64,

    /// How many bytes SP may move below the top of the stack
    #[arg(long, default_value_t = 100)]
    stack_size: u32,

    /// Run to completion without waiting for enter between instructions
    #[arg(long)]
    no_wait: bool,

    /// Log level for diagnostics on stderr
    #[arg(long, default_value = "warn")]
    log_level: LevelFilter,
}

fn main() -> Result<()> {
    color_eyre::install()?; // rust error handling

    // a wrong argument list is not an error, just print how to call us
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            err.print()?;
            return Ok(());
        }
    };

    SimpleLogger::new().with_level(cli.log_level).init()?; // logging

    let config = Config {
        entrypoint: cli.entry,
        stack_size: cli.stack_size.into(),
        ..Config::default()
    };
    config.validate::<MEMORY_SIZE>()?;

    let mut mem = StdMem::from_file(&cli.program)?;
    let mut cpu = Processor::new(config);
    cpu.verify(&mem)?;

    let stdout = std::io::stdout();
    let mut reporter = ConsoleReporter::new(stdout.lock(), cli.program.display().to_string());
    reporter.loaded(&cpu.snapshot(&mem, None))?;

    let status = if cli.no_wait {
        cpu.run(&mut mem, &mut reporter, &mut Continue)?
    } else {
        cpu.run(&mut mem, &mut reporter, &mut StdinGate::new())?
    };

    match status {
        Status::StackOverflow { stack_top, sp } => Err(eyre!(
            "Stack overflow: SP = {} left the stack below {}",
            sp,
            stack_top
        )),
        _ => Ok(()),
    }
}
