//! Command-line front end for the IST-66 emulator.
mod console;

use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use clap::Parser;
use tracing::{event, Level};
use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::prelude::*;

use base::prelude::*;
use cpu::io::dev_lpt::Lpt;
use cpu::io::dev_pch::Pch;
use cpu::io::dev_ppt::Ppt;
use cpu::io::dev_tty::Tty;
use cpu::iocpu::{IoCpu, IoCpuDevice};
use cpu::{Machine, MachineConfig};

/// Reserved unit numbers of the reference configuration.
const UNIT_PPT: u16 = 0o12;
const UNIT_LPT: u16 = 0o13;
const UNIT_PCH: u16 = 0o14;
const UNIT_IOCPU: u16 = 0o16;
/// TTY lines are allocated from here upward.
const UNIT_TTY_BASE: u16 = 0o20;

const IRQ_TTY: u8 = 4;
const IRQ_PPT: u8 = 5;
const IRQ_PCH: u8 = 6;
const IRQ_LPT: u8 = 7;

/// Emulator for the IST-66 mainframe
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Fitted memory in 36-bit words
    #[arg(long = "memory-words", default_value_t = 65536)]
    memory_words: u32,

    /// Leave the floating-point unit out
    #[arg(long = "no-fpu")]
    no_fpu: bool,

    /// Paper-tape reader input file (unit 012)
    #[arg(long = "ppt")]
    ppt: Option<PathBuf>,

    /// Read the paper tape from standard input instead of a file
    #[arg(long = "ppt-stdin", conflicts_with = "ppt")]
    ppt_stdin: bool,

    /// Paper-tape punch output file (unit 014)
    #[arg(long = "pch")]
    pch: Option<PathBuf>,

    /// Line printer output file (unit 013)
    #[arg(long = "lpt")]
    lpt: Option<PathBuf>,

    /// TELNET terminal TCP port (unit allocated dynamically)
    #[arg(long = "tty-port")]
    tty_port: Option<u16>,

    /// Attach the auxiliary I/O processor (unit 016)
    #[arg(long = "iocpu")]
    iocpu: bool,

    /// IOCPU local memory in 36-bit cells
    #[arg(long = "iocpu-cells", default_value_t = 4096)]
    iocpu_cells: u32,

    /// Load origin for the program image (octal)
    #[arg(long = "origin", default_value = "1000", value_parser = parse_octal)]
    origin: u32,

    /// Enter the console command loop instead of running to halt
    #[arg(long = "console")]
    console: bool,

    /// Program image: whitespace-separated octal words
    image: Option<PathBuf>,
}

fn parse_octal(text: &str) -> Result<u32, String> {
    u32::from_str_radix(text, 8).map_err(|e| format!("not an octal number: {e}"))
}

/// Parse a program image: octal words separated by whitespace, `#`
/// starting a comment that runs to end of line.
fn read_image(path: &Path) -> Result<Vec<Word>, Box<dyn std::error::Error>> {
    let mut text = String::new();
    BufReader::new(File::open(path)?).read_to_string(&mut text)?;
    let mut words = Vec::new();
    for line in text.lines() {
        let line = line.split('#').next().unwrap_or("");
        for token in line.split_whitespace() {
            let bits = u64::from_str_radix(token, 8)?;
            words.push(Word::try_from(bits)?);
        }
    }
    Ok(words)
}

/// Wire up the peripherals.  A device that fails to start logs one
/// diagnostic and stays unregistered; the machine carries on.
fn set_up_peripherals(machine: &mut Machine, cli: &Cli) {
    if let Some(path) = &cli.ppt {
        match File::open(path) {
            Ok(file) => {
                let line = machine.irq_line(IRQ_PPT);
                machine.attach_device(
                    UNIT_PPT,
                    Box::new(Ppt::new(UNIT_PPT, line, Box::new(BufReader::new(file)))),
                );
            }
            Err(e) => {
                event!(Level::WARN, "unit {:04o} ppt file error: {}", UNIT_PPT, e);
            }
        }
    } else if cli.ppt_stdin {
        let line = machine.irq_line(IRQ_PPT);
        machine.attach_device(
            UNIT_PPT,
            Box::new(Ppt::new(UNIT_PPT, line, Box::new(std::io::stdin()))),
        );
    }

    if let Some(path) = &cli.pch {
        match OpenOptions::new().write(true).create(true).truncate(true).open(path) {
            Ok(file) => {
                let line = machine.irq_line(IRQ_PCH);
                machine.attach_device(UNIT_PCH, Box::new(Pch::new(UNIT_PCH, line, Box::new(file))));
            }
            Err(e) => {
                event!(Level::WARN, "unit {:04o} pch file error: {}", UNIT_PCH, e);
            }
        }
    }

    if let Some(path) = &cli.lpt {
        match OpenOptions::new().write(true).create(true).truncate(true).open(path) {
            Ok(file) => {
                let line = machine.irq_line(IRQ_LPT);
                machine.attach_device(UNIT_LPT, Box::new(Lpt::new(UNIT_LPT, line, Box::new(file))));
            }
            Err(e) => {
                event!(Level::WARN, "unit {:04o} lpt file error: {}", UNIT_LPT, e);
            }
        }
    }

    if let Some(port) = cli.tty_port {
        let unit = machine
            .free_device_id(UNIT_TTY_BASE)
            .expect("the device table cannot be full");
        let line = machine.irq_line(IRQ_TTY);
        match Tty::new(unit, line, port) {
            Ok(tty) => machine.attach_device(unit, Box::new(tty)),
            Err(e) => {
                event!(Level::WARN, "unit {:04o} tty bind error: {}", unit, e);
            }
        }
    }

    if cli.iocpu {
        let iocpu = IoCpu::new(std::sync::Arc::clone(machine.bus()), cli.iocpu_cells);
        machine.attach_device(UNIT_IOCPU, Box::new(IoCpuDevice::new(UNIT_IOCPU, iocpu)));
    }
}

fn run_emulator() -> Result<i32, Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // By default, display info messages.
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();

    let config = MachineConfig {
        mem_words: cli.memory_words,
        with_fpu: !cli.no_fpu,
    };
    let mut machine = Machine::new(&config);
    set_up_peripherals(&mut machine, &cli);

    let origin = Address::new(cli.origin & Address::VALUE_MASK);
    match &cli.image {
        Some(path) => {
            let words = read_image(path)?;
            event!(
                Level::INFO,
                "loaded {} words at {}",
                words.len(),
                origin
            );
            machine.load_image(origin, &words);
        }
        None => {
            event!(
                Level::WARN,
                "no program image was specified, memory starts zeroed"
            );
        }
    }
    machine.set_pc(origin);

    if cli.console {
        console::run(&mut machine)?;
    } else {
        let stop = machine.run_to_halt();
        eprintln!("HALT: stop code {stop}");
    }
    machine.shutdown();
    Ok(0)
}

fn main() {
    match run_emulator() {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
}
