//! The line-oriented console.
//!
//! A deliberately small front-panel replacement, read from the
//! controlling terminal:
//!
//! | Form      | Action |
//! |-----------|--------|
//! | `/oooo`   | set the pointer to an octal address |
//! | `?`       | print the pointer |
//! | `. n`     | print n octal words starting at the pointer |
//! | `= v v…`  | deposit octal values at the pointer, advancing it |
//! | `W`       | run until halt |
//! | `S`       | free-run on the background thread |
//! | `P`       | pause and copy the PC to the pointer |
//! | `G`, `GW` | PC ← pointer, then run until halt |
//! | `GS`      | PC ← pointer, then free-run |
//! | `X`       | leave the console |

use std::io::{self, BufRead, Write};

use base::prelude::*;
use cpu::Machine;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    SetPointer(u32),
    ShowPointer,
    Examine(u32),
    Deposit(Vec<Word>),
    Wait,
    Start,
    Pause,
    GoWait,
    GoStart,
    Exit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BadCommand(String);

impl std::fmt::Display for BadCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "?{}", self.0)
    }
}

pub fn parse(line: &str) -> Result<Option<Command>, BadCommand> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    let mut tokens = trimmed.split_whitespace();
    let head = tokens.next().expect("a non-empty line has a first token");

    let octal_u32 = |text: &str| {
        u32::from_str_radix(text, 8).map_err(|_| BadCommand(format!("BAD OCTAL {text}")))
    };

    let command = if let Some(rest) = head.strip_prefix('/') {
        Command::SetPointer(octal_u32(rest)? & Address::VALUE_MASK)
    } else {
        match head {
            "?" => Command::ShowPointer,
            "." => {
                let count = match tokens.next() {
                    Some(text) => octal_u32(text)?,
                    None => 1,
                };
                Command::Examine(count)
            }
            "=" => {
                let mut values = Vec::new();
                for text in tokens.by_ref() {
                    let bits = u64::from_str_radix(text, 8)
                        .ok()
                        .and_then(|bits| Word::try_from(bits).ok())
                        .ok_or_else(|| BadCommand(format!("BAD WORD {text}")))?;
                    values.push(bits);
                }
                if values.is_empty() {
                    return Err(BadCommand("NOTHING TO DEPOSIT".to_string()));
                }
                Command::Deposit(values)
            }
            "W" => Command::Wait,
            "S" => Command::Start,
            "P" => Command::Pause,
            "G" | "GW" => Command::GoWait,
            "GS" => Command::GoStart,
            "X" => Command::Exit,
            other => return Err(BadCommand(format!("UNKNOWN {other}"))),
        }
    };
    if tokens.next().is_some() && !matches!(command, Command::Deposit(_)) {
        return Err(BadCommand("TRAILING JUNK".to_string()));
    }
    Ok(Some(command))
}

pub fn run(machine: &mut Machine) -> io::Result<()> {
    let stdin = io::stdin();
    let mut out = io::stdout();
    let mut pointer = Address::ZERO;

    for line in stdin.lock().lines() {
        let line = line?;
        let command = match parse(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(e) => {
                writeln!(out, "{e}")?;
                continue;
            }
        };
        match command {
            Command::SetPointer(addr) => pointer = Address::new(addr),
            Command::ShowPointer => writeln!(out, "{pointer}")?,
            Command::Examine(count) => {
                for _ in 0..count {
                    match machine.examine(pointer) {
                        Some(word) => writeln!(out, "{pointer}: {word}")?,
                        None => {
                            writeln!(out, "?NO MEMORY AT {pointer}")?;
                            break;
                        }
                    }
                    pointer = pointer.successor();
                }
            }
            Command::Deposit(values) => {
                for value in values {
                    if !machine.deposit(pointer, value) {
                        writeln!(out, "?NO MEMORY AT {pointer}")?;
                        break;
                    }
                    pointer = pointer.successor();
                }
            }
            Command::Wait => {
                if machine.is_running() {
                    machine.wait();
                } else {
                    machine.run_to_halt();
                }
                writeln!(out, "HALT: stop code {}", machine.stop_code())?;
            }
            Command::Start => {
                if !machine.is_running() {
                    machine.start();
                }
            }
            Command::Pause => {
                if machine.is_running() {
                    machine.pause();
                }
                pointer = machine.pc();
                writeln!(out, "{pointer}")?;
            }
            Command::GoWait => {
                if machine.is_running() {
                    machine.pause();
                }
                machine.set_pc(pointer);
                machine.run_to_halt();
                writeln!(out, "HALT: stop code {}", machine.stop_code())?;
            }
            Command::GoStart => {
                if machine.is_running() {
                    machine.pause();
                }
                machine.set_pc(pointer);
                machine.start();
            }
            Command::Exit => break,
        }
        out.flush()?;
    }
    Ok(())
}
