//! Line printer, reserved unit 013.
//!
//! Output bytes accumulate in a 132-column line buffer which is
//! flushed to the sink on carriage return, line feed, form feed, or
//! when full.  The done flag (and its interrupt) is only raised when a
//! flush happened; mid-line bytes complete silently, and programs poll
//! the busy bit between columns.  A full 132-column line gets a
//! newline appended so the output file stays line-structured.

use std::io::Write;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{event, Level};

use base::prelude::*;

use super::{Device, Handshake, IrqLine, WorkerCommand, TRANSFER_STATUS};

const COLUMNS: usize = 132;
/// Simulated line advance time.
const LINE_TIME: Duration = Duration::from_millis(4);

pub struct Lpt {
    unit: u16,
    line: IrqLine,
    hs: Arc<Handshake>,
    buf: Arc<AtomicU8>,
    worker: Option<JoinHandle<()>>,
}

impl Lpt {
    pub fn new(unit: u16, line: IrqLine, sink: Box<dyn Write + Send>) -> Lpt {
        let hs = Handshake::new();
        let buf = Arc::new(AtomicU8::new(0));
        let worker = {
            let hs = Arc::clone(&hs);
            let buf = Arc::clone(&buf);
            let line = line.clone();
            thread::Builder::new()
                .name(format!("lpt-{unit:04o}"))
                .spawn(move || run_worker(unit, hs, buf, line, sink))
                .expect("spawning a device worker should not fail")
        };
        event!(Level::INFO, "unit {:04o} lpt irq {:02o}", unit, line.irq());
        Lpt {
            unit,
            line,
            hs,
            buf,
            worker: Some(worker),
        }
    }
}

fn run_worker(
    unit: u16,
    hs: Arc<Handshake>,
    buf: Arc<AtomicU8>,
    line: IrqLine,
    mut sink: Box<dyn Write + Send>,
) {
    let mut columns: Vec<u8> = Vec::with_capacity(COLUMNS + 1);
    loop {
        match hs.wait_command() {
            WorkerCommand::Shutdown => break,
            WorkerCommand::Idle => unreachable!(),
            WorkerCommand::Go => {
                let ch = buf.load(Ordering::Acquire);
                columns.push(ch);
                let full = columns.len() == COLUMNS;
                let flush = full || ch == 0o15 || ch == 0o12 || ch == 0o14;
                if flush {
                    if full {
                        columns.push(b'\n');
                    }
                    if let Err(e) = sink.write_all(&columns).and_then(|_| sink.flush()) {
                        event!(Level::WARN, "unit {:04o} lpt write error: {}", unit, e);
                        hs.complete(&line, true);
                        break;
                    }
                    columns.clear();
                    thread::sleep(LINE_TIME);
                }
                hs.complete(&line, flush);
            }
        }
    }
}

impl Device for Lpt {
    fn io(&mut self, acc: Word, ctl: u8, transfer: u8) -> Word {
        if transfer == 1 {
            self.buf.store(acc.bits() as u8, Ordering::Release);
        }
        if transfer != TRANSFER_STATUS {
            self.hs.control(&self.line, ctl);
        }
        match transfer {
            TRANSFER_STATUS => self.hs.status(),
            // The busy bit is also readable as a data word.
            0 => self.hs.status() & Word::ONE,
            _ => Word::ZERO,
        }
    }

    fn name(&self) -> String {
        format!("lpt line printer (unit {:04o})", self.unit)
    }
}

impl Drop for Lpt {
    fn drop(&mut self) {
        self.hs.shutdown();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
