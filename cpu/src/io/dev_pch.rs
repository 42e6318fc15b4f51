//! Paper-tape punch, reserved unit 014.
//!
//! An output device: output transfer 1 loads the byte to punch, and a
//! start command makes the worker write it to the sink and report
//! completion.

use std::io::Write;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{event, Level};

use base::prelude::*;

use super::{Device, Handshake, IrqLine, WorkerCommand, TRANSFER_STATUS};

/// Simulated punch time per byte.
const BYTE_TIME: Duration = Duration::from_millis(16);

pub struct Pch {
    unit: u16,
    line: IrqLine,
    hs: Arc<Handshake>,
    buf: Arc<AtomicU8>,
    worker: Option<JoinHandle<()>>,
}

impl Pch {
    pub fn new(unit: u16, line: IrqLine, sink: Box<dyn Write + Send>) -> Pch {
        let hs = Handshake::new();
        let buf = Arc::new(AtomicU8::new(0));
        let worker = {
            let hs = Arc::clone(&hs);
            let buf = Arc::clone(&buf);
            let line = line.clone();
            thread::Builder::new()
                .name(format!("pch-{unit:04o}"))
                .spawn(move || run_worker(unit, hs, buf, line, sink))
                .expect("spawning a device worker should not fail")
        };
        event!(Level::INFO, "unit {:04o} pch irq {:02o}", unit, line.irq());
        Pch {
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
    loop {
        match hs.wait_command() {
            WorkerCommand::Shutdown => break,
            WorkerCommand::Idle => unreachable!(),
            WorkerCommand::Go => {
                let byte = [buf.load(Ordering::Acquire)];
                if let Err(e) = sink.write_all(&byte).and_then(|_| sink.flush()) {
                    event!(Level::WARN, "unit {:04o} pch write error: {}", unit, e);
                    hs.complete(&line, true);
                    break;
                }
                thread::sleep(BYTE_TIME);
                hs.complete(&line, true);
            }
        }
    }
}

impl Device for Pch {
    fn io(&mut self, acc: Word, ctl: u8, transfer: u8) -> Word {
        if transfer == 1 {
            self.buf.store(acc.bits() as u8, Ordering::Release);
        }
        if transfer != TRANSFER_STATUS {
            self.hs.control(&self.line, ctl);
        }
        match transfer {
            TRANSFER_STATUS => self.hs.status(),
            _ => Word::ZERO,
        }
    }

    fn name(&self) -> String {
        format!("pch paper-tape punch (unit {:04o})", self.unit)
    }
}

impl Drop for Pch {
    fn drop(&mut self) {
        self.hs.shutdown();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
