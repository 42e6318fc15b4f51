//! Paper-tape reader, reserved unit 012.
//!
//! An input device: each start command makes the worker read one byte
//! from the tape source (a file, or standard input), after which the
//! byte sits in the buffer for an input transfer to collect.  Running
//! off the end of the tape stops the worker for good and logs an
//! end-of-tape diagnostic, as the hardware operator would see.

use std::io::Read;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{event, Level};

use base::prelude::*;

use super::{Device, Handshake, IrqLine, WorkerCommand, TRANSFER_STATUS};

/// Simulated tape movement time per byte.
const BYTE_TIME: Duration = Duration::from_millis(2);

pub struct Ppt {
    unit: u16,
    line: IrqLine,
    hs: Arc<Handshake>,
    buf: Arc<AtomicU8>,
    worker: Option<JoinHandle<()>>,
}

impl Ppt {
    /// Attach a reader over an arbitrary tape source.
    pub fn new(unit: u16, line: IrqLine, tape: Box<dyn Read + Send>) -> Ppt {
        let hs = Handshake::new();
        let buf = Arc::new(AtomicU8::new(0));
        let worker = {
            let hs = Arc::clone(&hs);
            let buf = Arc::clone(&buf);
            let line = line.clone();
            thread::Builder::new()
                .name(format!("ppt-{unit:04o}"))
                .spawn(move || run_worker(unit, hs, buf, line, tape))
                .expect("spawning a device worker should not fail")
        };
        event!(Level::INFO, "unit {:04o} ppt irq {:02o}", unit, line.irq());
        Ppt {
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
    mut tape: Box<dyn Read + Send>,
) {
    loop {
        match hs.wait_command() {
            WorkerCommand::Shutdown => break,
            WorkerCommand::Idle => unreachable!(),
            WorkerCommand::Go => {
                thread::sleep(BYTE_TIME);
                let mut byte = [0_u8; 1];
                match tape.read(&mut byte) {
                    Ok(1) => {
                        buf.store(byte[0], Ordering::Release);
                        hs.complete(&line, true);
                    }
                    Ok(_) => {
                        buf.store(0, Ordering::Release);
                        event!(Level::INFO, "unit {:04o} ppt end of tape", unit);
                        hs.complete(&line, true);
                        break;
                    }
                    Err(e) => {
                        buf.store(0, Ordering::Release);
                        event!(Level::WARN, "unit {:04o} ppt read error: {}", unit, e);
                        hs.complete(&line, true);
                        break;
                    }
                }
            }
        }
    }
}

impl Device for Ppt {
    fn io(&mut self, _acc: Word, ctl: u8, transfer: u8) -> Word {
        if transfer != TRANSFER_STATUS {
            self.hs.control(&self.line, ctl);
        }
        match transfer {
            TRANSFER_STATUS => self.hs.status(),
            0 => Word::from(self.buf.load(Ordering::Acquire)),
            _ => Word::ZERO,
        }
    }

    fn name(&self) -> String {
        format!("ppt paper-tape reader (unit {:04o})", self.unit)
    }
}

impl Drop for Ppt {
    fn drop(&mut self) {
        self.hs.shutdown();
        // The worker may be blocked reading an interactive source;
        // detach rather than risk hanging shutdown.  File-backed
        // workers exit on their own at the shutdown command or EOF.
        drop(self.worker.take());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Bus;
    use crate::io::{CTL_START, STATUS_DONE, TRANSFER_NONE};
    use std::io::Cursor;

    fn wait_done(dev: &mut Ppt) {
        for _ in 0..500 {
            if u64::from(dev.io(Word::ZERO, 0, TRANSFER_STATUS)) & STATUS_DONE != 0 {
                return;
            }
            thread::sleep(Duration::from_millis(1));
        }
        panic!("ppt never completed");
    }

    #[test]
    fn reads_bytes_one_start_at_a_time() {
        let bus = Arc::new(Bus::new(1024));
        bus.intr.set_mask(0xFFFF);
        let line = IrqLine::new(Arc::clone(&bus), 5);
        let mut ppt = Ppt::new(0o12, line, Box::new(Cursor::new(vec![0o123, 0o56])));

        ppt.io(Word::ZERO, CTL_START, TRANSFER_NONE);
        wait_done(&mut ppt);
        assert_eq!(bus.intr.min_pending(), 5);
        assert_eq!(u64::from(ppt.io(Word::ZERO, 0, 0)), 0o123);

        // The next start releases the interrupt and fetches byte two.
        ppt.io(Word::ZERO, CTL_START, 0);
        assert_eq!(bus.intr.min_pending(), crate::intr::IRQ_NONE);
        wait_done(&mut ppt);
        assert_eq!(u64::from(ppt.io(Word::ZERO, 0, 0)), 0o56);
    }

    #[test]
    fn end_of_tape_still_raises_done() {
        let bus = Arc::new(Bus::new(1024));
        let line = IrqLine::new(bus, 5);
        let mut ppt = Ppt::new(0o12, line, Box::new(Cursor::new(Vec::new())));
        ppt.io(Word::ZERO, CTL_START, TRANSFER_NONE);
        wait_done(&mut ppt);
        assert_eq!(u64::from(ppt.io(Word::ZERO, 0, 0)), 0);
    }
}
