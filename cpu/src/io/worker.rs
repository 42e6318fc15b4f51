//! The generic device-worker rendezvous.
//!
//! Every byte-at-a-time peripheral runs a dedicated worker thread that
//! blocks until the CPU arms it, performs one unit of physical work,
//! then reports completion: it clears the command, raises `done`, and
//! asserts the device's interrupt line.  A start control from the CPU
//! clears `done` (releasing the line) and signals the worker; a stop
//! cancels the outstanding command.
//!
//! Lock ordering is device-then-CPU: completion holds the device lock
//! while asserting the interrupt, never the other way around.

use std::sync::{Arc, Condvar, Mutex};

use base::prelude::*;

use crate::bus::Bus;
use crate::io::{CTL_START, CTL_STOP};

/// A device's hook into the interrupt controller.
#[derive(Debug, Clone)]
pub struct IrqLine {
    bus: Arc<Bus>,
    irq: u8,
}

impl IrqLine {
    pub fn new(bus: Arc<Bus>, irq: u8) -> IrqLine {
        IrqLine { bus, irq }
    }

    pub fn irq(&self) -> u8 {
        self.irq
    }

    pub fn assert_irq(&self) {
        self.bus.intr.assert_irq(self.irq);
    }

    pub fn release_irq(&self) {
        self.bus.intr.release_irq(self.irq);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WorkerCommand {
    Idle,
    Go,
    Shutdown,
}

#[derive(Debug)]
struct HandshakeState {
    command: WorkerCommand,
    done: bool,
}

/// The command/done flag pair and its condition variable.
#[derive(Debug)]
pub(crate) struct Handshake {
    state: Mutex<HandshakeState>,
    cmd: Condvar,
}

impl Handshake {
    pub(crate) fn new() -> Arc<Handshake> {
        Arc::new(Handshake {
            state: Mutex::new(HandshakeState {
                command: WorkerCommand::Idle,
                done: false,
            }),
            cmd: Condvar::new(),
        })
    }

    /// Apply a start/stop control from the CPU side.
    pub(crate) fn control(&self, line: &IrqLine, ctl: u8) {
        match ctl {
            CTL_START => {
                let mut st = self.state.lock().unwrap();
                st.command = WorkerCommand::Go;
                if st.done {
                    st.done = false;
                    line.release_irq();
                }
                self.cmd.notify_one();
            }
            CTL_STOP => {
                let mut st = self.state.lock().unwrap();
                st.command = WorkerCommand::Idle;
                if st.done {
                    st.done = false;
                    line.release_irq();
                }
            }
            _ => {}
        }
    }

    /// The status word: bit 1 done, bit 0 busy.
    pub(crate) fn status(&self) -> Word {
        let st = self.state.lock().unwrap();
        let busy = (st.command == WorkerCommand::Go) as u64;
        let done = st.done as u64;
        Word::truncating((done << 1) | busy)
    }

    /// Worker side: block until armed or shut down.
    pub(crate) fn wait_command(&self) -> WorkerCommand {
        let mut st = self.state.lock().unwrap();
        while st.command == WorkerCommand::Idle {
            st = self.cmd.wait(st).unwrap();
        }
        st.command
    }

    /// Worker side: one unit of work finished.  Clears the command
    /// and, when `raise_done`, reports completion on the interrupt
    /// line.
    pub(crate) fn complete(&self, line: &IrqLine, raise_done: bool) {
        let mut st = self.state.lock().unwrap();
        st.command = WorkerCommand::Idle;
        if raise_done && !st.done {
            st.done = true;
            line.assert_irq();
        }
    }

    /// Ask the worker to exit; it wakes even if idle.
    pub(crate) fn shutdown(&self) {
        let mut st = self.state.lock().unwrap();
        st.command = WorkerCommand::Shutdown;
        self.cmd.notify_all();
    }
}
