//! The main CPU interpreter.
//!
//! The processor owns its register file outright: sixteen 36-bit
//! accumulators, eight control registers, and sixteen extended-80
//! float accumulators.  Everything shared with other threads (memory,
//! interrupt lines, the running/exit flags) lives behind the
//! [`Bus`](crate::bus::Bus) handle.
//!
//! ## Register packing
//!
//! PSW (`c[0]`): bits 35:28 protection key, bit 27 carry flag, bits
//! 26:0 the program counter.
//!
//! CW (`c[1]`): bits 35:32 current IRQ level, 31:28 prior IRQ level,
//! 27:24 exception cause, 17:0 direct-page base.
//!
//! FCW (`c[2]`): accumulated floating-point result flags.
//!
//! ## Instruction sequencing
//!
//! Each loop iteration: run a deferred execute if one is armed, then
//! consult the interrupt controller, then fetch/decode/execute.  An
//! instruction's side effects commit in a fixed order — operand reads,
//! compute, memory write, deferred indirect write, PC update, skip —
//! and a fault at any point discards the staged indirect write and
//! rolls back auto-index side effects, so the supervisor can retry the
//! instruction after servicing the exception.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{event, Level};

use base::prelude::*;

use crate::bus::Bus;
use crate::exception::Exception;
use crate::fpu;
use crate::intr::WakeReason;
use crate::io::DeviceManager;
use crate::mem::MemFault;

mod ea;
mod op_alu;
mod op_call;
mod op_float;
mod op_io;
mod op_mem;
mod op_muldiv;
mod op_sys;

#[cfg(test)]
mod tests;

pub(crate) const C_PSW: usize = 0;
pub(crate) const C_CW: usize = 1;
pub(crate) const C_FCW: usize = 2;

const PSW_ADDR_MASK: u64 = (1 << 27) - 1;
const PSW_CARRY_BIT: u64 = 1 << 27;

/// How many device ids the main CPU decodes.
const DEVICE_LIMIT: u16 = 4096;

/// What the instruction asks the sequencer to do with the program
/// counter once its effects have committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Next {
    /// Advance by n words (1 normal, 2 with a skip, 0 for a deferred
    /// execute that runs in place).
    Advance(u32),
    /// Transfer control.
    Jump(Address),
    /// The instruction managed the PSW itself (RFI, INT).
    None,
}

/// A deferred execute armed by EDT/ESK.
#[derive(Debug, Clone, Copy)]
struct PendingExecute {
    inst: Instruction,
    /// ESK additionally bumps the PC after the synthesized
    /// instruction completes.
    bump_after: bool,
}

/// Side effects staged during effective-address computation,
/// committed only when the instruction succeeds.
#[derive(Debug, Default)]
struct Staged {
    /// The rewritten auto-modifying indirect slot.
    indirect: Option<(Address, Word)>,
    /// AC13's pre-instruction value, for rollback on a fault.
    ac13_undo: Option<Word>,
}

/// Why [`Cpu::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Halted with nothing to wake it, or exit was requested.
    Stopped,
    /// The front end asked for the processor back.
    Paused,
}

pub struct Cpu {
    bus: Arc<Bus>,
    pub(crate) devices: DeviceManager,
    pub(crate) a: [Word; 16],
    pub(crate) c: [Word; 8],
    pub(crate) f: [fpu::Extended; 16],
    stop_code: Word,
    xeq: Option<PendingExecute>,
    staged: Staged,
    with_fpu: bool,
    pause: Arc<AtomicBool>,
}

impl Cpu {
    pub fn new(bus: Arc<Bus>, with_fpu: bool) -> Cpu {
        Cpu {
            bus,
            devices: DeviceManager::new(DEVICE_LIMIT),
            a: [Word::ZERO; 16],
            c: [Word::ZERO; 8],
            f: [fpu::Extended::ZERO; 16],
            stop_code: Word::ZERO,
            xeq: None,
            staged: Staged::default(),
            with_fpu,
            pause: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn bus(&self) -> &Arc<Bus> {
        &self.bus
    }

    /// The flag a front end raises (and then kicks the controller) to
    /// get the processor handed back from [`Cpu::run`].
    pub fn pause_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.pause)
    }

    pub fn stop_code(&self) -> Word {
        self.stop_code
    }

    // --- register packing ---

    pub fn pc(&self) -> Address {
        Address::truncating(self.c[C_PSW].bits())
    }

    pub fn set_pc(&mut self, pc: Address) {
        let psw = self.c[C_PSW].bits() & !PSW_ADDR_MASK;
        self.c[C_PSW] = Word::truncating(psw | u64::from(pc));
    }

    pub(crate) fn carry(&self) -> bool {
        self.c[C_PSW].bits() & PSW_CARRY_BIT != 0
    }

    pub(crate) fn set_carry(&mut self, carry: bool) {
        let psw = self.c[C_PSW].bits();
        self.c[C_PSW] = Word::truncating(if carry {
            psw | PSW_CARRY_BIT
        } else {
            psw & !PSW_CARRY_BIT
        });
    }

    /// The current protection key, PSW bits 35:28.
    pub(crate) fn key(&self) -> u8 {
        (self.c[C_PSW].bits() >> 28) as u8
    }

    pub(crate) fn current_irql(&self) -> u8 {
        ((self.c[C_CW].bits() >> 32) & 0xF) as u8
    }

    fn prior_irql(&self) -> u8 {
        ((self.c[C_CW].bits() >> 28) & 0xF) as u8
    }

    /// The 18-bit direct-page base, CW bits 17:0.
    pub(crate) fn direct_page_base(&self) -> u64 {
        self.c[C_CW].bits() & 0x3FFFF
    }

    pub(crate) fn merge_float_flags(&mut self, flags: fpu::Flags) {
        self.c[C_FCW] = self.c[C_FCW] | Word::from(flags.bits());
    }

    // --- checked memory access ---

    pub(crate) fn read_checked(&self, addr: Address) -> Result<Word, Exception> {
        self.bus.read(self.key(), addr).map_err(|e| match e {
            MemFault::Bounds => Exception::Memx,
            MemFault::Key => Exception::Ppfr,
        })
    }

    pub(crate) fn write_checked(&mut self, addr: Address, data: Word) -> Result<(), Exception> {
        self.bus.write(self.key(), addr, data).map_err(|e| match e {
            MemFault::Bounds => Exception::Memx,
            MemFault::Key => Exception::Ppfw,
        })
    }

    // --- staged side effects ---

    pub(crate) fn stage_indirect_write(&mut self, addr: Address, value: Word) {
        self.staged.indirect = Some((addr, value));
    }

    pub(crate) fn stage_ac13_undo(&mut self, old: Word) {
        if self.staged.ac13_undo.is_none() {
            self.staged.ac13_undo = Some(old);
        }
    }

    /// Commit the deferred indirect write.  Called after the
    /// instruction body succeeded; a fault here surfaces as an
    /// exception on the otherwise-complete instruction.
    fn commit_staged(&mut self) -> Result<(), Exception> {
        self.staged.ac13_undo = None;
        if let Some((addr, value)) = self.staged.indirect.take() {
            self.write_checked(addr, value)?;
        }
        Ok(())
    }

    /// Throw away staged state after a fault, restoring the auto-index
    /// register so the instruction can be retried.
    fn discard_staged(&mut self) {
        self.staged.indirect = None;
        if let Some(old) = self.staged.ac13_undo.take() {
            self.a[13] = old;
        }
    }

    // --- interrupt and exception entry ---

    /// Enter an interrupt at line `irq`: save {PSW, CW} to the vector
    /// save area for the current level, load the new CW template and
    /// PSW from the line's vector slots, and discard all deferred
    /// state.
    pub(crate) fn enter_interrupt(&mut self, irq: u8) {
        let cur = self.current_irql() as u64;
        let save = Address::new(32 + 2 * cur as u32);
        if self.bus.store_raw(save, self.c[C_PSW]).is_err()
            || self.bus.store_raw(save.successor(), self.c[C_CW]).is_err()
        {
            event!(Level::WARN, "interrupt save area is outside fitted memory");
        }
        let cw_template = self
            .bus
            .fetch_raw(Address::new(1 + 2 * irq as u32))
            .unwrap_or(Word::ZERO)
            .bits()
            & 0x3FFFF;
        self.c[C_CW] =
            Word::truncating(((irq as u64) << 32) | (cur << 28) | cw_template);
        let psw_template = self
            .bus
            .fetch_raw(Address::new(2 * irq as u32))
            .unwrap_or(Word::ZERO)
            .bits();
        self.c[C_PSW] = Word::truncating(psw_template & !PSW_CARRY_BIT);

        self.staged.indirect = None;
        self.staged.ac13_undo = None;
        self.xeq = None;
    }

    /// Exception entry: interrupt entry through line 0 with the cause
    /// nibble in CW bits 27:24.
    pub(crate) fn enter_exception(&mut self, e: Exception) {
        event!(
            Level::DEBUG,
            "exception {} at {:?}",
            e,
            self.pc()
        );
        self.enter_interrupt(0);
        self.c[C_CW] = self.c[C_CW] | Word::truncating((e.cause() as u64) << 24);
    }

    /// Return from interrupt: restore {PSW, CW} from the prior
    /// level's save area.
    pub(crate) fn leave_interrupt(&mut self) {
        let prior = self.prior_irql() as u32;
        let save = Address::new(32 + 2 * prior);
        self.c[C_PSW] = self.bus.fetch_raw(save).unwrap_or(Word::ZERO);
        self.c[C_CW] = self.bus.fetch_raw(save.successor()).unwrap_or(Word::ZERO);
    }

    // --- the sequencer ---

    fn apply(&mut self, next: Next) {
        match next {
            Next::Advance(n) => {
                let pc = self.pc().index_by(n as i64);
                self.set_pc(pc);
            }
            Next::Jump(target) => self.set_pc(target),
            Next::None => {}
        }
    }

    /// Decode and execute one instruction word.
    fn execute(&mut self, inst: Instruction) -> Result<Next, Exception> {
        match inst.family() {
            Family::Alu => op_alu::execute(self, inst),
            Family::MemRef => op_mem::execute_memref(self, inst),
            Family::AccMem => op_mem::execute_accmem(self, inst),
            Family::MulDiv => op_muldiv::execute(self, inst),
            Family::Float => op_float::execute(self, inst),
            Family::CallRet => op_call::execute(self, inst),
            Family::Io => op_io::execute(self, inst),
            Family::System => op_sys::execute(self, inst),
            Family::Unassigned => Err(Exception::User),
        }
    }

    /// Run one instruction through the full commit pipeline.
    fn dispatch(&mut self, inst: Instruction) -> Result<(), Exception> {
        let next = self.execute(inst)?;
        self.commit_staged()?;
        self.apply(next);
        Ok(())
    }

    fn dispatch_or_fault(&mut self, inst: Instruction) -> bool {
        match self.dispatch(inst) {
            Ok(()) => true,
            Err(e) => {
                self.discard_staged();
                self.enter_exception(e);
                false
            }
        }
    }

    /// Arm a deferred execute (the EDT/ESK instructions).
    pub(crate) fn arm_execute(&mut self, word: Word, bump_after: bool) {
        self.xeq = Some(PendingExecute {
            inst: Instruction::new(word),
            bump_after,
        });
    }

    /// One iteration of the execution loop: deferred execute, else
    /// interrupt entry, else fetch/execute.  Does not block.
    pub fn step(&mut self) {
        if let Some(pending) = self.xeq.take() {
            if self.dispatch_or_fault(pending.inst) && pending.bump_after {
                let pc = self.pc().successor();
                self.set_pc(pc);
            }
            return;
        }
        if let Some(irq) = self.bus.intr.take_below(self.current_irql()) {
            event!(Level::TRACE, "interrupt entry at line {}", irq);
            self.enter_interrupt(irq);
            return;
        }
        if !self.bus.intr.is_running() {
            return;
        }
        match self.read_checked(self.pc()) {
            Ok(word) => {
                self.dispatch_or_fault(Instruction::new(word));
            }
            Err(e) => {
                self.discard_staged();
                self.enter_exception(e);
            }
        }
    }

    /// The execution loop: run until the machine stops or the front
    /// end pauses it.
    pub fn run(&mut self) -> RunOutcome {
        loop {
            if self.pause.load(Ordering::Acquire) {
                return RunOutcome::Paused;
            }
            if self.bus.intr.exit_requested() {
                return RunOutcome::Stopped;
            }
            if self.bus.intr.is_running() {
                self.step();
            } else {
                match self.bus.intr.wait_while_halted(&self.pause) {
                    WakeReason::Interrupt => continue,
                    WakeReason::Terminate => return RunOutcome::Stopped,
                    WakeReason::Paused => return RunOutcome::Paused,
                }
            }
        }
    }
}

impl std::fmt::Debug for Cpu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cpu")
            .field("pc", &self.pc())
            .field("psw", &self.c[C_PSW])
            .field("cw", &self.c[C_CW])
            .field("a", &self.a)
            .field("stop_code", &self.stop_code)
            .finish_non_exhaustive()
    }
}
