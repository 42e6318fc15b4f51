//! The auxiliary 18-bit I/O processor.
//!
//! A smaller machine built on the same shape as the main interpreter:
//! its own accumulator (19 bits counting the link), two index
//! registers, an 18-bit PC, its own interrupt controller and its own
//! device table (up to 128 ids).
//!
//! ## Address space
//!
//! The IOCPU sees 28-bit word addresses.  The low window (up to
//! `0x3FFFF`) is its local memory, two 18-bit words packed in each
//! backing 36-bit cell, even addresses in the upper half.  Addresses
//! above the window reach the host's memory through the host bus with
//! supervisor key 0; a host-side fault reads as zero and swallows
//! writes.
//!
//! ## Interrupts
//!
//! All IOCPU devices share request line 1.  When the interrupt enable
//! (`ION`) is up and line 1 is pending, the processor stores its PC
//! to local word 0, drops `ION`, and continues at local word 1; the
//! handler returns with an indirect branch through word 0.  The API
//! operate bit asserts an interrupt on the *host* at the level held
//! in the `C_IRQ` register.
//!
//! ## Host face
//!
//! To the main CPU the IOCPU is one more device
//! ([`IoCpuDevice`]): output transfer 1 loads the start PC, output
//! transfer 3 the host interrupt level, input transfer 0 reads the
//! stop code of a halted processor, and the status query reports
//! {busy = executing, done = halted}.  Start spawns the interpreter
//! thread; stop parks it and hands the processor back.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{event, Level};

use base::prelude::*;

use crate::bus::Bus;
use crate::intr::{InterruptController, WakeReason};
use crate::io::{Device, DeviceManager, TRANSFER_STATUS};

mod ops;

pub(crate) const MASK_IO_ADDR: u32 = (1 << 28) - 1;
pub(crate) const MASK_17: u32 = (1 << 17) - 1;
pub(crate) const MASK_18: u32 = (1 << 18) - 1;
pub(crate) const MASK_19: u32 = (1 << 19) - 1;
/// The link bit of the accumulator.
pub(crate) const LINK: u32 = 1 << 18;

pub const C_IOPC: usize = 0;
pub const C_ION: usize = 1;
pub const C_IRQ: usize = 2;
pub const C_API: usize = 3;

/// How many device ids the IOCPU decodes.
const DEVICE_LIMIT: u16 = 128;

/// Why [`IoCpu::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Stopped,
    Paused,
}

pub struct IoCpu {
    host: Arc<Bus>,
    intr: Arc<InterruptController>,
    local: Vec<u64>,
    pub(crate) devices: DeviceManager,
    pub(crate) a: [u32; 3],
    pub(crate) c: [u32; 4],
    pub(crate) stop_code: u32,
    stop: Arc<AtomicBool>,
}

impl IoCpu {
    /// `local_cells` counts backing 36-bit cells; each holds two
    /// 18-bit words.
    pub fn new(host: Arc<Bus>, local_cells: u32) -> IoCpu {
        let intr = Arc::new(InterruptController::new());
        // The IOCPU has no mask register; gating is the ION flag.
        intr.set_mask(0xFFFF);
        IoCpu {
            host,
            intr,
            local: vec![0; local_cells as usize],
            devices: DeviceManager::new(DEVICE_LIMIT),
            a: [0; 3],
            c: [0; 4],
            stop_code: 0,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn intr(&self) -> &Arc<InterruptController> {
        &self.intr
    }

    pub fn attach_device(&mut self, id: u16, dev: Box<dyn Device>) {
        self.devices.attach(id, dev);
    }

    /// Read one 18-bit word from the split address space.
    pub fn read_word(&self, address: u32) -> u32 {
        let address = address & MASK_IO_ADDR;
        let cell = if address <= MASK_18 {
            let index = (address >> 1) as usize;
            match self.local.get(index) {
                Some(&cell) => cell,
                None => return 0,
            }
        } else {
            let index = (address - (MASK_18 + 1)) >> 1;
            match self.host.read(0, Address::new(index & Address::VALUE_MASK)) {
                Ok(word) => word.bits(),
                // Host bus error reads as zero.
                Err(_) => return 0,
            }
        };
        let half = if address & 1 == 0 { cell >> 18 } else { cell };
        (half as u32) & MASK_18
    }

    /// Write one 18-bit word; the other half of the backing cell is
    /// preserved.  Returns false on a bus error.
    pub fn write_word(&mut self, address: u32, data: u32) -> bool {
        let address = address & MASK_IO_ADDR;
        let data = (data & MASK_18) as u64;
        let merged = |cell: u64| {
            if address & 1 == 0 {
                (cell & MASK_18 as u64) | (data << 18)
            } else {
                (cell & ((MASK_18 as u64) << 18)) | data
            }
        };
        if address <= MASK_18 {
            let index = (address >> 1) as usize;
            match self.local.get(index) {
                Some(&cell) => {
                    self.local[index] = merged(cell);
                    true
                }
                None => false,
            }
        } else {
            let index = (address - (MASK_18 + 1)) >> 1;
            let haddr = Address::new(index & Address::VALUE_MASK);
            match self.host.read(0, haddr) {
                Ok(word) => self.host.write(0, haddr, Word::truncating(merged(word.bits()))).is_ok(),
                Err(_) => false,
            }
        }
    }

    /// Loader access for the host side: deposit into local memory.
    pub fn deposit(&mut self, address: u32, data: u32) {
        self.write_word(address, data);
    }

    /// Effective-address computation: 12-bit signed displacement, a
    /// zero-page flag, one pre-index and one post-index register, and
    /// self-incrementing indirect slots at local words 8..15.
    fn effective_address(&mut self, inst: u32) -> u32 {
        let indirect = (inst >> 14) & 1 != 0;
        let index = (inst >> 13) & 1 != 0;
        let zero_page = (inst >> 12) & 1 != 0;
        let disp = signed_field((inst & 0xFFF) as u64, 12);

        let mut ea = disp;
        if !zero_page {
            ea += self.c[C_IOPC] as i64;
        }
        if !index {
            ea += (self.a[1] as i64) << 10;
        }
        let ea = (ea as u64 as u32) & MASK_IO_ADDR;
        if !indirect {
            return ea;
        }

        let mut pointer = self.read_word(ea);
        if (8..16).contains(&(ea & MASK_18)) {
            pointer = (pointer + 1) & MASK_18;
            self.write_word(ea, pointer);
        }
        let mut target = pointer as i64;
        if index {
            target += (self.a[2] as i64) << 10;
        }
        (target as u64 as u32) & MASK_IO_ADDR
    }

    /// One loop iteration: interrupt entry or one instruction.
    pub fn step(&mut self) {
        if self.c[C_ION] != 0 && self.intr.min_pending() == 1 {
            let pc = self.c[C_IOPC];
            self.write_word(0, pc);
            self.c[C_ION] = 0;
            self.c[C_IOPC] = 1;
            return;
        }
        let inst = self.read_word(self.c[C_IOPC]);
        ops::dispatch(self, inst);
    }

    pub fn run(&mut self) -> RunOutcome {
        loop {
            if self.stop.load(Ordering::Acquire) {
                return RunOutcome::Paused;
            }
            if self.intr.exit_requested() {
                return RunOutcome::Stopped;
            }
            if self.intr.is_running() {
                self.step();
            } else {
                match self.intr.wait_while_halted(&self.stop) {
                    WakeReason::Interrupt => continue,
                    WakeReason::Terminate => return RunOutcome::Stopped,
                    WakeReason::Paused => return RunOutcome::Paused,
                }
            }
        }
    }
}

impl std::fmt::Debug for IoCpu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IoCpu")
            .field("pc", &format_args!("{:06o}", self.c[C_IOPC]))
            .field("a", &self.a)
            .field("ion", &self.c[C_ION])
            .finish_non_exhaustive()
    }
}

enum FaceState {
    Idle(Box<IoCpu>),
    Running {
        stop: Arc<AtomicBool>,
        intr: Arc<InterruptController>,
        thread: JoinHandle<Box<IoCpu>>,
    },
    /// Transient during state changes.
    Empty,
}

/// The IOCPU as seen from the host CPU's device table.
pub struct IoCpuDevice {
    unit: u16,
    state: FaceState,
    start_pc: u32,
    irq_level: u32,
}

impl IoCpuDevice {
    pub fn new(unit: u16, iocpu: IoCpu) -> IoCpuDevice {
        IoCpuDevice {
            unit,
            state: FaceState::Idle(Box::new(iocpu)),
            start_pc: 0,
            irq_level: 0,
        }
    }

    /// Collect a finished interpreter thread.
    fn reap(&mut self) {
        if let FaceState::Running { thread, .. } = &self.state {
            if !thread.is_finished() {
                return;
            }
        } else {
            return;
        }
        if let FaceState::Running { thread, .. } = std::mem::replace(&mut self.state, FaceState::Empty)
        {
            match thread.join() {
                Ok(iocpu) => self.state = FaceState::Idle(iocpu),
                Err(_) => event!(Level::WARN, "unit {:04o} iocpu thread panicked", self.unit),
            }
        }
    }

    fn start(&mut self) {
        self.reap();
        match std::mem::replace(&mut self.state, FaceState::Empty) {
            FaceState::Idle(mut iocpu) => {
                iocpu.c[C_IOPC] = self.start_pc & MASK_18;
                iocpu.c[C_IRQ] = self.irq_level & 0xF;
                iocpu.stop.store(false, Ordering::Release);
                let stop = Arc::clone(&iocpu.stop);
                let intr = Arc::clone(&iocpu.intr);
                intr.clear_exit();
                intr.set_running();
                let unit = self.unit;
                let thread = thread::Builder::new()
                    .name(format!("iocpu-{unit:04o}"))
                    .spawn(move || {
                        iocpu.run();
                        iocpu
                    })
                    .expect("spawning the iocpu thread should not fail");
                event!(Level::INFO, "unit {:04o} iocpu started", unit);
                self.state = FaceState::Running { stop, intr, thread };
            }
            other => self.state = other,
        }
    }

    fn stop(&mut self) {
        match std::mem::replace(&mut self.state, FaceState::Empty) {
            FaceState::Running { stop, intr, thread } => {
                stop.store(true, Ordering::Release);
                intr.kick();
                match thread.join() {
                    Ok(iocpu) => self.state = FaceState::Idle(iocpu),
                    Err(_) => {
                        event!(Level::WARN, "unit {:04o} iocpu thread panicked", self.unit)
                    }
                }
            }
            other => self.state = other,
        }
    }

    fn busy(&self) -> bool {
        match &self.state {
            FaceState::Running { intr, .. } => intr.is_running(),
            _ => false,
        }
    }

    fn executing(&self) -> bool {
        matches!(self.state, FaceState::Running { .. })
    }
}

impl Device for IoCpuDevice {
    fn io(&mut self, acc: Word, ctl: u8, transfer: u8) -> Word {
        self.reap();
        match transfer {
            1 => self.start_pc = acc.bits() as u32 & MASK_18,
            3 => self.irq_level = acc.bits() as u32 & 0xF,
            _ => {}
        }
        if transfer != TRANSFER_STATUS {
            match ctl {
                crate::io::CTL_START => self.start(),
                crate::io::CTL_STOP => self.stop(),
                _ => {}
            }
        }
        match transfer {
            TRANSFER_STATUS => {
                // Busy while instructions retire; done once halted,
                // whether or not the thread is still parked waiting
                // for device work.
                let busy = self.busy() as u64;
                let done = (!self.busy()) as u64;
                Word::truncating((done << 1) | busy)
            }
            0 => match &self.state {
                FaceState::Idle(iocpu) => Word::from(iocpu.stop_code & MASK_18),
                _ => Word::ZERO,
            },
            _ => Word::ZERO,
        }
    }

    fn name(&self) -> String {
        format!("iocpu (unit {:04o})", self.unit)
    }
}

impl Drop for IoCpuDevice {
    fn drop(&mut self) {
        self.stop();
    }
}
