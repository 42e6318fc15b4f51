//! The boot/loader surface: owns the bus and the processor, deposits
//! initial memory contents, seeds the PC, and starts, pauses, and
//! stops the CPU thread.
//!
//! Thread ownership is by value: starting the machine moves the
//! [`Cpu`] into its thread; pausing raises the pause flag, kicks the
//! interrupt condition variable, and joins, getting the processor —
//! registers and all — handed back.  There is no shared mutable
//! register file.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{event, Level};

use base::prelude::*;

use crate::bus::Bus;
use crate::control::Cpu;
use crate::io::{Device, IrqLine};

#[derive(Debug, Clone)]
pub struct MachineConfig {
    /// Fitted memory in 36-bit words.
    pub mem_words: u32,
    /// Whether the floating-point unit is fitted.
    pub with_fpu: bool,
}

impl Default for MachineConfig {
    fn default() -> MachineConfig {
        MachineConfig {
            mem_words: 65536,
            with_fpu: true,
        }
    }
}

enum MachineState {
    Idle(Box<Cpu>),
    Running {
        pause: Arc<AtomicBool>,
        thread: JoinHandle<Box<Cpu>>,
    },
    /// Transient during state changes.
    Empty,
}

pub struct Machine {
    bus: Arc<Bus>,
    state: MachineState,
}

impl Machine {
    pub fn new(config: &MachineConfig) -> Machine {
        let bus = Arc::new(Bus::new(config.mem_words));
        let cpu = Cpu::new(Arc::clone(&bus), config.with_fpu);
        Machine {
            bus,
            state: MachineState::Idle(Box::new(cpu)),
        }
    }

    pub fn bus(&self) -> &Arc<Bus> {
        &self.bus
    }

    /// An interrupt-line handle for wiring a device.
    pub fn irq_line(&self, irq: u8) -> IrqLine {
        IrqLine::new(Arc::clone(&self.bus), irq)
    }

    fn cpu(&self) -> &Cpu {
        match &self.state {
            MachineState::Idle(cpu) => cpu,
            _ => panic!("the processor is running"),
        }
    }

    fn cpu_mut(&mut self) -> &mut Cpu {
        match &mut self.state {
            MachineState::Idle(cpu) => cpu,
            _ => panic!("the processor is running"),
        }
    }

    /// Attach a device to the stopped machine.
    pub fn attach_device(&mut self, id: u16, dev: Box<dyn Device>) {
        self.cpu_mut().devices.attach(id, dev);
    }

    pub fn device_attached(&self, id: u16) -> bool {
        self.cpu().devices.is_attached(id)
    }

    pub fn free_device_id(&self, from: u16) -> Option<u16> {
        self.cpu().devices.free_id_from(from)
    }

    /// Deposit one word (loader access, no key checks).
    pub fn deposit(&self, addr: Address, word: Word) -> bool {
        self.bus.store_raw(addr, word).is_ok()
    }

    /// Examine one word (loader access).
    pub fn examine(&self, addr: Address) -> Option<Word> {
        self.bus.fetch_raw(addr).ok()
    }

    /// Deposit a block of words starting at `origin`.
    pub fn load_image(&self, origin: Address, words: &[Word]) {
        let mut addr = origin;
        for &word in words {
            if !self.deposit(addr, word) {
                event!(Level::WARN, "image load ran off the end of memory at {addr}");
                break;
            }
            addr = addr.successor();
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, MachineState::Running { .. })
    }

    pub fn pc(&self) -> Address {
        self.cpu().pc()
    }

    pub fn set_pc(&mut self, pc: Address) {
        self.cpu_mut().set_pc(pc);
    }

    pub fn stop_code(&self) -> Word {
        self.cpu().stop_code()
    }

    /// Run on the calling thread until the machine stops.  Returns
    /// the stop code.
    pub fn run_to_halt(&mut self) -> Word {
        self.bus.intr.set_running();
        let cpu = self.cpu_mut();
        cpu.run();
        self.stop_code()
    }

    /// Execute one instruction of a stopped machine.
    pub fn step(&mut self) {
        self.bus.intr.set_running();
        self.cpu_mut().step();
    }

    /// Start free-running on a dedicated thread.
    pub fn start(&mut self) {
        match std::mem::replace(&mut self.state, MachineState::Empty) {
            MachineState::Idle(mut cpu) => {
                let pause = cpu.pause_flag();
                pause.store(false, Ordering::Release);
                self.bus.intr.set_running();
                let thread = thread::Builder::new()
                    .name("ist66-cpu".to_string())
                    .spawn(move || {
                        cpu.run();
                        cpu
                    })
                    .expect("spawning the cpu thread should not fail");
                self.state = MachineState::Running { pause, thread };
            }
            other => self.state = other,
        }
    }

    /// Pause a free-running machine and take the processor back.
    pub fn pause(&mut self) {
        match std::mem::replace(&mut self.state, MachineState::Empty) {
            MachineState::Running { pause, thread } => {
                pause.store(true, Ordering::Release);
                self.bus.intr.kick();
                match thread.join() {
                    Ok(cpu) => {
                        pause.store(false, Ordering::Release);
                        self.state = MachineState::Idle(cpu);
                    }
                    Err(_) => panic!("the cpu thread panicked"),
                }
            }
            other => self.state = other,
        }
    }

    /// Wait for a free-running machine to stop of its own accord.
    pub fn wait(&mut self) {
        match std::mem::replace(&mut self.state, MachineState::Empty) {
            MachineState::Running { thread, .. } => match thread.join() {
                Ok(cpu) => self.state = MachineState::Idle(cpu),
                Err(_) => panic!("the cpu thread panicked"),
            },
            other => self.state = other,
        }
    }

    /// Ask the machine to exit; wakes a halted processor.
    pub fn request_exit(&self) {
        self.bus.intr.request_exit();
    }

    /// Tear the machine down: stop the processor and destroy the
    /// devices in ascending id order.
    pub fn shutdown(mut self) {
        self.request_exit();
        if self.is_running() {
            self.wait();
        }
        // Dropping the Cpu drops its DeviceManager, which detaches in
        // id order.
    }
}
