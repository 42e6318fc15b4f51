//! The shared spine of the machine: memory behind its own lock, plus
//! the interrupt controller.
//!
//! The CPU owns its register file outright and carries an `Arc<Bus>`;
//! device workers and the IOCPU clone the same handle.  Memory is
//! locked per access (the machine model assumes a single logical
//! writer at any instant — the CPU, or the IOCPU through its host
//! window, or the loader before start — so the lock is consistency
//! insurance, not a scheduling point).

use std::sync::Mutex;

use base::prelude::*;

use crate::intr::InterruptController;
use crate::mem::{MemFault, MemoryUnit};

#[derive(Debug)]
pub struct Bus {
    mem: Mutex<MemoryUnit>,
    pub intr: InterruptController,
}

impl Bus {
    pub fn new(mem_words: u32) -> Bus {
        Bus {
            mem: Mutex::new(MemoryUnit::new(mem_words)),
            intr: InterruptController::new(),
        }
    }

    pub fn mem_size(&self) -> u32 {
        self.mem.lock().unwrap().size()
    }

    pub fn read(&self, key: u8, addr: Address) -> Result<Word, MemFault> {
        self.mem.lock().unwrap().read(key, addr)
    }

    pub fn write(&self, key: u8, addr: Address, data: Word) -> Result<(), MemFault> {
        self.mem.lock().unwrap().write(key, addr, data)
    }

    pub fn set_key(&self, key: u8, addr: Address) -> Result<(), MemFault> {
        self.mem.lock().unwrap().set_key(key, addr)
    }

    pub fn page_key(&self, addr: Address) -> Result<u8, MemFault> {
        self.mem.lock().unwrap().page_key(addr)
    }

    /// Loader/vector access: no key check.
    pub fn fetch_raw(&self, addr: Address) -> Result<Word, MemFault> {
        self.mem.lock().unwrap().fetch_raw(addr)
    }

    /// Loader/vector access: no key check.
    pub fn store_raw(&self, addr: Address, data: Word) -> Result<(), MemFault> {
        self.mem.lock().unwrap().store_raw(addr, data)
    }
}
