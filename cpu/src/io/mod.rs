//! The I/O device contract and the device table.
//!
//! Every peripheral presents one operation to the CPU:
//! `io(accumulator, ctl, transfer) -> result`.  The `transfer` field
//! selects the data movement:
//!
//! | transfer | meaning |
//! |----------|---------|
//! | even, <= 12 | input: the result replaces the accumulator |
//! | odd, <= 13  | output: the accumulator goes to the device |
//! | 14          | status query; result bit 0 is busy, bit 1 done |
//! | 15          | no data movement |
//!
//! The `ctl` field selects the control action.  For data transfers:
//! 0 none, 1 start (arm the device worker), 2 stop.  For a status
//! query it selects the skip predicate instead, which the CPU
//! evaluates — see the interpreter's I/O group.
//!
//! Devices are held in a table indexed by device id; access to an
//! absent id is a `DEVX` exception at the instruction level.

use std::collections::BTreeMap;
use std::fmt::{self, Debug, Formatter};
use std::mem;

use tracing::{event, Level};

use base::prelude::*;

mod worker;

pub mod dev_lpt;
pub mod dev_pch;
pub mod dev_ppt;
pub mod dev_tty;

pub(crate) use worker::{Handshake, WorkerCommand};
pub use worker::IrqLine;

/// Status-query transfer selector.
pub const TRANSFER_STATUS: u8 = 14;
/// No-data transfer selector (the NTS encoding).
pub const TRANSFER_NONE: u8 = 15;

pub const CTL_NONE: u8 = 0;
pub const CTL_START: u8 = 1;
pub const CTL_STOP: u8 = 2;

/// Skip predicates for a status query, selected by `ctl`.
pub const STATUS_BUSY: u64 = 1;
pub const STATUS_DONE: u64 = 2;

/// One attached peripheral.
pub trait Device: Send {
    /// Perform one I/O operation.  For input transfers the return
    /// value replaces the issuing accumulator; for a status query its
    /// low two bits are {done, busy}; otherwise it is ignored.
    fn io(&mut self, acc: Word, ctl: u8, transfer: u8) -> Word;

    fn name(&self) -> String;
}

/// The device table.  The main CPU allows ids up to 4096, the IOCPU
/// up to 128.
pub struct DeviceManager {
    devices: BTreeMap<u16, Box<dyn Device>>,
    limit: u16,
}

impl DeviceManager {
    pub fn new(limit: u16) -> DeviceManager {
        DeviceManager {
            devices: BTreeMap::new(),
            limit,
        }
    }

    /// Attach `dev` at `id`.  Replacing a live device or exceeding the
    /// table limit is a configuration error.
    pub fn attach(&mut self, id: u16, dev: Box<dyn Device>) {
        assert!(id < self.limit, "device id {id:#o} exceeds the table");
        event!(Level::INFO, "unit {:04o} attached: {}", id, dev.name());
        if self.devices.insert(id, dev).is_some() {
            event!(Level::WARN, "unit {:04o} replaced an attached device", id);
        }
    }

    pub fn is_attached(&self, id: u16) -> bool {
        self.devices.contains_key(&id)
    }

    /// Lowest free device id at or above `from`.
    pub fn free_id_from(&self, from: u16) -> Option<u16> {
        (from..self.limit).find(|id| !self.devices.contains_key(id))
    }

    /// Run one operation against device `id`; `None` when the id is
    /// not populated (the caller raises `DEVX`).
    pub fn io(&mut self, id: u16, acc: Word, ctl: u8, transfer: u8) -> Option<Word> {
        self.devices
            .get_mut(&id)
            .map(|dev| dev.io(acc, ctl, transfer))
    }

    /// Destroy all devices in ascending id order.
    pub fn shutdown(&mut self) {
        for (id, dev) in mem::take(&mut self.devices) {
            event!(Level::INFO, "unit {:04o} detached: {}", id, dev.name());
            drop(dev);
        }
    }
}

impl Drop for DeviceManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Debug for DeviceManager {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        let names: Vec<String> = self
            .devices
            .iter()
            .map(|(id, dev)| format!("{:04o}: {}", id, dev.name()))
            .collect();
        f.debug_struct("DeviceManager")
            .field("limit", &self.limit)
            .field("devices", &names)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Probe;

    impl Device for Probe {
        fn io(&mut self, acc: Word, ctl: u8, transfer: u8) -> Word {
            // Echo the call back so the test can see it arrived.
            w36!(0o17) | acc | Word::from(ctl as u32) | Word::from(transfer as u32)
        }
        fn name(&self) -> String {
            "probe".to_string()
        }
    }

    #[test]
    fn io_reaches_the_attached_device() {
        let mut devs = DeviceManager::new(4096);
        devs.attach(0o12, Box::new(Probe));
        assert!(devs.is_attached(0o12));
        let r = devs.io(0o12, w36!(0o40), CTL_START, 0);
        assert_eq!(r, Some(w36!(0o17 | 0o40 | 1)));
        assert_eq!(devs.io(0o13, Word::ZERO, 0, 0), None);
    }

    #[test]
    fn free_id_skips_populated_slots() {
        let mut devs = DeviceManager::new(4096);
        devs.attach(0o20, Box::new(Probe));
        assert_eq!(devs.free_id_from(0o20), Some(0o21));
        assert_eq!(devs.free_id_from(0o17), Some(0o17));
    }
}
