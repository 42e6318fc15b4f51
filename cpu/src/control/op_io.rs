//! Programmed I/O, opcode 0670.  Supervisor-only.
//!
//! The accumulator travels to or from the device according to the
//! transfer selector; a status query (transfer 14) turns the control
//! field into a skip predicate over the device's {done, busy} bits.
//! One PC increment per instruction, plus one more when the predicate
//! fires.

use crate::exception::Exception;
use crate::io::{STATUS_BUSY, STATUS_DONE, TRANSFER_STATUS};

use base::prelude::*;

use super::{Cpu, Next};

pub(super) fn execute(cpu: &mut Cpu, inst: Instruction) -> Result<Next, Exception> {
    if cpu.key() != 0 {
        return Err(Exception::Ppfs);
    }
    let ac = inst.ac();
    let transfer = inst.io_transfer();
    let ctl = inst.io_ctl();
    let acc = cpu.a[ac];

    let result = cpu
        .devices
        .io(inst.device(), acc, ctl, transfer)
        .ok_or(Exception::Devx)?;

    if transfer < TRANSFER_STATUS && transfer & 1 == 0 {
        // Input transfer: the device word replaces the accumulator.
        cpu.a[ac] = result;
        Ok(Next::Advance(1))
    } else if transfer == TRANSFER_STATUS {
        let bits = result.bits();
        let skip = match ctl {
            0 => bits & STATUS_BUSY != 0,
            1 => bits & STATUS_BUSY == 0,
            2 => bits & STATUS_DONE != 0,
            _ => bits & STATUS_DONE == 0,
        };
        Ok(Next::Advance(if skip { 2 } else { 1 }))
    } else {
        Ok(Next::Advance(1))
    }
}
