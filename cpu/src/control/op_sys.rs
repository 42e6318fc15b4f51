//! The supervisor group, opcodes 0600..0606.  Every one of these
//! requires protection key 0; anything else faults `PPFS`.

use crate::exception::Exception;

use base::prelude::*;

use super::ea::effective_address;
use super::{Cpu, Next};

pub(super) fn execute(cpu: &mut Cpu, inst: Instruction) -> Result<Next, Exception> {
    if cpu.key() != 0 {
        return Err(Exception::Ppfs);
    }
    match inst.opcode() {
        0o600 => {
            // HLT: stop (unless an interrupt is already waiting), with
            // the stop code taken from the named accumulator.
            let ea = effective_address(cpu, inst)?;
            cpu.stop_code = cpu.a[inst.ac()];
            cpu.bus.intr.halt(cpu.current_irql());
            Ok(Next::Jump(ea))
        }
        0o601 => {
            // INT: software interrupt entry at the level in the AC
            // field; the saved context resumes at the effective
            // address.
            let ea = effective_address(cpu, inst)?;
            cpu.set_pc(ea);
            cpu.enter_interrupt(inst.ac() as u8);
            Ok(Next::None)
        }
        0o602 => match inst.ac() {
            0 => {
                // RFI
                cpu.leave_interrupt();
                Ok(Next::None)
            }
            1 => {
                // RMSK: load a new mask, then return from interrupt.
                let ea = effective_address(cpu, inst)?;
                let mask = cpu.read_checked(ea)?.bits() as u16;
                cpu.bus.intr.set_mask(mask);
                cpu.leave_interrupt();
                Ok(Next::None)
            }
            2 => {
                // LDMSK
                let ea = effective_address(cpu, inst)?;
                let mask = cpu.read_checked(ea)?.bits() as u16;
                cpu.bus.intr.set_mask(mask);
                Ok(Next::Advance(1))
            }
            3 => {
                // STMSK
                let ea = effective_address(cpu, inst)?;
                let mask = Word::from(cpu.bus.intr.mask());
                cpu.write_checked(ea, mask)?;
                Ok(Next::Advance(1))
            }
            _ => Err(Exception::Inst),
        },
        0o603 => {
            // LDK: read the protection key of the page at the
            // effective address.
            let ea = effective_address(cpu, inst)?;
            let key = cpu.bus.page_key(ea).map_err(|_| Exception::Memx)?;
            cpu.a[inst.ac()] = Word::from(key);
            Ok(Next::Advance(1))
        }
        0o604 => {
            // STK: set the page key from the accumulator.
            let ea = effective_address(cpu, inst)?;
            let key = cpu.a[inst.ac()].bits() as u8;
            cpu.bus.set_key(key, ea).map_err(|_| Exception::Memx)?;
            Ok(Next::Advance(1))
        }
        0o605 => {
            // LCT: load a control register.
            let ea = effective_address(cpu, inst)?;
            let value = cpu.read_checked(ea)?;
            cpu.c[inst.ac() & 0x7] = value;
            Ok(Next::Advance(1))
        }
        0o606 => {
            // STCTL: store a control register.
            let ea = effective_address(cpu, inst)?;
            let value = cpu.c[inst.ac() & 0x7];
            cpu.write_checked(ea, value)?;
            Ok(Next::Advance(1))
        }
        _ => Err(Exception::Inst),
    }
}
