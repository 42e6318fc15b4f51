//! Effective-address computation.
//!
//! The memory-reference tail of an instruction is a 1-bit indirect
//! flag, a 4-bit index selector and an 18-bit signed displacement.
//! Index selectors:
//!
//! | index | base |
//! |-------|------|
//! | 0     | none |
//! | 1     | direct-page base (CW bits 17:0) shifted left 9 |
//! | 2     | the program counter |
//! | 3..13 | accumulator 3..13 |
//! | 14    | post-increment AC13 by the displacement; the old value is the address |
//! | 15    | pre-decrement AC13 by the displacement; the new value is the address |
//!
//! An indirect reference fetches the word at the computed address
//! under the current protection key.  Bit 35 of the fetched word
//! clear means its low 27 bits are the final address.  Bit 35 set
//! selects an auto-modifying slot: bits 34:33 pick the mode (00
//! post-increment, 01 pre-decrement, others fault `MEMX`) and bits
//! 32:27 hold a signed increment.  The rewritten slot is not stored
//! immediately — it is staged and committed only after the whole
//! instruction succeeds, so a faulting instruction can be retried
//! with the slot intact.  The AC13 auto-index modes are likewise
//! rolled back if the instruction faults.

use base::prelude::*;

use crate::exception::Exception;

use super::Cpu;

pub(super) fn effective_address(cpu: &mut Cpu, inst: Instruction) -> Result<Address, Exception> {
    let disp = inst.displacement();
    let ea = match inst.index() {
        0 => Word::from_signed(disp),
        1 => Word::truncating((cpu.direct_page_base() << 9).wrapping_add(disp as u64)),
        2 => Word::truncating(u64::from(cpu.pc()).wrapping_add(disp as u64)),
        14 => {
            // Post-increment through AC13: address is the old value.
            let old = cpu.a[13];
            cpu.stage_ac13_undo(old);
            cpu.a[13] = old.wrapping_add(Word::from_signed(disp));
            old
        }
        15 => {
            // Pre-decrement through AC13: address is the new value.
            let old = cpu.a[13];
            cpu.stage_ac13_undo(old);
            cpu.a[13] = old.wrapping_sub(Word::from_signed(disp));
            cpu.a[13]
        }
        n => Word::truncating(cpu.a[n].bits().wrapping_add(disp as u64)),
    };

    if !inst.indirect() {
        return Ok(Address::from(ea));
    }

    let slot = Address::from(ea);
    let pointer = cpu.read_checked(slot)?;
    if !pointer.bit(35) {
        return Ok(Address::from(pointer));
    }

    let mode = (pointer.bits() >> 33) & 0x3;
    let increment = signed_field((pointer.bits() >> 27) & 0x3F, 6);
    let target = Address::from(pointer);
    let rewrite = |addr: Address| {
        Word::truncating((pointer.bits() & !((1 << 27) - 1)) | u64::from(addr))
    };
    match mode {
        0 => {
            // Post-modify: use the address as found, store it bumped.
            cpu.stage_indirect_write(slot, rewrite(target.index_by(increment)));
            Ok(target)
        }
        1 => {
            // Pre-modify: store and use the decremented address.
            let new = target.index_by(-increment);
            cpu.stage_indirect_write(slot, rewrite(new));
            Ok(new)
        }
        _ => Err(Exception::Memx),
    }
}
