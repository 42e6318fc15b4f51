//! IOCPU instruction groups.
//!
//! An 18-bit instruction dispatches on its top three bits: 0..5 are
//! the memory-reference group {AN, A, ITN, SC, BL, B}, 6 is
//! programmed I/O, and 7 the operate group, which splits on bit 0
//! (OPR3) and bit 8 (OPR1 versus OPR0).

use base::prelude::*;

use crate::io::{STATUS_BUSY, STATUS_DONE};

use super::{IoCpu, C_API, C_ION, C_IOPC, C_IRQ, LINK, MASK_17, MASK_18, MASK_19};

pub(super) fn dispatch(io: &mut IoCpu, inst: u32) {
    match inst >> 15 {
        6 => exec_io(io, inst),
        7 => {
            if inst & 1 != 0 {
                exec_opr3(io, inst);
            } else if inst & (1 << 8) != 0 {
                exec_opr1(io, inst);
            } else {
                exec_opr0(io, inst);
            }
        }
        _ => exec_mr(io, inst),
    }
}

fn advance(io: &mut IoCpu, n: u32) {
    io.c[C_IOPC] = (io.c[C_IOPC] + n) & MASK_18;
}

fn exec_mr(io: &mut IoCpu, inst: u32) {
    let ea = io.effective_address(inst);
    match inst >> 15 {
        0 => {
            // AN: add-and-mask into the accumulator.
            let data = io.read_word(ea) & MASK_18;
            io.a[0] &= (io.a[0] + data) | LINK;
            advance(io, 1);
        }
        1 => {
            // A: add, carrying into the link.
            let data = io.read_word(ea) & MASK_18;
            io.a[0] = (io.a[0] + data) & MASK_19;
            advance(io, 1);
        }
        2 => {
            // ITN: increment memory, skip when it wraps to zero.
            let data = (io.read_word(ea) + 1) & MASK_18;
            io.write_word(ea, data);
            advance(io, if data != 0 { 1 } else { 2 });
        }
        3 => {
            // SC: store and clear (keeping the link).
            let acc = io.a[0];
            io.write_word(ea, acc);
            io.a[0] &= LINK;
            advance(io, 1);
        }
        4 => {
            // BL: branch and link.
            let ret = io.c[C_IOPC] + 1;
            io.write_word(ea, ret);
            io.c[C_IOPC] = (ea + 1) & MASK_18;
        }
        5 => {
            // B
            io.c[C_IOPC] = ea & MASK_18;
        }
        _ => unreachable!("I/O and operate groups dispatch elsewhere"),
    }
}

fn exec_io(io: &mut IoCpu, inst: u32) {
    let device = (inst & 0x7F) as u16;
    let post_swap = (inst >> 8) & 1 != 0;
    let pre_clear = (inst >> 7) & 1 != 0;
    let ctl = ((inst >> 13) & 0x3) as u8;
    let transfer = ((inst >> 9) & 0xF) as u8;
    let data = io.a[0] & MASK_18;

    if pre_clear {
        io.a[0] &= LINK;
    }

    if let Some(result) = io.devices.io(device, Word::from(data), ctl, transfer) {
        if transfer < 14 && transfer & 1 == 0 {
            // Input transfers OR-merge into the accumulator.
            io.a[0] |= result.bits() as u32 & MASK_18;
        } else if transfer == 14 {
            let bits = result.bits();
            let skip = match ctl {
                0 => bits & STATUS_BUSY != 0,
                1 => bits & STATUS_BUSY == 0,
                2 => bits & STATUS_DONE != 0,
                _ => bits & STATUS_DONE == 0,
            };
            if skip {
                advance(io, 1);
            }
        }
    }
    // One increment per instruction whether or not the device exists.
    advance(io, 1);

    if post_swap {
        io.a[0] = byte_swap(io.a[0]);
    }
}

/// Swap the two 9-bit halves, keeping the link.
fn byte_swap(acc: u32) -> u32 {
    (acc & LINK) | ((acc & 0x1FF) << 9) | ((acc >> 9) & 0x1FF)
}

fn exec_opr0(io: &mut IoCpu, inst: u32) {
    if inst & (1 << 7) != 0 {
        // CLA
        io.a[0] &= LINK;
    }
    if inst & (1 << 6) != 0 {
        // CLL
        io.a[0] &= MASK_18;
    }
    if inst & (1 << 5) != 0 {
        // CMA
        io.a[0] ^= MASK_18;
    }
    if inst & (1 << 4) != 0 {
        // CML
        io.a[0] ^= LINK;
    }
    if inst & 1 != 0 {
        // IAC
        io.a[0] = (io.a[0] + 1) & MASK_19;
    }
    match (inst >> 1) & 7 {
        1 => io.a[0] = byte_swap(io.a[0]),
        2 => {
            // RAL
            io.a[0] = ((io.a[0] & MASK_18) << 1) | (io.a[0] >> 18);
        }
        3 => {
            // RTL
            io.a[0] = ((io.a[0] & MASK_17) << 2) | (io.a[0] >> 17);
        }
        4 => {
            // RAR
            io.a[0] = ((io.a[0] & 1) << 18) | (io.a[0] >> 1);
        }
        5 => {
            // RTR
            io.a[0] = ((io.a[0] & 3) << 17) | (io.a[0] >> 2);
        }
        6 => {
            // MSX
            io.a[1] = io.a[0] & MASK_18;
        }
        7 => {
            // MDX
            io.a[2] = io.a[0] & MASK_18;
        }
        _ => {}
    }
    advance(io, 1);
}

fn exec_opr1(io: &mut IoCpu, inst: u32) {
    let mut condition = false;
    if inst & (1 << 6) != 0 {
        // TGE
        condition |= io.a[0] & (1 << 17) != 0;
    }
    if inst & (1 << 5) != 0 {
        // TNZ
        condition |= io.a[0] & MASK_18 == 0;
    }
    if inst & (1 << 4) != 0 {
        // TCZ
        condition |= io.a[0] & LINK == 0;
    }
    if inst & (1 << 3) != 0 {
        // And-group inversion.
        condition = !condition;
    }
    if condition {
        advance(io, 1);
    }

    if inst & (1 << 7) != 0 {
        // CLA
        io.a[0] &= LINK;
    }
    if inst & (1 << 1) != 0 {
        // HLT: stop unless interruptible work is pending.
        if io.intr.min_pending() > 1 || io.c[C_ION] == 0 {
            io.intr.force_halt();
        }
    }
    if inst & (1 << 2) != 0 {
        // OSR
        io.a[0] |= io.stop_code & MASK_18;
    }
    advance(io, 1);
}

fn exec_opr3(io: &mut IoCpu, inst: u32) {
    if inst & (1 << 7) != 0 {
        // CIE
        io.c[C_ION] = 0;
    }
    if inst & (1 << 5) != 0 {
        // CMI
        io.c[C_ION] ^= 1;
    }
    if inst & (1 << 2) != 0 {
        // SSR
        io.stop_code = io.a[0];
    }
    if inst & (1 << 3) != 0 {
        // API: asynchronous interrupt to the host.
        io.host.intr.assert_irq((io.c[C_IRQ] & 0xF) as u8);
        io.c[C_API] = 1;
    }
    if inst & (1 << 1) != 0 {
        // HLT
        if io.intr.min_pending() > 1 || io.c[C_ION] == 0 {
            io.intr.force_halt();
        }
    }

    let mut condition = false;
    if inst & (1 << 4) != 0 {
        // TIE
        condition |= io.c[C_ION] != 0;
    }
    if inst & (1 << 6) != 0 {
        // TNP
        condition |= io.intr.pending(1) == 0;
    }
    if inst & (1 << 8) != 0 {
        // And-group inversion (TNE/TIP).
        condition = !condition;
    }
    if condition {
        advance(io, 1);
    }
    advance(io, 1);
}
