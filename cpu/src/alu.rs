//! The 37-bit arithmetic/logic unit.
//!
//! A single pure function, [`compute`], evaluates every two-operand
//! operation of the machine.  Internally the unit works on a 38-bit
//! value: bits 35:0 are the result, bit 36 is the carry, and bit 37
//! records the skip decision.  The fixed evaluation order is
//!
//! > carry-init → operation → rotate → mask → skip test
//!
//! and the caller receives the three components separately in an
//! [`AluOutput`].
//!
//! Rotate counts are signed: positive rotates left, negative right.
//! A 36-bit rotate (`wide == false`) moves only the result bits and
//! leaves the carry alone; a 37-bit rotate takes the carry along.
//! The mask count is signed the same way: a positive count `n`
//! replaces the `n` most significant result bits with copies of the
//! carry bit, a negative count replaces the least significant ones.

use base::prelude::*;

const MASK_36: u64 = (1 << 36) - 1;
const MASK_37: u64 = (1 << 37) - 1;
const CARRY_BIT: u64 = 1 << 36;
const SKIP_BIT: u64 = 1 << 37;

/// Carry-init selector: what happens to the carry before the op runs.
pub const CI_PRESERVE: u8 = 0;
pub const CI_CLEAR: u8 = 1;
pub const CI_SET: u8 = 2;
pub const CI_FLIP: u8 = 3;

/// Skip-condition selectors over (carry, result-zero).
pub const SKIP_NEVER: u8 = 0;
pub const SKIP_ALWAYS: u8 = 1;
pub const SKIP_NO_CARRY: u8 = 2;
pub const SKIP_CARRY: u8 = 3;
pub const SKIP_ZERO: u8 = 4;
pub const SKIP_NONZERO: u8 = 5;
pub const SKIP_ZERO_OR_NO_CARRY: u8 = 6;
pub const SKIP_NONZERO_AND_CARRY: u8 = 7;

/// The unit's result: a 36-bit value plus the carry and skip
/// annotations that were bits 36 and 37 of the internal form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AluOutput {
    pub value: Word,
    pub carry: bool,
    pub skip: bool,
}

fn rotl36(a: u64, mut b: u32) -> u64 {
    if b > 35 {
        b -= 36;
    }
    if b == 0 {
        return a & MASK_36;
    }
    ((a << b) | (a >> (36 - b))) & MASK_36
}

fn rotr36(a: u64, mut b: u32) -> u64 {
    if b > 35 {
        b -= 36;
    }
    if b == 0 {
        return a & MASK_36;
    }
    ((a >> b) | (a << (36 - b))) & MASK_36
}

fn rotl37(a: u64, mut b: u32) -> u64 {
    if b > 36 {
        b -= 37;
    }
    if b == 0 {
        return a & MASK_37;
    }
    ((a << b) | (a >> (37 - b))) & MASK_37
}

fn rotr37(a: u64, mut b: u32) -> u64 {
    if b > 36 {
        b -= 37;
    }
    if b == 0 {
        return a & MASK_37;
    }
    ((a >> b) | (a << (37 - b))) & MASK_37
}

/// Rotate the 37-bit intermediate value.  A narrow rotate spins only
/// the low 36 bits and re-attaches the old carry.
fn rotate(a: u64, b: i32, wide: bool) -> u64 {
    if wide {
        if b >= 0 {
            rotl37(a, b as u32)
        } else {
            rotr37(a, (-b) as u32)
        }
    } else {
        let old_carry = a & CARRY_BIT;
        let a = a & MASK_36;
        let rotated = if b >= 0 {
            rotl36(a, b as u32)
        } else {
            rotr36(a, (-b) as u32)
        };
        rotated | old_carry
    }
}

/// Replace the `b` most significant result bits with the carry bit.
fn mask_left(a: u64, b: u32) -> u64 {
    // An arithmetic shift of the inverted 36-bit mask produces b high
    // ones (plus the annotation bits, stripped at the end).
    let mask = ((!MASK_36 as i64) >> b) as u64;
    let filled = if a & CARRY_BIT != 0 {
        a | mask
    } else {
        a & !mask
    };
    filled & MASK_37
}

/// Replace the `b` least significant result bits with the carry bit.
fn mask_right(a: u64, b: u32) -> u64 {
    let keep = if b >= 37 { 0 } else { !0_u64 << b };
    let filled = if a & CARRY_BIT != 0 {
        a | !keep
    } else {
        a & keep
    };
    filled & MASK_37
}

fn mask(a: u64, b: i32) -> u64 {
    if b >= 0 {
        mask_left(a, b as u32)
    } else {
        mask_right(a, (-b) as u32)
    }
}

/// Evaluate the skip predicate and record the decision in bit 37.
fn skip(a: u64, cond: u8) -> u64 {
    let zero = a & MASK_36 == 0;
    let carry = a & CARRY_BIT != 0;
    let decision = match cond {
        SKIP_ALWAYS => true,
        SKIP_NO_CARRY => !carry,
        SKIP_CARRY => carry,
        SKIP_ZERO => zero,
        SKIP_NONZERO => !zero,
        SKIP_ZERO_OR_NO_CARRY => zero || !carry,
        SKIP_NONZERO_AND_CARRY => !zero && carry,
        _ => false,
    };
    a | ((decision as u64) << 37)
}

/// The operation table.  Unassigned rows read as zero; carry behavior
/// is per-row.
fn operation(a: u64, b: u64, mut c: bool, op: u8) -> u64 {
    let result = match op {
        0 => !a & MASK_36,
        1 => (!a).wrapping_add(1) & MASK_36,
        2 => a & MASK_36,
        3 => {
            if a == MASK_36 {
                c = !c;
            }
            a.wrapping_add(1) & MASK_36
        }
        4 => {
            if a < b {
                c = !c;
            }
            (!a).wrapping_add(b) & MASK_36
        }
        5 => {
            if a <= b {
                c = !c;
            }
            (!a).wrapping_add(1).wrapping_add(b) & MASK_36
        }
        6 => {
            if a + b > MASK_36 {
                c = !c;
            }
            (a + b) & MASK_36
        }
        7 => a & b & MASK_36,
        10 => (a | b) & MASK_36,
        15 => (a ^ b) & MASK_36,
        _ => 0,
    };
    (result | ((c as u64) << 36)) & MASK_37
}

/// Run one ALU operation.
///
/// `a` and `b` are the operands (for two-accumulator instructions `b`
/// is also the destination's old value, which is what a no-load
/// instruction leaves in place).  `carry` is the machine carry flag on
/// entry.  The selectors correspond one-for-one to the instruction
/// fields of the AA form; see the crate's instruction documentation.
#[allow(clippy::too_many_arguments)]
pub fn compute(
    a: Word,
    b: Word,
    carry: bool,
    op: u8,
    carry_init: u8,
    skip_cond: u8,
    no_load: bool,
    wide_rotate: bool,
    mask_count: i32,
    rotate_count: i32,
) -> AluOutput {
    let c = match carry_init {
        CI_CLEAR => false,
        CI_SET => true,
        CI_FLIP => !carry,
        _ => carry,
    };

    let operated = operation(a.bits(), b.bits(), c, op);
    let rotated = rotate(operated, rotate_count, wide_rotate);
    let masked = mask(rotated, mask_count);
    let tested = skip(masked, skip_cond);

    let value = if no_load {
        // The caller keeps its old destination; only the annotations
        // are live.
        b
    } else {
        Word::truncating(tested)
    };
    AluOutput {
        value,
        carry: tested & CARRY_BIT != 0,
        skip: tested & SKIP_BIT != 0,
    }
}
