//! The two-accumulator ALU instruction group.
//!
//! The instruction bits are the ALU selectors themselves; see the
//! [`alu`](crate::alu) module for their semantics.  The source
//! operand is `a[src]`, the second operand and default destination is
//! `a[dst]`.  An alternate-destination encoding (bits 13:11 equal to
//! 4) redirects the stored result to the accumulator named in bits
//! 10:7, re-deriving the mask selector from the rotate amount.

use crate::alu;
use crate::exception::Exception;

use base::prelude::*;

use super::{Cpu, Next};

pub(super) fn execute(cpu: &mut Cpu, inst: Instruction) -> Result<Next, Exception> {
    let src = inst.alu_source();
    let mut dst = inst.ac();
    let rotate = inst.alu_rotate() as i32;
    let mut mask = inst.alu_mask() as i32;
    if inst.alu_alt_dest_marker() {
        dst = inst.alu_alt_dest();
        mask = -rotate;
    }

    let out = alu::compute(
        cpu.a[src],
        cpu.a[inst.ac()],
        cpu.carry(),
        inst.alu_op(),
        inst.alu_carry_init(),
        inst.alu_skip(),
        inst.alu_no_load(),
        inst.alu_wide_rotate(),
        mask,
        rotate,
    );
    cpu.a[dst] = out.value;
    cpu.set_carry(out.carry);
    Ok(Next::Advance(if out.skip { 2 } else { 1 }))
}
