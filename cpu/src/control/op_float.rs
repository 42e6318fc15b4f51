//! The floating-point group, opcodes 031..037.
//!
//! All operands come from memory in the external float36/float72
//! formats and are widened to the extended-80 accumulators; stores
//! round to nearest even.  Result flags accumulate into the FCW
//! control register — only a missing FPU raises an exception.

use crate::exception::Exception;
use crate::fpu;

use base::prelude::*;

use super::ea::effective_address;
use super::{Cpu, Next};

pub(super) fn execute(cpu: &mut Cpu, inst: Instruction) -> Result<Next, Exception> {
    if !cpu.with_fpu {
        return Err(Exception::Nfpu);
    }
    let ea = effective_address(cpu, inst)?;
    let fx = inst.ac();
    match inst.opcode() {
        0o31 => {
            // FLD
            let w = cpu.read_checked(ea)?;
            cpu.f[fx] = fpu::from_float36(w);
        }
        0o32 => {
            // FST
            let (w, flags) = fpu::to_float36(&cpu.f[fx], true);
            cpu.merge_float_flags(flags);
            cpu.write_checked(ea, w)?;
        }
        0o33 | 0o34 | 0o35 => {
            // FAD / FMP / FDV against a float36 memory operand.
            let w = cpu.read_checked(ea)?;
            let operand = fpu::from_float36(w);
            let (result, flags) = match inst.opcode() {
                0o33 => fpu::add(&cpu.f[fx], &operand),
                0o34 => fpu::mul(&cpu.f[fx], &operand),
                _ => fpu::div(&cpu.f[fx], &operand),
            };
            cpu.f[fx] = result;
            cpu.merge_float_flags(flags);
        }
        0o36 => {
            // FLDD: double-width load.
            let hi = cpu.read_checked(ea)?;
            let lo = cpu.read_checked(ea.successor())?;
            cpu.f[fx] = fpu::from_float72(hi, lo);
        }
        0o37 => {
            // FSTD: double-width store.
            let (hi, lo, flags) = fpu::to_float72(&cpu.f[fx]);
            cpu.merge_float_flags(flags);
            cpu.write_checked(ea, hi)?;
            cpu.write_checked(ea.successor(), lo)?;
        }
        _ => unreachable!("the float family covers 031..037"),
    }
    Ok(Next::Advance(1))
}
