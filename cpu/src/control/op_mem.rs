//! The memory-reference groups: jump/modify (opcode 000) and
//! accumulator-memory (opcodes 001..027).

use crate::alu::{self, SKIP_NEVER, SKIP_ZERO};
use crate::exception::Exception;

use base::prelude::*;

use super::ea::effective_address;
use super::{Cpu, Next};

/// Opcode 000: {JMP, JSR, ISZ, DSZ} selected by the sub-op field.
pub(super) fn execute_memref(cpu: &mut Cpu, inst: Instruction) -> Result<Next, Exception> {
    let ea = effective_address(cpu, inst)?;
    match inst.ac() {
        0 => Ok(Next::Jump(ea)),
        1 => {
            // JSR: the return address lands in AC12.
            cpu.a[12] = Word::from(cpu.pc().successor());
            Ok(Next::Jump(ea))
        }
        2 => {
            // ISZ: increment memory, skip on zero.
            let data = cpu.read_checked(ea)?;
            let out = alu::compute(
                data,
                Word::ONE,
                false,
                6,
                alu::CI_PRESERVE,
                SKIP_ZERO,
                false,
                false,
                0,
                0,
            );
            cpu.write_checked(ea, out.value)?;
            Ok(Next::Advance(if out.skip { 2 } else { 1 }))
        }
        3 => {
            // DSZ: decrement memory, skip on zero.
            let data = cpu.read_checked(ea)?;
            let out = alu::compute(
                Word::ONE,
                data,
                false,
                5,
                alu::CI_PRESERVE,
                SKIP_ZERO,
                false,
                false,
                0,
                0,
            );
            cpu.write_checked(ea, out.value)?;
            Ok(Next::Advance(if out.skip { 2 } else { 1 }))
        }
        _ => Err(Exception::User),
    }
}

/// Opcodes 001..027: one accumulator against a memory operand.
pub(super) fn execute_accmem(cpu: &mut Cpu, inst: Instruction) -> Result<Next, Exception> {
    let ea = effective_address(cpu, inst)?;
    let ac = inst.ac();
    match inst.opcode() {
        0o01 | 0o02 => {
            // EDT/ESK: OR the memory word with the accumulator and arm
            // it as a deferred execute; ESK also skips afterwards.
            let data = cpu.read_checked(ea)?;
            let out = simple(data, cpu.a[ac], cpu.carry(), 10);
            cpu.arm_execute(out.value, inst.opcode() == 0o02);
            Ok(Next::None)
        }
        0o03 => {
            // MOVEA
            cpu.a[ac] = Word::from(ea);
            Ok(Next::Advance(1))
        }
        0o04 => {
            // ADDEA
            let out = simple(Word::from(ea), cpu.a[ac], cpu.carry(), 6);
            cpu.a[ac] = out.value;
            cpu.set_carry(out.carry);
            Ok(Next::Advance(1))
        }
        0o05 => {
            // ISE: increment the accumulator, skip if it now equals
            // the memory operand.
            let out = simple(Word::ONE, cpu.a[ac], cpu.carry(), 6);
            cpu.a[ac] = out.value;
            cpu.set_carry(out.carry);
            let data = cpu.read_checked(ea)?;
            Ok(Next::Advance(if data == cpu.a[ac] { 2 } else { 1 }))
        }
        0o06 => {
            // DSE: decrement and skip on equality.
            let out = simple(Word::ONE, cpu.a[ac], cpu.carry(), 5);
            cpu.a[ac] = out.value;
            cpu.set_carry(out.carry);
            let data = cpu.read_checked(ea)?;
            Ok(Next::Advance(if data == cpu.a[ac] { 2 } else { 1 }))
        }
        0o07 => {
            // MOVEAS: the address, shifted into the upper half.
            cpu.a[ac] = Word::truncating(u64::from(ea) << 17);
            Ok(Next::Advance(1))
        }
        0o10 => {
            // LDCOM
            let data = cpu.read_checked(ea)?;
            cpu.a[ac] = simple(data, Word::ZERO, false, 0).value;
            Ok(Next::Advance(1))
        }
        0o11 => {
            // LDNEG
            let data = cpu.read_checked(ea)?;
            cpu.a[ac] = simple(data, Word::ZERO, false, 1).value;
            Ok(Next::Advance(1))
        }
        0o12 => {
            // LDA
            cpu.a[ac] = cpu.read_checked(ea)?;
            Ok(Next::Advance(1))
        }
        0o13 => {
            // STA
            let value = cpu.a[ac];
            cpu.write_checked(ea, value)?;
            Ok(Next::Advance(1))
        }
        0o14 | 0o15 | 0o16 | 0o17 | 0o22 | 0o26 => {
            // Memory-operand arithmetic into the accumulator.
            let op = match inst.opcode() {
                0o14 => 4,  // ADCM
                0o15 => 5,  // SUBM
                0o16 => 6,  // ADDM
                0o17 => 7,  // ANDM
                0o22 => 10, // ORM
                _ => 15,    // XORM
            };
            let data = cpu.read_checked(ea)?;
            let out = simple(data, cpu.a[ac], cpu.carry(), op);
            cpu.a[ac] = out.value;
            cpu.set_carry(out.carry);
            Ok(Next::Advance(1))
        }
        _ => Err(Exception::Inst),
    }
}

/// An ALU pass with no rotate, mask, skip or load games.
fn simple(a: Word, b: Word, carry: bool, op: u8) -> alu::AluOutput {
    alu::compute(
        a,
        b,
        carry,
        op,
        alu::CI_PRESERVE,
        SKIP_NEVER,
        false,
        false,
        0,
        0,
    )
}
