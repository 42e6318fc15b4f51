//! Interpreter tests: instruction semantics, protection, interrupt
//! priority, and the commit/rollback rules for faulting instructions.

use std::sync::Arc;

use base::prelude::*;

use crate::bus::Bus;
use crate::exception::Exception;
use crate::io::Device;

use super::{Cpu, C_CW, C_FCW, C_PSW};

fn fixture(mem_words: u32) -> Cpu {
    let bus = Arc::new(Bus::new(mem_words));
    let cpu = Cpu::new(bus, true);
    cpu.bus().intr.set_running();
    cpu
}

/// Deposit a program and aim the PC at it.
fn load(cpu: &mut Cpu, origin: u32, words: &[u64]) {
    for (i, &w) in words.iter().enumerate() {
        cpu.bus()
            .store_raw(Address::new(origin + i as u32), Word::new(w))
            .unwrap();
    }
    cpu.set_pc(Address::new(origin));
}

fn cause_nibble(cpu: &Cpu) -> u8 {
    ((cpu.c[C_CW].bits() >> 24) & 0xF) as u8
}

/// Accumulator-memory form (also covers the MR family, whose sub-op
/// sits in the accumulator field).
fn am(opcode: u64, ac: u64, indirect: bool, index: u64, disp: i64) -> u64 {
    (opcode << 27)
        | (ac << 23)
        | ((indirect as u64) << 22)
        | (index << 18)
        | (disp as u64 & 0o777777)
}

/// Two-accumulator ALU form.
#[allow(clippy::too_many_arguments)]
fn aa(op: u64, src: u64, dst: u64, ci: u64, cond: u64, nl: bool, rc: bool, mk: i64, rt: i64) -> u64 {
    (0b111_u64 << 33)
        | (((op >> 3) & 1) << 32)
        | ((rc as u64) << 31)
        | (src << 27)
        | (dst << 23)
        | ((op & 7) << 20)
        | (ci << 18)
        | (cond << 15)
        | ((nl as u64) << 14)
        | ((mk as u64 & 0x7F) << 7)
        | (rt as u64 & 0x7F)
}

/// Programmed I/O form.
fn io1(ac: u64, ctl: u64, transfer: u64, device: u64) -> u64 {
    (0o670_u64 << 27) | (ac << 23) | (ctl << 16) | (transfer << 12) | device
}

#[test]
fn add_all_ones_plus_one_carries_and_skips() {
    let mut cpu = fixture(4096);
    cpu.a[0] = Word::MAX;
    cpu.a[1] = Word::ONE;
    // ADD 1,0 with a skip-on-carry condition.
    load(&mut cpu, 0o1000, &[aa(6, 1, 0, 0, 3, false, false, 0, 0)]);
    cpu.step();
    assert_eq!(cpu.a[0], Word::ZERO);
    assert!(cpu.carry());
    assert_eq!(cpu.pc(), Address::new(0o1002)); // skipped
}

#[test]
fn alternate_destination_encoding() {
    let mut cpu = fixture(4096);
    cpu.a[2] = Word::new(0o1234);
    // Pass AC2, marker 100 in bits 13:11, alternate destination 5.
    let inst = (0b111_u64 << 33) | (2 << 27) | (2 << 23) | (2 << 20) | (0x4 << 11) | (5 << 7);
    load(&mut cpu, 0o1000, &[inst]);
    cpu.step();
    assert_eq!(cpu.a[5], Word::new(0o1234));
}

#[test]
fn memory_protection_read_honors_the_page_key() {
    // Page 0x200 of the address space, key 0x42.
    let mut cpu = fixture(0x80000);
    let target = Address::new(0x200 * 512);
    cpu.bus().set_key(0x42, target).unwrap();
    cpu.bus().store_raw(target, Word::new(0o4242)).unwrap();
    // The code page must be fetchable under the test keys.
    cpu.bus().set_key(0xFE, Address::new(0o1000)).unwrap();
    cpu.a[3] = Word::from(u32::from(target));

    // Matching key: the load succeeds.
    cpu.c[C_PSW] = Word::truncating((0x42_u64) << 28);
    load(&mut cpu, 0o1000, &[am(0o12, 1, false, 3, 0)]);
    cpu.step();
    assert_eq!(cpu.a[1], Word::new(0o4242));

    // Mismatched key: PPFR, and the vector takes over.
    cpu.bus()
        .store_raw(Address::new(0), Word::new(0o100))
        .unwrap(); // exception PSW template
    cpu.c[C_PSW] = Word::truncating((0x43_u64) << 28);
    load(&mut cpu, 0o1000, &[am(0o12, 1, false, 3, 0)]);
    cpu.step();
    assert_eq!(cause_nibble(&cpu), Exception::Ppfr.cause());
    assert_eq!(cpu.pc(), Address::new(0o100));
    assert_eq!(cpu.key(), 0); // the handler runs with the template key
}

#[test]
fn interrupt_priority_and_rfi_chain() {
    let mut cpu = fixture(4096);
    let bus = Arc::clone(cpu.bus());
    // Vector templates: line 3 enters at 0o300, line 7 at 0o700.
    bus.store_raw(Address::new(6), Word::new(0o300)).unwrap();
    bus.store_raw(Address::new(7), Word::ZERO).unwrap();
    bus.store_raw(Address::new(14), Word::new(0o700)).unwrap();
    bus.store_raw(Address::new(15), Word::ZERO).unwrap();
    // RFI at each handler entry.
    bus.store_raw(Address::new(0o300), Word::new(0o602 << 27))
        .unwrap();

    // Idle at level 15.
    cpu.c[C_CW] = Word::truncating(15_u64 << 32);
    cpu.set_pc(Address::new(0o1000));
    bus.intr.set_mask((1 << 3) | (1 << 7));
    bus.intr.assert_irq(7);
    bus.intr.assert_irq(3);

    // Line 3 wins.
    cpu.step();
    assert_eq!(cpu.current_irql(), 3);
    assert_eq!(cpu.pc(), Address::new(0o300));

    // The handler acknowledges its device and returns.
    bus.intr.release_irq(3);
    cpu.step(); // RFI
    assert_eq!(cpu.current_irql(), 15);
    assert_eq!(cpu.pc(), Address::new(0o1000));

    // Line 7 is still pending and comes straight in.
    cpu.step();
    assert_eq!(cpu.current_irql(), 7);
    assert_eq!(cpu.pc(), Address::new(0o700));
}

#[test]
fn interrupt_entry_saves_and_restores_context() {
    let mut cpu = fixture(4096);
    let bus = Arc::clone(cpu.bus());
    bus.store_raw(Address::new(4), Word::new(0o200)).unwrap(); // line 2 PSW
    bus.store_raw(Address::new(5), Word::new(0o777)).unwrap(); // line 2 CW low bits
    cpu.c[C_CW] = Word::truncating(15_u64 << 32);
    cpu.set_pc(Address::new(0o1234));
    cpu.set_carry(true);

    cpu.enter_interrupt(2);
    assert_eq!(cpu.current_irql(), 2);
    assert_eq!(cpu.pc(), Address::new(0o200));
    assert!(!cpu.carry()); // the carry bit is masked out of the template
    assert_eq!(cpu.direct_page_base(), 0o777);

    cpu.leave_interrupt();
    assert_eq!(cpu.current_irql(), 15);
    assert_eq!(cpu.pc(), Address::new(0o1234));
    assert!(cpu.carry());
}

#[test]
fn call_and_return_with_mask() {
    let mut cpu = fixture(8192);
    let bus = Arc::clone(cpu.bus());
    let mask: u64 = 0b1110_0000_0000_1000;
    bus.store_raw(Address::new(0o2000), Word::new(mask)).unwrap();
    // RTM sits at the call target.
    bus.store_raw(Address::new(0o2001), Word::new((0o100 << 27) | (1 << 23)))
        .unwrap();

    cpu.a[13] = Word::new(0o3000);
    for i in 0..16 {
        cpu.a[i] = Word::new(0o100 + i as u64);
    }
    cpu.a[13] = Word::new(0o3000);

    // CLM 0o2000 from 0o1000.
    load(&mut cpu, 0o1000, &[am(0o100, 0, false, 0, 0o2000)]);
    cpu.step();

    // Mask bits {15,14,13,3}: AC0, AC1, AC2, AC12 at successively
    // lower addresses, then the mask, then the return address.
    assert_eq!(bus.fetch_raw(Address::new(0o2777)).unwrap(), Word::new(0o100));
    assert_eq!(bus.fetch_raw(Address::new(0o2776)).unwrap(), Word::new(0o101));
    assert_eq!(bus.fetch_raw(Address::new(0o2775)).unwrap(), Word::new(0o102));
    assert_eq!(bus.fetch_raw(Address::new(0o2774)).unwrap(), Word::new(0o114));
    assert_eq!(bus.fetch_raw(Address::new(0o2773)).unwrap(), Word::new(mask));
    assert_eq!(bus.fetch_raw(Address::new(0o2772)).unwrap(), Word::new(0o1001));
    assert_eq!(cpu.a[13], Word::new(0o2772));
    assert_eq!(cpu.pc(), Address::new(0o2001));

    // Clobber the saved accumulators, then return.
    cpu.a[0] = Word::ZERO;
    cpu.a[1] = Word::ZERO;
    cpu.a[2] = Word::ZERO;
    cpu.a[12] = Word::ZERO;
    cpu.step(); // RTM
    assert_eq!(cpu.a[0], Word::new(0o100));
    assert_eq!(cpu.a[1], Word::new(0o101));
    assert_eq!(cpu.a[2], Word::new(0o102));
    assert_eq!(cpu.a[12], Word::new(0o114));
    assert_eq!(cpu.a[13], Word::new(0o3000));
    assert_eq!(cpu.pc(), Address::new(0o1001));
}

#[test]
fn rtm_restores_ac13_when_the_mask_names_it() {
    let mut cpu = fixture(8192);
    let bus = Arc::clone(cpu.bus());
    // Mask bit 2 names AC13.
    let mask: u64 = 1 << 2;
    bus.store_raw(Address::new(0o2000), Word::new(mask)).unwrap();
    bus.store_raw(Address::new(0o2001), Word::new((0o100 << 27) | (1 << 23)))
        .unwrap();
    cpu.a[13] = Word::new(0o3000);

    load(&mut cpu, 0o1000, &[am(0o100, 0, false, 0, 0o2000)]);
    cpu.step(); // CLM pushes AC13 itself at 0o2777
    assert_eq!(cpu.a[13], Word::new(0o2775));
    // Rewrite the stacked AC13 so it differs from the post-pop SP.
    bus.store_raw(Address::new(0o2777), Word::new(0o5555)).unwrap();
    cpu.step(); // RTM
    assert_eq!(cpu.a[13], Word::new(0o5555)); // popped value, not post-pop sp
}

#[test]
fn faulting_push_leaves_registers_unchanged() {
    // The stack pointer aims at unwritable memory; CLM must fault
    // without moving AC13 or the PC (past the exception entry).
    let mut cpu = fixture(8192);
    let bus = Arc::clone(cpu.bus());
    bus.store_raw(Address::new(0o2000), Word::new(0xFFFF)).unwrap();
    // Stack page is keyed away from the (supervisor) caller: key 0
    // callers bypass, so instead point the stack off the end of
    // memory.
    cpu.a[13] = Word::new(0o100000); // beyond the 8192-word memory
    load(&mut cpu, 0o1000, &[am(0o100, 0, false, 0, 0o2000)]);
    let saved = cpu.a;
    cpu.step();
    assert_eq!(cause_nibble(&cpu), Exception::Memx.cause());
    assert_eq!(cpu.a, saved);
}

#[test]
fn indirect_auto_increment_commits_on_success() {
    let mut cpu = fixture(4096);
    let bus = Arc::clone(cpu.bus());
    // Slot at 0o500: tag bit 35, post-increment mode, +1, target 0o600.
    let slot = (1_u64 << 35) | (1 << 27) | 0o600;
    bus.store_raw(Address::new(0o500), Word::new(slot)).unwrap();
    bus.store_raw(Address::new(0o600), Word::new(0o5555)).unwrap();

    // LDA 2 @0o500
    load(&mut cpu, 0o1000, &[am(0o12, 2, true, 0, 0o500)]);
    cpu.step();
    assert_eq!(cpu.a[2], Word::new(0o5555));
    // The slot was rewritten to point one past.
    assert_eq!(
        bus.fetch_raw(Address::new(0o500)).unwrap(),
        Word::new((1_u64 << 35) | (1 << 27) | 0o601)
    );
}

#[test]
fn indirect_pre_decrement_uses_the_new_address() {
    let mut cpu = fixture(4096);
    let bus = Arc::clone(cpu.bus());
    // Pre-decrement mode (01 in bits 34:33), step 2, target 0o602.
    let slot = (1_u64 << 35) | (1 << 33) | (2 << 27) | 0o602;
    bus.store_raw(Address::new(0o500), Word::new(slot)).unwrap();
    bus.store_raw(Address::new(0o600), Word::new(0o6666)).unwrap();

    load(&mut cpu, 0o1000, &[am(0o12, 2, true, 0, 0o500)]);
    cpu.step();
    assert_eq!(cpu.a[2], Word::new(0o6666));
    assert_eq!(
        bus.fetch_raw(Address::new(0o500)).unwrap(),
        Word::new((1_u64 << 35) | (1 << 33) | (2 << 27) | 0o600)
    );
}

#[test]
fn faulting_instruction_discards_the_deferred_write() {
    let mut cpu = fixture(4096);
    let bus = Arc::clone(cpu.bus());
    // The slot resolves to an address beyond fitted memory, so the
    // operand fetch faults after the auto-mod was staged.
    let slot = (1_u64 << 35) | (1 << 27) | 0o7000000;
    bus.store_raw(Address::new(0o500), Word::new(slot)).unwrap();

    load(&mut cpu, 0o1000, &[am(0o12, 2, true, 0, 0o500)]);
    cpu.step();
    assert_eq!(cause_nibble(&cpu), Exception::Memx.cause());
    // The slot still holds its original value.
    assert_eq!(bus.fetch_raw(Address::new(0o500)).unwrap(), Word::new(slot));
}

#[test]
fn reserved_auto_mod_mode_faults() {
    let mut cpu = fixture(4096);
    let bus = Arc::clone(cpu.bus());
    let slot = (1_u64 << 35) | (2 << 33) | 0o600; // mode 10: reserved
    bus.store_raw(Address::new(0o500), Word::new(slot)).unwrap();
    load(&mut cpu, 0o1000, &[am(0o12, 2, true, 0, 0o500)]);
    cpu.step();
    assert_eq!(cause_nibble(&cpu), Exception::Memx.cause());
}

#[test]
fn auto_index_modes_step_ac13() {
    let mut cpu = fixture(4096);
    cpu.a[13] = Word::new(0o2000);
    // MOVEA 4 with post-increment indexing: the old AC13 is the
    // address, AC13 moves by the displacement.
    load(&mut cpu, 0o1000, &[am(0o03, 4, false, 14, 3)]);
    cpu.step();
    assert_eq!(cpu.a[4], Word::new(0o2000));
    assert_eq!(cpu.a[13], Word::new(0o2003));

    // Pre-decrement: the new AC13 is the address.
    load(&mut cpu, 0o1100, &[am(0o03, 5, false, 15, 3)]);
    cpu.step();
    assert_eq!(cpu.a[13], Word::new(0o2000));
    assert_eq!(cpu.a[5], Word::new(0o2000));
}

#[test]
fn faulting_auto_index_rolls_back_ac13() {
    let mut cpu = fixture(4096);
    // AC13 pre-decrements to an out-of-range address; the fetch
    // faults and AC13 must come back.
    cpu.a[13] = Word::new(0o40000000); // beyond 4096 words after -1
    load(&mut cpu, 0o1000, &[am(0o12, 2, false, 15, 1)]);
    cpu.step();
    assert_eq!(cause_nibble(&cpu), Exception::Memx.cause());
    assert_eq!(cpu.a[13], Word::new(0o40000000));
}

#[test]
fn isz_and_dsz_skip_on_zero() {
    let mut cpu = fixture(4096);
    let bus = Arc::clone(cpu.bus());
    bus.store_raw(Address::new(0o2000), Word::MAX).unwrap();
    // ISZ 0o2000: all ones + 1 wraps to zero and skips.
    load(&mut cpu, 0o1000, &[am(0, 2, false, 0, 0o2000)]);
    cpu.step();
    assert_eq!(bus.fetch_raw(Address::new(0o2000)).unwrap(), Word::ZERO);
    assert_eq!(cpu.pc(), Address::new(0o1002));

    bus.store_raw(Address::new(0o2001), Word::ONE).unwrap();
    // DSZ 0o2001: 1 - 1 = 0, skip.
    load(&mut cpu, 0o1100, &[am(0, 3, false, 0, 0o2001)]);
    cpu.step();
    assert_eq!(bus.fetch_raw(Address::new(0o2001)).unwrap(), Word::ZERO);
    assert_eq!(cpu.pc(), Address::new(0o1102));
}

#[test]
fn jsr_links_through_ac12() {
    let mut cpu = fixture(4096);
    load(&mut cpu, 0o1000, &[am(0, 1, false, 0, 0o2000)]);
    cpu.step();
    assert_eq!(cpu.pc(), Address::new(0o2000));
    assert_eq!(cpu.a[12], Word::new(0o1001));
}

#[test]
fn ise_skips_when_equal() {
    let mut cpu = fixture(4096);
    let bus = Arc::clone(cpu.bus());
    bus.store_raw(Address::new(0o2000), Word::new(5)).unwrap();
    cpu.a[2] = Word::new(4);
    load(&mut cpu, 0o1000, &[am(0o05, 2, false, 0, 0o2000)]);
    cpu.step();
    assert_eq!(cpu.a[2], Word::new(5));
    assert_eq!(cpu.pc(), Address::new(0o1002));
}

#[test]
fn deferred_execute_runs_the_synthesized_instruction() {
    let mut cpu = fixture(4096);
    let bus = Arc::clone(cpu.bus());
    // The template is a JMP 0o555; EDT ORs in nothing.
    bus.store_raw(Address::new(0o2000), Word::new(am(0, 0, false, 0, 0o555)))
        .unwrap();
    cpu.a[4] = Word::ZERO;
    load(&mut cpu, 0o1000, &[am(0o01, 4, false, 0, 0o2000)]);
    cpu.step(); // EDT arms the execute; PC does not move
    assert_eq!(cpu.pc(), Address::new(0o1000));
    cpu.step(); // the synthesized jump fires
    assert_eq!(cpu.pc(), Address::new(0o555));
}

#[test]
fn deferred_execute_skip_variant_bumps_pc() {
    let mut cpu = fixture(4096);
    let bus = Arc::clone(cpu.bus());
    // Template: a do-nothing register pass.
    bus.store_raw(Address::new(0o2000), Word::new(aa(2, 0, 0, 0, 0, false, false, 0, 0)))
        .unwrap();
    load(&mut cpu, 0o1000, &[am(0o02, 4, false, 0, 0o2000)]);
    cpu.step(); // ESK arms
    cpu.step(); // synthesized instruction: advances 1, then the extra bump
    assert_eq!(cpu.pc(), Address::new(0o1002));
}

#[test]
fn interrupt_entry_discards_pending_execute() {
    let mut cpu = fixture(4096);
    let bus = Arc::clone(cpu.bus());
    bus.store_raw(Address::new(0o2000), Word::new(am(0, 0, false, 0, 0o555)))
        .unwrap();
    load(&mut cpu, 0o1000, &[am(0o01, 4, false, 0, 0o2000)]);
    cpu.step(); // EDT arms
    cpu.enter_interrupt(2);
    assert!(cpu.xeq.is_none());
}

#[test]
fn multiply_most_negative_squared() {
    let mut cpu = fixture(4096);
    let bus = Arc::clone(cpu.bus());
    let most_negative = 0o400000000000_u64; // -2^35
    bus.store_raw(Address::new(0o2000), Word::new(most_negative))
        .unwrap();
    cpu.a[2] = Word::new(most_negative);
    // MPY 0o2000
    load(&mut cpu, 0o1000, &[am(0o30, 0, false, 0, 0o2000)]);
    cpu.step();
    // +2^70: high word 2^34, low word 0.
    assert_eq!(cpu.a[0], Word::new(1 << 34));
    assert_eq!(cpu.a[1], Word::ZERO);
}

#[test]
fn multiply_accumulate_and_negate() {
    let mut cpu = fixture(4096);
    let bus = Arc::clone(cpu.bus());
    bus.store_raw(Address::new(0o2000), Word::new(3)).unwrap();
    cpu.a[0] = Word::ZERO;
    cpu.a[1] = Word::new(10);
    cpu.a[2] = Word::new(7);
    // MPA: (0,10) + 7*3 = (0,31)
    load(&mut cpu, 0o1000, &[am(0o30, 1, false, 0, 0o2000)]);
    cpu.step();
    assert_eq!(cpu.a[1], Word::new(31));
    assert_eq!(cpu.a[0], Word::ZERO);
    assert!(!cpu.carry());

    // MNA: (0,31) - 7*3 = (0,10)
    load(&mut cpu, 0o1100, &[am(0o30, 2, false, 0, 0o2000)]);
    cpu.step();
    assert_eq!(cpu.a[1], Word::new(10));
}

#[test]
fn divide_signed_with_remainder() {
    let mut cpu = fixture(4096);
    let bus = Arc::clone(cpu.bus());
    bus.store_raw(Address::new(0o2000), Word::new(2)).unwrap();
    cpu.a[1] = Word::from_signed(-7);
    load(&mut cpu, 0o1000, &[am(0o30, 3, false, 0, 0o2000)]);
    cpu.step();
    assert_eq!(cpu.a[1], Word::from_signed(-3));
    assert_eq!(cpu.a[0], Word::from_signed(-1));
}

#[test]
fn divide_by_zero_faults() {
    let mut cpu = fixture(4096);
    let bus = Arc::clone(cpu.bus());
    bus.store_raw(Address::new(0o2000), Word::ZERO).unwrap();
    cpu.a[1] = Word::new(5);
    load(&mut cpu, 0o1000, &[am(0o30, 3, false, 0, 0o2000)]);
    cpu.step();
    assert_eq!(cause_nibble(&cpu), Exception::Divz.cause());
}

#[test]
fn supervisor_ops_fault_without_key_zero() {
    let mut cpu = fixture(4096);
    // Fetchable code page, unprivileged caller.
    cpu.bus().set_key(0xFE, Address::new(0o1000)).unwrap();
    cpu.c[C_PSW] = Word::truncating(0x07_u64 << 28);
    // STMSK
    load(&mut cpu, 0o1000, &[am(0o602, 3, false, 0, 0o2000)]);
    cpu.step();
    assert_eq!(cause_nibble(&cpu), Exception::Ppfs.cause());
}

#[test]
fn mask_load_store_round_trips() {
    let mut cpu = fixture(4096);
    let bus = Arc::clone(cpu.bus());
    bus.store_raw(Address::new(0o2000), Word::new(0o170017)).unwrap();
    // LDMSK then STMSK to another word.
    load(
        &mut cpu,
        0o1000,
        &[
            am(0o602, 2, false, 0, 0o2000),
            am(0o602, 3, false, 0, 0o2001),
        ],
    );
    cpu.step();
    assert_eq!(cpu.bus().intr.mask(), 0o170017 & 0xFFFF);
    cpu.step();
    assert_eq!(
        bus.fetch_raw(Address::new(0o2001)).unwrap().bits() & 0xFFFF,
        0o170017 & 0xFFFF
    );
}

#[test]
fn page_key_instructions_round_trip() {
    let mut cpu = fixture(8192);
    cpu.a[4] = Word::new(0x37);
    // STK page containing 0o2345, then LDK it back into AC5.
    load(
        &mut cpu,
        0o1000,
        &[
            am(0o604, 4, false, 0, 0o2345),
            am(0o603, 5, false, 0, 0o2345),
        ],
    );
    cpu.step();
    cpu.step();
    assert_eq!(cpu.a[5], Word::new(0x37));
    assert_eq!(cpu.bus().page_key(Address::new(0o2000)).unwrap(), 0x37);
}

#[test]
fn control_register_load_and_store() {
    let mut cpu = fixture(4096);
    let bus = Arc::clone(cpu.bus());
    bus.store_raw(Address::new(0o2000), Word::new(0o54321)).unwrap();
    // LCT c[4], then STCTL c[4] elsewhere.
    load(
        &mut cpu,
        0o1000,
        &[
            am(0o605, 4, false, 0, 0o2000),
            am(0o606, 4, false, 0, 0o2001),
        ],
    );
    cpu.step();
    assert_eq!(cpu.c[4], Word::new(0o54321));
    cpu.step();
    assert_eq!(bus.fetch_raw(Address::new(0o2001)).unwrap(), Word::new(0o54321));
}

#[test]
fn halt_records_the_stop_code() {
    let mut cpu = fixture(4096);
    cpu.a[1] = Word::new(0o42);
    load(&mut cpu, 0o1000, &[am(0o600, 1, false, 0, 0o1000)]);
    cpu.step();
    assert_eq!(cpu.stop_code(), Word::new(0o42));
    assert!(!cpu.bus().intr.is_running());
    assert_eq!(cpu.pc(), Address::new(0o1000));
}

#[test]
fn software_interrupt_enters_the_named_level() {
    let mut cpu = fixture(4096);
    let bus = Arc::clone(cpu.bus());
    bus.store_raw(Address::new(10), Word::new(0o500)).unwrap(); // line 5 PSW
    cpu.c[C_CW] = Word::truncating(15_u64 << 32);
    // INT 5, resuming later at 0o3000.
    load(&mut cpu, 0o1000, &[am(0o601, 5, false, 0, 0o3000)]);
    cpu.step();
    assert_eq!(cpu.current_irql(), 5);
    assert_eq!(cpu.pc(), Address::new(0o500));
    // The saved context resumes at the INT operand.
    assert_eq!(
        bus.fetch_raw(Address::new(32 + 2 * 15)).unwrap().bits() & ((1 << 27) - 1),
        0o3000
    );
}

#[test]
fn missing_device_raises_devx() {
    let mut cpu = fixture(4096);
    load(&mut cpu, 0o1000, &[io1(0, 0, 0, 0o55)]);
    cpu.step();
    assert_eq!(cause_nibble(&cpu), Exception::Devx.cause());
}

struct StubDevice {
    word: u64,
    status: u64,
}

impl Device for StubDevice {
    fn io(&mut self, _acc: Word, _ctl: u8, transfer: u8) -> Word {
        if transfer == 14 {
            Word::new(self.status)
        } else {
            Word::new(self.word)
        }
    }
    fn name(&self) -> String {
        "stub".to_string()
    }
}

#[test]
fn input_transfer_replaces_the_accumulator() {
    let mut cpu = fixture(4096);
    cpu.devices.attach(
        0o12,
        Box::new(StubDevice {
            word: 0o7070,
            status: 0,
        }),
    );
    cpu.a[3] = Word::new(0o1111);
    load(&mut cpu, 0o1000, &[io1(3, 0, 0, 0o12)]);
    cpu.step();
    assert_eq!(cpu.a[3], Word::new(0o7070));
    assert_eq!(cpu.pc(), Address::new(0o1001));
}

#[test]
fn status_query_skips_by_predicate() {
    let mut cpu = fixture(4096);
    cpu.devices.attach(
        0o12,
        Box::new(StubDevice {
            word: 0,
            status: 0b10, // done, not busy
        }),
    );
    // Skip-if-done fires.
    load(&mut cpu, 0o1000, &[io1(0, 2, 14, 0o12)]);
    cpu.step();
    assert_eq!(cpu.pc(), Address::new(0o1002));
    // Skip-if-busy does not.
    load(&mut cpu, 0o1100, &[io1(0, 0, 14, 0o12)]);
    cpu.step();
    assert_eq!(cpu.pc(), Address::new(0o1101));
}

#[test]
fn io_requires_supervisor_key() {
    let mut cpu = fixture(4096);
    cpu.bus().set_key(0xFE, Address::new(0o1000)).unwrap();
    cpu.c[C_PSW] = Word::truncating(0x05_u64 << 28);
    load(&mut cpu, 0o1000, &[io1(0, 0, 0, 0o12)]);
    cpu.step();
    assert_eq!(cause_nibble(&cpu), Exception::Ppfs.cause());
}

#[test]
fn float_multiply_identity_through_instructions() {
    let mut cpu = fixture(4096);
    let bus = Arc::clone(cpu.bus());
    let one = Word::new(127 << 27); // float36 1.0
    bus.store_raw(Address::new(0o2000), one).unwrap();
    // FLD f0; FMP f0; FST f0 to 0o2001.
    load(
        &mut cpu,
        0o1000,
        &[
            am(0o31, 0, false, 0, 0o2000),
            am(0o34, 0, false, 0, 0o2000),
            am(0o32, 0, false, 0, 0o2001),
        ],
    );
    cpu.step();
    cpu.step();
    cpu.step();
    assert_eq!(bus.fetch_raw(Address::new(0o2001)).unwrap(), one);
    assert_eq!(cpu.c[C_FCW], Word::ZERO); // exact all the way
}

#[test]
fn float72_load_store_round_trip() {
    let mut cpu = fixture(4096);
    let bus = Arc::clone(cpu.bus());
    let hi = Word::new((127 << 27) | 0o123456701);
    let lo = Word::new(0o123456701234);
    bus.store_raw(Address::new(0o2000), hi).unwrap();
    bus.store_raw(Address::new(0o2001), lo).unwrap();
    load(
        &mut cpu,
        0o1000,
        &[
            am(0o36, 1, false, 0, 0o2000),
            am(0o37, 1, false, 0, 0o2002),
        ],
    );
    cpu.step();
    cpu.step();
    assert_eq!(bus.fetch_raw(Address::new(0o2002)).unwrap(), hi);
    assert_eq!(bus.fetch_raw(Address::new(0o2003)).unwrap(), lo);
}

#[test]
fn fpu_absent_faults_nfpu() {
    let bus = Arc::new(Bus::new(4096));
    let mut cpu = Cpu::new(bus, false);
    cpu.bus().intr.set_running();
    load(&mut cpu, 0o1000, &[am(0o31, 0, false, 0, 0o2000)]);
    cpu.step();
    assert_eq!(cause_nibble(&cpu), Exception::Nfpu.cause());
}

#[test]
fn unassigned_opcode_is_a_user_exception() {
    let mut cpu = fixture(4096);
    load(&mut cpu, 0o1000, &[0o200_u64 << 27]);
    cpu.step();
    assert_eq!(cause_nibble(&cpu), Exception::User.cause());
}

#[test]
fn illegal_accmem_opcode_is_an_inst_exception() {
    let mut cpu = fixture(4096);
    load(&mut cpu, 0o1000, &[am(0o20, 0, false, 0, 0)]);
    cpu.step();
    assert_eq!(cause_nibble(&cpu), Exception::Inst.cause());
}

#[test]
fn memory_arithmetic_ops() {
    let mut cpu = fixture(4096);
    let bus = Arc::clone(cpu.bus());
    bus.store_raw(Address::new(0o2000), Word::new(0o70)).unwrap();

    // ADDM: AC += ... (operand + accumulator)
    cpu.a[1] = Word::new(0o7);
    load(&mut cpu, 0o1000, &[am(0o16, 1, false, 0, 0o2000)]);
    cpu.step();
    assert_eq!(cpu.a[1], Word::new(0o77));

    // ANDM
    cpu.a[2] = Word::new(0o74);
    load(&mut cpu, 0o1100, &[am(0o17, 2, false, 0, 0o2000)]);
    cpu.step();
    assert_eq!(cpu.a[2], Word::new(0o70));

    // ORM
    cpu.a[3] = Word::new(0o7);
    load(&mut cpu, 0o1200, &[am(0o22, 3, false, 0, 0o2000)]);
    cpu.step();
    assert_eq!(cpu.a[3], Word::new(0o77));

    // XORM
    cpu.a[4] = Word::new(0o77);
    load(&mut cpu, 0o1300, &[am(0o26, 4, false, 0, 0o2000)]);
    cpu.step();
    assert_eq!(cpu.a[4], Word::new(0o7));

    // SUBM: accumulator minus operand.
    cpu.a[5] = Word::new(0o100);
    load(&mut cpu, 0o1400, &[am(0o15, 5, false, 0, 0o2000)]);
    cpu.step();
    assert_eq!(cpu.a[5], Word::new(0o10));

    // LDCOM / LDNEG
    load(&mut cpu, 0o1500, &[am(0o10, 6, false, 0, 0o2000)]);
    cpu.step();
    assert_eq!(cpu.a[6], !Word::new(0o70));
    load(&mut cpu, 0o1600, &[am(0o11, 7, false, 0, 0o2000)]);
    cpu.step();
    assert_eq!(cpu.a[7], Word::from_signed(-0o70));
}

#[test]
fn movea_forms() {
    let mut cpu = fixture(4096);
    load(&mut cpu, 0o1000, &[am(0o03, 1, false, 0, 0o2345)]);
    cpu.step();
    assert_eq!(cpu.a[1], Word::new(0o2345));

    // MOVEAS parks the address in the upper half.
    load(&mut cpu, 0o1100, &[am(0o07, 2, false, 0, 0o2345)]);
    cpu.step();
    assert_eq!(cpu.a[2], Word::truncating(0o2345_u64 << 17));
}

#[test]
fn direct_page_indexing() {
    let mut cpu = fixture(0x40000);
    let bus = Arc::clone(cpu.bus());
    // Direct-page base 0o100 covers addresses 0o100 << 9 ..
    cpu.c[C_CW] = Word::new(0o100);
    bus.store_raw(Address::new((0o100 << 9) + 5), Word::new(0o1212))
        .unwrap();
    load(&mut cpu, 0o1000, &[am(0o12, 1, false, 1, 5)]);
    cpu.step();
    assert_eq!(cpu.a[1], Word::new(0o1212));
}
