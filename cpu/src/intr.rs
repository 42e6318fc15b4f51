//! The priority-interrupt controller.
//!
//! Sixteen request lines with per-line pending counters, a 16-bit
//! enable mask (bit `n` enables line `n`), and a cached minimum
//! pending enabled line.  Lower line numbers are higher priority;
//! lines 1..14 are usable by devices, line 0 is reserved for exception
//! entry and line 15 doubles as the "nothing pending" value.
//!
//! The controller also owns the CPU's `running` and `exit` flags and
//! the condition variable a halted CPU sleeps on: asserting an enabled
//! line wakes the processor.  This is the single CPU-level lock of the
//! machine — devices take their own lock first and this one second,
//! never the other way around.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};

use tracing::{event, Level};

/// The `min_pending` value meaning "no enabled line pending".
pub const IRQ_NONE: u8 = 15;

#[derive(Debug)]
struct IntrState {
    pending: [u32; 16],
    mask: u16,
    min_pending: u8,
    running: bool,
    exit: bool,
}

impl IntrState {
    /// Lowest enabled line with a nonzero counter, scanning upward
    /// from 1; 15 when there is none.
    fn scan_min_pending(&self) -> u8 {
        for n in 1..IRQ_NONE {
            if self.pending[n as usize] > 0 && self.mask & (1 << n) != 0 {
                return n;
            }
        }
        IRQ_NONE
    }
}

/// What a halted CPU learned when it woke up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeReason {
    /// An enabled interrupt arrived; resume the execution loop.
    Interrupt,
    /// The machine is shutting down or nothing can ever wake it.
    Terminate,
    /// The front end wants the processor back.
    Paused,
}

#[derive(Debug)]
pub struct InterruptController {
    state: Mutex<IntrState>,
    wake: Condvar,
}

impl InterruptController {
    pub fn new() -> InterruptController {
        InterruptController {
            state: Mutex::new(IntrState {
                pending: [0; 16],
                mask: 0,
                min_pending: IRQ_NONE,
                running: false,
                exit: false,
            }),
            wake: Condvar::new(),
        }
    }

    /// Raise line `irq`.  Wakes the CPU when the line is enabled and
    /// improves on the cached minimum.
    pub fn assert_irq(&self, irq: u8) {
        debug_assert!(irq < 16);
        let mut st = self.state.lock().unwrap();
        st.pending[irq as usize] += 1;
        if irq < st.min_pending && st.mask & (1 << irq) != 0 {
            st.min_pending = irq;
            st.running = true;
            self.wake.notify_all();
        }
    }

    /// Drop one assertion of line `irq` (clamped at zero) and
    /// recompute the cached minimum.
    pub fn release_irq(&self, irq: u8) {
        debug_assert!(irq < 16);
        let mut st = self.state.lock().unwrap();
        if st.pending[irq as usize] > 0 {
            st.pending[irq as usize] -= 1;
        }
        st.min_pending = st.scan_min_pending();
    }

    /// Replace the enable mask and recompute the cached minimum.
    pub fn set_mask(&self, mask: u16) {
        let mut st = self.state.lock().unwrap();
        st.mask = mask;
        st.min_pending = st.scan_min_pending();
        if st.min_pending < IRQ_NONE {
            st.running = true;
            self.wake.notify_all();
        }
    }

    pub fn mask(&self) -> u16 {
        self.state.lock().unwrap().mask
    }

    pub fn min_pending(&self) -> u8 {
        self.state.lock().unwrap().min_pending
    }

    /// The pending count of one line (the IOCPU's TNP test).
    pub fn pending(&self, irq: u8) -> u32 {
        self.state.lock().unwrap().pending[irq as usize]
    }

    /// The pending enabled line the CPU should take, if any: strictly
    /// higher priority than `current_irql`.
    pub fn take_below(&self, current_irql: u8) -> Option<u8> {
        let st = self.state.lock().unwrap();
        if st.min_pending < current_irql {
            Some(st.min_pending)
        } else {
            None
        }
    }

    /// The HLT instruction: stop the processor unless a higher-priority
    /// line is already waiting.
    pub fn halt(&self, current_irql: u8) {
        let mut st = self.state.lock().unwrap();
        if st.min_pending >= current_irql {
            st.running = false;
        }
    }

    pub fn set_running(&self) {
        let mut st = self.state.lock().unwrap();
        st.running = true;
        self.wake.notify_all();
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().unwrap().running
    }

    /// Ask the CPU thread to terminate; wakes it if halted.
    pub fn request_exit(&self) {
        let mut st = self.state.lock().unwrap();
        st.exit = true;
        self.wake.notify_all();
    }

    pub fn exit_requested(&self) -> bool {
        self.state.lock().unwrap().exit
    }

    /// Block a halted CPU until something can happen.  Returns
    /// [`WakeReason::Terminate`] when exit is requested or when no
    /// line is enabled (nothing could ever wake the machine), and
    /// [`WakeReason::Paused`] when `pause` goes up.
    pub fn wait_while_halted(&self, pause: &AtomicBool) -> WakeReason {
        let mut st = self.state.lock().unwrap();
        loop {
            if pause.load(Ordering::Acquire) {
                return WakeReason::Paused;
            }
            if st.exit {
                return WakeReason::Terminate;
            }
            if st.running {
                return WakeReason::Interrupt;
            }
            if st.mask == 0 {
                event!(Level::DEBUG, "halted with no interrupt enabled, terminating");
                return WakeReason::Terminate;
            }
            st = self.wake.wait(st).unwrap();
        }
    }

    /// Wake the CPU thread so it re-examines its pause flag.
    pub fn kick(&self) {
        let _unused = self.state.lock().unwrap();
        self.wake.notify_all();
    }

    /// Drop the processor unconditionally (the IOCPU's halt, which
    /// gates on its own enable flag rather than a level compare).
    pub fn force_halt(&self) {
        let mut st = self.state.lock().unwrap();
        st.running = false;
    }

    /// Allow a stopped interpreter to be restarted: clears the exit
    /// latch.
    pub fn clear_exit(&self) {
        let mut st = self.state.lock().unwrap();
        st.exit = false;
    }
}

impl Default for InterruptController {
    fn default() -> InterruptController {
        InterruptController::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Model check: after any mutation, `min_pending` equals the
    /// minimum enabled pending line, or 15.
    fn check_invariant(ctl: &InterruptController) {
        let st = ctl.state.lock().unwrap();
        let expected = (1..15)
            .find(|&n| st.pending[n as usize] > 0 && st.mask & (1 << n) != 0)
            .unwrap_or(IRQ_NONE);
        assert_eq!(st.min_pending, expected);
    }

    #[test]
    fn assert_release_tracks_minimum() {
        let ctl = InterruptController::new();
        ctl.set_mask(0xFFFF);
        check_invariant(&ctl);

        ctl.assert_irq(7);
        assert_eq!(ctl.min_pending(), 7);
        ctl.assert_irq(3);
        assert_eq!(ctl.min_pending(), 3);
        check_invariant(&ctl);

        // A second assertion of line 3 takes two releases to clear.
        ctl.assert_irq(3);
        ctl.release_irq(3);
        assert_eq!(ctl.min_pending(), 3);
        ctl.release_irq(3);
        assert_eq!(ctl.min_pending(), 7);
        ctl.release_irq(7);
        assert_eq!(ctl.min_pending(), IRQ_NONE);
        check_invariant(&ctl);
    }

    #[test]
    fn masked_lines_do_not_count() {
        let ctl = InterruptController::new();
        ctl.set_mask(1 << 5);
        ctl.assert_irq(3);
        assert_eq!(ctl.min_pending(), IRQ_NONE);
        ctl.assert_irq(5);
        assert_eq!(ctl.min_pending(), 5);
        // Unmasking line 3 exposes it.
        ctl.set_mask((1 << 5) | (1 << 3));
        assert_eq!(ctl.min_pending(), 3);
        check_invariant(&ctl);
    }

    #[test]
    fn release_clamps_at_zero() {
        let ctl = InterruptController::new();
        ctl.set_mask(0xFFFF);
        ctl.release_irq(4);
        ctl.assert_irq(4);
        assert_eq!(ctl.min_pending(), 4);
        ctl.release_irq(4);
        assert_eq!(ctl.min_pending(), IRQ_NONE);
    }

    #[test]
    fn take_below_respects_current_level() {
        let ctl = InterruptController::new();
        ctl.set_mask(0xFFFF);
        ctl.assert_irq(14);
        // Accepted from the idle level (15), refused at level 14.
        assert_eq!(ctl.take_below(15), Some(14));
        assert_eq!(ctl.take_below(14), None);
    }

    #[test]
    fn assert_wakes_a_halted_cpu() {
        let ctl = InterruptController::new();
        ctl.set_mask(0xFFFF);
        ctl.halt(IRQ_NONE);
        assert!(!ctl.is_running());
        ctl.assert_irq(2);
        assert!(ctl.is_running());
        let pause = AtomicBool::new(false);
        assert_eq!(ctl.wait_while_halted(&pause), WakeReason::Interrupt);
    }

    #[test]
    fn halt_refused_with_better_line_pending() {
        let ctl = InterruptController::new();
        ctl.set_mask(0xFFFF);
        ctl.set_running();
        ctl.assert_irq(2);
        ctl.halt(5);
        assert!(ctl.is_running());
        ctl.halt(2);
        assert!(!ctl.is_running());
    }

    #[test]
    fn wait_terminates_without_enabled_lines() {
        let ctl = InterruptController::new();
        ctl.halt(IRQ_NONE);
        let pause = AtomicBool::new(false);
        assert_eq!(ctl.wait_while_halted(&pause), WakeReason::Terminate);
    }

    #[test]
    fn exit_request_wakes_and_terminates() {
        let ctl = InterruptController::new();
        ctl.set_mask(0xFFFF);
        ctl.halt(IRQ_NONE);
        ctl.request_exit();
        let pause = AtomicBool::new(false);
        assert_eq!(ctl.wait_while_halted(&pause), WakeReason::Terminate);
    }
}
