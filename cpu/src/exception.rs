//! CPU exception causes.
//!
//! Every fault the interpreter can raise maps to a four-bit cause code
//! written into CW bits 27:24 on exception entry.  The reserved
//! machine-check and power-fail codes have entry points but nothing in
//! the emulator raises them.

use std::error::Error;
use std::fmt::{self, Display, Formatter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exception {
    /// Unimplemented instruction.
    User,
    /// Illegal instruction encoding.
    Inst,
    /// No such memory.
    Memx,
    /// No such device.
    Devx,
    /// Protection fault on read or instruction fetch.
    Ppfr,
    /// Protection fault on write.
    Ppfw,
    /// Protection fault on a supervisor-only operation.
    Ppfs,
    /// Timer tick.
    Time,
    /// Divide by zero.
    Divz,
    /// No floating-point unit fitted.
    Nfpu,
    /// Machine check (reserved).
    Mchk,
    /// Power failure (reserved).
    Pwrf,
}

impl Exception {
    /// The cause nibble stored in CW bits 27:24.
    pub const fn cause(self) -> u8 {
        match self {
            Exception::User => 0,
            Exception::Inst => 1,
            Exception::Memx => 2,
            Exception::Devx => 3,
            Exception::Ppfr => 4,
            Exception::Ppfw => 5,
            Exception::Ppfs => 6,
            Exception::Time => 7,
            Exception::Divz => 8,
            Exception::Nfpu => 9,
            Exception::Mchk => 14,
            Exception::Pwrf => 15,
        }
    }

    pub const fn mnemonic(self) -> &'static str {
        match self {
            Exception::User => "USER",
            Exception::Inst => "INST",
            Exception::Memx => "MEMX",
            Exception::Devx => "DEVX",
            Exception::Ppfr => "PPFR",
            Exception::Ppfw => "PPFW",
            Exception::Ppfs => "PPFS",
            Exception::Time => "TIME",
            Exception::Divz => "DIVZ",
            Exception::Nfpu => "NFPU",
            Exception::Mchk => "MCHK",
            Exception::Pwrf => "PWRF",
        }
    }

    const fn description(self) -> &'static str {
        match self {
            Exception::User => "unimplemented instruction",
            Exception::Inst => "illegal instruction",
            Exception::Memx => "no such memory",
            Exception::Devx => "no such device",
            Exception::Ppfr => "protection fault on read",
            Exception::Ppfw => "protection fault on write",
            Exception::Ppfs => "protection fault on system management",
            Exception::Time => "timer",
            Exception::Divz => "divide by zero",
            Exception::Nfpu => "no FPU fitted",
            Exception::Mchk => "machine check",
            Exception::Pwrf => "power failure",
        }
    }
}

impl Display for Exception {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        write!(f, "{}: {}", self.mnemonic(), self.description())
    }
}

impl Error for Exception {}

#[test]
fn cause_codes_match_the_vector_table() {
    assert_eq!(Exception::User.cause(), 0);
    assert_eq!(Exception::Ppfs.cause(), 6);
    assert_eq!(Exception::Divz.cause(), 8);
    assert_eq!(Exception::Pwrf.cause(), 15);
    assert_eq!(Exception::Mchk.mnemonic(), "MCHK");
}
