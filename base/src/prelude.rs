//! The prelude exports the types needed to work with IST-66 words and
//! instructions.  Providing this prelude is the main purpose of the
//! base crate.
pub use super::instruction::{Family, Instruction};
pub use super::word::{signed_field, Address, Halfword, OutOfRange, Word};
pub use super::{addr, w36};
