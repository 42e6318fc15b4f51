//! The `base` crate defines the IST-66-related things which are useful
//! in both the emulator and other associated tools: the machine word
//! types and the instruction-word field layout.  A tool that wants to
//! pick apart IST-66 instructions can depend on this crate without
//! pulling in the emulator itself.

pub mod instruction;
pub mod prelude;
pub mod word;

/// Form a 36-bit [`word::Word`] constant.  The argument must fit in 36
/// bits; out-of-range values fail at compile time when used in a const
/// context.
#[macro_export]
macro_rules! w36 {
    ($n:expr) => {
        $crate::word::Word::new($n)
    };
}

/// Form a 27-bit [`word::Address`] constant.
#[macro_export]
macro_rules! addr {
    ($n:expr) => {
        $crate::word::Address::new($n)
    };
}

#[test]
fn test_w36() {
    use word::Word;
    let m: Word = w36!(40);
    let n: Word = Word::from(40_u32);
    assert_eq!(m, n);

    let p: Word = w36!(1 << 34);
    let q: Word = Word::try_from(1_u64 << 34).expect("test data should be in range");
    assert_eq!(p, q);
}

#[test]
fn test_addr() {
    use word::Address;
    let p: Address = addr!(1 << 26);
    let q: Address = Address::try_from(1_u32 << 26).expect("test data should be in range");
    assert_eq!(p, q);
}
