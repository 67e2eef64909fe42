//! # Return-Address Bootstrap Frames
//!
//! Byte-addressed ports bootstrap a task the way a subroutine call would
//! have left its stack: two return addresses, the exit routine underneath
//! and the entry point on top. Resuming the task "returns" into the entry
//! point, and when the entry point itself returns it lands in the exit
//! routine.
//!
//! ```text
//!   high ┌──────────────┐ <- end of region
//!        │ exit  (LSB…) │
//!        │ entry (LSB…) │
//!   low  └──────────────┘ <- saved sp
//! ```
//!
//! Addresses are stored least significant byte first, working down from the
//! end of the region, in 2 or 3 bytes depending on [`AddressWidth`].

/// Width of a code address in a bootstrap frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressWidth {
    /// 16-bit code addresses (up to 64 KiB of program memory).
    Narrow16,
    /// 24-bit code addresses (extended program memory).
    Extended24,
}

impl AddressWidth {
    #[inline]
    pub const fn bytes(self) -> usize {
        match self {
            AddressWidth::Narrow16 => 2,
            AddressWidth::Extended24 => 3,
        }
    }

    /// Bits of an address that survive encoding.
    #[inline]
    pub const fn mask(self) -> usize {
        (1usize << (8 * self.bytes())) - 1
    }
}

/// Push `addr` below offset `top`; returns the new top.
pub fn push_address(stack: &mut [u8], top: usize, addr: usize, width: AddressWidth) -> Option<usize> {
    let n = width.bytes();
    let new_top = top.checked_sub(n)?;
    if top > stack.len() {
        return None;
    }
    for i in 0..n {
        stack[top - 1 - i] = (addr >> (8 * i)) as u8;
    }
    Some(new_top)
}

/// Decode the address whose most significant byte sits at `stack[top]`.
pub fn read_address(stack: &[u8], top: usize, width: AddressWidth) -> Option<usize> {
    let bytes = stack.get(top..top + width.bytes())?;
    Some(bytes.iter().fold(0usize, |acc, &b| (acc << 8) | b as usize))
}

/// Lay out a bootstrap frame at the end of `stack` and return the offset
/// the saved stack pointer should hold.
pub fn prepare_return_frame(stack: &mut [u8], entry: usize, exit: usize, width: AddressWidth) -> Option<usize> {
    let top = push_address(stack, stack.len(), exit, width)?;
    push_address(stack, top, entry, width)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_narrow_frame_layout() {
        let mut stack = [0u8; 8];
        let sp = prepare_return_frame(&mut stack, 0x1234, 0xabcd, AddressWidth::Narrow16).unwrap();

        assert_eq!(sp, 4);
        assert_eq!(stack[4..], [0x12, 0x34, 0xab, 0xcd]);
        assert_eq!(read_address(&stack, sp, AddressWidth::Narrow16), Some(0x1234));
        assert_eq!(read_address(&stack, sp + 2, AddressWidth::Narrow16), Some(0xabcd));
    }

    #[test]
    fn test_extended_frame_layout() {
        let mut stack = [0u8; 8];
        let sp = prepare_return_frame(&mut stack, 0x01_2345, 0x02_abcd, AddressWidth::Extended24).unwrap();

        assert_eq!(sp, 2);
        assert_eq!(stack[2..], [0x01, 0x23, 0x45, 0x02, 0xab, 0xcd]);
        assert_eq!(read_address(&stack, sp, AddressWidth::Extended24), Some(0x01_2345));
    }

    #[test]
    fn test_narrow_truncates_high_bits() {
        let mut stack = [0u8; 4];
        let sp = prepare_return_frame(&mut stack, 0x7_1234, 0, AddressWidth::Narrow16).unwrap();
        assert_eq!(read_address(&stack, sp, AddressWidth::Narrow16), Some(0x7_1234 & AddressWidth::Narrow16.mask()));
    }

    #[test]
    fn test_frame_does_not_fit() {
        let mut stack = [0u8; 5];
        assert_eq!(prepare_return_frame(&mut stack, 1, 2, AddressWidth::Extended24), None);
    }
}
