use core::sync::atomic::{Ordering, fence};

/// Access to one device's 32-bit register window.
///
/// Offsets are in bytes from the start of the window. Implementations must
/// not elide or merge accesses: every call reaches the device.
pub trait RegisterBus {
    fn read(&self, offset: usize) -> u32;

    fn write(&self, offset: usize, value: u32);

    /// Read-modify-write helper that sets the bits in `mask`.
    fn set_bits(&self, offset: usize, mask: u32) {
        let value = self.read(offset);
        self.write(offset, value | mask);
    }

    /// Read-modify-write helper that clears the bits in `mask`.
    fn clear_bits(&self, offset: usize, mask: u32) {
        let value = self.read(offset);
        self.write(offset, value & !mask);
    }
}

/// Memory-mapped register window.
#[derive(Debug, Clone, Copy)]
pub struct Mmio {
    base: usize,
}

impl Mmio {
    /// Binds a register window at `base`.
    ///
    /// # Safety
    ///
    /// `base` must be the physical (identity-mapped) address of a device
    /// register window that stays mapped for the lifetime of the returned
    /// value, and every offset later passed to `read`/`write` must fall
    /// inside that window.
    pub const unsafe fn new(base: usize) -> Self {
        Self { base }
    }

    pub fn base(&self) -> usize {
        self.base
    }
}

impl RegisterBus for Mmio {
    #[inline(always)]
    fn read(&self, offset: usize) -> u32 {
        let value = unsafe { ((self.base + offset) as *const u32).read_volatile() };
        fence(Ordering::Acquire);
        value
    }

    #[inline(always)]
    fn write(&self, offset: usize, value: u32) {
        fence(Ordering::Release);
        unsafe { ((self.base + offset) as *mut u32).write_volatile(value) }
    }
}

/// Splits a bus address into the low and high words of a 64-bit address
/// register pair.
#[inline]
pub(crate) fn split_addr(addr: usize) -> (u32, u32) {
    let addr = addr as u64;
    (addr as u32, (addr >> 32) as u32)
}


#[cfg(test)]
mod tests {
    use super::mock::RegFile;
    use super::*;

    #[test]
    fn set_and_clear_bits_preserve_other_bits() {
        let regs = RegFile::default();
        regs.set(0x8, 0b1010);
        regs.set_bits(0x8, 0b0001);
        assert_eq!(regs.get(0x8), 0b1011);
        regs.clear_bits(0x8, 0b1000);
        assert_eq!(regs.get(0x8), 0b0011);
    }

    #[test]
    fn split_addr_keeps_high_word() {
        assert_eq!(split_addr(0x1_2345_6789), (0x2345_6789, 0x1));
    }
}
