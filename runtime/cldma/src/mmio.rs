// Licensed under the Apache-2.0 license

use std::ptr::NonNull;

/// 32-bit register access by byte offset into one controller's window.
pub trait CldmaMmio: Send + Sync {
    fn read32(&self, offset: usize) -> u32;
    fn write32(&self, offset: usize, value: u32);

    /// Some controllers do not guarantee atomic 64-bit register writes, so
    /// the low half always goes first.
    fn write64(&self, lo: usize, hi: usize, value: u64) {
        self.write32(lo, value as u32);
        self.write32(hi, (value >> 32) as u32);
    }

    fn read64(&self, lo: usize, hi: usize) -> u64 {
        let l = self.read32(lo) as u64;
        let h = self.read32(hi) as u64;
        (h << 32) | l
    }
}

/// A mapped register window accessed with volatile loads and stores.
pub struct MmioRegion {
    base: NonNull<u32>,
    len: usize,
}

// The window is device memory; every access is a single volatile operation.
unsafe impl Send for MmioRegion {}
unsafe impl Sync for MmioRegion {}

impl MmioRegion {
    /// # Safety
    ///
    /// `base` must point to a mapping of at least `len` bytes that stays
    /// valid for the lifetime of the returned value and is 4-byte aligned.
    pub unsafe fn new(base: NonNull<u32>, len: usize) -> Self {
        Self { base, len }
    }

    fn ptr(&self, offset: usize) -> *mut u32 {
        assert!(
            offset % 4 == 0 && offset + 4 <= self.len,
            "register offset {offset:#x} outside window of {:#x} bytes",
            self.len
        );
        // SAFETY: bounds and alignment checked above.
        unsafe { self.base.as_ptr().add(offset / 4) }
    }
}

impl CldmaMmio for MmioRegion {
    fn read32(&self, offset: usize) -> u32 {
        // SAFETY: `ptr` only hands out in-window aligned addresses.
        unsafe { self.ptr(offset).read_volatile() }
    }

    fn write32(&self, offset: usize, value: u32) {
        // SAFETY: `ptr` only hands out in-window aligned addresses.
        unsafe { self.ptr(offset).write_volatile(value) }
    }
}
