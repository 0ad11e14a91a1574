// Licensed under the Apache-2.0 license

//! Hardware descriptors and the per-instance pool they are carved from.
//!
//! Descriptor memory is shared with the controller, so every word is an
//! atomic and ownership moves with the HWO bit: the host only touches a
//! descriptor while HWO is clear, and publishes its writes with a release
//! store of the flag word.

use cldma_registers::gpd::{
    GpdFlags, GpdLen, GPD_SIZE, WORD_BUF_H, WORD_BUF_L, WORD_FLAGS, WORD_LEN, WORD_NEXT_H,
    WORD_NEXT_L,
};
use log::trace;
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{fence, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tock_registers::LocalRegisterCopy;

pub type GpdFlagsReg = LocalRegisterCopy<u32, GpdFlags::Register>;

#[repr(C, align(8))]
#[derive(Default)]
pub struct Gpd {
    words: [AtomicU32; 6],
}

const _: () = assert!(std::mem::size_of::<Gpd>() == GPD_SIZE);

impl Gpd {
    fn load(&self, w: usize) -> u32 {
        self.words[w].load(Ordering::Relaxed)
    }

    fn store(&self, w: usize, v: u32) {
        self.words[w].store(v, Ordering::Relaxed)
    }

    pub fn flags(&self) -> GpdFlagsReg {
        LocalRegisterCopy::new(self.words[WORD_FLAGS].load(Ordering::Acquire))
    }

    pub fn is_hwo(&self) -> bool {
        self.flags().is_set(GpdFlags::HWO)
    }

    /// Host-owned, no buffer, no length.
    pub fn reset(&self) {
        for w in &self.words {
            w.store(0, Ordering::Relaxed);
        }
        fence(Ordering::Release);
    }

    pub fn next(&self) -> u64 {
        ((self.load(WORD_NEXT_H) as u64) << 32) | self.load(WORD_NEXT_L) as u64
    }

    pub fn set_next(&self, addr: u64) {
        self.store(WORD_NEXT_H, (addr >> 32) as u32);
        self.store(WORD_NEXT_L, addr as u32);
    }

    pub fn buffer(&self) -> u64 {
        ((self.load(WORD_BUF_H) as u64) << 32) | self.load(WORD_BUF_L) as u64
    }

    pub fn data_len(&self) -> usize {
        LocalRegisterCopy::<u32, GpdLen::Register>::new(self.load(WORD_LEN))
            .read(GpdLen::DATA_LEN) as usize
    }

    pub fn allow_len(&self) -> usize {
        self.flags().read(GpdFlags::ALLOW_LEN) as usize
    }

    /// Hands a TX buffer to hardware. The address and length land before HWO.
    pub fn arm_tx(&self, buf: u64, len: u16) {
        self.store(WORD_BUF_H, (buf >> 32) as u32);
        self.store(WORD_BUF_L, buf as u32);
        self.store(WORD_LEN, GpdLen::DATA_LEN.val(len as u32).value);
        fence(Ordering::Release);
        self.words[WORD_FLAGS].store(
            (GpdFlags::HWO::SET + GpdFlags::IOC::SET).value,
            Ordering::Release,
        );
    }

    /// Hands an empty RX buffer of `allow` bytes to hardware.
    pub fn arm_rx(&self, buf: u64, allow: u16) {
        self.store(WORD_BUF_H, (buf >> 32) as u32);
        self.store(WORD_BUF_L, buf as u32);
        self.store(WORD_LEN, 0);
        fence(Ordering::Release);
        self.words[WORD_FLAGS].store(
            (GpdFlags::HWO::SET + GpdFlags::IOC::SET + GpdFlags::ALLOW_LEN.val(allow as u32))
                .value,
            Ordering::Release,
        );
    }

    /// Controller side of the handshake: records `len` and gives the
    /// descriptor back to the host.
    pub fn complete(&self, len: u16) {
        let mut len_word = LocalRegisterCopy::<u32, GpdLen::Register>::new(self.load(WORD_LEN));
        len_word.modify(GpdLen::DATA_LEN.val(len as u32));
        self.store(WORD_LEN, len_word.get());
        self.words[WORD_FLAGS].fetch_and(!GpdFlags::HWO::SET.value, Ordering::Release);
    }

    /// Controller side of TX completion; the length is left untouched.
    pub fn release(&self) {
        self.words[WORD_FLAGS].fetch_and(!GpdFlags::HWO::SET.value, Ordering::Release);
    }
}

impl fmt::Debug for Gpd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gpd")
            .field("flags", &format_args!("{:#x}", self.flags().get()))
            .field("next", &format_args!("{:#x}", self.next()))
            .field("buffer", &format_args!("{:#x}", self.buffer()))
            .field("data_len", &self.data_len())
            .finish()
    }
}

/// Fixed-capacity descriptor pool with stable bus addresses.
pub struct GpdPool {
    base: u64,
    gpds: Box<[Gpd]>,
    free: Mutex<Vec<usize>>,
    in_use: AtomicUsize,
}

impl GpdPool {
    pub fn new(base: u64, capacity: usize) -> Arc<Self> {
        assert!(base % 8 == 0, "descriptor pool base {base:#x} is misaligned");
        Arc::new(Self {
            base,
            gpds: (0..capacity).map(|_| Gpd::default()).collect(),
            free: Mutex::new((0..capacity).rev().collect()),
            in_use: AtomicUsize::new(0),
        })
    }

    pub fn capacity(&self) -> usize {
        self.gpds.len()
    }

    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::Acquire)
    }

    pub fn alloc(self: &Arc<Self>) -> Option<GpdRef> {
        let index = self
            .free
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop()?;
        self.gpds[index].reset();
        self.in_use.fetch_add(1, Ordering::AcqRel);
        trace!("gpd {:#x} allocated", self.addr_of(index));
        Some(GpdRef {
            pool: self.clone(),
            index,
        })
    }

    /// Allocates `n` descriptors linked into a closed loop, the last one
    /// pointing back at the first. Nothing stays allocated on failure.
    pub fn alloc_chain(self: &Arc<Self>, n: usize) -> Option<Vec<GpdRef>> {
        let chain = (0..n).map(|_| self.alloc()).collect::<Option<Vec<_>>>()?;
        for (i, gpd) in chain.iter().enumerate() {
            gpd.set_next(chain[(i + 1) % n].addr());
        }
        Some(chain)
    }

    fn addr_of(&self, index: usize) -> u64 {
        self.base + (index * GPD_SIZE) as u64
    }

    /// Looks up the descriptor living at bus address `addr`.
    pub fn resolve(&self, addr: u64) -> Option<&Gpd> {
        let off = addr.checked_sub(self.base)?;
        if off % GPD_SIZE as u64 != 0 {
            return None;
        }
        self.gpds.get((off / GPD_SIZE as u64) as usize)
    }

    fn release(&self, index: usize) {
        self.gpds[index].reset();
        self.free
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(index);
        self.in_use.fetch_sub(1, Ordering::AcqRel);
    }
}

/// An allocated descriptor; goes back to its pool on drop.
pub struct GpdRef {
    pool: Arc<GpdPool>,
    index: usize,
}

impl GpdRef {
    pub fn addr(&self) -> u64 {
        self.pool.addr_of(self.index)
    }
}

impl Deref for GpdRef {
    type Target = Gpd;

    fn deref(&self) -> &Gpd {
        &self.pool.gpds[self.index]
    }
}

impl Drop for GpdRef {
    fn drop(&mut self) {
        self.pool.release(self.index);
    }
}

impl fmt::Debug for GpdRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GpdRef({:#x}, {:?})", self.addr(), **self)
    }
}
