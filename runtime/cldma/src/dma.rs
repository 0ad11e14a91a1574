// Licensed under the Apache-2.0 license

use crate::bm::Buffer;
use crate::error::{CldmaError, CldmaResult};
use log::{error, trace};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaDirection {
    ToDevice,
    FromDevice,
}

/// Makes buffers visible to the controller.
pub trait DmaMapper: Send + Sync {
    /// Maps the first `len` bytes of `buf` and returns the bus address.
    fn map(&self, buf: &Buffer, len: usize, dir: DmaDirection) -> CldmaResult<u64>;
    fn unmap(&self, addr: u64, len: usize, dir: DmaDirection);
}

#[derive(Debug, Clone, Copy)]
struct Mapping {
    len: usize,
    dir: DmaDirection,
}

/// Hands out synthetic bus addresses and keeps a ledger of live mappings.
pub struct TrackingMapper {
    next: AtomicU64,
    live: Mutex<HashMap<u64, Mapping>>,
    maps: AtomicUsize,
    stray_unmaps: AtomicUsize,
}

const MAP_BASE: u64 = 0x1_0000_0000;
const MAP_ALIGN: u64 = 0x1_0000;

impl Default for TrackingMapper {
    fn default() -> Self {
        Self::new()
    }
}

impl TrackingMapper {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(MAP_BASE),
            live: Mutex::new(HashMap::new()),
            maps: AtomicUsize::new(0),
            stray_unmaps: AtomicUsize::new(0),
        }
    }

    /// Mappings not yet unmapped.
    pub fn live(&self) -> usize {
        self.live.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_mapped(&self, addr: u64) -> bool {
        self.live
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(&addr)
    }

    /// Total successful map calls.
    pub fn maps(&self) -> usize {
        self.maps.load(Ordering::Acquire)
    }

    /// Unmaps of addresses that were not mapped, or mapped differently.
    pub fn stray_unmaps(&self) -> usize {
        self.stray_unmaps.load(Ordering::Acquire)
    }
}

impl DmaMapper for TrackingMapper {
    fn map(&self, buf: &Buffer, len: usize, dir: DmaDirection) -> CldmaResult<u64> {
        if len == 0 || len > buf.capacity() {
            return Err(CldmaError::MapFailed);
        }
        let span = (len as u64).div_ceil(MAP_ALIGN) * MAP_ALIGN;
        let addr = self.next.fetch_add(span, Ordering::AcqRel);
        self.live
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(addr, Mapping { len, dir });
        self.maps.fetch_add(1, Ordering::AcqRel);
        trace!("map {len} bytes {dir:?} at {addr:#x}");
        Ok(addr)
    }

    fn unmap(&self, addr: u64, len: usize, dir: DmaDirection) {
        let removed = self
            .live
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&addr);
        match removed {
            Some(m) if m.len == len && m.dir == dir => trace!("unmap {addr:#x}"),
            other => {
                error!("unmap of {addr:#x} ({len} bytes, {dir:?}) does not match {other:?}");
                self.stray_unmaps.fetch_add(1, Ordering::AcqRel);
            }
        }
    }
}
