// Licensed under the Apache-2.0 license

//! Packet buffers and the pools they come from.

use crate::virtq::VQ_MTU_3_5K;
use log::debug;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// A packet buffer. `len` is the payload length inside `data`.
pub struct Buffer {
    data: Box<[u8]>,
    len: usize,
}

impl Buffer {
    pub fn new(size: usize) -> Self {
        Self {
            data: vec![0; size].into_boxed_slice(),
            len: 0,
        }
    }

    pub fn from_slice(payload: &[u8]) -> Self {
        Self {
            data: payload.into(),
            len: payload.len(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn set_len(&mut self, len: usize) {
        self.len = len.min(self.data.len());
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// The whole backing storage, regardless of `len`.
    pub fn storage_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("len", &self.len)
            .field("capacity", &self.data.len())
            .finish()
    }
}

pub trait BufferPool: Send + Sync {
    fn alloc(&self) -> Option<Buffer>;
    fn free(&self, buf: Buffer);
    /// Capacity of every buffer this pool hands out.
    fn buf_size(&self) -> usize;
}

/// Bounded pool of equally sized buffers, recycled through a free list.
pub struct SlabBufferPool {
    name: &'static str,
    buf_size: usize,
    capacity: usize,
    free: Mutex<Vec<Buffer>>,
    outstanding: AtomicUsize,
}

impl SlabBufferPool {
    pub fn new(name: &'static str, buf_size: usize, capacity: usize) -> Self {
        Self {
            name,
            buf_size,
            capacity,
            free: Mutex::new(Vec::new()),
            outstanding: AtomicUsize::new(0),
        }
    }

    /// Buffers currently handed out.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl BufferPool for SlabBufferPool {
    fn alloc(&self) -> Option<Buffer> {
        let mut free = self.free.lock().unwrap_or_else(|e| e.into_inner());
        let buf = match free.pop() {
            Some(buf) => buf,
            None if self.outstanding() < self.capacity => Buffer::new(self.buf_size),
            None => {
                debug!("{}: pool exhausted", self.name);
                return None;
            }
        };
        self.outstanding.fetch_add(1, Ordering::AcqRel);
        Some(buf)
    }

    fn free(&self, mut buf: Buffer) {
        if buf.capacity() != self.buf_size {
            debug!("{}: dropping foreign buffer of {} bytes", self.name, buf.capacity());
            return;
        }
        buf.set_len(0);
        self.outstanding.fetch_sub(1, Ordering::AcqRel);
        self.free.lock().unwrap_or_else(|e| e.into_inner()).push(buf);
    }

    fn buf_size(&self) -> usize {
        self.buf_size
    }
}

/// The pools an instance draws RX buffers from.
#[derive(Clone)]
pub struct BufferPools {
    pub default: Arc<dyn BufferPool>,
    pub jumbo: Arc<dyn BufferPool>,
}

impl BufferPools {
    pub fn for_mtu(&self, mtu: usize) -> &Arc<dyn BufferPool> {
        if mtu > VQ_MTU_3_5K {
            &self.jumbo
        } else {
            &self.default
        }
    }
}
