// Licensed under the Apache-2.0 license

use std::num::NonZeroUsize;
use std::ops::{Index, IndexMut};

/// Position in a [`Ring`]. Carries the ring capacity, so stepping always wraps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingIndex {
    pos: usize,
    cap: NonZeroUsize,
}

impl RingIndex {
    pub fn get(self) -> usize {
        self.pos
    }

    pub fn capacity(self) -> usize {
        self.cap.get()
    }

    pub fn succ(self) -> Self {
        self.advance(1)
    }

    pub fn advance(self, n: usize) -> Self {
        Self {
            pos: (self.pos + n % self.cap) % self.cap,
            cap: self.cap,
        }
    }

    /// Steps needed to go from `self` forward to `other`.
    pub fn distance_to(self, other: RingIndex) -> usize {
        debug_assert_eq!(self.cap, other.cap);
        (other.pos + self.cap.get() - self.pos) % self.cap
    }
}

/// Fixed-capacity circular arena.
#[derive(Debug)]
pub struct Ring<T> {
    items: Box<[T]>,
    cap: NonZeroUsize,
}

impl<T> Ring<T> {
    /// `None` for an empty vector.
    pub fn from_vec(items: Vec<T>) -> Option<Self> {
        let cap = NonZeroUsize::new(items.len())?;
        Some(Self {
            items: items.into_boxed_slice(),
            cap,
        })
    }

    pub fn capacity(&self) -> usize {
        self.cap.get()
    }

    pub fn head(&self) -> RingIndex {
        RingIndex {
            pos: 0,
            cap: self.cap,
        }
    }

    /// Walks the whole ring once, starting at `start`.
    pub fn iter_from(&self, start: RingIndex) -> impl Iterator<Item = (RingIndex, &T)> + '_ {
        (0..self.capacity()).map(move |n| {
            let idx = start.advance(n);
            (idx, &self[idx])
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        self.items.iter()
    }

    pub fn into_vec(self) -> Vec<T> {
        self.items.into_vec()
    }
}

impl<T> Index<RingIndex> for Ring<T> {
    type Output = T;

    fn index(&self, idx: RingIndex) -> &T {
        debug_assert_eq!(idx.cap, self.cap);
        &self.items[idx.pos]
    }
}

impl<T> IndexMut<RingIndex> for Ring<T> {
    fn index_mut(&mut self, idx: RingIndex) -> &mut T {
        debug_assert_eq!(idx.cap, self.cap);
        &mut self.items[idx.pos]
    }
}
