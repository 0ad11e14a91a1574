// Licensed under the Apache-2.0 license

//! Register map and descriptor layout of the CLDMA controller.
//!
//! Every CLDMA instance exposes a common block followed by one block per
//! direction. The TX and RX blocks share the same layout at different bases.

#![cfg_attr(not(test), no_std)]

pub mod bits;
pub mod gpd;

/// Number of hardware queues per direction.
pub const CLDMA_QUEUE_NUM: usize = 8;

/// Value every register read returns once the PCIe link is gone.
pub const LINK_DOWN_SENTINEL: u32 = 0xffff_ffff;

/// Bitmask covering every hardware queue of one direction.
pub const ALL_QUEUES: u32 = (1 << CLDMA_QUEUE_NUM) - 1;

/// Transfer direction as seen from the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Tx,
    Rx,
}

impl Direction {
    pub const ALL: [Direction; 2] = [Direction::Tx, Direction::Rx];

    pub const fn base(self) -> usize {
        match self {
            Direction::Tx => offsets::TX_BASE,
            Direction::Rx => offsets::RX_BASE,
        }
    }

    pub const fn index(self) -> usize {
        match self {
            Direction::Tx => 0,
            Direction::Rx => 1,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Direction::Tx => "tx",
            Direction::Rx => "rx",
        }
    }
}

/// Register offsets, in bytes from the start of the instance window.
pub mod offsets {
    use super::Direction;

    pub const CFG: usize = 0x000;
    pub const DMA_CAP: usize = 0x004;
    pub const IP_BUSY: usize = 0x008;
    pub const HW_VERSION: usize = 0x00c;

    pub const TX_BASE: usize = 0x100;
    pub const RX_BASE: usize = 0x300;

    // Relative to the direction base.
    pub const START_ADDR_L: usize = 0x000;
    pub const START_ADDR_H: usize = 0x004;
    pub const CUR_ADDR_L: usize = 0x080;
    pub const CUR_ADDR_H: usize = 0x084;
    pub const QUEUE_STRIDE: usize = 8;
    pub const STATUS: usize = 0x100;
    pub const START_CMD: usize = 0x104;
    pub const RESUME_CMD: usize = 0x108;
    pub const STOP_CMD: usize = 0x10c;
    pub const INT_STATUS: usize = 0x110;
    pub const INT_MASK: usize = 0x114;
    pub const INT_MASK_SET: usize = 0x118;
    pub const INT_MASK_CLR: usize = 0x11c;

    /// Size of one direction block.
    pub const BLOCK_SIZE: usize = 0x200;
    /// Size of the whole instance window.
    pub const WINDOW_SIZE: usize = RX_BASE + BLOCK_SIZE;

    pub const fn start_addr_l(dir: Direction, q: usize) -> usize {
        dir.base() + START_ADDR_L + q * QUEUE_STRIDE
    }

    pub const fn start_addr_h(dir: Direction, q: usize) -> usize {
        dir.base() + START_ADDR_H + q * QUEUE_STRIDE
    }

    pub const fn cur_addr_l(dir: Direction, q: usize) -> usize {
        dir.base() + CUR_ADDR_L + q * QUEUE_STRIDE
    }

    pub const fn cur_addr_h(dir: Direction, q: usize) -> usize {
        dir.base() + CUR_ADDR_H + q * QUEUE_STRIDE
    }

    pub const fn reg(dir: Direction, rel: usize) -> usize {
        dir.base() + rel
    }
}

/// Returns the direction and the in-block offset of an absolute offset, if
/// it falls inside one of the per-direction blocks.
pub fn decode_offset(offset: usize) -> Option<(Direction, usize)> {
    Direction::ALL.into_iter().find_map(|dir| {
        let base = dir.base();
        (offset >= base && offset < base + offsets::BLOCK_SIZE).then(|| (dir, offset - base))
    })
}

#[inline]
pub const fn queue_bit(q: usize) -> u32 {
    1 << q
}

/// Iterates over the queue numbers whose bit is set in `mask`.
pub fn queues_in(mask: u32) -> impl Iterator<Item = usize> {
    (0..CLDMA_QUEUE_NUM).filter(move |q| mask & queue_bit(*q) != 0)
}
