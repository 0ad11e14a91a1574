// Licensed under the Apache-2.0 license

//! General Packet Descriptor layout.
//!
//! A GPD is six little-endian 32-bit words:
//!
//! | word | contents                                   |
//! |------|--------------------------------------------|
//! | 0    | flags, reserved byte, RX allowed length    |
//! | 1    | next descriptor address, high half         |
//! | 2    | next descriptor address, low half          |
//! | 3    | data buffer address, high half             |
//! | 4    | data buffer address, low half              |
//! | 5    | data length, debug id                      |

use tock_registers::register_bitfields;

pub const GPD_WORDS: usize = 6;
pub const GPD_SIZE: usize = GPD_WORDS * 4;

pub const WORD_FLAGS: usize = 0;
pub const WORD_NEXT_H: usize = 1;
pub const WORD_NEXT_L: usize = 2;
pub const WORD_BUF_H: usize = 3;
pub const WORD_BUF_L: usize = 4;
pub const WORD_LEN: usize = 5;

register_bitfields![u32,
    pub GpdFlags [
        HWO OFFSET(0) NUMBITS(1) [],
        BDP OFFSET(1) NUMBITS(1) [],
        BPS OFFSET(2) NUMBITS(1) [],
        IOC OFFSET(7) NUMBITS(1) [],
        RESERVED OFFSET(8) NUMBITS(8) [],
        ALLOW_LEN OFFSET(16) NUMBITS(16) [],
    ],
    pub GpdLen [
        DATA_LEN OFFSET(0) NUMBITS(16) [],
        DEBUG_ID OFFSET(16) NUMBITS(16) [],
    ],
];

/// Largest length the 16-bit length fields can describe.
pub const GPD_MAX_LEN: usize = u16::MAX as usize;
