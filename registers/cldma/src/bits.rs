// Licensed under the Apache-2.0 license

use tock_registers::register_bitfields;

register_bitfields![u32,
    pub Config [
        ENABLE OFFSET(0) NUMBITS(1) [],
        ADDR_WIDTH OFFSET(4) NUMBITS(2) [
            Bits32 = 0,
            Bits36 = 1,
            Bits40 = 2,
            Bits64 = 3,
        ],
        SLV_LITTLE_ENDIAN OFFSET(8) NUMBITS(1) [],
    ],
    pub DmaCap [
        ADDR_BITS OFFSET(0) NUMBITS(8) [],
    ],
    pub IpBusy [
        BUSY OFFSET(0) NUMBITS(1) [],
    ],
    // Also the layout of the mask, mask-set and mask-clear registers.
    pub IntStatus [
        DONE OFFSET(0) NUMBITS(8) [],
        EMPTY OFFSET(8) NUMBITS(8) [],
        ERROR OFFSET(16) NUMBITS(8) [],
    ],
    // Also the layout of the start, resume and stop command registers.
    pub QueueMask [
        QUEUES OFFSET(0) NUMBITS(8) [],
    ],
];

/// Done, empty and error bits of one queue.
pub fn queue_irq_bits(q: usize) -> u32 {
    (IntStatus::DONE.val(1 << q) + IntStatus::EMPTY.val(1 << q) + IntStatus::ERROR.val(1 << q))
        .value
}
