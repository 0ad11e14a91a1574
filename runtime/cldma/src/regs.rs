// Licensed under the Apache-2.0 license

use crate::mmio::CldmaMmio;
use cldma_registers::bits::{Config, DmaCap, IntStatus, QueueMask};
use cldma_registers::{offsets, Direction, LINK_DOWN_SENTINEL};
use std::sync::Arc;
use tock_registers::LocalRegisterCopy;

pub type IntStatusReg = LocalRegisterCopy<u32, IntStatus::Register>;

/// Typed accessors over one controller's register window.
#[derive(Clone)]
pub struct CldmaRegs {
    mmio: Arc<dyn CldmaMmio>,
}

impl CldmaRegs {
    pub fn new(mmio: Arc<dyn CldmaMmio>) -> Self {
        Self { mmio }
    }

    pub fn read(&self, offset: usize) -> u32 {
        self.mmio.read32(offset)
    }

    pub fn write(&self, offset: usize, value: u32) {
        self.mmio.write32(offset, value)
    }

    pub fn config(&self) -> LocalRegisterCopy<u32, Config::Register> {
        LocalRegisterCopy::new(self.read(offsets::CFG))
    }

    pub fn set_config(&self, config: LocalRegisterCopy<u32, Config::Register>) {
        self.write(offsets::CFG, config.get())
    }

    pub fn dma_addr_bits(&self) -> u32 {
        LocalRegisterCopy::<u32, DmaCap::Register>::new(self.read(offsets::DMA_CAP))
            .read(DmaCap::ADDR_BITS)
    }

    pub fn hw_version(&self) -> u32 {
        self.read(offsets::HW_VERSION)
    }

    pub fn clear_ip_busy(&self) {
        self.write(offsets::IP_BUSY, 1)
    }

    /// Running-queue bitmask. `None` when the link is gone.
    pub fn queue_status(&self, dir: Direction) -> Option<u32> {
        let raw = self.read(offsets::reg(dir, offsets::STATUS));
        let status = LocalRegisterCopy::<u32, QueueMask::Register>::new(raw);
        (raw != LINK_DOWN_SENTINEL).then(|| status.read(QueueMask::QUEUES))
    }

    /// Raw interrupt status. `None` when the link is gone.
    pub fn int_status(&self, dir: Direction) -> Option<IntStatusReg> {
        let raw = self.read(offsets::reg(dir, offsets::INT_STATUS));
        (raw != LINK_DOWN_SENTINEL).then_some(LocalRegisterCopy::new(raw))
    }

    pub fn int_mask(&self, dir: Direction) -> u32 {
        self.read(offsets::reg(dir, offsets::INT_MASK))
    }

    pub fn ack_irq(&self, dir: Direction, bits: u32) {
        if bits != 0 {
            self.write(offsets::reg(dir, offsets::INT_STATUS), bits)
        }
    }

    pub fn mask_irq(&self, dir: Direction, bits: u32) {
        if bits != 0 {
            self.write(offsets::reg(dir, offsets::INT_MASK_SET), bits)
        }
    }

    pub fn unmask_irq(&self, dir: Direction, bits: u32) {
        if bits != 0 {
            self.write(offsets::reg(dir, offsets::INT_MASK_CLR), bits)
        }
    }

    /// Restores a mask register to exactly `mask`.
    pub fn restore_mask(&self, dir: Direction, mask: u32) {
        self.write(offsets::reg(dir, offsets::INT_MASK_CLR), !mask);
        self.write(offsets::reg(dir, offsets::INT_MASK_SET), mask);
    }

    /// Acks `bits` if any of them is pending. `None` when the link is gone.
    pub fn take_irq(&self, dir: Direction, bits: u32) -> Option<bool> {
        let status = self.int_status(dir)?.get() & bits;
        self.ack_irq(dir, status);
        Some(status != 0)
    }

    pub fn start_queues(&self, dir: Direction, queues: u32) {
        self.write(
            offsets::reg(dir, offsets::START_CMD),
            QueueMask::QUEUES.val(queues).value,
        )
    }

    pub fn resume_queues(&self, dir: Direction, queues: u32) {
        self.write(
            offsets::reg(dir, offsets::RESUME_CMD),
            QueueMask::QUEUES.val(queues).value,
        )
    }

    pub fn stop_queues(&self, dir: Direction, queues: u32) {
        self.write(
            offsets::reg(dir, offsets::STOP_CMD),
            QueueMask::QUEUES.val(queues).value,
        )
    }

    pub fn set_start_addr(&self, dir: Direction, q: usize, addr: u64) {
        self.mmio.write64(
            offsets::start_addr_l(dir, q),
            offsets::start_addr_h(dir, q),
            addr,
        )
    }

    pub fn start_addr(&self, dir: Direction, q: usize) -> u64 {
        self.mmio
            .read64(offsets::start_addr_l(dir, q), offsets::start_addr_h(dir, q))
    }

    /// Address of the descriptor hardware will process next.
    pub fn cur_addr(&self, dir: Direction, q: usize) -> u64 {
        self.mmio
            .read64(offsets::cur_addr_l(dir, q), offsets::cur_addr_h(dir, q))
    }
}

/// An address readback that cannot come from a live controller.
pub fn is_poisoned_addr(addr: u64) -> bool {
    addr == 0 || addr == u64::MAX || addr as u32 == LINK_DOWN_SENTINEL
}
