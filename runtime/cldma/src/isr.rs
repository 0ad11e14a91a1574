// Licensed under the Apache-2.0 license

//! Top half. Runs in interrupt context, so it only masks, acks and
//! schedules; all ring work happens in the per-queue work items.

use crate::hw::CldmaHw;
use crate::regs::IntStatusReg;
use cldma_registers::bits::IntStatus;
use cldma_registers::{offsets, queues_in, Direction};
use log::{debug, trace, warn};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Smoothed gap between receive interrupts of one queue.
#[derive(Default)]
pub struct IrqRate {
    inner: Mutex<RateState>,
}

#[derive(Default)]
struct RateState {
    last: Option<Instant>,
    avg_gap: Option<Duration>,
}

impl IrqRate {
    pub fn record(&self) {
        self.record_at(Instant::now())
    }

    pub fn record_at(&self, now: Instant) {
        let mut st = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(last) = st.last {
            let gap = now.saturating_duration_since(last);
            st.avg_gap = Some(match st.avg_gap {
                None => gap,
                Some(avg) => (avg * 7 + gap) / 8,
            });
        }
        st.last = Some(now);
    }

    pub fn avg_gap(&self) -> Option<Duration> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).avg_gap
    }

    /// Interrupts arrive closer together than `threshold` on average.
    pub fn is_busy(&self, threshold: Duration) -> bool {
        self.avg_gap().is_some_and(|gap| gap < threshold)
    }
}

impl CldmaHw {
    /// Services both directions. Returns true if any unmasked status bit
    /// was pending.
    pub fn isr(&self) -> bool {
        let tx = self.tx_isr();
        let rx = self.rx_isr();
        tx || rx
    }

    /// Unmasked pending bits, or `None` after reporting a dead link.
    fn pending(&self, dir: Direction) -> Option<IntStatusReg> {
        let Some(status) = self.regs.int_status(dir) else {
            self.link_down(Some(dir), offsets::reg(dir, offsets::INT_STATUS));
            return None;
        };
        let active = status.get() & !self.regs.int_mask(dir);
        trace!(
            "{}: {} isr status {:#x} active {active:#x}",
            self.name(),
            dir.name(),
            status.get()
        );
        Some(IntStatusReg::new(active))
    }

    /// Error bits are acked and stay masked until the queue is reopened.
    fn error_irq(&self, dir: Direction, active: IntStatusReg) {
        let queues = active.read(IntStatus::ERROR);
        if queues != 0 {
            let bits = IntStatus::ERROR.val(queues).value;
            warn!("{}: {} error on queues {queues:#x}", self.name(), dir.name());
            self.regs.ack_irq(dir, bits);
            self.regs.mask_irq(dir, bits);
        }
    }

    fn tx_isr(&self) -> bool {
        let Some(active) = self.pending(Direction::Tx) else {
            return false;
        };
        if active.get() == 0 {
            return false;
        }
        self.error_irq(Direction::Tx, active);

        let done = active.read(IntStatus::DONE);
        if done != 0 {
            let bits = IntStatus::DONE.val(done).value;
            self.regs.mask_irq(Direction::Tx, bits);
            self.regs.ack_irq(Direction::Tx, bits);
            for q in queues_in(done) {
                match self.txq(q) {
                    Some(txq) => {
                        txq.schedule(self);
                    }
                    None => debug!("{}: tx done on closed queue {q}", self.name()),
                }
            }
        }
        true
    }

    fn rx_isr(&self) -> bool {
        let Some(active) = self.pending(Direction::Rx) else {
            return false;
        };
        if active.get() == 0 {
            return false;
        }
        self.error_irq(Direction::Rx, active);

        let empty = active.read(IntStatus::EMPTY);
        if empty != 0 {
            self.regs.ack_irq(Direction::Rx, IntStatus::EMPTY.val(empty).value);
            for q in queues_in(empty) {
                // Harvest already re-armed the slot hardware stopped on.
                if self.rxq(q).is_some_and(|rxq| rxq.cursor_armed(self)) {
                    self.regs
                        .resume_queues(Direction::Rx, cldma_registers::queue_bit(q));
                }
            }
        }

        let done = active.read(IntStatus::DONE);
        if done != 0 {
            let bits = IntStatus::DONE.val(done).value;
            self.regs.mask_irq(Direction::Rx, bits);
            self.regs.ack_irq(Direction::Rx, bits);
            for q in queues_in(done) {
                match self.rxq(q) {
                    Some(rxq) => {
                        rxq.irq_rate.record();
                        rxq.schedule(self);
                    }
                    None => debug!("{}: rx done on closed queue {q}", self.name()),
                }
            }
        }
        true
    }
}
