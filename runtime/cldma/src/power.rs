// Licensed under the Apache-2.0 license

use crate::error::{CldmaError, CldmaResult};
use crate::hw::CldmaHw;
use cldma_registers::Direction;
use log::{info, warn};

impl CldmaHw {
    /// Quiesces every open queue and masks the controller. Refused while
    /// completion work still holds the sleep lock.
    pub fn suspend(&self) -> CldmaResult<()> {
        if self.sleep_lock.is_held() {
            return Err(CldmaError::Busy);
        }
        for dir in Direction::ALL {
            let open = self.open_queues(dir);
            if open == 0 {
                continue;
            }
            match self.quiesce(dir, open) {
                Err(CldmaError::LinkDown) => return Err(CldmaError::LinkDown),
                Err(e) => warn!("{}: {} stop before suspend: {e}", self.name(), dir.name()),
                Ok(()) => {}
            }
        }
        let masks = [
            self.regs.int_mask(Direction::Tx),
            self.regs.int_mask(Direction::Rx),
        ];
        *self.saved_masks.lock().unwrap_or_else(|e| e.into_inner()) = Some(masks);
        self.mask_all();
        info!("{}: suspended", self.name());
        Ok(())
    }

    /// Clears whatever status the quiesce left behind.
    pub fn suspend_late(&self) {
        self.ack_all();
    }

    /// Brings the controller back. A system resume lost the register
    /// contents, so the controller is reinitialised and every open ring is
    /// reprogrammed at the position its engine expects.
    pub fn resume(&self, is_runtime: bool) -> CldmaResult<()> {
        if !is_runtime {
            self.hw_init()?;
            self.reprogram_queues();
        }
        let saved = self
            .saved_masks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        match saved {
            Some([tx, rx]) => {
                self.regs.restore_mask(Direction::Tx, tx);
                self.regs.restore_mask(Direction::Rx, rx);
            }
            None => self.unmask_open_queues(),
        }
        self.restart_queues(!is_runtime);
        info!(
            "{}: resumed ({})",
            self.name(),
            if is_runtime { "runtime" } else { "system" }
        );
        Ok(())
    }

    /// Points every open ring's start address at its engine cursor.
    pub(crate) fn reprogram_queues(&self) {
        for (q, txq) in self.open_txqs() {
            self.regs.set_start_addr(Direction::Tx, q, txq.hw_cursor());
            txq.mark_unstarted();
        }
        for (q, rxq) in self.open_rxqs() {
            self.regs.set_start_addr(Direction::Rx, q, rxq.hw_cursor());
        }
    }

    pub(crate) fn unmask_open_queues(&self) {
        for (q, _) in self.open_txqs() {
            self.unmask_queue(Direction::Tx, q);
        }
        for (q, _) in self.open_rxqs() {
            self.unmask_queue(Direction::Rx, q);
        }
    }

    /// Restarts RX, and TX rings that still have work outstanding.
    pub(crate) fn restart_queues(&self, reprogrammed: bool) {
        let rx = self.open_queues(Direction::Rx);
        if rx != 0 {
            if reprogrammed {
                self.regs.start_queues(Direction::Rx, rx);
            } else {
                self.regs.resume_queues(Direction::Rx, rx);
            }
        }
        for (q, txq) in self.open_txqs() {
            if txq.in_flight() > 0 {
                if let Err(e) = self.start_xfer(q) {
                    warn!("{}: txq{q} restart: {e}", self.name());
                }
            }
        }
    }
}
