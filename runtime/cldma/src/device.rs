// Licensed under the Apache-2.0 license

//! Device context owning both controller instances.

use crate::dump::CldmaDump;
use crate::error::{CldmaError, CldmaResult};
use crate::fsm::FsmEvent;
use crate::hw::{CldmaHw, HwResources};
use crate::ops::{hw_ops_for, CldmaHwOps};
use crate::trb::{OpenRequest, Trb, TxRejected, TxRequest};
use crate::virtq::{virtq, HwId, VirtqInfo};
use log::{debug, info, warn};
use std::sync::Arc;

/// The platform interrupt line shared by both instances.
pub trait IrqLine: Send + Sync {
    fn clear(&self);
    fn unmask(&self);
}

pub struct CldmaDevice {
    ops: &'static dyn CldmaHwOps,
    hws: Vec<Arc<CldmaHw>>,
    irq: Arc<dyn IrqLine>,
}

impl CldmaDevice {
    /// Brings up one instance per entry of `resources`.
    pub fn new(
        hw_version: u32,
        resources: Vec<HwResources>,
        irq: Arc<dyn IrqLine>,
    ) -> CldmaResult<Self> {
        let ops = hw_ops_for(hw_version)?;
        let mut hws: Vec<Arc<CldmaHw>> = Vec::with_capacity(resources.len());
        for res in resources {
            let created = if hws.iter().any(|hw| hw.id() == res.id) {
                Err(CldmaError::InvalidArgument("duplicate instance"))
            } else {
                ops.init(res)
            };
            let hw = match created {
                Ok(hw) => hw,
                Err(e) => {
                    for hw in &hws {
                        ops.exit(hw);
                    }
                    return Err(e);
                }
            };
            hws.push(hw);
        }
        info!("cldma: {} device with {} instances", ops.name(), hws.len());
        Ok(Self { ops, hws, irq })
    }

    pub fn ops(&self) -> &'static dyn CldmaHwOps {
        self.ops
    }

    pub fn hw(&self, id: HwId) -> Option<&Arc<CldmaHw>> {
        self.hws.iter().find(|hw| hw.id() == id)
    }

    /// Every instance reached the ready state.
    pub fn is_ready(&self) -> bool {
        !self.hws.is_empty() && self.hws.iter().all(|hw| hw.is_ready())
    }

    /// Shared interrupt handler.
    pub fn handle_irq(&self) -> bool {
        let mut handled = false;
        for hw in &self.hws {
            handled |= hw.isr();
        }
        self.irq.clear();
        self.irq.unmask();
        handled
    }

    fn route(&self, vqno: usize) -> CldmaResult<(&'static VirtqInfo, &Arc<CldmaHw>)> {
        let vq = virtq(vqno).ok_or(CldmaError::InvalidQueue(vqno))?;
        let hw = self.hw(vq.hif_id).ok_or(CldmaError::QueueNotOpen)?;
        Ok((vq, hw))
    }

    /// Opens both directions of a virtual queue.
    pub fn enable(&self, open: &OpenRequest) -> CldmaResult<()> {
        let (_, hw) = self.route(open.vqno)?;
        self.ops.txq_alloc(hw, open)?;
        if let Err(e) = self.ops.rxq_alloc(hw, open) {
            if let Err(undo) = self.ops.txq_free(hw, open.vqno) {
                warn!("vq{}: tx undo failed: {undo}", open.vqno);
            }
            return Err(e);
        }
        debug!("vq{}: enabled", open.vqno);
        Ok(())
    }

    /// Queues `req` and kicks the controller. A failed kick leaves the
    /// request on the ring, where teardown completes it.
    pub fn submit(&self, vqno: usize, req: TxRequest) -> Result<(), TxRejected> {
        let (vq, hw) = match self.route(vqno) {
            Ok(routed) => routed,
            Err(e) => return Err(TxRejected::new(e, req)),
        };
        self.ops.submit_tx(hw, vqno, req)?;
        if let Err(e) = self.ops.start_xfer(hw, vq.txqno) {
            warn!("vq{vqno}: start failed: {e}");
        }
        Ok(())
    }

    /// Closes both directions of a virtual queue; reports the first failure.
    pub fn disable(&self, vqno: usize) -> CldmaResult<()> {
        let (_, hw) = self.route(vqno)?;
        let tx = self.ops.txq_free(hw, vqno);
        let rx = self.ops.rxq_free(hw, vqno);
        debug!("vq{vqno}: disabled");
        tx.and(rx)
    }

    pub fn process_trb(&self, trb: Trb) -> CldmaResult<()> {
        match trb {
            Trb::Enable(open) => self.enable(&open),
            Trb::Tx { vqno, req } => self.submit(vqno, req).map_err(TxRejected::fail),
            Trb::Disable { vqno } => self.disable(vqno),
        }
    }

    pub fn fsm_notify(&self, event: &FsmEvent) {
        for hw in &self.hws {
            self.ops.fsm_state_listener(hw, event);
        }
    }

    /// Suspends every instance, rolling back those already suspended if
    /// one refuses.
    pub fn suspend(&self) -> CldmaResult<()> {
        for (n, hw) in self.hws.iter().enumerate() {
            if let Err(e) = self.ops.suspend(hw) {
                for done in &self.hws[..n] {
                    if let Err(e) = self.ops.resume(done, true) {
                        warn!("{}: rollback resume failed: {e}", done.name());
                    }
                }
                return Err(e);
            }
        }
        Ok(())
    }

    pub fn suspend_late(&self) {
        for hw in &self.hws {
            self.ops.suspend_late(hw);
        }
    }

    pub fn resume(&self, is_runtime: bool) -> CldmaResult<()> {
        let mut result = Ok(());
        for hw in &self.hws {
            if let Err(e) = self.ops.resume(hw, is_runtime) {
                warn!("{}: resume failed: {e}", hw.name());
                result = result.and(Err(e));
            }
        }
        result
    }

    pub fn dump(&self) -> Vec<CldmaDump> {
        self.hws.iter().map(|hw| self.ops.dump(hw)).collect()
    }
}

impl Drop for CldmaDevice {
    fn drop(&mut self) {
        for hw in &self.hws {
            self.ops.exit(hw);
        }
    }
}
