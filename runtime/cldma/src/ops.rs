// Licensed under the Apache-2.0 license

//! Per-generation operation table.

use crate::dump::CldmaDump;
use crate::error::{CldmaError, CldmaResult};
use crate::fsm::FsmEvent;
use crate::hw::{CldmaHw, HwResources};
use crate::rxq::Rxq;
use crate::trb::{OpenRequest, TxRejected, TxRequest};
use crate::txq::Txq;
use log::info;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::sync::Arc;

/// Controller generations this driver knows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u32)]
pub enum HwVersion {
    T800 = 0x0800,
}

pub trait CldmaHwOps: Send + Sync {
    fn name(&self) -> &'static str;

    /// Creates an instance and brings its controller up.
    fn init(&self, res: HwResources) -> CldmaResult<Arc<CldmaHw>>;

    /// Closes every queue and masks the controller.
    fn exit(&self, hw: &Arc<CldmaHw>);

    fn txq_alloc(&self, hw: &Arc<CldmaHw>, open: &OpenRequest) -> CldmaResult<Arc<Txq>>;

    fn rxq_alloc(&self, hw: &Arc<CldmaHw>, open: &OpenRequest) -> CldmaResult<Arc<Rxq>>;

    fn txq_free(&self, hw: &Arc<CldmaHw>, vqno: usize) -> CldmaResult<()>;

    fn rxq_free(&self, hw: &Arc<CldmaHw>, vqno: usize) -> CldmaResult<()>;

    fn submit_tx(&self, hw: &Arc<CldmaHw>, vqno: usize, req: TxRequest)
        -> Result<(), TxRejected>;

    fn start_xfer(&self, hw: &Arc<CldmaHw>, hwq: usize) -> CldmaResult<()>;

    fn suspend(&self, hw: &Arc<CldmaHw>) -> CldmaResult<()>;

    fn suspend_late(&self, hw: &Arc<CldmaHw>);

    fn resume(&self, hw: &Arc<CldmaHw>, is_runtime: bool) -> CldmaResult<()>;

    fn fsm_state_listener(&self, hw: &Arc<CldmaHw>, event: &FsmEvent);

    fn dump(&self, hw: &Arc<CldmaHw>) -> CldmaDump;
}

/// Operations of the T800 generation.
pub struct T800Ops;

impl CldmaHwOps for T800Ops {
    fn name(&self) -> &'static str {
        "t800"
    }

    fn init(&self, res: HwResources) -> CldmaResult<Arc<CldmaHw>> {
        let hw = CldmaHw::new(res);
        hw.hw_init()?;
        Ok(hw)
    }

    fn exit(&self, hw: &Arc<CldmaHw>) {
        hw.set_ready(false);
        hw.close_all();
        hw.mask_all();
        info!("{}: exit", hw.name());
    }

    fn txq_alloc(&self, hw: &Arc<CldmaHw>, open: &OpenRequest) -> CldmaResult<Arc<Txq>> {
        hw.txq_alloc(open.vqno)
    }

    fn rxq_alloc(&self, hw: &Arc<CldmaHw>, open: &OpenRequest) -> CldmaResult<Arc<Rxq>> {
        hw.rxq_alloc(open.vqno, open.rx_done.clone())
    }

    fn txq_free(&self, hw: &Arc<CldmaHw>, vqno: usize) -> CldmaResult<()> {
        hw.txq_free(vqno)
    }

    fn rxq_free(&self, hw: &Arc<CldmaHw>, vqno: usize) -> CldmaResult<()> {
        hw.rxq_free(vqno)
    }

    fn submit_tx(
        &self,
        hw: &Arc<CldmaHw>,
        vqno: usize,
        req: TxRequest,
    ) -> Result<(), TxRejected> {
        hw.submit_tx(vqno, req)
    }

    fn start_xfer(&self, hw: &Arc<CldmaHw>, hwq: usize) -> CldmaResult<()> {
        hw.start_xfer(hwq)
    }

    fn suspend(&self, hw: &Arc<CldmaHw>) -> CldmaResult<()> {
        hw.suspend()
    }

    fn suspend_late(&self, hw: &Arc<CldmaHw>) {
        hw.suspend_late()
    }

    fn resume(&self, hw: &Arc<CldmaHw>, is_runtime: bool) -> CldmaResult<()> {
        hw.resume(is_runtime)
    }

    fn fsm_state_listener(&self, hw: &Arc<CldmaHw>, event: &FsmEvent) {
        hw.on_fsm_event(event)
    }

    fn dump(&self, hw: &Arc<CldmaHw>) -> CldmaDump {
        hw.dump()
    }
}

static T800: T800Ops = T800Ops;

/// Looks up the operation table for a raw hardware version.
pub fn hw_ops_for(version: u32) -> CldmaResult<&'static dyn CldmaHwOps> {
    match HwVersion::try_from(version) {
        Ok(HwVersion::T800) => Ok(&T800),
        Err(_) => Err(CldmaError::Unsupported(version)),
    }
}
