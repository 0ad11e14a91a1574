// Licensed under the Apache-2.0 license

//! Requests handed to the engine by the virtual-queue router.

use crate::bm::Buffer;
use crate::error::CldmaError;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Receives the buffer back once the controller is done with it.
pub type TxComplete = Box<dyn FnOnce(Buffer, Result<(), CldmaError>) + Send>;

/// Upper-layer receive callback: buffer and received length.
pub type RxDone = Arc<dyn Fn(Buffer, usize) -> Result<(), RxReject> + Send + Sync>;

/// Non-success verdicts of the receive callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxReject {
    /// Stop harvesting for this pass.
    Backpressure,
    /// Consumer specific status; harvesting continues.
    Other(i32),
}

pub struct TxRequest {
    pub buf: Buffer,
    /// Bus address of `buf`, mapped by the caller.
    pub dma_addr: u64,
    pub len: usize,
    pub on_complete: TxComplete,
}

impl fmt::Debug for TxRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TxRequest")
            .field("dma_addr", &format_args!("{:#x}", self.dma_addr))
            .field("len", &self.len)
            .finish()
    }
}

impl TxRequest {
    /// Delivers a terminal status to the submitter.
    pub fn complete(self, status: Result<(), CldmaError>) {
        (self.on_complete)(self.buf, status)
    }
}

/// A submission the engine did not accept; the request is handed back.
#[derive(Error, Debug)]
#[error("tx submission rejected: {error}")]
pub struct TxRejected {
    pub error: CldmaError,
    pub req: TxRequest,
}

impl TxRejected {
    pub fn new(error: CldmaError, req: TxRequest) -> Self {
        Self { error, req }
    }

    /// Drops the request after telling its submitter.
    pub fn fail(self) -> CldmaError {
        let error = self.error;
        self.req.complete(Err(error));
        error
    }
}

#[derive(Clone)]
pub struct OpenRequest {
    pub vqno: usize,
    pub rx_done: RxDone,
}

impl fmt::Debug for OpenRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenRequest").field("vqno", &self.vqno).finish()
    }
}

/// Transaction request block.
#[derive(Debug)]
pub enum Trb {
    Enable(OpenRequest),
    Tx { vqno: usize, req: TxRequest },
    Disable { vqno: usize },
}

impl Trb {
    pub fn vqno(&self) -> usize {
        match self {
            Trb::Enable(open) => open.vqno,
            Trb::Tx { vqno, .. } | Trb::Disable { vqno } => *vqno,
        }
    }
}
