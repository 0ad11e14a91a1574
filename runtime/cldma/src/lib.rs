// Licensed under the Apache-2.0 license

//! Host-side engine for the CLDMA modem link controller.
//!
//! Each [`CldmaHw`] drives one controller: eight TX and eight RX hardware
//! queues, each a closed ring of descriptors shared with the controller.
//! Transmit requests are placed on a ring and reclaimed once hardware
//! releases them, receive rings are kept pre-armed with buffers and
//! harvested from a per-queue worker. [`CldmaDevice`] owns the instances,
//! routes virtual queues to them and runs the shared interrupt handler.

mod bm;
mod config;
mod device;
mod dma;
mod dump;
mod error;
mod exception;
mod fsm;
mod gpd;
mod hw;
mod isr;
mod mmio;
mod ops;
mod pm;
mod power;
mod qstate;
mod regs;
mod ring;
mod rxq;
mod trb;
mod txq;
mod virtq;
mod workqueue;

pub use bm::{Buffer, BufferPool, BufferPools, SlabBufferPool};
pub use config::{CldmaConfig, ConfigError, RetryConfig};
pub use device::{CldmaDevice, IrqLine};
pub use dma::{DmaDirection, DmaMapper, TrackingMapper};
pub use dump::{CldmaDump, DirDump, QueueDump};
pub use error::{CldmaError, CldmaResult};
pub use exception::{
    ChannelExceptionSink, ExceptionEvent, ExceptionLatch, ExceptionReason, ExceptionSink,
    LogExceptionSink,
};
pub use fsm::{ExceptionStage, FsmEvent, FsmState};
pub use gpd::{Gpd, GpdPool, GpdRef};
pub use hw::{CldmaHw, HwResources, ALL_IRQS};
pub use isr::IrqRate;
pub use mmio::{CldmaMmio, MmioRegion};
pub use ops::{hw_ops_for, CldmaHwOps, HwVersion, T800Ops};
pub use pm::{SleepLock, SleepToken, WakeGuard, WakeSource};
pub use qstate::{Events as QueueEvent, QueueLifecycle, States as QueueState};
pub use regs::{is_poisoned_addr, CldmaRegs, IntStatusReg};
pub use ring::{Ring, RingIndex};
pub use rxq::Rxq;
pub use trb::{OpenRequest, RxDone, RxReject, Trb, TxComplete, TxRejected, TxRequest};
pub use txq::Txq;
pub use virtq::{
    virtq, virtqs, virtqs_of, HwId, VirtqInfo, RX_REQ_NUM, TX_REQ_NUM, VQ_MTU_3_5K, VQ_MTU_63K,
    VQ_MTU_7K, VQ_NUM,
};
pub use workqueue::{Work, WorkFn, WorkQueue};
