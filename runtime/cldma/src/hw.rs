// Licensed under the Apache-2.0 license

//! One CLDMA controller instance.

use crate::bm::{BufferPools, SlabBufferPool};
use crate::config::CldmaConfig;
use crate::dma::{DmaMapper, TrackingMapper};
use crate::error::{CldmaError, CldmaResult};
use crate::exception::{
    ExceptionEvent, ExceptionLatch, ExceptionReason, ExceptionSink, LogExceptionSink,
};
use crate::gpd::GpdPool;
use crate::mmio::CldmaMmio;
use crate::pm::{SleepLock, WakeSource};
use crate::regs::CldmaRegs;
use crate::rxq::Rxq;
use crate::txq::Txq;
use crate::virtq::{HwId, VirtqInfo, VQ_MTU_3_5K, VQ_MTU_63K};
use crate::workqueue::WorkQueue;
use cldma_registers::bits::{Config, IntStatus};
use cldma_registers::{offsets, queue_bit, Direction, CLDMA_QUEUE_NUM, LINK_DOWN_SENTINEL};
use log::{error, info, warn};
use poll_common::{PollError, PollStep};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tock_registers::fields::FieldValue;

/// Every done, empty and error bit of one direction.
pub const ALL_IRQS: u32 = 0x00ff_ffff;

type QueueTable<Q> = RwLock<[Option<Arc<Q>>; CLDMA_QUEUE_NUM]>;

/// What an instance is built from.
pub struct HwResources {
    pub id: HwId,
    pub mmio: Arc<dyn CldmaMmio>,
    pub gpds: Arc<GpdPool>,
    pub pools: BufferPools,
    pub mapper: Arc<dyn DmaMapper>,
    pub exceptions: Arc<dyn ExceptionSink>,
    pub config: CldmaConfig,
}

impl HwResources {
    /// Slab pools and a descriptor pool sized from `config`, a tracking
    /// mapper and a logging exception sink.
    pub fn with_defaults(
        id: HwId,
        mmio: Arc<dyn CldmaMmio>,
        gpd_base: u64,
        config: CldmaConfig,
    ) -> Self {
        Self {
            id,
            mmio,
            gpds: GpdPool::new(gpd_base, config.dma_pool_gpds),
            pools: BufferPools {
                default: Arc::new(SlabBufferPool::new(
                    "bm-default",
                    VQ_MTU_3_5K,
                    config.default_pool_buffers,
                )),
                jumbo: Arc::new(SlabBufferPool::new(
                    "bm-jumbo",
                    VQ_MTU_63K,
                    config.jumbo_pool_buffers,
                )),
            },
            mapper: Arc::new(TrackingMapper::new()),
            exceptions: Arc::new(LogExceptionSink),
            config,
        }
    }
}

pub struct CldmaHw {
    id: HwId,
    name: String,
    pub(crate) regs: CldmaRegs,
    pub(crate) gpds: Arc<GpdPool>,
    pub(crate) pools: BufferPools,
    pub(crate) mapper: Arc<dyn DmaMapper>,
    exceptions: Arc<dyn ExceptionSink>,
    latch: ExceptionLatch,
    pub(crate) config: CldmaConfig,
    pub(crate) wq: WorkQueue,
    txqs: QueueTable<Txq>,
    rxqs: QueueTable<Rxq>,
    pub(crate) sleep_lock: SleepLock,
    pub(crate) wake: WakeSource,
    ready: AtomicBool,
    pub(crate) saved_masks: Mutex<Option<[u32; 2]>>,
}

impl CldmaHw {
    /// Builds the instance without touching hardware.
    pub fn new(res: HwResources) -> Arc<Self> {
        let name = format!("cldma{}", u8::from(res.id));
        Arc::new(Self {
            id: res.id,
            regs: CldmaRegs::new(res.mmio),
            gpds: res.gpds,
            pools: res.pools,
            mapper: res.mapper,
            exceptions: res.exceptions,
            latch: ExceptionLatch::default(),
            config: res.config,
            wq: WorkQueue::new(name.clone()),
            txqs: RwLock::default(),
            rxqs: RwLock::default(),
            sleep_lock: SleepLock::new(),
            wake: WakeSource::new(),
            ready: AtomicBool::new(false),
            saved_masks: Mutex::new(None),
            name,
        })
    }

    pub fn id(&self) -> HwId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CldmaConfig {
        &self.config
    }

    pub fn regs(&self) -> &CldmaRegs {
        &self.regs
    }

    pub fn gpd_pool(&self) -> &Arc<GpdPool> {
        &self.gpds
    }

    pub fn buffer_pools(&self) -> &BufferPools {
        &self.pools
    }

    pub fn mapper(&self) -> &Arc<dyn DmaMapper> {
        &self.mapper
    }

    pub fn sleep_lock(&self) -> &SleepLock {
        &self.sleep_lock
    }

    pub fn wake_source(&self) -> &WakeSource {
        &self.wake
    }

    /// The platform may put the link into deep sleep.
    pub fn can_sleep(&self) -> bool {
        !self.sleep_lock.is_held() && !self.wake.is_awake()
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub(crate) fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Release)
    }

    /// A link failure was reported during this device life.
    pub fn link_error_raised(&self) -> bool {
        self.latch.is_tripped()
    }

    pub(crate) fn clear_link_error(&self) {
        self.latch.reset()
    }

    pub fn txq(&self, hwq: usize) -> Option<Arc<Txq>> {
        self.txqs_read().get(hwq)?.clone()
    }

    pub fn rxq(&self, hwq: usize) -> Option<Arc<Rxq>> {
        self.rxqs_read().get(hwq)?.clone()
    }

    pub(crate) fn txqs_read(&self) -> RwLockReadGuard<'_, [Option<Arc<Txq>>; CLDMA_QUEUE_NUM]> {
        self.txqs.read().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn txqs_write(
        &self,
    ) -> RwLockWriteGuard<'_, [Option<Arc<Txq>>; CLDMA_QUEUE_NUM]> {
        self.txqs.write().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn rxqs_read(&self) -> RwLockReadGuard<'_, [Option<Arc<Rxq>>; CLDMA_QUEUE_NUM]> {
        self.rxqs.read().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn rxqs_write(
        &self,
    ) -> RwLockWriteGuard<'_, [Option<Arc<Rxq>>; CLDMA_QUEUE_NUM]> {
        self.rxqs.write().unwrap_or_else(|e| e.into_inner())
    }

    /// TX rings in the table that are not being closed.
    pub(crate) fn open_txqs(&self) -> Vec<(usize, Arc<Txq>)> {
        self.txqs_read()
            .iter()
            .enumerate()
            .filter_map(|(q, txq)| txq.clone().map(|txq| (q, txq)))
            .filter(|(_, txq)| !txq.is_stopping())
            .collect()
    }

    pub(crate) fn open_rxqs(&self) -> Vec<(usize, Arc<Rxq>)> {
        self.rxqs_read()
            .iter()
            .enumerate()
            .filter_map(|(q, rxq)| rxq.clone().map(|rxq| (q, rxq)))
            .collect()
    }

    /// Bitmask of the hardware queues open in `dir`.
    pub fn open_queues(&self, dir: Direction) -> u32 {
        match dir {
            Direction::Tx => self
                .open_txqs()
                .iter()
                .fold(0, |m, (q, _)| m | queue_bit(*q)),
            Direction::Rx => self
                .open_rxqs()
                .iter()
                .fold(0, |m, (q, _)| m | queue_bit(*q)),
        }
    }

    pub(crate) fn check_virtq(&self, vq: &VirtqInfo) -> CldmaResult<()> {
        if vq.hif_id != self.id {
            return Err(CldmaError::InvalidArgument(
                "virtual queue belongs to another instance",
            ));
        }
        Ok(())
    }

    /// Enables the controller and leaves every interrupt masked and acked.
    pub fn hw_init(&self) -> CldmaResult<()> {
        let raw = self.regs.read(offsets::CFG);
        if raw == LINK_DOWN_SENTINEL {
            return Err(self.link_down(None, offsets::CFG));
        }
        let bits = self.regs.dma_addr_bits();
        let width: FieldValue<u32, Config::Register> = match bits {
            64.. => Config::ADDR_WIDTH::Bits64,
            40..=63 => Config::ADDR_WIDTH::Bits40,
            36..=39 => Config::ADDR_WIDTH::Bits36,
            _ => Config::ADDR_WIDTH::Bits32,
        };
        let mut cfg = self.regs.config();
        cfg.modify(Config::ENABLE::SET + width + Config::SLV_LITTLE_ENDIAN::SET);
        self.regs.set_config(cfg);
        for dir in Direction::ALL {
            self.regs.mask_irq(dir, ALL_IRQS);
            self.regs.ack_irq(dir, ALL_IRQS);
        }
        info!("{}: init, {bits}-bit DMA, cfg {:#x}", self.name, cfg.get());
        Ok(())
    }

    /// Stops `queues` and waits for the controller to report them idle.
    pub(crate) fn quiesce(&self, dir: Direction, queues: u32) -> CldmaResult<()> {
        self.regs.stop_queues(dir, queues);
        let polled = self
            .config
            .quiesce_retry
            .sleep()
            .poll(|| match self.regs.queue_status(dir) {
                None => PollStep::Abort(()),
                Some(active) if active & queues == 0 => PollStep::Ready(()),
                Some(_) => PollStep::Pending,
            });
        match polled {
            Ok(()) => Ok(()),
            Err(PollError::Aborted(())) => {
                Err(self.link_down(Some(dir), offsets::reg(dir, offsets::STATUS)))
            }
            Err(PollError::Timeout { attempts }) => {
                warn!(
                    "{}: {} queues {queues:#x} still active after {attempts} polls",
                    self.name,
                    dir.name()
                );
                Err(CldmaError::Timeout)
            }
        }
    }

    /// Reports a link failure once and returns the matching error.
    pub(crate) fn link_down(&self, dir: Option<Direction>, offset: usize) -> CldmaError {
        self.raise(ExceptionReason::LinkDown { dir, offset });
        CldmaError::LinkDown
    }

    pub(crate) fn raise(&self, reason: ExceptionReason) {
        if self.latch.trip() {
            error!("{}: link error {reason:?}, escalating", self.name);
            self.exceptions.report(ExceptionEvent {
                hw: self.id,
                reason,
            });
        }
    }

    pub(crate) fn mask_all(&self) {
        for dir in Direction::ALL {
            self.regs.mask_irq(dir, ALL_IRQS);
        }
    }

    pub(crate) fn ack_all(&self) {
        for dir in Direction::ALL {
            self.regs.ack_irq(dir, ALL_IRQS);
        }
        self.regs.clear_ip_busy();
    }

    /// Unmasks the interrupts an open queue runs with.
    pub(crate) fn unmask_queue(&self, dir: Direction, q: usize) {
        let bit = queue_bit(q);
        let mut bits = IntStatus::DONE.val(bit) + IntStatus::ERROR.val(bit);
        if dir == Direction::Rx {
            bits += IntStatus::EMPTY.val(bit);
        }
        self.regs.unmask_irq(dir, bits.value);
    }

    /// Schedules TX reclaim as the interrupt path would.
    pub fn kick_tx(&self, hwq: usize) -> bool {
        self.txq(hwq).is_some_and(|txq| txq.schedule(self))
    }

    /// Schedules RX harvest as the interrupt path would.
    pub fn kick_rx(&self, hwq: usize) -> bool {
        self.rxq(hwq).is_some_and(|rxq| rxq.schedule(self))
    }

    /// Waits for every queued completion run of this instance.
    pub fn flush_work(&self) {
        for (_, txq) in self.open_txqs() {
            txq.flush();
        }
        for (_, rxq) in self.open_rxqs() {
            rxq.flush();
        }
    }

    /// Closes every open queue regardless of how many virtual queues use it.
    pub fn close_all(&self) {
        for (hwq, txq) in self.open_txqs() {
            txq.shutdown(self);
            self.forget_txq(hwq, &txq);
        }
        let rxqs: Vec<_> = self.rxqs_write().iter_mut().filter_map(Option::take).collect();
        for rxq in rxqs {
            rxq.shutdown(self);
        }
    }
}

impl Drop for CldmaHw {
    fn drop(&mut self) {
        for txq in self.txqs_read().iter().flatten() {
            txq.mark_stopping();
        }
        for rxq in self.rxqs_read().iter().flatten() {
            rxq.mark_stopping();
        }
    }
}
