// Licensed under the Apache-2.0 license

//! Transmit engine.
//!
//! Submission owns `wr_idx` and the budget, reclaim owns `free_idx`. A slot
//! is written only under its own lock, and hardware ownership of its
//! descriptor moves with the HWO bit.

use crate::bm::Buffer;
use crate::dma::DmaDirection;
use crate::error::{CldmaError, CldmaResult};
use crate::gpd::GpdRef;
use crate::hw::CldmaHw;
use crate::qstate::{Events, QueueLifecycle, States};
use crate::ring::{Ring, RingIndex};
use crate::trb::{TxComplete, TxRejected, TxRequest};
use crate::virtq::{virtq, VirtqInfo};
use crate::workqueue::Work;
use cldma_registers::bits::IntStatus;
use cldma_registers::{offsets, queue_bit, Direction, CLDMA_QUEUE_NUM};
use log::{debug, info, trace, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, Weak};
use std::thread;

struct TxSlot {
    gpd: GpdRef,
    req: Option<TxRequest>,
}

struct TxSubmit {
    budget: usize,
    wr_idx: RingIndex,
}

/// How a reclaim run ended.
enum Reclaimed {
    Idle,
    Requeue,
    LinkDown,
}

pub struct Txq {
    hwq: usize,
    mtu: usize,
    ring: Ring<Mutex<TxSlot>>,
    submit: Mutex<TxSubmit>,
    free_idx: Mutex<RingIndex>,
    stopping: AtomicBool,
    started: AtomicBool,
    users: Mutex<Vec<usize>>,
    lifecycle: QueueLifecycle,
    work: Work,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl Txq {
    fn new(
        hw: &Arc<CldmaHw>,
        vq: &VirtqInfo,
        gpds: Vec<GpdRef>,
        lifecycle: QueueLifecycle,
    ) -> CldmaResult<Arc<Self>> {
        let hwq = vq.txqno;
        let slots = gpds
            .into_iter()
            .map(|gpd| Mutex::new(TxSlot { gpd, req: None }))
            .collect();
        let ring = Ring::from_vec(slots).ok_or(CldmaError::InvalidArgument("empty tx ring"))?;

        let me: Arc<OnceLock<Weak<Txq>>> = Arc::default();
        let work = {
            let me = me.clone();
            let owner = Arc::downgrade(hw);
            hw.wq
                .create(
                    &format!("txq{hwq}"),
                    Box::new(move || Txq::reclaim_work(&me, &owner)),
                )
                .map_err(|e| {
                    warn!("txq{hwq}: cannot start reclaim worker: {e}");
                    CldmaError::NoMemory
                })?
        };
        let txq = Arc::new(Self {
            hwq,
            mtu: vq.tx_mtu,
            submit: Mutex::new(TxSubmit {
                budget: ring.capacity(),
                wr_idx: ring.head(),
            }),
            free_idx: Mutex::new(ring.head()),
            ring,
            stopping: AtomicBool::new(false),
            started: AtomicBool::new(false),
            users: Mutex::new(vec![vq.vqno]),
            lifecycle,
            work,
        });
        // The worker only runs once the queue is installed, after this.
        let _ = me.set(Arc::downgrade(&txq));
        Ok(txq)
    }

    pub fn hwq(&self) -> usize {
        self.hwq
    }

    pub fn mtu(&self) -> usize {
        self.mtu
    }

    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    /// Free slots left for submission.
    pub fn budget(&self) -> usize {
        lock(&self.submit).budget
    }

    pub fn wr_idx(&self) -> RingIndex {
        lock(&self.submit).wr_idx
    }

    pub fn free_idx(&self) -> RingIndex {
        *lock(&self.free_idx)
    }

    /// Slots holding a submitted request.
    pub fn in_flight(&self) -> usize {
        self.ring
            .iter()
            .filter(|slot| lock(slot).req.is_some())
            .count()
    }

    /// Per slot: request bound, descriptor owned by hardware.
    pub fn slot_states(&self) -> Vec<(bool, bool)> {
        self.ring
            .iter()
            .map(|slot| {
                let slot = lock(slot);
                (slot.req.is_some(), slot.gpd.is_hwo())
            })
            .collect()
    }

    pub fn state(&self) -> States {
        self.lifecycle.state()
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }

    pub(crate) fn mark_stopping(&self) {
        self.stopping.store(true, Ordering::Release);
    }

    pub(crate) fn mark_unstarted(&self) {
        self.started.store(false, Ordering::Release);
    }

    pub fn users(&self) -> Vec<usize> {
        lock(&self.users).clone()
    }

    pub(crate) fn flush(&self) {
        self.work.flush()
    }

    /// Queues a reclaim run holding a sleep-lock token.
    pub(crate) fn schedule(&self, hw: &CldmaHw) -> bool {
        self.lifecycle.fire(Events::Dispatch);
        self.work.queue(Some(hw.sleep_lock.acquire()))
    }

    /// Bus address of the oldest descriptor hardware has not finished, or
    /// of the next free slot when none is outstanding.
    pub(crate) fn hw_cursor(&self) -> u64 {
        let free_idx = lock(&self.free_idx);
        let wr_idx = lock(&self.submit).wr_idx;
        let addr = self
            .ring
            .iter_from(*free_idx)
            .map(|(_, slot)| lock(slot))
            .find(|slot| slot.req.is_some() && slot.gpd.is_hwo())
            .map(|slot| slot.gpd.addr())
            .unwrap_or_else(|| lock(&self.ring[wr_idx]).gpd.addr());
        addr
    }

    /// Places `req` into the next free slot and hands it to hardware.
    pub fn submit(&self, hw: &CldmaHw, req: TxRequest) -> Result<(), TxRejected> {
        if self.is_stopping() {
            return Err(TxRejected::new(CldmaError::Stopping, req));
        }
        if req.len == 0 || req.len > self.mtu || req.len > req.buf.capacity() {
            return Err(TxRejected::new(
                CldmaError::InvalidArgument("tx length out of range"),
                req,
            ));
        }
        let mut submit = lock(&self.submit);
        if submit.budget == 0 {
            drop(submit);
            let error = match hw.regs.queue_status(Direction::Tx) {
                None => hw.link_down(
                    Some(Direction::Tx),
                    offsets::reg(Direction::Tx, offsets::STATUS),
                ),
                Some(_) => CldmaError::Busy,
            };
            return Err(TxRejected::new(error, req));
        }
        let idx = submit.wr_idx;
        {
            let mut slot = lock(&self.ring[idx]);
            debug_assert!(slot.req.is_none(), "txq{} slot {} reused", self.hwq, idx.get());
            slot.gpd.arm_tx(req.dma_addr, req.len as u16);
            trace!("txq{}: slot {} armed, {} bytes", self.hwq, idx.get(), req.len);
            slot.req = Some(req);
        }
        submit.wr_idx = idx.succ();
        submit.budget -= 1;
        Ok(())
    }

    fn reclaim_work(me: &OnceLock<Weak<Txq>>, hw: &Weak<CldmaHw>) {
        let Some(txq) = me.get().and_then(Weak::upgrade) else {
            return;
        };
        let Some(hw) = hw.upgrade() else {
            // The controller is being dropped; nothing is left to hand back.
            debug!("txq{}: controller gone, reclaim skipped", txq.hwq);
            txq.lifecycle.fire(Events::Done);
            return;
        };
        txq.reclaim(&hw);
    }

    fn reclaim(&self, hw: &CldmaHw) {
        if self.is_stopping() {
            // Slots hardware already finished still complete normally;
            // shutdown cancels whatever is left afterwards.
            let n = self.reclaim_pass(hw);
            debug!("txq{}: reclaimed {n} while stopping", self.hwq);
            self.lifecycle.fire(Events::Done);
            return;
        }
        let done_bit = IntStatus::DONE.val(queue_bit(self.hwq)).value;
        let mut repolls = 0;
        let outcome = loop {
            let n = self.reclaim_pass(hw);
            trace!("txq{}: reclaimed {n}", self.hwq);
            match hw.regs.take_irq(Direction::Tx, done_bit) {
                None => {
                    hw.link_down(
                        Some(Direction::Tx),
                        offsets::reg(Direction::Tx, offsets::INT_STATUS),
                    );
                    break Reclaimed::LinkDown;
                }
                Some(true) if repolls < hw.config.max_repoll => {
                    repolls += 1;
                    thread::yield_now();
                }
                Some(true) => break Reclaimed::Requeue,
                Some(false) => break Reclaimed::Idle,
            }
        };
        self.lifecycle.fire(Events::Done);
        match outcome {
            Reclaimed::Idle if !self.is_stopping() && !hw.link_error_raised() => {
                hw.regs.unmask_irq(Direction::Tx, done_bit)
            }
            Reclaimed::Requeue if !self.is_stopping() => {
                debug!("txq{}: still busy after {repolls} polls, requeueing", self.hwq);
                self.schedule(hw);
            }
            _ => {}
        }
    }

    /// Completes every finished slot from `free_idx` on.
    fn reclaim_pass(&self, hw: &CldmaHw) -> usize {
        let mut free_idx = lock(&self.free_idx);
        let mut n = 0;
        loop {
            let req = {
                let mut slot = lock(&self.ring[*free_idx]);
                if slot.gpd.is_hwo() {
                    break;
                }
                match slot.req.take() {
                    Some(req) => req,
                    None => break,
                }
            };
            hw.mapper.unmap(req.dma_addr, req.len, DmaDirection::ToDevice);
            *free_idx = free_idx.succ();
            lock(&self.submit).budget += 1;
            req.complete(Ok(()));
            n += 1;
        }
        n
    }

    /// Stops the queue, delivers what hardware already sent and cancels
    /// everything else still bound to a slot.
    pub(crate) fn shutdown(&self, hw: &CldmaHw) {
        self.mark_stopping();
        self.lifecycle.fire(Events::Stop);
        if !hw.link_error_raised() {
            if let Err(e) = hw.quiesce(Direction::Tx, queue_bit(self.hwq)) {
                warn!("txq{}: stop failed ({e}), closing anyway", self.hwq);
            }
        }
        let bit = queue_bit(self.hwq);
        hw.regs.mask_irq(
            Direction::Tx,
            (IntStatus::DONE.val(bit) + IntStatus::ERROR.val(bit)).value,
        );
        self.work.flush();

        let mut cancelled = 0;
        for slot in self.ring.iter() {
            let req = lock(slot).req.take();
            if let Some(req) = req {
                hw.mapper.unmap(req.dma_addr, req.len, DmaDirection::ToDevice);
                lock(&self.submit).budget += 1;
                req.complete(Err(CldmaError::Cancelled));
                cancelled += 1;
            }
        }
        self.lifecycle.fire(Events::Flushed);
        info!("txq{}: closed, {cancelled} cancelled", self.hwq);
    }
}

impl CldmaHw {
    /// Opens the TX ring behind `vqno`, or joins it if an alias opened it.
    pub fn txq_alloc(self: &Arc<Self>, vqno: usize) -> CldmaResult<Arc<Txq>> {
        let vq = virtq(vqno).ok_or(CldmaError::InvalidQueue(vqno))?;
        self.check_virtq(vq)?;
        let hwq = vq.txqno;
        if hwq >= CLDMA_QUEUE_NUM {
            return Err(CldmaError::InvalidQueue(hwq));
        }
        let mut txqs = self.txqs_write();
        if let Some(txq) = &txqs[hwq] {
            if txq.is_stopping() {
                return Err(CldmaError::Stopping);
            }
            let mut users = lock(&txq.users);
            if users.contains(&vqno) {
                return Err(CldmaError::QueueExists(vqno));
            }
            users.push(vqno);
            debug!("{}: vq{vqno} joins txq{hwq}", self.name());
            return Ok(txq.clone());
        }

        let lifecycle = QueueLifecycle::new(format!("{}-txq{hwq}", self.name()));
        lifecycle.fire(Events::Open);
        let Some(gpds) = self.gpds.alloc_chain(vq.tx_req_num) else {
            lifecycle.fire(Events::Fail);
            warn!("{}: txq{hwq}: out of descriptors", self.name());
            return Err(CldmaError::NoMemory);
        };
        let txq = Txq::new(self, vq, gpds, lifecycle)?;

        match self.quiesce(Direction::Tx, queue_bit(hwq)) {
            Err(CldmaError::LinkDown) => {
                txq.lifecycle.fire(Events::Fail);
                return Err(CldmaError::LinkDown);
            }
            Err(e) => debug!("{}: txq{hwq} reset: {e}", self.name()),
            Ok(()) => {}
        }
        let head = lock(&txq.ring[txq.ring.head()]).gpd.addr();
        self.regs.set_start_addr(Direction::Tx, hwq, head);
        self.unmask_queue(Direction::Tx, hwq);
        txq.lifecycle.fire(Events::Ready);
        txqs[hwq] = Some(txq.clone());
        info!(
            "{}: txq{hwq} open for vq{vqno}, {} slots at {head:#x}",
            self.name(),
            txq.capacity()
        );
        Ok(txq)
    }

    /// Releases `vqno`'s hold on its TX ring and closes it with the last user.
    ///
    /// The ring stays in the queue table until it is closed, so completions
    /// the interrupt path picks up meanwhile are still delivered.
    pub fn txq_free(&self, vqno: usize) -> CldmaResult<()> {
        let vq = virtq(vqno).ok_or(CldmaError::InvalidQueue(vqno))?;
        self.check_virtq(vq)?;
        let txq = {
            let txqs = self.txqs_write();
            let txq = txqs
                .get(vq.txqno)
                .and_then(Option::clone)
                .filter(|txq| !txq.is_stopping())
                .ok_or(CldmaError::QueueNotOpen)?;
            let mut users = lock(&txq.users);
            let pos = users
                .iter()
                .position(|&u| u == vqno)
                .ok_or(CldmaError::QueueNotOpen)?;
            users.remove(pos);
            if !users.is_empty() {
                return Ok(());
            }
            drop(users);
            txq.mark_stopping();
            txq
        };
        txq.shutdown(self);
        self.forget_txq(vq.txqno, &txq);
        Ok(())
    }

    /// Drops `txq` from the queue table unless it was already replaced.
    pub(crate) fn forget_txq(&self, hwq: usize, txq: &Arc<Txq>) {
        let mut txqs = self.txqs_write();
        if txqs[hwq].as_ref().is_some_and(|cur| Arc::ptr_eq(cur, txq)) {
            txqs[hwq] = None;
        }
    }

    /// Queues `req` on the TX ring behind `vqno`.
    pub fn submit_tx(&self, vqno: usize, req: TxRequest) -> Result<(), TxRejected> {
        let txq = virtq(vqno)
            .filter(|vq| vq.hif_id == self.id())
            .and_then(|vq| self.txq(vq.txqno));
        match txq {
            Some(txq) => txq.submit(self, req),
            None => Err(TxRejected::new(CldmaError::QueueNotOpen, req)),
        }
    }

    /// Makes sure hardware is walking the TX ring of `hwq`.
    pub fn start_xfer(&self, hwq: usize) -> CldmaResult<()> {
        let txq = self.txq(hwq).ok_or(CldmaError::QueueNotOpen)?;
        if txq.is_stopping() {
            return Err(CldmaError::Stopping);
        }
        let _pm = self.sleep_lock.acquire();
        let Some(active) = self.regs.queue_status(Direction::Tx) else {
            return Err(self.link_down(
                Some(Direction::Tx),
                offsets::reg(Direction::Tx, offsets::STATUS),
            ));
        };
        let bit = queue_bit(hwq);
        if active & bit != 0 {
            return Ok(());
        }
        if txq.started.swap(true, Ordering::AcqRel) {
            self.regs.resume_queues(Direction::Tx, bit);
        } else {
            self.regs.start_queues(Direction::Tx, bit);
        }
        Ok(())
    }

    /// Maps `buf` for transmission. On failure the buffer goes back through
    /// `on_complete`.
    pub fn prepare_tx(
        &self,
        buf: Buffer,
        on_complete: TxComplete,
    ) -> CldmaResult<TxRequest> {
        let len = buf.len();
        match self.mapper.map(&buf, len, DmaDirection::ToDevice) {
            Ok(dma_addr) => Ok(TxRequest {
                buf,
                dma_addr,
                len,
                on_complete,
            }),
            Err(e) => {
                on_complete(buf, Err(e));
                Err(e)
            }
        }
    }
}
