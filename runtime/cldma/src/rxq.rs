// Licensed under the Apache-2.0 license

//! Receive engine.
//!
//! Every slot is pre-armed with a mapped buffer. Harvest walks from
//! `free_idx`, hands finished buffers up, and re-arms each slot with a fresh
//! buffer before moving on. A slot whose replenish failed stays unarmed and
//! is retried on the next pass.

use crate::bm::{Buffer, BufferPool};
use crate::dma::DmaDirection;
use crate::error::{CldmaError, CldmaResult};
use crate::exception::ExceptionReason;
use crate::gpd::{Gpd, GpdRef};
use crate::hw::CldmaHw;
use crate::isr::IrqRate;
use crate::qstate::{Events, QueueLifecycle, States};
use crate::regs::is_poisoned_addr;
use crate::ring::{Ring, RingIndex};
use crate::trb::{RxDone, RxReject};
use crate::virtq::{virtq, VirtqInfo};
use crate::workqueue::Work;
use cldma_registers::bits::IntStatus;
use cldma_registers::gpd::GPD_MAX_LEN;
use cldma_registers::{offsets, queue_bit, Direction, CLDMA_QUEUE_NUM};
use log::{debug, info, trace, warn};
use poll_common::PollStep;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, Weak};
use std::thread;

struct Mapped {
    buf: Buffer,
    addr: u64,
}

struct RxSlot {
    gpd: GpdRef,
    buf: Option<Mapped>,
}

struct RxRing {
    slots: Ring<RxSlot>,
    free_idx: RingIndex,
}

/// One virtual queue receiving through this ring.
struct RxUser {
    vqno: usize,
    rx_done: RxDone,
}

enum Harvested {
    Idle,
    Requeue,
    Aborted,
}

pub struct Rxq {
    hwq: usize,
    mtu: usize,
    pool: Arc<dyn BufferPool>,
    ring: Mutex<RxRing>,
    stopping: AtomicBool,
    /// The oldest user receives everything the ring collects.
    users: Mutex<Vec<RxUser>>,
    lifecycle: QueueLifecycle,
    pub(crate) irq_rate: IrqRate,
    delivered: AtomicU64,
    work: Work,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Pulls a buffer, maps it and hands `gpd` to hardware.
fn arm_slot(hw: &CldmaHw, pool: &dyn BufferPool, mtu: usize, gpd: &Gpd) -> CldmaResult<Mapped> {
    let buf = pool.alloc().ok_or(CldmaError::NoMemory)?;
    let addr = match hw.mapper.map(&buf, mtu, DmaDirection::FromDevice) {
        Ok(addr) => addr,
        Err(e) => {
            pool.free(buf);
            return Err(e);
        }
    };
    gpd.arm_rx(addr, mtu as u16);
    Ok(Mapped { buf, addr })
}

impl Rxq {
    fn new(
        hw: &Arc<CldmaHw>,
        vq: &VirtqInfo,
        pool: Arc<dyn BufferPool>,
        rx_done: RxDone,
        slots: Vec<RxSlot>,
        lifecycle: QueueLifecycle,
    ) -> Result<Arc<Self>, (CldmaError, Vec<RxSlot>)> {
        let hwq = vq.rxqno;
        let me: Arc<OnceLock<Weak<Rxq>>> = Arc::default();
        let created = {
            let me = me.clone();
            let owner = Arc::downgrade(hw);
            hw.wq.create(
                &format!("rxq{hwq}"),
                Box::new(move || Rxq::harvest_work(&me, &owner)),
            )
        };
        let work = match created {
            Ok(work) => work,
            Err(e) => {
                warn!("rxq{hwq}: cannot start harvest worker: {e}");
                return Err((CldmaError::NoMemory, slots));
            }
        };
        let Some(slots) = Ring::from_vec(slots) else {
            return Err((CldmaError::InvalidArgument("empty rx ring"), Vec::new()));
        };
        let rxq = Arc::new(Self {
            hwq,
            mtu: vq.rx_mtu,
            pool,
            ring: Mutex::new(RxRing {
                free_idx: slots.head(),
                slots,
            }),
            stopping: AtomicBool::new(false),
            users: Mutex::new(vec![RxUser {
                vqno: vq.vqno,
                rx_done,
            }]),
            lifecycle,
            irq_rate: IrqRate::default(),
            delivered: AtomicU64::new(0),
            work,
        });
        let _ = me.set(Arc::downgrade(&rxq));
        Ok(rxq)
    }

    pub fn hwq(&self) -> usize {
        self.hwq
    }

    pub fn mtu(&self) -> usize {
        self.mtu
    }

    pub fn capacity(&self) -> usize {
        lock(&self.ring).slots.capacity()
    }

    pub fn free_idx(&self) -> RingIndex {
        lock(&self.ring).free_idx
    }

    /// Slots currently holding a mapped buffer.
    pub fn armed(&self) -> usize {
        lock(&self.ring)
            .slots
            .iter()
            .filter(|slot| slot.buf.is_some())
            .count()
    }

    /// Per slot: buffer attached, descriptor owned by hardware.
    pub fn slot_states(&self) -> Vec<(bool, bool)> {
        lock(&self.ring)
            .slots
            .iter()
            .map(|slot| (slot.buf.is_some(), slot.gpd.is_hwo()))
            .collect()
    }

    /// Bus address of slot `n`.
    pub fn gpd_addr(&self, n: usize) -> Option<u64> {
        let ring = lock(&self.ring);
        let head = ring.slots.head();
        (n < ring.slots.capacity()).then(|| ring.slots[head.advance(n)].gpd.addr())
    }

    pub fn irq_rate(&self) -> &IrqRate {
        &self.irq_rate
    }

    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
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

    pub fn users(&self) -> Vec<usize> {
        lock(&self.users).iter().map(|u| u.vqno).collect()
    }

    /// Virtual queue currently receiving this ring's traffic.
    pub fn receiver(&self) -> Option<usize> {
        lock(&self.users).first().map(|u| u.vqno)
    }

    fn consumer(&self) -> Option<RxDone> {
        lock(&self.users).first().map(|u| u.rx_done.clone())
    }

    /// Hands `buf` to the current receiver, or back to the pool if there
    /// is none.
    fn deliver(&self, buf: Buffer, len: usize) -> Result<(), RxReject> {
        match self.consumer() {
            Some(rx_done) => rx_done(buf, len),
            None => {
                self.pool.free(buf);
                Ok(())
            }
        }
    }

    pub(crate) fn flush(&self) {
        self.work.flush()
    }

    pub(crate) fn schedule(&self, hw: &CldmaHw) -> bool {
        self.lifecycle.fire(Events::Dispatch);
        self.work.queue(Some(hw.sleep_lock.acquire()))
    }

    /// Bus address of the descriptor hardware should fill next: the first
    /// slot from `free_idx` on that is armed and still owned by hardware.
    pub(crate) fn hw_cursor(&self) -> u64 {
        let ring = lock(&self.ring);
        let addr = ring
            .slots
            .iter_from(ring.free_idx)
            .find(|(_, slot)| slot.buf.is_some() && slot.gpd.is_hwo())
            .map(|(_, slot)| slot.gpd.addr())
            .unwrap_or_else(|| ring.slots[ring.free_idx].gpd.addr());
        addr
    }

    /// The descriptor under the hardware cursor is armed, so a resume can
    /// make progress.
    pub(crate) fn cursor_armed(&self, hw: &CldmaHw) -> bool {
        let cur = hw.regs.cur_addr(Direction::Rx, self.hwq);
        hw.gpds.resolve(cur).is_some_and(|gpd| gpd.is_hwo())
    }

    fn harvest_work(me: &OnceLock<Weak<Rxq>>, hw: &Weak<CldmaHw>) {
        let Some(rxq) = me.get().and_then(Weak::upgrade) else {
            return;
        };
        if rxq.is_stopping() {
            rxq.lifecycle.fire(Events::Done);
            return;
        }
        let Some(hw) = hw.upgrade() else {
            debug!("rxq{}: controller gone, harvest skipped", rxq.hwq);
            rxq.lifecycle.fire(Events::Done);
            return;
        };
        rxq.harvest(&hw);
    }

    fn harvest(&self, hw: &CldmaHw) {
        let _awake = hw.wake.stay_awake(hw.config.wake_window());
        let done_bit = IntStatus::DONE.val(queue_bit(self.hwq)).value;
        let bit = queue_bit(self.hwq);
        let mut repolls = 0;
        let mut coalesced = false;
        let outcome = {
            let mut ring = lock(&self.ring);
            loop {
                if self.is_stopping() {
                    break Harvested::Aborted;
                }
                if self.collect(hw, &mut ring).is_err() {
                    break Harvested::Aborted;
                }
                hw.regs.resume_queues(Direction::Rx, bit);
                match hw.regs.take_irq(Direction::Rx, done_bit) {
                    None => break self.lost_link(hw),
                    Some(true) if repolls < hw.config.max_repoll => {
                        repolls += 1;
                        thread::yield_now();
                        continue;
                    }
                    Some(true) => break Harvested::Requeue,
                    Some(false) => {}
                }
                if !coalesced && self.irq_rate.is_busy(hw.config.coalesce_gap_threshold()) {
                    // Interrupts are arriving back to back; give the
                    // controller a moment to fill more slots.
                    coalesced = true;
                    thread::sleep(hw.config.coalesce_delay());
                    match hw.regs.take_irq(Direction::Rx, done_bit) {
                        None => break self.lost_link(hw),
                        Some(true) => continue,
                        Some(false) => {}
                    }
                }
                break Harvested::Idle;
            }
        };
        self.lifecycle.fire(Events::Done);
        match outcome {
            Harvested::Idle if !self.is_stopping() && !hw.link_error_raised() => {
                hw.regs.clear_ip_busy();
                hw.regs.unmask_irq(Direction::Rx, done_bit);
            }
            Harvested::Requeue => {
                debug!("rxq{}: still busy after {repolls} polls, requeueing", self.hwq);
                self.schedule(hw);
            }
            _ => {}
        }
    }

    fn lost_link(&self, hw: &CldmaHw) -> Harvested {
        hw.link_down(
            Some(Direction::Rx),
            offsets::reg(Direction::Rx, offsets::INT_STATUS),
        );
        Harvested::Aborted
    }

    /// One walk over the ring. Fails only when the hardware cursor reads
    /// back as garbage.
    fn collect(&self, hw: &CldmaHw, ring: &mut RxRing) -> CldmaResult<usize> {
        let cur = hw.regs.cur_addr(Direction::Rx, self.hwq);
        if is_poisoned_addr(cur) {
            hw.raise(ExceptionReason::PoisonedCursor {
                dir: Direction::Rx,
                queue: self.hwq,
                addr: cur,
            });
            return Err(CldmaError::LinkDown);
        }

        let mut n = 0;
        loop {
            let idx = ring.free_idx;
            let slot = &mut ring.slots[idx];
            if slot.buf.is_none() {
                // Delivered on an earlier pass whose replenish failed.
                match arm_slot(hw, &*self.pool, self.mtu, &slot.gpd) {
                    Ok(mapped) => {
                        slot.buf = Some(mapped);
                        ring.free_idx = idx.succ();
                        continue;
                    }
                    Err(e) => {
                        debug!("rxq{}: slot {} still unarmed: {e}", self.hwq, idx.get());
                        break;
                    }
                }
            }
            if slot.gpd.is_hwo() {
                let addr = slot.gpd.addr();
                if addr == cur {
                    break;
                }
                // Hardware moved past this slot but its HWO clear may not
                // be visible yet.
                let settled = hw.config.hwo_retry.spin().poll(|| {
                    if !slot.gpd.is_hwo() {
                        PollStep::Ready(())
                    } else if hw.regs.cur_addr(Direction::Rx, self.hwq) == addr {
                        PollStep::Abort(())
                    } else {
                        PollStep::Pending
                    }
                });
                if settled.is_err() {
                    break;
                }
            }

            let len = slot.gpd.data_len();
            let Some(Mapped { mut buf, addr }) = slot.buf.take() else {
                break;
            };
            hw.mapper.unmap(addr, self.mtu, DmaDirection::FromDevice);
            buf.set_len(len);
            trace!("rxq{}: slot {} delivered {len} bytes", self.hwq, idx.get());
            let verdict = self.deliver(buf, len);
            self.delivered.fetch_add(1, Ordering::Relaxed);
            n += 1;

            match arm_slot(hw, &*self.pool, self.mtu, &slot.gpd) {
                Ok(mapped) => slot.buf = Some(mapped),
                Err(e) => {
                    debug!("rxq{}: replenish failed: {e}", self.hwq);
                    break;
                }
            }
            ring.free_idx = idx.succ();
            match verdict {
                Ok(()) => {}
                Err(RxReject::Backpressure) => {
                    debug!("rxq{}: consumer backpressure", self.hwq);
                    break;
                }
                Err(RxReject::Other(code)) => {
                    debug!("rxq{}: consumer returned {code}", self.hwq)
                }
            }
        }
        Ok(n)
    }

    /// Stops the queue, hands up whatever already completed and returns the
    /// remaining buffers to their pool.
    pub(crate) fn shutdown(&self, hw: &CldmaHw) {
        self.mark_stopping();
        self.lifecycle.fire(Events::Stop);
        if !hw.link_error_raised() {
            if let Err(e) = hw.quiesce(Direction::Rx, queue_bit(self.hwq)) {
                warn!("rxq{}: stop failed ({e}), closing anyway", self.hwq);
            }
        }
        hw.regs.mask_irq(
            Direction::Rx,
            cldma_registers::bits::queue_irq_bits(self.hwq),
        );
        self.work.flush();

        let mut ring = lock(&self.ring);
        let start = ring.free_idx;
        let mut drained = 0;
        for k in 0..ring.slots.capacity() {
            let slot = &mut ring.slots[start.advance(k)];
            let Some(Mapped { mut buf, addr }) = slot.buf.take() else {
                continue;
            };
            hw.mapper.unmap(addr, self.mtu, DmaDirection::FromDevice);
            let len = slot.gpd.data_len();
            if !slot.gpd.is_hwo() && len > 0 {
                buf.set_len(len);
                let _ = self.deliver(buf, len);
                drained += 1;
            } else {
                self.pool.free(buf);
            }
        }
        drop(ring);
        self.lifecycle.fire(Events::Flushed);
        info!("rxq{}: closed, {drained} drained", self.hwq);
    }
}

/// Returns the buffers of partially built slots.
fn unwind(hw: &CldmaHw, pool: &dyn BufferPool, mtu: usize, slots: Vec<RxSlot>) {
    for slot in slots {
        if let Some(Mapped { buf, addr }) = slot.buf {
            hw.mapper.unmap(addr, mtu, DmaDirection::FromDevice);
            pool.free(buf);
        }
    }
}

impl CldmaHw {
    /// Opens the RX ring behind `open.vqno`, or joins it if an alias opened it.
    pub fn rxq_alloc(self: &Arc<Self>, vqno: usize, rx_done: RxDone) -> CldmaResult<Arc<Rxq>> {
        let vq = virtq(vqno).ok_or(CldmaError::InvalidQueue(vqno))?;
        self.check_virtq(vq)?;
        let hwq = vq.rxqno;
        if hwq >= CLDMA_QUEUE_NUM {
            return Err(CldmaError::InvalidQueue(hwq));
        }
        let mut rxqs = self.rxqs_write();
        if let Some(rxq) = &rxqs[hwq] {
            let mut users = lock(&rxq.users);
            if users.iter().any(|u| u.vqno == vqno) {
                return Err(CldmaError::QueueExists(vqno));
            }
            users.push(RxUser { vqno, rx_done });
            debug!("{}: vq{vqno} joins rxq{hwq}", self.name());
            return Ok(rxq.clone());
        }

        let pool = self.pools.for_mtu(vq.rx_mtu).clone();
        if vq.rx_mtu > GPD_MAX_LEN || pool.buf_size() < vq.rx_mtu {
            return Err(CldmaError::InvalidArgument("rx mtu does not fit the pool"));
        }

        let lifecycle = QueueLifecycle::new(format!("{}-rxq{hwq}", self.name()));
        lifecycle.fire(Events::Open);
        let fail = |e: CldmaError| {
            lifecycle.fire(Events::Fail);
            warn!("{}: rxq{hwq} open failed: {e}", self.name());
            e
        };
        let Some(gpds) = self.gpds.alloc_chain(vq.rx_req_num) else {
            return Err(fail(CldmaError::NoMemory));
        };
        let mut slots = Vec::with_capacity(gpds.len());
        for gpd in gpds {
            match arm_slot(self, &*pool, vq.rx_mtu, &gpd) {
                Ok(mapped) => slots.push(RxSlot {
                    gpd,
                    buf: Some(mapped),
                }),
                Err(e) => {
                    unwind(self, &*pool, vq.rx_mtu, slots);
                    return Err(fail(e));
                }
            }
        }
        let rxq = match Rxq::new(self, vq, pool.clone(), rx_done, slots, lifecycle) {
            Ok(rxq) => rxq,
            Err((e, slots)) => {
                unwind(self, &*pool, vq.rx_mtu, slots);
                return Err(e);
            }
        };

        let bit = queue_bit(hwq);
        let reset = self.quiesce(Direction::Rx, bit);
        if let Err(CldmaError::LinkDown) = reset {
            rxq.lifecycle.fire(Events::Fail);
            rxq.mark_stopping();
            rxq.release_buffers(self);
            return Err(CldmaError::LinkDown);
        }
        let head = rxq.hw_cursor();
        self.regs.set_start_addr(Direction::Rx, hwq, head);
        self.regs.start_queues(Direction::Rx, bit);
        self.unmask_queue(Direction::Rx, hwq);
        rxq.lifecycle.fire(Events::Ready);
        rxqs[hwq] = Some(rxq.clone());
        info!(
            "{}: rxq{hwq} open for vq{vqno}, {} x {} bytes at {head:#x}",
            self.name(),
            rxq.capacity(),
            rxq.mtu
        );
        Ok(rxq)
    }

    /// Releases `vqno`'s hold on its RX ring and closes it with the last user.
    pub fn rxq_free(&self, vqno: usize) -> CldmaResult<()> {
        let vq = virtq(vqno).ok_or(CldmaError::InvalidQueue(vqno))?;
        self.check_virtq(vq)?;
        let rxq = {
            let mut rxqs = self.rxqs_write();
            let rxq = rxqs
                .get(vq.rxqno)
                .and_then(Option::clone)
                .ok_or(CldmaError::QueueNotOpen)?;
            let mut users = lock(&rxq.users);
            let pos = users
                .iter()
                .position(|u| u.vqno == vqno)
                .ok_or(CldmaError::QueueNotOpen)?;
            // The last user keeps its callback for the final drain.
            if users.len() > 1 {
                users.remove(pos);
                if pos == 0 {
                    debug!(
                        "{}: rxq{} now delivers to vq{}",
                        self.name(),
                        vq.rxqno,
                        users[0].vqno
                    );
                }
                return Ok(());
            }
            drop(users);
            rxqs[vq.rxqno] = None;
            rxq
        };
        rxq.shutdown(self);
        Ok(())
    }
}

impl Rxq {
    /// Unmaps and frees every attached buffer without delivering anything.
    fn release_buffers(&self, hw: &CldmaHw) {
        let mut ring = lock(&self.ring);
        let cap = ring.slots.capacity();
        let head = ring.slots.head();
        for k in 0..cap {
            if let Some(Mapped { buf, addr }) = ring.slots[head.advance(k)].buf.take() {
                hw.mapper.unmap(addr, self.mtu, DmaDirection::FromDevice);
                self.pool.free(buf);
            }
        }
    }
}
