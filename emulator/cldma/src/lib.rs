// Licensed under the Apache-2.0 license

//! Software model of one CLDMA controller.
//!
//! The model walks the same descriptor memory the host engine arms, so a
//! test drives "hardware" progress explicitly through [`CldmaModel::complete_tx`]
//! and [`CldmaModel::complete_rx`] and then runs the host interrupt path.

use cldma::{CldmaMmio, GpdPool, IrqLine};
use cldma_registers::bits::{Config, DmaCap, IntStatus};
use cldma_registers::{
    decode_offset, offsets, queue_bit, queues_in, Direction, CLDMA_QUEUE_NUM, LINK_DOWN_SENTINEL,
};
use log::{debug, trace};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tock_registers::LocalRegisterCopy;

pub const DEFAULT_HW_VERSION: u32 = 0x0800;

#[derive(Default, Clone, Copy)]
struct QueueRegs {
    start_l: u32,
    start_h: u32,
    cur: u64,
}

impl QueueRegs {
    fn start(&self) -> u64 {
        ((self.start_h as u64) << 32) | self.start_l as u64
    }
}

#[derive(Default)]
struct DirRegs {
    queues: [QueueRegs; CLDMA_QUEUE_NUM],
    active: u32,
    int_status: u32,
    int_mask: u32,
}

struct ModelState {
    config: LocalRegisterCopy<u32, Config::Register>, // 0x000
    dma_cap: LocalRegisterCopy<u32, DmaCap::Register>, // 0x004
    ip_busy: u32,                                     // 0x008
    hw_version: u32,                                  // 0x00c
    dirs: [DirRegs; 2],
    link_down: bool,
    stall_stop: bool,
    journal: Vec<(usize, u32)>,
}

pub struct CldmaModel {
    gpds: Arc<GpdPool>,
    state: Mutex<ModelState>,
}

impl CldmaModel {
    /// A controller with 64-bit DMA that walks descriptors from `gpds`.
    pub fn new(gpds: Arc<GpdPool>) -> Arc<Self> {
        Arc::new(Self {
            gpds,
            state: Mutex::new(ModelState {
                config: LocalRegisterCopy::new(0),
                dma_cap: LocalRegisterCopy::new(DmaCap::ADDR_BITS.val(64).value),
                ip_busy: 0,
                hw_version: DEFAULT_HW_VERSION,
                dirs: Default::default(),
                link_down: false,
                stall_stop: false,
                journal: Vec::new(),
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, ModelState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_dma_addr_bits(&self, bits: u32) {
        self.lock().dma_cap = LocalRegisterCopy::new(DmaCap::ADDR_BITS.val(bits).value);
    }

    /// From now on every read returns the link-down sentinel and writes are
    /// dropped, as after a surprise link loss.
    pub fn set_link_down(&self, down: bool) {
        debug!("cldma model: link {}", if down { "down" } else { "up" });
        self.lock().link_down = down;
    }

    /// Makes stop commands ineffective so quiesce polls time out.
    pub fn stall_stop(&self, stall: bool) {
        self.lock().stall_stop = stall;
    }

    /// Some unmasked status bit is pending.
    pub fn irq_asserted(&self) -> bool {
        let st = self.lock();
        !st.link_down
            && st
                .dirs
                .iter()
                .any(|d| d.int_status & !d.int_mask != 0)
    }

    pub fn config(&self) -> LocalRegisterCopy<u32, Config::Register> {
        self.lock().config
    }

    pub fn ip_busy(&self) -> u32 {
        self.lock().ip_busy
    }

    pub fn set_ip_busy(&self) {
        self.lock().ip_busy = 1;
    }

    pub fn int_status(&self, dir: Direction) -> u32 {
        self.lock().dirs[dir.index()].int_status
    }

    pub fn int_mask(&self, dir: Direction) -> u32 {
        self.lock().dirs[dir.index()].int_mask
    }

    pub fn active(&self, dir: Direction) -> u32 {
        self.lock().dirs[dir.index()].active
    }

    pub fn start_addr(&self, dir: Direction, q: usize) -> u64 {
        self.lock().dirs[dir.index()].queues[q].start()
    }

    pub fn cur_addr(&self, dir: Direction, q: usize) -> u64 {
        self.lock().dirs[dir.index()].queues[q].cur
    }

    /// Raises a status bit as hardware would, e.g. an error.
    pub fn raise(&self, dir: Direction, bits: u32) {
        let mut st = self.lock();
        let d = &mut st.dirs[dir.index()];
        d.int_status |= bits;
    }

    /// Every register write so far, in order.
    pub fn journal(&self) -> Vec<(usize, u32)> {
        self.lock().journal.clone()
    }

    /// Writes so far to `offset`.
    pub fn writes_to(&self, offset: usize) -> Vec<u32> {
        self.lock()
            .journal
            .iter()
            .filter(|(off, _)| *off == offset)
            .map(|(_, v)| *v)
            .collect()
    }

    pub fn clear_journal(&self) {
        self.lock().journal.clear();
    }

    /// Finishes up to `n` transmit descriptors of queue `q`. Returns how
    /// many were released.
    pub fn complete_tx(&self, q: usize, n: usize) -> usize {
        let mut st = self.lock();
        if st.link_down {
            return 0;
        }
        let d = &mut st.dirs[Direction::Tx.index()];
        let mut done = 0;
        while done < n && d.active & queue_bit(q) != 0 {
            let cur = d.queues[q].cur;
            let Some(gpd) = self.gpds.resolve(cur).filter(|gpd| gpd.is_hwo()) else {
                d.active &= !queue_bit(q);
                break;
            };
            gpd.release();
            d.queues[q].cur = gpd.next();
            d.int_status |= IntStatus::DONE.val(queue_bit(q)).value;
            done += 1;
        }
        // Idle once the next descriptor is not armed.
        let next = d.queues[q].cur;
        if !self.gpds.resolve(next).is_some_and(|gpd| gpd.is_hwo()) {
            d.active &= !queue_bit(q);
        }
        trace!("cldma model: txq{q} completed {done}");
        done
    }

    /// Fills the next receive descriptors of queue `q` with packets of the
    /// given lengths. Stops with an empty event when it meets a descriptor
    /// the host has not armed. Returns how many were filled.
    pub fn complete_rx(&self, q: usize, lens: &[u16]) -> usize {
        let mut st = self.lock();
        if st.link_down {
            return 0;
        }
        let d = &mut st.dirs[Direction::Rx.index()];
        let mut done = 0;
        for &len in lens {
            if d.active & queue_bit(q) == 0 {
                break;
            }
            let cur = d.queues[q].cur;
            let Some(gpd) = self.gpds.resolve(cur).filter(|gpd| gpd.is_hwo()) else {
                d.active &= !queue_bit(q);
                d.int_status |= IntStatus::EMPTY.val(queue_bit(q)).value;
                break;
            };
            gpd.complete(len.min(gpd.allow_len() as u16));
            d.queues[q].cur = gpd.next();
            d.int_status |= IntStatus::DONE.val(queue_bit(q)).value;
            done += 1;
        }
        trace!("cldma model: rxq{q} filled {done}");
        done
    }

    /// Moves the receive cursor of queue `q` forward by `n` descriptors
    /// without touching them.
    pub fn advance_rx_cursor(&self, q: usize, n: usize) {
        let mut st = self.lock();
        let d = &mut st.dirs[Direction::Rx.index()];
        for _ in 0..n {
            let cur = d.queues[q].cur;
            if let Some(gpd) = self.gpds.resolve(cur) {
                d.queues[q].cur = gpd.next();
            }
        }
    }

    /// Overwrites the current-address register of queue `q`, as a
    /// misbehaving controller might.
    pub fn set_cur_addr(&self, dir: Direction, q: usize, addr: u64) {
        self.lock().dirs[dir.index()].queues[q].cur = addr;
    }

    /// Starts or resumes `queues`; a queue with nothing armed at its cursor
    /// goes idle right away, and a receive queue reports empty.
    fn run_queues(&self, dir: Direction, d: &mut DirRegs, queues: u32) {
        for q in queues_in(queues) {
            let armed = self
                .gpds
                .resolve(d.queues[q].cur)
                .is_some_and(|gpd| gpd.is_hwo());
            if armed {
                d.active |= queue_bit(q);
            } else {
                d.active &= !queue_bit(q);
                if dir == Direction::Rx {
                    d.int_status |= IntStatus::EMPTY.val(queue_bit(q)).value;
                }
            }
        }
    }

    fn read_dir(d: &DirRegs, rel: usize) -> u32 {
        let per_queue = |base: usize| {
            let q = (rel - base) / offsets::QUEUE_STRIDE;
            (q, (rel - base) % offsets::QUEUE_STRIDE != 0)
        };
        match rel {
            r if r < offsets::START_ADDR_L + CLDMA_QUEUE_NUM * offsets::QUEUE_STRIDE => {
                let (q, hi) = per_queue(offsets::START_ADDR_L);
                if hi {
                    d.queues[q].start_h
                } else {
                    d.queues[q].start_l
                }
            }
            r if (offsets::CUR_ADDR_L
                ..offsets::CUR_ADDR_L + CLDMA_QUEUE_NUM * offsets::QUEUE_STRIDE)
                .contains(&r) =>
            {
                let (q, hi) = per_queue(offsets::CUR_ADDR_L);
                if hi {
                    (d.queues[q].cur >> 32) as u32
                } else {
                    d.queues[q].cur as u32
                }
            }
            offsets::STATUS => d.active,
            offsets::INT_STATUS => d.int_status,
            offsets::INT_MASK => d.int_mask,
            _ => 0,
        }
    }

    fn write_dir(&self, dir: Direction, st: &mut ModelState, rel: usize, value: u32) {
        let stall_stop = st.stall_stop;
        let d = &mut st.dirs[dir.index()];
        match rel {
            r if r < offsets::START_ADDR_L + CLDMA_QUEUE_NUM * offsets::QUEUE_STRIDE => {
                let q = (r - offsets::START_ADDR_L) / offsets::QUEUE_STRIDE;
                if (r - offsets::START_ADDR_L) % offsets::QUEUE_STRIDE == 0 {
                    d.queues[q].start_l = value;
                } else {
                    d.queues[q].start_h = value;
                }
            }
            offsets::START_CMD => {
                for q in queues_in(value) {
                    d.queues[q].cur = d.queues[q].start();
                }
                self.run_queues(dir, d, value);
            }
            offsets::RESUME_CMD => {
                let idle = value & !d.active;
                self.run_queues(dir, d, idle);
            }
            offsets::STOP_CMD if !stall_stop => d.active &= !value,
            offsets::INT_STATUS => d.int_status &= !value,
            offsets::INT_MASK_SET => d.int_mask |= value,
            offsets::INT_MASK_CLR => d.int_mask &= !value,
            _ => {}
        }
    }
}

impl CldmaMmio for CldmaModel {
    fn read32(&self, offset: usize) -> u32 {
        let st = self.lock();
        if st.link_down {
            return LINK_DOWN_SENTINEL;
        }
        match offset {
            offsets::CFG => st.config.get(),
            offsets::DMA_CAP => st.dma_cap.get(),
            offsets::IP_BUSY => st.ip_busy,
            offsets::HW_VERSION => st.hw_version,
            _ => match decode_offset(offset) {
                Some((dir, rel)) => Self::read_dir(&st.dirs[dir.index()], rel),
                None => 0,
            },
        }
    }

    fn write32(&self, offset: usize, value: u32) {
        let mut st = self.lock();
        st.journal.push((offset, value));
        if st.link_down {
            return;
        }
        match offset {
            offsets::CFG => st.config.set(value),
            offsets::IP_BUSY if value != 0 => st.ip_busy = 0,
            _ => {
                if let Some((dir, rel)) = decode_offset(offset) {
                    self.write_dir(dir, &mut st, rel, value);
                }
            }
        }
    }
}

/// Platform interrupt line that counts what the driver does to it.
#[derive(Default)]
pub struct ModelIrqLine {
    clears: AtomicUsize,
    unmasks: AtomicUsize,
}

impl ModelIrqLine {
    pub fn clears(&self) -> usize {
        self.clears.load(Ordering::Relaxed)
    }

    pub fn unmasks(&self) -> usize {
        self.unmasks.load(Ordering::Relaxed)
    }
}

impl IrqLine for ModelIrqLine {
    fn clear(&self) {
        self.clears.fetch_add(1, Ordering::Relaxed);
    }

    fn unmask(&self) {
        self.unmasks.fetch_add(1, Ordering::Relaxed);
    }
}
