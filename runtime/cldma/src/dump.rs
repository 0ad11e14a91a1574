// Licensed under the Apache-2.0 license

//! Diagnostic snapshot of one instance.

use crate::hw::CldmaHw;
use crate::qstate::States;
use crate::virtq::HwId;
use cldma_registers::{offsets, Direction};
use log::info;

#[derive(Debug, Clone, PartialEq)]
pub struct QueueDump {
    pub hwq: usize,
    pub state: States,
    pub start_addr: u64,
    pub cur_addr: u64,
    pub free_idx: usize,
    /// TX only.
    pub wr_idx: Option<usize>,
    /// TX: bound requests. RX: armed slots.
    pub occupied: usize,
    pub users: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DirDump {
    pub status: u32,
    pub int_status: u32,
    pub int_mask: u32,
    pub queues: Vec<QueueDump>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CldmaDump {
    pub hw: HwId,
    pub config: u32,
    pub ready: bool,
    pub link_error: bool,
    pub sleep_holders: usize,
    pub tx: DirDump,
    pub rx: DirDump,
}

impl CldmaHw {
    fn dir_dump(&self, dir: Direction, queues: Vec<QueueDump>) -> DirDump {
        DirDump {
            status: self.regs.read(offsets::reg(dir, offsets::STATUS)),
            int_status: self.regs.read(offsets::reg(dir, offsets::INT_STATUS)),
            int_mask: self.regs.int_mask(dir),
            queues,
        }
    }

    /// Captures registers and ring positions and logs them.
    pub fn dump(&self) -> CldmaDump {
        let tx_queues = self
            .open_txqs()
            .into_iter()
            .map(|(q, txq)| QueueDump {
                hwq: q,
                state: txq.state(),
                start_addr: self.regs.start_addr(Direction::Tx, q),
                cur_addr: self.regs.cur_addr(Direction::Tx, q),
                free_idx: txq.free_idx().get(),
                wr_idx: Some(txq.wr_idx().get()),
                occupied: txq.in_flight(),
                users: txq.users(),
            })
            .collect();
        let rx_queues = self
            .open_rxqs()
            .into_iter()
            .map(|(q, rxq)| QueueDump {
                hwq: q,
                state: rxq.state(),
                start_addr: self.regs.start_addr(Direction::Rx, q),
                cur_addr: self.regs.cur_addr(Direction::Rx, q),
                free_idx: rxq.free_idx().get(),
                wr_idx: None,
                occupied: rxq.armed(),
                users: rxq.users(),
            })
            .collect();
        let dump = CldmaDump {
            hw: self.id(),
            config: self.regs.read(offsets::CFG),
            ready: self.is_ready(),
            link_error: self.link_error_raised(),
            sleep_holders: self.sleep_lock.holders(),
            tx: self.dir_dump(Direction::Tx, tx_queues),
            rx: self.dir_dump(Direction::Rx, rx_queues),
        };

        info!(
            "{}: cfg {:#x} ready {} link_error {} sleep holders {}",
            self.name(),
            dump.config,
            dump.ready,
            dump.link_error,
            dump.sleep_holders
        );
        for (dir, d) in [(Direction::Tx, &dump.tx), (Direction::Rx, &dump.rx)] {
            info!(
                "{}: {} status {:#x} isr {:#x} mask {:#x}",
                self.name(),
                dir.name(),
                d.status,
                d.int_status,
                d.int_mask
            );
            for q in &d.queues {
                info!(
                    "{}: {}q{} {:?} start {:#x} cur {:#x} free {} wr {:?} occupied {} vqs {:?}",
                    self.name(),
                    dir.name(),
                    q.hwq,
                    q.state,
                    q.start_addr,
                    q.cur_addr,
                    q.free_idx,
                    q.wr_idx,
                    q.occupied,
                    q.users
                );
            }
        }
        dump
    }
}
