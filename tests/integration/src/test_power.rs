// Licensed under the Apache-2.0 license

#[cfg(test)]
mod test {
    use crate::test::{parts_with, tx_request, Collector, Fixture, TxLog, GPD_COUNT};
    use cldma::{CldmaConfig, CldmaError, HwId, RetryConfig, ALL_IRQS};
    use cldma_registers::bits::{Config, IntStatus};
    use cldma_registers::{offsets, queue_bit, Direction};

    #[test]
    fn runtime_suspend_round_trip() {
        let f = Fixture::new(HwId::Md);
        let _txq = f.hw.txq_alloc(0).unwrap();
        let c = Collector::default();
        let _rxq = f.open_rx(0, &c).unwrap();
        let masks = Direction::ALL.map(|dir| f.p.model.int_mask(dir));

        f.hw.suspend().unwrap();
        for dir in Direction::ALL {
            assert_eq!(f.p.model.int_mask(dir), ALL_IRQS);
            assert_eq!(f.p.model.active(dir), 0);
        }
        f.p.model.set_ip_busy();
        f.hw.suspend_late();
        assert_eq!(f.p.model.ip_busy(), 0);

        f.hw.resume(true).unwrap();
        assert_eq!(Direction::ALL.map(|dir| f.p.model.int_mask(dir)), masks);
        assert_eq!(f.p.model.active(Direction::Rx), queue_bit(0));
        assert_eq!(f.p.model.active(Direction::Tx), 0);

        f.p.model.complete_rx(0, &[42]);
        f.service();
        assert_eq!(c.lens(), vec![42]);
    }

    #[test]
    fn system_resume_reprograms_rings() {
        let f = Fixture::new(HwId::Md);
        let _txq = f.hw.txq_alloc(1).unwrap();
        let c = Collector::default();
        let rxq = f.open_rx(1, &c).unwrap();
        let log = TxLog::default();
        for tag in 0..3 {
            f.send(1, tx_request(&f.hw, 256, tag, &log)).unwrap();
        }
        assert_eq!(f.p.model.complete_tx(1, 1), 1);
        f.p.model.complete_rx(1, &[1, 2, 3]);
        f.service();
        assert_eq!(log.lock().unwrap().len(), 1);
        assert_eq!(rxq.free_idx().get(), 3);
        let tx_cursor = f.p.model.cur_addr(Direction::Tx, 1);

        f.hw.suspend().unwrap();
        f.hw.suspend_late();
        // Power loss wipes the controller.
        f.hw.regs().write(offsets::CFG, 0);
        for dir in Direction::ALL {
            f.hw.regs().set_start_addr(dir, 1, 0);
        }
        f.p.model.clear_journal();

        f.hw.resume(false).unwrap();
        assert!(f.p.model.config().is_set(Config::ENABLE));
        assert_eq!(f.p.model.start_addr(Direction::Tx, 1), tx_cursor);
        assert_eq!(
            f.p.model.start_addr(Direction::Rx, 1),
            rxq.gpd_addr(3).unwrap()
        );
        for dir in Direction::ALL {
            assert_eq!(
                f.p.model.writes_to(offsets::reg(dir, offsets::START_CMD)),
                vec![queue_bit(1)]
            );
            assert_eq!(f.p.model.active(dir), queue_bit(1));
        }
        let done = IntStatus::DONE.val(queue_bit(1)).value;
        assert_eq!(f.p.model.int_mask(Direction::Tx) & done, 0);

        assert_eq!(f.p.model.complete_tx(1, 2), 2);
        f.p.model.complete_rx(1, &[4]);
        f.service();
        let log = log.lock().unwrap();
        assert_eq!(log.iter().map(|(t, _)| *t).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert!(log.iter().all(|(_, st)| st.is_ok()));
        assert_eq!(c.lens(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn suspend_refusals() {
        let f = Fixture::new(HwId::Ap);
        let _txq = f.hw.txq_alloc(8).unwrap();
        let token = f.hw.sleep_lock().acquire();
        assert_eq!(f.hw.suspend(), Err(CldmaError::Busy));
        drop(token);
        f.hw.suspend().unwrap();
        f.hw.resume(true).unwrap();

        f.p.model.set_link_down(true);
        assert_eq!(f.hw.suspend(), Err(CldmaError::LinkDown));
        assert_eq!(f.hw.resume(false), Err(CldmaError::LinkDown));
        assert_eq!(f.exception_count(), 1);
    }

    #[test]
    fn stuck_queue_does_not_block_suspend() {
        let config = CldmaConfig {
            quiesce_retry: RetryConfig::new(3, 1),
            ..CldmaConfig::default()
        };
        let (res, p) = parts_with(HwId::Md, config, GPD_COUNT, None);
        let f = Fixture::init(res, p);
        let c = Collector::default();
        let _rxq = f.open_rx(2, &c).unwrap();
        f.p.model.stall_stop(true);
        f.hw.suspend().unwrap();
        assert_eq!(f.p.model.active(Direction::Rx), queue_bit(2));
        assert_eq!(f.p.model.int_mask(Direction::Rx), ALL_IRQS);
    }

    #[test]
    fn resume_without_suspend_unmasks_open_queues() {
        let f = Fixture::new(HwId::Md);
        let _txq = f.hw.txq_alloc(4).unwrap();
        f.hw.regs().mask_irq(Direction::Tx, ALL_IRQS);
        f.hw.resume(true).unwrap();
        let bits = (IntStatus::DONE.val(queue_bit(4)) + IntStatus::ERROR.val(queue_bit(4))).value;
        assert_eq!(f.p.model.int_mask(Direction::Tx), ALL_IRQS & !bits);
    }
}
