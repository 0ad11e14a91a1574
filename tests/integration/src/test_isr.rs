// Licensed under the Apache-2.0 license

#[cfg(test)]
mod test {
    use crate::test::{parts_with, tx_request, Collector, Fixture, TxLog, GPD_COUNT};
    use cldma::{
        Buffer, CldmaConfig, CldmaError, ExceptionReason, HwId, RxDone, RxReject, ALL_IRQS,
        RX_REQ_NUM,
    };
    use cldma_registers::bits::IntStatus;
    use cldma_registers::{offsets, queue_bit, Direction};
    use std::sync::mpsc::channel;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn error_bit(q: usize) -> u32 {
        IntStatus::ERROR.val(queue_bit(q)).value
    }

    fn empty_bit(q: usize) -> u32 {
        IntStatus::EMPTY.val(queue_bit(q)).value
    }

    #[test]
    fn init_masks_everything() {
        let f = Fixture::new(HwId::Md);
        for dir in Direction::ALL {
            assert_eq!(f.p.model.int_mask(dir), ALL_IRQS);
        }
        assert!(!f.hw.isr());
        f.p.model.raise(Direction::Tx, IntStatus::DONE.val(queue_bit(4)).value);
        assert!(!f.hw.isr());
    }

    #[test]
    fn queue_errors_stay_masked() {
        let f = Fixture::new(HwId::Md);
        let _txq = f.hw.txq_alloc(1).unwrap();
        let c = Collector::default();
        let _rxq = f.open_rx(1, &c).unwrap();
        assert_eq!(f.p.model.int_mask(Direction::Tx) & error_bit(1), 0);

        f.p.model.raise(Direction::Tx, error_bit(1));
        f.p.model.raise(Direction::Rx, error_bit(1));
        assert!(f.p.model.irq_asserted());
        f.service();
        for dir in Direction::ALL {
            assert_eq!(f.p.model.int_status(dir) & error_bit(1), 0);
            assert_ne!(f.p.model.int_mask(dir) & error_bit(1), 0);
        }
        assert!(!f.p.model.irq_asserted());
        assert_eq!(f.exception_count(), 0);
    }

    #[test]
    fn empty_resumes_an_armed_queue() {
        let f = Fixture::new(HwId::Ap);
        let c = Collector::default();
        let _rxq = f.open_rx(13, &c).unwrap();
        let q = 5;

        // Overrun: the ring fills up and hardware stops on an unharvested slot.
        let lens = vec![64u16; RX_REQ_NUM + 1];
        assert_eq!(f.p.model.complete_rx(q, &lens), RX_REQ_NUM);
        assert_eq!(f.p.model.complete_rx(q, &[64]), 0);
        assert_eq!(f.p.model.active(Direction::Rx), 0);
        assert_ne!(f.p.model.int_status(Direction::Rx) & empty_bit(q), 0);

        f.service();
        assert_eq!(c.calls(), RX_REQ_NUM);
        assert_eq!(f.p.model.active(Direction::Rx), queue_bit(q));
        assert_eq!(f.p.model.int_status(Direction::Rx) & empty_bit(q), 0);

        // A stray empty event while the cursor is armed only needs a resume.
        f.hw.regs().stop_queues(Direction::Rx, queue_bit(q));
        f.p.model.clear_journal();
        f.p.model.raise(Direction::Rx, empty_bit(q));
        assert!(f.hw.isr());
        assert_eq!(
            f.p.model
                .writes_to(offsets::reg(Direction::Rx, offsets::RESUME_CMD)),
            vec![queue_bit(q)]
        );
        assert_eq!(f.p.model.active(Direction::Rx), queue_bit(q));
        f.hw.flush_work();
        assert_eq!(c.calls(), RX_REQ_NUM);
    }

    #[test]
    fn done_on_closed_queue_is_ignored() {
        let f = Fixture::new(HwId::Md);
        let _txq = f.hw.txq_alloc(0).unwrap();
        f.hw.regs()
            .unmask_irq(Direction::Tx, IntStatus::DONE.val(queue_bit(6)).value);
        f.p.model.raise(Direction::Tx, IntStatus::DONE.val(queue_bit(6)).value);
        assert!(f.hw.isr());
        assert_ne!(
            f.p.model.int_mask(Direction::Tx) & IntStatus::DONE.val(queue_bit(6)).value,
            0
        );
        assert!(!f.hw.isr());
    }

    #[test]
    fn dead_link_is_reported_once() {
        let f = Fixture::new(HwId::Ap);
        let _txq = f.hw.txq_alloc(8).unwrap();
        f.p.model.set_link_down(true);
        assert!(!f.hw.isr());
        assert!(!f.hw.isr());
        let events: Vec<_> = f.p.exceptions.try_iter().collect();
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0].reason,
            ExceptionReason::LinkDown {
                dir: Some(Direction::Tx),
                ..
            }
        ));
        assert!(f.hw.link_error_raised());
    }

    #[test]
    fn sleep_lock_held_while_work_runs() {
        let f = Fixture::new(HwId::Md);
        let (entered_tx, entered) = channel::<()>();
        let (release, release_rx) = channel::<()>();
        let entered_tx = Mutex::new(entered_tx);
        let release_rx = Mutex::new(release_rx);
        let pool = f.hw.buffer_pools().default.clone();
        let rx_done: RxDone = Arc::new(move |buf: Buffer, _len: usize| -> Result<(), RxReject> {
            pool.free(buf);
            let _ = entered_tx.lock().unwrap().send(());
            let _ = release_rx.lock().unwrap().recv();
            Ok(())
        });
        let _rxq = f.hw.rxq_alloc(0, rx_done).unwrap();
        assert!(!f.hw.sleep_lock().is_held());

        f.p.model.complete_rx(0, &[128]);
        assert!(f.hw.isr());
        entered.recv_timeout(Duration::from_secs(10)).unwrap();
        assert!(f.hw.sleep_lock().is_held());
        assert!(!f.hw.can_sleep());
        assert_eq!(f.hw.suspend(), Err(CldmaError::Busy));

        release.send(()).unwrap();
        f.hw.flush_work();
        assert!(!f.hw.sleep_lock().is_held());
        assert!(f.hw.wake_source().is_awake());
    }

    #[test]
    fn busy_interrupts_are_coalesced() {
        let config = CldmaConfig {
            coalesce_gap_threshold_us: 10_000_000,
            coalesce_delay_us: 1_000,
            ..CldmaConfig::default()
        };
        let (res, p) = parts_with(HwId::Md, config, GPD_COUNT, None);
        let f = Fixture::init(res, p);
        let c = Collector::default();
        let rxq = f.open_rx(0, &c).unwrap();

        for round in 1..=3 {
            f.p.model.complete_rx(0, &[256, 256]);
            f.service();
            assert_eq!(c.calls(), 2 * round);
        }
        assert!(rxq.irq_rate().avg_gap().is_some());
        assert!(rxq.irq_rate().is_busy(f.hw.config().coalesce_gap_threshold()));
        assert_eq!(
            f.p.model.int_mask(Direction::Rx) & IntStatus::DONE.val(queue_bit(0)).value,
            0
        );
    }

    #[test]
    fn tx_done_completes_and_rearms_interrupt() {
        let f = Fixture::new(HwId::Md);
        let _txq = f.hw.txq_alloc(5).unwrap();
        let log = TxLog::default();
        f.send(5, tx_request(&f.hw, 1500, 0, &log)).unwrap();
        f.p.model.complete_tx(5, 1);
        assert!(f.p.model.irq_asserted());
        assert!(f.hw.isr());
        f.hw.flush_work();
        assert_eq!(log.lock().unwrap().len(), 1);
        assert_eq!(
            f.p.model.int_mask(Direction::Tx) & IntStatus::DONE.val(queue_bit(5)).value,
            0
        );
        assert!(!f.p.model.irq_asserted());
    }
}
