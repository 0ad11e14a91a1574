// Licensed under the Apache-2.0 license

#[cfg(test)]
mod test {
    use crate::test::{parts_with, tx_request, Fixture, TxLog, GPD_COUNT};
    use cldma::{
        Buffer, CldmaConfig, CldmaError, HwId, QueueState, RetryConfig, TxRequest, TX_REQ_NUM,
        VQ_MTU_3_5K,
    };
    use cldma_registers::{offsets, queue_bit, Direction};
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    fn tags(log: &TxLog) -> Vec<usize> {
        log.lock().unwrap().iter().map(|(tag, _)| *tag).collect()
    }

    #[test]
    fn budget_exhaustion_and_retry() {
        let f = Fixture::new(HwId::Md);
        let txq = f.hw.txq_alloc(0).unwrap();
        assert_eq!(txq.capacity(), TX_REQ_NUM);
        let log = TxLog::default();

        let mut rejected = Vec::new();
        for tag in 0..20 {
            let req = tx_request(&f.hw, VQ_MTU_3_5K, tag, &log);
            if let Err(e) = f.send(0, req) {
                assert_eq!(e.error, CldmaError::Busy);
                assert!(e.error.is_retryable());
                assert_eq!(e.error.errno(), -16);
                rejected.push((tag, e.req));
            }
        }
        assert_eq!(
            rejected.iter().map(|(t, _)| *t).collect::<Vec<_>>(),
            vec![16, 17, 18, 19]
        );
        assert_eq!(txq.budget(), 0);
        assert!(log.lock().unwrap().is_empty());

        assert_eq!(f.p.model.complete_tx(0, TX_REQ_NUM), TX_REQ_NUM);
        f.service();
        assert_eq!(tags(&log), (0..16).collect::<Vec<_>>());
        assert!(log.lock().unwrap().iter().all(|(_, st)| st.is_ok()));
        assert_eq!(txq.budget(), TX_REQ_NUM);

        for (_, req) in rejected {
            f.send(0, req).unwrap();
        }
        assert_eq!(f.p.model.complete_tx(0, 4), 4);
        f.service();
        assert_eq!(tags(&log), (0..20).collect::<Vec<_>>());
        assert_eq!(f.p.mapper.live(), 0);
        assert_eq!(f.p.mapper.stray_unmaps(), 0);
    }

    #[test]
    fn close_cancels_in_flight() {
        let f = Fixture::new(HwId::Md);
        let txq = f.hw.txq_alloc(2).unwrap();
        let log = TxLog::default();
        for tag in 0..5 {
            f.send(2, tx_request(&f.hw, 512, tag, &log)).unwrap();
        }
        assert_eq!(f.p.model.complete_tx(2, 2), 2);
        f.service();
        assert_eq!(txq.in_flight(), 3);

        f.hw.txq_free(2).unwrap();
        let log = log.lock().unwrap().clone();
        assert_eq!(log.len(), 5);
        assert!(log[..2].iter().all(|(_, st)| st.is_ok()));
        assert_eq!(
            log[2..],
            [
                (2, Err(CldmaError::Cancelled)),
                (3, Err(CldmaError::Cancelled)),
                (4, Err(CldmaError::Cancelled)),
            ]
        );
        assert_eq!(f.p.mapper.live(), 0);
        assert_eq!(txq.state(), QueueState::Closed);
        assert_eq!(f.p.model.active(Direction::Tx), 0);
        assert!(f.hw.txq(2).is_none());

        drop(txq);
        assert_eq!(f.p.gpds.in_use(), 0);
    }

    #[test]
    fn close_delivers_completions_seen_while_stopping() {
        let config = CldmaConfig {
            quiesce_retry: RetryConfig::new(200, 2_000),
            ..CldmaConfig::default()
        };
        let (res, p) = parts_with(HwId::Md, config, GPD_COUNT, None);
        let f = Fixture::init(res, p);
        let txq = f.hw.txq_alloc(0).unwrap();
        let log = TxLog::default();
        for tag in 0..3 {
            f.send(0, tx_request(&f.hw, 256, tag, &log)).unwrap();
        }

        // The stop command is ignored, so the close sits in its quiesce poll.
        f.p.model.stall_stop(true);
        let hw = f.hw.clone();
        let closer = thread::spawn(move || hw.txq_free(0));
        let deadline = Instant::now() + Duration::from_secs(5);
        while txq.state() != QueueState::Stopping {
            assert!(Instant::now() < deadline, "close never started");
            thread::sleep(Duration::from_millis(1));
        }
        assert!(txq.is_stopping());
        assert!(f.hw.txq(0).is_some());
        assert_eq!(f.hw.txq_alloc(0).err(), Some(CldmaError::Stopping));

        assert_eq!(f.p.model.complete_tx(0, 2), 2);
        assert!(f.hw.isr());
        closer.join().unwrap().unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec![(0, Ok(())), (1, Ok(())), (2, Err(CldmaError::Cancelled))]
        );
        assert_eq!(txq.state(), QueueState::Closed);
        assert!(f.hw.txq(0).is_none());
        assert_eq!(f.p.mapper.live(), 0);
        assert_eq!(f.p.mapper.stray_unmaps(), 0);
    }

    #[test]
    fn controller_dropped_with_reclaim_queued() {
        let f = Fixture::new(HwId::Md);
        let txq = f.hw.txq_alloc(0).unwrap();
        let log = TxLog::default();
        f.send(0, tx_request(&f.hw, 64, 0, &log)).unwrap();
        assert_eq!(f.p.model.complete_tx(0, 1), 1);

        let Fixture { hw, .. } = f;
        assert!(hw.isr());
        drop(hw);

        // Whether the run beat the drop or found the controller gone, it
        // finishes and leaves the queue idle.
        let deadline = Instant::now() + Duration::from_secs(5);
        while txq.state() == QueueState::Busy {
            assert!(Instant::now() < deadline, "reclaim run never finished");
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(txq.state(), QueueState::Armed);
    }

    #[test]
    fn submit_validation() {
        let f = Fixture::new(HwId::Md);
        let txq = f.hw.txq_alloc(3).unwrap();
        let log = TxLog::default();

        let empty = TxRequest {
            buf: Buffer::new(0),
            dma_addr: 0,
            len: 0,
            on_complete: Box::new(|_, _| {}),
        };
        let e = f.hw.submit_tx(3, empty).unwrap_err();
        assert!(matches!(e.error, CldmaError::InvalidArgument(_)));

        let big = tx_request(&f.hw, VQ_MTU_3_5K + 1, 7, &log);
        let e = f.hw.submit_tx(3, big).unwrap_err();
        assert!(matches!(e.error, CldmaError::InvalidArgument(_)));
        assert_eq!(e.fail().errno(), -22);
        assert_eq!(
            *log.lock().unwrap(),
            vec![(7, Err(CldmaError::InvalidArgument("tx length out of range")))]
        );
        assert_eq!(txq.budget(), TX_REQ_NUM);

        // Not open on this instance.
        let e = f.hw.submit_tx(4, tx_request(&f.hw, 64, 8, &log)).unwrap_err();
        assert_eq!(e.error, CldmaError::QueueNotOpen);

        f.hw.txq_free(3).unwrap();
        let e = txq.submit(&f.hw, tx_request(&f.hw, 64, 9, &log)).unwrap_err();
        assert_eq!(e.error, CldmaError::Stopping);
        assert_eq!(e.error.errno(), -32);
    }

    #[test]
    fn open_rules() {
        let f = Fixture::new(HwId::Md);
        assert_eq!(f.hw.txq_alloc(19).err(), Some(CldmaError::InvalidQueue(19)));
        assert!(matches!(
            f.hw.txq_alloc(8).err(),
            Some(CldmaError::InvalidArgument(_))
        ));
        assert_eq!(f.hw.txq_free(1).unwrap_err(), CldmaError::QueueNotOpen);

        // vq16 shares hardware queue 1 with vq1.
        let a = f.hw.txq_alloc(1).unwrap();
        let b = f.hw.txq_alloc(16).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.users(), vec![1, 16]);
        assert_eq!(f.hw.txq_alloc(16).err(), Some(CldmaError::QueueExists(16)));
        assert_eq!(f.p.gpds.in_use(), TX_REQ_NUM);

        f.hw.txq_free(1).unwrap();
        assert!(f.hw.txq(1).is_some());
        assert_eq!(a.state(), QueueState::Armed);
        f.hw.txq_free(16).unwrap();
        assert!(f.hw.txq(1).is_none());
        assert_eq!(a.state(), QueueState::Closed);
    }

    #[test]
    fn first_kick_starts_then_resumes() {
        let f = Fixture::new(HwId::Ap);
        let txq = f.hw.txq_alloc(9).unwrap();
        assert_eq!(txq.hwq(), 1);
        let head = f.p.model.start_addr(Direction::Tx, 1);
        let log = TxLog::default();
        f.p.model.clear_journal();

        f.send(9, tx_request(&f.hw, 100, 0, &log)).unwrap();
        assert_eq!(f.p.model.cur_addr(Direction::Tx, 1), head);
        // Already running: no command.
        f.send(9, tx_request(&f.hw, 100, 1, &log)).unwrap();
        f.p.model.complete_tx(1, 2);
        f.service();
        f.send(9, tx_request(&f.hw, 100, 2, &log)).unwrap();

        let start = offsets::reg(Direction::Tx, offsets::START_CMD);
        let resume = offsets::reg(Direction::Tx, offsets::RESUME_CMD);
        assert_eq!(f.p.model.writes_to(start), vec![queue_bit(1)]);
        assert_eq!(f.p.model.writes_to(resume), vec![queue_bit(1)]);
        assert_eq!(f.p.model.active(Direction::Tx), queue_bit(1));
        f.p.model.complete_tx(1, 1);
        f.service();
        assert_eq!(tags(&log), vec![0, 1, 2]);
    }

    #[test]
    fn exhausted_budget_on_dead_link() {
        let f = Fixture::new(HwId::Md);
        let _txq = f.hw.txq_alloc(0).unwrap();
        let log = TxLog::default();
        for tag in 0..TX_REQ_NUM {
            f.send(0, tx_request(&f.hw, 64, tag, &log)).unwrap();
        }
        f.p.model.set_link_down(true);
        let e = f.hw.submit_tx(0, tx_request(&f.hw, 64, 99, &log)).unwrap_err();
        assert_eq!(e.error, CldmaError::LinkDown);
        assert!(e.error.is_fatal());
        assert_eq!(f.hw.start_xfer(0), Err(CldmaError::LinkDown));
        assert_eq!(f.exception_count(), 1);
    }
}
