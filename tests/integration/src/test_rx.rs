// Licensed under the Apache-2.0 license

#[cfg(test)]
mod test {
    use crate::test::{parts_with, Collector, Fixture, FlakyPool, GPD_COUNT};
    use cldma::{
        CldmaConfig, CldmaError, ExceptionReason, HwId, QueueState, RetryConfig, RX_REQ_NUM,
        VQ_MTU_3_5K, VQ_MTU_63K,
    };
    use cldma_registers::{queue_bit, Direction};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn buffer_addrs(f: &Fixture, hwq: usize, n: usize) -> Vec<u64> {
        let rxq = f.hw.rxq(hwq).unwrap();
        (0..n)
            .map(|k| {
                let gpd = f.p.gpds.resolve(rxq.gpd_addr(k).unwrap()).unwrap();
                gpd.buffer()
            })
            .collect()
    }

    #[test]
    fn harvest_delivers_in_order_and_rearms() {
        let f = Fixture::new(HwId::Md);
        let c = Collector::default();
        let rxq = f.open_rx(0, &c).unwrap();
        assert_eq!(rxq.capacity(), RX_REQ_NUM);
        assert_eq!(rxq.mtu(), VQ_MTU_3_5K);
        assert_eq!(rxq.armed(), RX_REQ_NUM);
        assert_eq!(rxq.state(), QueueState::Armed);
        assert_eq!(f.p.model.active(Direction::Rx), queue_bit(0));
        let before = buffer_addrs(&f, 0, 5);

        assert_eq!(f.p.model.complete_rx(0, &[100, 200, 300, 50, 0]), 5);
        f.service();

        assert_eq!(c.lens(), vec![100, 200, 300, 50, 0]);
        assert_eq!(rxq.delivered(), 5);
        assert_eq!(rxq.free_idx().get(), 5);
        let states = rxq.slot_states();
        assert!(states[..5].iter().all(|&s| s == (true, true)));
        let after = buffer_addrs(&f, 0, 5);
        assert!(before.iter().zip(&after).all(|(a, b)| a != b));
        assert_eq!(f.p.mapper.live(), RX_REQ_NUM);
        assert_eq!(f.p.mapper.maps(), RX_REQ_NUM + 5);
        assert_eq!(f.p.pool.outstanding(), RX_REQ_NUM);
        assert!(!f.p.model.irq_asserted());
    }

    #[test]
    fn dead_link_aborts_harvest_once() {
        let f = Fixture::new(HwId::Md);
        let c = Collector::default();
        let _rxq = f.open_rx(3, &c).unwrap();
        assert_eq!(f.p.model.complete_rx(3, &[10, 20]), 2);

        f.p.model.set_link_down(true);
        assert!(f.hw.kick_rx(3));
        f.hw.flush_work();
        assert_eq!(c.calls(), 0);
        assert!(f.hw.link_error_raised());

        // The interrupt path sees the same dead link; nothing new is raised.
        assert!(!f.hw.isr());
        f.hw.flush_work();
        let events: Vec<_> = f.p.exceptions.try_iter().collect();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].hw, HwId::Md);
        assert!(matches!(
            events[0].reason,
            ExceptionReason::PoisonedCursor {
                dir: Direction::Rx,
                queue: 3,
                ..
            }
        ));
        assert_eq!(c.calls(), 0);
    }

    #[test]
    fn backpressure_pauses_harvest() {
        let f = Fixture::new(HwId::Ap);
        let c = Collector::default();
        c.push_back_on.lock().unwrap().push(2);
        let rxq = f.open_rx(10, &c).unwrap();
        assert_eq!(rxq.hwq(), 2);

        assert_eq!(f.p.model.complete_rx(2, &[11, 22, 33, 44]), 4);
        f.service();
        assert_eq!(c.lens(), vec![11, 22]);
        assert_eq!(rxq.free_idx().get(), 2);
        // The slot handed up before the pause is already re-armed.
        assert_eq!(rxq.slot_states()[1], (true, true));

        assert!(f.hw.kick_rx(2));
        f.hw.flush_work();
        assert_eq!(c.lens(), vec![11, 22, 33, 44]);
        assert_eq!(rxq.free_idx().get(), 4);
    }

    #[test]
    fn consumer_status_keeps_harvesting() {
        let f = Fixture::new(HwId::Md);
        let c = Collector::default();
        c.status_on.lock().unwrap().push(1);
        let rxq = f.open_rx(6, &c).unwrap();

        assert_eq!(f.p.model.complete_rx(6, &[70, 80, 90]), 3);
        f.service();
        assert_eq!(c.lens(), vec![70, 80, 90]);
        assert_eq!(rxq.free_idx().get(), 3);
        assert_eq!(rxq.armed(), RX_REQ_NUM);
    }

    #[test]
    fn zero_cursor_aborts_harvest() {
        let f = Fixture::new(HwId::Md);
        let c = Collector::default();
        let rxq = f.open_rx(4, &c).unwrap();
        assert_eq!(f.p.model.complete_rx(4, &[30, 40]), 2);
        f.p.model.set_cur_addr(Direction::Rx, 4, 0);

        assert!(f.hw.kick_rx(4));
        f.hw.flush_work();
        assert_eq!(c.calls(), 0);
        assert_eq!(rxq.free_idx().get(), 0);
        let events: Vec<_> = f.p.exceptions.try_iter().collect();
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0].reason,
            ExceptionReason::PoisonedCursor {
                dir: Direction::Rx,
                queue: 4,
                addr: 0,
            }
        ));
    }

    #[test]
    fn late_ownership_release_is_waited_for() {
        let config = CldmaConfig {
            hwo_retry: RetryConfig::new(20_000, 50),
            ..CldmaConfig::default()
        };
        let (res, p) = parts_with(HwId::Md, config, GPD_COUNT, None);
        let f = Fixture::init(res, p);
        let c = Collector::default();
        let rxq = f.open_rx(1, &c).unwrap();
        assert_eq!(f.p.model.complete_rx(1, &[10]), 1);
        // The cursor is already past slot 1 but its HWO clear lands late.
        f.p.model.advance_rx_cursor(1, 1);
        let slot1 = rxq.gpd_addr(1).unwrap();
        let gpds = f.p.gpds.clone();
        let writer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(5));
            gpds.resolve(slot1).unwrap().complete(33);
        });

        assert!(f.hw.kick_rx(1));
        f.hw.flush_work();
        writer.join().unwrap();
        assert_eq!(c.lens(), vec![10, 33]);
        assert_eq!(rxq.free_idx().get(), 2);
        assert_eq!(rxq.slot_states()[1], (true, true));
        assert_eq!(f.exception_count(), 0);
    }

    #[test]
    fn surviving_alias_takes_over_delivery() {
        let f = Fixture::new(HwId::Md);
        let first = Collector::default();
        let second = Collector::default();
        let rxq = f.open_rx(2, &first).unwrap();
        f.open_rx(17, &second).unwrap();
        assert_eq!(rxq.receiver(), Some(2));

        f.hw.rxq_free(2).unwrap();
        assert_eq!(rxq.receiver(), Some(17));
        assert_eq!(rxq.users(), vec![17]);
        f.p.model.complete_rx(2, &[40]);
        f.service();
        assert_eq!(first.calls(), 0);
        assert_eq!(second.lens(), vec![40]);

        // A returning user queues up behind the current receiver.
        let third = Collector::default();
        f.open_rx(2, &third).unwrap();
        assert_eq!(rxq.users(), vec![17, 2]);
        f.p.model.complete_rx(2, &[41]);
        f.service();
        assert_eq!(second.lens(), vec![40, 41]);
        assert_eq!(third.calls(), 0);

        f.hw.rxq_free(17).unwrap();
        assert_eq!(rxq.receiver(), Some(2));
        f.hw.rxq_free(2).unwrap();
        assert!(f.hw.rxq(2).is_none());
        assert_eq!(f.p.pool.outstanding(), 0);
    }

    #[test]
    fn failed_replenish_is_retried() {
        let flaky = FlakyPool::new(VQ_MTU_3_5K, 64);
        let (res, p) = parts_with(
            HwId::Md,
            CldmaConfig::default(),
            GPD_COUNT,
            Some(flaky.clone()),
        );
        let f = Fixture::init(res, p);
        let c = Collector::default();
        let rxq = f.open_rx(0, &c).unwrap();

        flaky.fail_all(true);
        assert_eq!(f.p.model.complete_rx(0, &[64]), 1);
        f.service();
        assert_eq!(c.lens(), vec![64]);
        assert_eq!(rxq.free_idx().get(), 0);
        assert_eq!(rxq.slot_states()[0], (false, false));
        assert_eq!(rxq.armed(), RX_REQ_NUM - 1);

        flaky.fail_all(false);
        assert!(f.hw.kick_rx(0));
        f.hw.flush_work();
        assert_eq!(rxq.free_idx().get(), 1);
        assert_eq!(rxq.slot_states()[0], (true, true));
        assert_eq!(c.calls(), 1);

        // The recovered slot takes part in the next lap.
        assert_eq!(f.p.model.complete_rx(0, &[7; RX_REQ_NUM]), RX_REQ_NUM);
        f.service();
        assert_eq!(c.calls(), RX_REQ_NUM + 1);
        assert_eq!(rxq.free_idx().get(), 1);
        assert_eq!(flaky.inner.outstanding(), RX_REQ_NUM);
    }

    #[test]
    fn stale_ownership_stops_the_walk() {
        let f = Fixture::new(HwId::Md);
        let c = Collector::default();
        let rxq = f.open_rx(1, &c).unwrap();
        assert_eq!(f.p.model.complete_rx(1, &[10]), 1);
        // The cursor skips slot 1 without releasing it.
        f.p.model.advance_rx_cursor(1, 1);
        assert_eq!(f.p.model.cur_addr(Direction::Rx, 1), rxq.gpd_addr(2).unwrap());

        f.service();
        assert_eq!(c.lens(), vec![10]);
        assert_eq!(rxq.free_idx().get(), 1);
        assert_eq!(rxq.slot_states()[1], (true, true));
        assert_eq!(rxq.armed(), RX_REQ_NUM);
        assert_eq!(f.exception_count(), 0);
    }

    #[test]
    fn open_rules() {
        let f = Fixture::new(HwId::Md);
        let c = Collector::default();
        assert!(matches!(
            f.open_rx(12, &c).err(),
            Some(CldmaError::InvalidArgument(_))
        ));
        assert_eq!(f.open_rx(40, &c).err(), Some(CldmaError::InvalidQueue(40)));

        // Crash dump channel: few, large buffers.
        let dump = f.open_rx(7, &c).unwrap();
        assert_eq!(dump.capacity(), 4);
        assert_eq!(dump.mtu(), VQ_MTU_63K);
        assert_eq!(f.p.jumbo.outstanding(), 4);
        assert_eq!(f.p.pool.outstanding(), 0);

        let other = Collector::default();
        let a = f.open_rx(2, &c).unwrap();
        let b = f.open_rx(17, &other).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(f.open_rx(17, &other).err(), Some(CldmaError::QueueExists(17)));
        f.p.model.complete_rx(2, &[5]);
        f.service();
        assert_eq!(c.lens(), vec![5]);
        assert_eq!(other.calls(), 0);

        f.hw.rxq_free(2).unwrap();
        assert!(f.hw.rxq(2).is_some());
        f.hw.rxq_free(17).unwrap();
        assert!(f.hw.rxq(2).is_none());
        assert_eq!(f.hw.rxq_free(17), Err(CldmaError::QueueNotOpen));
        assert!(!f.hw.kick_rx(2));

        f.hw.rxq_free(7).unwrap();
        assert_eq!(f.p.jumbo.outstanding(), 0);
    }
}
