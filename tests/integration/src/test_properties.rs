// Licensed under the Apache-2.0 license

//! Ring invariants under randomized traffic.

#[cfg(test)]
mod test {
    use crate::test::{parts_with, tx_request, Collector, Fixture, FlakyPool, TxLog, GPD_COUNT};
    use cldma::{
        CldmaConfig, CldmaError, DmaDirection, DmaMapper, HwId, RX_REQ_NUM, TX_REQ_NUM,
        VQ_MTU_3_5K,
    };
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    const SEED: u64 = 0x00c1_d3a0;

    #[test]
    fn indices_wrap_modulo_ring_size() {
        let f = Fixture::new(HwId::Md);
        let txq = f.hw.txq_alloc(0).unwrap();
        let c = Collector::default();
        let rxq = f.open_rx(0, &c).unwrap();
        let log = TxLog::default();
        let k = 5;
        let ops = 2 * TX_REQ_NUM + k;

        for op in 0..ops {
            f.send(0, tx_request(&f.hw, 64, op, &log)).unwrap();
            assert_eq!(f.p.model.complete_tx(0, 1), 1);
            assert_eq!(f.p.model.complete_rx(0, &[64]), 1);
            f.service();
        }
        assert_eq!(txq.wr_idx().get(), k);
        assert_eq!(txq.free_idx().get(), k);
        assert_eq!(rxq.free_idx().get(), k % RX_REQ_NUM);
        assert_eq!(txq.budget(), TX_REQ_NUM);
        assert_eq!(log.lock().unwrap().len(), ops);
        assert_eq!(c.calls(), ops);
    }

    #[test]
    fn tx_budget_is_conserved() {
        let mut rng = StdRng::seed_from_u64(SEED);
        let f = Fixture::new(HwId::Ap);
        let txq = f.hw.txq_alloc(11).unwrap();
        let hwq = txq.hwq();
        let log = TxLog::default();
        let mut accepted = Vec::new();

        for tag in 0..600 {
            match rng.gen_range(0..3) {
                0 => {
                    let len = rng.gen_range(1..=VQ_MTU_3_5K);
                    match f.send(11, tx_request(&f.hw, len, tag, &log)) {
                        Ok(()) => accepted.push(tag),
                        Err(e) => {
                            assert_eq!(e.error, CldmaError::Busy);
                            assert_eq!(txq.budget(), 0);
                            f.p.mapper.unmap(e.req.dma_addr, e.req.len, DmaDirection::ToDevice);
                        }
                    }
                }
                1 => {
                    f.p.model.complete_tx(hwq, rng.gen_range(0..=6));
                }
                _ => f.service(),
            }
            assert_eq!(txq.budget() + txq.in_flight(), TX_REQ_NUM);
            assert_eq!(f.p.mapper.live(), txq.in_flight());
        }

        f.p.model.complete_tx(hwq, TX_REQ_NUM);
        f.service();
        assert_eq!(txq.budget(), TX_REQ_NUM);
        let log = log.lock().unwrap();
        assert!(log.iter().all(|(_, st)| st.is_ok()));
        assert_eq!(log.iter().map(|(tag, _)| *tag).collect::<Vec<_>>(), accepted);
        assert_eq!(f.p.mapper.stray_unmaps(), 0);
    }

    #[test]
    fn rx_delivers_in_arming_order() {
        let mut rng = StdRng::seed_from_u64(SEED + 1);
        let f = Fixture::new(HwId::Md);
        let c = Collector::default();
        let _rxq = f.open_rx(4, &c).unwrap();
        let mut produced = Vec::new();

        for _ in 0..300 {
            if rng.gen_bool(0.6) {
                let lens: Vec<u16> = (0..rng.gen_range(0..=20))
                    .map(|_| rng.gen_range(1..=VQ_MTU_3_5K as u16))
                    .collect();
                let done = f.p.model.complete_rx(4, &lens);
                produced.extend(lens[..done].iter().map(|&l| l as usize));
            } else {
                f.service();
            }
        }
        f.service();
        assert_eq!(c.lens(), produced);
        assert_eq!(f.p.mapper.stray_unmaps(), 0);
    }

    #[test]
    fn rx_buffers_mapped_once_per_arming() {
        let mut rng = StdRng::seed_from_u64(SEED + 2);
        let f = Fixture::new(HwId::Md);
        let vqs = [0, 1, 3, 5, 6, 7];

        for _ in 0..24 {
            let vqno = vqs[rng.gen_range(0..vqs.len())];
            let c = Collector::default();
            let rxq = f.open_rx(vqno, &c).unwrap();
            let hwq = rxq.hwq();
            for _ in 0..rng.gen_range(0..40) {
                match rng.gen_range(0..3) {
                    0 => {
                        let n = rng.gen_range(0..rxq.capacity() + 2);
                        f.p.model.complete_rx(hwq, &vec![32; n]);
                    }
                    1 => f.service(),
                    _ => {
                        f.hw.kick_rx(hwq);
                        f.hw.flush_work();
                    }
                }
                assert_eq!(f.p.mapper.live(), rxq.armed());
                assert_eq!(f.p.mapper.stray_unmaps(), 0);
            }
            f.hw.rxq_free(vqno).unwrap();
            drop(rxq);
            assert_eq!(f.p.mapper.live(), 0);
            assert_eq!(f.p.mapper.stray_unmaps(), 0);
            assert_eq!(f.p.gpds.in_use(), 0);
            assert_eq!(f.p.pool.outstanding(), 0);
            assert_eq!(f.p.jumbo.outstanding(), 0);
        }
    }

    #[test]
    fn failed_open_leaves_nothing_behind() {
        let c = Collector::default();
        for n in 1..=RX_REQ_NUM {
            let flaky = FlakyPool::new(VQ_MTU_3_5K, 64);
            let (res, p) = parts_with(
                HwId::Md,
                CldmaConfig::default(),
                GPD_COUNT,
                Some(flaky.clone()),
            );
            let f = Fixture::init(res, p);
            flaky.fail_at(n);
            assert_eq!(f.open_rx(0, &c).err(), Some(CldmaError::NoMemory));
            assert_eq!(flaky.inner.outstanding(), 0, "buffer {n}");
            assert_eq!(f.p.mapper.live(), 0, "buffer {n}");
            assert_eq!(f.p.gpds.in_use(), 0, "buffer {n}");
            assert!(f.hw.rxq(0).is_none());

            flaky.fail_at(0);
            assert!(f.open_rx(0, &c).is_ok());
        }

        for gpds in 1..RX_REQ_NUM {
            let (res, p) = parts_with(HwId::Ap, CldmaConfig::default(), gpds, None);
            let f = Fixture::init(res, p);
            assert_eq!(f.open_rx(8, &c).err(), Some(CldmaError::NoMemory));
            assert_eq!(f.hw.txq_alloc(8).err(), Some(CldmaError::NoMemory));
            assert_eq!(f.p.gpds.in_use(), 0, "descriptor {gpds}");
            assert_eq!(f.p.pool.outstanding(), 0, "descriptor {gpds}");
            assert_eq!(f.p.mapper.live(), 0, "descriptor {gpds}");
        }
    }

    #[test]
    fn close_drains_completed_slots() {
        let f = Fixture::new(HwId::Md);
        let c = Collector::default();
        let rxq = f.open_rx(6, &c).unwrap();
        assert_eq!(f.p.model.complete_rx(6, &[10, 20, 30]), 3);

        // No interrupt serviced: the data is still sitting in the ring.
        f.hw.rxq_free(6).unwrap();
        assert_eq!(c.lens(), vec![10, 20, 30]);
        assert_eq!(f.p.mapper.live(), 0);
        assert_eq!(f.p.pool.outstanding(), 0);
        drop(rxq);
        assert_eq!(f.p.gpds.in_use(), 0);
    }
}
