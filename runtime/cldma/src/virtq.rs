// Licensed under the Apache-2.0 license

//! Static binding of virtual queues to controller queues.

use num_enum::{IntoPrimitive, TryFromPrimitive};

pub const VQ_MTU_3_5K: usize = 3584;
pub const VQ_MTU_7K: usize = 7168;
pub const VQ_MTU_63K: usize = 64512;

pub const TX_REQ_NUM: usize = 16;
pub const RX_REQ_NUM: usize = 16;
const RX_REQ_NUM_JUMBO: usize = 4;

pub const VQ_NUM: usize = 19;

/// Controller instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum HwId {
    Md = 0,
    Ap = 1,
}

impl HwId {
    pub const ALL: [HwId; 2] = [HwId::Md, HwId::Ap];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VirtqInfo {
    pub vqno: usize,
    pub hif_id: HwId,
    pub txqno: usize,
    pub rxqno: usize,
    pub tx_mtu: usize,
    pub rx_mtu: usize,
    pub tx_req_num: usize,
    pub rx_req_num: usize,
}

const fn vq(
    vqno: usize,
    hif_id: HwId,
    txqno: usize,
    rxqno: usize,
    rx_mtu: usize,
    rx_req_num: usize,
) -> VirtqInfo {
    VirtqInfo {
        vqno,
        hif_id,
        txqno,
        rxqno,
        tx_mtu: VQ_MTU_3_5K,
        rx_mtu,
        tx_req_num: TX_REQ_NUM,
        rx_req_num,
    }
}

static VQ_TABLE: [VirtqInfo; VQ_NUM] = [
    // control and bootstrap channels
    vq(0, HwId::Md, 0, 0, VQ_MTU_3_5K, RX_REQ_NUM),
    vq(1, HwId::Md, 1, 1, VQ_MTU_3_5K, RX_REQ_NUM),
    vq(2, HwId::Md, 2, 2, VQ_MTU_3_5K, RX_REQ_NUM),
    vq(3, HwId::Md, 3, 3, VQ_MTU_3_5K, RX_REQ_NUM),
    vq(4, HwId::Md, 4, 4, VQ_MTU_3_5K, RX_REQ_NUM),
    vq(5, HwId::Md, 5, 5, VQ_MTU_7K, RX_REQ_NUM),
    vq(6, HwId::Md, 6, 6, VQ_MTU_3_5K, RX_REQ_NUM),
    // crash dump channel
    vq(7, HwId::Md, 7, 7, VQ_MTU_63K, RX_REQ_NUM_JUMBO),
    vq(8, HwId::Ap, 0, 0, VQ_MTU_3_5K, RX_REQ_NUM),
    vq(9, HwId::Ap, 1, 1, VQ_MTU_3_5K, RX_REQ_NUM),
    vq(10, HwId::Ap, 2, 2, VQ_MTU_3_5K, RX_REQ_NUM),
    vq(11, HwId::Ap, 3, 3, VQ_MTU_3_5K, RX_REQ_NUM),
    vq(12, HwId::Ap, 4, 4, VQ_MTU_3_5K, RX_REQ_NUM),
    vq(13, HwId::Ap, 5, 5, VQ_MTU_3_5K, RX_REQ_NUM),
    vq(14, HwId::Ap, 6, 6, VQ_MTU_3_5K, RX_REQ_NUM),
    vq(15, HwId::Ap, 7, 7, VQ_MTU_63K, RX_REQ_NUM_JUMBO),
    // secondary channels sharing modem queues
    vq(16, HwId::Md, 1, 1, VQ_MTU_3_5K, RX_REQ_NUM),
    vq(17, HwId::Md, 2, 2, VQ_MTU_3_5K, RX_REQ_NUM),
    vq(18, HwId::Ap, 1, 1, VQ_MTU_3_5K, RX_REQ_NUM),
];

pub fn virtq(vqno: usize) -> Option<&'static VirtqInfo> {
    VQ_TABLE.get(vqno)
}

pub fn virtqs() -> &'static [VirtqInfo] {
    &VQ_TABLE
}

/// Virtual queues bound to the given instance.
pub fn virtqs_of(hif_id: HwId) -> impl Iterator<Item = &'static VirtqInfo> {
    VQ_TABLE.iter().filter(move |vq| vq.hif_id == hif_id)
}
