// Licensed under the Apache-2.0 license

//! Reaction to modem state-machine transitions.

use crate::hw::{CldmaHw, ALL_IRQS};
use cldma_registers::Direction;
use log::{info, warn};

/// Stages of modem exception handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionStage {
    /// The modem reported an exception; transmission must stop.
    Init,
    /// The modem finished flushing its side.
    ClearQueueDone,
    /// Both sides reset their queues; traffic may restart.
    AllQueueReset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsmState {
    Off,
    On,
    PreStart,
    Ready,
    ModemException(ExceptionStage),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsmEvent {
    pub from: FsmState,
    pub to: FsmState,
}

impl FsmEvent {
    pub fn new(from: FsmState, to: FsmState) -> Self {
        Self { from, to }
    }
}

impl CldmaHw {
    pub fn on_fsm_event(&self, event: &FsmEvent) {
        info!("{}: fsm {:?} -> {:?}", self.name(), event.from, event.to);
        match event.to {
            FsmState::Off => {
                self.set_ready(false);
                self.mask_all();
                self.flush_work();
                self.wake.relax();
            }
            FsmState::On | FsmState::PreStart => {
                self.clear_link_error();
                if let Err(e) = self.hw_init() {
                    warn!("{}: init on power up failed: {e}", self.name());
                }
            }
            FsmState::Ready => self.set_ready(true),
            FsmState::ModemException(ExceptionStage::Init) => {
                self.set_ready(false);
                let open = self.open_queues(Direction::Tx);
                if open != 0 && !self.link_error_raised() {
                    if let Err(e) = self.quiesce(Direction::Tx, open) {
                        warn!("{}: tx stop on modem exception: {e}", self.name());
                    }
                }
                self.regs.mask_irq(Direction::Tx, ALL_IRQS);
            }
            FsmState::ModemException(ExceptionStage::ClearQueueDone) => self.ack_all(),
            FsmState::ModemException(ExceptionStage::AllQueueReset) => {
                self.reprogram_queues();
                self.unmask_open_queues();
                self.restart_queues(true);
            }
        }
    }
}
