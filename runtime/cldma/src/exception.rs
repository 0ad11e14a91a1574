// Licensed under the Apache-2.0 license

//! Escalation of fatal conditions to the external recovery path.

use crate::virtq::HwId;
use cldma_registers::Direction;
use log::error;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionReason {
    /// A register read back the link-down sentinel.
    LinkDown { dir: Option<Direction>, offset: usize },
    /// A current-descriptor readback was zero or all ones.
    PoisonedCursor { dir: Direction, queue: usize, addr: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionEvent {
    pub hw: HwId,
    pub reason: ExceptionReason,
}

pub trait ExceptionSink: Send + Sync {
    fn report(&self, event: ExceptionEvent);
}

/// Logs and otherwise ignores exceptions.
pub struct LogExceptionSink;

impl ExceptionSink for LogExceptionSink {
    fn report(&self, event: ExceptionEvent) {
        error!("cldma exception: {event:?}");
    }
}

/// Forwards exceptions to a receiver owned by the recovery thread.
pub struct ChannelExceptionSink {
    tx: Mutex<Sender<ExceptionEvent>>,
}

impl ChannelExceptionSink {
    pub fn new() -> (Self, Receiver<ExceptionEvent>) {
        let (tx, rx) = mpsc::channel();
        (Self { tx: Mutex::new(tx) }, rx)
    }
}

impl ExceptionSink for ChannelExceptionSink {
    fn report(&self, event: ExceptionEvent) {
        let tx = self.tx.lock().unwrap_or_else(|e| e.into_inner());
        if tx.send(event).is_err() {
            error!("exception receiver gone, dropping {event:?}");
        }
    }
}

/// Lets one instance report a link failure once per device life.
#[derive(Default)]
pub struct ExceptionLatch {
    raised: AtomicBool,
}

impl ExceptionLatch {
    /// True for the first caller only.
    pub fn trip(&self) -> bool {
        !self.raised.swap(true, Ordering::AcqRel)
    }

    pub fn is_tripped(&self) -> bool {
        self.raised.load(Ordering::Acquire)
    }

    pub fn reset(&self) {
        self.raised.store(false, Ordering::Release);
    }
}
