// Licensed under the Apache-2.0 license

//! Lifecycle of one hardware queue.
//!
//! `Busy` is entered each time the interrupt path schedules work and left
//! when the work run finishes. A queue only moves to `Closed` after its
//! pending work has been flushed.

use log::debug;
use smlang::statemachine;
use std::sync::Mutex;

statemachine! {
    derive_states: [Clone, Debug],
    derive_events: [Clone, Copy, Debug],
    transitions: {
        *Closed + Open = Opening,
        Opening + Ready = Armed,
        Opening + Fail = Closed,
        Armed + Dispatch = Busy,
        Busy + Dispatch = Busy,
        Busy + Done = Armed,
        Armed + Stop = Stopping,
        Busy + Stop = Stopping,
        Stopping + Done = Stopping,
        Stopping + Flushed = Closed,
    }
}

pub struct Context;

impl StateMachineContext for Context {}

/// Thread-safe wrapper tracking the current lifecycle state.
pub struct QueueLifecycle {
    name: String,
    sm: Mutex<StateMachine<Context>>,
    current: Mutex<States>,
}

impl QueueLifecycle {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sm: Mutex::new(StateMachine::new(Context)),
            current: Mutex::new(States::Closed),
        }
    }

    /// Applies `event`; returns false if it is not valid in the current state.
    pub fn fire(&self, event: Events) -> bool {
        let mut sm = self.sm.lock().unwrap_or_else(|e| e.into_inner());
        match sm.process_event(event).map(|s| s.clone()) {
            Ok(next) => {
                let mut cur = self.current.lock().unwrap_or_else(|e| e.into_inner());
                if *cur != next {
                    debug!("{}: {:?} -> {:?}", self.name, *cur, next);
                }
                *cur = next;
                true
            }
            Err(_) => {
                debug!("{}: {:?} ignored", self.name, event);
                false
            }
        }
    }

    pub fn state(&self) -> States {
        self.current
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}
