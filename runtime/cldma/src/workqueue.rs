// Licensed under the Apache-2.0 license

//! Deferred work for interrupt bottom halves.
//!
//! Every [`Work`] owns a channel and a worker thread, so a work item never
//! runs concurrently with itself. Queueing is idempotent while the item is
//! pending: the interrupt path can request a run as often as it likes and
//! only learns whether its request was the one that scheduled it.

use crate::pm::SleepToken;
use log::{debug, warn};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle, ThreadId};

pub type WorkFn = Box<dyn Fn() + Send + Sync>;

struct WorkMsg {
    // Released once the run that consumed this message finished.
    _token: Option<SleepToken>,
}

#[derive(Default)]
struct WorkState {
    pending: bool,
    running: bool,
    closed: bool,
    runs: u64,
}

struct Shared {
    state: Mutex<WorkState>,
    idle: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, WorkState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Factory of work items for one controller instance.
pub struct WorkQueue {
    name: String,
    live: Arc<AtomicUsize>,
}

impl WorkQueue {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            live: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Work items created by this queue that still exist.
    pub fn live_items(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    pub fn create(&self, item: &str, f: WorkFn) -> std::io::Result<Work> {
        let shared = Arc::new(Shared {
            state: Mutex::new(WorkState::default()),
            idle: Condvar::new(),
        });
        let (tx, rx) = mpsc::channel::<WorkMsg>();
        let worker_shared = shared.clone();
        let handle = thread::Builder::new()
            .name(format!("{}-{}", self.name, item))
            .spawn(move || {
                for msg in rx {
                    let run = {
                        let mut st = worker_shared.lock();
                        st.pending = false;
                        st.running = !st.closed;
                        st.running
                    };
                    if run {
                        f();
                    }
                    drop(msg);
                    let mut st = worker_shared.lock();
                    st.running = false;
                    if run {
                        st.runs += 1;
                    }
                    worker_shared.idle.notify_all();
                }
            })?;
        self.live.fetch_add(1, Ordering::AcqRel);
        debug!("{}-{}: worker started", self.name, item);
        Ok(Work {
            tx: Some(tx),
            worker: handle.thread().id(),
            handle: Some(handle),
            shared,
            live: self.live.clone(),
        })
    }
}

pub struct Work {
    tx: Option<Sender<WorkMsg>>,
    handle: Option<JoinHandle<()>>,
    worker: ThreadId,
    shared: Arc<Shared>,
    live: Arc<AtomicUsize>,
}

impl Work {
    /// Schedules a run. Returns `false` if a run was already pending, in
    /// which case `token` is released right away.
    pub fn queue(&self, token: Option<SleepToken>) -> bool {
        {
            let mut st = self.shared.lock();
            if st.pending || st.closed {
                return false;
            }
            st.pending = true;
        }
        let sent = self
            .tx
            .as_ref()
            .is_some_and(|tx| tx.send(WorkMsg { _token: token }).is_ok());
        if !sent {
            self.shared.lock().pending = false;
        }
        sent
    }

    pub fn is_pending(&self) -> bool {
        self.shared.lock().pending
    }

    /// Completed runs so far.
    pub fn runs(&self) -> u64 {
        self.shared.lock().runs
    }

    /// Waits until no run is pending or executing.
    pub fn flush(&self) {
        if thread::current().id() == self.worker {
            warn!("work flushed from its own worker, skipping");
            return;
        }
        let mut st = self.shared.lock();
        while st.pending || st.running {
            st = self.shared.idle.wait(st).unwrap_or_else(|e| e.into_inner());
        }
    }
}

impl Drop for Work {
    fn drop(&mut self) {
        self.shared.lock().closed = true;
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            // A queue released from inside its own work run cannot join itself.
            if thread::current().id() != self.worker && handle.join().is_err() {
                warn!("worker thread panicked");
            }
        }
        self.live.fetch_sub(1, Ordering::AcqRel);
    }
}
