//! Single-threaded scheduled executor for the updater.
//!
//! One named worker thread owns a due-time queue; tasks run strictly one
//! at a time in due order, and a task reschedules itself by returning
//! `Reschedule::After`. Because everything runs on the worker, no two
//! iterations of any task ever overlap.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// What a task wants after one run.
pub(crate) enum Reschedule {
    After(Duration),
    Done,
}

pub(crate) type Task = Box<dyn FnMut() -> Reschedule + Send>;

enum Op {
    Submit { delay: Duration, task: Task },
    Shutdown { done: Sender<()> },
}

struct Scheduled {
    due: Instant,
    seq: u64,
    task: Task,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}
impl Eq for Scheduled {}
impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.due.cmp(&other.due).then(self.seq.cmp(&other.seq))
    }
}

/// Handle to the worker thread. Dropping without `shutdown()` detaches
/// the worker; it exits when the op channel disconnects.
pub(crate) struct SerialScheduler {
    op_tx: Sender<Op>,
    handle: Option<JoinHandle<()>>,
}

impl SerialScheduler {
    pub fn new(name: &str) -> std::io::Result<Self> {
        let (op_tx, op_rx) = mpsc::channel();
        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || worker_loop(op_rx))?;
        Ok(Self {
            op_tx,
            handle: Some(handle),
        })
    }

    /// Run a task as soon as the worker is free.
    pub fn submit_now(&self, task: Task) {
        self.submit(Duration::ZERO, task);
    }

    /// Run a task after a delay.
    pub fn submit(&self, delay: Duration, task: Task) {
        if self.op_tx.send(Op::Submit { delay, task }).is_err() {
            tracing::warn!("Scheduler worker has stopped; task dropped");
        }
    }

    /// Stop accepting work and wait up to `timeout` for the worker to
    /// finish its current task and exit. Returns `true` on a clean drain.
    /// Queued-but-not-due tasks are abandoned.
    pub fn shutdown(&mut self, timeout: Duration) -> bool {
        let (done_tx, done_rx) = mpsc::channel();
        if self.op_tx.send(Op::Shutdown { done: done_tx }).is_err() {
            // Worker already gone.
            return true;
        }
        let clean = done_rx.recv_timeout(timeout).is_ok();
        if clean {
            if let Some(handle) = self.handle.take() {
                let _ = handle.join();
            }
        }
        clean
    }
}

fn worker_loop(op_rx: mpsc::Receiver<Op>) {
    let mut queue: BinaryHeap<Reverse<Scheduled>> = BinaryHeap::new();
    let mut seq: u64 = 0;

    loop {
        let wait = queue
            .peek()
            .map(|Reverse(next)| next.due.saturating_duration_since(Instant::now()))
            .unwrap_or(Duration::from_secs(3600));

        match op_rx.recv_timeout(wait) {
            Ok(Op::Submit { delay, task }) => {
                queue.push(Reverse(Scheduled {
                    due: Instant::now() + delay,
                    seq,
                    task,
                }));
                seq += 1;
            }
            Ok(Op::Shutdown { done }) => {
                tracing::debug!(abandoned = queue.len(), "Scheduler draining");
                let _ = done.send(());
                return;
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => return,
        }

        while queue
            .peek()
            .is_some_and(|Reverse(next)| next.due <= Instant::now())
        {
            let Reverse(mut scheduled) = queue.pop().expect("peeked entry exists");
            match (scheduled.task)() {
                Reschedule::After(delay) => {
                    scheduled.due = Instant::now() + delay;
                    scheduled.seq = seq;
                    seq += 1;
                    queue.push(Reverse(scheduled));
                }
                Reschedule::Done => {}
            }
        }
    }
}
