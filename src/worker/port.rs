//! Bidirectional channel between a worker and its owner

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use super::queue::MessageQueue;
use super::spawn::WorkerConfig;

static WORKER_COUNTER: AtomicU32 = AtomicU32::new(1);

/// Process-unique worker identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(u32);

impl WorkerId {
    fn next() -> Self {
        Self(WORKER_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The two queues shared by one worker thread and its owner.
///
/// The owner posts into `to_worker` and drains `to_owner`; the worker does the
/// opposite. Each side registers its callback on the queue it drains.
#[derive(Debug)]
pub struct WorkerMessagePort {
    id: WorkerId,
    to_worker: MessageQueue,
    to_owner: MessageQueue,
    terminated: AtomicBool,
}

impl WorkerMessagePort {
    pub fn new(config: &WorkerConfig) -> Arc<Self> {
        Arc::new(Self {
            id: WorkerId::next(),
            to_worker: MessageQueue::with_post_wait(config.post_wait),
            to_owner: MessageQueue::with_post_wait(config.post_wait),
            terminated: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// Owner -> worker
    pub fn to_worker(&self) -> &MessageQueue {
        &self.to_worker
    }

    /// Worker -> owner
    pub fn to_owner(&self) -> &MessageQueue {
        &self.to_owner
    }

    /// Signal the worker loop to stop. Both queues stop accepting messages.
    ///
    /// Returns `true` for the call that actually flipped the flag.
    pub fn terminate(&self) -> bool {
        let first = !self.terminated.swap(true, Ordering::SeqCst);
        self.to_worker.close();
        self.to_owner.close();
        first
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }
}
