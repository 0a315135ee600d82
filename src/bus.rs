// src/bus.rs

//! Log Broadcast Bus: per-task fan-out of decoded output chunks.
//!
//! Each subscriber owns an unbounded channel receiver, so `emit` never
//! blocks the executor's reader loop and subscribers consume chunks on
//! whatever task or thread they run on. There is no replay: a late
//! subscriber only sees output produced after it subscribed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;
use tracing::trace;

type Subscribers = HashMap<String, Vec<(u64, mpsc::UnboundedSender<String>)>>;

#[derive(Clone, Default)]
pub struct LogBus {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    subscribers: Mutex<Subscribers>,
    next_id: AtomicU64,
}

/// Receiving end of one subscription.
#[derive(Debug)]
pub struct Subscription {
    pub id: u64,
    pub task_id: String,
    pub rx: mpsc::UnboundedReceiver<String>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }
}

impl LogBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Subscribers> {
        // A panicking subscriber holder cannot corrupt a map of senders.
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn subscribe(&self, task_id: &str) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock()
            .entry(task_id.to_string())
            .or_default()
            .push((id, tx));
        Subscription {
            id,
            task_id: task_id.to_string(),
            rx,
        }
    }

    /// Returns whether the subscription existed.
    pub fn unsubscribe(&self, task_id: &str, id: u64) -> bool {
        let mut subs = self.lock();
        let Some(list) = subs.get_mut(task_id) else {
            return false;
        };
        let before = list.len();
        list.retain(|(sid, _)| *sid != id);
        let removed = list.len() != before;
        if list.is_empty() {
            subs.remove(task_id);
        }
        removed
    }

    /// Deliver `chunk` to every live subscriber of `task_id`.
    ///
    /// Subscribers whose receiver is gone are dropped. Returns the number
    /// of deliveries.
    pub fn emit(&self, task_id: &str, chunk: &str) -> usize {
        let mut subs = self.lock();
        let Some(list) = subs.get_mut(task_id) else {
            return 0;
        };
        list.retain(|(_, tx)| tx.send(chunk.to_string()).is_ok());
        let delivered = list.len();
        if list.is_empty() {
            subs.remove(task_id);
        }
        trace!(task_id, delivered, bytes = chunk.len(), "emitted log chunk");
        delivered
    }

    pub fn subscriber_count(&self, task_id: &str) -> usize {
        self.lock().get(task_id).map_or(0, Vec::len)
    }
}
