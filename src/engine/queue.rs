use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::engine::error::EnqueueError;

pub const QUEUE_CAPACITY: usize = 256;

/// A pending install request. The target is an index into the device list
/// captured at enqueue time, so later target changes do not affect it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub path: String,
    pub target: usize,
}

#[derive(Debug, Default)]
struct QueueState {
    pending: Vec<QueueEntry>,
    installing: Option<String>,
}

/// FIFO install queue shared between the foreground (producer) and the
/// worker (consumer). Cloning yields another handle to the same queue.
#[derive(Debug, Clone, Default)]
pub struct InstallQueue {
    inner: Arc<Mutex<QueueState>>,
}

impl InstallQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `path` at the tail unless it is already pending, is the
    /// path currently being installed, or the queue is full.
    pub fn enqueue(&self, path: impl Into<String>, target: usize) -> Result<(), EnqueueError> {
        let path = path.into();
        let mut state = self.lock();

        if state.installing.as_deref() == Some(path.as_str())
            || state.pending.iter().any(|entry| entry.path == path)
        {
            tracing::debug!("{path} is already queued or installing");
            return Err(EnqueueError::DuplicateEntry(path));
        }

        if state.pending.len() >= QUEUE_CAPACITY {
            return Err(EnqueueError::QueueFull {
                capacity: QUEUE_CAPACITY,
            });
        }

        tracing::info!("queued {path} (target #{target})");
        state.pending.push(QueueEntry { path, target });
        Ok(())
    }

    pub fn peek_head(&self) -> Option<QueueEntry> {
        self.lock().pending.first().cloned()
    }

    pub fn pop_head(&self) {
        let mut state = self.lock();
        if !state.pending.is_empty() {
            let entry = state.pending.remove(0);
            tracing::debug!("dequeued {}", entry.path);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.lock().pending.is_empty()
    }

    pub fn len(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn entries(&self) -> Vec<QueueEntry> {
        self.lock().pending.clone()
    }

    pub fn set_installing(&self, path: Option<String>) {
        self.lock().installing = path;
    }

    pub fn installing(&self) -> Option<String> {
        self.lock().installing.clone()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_path_is_rejected_and_keeps_first_target() {
        let queue = InstallQueue::new();
        queue.enqueue("/pkg/a.zip", 0).unwrap();

        let err = queue.enqueue("/pkg/a.zip", 1).unwrap_err();
        assert_eq!(err, EnqueueError::DuplicateEntry("/pkg/a.zip".into()));

        assert_eq!(
            queue.entries(),
            vec![QueueEntry {
                path: "/pkg/a.zip".into(),
                target: 0
            }]
        );
    }

    #[test]
    fn path_identity_is_case_sensitive() {
        let queue = InstallQueue::new();
        queue.enqueue("/pkg/A.zip", 0).unwrap();
        queue.enqueue("/pkg/a.zip", 0).unwrap();
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn installing_path_cannot_be_requeued() {
        let queue = InstallQueue::new();
        queue.set_installing(Some("/titles/game/".into()));

        assert!(matches!(
            queue.enqueue("/titles/game/", 0),
            Err(EnqueueError::DuplicateEntry(_))
        ));

        queue.set_installing(None);
        assert!(queue.enqueue("/titles/game/", 0).is_ok());
    }

    #[test]
    fn pop_head_preserves_order_of_remaining_entries() {
        let queue = InstallQueue::new();
        for name in ["a", "b", "c", "d"] {
            queue.enqueue(format!("/pkg/{name}.zip"), 0).unwrap();
        }

        queue.pop_head();

        let paths: Vec<_> = queue.entries().into_iter().map(|e| e.path).collect();
        assert_eq!(paths, ["/pkg/b.zip", "/pkg/c.zip", "/pkg/d.zip"]);
        assert_eq!(queue.peek_head().map(|e| e.path).as_deref(), Some("/pkg/b.zip"));
    }

    #[test]
    fn pop_head_on_empty_queue_is_a_no_op() {
        let queue = InstallQueue::new();
        queue.pop_head();
        assert!(queue.is_empty());
        assert!(queue.peek_head().is_none());
    }

    #[test]
    fn enqueue_beyond_capacity_reports_queue_full() {
        let queue = InstallQueue::new();
        for i in 0..QUEUE_CAPACITY {
            queue.enqueue(format!("/pkg/{i}.zip"), 0).unwrap();
        }

        assert_eq!(
            queue.enqueue("/pkg/overflow.zip", 0),
            Err(EnqueueError::QueueFull {
                capacity: QUEUE_CAPACITY
            })
        );
        assert_eq!(queue.len(), QUEUE_CAPACITY);

        queue.pop_head();
        assert!(queue.enqueue("/pkg/overflow.zip", 0).is_ok());
    }

    #[test]
    fn clones_share_the_same_queue() {
        let producer = InstallQueue::new();
        let consumer = producer.clone();

        let handle = std::thread::spawn(move || {
            for i in 0..32 {
                producer.enqueue(format!("/pkg/{i}.zip"), 0).unwrap();
            }
        });
        handle.join().unwrap();

        assert_eq!(consumer.len(), 32);
        assert_eq!(consumer.peek_head().unwrap().path, "/pkg/0.zip");
    }
}
