//! Hardware queues.
//!
//! A [`Queue`] serializes access to one hardware queue. The guard is
//! reentrant: a thread already holding it can acquire it again without
//! blocking, so helpers that submit on their own can be called from inside
//! a larger submission.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};

use crate::backend::{FenceHandle, GpuBackend, SubmitBatch};
use crate::error::GraphicsError;
use crate::types::QueueType;

/// A hardware execution queue guarded by a per-thread reentrant lock.
pub struct Queue {
    queue_type: QueueType,
    lock: ReentrantMutex<()>,
    submissions: AtomicU64,
}

impl Queue {
    pub(crate) fn new(queue_type: QueueType) -> Self {
        Self {
            queue_type,
            lock: ReentrantMutex::new(()),
            submissions: AtomicU64::new(0),
        }
    }

    /// Queue family this queue belongs to.
    pub fn queue_type(&self) -> QueueType {
        self.queue_type
    }

    /// Number of submissions made through this queue.
    pub fn submission_count(&self) -> u64 {
        self.submissions.load(Ordering::Relaxed)
    }

    /// Acquire the queue, blocking while another thread holds it.
    ///
    /// Reacquisition by the thread already holding the queue returns at once.
    pub fn lock(&self) -> QueueGuard<'_> {
        QueueGuard {
            queue: self,
            _guard: self.lock.lock(),
        }
    }

    /// Acquire the queue if no other thread holds it.
    pub fn try_lock(&self) -> Option<QueueGuard<'_>> {
        self.lock.try_lock().map(|guard| QueueGuard {
            queue: self,
            _guard: guard,
        })
    }
}

impl std::fmt::Debug for Queue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Queue")
            .field("queue_type", &self.queue_type)
            .field("submissions", &self.submission_count())
            .finish()
    }
}

/// Exclusive access to a [`Queue`] for the current thread.
pub struct QueueGuard<'a> {
    queue: &'a Queue,
    _guard: ReentrantMutexGuard<'a, ()>,
}

impl QueueGuard<'_> {
    /// Queue family of the held queue.
    pub fn queue_type(&self) -> QueueType {
        self.queue.queue_type
    }

    /// Submit batches to the held queue.
    pub fn submit(
        &self,
        backend: &Arc<dyn GpuBackend>,
        batches: &[SubmitBatch],
        fence: Option<FenceHandle>,
    ) -> Result<(), GraphicsError> {
        crate::profile_scope!("queue_submit");
        log::trace!(
            "Queue {:?}: submitting {} batches (fence: {})",
            self.queue.queue_type,
            batches.len(),
            fence.is_some()
        );
        backend.queue_submit(self.queue.queue_type, batches, fence)?;
        self.queue.submissions.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

static_assertions::assert_impl_all!(Queue: Send, Sync);

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::thread;

    use super::*;
    use crate::backend::DummyBackend;

    #[test]
    fn test_same_thread_reacquires() {
        let queue = Queue::new(QueueType::Graphics);
        let outer = queue.lock();
        let inner = queue.lock();
        assert!(queue.try_lock().is_some());
        drop(inner);
        drop(outer);
    }

    #[test]
    fn test_other_thread_cannot_try_lock_while_held() {
        let queue = Arc::new(Queue::new(QueueType::Compute));
        let guard = queue.lock();

        let other = Arc::clone(&queue);
        let acquired = thread::spawn(move || other.try_lock().is_some())
            .join()
            .unwrap();
        assert!(!acquired);

        drop(guard);
        let other = Arc::clone(&queue);
        let acquired = thread::spawn(move || other.try_lock().is_some())
            .join()
            .unwrap();
        assert!(acquired);
    }

    #[test]
    fn test_blocking_lock_waits_for_release() {
        let queue = Arc::new(Queue::new(QueueType::Graphics));
        let guard = queue.lock();
        let (tx, rx) = mpsc::channel();

        let other = Arc::clone(&queue);
        let handle = thread::spawn(move || {
            let _guard = other.lock();
            tx.send(()).unwrap();
        });

        assert!(rx.recv_timeout(std::time::Duration::from_millis(50)).is_err());
        drop(guard);
        rx.recv().unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn test_submit_counts() {
        let backend: Arc<dyn GpuBackend> = Arc::new(DummyBackend::new());
        let queue = Queue::new(QueueType::Graphics);
        let guard = queue.lock();
        guard.submit(&backend, &[], None).unwrap();
        assert_eq!(guard.queue_type(), QueueType::Graphics);
        drop(guard);
        assert_eq!(queue.submission_count(), 1);
    }
}
