//! Frame slots.
//!
//! With N frames in flight there are N slots, used round-robin:
//!
//! ```text
//! frames_in_flight = 2
//!
//! Slot 0: [Frame 0] ──► [Frame 2] ──► [Frame 4] ──►
//! Slot 1: [Frame 1] ──► [Frame 3] ──► [Frame 5] ──►
//! ```
//!
//! A slot owns the command lists handed out while it is current, the lists
//! submitted with it, a completion fence and the semaphores of its
//! submission graph. Nothing a slot owns is reused before its fence has
//! signaled.

use std::sync::Arc;
use std::time::Duration;

use crate::backend::GpuBackend;
use crate::command::CommandList;
use crate::error::GraphicsError;
use crate::memory::upload::PendingUploads;
use crate::sync::{Fence, Semaphore};
use crate::types::QueueType;

use super::submission::{SemaphorePool, Submission};

/// Per-slot state of the frame ring.
pub(crate) struct FrameSlot {
    pub(crate) fence: Fence,
    /// Signaled by the swap target once the acquired image may be written.
    pub(crate) acquire_semaphore: Semaphore,
    /// Signaled by the frame's final batch; presentation waits on it.
    pub(crate) present_semaphore: Semaphore,
    /// Lists ready to be handed out, per queue type.
    pub(crate) free: [Vec<CommandList>; 3],
    /// Lists submitted with this slot and not yet known to be complete.
    pub(crate) in_flight: Vec<CommandList>,
    /// Staging uploads submitted with this slot.
    pub(crate) uploads: Option<PendingUploads>,
    pub(crate) semaphores: SemaphorePool,
    /// Whether the fence will be signaled by submitted work.
    pub(crate) submitted: bool,
}

impl FrameSlot {
    pub(crate) fn new(backend: &Arc<dyn GpuBackend>) -> Result<Self, GraphicsError> {
        Ok(Self {
            fence: Fence::new(Arc::clone(backend), false)?,
            acquire_semaphore: Semaphore::new(Arc::clone(backend))?,
            present_semaphore: Semaphore::new(Arc::clone(backend))?,
            free: [Vec::new(), Vec::new(), Vec::new()],
            in_flight: Vec::new(),
            uploads: None,
            semaphores: SemaphorePool::default(),
            submitted: false,
        })
    }

    pub(crate) fn take_free(&mut self, queue: QueueType) -> Option<CommandList> {
        self.free[queue.index()].pop()
    }

    pub(crate) fn give_back(&mut self, mut list: CommandList) {
        list.recycle();
        self.free[list.queue().index()].push(list);
    }

    #[cfg(test)]
    pub(crate) fn free_count(&self, queue: QueueType) -> usize {
        self.free[queue.index()].len()
    }

    /// Whether the slot's last submission has completed on the GPU.
    pub(crate) fn is_complete(&self) -> Result<bool, GraphicsError> {
        if !self.submitted {
            return Ok(true);
        }
        self.fence.is_signaled()
    }

    /// Wait for the slot's submission, then make everything it owns
    /// reusable.
    ///
    /// Returns the upload list the slot carried, recycled, so it can go
    /// back to the frame-independent pool. A timed out wait is fatal.
    pub(crate) fn reclaim(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<CommandList>, GraphicsError> {
        if self.submitted {
            if !self.fence.wait(timeout)? {
                log::error!("FrameSlot: fence {:?} not signaled after {timeout:?}", self.fence);
                return Err(GraphicsError::FenceTimeout(timeout));
            }
            self.fence.reset()?;
            self.submitted = false;
        }

        let completed: Vec<CommandList> = self.in_flight.drain(..).collect();
        for list in completed {
            self.give_back(list);
        }
        self.semaphores.recycle();

        Ok(self.uploads.take().map(|uploads| {
            let PendingUploads {
                mut command_list,
                staging,
                ..
            } = uploads;
            command_list.recycle();
            // Staging buffers go back to the registry's sole ownership and
            // are queued for deferred deletion on the next collection.
            drop(staging);
            command_list
        }))
    }
}

/// Ring of frame slots plus the submissions of the frame being built.
pub(crate) struct FrameRing {
    pub(crate) slots: Vec<FrameSlot>,
    pub(crate) current: usize,
    pub(crate) frame_index: u64,
    pub(crate) pending: Vec<Submission>,
    /// Swap image acquired for the frame being built.
    pub(crate) swap_image: Option<u32>,
}

impl FrameRing {
    pub(crate) fn new(
        backend: &Arc<dyn GpuBackend>,
        frames_in_flight: usize,
    ) -> Result<Self, GraphicsError> {
        let slots = (0..frames_in_flight)
            .map(|_| FrameSlot::new(backend))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            slots,
            current: 0,
            frame_index: 0,
            pending: Vec::new(),
            swap_image: None,
        })
    }

    pub(crate) fn current_slot(&mut self) -> &mut FrameSlot {
        &mut self.slots[self.current]
    }

    /// Move to the next slot.
    pub(crate) fn advance(&mut self) {
        self.current = (self.current + 1) % self.slots.len();
        self.frame_index += 1;
        log::debug!(
            "FrameRing: frame {} uses slot {}",
            self.frame_index,
            self.current
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DummyBackend, SubmitBatch};

    #[test]
    fn test_advance_wraps_around() {
        let backend: Arc<dyn GpuBackend> = Arc::new(DummyBackend::new());
        let mut ring = FrameRing::new(&backend, 2).unwrap();
        ring.advance();
        assert_eq!((ring.current, ring.frame_index), (1, 1));
        ring.advance();
        assert_eq!((ring.current, ring.frame_index), (0, 2));
    }

    #[test]
    fn test_reclaim_times_out_on_unsignaled_fence() {
        let backend: Arc<dyn GpuBackend> = Arc::new(DummyBackend::new());
        let mut slot = FrameSlot::new(&backend).unwrap();
        slot.submitted = true;
        let timeout = Duration::from_millis(5);
        assert_eq!(
            slot.reclaim(timeout).err(),
            Some(GraphicsError::FenceTimeout(timeout))
        );
    }

    #[test]
    fn test_reclaim_resets_fence() {
        let backend: Arc<dyn GpuBackend> = Arc::new(DummyBackend::new());
        let mut slot = FrameSlot::new(&backend).unwrap();
        backend
            .queue_submit(
                QueueType::Graphics,
                &[SubmitBatch::default()],
                Some(slot.fence.handle()),
            )
            .unwrap();
        slot.submitted = true;
        assert!(slot.is_complete().unwrap());

        assert!(slot.reclaim(Duration::from_millis(5)).unwrap().is_none());
        assert!(!slot.submitted);
        assert!(!slot.fence.is_signaled().unwrap());
    }
}
