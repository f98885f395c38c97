//! GPU synchronization primitives.
//!
//! This module provides owned wrappers over backend fences and semaphores
//! for coordinating work between the CPU and GPU, and between different GPU
//! submissions.

use std::sync::Arc;
use std::time::Duration;

use crate::backend::{FenceHandle, GpuBackend, SemaphoreHandle};
use crate::error::GraphicsError;

/// GPU semaphore for ordering submissions.
///
/// Semaphores are used for GPU-GPU synchronization:
/// - One submission signals the semaphore when complete
/// - Another submission waits on the semaphore before starting
///
/// Unlike fences, semaphores cannot be waited on from the CPU.
pub struct Semaphore {
    backend: Arc<dyn GpuBackend>,
    handle: SemaphoreHandle,
}

impl Semaphore {
    pub(crate) fn new(backend: Arc<dyn GpuBackend>) -> Result<Self, GraphicsError> {
        let handle = backend.create_semaphore()?;
        Ok(Self { backend, handle })
    }

    /// Backend handle.
    pub fn handle(&self) -> SemaphoreHandle {
        self.handle
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        self.backend.destroy_semaphore(self.handle);
    }
}

impl std::fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Semaphore").field(&self.handle).finish()
    }
}

/// Status of a fence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceStatus {
    /// The fence has not yet been signaled.
    Unsignaled,
    /// The fence has been signaled (GPU work complete).
    Signaled,
}

/// CPU-GPU synchronization primitive.
///
/// Fences allow the CPU to wait for GPU work to complete. Every frame slot
/// owns one; the device waits on it before reusing the slot's command lists.
///
/// # Example
///
/// ```ignore
/// backend.queue_submit(queue, &batches, Some(fence.handle()))?;
///
/// // Later, before reusing frame resources:
/// if !fence.wait(timeout)? {
///     return Err(GraphicsError::FenceTimeout(timeout));
/// }
/// fence.reset()?;
/// ```
pub struct Fence {
    backend: Arc<dyn GpuBackend>,
    handle: FenceHandle,
}

impl Fence {
    /// Create a fence, optionally already signaled.
    pub(crate) fn new(backend: Arc<dyn GpuBackend>, signaled: bool) -> Result<Self, GraphicsError> {
        let handle = backend.create_fence(signaled)?;
        Ok(Self { backend, handle })
    }

    /// Backend handle.
    pub fn handle(&self) -> FenceHandle {
        self.handle
    }

    /// Check the current status of the fence.
    pub fn status(&self) -> Result<FenceStatus, GraphicsError> {
        Ok(if self.backend.fence_status(self.handle)? {
            FenceStatus::Signaled
        } else {
            FenceStatus::Unsignaled
        })
    }

    /// Check if the fence is signaled (non-blocking).
    pub fn is_signaled(&self) -> Result<bool, GraphicsError> {
        Ok(self.status()? == FenceStatus::Signaled)
    }

    /// Wait for the fence with a timeout.
    ///
    /// Returns `true` if the fence was signaled, `false` if the timeout elapsed.
    pub fn wait(&self, timeout: Duration) -> Result<bool, GraphicsError> {
        self.backend.wait_for_fences(&[self.handle], timeout)
    }

    /// Reset the fence to unsignaled state.
    ///
    /// Must only be called when no GPU work is pending on this fence.
    pub fn reset(&self) -> Result<(), GraphicsError> {
        self.backend.reset_fences(&[self.handle])
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        self.backend.destroy_fence(self.handle);
    }
}

impl std::fmt::Debug for Fence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Fence").field(&self.handle).finish()
    }
}

static_assertions::assert_impl_all!(Fence: Send, Sync);
static_assertions::assert_impl_all!(Semaphore: Send, Sync);
