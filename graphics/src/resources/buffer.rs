//! GPU buffer resources.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::backend::{BufferHandle, GpuBackend};
use crate::device::GraphicsDevice;
use crate::error::GraphicsError;
use crate::types::{AccessFlags, BufferDescriptor, BufferDomain, BufferUsage};

/// A GPU buffer resource.
///
/// Buffers are created by [`GraphicsDevice::create_buffer`] and are reference-counted.
/// They hold a weak reference back to their parent device. Dropping the last
/// client reference does not free GPU memory: the device moves the buffer
/// into deferred deletion and destroys it once in-flight frames are done.
///
/// # Example
///
/// ```ignore
/// let buffer = device.create_buffer(&BufferDescriptor::new(1024, BufferUsage::VERTEX))?;
/// buffer.set_data(&vertices)?;
/// ```
pub struct Buffer {
    device: Weak<GraphicsDevice>,
    backend: Arc<dyn GpuBackend>,
    handle: BufferHandle,
    descriptor: BufferDescriptor,
    access: Mutex<AccessFlags>,
}

impl Buffer {
    /// Create a new buffer (called by GraphicsDevice).
    pub(crate) fn new(
        device: Weak<GraphicsDevice>,
        backend: Arc<dyn GpuBackend>,
        descriptor: BufferDescriptor,
    ) -> Result<Self, GraphicsError> {
        let handle = backend.create_buffer(&descriptor)?;
        Ok(Self {
            device,
            backend,
            handle,
            descriptor,
            access: Mutex::new(AccessFlags::empty()),
        })
    }

    /// Get the parent device, if it still exists.
    pub fn device(&self) -> Option<Arc<GraphicsDevice>> {
        self.device.upgrade()
    }

    /// Backend handle.
    pub fn handle(&self) -> BufferHandle {
        self.handle
    }

    /// Get the buffer descriptor.
    pub fn descriptor(&self) -> &BufferDescriptor {
        &self.descriptor
    }

    /// Get the buffer size in bytes.
    pub fn size(&self) -> u64 {
        self.descriptor.size
    }

    /// Get the buffer usage.
    pub fn usage(&self) -> BufferUsage {
        self.descriptor.usage
    }

    /// Get the buffer label, if set.
    pub fn label(&self) -> Option<&str> {
        self.descriptor.label.as_deref()
    }

    /// Whether the host can map the buffer directly.
    pub fn is_host_visible(&self) -> bool {
        self.descriptor.domain == BufferDomain::Host
    }

    /// Access mask recorded by the last barrier on this buffer.
    pub fn access(&self) -> AccessFlags {
        *self.access.lock()
    }

    pub(crate) fn set_access(&self, access: AccessFlags) {
        *self.access.lock() = access;
    }

    /// Write `data` at the start of the buffer.
    ///
    /// Host-visible buffers are written immediately. Device-local buffers go
    /// through a staging buffer; the copy executes at the start of the next
    /// submitted frame, before any other work of that frame.
    pub fn set_data(&self, data: &[u8]) -> Result<(), GraphicsError> {
        self.set_data_at(0, data)
    }

    /// Write `data` at `offset` bytes into the buffer.
    pub fn set_data_at(&self, offset: u64, data: &[u8]) -> Result<(), GraphicsError> {
        let end = offset.checked_add(data.len() as u64);
        if end.is_none_or(|end| end > self.descriptor.size) {
            return Err(GraphicsError::InvalidParameter(format!(
                "write of {} bytes at offset {} exceeds buffer size {}",
                data.len(),
                offset,
                self.descriptor.size
            )));
        }
        if data.is_empty() {
            return Ok(());
        }
        if self.is_host_visible() {
            return self.backend.write_buffer(self.handle, offset, data);
        }
        if !self.descriptor.usage.contains(BufferUsage::COPY_DST) {
            return Err(GraphicsError::InvalidParameter(
                "staged buffer upload requires COPY_DST usage".to_string(),
            ));
        }
        let device = self.device().ok_or_else(|| {
            GraphicsError::InvalidParameter("buffer outlived its device".to_string())
        })?;
        device.upload_buffer(self, offset, data)
    }

    /// Write a slice of plain-old-data values at the start of the buffer.
    pub fn set_typed<T: bytemuck::Pod>(&self, values: &[T]) -> Result<(), GraphicsError> {
        self.set_data(bytemuck::cast_slice(values))
    }

    /// Read the buffer contents of a host-visible buffer.
    ///
    /// Use [`GraphicsDevice::read_buffer`] for device-local buffers.
    pub fn read_host(&self, offset: u64, size: u64) -> Result<Vec<u8>, GraphicsError> {
        self.backend.read_buffer(self.handle, offset, size)
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        log::trace!("Buffer: destroying {:?} {:?}", self.descriptor.label, self.handle);
        self.backend.destroy_buffer(self.handle);
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("handle", &self.handle)
            .field("size", &self.descriptor.size)
            .field("usage", &self.descriptor.usage)
            .field("label", &self.descriptor.label)
            .finish()
    }
}

/// A buffer replicated once per frame slot.
///
/// CPU writes go to the copy of the current frame slot, so data still read
/// by in-flight frames is never overwritten. The device advances every
/// multi-buffer when a frame completes.
pub struct MultiBuffer {
    buffers: Vec<Arc<Buffer>>,
    current: AtomicUsize,
}

impl MultiBuffer {
    pub(crate) fn new(buffers: Vec<Arc<Buffer>>) -> Self {
        Self {
            buffers,
            current: AtomicUsize::new(0),
        }
    }

    /// Buffer of the current frame slot.
    pub fn current(&self) -> &Arc<Buffer> {
        &self.buffers[self.current.load(Ordering::Acquire) % self.buffers.len()]
    }

    /// Index of the current frame slot.
    pub fn current_index(&self) -> usize {
        self.current.load(Ordering::Acquire)
    }

    /// Buffer of a specific frame slot.
    pub fn get(&self, slot: usize) -> Option<&Arc<Buffer>> {
        self.buffers.get(slot)
    }

    /// Number of copies.
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    /// Whether there are no copies.
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Write `data` into the current frame slot's buffer.
    pub fn set_data(&self, data: &[u8]) -> Result<(), GraphicsError> {
        self.current().set_data(data)
    }

    pub(crate) fn update_frame_slot(&self, slot: usize) {
        self.current.store(slot % self.buffers.len(), Ordering::Release);
    }
}

impl std::fmt::Debug for MultiBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiBuffer")
            .field("copies", &self.buffers.len())
            .field("current", &self.current_index())
            .finish()
    }
}

// Ensure Buffer is Send + Sync
static_assertions::assert_impl_all!(Buffer: Send, Sync);
static_assertions::assert_impl_all!(MultiBuffer: Send, Sync);
