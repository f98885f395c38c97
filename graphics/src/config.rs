//! Device configuration.
//!
//! [`DeviceParameters`] is passed to [`GraphicsDevice::new`](crate::GraphicsDevice::new)
//! and fixes the pipelining depth, deletion latency and validation behavior
//! for the lifetime of the device.

use std::time::Duration;

/// Number of descriptor set indices a pipeline can use.
pub const DESCRIPTOR_SET_COUNT: usize = 4;

/// Number of binding points available in each descriptor set.
pub const BINDINGS_PER_DESCRIPTOR_SET: usize = 32;

/// Maximum number of color attachments in a render pass.
pub const MAX_COLOR_ATTACHMENTS: usize = 8;

/// Maximum number of vertex buffer bindings.
pub const MAX_VERTEX_BUFFER_BINDINGS: usize = 16;

/// Default number of frame slots.
pub const DEFAULT_FRAMES_IN_FLIGHT: usize = 2;

/// Default number of frames a released resource waits before it is destroyed.
pub const DEFAULT_FRAMES_TO_DELETION: u64 = 3;

/// Default number of sets and descriptors per kind in a descriptor pool.
pub const DEFAULT_DESCRIPTOR_POOL_SIZE: u32 = 1024;

/// Parameters for creating a [`GraphicsDevice`](crate::GraphicsDevice).
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use cinder_graphics::DeviceParameters;
///
/// let params = DeviceParameters::new()
///     .with_frames_in_flight(3)
///     .with_fence_timeout(Duration::from_secs(5))
///     .with_validation(true);
/// assert_eq!(params.frames_in_flight, 3);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceParameters {
    /// Debug label of the device.
    pub label: Option<String>,
    /// Number of ring-buffered frame slots.
    pub frames_in_flight: usize,
    /// Frames a released resource is kept alive before physical destruction.
    ///
    /// Must be at least `frames_in_flight` so that no in-flight frame can
    /// still reference the resource.
    pub frames_to_deletion: u64,
    /// Set and per-kind descriptor capacity of each backing descriptor pool.
    pub descriptor_pool_size: u32,
    /// Command lists pre-allocated per queue in every frame slot.
    pub command_lists_per_queue: usize,
    /// Upper bound for every fence wait. Expiry is fatal.
    pub fence_timeout: Duration,
    /// Panic on contract violations instead of skipping the operation.
    pub validation: bool,
}

impl Default for DeviceParameters {
    fn default() -> Self {
        Self {
            label: None,
            frames_in_flight: DEFAULT_FRAMES_IN_FLIGHT,
            frames_to_deletion: DEFAULT_FRAMES_TO_DELETION,
            descriptor_pool_size: DEFAULT_DESCRIPTOR_POOL_SIZE,
            command_lists_per_queue: 2,
            fence_timeout: Duration::from_secs(30),
            validation: cfg!(debug_assertions),
        }
    }
}

impl DeviceParameters {
    /// Create parameters with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Set the number of frame slots.
    pub fn with_frames_in_flight(mut self, frames_in_flight: usize) -> Self {
        self.frames_in_flight = frames_in_flight;
        self
    }

    /// Set the deletion latency in frames.
    pub fn with_frames_to_deletion(mut self, frames: u64) -> Self {
        self.frames_to_deletion = frames;
        self
    }

    /// Set the backing descriptor pool capacity.
    pub fn with_descriptor_pool_size(mut self, size: u32) -> Self {
        self.descriptor_pool_size = size;
        self
    }

    /// Set how many command lists are pre-allocated per queue and frame slot.
    pub fn with_command_lists_per_queue(mut self, count: usize) -> Self {
        self.command_lists_per_queue = count;
        self
    }

    /// Set the fence wait timeout.
    pub fn with_fence_timeout(mut self, timeout: Duration) -> Self {
        self.fence_timeout = timeout;
        self
    }

    /// Enable or disable validation.
    pub fn with_validation(mut self, validation: bool) -> Self {
        self.validation = validation;
        self
    }

    /// Check the parameters for consistency.
    pub(crate) fn validate(&self) -> Result<(), crate::GraphicsError> {
        use crate::GraphicsError;

        if self.frames_in_flight == 0 {
            return Err(GraphicsError::InvalidParameter(
                "frames_in_flight must be at least 1".to_string(),
            ));
        }
        if self.frames_to_deletion < self.frames_in_flight as u64 {
            return Err(GraphicsError::InvalidParameter(format!(
                "frames_to_deletion ({}) must cover frames_in_flight ({})",
                self.frames_to_deletion, self.frames_in_flight
            )));
        }
        if self.descriptor_pool_size == 0 {
            return Err(GraphicsError::InvalidParameter(
                "descriptor_pool_size cannot be zero".to_string(),
            ));
        }
        Ok(())
    }
}
