//! Sampler resources.

use std::sync::Arc;

use crate::backend::{GpuBackend, SamplerHandle};
use crate::error::GraphicsError;
use crate::types::SamplerDescriptor;

/// An image sampler.
pub struct Sampler {
    backend: Arc<dyn GpuBackend>,
    handle: SamplerHandle,
    descriptor: SamplerDescriptor,
}

impl Sampler {
    pub(crate) fn new(
        backend: Arc<dyn GpuBackend>,
        descriptor: SamplerDescriptor,
    ) -> Result<Self, GraphicsError> {
        let handle = backend.create_sampler(&descriptor)?;
        Ok(Self {
            backend,
            handle,
            descriptor,
        })
    }

    /// Backend handle.
    pub fn handle(&self) -> SamplerHandle {
        self.handle
    }

    /// Get the sampler descriptor.
    pub fn descriptor(&self) -> &SamplerDescriptor {
        &self.descriptor
    }

    /// Get the sampler label, if set.
    pub fn label(&self) -> Option<&str> {
        self.descriptor.label.as_deref()
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        self.backend.destroy_sampler(self.handle);
    }
}

impl std::fmt::Debug for Sampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sampler")
            .field("handle", &self.handle)
            .field("filter", &self.descriptor.filter)
            .field("label", &self.descriptor.label)
            .finish()
    }
}

static_assertions::assert_impl_all!(Sampler: Send, Sync);
