//! Ray tracing acceleration structures.
//!
//! Physical storage is allocated lazily, on the first build or the first
//! time the structure is bound, so scenes can declare structures up front
//! without paying for unused ones.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::backend::{AccelerationStructureHandle, GpuBackend};
use crate::error::GraphicsError;
use crate::types::{BlasDescriptor, TlasDescriptor, TlasInstance};

struct LazyStructure {
    backend: Arc<dyn GpuBackend>,
    size: u64,
    top_level: bool,
    handle: Mutex<Option<AccelerationStructureHandle>>,
    built: AtomicBool,
}

impl LazyStructure {
    fn new(backend: Arc<dyn GpuBackend>, size: u64, top_level: bool) -> Self {
        Self {
            backend,
            size,
            top_level,
            handle: Mutex::new(None),
            built: AtomicBool::new(false),
        }
    }

    fn handle(&self) -> Result<AccelerationStructureHandle, GraphicsError> {
        let mut handle = self.handle.lock();
        if let Some(handle) = *handle {
            return Ok(handle);
        }
        let created = self
            .backend
            .create_acceleration_structure(self.size, self.top_level)?;
        log::trace!(
            "allocated {} acceleration structure {:?} ({} bytes)",
            if self.top_level { "top level" } else { "bottom level" },
            created,
            self.size
        );
        *handle = Some(created);
        Ok(created)
    }

    fn is_allocated(&self) -> bool {
        self.handle.lock().is_some()
    }
}

impl Drop for LazyStructure {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.get_mut().take() {
            self.backend.destroy_acceleration_structure(handle);
        }
    }
}

/// Bottom-level acceleration structure over triangle geometry.
pub struct Blas {
    inner: LazyStructure,
    descriptor: BlasDescriptor,
}

impl Blas {
    pub(crate) fn new(backend: Arc<dyn GpuBackend>, descriptor: BlasDescriptor) -> Self {
        Self {
            inner: LazyStructure::new(backend, descriptor.storage_size(), false),
            descriptor,
        }
    }

    /// Backend handle, allocating storage on first use.
    pub fn handle(&self) -> Result<AccelerationStructureHandle, GraphicsError> {
        self.inner.handle()
    }

    /// Get the descriptor.
    pub fn descriptor(&self) -> &BlasDescriptor {
        &self.descriptor
    }

    /// Whether a build has been recorded.
    pub fn is_built(&self) -> bool {
        self.inner.built.load(Ordering::Acquire)
    }

    /// Whether physical storage exists.
    pub fn is_allocated(&self) -> bool {
        self.inner.is_allocated()
    }

    pub(crate) fn mark_built(&self) {
        self.inner.built.store(true, Ordering::Release);
    }
}

impl std::fmt::Debug for Blas {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Blas")
            .field("geometries", &self.descriptor.geometries.len())
            .field("built", &self.is_built())
            .field("label", &self.descriptor.label)
            .finish()
    }
}

/// Top-level acceleration structure over instances of bottom-level ones.
pub struct Tlas {
    inner: LazyStructure,
    descriptor: TlasDescriptor,
    instances: Mutex<Vec<TlasInstance>>,
}

impl Tlas {
    pub(crate) fn new(backend: Arc<dyn GpuBackend>, descriptor: TlasDescriptor) -> Self {
        Self {
            inner: LazyStructure::new(backend, descriptor.storage_size(), true),
            descriptor,
            instances: Mutex::new(Vec::new()),
        }
    }

    /// Backend handle, allocating storage on first use.
    pub fn handle(&self) -> Result<AccelerationStructureHandle, GraphicsError> {
        self.inner.handle()
    }

    /// Get the descriptor.
    pub fn descriptor(&self) -> &TlasDescriptor {
        &self.descriptor
    }

    /// Whether a build has been recorded.
    pub fn is_built(&self) -> bool {
        self.inner.built.load(Ordering::Acquire)
    }

    /// Whether physical storage exists.
    pub fn is_allocated(&self) -> bool {
        self.inner.is_allocated()
    }

    /// Number of instances of the last build.
    pub fn instance_count(&self) -> usize {
        self.instances.lock().len()
    }

    /// Keep the instances (and their bottom-level structures) alive for as
    /// long as this structure references them.
    pub(crate) fn set_instances(&self, instances: Vec<TlasInstance>) {
        *self.instances.lock() = instances;
        self.inner.built.store(true, Ordering::Release);
    }
}

impl std::fmt::Debug for Tlas {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tlas")
            .field("max_instances", &self.descriptor.max_instances)
            .field("built", &self.is_built())
            .field("label", &self.descriptor.label)
            .finish()
    }
}

static_assertions::assert_impl_all!(Blas: Send, Sync);
static_assertions::assert_impl_all!(Tlas: Send, Sync);
