//! GPU backend abstraction layer.
//!
//! This module provides a trait-based abstraction over the native driver
//! API. Everything above this layer talks to the GPU exclusively through
//! [`GpuBackend`] and the typed handles in [`handle`].
//!
//! # Available Backends
//!
//! - `dummy`: software backend that keeps buffer and image contents in host
//!   memory and executes transfer commands on submission. Used for testing
//!   and headless tooling.
//!
//! # Architecture
//!
//! Each backend implements the [`GpuBackend`] trait, which provides:
//! - Resource creation and destruction for every object category
//! - Descriptor pool allocation and batched descriptor writes
//! - Command buffer recording and queue submission
//! - Fences and semaphores

pub mod command;
pub mod dummy;
pub mod handle;

use std::sync::Arc;
use std::time::Duration;

use crate::error::GraphicsError;
use crate::types::{
    BufferDescriptor, DescriptorPoolSizes, DescriptorSetLayoutDescriptor, Extent2d,
    ImageDescriptor, PipelineDescriptor, QueryPoolDescriptor, QueueType, RenderPassDescriptor,
    SamplerDescriptor,
};

pub use command::{
    BlasBuildGeometry, BufferBarrier, DescriptorResource, DescriptorWrite, ImageBarrier,
    NativeCommand, SubmitBatch, TlasBuildInstance,
};
pub use dummy::DummyBackend;
pub use handle::{
    AccelerationStructureHandle, BufferHandle, CommandBufferHandle, DescriptorPoolHandle,
    DescriptorSetHandle, DescriptorSetLayoutHandle, FenceHandle, FrameBufferHandle, ImageHandle,
    ObjectKind, PipelineHandle, QueryPoolHandle, RenderPassHandle, SamplerHandle,
    SemaphoreHandle,
};

/// Optional capabilities of a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BackendCapabilities {
    /// Hardware ray tracing (acceleration structures).
    pub ray_tracing: bool,
    /// A compute queue separate from the graphics queue.
    pub dedicated_compute_queue: bool,
    /// A transfer queue separate from the graphics queue.
    pub dedicated_transfer_queue: bool,
}

/// GPU backend trait for abstracting different GPU APIs.
pub trait GpuBackend: Send + Sync + 'static {
    /// Get the backend name.
    fn name(&self) -> &'static str;

    /// Optional capabilities.
    fn capabilities(&self) -> BackendCapabilities;

    // --- buffers ---

    /// Create a buffer.
    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<BufferHandle, GraphicsError>;

    /// Destroy a buffer.
    fn destroy_buffer(&self, buffer: BufferHandle);

    /// Write host data into a host-visible buffer.
    fn write_buffer(&self, buffer: BufferHandle, offset: u64, data: &[u8])
    -> Result<(), GraphicsError>;

    /// Read data from a host-visible buffer.
    fn read_buffer(
        &self,
        buffer: BufferHandle,
        offset: u64,
        size: u64,
    ) -> Result<Vec<u8>, GraphicsError>;

    // --- images and samplers ---

    /// Create an image with a default view over all levels and layers.
    fn create_image(&self, descriptor: &ImageDescriptor) -> Result<ImageHandle, GraphicsError>;

    /// Destroy an image.
    fn destroy_image(&self, image: ImageHandle);

    /// Create a sampler.
    fn create_sampler(&self, descriptor: &SamplerDescriptor)
    -> Result<SamplerHandle, GraphicsError>;

    /// Destroy a sampler.
    fn destroy_sampler(&self, sampler: SamplerHandle);

    // --- descriptors ---

    /// Create a descriptor set layout.
    fn create_descriptor_set_layout(
        &self,
        descriptor: &DescriptorSetLayoutDescriptor,
    ) -> Result<DescriptorSetLayoutHandle, GraphicsError>;

    /// Destroy a descriptor set layout.
    fn destroy_descriptor_set_layout(&self, layout: DescriptorSetLayoutHandle);

    /// Create a descriptor pool.
    fn create_descriptor_pool(
        &self,
        sizes: &DescriptorPoolSizes,
    ) -> Result<DescriptorPoolHandle, GraphicsError>;

    /// Destroy a descriptor pool and every set allocated from it.
    fn destroy_descriptor_pool(&self, pool: DescriptorPoolHandle);

    /// Return every set of the pool to it.
    fn reset_descriptor_pool(&self, pool: DescriptorPoolHandle) -> Result<(), GraphicsError>;

    /// Allocate a set from a pool.
    ///
    /// Returns [`GraphicsError::OutOfPoolMemory`] when the pool is exhausted.
    fn allocate_descriptor_set(
        &self,
        pool: DescriptorPoolHandle,
        layout: DescriptorSetLayoutHandle,
    ) -> Result<DescriptorSetHandle, GraphicsError>;

    /// Apply a batch of descriptor writes in one driver call.
    fn update_descriptor_sets(&self, writes: &[DescriptorWrite]);

    // --- pipelines and passes ---

    /// Create a graphics or compute pipeline.
    fn create_pipeline(
        &self,
        descriptor: &PipelineDescriptor,
    ) -> Result<PipelineHandle, GraphicsError>;

    /// Destroy a pipeline.
    fn destroy_pipeline(&self, pipeline: PipelineHandle);

    /// Create a render pass.
    fn create_render_pass(
        &self,
        descriptor: &RenderPassDescriptor,
    ) -> Result<RenderPassHandle, GraphicsError>;

    /// Destroy a render pass.
    fn destroy_render_pass(&self, render_pass: RenderPassHandle);

    /// Create a frame buffer over attachment images.
    fn create_frame_buffer(
        &self,
        render_pass: RenderPassHandle,
        attachments: &[ImageHandle],
        extent: Extent2d,
    ) -> Result<FrameBufferHandle, GraphicsError>;

    /// Destroy a frame buffer.
    fn destroy_frame_buffer(&self, frame_buffer: FrameBufferHandle);

    // --- queries and acceleration structures ---

    /// Create a query pool.
    fn create_query_pool(
        &self,
        descriptor: &QueryPoolDescriptor,
    ) -> Result<QueryPoolHandle, GraphicsError>;

    /// Destroy a query pool.
    fn destroy_query_pool(&self, pool: QueryPoolHandle);

    /// Read back query results.
    fn query_results(
        &self,
        pool: QueryPoolHandle,
        first_query: u32,
        count: u32,
    ) -> Result<Vec<u64>, GraphicsError>;

    /// Allocate acceleration structure storage.
    fn create_acceleration_structure(
        &self,
        size: u64,
        top_level: bool,
    ) -> Result<AccelerationStructureHandle, GraphicsError>;

    /// Destroy an acceleration structure.
    fn destroy_acceleration_structure(&self, structure: AccelerationStructureHandle);

    // --- command buffers ---

    /// Create a command buffer for a queue.
    fn create_command_buffer(&self, queue: QueueType)
    -> Result<CommandBufferHandle, GraphicsError>;

    /// Destroy a command buffer.
    fn destroy_command_buffer(&self, command_buffer: CommandBufferHandle);

    /// Reset a command buffer and start recording.
    fn begin_command_buffer(&self, command_buffer: CommandBufferHandle)
    -> Result<(), GraphicsError>;

    /// Encode one command.
    fn record(&self, command_buffer: CommandBufferHandle, command: NativeCommand);

    /// Finish recording.
    fn end_command_buffer(&self, command_buffer: CommandBufferHandle)
    -> Result<(), GraphicsError>;

    // --- synchronization ---

    /// Create a fence.
    fn create_fence(&self, signaled: bool) -> Result<FenceHandle, GraphicsError>;

    /// Destroy a fence.
    fn destroy_fence(&self, fence: FenceHandle);

    /// Wait until every fence is signaled. Returns `false` on timeout.
    fn wait_for_fences(
        &self,
        fences: &[FenceHandle],
        timeout: Duration,
    ) -> Result<bool, GraphicsError>;

    /// Whether a fence is signaled (non-blocking).
    fn fence_status(&self, fence: FenceHandle) -> Result<bool, GraphicsError>;

    /// Return fences to the unsignaled state.
    fn reset_fences(&self, fences: &[FenceHandle]) -> Result<(), GraphicsError>;

    /// Create a binary semaphore.
    fn create_semaphore(&self) -> Result<SemaphoreHandle, GraphicsError>;

    /// Destroy a semaphore.
    fn destroy_semaphore(&self, semaphore: SemaphoreHandle);

    // --- submission ---

    /// Submit batches to a queue, signaling `fence` once all of them complete.
    fn queue_submit(
        &self,
        queue: QueueType,
        batches: &[SubmitBatch],
        fence: Option<FenceHandle>,
    ) -> Result<(), GraphicsError>;

    /// Block until the device has no pending work.
    fn wait_idle(&self) -> Result<(), GraphicsError>;
}

/// Selects and creates the appropriate backend based on available features.
pub fn create_backend() -> Result<Arc<dyn GpuBackend>, GraphicsError> {
    log::info!("Using dummy backend");
    Ok(Arc::new(DummyBackend::new()))
}
