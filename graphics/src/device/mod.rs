//! Graphics device.
//!
//! The [`GraphicsDevice`] is the main interface of the runtime. It creates
//! GPU resources, hands out command lists, submits them at the end of each
//! frame and decides when released resources are physically destroyed.
//!
//! # Frame loop
//!
//! ```text
//! get_command_list ─► record ─► submit_command_list ─┐
//!        ▲                                           │ (any number)
//!        │                                           ▼
//!        │                                    complete_frame
//!        │                                           │
//!        │   submit: uploads first, then the submission graph,
//!        │           then a final batch carrying the slot fence
//!        │   advance to the next slot
//!        │   wait for that slot's fence, recycle its lists,
//!        │   hand released resources to deferred deletion, sweep
//!        └───────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! let device = GraphicsDevice::new(create_backend()?, DeviceParameters::default())?;
//! let uniforms = device.create_buffer(&BufferDescriptor::new(256, BufferUsage::UNIFORM))?;
//!
//! loop {
//!     let mut cmd = device.get_command_list(QueueType::Graphics)?;
//!     cmd.begin_commands()?;
//!     // ...
//!     cmd.end_commands()?;
//!     device.submit_command_list(cmd, PipelineStage::ALL_COMMANDS, ExecutionOrder::Sequential)?;
//!     device.complete_frame()?;
//! }
//! ```

mod frame;
mod submission;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::backend::{BackendCapabilities, GpuBackend, SemaphoreHandle, SubmitBatch};
use crate::command::{CommandList, RecordingState};
use crate::config::DeviceParameters;
use crate::descriptor::{DescriptorPool, Placeholders};
use crate::error::{GraphicsError, contract_error};
use crate::memory::upload::{PendingUploads, UploadManager};
use crate::memory::{DeferredResource, MemoryManager};
use crate::present::{SwapStatus, SwapTarget};
use crate::queue::Queue;
use crate::resources::{
    Blas, Buffer, DescriptorSetLayout, FrameBuffer, Image, MultiBuffer, Pipeline, QueryPool,
    RenderPass, ResourceRegistry, Sampler, Tlas,
};
use crate::sync::{Fence, Semaphore};
use crate::types::{
    BlasDescriptor, BufferCopy, BufferDescriptor, BufferDomain, BufferUsage,
    DescriptorSetLayoutDescriptor, ExecutionOrder, FrameBufferDescriptor, ImageDescriptor,
    ImageLayout, ImageUsage, PipelineDescriptor, PipelineStage, QueryPoolDescriptor, QueueType,
    RenderPassDescriptor, SamplerDescriptor, TlasDescriptor,
};

use frame::FrameRing;
use submission::{Submission, SubmissionGraph, SubmissionNode};

/// Master lists of every resource the device created.
struct Registries {
    tlas: ResourceRegistry<Tlas>,
    blas: ResourceRegistry<Blas>,
    pipelines: ResourceRegistry<Pipeline>,
    frame_buffers: ResourceRegistry<FrameBuffer>,
    render_passes: ResourceRegistry<RenderPass>,
    descriptor_set_layouts: ResourceRegistry<DescriptorSetLayout>,
    query_pools: ResourceRegistry<QueryPool>,
    multi_buffers: ResourceRegistry<MultiBuffer>,
    buffers: ResourceRegistry<Buffer>,
    images: ResourceRegistry<Image>,
    samplers: ResourceRegistry<Sampler>,
    descriptor_pools: ResourceRegistry<DescriptorPool>,
}

impl Registries {
    fn new() -> Self {
        Self {
            tlas: ResourceRegistry::new(),
            blas: ResourceRegistry::new(),
            pipelines: ResourceRegistry::new(),
            frame_buffers: ResourceRegistry::new(),
            render_passes: ResourceRegistry::new(),
            descriptor_set_layouts: ResourceRegistry::new(),
            query_pools: ResourceRegistry::new(),
            multi_buffers: ResourceRegistry::new(),
            buffers: ResourceRegistry::new(),
            images: ResourceRegistry::new(),
            samplers: ResourceRegistry::new(),
            descriptor_pools: ResourceRegistry::new(),
        }
    }

    /// Queue every resource the client no longer references for deferred
    /// deletion. Returns how many were handed over.
    fn collect_released(&self, memory: &MemoryManager) -> usize {
        hand_over(&self.tlas, memory)
            + hand_over(&self.blas, memory)
            + hand_over(&self.pipelines, memory)
            + hand_over(&self.frame_buffers, memory)
            + hand_over(&self.render_passes, memory)
            + hand_over(&self.descriptor_set_layouts, memory)
            + hand_over(&self.query_pools, memory)
            + hand_over(&self.multi_buffers, memory)
            + hand_over(&self.buffers, memory)
            + hand_over(&self.images, memory)
            + hand_over(&self.samplers, memory)
            + hand_over(&self.descriptor_pools, memory)
    }

    /// Forget every resource. Ones still held by the client stay alive
    /// through their own references.
    fn clear(&self) {
        drop(self.tlas.drain());
        drop(self.blas.drain());
        drop(self.pipelines.drain());
        drop(self.frame_buffers.drain());
        drop(self.render_passes.drain());
        drop(self.descriptor_set_layouts.drain());
        drop(self.query_pools.drain());
        drop(self.multi_buffers.drain());
        drop(self.buffers.drain());
        drop(self.images.drain());
        drop(self.samplers.drain());
        drop(self.descriptor_pools.drain());
    }

    fn live_count(&self) -> usize {
        self.tlas.len()
            + self.blas.len()
            + self.pipelines.len()
            + self.frame_buffers.len()
            + self.render_passes.len()
            + self.descriptor_set_layouts.len()
            + self.query_pools.len()
            + self.multi_buffers.len()
            + self.buffers.len()
            + self.images.len()
            + self.samplers.len()
            + self.descriptor_pools.len()
    }
}

fn hand_over<T: DeferredResource>(registry: &ResourceRegistry<T>, memory: &MemoryManager) -> usize {
    let released = registry.collect_released();
    let count = released.len();
    for resource in released {
        memory.destroy_allocation(resource);
    }
    count
}

/// A graphics device owning the queues, frame ring and resource lifetimes.
///
/// # Thread Safety
///
/// `GraphicsDevice` is `Send + Sync`. Command lists are recorded without any
/// device lock held, so several threads can record in parallel; handing
/// lists out and submitting them takes a short lock on the frame ring.
///
/// Internal locks are always taken in the order frame ring, uploads,
/// frame-independent lists, swap target.
pub struct GraphicsDevice {
    backend: Arc<dyn GpuBackend>,
    params: DeviceParameters,
    queues: [Queue; 3],
    memory: MemoryManager,
    placeholders: Arc<Placeholders>,
    uploads: UploadManager,
    frames: Mutex<FrameRing>,
    independent: Mutex<[Vec<CommandList>; 3]>,
    registries: Registries,
    swap_target: Mutex<Option<Box<dyn SwapTarget>>>,
    swap_needs_recreation: AtomicBool,
    swap_out_of_date: AtomicBool,
}

impl GraphicsDevice {
    /// Create a device over `backend`.
    ///
    /// # Errors
    ///
    /// Returns an error if the parameters are inconsistent or the backend
    /// fails to create the frame ring.
    pub fn new(
        backend: Arc<dyn GpuBackend>,
        params: DeviceParameters,
    ) -> Result<Arc<Self>, GraphicsError> {
        params.validate()?;
        let placeholders = Arc::new(Placeholders::new(&backend).map_err(|err| {
            GraphicsError::InitializationFailed(format!("placeholder resources: {err}"))
        })?);
        let frames = FrameRing::new(&backend, params.frames_in_flight)?;

        let device = Arc::new(Self {
            memory: MemoryManager::new(params.frames_to_deletion, params.validation),
            queues: QueueType::ALL.map(Queue::new),
            placeholders,
            uploads: UploadManager::new(),
            frames: Mutex::new(frames),
            independent: Mutex::new([Vec::new(), Vec::new(), Vec::new()]),
            registries: Registries::new(),
            swap_target: Mutex::new(None),
            swap_needs_recreation: AtomicBool::new(false),
            swap_out_of_date: AtomicBool::new(false),
            backend,
            params,
        });
        device.preallocate_command_lists()?;
        device.prepare_placeholders()?;

        log::info!(
            "GraphicsDevice: created {:?} on {} backend ({} frames in flight, deletion after {} frames)",
            device.params.label,
            device.backend.name(),
            device.params.frames_in_flight,
            device.params.frames_to_deletion
        );
        Ok(device)
    }

    fn preallocate_command_lists(&self) -> Result<(), GraphicsError> {
        let mut frames = self.frames.lock();
        for slot in &mut frames.slots {
            for queue in QueueType::ALL {
                for _ in 0..self.params.command_lists_per_queue {
                    let list = self.new_command_list(queue, false)?;
                    slot.free[queue.index()].push(list);
                }
            }
        }
        Ok(())
    }

    fn prepare_placeholders(&self) -> Result<(), GraphicsError> {
        let mut cmd = self.get_frame_independent_command_list(QueueType::Graphics)?;
        cmd.begin_commands()?;
        cmd.transition_image(&self.placeholders.image, ImageLayout::ShaderReadOnly);
        cmd.end_commands()?;
        self.flush_command_list(cmd)
    }

    /// Get the backend.
    pub fn backend(&self) -> &Arc<dyn GpuBackend> {
        &self.backend
    }

    /// Optional capabilities of the backend.
    pub fn capabilities(&self) -> BackendCapabilities {
        self.backend.capabilities()
    }

    /// Parameters the device was created with.
    pub fn parameters(&self) -> &DeviceParameters {
        &self.params
    }

    /// Memory manager owning deferred deletion.
    pub fn memory_manager(&self) -> &MemoryManager {
        &self.memory
    }

    /// Index of the frame being built.
    pub fn frame_index(&self) -> u64 {
        self.frames.lock().frame_index
    }

    /// Slot of the frame being built.
    pub fn frame_slot(&self) -> usize {
        self.frames.lock().current
    }

    /// Number of resources the device tracks.
    pub fn live_resource_count(&self) -> usize {
        self.registries.live_count()
    }

    /// Hardware queue that executes lists of `queue_type`.
    ///
    /// Without a dedicated compute or transfer queue those lists run on
    /// the graphics queue.
    pub fn queue(&self, queue_type: QueueType) -> &Queue {
        let capabilities = self.backend.capabilities();
        let index = match queue_type {
            QueueType::Compute if capabilities.dedicated_compute_queue => 1,
            QueueType::Transfer if capabilities.dedicated_transfer_queue => 2,
            _ => 0,
        };
        &self.queues[index]
    }

    // ========================================================================
    // Resource factories
    // ========================================================================

    /// Create a GPU buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if the size is zero or allocation fails.
    pub fn create_buffer(
        self: &Arc<Self>,
        descriptor: &BufferDescriptor,
    ) -> Result<Arc<Buffer>, GraphicsError> {
        if descriptor.size == 0 {
            return Err(GraphicsError::InvalidParameter(
                "buffer size cannot be zero".to_string(),
            ));
        }
        let buffer = Arc::new(Buffer::new(
            Arc::downgrade(self),
            Arc::clone(&self.backend),
            descriptor.clone(),
        )?);
        self.registries.buffers.register(&buffer);
        log::trace!(
            "GraphicsDevice: created buffer {:?}, size={}",
            descriptor.label,
            descriptor.size
        );
        Ok(buffer)
    }

    /// Create a buffer with one copy per frame slot.
    pub fn create_multi_buffer(
        self: &Arc<Self>,
        descriptor: &BufferDescriptor,
    ) -> Result<Arc<MultiBuffer>, GraphicsError> {
        if descriptor.size == 0 {
            return Err(GraphicsError::InvalidParameter(
                "buffer size cannot be zero".to_string(),
            ));
        }
        let buffers = (0..self.params.frames_in_flight)
            .map(|_| {
                Buffer::new(
                    Arc::downgrade(self),
                    Arc::clone(&self.backend),
                    descriptor.clone(),
                )
                .map(Arc::new)
            })
            .collect::<Result<Vec<_>, _>>()?;
        let multi_buffer = Arc::new(MultiBuffer::new(buffers));
        multi_buffer.update_frame_slot(self.frame_slot());
        self.registries.multi_buffers.register(&multi_buffer);
        log::trace!(
            "GraphicsDevice: created multi-buffer {:?}, size={} x{}",
            descriptor.label,
            descriptor.size,
            self.params.frames_in_flight
        );
        Ok(multi_buffer)
    }

    /// Create a GPU image.
    ///
    /// # Errors
    ///
    /// Returns an error if a dimension is zero or allocation fails.
    pub fn create_image(
        self: &Arc<Self>,
        descriptor: &ImageDescriptor,
    ) -> Result<Arc<Image>, GraphicsError> {
        let size = descriptor.size;
        if size.width == 0 || size.height == 0 || size.depth == 0 {
            return Err(GraphicsError::InvalidParameter(
                "image dimensions cannot be zero".to_string(),
            ));
        }
        let image = Arc::new(Image::new(
            Arc::downgrade(self),
            Arc::clone(&self.backend),
            descriptor.clone(),
        )?);
        self.registries.images.register(&image);
        log::trace!(
            "GraphicsDevice: created image {:?}, size={}x{}",
            descriptor.label,
            size.width,
            size.height
        );
        Ok(image)
    }

    /// Create a sampler.
    pub fn create_sampler(
        &self,
        descriptor: &SamplerDescriptor,
    ) -> Result<Arc<Sampler>, GraphicsError> {
        let sampler = Arc::new(Sampler::new(Arc::clone(&self.backend), descriptor.clone())?);
        self.registries.samplers.register(&sampler);
        log::trace!("GraphicsDevice: created sampler {:?}", descriptor.label);
        Ok(sampler)
    }

    /// Create a descriptor set layout.
    pub fn create_descriptor_set_layout(
        &self,
        descriptor: &DescriptorSetLayoutDescriptor,
    ) -> Result<Arc<DescriptorSetLayout>, GraphicsError> {
        let layout = Arc::new(DescriptorSetLayout::new(
            Arc::clone(&self.backend),
            descriptor.clone(),
        )?);
        self.registries.descriptor_set_layouts.register(&layout);
        log::trace!(
            "GraphicsDevice: created descriptor set layout {:?} ({} bindings)",
            descriptor.label,
            descriptor.bindings.len()
        );
        Ok(layout)
    }

    /// Create a descriptor pool whose backing pools hold `pool_size` sets
    /// and descriptors per kind.
    pub fn create_descriptor_pool(&self, pool_size: u32) -> Result<Arc<DescriptorPool>, GraphicsError> {
        if pool_size == 0 {
            return Err(GraphicsError::InvalidParameter(
                "descriptor pool size cannot be zero".to_string(),
            ));
        }
        let pool = Arc::new(DescriptorPool::new(Arc::clone(&self.backend), pool_size));
        self.registries.descriptor_pools.register(&pool);
        Ok(pool)
    }

    /// Create a graphics or compute pipeline.
    pub fn create_pipeline(
        &self,
        descriptor: &PipelineDescriptor,
    ) -> Result<Arc<Pipeline>, GraphicsError> {
        let pipeline = Arc::new(Pipeline::new(Arc::clone(&self.backend), descriptor.clone())?);
        self.registries.pipelines.register(&pipeline);
        log::trace!(
            "GraphicsDevice: created {:?} pipeline {:?}",
            pipeline.bind_point(),
            pipeline.label()
        );
        Ok(pipeline)
    }

    /// Create a render pass.
    pub fn create_render_pass(
        &self,
        descriptor: &RenderPassDescriptor,
    ) -> Result<Arc<RenderPass>, GraphicsError> {
        let render_pass = Arc::new(RenderPass::new(Arc::clone(&self.backend), descriptor.clone())?);
        self.registries.render_passes.register(&render_pass);
        log::trace!("GraphicsDevice: created render pass {:?}", descriptor.label);
        Ok(render_pass)
    }

    /// Create a frame buffer over attachment images.
    pub fn create_frame_buffer(
        &self,
        descriptor: &FrameBufferDescriptor,
    ) -> Result<Arc<FrameBuffer>, GraphicsError> {
        let frame_buffer = Arc::new(FrameBuffer::new(
            Arc::clone(&self.backend),
            descriptor.clone(),
        )?);
        self.registries.frame_buffers.register(&frame_buffer);
        log::trace!(
            "GraphicsDevice: created frame buffer {:?}, extent={:?}",
            descriptor.label,
            frame_buffer.extent()
        );
        Ok(frame_buffer)
    }

    /// Create a query pool.
    pub fn create_query_pool(
        &self,
        descriptor: &QueryPoolDescriptor,
    ) -> Result<Arc<QueryPool>, GraphicsError> {
        let pool = Arc::new(QueryPool::new(Arc::clone(&self.backend), descriptor.clone())?);
        self.registries.query_pools.register(&pool);
        Ok(pool)
    }

    /// Create a bottom-level acceleration structure.
    ///
    /// Storage is allocated on the first build or bind.
    pub fn create_blas(&self, descriptor: &BlasDescriptor) -> Result<Arc<Blas>, GraphicsError> {
        self.require_ray_tracing()?;
        if descriptor.geometries.is_empty() {
            return Err(GraphicsError::InvalidParameter(
                "bottom-level acceleration structure needs geometry".to_string(),
            ));
        }
        let blas = Arc::new(Blas::new(Arc::clone(&self.backend), descriptor.clone()));
        self.registries.blas.register(&blas);
        Ok(blas)
    }

    /// Create a top-level acceleration structure.
    ///
    /// Storage is allocated on the first build or bind.
    pub fn create_tlas(&self, descriptor: &TlasDescriptor) -> Result<Arc<Tlas>, GraphicsError> {
        self.require_ray_tracing()?;
        if descriptor.max_instances == 0 {
            return Err(GraphicsError::InvalidParameter(
                "top-level acceleration structure needs room for instances".to_string(),
            ));
        }
        let tlas = Arc::new(Tlas::new(Arc::clone(&self.backend), descriptor.clone()));
        self.registries.tlas.register(&tlas);
        Ok(tlas)
    }

    fn require_ray_tracing(&self) -> Result<(), GraphicsError> {
        if self.backend.capabilities().ray_tracing {
            Ok(())
        } else {
            Err(GraphicsError::FeatureNotSupported(
                "acceleration structures".to_string(),
            ))
        }
    }

    // ========================================================================
    // Command lists
    // ========================================================================

    fn new_command_list(
        &self,
        queue: QueueType,
        frame_independent: bool,
    ) -> Result<CommandList, GraphicsError> {
        let pool = Arc::new(DescriptorPool::new(
            Arc::clone(&self.backend),
            self.params.descriptor_pool_size,
        ));
        self.registries.descriptor_pools.register(&pool);
        CommandList::new(
            queue,
            Arc::clone(&self.backend),
            pool,
            Arc::clone(&self.placeholders),
            self.params.validation,
            frame_independent,
        )
    }

    /// Get a command list for the frame being built.
    ///
    /// Lists come from the current slot's pool; a new one is created when
    /// every pooled list is already in use. If the slot is still occupied
    /// by an earlier frame, this waits for it first.
    pub fn get_command_list(&self, queue: QueueType) -> Result<CommandList, GraphicsError> {
        self.ensure_current_slot_reclaimed()?;
        let pooled = self.frames.lock().current_slot().take_free(queue);
        match pooled {
            Some(list) => Ok(list),
            None => {
                let list = self.new_command_list(queue, false)?;
                log::debug!(
                    "GraphicsDevice: {:?} list pool exhausted, created {:?}",
                    queue,
                    list.id()
                );
                Ok(list)
            }
        }
    }

    /// Get a long-lived command list that is not tied to the frame ring.
    ///
    /// Submit it with [`flush_command_list`](Self::flush_command_list).
    pub fn get_frame_independent_command_list(
        &self,
        queue: QueueType,
    ) -> Result<CommandList, GraphicsError> {
        let pooled = self.independent.lock()[queue.index()].pop();
        match pooled {
            Some(list) => Ok(list),
            None => self.new_command_list(queue, true),
        }
    }

    fn return_independent(&self, mut list: CommandList) {
        list.recycle();
        self.independent.lock()[list.queue().index()].push(list);
    }

    /// Register an ended command list for submission at the end of the frame.
    ///
    /// With [`ExecutionOrder::Sequential`] the list waits for the list
    /// submitted before it on the same queue; `wait_stage` is where it
    /// waits. Dependencies declared with
    /// [`CommandList::depends_on`] are honored regardless of order.
    pub fn submit_command_list(
        &self,
        list: CommandList,
        wait_stage: PipelineStage,
        order: ExecutionOrder,
    ) -> Result<(), GraphicsError> {
        if list.is_frame_independent() {
            let err = contract_error(
                self.params.validation,
                "frame-independent command lists are submitted with flush_command_list"
                    .to_string(),
            );
            self.return_independent(list);
            return Err(err);
        }
        if list.state() != RecordingState::Ended {
            let err = contract_error(
                self.params.validation,
                format!("submitting {:?} command list {:?}", list.state(), list.id()),
            );
            self.frames.lock().current_slot().give_back(list);
            return Err(err);
        }
        log::trace!(
            "GraphicsDevice: {:?} submitted to {:?} ({order:?})",
            list.id(),
            list.queue()
        );
        self.frames.lock().pending.push(Submission {
            list,
            wait_stage,
            order,
        });
        Ok(())
    }

    /// Submit a frame-independent list right away and wait for it.
    ///
    /// Pending staging uploads are submitted ahead of it.
    pub fn flush_command_list(&self, list: CommandList) -> Result<(), GraphicsError> {
        crate::profile_function!();

        if !list.is_frame_independent() {
            let err = contract_error(
                self.params.validation,
                "per-frame command lists are submitted with submit_command_list".to_string(),
            );
            self.frames.lock().current_slot().give_back(list);
            return Err(err);
        }
        if list.state() != RecordingState::Ended {
            let err = contract_error(
                self.params.validation,
                format!("flushing {:?} command list {:?}", list.state(), list.id()),
            );
            self.return_independent(list);
            return Err(err);
        }

        let uploads = self.uploads.take()?;
        let fence = Fence::new(Arc::clone(&self.backend), false)?;
        // Keeps the upload semaphore alive until the wait below.
        let mut upload_signal = None;

        let result = (|| {
            let mut batch = SubmitBatch::new(vec![list.command_buffer()]);
            if let Some(uploads) = &uploads {
                let semaphore = Semaphore::new(Arc::clone(&self.backend))?;
                let upload_batch = SubmitBatch::new(vec![uploads.command_list.command_buffer()])
                    .signal(semaphore.handle());
                self.queue(uploads.command_list.queue())
                    .lock()
                    .submit(&self.backend, &[upload_batch], None)?;
                batch = batch.wait(semaphore.handle(), PipelineStage::ALL_COMMANDS);
                upload_signal = Some(semaphore);
            }
            self.queue(list.queue())
                .lock()
                .submit(&self.backend, &[batch], Some(fence.handle()))?;

            let timeout = self.params.fence_timeout;
            if !fence.wait(timeout)? {
                log::error!("GraphicsDevice: flush of {:?} timed out", list.id());
                return Err(GraphicsError::FenceTimeout(timeout));
            }
            Ok(())
        })();
        drop(upload_signal);

        if let Some(PendingUploads { command_list, .. }) = uploads {
            self.return_independent(command_list);
        }
        self.return_independent(list);
        result
    }

    // ========================================================================
    // Staging uploads and readback
    // ========================================================================

    fn host_buffer(
        self: &Arc<Self>,
        size: u64,
        usage: BufferUsage,
        label: &str,
    ) -> Result<Arc<Buffer>, GraphicsError> {
        self.create_buffer(
            &BufferDescriptor::new(size, usage)
                .with_domain(BufferDomain::Host)
                .with_label(label),
        )
    }

    /// Stage `data` for `buffer` at `offset`; the copy runs before the next
    /// submitted work.
    pub(crate) fn upload_buffer(
        &self,
        buffer: &Buffer,
        offset: u64,
        data: &[u8],
    ) -> Result<(), GraphicsError> {
        let device = self.self_arc(buffer.device())?;
        self.uploads.record(
            || device.get_frame_independent_command_list(QueueType::Graphics),
            |cmd| {
                let staging =
                    device.host_buffer(data.len() as u64, BufferUsage::COPY_SRC, "staging")?;
                staging.set_data(data)?;
                cmd.copy_buffer(
                    &staging,
                    buffer,
                    BufferCopy::new(0, offset, data.len() as u64),
                );
                Ok(staging)
            },
        )
    }

    /// Stage the base level of `image`; further levels are generated when
    /// the image allows it.
    pub(crate) fn upload_image(&self, image: &Image, data: &[u8]) -> Result<(), GraphicsError> {
        let device = self.self_arc(image.device())?;
        self.uploads.record(
            || device.get_frame_independent_command_list(QueueType::Graphics),
            |cmd| {
                let staging =
                    device.host_buffer(data.len() as u64, BufferUsage::COPY_SRC, "staging")?;
                staging.set_data(data)?;
                cmd.copy_buffer_to_image(&staging, 0, image, 0);
                if image.mip_levels() > 1 && image.usage().contains(ImageUsage::COPY_SRC) {
                    cmd.generate_mip_maps(image);
                } else {
                    cmd.transition_image(image, ImageLayout::ShaderReadOnly);
                }
                Ok(staging)
            },
        )
    }

    /// Resources only reach the device through a weak back reference; this
    /// recovers the strong one and checks it is this device.
    fn self_arc(
        &self,
        device: Option<Arc<GraphicsDevice>>,
    ) -> Result<Arc<GraphicsDevice>, GraphicsError> {
        match device {
            Some(device) if std::ptr::eq(Arc::as_ptr(&device), self) => Ok(device),
            _ => Err(GraphicsError::InvalidParameter(
                "resource belongs to another device".to_string(),
            )),
        }
    }

    /// Whether staging uploads wait for the next submission.
    pub fn has_pending_uploads(&self) -> bool {
        self.uploads.has_pending()
    }

    /// Read `size` bytes of `buffer` starting at `offset`.
    ///
    /// Device-local buffers are copied into a host buffer through a
    /// frame-independent list that is flushed synchronously, after any
    /// pending uploads.
    pub fn read_buffer(
        self: &Arc<Self>,
        buffer: &Buffer,
        offset: u64,
        size: u64,
    ) -> Result<Vec<u8>, GraphicsError> {
        if offset.checked_add(size).is_none_or(|end| end > buffer.size()) {
            return Err(GraphicsError::InvalidParameter(format!(
                "read of {size} bytes at offset {offset} exceeds buffer size {}",
                buffer.size()
            )));
        }
        if buffer.is_host_visible() {
            if self.uploads.has_pending() {
                let mut cmd = self.get_frame_independent_command_list(QueueType::Graphics)?;
                cmd.begin_commands()?;
                cmd.end_commands()?;
                self.flush_command_list(cmd)?;
            }
            return buffer.read_host(offset, size);
        }
        if !buffer.usage().contains(BufferUsage::COPY_SRC) {
            return Err(GraphicsError::InvalidParameter(
                "reading back a device buffer requires COPY_SRC usage".to_string(),
            ));
        }

        let readback = self.host_buffer(size, BufferUsage::COPY_DST, "readback")?;
        let mut cmd = self.get_frame_independent_command_list(QueueType::Graphics)?;
        cmd.begin_commands()?;
        cmd.copy_buffer(buffer, &readback, BufferCopy::new(offset, 0, size));
        cmd.end_commands()?;
        self.flush_command_list(cmd)?;
        readback.read_host(0, size)
    }

    // ========================================================================
    // Frames
    // ========================================================================

    fn ensure_current_slot_reclaimed(&self) -> Result<(), GraphicsError> {
        let occupied = {
            let mut frames = self.frames.lock();
            frames.current_slot().submitted
        };
        if occupied {
            self.wait_for_previous_frame_completion()?;
        }
        Ok(())
    }

    /// Submit the frame and wait until the next slot may be reused.
    pub fn complete_frame(&self) -> Result<(), GraphicsError> {
        self.complete_frame_async()?;
        self.wait_for_previous_frame_completion()
    }

    /// Submit the frame and advance to the next slot without waiting.
    ///
    /// Poll [`is_previous_frame_complete`](Self::is_previous_frame_complete)
    /// and finish with
    /// [`wait_for_previous_frame_completion`](Self::wait_for_previous_frame_completion).
    pub fn complete_frame_async(&self) -> Result<(), GraphicsError> {
        crate::profile_function!();
        self.ensure_current_slot_reclaimed()?;

        let mut frames = self.frames.lock();
        let submissions = std::mem::take(&mut frames.pending);
        let mut nodes: Vec<SubmissionNode> = submissions.iter().map(SubmissionNode::of).collect();

        // The upload list never has predecessors, so it cannot close a cycle;
        // check the client's lists before taking it.
        let graph = match SubmissionGraph::build(&nodes, 0) {
            Ok(graph) => graph,
            Err(err) => {
                let slot = frames.current_slot();
                for submission in submissions {
                    slot.give_back(submission.list);
                }
                return Err(err);
            }
        };

        let uploads = self.uploads.take()?;
        let graph = match &uploads {
            Some(uploads) => {
                nodes.insert(
                    0,
                    SubmissionNode {
                        id: uploads.command_list.id(),
                        queue: uploads.command_list.queue(),
                        order: ExecutionOrder::Parallel,
                        dependencies: Vec::new(),
                    },
                );
                SubmissionGraph::build(&nodes, 1)?
            }
            None => graph,
        };
        let lists: Vec<(CommandList, PipelineStage)> = submissions
            .into_iter()
            .map(|submission| (submission.list, submission.wait_stage))
            .collect();

        let swap_image = frames.swap_image.take();
        let result = self.submit_graph(&mut frames, &graph, &lists, uploads.as_ref(), swap_image);

        let slot = frames.current_slot();
        slot.submitted = result.is_ok();
        slot.uploads = uploads;
        slot.in_flight.extend(lists.into_iter().map(|(list, _)| list));
        result?;

        if let Some(image_index) = swap_image {
            let present_semaphore = frames.current_slot().present_semaphore.handle();
            self.present(image_index, present_semaphore)?;
        }

        frames.advance();
        crate::frame_mark!();
        Ok(())
    }

    /// Submit every node of `graph` on its queue, then a final graphics
    /// batch that waits for all sinks and signals the slot fence.
    fn submit_graph(
        &self,
        frames: &mut FrameRing,
        graph: &SubmissionGraph,
        lists: &[(CommandList, PipelineStage)],
        uploads: Option<&PendingUploads>,
        swap_image: Option<u32>,
    ) -> Result<(), GraphicsError> {
        let leading = usize::from(uploads.is_some());
        let slot = frames.current_slot();

        let mut edge_semaphores = Vec::with_capacity(graph.edges.len());
        for _ in &graph.edges {
            edge_semaphores.push(slot.semaphores.acquire(&self.backend)?);
        }

        // With uploads, node 0 is the upload list and client lists follow.
        let node_list = |node: usize| match uploads {
            Some(uploads) if node == 0 => (&uploads.command_list, PipelineStage::TRANSFER),
            _ => {
                let (list, wait_stage) = &lists[node - leading];
                (list, *wait_stage)
            }
        };

        let mut acquire_wait = swap_image.map(|_| slot.acquire_semaphore.handle());
        let mut final_waits: Vec<(SemaphoreHandle, PipelineStage)> = Vec::new();

        for &node in &graph.order {
            let (list, wait_stage) = node_list(node);
            let mut batch = SubmitBatch::new(vec![list.command_buffer()]);
            for (edge, (from, to)) in graph.edges.iter().enumerate() {
                if *to == node {
                    batch = batch.wait(edge_semaphores[edge], wait_stage);
                } else if *from == node {
                    batch = batch.signal(edge_semaphores[edge]);
                }
            }
            if list.queue() == QueueType::Graphics
                && let Some(acquire) = acquire_wait.take()
            {
                batch = batch.wait(acquire, PipelineStage::COLOR_ATTACHMENT_OUTPUT);
            }
            if graph.is_sink(node) {
                let done = slot.semaphores.acquire(&self.backend)?;
                batch = batch.signal(done);
                final_waits.push((done, PipelineStage::ALL_COMMANDS));
            }
            self.queue(list.queue())
                .lock()
                .submit(&self.backend, &[batch], None)?;
        }

        let mut final_batch = SubmitBatch {
            wait_semaphores: final_waits,
            ..SubmitBatch::default()
        };
        if let Some(acquire) = acquire_wait {
            final_batch = final_batch.wait(acquire, PipelineStage::COLOR_ATTACHMENT_OUTPUT);
        }
        if swap_image.is_some() {
            final_batch = final_batch.signal(slot.present_semaphore.handle());
        }
        self.queue(QueueType::Graphics).lock().submit(
            &self.backend,
            &[final_batch],
            Some(slot.fence.handle()),
        )?;
        log::trace!(
            "GraphicsDevice: submitted {} lists with {} semaphores",
            graph.order.len(),
            slot.semaphores.len()
        );
        Ok(())
    }

    /// Whether the slot the next frame will use has finished on the GPU.
    pub fn is_previous_frame_complete(&self) -> Result<bool, GraphicsError> {
        self.frames.lock().current_slot().is_complete()
    }

    /// Wait until the current slot's previous frame has completed, then
    /// recycle its lists and run deferred deletion.
    ///
    /// # Errors
    ///
    /// Returns [`GraphicsError::FenceTimeout`] if the GPU does not finish
    /// within the configured timeout. This is fatal.
    pub fn wait_for_previous_frame_completion(&self) -> Result<(), GraphicsError> {
        crate::profile_function!();

        let (frame_index, slot_index, upload_list) = {
            let mut frames = self.frames.lock();
            let upload_list = frames.current_slot().reclaim(self.params.fence_timeout)?;
            (frames.frame_index, frames.current, upload_list)
        };
        if let Some(list) = upload_list {
            self.return_independent(list);
        }

        for multi_buffer in self.registries.multi_buffers.snapshot() {
            multi_buffer.update_frame_slot(slot_index);
        }
        self.run_deferred_deletion(frame_index);
        Ok(())
    }

    fn run_deferred_deletion(&self, frame_index: u64) {
        let released = self.registries.collect_released(&self.memory);
        self.memory.update_frame_index(frame_index);
        let destroyed = self.memory.delete_data();
        if released > 0 || destroyed > 0 {
            log::debug!(
                "GraphicsDevice: frame {frame_index}: {released} released, {destroyed} destroyed"
            );
        }
    }

    /// Block until the GPU is idle and every slot is reclaimed.
    pub fn wait_for_idle(&self) -> Result<(), GraphicsError> {
        crate::profile_function!();
        self.backend.wait_idle()?;

        let (frame_index, upload_lists) = {
            let mut frames = self.frames.lock();
            let mut upload_lists = Vec::new();
            for slot in &mut frames.slots {
                if let Some(list) = slot.reclaim(self.params.fence_timeout)? {
                    upload_lists.push(list);
                }
            }
            (frames.frame_index, upload_lists)
        };
        for list in upload_lists {
            self.return_independent(list);
        }
        self.run_deferred_deletion(frame_index);
        Ok(())
    }

    /// Wait for idle, then destroy every resource already released,
    /// regardless of its deletion frame.
    pub fn force_memory_cleanup(&self) -> Result<(), GraphicsError> {
        self.wait_for_idle()?;
        loop {
            let released = self.registries.collect_released(&self.memory);
            let destroyed = self.memory.release_idle();
            if released == 0 && destroyed == 0 {
                break;
            }
        }
        Ok(())
    }

    /// Reset every descriptor pool, dropping all cached descriptor sets.
    ///
    /// Waits for idle first. Must not be called while command lists are
    /// being recorded.
    pub fn reset_descriptor_caches(&self) -> Result<(), GraphicsError> {
        self.wait_for_idle()?;
        let pools = self.registries.descriptor_pools.snapshot();
        for pool in &pools {
            pool.reset()?;
        }
        log::debug!("GraphicsDevice: reset {} descriptor pools", pools.len());
        Ok(())
    }

    // ========================================================================
    // Presentation
    // ========================================================================

    /// Install the swap target frames are presented to.
    pub fn set_swap_target(&self, target: Box<dyn SwapTarget>) {
        *self.swap_target.lock() = Some(target);
        self.swap_needs_recreation.store(false, Ordering::Release);
        self.swap_out_of_date.store(false, Ordering::Release);
    }

    /// Remove the swap target, waiting for idle first.
    pub fn take_swap_target(&self) -> Result<Option<Box<dyn SwapTarget>>, GraphicsError> {
        self.wait_for_idle()?;
        Ok(self.swap_target.lock().take())
    }

    /// Whether acquire or present reported that the swap target no longer
    /// matches the window.
    pub fn swap_target_needs_recreation(&self) -> bool {
        self.swap_needs_recreation.load(Ordering::Acquire)
    }

    /// Acquire the swap image the frame being built renders into.
    ///
    /// The first graphics list submitted this frame waits for the image.
    /// Returns `None` when the target reports it is out of date; the
    /// recreation flag is raised in that case. Later calls fail with
    /// [`GraphicsError::SurfaceOutdated`] until a new target is installed.
    pub fn acquire_swap_image(&self) -> Result<Option<u32>, GraphicsError> {
        if self.swap_out_of_date.load(Ordering::Acquire) {
            return Err(GraphicsError::SurfaceOutdated);
        }
        self.ensure_current_slot_reclaimed()?;
        let mut frames = self.frames.lock();
        if let Some(index) = frames.swap_image {
            return Ok(Some(index));
        }
        let signal = frames.current_slot().acquire_semaphore.handle();

        let mut target = self.swap_target.lock();
        let Some(target) = target.as_mut() else {
            return Err(GraphicsError::InvalidParameter(
                "no swap target installed".to_string(),
            ));
        };
        let (index, status) = match target.acquire(signal) {
            Err(GraphicsError::SurfaceOutdated) => (None, SwapStatus::OutOfDate),
            result => result?,
        };
        self.note_swap_status(status, "acquire");
        frames.swap_image = index;
        Ok(index)
    }

    fn present(&self, image_index: u32, wait: SemaphoreHandle) -> Result<(), GraphicsError> {
        let mut target = self.swap_target.lock();
        let Some(target) = target.as_mut() else {
            log::warn!("GraphicsDevice: swap target removed before present");
            return Ok(());
        };
        let status = match target.present(image_index, wait) {
            Err(GraphicsError::SurfaceOutdated) => SwapStatus::OutOfDate,
            result => result?,
        };
        self.note_swap_status(status, "present");
        Ok(())
    }

    fn note_swap_status(&self, status: SwapStatus, operation: &str) {
        if status.needs_recreation() {
            log::warn!("GraphicsDevice: swap target {status:?} on {operation}, needs recreation");
            self.swap_needs_recreation.store(true, Ordering::Release);
        }
        if status == SwapStatus::OutOfDate {
            self.swap_out_of_date.store(true, Ordering::Release);
        }
    }
}

impl Drop for GraphicsDevice {
    fn drop(&mut self) {
        if let Err(err) = self.wait_for_idle() {
            log::error!("GraphicsDevice: wait for idle failed during shutdown: {err}");
        }
        drop(self.uploads.discard());
        {
            let mut frames = self.frames.lock();
            frames.pending.clear();
            for slot in &mut frames.slots {
                slot.free = [Vec::new(), Vec::new(), Vec::new()];
                slot.in_flight.clear();
                slot.uploads = None;
            }
        }
        *self.independent.lock() = [Vec::new(), Vec::new(), Vec::new()];

        self.registries.collect_released(&self.memory);
        self.memory.destroy_all_immediate();
        self.registries.clear();
        log::info!("GraphicsDevice: destroyed {:?}", self.params.label);
    }
}

impl std::fmt::Debug for GraphicsDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphicsDevice")
            .field("label", &self.params.label)
            .field("backend", &self.backend.name())
            .field("frame_index", &self.frame_index())
            .field("live_resources", &self.live_resource_count())
            .finish()
    }
}

static_assertions::assert_impl_all!(GraphicsDevice: Send, Sync);
