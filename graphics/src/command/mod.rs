//! Command recording.
//!
//! A [`CommandList`] records one sequence of GPU commands into a native
//! command buffer. It tracks the bound pipeline, the active render pass and a
//! descriptor binding table, so redundant state changes never reach the
//! driver.
//!
//! # State machine
//!
//! ```text
//! Idle ──begin_commands──► Recording ──end_commands──► Ended
//!                           │     ▲
//!        begin_render_pass  │     │  end_render_pass
//!                           ▼     │
//!                       RenderPassActive
//!
//! Recording ──bind compute pipeline──► ComputeActive
//! ```
//!
//! Ending a render pass returns to `ComputeActive` when the bound pipeline
//! is a compute pipeline.
//!
//! Graphics draws require an active render pass; dispatches and transfers
//! are only valid outside one. Calls made in the wrong state are contract
//! violations: they panic with validation enabled and are skipped otherwise.
//!
//! # Example
//!
//! ```ignore
//! let mut cmd = device.get_command_list(QueueType::Graphics)?;
//! cmd.begin_commands()?;
//! cmd.begin_render_pass(&frame_buffer);
//! cmd.bind_pipeline(&pipeline);
//! cmd.bind_buffer(0, 0, &uniforms);
//! cmd.draw(3, 1, 0, 0)?;
//! cmd.end_render_pass();
//! cmd.end_commands()?;
//! device.submit_command_list(cmd, PipelineStage::ALL_COMMANDS, ExecutionOrder::Sequential)?;
//! ```

mod barrier;
mod descriptors;
mod transfer;

pub use barrier::{BufferTransition, ImageTransition};
pub use transfer::MAX_UPDATE_BUFFER_SIZE;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::backend::{CommandBufferHandle, GpuBackend, NativeCommand};
use crate::config::{BINDINGS_PER_DESCRIPTOR_SET, DESCRIPTOR_SET_COUNT, MAX_VERTEX_BUFFER_BINDINGS};
use crate::descriptor::{BindOutcome, BindingSlot, BindingTable, BoundBuffer, DescriptorPool, Placeholders};
use crate::error::{GraphicsError, contract_violation};
use crate::resources::{Buffer, FrameBuffer, Image, Pipeline, Sampler, Tlas};
use crate::types::{
    BindPoint, BufferUsage, ImageLayout, ImageUsage, IndexType, QueueType, Rect2d, ShaderStages,
    Viewport,
};

static NEXT_COMMAND_LIST_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a command list, used to declare dependencies between lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommandListId(u64);

impl CommandListId {
    fn next() -> Self {
        Self(NEXT_COMMAND_LIST_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw identifier value.
    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Recording state of a [`CommandList`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecordingState {
    /// Not recording; the list is free or freshly recycled.
    #[default]
    Idle,
    /// Recording outside of a render pass.
    Recording,
    /// Recording inside a render pass.
    RenderPassActive,
    /// Recording with a compute pipeline bound.
    ComputeActive,
    /// Recording finished; ready for submission.
    Ended,
}

impl RecordingState {
    /// Whether commands can be recorded.
    pub fn is_recording(self) -> bool {
        matches!(
            self,
            RecordingState::Recording
                | RecordingState::RenderPassActive
                | RecordingState::ComputeActive
        )
    }
}

/// A stateful recorder for one sequence of GPU commands.
///
/// Command lists are handed out by [`GraphicsDevice::get_command_list`](crate::GraphicsDevice::get_command_list)
/// and handed back with [`GraphicsDevice::submit_command_list`](crate::GraphicsDevice::submit_command_list).
/// Each list owns its [`DescriptorPool`], so several threads can record into
/// different lists without sharing any lock.
pub struct CommandList {
    id: CommandListId,
    queue: QueueType,
    backend: Arc<dyn GpuBackend>,
    command_buffer: CommandBufferHandle,
    descriptor_pool: Arc<DescriptorPool>,
    placeholders: Arc<Placeholders>,
    validation: bool,
    frame_independent: bool,
    state: RecordingState,
    pipeline: Option<Arc<Pipeline>>,
    frame_buffer: Option<Arc<FrameBuffer>>,
    bindings: BindingTable,
    dependencies: Vec<CommandListId>,
}

impl CommandList {
    pub(crate) fn new(
        queue: QueueType,
        backend: Arc<dyn GpuBackend>,
        descriptor_pool: Arc<DescriptorPool>,
        placeholders: Arc<Placeholders>,
        validation: bool,
        frame_independent: bool,
    ) -> Result<Self, GraphicsError> {
        let command_buffer = backend.create_command_buffer(queue)?;
        let id = CommandListId::next();
        log::trace!(
            "CommandList: created {:?} for {:?} (frame independent: {})",
            id,
            queue,
            frame_independent
        );
        Ok(Self {
            id,
            queue,
            backend,
            command_buffer,
            descriptor_pool,
            placeholders,
            validation,
            frame_independent,
            state: RecordingState::Idle,
            pipeline: None,
            frame_buffer: None,
            bindings: BindingTable::new(),
            dependencies: Vec::new(),
        })
    }

    /// Identity of the list.
    pub fn id(&self) -> CommandListId {
        self.id
    }

    /// Queue the list executes on.
    pub fn queue(&self) -> QueueType {
        self.queue
    }

    /// Current recording state.
    pub fn state(&self) -> RecordingState {
        self.state
    }

    /// Whether the list lives outside the frame ring.
    pub fn is_frame_independent(&self) -> bool {
        self.frame_independent
    }

    /// Native command buffer.
    pub fn command_buffer(&self) -> CommandBufferHandle {
        self.command_buffer
    }

    /// Descriptor pool the list allocates its sets from.
    pub fn descriptor_pool(&self) -> &Arc<DescriptorPool> {
        &self.descriptor_pool
    }

    /// Currently bound pipeline.
    pub fn pipeline(&self) -> Option<&Arc<Pipeline>> {
        self.pipeline.as_ref()
    }

    /// Execute this list only after `other` has completed on the GPU.
    ///
    /// Honored regardless of the order in which both lists are submitted,
    /// and across queues.
    pub fn depends_on(&mut self, other: CommandListId) {
        if other != self.id && !self.dependencies.contains(&other) {
            self.dependencies.push(other);
        }
    }

    pub(crate) fn dependencies(&self) -> &[CommandListId] {
        &self.dependencies
    }

    /// Report a contract violation unless `ok`. Returns `ok`.
    #[track_caller]
    fn require(&self, ok: bool, message: impl FnOnce() -> String) -> bool {
        if !ok {
            contract_violation(self.validation, &message());
        }
        ok
    }

    #[track_caller]
    fn require_recording(&self, operation: &str) -> bool {
        self.require(self.state.is_recording(), || {
            format!("{operation} called on {:?} command list", self.state)
        })
    }

    #[track_caller]
    fn require_outside_render_pass(&self, operation: &str) -> bool {
        self.require_recording(operation)
            && self.require(self.state != RecordingState::RenderPassActive, || {
                format!("{operation} is not allowed inside a render pass")
            })
    }

    pub(crate) fn record(&self, command: NativeCommand) {
        log::trace!("CommandList {:?}: {:?}", self.id, command);
        self.backend.record(self.command_buffer, command);
    }

    // --- lifecycle ---

    /// Reset the native command buffer and start recording.
    pub fn begin_commands(&mut self) -> Result<(), GraphicsError> {
        if !self.require(
            matches!(self.state, RecordingState::Idle | RecordingState::Ended),
            || format!("begin_commands called on {:?} command list", self.state),
        ) {
            return Ok(());
        }
        self.backend.begin_command_buffer(self.command_buffer)?;
        self.pipeline = None;
        self.frame_buffer = None;
        self.bindings.reset();
        self.state = RecordingState::Recording;
        Ok(())
    }

    /// Finish recording; the list becomes eligible for submission.
    pub fn end_commands(&mut self) -> Result<(), GraphicsError> {
        if !self.require_recording("end_commands") {
            return Ok(());
        }
        if self.state == RecordingState::RenderPassActive {
            contract_violation(
                self.validation,
                "end_commands called with an active render pass",
            );
            self.end_render_pass();
        }
        self.backend.end_command_buffer(self.command_buffer)?;
        self.state = RecordingState::Ended;
        Ok(())
    }

    /// Forget all recording state once the GPU has finished with the list.
    pub(crate) fn recycle(&mut self) {
        self.state = RecordingState::Idle;
        self.pipeline = None;
        self.frame_buffer = None;
        self.bindings.reset();
        self.dependencies.clear();
        self.descriptor_pool.reset_allocation_counters();
    }

    // --- render passes ---

    /// Begin a render pass on `frame_buffer`.
    ///
    /// Attachments are transitioned to attachment layouts first.
    pub fn begin_render_pass(&mut self, frame_buffer: &Arc<FrameBuffer>) {
        if !self.require_outside_render_pass("begin_render_pass") {
            return;
        }
        if self.state == RecordingState::ComputeActive {
            self.state = RecordingState::Recording;
        }

        for image in frame_buffer.color_attachments() {
            self.transition_image(image, ImageLayout::ColorAttachment);
        }
        if let Some(depth) = frame_buffer.depth_attachment() {
            self.transition_image(depth, ImageLayout::DepthStencilAttachment);
        }

        let render_pass = frame_buffer.render_pass();
        self.record(NativeCommand::BeginRenderPass {
            render_pass: render_pass.handle(),
            frame_buffer: frame_buffer.handle(),
            area: Rect2d::from_extent(frame_buffer.extent()),
            clear_values: render_pass.clear_values(),
        });
        self.frame_buffer = Some(Arc::clone(frame_buffer));
        self.state = RecordingState::RenderPassActive;

        if let Some(pipeline) = &self.pipeline
            && pipeline.bind_point() == BindPoint::Graphics
        {
            self.set_default_viewport();
        }
    }

    /// End the active render pass.
    ///
    /// Attachments take the final layouts declared by the render pass.
    pub fn end_render_pass(&mut self) {
        if !self.require(self.state == RecordingState::RenderPassActive, || {
            format!("end_render_pass called on {:?} command list", self.state)
        }) {
            return;
        }
        self.record(NativeCommand::EndRenderPass);

        if let Some(frame_buffer) = self.frame_buffer.take() {
            let descriptor = frame_buffer.render_pass().descriptor();
            for (image, attachment) in frame_buffer
                .color_attachments()
                .iter()
                .zip(&descriptor.color_attachments)
            {
                set_final_layout(image, attachment.final_layout);
            }
            if let (Some(image), Some(attachment)) =
                (frame_buffer.depth_attachment(), &descriptor.depth_attachment)
            {
                set_final_layout(image, attachment.final_layout);
            }
        }
        self.state = match &self.pipeline {
            Some(pipeline) if pipeline.bind_point() == BindPoint::Compute => {
                RecordingState::ComputeActive
            }
            _ => RecordingState::Recording,
        };
    }

    fn set_default_viewport(&mut self) {
        if let Some(frame_buffer) = &self.frame_buffer {
            let extent = frame_buffer.extent();
            self.record(NativeCommand::SetViewport(Viewport::from_extent(extent)));
            self.record(NativeCommand::SetScissor(Rect2d::from_extent(extent)));
        }
    }

    // --- pipeline state ---

    /// Bind a graphics or compute pipeline.
    ///
    /// Graphics pipelines seed a viewport and scissor covering the active
    /// render target. Every descriptor set whose expected layout differs
    /// from the one its physical set was written for is marked changed.
    pub fn bind_pipeline(&mut self, pipeline: &Arc<Pipeline>) {
        if !self.require_recording("bind_pipeline") {
            return;
        }
        if self
            .pipeline
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, pipeline))
        {
            return;
        }

        match pipeline.bind_point() {
            BindPoint::Compute => {
                if !self.require(self.state != RecordingState::RenderPassActive, || {
                    "compute pipeline bound inside a render pass".to_string()
                }) {
                    return;
                }
                self.state = RecordingState::ComputeActive;
            }
            BindPoint::Graphics => {
                if self.state == RecordingState::ComputeActive {
                    self.state = RecordingState::Recording;
                }
            }
        }

        self.record(NativeCommand::BindPipeline {
            bind_point: pipeline.bind_point(),
            pipeline: pipeline.handle(),
        });

        for set in 0..DESCRIPTOR_SET_COUNT {
            let expected = pipeline.set_layout(set).map(|layout| layout.id());
            let bindings = self.bindings.set_mut(set);
            if expected != bindings.layout && bindings.has_bindings() {
                bindings.changed = true;
            }
            // Sets must be rebound against the new pipeline layout.
            if bindings.descriptor_set.is_some() {
                bindings.rebind = true;
            }
        }

        self.pipeline = Some(Arc::clone(pipeline));
        if pipeline.bind_point() == BindPoint::Graphics {
            self.set_default_viewport();
        }
    }

    /// Override the viewport.
    pub fn set_viewport(&mut self, viewport: Viewport) {
        if self.require_recording("set_viewport") {
            self.record(NativeCommand::SetViewport(viewport));
        }
    }

    /// Override the scissor rectangle.
    pub fn set_scissor(&mut self, scissor: Rect2d) {
        if self.require_recording("set_scissor") {
            self.record(NativeCommand::SetScissor(scissor));
        }
    }

    /// Update push constants of the bound pipeline.
    pub fn push_constants(&mut self, stages: ShaderStages, offset: u32, data: &[u8]) {
        if !self.require_recording("push_constants") {
            return;
        }
        let Some(pipeline) = self.pipeline.clone() else {
            contract_violation(self.validation, "push_constants without a bound pipeline");
            return;
        };
        let end = offset + data.len() as u32;
        let covered = pipeline.push_constants().iter().any(|range| {
            range.stages.contains(stages) && range.offset <= offset && end <= range.offset + range.size
        });
        if !self.require(covered, || {
            format!("push constant range {offset}..{end} for {stages:?} is not declared by the pipeline")
        }) {
            return;
        }
        self.record(NativeCommand::PushConstants {
            pipeline: pipeline.handle(),
            stages,
            offset,
            data: data.to_vec(),
        });
    }

    /// Bind a vertex buffer.
    pub fn bind_vertex_buffer(&mut self, binding: u32, buffer: &Arc<Buffer>, offset: u64) {
        if !self.require_recording("bind_vertex_buffer")
            || !self.require((binding as usize) < MAX_VERTEX_BUFFER_BINDINGS, || {
                format!("vertex buffer binding {binding} out of range")
            })
            || !self.require(buffer.usage().contains(BufferUsage::VERTEX), || {
                format!("buffer {:?} lacks VERTEX usage", buffer.label())
            })
            || !self.require(offset < buffer.size(), || {
                format!("vertex buffer offset {offset} past the end of the buffer")
            })
        {
            return;
        }
        self.record(NativeCommand::BindVertexBuffer {
            binding,
            buffer: buffer.handle(),
            offset,
        });
    }

    /// Bind an index buffer.
    pub fn bind_index_buffer(&mut self, buffer: &Arc<Buffer>, offset: u64, index_type: IndexType) {
        if !self.require_recording("bind_index_buffer")
            || !self.require(buffer.usage().contains(BufferUsage::INDEX), || {
                format!("buffer {:?} lacks INDEX usage", buffer.label())
            })
            || !self.require(offset % index_type.size() == 0, || {
                format!("index buffer offset {offset} is not aligned to {index_type:?}")
            })
        {
            return;
        }
        self.record(NativeCommand::BindIndexBuffer {
            buffer: buffer.handle(),
            offset,
            index_type,
        });
    }

    // --- descriptor bindings ---

    fn bind_slot(&mut self, set: u32, binding: u32, slot: BindingSlot) -> Option<BindOutcome> {
        if !self.require_recording("descriptor binding")
            || !self.require((set as usize) < DESCRIPTOR_SET_COUNT, || {
                format!("descriptor set index {set} out of range")
            })
            || !self.require((binding as usize) < BINDINGS_PER_DESCRIPTOR_SET, || {
                format!("binding index {binding} out of range")
            })
        {
            return None;
        }
        let outcome = self.bindings.bind(set as usize, binding as usize, slot);
        if outcome != BindOutcome::Unchanged {
            log::trace!(
                "CommandList {:?}: ({}, {}) {:?}",
                self.id,
                set,
                binding,
                outcome
            );
        }
        Some(outcome)
    }

    fn check_shader_buffer(&self, buffer: &Buffer) -> bool {
        self.require(
            buffer
                .usage()
                .intersects(BufferUsage::UNIFORM | BufferUsage::STORAGE),
            || format!("buffer {:?} lacks UNIFORM or STORAGE usage", buffer.label()),
        )
    }

    /// Bind a whole buffer.
    pub fn bind_buffer(&mut self, set: u32, binding: u32, buffer: &Arc<Buffer>) {
        self.bind_buffer_range(set, binding, buffer, 0, buffer.size());
    }

    /// Bind a range of a buffer.
    pub fn bind_buffer_range(
        &mut self,
        set: u32,
        binding: u32,
        buffer: &Arc<Buffer>,
        offset: u64,
        range: u64,
    ) {
        if !self.check_shader_buffer(buffer)
            || !self.require(offset + range <= buffer.size(), || {
                format!("range {offset}+{range} exceeds buffer size {}", buffer.size())
            })
        {
            return;
        }
        self.bind_slot(
            set,
            binding,
            BindingSlot::Buffer {
                bound: BoundBuffer {
                    buffer: Arc::clone(buffer),
                    offset,
                    range,
                },
                dynamic: false,
            },
        );
    }

    /// Bind a buffer range whose offset is supplied when the set is bound.
    ///
    /// Changing only the offset between draws rebinds the set without
    /// rewriting it. The buffer needs [`BufferUsage::DYNAMIC`].
    pub fn bind_buffer_dynamic(
        &mut self,
        set: u32,
        binding: u32,
        buffer: &Arc<Buffer>,
        offset: u64,
        range: u64,
    ) {
        if !self.check_shader_buffer(buffer)
            || !self.require(buffer.usage().contains(BufferUsage::DYNAMIC), || {
                format!(
                    "buffer {:?} bound with a dynamic offset lacks DYNAMIC usage",
                    buffer.label()
                )
            })
            || !self.require(offset + range <= buffer.size(), || {
                format!("range {offset}+{range} exceeds buffer size {}", buffer.size())
            })
            || !self.require(offset <= u64::from(u32::MAX), || {
                format!("dynamic offset {offset} does not fit 32 bits")
            })
        {
            return;
        }
        self.bind_slot(
            set,
            binding,
            BindingSlot::Buffer {
                bound: BoundBuffer {
                    buffer: Arc::clone(buffer),
                    offset,
                    range,
                },
                dynamic: true,
            },
        );
    }

    /// Bind an array of whole buffers.
    pub fn bind_buffers(&mut self, set: u32, binding: u32, buffers: &[Arc<Buffer>]) {
        if !buffers.iter().all(|buffer| self.check_shader_buffer(buffer)) {
            return;
        }
        let bound = buffers
            .iter()
            .map(|buffer| BoundBuffer {
                buffer: Arc::clone(buffer),
                offset: 0,
                range: buffer.size(),
            })
            .collect();
        self.bind_slot(set, binding, BindingSlot::BufferArray(bound));
    }

    /// Bind a sampled or storage image.
    pub fn bind_image(&mut self, set: u32, binding: u32, image: &Arc<Image>) {
        if !self.prepare_shader_image(image) {
            return;
        }
        self.bind_slot(set, binding, BindingSlot::Image(Arc::clone(image)));
    }

    /// Bind an image combined with a sampler.
    pub fn bind_sampled_image(
        &mut self,
        set: u32,
        binding: u32,
        image: &Arc<Image>,
        sampler: &Arc<Sampler>,
    ) {
        if !self.prepare_shader_image(image) {
            return;
        }
        self.bind_slot(
            set,
            binding,
            BindingSlot::SampledImage {
                image: Arc::clone(image),
                sampler: Arc::clone(sampler),
            },
        );
    }

    /// Bind an array of images.
    pub fn bind_images(&mut self, set: u32, binding: u32, images: &[Arc<Image>]) {
        for image in images {
            if !self.prepare_shader_image(image) {
                return;
            }
        }
        self.bind_slot(set, binding, BindingSlot::ImageArray(images.to_vec()));
    }

    /// Bind a standalone sampler.
    pub fn bind_sampler(&mut self, set: u32, binding: u32, sampler: &Arc<Sampler>) {
        self.bind_slot(set, binding, BindingSlot::Sampler(Arc::clone(sampler)));
    }

    /// Bind an array of samplers.
    pub fn bind_samplers(&mut self, set: u32, binding: u32, samplers: &[Arc<Sampler>]) {
        self.bind_slot(set, binding, BindingSlot::SamplerArray(samplers.to_vec()));
    }

    /// Bind a built top-level acceleration structure.
    pub fn bind_tlas(&mut self, set: u32, binding: u32, tlas: &Arc<Tlas>) {
        if !self.require(tlas.is_built(), || {
            format!("TLAS {:?} bound before it was built", tlas.descriptor().label)
        }) {
            return;
        }
        self.bind_slot(set, binding, BindingSlot::Tlas(Arc::clone(tlas)));
    }

    /// Make sure a shader can read `image`, transitioning it if needed.
    fn prepare_shader_image(&mut self, image: &Image) -> bool {
        if !self.require(
            image
                .usage()
                .intersects(ImageUsage::SAMPLED | ImageUsage::STORAGE),
            || format!("image {:?} lacks SAMPLED or STORAGE usage", image.label()),
        ) {
            return false;
        }
        if image.layout().is_shader_readable() {
            return true;
        }
        if !self.require(self.state != RecordingState::RenderPassActive, || {
            format!(
                "image {:?} in {:?} layout bound inside a render pass",
                image.label(),
                image.layout()
            )
        }) {
            return false;
        }
        let target = if image.usage().contains(ImageUsage::SAMPLED) {
            ImageLayout::ShaderReadOnly
        } else {
            ImageLayout::General
        };
        self.transition_image(image, target);
        true
    }

    // --- draws and dispatches ---

    fn require_draw(&self, operation: &str) -> bool {
        self.require(self.state == RecordingState::RenderPassActive, || {
            format!("{operation} outside of a render pass")
        }) && self.require(
            self.pipeline
                .as_ref()
                .is_some_and(|pipeline| pipeline.bind_point() == BindPoint::Graphics),
            || format!("{operation} without a bound graphics pipeline"),
        )
    }

    fn require_dispatch(&self, operation: &str) -> bool {
        self.require_outside_render_pass(operation)
            && self.require(
                self.pipeline
                    .as_ref()
                    .is_some_and(|pipeline| pipeline.bind_point() == BindPoint::Compute),
                || format!("{operation} without a bound compute pipeline"),
            )
    }

    fn require_indirect(&self, buffer: &Buffer, offset: u64, size: u64) -> bool {
        self.require(buffer.usage().contains(BufferUsage::INDIRECT), || {
            format!("buffer {:?} lacks INDIRECT usage", buffer.label())
        }) && self.require(
            offset.checked_add(size).is_some_and(|end| end <= buffer.size()),
            || format!("indirect arguments at {offset} exceed buffer size {}", buffer.size()),
        )
    }

    /// Draw non-indexed primitives.
    pub fn draw(
        &mut self,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) -> Result<(), GraphicsError> {
        if !self.require_draw("draw") {
            return Ok(());
        }
        self.commit_descriptors()?;
        self.record(NativeCommand::Draw {
            vertex_count,
            instance_count,
            first_vertex,
            first_instance,
        });
        Ok(())
    }

    /// Draw indexed primitives.
    pub fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) -> Result<(), GraphicsError> {
        if !self.require_draw("draw_indexed") {
            return Ok(());
        }
        self.commit_descriptors()?;
        self.record(NativeCommand::DrawIndexed {
            index_count,
            instance_count,
            first_index,
            vertex_offset,
            first_instance,
        });
        Ok(())
    }

    /// Draw with arguments read from `buffer`.
    pub fn draw_indirect(
        &mut self,
        buffer: &Arc<Buffer>,
        offset: u64,
        draw_count: u32,
        stride: u32,
    ) -> Result<(), GraphicsError> {
        let span = indirect_span(draw_count, stride, crate::types::DrawIndirectArgs::SIZE);
        if !self.require_draw("draw_indirect") || !self.require_indirect(buffer, offset, span) {
            return Ok(());
        }
        self.commit_descriptors()?;
        self.record(NativeCommand::DrawIndirect {
            buffer: buffer.handle(),
            offset,
            draw_count,
            stride,
        });
        Ok(())
    }

    /// Draw indexed primitives with arguments read from `buffer`.
    pub fn draw_indexed_indirect(
        &mut self,
        buffer: &Arc<Buffer>,
        offset: u64,
        draw_count: u32,
        stride: u32,
    ) -> Result<(), GraphicsError> {
        let span = indirect_span(
            draw_count,
            stride,
            crate::types::DrawIndexedIndirectArgs::SIZE,
        );
        if !self.require_draw("draw_indexed_indirect")
            || !self.require_indirect(buffer, offset, span)
        {
            return Ok(());
        }
        self.commit_descriptors()?;
        self.record(NativeCommand::DrawIndexedIndirect {
            buffer: buffer.handle(),
            offset,
            draw_count,
            stride,
        });
        Ok(())
    }

    /// Dispatch compute work groups.
    pub fn dispatch(&mut self, x: u32, y: u32, z: u32) -> Result<(), GraphicsError> {
        if !self.require_dispatch("dispatch") {
            return Ok(());
        }
        self.commit_descriptors()?;
        self.record(NativeCommand::Dispatch { x, y, z });
        Ok(())
    }

    /// Dispatch compute work groups counted in `buffer`.
    pub fn dispatch_indirect(
        &mut self,
        buffer: &Arc<Buffer>,
        offset: u64,
    ) -> Result<(), GraphicsError> {
        if !self.require_dispatch("dispatch_indirect")
            || !self.require_indirect(buffer, offset, crate::types::DispatchIndirectArgs::SIZE)
        {
            return Ok(());
        }
        self.commit_descriptors()?;
        self.record(NativeCommand::DispatchIndirect {
            buffer: buffer.handle(),
            offset,
        });
        Ok(())
    }
}

impl Drop for CommandList {
    fn drop(&mut self) {
        log::trace!("CommandList: destroying {:?}", self.id);
        self.backend.destroy_command_buffer(self.command_buffer);
    }
}

impl std::fmt::Debug for CommandList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandList")
            .field("id", &self.id)
            .field("queue", &self.queue)
            .field("state", &self.state)
            .field("frame_independent", &self.frame_independent)
            .finish()
    }
}

static_assertions::assert_impl_all!(CommandList: Send, Sync);

fn indirect_span(draw_count: u32, stride: u32, args_size: u64) -> u64 {
    match draw_count {
        0 => 0,
        n => u64::from(n - 1) * u64::from(stride) + args_size,
    }
}

fn set_final_layout(image: &Image, layout: ImageLayout) {
    let mut state = image.state();
    state.layout = layout;
    state.access = layout.access_mask();
    state.stage = layout.stage();
    image.set_state(state);
}

#[cfg(test)]
mod tests;
