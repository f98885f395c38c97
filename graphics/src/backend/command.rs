//! Encoded native commands, descriptor writes and queue submissions.

use crate::types::{
    AccessFlags, BindPoint, BufferCopy, ClearValue, DescriptorKind, Extent3d, FilterMode,
    ImageBlit, ImageCopy, ImageLayout, IndexType, PipelineStage, Rect2d, ShaderStages, Viewport,
};

use super::handle::{
    AccelerationStructureHandle, BufferHandle, CommandBufferHandle, DescriptorSetHandle,
    FrameBufferHandle, ImageHandle, PipelineHandle, QueryPoolHandle, RenderPassHandle,
    SamplerHandle, SemaphoreHandle,
};

/// Layout/access transition of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageBarrier {
    pub image: ImageHandle,
    pub old_layout: ImageLayout,
    pub new_layout: ImageLayout,
    pub src_access: AccessFlags,
    pub dst_access: AccessFlags,
    pub base_mip_level: u32,
    pub mip_level_count: u32,
}

/// Access transition of a buffer range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferBarrier {
    pub buffer: BufferHandle,
    pub offset: u64,
    pub size: u64,
    pub src_access: AccessFlags,
    pub dst_access: AccessFlags,
}

/// Geometry reference used by a bottom-level build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlasBuildGeometry {
    pub vertex_buffer: BufferHandle,
    pub vertex_count: u32,
    pub vertex_stride: u64,
    pub index_buffer: Option<BufferHandle>,
    pub primitive_vertex_count: u32,
}

/// Instance reference used by a top-level build.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TlasBuildInstance {
    pub blas: AccelerationStructureHandle,
    pub transform: [f32; 12],
    pub custom_index: u32,
    pub mask: u8,
}

/// A command encoded into a native command buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum NativeCommand {
    BeginRenderPass {
        render_pass: RenderPassHandle,
        frame_buffer: FrameBufferHandle,
        area: Rect2d,
        clear_values: Vec<ClearValue>,
    },
    EndRenderPass,
    BindPipeline {
        bind_point: BindPoint,
        pipeline: PipelineHandle,
    },
    SetViewport(Viewport),
    SetScissor(Rect2d),
    BindDescriptorSet {
        bind_point: BindPoint,
        pipeline: PipelineHandle,
        set: u32,
        descriptor_set: DescriptorSetHandle,
        dynamic_offsets: Vec<u32>,
    },
    BindVertexBuffer {
        binding: u32,
        buffer: BufferHandle,
        offset: u64,
    },
    BindIndexBuffer {
        buffer: BufferHandle,
        offset: u64,
        index_type: IndexType,
    },
    PushConstants {
        pipeline: PipelineHandle,
        stages: ShaderStages,
        offset: u32,
        data: Vec<u8>,
    },
    Draw {
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    },
    DrawIndirect {
        buffer: BufferHandle,
        offset: u64,
        draw_count: u32,
        stride: u32,
    },
    DrawIndexedIndirect {
        buffer: BufferHandle,
        offset: u64,
        draw_count: u32,
        stride: u32,
    },
    Dispatch {
        x: u32,
        y: u32,
        z: u32,
    },
    DispatchIndirect {
        buffer: BufferHandle,
        offset: u64,
    },
    CopyBuffer {
        src: BufferHandle,
        dst: BufferHandle,
        region: BufferCopy,
    },
    FillBuffer {
        buffer: BufferHandle,
        offset: u64,
        size: u64,
        value: u32,
    },
    UpdateBuffer {
        buffer: BufferHandle,
        offset: u64,
        data: Vec<u8>,
    },
    CopyBufferToImage {
        buffer: BufferHandle,
        buffer_offset: u64,
        image: ImageHandle,
        mip_level: u32,
        extent: Extent3d,
    },
    CopyImageToBuffer {
        image: ImageHandle,
        mip_level: u32,
        extent: Extent3d,
        buffer: BufferHandle,
        buffer_offset: u64,
    },
    CopyImage {
        src: ImageHandle,
        dst: ImageHandle,
        region: ImageCopy,
    },
    BlitImage {
        src: ImageHandle,
        dst: ImageHandle,
        region: ImageBlit,
        filter: FilterMode,
    },
    PipelineBarrier {
        src_stage: PipelineStage,
        dst_stage: PipelineStage,
        image_barriers: Vec<ImageBarrier>,
        buffer_barriers: Vec<BufferBarrier>,
    },
    ResetQueryPool {
        pool: QueryPoolHandle,
        first_query: u32,
        query_count: u32,
    },
    WriteTimestamp {
        pool: QueryPoolHandle,
        query: u32,
        stage: PipelineStage,
    },
    BuildBlas {
        structure: AccelerationStructureHandle,
        geometries: Vec<BlasBuildGeometry>,
    },
    BuildTlas {
        structure: AccelerationStructureHandle,
        instances: Vec<TlasBuildInstance>,
    },
}

/// One resource written into a descriptor slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorResource {
    Buffer {
        buffer: BufferHandle,
        offset: u64,
        range: u64,
    },
    Image {
        image: ImageHandle,
        sampler: Option<SamplerHandle>,
        layout: ImageLayout,
    },
    Sampler(SamplerHandle),
    AccelerationStructure(AccelerationStructureHandle),
}

/// A write of consecutive array elements of one binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorWrite {
    pub set: DescriptorSetHandle,
    pub binding: u32,
    pub first_element: u32,
    pub kind: DescriptorKind,
    pub resources: Vec<DescriptorResource>,
}

/// One batch of a queue submission.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmitBatch {
    pub command_buffers: Vec<CommandBufferHandle>,
    pub wait_semaphores: Vec<(SemaphoreHandle, PipelineStage)>,
    pub signal_semaphores: Vec<SemaphoreHandle>,
}

impl SubmitBatch {
    /// Batch executing the given command buffers with no synchronization.
    pub fn new(command_buffers: Vec<CommandBufferHandle>) -> Self {
        Self {
            command_buffers,
            ..Default::default()
        }
    }

    /// Wait on a semaphore at the given stage.
    pub fn wait(mut self, semaphore: SemaphoreHandle, stage: PipelineStage) -> Self {
        self.wait_semaphores.push((semaphore, stage));
        self
    }

    /// Signal a semaphore when the batch completes.
    pub fn signal(mut self, semaphore: SemaphoreHandle) -> Self {
        self.signal_semaphores.push(semaphore);
        self
    }
}
