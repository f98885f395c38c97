//! Common types and descriptors for graphics resources.
//!
//! This module contains format enums, usage flags, and descriptor structs
//! used throughout the graphics system.

mod acceleration;
mod buffer;
mod common;
mod image;
mod pipeline;
mod query;
mod render_pass;
mod sampler;

pub use acceleration::{BlasDescriptor, BlasTriangles, TlasDescriptor, TlasInstance};
pub use buffer::{
    BufferCopy, BufferDescriptor, BufferDomain, BufferUsage, DispatchIndirectArgs,
    DrawIndexedIndirectArgs, DrawIndirectArgs,
};
pub use common::{
    AccessFlags, ClearValue, ExecutionOrder, Extent2d, Extent3d, IndexType, Offset3d,
    PipelineStage, QueueType, Rect2d, ShaderStages, Viewport,
};
pub use image::{
    ImageBlit, ImageCopy, ImageDescriptor, ImageFormat, ImageLayout, ImageType, ImageUsage,
};
pub use pipeline::{
    BindPoint, DescriptorCounts, DescriptorKind, DescriptorPoolSizes, DescriptorSetLayoutBinding,
    DescriptorSetLayoutDescriptor, PipelineDescriptor, PipelineKind, PrimitiveTopology,
    PushConstantRange, ShaderStageSource, VertexBinding,
};
pub use query::{QueryPoolDescriptor, QueryType};
pub use render_pass::{
    AttachmentDescriptor, FrameBufferDescriptor, LoadOp, RenderPassDescriptor, StoreOp,
};
pub use sampler::{AddressMode, CompareFunction, FilterMode, SamplerDescriptor};
