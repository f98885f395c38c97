//! Typed handles to backend objects.
//!
//! Handles are plain identifiers. They carry no ownership: the resource
//! wrappers in [`crate::resources`] own the objects and destroy them.

macro_rules! define_handles {
    ($($(#[$meta:meta])* $name:ident),* $(,)?) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
            pub struct $name(u64);

            impl $name {
                /// Wrap a raw backend identifier.
                pub const fn from_raw(raw: u64) -> Self {
                    Self(raw)
                }

                /// The raw backend identifier.
                pub const fn raw(self) -> u64 {
                    self.0
                }
            }
        )*
    };
}

define_handles!(
    /// Handle to a buffer.
    BufferHandle,
    /// Handle to an image (and its default view).
    ImageHandle,
    /// Handle to a sampler.
    SamplerHandle,
    /// Handle to a descriptor set layout.
    DescriptorSetLayoutHandle,
    /// Handle to a descriptor pool.
    DescriptorPoolHandle,
    /// Handle to a descriptor set allocated from a pool.
    DescriptorSetHandle,
    /// Handle to a graphics or compute pipeline.
    PipelineHandle,
    /// Handle to a render pass.
    RenderPassHandle,
    /// Handle to a frame buffer.
    FrameBufferHandle,
    /// Handle to a query pool.
    QueryPoolHandle,
    /// Handle to a bottom- or top-level acceleration structure.
    AccelerationStructureHandle,
    /// Handle to a native command buffer.
    CommandBufferHandle,
    /// Handle to a fence.
    FenceHandle,
    /// Handle to a binary semaphore.
    SemaphoreHandle,
);

/// Category of a backend object, used for statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ObjectKind {
    Buffer,
    Image,
    Sampler,
    DescriptorSetLayout,
    DescriptorPool,
    Pipeline,
    RenderPass,
    FrameBuffer,
    QueryPool,
    AccelerationStructure,
    CommandBuffer,
    Fence,
    Semaphore,
}
