//! GPU resource types.
//!
//! Every resource owns exactly one native handle and destroys it when the
//! last reference is dropped. The device keeps one extra reference per
//! resource in a [`ResourceRegistry`]; once that is the only reference left,
//! the resource is handed to the memory manager, which drops it after the
//! GPU can no longer be using it.

mod acceleration;
mod buffer;
mod image;
mod pipeline;
mod query_pool;
mod registry;
mod render_pass;
mod sampler;

pub use acceleration::{Blas, Tlas};
pub use buffer::{Buffer, MultiBuffer};
pub use image::{Image, ImageState};
pub use pipeline::{DescriptorSetLayout, LayoutId, Pipeline};
pub use query_pool::QueryPool;
pub(crate) use registry::ResourceRegistry;
pub use render_pass::{FrameBuffer, RenderPass};
pub use sampler::Sampler;
