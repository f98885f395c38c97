//! # Cinder Graphics
//!
//! GPU resource lifetimes and frame-pipelined command submission for the
//! Cinder engine.
//!
//! ## Overview
//!
//! This crate provides:
//! - [`GraphicsDevice`] - Creates resources, hands out command lists and
//!   submits each frame across the graphics, compute and transfer queues
//! - [`CommandList`] - Records commands with automatic layout transitions and
//!   minimal descriptor updates
//! - [`MemoryManager`] - Destroys released resources only once no frame in
//!   flight can still use them
//! - [`DescriptorPool`] - Growing descriptor pools with a per-layout set cache
//! - [`GpuProfiler`] - Named, nested GPU timestamp scopes averaged over frames
//! - [`GpuBackend`] - Trait for native API backends, with [`DummyBackend`]
//!   for testing
//!
//! ## Example
//!
//! ```ignore
//! use cinder_graphics::*;
//!
//! let device = GraphicsDevice::new(create_backend()?, DeviceParameters::default())?;
//! let vertices = device.create_buffer(
//!     &BufferDescriptor::new(1024, BufferUsage::VERTEX | BufferUsage::COPY_DST),
//! )?;
//! vertices.set_data(&vertex_bytes)?;
//!
//! let mut cmd = device.get_command_list(QueueType::Graphics)?;
//! cmd.begin_commands()?;
//! cmd.bind_pipeline(&pipeline);
//! cmd.bind_vertex_buffer(0, &vertices, 0);
//! cmd.draw(3, 1, 0, 0)?;
//! cmd.end_commands()?;
//! device.submit_command_list(cmd, PipelineStage::ALL_COMMANDS, ExecutionOrder::Sequential)?;
//! device.complete_frame()?;
//! ```

pub mod backend;
pub mod command;
pub mod config;
pub mod descriptor;
pub mod device;
pub mod error;
pub mod gpu_profiler;
pub mod memory;
pub mod present;
pub mod profiling;
pub mod queue;
pub mod resources;
pub mod sync;
pub mod types;

// Re-export main types for convenience
pub use backend::{BackendCapabilities, DummyBackend, GpuBackend, SubmitBatch, create_backend};
pub use command::{BufferTransition, CommandList, CommandListId, ImageTransition, RecordingState};
pub use config::DeviceParameters;
pub use descriptor::DescriptorPool;
pub use device::GraphicsDevice;
pub use error::GraphicsError;
pub use gpu_profiler::{GpuProfiler, GpuQuery, QueryOrder, ThreadProfile, ThreadQueries};
pub use memory::{DeferredResource, MemoryManager};
pub use present::{SwapStatus, SwapTarget};
pub use queue::{Queue, QueueGuard};
pub use resources::{
    Blas, Buffer, DescriptorSetLayout, FrameBuffer, Image, ImageState, MultiBuffer, Pipeline,
    QueryPool, RenderPass, Sampler, Tlas,
};
pub use sync::{Fence, FenceStatus, Semaphore};
pub use types::*;
