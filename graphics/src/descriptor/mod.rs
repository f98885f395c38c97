//! Descriptor set caching and binding state.

mod binding;
mod pool;

use std::sync::{Arc, Weak};

pub(crate) use binding::{BindOutcome, BindingSlot, BindingTable, BoundBuffer};
pub use pool::DescriptorPool;

use crate::backend::GpuBackend;
use crate::error::GraphicsError;
use crate::resources::{Buffer, Image, Sampler};
use crate::types::{
    BufferDescriptor, BufferDomain, BufferUsage, ImageDescriptor, ImageFormat, ImageUsage,
    SamplerDescriptor,
};

/// Resources written into descriptor array elements that are no longer bound.
///
/// Cached descriptor sets outlive the frame that wrote them. When an array
/// binding shrinks, its trailing elements would still point at resources
/// that may have been destroyed since, so they are overwritten with these.
pub(crate) struct Placeholders {
    pub(crate) buffer: Arc<Buffer>,
    pub(crate) image: Arc<Image>,
    pub(crate) sampler: Arc<Sampler>,
}

impl Placeholders {
    pub(crate) fn new(backend: &Arc<dyn GpuBackend>) -> Result<Self, GraphicsError> {
        let buffer = Buffer::new(
            Weak::new(),
            Arc::clone(backend),
            BufferDescriptor::new(256, BufferUsage::UNIFORM | BufferUsage::STORAGE)
                .with_domain(BufferDomain::Host)
                .with_label("placeholder_buffer"),
        )?;
        let image = Image::new(
            Weak::new(),
            Arc::clone(backend),
            ImageDescriptor::new_2d(
                1,
                1,
                ImageFormat::Rgba8Unorm,
                ImageUsage::SAMPLED | ImageUsage::STORAGE | ImageUsage::COPY_DST,
            )
            .with_label("placeholder_image"),
        )?;
        let sampler = Sampler::new(
            Arc::clone(backend),
            SamplerDescriptor::nearest().with_label("placeholder_sampler"),
        )?;
        Ok(Self {
            buffer: Arc::new(buffer),
            image: Arc::new(image),
            sampler: Arc::new(sampler),
        })
    }
}
