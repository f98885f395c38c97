//! Render passes and frame buffers.

use std::sync::Arc;

use crate::backend::{FrameBufferHandle, GpuBackend, RenderPassHandle};
use crate::error::GraphicsError;
use crate::types::{
    ClearValue, Extent2d, FrameBufferDescriptor, ImageUsage, RenderPassDescriptor,
};

use super::Image;

/// A render pass: the attachment formats and load/store behavior of a
/// sequence of draws.
pub struct RenderPass {
    backend: Arc<dyn GpuBackend>,
    handle: RenderPassHandle,
    descriptor: RenderPassDescriptor,
}

impl RenderPass {
    pub(crate) fn new(
        backend: Arc<dyn GpuBackend>,
        descriptor: RenderPassDescriptor,
    ) -> Result<Self, GraphicsError> {
        descriptor.validate()?;
        let handle = backend.create_render_pass(&descriptor)?;
        Ok(Self {
            backend,
            handle,
            descriptor,
        })
    }

    /// Backend handle.
    pub fn handle(&self) -> RenderPassHandle {
        self.handle
    }

    /// Get the render pass descriptor.
    pub fn descriptor(&self) -> &RenderPassDescriptor {
        &self.descriptor
    }

    /// Clear values of all attachments, colors first.
    pub fn clear_values(&self) -> Vec<ClearValue> {
        self.descriptor
            .color_attachments
            .iter()
            .chain(self.descriptor.depth_attachment.iter())
            .map(|a| a.clear_value)
            .collect()
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        self.backend.destroy_render_pass(self.handle);
    }
}

impl std::fmt::Debug for RenderPass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderPass")
            .field("handle", &self.handle)
            .field("color_attachments", &self.descriptor.color_attachments.len())
            .field("depth", &self.descriptor.depth_attachment.is_some())
            .field("label", &self.descriptor.label)
            .finish()
    }
}

/// A frame buffer: the images a render pass draws into.
pub struct FrameBuffer {
    backend: Arc<dyn GpuBackend>,
    handle: FrameBufferHandle,
    render_pass: Arc<RenderPass>,
    color_attachments: Vec<Arc<Image>>,
    depth_attachment: Option<Arc<Image>>,
    extent: Extent2d,
    label: Option<String>,
}

impl FrameBuffer {
    pub(crate) fn new(
        backend: Arc<dyn GpuBackend>,
        descriptor: FrameBufferDescriptor,
    ) -> Result<Self, GraphicsError> {
        let pass = descriptor.render_pass.descriptor();
        if pass.color_attachments.len() != descriptor.color_attachments.len()
            || pass.depth_attachment.is_some() != descriptor.depth_attachment.is_some()
        {
            return Err(GraphicsError::InvalidParameter(
                "frame buffer attachments do not match the render pass".to_string(),
            ));
        }
        for (image, attachment) in descriptor.color_attachments.iter().zip(&pass.color_attachments)
        {
            if image.format() != attachment.format
                || !image.usage().contains(ImageUsage::COLOR_ATTACHMENT)
            {
                return Err(GraphicsError::InvalidParameter(format!(
                    "image {:?} cannot be used as {:?} color attachment",
                    image.label(),
                    attachment.format
                )));
            }
        }
        if let Some(depth) = &descriptor.depth_attachment
            && !depth.usage().contains(ImageUsage::DEPTH_STENCIL_ATTACHMENT)
        {
            return Err(GraphicsError::InvalidParameter(
                "depth attachment requires DEPTH_STENCIL_ATTACHMENT usage".to_string(),
            ));
        }

        let attachments: Vec<&Arc<Image>> = descriptor
            .color_attachments
            .iter()
            .chain(descriptor.depth_attachment.iter())
            .collect();
        let extent = attachments
            .first()
            .map(|image| image.extent_2d())
            .unwrap_or_default();
        if attachments.iter().any(|image| image.extent_2d() != extent) {
            return Err(GraphicsError::InvalidParameter(
                "frame buffer attachments differ in size".to_string(),
            ));
        }
        let handles: Vec<_> = attachments.iter().map(|image| image.handle()).collect();
        let handle =
            backend.create_frame_buffer(descriptor.render_pass.handle(), &handles, extent)?;

        Ok(Self {
            backend,
            handle,
            render_pass: descriptor.render_pass,
            color_attachments: descriptor.color_attachments,
            depth_attachment: descriptor.depth_attachment,
            extent,
            label: descriptor.label,
        })
    }

    /// Backend handle.
    pub fn handle(&self) -> FrameBufferHandle {
        self.handle
    }

    /// Render pass the frame buffer was created for.
    pub fn render_pass(&self) -> &Arc<RenderPass> {
        &self.render_pass
    }

    /// Color attachment images.
    pub fn color_attachments(&self) -> &[Arc<Image>] {
        &self.color_attachments
    }

    /// Depth attachment image.
    pub fn depth_attachment(&self) -> Option<&Arc<Image>> {
        self.depth_attachment.as_ref()
    }

    /// Size shared by all attachments.
    pub fn extent(&self) -> Extent2d {
        self.extent
    }

    /// Get the frame buffer label, if set.
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }
}

impl Drop for FrameBuffer {
    fn drop(&mut self) {
        self.backend.destroy_frame_buffer(self.handle);
    }
}

impl std::fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameBuffer")
            .field("handle", &self.handle)
            .field("extent", &self.extent)
            .field("label", &self.label)
            .finish()
    }
}

static_assertions::assert_impl_all!(RenderPass: Send, Sync);
static_assertions::assert_impl_all!(FrameBuffer: Send, Sync);
