//! Render pass and frame buffer descriptors.

use std::sync::Arc;

use super::common::ClearValue;
use super::image::{ImageFormat, ImageLayout};
use crate::config::MAX_COLOR_ATTACHMENTS;
use crate::error::GraphicsError;
use crate::resources::{Image, RenderPass};

/// What happens to attachment contents when a render pass begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LoadOp {
    /// Keep the existing contents.
    Load,
    /// Clear to the attachment's clear value.
    #[default]
    Clear,
    /// Contents are undefined.
    DontCare,
}

/// What happens to attachment contents when a render pass ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StoreOp {
    /// Write the results to memory.
    #[default]
    Store,
    /// Discard the results.
    DontCare,
}

/// One attachment of a render pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AttachmentDescriptor {
    /// Attachment format.
    pub format: ImageFormat,
    /// Load operation.
    pub load_op: LoadOp,
    /// Store operation.
    pub store_op: StoreOp,
    /// Clear value used with [`LoadOp::Clear`].
    pub clear_value: ClearValue,
    /// Layout the attachment is left in after the pass.
    pub final_layout: ImageLayout,
}

impl AttachmentDescriptor {
    /// Color attachment cleared to transparent black.
    pub fn color(format: ImageFormat) -> Self {
        Self {
            format,
            load_op: LoadOp::Clear,
            store_op: StoreOp::Store,
            clear_value: ClearValue::Color([0.0; 4]),
            final_layout: ImageLayout::ColorAttachment,
        }
    }

    /// Depth attachment cleared to 1.0.
    pub fn depth(format: ImageFormat) -> Self {
        Self {
            format,
            load_op: LoadOp::Clear,
            store_op: StoreOp::Store,
            clear_value: ClearValue::DepthStencil {
                depth: 1.0,
                stencil: 0,
            },
            final_layout: ImageLayout::DepthStencilAttachment,
        }
    }

    /// Set the load operation.
    pub fn with_load_op(mut self, load_op: LoadOp) -> Self {
        self.load_op = load_op;
        self
    }

    /// Set the store operation.
    pub fn with_store_op(mut self, store_op: StoreOp) -> Self {
        self.store_op = store_op;
        self
    }

    /// Set the clear value.
    pub fn with_clear_value(mut self, clear_value: ClearValue) -> Self {
        self.clear_value = clear_value;
        self
    }

    /// Set the layout the attachment ends in.
    pub fn with_final_layout(mut self, layout: ImageLayout) -> Self {
        self.final_layout = layout;
        self
    }
}

/// Descriptor for creating a render pass.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RenderPassDescriptor {
    /// Debug label.
    pub label: Option<String>,
    /// Color attachments.
    pub color_attachments: Vec<AttachmentDescriptor>,
    /// Depth attachment.
    pub depth_attachment: Option<AttachmentDescriptor>,
}

impl RenderPassDescriptor {
    /// Create an empty render pass descriptor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Add a color attachment.
    pub fn with_color_attachment(mut self, attachment: AttachmentDescriptor) -> Self {
        self.color_attachments.push(attachment);
        self
    }

    /// Set the depth attachment.
    pub fn with_depth_attachment(mut self, attachment: AttachmentDescriptor) -> Self {
        self.depth_attachment = Some(attachment);
        self
    }

    pub(crate) fn validate(&self) -> Result<(), GraphicsError> {
        if self.color_attachments.len() > MAX_COLOR_ATTACHMENTS {
            return Err(GraphicsError::InvalidParameter(format!(
                "{} color attachments exceed limit {}",
                self.color_attachments.len(),
                MAX_COLOR_ATTACHMENTS
            )));
        }
        if self.color_attachments.iter().any(|a| a.format.is_depth()) {
            return Err(GraphicsError::InvalidParameter(
                "depth format used as color attachment".to_string(),
            ));
        }
        if let Some(depth) = &self.depth_attachment
            && !depth.format.is_depth()
        {
            return Err(GraphicsError::InvalidParameter(
                "depth attachment requires a depth format".to_string(),
            ));
        }
        if self.color_attachments.is_empty() && self.depth_attachment.is_none() {
            return Err(GraphicsError::InvalidParameter(
                "render pass needs at least one attachment".to_string(),
            ));
        }
        Ok(())
    }
}

/// Descriptor for creating a frame buffer.
#[derive(Debug, Clone)]
pub struct FrameBufferDescriptor {
    /// Debug label.
    pub label: Option<String>,
    /// Render pass the frame buffer is compatible with.
    pub render_pass: Arc<RenderPass>,
    /// Color attachment images, one per render pass color attachment.
    pub color_attachments: Vec<Arc<Image>>,
    /// Depth attachment image.
    pub depth_attachment: Option<Arc<Image>>,
}

impl FrameBufferDescriptor {
    /// Create a frame buffer descriptor for a render pass.
    pub fn new(render_pass: Arc<RenderPass>) -> Self {
        Self {
            label: None,
            render_pass,
            color_attachments: Vec::new(),
            depth_attachment: None,
        }
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Add a color attachment image.
    pub fn with_color_attachment(mut self, image: Arc<Image>) -> Self {
        self.color_attachments.push(image);
        self
    }

    /// Set the depth attachment image.
    pub fn with_depth_attachment(mut self, image: Arc<Image>) -> Self {
        self.depth_attachment = Some(image);
        self
    }
}
