//! GPU image resources.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::backend::{GpuBackend, ImageHandle};
use crate::device::GraphicsDevice;
use crate::error::GraphicsError;
use crate::types::{
    AccessFlags, Extent2d, Extent3d, ImageDescriptor, ImageFormat, ImageLayout, ImageUsage,
    PipelineStage,
};

/// Layout and access state recorded by the last barrier on an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageState {
    /// Current layout of every mip level.
    pub layout: ImageLayout,
    /// Access mask of the last transition.
    pub access: AccessFlags,
    /// Stage of the last transition.
    pub stage: PipelineStage,
}

impl Default for ImageState {
    fn default() -> Self {
        Self {
            layout: ImageLayout::Undefined,
            access: AccessFlags::empty(),
            stage: PipelineStage::TOP_OF_PIPE,
        }
    }
}

/// A GPU image resource.
///
/// Images are created by [`GraphicsDevice::create_image`]. The image tracks
/// its own layout so command lists can insert the transitions render passes
/// and copies need.
pub struct Image {
    device: Weak<GraphicsDevice>,
    backend: Arc<dyn GpuBackend>,
    handle: ImageHandle,
    descriptor: ImageDescriptor,
    state: Mutex<ImageState>,
}

impl Image {
    pub(crate) fn new(
        device: Weak<GraphicsDevice>,
        backend: Arc<dyn GpuBackend>,
        descriptor: ImageDescriptor,
    ) -> Result<Self, GraphicsError> {
        let handle = backend.create_image(&descriptor)?;
        Ok(Self {
            device,
            backend,
            handle,
            descriptor,
            state: Mutex::new(ImageState::default()),
        })
    }

    /// Get the parent device, if it still exists.
    pub fn device(&self) -> Option<Arc<GraphicsDevice>> {
        self.device.upgrade()
    }

    /// Backend handle.
    pub fn handle(&self) -> ImageHandle {
        self.handle
    }

    /// Get the image descriptor.
    pub fn descriptor(&self) -> &ImageDescriptor {
        &self.descriptor
    }

    /// Size of the base level.
    pub fn size(&self) -> Extent3d {
        self.descriptor.size
    }

    /// Width and height of the base level.
    pub fn extent_2d(&self) -> Extent2d {
        self.descriptor.size.to_2d()
    }

    /// Texel format.
    pub fn format(&self) -> ImageFormat {
        self.descriptor.format
    }

    /// Usage flags.
    pub fn usage(&self) -> ImageUsage {
        self.descriptor.usage
    }

    /// Number of mip levels.
    pub fn mip_levels(&self) -> u32 {
        self.descriptor.mip_levels()
    }

    /// Get the image label, if set.
    pub fn label(&self) -> Option<&str> {
        self.descriptor.label.as_deref()
    }

    /// Tracked layout.
    pub fn layout(&self) -> ImageLayout {
        self.state.lock().layout
    }

    /// Tracked layout, access and stage.
    pub fn state(&self) -> ImageState {
        *self.state.lock()
    }

    pub(crate) fn set_state(&self, state: ImageState) {
        *self.state.lock() = state;
    }

    /// Upload the contents of the base level (all layers).
    ///
    /// The data goes through a staging buffer and is copied at the start of
    /// the next submitted frame; the image ends up in
    /// [`ImageLayout::ShaderReadOnly`].
    pub fn set_data(&self, data: &[u8]) -> Result<(), GraphicsError> {
        let expected = self.descriptor.base_level_size();
        if data.len() as u64 != expected {
            return Err(GraphicsError::InvalidParameter(format!(
                "image data is {} bytes, base level needs {}",
                data.len(),
                expected
            )));
        }
        if !self.descriptor.usage.contains(ImageUsage::COPY_DST) {
            return Err(GraphicsError::InvalidParameter(
                "image upload requires COPY_DST usage".to_string(),
            ));
        }
        let device = self.device().ok_or_else(|| {
            GraphicsError::InvalidParameter("image outlived its device".to_string())
        })?;
        device.upload_image(self, data)
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        log::trace!("Image: destroying {:?} {:?}", self.descriptor.label, self.handle);
        self.backend.destroy_image(self.handle);
    }
}

impl std::fmt::Debug for Image {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Image")
            .field("handle", &self.handle)
            .field("size", &self.descriptor.size)
            .field("format", &self.descriptor.format)
            .field("label", &self.descriptor.label)
            .finish()
    }
}

static_assertions::assert_impl_all!(Image: Send, Sync);
