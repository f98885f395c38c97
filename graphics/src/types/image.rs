//! Image types and descriptors.

use bitflags::bitflags;

use super::common::{AccessFlags, Extent3d, Offset3d, PipelineStage};

/// Texel format of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ImageFormat {
    /// 8-bit single channel, normalized.
    R8Unorm,
    /// 8-bit RGBA, normalized.
    #[default]
    Rgba8Unorm,
    /// 8-bit RGBA, sRGB encoded.
    Rgba8Srgb,
    /// 8-bit BGRA, normalized (common swap target format).
    Bgra8Unorm,
    /// 16-bit float RGBA.
    Rgba16Float,
    /// 32-bit float single channel.
    R32Float,
    /// 32-bit float RGBA.
    Rgba32Float,
    /// 32-bit float depth.
    Depth32Float,
    /// 24-bit depth with 8-bit stencil.
    Depth24Stencil8,
}

impl ImageFormat {
    /// Size of one texel in bytes.
    pub fn bytes_per_texel(self) -> u32 {
        match self {
            ImageFormat::R8Unorm => 1,
            ImageFormat::Rgba8Unorm
            | ImageFormat::Rgba8Srgb
            | ImageFormat::Bgra8Unorm
            | ImageFormat::R32Float
            | ImageFormat::Depth32Float
            | ImageFormat::Depth24Stencil8 => 4,
            ImageFormat::Rgba16Float => 8,
            ImageFormat::Rgba32Float => 16,
        }
    }

    /// Whether the format has a depth aspect.
    pub fn is_depth(self) -> bool {
        matches!(self, ImageFormat::Depth32Float | ImageFormat::Depth24Stencil8)
    }

    /// Whether the format has a stencil aspect.
    pub fn has_stencil(self) -> bool {
        matches!(self, ImageFormat::Depth24Stencil8)
    }
}

bitflags! {
    /// Usage flags for images.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ImageUsage: u32 {
        /// Image can be sampled in shaders.
        const SAMPLED = 1 << 0;
        /// Image can be read and written as a storage image.
        const STORAGE = 1 << 1;
        /// Image can be a color attachment.
        const COLOR_ATTACHMENT = 1 << 2;
        /// Image can be a depth/stencil attachment.
        const DEPTH_STENCIL_ATTACHMENT = 1 << 3;
        /// Image can be copied or blitted from.
        const COPY_SRC = 1 << 4;
        /// Image can be copied or blitted to.
        const COPY_DST = 1 << 5;
    }
}

impl Default for ImageUsage {
    fn default() -> Self {
        Self::SAMPLED | Self::COPY_DST
    }
}

/// Dimensionality of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ImageType {
    /// One-dimensional image.
    Image1d,
    /// Array of one-dimensional images.
    Image1dArray,
    /// Two-dimensional image.
    #[default]
    Image2d,
    /// Array of two-dimensional images.
    Image2dArray,
    /// Three-dimensional image.
    Image3d,
}

/// Tracked layout of an image.
///
/// The layout decides which operations may access the image without a
/// transition barrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ImageLayout {
    /// Contents are undefined (initial state).
    #[default]
    Undefined,
    /// Usable by every operation at reduced performance.
    General,
    /// Color attachment writes.
    ColorAttachment,
    /// Depth/stencil attachment reads and writes.
    DepthStencilAttachment,
    /// Depth/stencil reads from shaders.
    DepthStencilReadOnly,
    /// Sampled reads from shaders.
    ShaderReadOnly,
    /// Source of transfer operations.
    TransferSrc,
    /// Destination of transfer operations.
    TransferDst,
    /// Ready to be presented to a swap target.
    Present,
}

impl ImageLayout {
    /// Access mask typically associated with this layout.
    pub fn access_mask(self) -> AccessFlags {
        match self {
            ImageLayout::Undefined | ImageLayout::Present => AccessFlags::empty(),
            ImageLayout::General => AccessFlags::SHADER_READ | AccessFlags::SHADER_WRITE,
            ImageLayout::ColorAttachment => {
                AccessFlags::COLOR_ATTACHMENT_READ | AccessFlags::COLOR_ATTACHMENT_WRITE
            }
            ImageLayout::DepthStencilAttachment => {
                AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                    | AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE
            }
            ImageLayout::DepthStencilReadOnly => {
                AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ | AccessFlags::SHADER_READ
            }
            ImageLayout::ShaderReadOnly => AccessFlags::SHADER_READ,
            ImageLayout::TransferSrc => AccessFlags::TRANSFER_READ,
            ImageLayout::TransferDst => AccessFlags::TRANSFER_WRITE,
        }
    }

    /// Pipeline stage that accesses an image in this layout.
    pub fn stage(self) -> PipelineStage {
        match self {
            ImageLayout::Undefined => PipelineStage::TOP_OF_PIPE,
            ImageLayout::Present => PipelineStage::BOTTOM_OF_PIPE,
            ImageLayout::General => PipelineStage::ALL_COMMANDS,
            ImageLayout::ColorAttachment => PipelineStage::COLOR_ATTACHMENT_OUTPUT,
            ImageLayout::DepthStencilAttachment => {
                PipelineStage::EARLY_FRAGMENT_TESTS | PipelineStage::LATE_FRAGMENT_TESTS
            }
            ImageLayout::DepthStencilReadOnly | ImageLayout::ShaderReadOnly => {
                PipelineStage::FRAGMENT_SHADER | PipelineStage::COMPUTE_SHADER
            }
            ImageLayout::TransferSrc | ImageLayout::TransferDst => PipelineStage::TRANSFER,
        }
    }

    /// Whether shaders may read an image in this layout.
    pub fn is_shader_readable(self) -> bool {
        matches!(
            self,
            ImageLayout::General | ImageLayout::ShaderReadOnly | ImageLayout::DepthStencilReadOnly
        )
    }
}

/// Descriptor for creating an image.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageDescriptor {
    /// Debug label for the image.
    pub label: Option<String>,
    /// Size of mip level zero.
    pub size: Extent3d,
    /// Number of array layers.
    pub layers: u32,
    /// Texel format.
    pub format: ImageFormat,
    /// Usage flags.
    pub usage: ImageUsage,
    /// Dimensionality.
    pub image_type: ImageType,
    /// Allocate a full mip chain.
    pub mip_mapping: bool,
}

impl Default for ImageDescriptor {
    fn default() -> Self {
        Self {
            label: None,
            size: Extent3d::default(),
            layers: 1,
            format: ImageFormat::default(),
            usage: ImageUsage::default(),
            image_type: ImageType::default(),
            mip_mapping: false,
        }
    }
}

impl ImageDescriptor {
    /// Create a descriptor for a 2D image.
    pub fn new_2d(width: u32, height: u32, format: ImageFormat, usage: ImageUsage) -> Self {
        Self {
            size: Extent3d::new(width, height, 1),
            format,
            usage,
            ..Default::default()
        }
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Request a full mip chain.
    pub fn with_mip_mapping(mut self) -> Self {
        self.mip_mapping = true;
        self
    }

    /// Set the number of array layers.
    pub fn with_layers(mut self, layers: u32) -> Self {
        self.layers = layers;
        self.image_type = match self.image_type {
            ImageType::Image1d if layers > 1 => ImageType::Image1dArray,
            ImageType::Image2d if layers > 1 => ImageType::Image2dArray,
            other => other,
        };
        self
    }

    /// Number of mip levels the image is created with.
    pub fn mip_levels(&self) -> u32 {
        if !self.mip_mapping {
            return 1;
        }
        let largest = self.size.width.max(self.size.height).max(self.size.depth).max(1);
        32 - largest.leading_zeros()
    }

    /// Size in bytes of mip level zero across all layers.
    pub fn base_level_size(&self) -> u64 {
        self.size.texel_count() * self.layers as u64 * self.format.bytes_per_texel() as u64
    }
}

/// A region of an image-to-image copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ImageCopy {
    /// Mip level of the source.
    pub src_mip_level: u32,
    /// Offset into the source.
    pub src_offset: Offset3d,
    /// Mip level of the destination.
    pub dst_mip_level: u32,
    /// Offset into the destination.
    pub dst_offset: Offset3d,
    /// Size of the copied region.
    pub extent: Extent3d,
}

/// A region of an image blit, which may scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ImageBlit {
    /// Mip level of the source.
    pub src_mip_level: u32,
    /// Source region as `[min, max]` corners.
    pub src_offsets: [Offset3d; 2],
    /// Mip level of the destination.
    pub dst_mip_level: u32,
    /// Destination region as `[min, max]` corners.
    pub dst_offsets: [Offset3d; 2],
}

impl ImageBlit {
    /// Blit between two whole mip levels.
    pub fn mip_to_mip(src_level: u32, src: Extent3d, dst_level: u32, dst: Extent3d) -> Self {
        let corner = |e: Extent3d| Offset3d {
            x: e.width as i32,
            y: e.height as i32,
            z: e.depth as i32,
        };
        Self {
            src_mip_level: src_level,
            src_offsets: [Offset3d::default(), corner(src)],
            dst_mip_level: dst_level,
            dst_offsets: [Offset3d::default(), corner(dst)],
        }
    }
}
