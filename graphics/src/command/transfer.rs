//! Transfer, query and acceleration structure commands.
//!
//! All of these are recorded outside of render passes. Image operands are
//! moved into transfer layouts automatically; buffers only have their
//! tracked access updated.

use std::sync::Arc;

use crate::backend::{BlasBuildGeometry, NativeCommand, TlasBuildInstance};
use crate::error::GraphicsError;
use crate::resources::{Blas, Buffer, Image, QueryPool, Tlas};
use crate::types::{
    AccessFlags, BufferCopy, BufferUsage, FilterMode, ImageBlit, ImageCopy, ImageLayout,
    ImageUsage, PipelineStage, QueryType, TlasInstance,
};

use super::CommandList;

/// Largest payload accepted by [`CommandList::update_buffer`].
pub const MAX_UPDATE_BUFFER_SIZE: usize = 65536;

impl CommandList {
    fn require_buffer_usage(&self, buffer: &Buffer, usage: BufferUsage) -> bool {
        self.require(buffer.usage().contains(usage), || {
            format!("buffer {:?} lacks {usage:?} usage", buffer.label())
        })
    }

    fn require_image_usage(&self, image: &Image, usage: ImageUsage) -> bool {
        self.require(image.usage().contains(usage), || {
            format!("image {:?} lacks {usage:?} usage", image.label())
        })
    }

    fn require_buffer_range(&self, buffer: &Buffer, offset: u64, size: u64) -> bool {
        self.require(
            offset
                .checked_add(size)
                .is_some_and(|end| end <= buffer.size()),
            || {
                format!(
                    "range {offset}+{size} exceeds buffer {:?} of {} bytes",
                    buffer.label(),
                    buffer.size()
                )
            },
        )
    }

    fn require_mip_level(&self, image: &Image, level: u32) -> bool {
        self.require(level < image.mip_levels(), || {
            format!(
                "mip level {level} out of range for image {:?} with {} levels",
                image.label(),
                image.mip_levels()
            )
        })
    }

    /// Copy a region between two buffers.
    pub fn copy_buffer(&mut self, src: &Buffer, dst: &Buffer, region: BufferCopy) {
        if !self.require_outside_render_pass("copy_buffer")
            || !self.require_buffer_usage(src, BufferUsage::COPY_SRC)
            || !self.require_buffer_usage(dst, BufferUsage::COPY_DST)
            || !self.require_buffer_range(src, region.src_offset, region.size)
            || !self.require_buffer_range(dst, region.dst_offset, region.size)
        {
            return;
        }
        self.record(NativeCommand::CopyBuffer {
            src: src.handle(),
            dst: dst.handle(),
            region,
        });
        src.set_access(AccessFlags::TRANSFER_READ);
        dst.set_access(AccessFlags::TRANSFER_WRITE);
    }

    /// Copy tightly packed texels from `buffer` into one mip level of `image`.
    pub fn copy_buffer_to_image(
        &mut self,
        buffer: &Buffer,
        buffer_offset: u64,
        image: &Image,
        mip_level: u32,
    ) {
        if !self.require_outside_render_pass("copy_buffer_to_image")
            || !self.require_buffer_usage(buffer, BufferUsage::COPY_SRC)
            || !self.require_image_usage(image, ImageUsage::COPY_DST)
            || !self.require_mip_level(image, mip_level)
        {
            return;
        }
        let extent = image.size().mip_level(mip_level);
        let size = level_size(image, mip_level);
        if !self.require_buffer_range(buffer, buffer_offset, size) {
            return;
        }
        self.transition_image(image, ImageLayout::TransferDst);
        self.record(NativeCommand::CopyBufferToImage {
            buffer: buffer.handle(),
            buffer_offset,
            image: image.handle(),
            mip_level,
            extent,
        });
        buffer.set_access(AccessFlags::TRANSFER_READ);
    }

    /// Copy one mip level of `image` into `buffer` as tightly packed texels.
    pub fn copy_image_to_buffer(
        &mut self,
        image: &Image,
        mip_level: u32,
        buffer: &Buffer,
        buffer_offset: u64,
    ) {
        if !self.require_outside_render_pass("copy_image_to_buffer")
            || !self.require_image_usage(image, ImageUsage::COPY_SRC)
            || !self.require_buffer_usage(buffer, BufferUsage::COPY_DST)
            || !self.require_mip_level(image, mip_level)
            || !self.require_buffer_range(buffer, buffer_offset, level_size(image, mip_level))
        {
            return;
        }
        self.transition_image(image, ImageLayout::TransferSrc);
        self.record(NativeCommand::CopyImageToBuffer {
            image: image.handle(),
            mip_level,
            extent: image.size().mip_level(mip_level),
            buffer: buffer.handle(),
            buffer_offset,
        });
        buffer.set_access(AccessFlags::TRANSFER_WRITE);
    }

    /// Copy a texel region between two images.
    pub fn copy_image(&mut self, src: &Image, dst: &Image, region: ImageCopy) {
        if !self.require_outside_render_pass("copy_image")
            || !self.require_image_usage(src, ImageUsage::COPY_SRC)
            || !self.require_image_usage(dst, ImageUsage::COPY_DST)
            || !self.require_mip_level(src, region.src_mip_level)
            || !self.require_mip_level(dst, region.dst_mip_level)
            || !self.require(!std::ptr::eq(src, dst), || {
                "copy_image source and destination are the same image".to_string()
            })
        {
            return;
        }
        self.transition_image(src, ImageLayout::TransferSrc);
        self.transition_image(dst, ImageLayout::TransferDst);
        self.record(NativeCommand::CopyImage {
            src: src.handle(),
            dst: dst.handle(),
            region,
        });
    }

    /// Copy a region between two images, scaling with `filter`.
    pub fn blit_image(
        &mut self,
        src: &Image,
        dst: &Image,
        region: ImageBlit,
        filter: FilterMode,
    ) {
        if !self.require_outside_render_pass("blit_image")
            || !self.require_image_usage(src, ImageUsage::COPY_SRC)
            || !self.require_image_usage(dst, ImageUsage::COPY_DST)
            || !self.require_mip_level(src, region.src_mip_level)
            || !self.require_mip_level(dst, region.dst_mip_level)
            || !self.require(!std::ptr::eq(src, dst), || {
                "blit_image source and destination are the same image; use generate_mip_maps"
                    .to_string()
            })
        {
            return;
        }
        self.transition_image(src, ImageLayout::TransferSrc);
        self.transition_image(dst, ImageLayout::TransferDst);
        self.record(NativeCommand::BlitImage {
            src: src.handle(),
            dst: dst.handle(),
            region,
            filter,
        });
    }

    /// Fill a buffer range with a repeated 32-bit value.
    pub fn fill_buffer(&mut self, buffer: &Buffer, offset: u64, size: u64, value: u32) {
        if !self.require_outside_render_pass("fill_buffer")
            || !self.require_buffer_usage(buffer, BufferUsage::COPY_DST)
            || !self.require(offset % 4 == 0 && size % 4 == 0, || {
                format!("fill range {offset}+{size} is not 4-byte aligned")
            })
            || !self.require_buffer_range(buffer, offset, size)
        {
            return;
        }
        self.record(NativeCommand::FillBuffer {
            buffer: buffer.handle(),
            offset,
            size,
            value,
        });
        buffer.set_access(AccessFlags::TRANSFER_WRITE);
    }

    /// Write a small payload inline into the command buffer.
    ///
    /// Limited to [`MAX_UPDATE_BUFFER_SIZE`] bytes; larger uploads go through
    /// [`Buffer::set_data`].
    pub fn update_buffer(&mut self, buffer: &Buffer, offset: u64, data: &[u8]) {
        if !self.require_outside_render_pass("update_buffer")
            || !self.require_buffer_usage(buffer, BufferUsage::COPY_DST)
            || !self.require(data.len() <= MAX_UPDATE_BUFFER_SIZE, || {
                format!(
                    "update_buffer payload of {} bytes exceeds {MAX_UPDATE_BUFFER_SIZE}",
                    data.len()
                )
            })
            || !self.require_buffer_range(buffer, offset, data.len() as u64)
        {
            return;
        }
        self.record(NativeCommand::UpdateBuffer {
            buffer: buffer.handle(),
            offset,
            data: data.to_vec(),
        });
        buffer.set_access(AccessFlags::TRANSFER_WRITE);
    }

    /// Fill every mip level of `image` by successive downsampling of
    /// level zero. The image ends up shader readable.
    pub fn generate_mip_maps(&mut self, image: &Image) {
        if !self.require_outside_render_pass("generate_mip_maps")
            || !self.require_image_usage(image, ImageUsage::COPY_SRC | ImageUsage::COPY_DST)
        {
            return;
        }
        let levels = image.mip_levels();
        if levels <= 1 {
            self.transition_image(image, ImageLayout::ShaderReadOnly);
            return;
        }
        crate::profile_scope!("generate_mip_maps");

        self.transition_image(image, ImageLayout::TransferDst);
        let size = image.size();
        for level in 1..levels {
            self.transition_mip_level(
                image,
                level - 1,
                ImageLayout::TransferDst,
                ImageLayout::TransferSrc,
            );
            self.record(NativeCommand::BlitImage {
                src: image.handle(),
                dst: image.handle(),
                region: ImageBlit::mip_to_mip(
                    level - 1,
                    size.mip_level(level - 1),
                    level,
                    size.mip_level(level),
                ),
                filter: FilterMode::Linear,
            });
            self.transition_mip_level(
                image,
                level - 1,
                ImageLayout::TransferSrc,
                ImageLayout::ShaderReadOnly,
            );
        }
        self.transition_mip_level(
            image,
            levels - 1,
            ImageLayout::TransferDst,
            ImageLayout::ShaderReadOnly,
        );

        let mut state = image.state();
        state.layout = ImageLayout::ShaderReadOnly;
        state.access = ImageLayout::ShaderReadOnly.access_mask();
        state.stage = ImageLayout::ShaderReadOnly.stage();
        image.set_state(state);
    }

    /// Reset a range of queries before they are written again.
    pub fn reset_query_pool(&mut self, pool: &Arc<QueryPool>, first_query: u32, query_count: u32) {
        if !self.require_outside_render_pass("reset_query_pool")
            || !self.require(first_query.saturating_add(query_count) <= pool.count(), || {
                format!(
                    "queries {first_query}+{query_count} exceed pool of {}",
                    pool.count()
                )
            })
        {
            return;
        }
        self.record(NativeCommand::ResetQueryPool {
            pool: pool.handle(),
            first_query,
            query_count,
        });
    }

    /// Write a timestamp once all previous work reaches `stage`.
    pub fn write_timestamp(&mut self, pool: &Arc<QueryPool>, query: u32, stage: PipelineStage) {
        if !self.require_recording("write_timestamp")
            || !self.require(pool.query_type() == QueryType::Timestamp, || {
                format!("query pool of {:?} cannot hold timestamps", pool.query_type())
            })
            || !self.require(query < pool.count(), || {
                format!("query {query} out of range for pool of {}", pool.count())
            })
        {
            return;
        }
        self.record(NativeCommand::WriteTimestamp {
            pool: pool.handle(),
            query,
            stage,
        });
    }

    fn require_ray_tracing(&self) -> Result<(), GraphicsError> {
        if self.backend.capabilities().ray_tracing {
            Ok(())
        } else {
            Err(GraphicsError::FeatureNotSupported(
                "ray tracing is not supported by this backend".to_string(),
            ))
        }
    }

    /// Build a bottom-level acceleration structure from its geometry.
    pub fn build_blas(&mut self, blas: &Arc<Blas>) -> Result<(), GraphicsError> {
        self.require_ray_tracing()?;
        if !self.require_outside_render_pass("build_blas") {
            return Ok(());
        }
        let geometries: Vec<BlasBuildGeometry> = blas
            .descriptor()
            .geometries
            .iter()
            .map(|geometry| BlasBuildGeometry {
                vertex_buffer: geometry.vertex_buffer.handle(),
                vertex_count: geometry.vertex_count,
                vertex_stride: geometry.vertex_stride,
                index_buffer: geometry.index_buffer.as_ref().map(|buffer| buffer.handle()),
                primitive_vertex_count: geometry.primitive_vertex_count,
            })
            .collect();
        let inputs_usable = blas.descriptor().geometries.iter().all(|geometry| {
            geometry
                .vertex_buffer
                .usage()
                .contains(BufferUsage::ACCELERATION_STRUCTURE_INPUT)
        });
        if !self.require(inputs_usable, || {
            "BLAS geometry buffers need ACCELERATION_STRUCTURE_INPUT usage".to_string()
        }) {
            return Ok(());
        }
        self.record(NativeCommand::BuildBlas {
            structure: blas.handle()?,
            geometries,
        });
        blas.mark_built();
        Ok(())
    }

    /// Build a top-level acceleration structure over `instances`.
    ///
    /// The structure keeps the referenced bottom-level structures alive
    /// until its next build.
    pub fn build_tlas(
        &mut self,
        tlas: &Arc<Tlas>,
        instances: Vec<TlasInstance>,
    ) -> Result<(), GraphicsError> {
        self.require_ray_tracing()?;
        if !self.require_outside_render_pass("build_tlas")
            || !self.require(instances.len() <= tlas.descriptor().max_instances as usize, || {
                format!(
                    "{} instances exceed the TLAS capacity of {}",
                    instances.len(),
                    tlas.descriptor().max_instances
                )
            })
            || !self.require(instances.iter().all(|instance| instance.blas.is_built()), || {
                "TLAS instance references an unbuilt BLAS".to_string()
            })
        {
            return Ok(());
        }
        let encoded = instances
            .iter()
            .map(|instance| {
                Ok(TlasBuildInstance {
                    blas: instance.blas.handle()?,
                    transform: instance.transform,
                    custom_index: instance.custom_index,
                    mask: instance.mask,
                })
            })
            .collect::<Result<Vec<_>, GraphicsError>>()?;
        self.record(NativeCommand::BuildTlas {
            structure: tlas.handle()?,
            instances: encoded,
        });
        tlas.set_instances(instances);
        Ok(())
    }
}

fn level_size(image: &Image, level: u32) -> u64 {
    image.size().mip_level(level).texel_count()
        * u64::from(image.descriptor().layers)
        * u64::from(image.format().bytes_per_texel())
}
