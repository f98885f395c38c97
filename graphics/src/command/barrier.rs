//! Memory and layout barriers.
//!
//! Images and buffers remember the access state left by their last barrier,
//! so callers only name the state they need next. Transitions are collected
//! into one batch and encoded as a single pipeline barrier.

use std::sync::Arc;

use crate::backend::{BufferBarrier, ImageBarrier, NativeCommand};
use crate::resources::{Buffer, Image, ImageState};
use crate::types::{AccessFlags, ImageLayout, PipelineStage};

use super::CommandList;

/// A requested image transition inside [`CommandList::pipeline_barrier`].
#[derive(Debug, Clone)]
pub struct ImageTransition {
    pub image: Arc<Image>,
    pub new_layout: ImageLayout,
    pub dst_access: AccessFlags,
}

impl ImageTransition {
    /// Transition to `layout` with the access mask usual for it.
    pub fn new(image: Arc<Image>, layout: ImageLayout) -> Self {
        Self {
            image,
            new_layout: layout,
            dst_access: layout.access_mask(),
        }
    }
}

/// A requested buffer access transition inside [`CommandList::pipeline_barrier`].
#[derive(Debug, Clone)]
pub struct BufferTransition {
    pub buffer: Arc<Buffer>,
    pub dst_access: AccessFlags,
}

/// Barriers collected for one pipeline barrier command.
#[derive(Debug, Default)]
struct BarrierBatch {
    image_barriers: Vec<ImageBarrier>,
    buffer_barriers: Vec<BufferBarrier>,
    src_stage: PipelineStage,
    dst_stage: PipelineStage,
}

impl BarrierBatch {
    fn new() -> Self {
        Self {
            src_stage: PipelineStage::empty(),
            dst_stage: PipelineStage::empty(),
            ..Default::default()
        }
    }

    /// Add a transition of every mip level of `image`.
    ///
    /// The image's tracked state is updated immediately.
    fn add_image(
        &mut self,
        image: &Image,
        new_layout: ImageLayout,
        dst_access: AccessFlags,
        dst_stage: PipelineStage,
    ) {
        let old = image.state();
        self.image_barriers.push(ImageBarrier {
            image: image.handle(),
            old_layout: old.layout,
            new_layout,
            src_access: old.access,
            dst_access,
            base_mip_level: 0,
            mip_level_count: image.mip_levels(),
        });
        self.src_stage |= old.stage;
        self.dst_stage |= dst_stage;
        image.set_state(ImageState {
            layout: new_layout,
            access: dst_access,
            stage: dst_stage,
        });
    }

    fn add_buffer(&mut self, buffer: &Buffer, dst_access: AccessFlags) {
        self.buffer_barriers.push(BufferBarrier {
            buffer: buffer.handle(),
            offset: 0,
            size: buffer.size(),
            src_access: buffer.access(),
            dst_access,
        });
        buffer.set_access(dst_access);
    }

    fn is_empty(&self) -> bool {
        self.image_barriers.is_empty() && self.buffer_barriers.is_empty()
    }

    fn into_command(self) -> NativeCommand {
        NativeCommand::PipelineBarrier {
            src_stage: self.src_stage,
            dst_stage: self.dst_stage,
            image_barriers: self.image_barriers,
            buffer_barriers: self.buffer_barriers,
        }
    }
}

impl CommandList {
    fn record_batch(&self, batch: BarrierBatch) {
        if !batch.is_empty() {
            self.record(batch.into_command());
        }
    }

    /// Transition `image` to `new_layout`, making it available to
    /// `dst_access` at `dst_stage`.
    ///
    /// The source side of the barrier comes from the image's tracked state.
    pub fn image_memory_barrier(
        &mut self,
        image: &Arc<Image>,
        new_layout: ImageLayout,
        dst_access: AccessFlags,
        dst_stage: PipelineStage,
    ) {
        if !self.require_outside_render_pass("image_memory_barrier") {
            return;
        }
        let mut batch = BarrierBatch::new();
        batch.add_image(image, new_layout, dst_access, dst_stage);
        self.record_batch(batch);
    }

    /// Make prior writes to `buffer` visible to `dst_access`.
    pub fn buffer_memory_barrier(
        &mut self,
        buffer: &Arc<Buffer>,
        dst_access: AccessFlags,
        src_stage: PipelineStage,
        dst_stage: PipelineStage,
    ) {
        if !self.require_outside_render_pass("buffer_memory_barrier") {
            return;
        }
        let mut batch = BarrierBatch::new();
        batch.add_buffer(buffer, dst_access);
        batch.src_stage = src_stage;
        batch.dst_stage = dst_stage;
        self.record_batch(batch);
    }

    /// Record several transitions as one barrier.
    ///
    /// Image transitions to the layout an image is already in are dropped.
    pub fn pipeline_barrier(
        &mut self,
        src_stage: PipelineStage,
        dst_stage: PipelineStage,
        images: &[ImageTransition],
        buffers: &[BufferTransition],
    ) {
        if !self.require_outside_render_pass("pipeline_barrier") {
            return;
        }
        let mut batch = BarrierBatch::new();
        for transition in images {
            if transition.image.layout() != transition.new_layout {
                batch.add_image(
                    &transition.image,
                    transition.new_layout,
                    transition.dst_access,
                    dst_stage,
                );
            }
        }
        for transition in buffers {
            batch.add_buffer(&transition.buffer, transition.dst_access);
        }
        batch.src_stage |= src_stage;
        batch.dst_stage |= dst_stage;
        self.record_batch(batch);
    }

    /// Move `image` into `layout` if it is not already there.
    pub(crate) fn transition_image(&self, image: &Image, layout: ImageLayout) {
        if image.layout() == layout {
            return;
        }
        let mut batch = BarrierBatch::new();
        batch.add_image(image, layout, layout.access_mask(), layout.stage());
        self.record_batch(batch);
    }

    /// Transition one mip level, leaving the tracked image state untouched.
    pub(crate) fn transition_mip_level(
        &self,
        image: &Image,
        level: u32,
        old_layout: ImageLayout,
        new_layout: ImageLayout,
    ) {
        self.record(NativeCommand::PipelineBarrier {
            src_stage: old_layout.stage(),
            dst_stage: new_layout.stage(),
            image_barriers: vec![ImageBarrier {
                image: image.handle(),
                old_layout,
                new_layout,
                src_access: old_layout.access_mask(),
                dst_access: new_layout.access_mask(),
                base_mip_level: level,
                mip_level_count: 1,
            }],
            buffer_barriers: Vec::new(),
        });
    }
}
