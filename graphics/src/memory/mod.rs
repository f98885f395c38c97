//! Deferred destruction of GPU resources.
//!
//! A resource released by the client may still be referenced by command
//! buffers the GPU has not finished executing. The [`MemoryManager`] keeps
//! such resources alive in per-category [`DeletionQueue`]s until the frame
//! index has advanced by `frames_to_deletion`, then drops them. By that point
//! the queue must hold the only reference; anything else is a lifetime bug.
//!
//! # Sweep order
//!
//! Categories are swept so that objects referencing other objects go first:
//!
//! | Order | Category |
//! |-------|----------|
//! | 1 | raw destruction closures |
//! | 2 | top-level acceleration structures |
//! | 3 | bottom-level acceleration structures |
//! | 4 | pipelines |
//! | 5 | frame buffers |
//! | 6 | render passes |
//! | 7 | descriptor set layouts |
//! | 8 | query pools |
//! | 9 | multi-buffers |
//! | 10 | buffers |
//! | 11 | images |
//! | 12 | samplers |
//! | 13 | descriptor pools |

mod deletion;
pub(crate) mod upload;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::descriptor::DescriptorPool;
use crate::error::contract_violation;
use crate::profile_scope;
use crate::resources::{
    Blas, Buffer, DescriptorSetLayout, FrameBuffer, Image, MultiBuffer, Pipeline, QueryPool,
    RenderPass, Sampler, Tlas,
};

pub use deletion::DeletionQueue;

/// Destruction logic deferred like a resource.
pub type RawDeletion = Box<dyn FnOnce() + Send>;

/// A resource category with its own deletion queue.
pub trait DeferredResource: Send + Sync + Sized + 'static {
    /// Category name used in logs.
    const CATEGORY: &'static str;

    #[doc(hidden)]
    fn queue(manager: &MemoryManager) -> &Mutex<DeletionQueue<Arc<Self>>>;
}

macro_rules! deferred_resources {
    ($($ty:ty => $field:ident, $name:literal;)*) => {
        $(
            impl DeferredResource for $ty {
                const CATEGORY: &'static str = $name;

                fn queue(manager: &MemoryManager) -> &Mutex<DeletionQueue<Arc<Self>>> {
                    &manager.$field
                }
            }
        )*
    };
}

deferred_resources! {
    Tlas => tlas, "tlas";
    Blas => blas, "blas";
    Pipeline => pipelines, "pipeline";
    FrameBuffer => frame_buffers, "frame buffer";
    RenderPass => render_passes, "render pass";
    DescriptorSetLayout => descriptor_set_layouts, "descriptor set layout";
    QueryPool => query_pools, "query pool";
    MultiBuffer => multi_buffers, "multi-buffer";
    Buffer => buffers, "buffer";
    Image => images, "image";
    Sampler => samplers, "sampler";
    DescriptorPool => descriptor_pools, "descriptor pool";
}

/// Frame-indexed deferred deletion of GPU resources.
///
/// One instance is owned by each [`GraphicsDevice`](crate::GraphicsDevice).
/// Every queue is guarded independently, so releasing resources from
/// several threads does not serialize on one lock.
pub struct MemoryManager {
    frame_index: AtomicU64,
    frames_to_deletion: u64,
    validation: bool,
    raw: Mutex<DeletionQueue<RawDeletion>>,
    tlas: Mutex<DeletionQueue<Arc<Tlas>>>,
    blas: Mutex<DeletionQueue<Arc<Blas>>>,
    pipelines: Mutex<DeletionQueue<Arc<Pipeline>>>,
    frame_buffers: Mutex<DeletionQueue<Arc<FrameBuffer>>>,
    render_passes: Mutex<DeletionQueue<Arc<RenderPass>>>,
    descriptor_set_layouts: Mutex<DeletionQueue<Arc<DescriptorSetLayout>>>,
    query_pools: Mutex<DeletionQueue<Arc<QueryPool>>>,
    multi_buffers: Mutex<DeletionQueue<Arc<MultiBuffer>>>,
    buffers: Mutex<DeletionQueue<Arc<Buffer>>>,
    images: Mutex<DeletionQueue<Arc<Image>>>,
    samplers: Mutex<DeletionQueue<Arc<Sampler>>>,
    descriptor_pools: Mutex<DeletionQueue<Arc<DescriptorPool>>>,
}

impl MemoryManager {
    /// Create a manager that delays destruction by `frames_to_deletion` frames.
    pub fn new(frames_to_deletion: u64, validation: bool) -> Self {
        Self {
            frame_index: AtomicU64::new(0),
            frames_to_deletion,
            validation,
            raw: Mutex::new(DeletionQueue::new()),
            tlas: Mutex::new(DeletionQueue::new()),
            blas: Mutex::new(DeletionQueue::new()),
            pipelines: Mutex::new(DeletionQueue::new()),
            frame_buffers: Mutex::new(DeletionQueue::new()),
            render_passes: Mutex::new(DeletionQueue::new()),
            descriptor_set_layouts: Mutex::new(DeletionQueue::new()),
            query_pools: Mutex::new(DeletionQueue::new()),
            multi_buffers: Mutex::new(DeletionQueue::new()),
            buffers: Mutex::new(DeletionQueue::new()),
            images: Mutex::new(DeletionQueue::new()),
            samplers: Mutex::new(DeletionQueue::new()),
            descriptor_pools: Mutex::new(DeletionQueue::new()),
        }
    }

    /// Current frame index.
    pub fn frame_index(&self) -> u64 {
        self.frame_index.load(Ordering::Acquire)
    }

    /// Number of frames a released resource is kept alive.
    pub fn frames_to_deletion(&self) -> u64 {
        self.frames_to_deletion
    }

    fn delete_frame(&self) -> u64 {
        self.frame_index() + self.frames_to_deletion
    }

    /// Queue a released resource for destruction `frames_to_deletion` frames from now.
    ///
    /// The delete frame is read under the queue lock, so entries stay in
    /// order while another thread advances the frame index.
    pub fn destroy_allocation<T: DeferredResource>(&self, resource: Arc<T>) {
        let mut queue = T::queue(self).lock();
        let delete_frame = self.delete_frame();
        queue.push(resource, delete_frame);
        drop(queue);
        log::trace!(
            "MemoryManager: {} queued for deletion at frame {}",
            T::CATEGORY,
            delete_frame
        );
    }

    /// Queue arbitrary destruction logic with the same latency as resources.
    pub fn destroy_raw_allocation(&self, deletion: RawDeletion) {
        let mut queue = self.raw.lock();
        let delete_frame = self.delete_frame();
        queue.push(deletion, delete_frame);
    }

    /// Advance the manager's notion of the current frame.
    ///
    /// The index never moves backwards.
    pub fn update_frame_index(&self, frame_index: u64) {
        let previous = self.frame_index.fetch_max(frame_index, Ordering::AcqRel);
        if frame_index < previous {
            log::warn!(
                "MemoryManager: ignoring frame index {} behind current {}",
                frame_index,
                previous
            );
        }
    }

    /// Destroy every queued entry whose delete frame has been reached.
    ///
    /// Returns the number of destroyed entries.
    pub fn delete_data(&self) -> usize {
        self.delete_up_to(self.frame_index())
    }

    /// Destroy everything queued without moving the frame index.
    ///
    /// Only valid once the GPU is idle. Repeats until deletions stop
    /// queueing further deletions.
    pub fn release_idle(&self) -> usize {
        let mut destroyed = 0;
        loop {
            let count = self.delete_up_to(u64::MAX);
            if count == 0 {
                return destroyed;
            }
            destroyed += count;
        }
    }

    fn delete_up_to(&self, frame_index: u64) -> usize {
        profile_scope!("delete_data");

        // Run raw deletions outside the queue lock so they may queue more work.
        let raw = self.raw.lock().pop_due(frame_index);
        let mut destroyed = raw.len();
        for deletion in raw {
            deletion();
        }

        destroyed += self.sweep::<Tlas>(frame_index);
        destroyed += self.sweep::<Blas>(frame_index);
        destroyed += self.sweep::<Pipeline>(frame_index);
        destroyed += self.sweep::<FrameBuffer>(frame_index);
        destroyed += self.sweep::<RenderPass>(frame_index);
        destroyed += self.sweep::<DescriptorSetLayout>(frame_index);
        destroyed += self.sweep::<QueryPool>(frame_index);
        destroyed += self.sweep::<MultiBuffer>(frame_index);
        destroyed += self.sweep::<Buffer>(frame_index);
        destroyed += self.sweep::<Image>(frame_index);
        destroyed += self.sweep::<Sampler>(frame_index);
        destroyed += self.sweep::<DescriptorPool>(frame_index);

        if destroyed > 0 {
            log::debug!(
                "MemoryManager: destroyed {} objects at frame {}",
                destroyed,
                frame_index
            );
        }
        destroyed
    }

    fn sweep<T: DeferredResource>(&self, frame_index: u64) -> usize {
        let due = T::queue(self).lock().pop_due(frame_index);
        let count = due.len();
        for resource in due {
            let holders = Arc::strong_count(&resource);
            if holders != 1 {
                contract_violation(
                    self.validation,
                    &format!(
                        "{} swept for deletion while still referenced by {} other holder(s)",
                        T::CATEGORY,
                        holders - 1
                    ),
                );
            }
            drop(resource);
        }
        count
    }

    /// Destroy everything that is queued, regardless of delete frames.
    ///
    /// Used at shutdown. The frame index is pushed past every watermark and
    /// the sweep repeats until no queue has entries left, so deletions that
    /// queue further deletions are drained too.
    pub fn destroy_all_immediate(&self) {
        loop {
            let Some(last) = self.last_delete_frame() else {
                break;
            };
            let frame_index = self.frame_index().max(last) + self.frames_to_deletion;
            self.frame_index.store(frame_index, Ordering::Release);
            self.delete_data();
        }
    }

    fn last_delete_frame(&self) -> Option<u64> {
        [
            self.raw.lock().last_delete_frame(),
            self.tlas.lock().last_delete_frame(),
            self.blas.lock().last_delete_frame(),
            self.pipelines.lock().last_delete_frame(),
            self.frame_buffers.lock().last_delete_frame(),
            self.render_passes.lock().last_delete_frame(),
            self.descriptor_set_layouts.lock().last_delete_frame(),
            self.query_pools.lock().last_delete_frame(),
            self.multi_buffers.lock().last_delete_frame(),
            self.buffers.lock().last_delete_frame(),
            self.images.lock().last_delete_frame(),
            self.samplers.lock().last_delete_frame(),
            self.descriptor_pools.lock().last_delete_frame(),
        ]
        .into_iter()
        .flatten()
        .max()
    }

    /// Number of queued entries of one category.
    pub fn pending<T: DeferredResource>(&self) -> usize {
        T::queue(self).lock().len()
    }

    /// Number of queued entries across every category.
    pub fn pending_count(&self) -> usize {
        self.raw.lock().len()
            + self.pending::<Tlas>()
            + self.pending::<Blas>()
            + self.pending::<Pipeline>()
            + self.pending::<FrameBuffer>()
            + self.pending::<RenderPass>()
            + self.pending::<DescriptorSetLayout>()
            + self.pending::<QueryPool>()
            + self.pending::<MultiBuffer>()
            + self.pending::<Buffer>()
            + self.pending::<Image>()
            + self.pending::<Sampler>()
            + self.pending::<DescriptorPool>()
    }
}

impl std::fmt::Debug for MemoryManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryManager")
            .field("frame_index", &self.frame_index())
            .field("frames_to_deletion", &self.frames_to_deletion)
            .field("pending", &self.pending_count())
            .finish()
    }
}

static_assertions::assert_impl_all!(MemoryManager: Send, Sync);
