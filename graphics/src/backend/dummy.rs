//! Software GPU backend for testing and development.
//!
//! This backend doesn't talk to GPU hardware. Buffers and images own host
//! memory, command buffers store their encoded commands, and a submission
//! executes the transfer commands it contains against that memory. Draws
//! and dispatches are only counted.
//!
//! Submissions honor binary semaphores: a batch whose wait semaphores are
//! not yet signaled is parked and executed as soon as another submission
//! signals them, exactly like a GPU queue stalled on a wait. Fences are
//! signaled once every batch of their submission has executed.
//!
//! All state sits behind one mutex, and every driver call is counted in
//! [`DummyStats`] so tests can assert on driver traffic.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::GraphicsError;
use crate::types::{
    BufferDescriptor, BufferDomain, DescriptorCounts, DescriptorKind, DescriptorPoolSizes,
    DescriptorSetLayoutDescriptor, Extent2d, Extent3d, ImageDescriptor, ImageUsage, Offset3d,
    PipelineDescriptor, QueryPoolDescriptor, QueueType, RenderPassDescriptor, SamplerDescriptor,
};

use super::command::{DescriptorResource, DescriptorWrite, NativeCommand, SubmitBatch};
use super::handle::{
    AccelerationStructureHandle, BufferHandle, CommandBufferHandle, DescriptorPoolHandle,
    DescriptorSetHandle, DescriptorSetLayoutHandle, FenceHandle, FrameBufferHandle, ImageHandle,
    ObjectKind, PipelineHandle, QueryPoolHandle, RenderPassHandle, SamplerHandle,
    SemaphoreHandle,
};
use super::{BackendCapabilities, GpuBackend};

/// Counters of driver traffic seen by a [`DummyBackend`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DummyStats {
    /// Calls to `update_descriptor_sets`.
    pub descriptor_update_calls: usize,
    /// Individual descriptor writes across all update calls.
    pub descriptor_writes: usize,
    /// Successful descriptor set allocations.
    pub descriptor_sets_allocated: usize,
    /// Descriptor pools created.
    pub descriptor_pools_created: usize,
    /// Descriptor pool resets.
    pub descriptor_pool_resets: usize,
    /// Calls to `queue_submit`.
    pub submissions: usize,
    /// Batches executed.
    pub executed_batches: usize,
    /// Draw commands executed.
    pub draw_calls: usize,
    /// Dispatch commands executed.
    pub dispatches: usize,
    /// Destroy calls for handles that were not alive.
    pub invalid_destroys: usize,
}

struct BufferStorage {
    data: Vec<u8>,
    host_visible: bool,
}

struct ImageStorage {
    bytes_per_texel: u64,
    layers: u32,
    levels: Vec<(Extent3d, Vec<u8>)>,
}

impl ImageStorage {
    fn texel_offset(&self, level: usize, offset: Offset3d) -> Option<usize> {
        let (extent, _) = self.levels.get(level)?;
        if offset.x < 0 || offset.y < 0 || offset.z < 0 {
            return None;
        }
        let (x, y, z) = (offset.x as u64, offset.y as u64, offset.z as u64);
        let width = u64::from(extent.width);
        let height = u64::from(extent.height);
        Some((((z * height + y) * width + x) * self.bytes_per_texel) as usize)
    }
}

struct PoolState {
    sizes: DescriptorPoolSizes,
    used: DescriptorCounts,
    sets: Vec<u64>,
}

struct SetState {
    writes: HashMap<(u32, u32), DescriptorResource>,
}

struct CommandBufferState {
    queue: QueueType,
    commands: Vec<NativeCommand>,
    recording: bool,
}

struct PendingBatch {
    batch: SubmitBatch,
    group: u64,
}

struct FenceGroup {
    remaining: usize,
    fence: Option<u64>,
}

#[derive(Default)]
struct State {
    next_id: u64,
    live: HashMap<u64, ObjectKind>,
    destroyed: HashMap<ObjectKind, usize>,
    buffers: HashMap<u64, BufferStorage>,
    images: HashMap<u64, ImageStorage>,
    layouts: HashMap<u64, DescriptorCounts>,
    pools: HashMap<u64, PoolState>,
    sets: HashMap<u64, SetState>,
    command_buffers: HashMap<u64, CommandBufferState>,
    fences: HashMap<u64, bool>,
    semaphores: HashMap<u64, bool>,
    queries: HashMap<u64, Vec<u64>>,
    pending: VecDeque<PendingBatch>,
    groups: HashMap<u64, FenceGroup>,
    next_group: u64,
    timestamp: u64,
    execution_log: Vec<CommandBufferHandle>,
    /// Bytes held by buffers and images.
    memory_used: u64,
    stats: DummyStats,
}

impl State {
    /// Account `size` bytes of device memory against `budget`.
    fn reserve(&mut self, budget: Option<u64>, size: u64) -> Result<(), GraphicsError> {
        let used = self.memory_used.saturating_add(size);
        if budget.is_some_and(|budget| used > budget) {
            log::error!(
                "DummyBackend: allocation of {size} bytes exceeds the {} byte budget",
                budget.unwrap_or_default()
            );
            return Err(GraphicsError::OutOfMemory);
        }
        self.memory_used = used;
        Ok(())
    }

    fn allocate(&mut self, kind: ObjectKind) -> u64 {
        self.next_id += 1;
        self.live.insert(self.next_id, kind);
        self.next_id
    }

    fn release(&mut self, kind: ObjectKind, raw: u64) -> bool {
        match self.live.get(&raw) {
            Some(live_kind) if *live_kind == kind => {
                self.live.remove(&raw);
                *self.destroyed.entry(kind).or_default() += 1;
                true
            }
            _ => {
                log::error!("DummyBackend: destroying {kind:?} {raw} which is not alive");
                self.stats.invalid_destroys += 1;
                false
            }
        }
    }

    fn read_bytes(&self, buffer: BufferHandle, offset: u64, size: u64) -> Option<Vec<u8>> {
        let storage = self.buffers.get(&buffer.raw())?;
        let end = offset.checked_add(size)?;
        if end > storage.data.len() as u64 {
            return None;
        }
        Some(storage.data[offset as usize..end as usize].to_vec())
    }

    fn write_bytes(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) -> bool {
        let Some(storage) = self.buffers.get_mut(&buffer.raw()) else {
            return false;
        };
        let end = offset as usize + data.len();
        if end > storage.data.len() {
            return false;
        }
        storage.data[offset as usize..end].copy_from_slice(data);
        true
    }

    /// Execute every parked batch whose waits are satisfied, until none is.
    fn pump(&mut self) {
        loop {
            let ready = self.pending.iter().position(|pending| {
                pending
                    .batch
                    .wait_semaphores
                    .iter()
                    .all(|(semaphore, _)| self.semaphores.get(&semaphore.raw()) == Some(&true))
            });
            let Some(index) = ready else {
                break;
            };
            if let Some(pending) = self.pending.remove(index) {
                self.execute_batch(pending);
            }
        }
    }

    fn execute_batch(&mut self, pending: PendingBatch) {
        for (semaphore, _) in &pending.batch.wait_semaphores {
            self.semaphores.insert(semaphore.raw(), false);
        }
        for command_buffer in &pending.batch.command_buffers {
            let commands = self
                .command_buffers
                .get(&command_buffer.raw())
                .map(|cb| cb.commands.clone())
                .unwrap_or_default();
            for command in &commands {
                self.execute_command(command);
            }
            self.execution_log.push(*command_buffer);
        }
        for semaphore in &pending.batch.signal_semaphores {
            self.semaphores.insert(semaphore.raw(), true);
        }
        self.stats.executed_batches += 1;

        let finished = match self.groups.get_mut(&pending.group) {
            Some(group) => {
                group.remaining = group.remaining.saturating_sub(1);
                group.remaining == 0
            }
            None => false,
        };
        if finished && let Some(group) = self.groups.remove(&pending.group) {
            if let Some(fence) = group.fence {
                self.fences.insert(fence, true);
            }
        }
    }

    fn execute_command(&mut self, command: &NativeCommand) {
        match command {
            NativeCommand::CopyBuffer { src, dst, region } => {
                let copied = self
                    .read_bytes(*src, region.src_offset, region.size)
                    .is_some_and(|data| self.write_bytes(*dst, region.dst_offset, &data));
                if !copied {
                    log::error!("DummyBackend: out of range buffer copy {region:?}");
                }
            }
            NativeCommand::FillBuffer {
                buffer,
                offset,
                size,
                value,
            } => {
                let pattern = value.to_le_bytes();
                let data: Vec<u8> = (0..*size as usize).map(|i| pattern[i % 4]).collect();
                if !self.write_bytes(*buffer, *offset, &data) {
                    log::error!("DummyBackend: out of range buffer fill");
                }
            }
            NativeCommand::UpdateBuffer {
                buffer,
                offset,
                data,
            } => {
                if !self.write_bytes(*buffer, *offset, data) {
                    log::error!("DummyBackend: out of range buffer update");
                }
            }
            NativeCommand::CopyBufferToImage {
                buffer,
                buffer_offset,
                image,
                mip_level,
                extent,
            } => self.copy_buffer_to_image(*buffer, *buffer_offset, *image, *mip_level, *extent),
            NativeCommand::CopyImageToBuffer {
                image,
                mip_level,
                extent,
                buffer,
                buffer_offset,
            } => self.copy_image_to_buffer(*image, *mip_level, *extent, *buffer, *buffer_offset),
            NativeCommand::CopyImage { src, dst, region } => self.copy_texels(
                *src,
                region.src_mip_level,
                region.src_offset,
                *dst,
                region.dst_mip_level,
                region.dst_offset,
                region.extent,
            ),
            NativeCommand::BlitImage { src, dst, region, .. } => {
                self.blit_nearest(*src, *dst, region)
            }
            NativeCommand::ResetQueryPool {
                pool,
                first_query,
                query_count,
            } => {
                if let Some(queries) = self.queries.get_mut(&pool.raw()) {
                    let start = (*first_query as usize).min(queries.len());
                    let end = (start + *query_count as usize).min(queries.len());
                    queries[start..end].fill(0);
                }
            }
            NativeCommand::WriteTimestamp { pool, query, .. } => {
                self.timestamp += 1;
                let timestamp = self.timestamp;
                if let Some(slot) = self
                    .queries
                    .get_mut(&pool.raw())
                    .and_then(|q| q.get_mut(*query as usize))
                {
                    *slot = timestamp;
                }
            }
            NativeCommand::Draw { .. }
            | NativeCommand::DrawIndexed { .. }
            | NativeCommand::DrawIndirect { .. }
            | NativeCommand::DrawIndexedIndirect { .. } => self.stats.draw_calls += 1,
            NativeCommand::Dispatch { .. } | NativeCommand::DispatchIndirect { .. } => {
                self.stats.dispatches += 1
            }
            _ => {}
        }
    }

    fn copy_buffer_to_image(
        &mut self,
        buffer: BufferHandle,
        buffer_offset: u64,
        image: ImageHandle,
        mip_level: u32,
        extent: Extent3d,
    ) {
        let Some(storage) = self.images.get(&image.raw()) else {
            log::error!("DummyBackend: copy into unknown image");
            return;
        };
        let size = extent.texel_count() * storage.bytes_per_texel * u64::from(storage.layers);
        let Some(data) = self.read_bytes(buffer, buffer_offset, size) else {
            log::error!("DummyBackend: out of range buffer to image copy");
            return;
        };
        if let Some((_, level)) = self
            .images
            .get_mut(&image.raw())
            .and_then(|s| s.levels.get_mut(mip_level as usize))
        {
            let len = data.len().min(level.len());
            level[..len].copy_from_slice(&data[..len]);
        }
    }

    fn copy_image_to_buffer(
        &mut self,
        image: ImageHandle,
        mip_level: u32,
        extent: Extent3d,
        buffer: BufferHandle,
        buffer_offset: u64,
    ) {
        let Some(storage) = self.images.get(&image.raw()) else {
            log::error!("DummyBackend: copy from unknown image");
            return;
        };
        let size = (extent.texel_count() * storage.bytes_per_texel * u64::from(storage.layers))
            as usize;
        let Some((_, level)) = storage.levels.get(mip_level as usize) else {
            log::error!("DummyBackend: copy from missing mip level {mip_level}");
            return;
        };
        let data = level[..size.min(level.len())].to_vec();
        if !self.write_bytes(buffer, buffer_offset, &data) {
            log::error!("DummyBackend: out of range image to buffer copy");
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn copy_texels(
        &mut self,
        src: ImageHandle,
        src_level: u32,
        src_offset: Offset3d,
        dst: ImageHandle,
        dst_level: u32,
        dst_offset: Offset3d,
        extent: Extent3d,
    ) {
        let Some(source) = self.images.get(&src.raw()) else {
            return;
        };
        let texel = source.bytes_per_texel as usize;
        let mut rows = Vec::new();
        for z in 0..extent.depth as i32 {
            for y in 0..extent.height as i32 {
                let at = Offset3d {
                    x: src_offset.x,
                    y: src_offset.y + y,
                    z: src_offset.z + z,
                };
                let Some(start) = source.texel_offset(src_level as usize, at) else {
                    return;
                };
                let end = start + extent.width as usize * texel;
                let level = &source.levels[src_level as usize].1;
                if end > level.len() {
                    log::error!("DummyBackend: out of range image copy");
                    return;
                }
                rows.push((y, z, level[start..end].to_vec()));
            }
        }
        let Some(target) = self.images.get_mut(&dst.raw()) else {
            return;
        };
        for (y, z, row) in rows {
            let at = Offset3d {
                x: dst_offset.x,
                y: dst_offset.y + y,
                z: dst_offset.z + z,
            };
            let Some(start) = target.texel_offset(dst_level as usize, at) else {
                return;
            };
            let level = &mut target.levels[dst_level as usize].1;
            if start + row.len() > level.len() {
                log::error!("DummyBackend: out of range image copy");
                return;
            }
            level[start..start + row.len()].copy_from_slice(&row);
        }
    }

    fn blit_nearest(&mut self, src: ImageHandle, dst: ImageHandle, region: &crate::types::ImageBlit) {
        let Some(source) = self.images.get(&src.raw()) else {
            return;
        };
        let texel = source.bytes_per_texel as usize;
        let [s0, s1] = region.src_offsets;
        let [d0, d1] = region.dst_offsets;
        let (dw, dh) = ((d1.x - d0.x).max(1), (d1.y - d0.y).max(1));
        let (sw, sh) = ((s1.x - s0.x).max(1), (s1.y - s0.y).max(1));
        let mut texels = Vec::with_capacity((dw * dh) as usize);
        for y in 0..dh {
            for x in 0..dw {
                let at = Offset3d {
                    x: s0.x + x * sw / dw,
                    y: s0.y + y * sh / dh,
                    z: s0.z,
                };
                let level = &source.levels[..];
                let value = source
                    .texel_offset(region.src_mip_level as usize, at)
                    .and_then(|start| {
                        level
                            .get(region.src_mip_level as usize)
                            .and_then(|(_, bytes)| bytes.get(start..start + texel))
                    })
                    .map(<[u8]>::to_vec)
                    .unwrap_or_else(|| vec![0; texel]);
                texels.push((x, y, value));
            }
        }
        let Some(target) = self.images.get_mut(&dst.raw()) else {
            return;
        };
        for (x, y, value) in texels {
            let at = Offset3d {
                x: d0.x + x,
                y: d0.y + y,
                z: d0.z,
            };
            if let Some(start) = target.texel_offset(region.dst_mip_level as usize, at)
                && let Some(slot) = target
                    .levels
                    .get_mut(region.dst_mip_level as usize)
                    .and_then(|(_, bytes)| bytes.get_mut(start..start + texel))
            {
                slot.copy_from_slice(&value);
            }
        }
    }
}

/// Software GPU backend.
pub struct DummyBackend {
    state: Mutex<State>,
    capabilities: BackendCapabilities,
    memory_budget: Option<u64>,
}

impl DummyBackend {
    /// Create a new dummy backend with every optional capability enabled.
    pub fn new() -> Self {
        Self::with_capabilities(BackendCapabilities {
            ray_tracing: true,
            dedicated_compute_queue: true,
            dedicated_transfer_queue: true,
        })
    }

    /// Create a dummy backend reporting specific capabilities.
    pub fn with_capabilities(capabilities: BackendCapabilities) -> Self {
        Self {
            state: Mutex::new(State::default()),
            capabilities,
            memory_budget: None,
        }
    }

    /// Limit the bytes buffers and images may hold at once; allocations
    /// past the limit fail with [`GraphicsError::OutOfMemory`].
    pub fn with_memory_budget(mut self, bytes: u64) -> Self {
        self.memory_budget = Some(bytes);
        self
    }

    /// Bytes currently held by buffers and images.
    pub fn memory_used(&self) -> u64 {
        self.state.lock().memory_used
    }

    /// Snapshot of the driver traffic counters.
    pub fn stats(&self) -> DummyStats {
        self.state.lock().stats.clone()
    }

    /// Number of alive objects of a kind.
    pub fn live_objects(&self, kind: ObjectKind) -> usize {
        self.state.lock().live.values().filter(|k| **k == kind).count()
    }

    /// Number of destroyed objects of a kind.
    pub fn destroyed_objects(&self, kind: ObjectKind) -> usize {
        self.state
            .lock()
            .destroyed
            .get(&kind)
            .copied()
            .unwrap_or_default()
    }

    /// Whether the object with the raw handle is alive.
    pub fn is_alive(&self, raw: u64) -> bool {
        self.state.lock().live.contains_key(&raw)
    }

    /// The resource last written into a descriptor slot.
    pub fn descriptor(
        &self,
        set: DescriptorSetHandle,
        binding: u32,
        element: u32,
    ) -> Option<DescriptorResource> {
        self.state
            .lock()
            .sets
            .get(&set.raw())
            .and_then(|s| s.writes.get(&(binding, element)).copied())
    }

    /// Commands recorded into a command buffer.
    pub fn recorded_commands(&self, command_buffer: CommandBufferHandle) -> Vec<NativeCommand> {
        self.state
            .lock()
            .command_buffers
            .get(&command_buffer.raw())
            .map(|cb| cb.commands.clone())
            .unwrap_or_default()
    }

    /// Command buffers in the order their execution completed.
    pub fn execution_log(&self) -> Vec<CommandBufferHandle> {
        self.state.lock().execution_log.clone()
    }

    /// Number of batches parked on unsignaled semaphores.
    pub fn pending_batches(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Contents of one mip level of an image.
    pub fn image_data(&self, image: ImageHandle, mip_level: u32) -> Option<Vec<u8>> {
        self.state
            .lock()
            .images
            .get(&image.raw())
            .and_then(|s| s.levels.get(mip_level as usize))
            .map(|(_, bytes)| bytes.clone())
    }

    /// Whether a semaphore is currently signaled.
    pub fn is_semaphore_signaled(&self, semaphore: SemaphoreHandle) -> bool {
        self.state.lock().semaphores.get(&semaphore.raw()) == Some(&true)
    }

    /// Signal a semaphore from outside any submission, the way a
    /// presentation engine signals image acquisition.
    ///
    /// Batches parked on the semaphore execute immediately.
    pub fn signal_semaphore(&self, semaphore: SemaphoreHandle) {
        let mut state = self.state.lock();
        if let Some(signaled) = state.semaphores.get_mut(&semaphore.raw()) {
            *signaled = true;
        }
        state.pump();
    }

    /// Consume a signaled semaphore outside any submission, the way a
    /// presentation engine waits before presenting.
    ///
    /// Returns whether the semaphore was signaled.
    pub fn consume_semaphore(&self, semaphore: SemaphoreHandle) -> bool {
        let mut state = self.state.lock();
        match state.semaphores.get_mut(&semaphore.raw()) {
            Some(signaled) => std::mem::replace(signaled, false),
            None => false,
        }
    }

    fn destroy(&self, kind: ObjectKind, raw: u64) -> bool {
        let released = self.state.lock().release(kind, raw);
        if released {
            log::trace!("DummyBackend: destroyed {kind:?} {raw}");
        }
        released
    }

    fn create(&self, kind: ObjectKind) -> u64 {
        let raw = self.state.lock().allocate(kind);
        log::trace!("DummyBackend: created {kind:?} {raw}");
        raw
    }
}

impl Default for DummyBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DummyBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DummyBackend")
            .field("capabilities", &self.capabilities)
            .finish_non_exhaustive()
    }
}

impl GpuBackend for DummyBackend {
    fn name(&self) -> &'static str {
        "Dummy"
    }

    fn capabilities(&self) -> BackendCapabilities {
        self.capabilities
    }

    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<BufferHandle, GraphicsError> {
        if descriptor.size == 0 {
            return Err(GraphicsError::InvalidParameter(
                "buffer size must be greater than 0".to_string(),
            ));
        }
        let mut state = self.state.lock();
        state.reserve(self.memory_budget, descriptor.size)?;
        let raw = state.allocate(ObjectKind::Buffer);
        state.buffers.insert(
            raw,
            BufferStorage {
                data: vec![0; descriptor.size as usize],
                host_visible: descriptor.domain == BufferDomain::Host,
            },
        );
        log::trace!(
            "DummyBackend: creating buffer {:?} (size: {})",
            descriptor.label,
            descriptor.size
        );
        Ok(BufferHandle::from_raw(raw))
    }

    fn destroy_buffer(&self, buffer: BufferHandle) {
        let mut state = self.state.lock();
        if state.release(ObjectKind::Buffer, buffer.raw())
            && let Some(storage) = state.buffers.remove(&buffer.raw())
        {
            state.memory_used -= storage.data.len() as u64;
        }
    }

    fn write_buffer(
        &self,
        buffer: BufferHandle,
        offset: u64,
        data: &[u8],
    ) -> Result<(), GraphicsError> {
        let mut state = self.state.lock();
        match state.buffers.get(&buffer.raw()) {
            None => {
                return Err(GraphicsError::InvalidParameter(
                    "write to unknown buffer".to_string(),
                ));
            }
            Some(storage) if !storage.host_visible => {
                return Err(GraphicsError::InvalidParameter(
                    "buffer is not host visible".to_string(),
                ));
            }
            Some(_) => {}
        }
        if !state.write_bytes(buffer, offset, data) {
            return Err(GraphicsError::InvalidParameter(format!(
                "write of {} bytes at offset {offset} is out of range",
                data.len()
            )));
        }
        Ok(())
    }

    fn read_buffer(
        &self,
        buffer: BufferHandle,
        offset: u64,
        size: u64,
    ) -> Result<Vec<u8>, GraphicsError> {
        let state = self.state.lock();
        match state.buffers.get(&buffer.raw()) {
            Some(storage) if storage.host_visible => state
                .read_bytes(buffer, offset, size)
                .ok_or_else(|| {
                    GraphicsError::InvalidParameter(format!(
                        "read of {size} bytes at offset {offset} is out of range"
                    ))
                }),
            Some(_) => Err(GraphicsError::InvalidParameter(
                "buffer is not host visible".to_string(),
            )),
            None => Err(GraphicsError::InvalidParameter(
                "read from unknown buffer".to_string(),
            )),
        }
    }

    fn create_image(&self, descriptor: &ImageDescriptor) -> Result<ImageHandle, GraphicsError> {
        if descriptor.format.is_depth() && descriptor.usage.contains(ImageUsage::STORAGE) {
            return Err(GraphicsError::ResourceCreationFailed(format!(
                "format {:?} does not support storage usage",
                descriptor.format
            )));
        }
        let bytes_per_texel = u64::from(descriptor.format.bytes_per_texel());
        let levels: Vec<(Extent3d, Vec<u8>)> = (0..descriptor.mip_levels())
            .map(|level| {
                let extent = descriptor.size.mip_level(level);
                let size = extent.texel_count() * bytes_per_texel * u64::from(descriptor.layers);
                (extent, vec![0; size as usize])
            })
            .collect();
        let total: u64 = levels.iter().map(|(_, bytes)| bytes.len() as u64).sum();
        let mut state = self.state.lock();
        state.reserve(self.memory_budget, total)?;
        let raw = state.allocate(ObjectKind::Image);
        state.images.insert(
            raw,
            ImageStorage {
                bytes_per_texel,
                layers: descriptor.layers,
                levels,
            },
        );
        log::trace!(
            "DummyBackend: creating image {:?} ({}x{}x{})",
            descriptor.label,
            descriptor.size.width,
            descriptor.size.height,
            descriptor.size.depth
        );
        Ok(ImageHandle::from_raw(raw))
    }

    fn destroy_image(&self, image: ImageHandle) {
        let mut state = self.state.lock();
        if state.release(ObjectKind::Image, image.raw())
            && let Some(storage) = state.images.remove(&image.raw())
        {
            let bytes: u64 = storage.levels.iter().map(|(_, bytes)| bytes.len() as u64).sum();
            state.memory_used -= bytes;
        }
    }

    fn create_sampler(
        &self,
        descriptor: &SamplerDescriptor,
    ) -> Result<SamplerHandle, GraphicsError> {
        log::trace!("DummyBackend: creating sampler {:?}", descriptor.label);
        Ok(SamplerHandle::from_raw(self.create(ObjectKind::Sampler)))
    }

    fn destroy_sampler(&self, sampler: SamplerHandle) {
        self.destroy(ObjectKind::Sampler, sampler.raw());
    }

    fn create_descriptor_set_layout(
        &self,
        descriptor: &DescriptorSetLayoutDescriptor,
    ) -> Result<DescriptorSetLayoutHandle, GraphicsError> {
        let mut state = self.state.lock();
        let raw = state.allocate(ObjectKind::DescriptorSetLayout);
        state.layouts.insert(raw, descriptor.descriptor_counts());
        Ok(DescriptorSetLayoutHandle::from_raw(raw))
    }

    fn destroy_descriptor_set_layout(&self, layout: DescriptorSetLayoutHandle) {
        let mut state = self.state.lock();
        if state.release(ObjectKind::DescriptorSetLayout, layout.raw()) {
            state.layouts.remove(&layout.raw());
        }
    }

    fn create_descriptor_pool(
        &self,
        sizes: &DescriptorPoolSizes,
    ) -> Result<DescriptorPoolHandle, GraphicsError> {
        let mut state = self.state.lock();
        let raw = state.allocate(ObjectKind::DescriptorPool);
        state.pools.insert(
            raw,
            PoolState {
                sizes: *sizes,
                used: DescriptorCounts::default(),
                sets: Vec::new(),
            },
        );
        state.stats.descriptor_pools_created += 1;
        log::trace!("DummyBackend: creating descriptor pool ({} sets)", sizes.max_sets);
        Ok(DescriptorPoolHandle::from_raw(raw))
    }

    fn destroy_descriptor_pool(&self, pool: DescriptorPoolHandle) {
        let mut state = self.state.lock();
        if state.release(ObjectKind::DescriptorPool, pool.raw())
            && let Some(pool_state) = state.pools.remove(&pool.raw())
        {
            for set in pool_state.sets {
                state.sets.remove(&set);
            }
        }
    }

    fn reset_descriptor_pool(&self, pool: DescriptorPoolHandle) -> Result<(), GraphicsError> {
        let mut state = self.state.lock();
        let sets = match state.pools.get_mut(&pool.raw()) {
            Some(pool_state) => {
                pool_state.used = DescriptorCounts::default();
                std::mem::take(&mut pool_state.sets)
            }
            None => {
                return Err(GraphicsError::InvalidParameter(
                    "reset of unknown descriptor pool".to_string(),
                ));
            }
        };
        for set in sets {
            state.sets.remove(&set);
        }
        state.stats.descriptor_pool_resets += 1;
        Ok(())
    }

    fn allocate_descriptor_set(
        &self,
        pool: DescriptorPoolHandle,
        layout: DescriptorSetLayoutHandle,
    ) -> Result<DescriptorSetHandle, GraphicsError> {
        let mut state = self.state.lock();
        let required = state.layouts.get(&layout.raw()).copied().ok_or_else(|| {
            GraphicsError::InvalidParameter("allocation with unknown layout".to_string())
        })?;
        let pool_state = state.pools.get_mut(&pool.raw()).ok_or_else(|| {
            GraphicsError::InvalidParameter("allocation from unknown pool".to_string())
        })?;
        let exhausted = pool_state.sets.len() as u32 >= pool_state.sizes.max_sets
            || DescriptorKind::ALL.iter().any(|kind| {
                pool_state.used.get(*kind) + required.get(*kind)
                    > pool_state.sizes.descriptors.get(*kind)
            });
        if exhausted {
            return Err(GraphicsError::OutOfPoolMemory);
        }
        for kind in DescriptorKind::ALL {
            pool_state.used.add(kind, required.get(kind));
        }

        state.next_id += 1;
        let raw = state.next_id;
        if let Some(pool_state) = state.pools.get_mut(&pool.raw()) {
            pool_state.sets.push(raw);
        }
        state.sets.insert(
            raw,
            SetState {
                writes: HashMap::new(),
            },
        );
        state.stats.descriptor_sets_allocated += 1;
        Ok(DescriptorSetHandle::from_raw(raw))
    }

    fn update_descriptor_sets(&self, writes: &[DescriptorWrite]) {
        let mut state = self.state.lock();
        state.stats.descriptor_update_calls += 1;
        for write in writes {
            let Some(set) = state.sets.get_mut(&write.set.raw()) else {
                log::error!("DummyBackend: write into freed descriptor set {:?}", write.set);
                continue;
            };
            for (i, resource) in write.resources.iter().enumerate() {
                set.writes
                    .insert((write.binding, write.first_element + i as u32), *resource);
            }
            state.stats.descriptor_writes += write.resources.len();
        }
    }

    fn create_pipeline(
        &self,
        descriptor: &PipelineDescriptor,
    ) -> Result<PipelineHandle, GraphicsError> {
        log::trace!(
            "DummyBackend: creating {:?} pipeline {:?}",
            descriptor.bind_point(),
            descriptor.label
        );
        Ok(PipelineHandle::from_raw(self.create(ObjectKind::Pipeline)))
    }

    fn destroy_pipeline(&self, pipeline: PipelineHandle) {
        self.destroy(ObjectKind::Pipeline, pipeline.raw());
    }

    fn create_render_pass(
        &self,
        descriptor: &RenderPassDescriptor,
    ) -> Result<RenderPassHandle, GraphicsError> {
        log::trace!("DummyBackend: creating render pass {:?}", descriptor.label);
        Ok(RenderPassHandle::from_raw(self.create(ObjectKind::RenderPass)))
    }

    fn destroy_render_pass(&self, render_pass: RenderPassHandle) {
        self.destroy(ObjectKind::RenderPass, render_pass.raw());
    }

    fn create_frame_buffer(
        &self,
        render_pass: RenderPassHandle,
        attachments: &[ImageHandle],
        extent: Extent2d,
    ) -> Result<FrameBufferHandle, GraphicsError> {
        let mut state = self.state.lock();
        if state.live.get(&render_pass.raw()) != Some(&ObjectKind::RenderPass) {
            return Err(GraphicsError::InvalidParameter(
                "frame buffer with unknown render pass".to_string(),
            ));
        }
        if let Some(missing) = attachments
            .iter()
            .find(|image| !state.images.contains_key(&image.raw()))
        {
            return Err(GraphicsError::InvalidParameter(format!(
                "frame buffer attachment {missing:?} is not alive"
            )));
        }
        let raw = state.allocate(ObjectKind::FrameBuffer);
        log::trace!(
            "DummyBackend: creating frame buffer {}x{} with {} attachments",
            extent.width,
            extent.height,
            attachments.len()
        );
        Ok(FrameBufferHandle::from_raw(raw))
    }

    fn destroy_frame_buffer(&self, frame_buffer: FrameBufferHandle) {
        self.destroy(ObjectKind::FrameBuffer, frame_buffer.raw());
    }

    fn create_query_pool(
        &self,
        descriptor: &QueryPoolDescriptor,
    ) -> Result<QueryPoolHandle, GraphicsError> {
        let mut state = self.state.lock();
        let raw = state.allocate(ObjectKind::QueryPool);
        state
            .queries
            .insert(raw, vec![0; descriptor.count as usize]);
        Ok(QueryPoolHandle::from_raw(raw))
    }

    fn destroy_query_pool(&self, pool: QueryPoolHandle) {
        let mut state = self.state.lock();
        if state.release(ObjectKind::QueryPool, pool.raw()) {
            state.queries.remove(&pool.raw());
        }
    }

    fn query_results(
        &self,
        pool: QueryPoolHandle,
        first_query: u32,
        count: u32,
    ) -> Result<Vec<u64>, GraphicsError> {
        let state = self.state.lock();
        let queries = state.queries.get(&pool.raw()).ok_or_else(|| {
            GraphicsError::InvalidParameter("results of unknown query pool".to_string())
        })?;
        let start = first_query as usize;
        queries
            .get(start..start + count as usize)
            .map(<[u64]>::to_vec)
            .ok_or_else(|| GraphicsError::InvalidParameter("query range out of bounds".into()))
    }

    fn create_acceleration_structure(
        &self,
        size: u64,
        top_level: bool,
    ) -> Result<AccelerationStructureHandle, GraphicsError> {
        if !self.capabilities.ray_tracing {
            return Err(GraphicsError::FeatureNotSupported(
                "acceleration structures".to_string(),
            ));
        }
        log::trace!("DummyBackend: creating acceleration structure (size: {size}, top level: {top_level})");
        Ok(AccelerationStructureHandle::from_raw(
            self.create(ObjectKind::AccelerationStructure),
        ))
    }

    fn destroy_acceleration_structure(&self, structure: AccelerationStructureHandle) {
        self.destroy(ObjectKind::AccelerationStructure, structure.raw());
    }

    fn create_command_buffer(
        &self,
        queue: QueueType,
    ) -> Result<CommandBufferHandle, GraphicsError> {
        let mut state = self.state.lock();
        let raw = state.allocate(ObjectKind::CommandBuffer);
        state.command_buffers.insert(
            raw,
            CommandBufferState {
                queue,
                commands: Vec::new(),
                recording: false,
            },
        );
        Ok(CommandBufferHandle::from_raw(raw))
    }

    fn destroy_command_buffer(&self, command_buffer: CommandBufferHandle) {
        let mut state = self.state.lock();
        if state.release(ObjectKind::CommandBuffer, command_buffer.raw()) {
            state.command_buffers.remove(&command_buffer.raw());
        }
    }

    fn begin_command_buffer(
        &self,
        command_buffer: CommandBufferHandle,
    ) -> Result<(), GraphicsError> {
        let mut state = self.state.lock();
        let cb = state
            .command_buffers
            .get_mut(&command_buffer.raw())
            .ok_or_else(|| GraphicsError::InvalidParameter("unknown command buffer".into()))?;
        cb.commands.clear();
        cb.recording = true;
        Ok(())
    }

    fn record(&self, command_buffer: CommandBufferHandle, command: NativeCommand) {
        let mut state = self.state.lock();
        match state.command_buffers.get_mut(&command_buffer.raw()) {
            Some(cb) if cb.recording => cb.commands.push(command),
            Some(_) => log::error!("DummyBackend: recording into a command buffer that is not begun"),
            None => log::error!("DummyBackend: recording into unknown command buffer"),
        }
    }

    fn end_command_buffer(
        &self,
        command_buffer: CommandBufferHandle,
    ) -> Result<(), GraphicsError> {
        let mut state = self.state.lock();
        match state.command_buffers.get_mut(&command_buffer.raw()) {
            Some(cb) if cb.recording => {
                cb.recording = false;
                Ok(())
            }
            Some(_) => Err(GraphicsError::InvalidParameter(
                "command buffer is not recording".to_string(),
            )),
            None => Err(GraphicsError::InvalidParameter(
                "unknown command buffer".to_string(),
            )),
        }
    }

    fn create_fence(&self, signaled: bool) -> Result<FenceHandle, GraphicsError> {
        let mut state = self.state.lock();
        let raw = state.allocate(ObjectKind::Fence);
        state.fences.insert(raw, signaled);
        Ok(FenceHandle::from_raw(raw))
    }

    fn destroy_fence(&self, fence: FenceHandle) {
        let mut state = self.state.lock();
        if state.release(ObjectKind::Fence, fence.raw()) {
            state.fences.remove(&fence.raw());
        }
    }

    fn wait_for_fences(
        &self,
        fences: &[FenceHandle],
        timeout: Duration,
    ) -> Result<bool, GraphicsError> {
        let start = Instant::now();
        loop {
            {
                let state = self.state.lock();
                let mut all_signaled = true;
                for fence in fences {
                    match state.fences.get(&fence.raw()) {
                        Some(true) => {}
                        Some(false) => all_signaled = false,
                        None => {
                            return Err(GraphicsError::InvalidParameter(
                                "wait on unknown fence".to_string(),
                            ));
                        }
                    }
                }
                if all_signaled {
                    return Ok(true);
                }
            }
            if start.elapsed() >= timeout {
                return Ok(false);
            }
            std::thread::yield_now();
        }
    }

    fn fence_status(&self, fence: FenceHandle) -> Result<bool, GraphicsError> {
        self.state
            .lock()
            .fences
            .get(&fence.raw())
            .copied()
            .ok_or_else(|| GraphicsError::InvalidParameter("unknown fence".to_string()))
    }

    fn reset_fences(&self, fences: &[FenceHandle]) -> Result<(), GraphicsError> {
        let mut state = self.state.lock();
        for fence in fences {
            match state.fences.get_mut(&fence.raw()) {
                Some(signaled) => *signaled = false,
                None => {
                    return Err(GraphicsError::InvalidParameter(
                        "reset of unknown fence".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }

    fn create_semaphore(&self) -> Result<SemaphoreHandle, GraphicsError> {
        let mut state = self.state.lock();
        let raw = state.allocate(ObjectKind::Semaphore);
        state.semaphores.insert(raw, false);
        Ok(SemaphoreHandle::from_raw(raw))
    }

    fn destroy_semaphore(&self, semaphore: SemaphoreHandle) {
        let mut state = self.state.lock();
        if state.release(ObjectKind::Semaphore, semaphore.raw()) {
            state.semaphores.remove(&semaphore.raw());
        }
    }

    fn queue_submit(
        &self,
        queue: QueueType,
        batches: &[SubmitBatch],
        fence: Option<FenceHandle>,
    ) -> Result<(), GraphicsError> {
        let mut state = self.state.lock();
        for batch in batches {
            for command_buffer in &batch.command_buffers {
                match state.command_buffers.get(&command_buffer.raw()) {
                    Some(cb) if cb.recording => {
                        return Err(GraphicsError::InvalidParameter(
                            "submitting a command buffer that is still recording".to_string(),
                        ));
                    }
                    // Lists of any queue type may run on the graphics queue.
                    Some(cb) if cb.queue != queue && queue != QueueType::Graphics => {
                        log::warn!(
                            "DummyBackend: {:?} command buffer submitted to {:?} queue",
                            cb.queue,
                            queue
                        );
                    }
                    Some(_) => {}
                    None => {
                        return Err(GraphicsError::InvalidParameter(
                            "submitting unknown command buffer".to_string(),
                        ));
                    }
                }
            }
        }
        if let Some(fence) = fence {
            if !state.fences.contains_key(&fence.raw()) {
                return Err(GraphicsError::InvalidParameter(
                    "submit with unknown fence".to_string(),
                ));
            }
            state.fences.insert(fence.raw(), false);
        }

        state.stats.submissions += 1;
        if batches.is_empty() {
            if let Some(fence) = fence {
                state.fences.insert(fence.raw(), true);
            }
            return Ok(());
        }

        state.next_group += 1;
        let group = state.next_group;
        state.groups.insert(
            group,
            FenceGroup {
                remaining: batches.len(),
                fence: fence.map(FenceHandle::raw),
            },
        );
        for batch in batches {
            state.pending.push_back(PendingBatch {
                batch: batch.clone(),
                group,
            });
        }
        state.pump();
        Ok(())
    }

    fn wait_idle(&self) -> Result<(), GraphicsError> {
        let state = self.state.lock();
        if !state.pending.is_empty() {
            log::error!(
                "DummyBackend: {} batches wait on semaphores that are never signaled",
                state.pending.len()
            );
            return Err(GraphicsError::DeviceLost);
        }
        Ok(())
    }
}
