//! Common utilities for device integration tests.
//!
//! Every test runs against the [`DummyBackend`], which executes copies and
//! fills on host memory and tracks object lifetimes, semaphores and fences
//! the way a real driver would.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use cinder_graphics::backend::{ObjectKind, SemaphoreHandle};
use cinder_graphics::{
    Buffer, BufferDescriptor, BufferDomain, BufferUsage, CommandList, DescriptorKind,
    DescriptorSetLayout, DescriptorSetLayoutBinding, DescriptorSetLayoutDescriptor,
    DeviceParameters, DummyBackend, ExecutionOrder, Extent2d, GraphicsDevice, GraphicsError,
    Pipeline, PipelineDescriptor, PipelineStage, QueueType, SwapStatus, SwapTarget,
};

/// Generate a deterministic byte pattern.
pub fn generate_test_pattern(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i % 251) as u8).collect()
}

// ============================================================================
// Test Context
// ============================================================================

/// A device over a dummy backend the test can inspect.
pub struct TestContext {
    pub dummy: Arc<DummyBackend>,
    pub device: Arc<GraphicsDevice>,
}

impl TestContext {
    /// Create a context with default parameters and validation enabled.
    pub fn new() -> Self {
        Self::with_params(DeviceParameters::new())
    }

    /// Create a context with custom parameters and validation enabled.
    pub fn with_params(params: DeviceParameters) -> Self {
        Self::build(params.with_validation(true))
    }

    /// Create a context whose contract violations are logged, not raised.
    pub fn without_validation() -> Self {
        Self::build(DeviceParameters::new().with_validation(false))
    }

    fn build(params: DeviceParameters) -> Self {
        init_logging();
        let dummy = Arc::new(DummyBackend::new());
        let device = GraphicsDevice::new(
            dummy.clone(),
            params
                .with_label("test_device")
                .with_fence_timeout(Duration::from_millis(200)),
        )
        .expect("failed to create device");
        Self { dummy, device }
    }

    /// Device-local buffer that can be written and read back.
    pub fn gpu_buffer(&self, size: u64, usage: BufferUsage) -> Arc<Buffer> {
        self.device
            .create_buffer(&BufferDescriptor::new(
                size,
                usage | BufferUsage::COPY_SRC | BufferUsage::COPY_DST,
            ))
            .expect("failed to create buffer")
    }

    /// Host-visible buffer.
    pub fn host_buffer(&self, size: u64, usage: BufferUsage) -> Arc<Buffer> {
        self.device
            .create_buffer(&BufferDescriptor::new(size, usage).with_domain(BufferDomain::Host))
            .expect("failed to create buffer")
    }

    /// Layout with `count` uniform buffer bindings in set 0.
    pub fn uniform_layout(&self, count: u32) -> Arc<DescriptorSetLayout> {
        let descriptor = (0..count).fold(DescriptorSetLayoutDescriptor::new(), |desc, binding| {
            desc.with_binding(DescriptorSetLayoutBinding::new(
                binding,
                DescriptorKind::UniformBuffer,
            ))
        });
        self.device
            .create_descriptor_set_layout(&descriptor)
            .expect("failed to create layout")
    }

    /// Compute pipeline using `layout` as set 0.
    pub fn compute_pipeline(&self, layout: &Arc<DescriptorSetLayout>) -> Arc<Pipeline> {
        self.device
            .create_pipeline(&PipelineDescriptor::compute().with_set_layout(0, layout.clone()))
            .expect("failed to create pipeline")
    }

    /// Get a list for `queue` and start recording.
    pub fn recording(&self, queue: QueueType) -> CommandList {
        let mut cmd = self
            .device
            .get_command_list(queue)
            .expect("failed to get command list");
        cmd.begin_commands().expect("failed to begin");
        cmd
    }

    /// End `cmd` and submit it.
    pub fn submit(&self, mut cmd: CommandList, order: ExecutionOrder) {
        cmd.end_commands().expect("failed to end");
        self.device
            .submit_command_list(cmd, PipelineStage::ALL_COMMANDS, order)
            .expect("failed to submit");
    }

    /// Whether the backend object behind `raw` still exists.
    pub fn is_alive(&self, raw: u64) -> bool {
        self.dummy.is_alive(raw)
    }

    pub fn live(&self, kind: ObjectKind) -> usize {
        self.dummy.live_objects(kind)
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// ============================================================================
// Swap target
// ============================================================================

/// What a [`FakeSwapTarget`] does on its next calls.
#[derive(Debug, Default)]
pub struct SwapScript {
    /// Status reported by acquire.
    pub acquire_status: SwapStatus,
    /// Status reported by present.
    pub present_status: SwapStatus,
    /// Skip signaling the acquire semaphore, as if the image never frees up.
    pub withhold_image: bool,
    /// Fail acquire with `SurfaceOutdated`, the way drivers report it.
    pub outdated_error: bool,
    /// Semaphore passed to the last acquire.
    pub last_acquire: Option<SemaphoreHandle>,
    /// Images presented, with whether their wait semaphore was signaled.
    pub presented: Vec<(u32, bool)>,
}

/// A swap target that signals and consumes semaphores on the dummy backend.
pub struct FakeSwapTarget {
    dummy: Arc<DummyBackend>,
    script: Arc<Mutex<SwapScript>>,
    image_count: u32,
    next_image: u32,
}

impl FakeSwapTarget {
    pub fn new(dummy: Arc<DummyBackend>, image_count: u32) -> (Self, Arc<Mutex<SwapScript>>) {
        let script = Arc::new(Mutex::new(SwapScript::default()));
        let target = Self {
            dummy,
            script: script.clone(),
            image_count,
            next_image: 0,
        };
        (target, script)
    }
}

impl SwapTarget for FakeSwapTarget {
    fn extent(&self) -> Extent2d {
        Extent2d::new(640, 480)
    }

    fn acquire(
        &mut self,
        signal: SemaphoreHandle,
    ) -> Result<(Option<u32>, SwapStatus), GraphicsError> {
        let mut script = self.script.lock();
        script.last_acquire = Some(signal);
        if script.outdated_error {
            return Err(GraphicsError::SurfaceOutdated);
        }
        if script.acquire_status == SwapStatus::OutOfDate {
            return Ok((None, SwapStatus::OutOfDate));
        }
        if !script.withhold_image {
            self.dummy.signal_semaphore(signal);
        }
        let index = self.next_image;
        self.next_image = (self.next_image + 1) % self.image_count;
        Ok((Some(index), script.acquire_status))
    }

    fn present(
        &mut self,
        image_index: u32,
        wait: SemaphoreHandle,
    ) -> Result<SwapStatus, GraphicsError> {
        let signaled = self.dummy.consume_semaphore(wait);
        let mut script = self.script.lock();
        script.presented.push((image_index, signaled));
        Ok(script.present_status)
    }
}
