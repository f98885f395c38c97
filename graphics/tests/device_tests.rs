//! Device integration tests.
//!
//! These tests drive the [`GraphicsDevice`] frame loop end to end on the
//! dummy backend and check what actually executed.
//!
//! # Test Categories
//!
//! - **Upload Tests**: Staged writes into device-local memory and readback
//! - **Ordering Tests**: Sequential chains and cross-queue dependencies
//! - **Command List Pool Tests**: Lazy growth and frame-independent lists
//! - **Failure Tests**: Dependency cycles and fence timeouts
//! - **Presentation Tests**: Swap target acquire, present and recreation
//!
//! ```bash
//! cargo test --test device_tests
//! ```

mod common;

use std::time::Duration;

use rstest::rstest;

use cinder_graphics::backend::ObjectKind;
use cinder_graphics::{
    BufferCopy, BufferDescriptor, BufferUsage, DeviceParameters, ExecutionOrder, GraphicsError, ImageDescriptor,
    ImageFormat, ImageLayout, ImageUsage, PipelineStage, QueueType, SwapStatus,
};
use common::{FakeSwapTarget, TestContext, generate_test_pattern};

// ============================================================================
// Upload Tests
// ============================================================================

/// A 64-byte write into a device-local buffer reads back unchanged, whether
/// or not a frame was completed in between.
#[rstest]
#[case::after_frame(true)]
#[case::before_frame(false)]
fn test_set_data_round_trip(#[case] complete_frame: bool) {
    let ctx = TestContext::new();
    let data = generate_test_pattern(64);
    let buffer = ctx.gpu_buffer(64, BufferUsage::STORAGE);

    buffer.set_data(&data).unwrap();
    assert!(ctx.device.has_pending_uploads());
    if complete_frame {
        ctx.device.complete_frame().unwrap();
    }

    assert_eq!(ctx.device.read_buffer(&buffer, 0, 64).unwrap(), data);
    assert!(!ctx.device.has_pending_uploads());
}

#[test]
fn test_set_data_at_offset() {
    let ctx = TestContext::new();
    let buffer = ctx.gpu_buffer(32, BufferUsage::STORAGE);
    buffer.set_data_at(16, &[7u8; 16]).unwrap();

    let contents = ctx.device.read_buffer(&buffer, 0, 32).unwrap();
    assert_eq!(&contents[..16], &[0u8; 16]);
    assert_eq!(&contents[16..], &[7u8; 16]);
}

#[test]
fn test_host_buffer_is_written_directly() {
    let ctx = TestContext::new();
    let buffer = ctx.host_buffer(16, BufferUsage::UNIFORM);
    buffer.set_typed(&[1u32, 2, 3, 4]).unwrap();

    assert!(!ctx.device.has_pending_uploads());
    let bytes = ctx.device.read_buffer(&buffer, 0, 16).unwrap();
    assert_eq!(bytes, bytemuck::cast_slice::<u32, u8>(&[1, 2, 3, 4]));
}

#[test]
fn test_uploads_run_before_frame_work() {
    let ctx = TestContext::new();
    let source = ctx.gpu_buffer(16, BufferUsage::STORAGE);
    let target = ctx.gpu_buffer(16, BufferUsage::STORAGE);
    source.set_data(&[9u8; 16]).unwrap();

    let mut cmd = ctx.recording(QueueType::Graphics);
    cmd.copy_buffer(&source, &target, BufferCopy::new(0, 0, 16));
    ctx.submit(cmd, ExecutionOrder::Parallel);
    ctx.device.complete_frame().unwrap();

    assert_eq!(ctx.device.read_buffer(&target, 0, 16).unwrap(), vec![9u8; 16]);
}

#[test]
fn test_image_upload_ends_shader_readable() {
    let ctx = TestContext::new();
    let image = ctx
        .device
        .create_image(&ImageDescriptor::new_2d(
            4,
            4,
            ImageFormat::Rgba8Unorm,
            ImageUsage::SAMPLED | ImageUsage::COPY_DST,
        ))
        .unwrap();
    let data = generate_test_pattern(64);

    image.set_data(&data).unwrap();
    ctx.device.complete_frame().unwrap();

    assert_eq!(ctx.dummy.image_data(image.handle(), 0), Some(data));
    assert_eq!(image.layout(), ImageLayout::ShaderReadOnly);
}

#[test]
fn test_image_upload_rejects_wrong_size() {
    let ctx = TestContext::new();
    let image = ctx
        .device
        .create_image(&ImageDescriptor::new_2d(
            4,
            4,
            ImageFormat::Rgba8Unorm,
            ImageUsage::SAMPLED | ImageUsage::COPY_DST,
        ))
        .unwrap();
    assert!(matches!(
        image.set_data(&[0u8; 10]),
        Err(GraphicsError::InvalidParameter(_))
    ));
}

#[test]
fn test_read_past_end_is_rejected() {
    let ctx = TestContext::new();
    let buffer = ctx.gpu_buffer(16, BufferUsage::STORAGE);
    assert!(matches!(
        ctx.device.read_buffer(&buffer, 8, 16),
        Err(GraphicsError::InvalidParameter(_))
    ));
    assert!(matches!(
        ctx.device.read_buffer(&buffer, u64::MAX, 2),
        Err(GraphicsError::InvalidParameter(_))
    ));
}

#[test]
fn test_staged_write_without_copy_dst_is_rejected() {
    let ctx = TestContext::without_validation();
    let buffer = ctx
        .device
        .create_buffer(&BufferDescriptor::new(16, BufferUsage::STORAGE))
        .unwrap();
    assert!(matches!(
        buffer.set_data(&[1u8; 16]),
        Err(GraphicsError::InvalidParameter(_))
    ));
    assert!(!ctx.device.has_pending_uploads());
}

// ============================================================================
// Ordering Tests
// ============================================================================

/// Lists submitted sequentially on one queue execute in submission order,
/// so the second sees the first one's writes.
#[test]
fn test_sequential_lists_observe_earlier_writes() {
    let ctx = TestContext::new();
    let buffer = ctx.gpu_buffer(16, BufferUsage::STORAGE);
    let result = ctx.gpu_buffer(16, BufferUsage::STORAGE);

    let mut fill = ctx.recording(QueueType::Graphics);
    fill.fill_buffer(&buffer, 0, 16, 0x0101_0101);
    let fill_cb = fill.command_buffer();
    ctx.submit(fill, ExecutionOrder::Sequential);

    let mut copy = ctx.recording(QueueType::Graphics);
    copy.copy_buffer(&buffer, &result, BufferCopy::new(0, 0, 16));
    let copy_cb = copy.command_buffer();
    ctx.submit(copy, ExecutionOrder::Sequential);

    ctx.device.complete_frame().unwrap();

    let log = ctx.dummy.execution_log();
    let fill_at = log.iter().position(|cb| *cb == fill_cb).unwrap();
    let copy_at = log.iter().position(|cb| *cb == copy_cb).unwrap();
    assert!(fill_at < copy_at);
    assert_eq!(ctx.device.read_buffer(&result, 0, 16).unwrap(), vec![1u8; 16]);
}

/// A graphics list that depends on a compute list submitted after it still
/// runs second and sees the compute list's writes.
#[test]
fn test_cross_queue_dependency_reorders() {
    let ctx = TestContext::new();
    let buffer = ctx.gpu_buffer(16, BufferUsage::STORAGE);
    let result = ctx.gpu_buffer(16, BufferUsage::STORAGE);

    let mut producer = ctx.recording(QueueType::Compute);
    producer.fill_buffer(&buffer, 0, 16, 0x0202_0202);

    let mut consumer = ctx.recording(QueueType::Graphics);
    consumer.copy_buffer(&buffer, &result, BufferCopy::new(0, 0, 16));
    consumer.depends_on(producer.id());

    ctx.submit(consumer, ExecutionOrder::Parallel);
    ctx.submit(producer, ExecutionOrder::Parallel);
    ctx.device.complete_frame().unwrap();

    assert_eq!(ctx.device.read_buffer(&result, 0, 16).unwrap(), vec![2u8; 16]);
    assert_eq!(ctx.dummy.pending_batches(), 0);
}

#[test]
fn test_lists_on_dedicated_queues() {
    let ctx = TestContext::new();
    for queue in QueueType::ALL {
        let cmd = ctx.recording(queue);
        assert_eq!(cmd.queue(), queue);
        ctx.submit(cmd, ExecutionOrder::Sequential);
    }
    ctx.device.complete_frame().unwrap();

    assert_eq!(ctx.device.queue(QueueType::Compute).queue_type(), QueueType::Compute);
    assert!(ctx.device.queue(QueueType::Transfer).submission_count() > 0);
}

// ============================================================================
// Command List Pool Tests
// ============================================================================

/// Taking one more list than the pool holds creates exactly one new list,
/// which stays in the pool for later frames.
#[test]
fn test_exhausted_pool_grows_once() {
    let ctx = TestContext::with_params(
        DeviceParameters::new()
            .with_frames_in_flight(2)
            .with_command_lists_per_queue(2),
    );
    let before = ctx.live(ObjectKind::CommandBuffer);

    for _ in 0..3 {
        let cmd = ctx.recording(QueueType::Graphics);
        ctx.submit(cmd, ExecutionOrder::Sequential);
    }
    assert_eq!(ctx.live(ObjectKind::CommandBuffer), before + 1);

    ctx.device.complete_frame().unwrap();
    ctx.device.complete_frame().unwrap();

    // Back on the first slot, which now holds three lists.
    for _ in 0..3 {
        let cmd = ctx.recording(QueueType::Graphics);
        ctx.submit(cmd, ExecutionOrder::Sequential);
    }
    assert_eq!(ctx.live(ObjectKind::CommandBuffer), before + 1);
    ctx.device.complete_frame().unwrap();
}

#[test]
fn test_frame_independent_list_flush() {
    let ctx = TestContext::new();
    let buffer = ctx.host_buffer(16, BufferUsage::COPY_DST);

    let mut cmd = ctx
        .device
        .get_frame_independent_command_list(QueueType::Transfer)
        .unwrap();
    assert!(cmd.is_frame_independent());
    cmd.begin_commands().unwrap();
    cmd.fill_buffer(&buffer, 0, 16, 0x0303_0303);
    cmd.end_commands().unwrap();
    ctx.device.flush_command_list(cmd).unwrap();

    assert_eq!(buffer.read_host(0, 16).unwrap(), vec![3u8; 16]);
    assert_eq!(ctx.device.frame_index(), 0);
}

#[test]
#[should_panic(expected = "contract violation")]
fn test_submitting_unended_list_panics_with_validation() {
    let ctx = TestContext::new();
    let cmd = ctx.recording(QueueType::Graphics);
    ctx.device
        .submit_command_list(cmd, PipelineStage::ALL_COMMANDS, ExecutionOrder::Sequential)
        .unwrap();
}

#[test]
fn test_unended_list_is_dropped_without_validation() {
    let ctx = TestContext::without_validation();
    let cmd = ctx.recording(QueueType::Graphics);
    assert!(matches!(
        ctx.device
            .submit_command_list(cmd, PipelineStage::ALL_COMMANDS, ExecutionOrder::Sequential),
        Err(GraphicsError::ContractViolation(_))
    ));
    let submissions = ctx.dummy.stats().submissions;
    ctx.device.complete_frame().unwrap();

    // Only the frame's final batch went out.
    assert_eq!(ctx.dummy.stats().submissions, submissions + 1);
}

// ============================================================================
// Failure Tests
// ============================================================================

#[test]
fn test_dependency_cycle_leaves_frame_unsubmitted() {
    let ctx = TestContext::new();
    let mut first = ctx.recording(QueueType::Graphics);
    let mut second = ctx.recording(QueueType::Compute);
    first.depends_on(second.id());
    second.depends_on(first.id());
    ctx.submit(first, ExecutionOrder::Parallel);
    ctx.submit(second, ExecutionOrder::Parallel);

    let submissions = ctx.dummy.stats().submissions;
    assert!(matches!(
        ctx.device.complete_frame(),
        Err(GraphicsError::DependencyCycle(_))
    ));
    assert_eq!(ctx.dummy.stats().submissions, submissions);
    assert_eq!(ctx.device.frame_index(), 0);

    // The next frame goes through normally.
    ctx.device.complete_frame().unwrap();
    assert_eq!(ctx.device.frame_index(), 1);
}

/// A frame blocked on a swap image that never becomes available times out;
/// it completes once the image is released.
#[test]
fn test_fence_timeout_is_reported() {
    let ctx = TestContext::with_params(DeviceParameters::new().with_frames_in_flight(1));
    let (target, script) = FakeSwapTarget::new(ctx.dummy.clone(), 2);
    script.lock().withhold_image = true;
    ctx.device.set_swap_target(Box::new(target));

    assert_eq!(ctx.device.acquire_swap_image().unwrap(), Some(0));
    let cmd = ctx.recording(QueueType::Graphics);
    ctx.submit(cmd, ExecutionOrder::Sequential);

    let err = ctx.device.complete_frame().unwrap_err();
    assert_eq!(err, GraphicsError::FenceTimeout(Duration::from_millis(200)));
    assert!(err.is_fatal());
    assert!(!ctx.device.is_previous_frame_complete().unwrap());

    let acquire = script.lock().last_acquire.unwrap();
    ctx.dummy.signal_semaphore(acquire);
    assert!(ctx.device.is_previous_frame_complete().unwrap());
    ctx.device.wait_for_previous_frame_completion().unwrap();
}

// ============================================================================
// Presentation Tests
// ============================================================================

#[test]
fn test_acquired_image_is_presented_after_frame() {
    let ctx = TestContext::new();
    let (target, script) = FakeSwapTarget::new(ctx.dummy.clone(), 3);
    ctx.device.set_swap_target(Box::new(target));

    for expected in 0..3 {
        assert_eq!(ctx.device.acquire_swap_image().unwrap(), Some(expected));
        let cmd = ctx.recording(QueueType::Graphics);
        ctx.submit(cmd, ExecutionOrder::Sequential);
        ctx.device.complete_frame().unwrap();
    }

    assert_eq!(script.lock().presented, vec![(0, true), (1, true), (2, true)]);
    assert!(!ctx.device.swap_target_needs_recreation());
}

#[test]
fn test_present_without_graphics_work() {
    let ctx = TestContext::new();
    let (target, script) = FakeSwapTarget::new(ctx.dummy.clone(), 2);
    ctx.device.set_swap_target(Box::new(target));

    ctx.device.acquire_swap_image().unwrap();
    let cmd = ctx.recording(QueueType::Compute);
    ctx.submit(cmd, ExecutionOrder::Sequential);
    ctx.device.complete_frame().unwrap();

    assert_eq!(script.lock().presented, vec![(0, true)]);
    assert_eq!(ctx.dummy.pending_batches(), 0);
}

#[rstest]
#[case::suboptimal_acquire(SwapStatus::Suboptimal, SwapStatus::Optimal)]
#[case::out_of_date_acquire(SwapStatus::OutOfDate, SwapStatus::Optimal)]
#[case::suboptimal_present(SwapStatus::Optimal, SwapStatus::Suboptimal)]
#[case::out_of_date_present(SwapStatus::Optimal, SwapStatus::OutOfDate)]
fn test_unhealthy_swap_target_flags_recreation(
    #[case] acquire_status: SwapStatus,
    #[case] present_status: SwapStatus,
) {
    let ctx = TestContext::new();
    let (target, script) = FakeSwapTarget::new(ctx.dummy.clone(), 2);
    {
        let mut script = script.lock();
        script.acquire_status = acquire_status;
        script.present_status = present_status;
    }
    ctx.device.set_swap_target(Box::new(target));

    let image = ctx.device.acquire_swap_image().unwrap();
    assert_eq!(image.is_none(), acquire_status == SwapStatus::OutOfDate);
    ctx.device.complete_frame().unwrap();

    assert!(ctx.device.swap_target_needs_recreation());

    // Installing a fresh target clears the flag.
    let (fresh, _) = FakeSwapTarget::new(ctx.dummy.clone(), 2);
    ctx.device.set_swap_target(Box::new(fresh));
    assert!(!ctx.device.swap_target_needs_recreation());
}

#[test]
fn test_outdated_target_refuses_acquire_until_replaced() {
    let ctx = TestContext::new();
    let (target, script) = FakeSwapTarget::new(ctx.dummy.clone(), 2);
    script.lock().outdated_error = true;
    ctx.device.set_swap_target(Box::new(target));

    assert_eq!(ctx.device.acquire_swap_image().unwrap(), None);
    assert!(ctx.device.swap_target_needs_recreation());
    assert_eq!(
        ctx.device.acquire_swap_image(),
        Err(GraphicsError::SurfaceOutdated)
    );
    ctx.device.complete_frame().unwrap();
    assert!(script.lock().presented.is_empty());

    let (fresh, _) = FakeSwapTarget::new(ctx.dummy.clone(), 2);
    ctx.device.set_swap_target(Box::new(fresh));
    assert_eq!(ctx.device.acquire_swap_image().unwrap(), Some(0));
    ctx.device.complete_frame().unwrap();
}

#[test]
fn test_acquire_without_target_is_rejected() {
    let ctx = TestContext::new();
    assert!(matches!(
        ctx.device.acquire_swap_image(),
        Err(GraphicsError::InvalidParameter(_))
    ));
}
