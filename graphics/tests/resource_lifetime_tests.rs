//! Resource lifetime and descriptor cache tests.
//!
//! - **Deferred Deletion Tests**: Released resources survive every frame
//!   that may still use them
//! - **Descriptor Cache Tests**: Set reuse across frames, pool growth and
//!   cache resets

mod common;

use rstest::rstest;

use cinder_graphics::backend::ObjectKind;
use cinder_graphics::{
    BufferDescriptor, BufferUsage, DeviceParameters, ExecutionOrder, QueueType, SamplerDescriptor,
};
use common::TestContext;

// ============================================================================
// Deferred Deletion Tests
// ============================================================================

/// A buffer used by a submitted dispatch and dropped right after is
/// destroyed only once the list using it has been recycled and
/// `frames_to_deletion` further frames have passed.
#[rstest]
#[case::two_frames(2)]
#[case::three_frames(3)]
fn test_released_buffer_outlives_its_frame(#[case] frames_to_deletion: u64) {
    let ctx = TestContext::with_params(
        DeviceParameters::new()
            .with_frames_in_flight(2)
            .with_frames_to_deletion(frames_to_deletion),
    );
    let layout = ctx.uniform_layout(1);
    let pipeline = ctx.compute_pipeline(&layout);
    let buffer = ctx.gpu_buffer(64, BufferUsage::UNIFORM);
    let raw = buffer.handle().raw();

    let mut cmd = ctx.recording(QueueType::Compute);
    cmd.bind_pipeline(&pipeline);
    cmd.bind_buffer(0, 0, &buffer);
    cmd.dispatch(1, 1, 1).unwrap();
    ctx.submit(cmd, ExecutionOrder::Sequential);
    drop(buffer);

    let mut destroyed_at = None;
    for _ in 0..8 {
        ctx.device.complete_frame().unwrap();
        if !ctx.is_alive(raw) {
            destroyed_at = Some(ctx.device.frame_index());
            break;
        }
    }

    // Released when its list is recycled at frame 2, while the memory
    // manager still counts frame 1.
    assert_eq!(destroyed_at, Some(frames_to_deletion + 1));
    assert_eq!(ctx.dummy.stats().invalid_destroys, 0);
}

#[test]
fn test_unused_resource_is_still_deferred() {
    let ctx = TestContext::with_params(DeviceParameters::new().with_frames_to_deletion(3));
    let sampler = ctx
        .device
        .create_sampler(&SamplerDescriptor::linear())
        .unwrap();
    let raw = sampler.handle().raw();
    drop(sampler);

    ctx.device.complete_frame().unwrap();
    assert!(ctx.is_alive(raw));
    assert_eq!(ctx.device.memory_manager().pending_count(), 1);

    for _ in 0..3 {
        ctx.device.complete_frame().unwrap();
    }
    assert!(!ctx.is_alive(raw));
    assert_eq!(ctx.device.memory_manager().pending_count(), 0);
}

#[test]
fn test_force_memory_cleanup_destroys_released() {
    let ctx = TestContext::new();
    let buffers: Vec<_> = (0..4)
        .map(|_| ctx.gpu_buffer(256, BufferUsage::STORAGE))
        .collect();
    let live = ctx.live(ObjectKind::Buffer);
    drop(buffers);

    ctx.device.force_memory_cleanup().unwrap();
    assert_eq!(ctx.live(ObjectKind::Buffer), live - 4);
    assert_eq!(ctx.device.memory_manager().pending_count(), 0);
}

#[test]
fn test_held_resource_is_never_collected() {
    let ctx = TestContext::new();
    let buffer = ctx.gpu_buffer(64, BufferUsage::STORAGE);
    for _ in 0..6 {
        ctx.device.complete_frame().unwrap();
    }
    assert!(ctx.is_alive(buffer.handle().raw()));
}

#[test]
fn test_zero_sized_buffer_is_rejected() {
    let ctx = TestContext::new();
    assert!(
        ctx.device
            .create_buffer(&BufferDescriptor::new(0, BufferUsage::STORAGE))
            .is_err()
    );
}

#[test]
fn test_multi_buffer_follows_frame_slot() {
    let ctx = TestContext::with_params(DeviceParameters::new().with_frames_in_flight(3));
    let multi = ctx
        .device
        .create_multi_buffer(&BufferDescriptor::new(64, BufferUsage::UNIFORM))
        .unwrap();
    assert_eq!(multi.len(), 3);

    let mut seen = Vec::new();
    for _ in 0..4 {
        seen.push(multi.current_index());
        ctx.device.complete_frame().unwrap();
    }
    assert_eq!(seen, vec![0, 1, 2, 0]);
}

// ============================================================================
// Descriptor Cache Tests
// ============================================================================

/// The same list comes back every frame and reuses its cached set instead
/// of allocating a new one; the set is rewritten once per frame.
#[test]
fn test_cached_set_reused_across_frames() {
    let ctx = TestContext::with_params(
        DeviceParameters::new()
            .with_frames_in_flight(1)
            .with_command_lists_per_queue(1),
    );
    let layout = ctx.uniform_layout(2);
    let pipeline = ctx.compute_pipeline(&layout);
    let a = ctx.gpu_buffer(64, BufferUsage::UNIFORM);
    let b = ctx.gpu_buffer(64, BufferUsage::UNIFORM);
    let before = ctx.dummy.stats();

    for _ in 0..3 {
        let mut cmd = ctx.recording(QueueType::Compute);
        cmd.bind_pipeline(&pipeline);
        cmd.bind_buffer(0, 0, &a);
        cmd.bind_buffer(0, 1, &b);
        cmd.dispatch(1, 1, 1).unwrap();
        // Nothing changed, nothing written.
        cmd.dispatch(1, 1, 1).unwrap();
        ctx.submit(cmd, ExecutionOrder::Sequential);
        ctx.device.complete_frame().unwrap();
    }

    let after = ctx.dummy.stats();
    assert_eq!(after.descriptor_sets_allocated - before.descriptor_sets_allocated, 1);
    assert_eq!(after.descriptor_update_calls - before.descriptor_update_calls, 3);
    assert_eq!(after.descriptor_writes - before.descriptor_writes, 6);
    assert_eq!(after.dispatches - before.dispatches, 6);
}

/// With room for two sets per backing pool, five distinct binding states in
/// one list spill into three backing pools.
#[test]
fn test_descriptor_pool_grows_on_exhaustion() {
    let ctx = TestContext::with_params(DeviceParameters::new().with_descriptor_pool_size(2));
    let layout = ctx.uniform_layout(1);
    let pipeline = ctx.compute_pipeline(&layout);
    let buffers: Vec<_> = (0..5)
        .map(|_| ctx.gpu_buffer(64, BufferUsage::UNIFORM))
        .collect();

    let mut cmd = ctx.recording(QueueType::Compute);
    cmd.bind_pipeline(&pipeline);
    for buffer in &buffers {
        cmd.bind_buffer(0, 0, buffer);
        cmd.dispatch(1, 1, 1).unwrap();
    }
    assert_eq!(cmd.descriptor_pool().cached_set_count(layout.id()), 5);
    assert_eq!(cmd.descriptor_pool().backing_pool_count(), 3);

    ctx.submit(cmd, ExecutionOrder::Sequential);
    ctx.device.complete_frame().unwrap();
}

#[test]
fn test_reset_descriptor_caches_reallocates() {
    let ctx = TestContext::with_params(
        DeviceParameters::new()
            .with_frames_in_flight(1)
            .with_command_lists_per_queue(1),
    );
    let layout = ctx.uniform_layout(1);
    let pipeline = ctx.compute_pipeline(&layout);
    let buffer = ctx.gpu_buffer(64, BufferUsage::UNIFORM);

    let record_frame = || {
        let mut cmd = ctx.recording(QueueType::Compute);
        cmd.bind_pipeline(&pipeline);
        cmd.bind_buffer(0, 0, &buffer);
        cmd.dispatch(1, 1, 1).unwrap();
        ctx.submit(cmd, ExecutionOrder::Sequential);
        ctx.device.complete_frame().unwrap();
    };

    record_frame();
    let before = ctx.dummy.stats();
    ctx.device.reset_descriptor_caches().unwrap();
    let after_reset = ctx.dummy.stats();
    assert!(after_reset.descriptor_pool_resets > before.descriptor_pool_resets);

    record_frame();
    let after = ctx.dummy.stats();
    assert_eq!(after.descriptor_sets_allocated - before.descriptor_sets_allocated, 1);
}
