//! Multi-threaded recording, submission and release.
//!
//! Worker threads each record into their own command list, upload into
//! their own buffer and drop temporary resources while sharing one device.
//! The main thread completes frames between rounds.
//!
//! ```bash
//! cargo test --test concurrency_tests
//! ```

mod common;

use std::sync::Arc;
use std::thread;

use cinder_graphics::backend::ObjectKind;
use cinder_graphics::{
    BufferDescriptor, BufferUsage, DeviceParameters, ExecutionOrder, PipelineStage, QueueType,
};
use common::{TestContext, generate_test_pattern};

const WORKERS: usize = 6;
const ROUNDS: usize = 4;

// ============================================================================
// Recording Tests
// ============================================================================

#[test]
fn test_workers_record_and_submit_in_parallel() {
    let ctx = TestContext::with_params(DeviceParameters::new().with_frames_to_deletion(2));
    let layout = ctx.uniform_layout(1);
    let pipeline = ctx.compute_pipeline(&layout);
    let targets: Vec<_> = (0..WORKERS)
        .map(|_| ctx.gpu_buffer(256, BufferUsage::UNIFORM))
        .collect();
    let buffers_before = ctx.live(ObjectKind::Buffer);
    let dispatches_before = ctx.dummy.stats().dispatches;

    for round in 0..ROUNDS {
        let workers: Vec<_> = targets
            .iter()
            .enumerate()
            .map(|(worker, target)| {
                let device = Arc::clone(&ctx.device);
                let pipeline = Arc::clone(&pipeline);
                let target = Arc::clone(target);
                thread::spawn(move || {
                    let mut data = generate_test_pattern(256);
                    data[0] = worker as u8;
                    data[1] = round as u8;
                    target.set_data(&data).unwrap();

                    // Released mid-frame from a worker thread.
                    let scratch = device
                        .create_buffer(&BufferDescriptor::new(128, BufferUsage::STORAGE))
                        .unwrap();
                    drop(scratch);

                    let mut cmd = device.get_command_list(QueueType::Compute).unwrap();
                    cmd.begin_commands().unwrap();
                    cmd.bind_pipeline(&pipeline);
                    cmd.bind_buffer(0, 0, &target);
                    cmd.dispatch(1, 1, 1).unwrap();
                    cmd.end_commands().unwrap();
                    device
                        .submit_command_list(
                            cmd,
                            PipelineStage::ALL_COMMANDS,
                            ExecutionOrder::Parallel,
                        )
                        .unwrap();
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        ctx.device.complete_frame().unwrap();

        for (worker, target) in targets.iter().enumerate() {
            let contents = ctx.device.read_buffer(target, 0, 2).unwrap();
            assert_eq!(contents, vec![worker as u8, round as u8]);
        }
    }

    for _ in 0..=ctx.device.parameters().frames_to_deletion + 1 {
        ctx.device.complete_frame().unwrap();
    }

    let stats = ctx.dummy.stats();
    assert_eq!(stats.dispatches - dispatches_before, WORKERS * ROUNDS);
    assert_eq!(stats.invalid_destroys, 0);
    // Scratch buffers and staging buffers are all gone again.
    assert_eq!(ctx.live(ObjectKind::Buffer), buffers_before);
    assert_eq!(ctx.device.memory_manager().pending_count(), 0);
}

// ============================================================================
// Release Tests
// ============================================================================

#[test]
fn test_release_from_many_threads_while_frames_complete() {
    let ctx = TestContext::with_params(DeviceParameters::new().with_frames_to_deletion(2));
    let buffers_before = ctx.live(ObjectKind::Buffer);

    let releasers: Vec<_> = (0..WORKERS)
        .map(|_| {
            let device = Arc::clone(&ctx.device);
            thread::spawn(move || {
                for _ in 0..200 {
                    let buffer = device
                        .create_buffer(&BufferDescriptor::new(64, BufferUsage::STORAGE))
                        .unwrap();
                    drop(buffer);
                }
            })
        })
        .collect();

    while !releasers.iter().all(|releaser| releaser.is_finished()) {
        ctx.device.complete_frame().unwrap();
    }
    for releaser in releasers {
        releaser.join().unwrap();
    }

    ctx.device.force_memory_cleanup().unwrap();
    assert_eq!(ctx.live(ObjectKind::Buffer), buffers_before);
    assert_eq!(ctx.dummy.stats().invalid_destroys, 0);
}
