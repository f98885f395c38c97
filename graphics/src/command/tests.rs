use std::sync::{Arc, Weak};

use rstest::rstest;

use super::*;
use crate::backend::{
    BackendCapabilities, DescriptorResource, DescriptorSetHandle, DummyBackend, GpuBackend,
};
use crate::resources::{Blas, DescriptorSetLayout, QueryPool, RenderPass};
use crate::types::{
    AccessFlags, AttachmentDescriptor, BlasDescriptor, BlasTriangles, BufferDescriptor, DescriptorKind,
    DescriptorSetLayoutBinding, DescriptorSetLayoutDescriptor, FrameBufferDescriptor,
    ImageDescriptor, ImageFormat, PipelineDescriptor, PipelineStage, PushConstantRange,
    QueryPoolDescriptor, QueryType, RenderPassDescriptor, SamplerDescriptor, TlasDescriptor,
    TlasInstance,
};

struct Fixture {
    dummy: Arc<DummyBackend>,
    backend: Arc<dyn GpuBackend>,
    pool: Arc<DescriptorPool>,
    placeholders: Arc<Placeholders>,
}

impl Fixture {
    fn new() -> Self {
        Self::with_backend(DummyBackend::new())
    }

    fn with_backend(dummy: DummyBackend) -> Self {
        let dummy = Arc::new(dummy);
        let backend: Arc<dyn GpuBackend> = dummy.clone();
        let pool = Arc::new(DescriptorPool::new(backend.clone(), 64));
        let placeholders = Arc::new(Placeholders::new(&backend).unwrap());
        Self {
            dummy,
            backend,
            pool,
            placeholders,
        }
    }

    fn command_list(&self, validation: bool) -> CommandList {
        CommandList::new(
            QueueType::Graphics,
            self.backend.clone(),
            self.pool.clone(),
            self.placeholders.clone(),
            validation,
            false,
        )
        .unwrap()
    }

    fn recording(&self) -> CommandList {
        let mut cmd = self.command_list(true);
        cmd.begin_commands().unwrap();
        cmd
    }

    fn buffer(&self, size: u64, usage: BufferUsage) -> Arc<Buffer> {
        Arc::new(
            Buffer::new(
                Weak::new(),
                self.backend.clone(),
                BufferDescriptor::new(size, usage),
            )
            .unwrap(),
        )
    }

    fn image(&self, descriptor: ImageDescriptor) -> Arc<Image> {
        Arc::new(Image::new(Weak::new(), self.backend.clone(), descriptor).unwrap())
    }

    fn texture(&self) -> Arc<Image> {
        self.image(ImageDescriptor::new_2d(
            4,
            4,
            ImageFormat::Rgba8Unorm,
            ImageUsage::SAMPLED | ImageUsage::COPY_DST,
        ))
    }

    fn sampler(&self) -> Arc<Sampler> {
        Arc::new(Sampler::new(self.backend.clone(), SamplerDescriptor::linear()).unwrap())
    }

    fn layout(&self, bindings: &[DescriptorSetLayoutBinding]) -> Arc<DescriptorSetLayout> {
        let descriptor = bindings
            .iter()
            .fold(DescriptorSetLayoutDescriptor::new(), |desc, binding| {
                desc.with_binding(*binding)
            });
        Arc::new(DescriptorSetLayout::new(self.backend.clone(), descriptor).unwrap())
    }

    fn compute_pipeline(&self, layout: &Arc<DescriptorSetLayout>) -> Arc<Pipeline> {
        Arc::new(
            Pipeline::new(
                self.backend.clone(),
                PipelineDescriptor::compute().with_set_layout(0, layout.clone()),
            )
            .unwrap(),
        )
    }

    fn render_target(&self) -> (Arc<RenderPass>, Arc<FrameBuffer>, Arc<Image>) {
        let render_pass = Arc::new(
            RenderPass::new(
                self.backend.clone(),
                RenderPassDescriptor::new().with_color_attachment(
                    AttachmentDescriptor::color(ImageFormat::Rgba8Unorm)
                        .with_final_layout(ImageLayout::ShaderReadOnly),
                ),
            )
            .unwrap(),
        );
        let color = self.image(ImageDescriptor::new_2d(
            64,
            32,
            ImageFormat::Rgba8Unorm,
            ImageUsage::COLOR_ATTACHMENT | ImageUsage::SAMPLED,
        ));
        let frame_buffer = Arc::new(
            FrameBuffer::new(
                self.backend.clone(),
                FrameBufferDescriptor::new(render_pass.clone()).with_color_attachment(color.clone()),
            )
            .unwrap(),
        );
        (render_pass, frame_buffer, color)
    }

    fn graphics_pipeline(&self, render_pass: &Arc<RenderPass>) -> Arc<Pipeline> {
        Arc::new(
            Pipeline::new(
                self.backend.clone(),
                PipelineDescriptor::graphics(render_pass.clone()).with_push_constants(
                    PushConstantRange {
                        stages: ShaderStages::VERTEX,
                        offset: 0,
                        size: 16,
                    },
                ),
            )
            .unwrap(),
        )
    }

    fn commands(&self, cmd: &CommandList) -> Vec<NativeCommand> {
        self.dummy.recorded_commands(cmd.command_buffer())
    }
}

fn bound_sets(commands: &[NativeCommand]) -> Vec<(DescriptorSetHandle, Vec<u32>)> {
    commands
        .iter()
        .filter_map(|command| match command {
            NativeCommand::BindDescriptorSet {
                descriptor_set,
                dynamic_offsets,
                ..
            } => Some((*descriptor_set, dynamic_offsets.clone())),
            _ => None,
        })
        .collect()
}

fn count(commands: &[NativeCommand], predicate: impl Fn(&NativeCommand) -> bool) -> usize {
    commands.iter().filter(|command| predicate(command)).count()
}

// ============================================================================
// Lifecycle
// ============================================================================

#[test]
fn test_recording_lifecycle() {
    let fixture = Fixture::new();
    let mut cmd = fixture.command_list(true);
    assert_eq!(cmd.state(), RecordingState::Idle);

    cmd.begin_commands().unwrap();
    assert_eq!(cmd.state(), RecordingState::Recording);

    cmd.end_commands().unwrap();
    assert_eq!(cmd.state(), RecordingState::Ended);

    cmd.recycle();
    assert_eq!(cmd.state(), RecordingState::Idle);
}

#[test]
fn test_ids_are_unique() {
    let fixture = Fixture::new();
    let a = fixture.command_list(true);
    let b = fixture.command_list(true);
    assert_ne!(a.id(), b.id());
}

#[test]
fn test_depends_on_ignores_self_and_duplicates() {
    let fixture = Fixture::new();
    let mut a = fixture.command_list(true);
    let b = fixture.command_list(true);

    a.depends_on(b.id());
    a.depends_on(b.id());
    a.depends_on(a.id());
    assert_eq!(a.dependencies(), &[b.id()]);

    a.recycle();
    assert!(a.dependencies().is_empty());
}

#[test]
#[should_panic(expected = "contract violation")]
fn test_draw_outside_render_pass_panics_with_validation() {
    let fixture = Fixture::new();
    let mut cmd = fixture.recording();
    cmd.draw(3, 1, 0, 0).unwrap();
}

#[test]
fn test_violation_is_skipped_without_validation() {
    let fixture = Fixture::new();
    let mut cmd = fixture.command_list(false);
    cmd.begin_commands().unwrap();
    cmd.draw(3, 1, 0, 0).unwrap();
    cmd.end_commands().unwrap();

    let commands = fixture.commands(&cmd);
    assert_eq!(count(&commands, |c| matches!(c, NativeCommand::Draw { .. })), 0);
}

#[test]
fn test_end_commands_closes_open_render_pass() {
    let fixture = Fixture::new();
    let (_, frame_buffer, _) = fixture.render_target();
    let mut cmd = fixture.command_list(false);
    cmd.begin_commands().unwrap();
    cmd.begin_render_pass(&frame_buffer);
    cmd.end_commands().unwrap();

    assert_eq!(cmd.state(), RecordingState::Ended);
    let commands = fixture.commands(&cmd);
    assert_eq!(commands.last(), Some(&NativeCommand::EndRenderPass));
}

// ============================================================================
// Render passes and pipeline state
// ============================================================================

#[test]
fn test_render_pass_transitions_attachments() {
    let fixture = Fixture::new();
    let (render_pass, frame_buffer, color) = fixture.render_target();
    let pipeline = fixture.graphics_pipeline(&render_pass);
    let mut cmd = fixture.recording();

    cmd.begin_render_pass(&frame_buffer);
    assert_eq!(color.layout(), ImageLayout::ColorAttachment);
    assert_eq!(cmd.state(), RecordingState::RenderPassActive);

    cmd.bind_pipeline(&pipeline);
    cmd.draw(3, 1, 0, 0).unwrap();
    cmd.end_render_pass();
    assert_eq!(color.layout(), ImageLayout::ShaderReadOnly);

    let commands = fixture.commands(&cmd);
    assert!(commands.contains(&NativeCommand::SetViewport(Viewport::from_extent(
        frame_buffer.extent()
    ))));
    assert!(commands.contains(&NativeCommand::SetScissor(Rect2d::from_extent(
        frame_buffer.extent()
    ))));
}

#[test]
fn test_rebinding_same_pipeline_records_nothing() {
    let fixture = Fixture::new();
    let (render_pass, frame_buffer, _) = fixture.render_target();
    let pipeline = fixture.graphics_pipeline(&render_pass);
    let mut cmd = fixture.recording();
    cmd.begin_render_pass(&frame_buffer);
    cmd.bind_pipeline(&pipeline);
    cmd.bind_pipeline(&pipeline);

    let commands = fixture.commands(&cmd);
    assert_eq!(
        count(&commands, |c| matches!(c, NativeCommand::BindPipeline { .. })),
        1
    );
}

#[test]
fn test_dispatch_after_render_pass_with_same_compute_pipeline() {
    let fixture = Fixture::new();
    let (_, frame_buffer, _) = fixture.render_target();
    let layout = fixture.layout(&[DescriptorSetLayoutBinding::new(
        0,
        DescriptorKind::StorageBuffer,
    )]);
    let pipeline = fixture.compute_pipeline(&layout);
    let storage = fixture.buffer(64, BufferUsage::STORAGE);
    let mut cmd = fixture.recording();

    cmd.bind_pipeline(&pipeline);
    cmd.bind_buffer(0, 0, &storage);
    cmd.dispatch(1, 1, 1).unwrap();
    cmd.begin_render_pass(&frame_buffer);
    cmd.end_render_pass();
    assert_eq!(cmd.state(), RecordingState::ComputeActive);

    cmd.bind_pipeline(&pipeline);
    cmd.dispatch(2, 1, 1).unwrap();

    let commands = fixture.commands(&cmd);
    assert_eq!(
        count(&commands, |c| matches!(c, NativeCommand::Dispatch { .. })),
        2
    );
    assert_eq!(
        count(&commands, |c| matches!(c, NativeCommand::BindPipeline { .. })),
        1
    );
}

#[test]
#[should_panic(expected = "compute pipeline bound inside a render pass")]
fn test_compute_pipeline_inside_render_pass_panics() {
    let fixture = Fixture::new();
    let (_, frame_buffer, _) = fixture.render_target();
    let layout = fixture.layout(&[]);
    let compute = fixture.compute_pipeline(&layout);
    let mut cmd = fixture.recording();
    cmd.begin_render_pass(&frame_buffer);
    cmd.bind_pipeline(&compute);
}

#[rstest]
#[case::inside_range(ShaderStages::VERTEX, 0, 16, true)]
#[case::past_end(ShaderStages::VERTEX, 8, 16, false)]
#[case::wrong_stage(ShaderStages::FRAGMENT, 0, 4, false)]
fn test_push_constant_ranges(
    #[case] stages: ShaderStages,
    #[case] offset: u32,
    #[case] len: usize,
    #[case] accepted: bool,
) {
    let fixture = Fixture::new();
    let (render_pass, frame_buffer, _) = fixture.render_target();
    let pipeline = fixture.graphics_pipeline(&render_pass);
    let mut cmd = fixture.command_list(false);
    cmd.begin_commands().unwrap();
    cmd.begin_render_pass(&frame_buffer);
    cmd.bind_pipeline(&pipeline);
    cmd.push_constants(stages, offset, &vec![0u8; len]);

    let commands = fixture.commands(&cmd);
    let recorded = count(&commands, |c| matches!(c, NativeCommand::PushConstants { .. }));
    assert_eq!(recorded == 1, accepted);
}

#[test]
fn test_vertex_buffer_requires_vertex_usage() {
    let fixture = Fixture::new();
    let vertices = fixture.buffer(256, BufferUsage::VERTEX);
    let uniforms = fixture.buffer(256, BufferUsage::UNIFORM);
    let mut cmd = fixture.command_list(false);
    cmd.begin_commands().unwrap();
    cmd.bind_vertex_buffer(0, &vertices, 0);
    cmd.bind_vertex_buffer(1, &uniforms, 0);
    cmd.bind_vertex_buffer(MAX_VERTEX_BUFFER_BINDINGS as u32, &vertices, 0);

    let commands = fixture.commands(&cmd);
    assert_eq!(
        count(&commands, |c| matches!(c, NativeCommand::BindVertexBuffer { .. })),
        1
    );
}

// ============================================================================
// Descriptor commit
// ============================================================================

#[test]
fn test_identical_rebind_does_not_rewrite() {
    let fixture = Fixture::new();
    let layout = fixture.layout(&[DescriptorSetLayoutBinding::new(
        0,
        DescriptorKind::UniformBuffer,
    )]);
    let pipeline = fixture.compute_pipeline(&layout);
    let uniforms = fixture.buffer(256, BufferUsage::UNIFORM);
    let mut cmd = fixture.recording();

    cmd.bind_pipeline(&pipeline);
    cmd.bind_buffer(0, 0, &uniforms);
    cmd.dispatch(1, 1, 1).unwrap();
    cmd.bind_buffer(0, 0, &uniforms);
    cmd.dispatch(1, 1, 1).unwrap();

    assert_eq!(fixture.dummy.stats().descriptor_update_calls, 1);
    assert_eq!(bound_sets(&fixture.commands(&cmd)).len(), 1);
}

#[test]
fn test_changed_binding_takes_next_cached_set() {
    let fixture = Fixture::new();
    let layout = fixture.layout(&[DescriptorSetLayoutBinding::new(
        0,
        DescriptorKind::StorageBuffer,
    )]);
    let pipeline = fixture.compute_pipeline(&layout);
    let a = fixture.buffer(256, BufferUsage::STORAGE);
    let b = fixture.buffer(256, BufferUsage::STORAGE);
    let mut cmd = fixture.recording();

    cmd.bind_pipeline(&pipeline);
    cmd.bind_buffer(0, 0, &a);
    cmd.dispatch(1, 1, 1).unwrap();
    cmd.bind_buffer(0, 0, &b);
    cmd.dispatch(1, 1, 1).unwrap();

    let sets = bound_sets(&fixture.commands(&cmd));
    assert_eq!(sets.len(), 2);
    assert_ne!(sets[0].0, sets[1].0);
    assert_eq!(fixture.pool.cached_set_count(layout.id()), 2);
    assert_eq!(
        fixture.dummy.descriptor(sets[1].0, 0, 0),
        Some(DescriptorResource::Buffer {
            buffer: b.handle(),
            offset: 0,
            range: 256,
        })
    );
}

#[test]
fn test_cached_sets_reused_after_recycle() {
    let fixture = Fixture::new();
    let layout = fixture.layout(&[DescriptorSetLayoutBinding::new(
        0,
        DescriptorKind::UniformBuffer,
    )]);
    let pipeline = fixture.compute_pipeline(&layout);
    let uniforms = fixture.buffer(256, BufferUsage::UNIFORM);
    let mut cmd = fixture.recording();

    let mut first_sets = Vec::new();
    for _ in 0..2 {
        cmd.bind_pipeline(&pipeline);
        cmd.bind_buffer(0, 0, &uniforms);
        cmd.dispatch(1, 1, 1).unwrap();
        cmd.end_commands().unwrap();
        first_sets.push(bound_sets(&fixture.commands(&cmd))[0].0);
        cmd.recycle();
        cmd.begin_commands().unwrap();
    }

    assert_eq!(first_sets[0], first_sets[1]);
    assert_eq!(fixture.dummy.stats().descriptor_sets_allocated, 1);
}

#[test]
fn test_dynamic_offset_change_rebinds_without_rewrite() {
    let fixture = Fixture::new();
    let layout = fixture.layout(&[DescriptorSetLayoutBinding::new(
        0,
        DescriptorKind::UniformBufferDynamic,
    )]);
    let pipeline = fixture.compute_pipeline(&layout);
    let ring = fixture.buffer(1024, BufferUsage::UNIFORM | BufferUsage::DYNAMIC);
    let mut cmd = fixture.recording();

    cmd.bind_pipeline(&pipeline);
    cmd.bind_buffer_dynamic(0, 0, &ring, 0, 256);
    cmd.dispatch(1, 1, 1).unwrap();
    cmd.bind_buffer_dynamic(0, 0, &ring, 256, 256);
    cmd.dispatch(1, 1, 1).unwrap();

    let sets = bound_sets(&fixture.commands(&cmd));
    assert_eq!(fixture.dummy.stats().descriptor_update_calls, 1);
    assert_eq!(sets.len(), 2);
    assert_eq!(sets[0].0, sets[1].0);
    assert_eq!(sets[0].1, vec![0]);
    assert_eq!(sets[1].1, vec![256]);
    assert_eq!(
        fixture.dummy.descriptor(sets[0].0, 0, 0),
        Some(DescriptorResource::Buffer {
            buffer: ring.handle(),
            offset: 0,
            range: 256,
        })
    );
}

#[test]
fn test_shrunk_array_tail_gets_placeholders() {
    let fixture = Fixture::new();
    let layout = fixture.layout(&[
        DescriptorSetLayoutBinding::new(0, DescriptorKind::SampledImage).with_count(4),
    ]);
    let pipeline = fixture.compute_pipeline(&layout);
    let textures: Vec<_> = (0..3).map(|_| fixture.texture()).collect();
    let mut cmd = fixture.recording();

    cmd.bind_pipeline(&pipeline);
    cmd.bind_images(0, 0, &textures);
    cmd.dispatch(1, 1, 1).unwrap();
    cmd.end_commands().unwrap();
    let first = bound_sets(&fixture.commands(&cmd))[0].0;
    assert_eq!(
        fixture.dummy.descriptor(first, 0, 2),
        Some(DescriptorResource::Image {
            image: textures[2].handle(),
            sampler: None,
            layout: ImageLayout::ShaderReadOnly,
        })
    );

    cmd.recycle();
    cmd.begin_commands().unwrap();
    cmd.bind_pipeline(&pipeline);
    cmd.bind_images(0, 0, &textures[..1]);
    cmd.dispatch(1, 1, 1).unwrap();

    let second = bound_sets(&fixture.commands(&cmd))[0].0;
    assert_eq!(first, second, "cached set is reused");
    let placeholder = DescriptorResource::Image {
        image: fixture.placeholders.image.handle(),
        sampler: None,
        layout: ImageLayout::ShaderReadOnly,
    };
    for element in 1..4 {
        assert_eq!(fixture.dummy.descriptor(second, 0, element), Some(placeholder));
    }
}

#[test]
fn test_bindless_binding_only_covers_high_water() {
    let fixture = Fixture::new();
    let layout = fixture.layout(&[
        DescriptorSetLayoutBinding::new(0, DescriptorKind::StorageBuffer).bindless(64),
    ]);
    let pipeline = fixture.compute_pipeline(&layout);
    let buffers: Vec<_> = (0..5)
        .map(|_| fixture.buffer(64, BufferUsage::STORAGE))
        .collect();
    let mut cmd = fixture.recording();

    cmd.bind_pipeline(&pipeline);
    cmd.bind_buffers(0, 0, &buffers);
    cmd.dispatch(1, 1, 1).unwrap();
    cmd.bind_buffers(0, 0, &buffers[..2]);
    cmd.dispatch(1, 1, 1).unwrap();

    let set = bound_sets(&fixture.commands(&cmd))[1].0;
    assert!(matches!(
        fixture.dummy.descriptor(set, 0, 4),
        Some(DescriptorResource::Buffer { buffer, .. }) if buffer == fixture.placeholders.buffer.handle()
    ));
    assert_eq!(fixture.dummy.descriptor(set, 0, 5), None);
}

#[test]
fn test_bindless_tail_cleared_when_array_shrinks_across_recordings() {
    let fixture = Fixture::new();
    let layout = fixture.layout(&[
        DescriptorSetLayoutBinding::new(0, DescriptorKind::StorageBuffer).bindless(64),
    ]);
    let pipeline = fixture.compute_pipeline(&layout);
    let buffers: Vec<_> = (0..4)
        .map(|_| fixture.buffer(64, BufferUsage::STORAGE))
        .collect();

    let mut cmd = fixture.recording();
    cmd.bind_pipeline(&pipeline);
    cmd.bind_buffers(0, 0, &buffers);
    cmd.dispatch(1, 1, 1).unwrap();
    cmd.end_commands().unwrap();
    let first = bound_sets(&fixture.commands(&cmd))[0].0;

    cmd.recycle();
    cmd.begin_commands().unwrap();
    cmd.bind_pipeline(&pipeline);
    cmd.bind_buffers(0, 0, &buffers[..2]);
    cmd.dispatch(1, 1, 1).unwrap();

    let second = bound_sets(&fixture.commands(&cmd))[0].0;
    assert_eq!(first, second, "cached set is reused");
    let placeholder = fixture.placeholders.buffer.handle();
    for element in 2..4 {
        assert!(matches!(
            fixture.dummy.descriptor(second, 0, element),
            Some(DescriptorResource::Buffer { buffer, .. }) if buffer == placeholder
        ));
    }
    assert_eq!(fixture.dummy.descriptor(second, 0, 4), None);
}

#[test]
fn test_unbound_set_written_with_placeholders_in_one_call() {
    let fixture = Fixture::new();
    let layout = fixture.layout(&[
        DescriptorSetLayoutBinding::new(0, DescriptorKind::UniformBuffer),
        DescriptorSetLayoutBinding::new(1, DescriptorKind::CombinedImageSampler),
        DescriptorSetLayoutBinding::new(2, DescriptorKind::StorageImage),
        DescriptorSetLayoutBinding::new(3, DescriptorKind::Sampler),
        DescriptorSetLayoutBinding::new(4, DescriptorKind::AccelerationStructure),
    ]);
    let pipeline = fixture.compute_pipeline(&layout);
    let mut cmd = fixture.recording();

    cmd.bind_pipeline(&pipeline);
    cmd.dispatch(1, 1, 1).unwrap();

    let stats = fixture.dummy.stats();
    assert_eq!(stats.descriptor_update_calls, 1);
    assert_eq!(stats.descriptor_writes, 4);
    let set = bound_sets(&fixture.commands(&cmd))[0].0;
    assert_eq!(
        fixture.dummy.descriptor(set, 2, 0),
        Some(DescriptorResource::Image {
            image: fixture.placeholders.image.handle(),
            sampler: None,
            layout: ImageLayout::General,
        })
    );
    assert_eq!(fixture.dummy.descriptor(set, 4, 0), None);
}

#[test]
fn test_pipeline_with_new_layout_rewrites_set() {
    let fixture = Fixture::new();
    let first_layout = fixture.layout(&[DescriptorSetLayoutBinding::new(
        0,
        DescriptorKind::UniformBuffer,
    )]);
    let second_layout = fixture.layout(&[
        DescriptorSetLayoutBinding::new(0, DescriptorKind::UniformBuffer),
        DescriptorSetLayoutBinding::new(1, DescriptorKind::Sampler),
    ]);
    let first = fixture.compute_pipeline(&first_layout);
    let second = fixture.compute_pipeline(&second_layout);
    let uniforms = fixture.buffer(128, BufferUsage::UNIFORM);
    let mut cmd = fixture.recording();

    cmd.bind_pipeline(&first);
    cmd.bind_buffer(0, 0, &uniforms);
    cmd.dispatch(1, 1, 1).unwrap();
    cmd.bind_pipeline(&second);
    cmd.dispatch(1, 1, 1).unwrap();

    assert_eq!(fixture.dummy.stats().descriptor_update_calls, 2);
    assert_eq!(fixture.pool.cached_set_count(second_layout.id()), 1);
}

#[test]
fn test_bind_image_transitions_to_shader_read() {
    let fixture = Fixture::new();
    let texture = fixture.texture();
    let sampler = fixture.sampler();
    let mut cmd = fixture.recording();

    cmd.bind_sampled_image(0, 0, &texture, &sampler);
    assert_eq!(texture.layout(), ImageLayout::ShaderReadOnly);

    let storage = fixture.image(ImageDescriptor::new_2d(
        4,
        4,
        ImageFormat::Rgba8Unorm,
        ImageUsage::STORAGE,
    ));
    cmd.bind_image(0, 1, &storage);
    assert_eq!(storage.layout(), ImageLayout::General);
}

#[test]
#[should_panic(expected = "bound inside a render pass")]
fn test_bind_unready_image_inside_render_pass_panics() {
    let fixture = Fixture::new();
    let (_, frame_buffer, _) = fixture.render_target();
    let texture = fixture.texture();
    let mut cmd = fixture.recording();
    cmd.begin_render_pass(&frame_buffer);
    cmd.bind_image(0, 0, &texture);
}

#[rstest]
#[case::set_out_of_range(DESCRIPTOR_SET_COUNT as u32, 0)]
#[case::binding_out_of_range(0, BINDINGS_PER_DESCRIPTOR_SET as u32)]
#[should_panic(expected = "out of range")]
fn test_binding_indices_are_checked(#[case] set: u32, #[case] binding: u32) {
    let fixture = Fixture::new();
    let buffer = fixture.buffer(64, BufferUsage::UNIFORM);
    let mut cmd = fixture.recording();
    cmd.bind_buffer(set, binding, &buffer);
}

// ============================================================================
// Transfers and barriers
// ============================================================================

#[test]
fn test_copy_buffer_to_image_transitions_destination() {
    let fixture = Fixture::new();
    let staging = fixture.buffer(64, BufferUsage::COPY_SRC);
    let texture = fixture.texture();
    let mut cmd = fixture.recording();

    cmd.copy_buffer_to_image(&staging, 0, &texture, 0);

    assert_eq!(texture.layout(), ImageLayout::TransferDst);
    let commands = fixture.commands(&cmd);
    assert!(matches!(commands[0], NativeCommand::PipelineBarrier { .. }));
    assert!(matches!(commands[1], NativeCommand::CopyBufferToImage { .. }));
}

#[test]
fn test_generate_mip_maps_blits_every_level() {
    let fixture = Fixture::new();
    let image = fixture.image(
        ImageDescriptor::new_2d(
            16,
            16,
            ImageFormat::Rgba8Unorm,
            ImageUsage::SAMPLED | ImageUsage::COPY_SRC | ImageUsage::COPY_DST,
        )
        .with_mip_mapping(),
    );
    assert_eq!(image.mip_levels(), 5);
    let mut cmd = fixture.recording();

    cmd.generate_mip_maps(&image);

    let commands = fixture.commands(&cmd);
    assert_eq!(
        count(&commands, |c| matches!(c, NativeCommand::BlitImage { .. })),
        4
    );
    assert_eq!(image.layout(), ImageLayout::ShaderReadOnly);
}

#[test]
fn test_update_buffer_size_limit() {
    let fixture = Fixture::new();
    let buffer = fixture.buffer(2 * MAX_UPDATE_BUFFER_SIZE as u64, BufferUsage::COPY_DST);
    let mut cmd = fixture.command_list(false);
    cmd.begin_commands().unwrap();

    cmd.update_buffer(&buffer, 0, &vec![1u8; MAX_UPDATE_BUFFER_SIZE]);
    cmd.update_buffer(&buffer, 0, &vec![1u8; MAX_UPDATE_BUFFER_SIZE + 4]);

    let commands = fixture.commands(&cmd);
    assert_eq!(
        count(&commands, |c| matches!(c, NativeCommand::UpdateBuffer { .. })),
        1
    );
}

#[test]
fn test_pipeline_barrier_skips_images_already_in_layout() {
    let fixture = Fixture::new();
    let a = fixture.texture();
    let b = fixture.texture();
    let buffer = fixture.buffer(64, BufferUsage::STORAGE);
    let mut cmd = fixture.recording();
    cmd.transition_image(&a, ImageLayout::ShaderReadOnly);

    cmd.pipeline_barrier(
        PipelineStage::TRANSFER,
        PipelineStage::COMPUTE_SHADER,
        &[
            ImageTransition::new(a.clone(), ImageLayout::ShaderReadOnly),
            ImageTransition::new(b.clone(), ImageLayout::ShaderReadOnly),
        ],
        &[BufferTransition {
            buffer: buffer.clone(),
            dst_access: AccessFlags::SHADER_READ,
        }],
    );

    let commands = fixture.commands(&cmd);
    let Some(NativeCommand::PipelineBarrier {
        image_barriers,
        buffer_barriers,
        ..
    }) = commands.last()
    else {
        panic!("expected a pipeline barrier");
    };
    assert_eq!(image_barriers.len(), 1);
    assert_eq!(image_barriers[0].image, b.handle());
    assert_eq!(buffer_barriers.len(), 1);
    assert_eq!(buffer.access(), AccessFlags::SHADER_READ);
}

#[test]
fn test_timestamps_require_timestamp_pool() {
    let fixture = Fixture::new();
    let timestamps = Arc::new(
        QueryPool::new(
            fixture.backend.clone(),
            QueryPoolDescriptor::new(QueryType::Timestamp, 2),
        )
        .unwrap(),
    );
    let occlusion = Arc::new(
        QueryPool::new(
            fixture.backend.clone(),
            QueryPoolDescriptor::new(QueryType::Occlusion, 2),
        )
        .unwrap(),
    );
    let mut cmd = fixture.command_list(false);
    cmd.begin_commands().unwrap();
    cmd.reset_query_pool(&timestamps, 0, 2);
    cmd.write_timestamp(&timestamps, 0, PipelineStage::TOP_OF_PIPE);
    cmd.write_timestamp(&occlusion, 0, PipelineStage::TOP_OF_PIPE);
    cmd.write_timestamp(&timestamps, 2, PipelineStage::TOP_OF_PIPE);

    let commands = fixture.commands(&cmd);
    assert_eq!(
        count(&commands, |c| matches!(c, NativeCommand::WriteTimestamp { .. })),
        1
    );
}

// ============================================================================
// Acceleration structures
// ============================================================================

#[test]
fn test_acceleration_builds_need_ray_tracing() {
    let fixture = Fixture::new();
    let vertices = fixture.buffer(
        36,
        BufferUsage::VERTEX | BufferUsage::ACCELERATION_STRUCTURE_INPUT,
    );
    let blas = Arc::new(Blas::new(
        fixture.backend.clone(),
        BlasDescriptor::new().with_geometry(BlasTriangles::new(vertices, 3)),
    ));
    let mut cmd = fixture.recording();

    assert!(matches!(
        cmd.build_blas(&blas),
        Err(GraphicsError::FeatureNotSupported(_))
    ));
    assert!(!blas.is_built());
}

#[test]
fn test_tlas_build_keeps_instances() {
    let fixture = Fixture::with_backend(DummyBackend::with_capabilities(BackendCapabilities {
        ray_tracing: true,
        ..Default::default()
    }));
    let vertices = fixture.buffer(
        36,
        BufferUsage::VERTEX | BufferUsage::ACCELERATION_STRUCTURE_INPUT,
    );
    let blas = Arc::new(Blas::new(
        fixture.backend.clone(),
        BlasDescriptor::new().with_geometry(BlasTriangles::new(vertices, 3)),
    ));
    let tlas = Arc::new(Tlas::new(fixture.backend.clone(), TlasDescriptor::new(4)));
    let mut cmd = fixture.recording();

    cmd.build_blas(&blas).unwrap();
    cmd.build_tlas(&tlas, vec![TlasInstance::new(blas.clone()); 2])
        .unwrap();

    assert!(blas.is_built());
    assert!(tlas.is_built());
    assert_eq!(tlas.instance_count(), 2);
    assert_eq!(Arc::strong_count(&blas), 3);
}
