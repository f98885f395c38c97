//! Pipeline and descriptor layout descriptors.
//!
//! Shader reflection lives outside this crate: callers describe the
//! descriptor set layouts and push constant ranges a pipeline expects.

use std::sync::Arc;

use super::common::ShaderStages;
use super::image::ImageFormat;
use crate::config::{DESCRIPTOR_SET_COUNT, MAX_VERTEX_BUFFER_BINDINGS};
use crate::resources::{DescriptorSetLayout, RenderPass};

/// Kind of resource a descriptor binding holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorKind {
    /// Uniform buffer.
    UniformBuffer,
    /// Uniform buffer bound with a dynamic offset.
    UniformBufferDynamic,
    /// Storage buffer.
    StorageBuffer,
    /// Storage buffer bound with a dynamic offset.
    StorageBufferDynamic,
    /// Image and sampler combined in one descriptor.
    CombinedImageSampler,
    /// Sampled image without a sampler.
    SampledImage,
    /// Storage image.
    StorageImage,
    /// Standalone sampler.
    Sampler,
    /// Top-level acceleration structure.
    AccelerationStructure,
}

impl DescriptorKind {
    /// All descriptor kinds, in a fixed order.
    pub const ALL: [DescriptorKind; 9] = [
        DescriptorKind::UniformBuffer,
        DescriptorKind::UniformBufferDynamic,
        DescriptorKind::StorageBuffer,
        DescriptorKind::StorageBufferDynamic,
        DescriptorKind::CombinedImageSampler,
        DescriptorKind::SampledImage,
        DescriptorKind::StorageImage,
        DescriptorKind::Sampler,
        DescriptorKind::AccelerationStructure,
    ];

    /// Stable index of the kind.
    pub fn index(self) -> usize {
        Self::ALL.iter().position(|k| *k == self).unwrap_or(0)
    }

    /// Whether the binding consumes a dynamic offset.
    pub fn is_dynamic(self) -> bool {
        matches!(
            self,
            DescriptorKind::UniformBufferDynamic | DescriptorKind::StorageBufferDynamic
        )
    }

    /// Whether the binding holds a buffer.
    pub fn is_buffer(self) -> bool {
        matches!(
            self,
            DescriptorKind::UniformBuffer
                | DescriptorKind::UniformBufferDynamic
                | DescriptorKind::StorageBuffer
                | DescriptorKind::StorageBufferDynamic
        )
    }

    /// Whether the binding holds an image view.
    pub fn is_image(self) -> bool {
        matches!(
            self,
            DescriptorKind::CombinedImageSampler
                | DescriptorKind::SampledImage
                | DescriptorKind::StorageImage
        )
    }
}

/// One binding of a descriptor set layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorSetLayoutBinding {
    /// Binding index inside the set.
    pub binding: u32,
    /// Kind of descriptor.
    pub kind: DescriptorKind,
    /// Array size (1 for a single descriptor).
    pub count: u32,
    /// Stages the binding is visible to.
    pub stages: ShaderStages,
    /// Variable-sized (bindless) array; `count` is the upper bound.
    pub bindless: bool,
}

impl DescriptorSetLayoutBinding {
    /// Create a single-descriptor binding visible to all stages.
    pub fn new(binding: u32, kind: DescriptorKind) -> Self {
        Self {
            binding,
            kind,
            count: 1,
            stages: ShaderStages::ALL,
            bindless: false,
        }
    }

    /// Turn the binding into a fixed-size array.
    pub fn with_count(mut self, count: u32) -> Self {
        self.count = count;
        self
    }

    /// Turn the binding into a variable-sized array with the given upper bound.
    pub fn bindless(mut self, max_count: u32) -> Self {
        self.count = max_count;
        self.bindless = true;
        self
    }

    /// Restrict the binding to specific stages.
    pub fn with_stages(mut self, stages: ShaderStages) -> Self {
        self.stages = stages;
        self
    }
}

/// Descriptor for creating a descriptor set layout.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct DescriptorSetLayoutDescriptor {
    /// Debug label.
    pub label: Option<String>,
    /// Bindings of the layout.
    pub bindings: Vec<DescriptorSetLayoutBinding>,
}

impl DescriptorSetLayoutDescriptor {
    /// Create an empty layout descriptor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Add a binding.
    pub fn with_binding(mut self, binding: DescriptorSetLayoutBinding) -> Self {
        self.bindings.push(binding);
        self
    }

    /// Descriptor counts required by one set of this layout.
    pub fn descriptor_counts(&self) -> DescriptorCounts {
        let mut counts = DescriptorCounts::default();
        for binding in &self.bindings {
            counts.add(binding.kind, binding.count);
        }
        counts
    }
}

/// Number of descriptors per kind, used to size descriptor pools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DescriptorCounts {
    counts: [u32; DescriptorKind::ALL.len()],
}

impl DescriptorCounts {
    /// Uniform counts for every kind.
    pub fn uniform(count: u32) -> Self {
        Self {
            counts: [count; DescriptorKind::ALL.len()],
        }
    }

    /// Add descriptors of a kind.
    pub fn add(&mut self, kind: DescriptorKind, count: u32) {
        self.counts[kind.index()] += count;
    }

    /// Number of descriptors of a kind.
    pub fn get(&self, kind: DescriptorKind) -> u32 {
        self.counts[kind.index()]
    }

    /// Per-kind maximum of two count sets.
    pub fn max(&self, other: &Self) -> Self {
        let mut counts = self.counts;
        for (count, other) in counts.iter_mut().zip(other.counts) {
            *count = (*count).max(other);
        }
        Self { counts }
    }
}

/// Size of a descriptor pool: set capacity and per-kind descriptor capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorPoolSizes {
    /// Maximum number of sets allocated from the pool.
    pub max_sets: u32,
    /// Descriptor capacity per kind.
    pub descriptors: DescriptorCounts,
}

impl DescriptorPoolSizes {
    /// Pool sized for `base` sets and descriptors, grown to fit `required`.
    pub fn fitting(base: u32, required: &DescriptorCounts) -> Self {
        Self {
            max_sets: base,
            descriptors: DescriptorCounts::uniform(base).max(required),
        }
    }
}

/// A push constant range of a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PushConstantRange {
    /// Stages that can read the range.
    pub stages: ShaderStages,
    /// Offset in bytes.
    pub offset: u32,
    /// Size in bytes.
    pub size: u32,
}

/// Pipeline bind point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindPoint {
    /// Graphics pipeline, used inside render passes.
    Graphics,
    /// Compute pipeline, used outside render passes.
    Compute,
}

/// Compiled shader code for one stage.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShaderStageSource {
    /// Stage the code runs in.
    pub stage: ShaderStages,
    /// Backend-specific binary (e.g. SPIR-V).
    pub code: Vec<u8>,
    /// Entry point name.
    pub entry_point: String,
}

impl ShaderStageSource {
    /// Create a shader stage from compiled code.
    pub fn new(stage: ShaderStages, code: impl Into<Vec<u8>>, entry_point: impl Into<String>) -> Self {
        Self {
            stage,
            code: code.into(),
            entry_point: entry_point.into(),
        }
    }
}

/// A vertex buffer binding of a graphics pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexBinding {
    /// Binding slot.
    pub binding: u32,
    /// Stride between vertices in bytes.
    pub stride: u32,
}

/// Primitive assembly topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PrimitiveTopology {
    /// Independent triangles.
    #[default]
    TriangleList,
    /// Triangle strip.
    TriangleStrip,
    /// Independent lines.
    LineList,
    /// Points.
    PointList,
}

/// Kind-specific part of a pipeline descriptor.
#[derive(Debug, Clone)]
pub enum PipelineKind {
    /// Graphics pipeline.
    Graphics {
        /// Render pass the pipeline is compatible with.
        render_pass: Arc<RenderPass>,
        /// Vertex buffer bindings.
        vertex_bindings: Vec<VertexBinding>,
        /// Primitive topology.
        topology: PrimitiveTopology,
        /// Color formats written, used when no render pass attachment is known.
        color_formats: Vec<ImageFormat>,
    },
    /// Compute pipeline.
    Compute,
}

/// Descriptor for creating a pipeline.
#[derive(Debug, Clone)]
pub struct PipelineDescriptor {
    /// Debug label.
    pub label: Option<String>,
    /// Graphics or compute specific state.
    pub kind: PipelineKind,
    /// Shader stages.
    pub shaders: Vec<ShaderStageSource>,
    /// Expected descriptor set layout per set index.
    pub set_layouts: [Option<Arc<DescriptorSetLayout>>; DESCRIPTOR_SET_COUNT],
    /// Push constant ranges.
    pub push_constants: Vec<PushConstantRange>,
}

impl PipelineDescriptor {
    /// Create a graphics pipeline descriptor for a render pass.
    pub fn graphics(render_pass: Arc<RenderPass>) -> Self {
        Self {
            label: None,
            kind: PipelineKind::Graphics {
                render_pass,
                vertex_bindings: Vec::new(),
                topology: PrimitiveTopology::default(),
                color_formats: Vec::new(),
            },
            shaders: Vec::new(),
            set_layouts: Default::default(),
            push_constants: Vec::new(),
        }
    }

    /// Create a compute pipeline descriptor.
    pub fn compute() -> Self {
        Self {
            label: None,
            kind: PipelineKind::Compute,
            shaders: Vec::new(),
            set_layouts: Default::default(),
            push_constants: Vec::new(),
        }
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Add a shader stage.
    pub fn with_shader(mut self, shader: ShaderStageSource) -> Self {
        self.shaders.push(shader);
        self
    }

    /// Set the layout expected at a set index.
    pub fn with_set_layout(mut self, set: usize, layout: Arc<DescriptorSetLayout>) -> Self {
        self.set_layouts[set] = Some(layout);
        self
    }

    /// Add a push constant range.
    pub fn with_push_constants(mut self, range: PushConstantRange) -> Self {
        self.push_constants.push(range);
        self
    }

    /// Add a vertex buffer binding (graphics pipelines only).
    pub fn with_vertex_binding(mut self, binding: VertexBinding) -> Self {
        if let PipelineKind::Graphics {
            vertex_bindings, ..
        } = &mut self.kind
        {
            vertex_bindings.push(binding);
        }
        self
    }

    /// Bind point of the pipeline.
    pub fn bind_point(&self) -> BindPoint {
        match self.kind {
            PipelineKind::Graphics { .. } => BindPoint::Graphics,
            PipelineKind::Compute => BindPoint::Compute,
        }
    }

    /// Check the descriptor against the binding limits.
    pub(crate) fn validate(&self) -> Result<(), crate::GraphicsError> {
        if let PipelineKind::Graphics {
            vertex_bindings, ..
        } = &self.kind
            && let Some(binding) = vertex_bindings
                .iter()
                .find(|b| b.binding as usize >= MAX_VERTEX_BUFFER_BINDINGS)
        {
            return Err(crate::GraphicsError::InvalidParameter(format!(
                "vertex binding {} exceeds limit {}",
                binding.binding, MAX_VERTEX_BUFFER_BINDINGS
            )));
        }
        Ok(())
    }
}
