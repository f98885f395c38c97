//! Descriptor set layouts and pipelines.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::backend::{DescriptorSetLayoutHandle, GpuBackend, PipelineHandle};
use crate::config::{BINDINGS_PER_DESCRIPTOR_SET, DESCRIPTOR_SET_COUNT};
use crate::error::GraphicsError;
use crate::types::{
    BindPoint, DescriptorCounts, DescriptorSetLayoutBinding, DescriptorSetLayoutDescriptor,
    PipelineDescriptor, PipelineKind, PushConstantRange,
};

use super::RenderPass;

static NEXT_LAYOUT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a descriptor set layout.
///
/// Identifiers are never reused, so a cache keyed by them cannot confuse a
/// destroyed layout with a new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LayoutId(u64);

impl LayoutId {
    fn next() -> Self {
        Self(NEXT_LAYOUT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw identifier value.
    pub fn raw(self) -> u64 {
        self.0
    }
}

/// A descriptor set layout.
pub struct DescriptorSetLayout {
    backend: Arc<dyn GpuBackend>,
    id: LayoutId,
    handle: DescriptorSetLayoutHandle,
    descriptor: DescriptorSetLayoutDescriptor,
    counts: DescriptorCounts,
}

impl DescriptorSetLayout {
    pub(crate) fn new(
        backend: Arc<dyn GpuBackend>,
        descriptor: DescriptorSetLayoutDescriptor,
    ) -> Result<Self, GraphicsError> {
        for binding in &descriptor.bindings {
            if binding.binding as usize >= BINDINGS_PER_DESCRIPTOR_SET {
                return Err(GraphicsError::InvalidParameter(format!(
                    "binding {} exceeds limit {}",
                    binding.binding, BINDINGS_PER_DESCRIPTOR_SET
                )));
            }
            if binding.count == 0 {
                return Err(GraphicsError::InvalidParameter(format!(
                    "binding {} has zero descriptors",
                    binding.binding
                )));
            }
        }
        let handle = backend.create_descriptor_set_layout(&descriptor)?;
        Ok(Self {
            backend,
            id: LayoutId::next(),
            handle,
            counts: descriptor.descriptor_counts(),
            descriptor,
        })
    }

    /// Unique identity of the layout.
    pub fn id(&self) -> LayoutId {
        self.id
    }

    /// Backend handle.
    pub fn handle(&self) -> DescriptorSetLayoutHandle {
        self.handle
    }

    /// Get the layout descriptor.
    pub fn descriptor(&self) -> &DescriptorSetLayoutDescriptor {
        &self.descriptor
    }

    /// Descriptor counts one set of this layout consumes.
    pub fn descriptor_counts(&self) -> &DescriptorCounts {
        &self.counts
    }

    /// Look up a binding by index.
    pub fn binding(&self, binding: u32) -> Option<&DescriptorSetLayoutBinding> {
        self.descriptor.bindings.iter().find(|b| b.binding == binding)
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        self.backend.destroy_descriptor_set_layout(self.handle);
    }
}

impl std::fmt::Debug for DescriptorSetLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DescriptorSetLayout")
            .field("id", &self.id)
            .field("bindings", &self.descriptor.bindings.len())
            .field("label", &self.descriptor.label)
            .finish()
    }
}

/// A graphics or compute pipeline.
pub struct Pipeline {
    backend: Arc<dyn GpuBackend>,
    handle: PipelineHandle,
    bind_point: BindPoint,
    set_layouts: [Option<Arc<DescriptorSetLayout>>; DESCRIPTOR_SET_COUNT],
    push_constants: Vec<PushConstantRange>,
    render_pass: Option<Arc<RenderPass>>,
    label: Option<String>,
}

impl Pipeline {
    pub(crate) fn new(
        backend: Arc<dyn GpuBackend>,
        descriptor: PipelineDescriptor,
    ) -> Result<Self, GraphicsError> {
        descriptor.validate()?;
        let handle = backend.create_pipeline(&descriptor)?;
        let render_pass = match &descriptor.kind {
            PipelineKind::Graphics { render_pass, .. } => Some(Arc::clone(render_pass)),
            PipelineKind::Compute => None,
        };
        Ok(Self {
            backend,
            handle,
            bind_point: descriptor.bind_point(),
            set_layouts: descriptor.set_layouts,
            push_constants: descriptor.push_constants,
            render_pass,
            label: descriptor.label,
        })
    }

    /// Backend handle.
    pub fn handle(&self) -> PipelineHandle {
        self.handle
    }

    /// Graphics or compute.
    pub fn bind_point(&self) -> BindPoint {
        self.bind_point
    }

    /// Layout expected at a set index.
    pub fn set_layout(&self, set: usize) -> Option<&Arc<DescriptorSetLayout>> {
        self.set_layouts.get(set).and_then(Option::as_ref)
    }

    /// Push constant ranges.
    pub fn push_constants(&self) -> &[PushConstantRange] {
        &self.push_constants
    }

    /// Render pass a graphics pipeline was created for.
    pub fn render_pass(&self) -> Option<&Arc<RenderPass>> {
        self.render_pass.as_ref()
    }

    /// Get the pipeline label, if set.
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.backend.destroy_pipeline(self.handle);
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("handle", &self.handle)
            .field("bind_point", &self.bind_point)
            .field("label", &self.label)
            .finish()
    }
}

static_assertions::assert_impl_all!(DescriptorSetLayout: Send, Sync);
static_assertions::assert_impl_all!(Pipeline: Send, Sync);
