//! Descriptor commit: turns the binding table into bound descriptor sets.
//!
//! Runs before every draw and dispatch. A set is only rewritten when its
//! bindings changed or the bound pipeline expects a different layout; a
//! rewrite takes the next cached set of the layout from the list's pool and
//! fills every element of every binding, using placeholders for elements
//! that are not bound.

use crate::backend::{DescriptorResource, DescriptorSetHandle, DescriptorWrite, NativeCommand};
use crate::config::DESCRIPTOR_SET_COUNT;
use crate::descriptor::{BindingSlot, BoundBuffer};
use crate::error::{GraphicsError, contract_violation};
use crate::resources::{DescriptorSetLayout, Image};
use crate::types::{DescriptorKind, DescriptorSetLayoutBinding, ImageLayout};

use super::CommandList;

impl CommandList {
    /// Write and bind every descriptor set the bound pipeline uses.
    pub(crate) fn commit_descriptors(&mut self) -> Result<(), GraphicsError> {
        crate::profile_function!();

        let Some(pipeline) = self.pipeline.clone() else {
            return Ok(());
        };

        for set in 0..DESCRIPTOR_SET_COUNT {
            let Some(layout) = pipeline.set_layout(set) else {
                continue;
            };

            let bindings = self.bindings.set(set);
            let stale = bindings.changed
                || bindings.descriptor_set.is_none()
                || bindings.layout != Some(layout.id());
            if stale {
                let descriptor_set = self.descriptor_pool.get_cached_set(layout)?;
                let writes = self.build_writes(set, layout, descriptor_set)?;
                if !writes.is_empty() {
                    self.backend.update_descriptor_sets(&writes);
                }
                let bindings = self.bindings.set_mut(set);
                bindings.changed = false;
                bindings.layout = Some(layout.id());
                bindings.descriptor_set = Some(descriptor_set);
                bindings.rebind = true;
            }

            let bindings = self.bindings.set(set);
            if bindings.rebind
                && let Some(descriptor_set) = bindings.descriptor_set
            {
                let dynamic_offsets = bindings.dynamic_offsets(layout);
                self.record(NativeCommand::BindDescriptorSet {
                    bind_point: pipeline.bind_point(),
                    pipeline: pipeline.handle(),
                    set: set as u32,
                    descriptor_set,
                    dynamic_offsets,
                });
                self.bindings.set_mut(set).rebind = false;
            }
        }
        Ok(())
    }

    /// Writes covering every binding of `layout`, grouped by descriptor kind.
    fn build_writes(
        &self,
        set: usize,
        layout: &DescriptorSetLayout,
        descriptor_set: DescriptorSetHandle,
    ) -> Result<Vec<DescriptorWrite>, GraphicsError> {
        let mut layout_bindings: Vec<&DescriptorSetLayoutBinding> =
            layout.descriptor().bindings.iter().collect();
        layout_bindings.sort_by_key(|binding| (binding.kind.index(), binding.binding));

        let bindings = self.bindings.set(set);
        let mut writes = Vec::with_capacity(layout_bindings.len());

        for layout_binding in layout_bindings {
            let index = layout_binding.binding as usize;
            let slot = bindings.slots.get(index).unwrap_or(&BindingSlot::Empty);
            let high_water = bindings.high_water.get(index).copied().unwrap_or(0);

            let mut bound = match self.slot_resources(slot, layout_binding.kind)? {
                Some(resources) => resources,
                None => {
                    contract_violation(
                        self.validation,
                        &format!(
                            "binding ({set}, {}) expects {:?} but holds a different resource kind",
                            layout_binding.binding, layout_binding.kind
                        ),
                    );
                    Vec::new()
                }
            };
            if bound.len() > layout_binding.count as usize {
                contract_violation(
                    self.validation,
                    &format!(
                        "binding ({set}, {}) holds {} elements, layout declares {}",
                        layout_binding.binding,
                        bound.len(),
                        layout_binding.count
                    ),
                );
                bound.truncate(layout_binding.count as usize);
            }

            let written = bound.len() as u32;
            if !bound.is_empty() {
                writes.push(DescriptorWrite {
                    set: descriptor_set,
                    binding: layout_binding.binding,
                    first_element: 0,
                    kind: layout_binding.kind,
                    resources: bound,
                });
            }

            // Variable-sized arrays only need the elements ever written into
            // this physical set, by this recording or an earlier one; anything
            // past that is never read.
            let end = if layout_binding.bindless {
                high_water.max(
                    self.descriptor_pool
                        .written_extent(descriptor_set, layout_binding.binding),
                )
            } else {
                layout_binding.count
            }
            .min(layout_binding.count);

            if written < end
                && let Some(placeholder) = self.placeholder(layout_binding.kind)
            {
                writes.push(DescriptorWrite {
                    set: descriptor_set,
                    binding: layout_binding.binding,
                    first_element: written,
                    kind: layout_binding.kind,
                    resources: vec![placeholder; (end - written) as usize],
                });
            }
            if layout_binding.bindless {
                self.descriptor_pool.note_written(
                    descriptor_set,
                    layout_binding.binding,
                    written.max(end),
                );
            }
        }
        Ok(writes)
    }

    /// Descriptor resources of a slot, or `None` when the slot does not fit
    /// a binding of `kind`.
    fn slot_resources(
        &self,
        slot: &BindingSlot,
        kind: DescriptorKind,
    ) -> Result<Option<Vec<DescriptorResource>>, GraphicsError> {
        let resources = match slot {
            BindingSlot::Empty => Some(Vec::new()),
            BindingSlot::Buffer { bound, dynamic } => (kind.is_buffer()
                && *dynamic == kind.is_dynamic())
            .then(|| vec![buffer_resource(bound, *dynamic)]),
            BindingSlot::BufferArray(items) => (kind.is_buffer() && !kind.is_dynamic())
                .then(|| items.iter().map(|bound| buffer_resource(bound, false)).collect()),
            BindingSlot::Image(image) => {
                matches!(kind, DescriptorKind::SampledImage | DescriptorKind::StorageImage)
                    .then(|| vec![image_resource(image, None, kind)])
            }
            BindingSlot::ImageArray(images) => {
                matches!(kind, DescriptorKind::SampledImage | DescriptorKind::StorageImage)
                    .then(|| {
                        images
                            .iter()
                            .map(|image| image_resource(image, None, kind))
                            .collect()
                    })
            }
            BindingSlot::SampledImage { image, sampler } => (kind
                == DescriptorKind::CombinedImageSampler)
                .then(|| vec![image_resource(image, Some(sampler.handle()), kind)]),
            BindingSlot::Sampler(sampler) => (kind == DescriptorKind::Sampler)
                .then(|| vec![DescriptorResource::Sampler(sampler.handle())]),
            BindingSlot::SamplerArray(samplers) => (kind == DescriptorKind::Sampler).then(|| {
                samplers
                    .iter()
                    .map(|sampler| DescriptorResource::Sampler(sampler.handle()))
                    .collect()
            }),
            BindingSlot::Tlas(tlas) => {
                if kind != DescriptorKind::AccelerationStructure {
                    return Ok(None);
                }
                Some(vec![DescriptorResource::AccelerationStructure(tlas.handle()?)])
            }
        };
        Ok(resources)
    }

    /// Resource written into unbound elements of a binding of `kind`.
    ///
    /// Acceleration structures have no placeholder; their unbound elements
    /// are left untouched.
    fn placeholder(&self, kind: DescriptorKind) -> Option<DescriptorResource> {
        let placeholders = &self.placeholders;
        match kind {
            DescriptorKind::UniformBuffer
            | DescriptorKind::UniformBufferDynamic
            | DescriptorKind::StorageBuffer
            | DescriptorKind::StorageBufferDynamic => Some(DescriptorResource::Buffer {
                buffer: placeholders.buffer.handle(),
                offset: 0,
                range: placeholders.buffer.size(),
            }),
            DescriptorKind::CombinedImageSampler => Some(DescriptorResource::Image {
                image: placeholders.image.handle(),
                sampler: Some(placeholders.sampler.handle()),
                layout: ImageLayout::ShaderReadOnly,
            }),
            DescriptorKind::SampledImage => Some(DescriptorResource::Image {
                image: placeholders.image.handle(),
                sampler: None,
                layout: ImageLayout::ShaderReadOnly,
            }),
            DescriptorKind::StorageImage => Some(DescriptorResource::Image {
                image: placeholders.image.handle(),
                sampler: None,
                layout: ImageLayout::General,
            }),
            DescriptorKind::Sampler => Some(DescriptorResource::Sampler(
                placeholders.sampler.handle(),
            )),
            DescriptorKind::AccelerationStructure => None,
        }
    }
}

/// Dynamic ranges are written at offset zero; the real offset is supplied
/// when the set is bound.
fn buffer_resource(bound: &BoundBuffer, dynamic: bool) -> DescriptorResource {
    DescriptorResource::Buffer {
        buffer: bound.buffer.handle(),
        offset: if dynamic { 0 } else { bound.offset },
        range: bound.range,
    }
}

fn image_resource(
    image: &Image,
    sampler: Option<crate::backend::SamplerHandle>,
    kind: DescriptorKind,
) -> DescriptorResource {
    let layout = if kind == DescriptorKind::StorageImage || image.layout() == ImageLayout::General
    {
        ImageLayout::General
    } else {
        ImageLayout::ShaderReadOnly
    };
    DescriptorResource::Image {
        image: image.handle(),
        sampler,
        layout,
    }
}
