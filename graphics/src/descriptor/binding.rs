//! Per-command-list descriptor binding table.
//!
//! The table mirrors what the client bound at every `(set, binding)` slot,
//! plus a dirty flag per set. Binding a value identical to the recorded one
//! leaves the set clean, so redundant rebinds never cost a descriptor write.

use std::sync::Arc;

use crate::backend::DescriptorSetHandle;
use crate::config::{BINDINGS_PER_DESCRIPTOR_SET, DESCRIPTOR_SET_COUNT};
use crate::resources::{Buffer, DescriptorSetLayout, Image, LayoutId, Sampler, Tlas};

/// A buffer range bound to a slot or array element.
#[derive(Clone)]
pub(crate) struct BoundBuffer {
    pub(crate) buffer: Arc<Buffer>,
    pub(crate) offset: u64,
    pub(crate) range: u64,
}

impl BoundBuffer {
    fn same_resource(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.buffer, &other.buffer) && self.range == other.range
    }

    fn same(&self, other: &Self) -> bool {
        self.same_resource(other) && self.offset == other.offset
    }
}

/// Content of one binding slot.
#[derive(Clone, Default)]
pub(crate) enum BindingSlot {
    #[default]
    Empty,
    /// Buffer range; `dynamic` ranges supply their offset at bind time.
    Buffer { bound: BoundBuffer, dynamic: bool },
    /// Sampled or storage image without a sampler.
    Image(Arc<Image>),
    /// Image combined with a sampler.
    SampledImage {
        image: Arc<Image>,
        sampler: Arc<Sampler>,
    },
    Sampler(Arc<Sampler>),
    Tlas(Arc<Tlas>),
    BufferArray(Vec<BoundBuffer>),
    ImageArray(Vec<Arc<Image>>),
    SamplerArray(Vec<Arc<Sampler>>),
}

impl BindingSlot {
    /// Number of array elements the slot writes.
    pub(crate) fn element_count(&self) -> u32 {
        match self {
            BindingSlot::Empty => 0,
            BindingSlot::BufferArray(items) => items.len() as u32,
            BindingSlot::ImageArray(items) => items.len() as u32,
            BindingSlot::SamplerArray(items) => items.len() as u32,
            _ => 1,
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        matches!(self, BindingSlot::Empty)
    }

    fn same(&self, other: &Self) -> bool {
        match (self, other) {
            (BindingSlot::Empty, BindingSlot::Empty) => true,
            (
                BindingSlot::Buffer { bound: a, dynamic: da },
                BindingSlot::Buffer { bound: b, dynamic: db },
            ) => da == db && a.same(b),
            (BindingSlot::Image(a), BindingSlot::Image(b)) => Arc::ptr_eq(a, b),
            (
                BindingSlot::SampledImage { image: ia, sampler: sa },
                BindingSlot::SampledImage { image: ib, sampler: sb },
            ) => Arc::ptr_eq(ia, ib) && Arc::ptr_eq(sa, sb),
            (BindingSlot::Sampler(a), BindingSlot::Sampler(b)) => Arc::ptr_eq(a, b),
            (BindingSlot::Tlas(a), BindingSlot::Tlas(b)) => Arc::ptr_eq(a, b),
            (BindingSlot::BufferArray(a), BindingSlot::BufferArray(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.same(y))
            }
            (BindingSlot::ImageArray(a), BindingSlot::ImageArray(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| Arc::ptr_eq(x, y))
            }
            (BindingSlot::SamplerArray(a), BindingSlot::SamplerArray(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| Arc::ptr_eq(x, y))
            }
            _ => false,
        }
    }
}

/// Outcome of writing a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BindOutcome {
    /// Identical to the recorded value.
    Unchanged,
    /// Only a dynamic offset moved; the set must be rebound, not rewritten.
    OffsetChanged,
    /// The set must be rewritten.
    Changed,
}

/// Bindings of one descriptor set index.
pub(crate) struct SetBindings {
    pub(crate) slots: Vec<BindingSlot>,
    /// Largest element count ever written per slot since the last reset.
    pub(crate) high_water: Vec<u32>,
    pub(crate) changed: bool,
    pub(crate) rebind: bool,
    /// Layout the current physical set was acquired for.
    pub(crate) layout: Option<LayoutId>,
    pub(crate) descriptor_set: Option<DescriptorSetHandle>,
}

impl SetBindings {
    fn new() -> Self {
        Self {
            slots: vec![BindingSlot::Empty; BINDINGS_PER_DESCRIPTOR_SET],
            high_water: vec![0; BINDINGS_PER_DESCRIPTOR_SET],
            changed: false,
            rebind: false,
            layout: None,
            descriptor_set: None,
        }
    }

    pub(crate) fn has_bindings(&self) -> bool {
        self.slots.iter().any(|slot| !slot.is_empty())
    }

    /// Dynamic offsets for every dynamic binding of `layout`, in binding order.
    ///
    /// Dynamic bindings left unbound contribute an offset of zero.
    pub(crate) fn dynamic_offsets(&self, layout: &DescriptorSetLayout) -> Vec<u32> {
        let mut dynamic: Vec<u32> = layout
            .descriptor()
            .bindings
            .iter()
            .filter(|binding| binding.kind.is_dynamic())
            .map(|binding| binding.binding)
            .collect();
        dynamic.sort_unstable();
        dynamic
            .into_iter()
            .map(|binding| match &self.slots[binding as usize] {
                BindingSlot::Buffer {
                    bound,
                    dynamic: true,
                } => bound.offset as u32,
                _ => 0,
            })
            .collect()
    }
}

/// Binding table of a command list: `set × binding → slot`.
pub(crate) struct BindingTable {
    sets: Vec<SetBindings>,
}

impl BindingTable {
    pub(crate) fn new() -> Self {
        Self {
            sets: (0..DESCRIPTOR_SET_COUNT).map(|_| SetBindings::new()).collect(),
        }
    }

    /// Record `slot` at `(set, binding)`. Indices must be in range.
    pub(crate) fn bind(&mut self, set: usize, binding: usize, slot: BindingSlot) -> BindOutcome {
        let bindings = &mut self.sets[set];
        let current = &mut bindings.slots[binding];

        if current.same(&slot) {
            return BindOutcome::Unchanged;
        }
        if let (
            BindingSlot::Buffer {
                bound: old,
                dynamic: true,
            },
            BindingSlot::Buffer {
                bound: new,
                dynamic: true,
            },
        ) = (&mut *current, &slot)
            && old.same_resource(new)
        {
            old.offset = new.offset;
            bindings.rebind = true;
            return BindOutcome::OffsetChanged;
        }

        let count = slot.element_count();
        bindings.high_water[binding] = bindings.high_water[binding].max(count);
        *current = slot;
        bindings.changed = true;
        BindOutcome::Changed
    }

    pub(crate) fn set(&self, set: usize) -> &SetBindings {
        &self.sets[set]
    }

    pub(crate) fn set_mut(&mut self, set: usize) -> &mut SetBindings {
        &mut self.sets[set]
    }

    /// Forget every binding and physical set.
    pub(crate) fn reset(&mut self) {
        for set in &mut self.sets {
            *set = SetBindings::new();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DummyBackend, GpuBackend};
    use crate::types::{
        BufferDescriptor, BufferUsage, DescriptorKind, DescriptorSetLayoutBinding,
        DescriptorSetLayoutDescriptor,
    };
    use std::sync::Weak;

    fn buffer(backend: &Arc<dyn GpuBackend>) -> Arc<Buffer> {
        Arc::new(
            Buffer::new(
                Weak::new(),
                backend.clone(),
                BufferDescriptor::new(256, BufferUsage::UNIFORM | BufferUsage::DYNAMIC),
            )
            .unwrap(),
        )
    }

    fn slot(buffer: &Arc<Buffer>, offset: u64, dynamic: bool) -> BindingSlot {
        BindingSlot::Buffer {
            bound: BoundBuffer {
                buffer: buffer.clone(),
                offset,
                range: 64,
            },
            dynamic,
        }
    }

    #[test]
    fn test_identical_bind_is_noop() {
        let backend: Arc<dyn GpuBackend> = Arc::new(DummyBackend::new());
        let a = buffer(&backend);
        let mut table = BindingTable::new();

        assert_eq!(table.bind(0, 0, slot(&a, 0, false)), BindOutcome::Changed);
        table.set_mut(0).changed = false;
        assert_eq!(table.bind(0, 0, slot(&a, 0, false)), BindOutcome::Unchanged);
        assert!(!table.set(0).changed);
    }

    #[test]
    fn test_different_resource_marks_dirty() {
        let backend: Arc<dyn GpuBackend> = Arc::new(DummyBackend::new());
        let (a, b) = (buffer(&backend), buffer(&backend));
        let mut table = BindingTable::new();
        table.bind(1, 3, slot(&a, 0, false));
        table.set_mut(1).changed = false;
        assert_eq!(table.bind(1, 3, slot(&b, 0, false)), BindOutcome::Changed);
        assert!(table.set(1).changed);
        assert!(!table.set(0).changed);
    }

    #[test]
    fn test_dynamic_offset_change_only_rebinds() {
        let backend: Arc<dyn GpuBackend> = Arc::new(DummyBackend::new());
        let a = buffer(&backend);
        let mut table = BindingTable::new();
        table.bind(0, 0, slot(&a, 0, true));
        table.set_mut(0).changed = false;
        table.set_mut(0).rebind = false;

        assert_eq!(table.bind(0, 0, slot(&a, 128, true)), BindOutcome::OffsetChanged);
        assert!(!table.set(0).changed);
        assert!(table.set(0).rebind);

        let layout = DescriptorSetLayout::new(
            backend.clone(),
            DescriptorSetLayoutDescriptor::new()
                .with_binding(DescriptorSetLayoutBinding::new(
                    2,
                    DescriptorKind::StorageBufferDynamic,
                ))
                .with_binding(DescriptorSetLayoutBinding::new(
                    0,
                    DescriptorKind::UniformBufferDynamic,
                )),
        )
        .unwrap();
        assert_eq!(table.set(0).dynamic_offsets(&layout), vec![128, 0]);
    }

    #[test]
    fn test_high_water_tracks_largest_array() {
        let backend: Arc<dyn GpuBackend> = Arc::new(DummyBackend::new());
        let a = buffer(&backend);
        let items = |n| {
            BindingSlot::BufferArray(
                (0..n)
                    .map(|_| BoundBuffer {
                        buffer: a.clone(),
                        offset: 0,
                        range: 64,
                    })
                    .collect(),
            )
        };
        let mut table = BindingTable::new();
        table.bind(2, 1, items(4));
        table.bind(2, 1, items(2));
        assert_eq!(table.set(2).high_water[1], 4);
        assert_eq!(table.set(2).slots[1].element_count(), 2);
    }
}
