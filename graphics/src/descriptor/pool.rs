//! Descriptor set allocation and caching.
//!
//! A [`DescriptorPool`] hands out descriptor sets per layout and keeps every
//! set it ever allocated. Each layout has a cursor into its cached sets;
//! rewinding the cursors once per frame lets the next frame reuse the same
//! physical sets without new allocations, as long as per-layout demand does
//! not exceed the previous peak.
//!
//! ```text
//! layout A: [set0, set1, set2]   counter = 2  -> next call returns set2
//! layout B: [set3]               counter = 1  -> next call allocates set4
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::backend::{DescriptorPoolHandle, DescriptorSetHandle, GpuBackend};
use crate::error::GraphicsError;
use crate::resources::{DescriptorSetLayout, LayoutId};
use crate::types::{DescriptorCounts, DescriptorPoolSizes};

#[derive(Default)]
struct CachedSets {
    sets: Vec<DescriptorSetHandle>,
    counter: usize,
}

#[derive(Default)]
struct PoolState {
    pools: Vec<DescriptorPoolHandle>,
    pool_index: usize,
    cache: HashMap<LayoutId, CachedSets>,
    /// Elements ever written per `(set, binding)` of a variable-sized array.
    /// Outlives the counters so a reused set knows its stale tail.
    written: HashMap<(DescriptorSetHandle, u32), u32>,
}

/// Allocates and caches descriptor sets keyed by layout identity.
///
/// Created with [`GraphicsDevice::create_descriptor_pool`](crate::GraphicsDevice::create_descriptor_pool).
/// Every command list owns one, so recording threads never contend on it.
pub struct DescriptorPool {
    backend: Arc<dyn GpuBackend>,
    pool_size: u32,
    state: Mutex<PoolState>,
}

impl DescriptorPool {
    pub(crate) fn new(backend: Arc<dyn GpuBackend>, pool_size: u32) -> Self {
        Self {
            backend,
            pool_size,
            state: Mutex::new(PoolState::default()),
        }
    }

    /// Next cached set for `layout`, allocating one only when every cached
    /// set of the layout is already in use this epoch.
    pub fn get_cached_set(
        &self,
        layout: &DescriptorSetLayout,
    ) -> Result<DescriptorSetHandle, GraphicsError> {
        let mut state = self.state.lock();
        let exhausted = state
            .cache
            .get(&layout.id())
            .is_none_or(|cached| cached.counter == cached.sets.len());
        if exhausted {
            let set = self.allocate_locked(&mut state, layout)?;
            state.cache.entry(layout.id()).or_default().sets.push(set);
        }
        let cached = state.cache.entry(layout.id()).or_default();
        let set = cached.sets[cached.counter];
        cached.counter += 1;
        Ok(set)
    }

    /// Allocate a new set for `layout`, outside of the cache.
    ///
    /// On pool exhaustion a new backing pool is created and the allocation
    /// retried once. Failure of the retry is fatal.
    pub fn allocate(&self, layout: &DescriptorSetLayout) -> Result<DescriptorSetHandle, GraphicsError> {
        let mut state = self.state.lock();
        self.allocate_locked(&mut state, layout)
    }

    fn allocate_locked(
        &self,
        state: &mut PoolState,
        layout: &DescriptorSetLayout,
    ) -> Result<DescriptorSetHandle, GraphicsError> {
        if state.pools.is_empty() {
            let pool = self.create_backing_pool(layout.descriptor_counts())?;
            state.pools.push(pool);
            state.pool_index = 0;
        }

        match self
            .backend
            .allocate_descriptor_set(state.pools[state.pool_index], layout.handle())
        {
            Err(GraphicsError::OutOfPoolMemory) => {}
            result => return result,
        }

        state.pool_index += 1;
        if state.pool_index == state.pools.len() {
            let pool = self.create_backing_pool(layout.descriptor_counts())?;
            state.pools.push(pool);
            log::debug!(
                "DescriptorPool: grew to {} backing pools",
                state.pools.len()
            );
        }
        self.backend
            .allocate_descriptor_set(state.pools[state.pool_index], layout.handle())
            .map_err(|err| {
                log::error!(
                    "DescriptorPool: allocation for layout {:?} failed on a fresh pool: {err}",
                    layout.id()
                );
                err
            })
    }

    fn create_backing_pool(
        &self,
        required: &DescriptorCounts,
    ) -> Result<DescriptorPoolHandle, GraphicsError> {
        self.backend
            .create_descriptor_pool(&DescriptorPoolSizes::fitting(self.pool_size, required))
    }

    /// Reset every backing pool, invalidating all sets allocated so far.
    pub fn reset(&self) -> Result<(), GraphicsError> {
        let mut state = self.state.lock();
        for pool in &state.pools {
            self.backend.reset_descriptor_pool(*pool)?;
        }
        state.pool_index = 0;
        state.cache.clear();
        state.written.clear();
        Ok(())
    }

    /// Number of leading elements of `binding` in `set` written since the
    /// set was allocated.
    pub(crate) fn written_extent(&self, set: DescriptorSetHandle, binding: u32) -> u32 {
        self.state
            .lock()
            .written
            .get(&(set, binding))
            .copied()
            .unwrap_or(0)
    }

    /// Record that the first `extent` elements of `binding` in `set` hold
    /// descriptors.
    pub(crate) fn note_written(&self, set: DescriptorSetHandle, binding: u32, extent: u32) {
        let mut state = self.state.lock();
        let entry = state.written.entry((set, binding)).or_insert(0);
        *entry = (*entry).max(extent);
    }

    /// Rewind every layout's cursor so the cached sets are reused.
    pub fn reset_allocation_counters(&self) {
        for cached in self.state.lock().cache.values_mut() {
            cached.counter = 0;
        }
    }

    /// Number of sets cached for a layout.
    pub fn cached_set_count(&self, layout: LayoutId) -> usize {
        self.state
            .lock()
            .cache
            .get(&layout)
            .map_or(0, |cached| cached.sets.len())
    }

    /// Number of backing pools.
    pub fn backing_pool_count(&self) -> usize {
        self.state.lock().pools.len()
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        for pool in self.state.get_mut().pools.drain(..) {
            self.backend.destroy_descriptor_pool(pool);
        }
    }
}

impl std::fmt::Debug for DescriptorPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("DescriptorPool")
            .field("pool_size", &self.pool_size)
            .field("backing_pools", &state.pools.len())
            .field("layouts", &state.cache.len())
            .finish()
    }
}

static_assertions::assert_impl_all!(DescriptorPool: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyBackend;
    use crate::types::{DescriptorKind, DescriptorSetLayoutBinding, DescriptorSetLayoutDescriptor};
    use rstest::rstest;

    fn setup(pool_size: u32) -> (Arc<DummyBackend>, DescriptorPool, DescriptorSetLayout) {
        let backend = Arc::new(DummyBackend::new());
        let layout = DescriptorSetLayout::new(
            backend.clone(),
            DescriptorSetLayoutDescriptor::new()
                .with_binding(DescriptorSetLayoutBinding::new(0, DescriptorKind::UniformBuffer)),
        )
        .unwrap();
        let pool = DescriptorPool::new(backend.clone(), pool_size);
        (backend, pool, layout)
    }

    #[test]
    fn test_sets_within_epoch_are_distinct() {
        let (_backend, pool, layout) = setup(16);
        let sets: Vec<_> = (0..5).map(|_| pool.get_cached_set(&layout).unwrap()).collect();
        for (i, a) in sets.iter().enumerate() {
            for b in &sets[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[rstest]
    #[case::same_demand(3, 3)]
    #[case::lower_demand(3, 1)]
    fn test_epochs_reuse_sets(#[case] first: usize, #[case] second: usize) {
        let (backend, pool, layout) = setup(16);
        let previous: Vec<_> = (0..first).map(|_| pool.get_cached_set(&layout).unwrap()).collect();
        let allocated = backend.stats().descriptor_sets_allocated;

        pool.reset_allocation_counters();
        for expected in previous.iter().take(second) {
            assert_eq!(pool.get_cached_set(&layout).unwrap(), *expected);
        }
        assert_eq!(backend.stats().descriptor_sets_allocated, allocated);
    }

    #[test]
    fn test_demand_above_peak_appends() {
        let (_backend, pool, layout) = setup(16);
        pool.get_cached_set(&layout).unwrap();
        pool.reset_allocation_counters();
        pool.get_cached_set(&layout).unwrap();
        pool.get_cached_set(&layout).unwrap();
        assert_eq!(pool.cached_set_count(layout.id()), 2);
    }

    #[test]
    fn test_exhaustion_grows_backing_pools() {
        let (backend, pool, layout) = setup(2);
        for _ in 0..5 {
            pool.get_cached_set(&layout).unwrap();
        }
        assert_eq!(pool.backing_pool_count(), 3);
        assert_eq!(backend.stats().descriptor_pools_created, 3);
    }

    #[test]
    fn test_reset_invalidates_cache_and_reuses_pools() {
        let (backend, pool, layout) = setup(2);
        for _ in 0..4 {
            pool.get_cached_set(&layout).unwrap();
        }
        pool.reset().unwrap();
        assert_eq!(pool.cached_set_count(layout.id()), 0);
        for _ in 0..4 {
            pool.get_cached_set(&layout).unwrap();
        }
        // Backing pools are reused after a reset, not recreated.
        assert_eq!(backend.stats().descriptor_pools_created, 2);
    }

    #[test]
    fn test_written_extent_survives_counter_rewind() {
        let (_backend, pool, layout) = setup(4);
        let set = pool.get_cached_set(&layout).unwrap();
        pool.note_written(set, 0, 4);
        pool.note_written(set, 0, 2);

        pool.reset_allocation_counters();
        assert_eq!(pool.get_cached_set(&layout).unwrap(), set);
        assert_eq!(pool.written_extent(set, 0), 4);

        pool.reset().unwrap();
        assert_eq!(pool.written_extent(set, 0), 0);
    }

    #[test]
    fn test_drop_destroys_backing_pools() {
        let (backend, pool, layout) = setup(4);
        pool.get_cached_set(&layout).unwrap();
        drop(pool);
        assert_eq!(
            backend.live_objects(crate::backend::ObjectKind::DescriptorPool),
            0
        );
    }
}
