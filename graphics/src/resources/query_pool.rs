//! Query pools.

use std::sync::Arc;

use crate::backend::{GpuBackend, QueryPoolHandle};
use crate::error::GraphicsError;
use crate::types::{QueryPoolDescriptor, QueryType};

/// A pool of GPU queries.
pub struct QueryPool {
    backend: Arc<dyn GpuBackend>,
    handle: QueryPoolHandle,
    descriptor: QueryPoolDescriptor,
}

impl QueryPool {
    pub(crate) fn new(
        backend: Arc<dyn GpuBackend>,
        descriptor: QueryPoolDescriptor,
    ) -> Result<Self, GraphicsError> {
        if descriptor.count == 0 {
            return Err(GraphicsError::InvalidParameter(
                "query pool needs at least one query".to_string(),
            ));
        }
        let handle = backend.create_query_pool(&descriptor)?;
        Ok(Self {
            backend,
            handle,
            descriptor,
        })
    }

    /// Backend handle.
    pub fn handle(&self) -> QueryPoolHandle {
        self.handle
    }

    /// Kind of query.
    pub fn query_type(&self) -> QueryType {
        self.descriptor.query_type
    }

    /// Number of queries.
    pub fn count(&self) -> u32 {
        self.descriptor.count
    }

    /// Read back results of completed queries.
    pub fn results(&self, first_query: u32, count: u32) -> Result<Vec<u64>, GraphicsError> {
        if first_query.saturating_add(count) > self.descriptor.count {
            return Err(GraphicsError::InvalidParameter(format!(
                "queries {}..{} out of range for pool of {}",
                first_query,
                first_query.saturating_add(count),
                self.descriptor.count
            )));
        }
        self.backend.query_results(self.handle, first_query, count)
    }
}

impl Drop for QueryPool {
    fn drop(&mut self) {
        self.backend.destroy_query_pool(self.handle);
    }
}

impl std::fmt::Debug for QueryPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryPool")
            .field("handle", &self.handle)
            .field("type", &self.descriptor.query_type)
            .field("count", &self.descriptor.count)
            .finish()
    }
}

static_assertions::assert_impl_all!(QueryPool: Send, Sync);
