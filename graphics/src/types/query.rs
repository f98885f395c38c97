//! Query pool descriptors.

/// Kind of query stored in a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum QueryType {
    /// GPU timestamps.
    #[default]
    Timestamp,
    /// Occlusion sample counts.
    Occlusion,
}

/// Descriptor for creating a query pool.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryPoolDescriptor {
    /// Debug label.
    pub label: Option<String>,
    /// Kind of query.
    pub query_type: QueryType,
    /// Number of queries in the pool.
    pub count: u32,
}

impl QueryPoolDescriptor {
    /// Create a query pool descriptor.
    pub fn new(query_type: QueryType, count: u32) -> Self {
        Self {
            label: None,
            query_type,
            count,
        }
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}
