//! Acceleration structure descriptors.

use std::sync::Arc;

use crate::resources::{Blas, Buffer};

/// Triangle geometry of a bottom-level acceleration structure.
#[derive(Debug, Clone)]
pub struct BlasTriangles {
    /// Vertex positions (three `f32` per vertex at `vertex_stride`).
    pub vertex_buffer: Arc<Buffer>,
    /// Number of vertices.
    pub vertex_count: u32,
    /// Stride between vertices in bytes.
    pub vertex_stride: u64,
    /// Optional 32-bit index buffer.
    pub index_buffer: Option<Arc<Buffer>>,
    /// Number of indices, or vertices when not indexed.
    pub primitive_vertex_count: u32,
    /// Geometry is opaque (no any-hit invocation).
    pub opaque: bool,
}

impl BlasTriangles {
    /// Non-indexed triangle geometry with a tightly packed `vec3` layout.
    pub fn new(vertex_buffer: Arc<Buffer>, vertex_count: u32) -> Self {
        Self {
            vertex_buffer,
            vertex_count,
            vertex_stride: 12,
            index_buffer: None,
            primitive_vertex_count: vertex_count,
            opaque: true,
        }
    }

    /// Use an index buffer.
    pub fn with_indices(mut self, index_buffer: Arc<Buffer>, index_count: u32) -> Self {
        self.index_buffer = Some(index_buffer);
        self.primitive_vertex_count = index_count;
        self
    }

    /// Number of triangles.
    pub fn triangle_count(&self) -> u32 {
        self.primitive_vertex_count / 3
    }
}

/// Descriptor for creating a bottom-level acceleration structure.
#[derive(Debug, Clone, Default)]
pub struct BlasDescriptor {
    /// Debug label.
    pub label: Option<String>,
    /// Geometries of the structure.
    pub geometries: Vec<BlasTriangles>,
    /// The structure may be rebuilt in place.
    pub allow_update: bool,
}

impl BlasDescriptor {
    /// Create an empty descriptor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Add triangle geometry.
    pub fn with_geometry(mut self, geometry: BlasTriangles) -> Self {
        self.geometries.push(geometry);
        self
    }

    /// Estimated storage size in bytes.
    pub fn storage_size(&self) -> u64 {
        let triangles: u64 = self
            .geometries
            .iter()
            .map(|g| u64::from(g.triangle_count()))
            .sum();
        (triangles * 64).max(256)
    }
}

/// One instance of a top-level acceleration structure.
#[derive(Debug, Clone)]
pub struct TlasInstance {
    /// Referenced bottom-level structure.
    pub blas: Arc<Blas>,
    /// Row-major 3x4 transform.
    pub transform: [f32; 12],
    /// Value exposed to shaders as the instance custom index.
    pub custom_index: u32,
    /// Visibility mask.
    pub mask: u8,
}

impl TlasInstance {
    /// Identity transform.
    pub const IDENTITY: [f32; 12] = [1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0];

    /// Instance with identity transform and full mask.
    pub fn new(blas: Arc<Blas>) -> Self {
        Self {
            blas,
            transform: Self::IDENTITY,
            custom_index: 0,
            mask: 0xFF,
        }
    }

    /// Set the transform.
    pub fn with_transform(mut self, transform: [f32; 12]) -> Self {
        self.transform = transform;
        self
    }

    /// Set the custom index.
    pub fn with_custom_index(mut self, index: u32) -> Self {
        self.custom_index = index;
        self
    }
}

/// Descriptor for creating a top-level acceleration structure.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TlasDescriptor {
    /// Debug label.
    pub label: Option<String>,
    /// Maximum number of instances a build may contain.
    pub max_instances: u32,
}

impl TlasDescriptor {
    /// Create a descriptor.
    pub fn new(max_instances: u32) -> Self {
        Self {
            label: None,
            max_instances,
        }
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Estimated storage size in bytes.
    pub fn storage_size(&self) -> u64 {
        u64::from(self.max_instances.max(1)) * 128
    }
}
