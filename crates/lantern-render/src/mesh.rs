//! Built-in meshes and their GPU buffers.
//!
//! The renderer draws one mesh at a time, picked from a fixed table by
//! [`MeshKind`]. Swapping meshes tears down the vertex and index buffers and
//! uploads new ones, which is only legal once the device is idle.

use ash::vk;
use lantern_gpu::{CommandRecorder, DrawGeometry, GpuBuffer, ResourceAllocator, VertexLayout};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Vertex layout shared by every built-in mesh.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub color: [f32; 3],
}

impl Vertex {
    const fn new(position: [f32; 3], color: [f32; 3]) -> Self {
        Self { position, color }
    }

    /// Binding 0, position at location 0, color at location 1.
    pub fn layout() -> VertexLayout {
        VertexLayout::interleaved(std::mem::size_of::<Self>() as u32)
            .attribute(0, vk::Format::R32G32B32_SFLOAT, 0)
            .attribute(1, vk::Format::R32G32B32_SFLOAT, 12)
    }
}

const TRIANGLE_VERTICES: [Vertex; 3] = [
    Vertex::new([0.0, -0.5, 0.0], [1.0, 0.0, 0.0]),
    Vertex::new([-0.5, 0.5, 0.0], [0.0, 0.0, 1.0]),
    Vertex::new([0.5, 0.5, 0.0], [0.0, 1.0, 0.0]),
];
const TRIANGLE_INDICES: [u32; 3] = [0, 1, 2];

const QUAD_VERTICES: [Vertex; 4] = [
    Vertex::new([-0.5, -0.5, 0.0], [1.0, 0.0, 0.0]),
    Vertex::new([-0.5, 0.5, 0.0], [0.0, 1.0, 0.0]),
    Vertex::new([0.5, 0.5, 0.0], [0.0, 0.0, 1.0]),
    Vertex::new([0.5, -0.5, 0.0], [1.0, 1.0, 1.0]),
];
const QUAD_INDICES: [u32; 6] = [0, 1, 2, 2, 3, 0];

/// Geometry of a built-in mesh.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeshData {
    pub vertices: &'static [Vertex],
    pub indices: &'static [u32],
}

impl MeshData {
    pub fn vertex_bytes(&self) -> &'static [u8] {
        bytemuck::cast_slice(self.vertices)
    }

    pub fn index_bytes(&self) -> &'static [u8] {
        bytemuck::cast_slice(self.indices)
    }
}

/// Selects a mesh from the built-in table.
///
/// Press M to cycle through meshes in the viewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MeshKind {
    #[default]
    Triangle,
    Quad,
    /// Nothing is drawn; frames only clear.
    None,
}

impl MeshKind {
    pub const ALL: [Self; 3] = [Self::Triangle, Self::Quad, Self::None];

    /// Cycle to the next mesh.
    #[must_use]
    pub fn next(self) -> Self {
        match self {
            Self::Triangle => Self::Quad,
            Self::Quad => Self::None,
            Self::None => Self::Triangle,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Triangle => "triangle",
            Self::Quad => "quad",
            Self::None => "none",
        }
    }

    /// Table entry for this mesh, `None` for [`MeshKind::None`].
    pub fn data(self) -> Option<MeshData> {
        match self {
            Self::Triangle => Some(MeshData {
                vertices: &TRIANGLE_VERTICES,
                indices: &TRIANGLE_INDICES,
            }),
            Self::Quad => Some(MeshData {
                vertices: &QUAD_VERTICES,
                indices: &QUAD_INDICES,
            }),
            Self::None => None,
        }
    }
}

impl fmt::Display for MeshKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown mesh '{0}' (expected triangle, quad or none)")]
pub struct ParseMeshKindError(String);

impl FromStr for MeshKind {
    type Err = ParseMeshKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| ParseMeshKindError(s.to_string()))
    }
}

/// Device-local vertex and index buffers for the current mesh.
pub struct MeshBuffers {
    kind: MeshKind,
    vertex: Option<GpuBuffer>,
    index: Option<GpuBuffer>,
    vertex_count: u32,
    index_count: u32,
}

impl MeshBuffers {
    /// Upload `kind` through the transfer queue.
    pub fn upload(
        allocator: &mut ResourceAllocator,
        recorder: &mut CommandRecorder,
        kind: MeshKind,
    ) -> lantern_gpu::Result<Self> {
        let Some(data) = kind.data() else {
            return Ok(Self::empty());
        };

        let mut vertex = allocator.upload_buffer(
            recorder,
            data.vertex_bytes(),
            vk::BufferUsageFlags::VERTEX_BUFFER,
            &format!("{kind} vertices"),
        )?;
        let index = match allocator.upload_buffer(
            recorder,
            data.index_bytes(),
            vk::BufferUsageFlags::INDEX_BUFFER,
            &format!("{kind} indices"),
        ) {
            Ok(index) => index,
            Err(e) => {
                allocator.free_buffer(&mut vertex)?;
                return Err(e);
            }
        };

        tracing::debug!(
            "Uploaded {kind} mesh: {} vertices, {} indices",
            data.vertices.len(),
            data.indices.len()
        );

        Ok(Self {
            kind,
            vertex: Some(vertex),
            index: Some(index),
            vertex_count: data.vertices.len() as u32,
            index_count: data.indices.len() as u32,
        })
    }

    /// Buffers for [`MeshKind::None`].
    pub fn empty() -> Self {
        Self {
            kind: MeshKind::None,
            vertex: None,
            index: None,
            vertex_count: 0,
            index_count: 0,
        }
    }

    pub fn kind(&self) -> MeshKind {
        self.kind
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    /// What to bind for the draw, `None` for a clear-only pass.
    pub fn geometry(&self) -> Option<DrawGeometry> {
        match (&self.vertex, &self.index) {
            (Some(vertex), Some(index)) => Some(DrawGeometry {
                vertex_buffer: vertex.buffer,
                index_buffer: index.buffer,
                index_count: self.index_count,
            }),
            _ => None,
        }
    }

    /// Free both buffers.
    ///
    /// The device must be idle.
    pub fn destroy(&mut self, allocator: &mut ResourceAllocator) -> lantern_gpu::Result<()> {
        if let Some(mut vertex) = self.vertex.take() {
            allocator.free_buffer(&mut vertex)?;
        }
        if let Some(mut index) = self.index.take() {
            allocator.free_buffer(&mut index)?;
        }
        self.kind = MeshKind::None;
        self.vertex_count = 0;
        self.index_count = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_visits_every_mesh() {
        let mut kind = MeshKind::Triangle;
        let mut seen = Vec::new();
        for _ in 0..MeshKind::ALL.len() {
            seen.push(kind);
            kind = kind.next();
        }
        assert_eq!(kind, MeshKind::Triangle);
        assert_eq!(seen, MeshKind::ALL);
    }

    #[test]
    fn reselecting_a_mesh_yields_identical_bytes() {
        let first = MeshKind::Triangle.data().unwrap();
        let first_vertices = first.vertex_bytes().to_vec();
        let first_indices = first.index_bytes().to_vec();

        let mut kind = MeshKind::Triangle.next();
        assert_eq!(kind, MeshKind::Quad);
        assert_ne!(kind.data().unwrap().vertex_bytes(), first_vertices.as_slice());

        kind = MeshKind::Triangle;
        let again = kind.data().unwrap();
        assert_eq!(again.vertex_bytes(), first_vertices.as_slice());
        assert_eq!(again.index_bytes(), first_indices.as_slice());
    }

    #[test]
    fn indices_stay_in_range() {
        for kind in MeshKind::ALL {
            if let Some(data) = kind.data() {
                assert_eq!(data.indices.len() % 3, 0);
                assert!(data
                    .indices
                    .iter()
                    .all(|&i| (i as usize) < data.vertices.len()));
            }
        }
        assert!(MeshKind::None.data().is_none());
    }

    #[test]
    fn parses_names_case_insensitively() {
        assert_eq!("Quad".parse::<MeshKind>(), Ok(MeshKind::Quad));
        assert_eq!("none".parse::<MeshKind>(), Ok(MeshKind::None));
        assert!("cube".parse::<MeshKind>().is_err());
    }

    #[test]
    fn vertex_layout_matches_struct() {
        let layout = Vertex::layout();
        assert_eq!(layout.bindings[0].stride, 24);
        assert_eq!(layout.attributes.len(), 2);
        assert_eq!(layout.attributes[1].offset, 12);
    }

    #[test]
    fn empty_buffers_record_clear_only() {
        let buffers = MeshBuffers::empty();
        assert!(buffers.geometry().is_none());
        assert_eq!(buffers.index_count(), 0);
    }
}
