//! Vertex format and indexed mesh construction
//!
//! Model loaders hand over a flat triangle list; [`MeshData::from_triangles`]
//! collapses bitwise-identical vertices and produces a 32-bit index buffer.

use ash::vk;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::mem::{offset_of, size_of};

/// Vertex as consumed by the model shaders
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct Vertex {
    /// Object space position
    pub pos: [f32; 3],
    /// Per-vertex tint
    pub color: [f32; 3],
    /// Texture coordinate, V pointing down
    pub tex_coord: [f32; 2],
}

unsafe impl bytemuck::Pod for Vertex {}
unsafe impl bytemuck::Zeroable for Vertex {}

impl Vertex {
    /// Create a vertex
    pub const fn new(pos: [f32; 3], color: [f32; 3], tex_coord: [f32; 2]) -> Self {
        Self {
            pos,
            color,
            tex_coord,
        }
    }

    fn bits(&self) -> [u32; 8] {
        [
            self.pos[0].to_bits(),
            self.pos[1].to_bits(),
            self.pos[2].to_bits(),
            self.color[0].to_bits(),
            self.color[1].to_bits(),
            self.color[2].to_bits(),
            self.tex_coord[0].to_bits(),
            self.tex_coord[1].to_bits(),
        ]
    }

    /// Vertex input binding for pipeline creation
    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding: 0,
            stride: size_of::<Self>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }
    }

    /// Attribute layout: position at location 0, color at 1, texture coordinate at 2
    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 3] {
        [
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: offset_of!(Self, pos) as u32,
            },
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 1,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: offset_of!(Self, color) as u32,
            },
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 2,
                format: vk::Format::R32G32_SFLOAT,
                offset: offset_of!(Self, tex_coord) as u32,
            },
        ]
    }
}

// Equality is bitwise so that it agrees with `Hash`. Two vertices that
// differ only in the sign of a zero are distinct.
impl PartialEq for Vertex {
    fn eq(&self, other: &Self) -> bool {
        self.bits() == other.bits()
    }
}

impl Eq for Vertex {}

impl Hash for Vertex {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.bits().hash(state);
    }
}

/// Deduplicated vertices plus the index list that rebuilds the original triangles
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MeshData {
    /// Unique vertices in first-seen order
    pub vertices: Vec<Vertex>,
    /// One index per input vertex
    pub indices: Vec<u32>,
}

impl MeshData {
    /// Build an indexed mesh from a flat triangle list
    pub fn from_triangles(triangles: &[Vertex]) -> Self {
        let mut unique: HashMap<Vertex, u32> = HashMap::with_capacity(triangles.len());
        let mut vertices = Vec::new();
        let mut indices = Vec::with_capacity(triangles.len());

        for vertex in triangles {
            let index = *unique.entry(*vertex).or_insert_with(|| {
                vertices.push(*vertex);
                (vertices.len() - 1) as u32
            });
            indices.push(index);
        }

        log::debug!(
            "Deduplicated {} vertices into {} unique",
            triangles.len(),
            vertices.len()
        );

        Self { vertices, indices }
    }

    /// Number of indices to draw
    pub fn index_count(&self) -> u32 {
        self.indices.len() as u32
    }

    /// Whether there is anything to draw
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vertex(x: f32, u: f32) -> Vertex {
        Vertex::new([x, 0.0, 0.0], [1.0, 1.0, 1.0], [u, 0.0])
    }

    #[test]
    fn test_identical_vertices_share_index() {
        let mesh = MeshData::from_triangles(&[vertex(1.0, 0.5), vertex(1.0, 0.5)]);
        assert_eq!(mesh.vertices.len(), 1);
        assert_eq!(mesh.indices, vec![0, 0]);
    }

    #[test]
    fn test_quad_from_two_triangles() {
        let a = vertex(0.0, 0.0);
        let b = vertex(1.0, 0.0);
        let c = vertex(1.0, 1.0);
        let d = vertex(0.0, 1.0);

        let mesh = MeshData::from_triangles(&[a, b, c, c, d, a]);
        assert_eq!(mesh.vertices, vec![a, b, c, d]);
        assert_eq!(mesh.indices, vec![0, 1, 2, 2, 3, 0]);
        assert_eq!(mesh.index_count(), 6);
    }

    #[test]
    fn test_signed_zero_is_distinct() {
        let mesh = MeshData::from_triangles(&[vertex(0.0, 0.0), vertex(-0.0, 0.0)]);
        assert_eq!(mesh.vertices.len(), 2);
    }

    #[test]
    fn test_empty_input() {
        let mesh = MeshData::from_triangles(&[]);
        assert!(mesh.is_empty());
        assert!(mesh.vertices.is_empty());
    }

    #[test]
    fn test_attribute_offsets() {
        let attributes = Vertex::attribute_descriptions();
        assert_eq!(attributes[0].offset, 0);
        assert_eq!(attributes[1].offset, 12);
        assert_eq!(attributes[2].offset, 24);
        assert_eq!(Vertex::binding_description().stride, 32);
    }
}
