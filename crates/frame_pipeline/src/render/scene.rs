//! Static scene data and per-frame uniforms

use ash::vk;
use bytemuck::{Pod, Zeroable};
use nalgebra::{Matrix4, Point3, Vector3};
use std::mem::{offset_of, size_of};

/// Vertex layout shared with `vertshader.vert`
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    /// Object-space position
    pub pos: [f32; 3],
    /// Per-vertex color
    pub color: [f32; 3],
    /// Texture coordinate
    pub tex_coord: [f32; 2],
}

impl Vertex {
    const fn new(pos: [f32; 3], color: [f32; 3], tex_coord: [f32; 2]) -> Self {
        Self { pos, color, tex_coord }
    }

    /// Vertex buffer binding 0, advanced per vertex
    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding: 0,
            stride: size_of::<Self>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }
    }

    /// Attribute locations 0 (position), 1 (color), 2 (texture coordinate)
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

/// Two stacked textured quads, the second half a unit behind the first
pub const VERTICES: [Vertex; 8] = [
    Vertex::new([-0.5, -0.5, 0.0], [1.0, 0.0, 0.0], [1.0, 0.0]),
    Vertex::new([0.5, -0.5, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0]),
    Vertex::new([0.5, 0.5, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0]),
    Vertex::new([-0.5, 0.5, 0.0], [1.0, 1.0, 1.0], [1.0, 1.0]),
    Vertex::new([-0.5, -0.5, -0.5], [1.0, 0.0, 0.0], [1.0, 0.0]),
    Vertex::new([0.5, -0.5, -0.5], [0.0, 1.0, 0.0], [0.0, 0.0]),
    Vertex::new([0.5, 0.5, -0.5], [0.0, 0.0, 1.0], [0.0, 1.0]),
    Vertex::new([-0.5, 0.5, -0.5], [1.0, 1.0, 1.0], [1.0, 1.0]),
];

/// Triangle list indices into [`VERTICES`]
pub const INDICES: [u16; 12] = [0, 1, 2, 2, 3, 0, 4, 5, 6, 6, 7, 4];

/// Model rotation speed about +Z
const ROTATION_DEGREES_PER_SECOND: f32 = 90.0;
const FIELD_OF_VIEW_DEGREES: f32 = 45.0;
const NEAR_PLANE: f32 = 0.1;
const FAR_PLANE: f32 = 10.0;

/// Per-frame transform block bound at descriptor binding 0
///
/// Three column-major 4x4 matrices, no padding between them.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct UniformBufferObject {
    /// Object to world
    pub model: [[f32; 4]; 4],
    /// World to camera
    pub view: [[f32; 4]; 4],
    /// Camera to Vulkan clip space
    pub proj: [[f32; 4]; 4],
}

impl UniformBufferObject {
    /// Transforms for the spinning scene `elapsed_seconds` after startup
    pub fn at_time(elapsed_seconds: f32, extent: vk::Extent2D) -> Self {
        let angle = (elapsed_seconds * ROTATION_DEGREES_PER_SECOND).to_radians();
        let model = Matrix4::from_axis_angle(&Vector3::z_axis(), angle);

        let view = Matrix4::look_at_rh(
            &Point3::new(2.0, 2.0, 2.0),
            &Point3::origin(),
            &Vector3::z(),
        );

        let aspect = extent.width as f32 / extent.height.max(1) as f32;
        let proj = vulkan_perspective(
            FIELD_OF_VIEW_DEGREES.to_radians(),
            aspect,
            NEAR_PLANE,
            FAR_PLANE,
        );

        Self {
            model: model.into(),
            view: view.into(),
            proj: proj.into(),
        }
    }
}

/// Right-handed perspective with depth mapped to [0, 1] and Y pointing down
pub fn vulkan_perspective(fov_y: f32, aspect: f32, near: f32, far: f32) -> Matrix4<f32> {
    let focal = 1.0 / (fov_y / 2.0).tan();
    let mut proj = Matrix4::zeros();
    proj[(0, 0)] = focal / aspect;
    proj[(1, 1)] = focal;
    proj[(2, 2)] = far / (near - far);
    proj[(2, 3)] = -(far * near) / (far - near);
    proj[(3, 2)] = -1.0;

    // GL-style projections put +Y up; Vulkan clip space has +Y down
    proj[(1, 1)] *= -1.0;
    proj
}
