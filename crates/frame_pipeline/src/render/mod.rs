//! Rendering
//!
//! `scene` holds the static mesh and per-frame uniform math; `vulkan` holds
//! everything that talks to the driver.

pub mod scene;
pub mod vulkan;

pub use scene::{UniformBufferObject, Vertex, INDICES, VERTICES};
