//! Vulkan frame pipeline
//!
//! Renders a textured, depth-tested mesh while keeping every device object on a
//! single owner: handle wrappers destroy exactly once, frame slots are fenced
//! before reuse, and the size-dependent object set is rebuilt whenever the
//! swapchain goes stale.

pub mod application;
pub mod assets;
pub mod config;
pub mod foundation;
pub mod render;

pub use application::{AppError, Application};
pub use config::{AppConfig, Config, ConfigError};
pub use render::vulkan::{VulkanError, VulkanResult};
