//! Vulkan error types
//!
//! Swapchain staleness is deliberately absent here: acquire and present report
//! it through [`AcquireStatus`](super::AcquireStatus) and
//! [`PresentStatus`](super::PresentStatus) so callers can match on it.

use ash::vk;
use thiserror::Error;

use super::window::WindowError;
use crate::assets::AssetError;

/// Vulkan-specific error types
#[derive(Error, Debug)]
pub enum VulkanError {
    /// A driver call returned something other than success
    #[error("Vulkan API error during {context}: {result:?}")]
    Api {
        /// Native result code
        result: vk::Result,
        /// What was being attempted
        context: String,
    },

    /// The Vulkan loader library could not be opened
    #[error("Failed to load Vulkan: {0}")]
    Loading(String),

    /// No memory type matches both the type mask and the property flags
    #[error("No suitable memory type for mask {type_bits:#b} with {properties:?}")]
    NoSuitableMemoryType {
        /// Allowed memory types from the resource's requirements
        type_bits: u32,
        /// Requested property flags
        properties: vk::MemoryPropertyFlags,
    },

    /// None of the candidate formats supports the required features
    #[error("No supported format among {candidates:?} for {features:?}")]
    NoSupportedFormat {
        /// Formats that were tried, in preference order
        candidates: Vec<vk::Format>,
        /// Features every candidate was tested for
        features: vk::FormatFeatureFlags,
    },

    /// No physical device satisfies the renderer's requirements
    #[error("No suitable GPU found")]
    NoSuitableDevice,

    /// A required queue family is missing
    #[error("No {0} queue family found")]
    MissingQueueFamily(&'static str),

    /// A required device or instance extension is missing
    #[error("Required extension not supported: {0}")]
    MissingExtension(String),

    /// A required device feature is missing
    #[error("Required device feature not supported: {0}")]
    MissingFeature(&'static str),

    /// The surface cannot create swapchain images with the requested usage
    #[error("Swapchain image usage {requested:?} not supported, surface allows {supported:?}")]
    UnsupportedImageUsage {
        /// Usage the caller asked for
        requested: vk::ImageUsageFlags,
        /// Usage the surface reports in its capabilities
        supported: vk::ImageUsageFlags,
    },

    /// The caller broke an object's usage contract
    #[error("Invalid usage: {reason}")]
    Usage {
        /// Description of why the operation is invalid
        reason: String,
    },

    /// A frame fence did not signal within the configured timeout
    #[error("Frame slot {slot} fence timed out after {timeout_ns} ns")]
    FrameTimeout {
        /// Frame slot whose fence expired
        slot: usize,
        /// Timeout that was applied
        timeout_ns: u64,
    },

    /// Window system failure
    #[error(transparent)]
    Window(#[from] WindowError),

    /// Asset decoding failure
    #[error(transparent)]
    Asset(#[from] AssetError),

    /// File IO failure, e.g. reading shader binaries
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl VulkanError {
    /// Shorthand for a usage error
    pub fn usage(reason: impl Into<String>) -> Self {
        Self::Usage {
            reason: reason.into(),
        }
    }
}

/// Result type for Vulkan operations
pub type VulkanResult<T> = Result<T, VulkanError>;

/// Attach a context string to raw `ash` results
pub trait ResultExt<T> {
    /// Convert a driver result into a [`VulkanResult`] naming the failed step
    fn context(self, context: &str) -> VulkanResult<T>;
}

impl<T> ResultExt<T> for Result<T, vk::Result> {
    fn context(self, context: &str) -> VulkanResult<T> {
        self.map_err(|result| VulkanError::Api {
            result,
            context: context.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_keeps_result_code() {
        let failed: Result<(), vk::Result> = Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        match failed.context("vertex buffer allocation") {
            Err(VulkanError::Api { result, context }) => {
                assert_eq!(result, vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
                assert_eq!(context, "vertex buffer allocation");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_messages_name_the_problem() {
        let err = VulkanError::NoSuitableMemoryType {
            type_bits: 0b1010,
            properties: vk::MemoryPropertyFlags::DEVICE_LOCAL,
        };
        assert!(err.to_string().contains("0b1010"));
        assert_eq!(VulkanError::usage("unmap while unmapped").to_string(), "Invalid usage: unmap while unmapped");
    }
}
