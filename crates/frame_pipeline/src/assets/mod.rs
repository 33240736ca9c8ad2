//! Asset loading
//!
//! Decoding only; nothing here touches the GPU.

pub mod image_loader;

pub use image_loader::ImageData;

/// Asset loading errors
#[derive(thiserror::Error, Debug)]
pub enum AssetError {
    /// Decoding failed
    #[error("Failed to load asset: {0}")]
    LoadFailed(String),
}
