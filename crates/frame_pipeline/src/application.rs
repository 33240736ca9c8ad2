//! Top-level driver
//!
//! Owns the window, the renderer and the frame loop, and pumps window events
//! into the loop once per displayed frame.

use thiserror::Error;

use crate::config::{AppConfig, ConfigError};
use crate::render::vulkan::{FrameLoop, FrameOutcome, VulkanError, VulkanRenderer, Window};

/// Application-level errors
#[derive(Error, Debug)]
pub enum AppError {
    /// Configuration failed to load or validate
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Renderer bring-up or a frame failed
    #[error("Renderer error: {0}")]
    Vulkan(#[from] VulkanError),
}

/// Window, renderer and frame loop wired together
pub struct Application {
    frame_loop: FrameLoop,
    // Dropped before the window its surface belongs to
    renderer: VulkanRenderer,
    window: Window,
}

impl Application {
    /// Open the window and bring the renderer up
    pub fn new(config: &AppConfig) -> Result<Self, AppError> {
        log::info!("Initializing application...");
        config.validate()?;

        let mut window = Window::new(&config.window.title, config.window.width, config.window.height)
            .map_err(VulkanError::from)?;
        let renderer = VulkanRenderer::new(&mut window, config)?;
        let frame_loop = FrameLoop::new(renderer.frames_in_flight(), config.renderer.fence_timeout_ns());
        log::info!(
            "Running '{}' with {} frames in flight",
            config.window.title,
            frame_loop.frames_in_flight()
        );

        Ok(Self {
            frame_loop,
            renderer,
            window,
        })
    }

    /// Draw frames until the window is closed or a frame fails
    ///
    /// The device is idle when this returns, on success and on failure.
    pub fn run(&mut self) -> Result<(), AppError> {
        log::info!("Starting main loop...");
        let mut presented = 0u64;
        let mut rebuilds = 0u64;

        while !self.window.should_close() {
            self.window.poll_events();
            if self.window.take_resize_event() {
                self.frame_loop.notify_resized();
            }

            let mut context = self.renderer.frame_context(&mut self.window);
            match self.frame_loop.draw_frame(&mut context) {
                Ok(FrameOutcome::Presented { .. }) => presented += 1,
                Ok(FrameOutcome::Rebuilt) => rebuilds += 1,
                Err(e) => {
                    log::error!("Frame failed, shutting down: {}", e);
                    if let Err(idle_error) = self.renderer.wait_idle() {
                        log::error!("Device wait after failed frame: {}", idle_error);
                    }
                    return Err(e.into());
                }
            }
        }

        self.renderer.wait_idle()?;
        log::info!(
            "Main loop finished: {} frames presented, {} swapchain rebuilds",
            presented,
            rebuilds
        );
        Ok(())
    }
}
