//! Frame loop
//!
//! [`FrameLoop`] owns the per-frame control flow and nothing else. The GPU
//! work behind each step is supplied by a [`FrameDevice`], which lets the
//! ordering rules be exercised without a driver.

use super::error::{VulkanError, VulkanResult};
use super::swapchain::{AcquireStatus, PresentStatus};

/// The GPU operations one frame is made of, addressed by frame slot
pub trait FrameDevice {
    /// Block until the slot's in-flight fence signals; `Ok(false)` on timeout
    fn wait_for_slot(&mut self, slot: usize, timeout_ns: u64) -> VulkanResult<bool>;

    /// Acquire the next swapchain image, signaling the slot's image-available semaphore
    fn acquire_image(&mut self, slot: usize) -> VulkanResult<AcquireStatus>;

    /// Consume the image-available signal of an image that will not be rendered
    fn release_acquired_image(&mut self, slot: usize) -> VulkanResult<()>;

    /// Tear down and recreate everything that depends on the surface size
    fn rebuild_swapchain(&mut self) -> VulkanResult<()>;

    /// Unsignal the slot's in-flight fence
    fn reset_slot_fence(&mut self, slot: usize) -> VulkanResult<()>;

    /// Reset and re-record the slot's command buffer for `image_index`
    fn record_commands(&mut self, slot: usize, image_index: u32) -> VulkanResult<()>;

    /// Write this frame's uniforms into the slot's buffer
    fn update_uniforms(&mut self, slot: usize) -> VulkanResult<()>;

    /// Submit the slot's command buffer
    fn submit(&mut self, slot: usize) -> VulkanResult<()>;

    /// Present `image_index` once the slot's render-finished semaphore signals
    fn present(&mut self, slot: usize, image_index: u32) -> VulkanResult<PresentStatus>;
}

/// What a call to [`FrameLoop::draw_frame`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// The frame was submitted and handed to the presentation engine
    Presented {
        /// Slot used for this frame
        slot: usize,
        /// Swapchain image rendered to
        image_index: u32,
        /// Presentation result; staleness here is only advisory
        present: PresentStatus,
    },
    /// The swapchain was rebuilt instead of drawing
    Rebuilt,
}

/// Cycles frame slots and sequences wait, acquire, record, submit and present
#[derive(Debug)]
pub struct FrameLoop {
    frames_in_flight: usize,
    current_frame: usize,
    framebuffer_resized: bool,
    fence_timeout_ns: u64,
}

impl FrameLoop {
    /// Loop over `frames_in_flight` slots, waiting at most `fence_timeout_ns` per fence
    pub fn new(frames_in_flight: usize, fence_timeout_ns: u64) -> Self {
        Self {
            frames_in_flight: frames_in_flight.max(1),
            current_frame: 0,
            framebuffer_resized: false,
            fence_timeout_ns,
        }
    }

    /// Number of frame slots
    pub fn frames_in_flight(&self) -> usize {
        self.frames_in_flight
    }

    /// Slot the next frame will use
    pub fn current_frame(&self) -> usize {
        self.current_frame
    }

    /// Record that the window was resized; the next frame rebuilds
    pub fn notify_resized(&mut self) {
        self.framebuffer_resized = true;
    }

    /// Whether a resize is waiting to be handled
    pub fn resize_pending(&self) -> bool {
        self.framebuffer_resized
    }

    /// Run one frame
    pub fn draw_frame<D: FrameDevice + ?Sized>(&mut self, device: &mut D) -> VulkanResult<FrameOutcome> {
        let slot = self.current_frame;

        if !device.wait_for_slot(slot, self.fence_timeout_ns)? {
            return Err(VulkanError::FrameTimeout {
                slot,
                timeout_ns: self.fence_timeout_ns,
            });
        }

        let acquired = device.acquire_image(slot)?;
        let image_index = match acquired {
            AcquireStatus::Success(index) if !self.framebuffer_resized => index,
            stale => {
                log::debug!("Rebuilding swapchain (acquire: {:?}, resized: {})", stale, self.framebuffer_resized);
                self.framebuffer_resized = false;
                if matches!(stale, AcquireStatus::Success(_) | AcquireStatus::Suboptimal(_)) {
                    device.release_acquired_image(slot)?;
                }
                device.rebuild_swapchain()?;
                return Ok(FrameOutcome::Rebuilt);
            }
        };

        // Only reached on the path that submits
        device.reset_slot_fence(slot)?;
        device.record_commands(slot, image_index)?;
        device.update_uniforms(slot)?;
        device.submit(slot)?;

        self.current_frame = (slot + 1) % self.frames_in_flight;

        let present = device.present(slot, image_index)?;
        if present.is_stale() {
            log::warn!("Present reported {:?}; next acquire will rebuild", present);
        }

        Ok(FrameOutcome::Presented {
            slot,
            image_index,
            present,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Call {
        Wait(usize),
        Acquire(usize),
        Release(usize),
        Rebuild,
        Reset(usize),
        Record(usize, u32),
        Update(usize),
        Submit(usize),
        Present(usize, u32),
    }

    #[derive(Default)]
    struct MockDevice {
        calls: Vec<Call>,
        acquire_results: VecDeque<AcquireStatus>,
        present_results: VecDeque<PresentStatus>,
        fence_times_out: bool,
        next_image: u32,
    }

    impl FrameDevice for MockDevice {
        fn wait_for_slot(&mut self, slot: usize, _timeout_ns: u64) -> VulkanResult<bool> {
            self.calls.push(Call::Wait(slot));
            Ok(!self.fence_times_out)
        }

        fn acquire_image(&mut self, slot: usize) -> VulkanResult<AcquireStatus> {
            self.calls.push(Call::Acquire(slot));
            Ok(self.acquire_results.pop_front().unwrap_or_else(|| {
                let image = self.next_image;
                self.next_image = (self.next_image + 1) % 3;
                AcquireStatus::Success(image)
            }))
        }

        fn release_acquired_image(&mut self, slot: usize) -> VulkanResult<()> {
            self.calls.push(Call::Release(slot));
            Ok(())
        }

        fn rebuild_swapchain(&mut self) -> VulkanResult<()> {
            self.calls.push(Call::Rebuild);
            Ok(())
        }

        fn reset_slot_fence(&mut self, slot: usize) -> VulkanResult<()> {
            self.calls.push(Call::Reset(slot));
            Ok(())
        }

        fn record_commands(&mut self, slot: usize, image_index: u32) -> VulkanResult<()> {
            self.calls.push(Call::Record(slot, image_index));
            Ok(())
        }

        fn update_uniforms(&mut self, slot: usize) -> VulkanResult<()> {
            self.calls.push(Call::Update(slot));
            Ok(())
        }

        fn submit(&mut self, slot: usize) -> VulkanResult<()> {
            self.calls.push(Call::Submit(slot));
            Ok(())
        }

        fn present(&mut self, slot: usize, image_index: u32) -> VulkanResult<PresentStatus> {
            self.calls.push(Call::Present(slot, image_index));
            Ok(self.present_results.pop_front().unwrap_or(PresentStatus::Success))
        }
    }

    #[test]
    fn test_frame_steps_run_in_order() {
        let mut device = MockDevice::default();
        let mut frames = FrameLoop::new(2, u64::MAX);

        let outcome = frames.draw_frame(&mut device).unwrap();

        assert_eq!(
            device.calls,
            vec![
                Call::Wait(0),
                Call::Acquire(0),
                Call::Reset(0),
                Call::Record(0, 0),
                Call::Update(0),
                Call::Submit(0),
                Call::Present(0, 0),
            ]
        );
        assert_eq!(
            outcome,
            FrameOutcome::Presented {
                slot: 0,
                image_index: 0,
                present: PresentStatus::Success
            }
        );
        assert_eq!(frames.current_frame(), 1);
    }

    #[test]
    fn test_slots_cycle() {
        let mut device = MockDevice::default();
        let mut frames = FrameLoop::new(2, u64::MAX);

        let slots: Vec<usize> = (0..5)
            .map(|_| match frames.draw_frame(&mut device).unwrap() {
                FrameOutcome::Presented { slot, .. } => slot,
                FrameOutcome::Rebuilt => panic!("unexpected rebuild"),
            })
            .collect();

        assert_eq!(slots, vec![0, 1, 0, 1, 0]);
    }

    #[test]
    fn test_out_of_date_rebuilds_and_skips_frame() {
        let mut device = MockDevice {
            acquire_results: VecDeque::from([AcquireStatus::OutOfDate]),
            ..Default::default()
        };
        let mut frames = FrameLoop::new(2, u64::MAX);

        assert_eq!(frames.draw_frame(&mut device).unwrap(), FrameOutcome::Rebuilt);
        assert_eq!(device.calls, vec![Call::Wait(0), Call::Acquire(0), Call::Rebuild]);
        assert_eq!(frames.current_frame(), 0);
    }

    #[test]
    fn test_suboptimal_acquire_rebuilds() {
        let mut device = MockDevice {
            acquire_results: VecDeque::from([AcquireStatus::Suboptimal(2)]),
            ..Default::default()
        };
        let mut frames = FrameLoop::new(2, u64::MAX);

        assert_eq!(frames.draw_frame(&mut device).unwrap(), FrameOutcome::Rebuilt);
        assert_eq!(
            device.calls,
            vec![Call::Wait(0), Call::Acquire(0), Call::Release(0), Call::Rebuild]
        );
    }

    #[test]
    fn test_resize_flag_rebuilds_once() {
        let mut device = MockDevice::default();
        let mut frames = FrameLoop::new(2, u64::MAX);
        frames.notify_resized();

        assert_eq!(frames.draw_frame(&mut device).unwrap(), FrameOutcome::Rebuilt);
        assert!(!frames.resize_pending());
        assert!(!device.calls.contains(&Call::Reset(0)));

        assert!(matches!(
            frames.draw_frame(&mut device).unwrap(),
            FrameOutcome::Presented { slot: 0, .. }
        ));
    }

    #[test]
    fn test_present_staleness_is_advisory() {
        let mut device = MockDevice {
            present_results: VecDeque::from([PresentStatus::OutOfDate]),
            ..Default::default()
        };
        let mut frames = FrameLoop::new(2, u64::MAX);

        let outcome = frames.draw_frame(&mut device).unwrap();
        assert!(matches!(
            outcome,
            FrameOutcome::Presented {
                present: PresentStatus::OutOfDate,
                ..
            }
        ));
        assert!(!device.calls.contains(&Call::Rebuild));
        assert_eq!(frames.current_frame(), 1);
    }

    #[test]
    fn test_fence_timeout_is_fatal() {
        let mut device = MockDevice {
            fence_times_out: true,
            ..Default::default()
        };
        let mut frames = FrameLoop::new(2, 1_000_000);

        let result = frames.draw_frame(&mut device);
        assert!(matches!(
            result,
            Err(VulkanError::FrameTimeout {
                slot: 0,
                timeout_ns: 1_000_000
            })
        ));
        assert_eq!(device.calls, vec![Call::Wait(0)]);
    }

    #[test]
    fn test_fence_reset_always_follows_wait_for_same_slot() {
        let mut device = MockDevice {
            acquire_results: VecDeque::from([
                AcquireStatus::Success(0),
                AcquireStatus::OutOfDate,
                AcquireStatus::Success(1),
                AcquireStatus::Suboptimal(0),
                AcquireStatus::Success(2),
            ]),
            ..Default::default()
        };
        let mut frames = FrameLoop::new(2, u64::MAX);
        for _ in 0..8 {
            frames.draw_frame(&mut device).unwrap();
        }

        let mut waited: Option<usize> = None;
        for call in &device.calls {
            match *call {
                Call::Wait(slot) => waited = Some(slot),
                Call::Reset(slot) => {
                    assert_eq!(waited, Some(slot), "fence reset without a prior wait");
                    waited = None;
                }
                Call::Rebuild => waited = None,
                _ => {}
            }
        }
    }

    #[test]
    fn test_zero_slots_is_clamped() {
        let frames = FrameLoop::new(0, u64::MAX);
        assert_eq!(frames.frames_in_flight(), 1);
    }
}
