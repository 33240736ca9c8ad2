//! Swapchain rebuild orchestration
//!
//! Everything whose size or format follows the surface is torn down and
//! recreated in a fixed order. Resources that do not depend on the surface
//! (buffers, texture, descriptors, sync objects, command buffers) are never
//! touched here.

use ash::vk;

use super::error::VulkanResult;

/// The surface-dependent half of a renderer
pub trait RebuildTarget {
    /// Current drawable size in pixels
    fn drawable_extent(&mut self) -> vk::Extent2D;

    /// Process pending window events; returns `false` once the window is closing
    fn pump_events(&mut self) -> bool;

    /// Wait until the device has finished all submitted work
    fn wait_device_idle(&mut self) -> VulkanResult<()>;

    /// Release the depth image, its view and memory
    fn destroy_depth_buffer(&mut self);
    /// Release one framebuffer per swapchain image
    fn destroy_framebuffers(&mut self);
    /// Release the pipeline and its layout
    fn destroy_pipeline(&mut self);
    /// Release the render pass
    fn destroy_render_pass(&mut self);
    /// Release the swapchain image views, then the swapchain
    fn destroy_swapchain(&mut self);

    /// Create the swapchain for `extent`; the previous one is already gone
    fn create_swapchain(&mut self, extent: vk::Extent2D) -> VulkanResult<()>;
    /// Create the render pass for the new swapchain format
    fn create_render_pass(&mut self) -> VulkanResult<()>;
    /// Create the pipeline against the new render pass
    fn create_pipeline(&mut self) -> VulkanResult<()>;
    /// Create a depth buffer matching the swapchain extent
    fn create_depth_buffer(&mut self) -> VulkanResult<()>;
    /// Create one framebuffer per swapchain image
    fn create_framebuffers(&mut self) -> VulkanResult<()>;

    /// Drop resize notifications queued before the rebuild finished
    ///
    /// The new swapchain already matches the size they report.
    fn discard_resize_events(&mut self);
}

/// Rebuild all surface-dependent objects
///
/// Spins while the drawable area is zero (a minimized window), then waits for
/// the device to go idle, destroys in dependency order and recreates in the
/// reverse. Resize notifications gathered along the way are discarded so they
/// do not trigger a second rebuild. Returns the new extent, or `None` if the window closed while
/// minimized and nothing was rebuilt.
pub fn rebuild_swapchain<T: RebuildTarget + ?Sized>(target: &mut T) -> VulkanResult<Option<vk::Extent2D>> {
    let mut extent = target.drawable_extent();
    while extent.width == 0 || extent.height == 0 {
        if !target.pump_events() {
            log::debug!("Window closed while minimized; skipping swapchain rebuild");
            return Ok(None);
        }
        extent = target.drawable_extent();
    }

    target.wait_device_idle()?;

    target.destroy_depth_buffer();
    target.destroy_framebuffers();
    target.destroy_pipeline();
    target.destroy_render_pass();
    target.destroy_swapchain();

    target.create_swapchain(extent)?;
    target.create_render_pass()?;
    target.create_pipeline()?;
    target.create_depth_buffer()?;
    target.create_framebuffers()?;
    target.discard_resize_events();

    log::info!("Swapchain rebuilt at {}x{}", extent.width, extent.height);
    Ok(Some(extent))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Step {
        Extent,
        Pump,
        WaitIdle,
        DestroyDepth,
        DestroyFramebuffers,
        DestroyPipeline,
        DestroyRenderPass,
        DestroySwapchain,
        CreateSwapchain(u32, u32),
        CreateRenderPass,
        CreatePipeline,
        CreateDepth,
        CreateFramebuffers,
        DiscardResize,
    }

    /// Ids of the objects a rebuild must replace
    #[derive(Debug, Clone, PartialEq, Eq)]
    struct SurfaceIds {
        swapchain: Option<u64>,
        render_pass: Option<u64>,
        pipeline: Option<u64>,
        depth: Option<u64>,
        framebuffers: Vec<u64>,
    }

    /// Ids of the objects created once at startup
    #[derive(Debug, Clone, PartialEq, Eq)]
    struct StartupIds {
        vertex_buffer: u64,
        index_buffer: u64,
        texture: u64,
        descriptor_pool: u64,
        command_buffers: [u64; 2],
        semaphores: [u64; 4],
        fences: [u64; 2],
    }

    /// Shared id counter: every object ever created gets a distinct id
    #[derive(Default)]
    struct Ids(u64);

    impl Ids {
        fn fresh(&mut self) -> u64 {
            self.0 += 1;
            self.0
        }
    }

    struct MockTarget {
        steps: Vec<Step>,
        extents: VecDeque<vk::Extent2D>,
        window_open: bool,
        pending_resizes: usize,
        ids: Ids,
        surface: SurfaceIds,
        startup: StartupIds,
        /// Step that also recreates the descriptor pool, as a broken renderer would
        miswired: Option<Step>,
    }

    impl MockTarget {
        fn new(extents: &[(u32, u32)]) -> Self {
            let mut ids = Ids::default();
            let startup = StartupIds {
                vertex_buffer: ids.fresh(),
                index_buffer: ids.fresh(),
                texture: ids.fresh(),
                descriptor_pool: ids.fresh(),
                command_buffers: [ids.fresh(), ids.fresh()],
                semaphores: [ids.fresh(), ids.fresh(), ids.fresh(), ids.fresh()],
                fences: [ids.fresh(), ids.fresh()],
            };
            let surface = SurfaceIds {
                swapchain: Some(ids.fresh()),
                render_pass: Some(ids.fresh()),
                pipeline: Some(ids.fresh()),
                depth: Some(ids.fresh()),
                framebuffers: vec![ids.fresh(), ids.fresh(), ids.fresh()],
            };

            Self {
                steps: Vec::new(),
                extents: extents
                    .iter()
                    .map(|&(width, height)| vk::Extent2D { width, height })
                    .collect(),
                window_open: true,
                pending_resizes: 0,
                ids,
                surface,
                startup,
                miswired: None,
            }
        }

        fn record(&mut self, step: Step) {
            self.steps.push(step);
            if self.miswired == Some(step) {
                self.startup.descriptor_pool = self.ids.fresh();
            }
        }
    }

    impl RebuildTarget for MockTarget {
        fn drawable_extent(&mut self) -> vk::Extent2D {
            self.record(Step::Extent);
            self.extents.pop_front().unwrap_or(vk::Extent2D { width: 0, height: 0 })
        }

        fn pump_events(&mut self) -> bool {
            self.record(Step::Pump);
            // Every poll while the size changes queues one more notification
            self.pending_resizes += 1;
            self.window_open
        }

        fn wait_device_idle(&mut self) -> VulkanResult<()> {
            self.record(Step::WaitIdle);
            Ok(())
        }

        fn destroy_depth_buffer(&mut self) {
            self.record(Step::DestroyDepth);
            self.surface.depth = None;
        }

        fn destroy_framebuffers(&mut self) {
            self.record(Step::DestroyFramebuffers);
            self.surface.framebuffers.clear();
        }

        fn destroy_pipeline(&mut self) {
            self.record(Step::DestroyPipeline);
            self.surface.pipeline = None;
        }

        fn destroy_render_pass(&mut self) {
            self.record(Step::DestroyRenderPass);
            self.surface.render_pass = None;
        }

        fn destroy_swapchain(&mut self) {
            self.record(Step::DestroySwapchain);
            self.surface.swapchain = None;
        }

        fn create_swapchain(&mut self, extent: vk::Extent2D) -> VulkanResult<()> {
            self.record(Step::CreateSwapchain(extent.width, extent.height));
            assert!(self.surface.swapchain.is_none(), "old swapchain still alive");
            self.surface.swapchain = Some(self.ids.fresh());
            Ok(())
        }

        fn create_render_pass(&mut self) -> VulkanResult<()> {
            self.record(Step::CreateRenderPass);
            self.surface.render_pass = Some(self.ids.fresh());
            Ok(())
        }

        fn create_pipeline(&mut self) -> VulkanResult<()> {
            self.record(Step::CreatePipeline);
            self.surface.pipeline = Some(self.ids.fresh());
            Ok(())
        }

        fn create_depth_buffer(&mut self) -> VulkanResult<()> {
            self.record(Step::CreateDepth);
            self.surface.depth = Some(self.ids.fresh());
            Ok(())
        }

        fn create_framebuffers(&mut self) -> VulkanResult<()> {
            self.record(Step::CreateFramebuffers);
            self.surface.framebuffers = (0..3).map(|_| self.ids.fresh()).collect();
            Ok(())
        }

        fn discard_resize_events(&mut self) {
            self.record(Step::DiscardResize);
            self.pending_resizes = 0;
        }
    }

    /// Every surface object exists and none of them survived from `before`
    fn surface_replaced(before: &SurfaceIds, after: &SurfaceIds) -> bool {
        let old: Vec<u64> = [before.swapchain, before.render_pass, before.pipeline, before.depth]
            .into_iter()
            .flatten()
            .chain(before.framebuffers.iter().copied())
            .collect();
        let singles = [after.swapchain, after.render_pass, after.pipeline, after.depth];

        singles.iter().all(|id| matches!(id, Some(id) if !old.contains(id)))
            && !after.framebuffers.is_empty()
            && after.framebuffers.iter().all(|id| !old.contains(id))
    }

    #[test]
    fn test_rebuild_order() {
        let mut target = MockTarget::new(&[(1024, 768)]);

        let extent = rebuild_swapchain(&mut target).unwrap();

        assert_eq!(extent, Some(vk::Extent2D { width: 1024, height: 768 }));
        assert_eq!(
            target.steps,
            vec![
                Step::Extent,
                Step::WaitIdle,
                Step::DestroyDepth,
                Step::DestroyFramebuffers,
                Step::DestroyPipeline,
                Step::DestroyRenderPass,
                Step::DestroySwapchain,
                Step::CreateSwapchain(1024, 768),
                Step::CreateRenderPass,
                Step::CreatePipeline,
                Step::CreateDepth,
                Step::CreateFramebuffers,
                Step::DiscardResize,
            ]
        );
    }

    #[test]
    fn test_minimized_window_waits_for_nonzero_extent() {
        let mut target = MockTarget::new(&[(0, 0), (0, 600), (800, 600)]);

        rebuild_swapchain(&mut target).unwrap();

        assert_eq!(
            &target.steps[..6],
            &[Step::Extent, Step::Pump, Step::Extent, Step::Pump, Step::Extent, Step::WaitIdle]
        );
        assert!(target.steps.contains(&Step::CreateSwapchain(800, 600)));
    }

    #[test]
    fn test_resize_events_from_minimized_spin_are_discarded() {
        let mut target = MockTarget::new(&[(0, 0), (0, 0), (800, 600)]);

        rebuild_swapchain(&mut target).unwrap();

        assert_eq!(target.pending_resizes, 0);
        assert_eq!(target.steps.last(), Some(&Step::DiscardResize));
    }

    #[test]
    fn test_closing_while_minimized_skips_rebuild() {
        let mut target = MockTarget::new(&[(0, 0)]);
        target.window_open = false;

        assert_eq!(rebuild_swapchain(&mut target).unwrap(), None);
        assert_eq!(target.steps, vec![Step::Extent, Step::Pump]);
    }

    #[test]
    fn test_only_surface_dependent_handles_change() {
        let mut target = MockTarget::new(&[(640, 480)]);
        let surface_before = target.surface.clone();
        let startup_before = target.startup.clone();

        rebuild_swapchain(&mut target).unwrap();

        assert!(surface_replaced(&surface_before, &target.surface));
        assert_eq!(target.startup, startup_before);
    }

    #[test]
    fn test_stray_startup_replacement_is_detected() {
        let steps = [
            Step::WaitIdle,
            Step::DestroyDepth,
            Step::DestroyFramebuffers,
            Step::DestroyPipeline,
            Step::DestroyRenderPass,
            Step::DestroySwapchain,
            Step::CreateSwapchain(640, 480),
            Step::CreateRenderPass,
            Step::CreatePipeline,
            Step::CreateDepth,
            Step::CreateFramebuffers,
            Step::DiscardResize,
        ];

        for step in steps {
            let mut target = MockTarget::new(&[(640, 480)]);
            target.miswired = Some(step);
            let startup_before = target.startup.clone();

            rebuild_swapchain(&mut target).unwrap();

            assert_ne!(target.startup, startup_before, "{step:?} went unnoticed");
        }
    }

    #[test]
    fn test_missing_surface_object_is_detected() {
        let before = MockTarget::new(&[]).surface;
        let mut after = before.clone();
        assert!(!surface_replaced(&before, &after));

        after.swapchain = Some(100);
        after.render_pass = Some(101);
        after.pipeline = None;
        after.depth = Some(102);
        after.framebuffers = vec![103, 104, 105];
        assert!(!surface_replaced(&before, &after));

        after.pipeline = Some(106);
        assert!(surface_replaced(&before, &after));
    }
}
