//! Frames-in-flight scheduling
//!
//! [`FrameScheduler`] owns the per-slot state machine and the order of the
//! acquire, record, submit and present steps. Everything that touches the
//! device goes through [`FrameBackend`], so the scheduling rules can be
//! exercised without a GPU.
//!
//! A slot moves `Idle -> Recording -> Submitted` within one tick and back to
//! `Idle` once its fence has been waited on, F ticks later.

use crate::error::{ErrorKind, VulkanError, VulkanResult};
use crate::vulkan::swapchain::{AcquireOutcome, PresentOutcome};
use ash::vk;

/// Lifecycle of one frame slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SlotState {
    /// Fence observed signaled; the slot's resources are free
    #[default]
    Idle,
    /// Command buffer is being recorded
    Recording,
    /// Work is queued and the fence is unsignaled
    Submitted,
}

/// What a single tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// A frame was submitted and presented
    Rendered {
        /// Frame slot used
        slot: usize,
        /// Swapchain image drawn into
        image_index: u32,
    },
    /// The surface has no area; no image was used and any rebuild is
    /// still pending
    Deferred,
    /// Acquire reported a stale surface; the swapchain was rebuilt and no
    /// image was used
    SkippedStale,
}

/// Device operations the scheduler sequences
pub trait FrameBackend {
    /// Current surface size; zero area while minimized
    fn surface_extent(&self) -> vk::Extent2D;

    /// Block until the slot's previous submission has finished
    fn wait_for_slot(&mut self, slot: usize) -> VulkanResult<()>;

    /// Acquire the next swapchain image, signaling the slot's acquire semaphore
    fn acquire(&mut self, slot: usize) -> VulkanResult<AcquireOutcome>;

    /// Return the slot's fence to unsignaled
    fn reset_slot_fence(&mut self, slot: usize) -> VulkanResult<()>;

    /// Write this frame's uniforms into the slot's buffer
    fn update_uniforms(&mut self, slot: usize) -> VulkanResult<()>;

    /// Record the slot's command buffer for `image_index`
    fn record(&mut self, slot: usize, state: SlotState, image_index: u32) -> VulkanResult<()>;

    /// Queue the slot's command buffer; signals the slot fence on completion
    fn submit(&mut self, slot: usize) -> VulkanResult<()>;

    /// Queue `image_index` for presentation once the slot's rendering finishes
    fn present(&mut self, slot: usize, image_index: u32) -> VulkanResult<PresentOutcome>;

    /// Rebuild everything sized to the surface
    ///
    /// A [`ErrorKind::TransientSurfaceState`] error leaves the previous
    /// swapchain in place and is retried on a later tick.
    fn recreate(&mut self, extent: vk::Extent2D) -> VulkanResult<()>;
}

/// Bounds the number of frames with unconfirmed GPU work
#[derive(Debug)]
pub struct FrameScheduler {
    slots: Vec<SlotState>,
    current_frame: usize,
    resize_pending: bool,
    frames_rendered: u64,
}

impl FrameScheduler {
    /// Create a scheduler with `frames_in_flight` slots
    pub fn new(frames_in_flight: usize) -> VulkanResult<Self> {
        if frames_in_flight < 2 {
            return Err(VulkanError::invalid(format!(
                "At least 2 frames in flight are required, got {frames_in_flight}"
            )));
        }

        Ok(Self {
            slots: vec![SlotState::Idle; frames_in_flight],
            current_frame: 0,
            resize_pending: false,
            frames_rendered: 0,
        })
    }

    /// Number of frame slots
    pub fn frames_in_flight(&self) -> usize {
        self.slots.len()
    }

    /// Slot the next tick will use
    pub fn current_frame(&self) -> usize {
        self.current_frame
    }

    /// State of `slot`
    pub fn slot_state(&self, slot: usize) -> Option<SlotState> {
        self.slots.get(slot).copied()
    }

    /// Slots whose work has been submitted but not yet waited on
    pub fn outstanding(&self) -> usize {
        self.slots
            .iter()
            .filter(|&&state| state == SlotState::Submitted)
            .count()
    }

    /// Frames presented so far
    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }

    /// Whether a resize notification is waiting to be applied
    pub fn resize_pending(&self) -> bool {
        self.resize_pending
    }

    /// Request a swapchain rebuild after the next present
    pub fn notify_resized(&mut self) {
        self.resize_pending = true;
    }

    /// Run one frame
    ///
    /// Stale surfaces are absorbed here and never surface as errors.
    pub fn tick<B: FrameBackend>(&mut self, backend: &mut B) -> VulkanResult<TickOutcome> {
        let extent = backend.surface_extent();
        if extent.width == 0 || extent.height == 0 {
            return Ok(TickOutcome::Deferred);
        }

        let slot = self.current_frame;
        backend.wait_for_slot(slot)?;
        self.slots[slot] = SlotState::Idle;

        let image_index = match backend.acquire(slot)? {
            AcquireOutcome::Acquired(index) => index,
            AcquireOutcome::Stale => {
                log::debug!("Swapchain stale on acquire, rebuilding at {extent:?}");
                if !self.rebuild(backend, extent)? {
                    return Ok(TickOutcome::Deferred);
                }
                return Ok(TickOutcome::SkippedStale);
            }
        };

        // Only now is a submission guaranteed to follow
        backend.reset_slot_fence(slot)?;
        backend.update_uniforms(slot)?;

        backend.record(slot, self.slots[slot], image_index)?;
        self.slots[slot] = SlotState::Recording;

        backend.submit(slot)?;
        self.slots[slot] = SlotState::Submitted;

        let presented = backend.present(slot, image_index)?;
        if presented == PresentOutcome::Stale || self.resize_pending {
            let extent = backend.surface_extent();
            if extent.width > 0 && extent.height > 0 {
                log::debug!("Rebuilding swapchain after present at {extent:?}");
                self.rebuild(backend, extent)?;
            }
        }

        self.frames_rendered += 1;
        self.current_frame = (slot + 1) % self.slots.len();

        Ok(TickOutcome::Rendered { slot, image_index })
    }

    /// Returns false when the surface cannot take a swapchain yet; the
    /// rebuild stays pending
    fn rebuild<B: FrameBackend>(&mut self, backend: &mut B, extent: vk::Extent2D) -> VulkanResult<bool> {
        match backend.recreate(extent) {
            Ok(()) => {
                self.resize_pending = false;
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::TransientSurfaceState => {
                log::debug!("Swapchain rebuild at {extent:?} deferred: {e}");
                self.resize_pending = true;
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vulkan::swapchain::{SurfaceSupport, SwapchainPlan};
    use std::collections::{HashSet, VecDeque};

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Wait(usize),
        Acquire(usize),
        Reset(usize),
        Uniforms(usize),
        Record(usize, u32),
        Submit(usize),
        Present(usize, u32),
        Recreate(vk::Extent2D),
    }

    /// Surface as a driver would report it
    fn fake_support(platform_extent: Option<vk::Extent2D>, images: u32) -> SurfaceSupport {
        let free = vk::Extent2D {
            width: u32::MAX,
            height: u32::MAX,
        };
        SurfaceSupport {
            capabilities: vk::SurfaceCapabilitiesKHR {
                min_image_count: images - 1,
                max_image_count: images,
                current_extent: platform_extent.unwrap_or(free),
                min_image_extent: vk::Extent2D {
                    width: 1,
                    height: 1,
                },
                max_image_extent: vk::Extent2D {
                    width: 4096,
                    height: 4096,
                },
                max_image_array_layers: 1,
                current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
                ..Default::default()
            },
            formats: vec![vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            }],
            present_modes: vec![vk::PresentModeKHR::FIFO],
        }
    }

    /// Fake GPU: a submission stays pending until its slot is waited on.
    /// Images come from a fake swapchain planned the same way the real one is.
    struct FakeBackend {
        extent: vk::Extent2D,
        /// Fixed extent the surface reports; None lets the window size win
        platform_extent: Option<vk::Extent2D>,
        platform_images: u32,
        swapchain: SwapchainPlan,
        generation: u32,
        acquired: Option<(u32, u32)>,
        next_image: u32,
        frames_in_flight: usize,
        pending: HashSet<usize>,
        max_pending: usize,
        acquire_script: VecDeque<AcquireOutcome>,
        present_script: VecDeque<PresentOutcome>,
        calls: Vec<Call>,
    }

    impl FakeBackend {
        fn new(frames_in_flight: usize, image_count: u32) -> Self {
            let extent = vk::Extent2D {
                width: 800,
                height: 600,
            };
            Self {
                extent,
                platform_extent: None,
                platform_images: image_count,
                swapchain: SwapchainPlan::new(&fake_support(None, image_count), extent).unwrap(),
                generation: 0,
                acquired: None,
                next_image: 0,
                frames_in_flight,
                pending: HashSet::new(),
                max_pending: 0,
                acquire_script: VecDeque::new(),
                present_script: VecDeque::new(),
                calls: Vec::new(),
            }
        }

        fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
            self.calls.iter().filter(|c| pred(c)).count()
        }

        fn support(&self) -> SurfaceSupport {
            fake_support(self.platform_extent, self.platform_images)
        }

        /// The image must come from the current swapchain's last acquire
        fn check_image(&self, image_index: u32) {
            assert_eq!(
                self.acquired,
                Some((self.generation, image_index)),
                "image {image_index} was not acquired from the current swapchain"
            );
            assert!(image_index < self.swapchain.image_count);
        }
    }

    impl FrameBackend for FakeBackend {
        fn surface_extent(&self) -> vk::Extent2D {
            self.extent
        }

        fn wait_for_slot(&mut self, slot: usize) -> VulkanResult<()> {
            self.calls.push(Call::Wait(slot));
            self.pending.remove(&slot);
            Ok(())
        }

        fn acquire(&mut self, slot: usize) -> VulkanResult<AcquireOutcome> {
            self.calls.push(Call::Acquire(slot));
            if let Some(outcome) = self.acquire_script.pop_front() {
                return Ok(outcome);
            }
            let index = self.next_image;
            self.next_image = (self.next_image + 1) % self.swapchain.image_count;
            self.acquired = Some((self.generation, index));
            Ok(AcquireOutcome::Acquired(index))
        }

        fn reset_slot_fence(&mut self, slot: usize) -> VulkanResult<()> {
            self.calls.push(Call::Reset(slot));
            Ok(())
        }

        fn update_uniforms(&mut self, slot: usize) -> VulkanResult<()> {
            self.calls.push(Call::Uniforms(slot));
            Ok(())
        }

        fn record(&mut self, slot: usize, state: SlotState, image_index: u32) -> VulkanResult<()> {
            assert_eq!(state, SlotState::Idle, "recording into a busy slot");
            assert!(!self.pending.contains(&slot));
            self.check_image(image_index);
            self.calls.push(Call::Record(slot, image_index));
            Ok(())
        }

        fn submit(&mut self, slot: usize) -> VulkanResult<()> {
            self.calls.push(Call::Submit(slot));
            assert!(self.pending.insert(slot), "slot {slot} submitted twice");
            self.max_pending = self.max_pending.max(self.pending.len());
            assert!(self.pending.len() <= self.frames_in_flight);
            Ok(())
        }

        fn present(&mut self, slot: usize, image_index: u32) -> VulkanResult<PresentOutcome> {
            self.check_image(image_index);
            self.calls.push(Call::Present(slot, image_index));
            Ok(self
                .present_script
                .pop_front()
                .unwrap_or(PresentOutcome::Presented))
        }

        fn recreate(&mut self, extent: vk::Extent2D) -> VulkanResult<()> {
            self.calls.push(Call::Recreate(extent));
            self.swapchain = SwapchainPlan::new(&self.support(), extent)?;
            self.generation += 1;
            self.acquired = None;
            self.next_image = 0;
            Ok(())
        }
    }

    #[test]
    fn test_requires_two_frames() {
        assert!(FrameScheduler::new(1).is_err());
        assert_eq!(FrameScheduler::new(3).unwrap().frames_in_flight(), 3);
    }

    #[test]
    fn test_outstanding_submissions_bounded() {
        for frames in 2..=4 {
            let mut scheduler = FrameScheduler::new(frames).unwrap();
            let mut backend = FakeBackend::new(frames, 3);

            for _ in 0..20 {
                scheduler.tick(&mut backend).unwrap();
                assert!(scheduler.outstanding() <= frames);
            }

            assert_eq!(backend.max_pending, frames);
            assert_eq!(scheduler.frames_rendered(), 20);
        }
    }

    #[test]
    fn test_slots_rotate() {
        let mut scheduler = FrameScheduler::new(2).unwrap();
        let mut backend = FakeBackend::new(2, 3);

        let slots: Vec<usize> = (0..4)
            .map(|_| match scheduler.tick(&mut backend).unwrap() {
                TickOutcome::Rendered { slot, .. } => slot,
                other => panic!("unexpected {other:?}"),
            })
            .collect();

        assert_eq!(slots, vec![0, 1, 0, 1]);
        assert_eq!(scheduler.slot_state(0), Some(SlotState::Submitted));
        assert_eq!(scheduler.slot_state(1), Some(SlotState::Submitted));
    }

    #[test]
    fn test_tick_order() {
        let mut scheduler = FrameScheduler::new(2).unwrap();
        let mut backend = FakeBackend::new(2, 3);

        scheduler.tick(&mut backend).unwrap();

        assert_eq!(
            backend.calls,
            vec![
                Call::Wait(0),
                Call::Acquire(0),
                Call::Reset(0),
                Call::Uniforms(0),
                Call::Record(0, 0),
                Call::Submit(0),
                Call::Present(0, 0),
            ]
        );
    }

    #[test]
    fn test_stale_acquire_skips_frame() {
        let mut scheduler = FrameScheduler::new(2).unwrap();
        let mut backend = FakeBackend::new(2, 3);

        scheduler.tick(&mut backend).unwrap();
        backend.extent = vk::Extent2D {
            width: 1024,
            height: 768,
        };
        backend.acquire_script.push_back(AcquireOutcome::Stale);
        backend.calls.clear();

        let outcome = scheduler.tick(&mut backend).unwrap();

        assert_eq!(outcome, TickOutcome::SkippedStale);
        assert_eq!(
            backend.calls,
            vec![
                Call::Wait(1),
                Call::Acquire(1),
                Call::Recreate(vk::Extent2D {
                    width: 1024,
                    height: 768
                }),
            ]
        );
        // The fence was never reset, so the slot is retried next tick
        assert_eq!(scheduler.current_frame(), 1);
        assert_eq!(
            scheduler.tick(&mut backend).unwrap(),
            TickOutcome::Rendered {
                slot: 1,
                image_index: 0
            }
        );
    }

    #[test]
    fn test_stale_present_rebuilds() {
        let mut scheduler = FrameScheduler::new(2).unwrap();
        let mut backend = FakeBackend::new(2, 3);
        backend.present_script.push_back(PresentOutcome::Stale);

        let outcome = scheduler.tick(&mut backend).unwrap();

        assert!(matches!(outcome, TickOutcome::Rendered { slot: 0, .. }));
        assert_eq!(backend.count(|c| matches!(c, Call::Recreate(_))), 1);
        assert_eq!(scheduler.current_frame(), 1);
    }

    #[test]
    fn test_resize_notification_rebuilds_after_present() {
        let mut scheduler = FrameScheduler::new(2).unwrap();
        let mut backend = FakeBackend::new(2, 3);

        scheduler.notify_resized();
        backend.extent = vk::Extent2D {
            width: 640,
            height: 480,
        };
        scheduler.tick(&mut backend).unwrap();

        assert_eq!(
            backend.calls.last(),
            Some(&Call::Recreate(vk::Extent2D {
                width: 640,
                height: 480
            }))
        );
        assert!(!scheduler.resize_pending());

        backend.calls.clear();
        scheduler.tick(&mut backend).unwrap();
        assert_eq!(backend.count(|c| matches!(c, Call::Recreate(_))), 0);
    }

    #[test]
    fn test_zero_extent_defers() {
        let mut scheduler = FrameScheduler::new(2).unwrap();
        let mut backend = FakeBackend::new(2, 3);
        backend.extent = vk::Extent2D {
            width: 0,
            height: 600,
        };
        scheduler.notify_resized();

        assert_eq!(scheduler.tick(&mut backend).unwrap(), TickOutcome::Deferred);
        assert!(backend.calls.is_empty());
        assert!(scheduler.resize_pending());

        backend.extent = vk::Extent2D {
            width: 800,
            height: 600,
        };
        scheduler.tick(&mut backend).unwrap();
        assert!(!scheduler.resize_pending());
    }

    #[test]
    fn test_stale_image_never_used() {
        let mut scheduler = FrameScheduler::new(2).unwrap();
        let mut backend = FakeBackend::new(2, 3);
        backend.acquire_script.push_back(AcquireOutcome::Stale);

        scheduler.tick(&mut backend).unwrap();

        assert_eq!(backend.count(|c| matches!(c, Call::Record(..))), 0);
        assert_eq!(backend.count(|c| matches!(c, Call::Submit(_))), 0);
        assert_eq!(backend.count(|c| matches!(c, Call::Present(..))), 0);
        assert_eq!(backend.count(|c| matches!(c, Call::Reset(_))), 0);
    }

    #[test]
    fn test_rebuilt_swapchain_matches_fresh_build() {
        let mut scheduler = FrameScheduler::new(2).unwrap();
        let mut backend = FakeBackend::new(2, 3);

        for _ in 0..5 {
            scheduler.tick(&mut backend).unwrap();
        }
        assert_eq!(backend.swapchain.image_count, 3);

        // The window grows and the driver now hands out four images
        let resized = vk::Extent2D {
            width: 1280,
            height: 720,
        };
        backend.extent = resized;
        backend.platform_images = 4;
        backend.acquire_script.push_back(AcquireOutcome::Stale);
        backend.calls.clear();

        assert_eq!(scheduler.tick(&mut backend).unwrap(), TickOutcome::SkippedStale);
        assert_eq!(backend.count(|c| matches!(c, Call::Present(..))), 0);

        let fresh = SwapchainPlan::new(&fake_support(None, 4), resized).unwrap();
        assert_eq!(backend.swapchain, fresh);
        assert_eq!(backend.swapchain.extent, resized);

        backend.calls.clear();
        for _ in 0..8 {
            scheduler.tick(&mut backend).unwrap();
        }
        let presented: Vec<u32> = backend
            .calls
            .iter()
            .filter_map(|c| match c {
                Call::Present(_, index) => Some(*index),
                _ => None,
            })
            .collect();
        assert_eq!(presented, vec![0, 1, 2, 3, 0, 1, 2, 3]);
    }

    #[test]
    fn test_image_from_old_swapchain_never_presented() {
        let mut scheduler = FrameScheduler::new(2).unwrap();
        let mut backend = FakeBackend::new(2, 4);

        for _ in 0..3 {
            scheduler.tick(&mut backend).unwrap();
        }
        // Image 3 is in flight when present reports the surface stale and the
        // replacement swapchain only has two images
        backend.platform_images = 2;
        backend.present_script.push_back(PresentOutcome::Stale);
        assert_eq!(
            scheduler.tick(&mut backend).unwrap(),
            TickOutcome::Rendered {
                slot: 1,
                image_index: 3
            }
        );
        assert_eq!(backend.swapchain.image_count, 2);

        // The fake asserts every recorded and presented image is current
        for _ in 0..4 {
            assert!(matches!(
                scheduler.tick(&mut backend).unwrap(),
                TickOutcome::Rendered { image_index, .. } if image_index < 2
            ));
        }
    }

    #[test]
    fn test_zero_area_rebuild_defers_tick() {
        let mut scheduler = FrameScheduler::new(2).unwrap();
        let mut backend = FakeBackend::new(2, 3);
        scheduler.tick(&mut backend).unwrap();
        let before = backend.swapchain;

        // Minimized: the window still reports its old size but the surface
        // is fixed at zero area
        backend.platform_extent = Some(vk::Extent2D {
            width: 0,
            height: 0,
        });
        backend.acquire_script.push_back(AcquireOutcome::Stale);

        assert_eq!(scheduler.tick(&mut backend).unwrap(), TickOutcome::Deferred);
        assert!(scheduler.resize_pending());
        assert_eq!(backend.swapchain, before);
        assert_eq!(scheduler.current_frame(), 1);

        // Restored: the pending rebuild runs after the next present
        backend.platform_extent = None;
        assert!(matches!(
            scheduler.tick(&mut backend).unwrap(),
            TickOutcome::Rendered { slot: 1, .. }
        ));
        assert!(!scheduler.resize_pending());
        assert_eq!(backend.count(|c| matches!(c, Call::Recreate(_))), 2);
    }

    #[test]
    fn test_zero_area_rebuild_after_present_stays_pending() {
        let mut scheduler = FrameScheduler::new(2).unwrap();
        let mut backend = FakeBackend::new(2, 3);
        backend.platform_extent = Some(vk::Extent2D {
            width: 0,
            height: 0,
        });
        backend.present_script.push_back(PresentOutcome::Stale);

        assert!(matches!(
            scheduler.tick(&mut backend).unwrap(),
            TickOutcome::Rendered { slot: 0, .. }
        ));
        assert!(scheduler.resize_pending());
        assert_eq!(scheduler.frames_rendered(), 1);
    }
}
