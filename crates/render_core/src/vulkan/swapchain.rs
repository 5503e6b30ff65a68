//! Swapchain lifecycle
//!
//! [`SwapchainPlan`] turns what the surface reports into concrete creation
//! parameters without touching the device, so the same inputs always yield
//! the same swapchain shape. [`SwapchainManager`] owns the live swapchain
//! together with everything sized to it: one view and one framebuffer per
//! image plus the shared depth attachment. Recreation rebuilds all of them
//! as a unit.

use crate::error::{VulkanError, VulkanResult};
use crate::vulkan::context::{DeviceContext, SurfaceBinding};
use crate::vulkan::depth::DepthAttachment;
use crate::vulkan::memory::{ImageView, ResourceAllocator};
use crate::vulkan::render_pass::Framebuffer;
use crate::vulkan::transfer::TransferEngine;
use ash::extensions::khr::Swapchain as SwapchainLoader;
use ash::vk;

/// What the surface supports on the selected device
#[derive(Debug, Clone)]
pub struct SurfaceSupport {
    /// Image count, extent and transform limits
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    /// Supported format / color space pairs
    pub formats: Vec<vk::SurfaceFormatKHR>,
    /// Supported presentation modes
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SurfaceSupport {
    /// Query the surface for `physical_device`
    pub fn query(surface: &SurfaceBinding, physical_device: vk::PhysicalDevice) -> VulkanResult<Self> {
        unsafe {
            let capabilities = surface
                .loader
                .get_physical_device_surface_capabilities(physical_device, surface.handle)
                .map_err(VulkanError::Api)?;
            let formats = surface
                .loader
                .get_physical_device_surface_formats(physical_device, surface.handle)
                .map_err(VulkanError::Api)?;
            let present_modes = surface
                .loader
                .get_physical_device_surface_present_modes(physical_device, surface.handle)
                .map_err(VulkanError::Api)?;

            Ok(Self {
                capabilities,
                formats,
                present_modes,
            })
        }
    }
}

/// Prefer 8-bit sRGB BGRA, otherwise take what the surface lists first
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .copied()
        .find(|format| {
            format.format == vk::Format::B8G8R8A8_SRGB
                && format.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first().copied())
}

/// Prefer mailbox; FIFO is always available
pub fn choose_present_mode(present_modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    if present_modes.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// The surface's fixed extent, or `preferred` clamped to the allowed range
pub fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    preferred: vk::Extent2D,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    vk::Extent2D {
        width: preferred.width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: preferred.height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

/// One more than the minimum, capped by the maximum when there is one
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let desired = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        desired.min(capabilities.max_image_count)
    } else {
        desired
    }
}

/// Concrete swapchain creation parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainPlan {
    /// Color format of the presentable images
    pub format: vk::Format,
    /// Color space paired with `format`
    pub color_space: vk::ColorSpaceKHR,
    /// Presentation mode
    pub present_mode: vk::PresentModeKHR,
    /// Image extent
    pub extent: vk::Extent2D,
    /// Minimum number of images requested
    pub image_count: u32,
    /// Transform applied by the presentation engine
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
}

impl SwapchainPlan {
    /// Derive creation parameters from surface support and the window size
    ///
    /// A zero-area surface (minimized window) yields
    /// [`VulkanError::SurfaceStale`]; the caller retries once it has area.
    pub fn new(support: &SurfaceSupport, preferred_extent: vk::Extent2D) -> VulkanResult<Self> {
        let surface_format = choose_surface_format(&support.formats).ok_or_else(|| {
            VulkanError::InitializationFailed("Surface reports no formats".to_string())
        })?;
        let extent = choose_extent(&support.capabilities, preferred_extent);
        if extent.width == 0 || extent.height == 0 {
            log::debug!("Surface has no area ({}x{}), not building a swapchain", extent.width, extent.height);
            return Err(VulkanError::SurfaceStale);
        }

        Ok(Self {
            format: surface_format.format,
            color_space: surface_format.color_space,
            present_mode: choose_present_mode(&support.present_modes),
            extent,
            image_count: choose_image_count(&support.capabilities),
            pre_transform: support.capabilities.current_transform,
        })
    }
}

/// Reject a rebuild whose color format differs from the one the render pass
/// and pipeline were created for
pub fn check_format_stable(expected: Option<vk::Format>, plan: &SwapchainPlan) -> VulkanResult<()> {
    match expected {
        Some(format) if format != plan.format => Err(VulkanError::UnsupportedFormat {
            format: plan.format,
            feature: "the render pass built for the previous surface format",
        }),
        _ => Ok(()),
    }
}

/// Result of asking for the next presentable image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// Image `index` will be ready once the semaphore signals
    Acquired(u32),
    /// The surface changed; nothing was acquired and the semaphore is untouched
    Stale,
}

/// Result of queueing an image for presentation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    /// Queued normally
    Presented,
    /// Queued or dropped, but the swapchain no longer matches the surface
    Stale,
}

struct SwapchainHandle {
    loader: SwapchainLoader,
    handle: vk::SwapchainKHR,
}

impl Drop for SwapchainHandle {
    fn drop(&mut self) {
        unsafe {
            self.loader.destroy_swapchain(self.handle, None);
        }
    }
}

// Field order is teardown order: framebuffers reference the views and the
// depth view, views reference the swapchain images.
struct SwapchainState {
    framebuffers: Vec<Framebuffer>,
    depth: DepthAttachment,
    views: Vec<ImageView>,
    swapchain: SwapchainHandle,
    plan: SwapchainPlan,
}

struct BuildParams<'a> {
    context: &'a DeviceContext,
    allocator: &'a ResourceAllocator,
    transfer: &'a TransferEngine,
    render_pass: vk::RenderPass,
    depth_format: vk::Format,
    // None on first creation; afterwards the format the render pass uses
    color_format: Option<vk::Format>,
}

impl SwapchainState {
    fn build(
        params: &BuildParams<'_>,
        loader: &SwapchainLoader,
        preferred_extent: vk::Extent2D,
        old_swapchain: vk::SwapchainKHR,
    ) -> VulkanResult<Self> {
        let context = params.context;
        let surface = context.surface()?;
        let support = SurfaceSupport::query(surface, context.physical_device().device)?;
        let plan = SwapchainPlan::new(&support, preferred_extent)?;
        check_format_stable(params.color_format, &plan)?;

        let queue_families = context.queue_family_indices();
        let concurrent = queue_families.len() > 1;
        let sharing_mode = if concurrent {
            vk::SharingMode::CONCURRENT
        } else {
            vk::SharingMode::EXCLUSIVE
        };
        let shared_families: &[u32] = if concurrent {
            queue_families.as_slice()
        } else {
            &[]
        };

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface.handle)
            .min_image_count(plan.image_count)
            .image_format(plan.format)
            .image_color_space(plan.color_space)
            .image_extent(plan.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(shared_families)
            .pre_transform(plan.pre_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(plan.present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        let swapchain = SwapchainHandle {
            loader: loader.clone(),
            handle: unsafe {
                loader
                    .create_swapchain(&create_info, None)
                    .map_err(VulkanError::Api)?
            },
        };

        let images = unsafe {
            loader
                .get_swapchain_images(swapchain.handle)
                .map_err(VulkanError::Api)?
        };

        let device = context.device();
        let views = images
            .iter()
            .map(|&image| {
                ImageView::new(
                    device.clone(),
                    image,
                    plan.format,
                    vk::ImageAspectFlags::COLOR,
                    1,
                )
            })
            .collect::<VulkanResult<Vec<_>>>()?;

        let depth = DepthAttachment::new(
            context,
            params.allocator,
            params.transfer,
            params.depth_format,
            plan.extent,
        )?;

        let framebuffers = views
            .iter()
            .map(|view| {
                Framebuffer::new(
                    device.clone(),
                    params.render_pass,
                    &[view.handle(), depth.view()],
                    plan.extent,
                )
            })
            .collect::<VulkanResult<Vec<_>>>()?;

        log::info!(
            "Swapchain ready: {} images, {}x{}, {:?}, {:?}",
            images.len(),
            plan.extent.width,
            plan.extent.height,
            plan.format,
            plan.present_mode
        );

        Ok(Self {
            framebuffers,
            depth,
            views,
            swapchain,
            plan,
        })
    }
}

/// Owns the swapchain and everything sized to it
pub struct SwapchainManager {
    state: SwapchainState,
    loader: SwapchainLoader,
    render_pass: vk::RenderPass,
    depth_format: vk::Format,
}

impl SwapchainManager {
    /// Surface format the swapchain will use, for creating a compatible render pass
    pub fn preferred_surface_format(context: &DeviceContext) -> VulkanResult<vk::SurfaceFormatKHR> {
        let support = SurfaceSupport::query(context.surface()?, context.physical_device().device)?;
        choose_surface_format(&support.formats).ok_or_else(|| {
            VulkanError::InitializationFailed("Surface reports no formats".to_string())
        })
    }

    /// Create the swapchain, its views, the depth attachment and framebuffers
    pub fn create(
        context: &DeviceContext,
        allocator: &ResourceAllocator,
        transfer: &TransferEngine,
        render_pass: vk::RenderPass,
        depth_format: vk::Format,
        preferred_extent: vk::Extent2D,
    ) -> VulkanResult<Self> {
        let loader = SwapchainLoader::new(context.instance(), context.device());
        let params = BuildParams {
            context,
            allocator,
            transfer,
            render_pass,
            depth_format,
            color_format: None,
        };
        let state = SwapchainState::build(&params, &loader, preferred_extent, vk::SwapchainKHR::null())?;

        Ok(Self {
            state,
            loader,
            render_pass,
            depth_format,
        })
    }

    /// Tear down and rebuild for a new surface size
    ///
    /// The device must be idle. The old swapchain is retired into the new
    /// one and destroyed once its replacement exists. On error the current
    /// swapchain is left in place: [`VulkanError::SurfaceStale`] for a
    /// zero-area surface, a setup error if the surface format changed.
    pub fn recreate(
        &mut self,
        context: &DeviceContext,
        allocator: &ResourceAllocator,
        transfer: &TransferEngine,
        preferred_extent: vk::Extent2D,
    ) -> VulkanResult<()> {
        let params = BuildParams {
            context,
            allocator,
            transfer,
            render_pass: self.render_pass,
            depth_format: self.depth_format,
            color_format: Some(self.state.plan.format),
        };
        let state = SwapchainState::build(
            &params,
            &self.loader,
            preferred_extent,
            self.state.swapchain.handle,
        )?;

        self.state = state;
        Ok(())
    }

    /// Ask for the next image; `semaphore` signals when it is ready
    ///
    /// A suboptimal acquire still returns the image since the semaphore has
    /// been signaled; staleness is picked up at present time.
    pub fn acquire_next(&self, semaphore: vk::Semaphore) -> VulkanResult<AcquireOutcome> {
        let result = unsafe {
            self.loader.acquire_next_image(
                self.state.swapchain.handle,
                u64::MAX,
                semaphore,
                vk::Fence::null(),
            )
        };

        match result {
            Ok((index, suboptimal)) => {
                if suboptimal {
                    log::trace!("Acquired image {index} from a suboptimal swapchain");
                }
                Ok(AcquireOutcome::Acquired(index))
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::Stale),
            Err(err) => Err(VulkanError::Api(err)),
        }
    }

    /// Queue `image_index` for presentation after `wait_semaphore` signals
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> VulkanResult<PresentOutcome> {
        let wait_semaphores = [wait_semaphore];
        let swapchains = [self.state.swapchain.handle];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        match unsafe { self.loader.queue_present(queue, &present_info) } {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::Stale),
            Err(err) => Err(VulkanError::Api(err)),
        }
    }

    /// Parameters the current swapchain was built with
    pub fn plan(&self) -> &SwapchainPlan {
        &self.state.plan
    }

    /// Current image extent
    pub fn extent(&self) -> vk::Extent2D {
        self.state.plan.extent
    }

    /// Number of presentable images actually created
    pub fn image_count(&self) -> usize {
        self.state.views.len()
    }

    /// Framebuffer handles indexed by swapchain image
    pub fn framebuffers(&self) -> Vec<vk::Framebuffer> {
        self.state.framebuffers.iter().map(Framebuffer::handle).collect()
    }

    /// Depth format shared by every framebuffer
    pub fn depth_format(&self) -> vk::Format {
        self.state.depth.format()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn surface_format(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space,
        }
    }

    fn capabilities(current: vk::Extent2D) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 3,
            current_extent: current,
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
            ..Default::default()
        }
    }

    fn free_extent() -> vk::Extent2D {
        vk::Extent2D {
            width: u32::MAX,
            height: u32::MAX,
        }
    }

    fn support(current: vk::Extent2D) -> SurfaceSupport {
        SurfaceSupport {
            capabilities: capabilities(current),
            formats: vec![
                surface_format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
                surface_format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            ],
            present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
        }
    }

    #[test]
    fn test_prefers_srgb_bgra() {
        let chosen = choose_surface_format(&support(free_extent()).formats).unwrap();
        assert_eq!(chosen.format, vk::Format::B8G8R8A8_SRGB);
    }

    #[test]
    fn test_falls_back_to_first_format() {
        let formats = [
            surface_format(vk::Format::R16G16B16A16_SFLOAT, vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT),
            surface_format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::DISPLAY_P3_NONLINEAR_EXT),
        ];
        let chosen = choose_surface_format(&formats).unwrap();
        assert_eq!(chosen.format, vk::Format::R16G16B16A16_SFLOAT);
        assert!(choose_surface_format(&[]).is_none());
    }

    #[test]
    fn test_present_mode_preference() {
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX]),
            vk::PresentModeKHR::MAILBOX
        );
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::IMMEDIATE]),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn test_fixed_extent_wins() {
        let fixed = vk::Extent2D {
            width: 640,
            height: 480,
        };
        let chosen = choose_extent(
            &capabilities(fixed),
            vk::Extent2D {
                width: 800,
                height: 600,
            },
        );
        assert_eq!(chosen, fixed);
    }

    #[test]
    fn test_free_extent_is_clamped() {
        let chosen = choose_extent(
            &capabilities(free_extent()),
            vk::Extent2D {
                width: 10_000,
                height: 0,
            },
        );
        assert_eq!(
            chosen,
            vk::Extent2D {
                width: 4096,
                height: 1
            }
        );
    }

    #[test]
    fn test_image_count() {
        let mut caps = capabilities(free_extent());
        assert_eq!(choose_image_count(&caps), 3);

        caps.max_image_count = 2;
        assert_eq!(choose_image_count(&caps), 2);

        caps.max_image_count = 0;
        caps.min_image_count = 5;
        assert_eq!(choose_image_count(&caps), 6);
    }

    #[test]
    fn test_zero_area_surface_rejected() {
        let minimized = vk::Extent2D {
            width: 0,
            height: 0,
        };
        let err = SwapchainPlan::new(&support(minimized), minimized).unwrap_err();
        assert!(matches!(err, VulkanError::SurfaceStale));
        assert_eq!(err.kind(), crate::error::ErrorKind::TransientSurfaceState);
    }

    #[test]
    fn test_fixed_zero_extent_is_transient() {
        // Minimized on platforms that report a fixed 0x0 extent while the
        // window still believes it is 800x600
        let err = SwapchainPlan::new(
            &support(vk::Extent2D {
                width: 0,
                height: 0,
            }),
            vk::Extent2D {
                width: 800,
                height: 600,
            },
        )
        .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::TransientSurfaceState);
    }

    #[test]
    fn test_format_change_is_fatal() {
        let plan = SwapchainPlan::new(
            &support(free_extent()),
            vk::Extent2D {
                width: 800,
                height: 600,
            },
        )
        .unwrap();

        assert!(check_format_stable(None, &plan).is_ok());
        assert!(check_format_stable(Some(vk::Format::B8G8R8A8_SRGB), &plan).is_ok());

        let err = check_format_stable(Some(vk::Format::R8G8B8A8_UNORM), &plan).unwrap_err();
        assert!(matches!(err, VulkanError::UnsupportedFormat { .. }));
        assert_eq!(err.kind(), crate::error::ErrorKind::SetupFatal);
    }
}
