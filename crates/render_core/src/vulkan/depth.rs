//! Depth attachment shared by every swapchain framebuffer

use crate::error::{VulkanError, VulkanResult};
use crate::vulkan::context::DeviceContext;
use crate::vulkan::memory::{GpuImage, ImageDesc, ImageView, ResourceAllocator};
use crate::vulkan::transfer::TransferEngine;
use ash::vk;

/// Depth formats in order of preference
pub const DEPTH_FORMAT_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

/// First candidate usable as an optimal-tiling depth attachment
pub fn select_depth_format(
    candidates: &[vk::Format],
    properties_of: impl Fn(vk::Format) -> vk::FormatProperties,
) -> Option<vk::Format> {
    candidates.iter().copied().find(|&format| {
        properties_of(format)
            .optimal_tiling_features
            .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
    })
}

/// Depth format for the current device
pub fn find_depth_format(context: &DeviceContext) -> VulkanResult<vk::Format> {
    select_depth_format(&DEPTH_FORMAT_CANDIDATES, |format| {
        context.format_properties(format)
    })
    .ok_or(VulkanError::UnsupportedFormat {
        format: DEPTH_FORMAT_CANDIDATES[0],
        feature: "depth/stencil attachment (no candidate format)",
    })
}

/// Device-local depth image and its view
pub struct DepthAttachment {
    view: ImageView,
    image: GpuImage,
}

impl DepthAttachment {
    /// Create a depth image of `extent` in `DEPTH_STENCIL_ATTACHMENT_OPTIMAL`
    pub fn new(
        context: &DeviceContext,
        allocator: &ResourceAllocator,
        transfer: &TransferEngine,
        format: vk::Format,
        extent: vk::Extent2D,
    ) -> VulkanResult<Self> {
        let mut image = allocator.create_image(&ImageDesc {
            width: extent.width,
            height: extent.height,
            mip_levels: 1,
            format,
            tiling: vk::ImageTiling::OPTIMAL,
            usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            properties: vk::MemoryPropertyFlags::DEVICE_LOCAL,
        })?;

        transfer.transition_layout(&mut image, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)?;

        let view = ImageView::for_image(context.device().clone(), &image)?;

        Ok(Self { view, image })
    }

    /// View bound as framebuffer attachment 1
    pub fn view(&self) -> vk::ImageView {
        self.view.handle()
    }

    /// Depth format in use
    pub fn format(&self) -> vk::Format {
        self.image.format()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn depth_capable() -> vk::FormatProperties {
        vk::FormatProperties {
            optimal_tiling_features: vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
            ..Default::default()
        }
    }

    #[test]
    fn test_prefers_first_candidate() {
        let format = select_depth_format(&DEPTH_FORMAT_CANDIDATES, |_| depth_capable());
        assert_eq!(format, Some(vk::Format::D32_SFLOAT));
    }

    #[test]
    fn test_falls_back_to_packed_format() {
        let format = select_depth_format(&DEPTH_FORMAT_CANDIDATES, |format| {
            if format == vk::Format::D24_UNORM_S8_UINT {
                depth_capable()
            } else {
                vk::FormatProperties::default()
            }
        });
        assert_eq!(format, Some(vk::Format::D24_UNORM_S8_UINT));
    }

    #[test]
    fn test_none_supported() {
        let format = select_depth_format(&DEPTH_FORMAT_CANDIDATES, |_| vk::FormatProperties::default());
        assert_eq!(format, None);
    }
}
