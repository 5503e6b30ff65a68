//! Mip chain generation by repeated linear blits
//!
//! The chain is planned on the host first ([`blit_plan`]) and then encoded.
//! For every step the source level is moved to `TRANSFER_SRC_OPTIMAL`,
//! blitted into the next level at half size, then handed to the fragment
//! shader. The last level is never a blit source and is transitioned on its
//! own at the end.
//!
//! Sizes halve independently per axis and stop at 1, so a 512x64 image has
//! levels 512x64, 256x32, ... 8x1, 4x1, 2x1, 1x1.

use crate::error::{VulkanError, VulkanResult};
use crate::vulkan::context::DeviceContext;
use crate::vulkan::memory::GpuImage;
use crate::vulkan::transfer::{record_layout_barrier, TransferEngine};
use ash::{vk, Device};

/// Number of levels in a full chain: `floor(log2(max(width, height))) + 1`
pub fn mip_level_count(width: u32, height: u32) -> u32 {
    let largest = width.max(height);
    if largest == 0 {
        1
    } else {
        u32::BITS - largest.leading_zeros()
    }
}

/// Extent of `level`: each axis shifted right, clamped to 1
pub fn mip_extent(width: u32, height: u32, level: u32) -> (u32, u32) {
    let shrink = |size: u32| size.checked_shr(level).unwrap_or(0).max(1);
    (shrink(width), shrink(height))
}

/// One blit in the chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlitStep {
    /// Level read from
    pub src_level: u32,
    /// Extent of the source level
    pub src_extent: (u32, u32),
    /// Level written to, always `src_level + 1`
    pub dst_level: u32,
    /// Extent of the destination level
    pub dst_extent: (u32, u32),
}

/// Blits needed to fill levels `1..level_count` from level 0
pub fn blit_plan(width: u32, height: u32, level_count: u32) -> Vec<BlitStep> {
    (1..level_count)
        .map(|dst_level| BlitStep {
            src_level: dst_level - 1,
            src_extent: mip_extent(width, height, dst_level - 1),
            dst_level,
            dst_extent: mip_extent(width, height, dst_level),
        })
        .collect()
}

/// Whether `format` can be a linear blit source with optimal tiling
pub fn supports_linear_blit(properties: vk::FormatProperties) -> bool {
    properties
        .optimal_tiling_features
        .contains(vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR)
}

/// Records mip chains for sampled images
pub struct MipmapGenerator<'a> {
    context: &'a DeviceContext,
    transfer: &'a TransferEngine,
}

impl<'a> MipmapGenerator<'a> {
    /// Create a generator using `transfer` for submission
    pub fn new(context: &'a DeviceContext, transfer: &'a TransferEngine) -> Self {
        Self { context, transfer }
    }

    /// Fill every level of `image` from level 0
    ///
    /// All levels must be in `TRANSFER_DST_OPTIMAL` with level 0 populated.
    /// On success every level is `SHADER_READ_ONLY_OPTIMAL`. The format check
    /// happens before anything is recorded.
    pub fn generate(&self, image: &mut GpuImage) -> VulkanResult<()> {
        let format = image.format();
        if !supports_linear_blit(self.context.format_properties(format)) {
            return Err(VulkanError::UnsupportedFormat {
                format,
                feature: "linear blitting",
            });
        }

        if image.layout() != vk::ImageLayout::TRANSFER_DST_OPTIMAL {
            return Err(VulkanError::invalid(format!(
                "Mip generation needs TRANSFER_DST_OPTIMAL, image is {:?}",
                image.layout()
            )));
        }

        let plan = blit_plan(image.width(), image.height(), image.mip_levels());
        let handle = image.handle();
        let last_level = image.mip_levels() - 1;

        self.transfer.submit_one_shot(|device, cmd| {
            for step in &plan {
                record_blit_step(device, cmd, handle, step)?;
            }
            record_layout_barrier(
                device,
                cmd,
                handle,
                vk::ImageAspectFlags::COLOR,
                last_level,
                1,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            )
        })?;

        image.set_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        log::debug!(
            "Generated {} mip levels for {}x{} image",
            image.mip_levels(),
            image.width(),
            image.height()
        );
        Ok(())
    }
}

fn record_blit_step(
    device: &Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    step: &BlitStep,
) -> VulkanResult<()> {
    record_layout_barrier(
        device,
        cmd,
        image,
        vk::ImageAspectFlags::COLOR,
        step.src_level,
        1,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
    )?;

    let corner = |(width, height): (u32, u32)| vk::Offset3D {
        x: width as i32,
        y: height as i32,
        z: 1,
    };
    let subresource = |mip_level| vk::ImageSubresourceLayers {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        mip_level,
        base_array_layer: 0,
        layer_count: 1,
    };

    let blit = vk::ImageBlit {
        src_subresource: subresource(step.src_level),
        src_offsets: [vk::Offset3D::default(), corner(step.src_extent)],
        dst_subresource: subresource(step.dst_level),
        dst_offsets: [vk::Offset3D::default(), corner(step.dst_extent)],
    };

    unsafe {
        device.cmd_blit_image(
            cmd,
            image,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            &[blit],
            vk::Filter::LINEAR,
        );
    }

    record_layout_barrier(
        device,
        cmd,
        image,
        vk::ImageAspectFlags::COLOR,
        step.src_level,
        1,
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    )
}
