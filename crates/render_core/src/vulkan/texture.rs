//! Sampled model texture with a full mip chain

use crate::assets::ImageData;
use crate::error::{VulkanError, VulkanResult};
use crate::vulkan::context::DeviceContext;
use crate::vulkan::memory::{GpuImage, ImageDesc, ImageView, ResourceAllocator};
use crate::vulkan::mipmap::{mip_level_count, MipmapGenerator};
use crate::vulkan::transfer::TransferEngine;
use ash::{vk, Device};

/// Color format textures are stored in
pub const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_SRGB;

/// Sampler settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplerSettings {
    /// Magnification and minification filter
    pub filter: vk::Filter,
    /// Addressing mode on every axis
    pub address_mode: vk::SamplerAddressMode,
    /// Anisotropy clamp; `None` disables anisotropic filtering
    pub max_anisotropy: Option<f32>,
    /// Upper bound on the sampled level of detail
    pub max_lod: f32,
}

impl SamplerSettings {
    /// Trilinear, repeating, anisotropy at `device_max`, every mip level reachable
    pub fn trilinear(device_max_anisotropy: f32) -> Self {
        Self {
            filter: vk::Filter::LINEAR,
            address_mode: vk::SamplerAddressMode::REPEAT,
            max_anisotropy: (device_max_anisotropy >= 1.0).then_some(device_max_anisotropy),
            max_lod: vk::LOD_CLAMP_NONE,
        }
    }
}

/// Sampler wrapper with RAII cleanup
pub struct Sampler {
    device: Device,
    sampler: vk::Sampler,
}

impl Sampler {
    /// Create a sampler from `settings`
    pub fn new(device: Device, settings: &SamplerSettings) -> VulkanResult<Self> {
        let create_info = vk::SamplerCreateInfo::builder()
            .mag_filter(settings.filter)
            .min_filter(settings.filter)
            .address_mode_u(settings.address_mode)
            .address_mode_v(settings.address_mode)
            .address_mode_w(settings.address_mode)
            .anisotropy_enable(settings.max_anisotropy.is_some())
            .max_anisotropy(settings.max_anisotropy.unwrap_or(1.0))
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
            .unnormalized_coordinates(false)
            .compare_enable(false)
            .compare_op(vk::CompareOp::ALWAYS)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .mip_lod_bias(0.0)
            .min_lod(0.0)
            .max_lod(settings.max_lod);

        let sampler = unsafe {
            device
                .create_sampler(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self { device, sampler })
    }

    /// Get the sampler handle
    pub fn handle(&self) -> vk::Sampler {
        self.sampler
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_sampler(self.sampler, None);
        }
    }
}

/// Mipmapped texture image, its view and sampler
pub struct Texture {
    sampler: Sampler,
    view: ImageView,
    image: GpuImage,
}

impl Texture {
    /// Upload `image` and generate its mip chain
    ///
    /// Fails with [`VulkanError::UnsupportedFormat`] before any GPU work if
    /// the texture format cannot be blitted linearly.
    pub fn from_image_data(
        context: &DeviceContext,
        allocator: &ResourceAllocator,
        transfer: &TransferEngine,
        image: &ImageData,
    ) -> VulkanResult<Self> {
        if image.width == 0 || image.height == 0 {
            return Err(VulkanError::invalid("Texture has a zero dimension"));
        }

        let mip_levels = mip_level_count(image.width, image.height);
        let mut gpu_image = allocator.create_image(&ImageDesc {
            width: image.width,
            height: image.height,
            mip_levels,
            format: TEXTURE_FORMAT,
            tiling: vk::ImageTiling::OPTIMAL,
            usage: vk::ImageUsageFlags::TRANSFER_SRC
                | vk::ImageUsageFlags::TRANSFER_DST
                | vk::ImageUsageFlags::SAMPLED,
            properties: vk::MemoryPropertyFlags::DEVICE_LOCAL,
        })?;

        let generator = MipmapGenerator::new(context, transfer);
        transfer.upload_to_image(
            allocator,
            &image.data,
            &mut gpu_image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        )?;
        generator.generate(&mut gpu_image)?;

        let view = ImageView::for_image(context.device().clone(), &gpu_image)?;
        let sampler = Sampler::new(
            context.device().clone(),
            &SamplerSettings::trilinear(context.max_sampler_anisotropy()),
        )?;

        log::info!(
            "Created texture {}x{} with {mip_levels} mip levels",
            image.width,
            image.height
        );

        Ok(Self {
            sampler,
            view,
            image: gpu_image,
        })
    }

    /// View over every mip level
    pub fn view(&self) -> vk::ImageView {
        self.view.handle()
    }

    /// Sampler bound alongside the view
    pub fn sampler(&self) -> vk::Sampler {
        self.sampler.handle()
    }

    /// Number of mip levels
    pub fn mip_levels(&self) -> u32 {
        self.image.mip_levels()
    }

    /// Current layout of every level
    pub fn layout(&self) -> vk::ImageLayout {
        self.image.layout()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trilinear_uses_device_anisotropy() {
        let settings = SamplerSettings::trilinear(16.0);
        assert_eq!(settings.filter, vk::Filter::LINEAR);
        assert_eq!(settings.address_mode, vk::SamplerAddressMode::REPEAT);
        assert_eq!(settings.max_anisotropy, Some(16.0));
        assert_eq!(settings.max_lod, vk::LOD_CLAMP_NONE);
    }

    #[test]
    fn test_trilinear_without_anisotropy() {
        assert_eq!(SamplerSettings::trilinear(0.0).max_anisotropy, None);
    }
}
