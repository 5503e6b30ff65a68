//! Buffer and image allocation
//!
//! Each resource gets its own `vkAllocateMemory` call and is bound at
//! offset 0. There is no sub-allocation; the viewer creates a handful of
//! long-lived resources, so a dedicated allocation per resource is simplest.
//!
//! [`GpuBuffer`] and [`GpuImage`] own their handle and memory and release
//! both on drop. Callers are responsible for dropping them only after the
//! GPU work that references them has completed.

use crate::error::{AllocationError, VulkanError, VulkanResult};
use ash::{vk, Device};
use std::ffi::c_void;
use std::ptr::NonNull;

/// First memory type whose bit is set in `type_filter` and whose flags
/// contain every bit of `properties`
///
/// Types are scanned in driver order and the first hit wins, so the result
/// only depends on the three inputs.
pub fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_filter: u32,
    properties: vk::MemoryPropertyFlags,
) -> Option<u32> {
    let count = memory_properties.memory_type_count.min(vk::MAX_MEMORY_TYPES as u32);
    (0..count).find(|&index| {
        type_filter & (1 << index) != 0
            && memory_properties.memory_types[index as usize]
                .property_flags
                .contains(properties)
    })
}

/// Creates buffers and images with dedicated memory
pub struct ResourceAllocator {
    device: Device,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
}

impl ResourceAllocator {
    /// Create an allocator for `device` using its memory type table
    pub fn new(device: Device, memory_properties: vk::PhysicalDeviceMemoryProperties) -> Self {
        Self {
            device,
            memory_properties,
        }
    }

    fn allocate(
        &self,
        requirements: vk::MemoryRequirements,
        properties: vk::MemoryPropertyFlags,
    ) -> VulkanResult<vk::DeviceMemory> {
        let memory_type_index =
            find_memory_type(&self.memory_properties, requirements.memory_type_bits, properties)
                .ok_or(AllocationError::NoSuitableMemoryType {
                    type_filter: requirements.memory_type_bits,
                    properties,
                })?;

        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type_index);

        let memory = unsafe { self.device.allocate_memory(&alloc_info, None) }.map_err(
            |result| AllocationError::Rejected {
                size: requirements.size,
                result,
            },
        )?;

        Ok(memory)
    }

    /// Create a buffer of exactly `size` bytes backed by memory with `properties`
    pub fn create_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> VulkanResult<GpuBuffer> {
        if size == 0 {
            return Err(VulkanError::invalid("Cannot create a zero-sized buffer"));
        }

        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe {
            self.device
                .create_buffer(&buffer_info, None)
                .map_err(VulkanError::Api)?
        };

        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };
        let memory = match self.allocate(requirements, properties) {
            Ok(memory) => memory,
            Err(err) => {
                unsafe { self.device.destroy_buffer(buffer, None) };
                return Err(err);
            }
        };

        if let Err(err) = unsafe { self.device.bind_buffer_memory(buffer, memory, 0) } {
            unsafe {
                self.device.destroy_buffer(buffer, None);
                self.device.free_memory(memory, None);
            }
            return Err(VulkanError::Api(err));
        }

        log::debug!("Created {size} byte buffer ({usage:?}, {properties:?})");

        Ok(GpuBuffer {
            device: self.device.clone(),
            handle: buffer,
            memory,
            size,
            usage,
            mapped: None,
        })
    }

    /// Create a 2D image with dedicated memory
    pub fn create_image(&self, desc: &ImageDesc) -> VulkanResult<GpuImage> {
        if desc.width == 0 || desc.height == 0 || desc.mip_levels == 0 {
            return Err(VulkanError::invalid(format!(
                "Image dimensions must be non-zero, got {}x{} with {} levels",
                desc.width, desc.height, desc.mip_levels
            )));
        }

        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: desc.width,
                height: desc.height,
                depth: 1,
            })
            .mip_levels(desc.mip_levels)
            .array_layers(1)
            .format(desc.format)
            .tiling(desc.tiling)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(desc.usage)
            .samples(vk::SampleCountFlags::TYPE_1)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let image = unsafe {
            self.device
                .create_image(&image_info, None)
                .map_err(VulkanError::Api)?
        };

        let requirements = unsafe { self.device.get_image_memory_requirements(image) };
        let memory = match self.allocate(requirements, desc.properties) {
            Ok(memory) => memory,
            Err(err) => {
                unsafe { self.device.destroy_image(image, None) };
                return Err(err);
            }
        };

        if let Err(err) = unsafe { self.device.bind_image_memory(image, memory, 0) } {
            unsafe {
                self.device.destroy_image(image, None);
                self.device.free_memory(memory, None);
            }
            return Err(VulkanError::Api(err));
        }

        log::debug!(
            "Created {}x{} image {:?} with {} mip levels",
            desc.width,
            desc.height,
            desc.format,
            desc.mip_levels
        );

        Ok(GpuImage {
            device: self.device.clone(),
            handle: image,
            memory,
            width: desc.width,
            height: desc.height,
            format: desc.format,
            mip_levels: desc.mip_levels,
            layout: vk::ImageLayout::UNDEFINED,
        })
    }
}

/// GPU buffer with its dedicated memory
pub struct GpuBuffer {
    device: Device,
    handle: vk::Buffer,
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
    mapped: Option<NonNull<c_void>>,
}

impl GpuBuffer {
    /// Buffer handle
    pub fn handle(&self) -> vk::Buffer {
        self.handle
    }

    /// Size in bytes
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    /// Usage flags the buffer was created with
    pub fn usage(&self) -> vk::BufferUsageFlags {
        self.usage
    }

    /// Map the whole buffer and keep it mapped until drop
    pub fn map_persistent(&mut self) -> VulkanResult<()> {
        if self.mapped.is_none() {
            self.mapped = Some(self.map()?);
        }
        Ok(())
    }

    fn map(&self) -> VulkanResult<NonNull<c_void>> {
        let ptr = unsafe {
            self.device
                .map_memory(self.memory, 0, self.size, vk::MemoryMapFlags::empty())
                .map_err(VulkanError::Api)?
        };
        NonNull::new(ptr).ok_or_else(|| VulkanError::invalid("map_memory returned null"))
    }

    /// Copy `data` to the start of the buffer
    ///
    /// The memory must be host visible and coherent. A persistent mapping is
    /// reused; otherwise the buffer is mapped for the copy and unmapped after.
    pub fn write_bytes(&self, data: &[u8]) -> VulkanResult<()> {
        if data.len() as vk::DeviceSize > self.size {
            return Err(VulkanError::invalid(format!(
                "Write of {} bytes exceeds {} byte buffer",
                data.len(),
                self.size
            )));
        }

        let (ptr, transient) = match self.mapped {
            Some(ptr) => (ptr, false),
            None => (self.map()?, true),
        };

        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.as_ptr().cast::<u8>(), data.len());
            if transient {
                self.device.unmap_memory(self.memory);
            }
        }
        Ok(())
    }

    /// Copy a slice of plain data to the start of the buffer
    pub fn write<T: bytemuck::Pod>(&self, data: &[T]) -> VulkanResult<()> {
        self.write_bytes(bytemuck::cast_slice(data))
    }

    /// Read the first `len` bytes of a host visible buffer
    pub fn read_bytes(&self, len: usize) -> VulkanResult<Vec<u8>> {
        if len as vk::DeviceSize > self.size {
            return Err(VulkanError::invalid(format!(
                "Read of {len} bytes exceeds {} byte buffer",
                self.size
            )));
        }

        let (ptr, transient) = match self.mapped {
            Some(ptr) => (ptr, false),
            None => (self.map()?, true),
        };

        let mut out = vec![0u8; len];
        unsafe {
            std::ptr::copy_nonoverlapping(ptr.as_ptr().cast::<u8>(), out.as_mut_ptr(), len);
            if transient {
                self.device.unmap_memory(self.memory);
            }
        }
        Ok(out)
    }
}

impl Drop for GpuBuffer {
    fn drop(&mut self) {
        unsafe {
            if self.mapped.take().is_some() {
                self.device.unmap_memory(self.memory);
            }
            self.device.destroy_buffer(self.handle, None);
            self.device.free_memory(self.memory, None);
        }
    }
}

/// Parameters for [`ResourceAllocator::create_image`]
#[derive(Debug, Clone, Copy)]
pub struct ImageDesc {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Number of mip levels to allocate
    pub mip_levels: u32,
    /// Texel format
    pub format: vk::Format,
    /// Tiling mode
    pub tiling: vk::ImageTiling,
    /// Usage flags
    pub usage: vk::ImageUsageFlags,
    /// Required memory properties
    pub properties: vk::MemoryPropertyFlags,
}

/// GPU image with its dedicated memory and host-tracked layout
///
/// `layout` is the layout every subresource is in once all recorded work
/// has executed. Only operations that also record the matching barrier
/// update it.
pub struct GpuImage {
    device: Device,
    handle: vk::Image,
    memory: vk::DeviceMemory,
    width: u32,
    height: u32,
    format: vk::Format,
    mip_levels: u32,
    layout: vk::ImageLayout,
}

impl GpuImage {
    /// Image handle
    pub fn handle(&self) -> vk::Image {
        self.handle
    }

    /// Width of level 0
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height of level 0
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Texel format
    pub fn format(&self) -> vk::Format {
        self.format
    }

    /// Number of mip levels
    pub fn mip_levels(&self) -> u32 {
        self.mip_levels
    }

    /// Current layout of all subresources
    pub fn layout(&self) -> vk::ImageLayout {
        self.layout
    }

    pub(crate) fn set_layout(&mut self, layout: vk::ImageLayout) {
        self.layout = layout;
    }

    /// Aspect flags implied by the format
    pub fn aspect_mask(&self) -> vk::ImageAspectFlags {
        aspect_mask_for(self.format)
    }

    /// Size in bytes of level 0 for tightly packed 4-byte texels
    pub fn base_level_bytes(&self) -> vk::DeviceSize {
        vk::DeviceSize::from(self.width) * vk::DeviceSize::from(self.height) * 4
    }
}

impl Drop for GpuImage {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_image(self.handle, None);
            self.device.free_memory(self.memory, None);
        }
    }
}

/// Aspect flags for a format: depth (and stencil) for depth formats, color otherwise
pub fn aspect_mask_for(format: vk::Format) -> vk::ImageAspectFlags {
    match format {
        vk::Format::D32_SFLOAT | vk::Format::D16_UNORM => vk::ImageAspectFlags::DEPTH,
        vk::Format::D32_SFLOAT_S8_UINT
        | vk::Format::D24_UNORM_S8_UINT
        | vk::Format::D16_UNORM_S8_UINT => {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        }
        _ => vk::ImageAspectFlags::COLOR,
    }
}

/// Image view wrapper with RAII cleanup
pub struct ImageView {
    device: Device,
    view: vk::ImageView,
}

impl ImageView {
    /// Create a 2D view covering `mip_levels` levels starting at 0
    pub fn new(
        device: Device,
        image: vk::Image,
        format: vk::Format,
        aspect_mask: vk::ImageAspectFlags,
        mip_levels: u32,
    ) -> VulkanResult<Self> {
        let create_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask,
                base_mip_level: 0,
                level_count: mip_levels,
                base_array_layer: 0,
                layer_count: 1,
            });

        let view = unsafe {
            device
                .create_image_view(&create_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self { device, view })
    }

    /// Create a view over every level of a [`GpuImage`]
    pub fn for_image(device: Device, image: &GpuImage) -> VulkanResult<Self> {
        Self::new(
            device,
            image.handle(),
            image.format(),
            image.aspect_mask(),
            image.mip_levels(),
        )
    }

    /// View handle
    pub fn handle(&self) -> vk::ImageView {
        self.view
    }
}

impl Drop for ImageView {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_image_view(self.view, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_properties(flags: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: flags.len() as u32,
            ..Default::default()
        };
        for (slot, &property_flags) in props.memory_types.iter_mut().zip(flags) {
            *slot = vk::MemoryType {
                property_flags,
                heap_index: 0,
            };
        }
        props
    }

    fn typical_props() -> vk::PhysicalDeviceMemoryProperties {
        memory_properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            vk::MemoryPropertyFlags::DEVICE_LOCAL
                | vk::MemoryPropertyFlags::HOST_VISIBLE
                | vk::MemoryPropertyFlags::HOST_COHERENT,
        ])
    }

    #[test]
    fn test_first_match_wins() {
        let props = typical_props();
        let index = find_memory_type(&props, 0b111, vk::MemoryPropertyFlags::DEVICE_LOCAL);
        assert_eq!(index, Some(0));
    }

    #[test]
    fn test_filter_masks_out_types() {
        let props = typical_props();
        let index = find_memory_type(&props, 0b110, vk::MemoryPropertyFlags::DEVICE_LOCAL);
        assert_eq!(index, Some(2));
    }

    #[test]
    fn test_superset_flags_accepted() {
        let props = typical_props();
        let host = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        assert_eq!(find_memory_type(&props, 0b100, host), Some(2));
        assert_eq!(find_memory_type(&props, 0b111, host), Some(1));
    }

    #[test]
    fn test_unsatisfiable_request() {
        let props = typical_props();
        let index = find_memory_type(&props, 0b111, vk::MemoryPropertyFlags::LAZILY_ALLOCATED);
        assert_eq!(index, None);
        assert_eq!(
            find_memory_type(&props, 0, vk::MemoryPropertyFlags::empty()),
            None
        );
    }

    #[test]
    fn test_selection_is_deterministic() {
        let props = typical_props();
        let flags = vk::MemoryPropertyFlags::HOST_VISIBLE;
        let first = find_memory_type(&props, u32::MAX, flags);
        for _ in 0..16 {
            assert_eq!(find_memory_type(&props, u32::MAX, flags), first);
        }
    }

    #[test]
    fn test_types_past_count_ignored() {
        let mut props = typical_props();
        props.memory_types[5].property_flags = vk::MemoryPropertyFlags::PROTECTED;
        let index = find_memory_type(&props, u32::MAX, vk::MemoryPropertyFlags::PROTECTED);
        assert_eq!(index, None);
    }

    #[test]
    fn test_aspect_masks() {
        assert_eq!(aspect_mask_for(vk::Format::D32_SFLOAT), vk::ImageAspectFlags::DEPTH);
        assert!(aspect_mask_for(vk::Format::D24_UNORM_S8_UINT)
            .contains(vk::ImageAspectFlags::STENCIL));
        assert_eq!(
            aspect_mask_for(vk::Format::R8G8B8A8_SRGB),
            vk::ImageAspectFlags::COLOR
        );
    }
}
