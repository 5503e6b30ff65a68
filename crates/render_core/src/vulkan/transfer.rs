//! Host to device transfers through staging buffers
//!
//! Everything here runs at setup time. Each operation records a one-shot
//! command buffer, submits it to the graphics queue and blocks until the
//! queue is idle, so no synchronization leaks out to the caller. The
//! one-shot buffer is returned to the pool on every exit path, including a
//! failed recording.

use crate::error::{VulkanError, VulkanResult};
use crate::vulkan::commands::CommandPool;
use crate::vulkan::context::DeviceContext;
use crate::vulkan::memory::{GpuBuffer, GpuImage, ResourceAllocator};
use ash::{vk, Device};

/// Access masks and pipeline stages for one layout change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutTransition {
    /// Writes that must be available before the transition
    pub src_access: vk::AccessFlags,
    /// Accesses that wait for the transition
    pub dst_access: vk::AccessFlags,
    /// Stage producing the source accesses
    pub src_stage: vk::PipelineStageFlags,
    /// Stage consuming the destination accesses
    pub dst_stage: vk::PipelineStageFlags,
}

/// Barrier parameters for the layout changes the viewer performs
pub fn transition_masks(
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
) -> Option<LayoutTransition> {
    use vk::ImageLayout as L;

    let (src_access, dst_access, src_stage, dst_stage) = match (old_layout, new_layout) {
        (L::UNDEFINED, L::TRANSFER_DST_OPTIMAL) => (
            vk::AccessFlags::empty(),
            vk::AccessFlags::TRANSFER_WRITE,
            vk::PipelineStageFlags::TOP_OF_PIPE,
            vk::PipelineStageFlags::TRANSFER,
        ),
        (L::TRANSFER_DST_OPTIMAL, L::TRANSFER_SRC_OPTIMAL) => (
            vk::AccessFlags::TRANSFER_WRITE,
            vk::AccessFlags::TRANSFER_READ,
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::TRANSFER,
        ),
        (L::TRANSFER_DST_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL) => (
            vk::AccessFlags::TRANSFER_WRITE,
            vk::AccessFlags::SHADER_READ,
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::FRAGMENT_SHADER,
        ),
        (L::TRANSFER_SRC_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL) => (
            vk::AccessFlags::TRANSFER_READ,
            vk::AccessFlags::SHADER_READ,
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::FRAGMENT_SHADER,
        ),
        (L::UNDEFINED, L::DEPTH_STENCIL_ATTACHMENT_OPTIMAL) => (
            vk::AccessFlags::empty(),
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            vk::PipelineStageFlags::TOP_OF_PIPE,
            vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
        ),
        _ => return None,
    };

    Some(LayoutTransition {
        src_access,
        dst_access,
        src_stage,
        dst_stage,
    })
}

/// Record an image memory barrier moving `level_count` levels from `old_layout` to `new_layout`
pub(crate) fn record_layout_barrier(
    device: &Device,
    command_buffer: vk::CommandBuffer,
    image: vk::Image,
    aspect_mask: vk::ImageAspectFlags,
    base_mip_level: u32,
    level_count: u32,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
) -> VulkanResult<()> {
    let masks = transition_masks(old_layout, new_layout).ok_or_else(|| {
        VulkanError::invalid(format!(
            "Unsupported layout transition {old_layout:?} -> {new_layout:?}"
        ))
    })?;

    let barrier = vk::ImageMemoryBarrier::builder()
        .old_layout(old_layout)
        .new_layout(new_layout)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask,
            base_mip_level,
            level_count,
            base_array_layer: 0,
            layer_count: 1,
        })
        .src_access_mask(masks.src_access)
        .dst_access_mask(masks.dst_access)
        .build();

    unsafe {
        device.cmd_pipeline_barrier(
            command_buffer,
            masks.src_stage,
            masks.dst_stage,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[barrier],
        );
    }
    Ok(())
}

/// Command buffer that goes back to its pool when dropped
struct OneShotCommands<'a> {
    pool: &'a CommandPool,
    buffer: vk::CommandBuffer,
}

impl Drop for OneShotCommands<'_> {
    fn drop(&mut self) {
        self.pool.free_command_buffers(&[self.buffer]);
    }
}

/// Synchronous staging uploads, copies and layout transitions
pub struct TransferEngine {
    device: Device,
    queue: vk::Queue,
    pool: CommandPool,
}

impl TransferEngine {
    /// Create an engine submitting to the graphics queue
    pub fn new(context: &DeviceContext) -> VulkanResult<Self> {
        let pool = CommandPool::new(
            context.device().clone(),
            context.graphics_queue_family(),
            vk::CommandPoolCreateFlags::TRANSIENT,
        )?;

        Ok(Self {
            device: context.device().clone(),
            queue: context.graphics_queue(),
            pool,
        })
    }

    /// Record with `record`, submit, and wait for the queue to drain
    pub fn submit_one_shot<F>(&self, record: F) -> VulkanResult<()>
    where
        F: FnOnce(&Device, vk::CommandBuffer) -> VulkanResult<()>,
    {
        let buffers = self.pool.allocate_command_buffers(1)?;
        let commands = OneShotCommands {
            pool: &self.pool,
            buffer: buffers[0],
        };

        let begin_info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

        unsafe {
            self.device
                .begin_command_buffer(commands.buffer, &begin_info)
                .map_err(VulkanError::Api)?;
        }

        record(&self.device, commands.buffer)?;

        let command_buffers = [commands.buffer];
        let submit_info = vk::SubmitInfo::builder()
            .command_buffers(&command_buffers)
            .build();

        unsafe {
            self.device
                .end_command_buffer(commands.buffer)
                .map_err(VulkanError::Api)?;
            self.device
                .queue_submit(self.queue, &[submit_info], vk::Fence::null())
                .map_err(VulkanError::Api)?;
            self.device
                .queue_wait_idle(self.queue)
                .map_err(VulkanError::Api)?;
        }

        Ok(())
    }

    fn staging_buffer(&self, allocator: &ResourceAllocator, data: &[u8]) -> VulkanResult<GpuBuffer> {
        let staging = allocator.create_buffer(
            data.len() as vk::DeviceSize,
            vk::BufferUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;
        staging.write_bytes(data)?;
        Ok(staging)
    }

    /// Copy `data` into the start of a device-local buffer
    pub fn upload_to_buffer(
        &self,
        allocator: &ResourceAllocator,
        data: &[u8],
        destination: &GpuBuffer,
    ) -> VulkanResult<()> {
        if !destination
            .usage()
            .contains(vk::BufferUsageFlags::TRANSFER_DST)
        {
            return Err(VulkanError::invalid(
                "Upload destination buffer lacks TRANSFER_DST usage",
            ));
        }

        let staging = self.staging_buffer(allocator, data)?;
        self.copy_buffer(&staging, destination, data.len() as vk::DeviceSize)?;

        log::debug!("Uploaded {} bytes to device-local buffer", data.len());
        Ok(())
    }

    /// Create a device-local buffer holding `data`
    pub fn create_device_local_buffer(
        &self,
        allocator: &ResourceAllocator,
        data: &[u8],
        usage: vk::BufferUsageFlags,
    ) -> VulkanResult<GpuBuffer> {
        let buffer = allocator.create_buffer(
            data.len() as vk::DeviceSize,
            usage | vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;
        self.upload_to_buffer(allocator, data, &buffer)?;
        Ok(buffer)
    }

    /// Copy tightly packed texels into level 0 and leave every level in `final_layout`
    pub fn upload_to_image(
        &self,
        allocator: &ResourceAllocator,
        data: &[u8],
        destination: &mut GpuImage,
        final_layout: vk::ImageLayout,
    ) -> VulkanResult<()> {
        let expected = destination.base_level_bytes();
        if data.len() as vk::DeviceSize != expected {
            return Err(VulkanError::invalid(format!(
                "Image upload expects {expected} bytes, got {}",
                data.len()
            )));
        }

        let staging = self.staging_buffer(allocator, data)?;

        let image = destination.handle();
        let aspect = destination.aspect_mask();
        let levels = destination.mip_levels();
        let current = destination.layout();
        let (width, height) = (destination.width(), destination.height());

        self.submit_one_shot(|device, cmd| {
            if current != vk::ImageLayout::TRANSFER_DST_OPTIMAL {
                record_layout_barrier(
                    device,
                    cmd,
                    image,
                    aspect,
                    0,
                    levels,
                    current,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                )?;
            }
            record_buffer_to_image(device, cmd, staging.handle(), image, aspect, width, height);
            if final_layout != vk::ImageLayout::TRANSFER_DST_OPTIMAL {
                record_layout_barrier(
                    device,
                    cmd,
                    image,
                    aspect,
                    0,
                    levels,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    final_layout,
                )?;
            }
            Ok(())
        })?;

        destination.set_layout(final_layout);
        log::debug!("Uploaded {width}x{height} texels, image now {final_layout:?}");
        Ok(())
    }

    /// Copy `size` bytes from the start of `source` to the start of `destination`
    pub fn copy_buffer(
        &self,
        source: &GpuBuffer,
        destination: &GpuBuffer,
        size: vk::DeviceSize,
    ) -> VulkanResult<()> {
        if size > source.size() || size > destination.size() {
            return Err(VulkanError::invalid(format!(
                "Copy of {size} bytes exceeds buffer bounds ({} -> {})",
                source.size(),
                destination.size()
            )));
        }

        self.submit_one_shot(|device, cmd| {
            let region = vk::BufferCopy {
                src_offset: 0,
                dst_offset: 0,
                size,
            };
            unsafe {
                device.cmd_copy_buffer(cmd, source.handle(), destination.handle(), &[region]);
            }
            Ok(())
        })
    }

    /// Copy a buffer into level 0 of an image already in `TRANSFER_DST_OPTIMAL`
    pub fn copy_buffer_to_image(&self, source: &GpuBuffer, destination: &GpuImage) -> VulkanResult<()> {
        if destination.layout() != vk::ImageLayout::TRANSFER_DST_OPTIMAL {
            return Err(VulkanError::invalid(format!(
                "Image must be in TRANSFER_DST_OPTIMAL for a copy, is {:?}",
                destination.layout()
            )));
        }
        if source.size() < destination.base_level_bytes() {
            return Err(VulkanError::invalid("Source buffer smaller than image level 0"));
        }

        self.submit_one_shot(|device, cmd| {
            record_buffer_to_image(
                device,
                cmd,
                source.handle(),
                destination.handle(),
                destination.aspect_mask(),
                destination.width(),
                destination.height(),
            );
            Ok(())
        })
    }

    /// Move every level of `image` to `new_layout`
    pub fn transition_layout(&self, image: &mut GpuImage, new_layout: vk::ImageLayout) -> VulkanResult<()> {
        let old_layout = image.layout();
        if old_layout == new_layout {
            return Ok(());
        }

        let handle = image.handle();
        let aspect = image.aspect_mask();
        let levels = image.mip_levels();
        self.submit_one_shot(|device, cmd| {
            record_layout_barrier(device, cmd, handle, aspect, 0, levels, old_layout, new_layout)
        })?;

        image.set_layout(new_layout);
        Ok(())
    }

    /// Copy a buffer's contents back to host memory
    ///
    /// Debug path; `source` needs `TRANSFER_SRC` usage.
    pub fn read_back(&self, allocator: &ResourceAllocator, source: &GpuBuffer) -> VulkanResult<Vec<u8>> {
        if !source.usage().contains(vk::BufferUsageFlags::TRANSFER_SRC) {
            return Err(VulkanError::invalid(
                "Read-back source buffer lacks TRANSFER_SRC usage",
            ));
        }

        let staging = allocator.create_buffer(
            source.size(),
            vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;
        self.copy_buffer(source, &staging, source.size())?;
        staging.read_bytes(source.size() as usize)
    }
}

fn record_buffer_to_image(
    device: &Device,
    command_buffer: vk::CommandBuffer,
    buffer: vk::Buffer,
    image: vk::Image,
    aspect_mask: vk::ImageAspectFlags,
    width: u32,
    height: u32,
) {
    let region = vk::BufferImageCopy {
        buffer_offset: 0,
        buffer_row_length: 0,
        buffer_image_height: 0,
        image_subresource: vk::ImageSubresourceLayers {
            aspect_mask,
            mip_level: 0,
            base_array_layer: 0,
            layer_count: 1,
        },
        image_offset: vk::Offset3D { x: 0, y: 0, z: 0 },
        image_extent: vk::Extent3D {
            width,
            height,
            depth: 1,
        },
    };

    unsafe {
        device.cmd_copy_buffer_to_image(
            command_buffer,
            buffer,
            image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            &[region],
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_transition_masks() {
        let masks = transition_masks(
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        )
        .unwrap();
        assert!(masks.src_access.is_empty());
        assert_eq!(masks.dst_access, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(masks.src_stage, vk::PipelineStageFlags::TOP_OF_PIPE);
        assert_eq!(masks.dst_stage, vk::PipelineStageFlags::TRANSFER);
    }

    #[test]
    fn test_sampling_transition_waits_for_transfer() {
        let masks = transition_masks(
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )
        .unwrap();
        assert_eq!(masks.src_access, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(masks.dst_access, vk::AccessFlags::SHADER_READ);
        assert_eq!(masks.dst_stage, vk::PipelineStageFlags::FRAGMENT_SHADER);
    }

    #[test]
    fn test_depth_transition() {
        let masks = transition_masks(
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        )
        .unwrap();
        assert_eq!(masks.dst_stage, vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS);
    }

    #[test]
    fn test_unknown_transition_rejected() {
        assert!(transition_masks(
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        )
        .is_none());
    }
}
