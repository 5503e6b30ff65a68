//! Per-frame command recording
//!
//! Recording is split in two. [`plan_frame`] turns the frame's inputs into a
//! list of [`DrawCommand`]s without touching the device, and
//! [`CommandRecorder`] encodes such a list into a Vulkan command buffer.

use crate::error::{VulkanError, VulkanResult};
use crate::vulkan::frame::SlotState;
use ash::{vk, Device};

/// Depth value the depth attachment is cleared to
pub const CLEAR_DEPTH: f32 = 1.0;
/// Stencil value the depth attachment is cleared to
pub const CLEAR_STENCIL: u32 = 0;

/// One step of the fixed draw sequence
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DrawCommand {
    /// Begin the forward pass, clearing color and depth
    BeginRenderPass {
        /// Render pass to begin
        render_pass: vk::RenderPass,
        /// Framebuffer of the acquired swapchain image
        framebuffer: vk::Framebuffer,
        /// Render area
        extent: vk::Extent2D,
        /// Color attachment clear value
        clear_color: [f32; 4],
        /// Depth clear value
        clear_depth: f32,
        /// Stencil clear value
        clear_stencil: u32,
    },
    /// Full-extent dynamic viewport
    SetViewport(vk::Extent2D),
    /// Full-extent dynamic scissor
    SetScissor(vk::Extent2D),
    /// Bind the graphics pipeline
    BindPipeline(vk::Pipeline),
    /// Bind the vertex buffer at binding 0
    BindVertexBuffer(vk::Buffer),
    /// Bind the 32-bit index buffer
    BindIndexBuffer(vk::Buffer),
    /// Bind the slot's descriptor set at set 0
    BindDescriptorSet {
        /// Layout the pipeline was created with
        layout: vk::PipelineLayout,
        /// Set for the current frame slot
        set: vk::DescriptorSet,
    },
    /// Draw the whole index buffer once
    DrawIndexed {
        /// Number of indices
        index_count: u32,
    },
    /// End the forward pass
    EndRenderPass,
}

/// Static resources every frame draws with
#[derive(Debug, Clone, Copy)]
pub struct DrawResources<'a> {
    /// Forward render pass
    pub render_pass: vk::RenderPass,
    /// Model pipeline
    pub pipeline: vk::Pipeline,
    /// Layout of the model pipeline
    pub pipeline_layout: vk::PipelineLayout,
    /// Deduplicated vertices
    pub vertex_buffer: vk::Buffer,
    /// u32 indices into `vertex_buffer`
    pub index_buffer: vk::Buffer,
    /// Number of indices in `index_buffer`
    pub index_count: u32,
    /// One descriptor set per frame slot
    pub descriptor_sets: &'a [vk::DescriptorSet],
    /// One framebuffer per swapchain image
    pub framebuffers: &'a [vk::Framebuffer],
    /// Color the frame is cleared to
    pub clear_color: [f32; 4],
}

/// Draw sequence for `frame_index` rendering into swapchain image `image_index`
pub fn plan_frame(
    slot_state: SlotState,
    frame_index: usize,
    image_index: u32,
    resources: &DrawResources<'_>,
    extent: vk::Extent2D,
) -> VulkanResult<Vec<DrawCommand>> {
    if slot_state == SlotState::Submitted {
        return Err(VulkanError::Recording(format!(
            "Frame slot {frame_index} is still submitted"
        )));
    }

    let set = *resources.descriptor_sets.get(frame_index).ok_or_else(|| {
        VulkanError::invalid(format!(
            "Frame index {frame_index} out of range for {} descriptor sets",
            resources.descriptor_sets.len()
        ))
    })?;
    let framebuffer = *resources
        .framebuffers
        .get(image_index as usize)
        .ok_or_else(|| {
            VulkanError::invalid(format!(
                "Image index {image_index} out of range for {} framebuffers",
                resources.framebuffers.len()
            ))
        })?;

    Ok(vec![
        DrawCommand::BeginRenderPass {
            render_pass: resources.render_pass,
            framebuffer,
            extent,
            clear_color: resources.clear_color,
            clear_depth: CLEAR_DEPTH,
            clear_stencil: CLEAR_STENCIL,
        },
        DrawCommand::SetViewport(extent),
        DrawCommand::SetScissor(extent),
        DrawCommand::BindPipeline(resources.pipeline),
        DrawCommand::BindVertexBuffer(resources.vertex_buffer),
        DrawCommand::BindIndexBuffer(resources.index_buffer),
        DrawCommand::BindDescriptorSet {
            layout: resources.pipeline_layout,
            set,
        },
        DrawCommand::DrawIndexed {
            index_count: resources.index_count,
        },
        DrawCommand::EndRenderPass,
    ])
}

/// Encodes planned draw commands into command buffers
pub struct CommandRecorder {
    device: Device,
}

impl CommandRecorder {
    /// Create a recorder for buffers from a pool with `RESET_COMMAND_BUFFER`
    pub fn new(device: Device) -> Self {
        Self { device }
    }

    /// Reset `command_buffer` and record `commands` into it
    pub fn record(&self, command_buffer: vk::CommandBuffer, commands: &[DrawCommand]) -> VulkanResult<()> {
        let begin_info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

        unsafe {
            self.device
                .reset_command_buffer(command_buffer, vk::CommandBufferResetFlags::empty())
                .map_err(VulkanError::Api)?;
            self.device
                .begin_command_buffer(command_buffer, &begin_info)
                .map_err(VulkanError::Api)?;
        }

        for command in commands {
            self.encode(command_buffer, command);
        }

        unsafe {
            self.device
                .end_command_buffer(command_buffer)
                .map_err(VulkanError::Api)
        }
    }

    fn encode(&self, cmd: vk::CommandBuffer, command: &DrawCommand) {
        let device = &self.device;
        match *command {
            DrawCommand::BeginRenderPass {
                render_pass,
                framebuffer,
                extent,
                clear_color,
                clear_depth,
                clear_stencil,
            } => {
                let clear_values = [
                    vk::ClearValue {
                        color: vk::ClearColorValue {
                            float32: clear_color,
                        },
                    },
                    vk::ClearValue {
                        depth_stencil: vk::ClearDepthStencilValue {
                            depth: clear_depth,
                            stencil: clear_stencil,
                        },
                    },
                ];
                let begin_info = vk::RenderPassBeginInfo::builder()
                    .render_pass(render_pass)
                    .framebuffer(framebuffer)
                    .render_area(vk::Rect2D {
                        offset: vk::Offset2D { x: 0, y: 0 },
                        extent,
                    })
                    .clear_values(&clear_values);
                unsafe {
                    device.cmd_begin_render_pass(cmd, &begin_info, vk::SubpassContents::INLINE);
                }
            }
            DrawCommand::SetViewport(extent) => {
                let viewport = vk::Viewport {
                    x: 0.0,
                    y: 0.0,
                    width: extent.width as f32,
                    height: extent.height as f32,
                    min_depth: 0.0,
                    max_depth: 1.0,
                };
                unsafe { device.cmd_set_viewport(cmd, 0, &[viewport]) };
            }
            DrawCommand::SetScissor(extent) => {
                let scissor = vk::Rect2D {
                    offset: vk::Offset2D { x: 0, y: 0 },
                    extent,
                };
                unsafe { device.cmd_set_scissor(cmd, 0, &[scissor]) };
            }
            DrawCommand::BindPipeline(pipeline) => unsafe {
                device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pipeline);
            },
            DrawCommand::BindVertexBuffer(buffer) => unsafe {
                device.cmd_bind_vertex_buffers(cmd, 0, &[buffer], &[0]);
            },
            DrawCommand::BindIndexBuffer(buffer) => unsafe {
                device.cmd_bind_index_buffer(cmd, buffer, 0, vk::IndexType::UINT32);
            },
            DrawCommand::BindDescriptorSet { layout, set } => unsafe {
                device.cmd_bind_descriptor_sets(
                    cmd,
                    vk::PipelineBindPoint::GRAPHICS,
                    layout,
                    0,
                    &[set],
                    &[],
                );
            },
            DrawCommand::DrawIndexed { index_count } => unsafe {
                device.cmd_draw_indexed(cmd, index_count, 1, 0, 0, 0);
            },
            DrawCommand::EndRenderPass => unsafe {
                device.cmd_end_render_pass(cmd);
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    const EXTENT: vk::Extent2D = vk::Extent2D {
        width: 800,
        height: 600,
    };

    fn sets() -> Vec<vk::DescriptorSet> {
        vec![vk::DescriptorSet::from_raw(10), vk::DescriptorSet::from_raw(11)]
    }

    fn framebuffers() -> Vec<vk::Framebuffer> {
        (20..23).map(vk::Framebuffer::from_raw).collect()
    }

    fn resources<'a>(
        sets: &'a [vk::DescriptorSet],
        framebuffers: &'a [vk::Framebuffer],
    ) -> DrawResources<'a> {
        DrawResources {
            render_pass: vk::RenderPass::from_raw(1),
            pipeline: vk::Pipeline::from_raw(2),
            pipeline_layout: vk::PipelineLayout::from_raw(3),
            vertex_buffer: vk::Buffer::from_raw(4),
            index_buffer: vk::Buffer::from_raw(5),
            index_count: 36,
            descriptor_sets: sets,
            framebuffers,
            clear_color: [0.0, 0.0, 0.0, 1.0],
        }
    }

    #[test]
    fn test_plan_follows_fixed_sequence() {
        let (sets, fbs) = (sets(), framebuffers());
        let plan = plan_frame(SlotState::Idle, 1, 2, &resources(&sets, &fbs), EXTENT).unwrap();

        assert_eq!(plan.len(), 9);
        assert_eq!(
            plan[0],
            DrawCommand::BeginRenderPass {
                render_pass: vk::RenderPass::from_raw(1),
                framebuffer: vk::Framebuffer::from_raw(22),
                extent: EXTENT,
                clear_color: [0.0, 0.0, 0.0, 1.0],
                clear_depth: 1.0,
                clear_stencil: 0,
            }
        );
        assert_eq!(plan[1], DrawCommand::SetViewport(EXTENT));
        assert_eq!(plan[2], DrawCommand::SetScissor(EXTENT));
        assert_eq!(
            plan[6],
            DrawCommand::BindDescriptorSet {
                layout: vk::PipelineLayout::from_raw(3),
                set: vk::DescriptorSet::from_raw(11),
            }
        );
        assert_eq!(plan[7], DrawCommand::DrawIndexed { index_count: 36 });
        assert_eq!(plan[8], DrawCommand::EndRenderPass);
    }

    #[test]
    fn test_plan_is_deterministic() {
        let (sets, fbs) = (sets(), framebuffers());
        let res = resources(&sets, &fbs);
        let first = plan_frame(SlotState::Idle, 0, 1, &res, EXTENT).unwrap();
        let second = plan_frame(SlotState::Idle, 0, 1, &res, EXTENT).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_submitted_slot_is_rejected() {
        let (sets, fbs) = (sets(), framebuffers());
        let err = plan_frame(SlotState::Submitted, 0, 0, &resources(&sets, &fbs), EXTENT).unwrap_err();
        assert!(matches!(err, VulkanError::Recording(_)));
        assert_eq!(err.kind(), crate::error::ErrorKind::ProgrammingInvariantViolation);
    }

    #[test]
    fn test_out_of_range_indices_are_rejected() {
        let (sets, fbs) = (sets(), framebuffers());
        let res = resources(&sets, &fbs);
        assert!(plan_frame(SlotState::Idle, 2, 0, &res, EXTENT).is_err());
        assert!(plan_frame(SlotState::Idle, 0, 3, &res, EXTENT).is_err());
    }
}
