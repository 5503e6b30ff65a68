//! Textured model renderer
//!
//! [`RenderCore`] builds every GPU resource once, then renders a frame per
//! [`RenderCore::tick`]. The scheduling rules live in [`FrameScheduler`];
//! [`VulkanFrameBackend`] carries them out on the device.

use crate::assets::ImageData;
use crate::config::RenderConfig;
use crate::error::{VulkanError, VulkanResult};
use crate::mesh::MeshData;
use crate::uniform::UniformBufferObject;
use crate::vulkan::commands::CommandPool;
use crate::vulkan::context::DeviceContext;
use crate::vulkan::depth::find_depth_format;
use crate::vulkan::descriptors::{write_model_set, DescriptorPool, DescriptorSetLayout};
use crate::vulkan::frame::{FrameBackend, FrameScheduler, SlotState, TickOutcome};
use crate::vulkan::memory::{GpuBuffer, ResourceAllocator};
use crate::vulkan::pipeline::{GraphicsPipeline, ShaderModule};
use crate::vulkan::recorder::{plan_frame, CommandRecorder, DrawResources};
use crate::vulkan::render_pass::RenderPass;
use crate::vulkan::swapchain::{AcquireOutcome, PresentOutcome, SwapchainManager};
use crate::vulkan::sync::FrameSync;
use crate::vulkan::texture::Texture;
use crate::vulkan::transfer::TransferEngine;
use crate::window::SurfaceProvider;
use ash::vk;
use std::time::Instant;

/// Resources owned by one frame slot
struct FrameSlot {
    sync: FrameSync,
    uniform_buffer: GpuBuffer,
    descriptor_set: vk::DescriptorSet,
    command_buffer: vk::CommandBuffer,
}

/// Device side of the frame loop
///
/// Fields are declared in reverse creation order so that implicit drops
/// tear down dependents first and the device context last.
pub struct VulkanFrameBackend {
    slots: Vec<FrameSlot>,
    recorder: CommandRecorder,
    _command_pool: CommandPool,
    _descriptor_pool: DescriptorPool,
    _texture: Texture,
    index_buffer: GpuBuffer,
    vertex_buffer: GpuBuffer,
    index_count: u32,
    pipeline: GraphicsPipeline,
    _descriptor_layout: DescriptorSetLayout,
    swapchain: SwapchainManager,
    render_pass: RenderPass,
    transfer: TransferEngine,
    allocator: ResourceAllocator,
    context: DeviceContext,

    surface_extent: vk::Extent2D,
    clear_color: [f32; 4],
    fence_timeout_ns: u64,
    start_time: Instant,
}

impl VulkanFrameBackend {
    fn new(
        surface_provider: &mut impl SurfaceProvider,
        config: &RenderConfig,
        model: &MeshData,
        image: &ImageData,
    ) -> VulkanResult<Self> {
        let context = DeviceContext::new(
            surface_provider,
            &config.application_name,
            config.validation_enabled(),
        )?;
        log::info!("Using GPU {}", context.physical_device().name());

        let device = context.device().clone();
        let allocator = ResourceAllocator::new(device.clone(), *context.memory_properties());
        let transfer = TransferEngine::new(&context)?;

        let surface_format = SwapchainManager::preferred_surface_format(&context)?;
        let depth_format = find_depth_format(&context)?;
        let render_pass =
            RenderPass::new_forward_pass(device.clone(), surface_format.format, depth_format)?;

        let surface_extent = surface_provider.framebuffer_extent();
        let swapchain = SwapchainManager::create(
            &context,
            &allocator,
            &transfer,
            render_pass.handle(),
            depth_format,
            surface_extent,
        )?;

        let descriptor_layout = DescriptorSetLayout::new_model_layout(device.clone())?;
        let pipeline = {
            let vertex_shader =
                ShaderModule::from_file(device.clone(), &config.shaders.vertex_shader_path)?;
            let fragment_shader =
                ShaderModule::from_file(device.clone(), &config.shaders.fragment_shader_path)?;
            GraphicsPipeline::new(
                device.clone(),
                render_pass.handle(),
                &vertex_shader,
                &fragment_shader,
                descriptor_layout.handle(),
            )?
        };

        let vertex_buffer = transfer.create_device_local_buffer(
            &allocator,
            bytemuck::cast_slice(&model.vertices),
            vk::BufferUsageFlags::VERTEX_BUFFER,
        )?;
        let index_buffer = transfer.create_device_local_buffer(
            &allocator,
            bytemuck::cast_slice(&model.indices),
            vk::BufferUsageFlags::INDEX_BUFFER,
        )?;
        log::info!(
            "Uploaded mesh: {} vertices, {} indices",
            model.vertices.len(),
            model.indices.len()
        );

        let texture = Texture::from_image_data(&context, &allocator, &transfer, image)?;

        let frames = config.max_frames_in_flight;
        let frame_count = u32::try_from(frames)
            .map_err(|_| VulkanError::invalid(format!("{frames} frames in flight")))?;
        let descriptor_pool = DescriptorPool::new(device.clone(), frame_count)?;
        let descriptor_sets = descriptor_pool.allocate(descriptor_layout.handle(), frames)?;

        let command_pool = CommandPool::new(
            device.clone(),
            context.graphics_queue_family(),
            vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
        )?;
        let command_buffers = command_pool.allocate_command_buffers(frame_count)?;

        let uniform_size = std::mem::size_of::<UniformBufferObject>() as vk::DeviceSize;
        let mut slots = Vec::with_capacity(frames);
        for (descriptor_set, command_buffer) in descriptor_sets.into_iter().zip(command_buffers) {
            let mut uniform_buffer = allocator.create_buffer(
                uniform_size,
                vk::BufferUsageFlags::UNIFORM_BUFFER,
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            )?;
            uniform_buffer.map_persistent()?;

            write_model_set(
                &device,
                descriptor_set,
                uniform_buffer.handle(),
                uniform_size,
                texture.view(),
                texture.sampler(),
            );

            slots.push(FrameSlot {
                sync: FrameSync::new(&device)?,
                uniform_buffer,
                descriptor_set,
                command_buffer,
            });
        }

        Ok(Self {
            slots,
            recorder: CommandRecorder::new(device),
            _command_pool: command_pool,
            _descriptor_pool: descriptor_pool,
            _texture: texture,
            index_buffer,
            vertex_buffer,
            index_count: model.index_count(),
            pipeline,
            _descriptor_layout: descriptor_layout,
            swapchain,
            render_pass,
            transfer,
            allocator,
            context,
            surface_extent,
            clear_color: config.clear_color,
            fence_timeout_ns: config.fence_timeout_ns,
            start_time: Instant::now(),
        })
    }

    fn slot(&self, slot: usize) -> VulkanResult<&FrameSlot> {
        self.slots
            .get(slot)
            .ok_or_else(|| VulkanError::invalid(format!("No frame slot {slot}")))
    }
}

impl FrameBackend for VulkanFrameBackend {
    fn surface_extent(&self) -> vk::Extent2D {
        self.surface_extent
    }

    fn wait_for_slot(&mut self, slot: usize) -> VulkanResult<()> {
        self.slot(slot)?.sync.in_flight.wait(self.fence_timeout_ns)
    }

    fn acquire(&mut self, slot: usize) -> VulkanResult<AcquireOutcome> {
        let semaphore = self.slot(slot)?.sync.image_available.handle();
        self.swapchain.acquire_next(semaphore)
    }

    fn reset_slot_fence(&mut self, slot: usize) -> VulkanResult<()> {
        self.slot(slot)?.sync.in_flight.reset()
    }

    fn update_uniforms(&mut self, slot: usize) -> VulkanResult<()> {
        let extent = self.swapchain.extent();
        let aspect = extent.width as f32 / extent.height.max(1) as f32;
        let ubo = UniformBufferObject::spinning(self.start_time.elapsed().as_secs_f32(), aspect);
        self.slot(slot)?.uniform_buffer.write_bytes(ubo.as_bytes())
    }

    fn record(&mut self, slot: usize, state: SlotState, image_index: u32) -> VulkanResult<()> {
        let frame = self.slot(slot)?;
        let descriptor_sets: Vec<vk::DescriptorSet> =
            self.slots.iter().map(|s| s.descriptor_set).collect();
        let framebuffers = self.swapchain.framebuffers();

        let resources = DrawResources {
            render_pass: self.render_pass.handle(),
            pipeline: self.pipeline.handle(),
            pipeline_layout: self.pipeline.layout(),
            vertex_buffer: self.vertex_buffer.handle(),
            index_buffer: self.index_buffer.handle(),
            index_count: self.index_count,
            descriptor_sets: &descriptor_sets,
            framebuffers: &framebuffers,
            clear_color: self.clear_color,
        };

        let commands = plan_frame(state, slot, image_index, &resources, self.swapchain.extent())?;
        self.recorder.record(frame.command_buffer, &commands)
    }

    fn submit(&mut self, slot: usize) -> VulkanResult<()> {
        let frame = self.slot(slot)?;
        let wait_semaphores = [frame.sync.image_available.handle()];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [frame.command_buffer];
        let signal_semaphores = [frame.sync.render_finished.handle()];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores)
            .build();

        unsafe {
            self.context
                .device()
                .queue_submit(
                    self.context.graphics_queue(),
                    &[submit_info],
                    frame.sync.in_flight.handle(),
                )
                .map_err(VulkanError::Api)
        }
    }

    fn present(&mut self, slot: usize, image_index: u32) -> VulkanResult<PresentOutcome> {
        let wait_semaphore = self.slot(slot)?.sync.render_finished.handle();
        self.swapchain
            .present(self.context.present_queue(), image_index, wait_semaphore)
    }

    fn recreate(&mut self, extent: vk::Extent2D) -> VulkanResult<()> {
        self.context.wait_idle()?;
        self.swapchain
            .recreate(&self.context, &self.allocator, &self.transfer, extent)?;
        log::info!(
            "Swapchain rebuilt at {}x{} with {} images",
            self.swapchain.extent().width,
            self.swapchain.extent().height,
            self.swapchain.image_count()
        );
        Ok(())
    }
}

impl Drop for VulkanFrameBackend {
    fn drop(&mut self) {
        if let Err(e) = self.context.wait_idle() {
            log::error!("Failed to wait for device idle during teardown: {e}");
        }
    }
}

/// Renders one textured, spinning model to a window surface
pub struct RenderCore {
    scheduler: FrameScheduler,
    backend: VulkanFrameBackend,
}

impl RenderCore {
    /// Build the device, swapchain and every static resource
    ///
    /// `model` must hold at least one triangle.
    pub fn initialize(
        surface_provider: &mut impl SurfaceProvider,
        config: &RenderConfig,
        model: &MeshData,
        image: &ImageData,
    ) -> VulkanResult<Self> {
        config
            .validate()
            .map_err(|e| VulkanError::InitializationFailed(e.to_string()))?;
        if model.is_empty() {
            return Err(VulkanError::invalid("Model has no triangles"));
        }

        let scheduler = FrameScheduler::new(config.max_frames_in_flight)?;
        let backend = VulkanFrameBackend::new(surface_provider, config, model, image)?;

        log::info!(
            "Render core ready: {} frames in flight, {} swapchain images",
            scheduler.frames_in_flight(),
            backend.swapchain.image_count()
        );

        Ok(Self { scheduler, backend })
    }

    /// Render one frame
    ///
    /// Out-of-date surfaces are handled internally; an error here is fatal.
    pub fn tick(&mut self) -> VulkanResult<TickOutcome> {
        self.scheduler.tick(&mut self.backend)
    }

    /// Record a new framebuffer size; the swapchain follows after the next present
    pub fn notify_resized(&mut self, width: u32, height: u32) {
        log::debug!("Framebuffer resized to {width}x{height}");
        self.backend.surface_extent = vk::Extent2D { width, height };
        self.scheduler.notify_resized();
    }

    /// Current swapchain extent
    pub fn extent(&self) -> vk::Extent2D {
        self.backend.swapchain.extent()
    }

    /// Frames presented so far
    pub fn frames_rendered(&self) -> u64 {
        self.scheduler.frames_rendered()
    }

    /// Wait for the GPU to finish, then release everything in reverse creation order
    pub fn shutdown(self) -> VulkanResult<()> {
        self.backend.context.wait_idle()?;
        log::info!(
            "Shutting down after {} frames",
            self.scheduler.frames_rendered()
        );
        Ok(())
    }
}
