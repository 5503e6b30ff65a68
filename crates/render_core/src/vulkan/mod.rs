//! Vulkan backend
//!
//! RAII wrappers over ash plus the frame loop built from them. Every wrapper
//! holds a cloned `ash::Device` and destroys its handle on drop, so owners
//! express teardown order through field order.

/// Command pools
pub mod commands;
/// Instance, surface and device selection
pub mod context;
/// Depth attachment
pub mod depth;
/// Descriptor layouts, pools and sets
pub mod descriptors;
/// Frame slot scheduling
pub mod frame;
/// Buffer and image allocation
pub mod memory;
/// Mip chain generation
pub mod mipmap;
/// Shaders and the graphics pipeline
pub mod pipeline;
/// Draw planning and command encoding
pub mod recorder;
/// Render pass and framebuffers
pub mod render_pass;
/// Swapchain lifecycle
pub mod swapchain;
/// Semaphores and fences
pub mod sync;
/// Sampled textures
pub mod texture;
/// Staging uploads, copies and layout transitions
pub mod transfer;

pub use context::{DeviceContext, PhysicalDeviceInfo};
pub use frame::{FrameBackend, FrameScheduler, SlotState, TickOutcome};
pub use memory::{find_memory_type, GpuBuffer, GpuImage, ImageDesc, ResourceAllocator};
pub use mipmap::{mip_level_count, MipmapGenerator};
pub use recorder::{plan_frame, CommandRecorder, DrawCommand, DrawResources};
pub use swapchain::{AcquireOutcome, PresentOutcome, SwapchainManager, SwapchainPlan};
pub use texture::Texture;
pub use transfer::TransferEngine;
