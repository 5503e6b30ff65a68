//! # Render Core
//!
//! GPU resource management and frame synchronization for a Vulkan viewer
//! that draws one textured, indexed model.
//!
//! ## Overview
//!
//! - **Resources**: buffers and images with dedicated memory, staging
//!   uploads, layout tracking and mip generation
//! - **Presentation**: swapchain lifecycle including rebuilds on resize
//! - **Frame loop**: a bounded number of frames in flight, each with its own
//!   command buffer, semaphores, fence and uniform buffer
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use render_core::prelude::*;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = RenderConfig::default();
//!     let mut window = Window::new(&config.window.title, config.window.width, config.window.height)?;
//!     let model = MeshData::from_triangles(&load_obj_triangles(&config.assets.model_path)?);
//!     let texture = ImageData::from_file(&config.assets.texture_path)?;
//!
//!     let mut core = RenderCore::initialize(&mut window, &config, &model, &texture)?;
//!     while !window.should_close() {
//!         window.poll_events();
//!         core.tick()?;
//!     }
//!     core.shutdown()?;
//!     Ok(())
//! }
//! ```

pub mod assets;
pub mod config;
pub mod error;
pub mod logging;
pub mod mesh;
pub mod uniform;
pub mod vulkan;
pub mod window;

mod renderer;

pub use error::{ErrorKind, VulkanError, VulkanResult};
pub use renderer::{RenderCore, VulkanFrameBackend};

/// Common imports for viewer applications
pub mod prelude {
    pub use crate::{
        assets::{load_obj_triangles, AssetError, ImageData},
        config::{Config, ConfigError, RenderConfig},
        error::{ErrorKind, VulkanError, VulkanResult},
        mesh::{MeshData, Vertex},
        vulkan::TickOutcome,
        window::{SurfaceProvider, Window, WindowError},
        RenderCore,
    };
}
