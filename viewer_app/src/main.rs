//! Model viewer
//!
//! Opens a window and spins a textured OBJ model until Escape is pressed or
//! the window is closed. An optional first argument names a TOML or RON
//! config file; without it the defaults are used.

use glfw::{Action, Key, WindowEvent};
use render_core::logging;
use render_core::prelude::*;
use std::error::Error;
use std::time::Instant;

fn load_config() -> Result<RenderConfig, ConfigError> {
    match std::env::args().nth(1) {
        Some(path) => RenderConfig::load_from_file(path),
        None => Ok(RenderConfig::default()),
    }
}

fn run(config: &RenderConfig) -> Result<(), Box<dyn Error>> {
    let mut window = Window::new(
        &config.window.title,
        config.window.width,
        config.window.height,
    )?;

    let triangles = load_obj_triangles(&config.assets.model_path)?;
    let model = MeshData::from_triangles(&triangles);
    let texture = ImageData::from_file(&config.assets.texture_path)?;

    let mut core = RenderCore::initialize(&mut window, config, &model, &texture)?;

    let started = Instant::now();
    while !window.should_close() {
        window.poll_events();
        for event in window.flush_events() {
            match event {
                WindowEvent::Key(Key::Escape, _, Action::Press, _) | WindowEvent::Close => {
                    window.set_should_close(true);
                }
                WindowEvent::FramebufferSize(width, height) => {
                    core.notify_resized(width.max(0) as u32, height.max(0) as u32);
                }
                _ => {}
            }
        }

        if core.tick()? == TickOutcome::Deferred {
            // Minimized; sleep until something happens
            window.wait_events();
        }
    }

    let elapsed = started.elapsed().as_secs_f64();
    let frames = core.frames_rendered();
    if elapsed > 0.0 {
        log::info!(
            "Rendered {frames} frames in {elapsed:.1}s ({:.1} fps)",
            frames as f64 / elapsed
        );
    }

    core.shutdown()?;
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let config = load_config();
    let log_level = config
        .as_ref()
        .map_or("info", |config| config.log_level.as_str());
    logging::init_with_default(log_level);

    let config = config.map_err(|e| {
        log::error!("Failed to load configuration: {e}");
        e
    })?;

    log::info!("Starting {}", config.application_name);

    if let Err(e) = run(&config) {
        log::error!("Viewer failed: {e}");
        return Err(e);
    }

    log::info!("Viewer exited cleanly");
    Ok(())
}
