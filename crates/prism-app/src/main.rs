// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
mod config;
mod scene;

use anyhow::{Context, Result};
use clap::Parser;
use prism_core::init_tracing;
use prism_render::{RenderSettings, RenderSize, Renderer, Scene};
use prism_render_vk::VkRenderer;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{error, info, warn};

use prism_platform::winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::{Window, WindowId},
};

use config::AppConfig;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML config file; missing means defaults
    #[arg(long, default_value = "prism.toml")]
    config: PathBuf,
    /// Texture image, overrides `render.texture`
    #[arg(long)]
    texture: Option<PathBuf>,
    /// Directory holding mesh.vert.spv / mesh.frag.spv, overrides `render.shader_dir`
    #[arg(long)]
    shaders: Option<PathBuf>,
}

struct App {
    title: String,
    initial_size: (u32, u32),
    settings: RenderSettings,
    scene: Scene,

    window: Option<Window>,
    renderer: Option<VkRenderer>,
    render_size: RenderSize,
    fatal: Option<anyhow::Error>,

    started: Instant,
    frames: u32,
    last_fps_instant: Instant,
}

impl App {
    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        error!("{err:#}");
        self.fatal = Some(err);
        self.renderer = None;
        self.window = None;
        event_loop.exit();
    }

    fn create_renderer(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let (w, h) = self.initial_size;
        let window = event_loop
            .create_window(prism_platform::window_attributes(&self.title, w, h))
            .context("creating window")?;
        let size = window.inner_size();
        self.render_size = RenderSize::new(size.width, size.height);

        let renderer = VkRenderer::new(
            &window,
            &window,
            self.render_size,
            &self.scene,
            &self.settings,
        )?;
        info!(
            "window {}x{}, vsync={}, record={:?}, uniforms={:?}",
            size.width,
            size.height,
            self.settings.vsync,
            self.settings.record_mode,
            self.settings.uniform_scope
        );

        self.window = Some(window);
        self.renderer = Some(renderer);
        Ok(())
    }

    fn is_paused(&self) -> bool {
        self.render_size.is_zero_area() || self.renderer.as_ref().is_some_and(|r| r.is_paused())
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() {
            if let Err(e) = self.create_renderer(event_loop) {
                self.fail(event_loop, e);
                return;
            }
        }
        if let Some(w) = &self.window {
            w.request_redraw();
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        if let Some(window) = &self.window {
            if window_id != window.id() {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("CloseRequested");
                // renderer before window: the surface borrows the native handle
                self.renderer = None;
                self.window = None;
                event_loop.exit();
            }

            WindowEvent::Resized(new_size) => {
                self.render_size = RenderSize::new(new_size.width, new_size.height);
                info!(
                    "Resized to {}x{} (paused={})",
                    new_size.width,
                    new_size.height,
                    prism_platform::is_zero_area(new_size)
                );
                if let Some(r) = &mut self.renderer {
                    r.resize(self.render_size);
                }
                if let Some(w) = &self.window {
                    w.request_redraw();
                }
            }

            WindowEvent::RedrawRequested => {
                let uniforms = scene::frame_uniforms(self.started.elapsed(), self.render_size);
                let Some(renderer) = &mut self.renderer else {
                    return;
                };
                let before = renderer.frames_presented();
                match renderer.render(&uniforms) {
                    Ok(()) => {
                        if renderer.frames_presented() > before {
                            self.frames = self.frames.saturating_add(1);
                        }
                    }
                    Err(e) => self.fail(event_loop, e),
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.renderer.is_none() {
            return;
        }

        if self.is_paused() {
            // minimized: block until the next window event
            event_loop.set_control_flow(ControlFlow::Wait);
            self.frames = 0;
            return;
        }

        event_loop.set_control_flow(ControlFlow::Poll);
        if let Some(w) = &self.window {
            w.request_redraw();
        }

        let now = Instant::now();
        if now.duration_since(self.last_fps_instant).as_secs_f32() >= 1.0 {
            info!("fps ~ {}", self.frames);
            self.frames = 0;
            self.last_fps_instant = now;
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let (mut cfg, config_err) = match AppConfig::load(&args.config) {
        Ok(c) => (c, None),
        Err(e) => (AppConfig::default(), Some(e)),
    };

    init_tracing(&cfg.render.log);
    if let Some(e) = config_err {
        warn!("config: {e:#}; using defaults");
    }

    if let Some(t) = args.texture {
        cfg.render.texture = Some(t);
    }
    if let Some(s) = args.shaders {
        cfg.render.shader_dir = s;
    }

    let scene = scene::build_scene(cfg.render.texture.as_deref())?;
    let event_loop: EventLoop<()> = EventLoop::new()?;

    let now = Instant::now();
    let mut app = App {
        title: cfg.window.title.clone(),
        initial_size: (cfg.window.width, cfg.window.height),
        settings: cfg.settings(),
        scene,
        window: None,
        renderer: None,
        render_size: RenderSize::new(cfg.window.width, cfg.window.height),
        fatal: None,
        started: now,
        frames: 0,
        last_fps_instant: now,
    };

    event_loop.run_app(&mut app)?;
    match app.fatal.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
