// SPDX-License-Identifier: CEPL-1.0
//! Vulkan presentation engine: surface negotiation and recreation, the
//! two-slot frame ring, staged uploads, command recording and the frame loop.
#![deny(unsafe_op_in_unsafe_fn)]

mod ash_gpu;
pub mod error;
pub mod gpu;
pub mod pipeline;
pub mod presenter;
pub mod recorder;
pub mod swapchain;
pub mod sync;
pub mod upload;

#[cfg(test)]
mod fake_gpu;

use anyhow::{Context, Result};
use prism_render::{FrameUniforms, RenderSettings, RenderSize, Renderer, Scene};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::{debug, info};

pub use ash_gpu::AshGpu;
pub use error::RenderError;
pub use gpu::Gpu;
pub use pipeline::ShaderSet;
pub use presenter::{FrameOutcome, Presenter, Recreate};
pub use swapchain::SurfaceConfig;
pub use sync::FRAMES_IN_FLIGHT;

pub struct VkRenderer {
    presenter: Presenter<AshGpu>,
    skipped: u64,
}

impl VkRenderer {
    pub fn is_paused(&self) -> bool {
        self.presenter.is_paused()
    }

    pub fn surface_config(&self) -> Option<SurfaceConfig> {
        self.presenter.surface_config()
    }

    pub fn frames_presented(&self) -> u64 {
        self.presenter.frames_presented()
    }
}

impl Renderer for VkRenderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        scene: &Scene,
        settings: &RenderSettings,
    ) -> Result<Self> {
        let shaders = ShaderSet::load(&settings.shader_dir)
            .with_context(|| format!("loading shaders from {}", settings.shader_dir.display()))?;
        let gpu = AshGpu::new(window, display).context("creating Vulkan device")?;
        let presenter = Presenter::new(gpu, size, scene, settings.clone(), shaders)
            .context("building presentation state")?;
        match presenter.surface_config() {
            Some(c) => info!(
                "vk renderer ready: {}x{} {:?}, {} images",
                c.extent.width, c.extent.height, c.present_mode, c.image_count
            ),
            None => info!("vk renderer ready, surface paused"),
        }
        Ok(Self {
            presenter,
            skipped: 0,
        })
    }

    fn resize(&mut self, size: RenderSize) {
        self.presenter.request_resize(size);
    }

    fn render(&mut self, uniforms: &FrameUniforms) -> Result<()> {
        match self.presenter.draw_frame(uniforms).context("drawing frame")? {
            FrameOutcome::Presented { .. } | FrameOutcome::Paused => {}
            FrameOutcome::Skipped => {
                self.skipped += 1;
                debug!("frame skipped ({} so far)", self.skipped);
            }
        }
        Ok(())
    }

    fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.presenter.set_clear_color(rgba);
    }

    fn set_vsync(&mut self, on: bool) {
        self.presenter.set_vsync(on);
    }
}
