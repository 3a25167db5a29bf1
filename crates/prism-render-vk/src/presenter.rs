// SPDX-License-Identifier: CEPL-1.0
//! The frame loop: slot wait, acquire, image tracking, uniform refresh,
//! recording, submit, present, advance. Surface invalidation is absorbed
//! here by recreating the surface-derived state.
use ash::vk;
use prism_render::{FrameUniforms, RenderSettings, RenderSize, ResizeFlag, Scene, UniformScope};
use tracing::{debug, info, warn};

use crate::error::{Result, VkResultExt};
use crate::gpu::Gpu;
use crate::pipeline::{create_set_layout, Descriptors, GraphicsPipeline, ShaderSet};
use crate::recorder::{CommandRecorder, DrawCall, FrameTarget, Geometry};
use crate::swapchain::{negotiate, PresentPrefs, SurfaceConfig, Swapchain};
use crate::sync::{
    acquire_image, present, submit_and_signal, Acquire, FrameRing, ImagesInFlight,
    FRAMES_IN_FLIGHT,
};
use crate::upload::{upload_immutable, upload_texture, GpuBuffer, Texture, UniformBuffers};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented { image_index: u32 },
    /// Acquisition found the surface out of date; nothing was submitted.
    Skipped,
    /// The surface has zero area; nothing was acquired.
    Paused,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Recreate {
    Done,
    /// Zero-area surface; the previous generation is kept untouched.
    Deferred,
}

/// Immutable scene data, uploaded once. A mesh without indices has no
/// index buffer and draws by vertex count.
struct SceneResources {
    vertex: GpuBuffer,
    index: Option<GpuBuffer>,
    index_count: u32,
    vertex_count: u32,
    texture: Texture,
}

impl SceneResources {
    fn upload<G: Gpu>(gpu: &G, scene: &Scene) -> Result<Self> {
        let vertex = upload_immutable(
            gpu,
            bytemuck::cast_slice(&scene.mesh.vertices),
            vk::BufferUsageFlags::VERTEX_BUFFER,
        )?;
        let index = if scene.mesh.indices.is_empty() {
            None
        } else {
            match upload_immutable(
                gpu,
                bytemuck::cast_slice(&scene.mesh.indices),
                vk::BufferUsageFlags::INDEX_BUFFER,
            ) {
                Ok(b) => Some(b),
                Err(e) => {
                    vertex.destroy(gpu);
                    return Err(e);
                }
            }
        };
        let texture = match upload_texture(gpu, &scene.texture) {
            Ok(t) => t,
            Err(e) => {
                if let Some(index) = index {
                    index.destroy(gpu);
                }
                vertex.destroy(gpu);
                return Err(e);
            }
        };
        Ok(Self {
            vertex,
            index,
            index_count: scene.mesh.index_count(),
            vertex_count: scene.mesh.vertices.len() as u32,
            texture,
        })
    }

    fn geometry(&self) -> Geometry {
        match &self.index {
            Some(index) => Geometry::Indexed {
                buffer: index.buffer,
                count: self.index_count,
            },
            None => Geometry::Vertices {
                count: self.vertex_count,
            },
        }
    }

    fn destroy<G: Gpu>(self, gpu: &G) {
        self.texture.destroy(gpu);
        if let Some(index) = self.index {
            index.destroy(gpu);
        }
        self.vertex.destroy(gpu);
    }
}

/// Owns every GPU object below the device and drives one frame per call.
pub struct Presenter<G: Gpu> {
    gpu: G,
    settings: RenderSettings,
    shaders: ShaderSet,
    window: RenderSize,
    resize: ResizeFlag,
    /// Last recreation was deferred on a zero-area surface.
    paused: bool,
    /// A setting change requires a new surface generation before the next frame.
    stale: bool,
    frames: u64,

    ring: FrameRing,
    images_in_flight: ImagesInFlight,
    recorder: CommandRecorder,
    set_layout: vk::DescriptorSetLayout,
    scene: Option<SceneResources>,
    uniforms: UniformBuffers,
    descriptors: Option<Descriptors>,
    pipeline: Option<GraphicsPipeline>,
    swapchain: Option<Swapchain>,
}

impl<G: Gpu> Presenter<G> {
    /// Uploads the scene and builds the first surface generation. A
    /// zero-area window starts paused.
    pub fn new(
        gpu: G,
        window: RenderSize,
        scene: &Scene,
        settings: RenderSettings,
        shaders: ShaderSet,
    ) -> Result<Self> {
        let ring = FrameRing::new(&gpu)?;
        // From here on, Drop releases whatever was built.
        let mut p = Self {
            gpu,
            recorder: CommandRecorder::new(settings.record_mode),
            settings,
            shaders,
            window,
            resize: ResizeFlag::default(),
            paused: false,
            stale: false,
            frames: 0,
            ring,
            images_in_flight: ImagesInFlight::default(),
            set_layout: vk::DescriptorSetLayout::null(),
            scene: None,
            uniforms: UniformBuffers::default(),
            descriptors: None,
            pipeline: None,
            swapchain: None,
        };
        p.set_layout = create_set_layout(&p.gpu)?;
        p.scene = Some(SceneResources::upload(&p.gpu, scene)?);
        p.recreate()?;
        Ok(p)
    }

    pub fn gpu(&self) -> &G {
        &self.gpu
    }

    pub fn surface_config(&self) -> Option<SurfaceConfig> {
        self.swapchain.as_ref().map(|s| s.config)
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames
    }

    /// Records the new window size. Non-zero sizes raise the resize flag,
    /// read after the next present; zero pauses presentation.
    pub fn request_resize(&mut self, size: RenderSize) {
        self.window = size;
        if size.is_zero_area() {
            if !self.paused {
                info!("resize to {}x{}: presentation paused", size.width, size.height);
            }
            self.paused = true;
        } else {
            self.resize.raise();
        }
    }

    /// Recorded command buffers embed the clear value.
    pub fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.settings.clear_color = rgba;
        self.recorder.invalidate_all();
    }

    pub fn set_vsync(&mut self, on: bool) {
        if self.settings.vsync == on {
            return;
        }
        self.settings.vsync = on;
        self.stale = true;
        info!("vsync {}: surface recreation scheduled", if on { "on" } else { "off" });
    }

    fn uniform_index(&self, image_index: u32, slot: usize) -> usize {
        match self.settings.uniform_scope {
            UniformScope::PerImage => image_index as usize,
            UniformScope::PerFrameSlot => slot,
        }
    }

    pub fn draw_frame(&mut self, uniforms: &FrameUniforms) -> Result<FrameOutcome> {
        if (self.paused || self.stale || self.swapchain.is_none())
            && self.recreate()? == Recreate::Deferred
        {
            return Ok(FrameOutcome::Paused);
        }
        let (Some(swapchain), Some(pipeline), Some(descriptors), Some(scene)) = (
            self.swapchain.as_ref(),
            self.pipeline.as_ref(),
            self.descriptors.as_ref(),
            self.scene.as_ref(),
        ) else {
            return Ok(FrameOutcome::Paused);
        };

        let slot = self.ring.acquire_frame_slot(&self.gpu)?;
        let (image_index, suboptimal) = match acquire_image(&self.gpu, swapchain.handle, &slot)? {
            Acquire::Image { index, suboptimal } => (index, suboptimal),
            Acquire::OutOfDate => {
                warn!("swapchain out of date at acquire; frame skipped");
                self.recreate()?;
                return Ok(FrameOutcome::Skipped);
            }
        };
        self.images_in_flight
            .track(&self.gpu, image_index, &slot)?;

        let key = self.uniform_index(image_index, slot.index);
        self.uniforms
            .write(&self.gpu, key, bytemuck::bytes_of(uniforms))?;

        let i = image_index as usize;
        let target = FrameTarget {
            image: swapchain.images[i],
            view: swapchain.views[i],
            extent: swapchain.config.extent,
        };
        let call = DrawCall {
            pipeline: pipeline.pipeline,
            layout: pipeline.layout,
            descriptor_set: descriptors.set(key),
            vertex_buffer: scene.vertex.buffer,
            geometry: scene.geometry(),
            clear: self.settings.clear_color,
        };
        let cmd = self
            .recorder
            .prepare(&self.gpu, image_index, key, &target, &call)?;

        submit_and_signal(&self.gpu, &slot, cmd)?;
        let status = present(&self.gpu, swapchain.handle, &slot, image_index)?;
        self.ring.advance();
        self.frames += 1;

        let resized = self.resize.take();
        if suboptimal || status.needs_recreate() || resized {
            debug!("recreate after present (suboptimal={suboptimal}, present={status:?}, resized={resized})");
            self.recreate()?;
        }
        Ok(FrameOutcome::Presented { image_index })
    }

    /// Tears down and rebuilds everything derived from the surface. Waits for
    /// the device to go idle first. Safe to call repeatedly; a zero-area
    /// surface defers without touching the current generation.
    pub fn recreate(&mut self) -> Result<Recreate> {
        let prefs = PresentPrefs {
            vsync: self.settings.vsync,
            mode: self.settings.present_mode,
        };
        let config = if self.window.is_zero_area() {
            None
        } else {
            negotiate(&self.gpu, self.window, prefs)?
        };
        let Some(config) = config else {
            if !self.paused {
                info!("surface has zero area: presentation paused");
            }
            self.paused = true;
            return Ok(Recreate::Deferred);
        };

        self.gpu.device_wait_idle().op("device_wait_idle")?;

        let old = self.swapchain.take();
        let old_handle = old
            .as_ref()
            .map_or(vk::SwapchainKHR::null(), |s| s.handle);
        let created = Swapchain::create(&self.gpu, config, old_handle);
        if let Some(old) = old {
            old.destroy(&self.gpu);
        }
        let swapchain = created?;
        let image_count = swapchain.image_count();
        let format = swapchain.config.format;
        self.swapchain = Some(swapchain);

        self.images_in_flight.reset(image_count);
        self.recorder.resize(&self.gpu, image_count)?;
        self.ensure_bindings(image_count)?;
        self.ensure_pipeline(format)?;

        self.resize.take();
        self.stale = false;
        if self.paused {
            info!("presentation resumed");
        }
        self.paused = false;
        Ok(Recreate::Done)
    }

    /// Uniform buffers and their descriptor sets, rebuilt only when their
    /// count changes.
    fn ensure_bindings(&mut self, image_count: usize) -> Result<()> {
        let wanted = match self.settings.uniform_scope {
            UniformScope::PerImage => image_count,
            UniformScope::PerFrameSlot => FRAMES_IN_FLIGHT,
        };
        if self.descriptors.is_some() && self.uniforms.len() == wanted {
            return Ok(());
        }
        if let Some(d) = self.descriptors.take() {
            d.destroy(&self.gpu);
        }
        self.uniforms.destroy(&self.gpu);
        self.uniforms = UniformBuffers::create(
            &self.gpu,
            wanted,
            std::mem::size_of::<FrameUniforms>() as vk::DeviceSize,
        )?;
        if let Some(scene) = &self.scene {
            self.descriptors = Some(Descriptors::create(
                &self.gpu,
                self.set_layout,
                &self.uniforms,
                &scene.texture,
            )?);
        }
        debug!("{wanted} uniform buffers ({:?})", self.settings.uniform_scope);
        Ok(())
    }

    fn ensure_pipeline(&mut self, format: vk::Format) -> Result<()> {
        if self
            .pipeline
            .as_ref()
            .is_some_and(|p| p.color_format == format)
        {
            return Ok(());
        }
        if let Some(p) = self.pipeline.take() {
            p.destroy(&self.gpu);
        }
        self.pipeline = Some(GraphicsPipeline::create(
            &self.gpu,
            &self.shaders,
            format,
            self.set_layout,
        )?);
        Ok(())
    }
}

// Teardown: one idle wait, then reverse dependency order.
impl<G: Gpu> Drop for Presenter<G> {
    fn drop(&mut self) {
        if let Err(e) = self.gpu.device_wait_idle() {
            warn!("device_wait_idle before teardown: {e:?}");
        }
        self.recorder.destroy(&self.gpu);
        if let Some(p) = self.pipeline.take() {
            p.destroy(&self.gpu);
        }
        if let Some(d) = self.descriptors.take() {
            d.destroy(&self.gpu);
        }
        self.uniforms.destroy(&self.gpu);
        if let Some(sc) = self.swapchain.take() {
            sc.destroy(&self.gpu);
        }
        if let Some(scene) = self.scene.take() {
            scene.destroy(&self.gpu);
        }
        if self.set_layout != vk::DescriptorSetLayout::null() {
            self.gpu.destroy_descriptor_set_layout(self.set_layout);
            self.set_layout = vk::DescriptorSetLayout::null();
        }
        self.ring.destroy(&self.gpu);
        debug!("presenter torn down after {} frames", self.frames);
    }
}
