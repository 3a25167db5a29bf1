// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use prism_render::RecordMode;

use crate::error::{RenderError, Result, VkResultExt};
use crate::gpu::{Gpu, ImageBarrier};

/// The presentable image a command sequence renders into.
#[derive(Clone, Copy, Debug)]
pub struct FrameTarget {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub extent: vk::Extent2D,
}

/// How the bound vertices are walked.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Geometry {
    /// `u16` indices.
    Indexed { buffer: vk::Buffer, count: u32 },
    Vertices { count: u32 },
}

/// Everything bound for the draw.
#[derive(Clone, Copy, Debug)]
pub struct DrawCall {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    pub descriptor_set: vk::DescriptorSet,
    pub vertex_buffer: vk::Buffer,
    pub geometry: Geometry,
    pub clear: [f32; 4],
}

/// An open command buffer. Commands can only be added through this guard,
/// and `end` consumes it.
pub struct Recording<'a, G: Gpu> {
    gpu: &'a G,
    cmd: vk::CommandBuffer,
}

impl<'a, G: Gpu> Recording<'a, G> {
    pub fn begin(gpu: &'a G, cmd: vk::CommandBuffer) -> Result<Self> {
        gpu.reset_command_buffer(cmd).op("reset_command_buffer")?;
        gpu.begin_command_buffer(cmd, false)
            .op("begin_command_buffer")?;
        Ok(Self { gpu, cmd })
    }

    fn transition(&self, image: vk::Image, old: vk::ImageLayout, new: vk::ImageLayout) {
        if let Some(barrier) = ImageBarrier::transition(image, old, new) {
            self.gpu.cmd_image_barrier(self.cmd, &barrier);
        }
    }

    /// Attachment transition, cleared dynamic-rendering pass with one
    /// indexed draw, then the hand-over to presentation.
    pub fn draw(&self, target: &FrameTarget, call: &DrawCall) {
        let gpu = self.gpu;
        let cmd = self.cmd;
        self.transition(
            target.image,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        );
        gpu.cmd_begin_rendering(cmd, target.view, target.extent, call.clear);
        gpu.cmd_bind_pipeline(cmd, call.pipeline);
        gpu.cmd_set_viewport_scissor(cmd, target.extent);
        gpu.cmd_bind_descriptor_set(cmd, call.layout, call.descriptor_set);
        gpu.cmd_bind_vertex_buffer(cmd, call.vertex_buffer);
        match call.geometry {
            Geometry::Indexed { buffer, count } => {
                gpu.cmd_bind_index_buffer(cmd, buffer, vk::IndexType::UINT16);
                gpu.cmd_draw_indexed(cmd, count);
            }
            Geometry::Vertices { count } => gpu.cmd_draw(cmd, count),
        }
        gpu.cmd_end_rendering(cmd);
        self.transition(
            target.image,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::ImageLayout::PRESENT_SRC_KHR,
        );
    }

    pub fn end(self) -> Result<Ended> {
        self.gpu
            .end_command_buffer(self.cmd)
            .op("end_command_buffer")?;
        Ok(Ended(self.cmd))
    }
}

/// A finished command sequence, ready for submission.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Ended(vk::CommandBuffer);

impl Ended {
    pub fn cmd(self) -> vk::CommandBuffer {
        self.0
    }
}

/// One primary command buffer per presentable image.
///
/// In `Static` mode a buffer is kept while it was recorded for the same
/// descriptor; `PerFrame` records on every request.
pub struct CommandRecorder {
    mode: RecordMode,
    buffers: Vec<vk::CommandBuffer>,
    /// Descriptor index each buffer was last recorded with.
    recorded: Vec<Option<usize>>,
}

impl CommandRecorder {
    pub fn new(mode: RecordMode) -> Self {
        Self {
            mode,
            buffers: Vec::new(),
            recorded: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn buffer(&self, image_index: u32) -> Option<vk::CommandBuffer> {
        self.buffers.get(image_index as usize).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Matches the buffer set to a new surface generation. The device must
    /// be idle. Every recording is invalidated.
    pub fn resize<G: Gpu>(&mut self, gpu: &G, image_count: usize) -> Result<()> {
        if self.buffers.len() != image_count {
            self.free(gpu);
            self.buffers = gpu
                .allocate_command_buffers(image_count as u32)
                .op("allocate_command_buffers")?;
        }
        self.recorded = vec![None; image_count];
        Ok(())
    }

    pub fn invalidate_all(&mut self) {
        self.recorded.iter_mut().for_each(|r| *r = None);
    }

    pub fn is_valid(&self, image_index: u32, descriptor: usize) -> bool {
        match self.mode {
            RecordMode::PerFrame => false,
            RecordMode::Static => self.recorded.get(image_index as usize) == Some(&Some(descriptor)),
        }
    }

    /// Returns the command buffer for `image_index`, recording it first when
    /// it is not valid for `descriptor`. The image's previous submission
    /// must have retired.
    pub fn prepare<G: Gpu>(
        &mut self,
        gpu: &G,
        image_index: u32,
        descriptor: usize,
        target: &FrameTarget,
        call: &DrawCall,
    ) -> Result<vk::CommandBuffer> {
        let i = image_index as usize;
        let Some(cmd) = self.buffer(image_index) else {
            return Err(RenderError::Vulkan {
                op: "command buffer for image",
                result: vk::Result::ERROR_UNKNOWN,
            });
        };
        if self.is_valid(image_index, descriptor) {
            return Ok(cmd);
        }

        self.recorded[i] = None;
        let rec = Recording::begin(gpu, cmd)?;
        rec.draw(target, call);
        let ended = rec.end()?;
        self.recorded[i] = Some(descriptor);
        Ok(ended.cmd())
    }

    fn free<G: Gpu>(&mut self, gpu: &G) {
        if !self.buffers.is_empty() {
            gpu.free_command_buffers(&self.buffers);
        }
        self.buffers.clear();
        self.recorded.clear();
    }

    pub fn destroy<G: Gpu>(&mut self, gpu: &G) {
        self.free(gpu);
    }
}
