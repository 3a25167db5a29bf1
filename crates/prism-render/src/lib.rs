// SPDX-License-Identifier: CEPL-1.0
use anyhow::Result;
use bytemuck::{Pod, Zeroable};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_zero_area(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Vertex record shared by the CPU upload path and the pipeline's vertex
/// input description. Field offsets are part of the shader contract.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub pos: [f32; 2],
    pub color: [f32; 3],
    pub uv: [f32; 2],
}

impl Vertex {
    pub const POS_OFFSET: u32 = 0;
    pub const COLOR_OFFSET: u32 = std::mem::size_of::<[f32; 2]>() as u32;
    pub const UV_OFFSET: u32 = Self::COLOR_OFFSET + std::mem::size_of::<[f32; 3]>() as u32;
    pub const STRIDE: u32 = std::mem::size_of::<Vertex>() as u32;

    pub const fn new(pos: [f32; 2], color: [f32; 3], uv: [f32; 2]) -> Self {
        Self { pos, color, uv }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct MeshData {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u16>,
}

impl MeshData {
    /// Unit quad centred on the origin, one colour per corner.
    pub fn quad() -> Self {
        Self {
            vertices: vec![
                Vertex::new([-0.5, -0.5], [1.0, 0.0, 0.0], [1.0, 0.0]),
                Vertex::new([0.5, -0.5], [0.0, 1.0, 0.0], [0.0, 0.0]),
                Vertex::new([0.5, 0.5], [0.0, 0.0, 1.0], [0.0, 1.0]),
                Vertex::new([-0.5, 0.5], [1.0, 1.0, 1.0], [1.0, 1.0]),
            ],
            indices: vec![0, 1, 2, 2, 3, 0],
        }
    }

    pub fn index_count(&self) -> u32 {
        self.indices.len() as u32
    }
}

/// Decoded RGBA8 pixels, tightly packed, row-major.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TexturePixels {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

impl TexturePixels {
    pub fn checkerboard(size: u32, cell: u32) -> Self {
        let cell = cell.max(1);
        let mut rgba = Vec::with_capacity((size * size * 4) as usize);
        for y in 0..size {
            for x in 0..size {
                let v = if ((x / cell) + (y / cell)) % 2 == 0 { 255 } else { 64 };
                rgba.extend_from_slice(&[v, v, v, 255]);
            }
        }
        Self {
            width: size,
            height: size,
            rgba,
        }
    }

    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * 4
    }
}

#[derive(Clone, Debug)]
pub struct Scene {
    pub mesh: MeshData,
    pub texture: TexturePixels,
}

/// Per-frame transform block, std140-compatible (three column-major mat4).
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct FrameUniforms {
    pub model: [[f32; 4]; 4],
    pub view: [[f32; 4]; 4],
    pub proj: [[f32; 4]; 4],
}

const IDENTITY: [[f32; 4]; 4] = [
    [1.0, 0.0, 0.0, 0.0],
    [0.0, 1.0, 0.0, 0.0],
    [0.0, 0.0, 1.0, 0.0],
    [0.0, 0.0, 0.0, 1.0],
];

impl Default for FrameUniforms {
    fn default() -> Self {
        Self {
            model: IDENTITY,
            view: IDENTITY,
            proj: IDENTITY,
        }
    }
}

/// Resize notification raised by the window callback and consumed once per
/// frame, after present.
#[derive(Debug, Default)]
pub struct ResizeFlag {
    raised: bool,
}

impl ResizeFlag {
    pub fn raise(&mut self) {
        self.raised = true;
    }

    pub fn is_raised(&self) -> bool {
        self.raised
    }

    /// Returns whether the flag was raised and lowers it.
    pub fn take(&mut self) -> bool {
        std::mem::take(&mut self.raised)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PresentModePref {
    Fifo,
    #[default]
    Mailbox,
}

/// When command buffers get (re)recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RecordMode {
    /// Once per presentable image, until invalidated.
    #[default]
    Static,
    /// Every frame for the acquired image.
    PerFrame,
}

/// How many uniform buffers exist and which index selects one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum UniformScope {
    #[default]
    PerImage,
    PerFrameSlot,
}

#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub clear_color: [f32; 4],
    pub vsync: bool,
    pub present_mode: PresentModePref,
    pub record_mode: RecordMode,
    pub uniform_scope: UniformScope,
    pub shader_dir: PathBuf,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            clear_color: [0.0, 0.0, 0.0, 1.0],
            vsync: true,
            present_mode: PresentModePref::Mailbox,
            record_mode: RecordMode::Static,
            uniform_scope: UniformScope::PerImage,
            shader_dir: PathBuf::from("shaders"),
        }
    }
}

pub trait Renderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        scene: &Scene,
        settings: &RenderSettings,
    ) -> Result<Self>
    where
        Self: Sized;

    fn resize(&mut self, size: RenderSize);
    fn render(&mut self, uniforms: &FrameUniforms) -> Result<()>;
    fn set_clear_color(&mut self, rgba: [f32; 4]);
    fn set_vsync(&mut self, _on: bool) {}
}
