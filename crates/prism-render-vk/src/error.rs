// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use std::path::PathBuf;
use thiserror::Error;

/// Fatal conditions. Recoverable surface events (out of date, suboptimal,
/// zero extent) are reported as statuses, never through this type.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("{op}: {result:?}")]
    Vulkan { op: &'static str, result: vk::Result },

    #[error("presentation surface lost")]
    SurfaceLost,

    #[error("no memory type in {type_bits:#034b} has {flags:?}")]
    NoSuitableMemoryType {
        type_bits: u32,
        flags: vk::MemoryPropertyFlags,
    },

    #[error("read shader binary {}", path.display())]
    ShaderRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{} is not valid SPIR-V", path.display())]
    InvalidShader { path: PathBuf },

    #[error("surface reports no formats")]
    NoSurfaceFormats,

    #[error("no physical device with a graphics+present queue family")]
    NoSuitableDevice,

    #[error("missing device capability: {0}")]
    MissingCapability(&'static str),

    #[error("texture {width}x{height} needs {expected} bytes of RGBA8, got {actual}")]
    TextureSize {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },

    #[error("vulkan loader: {0}")]
    Loader(String),
}

pub type Result<T, E = RenderError> = std::result::Result<T, E>;

pub trait VkResultExt<T> {
    /// Names the failing operation and separates surface loss from other
    /// device errors.
    fn op(self, op: &'static str) -> Result<T>;
}

impl<T> VkResultExt<T> for std::result::Result<T, vk::Result> {
    fn op(self, op: &'static str) -> Result<T> {
        self.map_err(|result| match result {
            vk::Result::ERROR_SURFACE_LOST_KHR => RenderError::SurfaceLost,
            result => RenderError::Vulkan { op, result },
        })
    }
}
