// SPDX-License-Identifier: CEPL-1.0
use anyhow::{Context, Result};
use glam::{Mat4, Vec3};
use prism_render::{FrameUniforms, MeshData, RenderSize, Scene, TexturePixels};
use std::path::Path;
use std::time::Duration;

const CHECKER_SIZE: u32 = 256;
const CHECKER_CELL: u32 = 32;
/// Radians per second.
const SPIN_RATE: f32 = std::f32::consts::FRAC_PI_2;

pub fn load_texture(path: Option<&Path>) -> Result<TexturePixels> {
    let Some(path) = path else {
        return Ok(TexturePixels::checkerboard(CHECKER_SIZE, CHECKER_CELL));
    };
    let img = image::open(path)
        .with_context(|| format!("decoding texture {}", path.display()))?
        .into_rgba8();
    let (width, height) = img.dimensions();
    Ok(TexturePixels {
        width,
        height,
        rgba: img.into_raw(),
    })
}

pub fn build_scene(texture: Option<&Path>) -> Result<Scene> {
    Ok(Scene {
        mesh: MeshData::quad(),
        texture: load_texture(texture)?,
    })
}

/// Quad spinning about Z, seen from above at a slant. Projection Y is
/// flipped for Vulkan clip space.
pub fn frame_uniforms(elapsed: Duration, size: RenderSize) -> FrameUniforms {
    let model = Mat4::from_rotation_z(elapsed.as_secs_f32() * SPIN_RATE);
    let view = Mat4::look_at_rh(Vec3::new(2.0, 2.0, 2.0), Vec3::ZERO, Vec3::Z);
    let aspect = if size.height == 0 {
        1.0
    } else {
        size.width as f32 / size.height as f32
    };
    let mut proj = Mat4::perspective_rh(45f32.to_radians(), aspect, 0.1, 10.0);
    proj.y_axis.y *= -1.0;
    FrameUniforms {
        model: model.to_cols_array_2d(),
        view: view.to_cols_array_2d(),
        proj: proj.to_cols_array_2d(),
    }
}
