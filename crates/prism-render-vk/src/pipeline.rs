// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{RenderError, Result, VkResultExt};
use crate::gpu::{DescriptorWrite, Gpu, PipelineDesc};
use crate::upload::{Texture, UniformBuffers};

pub const VERTEX_SHADER: &str = "mesh.vert.spv";
pub const FRAGMENT_SHADER: &str = "mesh.frag.spv";

/// Reads a SPIR-V binary as aligned words.
pub fn load_spirv(path: &Path) -> Result<Vec<u32>> {
    let bytes = std::fs::read(path).map_err(|source| RenderError::ShaderRead {
        path: path.to_path_buf(),
        source,
    })?;
    ash::util::read_spv(&mut Cursor::new(&bytes[..])).map_err(|_| RenderError::InvalidShader {
        path: path.to_path_buf(),
    })
}

/// Both stages, loaded once at startup and kept for pipeline rebuilds.
#[derive(Clone, Debug)]
pub struct ShaderSet {
    pub vertex: Vec<u32>,
    pub fragment: Vec<u32>,
}

impl ShaderSet {
    pub fn load(dir: &Path) -> Result<Self> {
        let vert: PathBuf = dir.join(VERTEX_SHADER);
        let frag: PathBuf = dir.join(FRAGMENT_SHADER);
        let set = Self {
            vertex: load_spirv(&vert)?,
            fragment: load_spirv(&frag)?,
        };
        debug!(
            "shaders loaded from {} ({} + {} words)",
            dir.display(),
            set.vertex.len(),
            set.fragment.len()
        );
        Ok(set)
    }
}

/// set 0: binding 0 uniform block (vertex), binding 1 sampled texture (fragment).
pub fn create_set_layout<G: Gpu>(gpu: &G) -> Result<vk::DescriptorSetLayout> {
    let bindings = [
        vk::DescriptorSetLayoutBinding {
            binding: 0,
            descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: 1,
            stage_flags: vk::ShaderStageFlags::VERTEX,
            ..Default::default()
        },
        vk::DescriptorSetLayoutBinding {
            binding: 1,
            descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            descriptor_count: 1,
            stage_flags: vk::ShaderStageFlags::FRAGMENT,
            ..Default::default()
        },
    ];
    gpu.create_descriptor_set_layout(&bindings)
        .op("create_descriptor_set_layout")
}

/// One descriptor set per uniform buffer, all sharing the texture.
#[derive(Debug)]
pub struct Descriptors {
    pool: vk::DescriptorPool,
    sets: Vec<vk::DescriptorSet>,
}

impl Descriptors {
    pub fn create<G: Gpu>(
        gpu: &G,
        layout: vk::DescriptorSetLayout,
        uniforms: &UniformBuffers,
        texture: &Texture,
    ) -> Result<Self> {
        let count = uniforms.len() as u32;
        let sizes = [
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::UNIFORM_BUFFER,
                descriptor_count: count,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                descriptor_count: count,
            },
        ];
        let pool = gpu
            .create_descriptor_pool(count, &sizes)
            .op("create_descriptor_pool")?;
        let sets = match gpu
            .allocate_descriptor_sets(pool, layout, count)
            .op("allocate_descriptor_sets")
        {
            Ok(sets) => sets,
            Err(e) => {
                gpu.destroy_descriptor_pool(pool);
                return Err(e);
            }
        };
        for (i, &set) in sets.iter().enumerate() {
            let ubo = uniforms.get(i);
            gpu.write_descriptor_set(&DescriptorWrite {
                set,
                uniform_buffer: ubo.buffer,
                uniform_range: ubo.size,
                image_view: texture.view,
                sampler: texture.sampler,
            });
        }
        Ok(Self { pool, sets })
    }

    pub fn set(&self, index: usize) -> vk::DescriptorSet {
        self.sets[index]
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    /// Sets are freed with their pool.
    pub fn destroy<G: Gpu>(self, gpu: &G) {
        gpu.destroy_descriptor_pool(self.pool);
    }
}

/// Pipeline plus layout for one colour format. Viewport and scissor are
/// dynamic, so only a format change requires a rebuild.
#[derive(Debug)]
pub struct GraphicsPipeline {
    pub layout: vk::PipelineLayout,
    pub pipeline: vk::Pipeline,
    pub color_format: vk::Format,
}

impl GraphicsPipeline {
    pub fn create<G: Gpu>(
        gpu: &G,
        shaders: &ShaderSet,
        color_format: vk::Format,
        set_layout: vk::DescriptorSetLayout,
    ) -> Result<Self> {
        let (layout, pipeline) = gpu
            .create_graphics_pipeline(&PipelineDesc {
                vertex_spv: &shaders.vertex,
                fragment_spv: &shaders.fragment,
                color_format,
                set_layout,
            })
            .op("create_graphics_pipelines")?;
        debug!("pipeline built for {color_format:?}");
        Ok(Self {
            layout,
            pipeline,
            color_format,
        })
    }

    pub fn destroy<G: Gpu>(self, gpu: &G) {
        gpu.destroy_pipeline(self.layout, self.pipeline);
    }
}
