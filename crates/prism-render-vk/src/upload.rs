// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use prism_render::TexturePixels;
use tracing::debug;

use crate::error::{RenderError, Result, VkResultExt};
use crate::gpu::{Gpu, ImageBarrier, ImageDesc, Submission};

pub const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_SRGB;

const HOST_WRITABLE: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::from_raw(
    vk::MemoryPropertyFlags::HOST_VISIBLE.as_raw() | vk::MemoryPropertyFlags::HOST_COHERENT.as_raw(),
);

/// First memory type that is allowed by `type_bits` and carries all of `flags`.
pub fn find_memory_type(
    props: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    flags: vk::MemoryPropertyFlags,
) -> Result<u32> {
    (0..props.memory_type_count)
        .find(|&i| {
            type_bits & (1 << i) != 0
                && props.memory_types[i as usize].property_flags.contains(flags)
        })
        .ok_or(RenderError::NoSuitableMemoryType { type_bits, flags })
}

#[derive(Debug)]
pub struct GpuBuffer {
    pub buffer: vk::Buffer,
    pub memory: vk::DeviceMemory,
    pub size: vk::DeviceSize,
}

impl GpuBuffer {
    pub fn create<G: Gpu>(
        gpu: &G,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        flags: vk::MemoryPropertyFlags,
    ) -> Result<Self> {
        let buffer = gpu.create_buffer(size, usage).op("create_buffer")?;
        let req = gpu.buffer_memory_requirements(buffer);
        let memory = find_memory_type(&gpu.memory_properties(), req.memory_type_bits, flags)
            .and_then(|type_index| {
                gpu.allocate_memory(req.size, type_index)
                    .op("allocate_memory")
            });
        let memory = match memory {
            Ok(m) => m,
            Err(e) => {
                gpu.destroy_buffer(buffer);
                return Err(e);
            }
        };
        if let Err(e) = gpu.bind_buffer_memory(buffer, memory) {
            gpu.destroy_buffer(buffer);
            gpu.free_memory(memory);
            return Err(RenderError::Vulkan {
                op: "bind_buffer_memory",
                result: e,
            });
        }
        Ok(Self {
            buffer,
            memory,
            size,
        })
    }

    /// Host-visible buffers only.
    pub fn write<G: Gpu>(&self, gpu: &G, bytes: &[u8]) -> Result<()> {
        debug_assert!(bytes.len() as vk::DeviceSize <= self.size);
        gpu.write_memory(self.memory, 0, bytes).op("map_memory")
    }

    /// Host-visible buffers only.
    pub fn read<G: Gpu>(&self, gpu: &G) -> Result<Vec<u8>> {
        gpu.read_memory(self.memory, 0, self.size as usize)
            .op("map_memory")
    }

    pub fn destroy<G: Gpu>(self, gpu: &G) {
        gpu.destroy_buffer(self.buffer);
        gpu.free_memory(self.memory);
    }
}

/// Records through `record`, submits on the graphics queue and blocks until
/// the queue drains. Setup-time only.
pub fn one_shot<G, F>(gpu: &G, record: F) -> Result<()>
where
    G: Gpu,
    F: FnOnce(vk::CommandBuffer),
{
    let cmd = gpu
        .allocate_command_buffers(1)
        .op("allocate_command_buffers")?[0];
    let result = (|| {
        gpu.begin_command_buffer(cmd, true)
            .op("begin_command_buffer")?;
        record(cmd);
        gpu.end_command_buffer(cmd).op("end_command_buffer")?;
        gpu.queue_submit(&Submission::one_shot(cmd))
            .op("queue_submit")?;
        gpu.queue_wait_idle().op("queue_wait_idle")
    })();
    gpu.free_command_buffers(std::slice::from_ref(&cmd));
    result
}

/// Host-visible, coherent, transfer-source scratch filled with `data`.
fn staging<G: Gpu>(gpu: &G, data: &[u8]) -> Result<GpuBuffer> {
    let staging = GpuBuffer::create(
        gpu,
        data.len() as vk::DeviceSize,
        vk::BufferUsageFlags::TRANSFER_SRC,
        HOST_WRITABLE,
    )?;
    if let Err(e) = staging.write(gpu, data) {
        staging.destroy(gpu);
        return Err(e);
    }
    Ok(staging)
}

/// Copies `data` into a new device-local buffer through a transient staging
/// buffer. The staging buffer is gone when this returns.
pub fn upload_immutable<G: Gpu>(
    gpu: &G,
    data: &[u8],
    usage: vk::BufferUsageFlags,
) -> Result<GpuBuffer> {
    let size = data.len() as vk::DeviceSize;
    let staging = staging(gpu, data)?;
    let dst = GpuBuffer::create(
        gpu,
        size,
        usage | vk::BufferUsageFlags::TRANSFER_DST,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
    );
    let dst = match dst {
        Ok(dst) => dst,
        Err(e) => {
            staging.destroy(gpu);
            return Err(e);
        }
    };
    let copied = one_shot(gpu, |cmd| {
        gpu.cmd_copy_buffer(cmd, staging.buffer, dst.buffer, size)
    });
    staging.destroy(gpu);
    match copied {
        Ok(()) => {
            debug!("uploaded {size} bytes as {usage:?}");
            Ok(dst)
        }
        Err(e) => {
            dst.destroy(gpu);
            Err(e)
        }
    }
}

/// Host-visible uniform buffers written in place every frame.
#[derive(Debug, Default)]
pub struct UniformBuffers {
    buffers: Vec<GpuBuffer>,
}

impl UniformBuffers {
    pub fn create<G: Gpu>(gpu: &G, count: usize, size: vk::DeviceSize) -> Result<Self> {
        let mut out = Self {
            buffers: Vec::with_capacity(count),
        };
        for _ in 0..count {
            match GpuBuffer::create(gpu, size, vk::BufferUsageFlags::UNIFORM_BUFFER, HOST_WRITABLE) {
                Ok(b) => out.buffers.push(b),
                Err(e) => {
                    out.destroy(gpu);
                    return Err(e);
                }
            }
        }
        Ok(out)
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn get(&self, index: usize) -> &GpuBuffer {
        &self.buffers[index]
    }

    pub fn write<G: Gpu>(&self, gpu: &G, index: usize, bytes: &[u8]) -> Result<()> {
        self.buffers[index].write(gpu, bytes)
    }

    pub fn destroy<G: Gpu>(&mut self, gpu: &G) {
        for b in self.buffers.drain(..) {
            b.destroy(gpu);
        }
    }
}

/// Sampled, device-local texture with its view and sampler.
#[derive(Debug)]
pub struct Texture {
    pub image: vk::Image,
    pub memory: vk::DeviceMemory,
    pub view: vk::ImageView,
    pub sampler: vk::Sampler,
    pub extent: vk::Extent2D,
}

impl Texture {
    pub fn destroy<G: Gpu>(self, gpu: &G) {
        gpu.destroy_sampler(self.sampler);
        gpu.destroy_image_view(self.view);
        gpu.destroy_image(self.image);
        gpu.free_memory(self.memory);
    }
}

/// Staged upload into an image: UNDEFINED -> TRANSFER_DST, buffer-to-image
/// copy, TRANSFER_DST -> SHADER_READ_ONLY.
pub fn upload_texture<G: Gpu>(gpu: &G, pixels: &TexturePixels) -> Result<Texture> {
    if pixels.rgba.len() != pixels.expected_len() || pixels.width == 0 || pixels.height == 0 {
        return Err(RenderError::TextureSize {
            width: pixels.width,
            height: pixels.height,
            expected: pixels.expected_len(),
            actual: pixels.rgba.len(),
        });
    }
    let extent = vk::Extent2D {
        width: pixels.width,
        height: pixels.height,
    };

    let image = gpu
        .create_image(&ImageDesc {
            extent,
            format: TEXTURE_FORMAT,
            usage: vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
        })
        .op("create_image")?;
    let req = gpu.image_memory_requirements(image);
    let memory = find_memory_type(
        &gpu.memory_properties(),
        req.memory_type_bits,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
    )
    .and_then(|t| gpu.allocate_memory(req.size, t).op("allocate_memory"))
    .and_then(|m| match gpu.bind_image_memory(image, m) {
        Ok(()) => Ok(m),
        Err(e) => {
            gpu.free_memory(m);
            Err(RenderError::Vulkan {
                op: "bind_image_memory",
                result: e,
            })
        }
    });
    let memory = match memory {
        Ok(m) => m,
        Err(e) => {
            gpu.destroy_image(image);
            return Err(e);
        }
    };

    let filled = staging(gpu, &pixels.rgba).and_then(|staging| {
        let copied = one_shot(gpu, |cmd| {
            let barriers = [
                (vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL),
                (
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                ),
            ]
            .map(|(old, new)| ImageBarrier::transition(image, old, new));
            if let [Some(to_dst), Some(to_read)] = barriers {
                gpu.cmd_image_barrier(cmd, &to_dst);
                gpu.cmd_copy_buffer_to_image(cmd, staging.buffer, image, extent);
                gpu.cmd_image_barrier(cmd, &to_read);
            }
        });
        staging.destroy(gpu);
        copied
    });

    let view = filled.and_then(|()| {
        gpu.create_image_view(image, TEXTURE_FORMAT, vk::ImageAspectFlags::COLOR)
            .op("create_image_view")
    });
    let view = match view {
        Ok(v) => v,
        Err(e) => {
            gpu.destroy_image(image);
            gpu.free_memory(memory);
            return Err(e);
        }
    };
    let sampler = match gpu.create_sampler().op("create_sampler") {
        Ok(s) => s,
        Err(e) => {
            gpu.destroy_image_view(view);
            gpu.destroy_image(image);
            gpu.free_memory(memory);
            return Err(e);
        }
    };

    debug!("texture {}x{} uploaded", extent.width, extent.height);
    Ok(Texture {
        image,
        memory,
        view,
        sampler,
        extent,
    })
}
