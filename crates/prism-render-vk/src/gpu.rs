// SPDX-License-Identifier: CEPL-1.0
//! The device operations the presenter depends on.
//!
//! Everything above this trait (surface negotiation, frame ring, uploads,
//! recording, the frame loop) is written against `Gpu`, so it runs unchanged
//! on the real `ash` device and on the simulated device used by the tests.
//! Handles are plain `ash::vk` handles; ownership and destruction order are
//! the caller's responsibility.
use ash::prelude::VkResult;
use ash::vk;

/// Swapchain creation parameters. The surface itself is owned by the device.
#[derive(Clone, Copy, Debug)]
pub struct SwapchainDesc {
    pub min_image_count: u32,
    pub format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
    /// Previous generation handed to the driver for resource reuse, or null.
    pub old_swapchain: vk::SwapchainKHR,
}

/// 2D, single mip, single layer, optimal tiling, exclusive sharing.
#[derive(Clone, Copy, Debug)]
pub struct ImageDesc {
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub usage: vk::ImageUsageFlags,
}

/// A layout transition scoped to one stage/access pair on each side.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageBarrier {
    pub image: vk::Image,
    pub aspect: vk::ImageAspectFlags,
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub src_stage: vk::PipelineStageFlags2,
    pub src_access: vk::AccessFlags2,
    pub dst_stage: vk::PipelineStageFlags2,
    pub dst_access: vk::AccessFlags2,
}

impl ImageBarrier {
    /// Colour-aspect transition for the layout pairs this renderer uses.
    /// Each side names only the stage and access that actually touch the
    /// image. Returns `None` for any other pair.
    pub fn transition(
        image: vk::Image,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
    ) -> Option<Self> {
        use vk::{AccessFlags2 as A, ImageLayout as L, PipelineStageFlags2 as S};
        let (src_stage, src_access, dst_stage, dst_access) = match (old_layout, new_layout) {
            (L::UNDEFINED, L::TRANSFER_DST_OPTIMAL) => {
                (S::TOP_OF_PIPE, A::NONE, S::TRANSFER, A::TRANSFER_WRITE)
            }
            (L::TRANSFER_DST_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL) => (
                S::TRANSFER,
                A::TRANSFER_WRITE,
                S::FRAGMENT_SHADER,
                A::SHADER_READ,
            ),
            // Presentation's reads are ordered by the acquire semaphore,
            // which the submit waits on at colour-attachment output.
            (L::UNDEFINED, L::COLOR_ATTACHMENT_OPTIMAL) => (
                S::COLOR_ATTACHMENT_OUTPUT,
                A::NONE,
                S::COLOR_ATTACHMENT_OUTPUT,
                A::COLOR_ATTACHMENT_WRITE,
            ),
            (L::COLOR_ATTACHMENT_OPTIMAL, L::PRESENT_SRC_KHR) => (
                S::COLOR_ATTACHMENT_OUTPUT,
                A::COLOR_ATTACHMENT_WRITE,
                S::BOTTOM_OF_PIPE,
                A::NONE,
            ),
            _ => return None,
        };
        Some(Self {
            image,
            aspect: vk::ImageAspectFlags::COLOR,
            old_layout,
            new_layout,
            src_stage,
            src_access,
            dst_stage,
            dst_access,
        })
    }
}

/// One command buffer on the graphics queue with optional semaphore wait,
/// semaphore signal and host fence.
#[derive(Clone, Copy, Debug)]
pub struct Submission {
    pub cmd: vk::CommandBuffer,
    pub wait: Option<(vk::Semaphore, vk::PipelineStageFlags)>,
    pub signal: Option<vk::Semaphore>,
    pub fence: Option<vk::Fence>,
}

impl Submission {
    /// Bare submission used by one-shot transfers.
    pub fn one_shot(cmd: vk::CommandBuffer) -> Self {
        Self {
            cmd,
            wait: None,
            signal: None,
            fence: None,
        }
    }
}

/// Binds a uniform range (binding 0) and a sampled texture (binding 1).
#[derive(Clone, Copy, Debug)]
pub struct DescriptorWrite {
    pub set: vk::DescriptorSet,
    pub uniform_buffer: vk::Buffer,
    pub uniform_range: vk::DeviceSize,
    pub image_view: vk::ImageView,
    pub sampler: vk::Sampler,
}

/// Graphics pipeline for dynamic rendering into one colour attachment.
/// Viewport and scissor are dynamic state.
#[derive(Clone, Copy, Debug)]
pub struct PipelineDesc<'a> {
    pub vertex_spv: &'a [u32],
    pub fragment_spv: &'a [u32],
    pub color_format: vk::Format,
    pub set_layout: vk::DescriptorSetLayout,
}

pub trait Gpu {
    // --- synchronization -----------------------------------------------------
    fn create_semaphore(&self) -> VkResult<vk::Semaphore>;
    fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence>;
    /// Blocks without timeout; a submitted fence always signals eventually.
    fn wait_for_fence(&self, fence: vk::Fence) -> VkResult<()>;
    fn reset_fence(&self, fence: vk::Fence) -> VkResult<()>;
    fn fence_signaled(&self, fence: vk::Fence) -> VkResult<bool>;
    fn destroy_semaphore(&self, semaphore: vk::Semaphore);
    fn destroy_fence(&self, fence: vk::Fence);
    fn device_wait_idle(&self) -> VkResult<()>;
    fn queue_wait_idle(&self) -> VkResult<()>;

    // --- presentation surface ------------------------------------------------
    fn surface_capabilities(&self) -> VkResult<vk::SurfaceCapabilitiesKHR>;
    fn surface_formats(&self) -> VkResult<Vec<vk::SurfaceFormatKHR>>;
    fn surface_present_modes(&self) -> VkResult<Vec<vk::PresentModeKHR>>;
    fn create_swapchain(&self, desc: &SwapchainDesc) -> VkResult<vk::SwapchainKHR>;
    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>>;
    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR);
    /// `Ok((index, suboptimal))`; `ERROR_OUT_OF_DATE_KHR` when no image can
    /// be acquired from this swapchain any more.
    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        signal: vk::Semaphore,
    ) -> VkResult<(u32, bool)>;
    /// `Ok(suboptimal)`.
    fn queue_present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> VkResult<bool>;

    // --- images --------------------------------------------------------------
    fn create_image(&self, desc: &ImageDesc) -> VkResult<vk::Image>;
    fn image_memory_requirements(&self, image: vk::Image) -> vk::MemoryRequirements;
    fn bind_image_memory(&self, image: vk::Image, memory: vk::DeviceMemory) -> VkResult<()>;
    fn destroy_image(&self, image: vk::Image);
    fn create_image_view(
        &self,
        image: vk::Image,
        format: vk::Format,
        aspect: vk::ImageAspectFlags,
    ) -> VkResult<vk::ImageView>;
    fn destroy_image_view(&self, view: vk::ImageView);
    /// Linear filtering, repeat addressing.
    fn create_sampler(&self) -> VkResult<vk::Sampler>;
    fn destroy_sampler(&self, sampler: vk::Sampler);

    // --- buffers and memory --------------------------------------------------
    fn memory_properties(&self) -> vk::PhysicalDeviceMemoryProperties;
    fn create_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
    ) -> VkResult<vk::Buffer>;
    fn buffer_memory_requirements(&self, buffer: vk::Buffer) -> vk::MemoryRequirements;
    fn allocate_memory(
        &self,
        size: vk::DeviceSize,
        memory_type_index: u32,
    ) -> VkResult<vk::DeviceMemory>;
    fn bind_buffer_memory(&self, buffer: vk::Buffer, memory: vk::DeviceMemory) -> VkResult<()>;
    /// Map, copy, unmap. Only valid on host-visible memory.
    fn write_memory(
        &self,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
        data: &[u8],
    ) -> VkResult<()>;
    /// Map, copy out, unmap. Only valid on host-visible memory.
    fn read_memory(
        &self,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
        len: usize,
    ) -> VkResult<Vec<u8>>;
    fn destroy_buffer(&self, buffer: vk::Buffer);
    fn free_memory(&self, memory: vk::DeviceMemory);

    // --- descriptors and pipeline --------------------------------------------
    fn create_descriptor_set_layout(
        &self,
        bindings: &[vk::DescriptorSetLayoutBinding<'_>],
    ) -> VkResult<vk::DescriptorSetLayout>;
    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout);
    fn create_descriptor_pool(
        &self,
        max_sets: u32,
        sizes: &[vk::DescriptorPoolSize],
    ) -> VkResult<vk::DescriptorPool>;
    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool);
    fn allocate_descriptor_sets(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
        count: u32,
    ) -> VkResult<Vec<vk::DescriptorSet>>;
    fn write_descriptor_set(&self, write: &DescriptorWrite);
    fn create_graphics_pipeline(
        &self,
        desc: &PipelineDesc<'_>,
    ) -> VkResult<(vk::PipelineLayout, vk::Pipeline)>;
    fn destroy_pipeline(&self, layout: vk::PipelineLayout, pipeline: vk::Pipeline);

    // --- command buffers -----------------------------------------------------
    /// Primary buffers from a resettable pool owned by the device.
    fn allocate_command_buffers(&self, count: u32) -> VkResult<Vec<vk::CommandBuffer>>;
    fn free_command_buffers(&self, cmds: &[vk::CommandBuffer]);
    fn begin_command_buffer(&self, cmd: vk::CommandBuffer, one_time_submit: bool) -> VkResult<()>;
    fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> VkResult<()>;
    fn reset_command_buffer(&self, cmd: vk::CommandBuffer) -> VkResult<()>;

    fn cmd_image_barrier(&self, cmd: vk::CommandBuffer, barrier: &ImageBarrier);
    fn cmd_copy_buffer(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        size: vk::DeviceSize,
    );
    fn cmd_copy_buffer_to_image(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Image,
        extent: vk::Extent2D,
    );
    fn cmd_begin_rendering(
        &self,
        cmd: vk::CommandBuffer,
        view: vk::ImageView,
        extent: vk::Extent2D,
        clear: [f32; 4],
    );
    fn cmd_end_rendering(&self, cmd: vk::CommandBuffer);
    fn cmd_bind_pipeline(&self, cmd: vk::CommandBuffer, pipeline: vk::Pipeline);
    fn cmd_set_viewport_scissor(&self, cmd: vk::CommandBuffer, extent: vk::Extent2D);
    fn cmd_bind_descriptor_set(
        &self,
        cmd: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        set: vk::DescriptorSet,
    );
    fn cmd_bind_vertex_buffer(&self, cmd: vk::CommandBuffer, buffer: vk::Buffer);
    fn cmd_bind_index_buffer(
        &self,
        cmd: vk::CommandBuffer,
        buffer: vk::Buffer,
        index_type: vk::IndexType,
    );
    fn cmd_draw_indexed(&self, cmd: vk::CommandBuffer, index_count: u32);
    fn cmd_draw(&self, cmd: vk::CommandBuffer, vertex_count: u32);

    // --- queue ---------------------------------------------------------------
    fn queue_submit(&self, submission: &Submission) -> VkResult<()>;
}
