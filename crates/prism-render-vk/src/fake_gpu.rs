// SPDX-License-Identifier: CEPL-1.0
//! Simulated device for tests.
//!
//! Submissions queue up on an in-order timeline and only complete when the
//! host waits on a fence or idles the queue/device; copies execute at that
//! point against simulated memory. Misuse the real driver would not report
//! (overlapping image targets, rewriting a pending command buffer or
//! uniform, destroying objects still in use) is counted in [`FakeStats`].
use ash::prelude::VkResult;
use ash::vk::{self, Handle};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::rc::Rc;

use crate::gpu::{
    DescriptorWrite, Gpu, ImageBarrier, ImageDesc, PipelineDesc, Submission, SwapchainDesc,
};

const DEVICE_LOCAL_TYPE: u32 = 0;
const HOST_TYPE: u32 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) enum FakeObject {
    Semaphore,
    Fence,
    Swapchain,
    Image,
    ImageView,
    Sampler,
    Buffer,
    Memory,
    SetLayout,
    DescriptorPool,
    PipelineLayout,
    Pipeline,
    CommandBuffer,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum FakeCmd {
    Barrier(ImageBarrier),
    CopyBuffer {
        src: vk::Buffer,
        dst: vk::Buffer,
        size: vk::DeviceSize,
    },
    CopyBufferToImage {
        src: vk::Buffer,
        image: vk::Image,
        extent: vk::Extent2D,
    },
    BeginRendering {
        view: vk::ImageView,
        extent: vk::Extent2D,
        clear: [f32; 4],
    },
    EndRendering,
    BindPipeline(vk::Pipeline),
    ViewportScissor(vk::Extent2D),
    BindDescriptorSet(vk::DescriptorSet),
    BindVertexBuffer(vk::Buffer),
    BindIndexBuffer(vk::Buffer, vk::IndexType),
    DrawIndexed(u32),
    Draw(u32),
}

impl FakeCmd {
    pub fn name(&self) -> &'static str {
        match self {
            FakeCmd::Barrier(_) => "barrier",
            FakeCmd::CopyBuffer { .. } => "copy_buffer",
            FakeCmd::CopyBufferToImage { .. } => "copy_buffer_to_image",
            FakeCmd::BeginRendering { .. } => "begin_rendering",
            FakeCmd::EndRendering => "end_rendering",
            FakeCmd::BindPipeline(_) => "bind_pipeline",
            FakeCmd::ViewportScissor(_) => "viewport_scissor",
            FakeCmd::BindDescriptorSet(_) => "bind_descriptor_set",
            FakeCmd::BindVertexBuffer(_) => "bind_vertex_buffer",
            FakeCmd::BindIndexBuffer(..) => "bind_index_buffer",
            FakeCmd::DrawIndexed(_) => "draw_indexed",
            FakeCmd::Draw(_) => "draw",
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct FakeStats {
    pub fence_waits: usize,
    pub submits: usize,
    pub presents: usize,
    pub acquires: usize,
    pub swapchains_created: usize,
    pub pipelines_created: usize,
    pub command_begins: usize,
    pub device_idle_waits: usize,
    pub queue_idle_waits: usize,
    pub max_outstanding_fences: usize,
    pub image_overlaps: usize,
    pub pending_cmd_rewrites: usize,
    pub stale_uniform_writes: usize,
    pub semaphore_misuse: usize,
    pub destroyed_while_pending: usize,
}

enum Scripted {
    Index(u32),
    Status(vk::Result),
}

struct Pending {
    commands: Vec<FakeCmd>,
    cmd: vk::CommandBuffer,
    fence: Option<vk::Fence>,
    target: Option<vk::Image>,
}

#[derive(Default)]
struct CmdState {
    recording: bool,
    commands: Vec<FakeCmd>,
}

struct State {
    next_handle: u64,
    live: HashMap<u64, FakeObject>,
    destroy_log: Vec<FakeObject>,
    stats: FakeStats,

    fences: HashMap<u64, bool>,
    signaled_semaphores: HashSet<u64>,

    memory: HashMap<u64, (u32, Vec<u8>)>,
    buffers: HashMap<u64, (vk::DeviceSize, Option<u64>)>,
    images: HashMap<u64, (vk::Extent2D, Option<u64>)>,
    views: HashMap<u64, u64>,
    buffer_type_bits: u32,

    caps: vk::SurfaceCapabilitiesKHR,
    formats: Vec<vk::SurfaceFormatKHR>,
    modes: Vec<vk::PresentModeKHR>,
    swapchains: HashMap<u64, (Vec<vk::Image>, u32)>,
    last_swapchain: Option<SwapchainDesc>,
    acquire_script: VecDeque<Scripted>,
    present_script: VecDeque<vk::Result>,
    presented: Vec<u32>,

    descriptor_writes: HashMap<u64, DescriptorWrite>,
    cmds: HashMap<u64, CmdState>,
    pending: VecDeque<Pending>,
    executed: Vec<FakeCmd>,
}

/// Clones share one device.
#[derive(Clone)]
pub(crate) struct FakeGpu {
    state: Rc<RefCell<State>>,
}

impl FakeGpu {
    /// 800x600 surface, 2..=3 images, FIFO + MAILBOX, one sRGB format.
    pub fn new() -> Self {
        let caps = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 3,
            current_extent: vk::Extent2D {
                width: 800,
                height: 600,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 8192,
                height: 8192,
            },
            max_image_array_layers: 1,
            supported_transforms: vk::SurfaceTransformFlagsKHR::IDENTITY,
            current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
            ..Default::default()
        };
        let state = State {
            next_handle: 1,
            live: HashMap::new(),
            destroy_log: Vec::new(),
            stats: FakeStats::default(),
            fences: HashMap::new(),
            signaled_semaphores: HashSet::new(),
            memory: HashMap::new(),
            buffers: HashMap::new(),
            images: HashMap::new(),
            views: HashMap::new(),
            buffer_type_bits: 0b11,
            caps,
            formats: vec![vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            }],
            modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
            swapchains: HashMap::new(),
            last_swapchain: None,
            acquire_script: VecDeque::new(),
            present_script: VecDeque::new(),
            presented: Vec::new(),
            descriptor_writes: HashMap::new(),
            cmds: HashMap::new(),
            pending: VecDeque::new(),
            executed: Vec::new(),
        };
        Self {
            state: Rc::new(RefCell::new(state)),
        }
    }

    // --- configuration ------------------------------------------------------

    pub fn set_surface_extent(&self, width: u32, height: u32) {
        self.state.borrow_mut().caps.current_extent = vk::Extent2D { width, height };
    }

    pub fn set_image_count_limits(&self, min: u32, max: u32) {
        let mut s = self.state.borrow_mut();
        s.caps.min_image_count = min;
        s.caps.max_image_count = max;
    }

    pub fn set_present_modes(&self, modes: &[vk::PresentModeKHR]) {
        self.state.borrow_mut().modes = modes.to_vec();
    }

    pub fn set_formats(&self, formats: &[vk::SurfaceFormatKHR]) {
        self.state.borrow_mut().formats = formats.to_vec();
    }

    /// Limits the memory types offered to buffers.
    pub fn restrict_buffer_memory_types(&self, bits: u32) {
        self.state.borrow_mut().buffer_type_bits = bits;
    }

    /// Next acquisition fails (or reports suboptimal) with `result`.
    pub fn script_acquire(&self, result: vk::Result) {
        self.state
            .borrow_mut()
            .acquire_script
            .push_back(Scripted::Status(result));
    }

    /// Next acquisitions hand out these indices, in order.
    pub fn script_acquire_order(&self, indices: &[u32]) {
        let mut s = self.state.borrow_mut();
        s.acquire_script
            .extend(indices.iter().map(|&i| Scripted::Index(i)));
    }

    pub fn script_present(&self, result: vk::Result) {
        self.state.borrow_mut().present_script.push_back(result);
    }

    /// Swapchain with `image_count` images, bypassing surface negotiation.
    pub fn fake_swapchain(&self, image_count: u32) -> vk::SwapchainKHR {
        let mut s = self.state.borrow_mut();
        let handle = s.alloc(FakeObject::Swapchain);
        let images = (0..image_count)
            .map(|_| vk::Image::from_raw(s.handle()))
            .collect();
        s.swapchains.insert(handle, (images, 0));
        vk::SwapchainKHR::from_raw(handle)
    }

    // --- inspection ---------------------------------------------------------

    pub fn stats(&self) -> FakeStats {
        self.state.borrow().stats
    }

    pub fn live_objects(&self) -> usize {
        self.state.borrow().live.len()
    }

    pub fn live_buffers(&self) -> usize {
        self.state
            .borrow()
            .live
            .values()
            .filter(|&&o| o == FakeObject::Buffer)
            .count()
    }

    pub fn is_live<H: Handle>(&self, handle: H) -> bool {
        self.state.borrow().live.contains_key(&handle.as_raw())
    }

    pub fn destroy_log(&self) -> Vec<FakeObject> {
        self.state.borrow().destroy_log.clone()
    }

    pub fn is_device_local(&self, memory: vk::DeviceMemory) -> bool {
        self.state
            .borrow()
            .memory
            .get(&memory.as_raw())
            .is_some_and(|(t, _)| *t == DEVICE_LOCAL_TYPE)
    }

    /// Contents of an image's backing memory, `width * height * 4` bytes.
    pub fn image_bytes(&self, image: vk::Image) -> Vec<u8> {
        let s = self.state.borrow();
        let Some(&(extent, Some(mem))) = s.images.get(&image.as_raw()) else {
            return Vec::new();
        };
        let len = (extent.width * extent.height * 4) as usize;
        s.memory[&mem].1[..len].to_vec()
    }

    pub fn recorded_commands(&self, cmd: vk::CommandBuffer) -> Vec<FakeCmd> {
        self.state
            .borrow()
            .cmds
            .get(&cmd.as_raw())
            .map(|c| c.commands.clone())
            .unwrap_or_default()
    }

    pub fn is_recording(&self, cmd: vk::CommandBuffer) -> bool {
        self.state
            .borrow()
            .cmds
            .get(&cmd.as_raw())
            .is_some_and(|c| c.recording)
    }

    /// Every command the simulated queue has completed, in order.
    pub fn executed_commands(&self) -> Vec<FakeCmd> {
        self.state.borrow().executed.clone()
    }

    pub fn descriptor_write(&self, set: vk::DescriptorSet) -> Option<DescriptorWrite> {
        self.state
            .borrow()
            .descriptor_writes
            .get(&set.as_raw())
            .copied()
    }

    pub fn last_swapchain_desc(&self) -> Option<SwapchainDesc> {
        self.state.borrow().last_swapchain
    }

    pub fn presented(&self) -> Vec<u32> {
        self.state.borrow().presented.clone()
    }

    pub fn pending_submissions(&self) -> usize {
        self.state.borrow().pending.len()
    }
}

impl State {
    fn handle(&mut self) -> u64 {
        let h = self.next_handle;
        self.next_handle += 1;
        h
    }

    fn alloc(&mut self, kind: FakeObject) -> u64 {
        let h = self.handle();
        self.live.insert(h, kind);
        h
    }

    fn release(&mut self, raw: u64) {
        if raw == 0 {
            return;
        }
        if !self.pending.is_empty() {
            self.stats.destroyed_while_pending += 1;
        }
        match self.live.remove(&raw) {
            Some(kind) => self.destroy_log.push(kind),
            None => panic!("destroying unknown or already destroyed handle {raw:#x}"),
        }
    }

    /// Round-robin when nothing is scripted.
    fn next_image(&mut self, swapchain: vk::SwapchainKHR) -> u32 {
        let (images, next) = self
            .swapchains
            .get_mut(&swapchain.as_raw())
            .expect("acquire from unknown swapchain");
        let index = *next;
        *next = (index + 1) % images.len() as u32;
        index
    }

    fn is_pending(&self, cmd: vk::CommandBuffer) -> bool {
        self.pending.iter().any(|p| p.cmd == cmd)
    }

    fn buffer_memory(&self, buffer: vk::Buffer) -> Option<u64> {
        self.buffers.get(&buffer.as_raw()).and_then(|b| b.1)
    }

    fn execute(&mut self, command: &FakeCmd) {
        match *command {
            FakeCmd::CopyBuffer { src, dst, size } => {
                let (Some(from), Some(to)) = (self.buffer_memory(src), self.buffer_memory(dst))
                else {
                    return;
                };
                let bytes = self.memory[&from].1[..size as usize].to_vec();
                if let Some(m) = self.memory.get_mut(&to) {
                    m.1[..size as usize].copy_from_slice(&bytes);
                }
            }
            FakeCmd::CopyBufferToImage { src, image, extent } => {
                let len = (extent.width * extent.height * 4) as usize;
                let target = self.images.get(&image.as_raw()).and_then(|i| i.1);
                let (Some(from), Some(to)) = (self.buffer_memory(src), target) else {
                    return;
                };
                let bytes = self.memory[&from].1[..len].to_vec();
                if let Some(m) = self.memory.get_mut(&to) {
                    m.1[..len].copy_from_slice(&bytes);
                }
            }
            _ => {}
        }
    }

    /// Retires the oldest submission.
    fn complete_one(&mut self) -> bool {
        let Some(done) = self.pending.pop_front() else {
            return false;
        };
        for c in &done.commands {
            self.execute(c);
        }
        self.executed.extend(done.commands);
        if let Some(f) = done.fence {
            self.fences.insert(f.as_raw(), true);
        }
        true
    }

    fn complete_all(&mut self) {
        while self.complete_one() {}
    }

    fn outstanding_fences(&self) -> usize {
        self.fences.values().filter(|&&signaled| !signaled).count()
    }

    fn uniform_in_use(&self, memory: u64) -> bool {
        self.pending.iter().flat_map(|p| &p.commands).any(|c| match c {
            FakeCmd::BindDescriptorSet(set) => self
                .descriptor_writes
                .get(&set.as_raw())
                .and_then(|w| self.buffer_memory(w.uniform_buffer))
                == Some(memory),
            _ => false,
        })
    }
}

impl FakeGpu {
    fn record(&self, cmd: vk::CommandBuffer, command: FakeCmd) {
        let mut s = self.state.borrow_mut();
        let state = s.cmds.entry(cmd.as_raw()).or_default();
        assert!(
            state.recording,
            "{} recorded outside begin/end",
            command.name()
        );
        state.commands.push(command);
    }

    fn memory_for(&self, memory: vk::DeviceMemory) -> VkResult<()> {
        let s = self.state.borrow();
        match s.memory.get(&memory.as_raw()) {
            Some((HOST_TYPE, _)) => Ok(()),
            _ => Err(vk::Result::ERROR_MEMORY_MAP_FAILED),
        }
    }
}

impl Gpu for FakeGpu {
    fn create_semaphore(&self) -> VkResult<vk::Semaphore> {
        let h = self.state.borrow_mut().alloc(FakeObject::Semaphore);
        Ok(vk::Semaphore::from_raw(h))
    }

    fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence> {
        let mut s = self.state.borrow_mut();
        let h = s.alloc(FakeObject::Fence);
        s.fences.insert(h, signaled);
        Ok(vk::Fence::from_raw(h))
    }

    fn wait_for_fence(&self, fence: vk::Fence) -> VkResult<()> {
        let mut s = self.state.borrow_mut();
        s.stats.fence_waits += 1;
        while !s.fences[&fence.as_raw()] {
            assert!(
                s.complete_one(),
                "waiting on fence {:#x} that no submission will signal",
                fence.as_raw()
            );
        }
        Ok(())
    }

    fn reset_fence(&self, fence: vk::Fence) -> VkResult<()> {
        let mut s = self.state.borrow_mut();
        assert!(
            !s.pending.iter().any(|p| p.fence == Some(fence)),
            "resetting a fence owned by a pending submission"
        );
        s.fences.insert(fence.as_raw(), false);
        Ok(())
    }

    fn fence_signaled(&self, fence: vk::Fence) -> VkResult<bool> {
        Ok(self.state.borrow().fences[&fence.as_raw()])
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        let mut s = self.state.borrow_mut();
        s.signaled_semaphores.remove(&semaphore.as_raw());
        s.release(semaphore.as_raw());
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        let mut s = self.state.borrow_mut();
        s.fences.remove(&fence.as_raw());
        s.release(fence.as_raw());
    }

    fn device_wait_idle(&self) -> VkResult<()> {
        let mut s = self.state.borrow_mut();
        s.stats.device_idle_waits += 1;
        s.complete_all();
        Ok(())
    }

    fn queue_wait_idle(&self) -> VkResult<()> {
        let mut s = self.state.borrow_mut();
        s.stats.queue_idle_waits += 1;
        s.complete_all();
        Ok(())
    }

    fn surface_capabilities(&self) -> VkResult<vk::SurfaceCapabilitiesKHR> {
        Ok(self.state.borrow().caps)
    }

    fn surface_formats(&self) -> VkResult<Vec<vk::SurfaceFormatKHR>> {
        Ok(self.state.borrow().formats.clone())
    }

    fn surface_present_modes(&self) -> VkResult<Vec<vk::PresentModeKHR>> {
        Ok(self.state.borrow().modes.clone())
    }

    fn create_swapchain(&self, desc: &SwapchainDesc) -> VkResult<vk::SwapchainKHR> {
        assert!(
            desc.extent.width > 0 && desc.extent.height > 0,
            "swapchain with zero extent"
        );
        let mut s = self.state.borrow_mut();
        if desc.old_swapchain != vk::SwapchainKHR::null() {
            assert!(
                s.live.contains_key(&desc.old_swapchain.as_raw()),
                "old swapchain already destroyed"
            );
        }
        s.stats.swapchains_created += 1;
        s.last_swapchain = Some(*desc);
        let handle = s.alloc(FakeObject::Swapchain);
        let images = (0..desc.min_image_count)
            .map(|_| vk::Image::from_raw(s.handle()))
            .collect();
        s.swapchains.insert(handle, (images, 0));
        Ok(vk::SwapchainKHR::from_raw(handle))
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>> {
        Ok(self.state.borrow().swapchains[&swapchain.as_raw()].0.clone())
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        let mut s = self.state.borrow_mut();
        s.swapchains.remove(&swapchain.as_raw());
        s.release(swapchain.as_raw());
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        signal: vk::Semaphore,
    ) -> VkResult<(u32, bool)> {
        let mut s = self.state.borrow_mut();
        s.stats.acquires += 1;
        let (index, suboptimal) = match s.acquire_script.pop_front() {
            Some(Scripted::Status(vk::Result::SUBOPTIMAL_KHR)) => {
                (s.next_image(swapchain), true)
            }
            Some(Scripted::Status(err)) => return Err(err),
            Some(Scripted::Index(i)) => (i, false),
            None => (s.next_image(swapchain), false),
        };
        if !s.signaled_semaphores.insert(signal.as_raw()) {
            s.stats.semaphore_misuse += 1;
        }
        Ok((index, suboptimal))
    }

    fn queue_present(
        &self,
        _swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> VkResult<bool> {
        let mut s = self.state.borrow_mut();
        s.stats.presents += 1;
        if !s.signaled_semaphores.remove(&wait.as_raw()) {
            s.stats.semaphore_misuse += 1;
        }
        match s.present_script.pop_front() {
            None | Some(vk::Result::SUCCESS) => {
                s.presented.push(image_index);
                Ok(false)
            }
            Some(vk::Result::SUBOPTIMAL_KHR) => {
                s.presented.push(image_index);
                Ok(true)
            }
            Some(err) => Err(err),
        }
    }

    fn create_image(&self, desc: &ImageDesc) -> VkResult<vk::Image> {
        let mut s = self.state.borrow_mut();
        let h = s.alloc(FakeObject::Image);
        s.images.insert(h, (desc.extent, None));
        Ok(vk::Image::from_raw(h))
    }

    fn image_memory_requirements(&self, image: vk::Image) -> vk::MemoryRequirements {
        let extent = self.state.borrow().images[&image.as_raw()].0;
        vk::MemoryRequirements {
            size: extent.width as u64 * extent.height as u64 * 4,
            alignment: 256,
            memory_type_bits: 0b11,
        }
    }

    fn bind_image_memory(&self, image: vk::Image, memory: vk::DeviceMemory) -> VkResult<()> {
        let mut s = self.state.borrow_mut();
        if let Some(i) = s.images.get_mut(&image.as_raw()) {
            i.1 = Some(memory.as_raw());
        }
        Ok(())
    }

    fn destroy_image(&self, image: vk::Image) {
        let mut s = self.state.borrow_mut();
        s.images.remove(&image.as_raw());
        s.release(image.as_raw());
    }

    fn create_image_view(
        &self,
        image: vk::Image,
        _format: vk::Format,
        _aspect: vk::ImageAspectFlags,
    ) -> VkResult<vk::ImageView> {
        let mut s = self.state.borrow_mut();
        let h = s.alloc(FakeObject::ImageView);
        s.views.insert(h, image.as_raw());
        Ok(vk::ImageView::from_raw(h))
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        let mut s = self.state.borrow_mut();
        s.views.remove(&view.as_raw());
        s.release(view.as_raw());
    }

    fn create_sampler(&self) -> VkResult<vk::Sampler> {
        let h = self.state.borrow_mut().alloc(FakeObject::Sampler);
        Ok(vk::Sampler::from_raw(h))
    }

    fn destroy_sampler(&self, sampler: vk::Sampler) {
        self.state.borrow_mut().release(sampler.as_raw());
    }

    fn memory_properties(&self) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: 2,
            memory_heap_count: 1,
            ..Default::default()
        };
        props.memory_types[DEVICE_LOCAL_TYPE as usize].property_flags =
            vk::MemoryPropertyFlags::DEVICE_LOCAL;
        props.memory_types[HOST_TYPE as usize].property_flags =
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        props
    }

    fn create_buffer(
        &self,
        size: vk::DeviceSize,
        _usage: vk::BufferUsageFlags,
    ) -> VkResult<vk::Buffer> {
        let mut s = self.state.borrow_mut();
        let h = s.alloc(FakeObject::Buffer);
        s.buffers.insert(h, (size, None));
        Ok(vk::Buffer::from_raw(h))
    }

    fn buffer_memory_requirements(&self, buffer: vk::Buffer) -> vk::MemoryRequirements {
        let s = self.state.borrow();
        vk::MemoryRequirements {
            size: s.buffers[&buffer.as_raw()].0,
            alignment: 16,
            memory_type_bits: s.buffer_type_bits,
        }
    }

    fn allocate_memory(
        &self,
        size: vk::DeviceSize,
        memory_type_index: u32,
    ) -> VkResult<vk::DeviceMemory> {
        let mut s = self.state.borrow_mut();
        let h = s.alloc(FakeObject::Memory);
        s.memory
            .insert(h, (memory_type_index, vec![0; size as usize]));
        Ok(vk::DeviceMemory::from_raw(h))
    }

    fn bind_buffer_memory(&self, buffer: vk::Buffer, memory: vk::DeviceMemory) -> VkResult<()> {
        let mut s = self.state.borrow_mut();
        if let Some(b) = s.buffers.get_mut(&buffer.as_raw()) {
            b.1 = Some(memory.as_raw());
        }
        Ok(())
    }

    fn write_memory(
        &self,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
        data: &[u8],
    ) -> VkResult<()> {
        self.memory_for(memory)?;
        let mut s = self.state.borrow_mut();
        if s.uniform_in_use(memory.as_raw()) {
            s.stats.stale_uniform_writes += 1;
        }
        let bytes = &mut s
            .memory
            .get_mut(&memory.as_raw())
            .ok_or(vk::Result::ERROR_MEMORY_MAP_FAILED)?
            .1;
        let start = offset as usize;
        bytes[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn read_memory(
        &self,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
        len: usize,
    ) -> VkResult<Vec<u8>> {
        self.memory_for(memory)?;
        let s = self.state.borrow();
        let start = offset as usize;
        Ok(s.memory[&memory.as_raw()].1[start..start + len].to_vec())
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        let mut s = self.state.borrow_mut();
        s.buffers.remove(&buffer.as_raw());
        s.release(buffer.as_raw());
    }

    fn free_memory(&self, memory: vk::DeviceMemory) {
        let mut s = self.state.borrow_mut();
        s.memory.remove(&memory.as_raw());
        s.release(memory.as_raw());
    }

    fn create_descriptor_set_layout(
        &self,
        _bindings: &[vk::DescriptorSetLayoutBinding<'_>],
    ) -> VkResult<vk::DescriptorSetLayout> {
        let h = self.state.borrow_mut().alloc(FakeObject::SetLayout);
        Ok(vk::DescriptorSetLayout::from_raw(h))
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        self.state.borrow_mut().release(layout.as_raw());
    }

    fn create_descriptor_pool(
        &self,
        _max_sets: u32,
        _sizes: &[vk::DescriptorPoolSize],
    ) -> VkResult<vk::DescriptorPool> {
        let h = self.state.borrow_mut().alloc(FakeObject::DescriptorPool);
        Ok(vk::DescriptorPool::from_raw(h))
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        self.state.borrow_mut().release(pool.as_raw());
    }

    fn allocate_descriptor_sets(
        &self,
        _pool: vk::DescriptorPool,
        _layout: vk::DescriptorSetLayout,
        count: u32,
    ) -> VkResult<Vec<vk::DescriptorSet>> {
        let mut s = self.state.borrow_mut();
        Ok((0..count)
            .map(|_| vk::DescriptorSet::from_raw(s.handle()))
            .collect())
    }

    fn write_descriptor_set(&self, write: &DescriptorWrite) {
        self.state
            .borrow_mut()
            .descriptor_writes
            .insert(write.set.as_raw(), *write);
    }

    fn create_graphics_pipeline(
        &self,
        desc: &PipelineDesc<'_>,
    ) -> VkResult<(vk::PipelineLayout, vk::Pipeline)> {
        if desc.vertex_spv.is_empty() || desc.fragment_spv.is_empty() {
            return Err(vk::Result::ERROR_INVALID_SHADER_NV);
        }
        let mut s = self.state.borrow_mut();
        s.stats.pipelines_created += 1;
        let layout = s.alloc(FakeObject::PipelineLayout);
        let pipeline = s.alloc(FakeObject::Pipeline);
        Ok((
            vk::PipelineLayout::from_raw(layout),
            vk::Pipeline::from_raw(pipeline),
        ))
    }

    fn destroy_pipeline(&self, layout: vk::PipelineLayout, pipeline: vk::Pipeline) {
        let mut s = self.state.borrow_mut();
        s.release(pipeline.as_raw());
        s.release(layout.as_raw());
    }

    fn allocate_command_buffers(&self, count: u32) -> VkResult<Vec<vk::CommandBuffer>> {
        let mut s = self.state.borrow_mut();
        Ok((0..count)
            .map(|_| {
                let h = s.alloc(FakeObject::CommandBuffer);
                s.cmds.insert(h, CmdState::default());
                vk::CommandBuffer::from_raw(h)
            })
            .collect())
    }

    fn free_command_buffers(&self, cmds: &[vk::CommandBuffer]) {
        let mut s = self.state.borrow_mut();
        for &cmd in cmds {
            if s.is_pending(cmd) {
                s.stats.pending_cmd_rewrites += 1;
            }
            s.cmds.remove(&cmd.as_raw());
            s.release(cmd.as_raw());
        }
    }

    fn begin_command_buffer(&self, cmd: vk::CommandBuffer, _one_time_submit: bool) -> VkResult<()> {
        let mut s = self.state.borrow_mut();
        s.stats.command_begins += 1;
        if s.is_pending(cmd) {
            s.stats.pending_cmd_rewrites += 1;
        }
        let state = s.cmds.entry(cmd.as_raw()).or_default();
        state.recording = true;
        state.commands.clear();
        Ok(())
    }

    fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> VkResult<()> {
        let mut s = self.state.borrow_mut();
        let state = s.cmds.entry(cmd.as_raw()).or_default();
        assert!(state.recording, "end without begin");
        state.recording = false;
        Ok(())
    }

    fn reset_command_buffer(&self, cmd: vk::CommandBuffer) -> VkResult<()> {
        let mut s = self.state.borrow_mut();
        if s.is_pending(cmd) {
            s.stats.pending_cmd_rewrites += 1;
        }
        let state = s.cmds.entry(cmd.as_raw()).or_default();
        state.recording = false;
        state.commands.clear();
        Ok(())
    }

    fn cmd_image_barrier(&self, cmd: vk::CommandBuffer, barrier: &ImageBarrier) {
        self.record(cmd, FakeCmd::Barrier(*barrier));
    }

    fn cmd_copy_buffer(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        size: vk::DeviceSize,
    ) {
        self.record(cmd, FakeCmd::CopyBuffer { src, dst, size });
    }

    fn cmd_copy_buffer_to_image(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Image,
        extent: vk::Extent2D,
    ) {
        self.record(
            cmd,
            FakeCmd::CopyBufferToImage {
                src,
                image: dst,
                extent,
            },
        );
    }

    fn cmd_begin_rendering(
        &self,
        cmd: vk::CommandBuffer,
        view: vk::ImageView,
        extent: vk::Extent2D,
        clear: [f32; 4],
    ) {
        self.record(cmd, FakeCmd::BeginRendering { view, extent, clear });
    }

    fn cmd_end_rendering(&self, cmd: vk::CommandBuffer) {
        self.record(cmd, FakeCmd::EndRendering);
    }

    fn cmd_bind_pipeline(&self, cmd: vk::CommandBuffer, pipeline: vk::Pipeline) {
        self.record(cmd, FakeCmd::BindPipeline(pipeline));
    }

    fn cmd_set_viewport_scissor(&self, cmd: vk::CommandBuffer, extent: vk::Extent2D) {
        self.record(cmd, FakeCmd::ViewportScissor(extent));
    }

    fn cmd_bind_descriptor_set(
        &self,
        cmd: vk::CommandBuffer,
        _layout: vk::PipelineLayout,
        set: vk::DescriptorSet,
    ) {
        self.record(cmd, FakeCmd::BindDescriptorSet(set));
    }

    fn cmd_bind_vertex_buffer(&self, cmd: vk::CommandBuffer, buffer: vk::Buffer) {
        self.record(cmd, FakeCmd::BindVertexBuffer(buffer));
    }

    fn cmd_bind_index_buffer(
        &self,
        cmd: vk::CommandBuffer,
        buffer: vk::Buffer,
        index_type: vk::IndexType,
    ) {
        self.record(cmd, FakeCmd::BindIndexBuffer(buffer, index_type));
    }

    fn cmd_draw_indexed(&self, cmd: vk::CommandBuffer, index_count: u32) {
        self.record(cmd, FakeCmd::DrawIndexed(index_count));
    }

    fn cmd_draw(&self, cmd: vk::CommandBuffer, vertex_count: u32) {
        self.record(cmd, FakeCmd::Draw(vertex_count));
    }

    fn queue_submit(&self, submission: &Submission) -> VkResult<()> {
        let mut s = self.state.borrow_mut();
        s.stats.submits += 1;

        let cmd_state = s
            .cmds
            .get(&submission.cmd.as_raw())
            .expect("submitting an unknown command buffer");
        assert!(!cmd_state.recording, "submitting a command buffer still recording");
        let commands = cmd_state.commands.clone();

        if let Some((sem, _)) = submission.wait {
            if !s.signaled_semaphores.remove(&sem.as_raw()) {
                s.stats.semaphore_misuse += 1;
            }
        }
        if let Some(sem) = submission.signal {
            if !s.signaled_semaphores.insert(sem.as_raw()) {
                s.stats.semaphore_misuse += 1;
            }
        }

        let target = commands.iter().find_map(|c| match c {
            FakeCmd::BeginRendering { view, .. } => {
                s.views.get(&view.as_raw()).map(|&i| vk::Image::from_raw(i))
            }
            _ => None,
        });
        if target.is_some() && s.pending.iter().any(|p| p.target == target) {
            s.stats.image_overlaps += 1;
        }

        s.pending.push_back(Pending {
            commands,
            cmd: submission.cmd,
            fence: submission.fence,
            target,
        });
        let outstanding = s.outstanding_fences();
        s.stats.max_outstanding_fences = s.stats.max_outstanding_fences.max(outstanding);
        Ok(())
    }
}
