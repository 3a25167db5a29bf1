// SPDX-License-Identifier: CEPL-1.0
use ash::vk;

use crate::error::{Result, VkResultExt};
use crate::gpu::{Gpu, Submission};

/// Frames the CPU may run ahead of the GPU.
pub const FRAMES_IN_FLIGHT: usize = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameSlot {
    pub index: usize,
    /// Signaled by acquisition, waited on by the submit.
    pub image_available: vk::Semaphore,
    /// Signaled by the submit, waited on by present.
    pub render_finished: vk::Semaphore,
    /// Signaled when this slot's last submission retires.
    pub in_flight: vk::Fence,
}

/// Round-robin set of frame slots.
pub struct FrameRing {
    slots: Vec<FrameSlot>,
    current: usize,
}

impl FrameRing {
    pub fn new<G: Gpu>(gpu: &G) -> Result<Self> {
        let mut ring = Self {
            slots: Vec::with_capacity(FRAMES_IN_FLIGHT),
            current: 0,
        };
        for index in 0..FRAMES_IN_FLIGHT {
            match Self::create_slot(gpu, index) {
                Ok(slot) => ring.slots.push(slot),
                Err(e) => {
                    ring.destroy(gpu);
                    return Err(e);
                }
            }
        }
        Ok(ring)
    }

    fn create_slot<G: Gpu>(gpu: &G, index: usize) -> Result<FrameSlot> {
        let image_available = gpu.create_semaphore().op("create_semaphore")?;
        let render_finished = match gpu.create_semaphore().op("create_semaphore") {
            Ok(s) => s,
            Err(e) => {
                gpu.destroy_semaphore(image_available);
                return Err(e);
            }
        };
        // Signaled so the first wait on every slot returns immediately.
        let in_flight = match gpu.create_fence(true).op("create_fence") {
            Ok(f) => f,
            Err(e) => {
                gpu.destroy_semaphore(render_finished);
                gpu.destroy_semaphore(image_available);
                return Err(e);
            }
        };
        Ok(FrameSlot {
            index,
            image_available,
            render_finished,
            in_flight,
        })
    }

    pub fn current(&self) -> FrameSlot {
        self.slots[self.current]
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Returns the current slot once its previous submission has retired.
    ///
    /// The fence is left signaled; `submit_and_signal` resets it right before
    /// the submission that signals it again, so a frame abandoned after this
    /// call cannot strand the slot behind a fence nobody will signal.
    pub fn acquire_frame_slot<G: Gpu>(&self, gpu: &G) -> Result<FrameSlot> {
        let slot = self.current();
        gpu.wait_for_fence(slot.in_flight)
            .op("wait_for_fences(frame slot)")?;
        Ok(slot)
    }

    pub fn advance(&mut self) {
        self.current = (self.current + 1) % self.slots.len();
    }

    pub fn fences(&self) -> impl Iterator<Item = vk::Fence> + '_ {
        self.slots.iter().map(|s| s.in_flight)
    }

    pub fn destroy<G: Gpu>(&mut self, gpu: &G) {
        for slot in self.slots.drain(..) {
            gpu.destroy_fence(slot.in_flight);
            gpu.destroy_semaphore(slot.render_finished);
            gpu.destroy_semaphore(slot.image_available);
        }
        self.current = 0;
    }
}

/// Presentable image index -> fence of the slot that last rendered into it.
///
/// Acquisition order is chosen by the platform, so an image can come back
/// while a different slot's submission still targets it.
#[derive(Debug, Default)]
pub struct ImagesInFlight {
    owners: Vec<Option<vk::Fence>>,
}

impl ImagesInFlight {
    pub fn new(image_count: usize) -> Self {
        Self {
            owners: vec![None; image_count],
        }
    }

    /// Forgets every owner; used when the surface generation changes.
    pub fn reset(&mut self, image_count: usize) {
        self.owners.clear();
        self.owners.resize(image_count, None);
    }

    pub fn owner(&self, image_index: u32) -> Option<vk::Fence> {
        self.owners.get(image_index as usize).copied().flatten()
    }

    /// Waits for any other slot still rendering into `image_index`, then
    /// records `slot` as the image's owner.
    pub fn track<G: Gpu>(&mut self, gpu: &G, image_index: u32, slot: &FrameSlot) -> Result<()> {
        let entry = &mut self.owners[image_index as usize];
        if let Some(previous) = *entry {
            if previous != slot.in_flight
                && !gpu.fence_signaled(previous).op("get_fence_status")?
            {
                gpu.wait_for_fence(previous)
                    .op("wait_for_fences(image in flight)")?;
            }
        }
        *entry = Some(slot.in_flight);
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Acquire {
    Image { index: u32, suboptimal: bool },
    /// The swapchain no longer matches the surface; abandon the frame.
    OutOfDate,
}

pub fn acquire_image<G: Gpu>(
    gpu: &G,
    swapchain: vk::SwapchainKHR,
    slot: &FrameSlot,
) -> Result<Acquire> {
    match gpu.acquire_next_image(swapchain, slot.image_available) {
        Ok((index, suboptimal)) => Ok(Acquire::Image { index, suboptimal }),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Acquire::OutOfDate),
        Err(e) => Err(e).op("acquire_next_image"),
    }
}

/// Submits `cmd` gated on the slot's acquisition; signals the slot's
/// render-finished semaphore and fence.
pub fn submit_and_signal<G: Gpu>(gpu: &G, slot: &FrameSlot, cmd: vk::CommandBuffer) -> Result<()> {
    gpu.reset_fence(slot.in_flight).op("reset_fences")?;
    gpu.queue_submit(&Submission {
        cmd,
        wait: Some((
            slot.image_available,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        )),
        signal: Some(slot.render_finished),
        fence: Some(slot.in_flight),
    })
    .op("queue_submit")
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentStatus {
    Optimal,
    Suboptimal,
    OutOfDate,
}

impl PresentStatus {
    pub fn needs_recreate(self) -> bool {
        !matches!(self, PresentStatus::Optimal)
    }
}

pub fn present<G: Gpu>(
    gpu: &G,
    swapchain: vk::SwapchainKHR,
    slot: &FrameSlot,
    image_index: u32,
) -> Result<PresentStatus> {
    match gpu.queue_present(swapchain, image_index, slot.render_finished) {
        Ok(false) => Ok(PresentStatus::Optimal),
        Ok(true) => Ok(PresentStatus::Suboptimal),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentStatus::OutOfDate),
        Err(e) => Err(e).op("queue_present"),
    }
}
