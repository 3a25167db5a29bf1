// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use prism_render::{PresentModePref, RenderSize};
use tracing::info;

use crate::error::{RenderError, Result, VkResultExt};
use crate::gpu::{Gpu, SwapchainDesc};

/// What the platform reports for "the surface decides the extent".
const UNDEFINED_EXTENT: u32 = u32::MAX;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PresentPrefs {
    pub vsync: bool,
    pub mode: PresentModePref,
}

/// One negotiated surface generation. Replaced wholesale on recreation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SurfaceConfig {
    pub format: vk::Format,
    pub color_space: vk::ColorSpaceKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub image_count: u32,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
}

pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Result<vk::SurfaceFormatKHR> {
    let preferred = [vk::Format::B8G8R8A8_SRGB, vk::Format::R8G8B8A8_SRGB];
    preferred
        .iter()
        .find_map(|&want| {
            formats.iter().copied().find(|f| {
                f.format == want && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
            })
        })
        .or_else(|| formats.first().copied())
        .ok_or(RenderError::NoSurfaceFormats)
}

pub fn choose_present_mode(modes: &[vk::PresentModeKHR], prefs: PresentPrefs) -> vk::PresentModeKHR {
    let order: &[vk::PresentModeKHR] = match (prefs.vsync, prefs.mode) {
        (false, _) => &[
            vk::PresentModeKHR::IMMEDIATE,
            vk::PresentModeKHR::MAILBOX,
            vk::PresentModeKHR::FIFO,
        ],
        (true, PresentModePref::Mailbox) => &[vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::FIFO],
        (true, PresentModePref::Fifo) => &[vk::PresentModeKHR::FIFO],
    };
    // FIFO is the only mode every implementation must support.
    order
        .iter()
        .copied()
        .find(|m| modes.contains(m))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, window: RenderSize) -> vk::Extent2D {
    if caps.current_extent.width != UNDEFINED_EXTENT {
        return caps.current_extent;
    }
    vk::Extent2D {
        width: window
            .width
            .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
        height: window
            .height
            .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
    }
}

/// One more than the minimum, capped by the maximum (0 means no maximum).
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let want = caps.min_image_count + 1;
    if caps.max_image_count == 0 {
        want
    } else {
        want.min(caps.max_image_count)
    }
}

/// Queries the platform and picks a configuration. `None` means the
/// surface currently has zero area and no swapchain may be created.
pub fn negotiate<G: Gpu>(
    gpu: &G,
    window: RenderSize,
    prefs: PresentPrefs,
) -> Result<Option<SurfaceConfig>> {
    let caps = gpu.surface_capabilities().op("surface_capabilities")?;
    let formats = gpu.surface_formats().op("surface_formats")?;
    let modes = gpu.surface_present_modes().op("surface_present_modes")?;

    let extent = choose_extent(&caps, window);
    if extent.width == 0 || extent.height == 0 {
        return Ok(None);
    }

    let format = choose_surface_format(&formats)?;
    let pre_transform = if caps
        .supported_transforms
        .contains(vk::SurfaceTransformFlagsKHR::IDENTITY)
    {
        vk::SurfaceTransformFlagsKHR::IDENTITY
    } else {
        caps.current_transform
    };

    Ok(Some(SurfaceConfig {
        format: format.format,
        color_space: format.color_space,
        present_mode: choose_present_mode(&modes, prefs),
        extent,
        image_count: choose_image_count(&caps),
        pre_transform,
    }))
}

/// Swapchain plus one colour view per presentable image.
pub struct Swapchain {
    pub handle: vk::SwapchainKHR,
    pub config: SurfaceConfig,
    pub images: Vec<vk::Image>,
    pub views: Vec<vk::ImageView>,
}

impl Swapchain {
    /// Creates the swapchain for `config`. `old` is handed to the driver and
    /// stays owned by the caller.
    pub fn create<G: Gpu>(gpu: &G, config: SurfaceConfig, old: vk::SwapchainKHR) -> Result<Self> {
        let desc = SwapchainDesc {
            min_image_count: config.image_count,
            format: vk::SurfaceFormatKHR {
                format: config.format,
                color_space: config.color_space,
            },
            present_mode: config.present_mode,
            extent: config.extent,
            pre_transform: config.pre_transform,
            old_swapchain: old,
        };
        let handle = gpu.create_swapchain(&desc).op("create_swapchain")?;
        let images = match gpu.swapchain_images(handle).op("swapchain_images") {
            Ok(images) => images,
            Err(e) => {
                gpu.destroy_swapchain(handle);
                return Err(e);
            }
        };

        let mut views = Vec::with_capacity(images.len());
        for &image in &images {
            match gpu.create_image_view(image, config.format, vk::ImageAspectFlags::COLOR) {
                Ok(view) => views.push(view),
                Err(e) => {
                    for &v in &views {
                        gpu.destroy_image_view(v);
                    }
                    gpu.destroy_swapchain(handle);
                    return Err(RenderError::Vulkan {
                        op: "create_image_view",
                        result: e,
                    });
                }
            }
        }

        // The platform may hand out more images than requested.
        let config = SurfaceConfig {
            image_count: images.len() as u32,
            ..config
        };
        info!(
            "swapchain: {:?}/{:?} {:?} {}x{} images={}",
            config.format,
            config.color_space,
            config.present_mode,
            config.extent.width,
            config.extent.height,
            config.image_count
        );

        Ok(Self {
            handle,
            config,
            images,
            views,
        })
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Views first; they are created from the swapchain's images.
    pub fn destroy<G: Gpu>(self, gpu: &G) {
        for view in self.views {
            gpu.destroy_image_view(view);
        }
        gpu.destroy_swapchain(self.handle);
    }
}
