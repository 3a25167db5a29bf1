// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
pub use winit;

use winit::dpi::{LogicalSize, PhysicalSize};
use winit::window::{Window, WindowAttributes};

pub fn window_attributes(title: &str, width: u32, height: u32) -> WindowAttributes {
    Window::default_attributes()
        .with_title(title)
        .with_inner_size(LogicalSize::new(width, height))
}

/// A minimized window reports a zero-area framebuffer on most platforms.
pub fn is_zero_area(size: PhysicalSize<u32>) -> bool {
    size.width == 0 || size.height == 0
}
