// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Resource usage declarations and device format capabilities.
//!
//! When creating GPU resources, it's important to declare how they will be used so the backend
//! can pick a format and memory placement.  This module provides:
//!
//! - [`TextureUsage`] - how a texture will be accessed by shaders and passes
//! - [`FormatSupport`] - what a device can do with a pixel format
//! - [`BufferUsage`] - how a buffer will be used on the GPU
//! - [`TextureConfig`] - a complete texture request
//!
//! # Examples
//!
//! ```
//! use framechain::bindings::visible_to::{TextureConfig, TextureUsage, FormatSupport};
//! use framechain::pixel_formats::PixelFormat;
//!
//! let config = TextureConfig::new("pass0", 320, 240, PixelFormat::Rgba8Unorm)
//!     .with_usage(TextureUsage::SHADER_RESOURCE | TextureUsage::RENDER_TARGET);
//! assert!(config.required_support().contains(FormatSupport::RENDER_TARGET));
//! ```

use crate::pixel_formats::PixelFormat;

bitflags::bitflags! {
    /// Describes how a texture will be used in the rendering pipeline.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TextureUsage: u32 {
        /// Sampled by shaders.
        const SHADER_RESOURCE = 1 << 0;
        /// Bound as a pass output.
        const RENDER_TARGET = 1 << 1;
        /// Written by compute (mip generation).
        const UNORDERED_ACCESS = 1 << 2;
        /// Receives CPU uploads through a staging buffer.
        const COPY_DEST = 1 << 3;
    }
}

bitflags::bitflags! {
    /// Capability bits a device reports per pixel format.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FormatSupport: u32 {
        const SHADER_SAMPLE = 1 << 0;
        const RENDER_TARGET = 1 << 1;
        const UNORDERED_ACCESS = 1 << 2;
        const BLENDABLE = 1 << 3;
    }
}

/// Describes how a buffer will be used on the GPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferUsage {
    /// Per-pass uniforms, rewritten with discard semantics.
    Constant,
    /// Vertex or per-instance data.
    Vertex,
    /// CPU-visible upload memory, the source of buffer-to-texture copies.
    Staging,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MipLevels {
    One,
    /// The full chain down to 1x1, generated on the GPU (or CPU when unsupported).
    Full,
}

/// A texture request.  The device may substitute the format.
#[derive(Debug, Clone, PartialEq)]
pub struct TextureConfig {
    pub label: String,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub usage: TextureUsage,
    pub mip_levels: MipLevels,
}

impl TextureConfig {
    pub fn new(label: impl Into<String>, width: u32, height: u32, format: PixelFormat) -> Self {
        TextureConfig {
            label: label.into(),
            width,
            height,
            format,
            usage: TextureUsage::SHADER_RESOURCE | TextureUsage::COPY_DEST,
            mip_levels: MipLevels::One,
        }
    }

    pub fn with_usage(mut self, usage: TextureUsage) -> Self {
        self.usage = usage;
        self
    }

    pub fn with_mips(mut self, mip_levels: MipLevels) -> Self {
        self.mip_levels = mip_levels;
        self
    }

    pub fn is_render_target(&self) -> bool {
        self.usage.contains(TextureUsage::RENDER_TARGET)
    }

    /// Number of levels a full chain would have for this size.
    pub fn mip_count(&self) -> u32 {
        match self.mip_levels {
            MipLevels::One => 1,
            MipLevels::Full => self.width.max(self.height).max(1).ilog2() + 1,
        }
    }

    /// Capability bits the chosen format must have.
    pub fn required_support(&self) -> FormatSupport {
        let mut required = FormatSupport::empty();
        if self.usage.contains(TextureUsage::SHADER_RESOURCE) {
            required |= FormatSupport::SHADER_SAMPLE;
        }
        if self.usage.contains(TextureUsage::RENDER_TARGET) {
            required |= FormatSupport::RENDER_TARGET;
        }
        required
    }
}
