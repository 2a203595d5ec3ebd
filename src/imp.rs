// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Backend capability interfaces.
//!
//! The orchestrator in [`crate::images`] only talks to a GPU through these traits.  A backend
//! implements [`Device`] (resource creation), [`Queue`] (command submission and fences) and
//! [`Swapchain`] (back buffers and present); anything implementing all three is a [`Backend`].
//!
//! Two backends ship with the crate: [`headless`] (always available, records everything and
//! renders nothing) and `wgpu` (behind the `backend_wgpu` feature).

use crate::Error;
use crate::bindings::descriptor_heap::DescriptorHandle;
use crate::bindings::resource_tracking::ResourceState;
use crate::bindings::sampler::SamplerDescriptor;
use crate::bindings::visible_to::{BufferUsage, FormatSupport, TextureUsage};
use crate::images::command_list::CommandList;
use crate::pixel_formats::PixelFormat;
use std::fmt::{Debug, Display, Formatter};
use std::time::Duration;

pub mod headless;

#[cfg(feature = "backend_wgpu")]
pub mod wgpu;

/// Row pitch alignment for buffer-to-texture copies.
pub const COPY_PITCH_ALIGNMENT: usize = 256;

macro_rules! id_type {
    ($name:ident, $prefix:literal) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub(crate) u64);

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                write!(f, concat!($prefix, "#{}"), self.0)
            }
        }
    };
}

id_type!(ResourceId, "texture");
id_type!(BufferId, "buffer");
id_type!(PipelineId, "pipeline");

#[derive(Debug, Clone, PartialEq)]
pub struct TextureDescriptor {
    pub label: String,
    pub width: u32,
    pub height: u32,
    /// Already resolved against [`Device::format_support`].
    pub format: PixelFormat,
    pub mip_levels: u32,
    pub usage: TextureUsage,
    pub initial_state: ResourceState,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BufferDescriptor {
    pub label: String,
    pub size: usize,
    pub usage: BufferUsage,
}

/**
Layout of one mip level inside a staging buffer.

`row_pitch` is padded to [`COPY_PITCH_ALIGNMENT`]; `offset` is where the level starts.
*/
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Footprint {
    pub offset: usize,
    pub width: u32,
    pub height: u32,
    pub row_pitch: usize,
    pub format: PixelFormat,
}

impl Footprint {
    pub fn aligned(width: u32, height: u32, format: PixelFormat, offset: usize) -> Self {
        let row = format.row_bytes(width);
        let row_pitch = row.div_ceil(COPY_PITCH_ALIGNMENT) * COPY_PITCH_ALIGNMENT;
        Footprint {
            offset,
            width,
            height,
            row_pitch,
            format,
        }
    }

    /// Bytes covered by this level, padding included.
    pub fn total_bytes(&self) -> usize {
        self.row_pitch * self.height as usize
    }

    /// First byte after this level, rounded for the next level's offset.
    pub fn end(&self) -> usize {
        (self.offset + self.total_bytes()).div_ceil(COPY_PITCH_ALIGNMENT) * COPY_PITCH_ALIGNMENT
    }
}

/// What a descriptor slot points at.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewDescriptor {
    ShaderResource {
        texture: ResourceId,
        format: PixelFormat,
        base_mip: u32,
        mip_count: u32,
    },
    UnorderedAccess {
        texture: ResourceId,
        format: PixelFormat,
        mip: u32,
    },
    RenderTarget {
        texture: ResourceId,
        format: PixelFormat,
    },
    Sampler(SamplerDescriptor),
}

/// Compiled or source shader code.  The orchestrator never looks inside.
#[derive(Debug, Clone, PartialEq)]
pub enum ShaderCode {
    Wgsl(String),
    Bytecode(Vec<u8>),
}

impl ShaderCode {
    pub fn is_empty(&self) -> bool {
        match self {
            ShaderCode::Wgsl(s) => s.trim().is_empty(),
            ShaderCode::Bytecode(b) => b.is_empty(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShaderStage {
    pub code: ShaderCode,
    pub entry_point: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingKind {
    Texture,
    StorageTexture(PixelFormat),
    Sampler,
    ConstantBuffer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindingLayout {
    pub binding: u32,
    pub kind: BindingKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexLayout {
    /// `[x, y, u, v]` per vertex.
    Quad,
    /// One [`crate::images::sprites::Sprite`] per instance.
    Sprite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topology {
    TriangleStrip,
    TriangleList,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlendMode {
    Opaque,
    Alpha,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PipelineKind {
    Render {
        vertex: ShaderStage,
        fragment: ShaderStage,
        vertex_layout: VertexLayout,
        topology: Topology,
        blend: BlendMode,
        target_format: PixelFormat,
    },
    Compute {
        shader: ShaderStage,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineDescriptor {
    pub label: String,
    pub kind: PipelineKind,
    pub bindings: Vec<BindingLayout>,
}

/// Resource creation.
pub trait Device {
    /// Human-readable adapter name.
    fn name(&self) -> String;

    fn format_support(&self, format: PixelFormat) -> FormatSupport;

    fn create_texture(&mut self, descriptor: &TextureDescriptor) -> Result<ResourceId, Error>;
    fn destroy_texture(&mut self, texture: ResourceId);

    fn create_buffer(&mut self, descriptor: &BufferDescriptor) -> Result<BufferId, Error>;
    fn destroy_buffer(&mut self, buffer: BufferId);

    /**
    Writes `data` at `offset`, discarding whatever the GPU last saw there.

    Callers only rewrite regions the GPU has finished reading (after a fence wait, or a
    region not referenced by any in-flight command).
    */
    fn write_buffer(&mut self, buffer: BufferId, offset: usize, data: &[u8]) -> Result<(), Error>;

    /// Staging layout for one mip level of a texture in this format.
    fn copy_footprint(&self, width: u32, height: u32, format: PixelFormat, offset: usize) -> Footprint {
        Footprint::aligned(width, height, format, offset)
    }

    fn create_pipeline(&mut self, descriptor: &PipelineDescriptor) -> Result<PipelineId, Error>;
    fn destroy_pipeline(&mut self, pipeline: PipelineId);

    fn write_descriptor(&mut self, slot: DescriptorHandle, view: &ViewDescriptor) -> Result<(), Error>;
    fn clear_descriptor(&mut self, slot: DescriptorHandle);
}

/// Command submission and fences.
pub trait Queue {
    /// Submits a closed command list.
    fn execute(&mut self, list: &CommandList) -> Result<(), Error>;
    /// Signals `value` once all submitted work completes.
    fn signal(&mut self, value: u64) -> Result<(), Error>;
    fn completed_value(&self) -> u64;
    /// Blocks until the fence reaches `value`; `None` waits indefinitely.
    fn wait(&mut self, value: u64, timeout: Option<Duration>) -> Result<(), Error>;
}

/// Back buffers and presentation.
pub trait Swapchain {
    fn back_buffer_count(&self) -> usize;
    fn back_buffer(&self, index: usize) -> ResourceId;
    fn current_back_buffer_index(&self) -> usize;
    fn swapchain_format(&self) -> PixelFormat;
    fn swapchain_size(&self) -> (u32, u32);
    /// Recreates the back buffers.  Existing back-buffer ids become invalid.
    fn resize_buffers(&mut self, width: u32, height: u32, format: PixelFormat) -> Result<(), Error>;
    fn present(&mut self, sync_interval: u32, allow_tearing: bool) -> Result<(), Error>;
}

/// A complete backend.
pub trait Backend: Device + Queue + Swapchain + Debug {}
impl<T: Device + Queue + Swapchain + Debug> Backend for T {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn footprint_pads_rows() {
        let f = Footprint::aligned(100, 10, PixelFormat::Bgra8Unorm, 0);
        assert_eq!(f.row_pitch, 512);
        assert_eq!(f.total_bytes(), 5120);
        let f = Footprint::aligned(64, 4, PixelFormat::Rgba8Unorm, 0);
        assert_eq!(f.row_pitch, 256);
        assert_eq!(f.end(), 1024);
        let f = Footprint::aligned(3, 3, PixelFormat::R8Unorm, 1024);
        assert_eq!(f.end(), 1792);
    }

    #[test]
    fn ids_display() {
        assert_eq!(ResourceId(3).to_string(), "texture#3");
        assert_eq!(PipelineId(1).to_string(), "pipeline#1");
    }
}
