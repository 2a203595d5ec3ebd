// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
HDR output.

With HDR on, the frame is composited into an offscreen 10-bit target instead of the back buffer,
then one more quad draw maps it into the extended-range back buffer.
*/

use crate::Error;
use crate::bindings::descriptor_heap::DescriptorHandle;
use crate::bindings::resource_tracking::ResourceState;
use crate::bindings::visible_to::{BufferUsage, TextureConfig, TextureUsage};
use crate::config::HdrConfig;
use crate::images::command_list::{Binding, Command, CommandList};
use crate::images::device::BoundDevice;
use crate::images::quad::{PipelineCache, QUAD_STRIDE, TargetView, constant_size};
use crate::images::stock_shaders;
use crate::images::texture::Texture;
use crate::images::viewport::{Viewport, output_mvp};
use crate::imp::{
    BlendMode, BufferDescriptor, BufferId, PipelineDescriptor, PipelineKind, Topology,
    VertexLayout,
};
use crate::pixel_formats::PixelFormat;
use bytemuck::{Pod, Zeroable};

/// Format of the HDR back buffer.
pub const HDR_SWAPCHAIN_FORMAT: PixelFormat = PixelFormat::Rgba16Float;

/// Format requested for the offscreen composite.
pub const HDR_OFFSCREEN_FORMAT: PixelFormat = PixelFormat::Rgb10A2Unorm;

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct HdrUniforms {
    mvp: [f32; 16],
    max_nits: f32,
    paper_white_nits: f32,
    contrast: f32,
    expand_gamut: f32,
}

impl HdrUniforms {
    fn new(settings: &HdrConfig) -> Self {
        HdrUniforms {
            mvp: output_mvp(0).to_cols_array(),
            max_nits: settings.max_nits,
            paper_white_nits: settings.paper_white_nits,
            contrast: settings.contrast,
            expand_gamut: if settings.expand_gamut { 1.0 } else { 0.0 },
        }
    }
}

#[derive(Debug)]
pub struct HdrPipeline {
    settings: HdrConfig,
    offscreen: Texture,
    constants: BufferId,
    pipelines: PipelineCache,
}

impl HdrPipeline {
    pub fn new(device: &mut BoundDevice, settings: HdrConfig) -> Result<HdrPipeline, Error> {
        let constants = device.backend_mut().create_buffer(&BufferDescriptor {
            label: "hdr constants".to_string(),
            size: constant_size(std::mem::size_of::<HdrUniforms>()),
            usage: BufferUsage::Constant,
        })?;
        Ok(HdrPipeline {
            settings,
            offscreen: Texture::default(),
            constants,
            pipelines: PipelineCache::default(),
        })
    }

    pub fn settings(&self) -> &HdrConfig {
        &self.settings
    }

    pub fn set_settings(&mut self, settings: HdrConfig) {
        self.settings = settings;
    }

    pub fn offscreen(&self) -> &Texture {
        &self.offscreen
    }

    /// Matches the offscreen target to the back buffer.
    pub fn resize(&mut self, device: &mut BoundDevice, width: u32, height: u32) -> Result<(), Error> {
        let config = TextureConfig::new("hdr offscreen", width, height, HDR_OFFSCREEN_FORMAT)
            .with_usage(TextureUsage::SHADER_RESOURCE | TextureUsage::RENDER_TARGET);
        if self.offscreen.needs_recreate(&config) {
            self.offscreen.release(device);
            self.offscreen = Texture::create(device, &config)?;
        }
        Ok(())
    }

    /// Moves the offscreen target to render-target state and clears it.  Returns where to draw.
    pub fn begin(&mut self, cmd: &mut CommandList) -> Result<TargetView, Error> {
        self.offscreen.transition(cmd, ResourceState::RenderTarget)?;
        let target = TargetView::of(&self.offscreen)
            .ok_or_else(|| Error::UnknownResource(self.offscreen.label().to_string()))?;
        cmd.record(Command::ClearRenderTarget {
            view: target.view,
            color: [0.0, 0.0, 0.0, 1.0],
        })?;
        Ok(target)
    }

    /// Draws the offscreen composite into `back_buffer`, which must be in render-target state.
    pub fn resolve(
        &mut self,
        device: &mut BoundDevice,
        cmd: &mut CommandList,
        back_buffer: &TargetView,
        sampler: DescriptorHandle,
        quad: BufferId,
    ) -> Result<(), Error> {
        self.offscreen.transition(cmd, ResourceState::ShaderRead)?;
        let view = self
            .offscreen
            .shader_view()
            .ok_or_else(|| Error::UnknownResource(self.offscreen.label().to_string()))?;
        let uniforms = HdrUniforms::new(&self.settings);
        device
            .backend_mut()
            .write_buffer(self.constants, 0, bytemuck::bytes_of(&uniforms))?;
        let pipeline = self
            .pipelines
            .get(device, back_buffer.format, BlendMode::Opaque, describe_hdr)?;
        back_buffer.bind(cmd, Viewport::full(back_buffer.width, back_buffer.height))?;
        cmd.record(Command::SetPipeline(pipeline))?;
        cmd.record(Command::Bind {
            binding: 0,
            resource: Binding::ConstantBuffer {
                buffer: self.constants,
                offset: 0,
                size: std::mem::size_of::<HdrUniforms>() as u64,
            },
        })?;
        cmd.record(Command::Bind {
            binding: 1,
            resource: Binding::Texture(view),
        })?;
        cmd.record(Command::Bind {
            binding: 2,
            resource: Binding::Sampler(sampler),
        })?;
        cmd.record(Command::SetVertexBuffer {
            buffer: quad,
            offset: 0,
            stride: QUAD_STRIDE,
        })?;
        cmd.record(Command::Draw {
            vertex_count: 4,
            instance_count: 1,
            first_vertex: 0,
            first_instance: 0,
        })
    }

    pub fn release(&mut self, device: &mut BoundDevice) {
        self.offscreen.release(device);
        self.pipelines.release(device);
        device.backend_mut().destroy_buffer(self.constants);
    }
}

fn describe_hdr(format: PixelFormat, blend: BlendMode) -> PipelineDescriptor {
    let (vertex, fragment) = stock_shaders::hdr();
    PipelineDescriptor {
        label: "hdr resolve".to_string(),
        kind: PipelineKind::Render {
            vertex,
            fragment,
            vertex_layout: VertexLayout::Quad,
            topology: Topology::TriangleStrip,
            blend,
            target_format: format,
        },
        bindings: stock_shaders::quad_bindings(),
    }
}
