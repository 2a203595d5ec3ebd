// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Full-screen quads: the shared vertex buffer, per-format pipelines and the composite blit.

use crate::Error;
use crate::bindings::descriptor_heap::DescriptorHandle;
use crate::bindings::resource_tracking::ResourceState;
use crate::bindings::visible_to::BufferUsage;
use crate::images::command_list::{Binding, Command, CommandList};
use crate::images::device::BoundDevice;
use crate::images::stock_shaders;
use crate::images::texture::Texture;
use crate::images::uniforms::CONSTANT_ALIGNMENT;
use crate::images::viewport::Viewport;
use crate::imp::{
    BlendMode, BufferDescriptor, BufferId, PipelineDescriptor, PipelineId, PipelineKind, Topology,
    VertexLayout,
};
use crate::pixel_formats::PixelFormat;
use glam::Mat4;

/// `[x, y, u, v]` for a triangle strip covering the unit square.
pub(crate) const QUAD_VERTICES: [[f32; 4]; 4] = [
    [0.0, 0.0, 0.0, 1.0],
    [0.0, 1.0, 0.0, 0.0],
    [1.0, 0.0, 1.0, 1.0],
    [1.0, 1.0, 1.0, 0.0],
];

pub(crate) const QUAD_STRIDE: u32 = 16;

/// Something a draw can render into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetView {
    pub view: DescriptorHandle,
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
}

impl TargetView {
    /// The render target view of `texture`, if it has one.
    pub fn of(texture: &Texture) -> Option<TargetView> {
        Some(TargetView {
            view: texture.render_target_view()?,
            format: texture.format(),
            width: texture.width(),
            height: texture.height(),
        })
    }

    pub(crate) fn bind(&self, cmd: &mut CommandList, viewport: Viewport) -> Result<(), Error> {
        cmd.record(Command::SetRenderTarget {
            view: self.view,
            width: self.width,
            height: self.height,
        })?;
        cmd.record(Command::SetViewport(viewport))?;
        cmd.record(Command::SetScissor(viewport.scissor()))
    }
}

pub(crate) fn create_quad_buffer(device: &mut BoundDevice) -> Result<BufferId, Error> {
    let backend = device.backend_mut();
    let buffer = backend.create_buffer(&BufferDescriptor {
        label: "quad".to_string(),
        size: std::mem::size_of_val(&QUAD_VERTICES),
        usage: BufferUsage::Vertex,
    })?;
    if let Err(e) = backend.write_buffer(buffer, 0, bytemuck::cast_slice(&QUAD_VERTICES)) {
        backend.destroy_buffer(buffer);
        return Err(e);
    }
    Ok(buffer)
}

/// Round `size` up to a whole number of constant-buffer blocks.
pub(crate) fn constant_size(size: usize) -> usize {
    size.max(1).div_ceil(CONSTANT_ALIGNMENT) * CONSTANT_ALIGNMENT
}

/**
Pipelines of one shader, keyed by the target format and blend mode they were built for.

Render targets can land on a fallback format and the swapchain can change format on resize, so
the pipeline for a draw is looked up at record time.
*/
#[derive(Debug, Default)]
pub(crate) struct PipelineCache {
    entries: Vec<(PixelFormat, BlendMode, PipelineId)>,
}

impl PipelineCache {
    pub fn get(
        &mut self,
        device: &mut BoundDevice,
        format: PixelFormat,
        blend: BlendMode,
        describe: impl FnOnce(PixelFormat, BlendMode) -> PipelineDescriptor,
    ) -> Result<PipelineId, Error> {
        if let Some((_, _, id)) = self.entries.iter().find(|(f, b, _)| *f == format && *b == blend) {
            return Ok(*id);
        }
        let id = device.backend_mut().create_pipeline(&describe(format, blend))?;
        self.entries.push((format, blend, id));
        Ok(id)
    }

    pub fn release(&mut self, device: &mut BoundDevice) {
        for (_, _, id) in self.entries.drain(..) {
            device.backend_mut().destroy_pipeline(id);
        }
    }
}

/// Draws a texture into a viewport with a transform.  Used for the final composite.
#[derive(Debug)]
pub(crate) struct Blit {
    pipelines: PipelineCache,
    constants: BufferId,
}

impl Blit {
    pub fn new(device: &mut BoundDevice) -> Result<Blit, Error> {
        let constants = device.backend_mut().create_buffer(&BufferDescriptor {
            label: "blit constants".to_string(),
            size: constant_size(std::mem::size_of::<Mat4>()),
            usage: BufferUsage::Constant,
        })?;
        Ok(Blit {
            pipelines: PipelineCache::default(),
            constants,
        })
    }

    /// Records the draw.  `source` must be readable and `target` already in render-target state.
    #[allow(clippy::too_many_arguments)]
    pub fn draw(
        &mut self,
        device: &mut BoundDevice,
        cmd: &mut CommandList,
        source: &Texture,
        sampler: DescriptorHandle,
        target: &TargetView,
        viewport: Viewport,
        mvp: &Mat4,
        quad: BufferId,
    ) -> Result<(), Error> {
        let view = source
            .shader_view()
            .ok_or_else(|| Error::UnknownResource(source.label().to_string()))?;
        if source.state().uniform() != Some(ResourceState::ShaderRead) {
            return Err(Error::InvalidTransition {
                before: source.state().mip(0),
                after: ResourceState::ShaderRead,
            });
        }
        let pipeline = self
            .pipelines
            .get(device, target.format, BlendMode::Opaque, describe_blit)?;
        device
            .backend_mut()
            .write_buffer(self.constants, 0, bytemuck::cast_slice(&mvp.to_cols_array()))?;
        target.bind(cmd, viewport)?;
        cmd.record(Command::SetPipeline(pipeline))?;
        cmd.record(Command::Bind {
            binding: 0,
            resource: Binding::ConstantBuffer {
                buffer: self.constants,
                offset: 0,
                size: std::mem::size_of::<Mat4>() as u64,
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
        self.pipelines.release(device);
        device.backend_mut().destroy_buffer(self.constants);
    }
}

fn describe_blit(format: PixelFormat, blend: BlendMode) -> PipelineDescriptor {
    let (vertex, fragment) = stock_shaders::blit();
    PipelineDescriptor {
        label: "composite blit".to_string(),
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
