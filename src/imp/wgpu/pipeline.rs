// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
use super::error::scoped;
use super::pixel_format::wgpu_format;
use crate::Error;
use crate::bindings::visible_to::FormatSupport;
use crate::images::quad::QUAD_STRIDE;
use crate::images::sprites::SPRITE_STRIDE;
use crate::imp::{
    BindingKind, BindingLayout, BlendMode, PipelineDescriptor, PipelineKind, ShaderCode, ShaderStage, Topology,
    VertexLayout,
};
use std::borrow::Cow;
use wgpu::{
    BindGroupLayoutEntry, BindingType, BlendState, BufferBindingType, ColorTargetState, MultisampleState,
    PipelineLayoutDescriptor, PolygonMode, PrimitiveState, PrimitiveTopology, SamplerBindingType, ShaderStages,
    StorageTextureAccess, TextureSampleType, TextureViewDimension, VertexAttribute, VertexBufferLayout,
    VertexStepMode,
};

const QUAD_ATTRIBUTES: [VertexAttribute; 2] = wgpu::vertex_attr_array![0 => Float32x2, 1 => Float32x2];

//colors are packed RGBA8, one per corner
const SPRITE_ATTRIBUTES: [VertexAttribute; 7] = wgpu::vertex_attr_array![
    0 => Float32x4,
    1 => Float32x4,
    2 => Unorm8x4,
    3 => Unorm8x4,
    4 => Unorm8x4,
    5 => Unorm8x4,
    6 => Float32x2
];

#[derive(Debug)]
enum Kind {
    Render(wgpu::RenderPipeline),
    Compute(wgpu::ComputePipeline),
}

/// A created pipeline and the layout its bind groups are built against.
#[derive(Debug)]
pub(super) struct Pipeline {
    kind: Kind,
    layout: wgpu::BindGroupLayout,
    bindings: Vec<BindingLayout>,
}

impl Pipeline {
    pub(super) fn render(&self) -> Option<&wgpu::RenderPipeline> {
        match &self.kind {
            Kind::Render(p) => Some(p),
            Kind::Compute(_) => None,
        }
    }

    pub(super) fn compute(&self) -> Option<&wgpu::ComputePipeline> {
        match &self.kind {
            Kind::Compute(p) => Some(p),
            Kind::Render(_) => None,
        }
    }

    pub(super) fn layout(&self) -> &wgpu::BindGroupLayout {
        &self.layout
    }

    pub(super) fn bindings(&self) -> &[BindingLayout] {
        &self.bindings
    }
}

fn wgsl<'a>(stage: &'a ShaderStage, label: &str) -> Result<&'a str, Error> {
    match &stage.code {
        ShaderCode::Wgsl(source) => Ok(source),
        ShaderCode::Bytecode(_) => Err(Error::Device(format!(
            "{label}: the wgpu backend only accepts WGSL"
        ))),
    }
}

fn layout_entry(binding: &BindingLayout, visibility: ShaderStages) -> Result<BindGroupLayoutEntry, Error> {
    let ty = match binding.kind {
        BindingKind::Texture => BindingType::Texture {
            sample_type: TextureSampleType::Float { filterable: true },
            view_dimension: TextureViewDimension::D2,
            multisampled: false,
        },
        BindingKind::StorageTexture(format) => BindingType::StorageTexture {
            access: StorageTextureAccess::WriteOnly,
            format: wgpu_format(format).ok_or(Error::FormatUnsupported {
                requested: format,
                required: FormatSupport::UNORDERED_ACCESS,
            })?,
            view_dimension: TextureViewDimension::D2,
        },
        BindingKind::Sampler => BindingType::Sampler(SamplerBindingType::Filtering),
        BindingKind::ConstantBuffer => BindingType::Buffer {
            ty: BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
    };
    Ok(BindGroupLayoutEntry {
        binding: binding.binding,
        visibility,
        ty,
        count: None,
    })
}

pub(super) fn create(device: &wgpu::Device, descriptor: &PipelineDescriptor) -> Result<Pipeline, Error> {
    let label = descriptor.label.as_str();
    let visibility = match descriptor.kind {
        PipelineKind::Render { .. } => ShaderStages::VERTEX_FRAGMENT,
        PipelineKind::Compute { .. } => ShaderStages::COMPUTE,
    };
    let entries = descriptor
        .bindings
        .iter()
        .map(|b| layout_entry(b, visibility))
        .collect::<Result<Vec<_>, _>>()?;

    scoped(device, label, Error::Device, |device| {
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(label),
            entries: &entries,
        });
        let pipeline_layout = device.create_pipeline_layout(&PipelineLayoutDescriptor {
            label: Some(label),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });
        let kind = match &descriptor.kind {
            PipelineKind::Render {
                vertex,
                fragment,
                vertex_layout,
                topology,
                blend,
                target_format,
            } => {
                let vertex_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                    label: Some(label),
                    source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(wgsl(vertex, label)?)),
                });
                let fragment_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                    label: Some(label),
                    source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(wgsl(fragment, label)?)),
                });
                let buffers = [match vertex_layout {
                    VertexLayout::Quad => VertexBufferLayout {
                        array_stride: QUAD_STRIDE as u64,
                        step_mode: VertexStepMode::Vertex,
                        attributes: &QUAD_ATTRIBUTES,
                    },
                    VertexLayout::Sprite => VertexBufferLayout {
                        array_stride: SPRITE_STRIDE as u64,
                        step_mode: VertexStepMode::Instance,
                        attributes: &SPRITE_ATTRIBUTES,
                    },
                }];
                let format = wgpu_format(*target_format).ok_or(Error::FormatUnsupported {
                    requested: *target_format,
                    required: FormatSupport::RENDER_TARGET,
                })?;
                let targets = [Some(ColorTargetState {
                    format,
                    blend: match blend {
                        BlendMode::Opaque => None,
                        BlendMode::Alpha => Some(BlendState::ALPHA_BLENDING),
                    },
                    write_mask: Default::default(),
                })];
                let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                    label: Some(label),
                    layout: Some(&pipeline_layout),
                    vertex: wgpu::VertexState {
                        module: &vertex_module,
                        entry_point: Some(&vertex.entry_point),
                        compilation_options: Default::default(),
                        buffers: &buffers,
                    },
                    primitive: PrimitiveState {
                        topology: match topology {
                            Topology::TriangleStrip => PrimitiveTopology::TriangleStrip,
                            Topology::TriangleList => PrimitiveTopology::TriangleList,
                        },
                        strip_index_format: None,
                        front_face: wgpu::FrontFace::Ccw,
                        //rotated and mirrored quads flip winding
                        cull_mode: None,
                        unclipped_depth: false,
                        polygon_mode: PolygonMode::Fill,
                        conservative: false,
                    },
                    depth_stencil: None,
                    multisample: MultisampleState {
                        count: 1,
                        mask: !0,
                        alpha_to_coverage_enabled: false,
                    },
                    fragment: Some(wgpu::FragmentState {
                        module: &fragment_module,
                        entry_point: Some(&fragment.entry_point),
                        compilation_options: Default::default(),
                        targets: &targets,
                    }),
                    multiview: None,
                    cache: None,
                });
                Kind::Render(pipeline)
            }
            PipelineKind::Compute { shader } => {
                let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                    label: Some(label),
                    source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(wgsl(shader, label)?)),
                });
                let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                    label: Some(label),
                    layout: Some(&pipeline_layout),
                    module: &module,
                    entry_point: Some(&shader.entry_point),
                    compilation_options: Default::default(),
                    cache: None,
                });
                Kind::Compute(pipeline)
            }
        };
        logwise::trace_sync!("Created pipeline {label}", label = label.to_string());
        Ok(Pipeline {
            kind,
            layout,
            bindings: descriptor.bindings.clone(),
        })
    })?
}
