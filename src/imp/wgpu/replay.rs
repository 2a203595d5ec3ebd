// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Replays a [`CommandList`] onto a `wgpu::CommandEncoder`.

wgpu tracks resource states itself, so barriers are only checked, not recorded.  Render passes
are opened lazily at the first draw after a render target is set and closed by anything that
needs the encoder: copies, clears, dispatches and the next render target.
*/

use super::pipeline::Pipeline;
use crate::Error;
use crate::bindings::descriptor_heap::DescriptorHandle;
use crate::images::command_list::{Binding, Command, CommandList};
use crate::images::viewport::{Rect, Viewport};
use crate::imp::{BufferId, PipelineId, ResourceId};
use std::collections::{BTreeMap, HashMap};
use std::num::NonZeroU64;

/// What a descriptor slot holds on this backend.
#[derive(Debug)]
pub(super) enum SlotView {
    Texture(wgpu::TextureView),
    Sampler(wgpu::Sampler),
}

/// Borrowed resource tables of the backend.
pub(super) struct Resources<'a> {
    pub textures: &'a HashMap<ResourceId, wgpu::Texture>,
    pub buffers: &'a HashMap<BufferId, wgpu::Buffer>,
    pub pipelines: &'a HashMap<PipelineId, Pipeline>,
    pub slots: &'a HashMap<DescriptorHandle, SlotView>,
}

impl Resources<'_> {
    fn texture(&self, id: &ResourceId) -> Result<&wgpu::Texture, Error> {
        self.textures
            .get(id)
            .ok_or_else(|| Error::UnknownResource(id.to_string()))
    }

    fn buffer(&self, id: &BufferId) -> Result<&wgpu::Buffer, Error> {
        self.buffers
            .get(id)
            .ok_or_else(|| Error::UnknownResource(id.to_string()))
    }

    fn pipeline(&self, id: &PipelineId) -> Result<&Pipeline, Error> {
        self.pipelines
            .get(id)
            .ok_or_else(|| Error::UnknownResource(id.to_string()))
    }

    fn view(&self, slot: &DescriptorHandle) -> Result<&wgpu::TextureView, Error> {
        match self.slots.get(slot) {
            Some(SlotView::Texture(v)) => Ok(v),
            _ => Err(Error::UnknownResource(format!("view {slot:?}"))),
        }
    }

    fn sampler(&self, slot: &DescriptorHandle) -> Result<&wgpu::Sampler, Error> {
        match self.slots.get(slot) {
            Some(SlotView::Sampler(s)) => Ok(s),
            _ => Err(Error::UnknownResource(format!("sampler {slot:?}"))),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Target {
    view: DescriptorHandle,
    width: u32,
    height: u32,
}

fn bind_group(
    device: &wgpu::Device,
    resources: &Resources<'_>,
    pipeline: &Pipeline,
    bound: &BTreeMap<u32, Binding>,
    label: &str,
) -> Result<wgpu::BindGroup, Error> {
    let mut entries = Vec::with_capacity(pipeline.bindings().len());
    for layout in pipeline.bindings() {
        let binding = bound
            .get(&layout.binding)
            .ok_or_else(|| Error::Device(format!("{label}: binding {} not set", layout.binding)))?;
        let resource = match binding {
            Binding::Texture(slot) | Binding::StorageTexture(slot) => {
                wgpu::BindingResource::TextureView(resources.view(slot)?)
            }
            Binding::Sampler(slot) => wgpu::BindingResource::Sampler(resources.sampler(slot)?),
            Binding::ConstantBuffer { buffer, offset, size } => wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                buffer: resources.buffer(buffer)?,
                offset: *offset,
                size: NonZeroU64::new(*size),
            }),
        };
        entries.push(wgpu::BindGroupEntry {
            binding: layout.binding,
            resource,
        });
    }
    Ok(device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some(label),
        layout: pipeline.layout(),
        entries: &entries,
    }))
}

/// `viewport` clipped to the target; `None` when nothing is left.
fn clip_viewport(viewport: Viewport, target: Target) -> Option<Viewport> {
    let x = viewport.x.max(0.0);
    let y = viewport.y.max(0.0);
    let width = (viewport.x + viewport.width).min(target.width as f32) - x;
    let height = (viewport.y + viewport.height).min(target.height as f32) - y;
    (width > 0.0 && height > 0.0).then_some(Viewport { x, y, width, height })
}

fn clip_scissor(rect: Rect, target: Target) -> Rect {
    let x = rect.x.min(target.width);
    let y = rect.y.min(target.height);
    Rect {
        x,
        y,
        width: rect.width.min(target.width - x),
        height: rect.height.min(target.height - y),
    }
}

pub(super) fn replay(
    device: &wgpu::Device,
    encoder: &mut wgpu::CommandEncoder,
    list: &CommandList,
    resources: &Resources<'_>,
) -> Result<(), Error> {
    let label = list.label();
    let mut pass: Option<wgpu::RenderPass<'static>> = None;
    let mut target: Option<Target> = None;
    let mut pipeline: Option<PipelineId> = None;
    let mut bound: BTreeMap<u32, Binding> = BTreeMap::new();
    let mut vertex_buffer: Option<(BufferId, u64)> = None;
    let mut viewport: Option<Viewport> = None;
    let mut scissor: Option<Rect> = None;

    for command in list.commands() {
        match command {
            Command::Barrier { resource, .. } | Command::UavBarrier { resource } => {
                resources.texture(resource)?;
            }
            Command::CopyBufferToTexture {
                buffer,
                footprint,
                texture,
                mip,
            } => {
                pass = None;
                encoder.copy_buffer_to_texture(
                    wgpu::TexelCopyBufferInfo {
                        buffer: resources.buffer(buffer)?,
                        layout: wgpu::TexelCopyBufferLayout {
                            offset: footprint.offset as u64,
                            bytes_per_row: Some(footprint.row_pitch as u32),
                            rows_per_image: Some(footprint.height),
                        },
                    },
                    wgpu::TexelCopyTextureInfo {
                        texture: resources.texture(texture)?,
                        mip_level: *mip,
                        origin: wgpu::Origin3d::ZERO,
                        aspect: wgpu::TextureAspect::All,
                    },
                    wgpu::Extent3d {
                        width: footprint.width,
                        height: footprint.height,
                        depth_or_array_layers: 1,
                    },
                );
            }
            Command::SetPipeline(p) => {
                resources.pipeline(p)?;
                pipeline = Some(*p);
            }
            Command::SetRenderTarget { view, width, height } => {
                pass = None;
                resources.view(view)?;
                target = Some(Target {
                    view: *view,
                    width: *width,
                    height: *height,
                });
                viewport = None;
                scissor = None;
            }
            Command::ClearRenderTarget { view, color } => {
                pass = None;
                let [r, g, b, a] = color.map(f64::from);
                encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some(label),
                    color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                        view: resources.view(view)?,
                        depth_slice: None,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: wgpu::LoadOp::Clear(wgpu::Color { r, g, b, a }),
                            store: wgpu::StoreOp::Store,
                        },
                    })],
                    depth_stencil_attachment: None,
                    timestamp_writes: None,
                    occlusion_query_set: None,
                });
            }
            Command::SetViewport(v) => viewport = Some(*v),
            Command::SetScissor(r) => scissor = Some(*r),
            Command::Bind { binding, resource } => {
                bound.insert(*binding, *resource);
            }
            Command::SetVertexBuffer { buffer, offset, .. } => {
                resources.buffer(buffer)?;
                vertex_buffer = Some((*buffer, *offset));
            }
            Command::Draw {
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            } => {
                let t = target.ok_or_else(|| Error::Device(format!("{label}: draw without a render target")))?;
                let p = pipeline.ok_or_else(|| Error::Device(format!("{label}: draw without a pipeline")))?;
                let p = resources.pipeline(&p)?;
                let render = p
                    .render()
                    .ok_or_else(|| Error::Device(format!("{label}: compute pipeline bound for a draw")))?;
                let Some(v) = clip_viewport(viewport.unwrap_or(Viewport::full(t.width, t.height)), t) else {
                    continue;
                };
                let group = bind_group(device, resources, p, &bound, label)?;
                let rp = match pass.as_mut() {
                    Some(rp) => rp,
                    None => {
                        let rp = encoder
                            .begin_render_pass(&wgpu::RenderPassDescriptor {
                                label: Some(label),
                                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                                    view: resources.view(&t.view)?,
                                    depth_slice: None,
                                    resolve_target: None,
                                    ops: wgpu::Operations {
                                        load: wgpu::LoadOp::Load,
                                        store: wgpu::StoreOp::Store,
                                    },
                                })],
                                depth_stencil_attachment: None,
                                timestamp_writes: None,
                                occlusion_query_set: None,
                            })
                            .forget_lifetime();
                        pass.insert(rp)
                    }
                };
                rp.set_pipeline(render);
                rp.set_bind_group(0, &group, &[]);
                if let Some((buffer, offset)) = vertex_buffer {
                    rp.set_vertex_buffer(0, resources.buffer(&buffer)?.slice(offset..));
                }
                rp.set_viewport(v.x, v.y, v.width, v.height, 0.0, 1.0);
                let s = clip_scissor(scissor.unwrap_or(v.scissor()), t);
                rp.set_scissor_rect(s.x, s.y, s.width, s.height);
                rp.draw(
                    *first_vertex..first_vertex + vertex_count,
                    *first_instance..first_instance + instance_count,
                );
            }
            Command::Dispatch { x, y, z } => {
                pass = None;
                let p = pipeline.ok_or_else(|| Error::Device(format!("{label}: dispatch without a pipeline")))?;
                let p = resources.pipeline(&p)?;
                let compute = p
                    .compute()
                    .ok_or_else(|| Error::Device(format!("{label}: render pipeline bound for a dispatch")))?;
                let group = bind_group(device, resources, p, &bound, label)?;
                let mut cp = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some(label),
                    timestamp_writes: None,
                });
                cp.set_pipeline(compute);
                cp.set_bind_group(0, &group, &[]);
                cp.dispatch_workgroups(*x, *y, *z);
            }
        }
    }
    drop(pass);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const TARGET: Target = Target {
        view: DescriptorHandle {
            heap: crate::bindings::descriptor_heap::HeapKind::RenderTarget,
            index: 0,
        },
        width: 100,
        height: 50,
    };

    #[test]
    fn viewports_are_clipped_to_the_target() {
        let v = clip_viewport(
            Viewport {
                x: -10.0,
                y: 10.0,
                width: 200.0,
                height: 20.0,
            },
            TARGET,
        )
        .unwrap();
        assert_eq!((v.x, v.y, v.width, v.height), (0.0, 10.0, 100.0, 20.0));
        let outside = Viewport {
            x: 120.0,
            y: 0.0,
            width: 10.0,
            height: 10.0,
        };
        assert!(clip_viewport(outside, TARGET).is_none());
    }

    #[test]
    fn scissors_stay_inside() {
        let s = clip_scissor(
            Rect {
                x: 90,
                y: 0,
                width: 40,
                height: 80,
            },
            TARGET,
        );
        assert_eq!((s.x, s.width, s.height), (90, 10, 50));
    }
}
