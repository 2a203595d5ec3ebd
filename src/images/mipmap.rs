// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Mip chain generation with a 4×4 tent filter.
//!
//! Each level is produced from the previous one by a separable filter with weights
//! [`TENT_WEIGHTS`] centred between the two source texels nearest the destination texel.
//! Levels are processed in ascending order because each reads the one before it.
//!
//! The GPU path ([`MipGenerator`]) dispatches one compute pass per level.  Formats without
//! unordered-access support use [`downsample_tent`] on the CPU instead.

use crate::Error;
use crate::bindings::visible_to::BufferUsage;
use crate::images::command_list::CommandList;
use crate::images::device::BoundDevice;
use crate::images::quad::constant_size;
use crate::images::stock_shaders;
use crate::images::texture::Texture;
use crate::imp::{
    BindingKind, BindingLayout, BufferDescriptor, BufferId, PipelineDescriptor, PipelineId,
    PipelineKind,
};
use crate::pixel_formats::{PixelFormat, decode_texel, encode_texel};

pub const TENT_WEIGHTS: [f32; 4] = [0.090845, 0.409155, 0.409155, 0.090845];

/// Threads per workgroup along each axis.
pub(crate) const WORKGROUP_SIZE: u32 = 8;

/**
Constants of the downsample shader.

They are the same for every texture and level (the shader reads sizes from the bound views),
so many textures can generate mips in one command list without clobbering each other.
*/
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub(crate) struct MipConstants {
    pub weights: [f32; 4],
}

/// Size of mip `level` for a base of `width` × `height`.
pub fn mip_size(width: u32, height: u32, level: u32) -> (u32, u32) {
    ((width >> level).max(1), (height >> level).max(1))
}

/**
Produces the next mip level of `src` on the CPU.

`src` is tightly packed in `format`; the result is tightly packed in the same format.
*/
pub fn downsample_tent(src: &[u8], width: u32, height: u32, format: PixelFormat) -> (Vec<u8>, u32, u32) {
    let (dw, dh) = mip_size(width, height, 1);
    let bpp = format.bytes_per_pixel();
    let texel = |x: i64, y: i64| -> [f32; 4] {
        let x = x.clamp(0, width as i64 - 1) as usize;
        let y = y.clamp(0, height as i64 - 1) as usize;
        let offset = (y * width as usize + x) * bpp;
        decode_texel(format, &src[offset..offset + bpp]).map(|c| c as f32)
    };
    let mut out = vec![0u8; dw as usize * dh as usize * bpp];
    for y in 0..dh as i64 {
        for x in 0..dw as i64 {
            let mut acc = [0f32; 4];
            for (j, wy) in TENT_WEIGHTS.iter().enumerate() {
                for (i, wx) in TENT_WEIGHTS.iter().enumerate() {
                    let t = texel(2 * x - 1 + i as i64, 2 * y - 1 + j as i64);
                    let w = wx * wy;
                    for c in 0..4 {
                        acc[c] += t[c] * w;
                    }
                }
            }
            let rgba = acc.map(|c| c.round().clamp(0.0, 255.0) as u8);
            let offset = (y as usize * dw as usize + x as usize) * bpp;
            encode_texel(format, rgba, &mut out[offset..offset + bpp]);
        }
    }
    (out, dw, dh)
}

/// The compute pipeline and constant buffer shared by every GPU mip generation.
#[derive(Debug)]
pub struct MipGenerator {
    pub(crate) pipeline: PipelineId,
    pub(crate) constants: BufferId,
    /// Format the storage binding of the pipeline was built for.
    pub(crate) format: PixelFormat,
}

impl MipGenerator {
    pub fn new(device: &mut BoundDevice, format: PixelFormat) -> Result<Self, Error> {
        let shader = stock_shaders::mip_downsample(format)?;
        let backend = device.backend_mut();
        let constants = backend.create_buffer(&BufferDescriptor {
            label: "mip constants".to_string(),
            size: constant_size(std::mem::size_of::<MipConstants>()),
            usage: BufferUsage::Constant,
        })?;
        let weights = MipConstants { weights: TENT_WEIGHTS };
        if let Err(e) = backend.write_buffer(constants, 0, bytemuck::bytes_of(&weights)) {
            backend.destroy_buffer(constants);
            return Err(e);
        }
        let pipeline = backend.create_pipeline(&PipelineDescriptor {
            label: "mip downsample".to_string(),
            kind: PipelineKind::Compute { shader },
            bindings: vec![
                BindingLayout {
                    binding: 0,
                    kind: BindingKind::Texture,
                },
                BindingLayout {
                    binding: 1,
                    kind: BindingKind::StorageTexture(format),
                },
                BindingLayout {
                    binding: 2,
                    kind: BindingKind::ConstantBuffer,
                },
            ],
        });
        let pipeline = match pipeline {
            Ok(p) => p,
            Err(e) => {
                backend.destroy_buffer(constants);
                return Err(e);
            }
        };
        Ok(MipGenerator {
            pipeline,
            constants,
            format,
        })
    }

    pub fn release(self, device: &mut BoundDevice) {
        let backend = device.backend_mut();
        backend.destroy_pipeline(self.pipeline);
        backend.destroy_buffer(self.constants);
    }
}

/// One [`MipGenerator`] per storage format, built on first use.
#[derive(Debug, Default)]
pub struct MipGenerators {
    generators: Vec<MipGenerator>,
}

impl MipGenerators {
    pub fn get(&mut self, device: &mut BoundDevice, format: PixelFormat) -> Result<&MipGenerator, Error> {
        let index = match self.generators.iter().position(|g| g.format == format) {
            Some(i) => i,
            None => {
                self.generators.push(MipGenerator::new(device, format)?);
                self.generators.len() - 1
            }
        };
        Ok(&self.generators[index])
    }

    pub fn release(&mut self, device: &mut BoundDevice) {
        for generator in self.generators.drain(..) {
            generator.release(device);
        }
    }
}

/**
Regenerates `texture`'s mips if they are stale.

A format the downsample shader can't write leaves the lower levels as they are.
*/
pub(crate) fn refresh(
    device: &mut BoundDevice,
    cmd: &mut CommandList,
    generators: &mut MipGenerators,
    texture: &mut Texture,
) -> Result<(), Error> {
    if !texture.needs_mips() {
        return Ok(());
    }
    let generator = match generators.get(device, texture.format()) {
        Ok(generator) => generator,
        Err(e) => {
            logwise::warn_sync!(
                "{label}: no mip generator: {err}",
                label = texture.label().to_string(),
                err = logwise::privacy::LogIt(&e)
            );
            texture.skip_mips();
            return Ok(());
        }
    };
    texture.generate_mips(cmd, generator)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weights_are_normalized() {
        let sum: f32 = TENT_WEIGHTS.iter().sum();
        assert!((sum - 1.0).abs() < 1e-6);
    }

    #[test]
    fn flat_images_stay_flat() {
        let src = [10u8, 20, 30, 255].repeat(16);
        let (out, w, h) = downsample_tent(&src, 4, 4, PixelFormat::Rgba8Unorm);
        assert_eq!((w, h), (2, 2));
        for px in out.chunks_exact(4) {
            assert_eq!(px, &[10, 20, 30, 255]);
        }
    }

    #[test]
    fn filter_blends_neighbours() {
        // left half black, right half white, 4x1
        let mut src = Vec::new();
        for x in 0..4 {
            let v = if x < 2 { 0 } else { 255 };
            src.extend_from_slice(&[v, v, v, 255]);
        }
        let (out, w, h) = downsample_tent(&src, 4, 1, PixelFormat::Rgba8Unorm);
        assert_eq!((w, h), (2, 1));
        // first texel taps x = -1,0,1,2 -> only x=2 (weight 0.090845) is white
        assert_eq!(out[0], (255.0f32 * 0.090845).round() as u8);
        assert_eq!(out[4], (255.0f32 * (1.0 - 0.090845)).round() as u8);
    }

    #[test]
    fn textures_share_one_generator() {
        use crate::bindings::visible_to::{MipLevels, TextureConfig};
        use crate::images::command_list::Command;
        use crate::images::device::HeapCapacities;
        use crate::imp::headless::HeadlessBackend;

        let backend = HeadlessBackend::new(64, 64);
        let mut device = BoundDevice::bind(Box::new(backend), HeapCapacities::default(), None).unwrap();
        let mut generators = MipGenerators::default();
        let config = |label: &str, w| TextureConfig::new(label, w, 8, PixelFormat::Rgba8Unorm).with_mips(MipLevels::Full);
        let mut a = Texture::create(&mut device, &config("a", 16)).unwrap();
        let mut b = Texture::create(&mut device, &config("b", 8)).unwrap();
        a.invalidate_mips();
        b.invalidate_mips();

        let mut cmd = CommandList::new("mips");
        cmd.reset();
        refresh(&mut device, &mut cmd, &mut generators, &mut a).unwrap();
        refresh(&mut device, &mut cmd, &mut generators, &mut b).unwrap();
        assert!(!a.needs_mips() && !b.needs_mips());

        let dispatches: Vec<(u32, u32)> = cmd
            .commands()
            .iter()
            .filter_map(|c| match c {
                Command::Dispatch { x, y, .. } => Some((*x, *y)),
                _ => None,
            })
            .collect();
        // a: 8x4, 4x2, 2x1, 1x1; b: 4x4, 2x2, 1x1
        assert_eq!(dispatches.len(), 4 + 3);
        assert!(dispatches.iter().all(|&d| d == (1, 1)));
        let uav_barriers = cmd
            .commands()
            .iter()
            .filter(|c| matches!(c, Command::UavBarrier { .. }))
            .count();
        assert_eq!(uav_barriers, dispatches.len());
        // every level binds the same constants
        assert!(cmd.commands().iter().all(|c| !matches!(
            c,
            Command::Bind {
                resource: crate::images::command_list::Binding::ConstantBuffer { offset, .. },
                ..
            } if *offset != 0
        )));

        a.release(&mut device);
        b.release(&mut device);
        generators.release(&mut device);
    }

    #[test]
    fn levels_run_in_order_with_barriers() {
        use crate::bindings::resource_tracking::{ResourceState, Subresource};
        use crate::bindings::visible_to::{MipLevels, TextureConfig};
        use crate::images::command_list::Command;
        use crate::images::device::HeapCapacities;
        use crate::imp::headless::HeadlessBackend;

        #[derive(Debug, PartialEq)]
        enum Step {
            ToWrite(u32),
            Dispatch,
            WriteBarrier,
            ToRead(u32),
        }

        let backend = HeadlessBackend::new(64, 64);
        let mut device = BoundDevice::bind(Box::new(backend), HeapCapacities::default(), None).unwrap();
        let mut generators = MipGenerators::default();
        let config = TextureConfig::new("lut", 16, 16, PixelFormat::Rgba8Unorm).with_mips(MipLevels::Full);
        let mut texture = Texture::create(&mut device, &config).unwrap();
        let resource = texture.resource().unwrap();
        texture.invalidate_mips();

        let mut cmd = CommandList::new("mips");
        cmd.reset();
        refresh(&mut device, &mut cmd, &mut generators, &mut texture).unwrap();
        let steps: Vec<Step> = cmd
            .commands()
            .iter()
            .filter_map(|c| match *c {
                Command::Barrier {
                    resource: r,
                    subresource: Subresource::Mip(level),
                    before: ResourceState::ShaderRead,
                    after: ResourceState::UnorderedAccess,
                } if r == resource => Some(Step::ToWrite(level)),
                Command::Barrier {
                    resource: r,
                    subresource: Subresource::Mip(level),
                    before: ResourceState::UnorderedAccess,
                    after: ResourceState::ShaderRead,
                } if r == resource => Some(Step::ToRead(level)),
                Command::Dispatch { .. } => Some(Step::Dispatch),
                Command::UavBarrier { resource: r } if r == resource => Some(Step::WriteBarrier),
                _ => None,
            })
            .collect();
        let expected: Vec<Step> = (1..texture.mip_levels())
            .flat_map(|level| [Step::ToWrite(level), Step::Dispatch, Step::WriteBarrier, Step::ToRead(level)])
            .collect();
        assert_eq!(texture.mip_levels(), 5);
        assert_eq!(steps, expected);
        assert_eq!(texture.state().uniform(), Some(ResourceState::ShaderRead));

        texture.release(&mut device);
        generators.release(&mut device);
    }

    #[test]
    fn mip_sizes_clamp_to_one() {
        assert_eq!(mip_size(256, 64, 7), (2, 1));
        assert_eq!(mip_size(1, 1, 3), (1, 1));
    }
}
