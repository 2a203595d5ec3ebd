// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Batched, instanced sprite drawing.

Every quad drawn on top of the shaded frame (menu, overlays, OSD text, statistics) is a
[`Sprite`]: one instance of a four-vertex strip.  A [`SpriteBatch`] queues sprites, then writes
them into a ring-buffered vertex buffer and records one draw per run of sprites sharing a texture,
sampler and shader variant.

The ring holds a fixed number of sprites.  A submit that would run past the end starts again at
zero, but only as the first submit of a frame: buffer writes land before the frame's draws run,
so wrapping later would overwrite sprites an earlier draw of the same frame still reads.  Sprites
that don't fit in what is left of the ring are dropped.
*/

use crate::Error;
use crate::bindings::descriptor_heap::DescriptorHandle;
use crate::bindings::visible_to::BufferUsage;
use crate::images::command_list::{Binding, Command, CommandList};
use crate::images::device::BoundDevice;
use crate::images::quad::{PipelineCache, TargetView};
use crate::images::stock_shaders;
use crate::images::viewport::Viewport;
use crate::imp::{
    BlendMode, BufferDescriptor, BufferId, PipelineDescriptor, PipelineKind, Topology,
    VertexLayout,
};
use crate::pixel_formats::PixelFormat;
use bytemuck::{Pod, Zeroable};

/// Sprites the ring holds unless configured otherwise.
pub const DEFAULT_SPRITE_CAPACITY: usize = 16 * 1024;

pub const SPRITE_STRIDE: u32 = std::mem::size_of::<Sprite>() as u32;

/// RGBA in `0..=1` packed as four unorm bytes.
pub fn pack_color(rgba: [f32; 4]) -> u32 {
    let b = rgba.map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8);
    u32::from_le_bytes(b)
}

/**
One quad.

Positions and texture coordinates are `[x, y, width, height]`, normalized to the target with
the origin at the top left.  Corner colors run top left, top right, bottom left, bottom right.
*/
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Sprite {
    pub pos: [f32; 4],
    pub coords: [f32; 4],
    pub colors: [u32; 4],
    /// `[scale, rotation in radians]`.
    pub params: [f32; 2],
}

impl Sprite {
    pub fn new(pos: [f32; 4], coords: [f32; 4], color: [f32; 4]) -> Sprite {
        Sprite {
            pos,
            coords,
            colors: [pack_color(color); 4],
            params: [1.0, 0.0],
        }
    }

    /// A sprite showing the whole texture over the whole target.
    pub fn fullscreen(alpha: f32) -> Sprite {
        Sprite::new([0.0, 0.0, 1.0, 1.0], [0.0, 0.0, 1.0, 1.0], [1.0, 1.0, 1.0, alpha])
    }

    pub fn with_corner_colors(mut self, colors: [[f32; 4]; 4]) -> Sprite {
        self.colors = colors.map(pack_color);
        self
    }

    pub fn with_scale(mut self, scale: f32) -> Sprite {
        self.params[0] = scale;
        self
    }

    pub fn with_rotation(mut self, radians: f32) -> Sprite {
        self.params[1] = radians;
        self
    }

    /// Multiplies the alpha of every corner.
    pub fn fade(mut self, alpha: f32) -> Sprite {
        for c in &mut self.colors {
            let mut b = c.to_le_bytes();
            b[3] = (b[3] as f32 * alpha.clamp(0.0, 1.0)).round() as u8;
            *c = u32::from_le_bytes(b);
        }
        self
    }
}

/// Which fragment shader a run of sprites uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpriteKind {
    /// Texture color times vertex color.
    Image,
    /// Texture red channel is glyph coverage, multiplied into alpha.
    Glyph,
}

/// A run of queued sprites sharing a texture, sampler and kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Run {
    texture: DescriptorHandle,
    sampler: DescriptorHandle,
    kind: SpriteKind,
    first: u32,
    count: u32,
}

#[derive(Debug)]
pub struct SpriteBatch {
    capacity: usize,
    buffer: BufferId,
    /// Ring write cursor, in sprites.
    cursor: usize,
    /// Sprites written since [`SpriteBatch::begin_frame`].
    frame_used: usize,
    queued: Vec<Sprite>,
    runs: Vec<Run>,
    images: PipelineCache,
    glyphs: PipelineCache,
}

impl SpriteBatch {
    pub fn new(device: &mut BoundDevice, capacity: usize) -> Result<SpriteBatch, Error> {
        let capacity = capacity.max(1);
        let buffer = device.backend_mut().create_buffer(&BufferDescriptor {
            label: "sprites".to_string(),
            size: capacity * SPRITE_STRIDE as usize,
            usage: BufferUsage::Vertex,
        })?;
        Ok(SpriteBatch {
            capacity,
            buffer,
            cursor: 0,
            frame_used: 0,
            queued: Vec::new(),
            runs: Vec::new(),
            images: PipelineCache::default(),
            glyphs: PipelineCache::default(),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Where the next submit writes, in sprites.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn queued(&self) -> usize {
        self.queued.len()
    }

    /// Draw calls the next submit would record.
    pub fn runs(&self) -> usize {
        self.runs.len()
    }

    pub fn push(&mut self, texture: DescriptorHandle, sampler: DescriptorHandle, kind: SpriteKind, sprite: Sprite) {
        let first = self.queued.len() as u32;
        self.queued.push(sprite);
        match self.runs.last_mut() {
            Some(run) if run.texture == texture && run.sampler == sampler && run.kind == kind => {
                run.count += 1;
            }
            _ => self.runs.push(Run {
                texture,
                sampler,
                kind,
                first,
                count: 1,
            }),
        }
    }

    pub fn push_all(
        &mut self,
        texture: DescriptorHandle,
        sampler: DescriptorHandle,
        kind: SpriteKind,
        sprites: impl IntoIterator<Item = Sprite>,
    ) {
        for sprite in sprites {
            self.push(texture, sampler, kind, sprite);
        }
    }

    /// Starts a new frame.  The previous frame must have finished on the GPU.
    pub fn begin_frame(&mut self) {
        self.frame_used = 0;
    }

    /// Drops everything queued since the last submit.
    pub fn clear(&mut self) {
        self.queued.clear();
        self.runs.clear();
    }

    /**
    Writes the queued sprites into the ring and records their draws into `target`.

    Every texture referenced must already be readable.  Sprites past the room left in the ring
    this frame are dropped with a warning.
    */
    pub fn submit(
        &mut self,
        device: &mut BoundDevice,
        cmd: &mut CommandList,
        target: &TargetView,
        viewport: Viewport,
    ) -> Result<(), Error> {
        if self.queued.is_empty() {
            return Ok(());
        }
        if self.cursor + self.queued.len() > self.capacity && self.frame_used == 0 {
            self.cursor = 0;
        }
        let room = self.capacity - self.cursor;
        if self.queued.len() > room {
            logwise::warn_sync!(
                "Dropping {dropped} sprites past the ring capacity",
                dropped = self.queued.len() - room
            );
            self.queued.truncate(room);
            let room = room as u32;
            self.runs.retain(|r| r.first < room);
            if let Some(last) = self.runs.last_mut() {
                last.count = last.count.min(room - last.first);
            }
            if self.queued.is_empty() {
                self.clear();
                return Ok(());
            }
        }
        device.backend_mut().write_buffer(
            self.buffer,
            self.cursor * SPRITE_STRIDE as usize,
            bytemuck::cast_slice(&self.queued),
        )?;
        target.bind(cmd, viewport)?;
        for run in &self.runs {
            let cache = match run.kind {
                SpriteKind::Image => &mut self.images,
                SpriteKind::Glyph => &mut self.glyphs,
            };
            let pipeline = cache.get(device, target.format, BlendMode::Alpha, |format, blend| {
                describe_sprites(run.kind, format, blend)
            })?;
            cmd.record(Command::SetPipeline(pipeline))?;
            cmd.record(Command::Bind {
                binding: 0,
                resource: Binding::Texture(run.texture),
            })?;
            cmd.record(Command::Bind {
                binding: 1,
                resource: Binding::Sampler(run.sampler),
            })?;
            cmd.record(Command::SetVertexBuffer {
                buffer: self.buffer,
                offset: 0,
                stride: SPRITE_STRIDE,
            })?;
            cmd.record(Command::Draw {
                vertex_count: 4,
                instance_count: run.count,
                first_vertex: 0,
                first_instance: self.cursor as u32 + run.first,
            })?;
        }
        self.cursor += self.queued.len();
        self.frame_used += self.queued.len();
        self.clear();
        Ok(())
    }

    pub fn release(&mut self, device: &mut BoundDevice) {
        self.images.release(device);
        self.glyphs.release(device);
        device.backend_mut().destroy_buffer(self.buffer);
        self.clear();
    }
}

fn describe_sprites(kind: SpriteKind, format: PixelFormat, blend: BlendMode) -> PipelineDescriptor {
    let (vertex, image) = stock_shaders::sprite();
    let (label, fragment) = match kind {
        SpriteKind::Image => ("sprites", image),
        SpriteKind::Glyph => ("glyphs", stock_shaders::font_fragment()),
    };
    PipelineDescriptor {
        label: label.to_string(),
        kind: PipelineKind::Render {
            vertex,
            fragment,
            vertex_layout: VertexLayout::Sprite,
            topology: Topology::TriangleStrip,
            blend,
            target_format: format,
        },
        bindings: stock_shaders::sprite_bindings(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bindings::descriptor_heap::HeapKind;
    use crate::images::device::HeapCapacities;
    use crate::imp::headless::HeadlessBackend;

    fn handle(heap: HeapKind, index: u32) -> DescriptorHandle {
        DescriptorHandle { heap, index }
    }

    #[test]
    fn sprite_layout_matches_the_shader() {
        assert_eq!(SPRITE_STRIDE, 56);
        assert_eq!(pack_color([1.0, 0.0, 0.0, 1.0]), 0xff0000ff);
        let faded = Sprite::fullscreen(1.0).fade(0.5);
        assert_eq!(faded.colors[0].to_le_bytes()[3], 128);
    }

    #[test]
    fn runs_merge_by_texture_sampler_and_kind() {
        let backend = HeadlessBackend::new(64, 64);
        let mut device = BoundDevice::bind(Box::new(backend), HeapCapacities::default(), None).unwrap();
        let mut batch = SpriteBatch::new(&mut device, 8).unwrap();
        let a = handle(HeapKind::ShaderResource, 1);
        let b = handle(HeapKind::ShaderResource, 2);
        let s = handle(HeapKind::Sampler, 0);
        let sprite = Sprite::fullscreen(1.0);
        batch.push(a, s, SpriteKind::Image, sprite);
        batch.push(a, s, SpriteKind::Image, sprite);
        batch.push(a, s, SpriteKind::Glyph, sprite);
        batch.push(b, s, SpriteKind::Glyph, sprite);
        batch.push(b, s, SpriteKind::Glyph, sprite);
        assert_eq!(batch.queued(), 5);
        assert_eq!(batch.runs(), 3);
        batch.release(&mut device);
    }

    #[test]
    fn ring_wraps_when_a_submit_would_overrun() {
        let backend = HeadlessBackend::new(64, 64);
        let mut device = BoundDevice::bind(Box::new(backend), HeapCapacities::default(), None).unwrap();
        let mut batch = SpriteBatch::new(&mut device, 4).unwrap();
        let texture = device.heaps.shader_resource.allocate().unwrap();
        let target_view = device.heaps.render_target.allocate().unwrap();
        let sampler = device.samplers().get(
            crate::bindings::sampler::FilterMode::Linear,
            crate::bindings::sampler::WrapMode::ClampToEdge,
        );
        let target = TargetView {
            view: target_view,
            format: PixelFormat::Rgba8Unorm,
            width: 64,
            height: 64,
        };
        let mut cmd = CommandList::new("sprites");
        cmd.reset();
        for _ in 0..3 {
            batch.push(texture, sampler, SpriteKind::Image, Sprite::fullscreen(1.0));
        }
        batch.submit(&mut device, &mut cmd, &target, Viewport::full(64, 64)).unwrap();
        assert_eq!(batch.cursor(), 3);
        batch.begin_frame();
        for _ in 0..2 {
            batch.push(texture, sampler, SpriteKind::Image, Sprite::fullscreen(1.0));
        }
        batch.submit(&mut device, &mut cmd, &target, Viewport::full(64, 64)).unwrap();
        assert_eq!(batch.cursor(), 2);
        let firsts: Vec<u32> = cmd
            .commands()
            .iter()
            .filter_map(|c| match c {
                Command::Draw { first_instance, .. } => Some(*first_instance),
                _ => None,
            })
            .collect();
        assert_eq!(firsts, vec![0, 0]);
        batch.release(&mut device);
    }

    #[test]
    fn ring_never_wraps_over_sprites_of_the_same_frame() {
        let backend = HeadlessBackend::new(64, 64);
        let mut device = BoundDevice::bind(Box::new(backend), HeapCapacities::default(), None).unwrap();
        let mut batch = SpriteBatch::new(&mut device, 4).unwrap();
        let texture = device.heaps.shader_resource.allocate().unwrap();
        let target_view = device.heaps.render_target.allocate().unwrap();
        let sampler = handle(HeapKind::Sampler, 0);
        let target = TargetView {
            view: target_view,
            format: PixelFormat::Rgba8Unorm,
            width: 64,
            height: 64,
        };
        let mut cmd = CommandList::new("sprites");
        cmd.reset();
        batch.begin_frame();
        for _ in 0..3 {
            batch.push(texture, sampler, SpriteKind::Image, Sprite::fullscreen(1.0));
        }
        batch.submit(&mut device, &mut cmd, &target, Viewport::full(64, 64)).unwrap();
        for _ in 0..2 {
            batch.push(texture, sampler, SpriteKind::Image, Sprite::fullscreen(1.0));
        }
        batch.submit(&mut device, &mut cmd, &target, Viewport::full(64, 64)).unwrap();
        // one slot was left; the second sprite is dropped instead of overwriting slot 0
        assert_eq!(batch.cursor(), 4);
        assert_eq!(batch.queued(), 0);

        batch.push(texture, sampler, SpriteKind::Image, Sprite::fullscreen(1.0));
        batch.submit(&mut device, &mut cmd, &target, Viewport::full(64, 64)).unwrap();
        let draws: Vec<(u32, u32)> = cmd
            .commands()
            .iter()
            .filter_map(|c| match c {
                Command::Draw {
                    first_instance,
                    instance_count,
                    ..
                } => Some((*first_instance, *instance_count)),
                _ => None,
            })
            .collect();
        assert_eq!(draws, vec![(0, 3), (3, 1)]);
        batch.release(&mut device);
    }
}
