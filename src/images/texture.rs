// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
GPU-resident 2D textures and their descriptors.

A [`Texture`] owns one GPU resource plus everything that hangs off it:

| Piece             | When                                     | Heap            |
|-------------------|------------------------------------------|-----------------|
| chain SRV         | always                                   | shader resource |
| level SRVs, UAVs  | GPU mip generation (levels 1..N)         | shader resource |
| RTV               | render targets                           | render target   |
| staging buffer    | everything that is not a render target   | n/a             |

The format actually used may differ from the one requested; see [`choose_format`].

Textures never release themselves on drop because releasing needs the device.  Owners call
[`Texture::release`], which is idempotent and safe on [`Texture::default`].
*/

use crate::Error;
use crate::bindings::descriptor_heap::DescriptorHandle;
use crate::bindings::resource_tracking::{ResourceState, StateTracker, Subresource};
use crate::bindings::visible_to::{BufferUsage, FormatSupport, MipLevels, TextureConfig, TextureUsage};
use crate::images::command_list::{Binding, Command, CommandList};
use crate::images::device::BoundDevice;
use crate::images::mipmap::{
    self, MipConstants, MipGenerator, WORKGROUP_SIZE,
};
use crate::imp::{BufferDescriptor, BufferId, Device, Footprint, ResourceId, TextureDescriptor, ViewDescriptor};
use crate::pixel_formats::{PixelFormat, convert_pixels};

/**
Picks the first format in `requested`'s fallback list that has every bit of `required`.

Substitution is silent policy, not an error; only an empty result is an error.
*/
pub fn choose_format(
    device: &dyn Device,
    requested: PixelFormat,
    required: FormatSupport,
) -> Result<(PixelFormat, FormatSupport), Error> {
    for candidate in requested.fallbacks() {
        let support = device.format_support(*candidate);
        if support.contains(required) {
            if *candidate != requested {
                logwise::info_sync!(
                    "Substituting {chosen} for {requested}",
                    chosen = logwise::privacy::LogIt(candidate),
                    requested = logwise::privacy::LogIt(&requested)
                );
            }
            return Ok((*candidate, support));
        }
    }
    Err(Error::FormatUnsupported {
        requested,
        required,
    })
}

#[derive(Debug)]
struct Staging {
    buffer: BufferId,
    /// One per level uploaded from the CPU.
    footprints: Vec<Footprint>,
    /// CPU mirror of the staging buffer.
    data: Vec<u8>,
}

#[derive(Debug)]
pub struct Texture {
    label: String,
    resource: Option<ResourceId>,
    width: u32,
    height: u32,
    requested_format: PixelFormat,
    format: PixelFormat,
    usage: TextureUsage,
    mip_mode: MipLevels,
    mip_levels: u32,
    gpu_mips: bool,
    states: StateTracker,
    srv: Option<DescriptorHandle>,
    level_srvs: Vec<DescriptorHandle>,
    uavs: Vec<DescriptorHandle>,
    rtv: Option<DescriptorHandle>,
    staging: Option<Staging>,
    dirty: bool,
    mips_dirty: bool,
}

impl Default for Texture {
    /// A never-created texture.  Releasing it does nothing.
    fn default() -> Self {
        Texture {
            label: String::new(),
            resource: None,
            width: 0,
            height: 0,
            requested_format: PixelFormat::Rgba8Unorm,
            format: PixelFormat::Rgba8Unorm,
            usage: TextureUsage::empty(),
            mip_mode: MipLevels::One,
            mip_levels: 1,
            gpu_mips: false,
            states: StateTracker::new(1, ResourceState::Undefined),
            srv: None,
            level_srvs: Vec::new(),
            uavs: Vec::new(),
            rtv: None,
            staging: None,
            dirty: false,
            mips_dirty: false,
        }
    }
}

impl Texture {
    pub fn create(device: &mut BoundDevice, config: &TextureConfig) -> Result<Texture, Error> {
        let (format, support) = choose_format(device.backend(), config.format, config.required_support())?;
        let mut mip_levels = config.mip_count();
        let mut gpu_mips = mip_levels > 1 && support.contains(FormatSupport::UNORDERED_ACCESS);
        if mip_levels > 1 && !gpu_mips && config.is_render_target() {
            // rendered content never passes through the CPU, so it can't be filtered there
            logwise::warn_sync!(
                "{label}: no unordered access for {format}; mips disabled",
                label = config.label.clone(),
                format = logwise::privacy::LogIt(&format)
            );
            mip_levels = 1;
            gpu_mips = false;
        }
        let mut usage = config.usage | TextureUsage::SHADER_RESOURCE;
        if gpu_mips {
            usage |= TextureUsage::UNORDERED_ACCESS;
        }
        if config.is_render_target() {
            usage.remove(TextureUsage::COPY_DEST);
        } else {
            usage |= TextureUsage::COPY_DEST;
        }

        let resource = device.backend_mut().create_texture(&TextureDescriptor {
            label: config.label.clone(),
            width: config.width,
            height: config.height,
            format,
            mip_levels,
            usage,
            initial_state: ResourceState::ShaderRead,
        })?;

        let mut texture = Texture {
            label: config.label.clone(),
            resource: Some(resource),
            width: config.width,
            height: config.height,
            requested_format: config.format,
            format,
            usage,
            mip_mode: config.mip_levels,
            mip_levels,
            gpu_mips,
            states: StateTracker::new(mip_levels, ResourceState::ShaderRead),
            srv: None,
            level_srvs: Vec::new(),
            uavs: Vec::new(),
            rtv: None,
            staging: None,
            dirty: false,
            mips_dirty: false,
        };
        if let Err(e) = texture.allocate_views(device, resource) {
            texture.release(device);
            return Err(e);
        }
        logwise::trace_sync!(
            "Created {label} {width}x{height} with {levels} levels",
            label = texture.label.clone(),
            width = texture.width,
            height = texture.height,
            levels = texture.mip_levels
        );
        Ok(texture)
    }

    fn allocate_views(&mut self, device: &mut BoundDevice, resource: ResourceId) -> Result<(), Error> {
        let backend = device.backend.as_mut();
        let heaps = &mut device.heaps;

        let srv = heaps.shader_resource.allocate()?;
        self.srv = Some(srv);
        backend.write_descriptor(
            srv,
            &ViewDescriptor::ShaderResource {
                texture: resource,
                format: self.format,
                base_mip: 0,
                mip_count: self.mip_levels,
            },
        )?;

        if self.gpu_mips {
            for level in 1..self.mip_levels {
                let source = heaps.shader_resource.allocate()?;
                self.level_srvs.push(source);
                backend.write_descriptor(
                    source,
                    &ViewDescriptor::ShaderResource {
                        texture: resource,
                        format: self.format,
                        base_mip: level - 1,
                        mip_count: 1,
                    },
                )?;
                let uav = heaps.shader_resource.allocate()?;
                self.uavs.push(uav);
                backend.write_descriptor(
                    uav,
                    &ViewDescriptor::UnorderedAccess {
                        texture: resource,
                        format: self.format,
                        mip: level,
                    },
                )?;
            }
        }

        if self.usage.contains(TextureUsage::RENDER_TARGET) {
            let rtv = heaps.render_target.allocate()?;
            self.rtv = Some(rtv);
            backend.write_descriptor(
                rtv,
                &ViewDescriptor::RenderTarget {
                    texture: resource,
                    format: self.format,
                },
            )?;
        } else {
            let levels = if self.gpu_mips { 1 } else { self.mip_levels };
            let mut footprints = Vec::with_capacity(levels as usize);
            let mut offset = 0;
            for level in 0..levels {
                let (w, h) = mipmap::mip_size(self.width, self.height, level);
                let footprint = backend.copy_footprint(w, h, self.format, offset);
                offset = footprint.end();
                footprints.push(footprint);
            }
            let buffer = backend.create_buffer(&BufferDescriptor {
                label: format!("{} staging", self.label),
                size: offset,
                usage: BufferUsage::Staging,
            })?;
            self.staging = Some(Staging {
                buffer,
                footprints,
                data: vec![0; offset],
            });
        }
        Ok(())
    }

    /// Returns every descriptor and the GPU memory.  Calling this again does nothing.
    pub fn release(&mut self, device: &mut BoundDevice) {
        let backend = device.backend.as_mut();
        let heaps = &mut device.heaps;
        let views = self
            .srv
            .take()
            .into_iter()
            .chain(self.level_srvs.drain(..))
            .chain(self.uavs.drain(..))
            .chain(self.rtv.take());
        for handle in views {
            backend.clear_descriptor(handle);
            heaps.release(handle);
        }
        if let Some(staging) = self.staging.take() {
            backend.destroy_buffer(staging.buffer);
        }
        if let Some(resource) = self.resource.take() {
            backend.destroy_texture(resource);
        }
        self.dirty = false;
        self.mips_dirty = false;
    }

    pub fn is_created(&self) -> bool {
        self.resource.is_some()
    }

    pub fn resource(&self) -> Option<ResourceId> {
        self.resource
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// The format actually allocated.
    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn requested_format(&self) -> PixelFormat {
        self.requested_format
    }

    pub fn mip_levels(&self) -> u32 {
        self.mip_levels
    }

    pub fn state(&self) -> &StateTracker {
        &self.states
    }

    /// View of the whole mip chain starting at level 0.
    pub fn shader_view(&self) -> Option<DescriptorHandle> {
        self.srv
    }

    pub fn render_target_view(&self) -> Option<DescriptorHandle> {
        self.rtv
    }

    /// Unordered-access views for levels 1..N.
    pub fn mip_views(&self) -> &[DescriptorHandle] {
        &self.uavs
    }

    /// Every descriptor this texture holds.
    pub fn descriptors(&self) -> Vec<DescriptorHandle> {
        self.srv
            .iter()
            .chain(self.level_srvs.iter())
            .chain(self.uavs.iter())
            .chain(self.rtv.iter())
            .copied()
            .collect()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn needs_mips(&self) -> bool {
        self.mips_dirty
    }

    /// Records a barrier moving the whole texture to `after`.
    pub fn transition(&mut self, cmd: &mut CommandList, after: ResourceState) -> Result<(), Error> {
        let resource = self
            .resource
            .ok_or_else(|| Error::UnknownResource(self.label.clone()))?;
        cmd.transition(resource, &mut self.states, Subresource::All, after)
    }

    /**
    Converts CPU pixels into the staging buffer and marks the texture dirty.

    `width` × `height` is clamped to the texture size.  Formats without GPU mip support get
    their whole chain computed here.
    */
    pub fn update(
        &mut self,
        device: &mut BoundDevice,
        pixels: &[u8],
        width: u32,
        height: u32,
        pitch: usize,
        src_format: PixelFormat,
    ) -> Result<(), Error> {
        let staging = self
            .staging
            .as_mut()
            .ok_or_else(|| Error::UnknownResource(format!("{} has no staging buffer", self.label)))?;
        let width = width.min(self.width);
        let height = height.min(self.height);
        let needed = pitch * height.saturating_sub(1) as usize + src_format.row_bytes(width);
        if pixels.len() < needed {
            return Err(Error::ImageLayout(format!(
                "{} bytes for a {}x{} frame with pitch {}",
                pixels.len(),
                width,
                height,
                pitch
            )));
        }
        let base = staging.footprints[0];
        convert_pixels(
            pixels,
            pitch,
            src_format,
            &mut staging.data[base.offset..],
            base.row_pitch,
            self.format,
            width,
            height,
        );
        if staging.footprints.len() > 1 {
            compute_cpu_mips(staging, self.format);
        }
        device.backend_mut().write_buffer(staging.buffer, 0, &staging.data)?;
        self.dirty = true;
        if self.gpu_mips {
            self.mips_dirty = true;
        }
        Ok(())
    }

    /// Records the staging copy if dirty: ShaderRead → CopyDest → copy → ShaderRead.
    pub fn flush(&mut self, cmd: &mut CommandList) -> Result<(), Error> {
        if !self.dirty {
            return Ok(());
        }
        let (Some(resource), Some(staging)) = (self.resource, self.staging.as_ref()) else {
            return Ok(());
        };
        cmd.transition(resource, &mut self.states, Subresource::All, ResourceState::CopyDest)?;
        for (mip, footprint) in staging.footprints.iter().enumerate() {
            cmd.record(Command::CopyBufferToTexture {
                buffer: staging.buffer,
                footprint: *footprint,
                texture: resource,
                mip: mip as u32,
            })?;
        }
        cmd.transition(resource, &mut self.states, Subresource::All, ResourceState::ShaderRead)?;
        self.dirty = false;
        Ok(())
    }

    /// [`Texture::update`] followed by [`Texture::flush`].
    #[allow(clippy::too_many_arguments)]
    pub fn upload(
        &mut self,
        device: &mut BoundDevice,
        cmd: &mut CommandList,
        pixels: &[u8],
        width: u32,
        height: u32,
        pitch: usize,
        src_format: PixelFormat,
    ) -> Result<(), Error> {
        self.update(device, pixels, width, height, pitch, src_format)?;
        self.flush(cmd)
    }

    /// Marks a rendered texture's lower levels stale.
    pub(crate) fn invalidate_mips(&mut self) {
        if self.gpu_mips {
            self.mips_dirty = true;
        }
    }

    /// Leaves the lower levels stale until the next upload or render.
    pub(crate) fn skip_mips(&mut self) {
        self.mips_dirty = false;
    }

    /**
    Downsamples levels 1..N on the GPU, one dispatch per level in ascending order.

    Each level goes ShaderRead → UnorderedAccess, is written, gets a UAV barrier, and returns to
    ShaderRead before the next level reads it.
    */
    pub fn generate_mips(
        &mut self,
        cmd: &mut CommandList,
        generator: &MipGenerator,
    ) -> Result<(), Error> {
        if !self.gpu_mips || self.mip_levels < 2 {
            self.mips_dirty = false;
            return Ok(());
        }
        let resource = self
            .resource
            .ok_or_else(|| Error::UnknownResource(self.label.clone()))?;
        for level in 1..self.mip_levels {
            let index = (level - 1) as usize;
            let (dw, dh) = mipmap::mip_size(self.width, self.height, level);
            cmd.transition(
                resource,
                &mut self.states,
                Subresource::Mip(level),
                ResourceState::UnorderedAccess,
            )?;
            cmd.record(Command::SetPipeline(generator.pipeline))?;
            cmd.record(Command::Bind {
                binding: 0,
                resource: Binding::Texture(self.level_srvs[index]),
            })?;
            cmd.record(Command::Bind {
                binding: 1,
                resource: Binding::StorageTexture(self.uavs[index]),
            })?;
            cmd.record(Command::Bind {
                binding: 2,
                resource: Binding::ConstantBuffer {
                    buffer: generator.constants,
                    offset: 0,
                    size: std::mem::size_of::<MipConstants>() as u64,
                },
            })?;
            cmd.record(Command::Dispatch {
                x: dw.div_ceil(WORKGROUP_SIZE),
                y: dh.div_ceil(WORKGROUP_SIZE),
                z: 1,
            })?;
            cmd.record(Command::UavBarrier { resource })?;
            cmd.transition(
                resource,
                &mut self.states,
                Subresource::Mip(level),
                ResourceState::ShaderRead,
            )?;
        }
        self.mips_dirty = false;
        Ok(())
    }

    /// True when this texture would be recreated by a request for `config`.
    pub fn needs_recreate(&self, config: &TextureConfig) -> bool {
        !self.is_created()
            || self.width != config.width
            || self.height != config.height
            || self.requested_format != config.format
            || self.mip_mode != config.mip_levels
            || self.usage.contains(TextureUsage::RENDER_TARGET) != config.is_render_target()
    }
}

fn compute_cpu_mips(staging: &mut Staging, format: PixelFormat) {
    let bpp = format.bytes_per_pixel();
    let base = staging.footprints[0];
    let mut level: Vec<u8> = Vec::with_capacity(base.width as usize * base.height as usize * bpp);
    for y in 0..base.height as usize {
        let start = base.offset + y * base.row_pitch;
        level.extend_from_slice(&staging.data[start..start + format.row_bytes(base.width)]);
    }
    let (mut w, mut h) = (base.width, base.height);
    for footprint in staging.footprints.iter().skip(1) {
        let (next, nw, nh) = mipmap::downsample_tent(&level, w, h, format);
        for y in 0..nh as usize {
            let start = footprint.offset + y * footprint.row_pitch;
            let row = format.row_bytes(nw);
            staging.data[start..start + row].copy_from_slice(&next[y * row..(y + 1) * row]);
        }
        level = next;
        w = nw;
        h = nh;
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        if let Some(resource) = self.resource {
            logwise::warn_sync!(
                "{label} dropped without release; {resource} leaked",
                label = self.label.clone(),
                resource = logwise::privacy::LogIt(&resource)
            );
        }
    }
}
