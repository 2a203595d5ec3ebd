// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
The wgpu backend.

[`WgpuBackend`] owns one adapter, device and queue.  It renders into two offscreen back
buffers; [`Swapchain::present`] copies the current one into the window surface (when there is
one) and rotates.  Descriptor slots become `wgpu::TextureView`s and `wgpu::Sampler`s, and
command lists are replayed onto a fresh encoder per submission.

Construction is async because adapter and device requests are.  Everything after that is
synchronous; fences are driven by `Device::poll`.
*/

mod compiler;
mod error;
mod pipeline;
mod pixel_format;
mod replay;

pub use compiler::WgslCompiler;

use crate::Error;
use crate::bindings::descriptor_heap::DescriptorHandle;
use crate::bindings::sampler::{FilterMode, SamplerDescriptor, WrapMode};
use crate::bindings::visible_to::{BufferUsage, FormatSupport};
use crate::images::command_list::CommandList;
use crate::imp::{
    BufferDescriptor, BufferId, Device, PipelineDescriptor, PipelineId, Queue, ResourceId, Swapchain,
    TextureDescriptor, ViewDescriptor,
};
use crate::pixel_formats::PixelFormat;
use error::scoped;
use pipeline::Pipeline;
use pixel_format::{pixel_format, texture_usages, wgpu_format};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use replay::{Resources, SlotView};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use wgpu::{PollType, PresentMode, TextureUsages};

const BACK_BUFFERS: usize = 2;

#[derive(Debug)]
struct WindowSurface {
    surface: wgpu::Surface<'static>,
    config: wgpu::SurfaceConfiguration,
    capabilities: wgpu::SurfaceCapabilities,
}

impl WindowSurface {
    fn configure(&self, device: &wgpu::Device) {
        self.surface.configure(device, &self.config);
    }

    fn acquire(&self, device: &wgpu::Device) -> Result<Option<wgpu::SurfaceTexture>, Error> {
        match self.surface.get_current_texture() {
            Ok(frame) => Ok(Some(frame)),
            Err(wgpu::SurfaceError::Outdated | wgpu::SurfaceError::Lost) => {
                logwise::info_sync!("Surface outdated, reconfiguring");
                self.configure(device);
                self.surface
                    .get_current_texture()
                    .map(Some)
                    .map_err(|e| Error::Swapchain(e.to_string()))
            }
            Err(wgpu::SurfaceError::Timeout) => {
                logwise::warn_sync!("Surface acquire timed out; dropping this present");
                Ok(None)
            }
            Err(e) => Err(Error::Swapchain(e.to_string())),
        }
    }
}

/// A [`crate::Backend`] on wgpu.
#[derive(Debug)]
pub struct WgpuBackend {
    adapter: wgpu::Adapter,
    device: wgpu::Device,
    queue: wgpu::Queue,
    surface: Option<WindowSurface>,
    next_id: u64,
    textures: HashMap<ResourceId, wgpu::Texture>,
    buffers: HashMap<BufferId, wgpu::Buffer>,
    pipelines: HashMap<PipelineId, Pipeline>,
    slots: HashMap<DescriptorHandle, SlotView>,
    back_buffers: Vec<ResourceId>,
    back_buffer_index: usize,
    swapchain_size: (u32, u32),
    swapchain_format: PixelFormat,
    signaled: u64,
    completed: Arc<AtomicU64>,
}

async fn request_device(adapter: &wgpu::Adapter) -> Result<(wgpu::Device, wgpu::Queue), Error> {
    let limits = wgpu::Limits::downlevel_defaults().using_resolution(adapter.limits());
    let descriptor = wgpu::DeviceDescriptor {
        label: Some("framechain device"),
        //clamp-to-border samplers fall back to clamp-to-edge without it
        required_features: adapter.features() & wgpu::Features::ADDRESS_MODE_CLAMP_TO_BORDER,
        required_limits: limits,
        memory_hints: Default::default(),
        trace: wgpu::Trace::Off,
    };
    let (device, queue) = adapter
        .request_device(&descriptor)
        .await
        .map_err(|e| Error::Device(e.to_string()))?;
    device.on_uncaptured_error(Box::new(|e| {
        logwise::error_sync!("Uncaptured wgpu error: {e}", e = e.to_string());
    }));
    Ok((device, queue))
}

impl WgpuBackend {
    /// A backend with no window; presents only rotate the back buffers.
    pub async fn offscreen(width: u32, height: u32) -> Result<Self, Error> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::from_env_or_default());
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: Default::default(),
                force_fallback_adapter: false,
                compatible_surface: None,
            })
            .await
            .map_err(|e| Error::Device(e.to_string()))?;
        Self::build(adapter, None, width, height).await
    }

    /// A backend presenting to `window`.
    pub async fn for_window<W>(window: W, width: u32, height: u32) -> Result<Self, Error>
    where
        W: HasWindowHandle + HasDisplayHandle + Send + Sync + 'static,
    {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::from_env_or_default());
        let surface = instance
            .create_surface(window)
            .map_err(|e| Error::Swapchain(e.to_string()))?;
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: Default::default(),
                force_fallback_adapter: false,
                compatible_surface: Some(&surface),
            })
            .await
            .map_err(|e| Error::Device(e.to_string()))?;
        Self::build(adapter, Some(surface), width, height).await
    }

    async fn build(
        adapter: wgpu::Adapter,
        surface: Option<wgpu::Surface<'static>>,
        width: u32,
        height: u32,
    ) -> Result<Self, Error> {
        let (device, queue) = request_device(&adapter).await?;
        let info = adapter.get_info();
        logwise::info_sync!(
            "Using adapter {name} ({backend})",
            name = info.name.clone(),
            backend = info.backend.to_str().to_string()
        );
        let (surface, format) = match surface {
            None => (None, PixelFormat::Bgra8Unorm),
            Some(surface) => {
                let capabilities = surface.get_capabilities(&adapter);
                if !capabilities.usages.contains(TextureUsages::COPY_DST) {
                    return Err(Error::Swapchain("surface textures can't be copied into".to_string()));
                }
                //render linear; passes that want sRGB encode it themselves
                let (surface_format, format) = capabilities
                    .formats
                    .iter()
                    .filter_map(|w| pixel_format(*w).map(|p| (*w, p)))
                    .find(|(_, p)| matches!(p, PixelFormat::Bgra8Unorm | PixelFormat::Rgba8Unorm))
                    .ok_or_else(|| Error::Swapchain(format!("no usable format in {:?}", capabilities.formats)))?;
                let config = wgpu::SurfaceConfiguration {
                    usage: TextureUsages::RENDER_ATTACHMENT | TextureUsages::COPY_DST,
                    format: surface_format,
                    width: width.max(1),
                    height: height.max(1),
                    present_mode: PresentMode::Fifo,
                    desired_maximum_frame_latency: 2,
                    alpha_mode: wgpu::CompositeAlphaMode::Opaque,
                    view_formats: Vec::new(),
                };
                let surface = WindowSurface {
                    surface,
                    config,
                    capabilities,
                };
                surface.configure(&device);
                (Some(surface), format)
            }
        };
        let mut backend = WgpuBackend {
            adapter,
            device,
            queue,
            surface,
            next_id: 1,
            textures: HashMap::new(),
            buffers: HashMap::new(),
            pipelines: HashMap::new(),
            slots: HashMap::new(),
            back_buffers: Vec::new(),
            back_buffer_index: 0,
            swapchain_size: (width, height),
            swapchain_format: format,
            signaled: 0,
            completed: Arc::new(AtomicU64::new(0)),
        };
        backend.create_back_buffers()?;
        Ok(backend)
    }

    pub fn adapter_info(&self) -> wgpu::AdapterInfo {
        self.adapter.get_info()
    }

    fn next(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn create_back_buffers(&mut self) -> Result<(), Error> {
        let (width, height) = self.swapchain_size;
        let format = wgpu_format(self.swapchain_format).ok_or(Error::FormatUnsupported {
            requested: self.swapchain_format,
            required: FormatSupport::RENDER_TARGET,
        })?;
        for i in 0..BACK_BUFFERS {
            let label = format!("back buffer {i}");
            let texture = scoped(&self.device, &label, Error::Swapchain, |device| {
                device.create_texture(&wgpu::TextureDescriptor {
                    label: Some(&label),
                    size: wgpu::Extent3d {
                        width: width.max(1),
                        height: height.max(1),
                        depth_or_array_layers: 1,
                    },
                    mip_level_count: 1,
                    sample_count: 1,
                    dimension: wgpu::TextureDimension::D2,
                    format,
                    usage: TextureUsages::RENDER_ATTACHMENT | TextureUsages::TEXTURE_BINDING | TextureUsages::COPY_SRC,
                    view_formats: &[],
                })
            })?;
            let id = ResourceId(self.next());
            self.textures.insert(id, texture);
            self.back_buffers.push(id);
        }
        self.back_buffer_index = 0;
        Ok(())
    }

    fn present_mode(&self, sync_interval: u32, allow_tearing: bool) -> PresentMode {
        let Some(surface) = &self.surface else {
            return PresentMode::Fifo;
        };
        let available = |mode| surface.capabilities.present_modes.contains(&mode);
        if sync_interval >= 1 {
            PresentMode::Fifo
        } else if allow_tearing && available(PresentMode::Immediate) {
            PresentMode::Immediate
        } else if available(PresentMode::Mailbox) {
            PresentMode::Mailbox
        } else {
            PresentMode::Fifo
        }
    }

    fn create_view(&self, slot: DescriptorHandle, view: &ViewDescriptor) -> Result<SlotView, Error> {
        let texture_view = |texture: &ResourceId, format: PixelFormat, base_mip: u32, mip_count: u32| -> Result<SlotView, Error> {
            let texture = self
                .textures
                .get(texture)
                .ok_or_else(|| Error::UnknownResource(texture.to_string()))?;
            let format = wgpu_format(format).ok_or(Error::FormatUnsupported {
                requested: format,
                required: FormatSupport::SHADER_SAMPLE,
            })?;
            Ok(SlotView::Texture(texture.create_view(&wgpu::TextureViewDescriptor {
                label: Some(&format!("{slot:?}")),
                format: Some(format),
                dimension: Some(wgpu::TextureViewDimension::D2),
                usage: None,
                aspect: wgpu::TextureAspect::All,
                base_mip_level: base_mip,
                mip_level_count: Some(mip_count),
                base_array_layer: 0,
                array_layer_count: None,
            })))
        };
        match view {
            ViewDescriptor::ShaderResource {
                texture,
                format,
                base_mip,
                mip_count,
            } => texture_view(texture, *format, *base_mip, *mip_count),
            ViewDescriptor::UnorderedAccess { texture, format, mip } => texture_view(texture, *format, *mip, 1),
            ViewDescriptor::RenderTarget { texture, format } => texture_view(texture, *format, 0, 1),
            ViewDescriptor::Sampler(descriptor) => Ok(SlotView::Sampler(self.create_sampler(*descriptor))),
        }
    }

    fn create_sampler(&self, descriptor: SamplerDescriptor) -> wgpu::Sampler {
        let filter = match descriptor.filter {
            FilterMode::Nearest => wgpu::FilterMode::Nearest,
            FilterMode::Linear => wgpu::FilterMode::Linear,
        };
        let address = match descriptor.wrap {
            WrapMode::ClampToBorder
                if self
                    .device
                    .features()
                    .contains(wgpu::Features::ADDRESS_MODE_CLAMP_TO_BORDER) =>
            {
                wgpu::AddressMode::ClampToBorder
            }
            WrapMode::ClampToBorder | WrapMode::ClampToEdge => wgpu::AddressMode::ClampToEdge,
            WrapMode::Repeat => wgpu::AddressMode::Repeat,
            WrapMode::MirroredRepeat => wgpu::AddressMode::MirrorRepeat,
        };
        self.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("framechain sampler"),
            address_mode_u: address,
            address_mode_v: address,
            address_mode_w: address,
            mag_filter: filter,
            min_filter: filter,
            mipmap_filter: filter,
            lod_min_clamp: 0.0,
            lod_max_clamp: if descriptor.mipmapped { 32.0 } else { 0.0 },
            compare: None,
            anisotropy_clamp: 1,
            border_color: (address == wgpu::AddressMode::ClampToBorder)
                .then_some(wgpu::SamplerBorderColor::TransparentBlack),
        })
    }
}

impl Device for WgpuBackend {
    fn name(&self) -> String {
        self.adapter.get_info().name
    }

    fn format_support(&self, format: PixelFormat) -> FormatSupport {
        pixel_format::format_support(&self.adapter, format)
    }

    fn create_texture(&mut self, descriptor: &TextureDescriptor) -> Result<ResourceId, Error> {
        if descriptor.width == 0 || descriptor.height == 0 {
            return Err(Error::OutOfMemory(format!("{} has zero size", descriptor.label)));
        }
        let format = wgpu_format(descriptor.format).ok_or(Error::FormatUnsupported {
            requested: descriptor.format,
            required: FormatSupport::SHADER_SAMPLE,
        })?;
        let texture = scoped(&self.device, &descriptor.label, Error::Device, |device| {
            device.create_texture(&wgpu::TextureDescriptor {
                label: Some(&descriptor.label),
                size: wgpu::Extent3d {
                    width: descriptor.width,
                    height: descriptor.height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: descriptor.mip_levels.max(1),
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format,
                usage: texture_usages(descriptor.usage),
                view_formats: &[],
            })
        })?;
        let id = ResourceId(self.next());
        self.textures.insert(id, texture);
        Ok(id)
    }

    fn destroy_texture(&mut self, texture: ResourceId) {
        if let Some(t) = self.textures.remove(&texture) {
            t.destroy();
        }
    }

    fn create_buffer(&mut self, descriptor: &BufferDescriptor) -> Result<BufferId, Error> {
        let usage = match descriptor.usage {
            BufferUsage::Constant => wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            BufferUsage::Vertex => wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
            BufferUsage::Staging => wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST,
        };
        let size = (descriptor.size as u64).next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT);
        let buffer = scoped(&self.device, &descriptor.label, Error::Device, |device| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(&descriptor.label),
                size,
                usage,
                mapped_at_creation: false,
            })
        })?;
        let id = BufferId(self.next());
        self.buffers.insert(id, buffer);
        Ok(id)
    }

    fn destroy_buffer(&mut self, buffer: BufferId) {
        if let Some(b) = self.buffers.remove(&buffer) {
            b.destroy();
        }
    }

    fn write_buffer(&mut self, buffer: BufferId, offset: usize, data: &[u8]) -> Result<(), Error> {
        let target = self
            .buffers
            .get(&buffer)
            .ok_or_else(|| Error::UnknownResource(buffer.to_string()))?;
        let align = wgpu::COPY_BUFFER_ALIGNMENT as usize;
        if offset % align != 0 {
            return Err(Error::Device(format!("unaligned write at {offset} into {buffer}")));
        }
        let end = (offset + data.len()).next_multiple_of(align) as u64;
        if end > target.size() {
            return Err(Error::Device(format!(
                "write of {} bytes at {offset} overflows {buffer} ({} bytes)",
                data.len(),
                target.size()
            )));
        }
        if data.len() % align == 0 {
            self.queue.write_buffer(target, offset as u64, data);
        } else {
            let mut padded = data.to_vec();
            padded.resize(data.len().next_multiple_of(align), 0);
            self.queue.write_buffer(target, offset as u64, &padded);
        }
        Ok(())
    }

    fn create_pipeline(&mut self, descriptor: &PipelineDescriptor) -> Result<PipelineId, Error> {
        let pipeline = pipeline::create(&self.device, descriptor)?;
        let id = PipelineId(self.next());
        self.pipelines.insert(id, pipeline);
        Ok(id)
    }

    fn destroy_pipeline(&mut self, pipeline: PipelineId) {
        self.pipelines.remove(&pipeline);
    }

    fn write_descriptor(&mut self, slot: DescriptorHandle, view: &ViewDescriptor) -> Result<(), Error> {
        let view = self.create_view(slot, view)?;
        self.slots.insert(slot, view);
        Ok(())
    }

    fn clear_descriptor(&mut self, slot: DescriptorHandle) {
        self.slots.remove(&slot);
    }
}

impl Queue for WgpuBackend {
    fn execute(&mut self, list: &CommandList) -> Result<(), Error> {
        if list.is_recording() {
            return Err(Error::Device(format!("{} submitted while open", list.label())));
        }
        let resources = Resources {
            textures: &self.textures,
            buffers: &self.buffers,
            pipelines: &self.pipelines,
            slots: &self.slots,
        };
        let queue = &self.queue;
        scoped(&self.device, list.label(), Error::Device, |device| {
            let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some(list.label()),
            });
            replay::replay(device, &mut encoder, list, &resources)?;
            queue.submit(std::iter::once(encoder.finish()));
            Ok::<_, Error>(())
        })?
    }

    fn signal(&mut self, value: u64) -> Result<(), Error> {
        let completed = self.completed.clone();
        self.queue.on_submitted_work_done(move || {
            completed.fetch_max(value, Ordering::AcqRel);
        });
        self.signaled = self.signaled.max(value);
        Ok(())
    }

    fn completed_value(&self) -> u64 {
        //a failed poll leaves the value where it was
        let _ = self.device.poll(PollType::Poll);
        self.completed.load(Ordering::Acquire)
    }

    /// wgpu has no bounded poll, so `timeout` is only checked after the wait returns.
    fn wait(&mut self, value: u64, timeout: Option<Duration>) -> Result<(), Error> {
        if self.completed.load(Ordering::Acquire) >= value {
            return Ok(());
        }
        if value > self.signaled {
            return Err(Error::FenceTimeout(value));
        }
        let start = std::time::Instant::now();
        self.device
            .poll(PollType::Wait)
            .map_err(|_| Error::FenceTimeout(value))?;
        if self.completed.load(Ordering::Acquire) >= value {
            if let Some(timeout) = timeout
                && start.elapsed() > timeout
            {
                let elapsed = start.elapsed().as_millis() as u64;
                logwise::warn_sync!(
                    "Fence {value} took {elapsed}ms",
                    value = value,
                    elapsed = elapsed
                );
            }
            Ok(())
        } else {
            Err(Error::FenceTimeout(value))
        }
    }
}

impl Swapchain for WgpuBackend {
    fn back_buffer_count(&self) -> usize {
        self.back_buffers.len()
    }

    fn back_buffer(&self, index: usize) -> ResourceId {
        self.back_buffers[index % self.back_buffers.len()]
    }

    fn current_back_buffer_index(&self) -> usize {
        self.back_buffer_index
    }

    fn swapchain_format(&self) -> PixelFormat {
        self.swapchain_format
    }

    fn swapchain_size(&self) -> (u32, u32) {
        self.swapchain_size
    }

    fn resize_buffers(&mut self, width: u32, height: u32, format: PixelFormat) -> Result<(), Error> {
        let surface_format = wgpu_format(format).ok_or(Error::FormatUnsupported {
            requested: format,
            required: FormatSupport::RENDER_TARGET,
        })?;
        if let Some(surface) = &mut self.surface {
            if !surface.capabilities.formats.contains(&surface_format) {
                return Err(Error::Swapchain(format!("surface can't present {format:?}")));
            }
            surface.config.format = surface_format;
            surface.config.width = width.max(1);
            surface.config.height = height.max(1);
            surface.configure(&self.device);
        }
        for id in std::mem::take(&mut self.back_buffers) {
            self.destroy_texture(id);
        }
        self.swapchain_size = (width, height);
        self.swapchain_format = format;
        logwise::info_sync!(
            "Swapchain resized to {width}x{height} {format}",
            width = width,
            height = height,
            format = logwise::privacy::LogIt(&format)
        );
        self.create_back_buffers()
    }

    fn present(&mut self, sync_interval: u32, allow_tearing: bool) -> Result<(), Error> {
        let mode = self.present_mode(sync_interval, allow_tearing);
        let back_buffer = self.back_buffers[self.back_buffer_index];
        if let Some(surface) = &mut self.surface {
            if surface.config.present_mode != mode {
                surface.config.present_mode = mode;
                surface.configure(&self.device);
            }
            if let Some(frame) = surface.acquire(&self.device)? {
                let source = self
                    .textures
                    .get(&back_buffer)
                    .ok_or_else(|| Error::UnknownResource(back_buffer.to_string()))?;
                let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("present"),
                });
                let size = source.size();
                let target = frame.texture.size();
                encoder.copy_texture_to_texture(
                    source.as_image_copy(),
                    frame.texture.as_image_copy(),
                    wgpu::Extent3d {
                        width: size.width.min(target.width),
                        height: size.height.min(target.height),
                        depth_or_array_layers: 1,
                    },
                );
                self.queue.submit(std::iter::once(encoder.finish()));
                frame.present();
            }
        }
        self.back_buffer_index = (self.back_buffer_index + 1) % self.back_buffers.len();
        Ok(())
    }
}

impl Drop for WgpuBackend {
    fn drop(&mut self) {
        let _ = self.device.poll(PollType::Wait);
    }
}
