// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
A backend that keeps books instead of pixels.

[`HeadlessBackend`] validates everything a real backend would reject (unknown resources,
unwritten descriptors, draws without a render target) and records what it was asked to do.
It never touches a GPU, which makes it the backend for tests and for running the orchestrator
without a window.

Tests keep a [`HeadlessProbe`] (cloned out before the backend is boxed) to inspect counters.
*/

use crate::Error;
use crate::bindings::descriptor_heap::DescriptorHandle;
use crate::bindings::visible_to::FormatSupport;
use crate::images::command_list::{Binding, Command, CommandList};
use crate::imp::{
    BufferDescriptor, BufferId, Device, PipelineDescriptor, PipelineId, Queue, ResourceId,
    Swapchain, TextureDescriptor, ViewDescriptor,
};
use crate::pixel_formats::PixelFormat;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Counters shared between a [`HeadlessBackend`] and its probes.
#[derive(Debug, Default, Clone)]
pub struct HeadlessStats {
    pub presents: u64,
    pub sync_intervals: Vec<u32>,
    pub submissions: u64,
    pub draws: u64,
    pub dispatches: u64,
    pub copies: u64,
    pub clears: u64,
    pub live_textures: usize,
    pub live_buffers: usize,
    pub live_pipelines: usize,
    pub live_descriptors: usize,
    pub swapchain_resizes: u64,
    /// Commands of the most recent submission.
    pub last_submission: Vec<Command>,
    /// Size of every texture created, in creation order.
    pub created_textures: Vec<(String, u32, u32, PixelFormat)>,
}

/// A cloneable view of a [`HeadlessBackend`]'s counters.
#[derive(Debug, Clone)]
pub struct HeadlessProbe(Arc<Mutex<HeadlessStats>>);

impl HeadlessProbe {
    pub fn stats(&self) -> HeadlessStats {
        self.lock().clone()
    }

    pub fn presents(&self) -> u64 {
        self.lock().presents
    }

    /// Forgets the recorded history but keeps live-resource counts.
    pub fn reset_counters(&self) {
        let mut s = self.lock();
        s.presents = 0;
        s.sync_intervals.clear();
        s.submissions = 0;
        s.draws = 0;
        s.dispatches = 0;
        s.copies = 0;
        s.clears = 0;
        s.last_submission.clear();
        s.created_textures.clear();
    }

    fn lock(&self) -> MutexGuard<'_, HeadlessStats> {
        self.0.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[derive(Debug)]
struct TextureRecord {
    descriptor: TextureDescriptor,
}

/// Failure injection for tests.
#[derive(Debug, Default, Clone)]
struct Faults {
    /// Texture creations fail with out-of-memory once this many more have succeeded.
    textures_until_oom: Option<usize>,
    /// Labels containing this string fail to create.
    fail_label: Option<String>,
    /// Pipelines whose label contains this string fail to create.
    fail_pipeline: Option<String>,
}

#[derive(Debug)]
pub struct HeadlessBackend {
    next_id: u64,
    formats: HashMap<PixelFormat, FormatSupport>,
    textures: HashMap<ResourceId, TextureRecord>,
    buffers: HashMap<BufferId, BufferDescriptor>,
    pipelines: HashMap<PipelineId, PipelineDescriptor>,
    descriptors: HashMap<DescriptorHandle, ViewDescriptor>,
    back_buffers: Vec<ResourceId>,
    back_buffer_index: usize,
    swapchain_size: (u32, u32),
    swapchain_format: PixelFormat,
    signaled: u64,
    completed: u64,
    faults: Faults,
    stats: Arc<Mutex<HeadlessStats>>,
}

/// Capabilities of a typical desktop GPU.
fn default_formats() -> HashMap<PixelFormat, FormatSupport> {
    use PixelFormat::*;
    let full = FormatSupport::SHADER_SAMPLE
        | FormatSupport::RENDER_TARGET
        | FormatSupport::UNORDERED_ACCESS
        | FormatSupport::BLENDABLE;
    let no_uav = FormatSupport::SHADER_SAMPLE | FormatSupport::RENDER_TARGET | FormatSupport::BLENDABLE;
    HashMap::from([
        (Rgba8Unorm, full),
        (Rgba8UnormSrgb, no_uav),
        (Bgra8Unorm, no_uav),
        (Bgra8UnormSrgb, no_uav),
        (Bgrx8Unorm, FormatSupport::SHADER_SAMPLE),
        (B5G6R5Unorm, FormatSupport::SHADER_SAMPLE),
        (B5G5R5A1Unorm, FormatSupport::SHADER_SAMPLE),
        (B4G4R4A4Unorm, FormatSupport::SHADER_SAMPLE),
        (Rgb10A2Unorm, no_uav),
        (Rgba16Float, full),
        (R8Unorm, no_uav),
        (A8Unorm, FormatSupport::SHADER_SAMPLE),
    ])
}

impl HeadlessBackend {
    pub fn new(width: u32, height: u32) -> Self {
        let mut backend = HeadlessBackend {
            next_id: 1,
            formats: default_formats(),
            textures: HashMap::new(),
            buffers: HashMap::new(),
            pipelines: HashMap::new(),
            descriptors: HashMap::new(),
            back_buffers: Vec::new(),
            back_buffer_index: 0,
            swapchain_size: (width, height),
            swapchain_format: PixelFormat::Bgra8Unorm,
            signaled: 0,
            completed: 0,
            faults: Faults::default(),
            stats: Arc::new(Mutex::new(HeadlessStats::default())),
        };
        backend.create_back_buffers(2);
        backend
    }

    pub fn probe(&self) -> HeadlessProbe {
        HeadlessProbe(self.stats.clone())
    }

    /// Overrides what the device claims to support for `format`.
    pub fn with_format_support(mut self, format: PixelFormat, support: FormatSupport) -> Self {
        self.formats.insert(format, support);
        self
    }

    /// After `n` more successful texture creations, every creation runs out of memory.
    pub fn with_texture_budget(mut self, n: usize) -> Self {
        self.faults.textures_until_oom = Some(n);
        self
    }

    /// Texture creations whose label contains `label` fail with out-of-memory.
    pub fn failing_textures_labeled(mut self, label: impl Into<String>) -> Self {
        self.faults.fail_label = Some(label.into());
        self
    }

    /// Pipeline creations whose label contains `label` fail.
    pub fn failing_pipelines_labeled(mut self, label: impl Into<String>) -> Self {
        self.faults.fail_pipeline = Some(label.into());
        self
    }

    fn stats(&self) -> MutexGuard<'_, HeadlessStats> {
        self.stats.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn next(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn create_back_buffers(&mut self, count: usize) {
        let (width, height) = self.swapchain_size;
        for i in 0..count {
            let id = ResourceId(self.next());
            self.textures.insert(
                id,
                TextureRecord {
                    descriptor: TextureDescriptor {
                        label: format!("back buffer {i}"),
                        width,
                        height,
                        format: self.swapchain_format,
                        mip_levels: 1,
                        usage: crate::bindings::visible_to::TextureUsage::RENDER_TARGET,
                        initial_state: crate::bindings::resource_tracking::ResourceState::Present,
                    },
                },
            );
            self.back_buffers.push(id);
        }
        self.back_buffer_index = 0;
        self.stats().live_textures = self.textures.len();
    }

    fn check_descriptor(&self, handle: &DescriptorHandle) -> Result<&ViewDescriptor, Error> {
        let view = self
            .descriptors
            .get(handle)
            .ok_or_else(|| Error::UnknownResource(format!("descriptor {handle:?}")))?;
        match view {
            ViewDescriptor::ShaderResource { texture, .. }
            | ViewDescriptor::UnorderedAccess { texture, .. }
            | ViewDescriptor::RenderTarget { texture, .. } => {
                if !self.textures.contains_key(texture) {
                    return Err(Error::UnknownResource(format!(
                        "descriptor {handle:?} points at released {texture}"
                    )));
                }
            }
            ViewDescriptor::Sampler(_) => {}
        }
        Ok(view)
    }

    fn check_texture(&self, texture: &ResourceId) -> Result<(), Error> {
        if self.textures.contains_key(texture) {
            Ok(())
        } else {
            Err(Error::UnknownResource(texture.to_string()))
        }
    }

    fn check_buffer(&self, buffer: &BufferId) -> Result<(), Error> {
        if self.buffers.contains_key(buffer) {
            Ok(())
        } else {
            Err(Error::UnknownResource(buffer.to_string()))
        }
    }
}

impl Device for HeadlessBackend {
    fn name(&self) -> String {
        "headless".to_string()
    }

    fn format_support(&self, format: PixelFormat) -> FormatSupport {
        self.formats
            .get(&format)
            .copied()
            .unwrap_or(FormatSupport::empty())
    }

    fn create_texture(&mut self, descriptor: &TextureDescriptor) -> Result<ResourceId, Error> {
        if let Some(label) = &self.faults.fail_label {
            if descriptor.label.contains(label.as_str()) {
                return Err(Error::OutOfMemory(descriptor.label.clone()));
            }
        }
        if let Some(budget) = self.faults.textures_until_oom.as_mut() {
            if *budget == 0 {
                return Err(Error::OutOfMemory(descriptor.label.clone()));
            }
            *budget -= 1;
        }
        if descriptor.width == 0 || descriptor.height == 0 {
            return Err(Error::OutOfMemory(format!(
                "{} has zero size",
                descriptor.label
            )));
        }
        let id = ResourceId(self.next());
        self.textures.insert(
            id,
            TextureRecord {
                descriptor: descriptor.clone(),
            },
        );
        let live = self.textures.len();
        let mut stats = self.stats();
        stats.live_textures = live;
        stats.created_textures.push((
            descriptor.label.clone(),
            descriptor.width,
            descriptor.height,
            descriptor.format,
        ));
        Ok(id)
    }

    fn destroy_texture(&mut self, texture: ResourceId) {
        self.textures.remove(&texture);
        let live = self.textures.len();
        self.stats().live_textures = live;
    }

    fn create_buffer(&mut self, descriptor: &BufferDescriptor) -> Result<BufferId, Error> {
        let id = BufferId(self.next());
        self.buffers.insert(id, descriptor.clone());
        let live = self.buffers.len();
        self.stats().live_buffers = live;
        Ok(id)
    }

    fn destroy_buffer(&mut self, buffer: BufferId) {
        self.buffers.remove(&buffer);
        let live = self.buffers.len();
        self.stats().live_buffers = live;
    }

    fn write_buffer(&mut self, buffer: BufferId, offset: usize, data: &[u8]) -> Result<(), Error> {
        let descriptor = self
            .buffers
            .get(&buffer)
            .ok_or_else(|| Error::UnknownResource(buffer.to_string()))?;
        if offset + data.len() > descriptor.size {
            return Err(Error::Device(format!(
                "write of {} bytes at {} overflows {} ({} bytes)",
                data.len(),
                offset,
                descriptor.label,
                descriptor.size
            )));
        }
        Ok(())
    }

    fn create_pipeline(&mut self, descriptor: &PipelineDescriptor) -> Result<PipelineId, Error> {
        if let Some(label) = &self.faults.fail_pipeline
            && descriptor.label.contains(label.as_str())
        {
            return Err(Error::Device(format!("pipeline {} rejected", descriptor.label)));
        }
        let id = PipelineId(self.next());
        self.pipelines.insert(id, descriptor.clone());
        let live = self.pipelines.len();
        self.stats().live_pipelines = live;
        Ok(id)
    }

    fn destroy_pipeline(&mut self, pipeline: PipelineId) {
        self.pipelines.remove(&pipeline);
        let live = self.pipelines.len();
        self.stats().live_pipelines = live;
    }

    fn write_descriptor(&mut self, slot: DescriptorHandle, view: &ViewDescriptor) -> Result<(), Error> {
        match view {
            ViewDescriptor::ShaderResource { texture, .. }
            | ViewDescriptor::UnorderedAccess { texture, .. }
            | ViewDescriptor::RenderTarget { texture, .. } => self.check_texture(texture)?,
            ViewDescriptor::Sampler(_) => {}
        }
        self.descriptors.insert(slot, view.clone());
        let live = self.descriptors.len();
        self.stats().live_descriptors = live;
        Ok(())
    }

    fn clear_descriptor(&mut self, slot: DescriptorHandle) {
        self.descriptors.remove(&slot);
        let live = self.descriptors.len();
        self.stats().live_descriptors = live;
    }
}

impl Queue for HeadlessBackend {
    fn execute(&mut self, list: &CommandList) -> Result<(), Error> {
        if list.is_recording() {
            return Err(Error::Device(format!("{} submitted while open", list.label())));
        }
        let mut draws = 0;
        let mut dispatches = 0;
        let mut copies = 0;
        let mut clears = 0;
        let mut target_bound = false;
        let mut pipeline_bound = false;
        for command in list.commands() {
            match command {
                Command::Barrier { resource, .. } | Command::UavBarrier { resource } => {
                    self.check_texture(resource)?
                }
                Command::CopyBufferToTexture {
                    buffer,
                    texture,
                    footprint,
                    mip,
                } => {
                    self.check_buffer(buffer)?;
                    self.check_texture(texture)?;
                    if *mip >= self.textures[texture].descriptor.mip_levels {
                        return Err(Error::Device(format!("copy into missing mip {mip} of {texture}")));
                    }
                    let size = self.buffers[buffer].size;
                    if footprint.offset + footprint.total_bytes() > size {
                        return Err(Error::Device(format!(
                            "copy footprint overruns {buffer}"
                        )));
                    }
                    copies += 1;
                }
                Command::SetPipeline(p) => {
                    if !self.pipelines.contains_key(p) {
                        return Err(Error::UnknownResource(p.to_string()));
                    }
                    pipeline_bound = true;
                }
                Command::SetRenderTarget { view, .. } => {
                    self.check_descriptor(view)?;
                    target_bound = true;
                }
                Command::ClearRenderTarget { view, .. } => {
                    self.check_descriptor(view)?;
                    clears += 1;
                }
                Command::SetViewport(_) | Command::SetScissor(_) => {}
                Command::Bind { resource, .. } => match resource {
                    Binding::Texture(h) | Binding::StorageTexture(h) | Binding::Sampler(h) => {
                        self.check_descriptor(h)?;
                    }
                    Binding::ConstantBuffer { buffer, .. } => self.check_buffer(buffer)?,
                },
                Command::SetVertexBuffer { buffer, .. } => self.check_buffer(buffer)?,
                Command::Draw { .. } => {
                    if !target_bound || !pipeline_bound {
                        return Err(Error::Device(
                            "draw without a render target and pipeline".to_string(),
                        ));
                    }
                    draws += 1;
                }
                Command::Dispatch { .. } => {
                    if !pipeline_bound {
                        return Err(Error::Device("dispatch without a pipeline".to_string()));
                    }
                    dispatches += 1;
                }
            }
        }
        let mut stats = self.stats();
        stats.submissions += 1;
        stats.draws += draws;
        stats.dispatches += dispatches;
        stats.copies += copies;
        stats.clears += clears;
        stats.last_submission = list.commands().to_vec();
        Ok(())
    }

    fn signal(&mut self, value: u64) -> Result<(), Error> {
        self.signaled = self.signaled.max(value);
        Ok(())
    }

    fn completed_value(&self) -> u64 {
        self.completed
    }

    fn wait(&mut self, value: u64, _timeout: Option<Duration>) -> Result<(), Error> {
        // work "completes" when waited on; a value never signaled can't complete
        if value > self.signaled {
            return Err(Error::FenceTimeout(value));
        }
        self.completed = self.signaled;
        Ok(())
    }
}

impl Swapchain for HeadlessBackend {
    fn back_buffer_count(&self) -> usize {
        self.back_buffers.len()
    }

    fn back_buffer(&self, index: usize) -> ResourceId {
        self.back_buffers[index]
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
        if width == 0 || height == 0 {
            return Err(Error::Swapchain("zero-sized swapchain".to_string()));
        }
        let count = self.back_buffers.len();
        for id in std::mem::take(&mut self.back_buffers) {
            self.textures.remove(&id);
        }
        self.swapchain_size = (width, height);
        self.swapchain_format = format;
        self.create_back_buffers(count);
        self.stats().swapchain_resizes += 1;
        Ok(())
    }

    fn present(&mut self, sync_interval: u32, _allow_tearing: bool) -> Result<(), Error> {
        self.back_buffer_index = (self.back_buffer_index + 1) % self.back_buffers.len();
        let mut stats = self.stats();
        stats.presents += 1;
        stats.sync_intervals.push(sync_interval);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bindings::descriptor_heap::HeapKind;
    use crate::bindings::resource_tracking::ResourceState;
    use crate::bindings::visible_to::{BufferUsage, TextureUsage};

    fn texture(label: &str) -> TextureDescriptor {
        TextureDescriptor {
            label: label.to_string(),
            width: 4,
            height: 4,
            format: PixelFormat::Rgba8Unorm,
            mip_levels: 1,
            usage: TextureUsage::SHADER_RESOURCE,
            initial_state: ResourceState::ShaderRead,
        }
    }

    #[test]
    fn tracks_live_resources() {
        let mut backend = HeadlessBackend::new(64, 64);
        let probe = backend.probe();
        let before = probe.stats().live_textures;
        let t = backend.create_texture(&texture("a")).unwrap();
        assert_eq!(probe.stats().live_textures, before + 1);
        backend.destroy_texture(t);
        assert_eq!(probe.stats().live_textures, before);
    }

    #[test]
    fn rejects_stale_descriptors() {
        let mut backend = HeadlessBackend::new(64, 64);
        let t = backend.create_texture(&texture("a")).unwrap();
        let slot = DescriptorHandle {
            heap: HeapKind::ShaderResource,
            index: 0,
        };
        backend
            .write_descriptor(
                slot,
                &ViewDescriptor::ShaderResource {
                    texture: t,
                    format: PixelFormat::Rgba8Unorm,
                    base_mip: 0,
                    mip_count: 1,
                },
            )
            .unwrap();
        backend.destroy_texture(t);
        assert!(backend.check_descriptor(&slot).is_err());
    }

    #[test]
    fn fence_waits_only_for_signaled_values() {
        let mut backend = HeadlessBackend::new(8, 8);
        assert!(backend.wait(1, None).is_err());
        backend.signal(1).unwrap();
        backend.wait(1, None).unwrap();
        assert_eq!(backend.completed_value(), 1);
    }

    #[test]
    fn budget_injects_out_of_memory() {
        let mut backend = HeadlessBackend::new(8, 8).with_texture_budget(1);
        backend.create_texture(&texture("a")).unwrap();
        let err = backend.create_texture(&texture("b")).unwrap_err();
        assert!(err.is_resource_exhaustion());
    }

    #[test]
    fn write_buffer_bounds() {
        let mut backend = HeadlessBackend::new(8, 8);
        let b = backend
            .create_buffer(&BufferDescriptor {
                label: "ubo".into(),
                size: 16,
                usage: BufferUsage::Constant,
            })
            .unwrap();
        backend.write_buffer(b, 0, &[0; 16]).unwrap();
        assert!(backend.write_buffer(b, 8, &[0; 16]).is_err());
    }

    #[test]
    fn present_rotates_back_buffers() {
        let mut backend = HeadlessBackend::new(8, 8);
        assert_eq!(backend.current_back_buffer_index(), 0);
        backend.present(1, false).unwrap();
        assert_eq!(backend.current_back_buffer_index(), 1);
        backend.present(0, true).unwrap();
        assert_eq!(backend.current_back_buffer_index(), 0);
        assert_eq!(backend.probe().stats().sync_intervals, vec![1, 0]);
    }
}
