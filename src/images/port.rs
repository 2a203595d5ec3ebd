// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
The present loop: one swapchain, one command list, one frame in flight.

Every presented frame walks [`FrameState`] `Idle → Recording → Submitted → Presented`.  Recording
runs its [`RecordPhase`]s strictly in order:

| Phase     | Work                                                                        |
|-----------|-----------------------------------------------------------------------------|
| Resize    | pending swapchain or HDR mode change: back-buffer views, swapchain buffers  |
| Viewport  | letterbox and rotation                                                      |
| Upload    | history ring, input upload, pass render targets, lookup textures, overlays  |
| Shade     | the pass chain                                                              |
| Composite | blit of the chain output (or the raw input) into the content viewport       |
| Scene     | menu, overlays, OSD text, statistics                                        |

Before recording starts, the loop waits for the fence of the previous submission; nothing
recorded for frame N+1 can touch a resource frame N is still reading.

# Repeated frames

One call to [`Port::frame`] can present more than once.  With black-frame insertion, the real
frame is followed by "light" repeats and then "dark" black frames; with shader subframes, the
same input is shaded again with the subframe counter advanced.  The whole sequence is computed up
front by [`schedule`] and run as a loop.  [`PortFlags::FRAME_DUPE_LOCK`] is held while the extra
presents run and is always clear when `frame` returns.
*/

use crate::Error;
use crate::bindings::descriptor_heap::DescriptorHandle;
use crate::bindings::resource_tracking::{ResourceState, StateTracker, Subresource};
use crate::bindings::sampler::{FilterMode, WrapMode};
use crate::bindings::visible_to::MipLevels;
use crate::config::{FrameInfo, HdrConfig, VideoConfig};
use crate::images::command_list::{Command, CommandList};
use crate::images::device::BoundDevice;
use crate::images::hdr::{HDR_OFFSCREEN_FORMAT, HDR_SWAPCHAIN_FORMAT, HdrPipeline};
use crate::images::history::FrameHistory;
use crate::images::mipmap::{self, MipGenerators};
use crate::images::overlay::{Scene, SceneTarget};
use crate::images::pass_chain::{ChainFrame, ChainOutput, PassChain};
use crate::images::quad::{Blit, TargetView, create_quad_buffer};
use crate::images::uniforms::FrameUniforms;
use crate::images::viewport::{Viewport, ViewportInfo, ViewportRequest, calculate_viewport, output_mvp};
use crate::imp::{BufferId, ResourceId, ViewDescriptor};
use crate::pixel_formats::PixelFormat;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

bitflags::bitflags! {
    /// Deferred work and modes of the present loop.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PortFlags: u32 {
        /// The swapchain must be resized (size or HDR mode changed).
        const RESIZE_CHAIN = 1 << 0;
        /// The letterbox viewport must be recomputed.
        const RESIZE_VIEWPORT = 1 << 1;
        /// Pass render targets must be resized.
        const RESIZE_RTS = 1 << 2;
        /// The history ring must be recreated before the next upload.
        const INIT_HISTORY = 1 << 3;
        /// Repeated frames are being presented; no further repeats may start.
        const FRAME_DUPE_LOCK = 1 << 4;
        const VSYNC = 1 << 5;
        const HDR_ENABLE = 1 << 6;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    Idle,
    Recording,
    Submitted,
    Presented,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RecordPhase {
    Resize,
    Viewport,
    Upload,
    Shade,
    Composite,
    Scene,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    /// The new input frame.
    Real,
    /// The same input shaded and presented again.
    Repeat,
    /// A cleared back buffer.
    Black,
}

/// One present within a call to [`Port::frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    pub kind: StepKind,
    /// 1-based.
    pub subframe: u32,
    pub total_subframes: u32,
}

/// Inputs to [`schedule`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RepeatPolicy {
    pub black_frame_insertion: u32,
    pub bfi_dark_frames: u32,
    pub shader_subframes: u32,
    /// Presentation is not paced right now (nonblock, slow motion, paused, menu).
    pub suppressed: bool,
    /// [`PortFlags::FRAME_DUPE_LOCK`] is held.
    pub locked: bool,
}

/**
The presents one call to [`Port::frame`] makes, in order.

The real frame always comes first.  Black-frame insertion wins over subframes: it adds
`bfi − dark` repeats, then `dark` black frames, where `dark = min(bfi_dark_frames, bfi)`.
Without it, `shader_subframes = K > 1` adds K − 1 repeats numbered 2..=K.  Nothing is added while
suppressed or locked.
*/
pub fn schedule(policy: RepeatPolicy) -> Vec<Step> {
    let repeats_allowed = !policy.suppressed && !policy.locked;
    let bfi = policy.black_frame_insertion;
    if repeats_allowed && bfi > 0 {
        let dark = policy.bfi_dark_frames.min(bfi);
        let light = bfi - dark;
        let mut steps = vec![Step {
            kind: StepKind::Real,
            subframe: 1,
            total_subframes: 1,
        }];
        let extra = |kind| Step {
            kind,
            subframe: 1,
            total_subframes: 1,
        };
        steps.extend((0..light).map(|_| extra(StepKind::Repeat)));
        steps.extend((0..dark).map(|_| extra(StepKind::Black)));
        return steps;
    }
    let k = policy.shader_subframes;
    if repeats_allowed && k > 1 {
        return (1..=k)
            .map(|subframe| Step {
                kind: if subframe == 1 {
                    StepKind::Real
                } else {
                    StepKind::Repeat
                },
                subframe,
                total_subframes: k,
            })
            .collect();
    }
    vec![Step {
        kind: StepKind::Real,
        subframe: 1,
        total_subframes: 1,
    }]
}

#[derive(Debug, Clone, Copy)]
struct FrameTiming {
    start: Instant,
    cpu: Duration,
}

/// Rolling CPU timing over the last [`FrameStats::HISTORY`] presents.
#[derive(Debug, Default)]
pub struct FrameStats {
    history: VecDeque<FrameTiming>,
    fps: f32,
    cpu_ms: f32,
    min_elapsed_ms: f32,
}

impl FrameStats {
    pub const HISTORY: usize = 60;

    fn record(&mut self, start: Instant, end: Instant) {
        self.history.push_back(FrameTiming {
            start,
            cpu: end.duration_since(start),
        });
        while self.history.len() > Self::HISTORY {
            self.history.pop_front();
        }
        if self.history.len() > 1 {
            let mut total = 0.0;
            let mut min = f64::MAX;
            for (a, b) in self.history.iter().zip(self.history.iter().skip(1)) {
                let interval = b.start.duration_since(a.start).as_secs_f64();
                total += interval;
                min = min.min(interval);
            }
            let average = total / (self.history.len() - 1) as f64;
            if average > 0.0 {
                self.fps = (1.0 / average) as f32;
            }
            self.min_elapsed_ms = (min * 1000.0) as f32;
        }
        let cpu: f64 = self.history.iter().map(|t| t.cpu.as_secs_f64()).sum();
        self.cpu_ms = (cpu * 1000.0 / self.history.len() as f64) as f32;
    }

    pub fn samples(&self) -> usize {
        self.history.len()
    }

    pub fn fps(&self) -> f32 {
        self.fps
    }

    /// Average CPU time from the start of recording to present.
    pub fn cpu_ms(&self) -> f32 {
        self.cpu_ms
    }

    /// Shortest interval between presents, for callers pacing their own work.
    pub fn min_elapsed_ms(&self) -> f32 {
        self.min_elapsed_ms
    }

    /// Text for the statistics overlay.
    pub fn text(&self, viewport: &ViewportInfo) -> String {
        format!(
            "FPS: {:.1}\nCPU: {:.2} ms\nMin: {:.2} ms\nViewport: {}x{}",
            self.fps, self.cpu_ms, self.min_elapsed_ms, viewport.width, viewport.height
        )
    }
}

/// A decoded input frame.
#[derive(Debug, Clone, Copy)]
pub struct InputFrame<'a> {
    pub pixels: &'a [u8],
    pub width: u32,
    pub height: u32,
    pub pitch: usize,
    pub format: PixelFormat,
}

impl InputFrame<'_> {
    /// An empty frame is treated as no new input; the previous one is shown again.
    pub fn has_pixels(&self) -> bool {
        self.width > 0 && self.height > 0 && !self.pixels.is_empty()
    }
}

/// Everything a frame reads that the port doesn't own.
#[derive(Debug)]
pub struct FrameContext<'a> {
    pub config: &'a VideoConfig,
    pub chain: Option<&'a mut PassChain>,
    pub scene: &'a mut Scene,
    /// `None` re-presents the previous input.
    pub input: Option<InputFrame<'a>>,
    pub info: FrameInfo,
    /// The frontend's frame counter, seen by shaders as `FrameCount`.
    pub frame_count: u64,
    pub nonblock: bool,
}

#[derive(Debug)]
struct BackBuffer {
    resource: ResourceId,
    rtv: DescriptorHandle,
    states: StateTracker,
}

#[derive(Debug)]
pub struct Port {
    flags: PortFlags,
    state: FrameState,
    phase: Option<RecordPhase>,
    cmd: CommandList,
    back_buffers: Vec<BackBuffer>,
    sdr_format: PixelFormat,
    pending_size: Option<(u32, u32)>,
    viewport: ViewportInfo,
    /// Aspect the viewport was last computed for.
    viewport_aspect: f32,
    history: FrameHistory,
    mips: MipGenerators,
    blit: Blit,
    quad: BufferId,
    hdr: Option<HdrPipeline>,
    stats: FrameStats,
    frames_presented: u64,
    last_output: Option<ChainOutput>,
}

impl Port {
    pub fn new(device: &mut BoundDevice, config: &VideoConfig) -> Result<Port, Error> {
        let quad = create_quad_buffer(device)?;
        let blit = match Blit::new(device) {
            Ok(b) => b,
            Err(e) => {
                device.backend_mut().destroy_buffer(quad);
                return Err(e);
            }
        };
        let mut flags = PortFlags::RESIZE_VIEWPORT | PortFlags::INIT_HISTORY;
        if config.vsync {
            flags |= PortFlags::VSYNC;
        }
        let mut port = Port {
            flags,
            state: FrameState::Idle,
            phase: None,
            cmd: CommandList::new("frame").with_dump(config.dump_commands),
            back_buffers: Vec::new(),
            sdr_format: device.backend().swapchain_format(),
            pending_size: None,
            viewport: ViewportInfo::default(),
            viewport_aspect: 0.0,
            history: FrameHistory::new(),
            mips: MipGenerators::default(),
            blit,
            quad,
            hdr: None,
            stats: FrameStats::default(),
            frames_presented: 0,
            last_output: None,
        };
        let setup = port.create_back_buffer_views(device).and_then(|_| {
            if let Some(settings) = config.hdr {
                port.set_hdr(device, Some(settings))?;
            }
            Ok(())
        });
        if let Err(e) = setup {
            port.release(device);
            return Err(e);
        }
        Ok(port)
    }

    pub fn flags(&self) -> PortFlags {
        self.flags
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    pub fn is_frame_dupe_locked(&self) -> bool {
        self.flags.contains(PortFlags::FRAME_DUPE_LOCK)
    }

    pub fn viewport(&self) -> ViewportInfo {
        self.viewport
    }

    pub fn stats(&self) -> &FrameStats {
        &self.stats
    }

    pub fn history(&self) -> &FrameHistory {
        &self.history
    }

    /// Real frames presented so far, not counting black or repeated ones.
    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }

    /// Format of the target the chain's last pass draws into.
    pub fn target_format(&self, device: &BoundDevice) -> PixelFormat {
        match &self.hdr {
            Some(hdr) if hdr.offscreen().is_created() => hdr.offscreen().format(),
            Some(_) => HDR_OFFSCREEN_FORMAT,
            None => device.backend().swapchain_format(),
        }
    }

    /// What the most recent frame composited.
    pub fn last_output(&self) -> Option<ChainOutput> {
        self.last_output
    }

    pub fn hdr(&self) -> Option<&HdrPipeline> {
        self.hdr.as_ref()
    }

    pub fn set_vsync(&mut self, vsync: bool) {
        self.flags.set(PortFlags::VSYNC, vsync);
    }

    /// Recompute the viewport before the next frame.
    pub fn invalidate_viewport(&mut self) {
        self.flags.insert(PortFlags::RESIZE_VIEWPORT);
    }

    /// Recreate the history ring and pass targets before the next frame.
    pub fn invalidate_chain(&mut self) {
        self.flags.insert(PortFlags::INIT_HISTORY | PortFlags::RESIZE_RTS);
        self.last_output = None;
    }

    /// Resizes the swapchain before the next frame.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.pending_size = Some((width, height));
        self.flags.insert(PortFlags::RESIZE_CHAIN);
    }

    /// Switches HDR output on (`Some`) or off.  The swapchain format changes on the next frame.
    pub fn set_hdr(&mut self, device: &mut BoundDevice, settings: Option<HdrConfig>) -> Result<(), Error> {
        match (settings, self.hdr.as_mut()) {
            (Some(s), Some(hdr)) => hdr.set_settings(s),
            (Some(s), None) => {
                self.hdr = Some(HdrPipeline::new(device, s)?);
                self.flags.insert(PortFlags::HDR_ENABLE | PortFlags::RESIZE_CHAIN);
            }
            (None, Some(_)) => {
                device.sync()?;
                if let Some(mut hdr) = self.hdr.take() {
                    hdr.release(device);
                }
                self.flags.remove(PortFlags::HDR_ENABLE);
                self.flags.insert(PortFlags::RESIZE_CHAIN);
            }
            (None, None) => {}
        }
        Ok(())
    }

    fn create_back_buffer_views(&mut self, device: &mut BoundDevice) -> Result<(), Error> {
        let format = device.backend().swapchain_format();
        for i in 0..device.backend().back_buffer_count() {
            let resource = device.backend().back_buffer(i);
            let rtv = device.heaps.render_target.allocate()?;
            let written = device
                .backend_mut()
                .write_descriptor(rtv, &ViewDescriptor::RenderTarget { texture: resource, format });
            if let Err(e) = written {
                device.heaps.release(rtv);
                return Err(e);
            }
            self.back_buffers.push(BackBuffer {
                resource,
                rtv,
                states: StateTracker::new(1, ResourceState::Present),
            });
        }
        Ok(())
    }

    fn release_back_buffer_views(&mut self, device: &mut BoundDevice) {
        for b in self.back_buffers.drain(..) {
            device.backend_mut().clear_descriptor(b.rtv);
            device.heaps.release(b.rtv);
        }
    }

    fn enter(&mut self, phase: RecordPhase) {
        debug_assert!(self.state == FrameState::Recording);
        debug_assert!(self.phase.is_none_or(|p| p < phase), "{phase:?} out of order");
        self.phase = Some(phase);
    }

    /**
    Presents one input frame, plus any black or repeated frames the configuration asks for.

    A failed present leaves [`PortFlags::FRAME_DUPE_LOCK`] clear.
    */
    pub fn frame(&mut self, device: &mut BoundDevice, ctx: &mut FrameContext<'_>) -> Result<(), Error> {
        let steps = schedule(RepeatPolicy {
            black_frame_insertion: ctx.config.black_frame_insertion,
            bfi_dark_frames: ctx.config.bfi_dark_frames,
            shader_subframes: ctx.config.shader_subframes,
            suppressed: ctx.nonblock || ctx.info.suppresses_repeats(),
            locked: self.is_frame_dupe_locked(),
        });
        let mut result = Ok(());
        for (i, step) in steps.iter().enumerate() {
            if i == 1 {
                self.flags.insert(PortFlags::FRAME_DUPE_LOCK);
            }
            result = self.render_once(device, ctx, *step);
            if result.is_err() {
                break;
            }
        }
        self.flags.remove(PortFlags::FRAME_DUPE_LOCK);
        result
    }

    fn render_once(&mut self, device: &mut BoundDevice, ctx: &mut FrameContext<'_>, step: Step) -> Result<(), Error> {
        device.wait_for_previous()?;
        self.state = FrameState::Idle;
        let start = Instant::now();
        self.cmd.reset();
        self.state = FrameState::Recording;
        self.phase = None;
        match self.record(device, ctx, step) {
            Ok(back_buffer) => {
                self.finish(device, back_buffer, ctx.config)?;
                if step.kind == StepKind::Real {
                    self.frames_presented += 1;
                }
                self.stats.record(start, Instant::now());
                Ok(())
            }
            Err(e) => {
                self.abandon(device);
                Err(e)
            }
        }
    }

    /// Records one present.  Returns the back buffer index, left in render-target state.
    fn record(&mut self, device: &mut BoundDevice, ctx: &mut FrameContext<'_>, step: Step) -> Result<usize, Error> {
        self.enter(RecordPhase::Resize);
        if self.flags.contains(PortFlags::RESIZE_CHAIN) {
            self.resize_swapchain(device)?;
        }

        self.enter(RecordPhase::Viewport);
        let aspect = ctx.config.aspect_ratio.unwrap_or(ctx.info.core_aspect);
        if self.viewport_aspect != aspect {
            self.flags.insert(PortFlags::RESIZE_VIEWPORT);
        }
        if self.flags.contains(PortFlags::RESIZE_VIEWPORT) {
            self.update_viewport(device, ctx.config, aspect);
        }

        self.enter(RecordPhase::Upload);
        if step.kind == StepKind::Real
            && let Some(input) = ctx.input.filter(|i| i.has_pixels())
        {
            match self.upload(device, ctx.chain.as_deref(), &input) {
                Ok(()) => {}
                Err(e) if e.is_resource_exhaustion() => {
                    logwise::warn_sync!(
                        "Input frame not uploaded: {err}",
                        err = logwise::privacy::LogIt(&e)
                    );
                    self.flags.insert(PortFlags::INIT_HISTORY);
                }
                Err(e) => return Err(e),
            }
        }
        // a new content size moves the integer-scaled viewport
        if self.flags.contains(PortFlags::RESIZE_VIEWPORT) {
            self.update_viewport(device, ctx.config, aspect);
        }
        if let Some(chain) = ctx.chain.as_deref_mut() {
            self.resize_chain(device, chain);
            chain.flush_luts(device, &mut self.cmd, &mut self.mips)?;
        }
        ctx.scene.flush(&mut self.cmd)?;

        self.enter(RecordPhase::Shade);
        let index = device.backend().current_back_buffer_index();
        let format = device.backend().swapchain_format();
        let (width, height) = device.backend().swapchain_size();
        let back_buffer = self
            .back_buffers
            .get_mut(index)
            .ok_or_else(|| Error::Swapchain(format!("no back buffer {index}")))?;
        self.cmd.transition(
            back_buffer.resource,
            &mut back_buffer.states,
            Subresource::All,
            ResourceState::RenderTarget,
        )?;
        let back_target = TargetView {
            view: back_buffer.rtv,
            format,
            width,
            height,
        };
        self.cmd.record(Command::ClearRenderTarget {
            view: back_target.view,
            color: [0.0, 0.0, 0.0, 1.0],
        })?;
        if step.kind == StepKind::Black {
            return Ok(index);
        }

        let target = match self.hdr.as_mut() {
            Some(hdr) => hdr.begin(&mut self.cmd)?,
            None => back_target,
        };
        let content = self.viewport.viewport();
        let uniforms = self.frame_uniforms(ctx, step);
        let smooth = ctx.config.smooth;
        let output = match (ctx.chain.as_deref_mut(), self.history.current()) {
            (Some(chain), Some(_)) => {
                let frame = ChainFrame {
                    history: &self.history,
                    uniforms: &uniforms,
                    target,
                    viewport: content,
                    smooth,
                    quad: self.quad,
                };
                Some(chain.render(device, &mut self.cmd, &frame, &mut self.mips)?)
            }
            (None, Some(_)) => Some(ChainOutput::Original),
            (_, None) => None,
        };

        self.enter(RecordPhase::Composite);
        let sampler = device.samplers.get(FilterMode::from_smooth(smooth), WrapMode::ClampToEdge);
        let source = match output {
            Some(ChainOutput::Pass(i)) => ctx.chain.as_deref().and_then(|c| c.pass(i)).map(|p| p.output()),
            Some(ChainOutput::Original) => self.history.current(),
            Some(ChainOutput::Final) | None => None,
        };
        if let Some(source) = source {
            self.blit.draw(
                device,
                &mut self.cmd,
                source,
                sampler,
                &target,
                content,
                &uniforms.mvp,
                self.quad,
            )?;
        }
        self.last_output = output;

        self.enter(RecordPhase::Scene);
        let full = Viewport::full(target.width, target.height);
        let statistics = ctx.info.statistics_show.then(|| self.stats.text(&self.viewport));
        let at = SceneTarget {
            target,
            full,
            content,
            smooth,
        };
        ctx.scene.draw(device, &mut self.cmd, &at, statistics.as_deref())?;

        if let Some(hdr) = self.hdr.as_mut() {
            hdr.resolve(device, &mut self.cmd, &back_target, sampler, self.quad)?;
        }
        Ok(index)
    }

    /// Recording → Submitted → Presented.
    fn finish(&mut self, device: &mut BoundDevice, index: usize, config: &VideoConfig) -> Result<(), Error> {
        let back_buffer = &mut self.back_buffers[index];
        self.cmd.transition(
            back_buffer.resource,
            &mut back_buffer.states,
            Subresource::All,
            ResourceState::Present,
        )?;
        self.cmd.close()?;
        device.submit(&self.cmd)?;
        self.state = FrameState::Submitted;
        let sync_interval = if self.flags.contains(PortFlags::VSYNC) {
            config.swap_interval.max(1)
        } else {
            0
        };
        device.backend_mut().present(sync_interval, sync_interval == 0)?;
        self.state = FrameState::Presented;
        self.phase = None;
        Ok(())
    }

    /// Submits whatever was recorded so tracked states match the GPU, without presenting.
    fn abandon(&mut self, device: &mut BoundDevice) {
        if !self.cmd.is_recording() {
            return;
        }
        let submitted = self.cmd.close().and_then(|_| device.submit(&self.cmd));
        if let Err(e) = submitted {
            logwise::error_sync!(
                "Abandoned frame could not be submitted: {err}",
                err = logwise::privacy::LogIt(&e)
            );
        }
        self.state = FrameState::Idle;
        self.phase = None;
    }

    fn resize_swapchain(&mut self, device: &mut BoundDevice) -> Result<(), Error> {
        let (width, height) = self
            .pending_size
            .unwrap_or_else(|| device.backend().swapchain_size());
        let format = if self.flags.contains(PortFlags::HDR_ENABLE) {
            HDR_SWAPCHAIN_FORMAT
        } else {
            self.sdr_format
        };
        self.release_back_buffer_views(device);
        let resized = device
            .backend_mut()
            .resize_buffers(width, height, format)
            .and_then(|_| self.create_back_buffer_views(device))
            .and_then(|_| match self.hdr.as_mut() {
                Some(hdr) => hdr.resize(device, width, height),
                None => Ok(()),
            });
        if let Err(e) = resized {
            logwise::error_sync!(
                "Swapchain resize to {width}x{height} failed: {err}",
                width = width,
                height = height,
                err = logwise::privacy::LogIt(&e)
            );
            return Err(e);
        }
        logwise::info_sync!(
            "Swapchain resized to {width}x{height} {format}",
            width = width,
            height = height,
            format = logwise::privacy::LogIt(&format)
        );
        self.pending_size = None;
        self.flags.remove(PortFlags::RESIZE_CHAIN);
        self.flags.insert(PortFlags::RESIZE_VIEWPORT);
        Ok(())
    }

    fn update_viewport(&mut self, device: &BoundDevice, config: &VideoConfig, aspect: f32) {
        let (width, height) = device.backend().swapchain_size();
        let (mut cw, mut ch) = self.history.size().unwrap_or((0, 0));
        let mut rotated = aspect;
        if config.rotation % 2 == 1 {
            std::mem::swap(&mut cw, &mut ch);
            if aspect > 0.0 {
                rotated = 1.0 / aspect;
            }
        }
        let viewport = calculate_viewport(&ViewportRequest {
            output_width: width,
            output_height: height,
            aspect: rotated,
            keep_aspect: config.keep_aspect,
            scale_integer: config.scale_integer,
            content_width: cw,
            content_height: ch,
        });
        if viewport != self.viewport {
            logwise::trace_sync!(
                "Viewport {w}x{h} at {x},{y}",
                w = viewport.width,
                h = viewport.height,
                x = viewport.x,
                y = viewport.y
            );
            self.flags.insert(PortFlags::RESIZE_RTS);
        }
        self.viewport = viewport;
        self.viewport_aspect = aspect;
        self.flags.remove(PortFlags::RESIZE_VIEWPORT);
    }

    fn upload(&mut self, device: &mut BoundDevice, chain: Option<&PassChain>, input: &InputFrame<'_>) -> Result<(), Error> {
        let depth = chain.map(|c| c.history_depth()).unwrap_or(0);
        let mips = if chain.is_some_and(|c| c.wants_input_mips()) {
            MipLevels::Full
        } else {
            MipLevels::One
        };
        if self.flags.contains(PortFlags::INIT_HISTORY) {
            device.sync()?;
            self.history.release(device);
            self.flags.remove(PortFlags::INIT_HISTORY);
        }
        let previous = self.history.size();
        let created = self
            .history
            .ensure(device, depth, input.width, input.height, input.format, mips)?;
        if created {
            if previous != Some((input.width, input.height)) {
                self.flags.insert(PortFlags::RESIZE_VIEWPORT | PortFlags::RESIZE_RTS);
            }
        } else {
            self.history.advance();
        }
        let current = self
            .history
            .current_mut()
            .ok_or_else(|| Error::UnknownResource("history 0".to_string()))?;
        current.upload(
            device,
            &mut self.cmd,
            input.pixels,
            input.width,
            input.height,
            input.pitch,
            input.format,
        )?;
        mipmap::refresh(device, &mut self.cmd, &mut self.mips, current)
    }

    /// Resizes pass targets if needed.  Failures leave the chain broken for this frame.
    fn resize_chain(&mut self, device: &mut BoundDevice, chain: &mut PassChain) {
        let Some(source) = self.history.size() else {
            return;
        };
        let viewport = (self.viewport.width, self.viewport.height);
        if !self.flags.contains(PortFlags::RESIZE_RTS) && !chain.needs_resize(source, viewport) {
            return;
        }
        match chain.resize(device, source, viewport) {
            Ok(()) => self.flags.remove(PortFlags::RESIZE_RTS),
            Err(e) => logwise::warn_sync!(
                "Pass render targets not resized: {err}",
                err = logwise::privacy::LogIt(&e)
            ),
        }
    }

    fn frame_uniforms(&self, ctx: &FrameContext<'_>, step: Step) -> FrameUniforms {
        let rotation = ctx.config.rotation % 4;
        FrameUniforms {
            mvp: output_mvp(rotation),
            mvp_no_rotation: output_mvp(0),
            frame_count: ctx.frame_count,
            frame_direction: if ctx.info.rewinding { -1 } else { 1 },
            frame_time_delta: ctx.info.frame_time_delta,
            original_fps: ctx.info.original_fps,
            rotation,
            original_aspect: ctx.info.core_aspect,
            final_viewport: (self.viewport.width, self.viewport.height),
            total_subframes: step.total_subframes,
            current_subframe: step.subframe,
        }
    }

    /// Releases every resource the port owns.  The device must be idle.
    pub fn release(&mut self, device: &mut BoundDevice) {
        self.release_back_buffer_views(device);
        self.history.release(device);
        self.mips.release(device);
        self.blit.release(device);
        if let Some(mut hdr) = self.hdr.take() {
            hdr.release(device);
        }
        device.backend_mut().destroy_buffer(self.quad);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(steps: &[Step]) -> Vec<StepKind> {
        steps.iter().map(|s| s.kind).collect()
    }

    #[test]
    fn bfi_presents_light_then_dark() {
        let steps = schedule(RepeatPolicy {
            black_frame_insertion: 3,
            bfi_dark_frames: 2,
            ..RepeatPolicy::default()
        });
        assert_eq!(
            kinds(&steps),
            vec![StepKind::Real, StepKind::Repeat, StepKind::Black, StepKind::Black]
        );
    }

    #[test]
    fn dark_frames_are_capped_by_bfi() {
        let steps = schedule(RepeatPolicy {
            black_frame_insertion: 1,
            bfi_dark_frames: 5,
            ..RepeatPolicy::default()
        });
        assert_eq!(kinds(&steps), vec![StepKind::Real, StepKind::Black]);
    }

    #[test]
    fn subframes_count_up() {
        let steps = schedule(RepeatPolicy {
            shader_subframes: 3,
            ..RepeatPolicy::default()
        });
        let numbers: Vec<_> = steps.iter().map(|s| (s.subframe, s.total_subframes)).collect();
        assert_eq!(numbers, vec![(1, 3), (2, 3), (3, 3)]);
        assert_eq!(steps[0].kind, StepKind::Real);
    }

    #[test]
    fn locked_or_suppressed_frames_do_not_repeat() {
        let policy = RepeatPolicy {
            black_frame_insertion: 2,
            shader_subframes: 4,
            ..RepeatPolicy::default()
        };
        for p in [
            RepeatPolicy { locked: true, ..policy },
            RepeatPolicy { suppressed: true, ..policy },
        ] {
            let steps = schedule(p);
            assert_eq!(steps.len(), 1);
            assert_eq!(steps[0].total_subframes, 1);
        }
    }

    #[test]
    fn stats_keep_sixty_frames() {
        let mut stats = FrameStats::default();
        let base = Instant::now();
        for i in 0..100u64 {
            let start = base + Duration::from_millis(i * 10);
            stats.record(start, start + Duration::from_millis(2));
        }
        assert_eq!(stats.samples(), FrameStats::HISTORY);
        assert!((stats.fps() - 100.0).abs() < 0.5);
        assert!((stats.cpu_ms() - 2.0).abs() < 0.01);
        assert!((stats.min_elapsed_ms() - 10.0).abs() < 0.01);
    }
}
