// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
The multi-pass shader pipeline.

A [`PassChain`] is built from a [`Preset`] and runs once per presented frame.  Pass *i* reads
any of:

* `Original` and `OriginalHistory#`, from the [`FrameHistory`]
* `Source`, the output of pass *i − 1* (the input frame for pass 0)
* `PassOutput#` of an earlier pass, from this frame
* `PassFeedback#` of any pass, from the previous frame
* the preset's lookup textures

Each pass walks [`PassState`] from `Idle` to `Executed` once per frame.  Passes with feedback
swap their output and feedback textures by handle before the loop starts, so last frame's output
is readable while a fresh texture is written.

When the terminal pass fills the viewport at its natural scale it draws straight into the final
target; otherwise it gets its own render target and the caller composites it.  A pass whose render
target is missing ends the loop for that frame, and the caller shows the last output that was
produced.
*/

use crate::Error;
use crate::bindings::descriptor_heap::DescriptorHandle;
use crate::bindings::resource_tracking::ResourceState;
use crate::bindings::sampler::{FilterMode, SamplerDescriptor};
use crate::bindings::visible_to::{BufferUsage, MipLevels, TextureConfig, TextureUsage};
use crate::images::command_list::{Binding, Command, CommandList};
use crate::images::device::BoundDevice;
use crate::images::history::FrameHistory;
use crate::images::image_loader::ImageLoader;
use crate::images::mipmap::{self, MipGenerators};
use crate::images::preset::{PassPreset, Preset, Scale};
use crate::images::quad::{PipelineCache, QUAD_STRIDE, TargetView, constant_size};
use crate::images::shader::{CompiledPass, ShaderCompiler, TextureSemantic};
use crate::images::texture::Texture;
use crate::images::uniforms::{self, FrameUniforms, PassUniformContext, UniformWriter};
use crate::images::viewport::Viewport;
use crate::imp::{
    BindingKind, BindingLayout, BlendMode, BufferDescriptor, BufferId, PipelineDescriptor,
    PipelineKind, Topology, VertexLayout, ViewDescriptor,
};
use crate::pixel_formats::PixelFormat;

/// Format of pass render targets without a format hint.
pub const DEFAULT_PASS_FORMAT: PixelFormat = PixelFormat::Rgba8Unorm;

/// Where a pass is within one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassState {
    Idle,
    BoundInputs,
    RenderTargetBound,
    Executed,
}

/// What the chain produced this frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainOutput {
    /// The terminal pass drew into the final target.
    Final,
    /// Pass `n`'s render target holds the result and still has to be composited.
    Pass(usize),
    /// Nothing was produced; composite the input frame.
    Original,
}

/// Everything outside the chain that a frame's passes read or write.
#[derive(Debug, Clone, Copy)]
pub struct ChainFrame<'a> {
    pub history: &'a FrameHistory,
    pub uniforms: &'a FrameUniforms,
    /// The final target, already in render-target state.
    pub target: TargetView,
    /// The content rectangle inside `target`.
    pub viewport: Viewport,
    /// Filter for passes that don't choose one.
    pub smooth: bool,
    pub quad: BufferId,
}

#[derive(Debug)]
pub struct ShaderPass {
    index: usize,
    preset: PassPreset,
    compiled: CompiledPass,
    pipelines: PipelineCache,
    constants: Option<BufferId>,
    /// One descriptor slot per reflected texture, rewritten every frame.
    input_slots: Vec<DescriptorHandle>,
    output: Texture,
    feedback: Option<Texture>,
    output_mips: MipLevels,
    size: (u32, u32),
    viewport: Viewport,
    state: PassState,
    renders_to_final: bool,
}

impl ShaderPass {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn preset(&self) -> &PassPreset {
        &self.preset
    }

    pub fn state(&self) -> PassState {
        self.state
    }

    /// Output size from the last resize.
    pub fn size(&self) -> (u32, u32) {
        self.size
    }

    /// The render target; never created when the pass draws into the final target.
    pub fn output(&self) -> &Texture {
        &self.output
    }

    pub fn feedback(&self) -> Option<&Texture> {
        self.feedback.as_ref()
    }

    pub fn renders_to_final(&self) -> bool {
        self.renders_to_final
    }

    fn output_format(&self) -> PixelFormat {
        self.preset.format.unwrap_or(DEFAULT_PASS_FORMAT)
    }

    fn filter(&self, smooth: bool) -> FilterMode {
        self.preset.filter.unwrap_or(FilterMode::from_smooth(smooth))
    }

    fn release(&mut self, device: &mut BoundDevice) {
        self.output.release(device);
        if let Some(feedback) = self.feedback.as_mut() {
            feedback.release(device);
        }
        if let Some(buffer) = self.constants.take() {
            device.backend_mut().destroy_buffer(buffer);
        }
        for slot in self.input_slots.drain(..) {
            device.backend_mut().clear_descriptor(slot);
            device.heaps.release(slot);
        }
        self.pipelines.release(device);
    }
}

fn describe_pass(pass: &ShaderPass, format: PixelFormat, blend: BlendMode) -> PipelineDescriptor {
    let reflection = &pass.compiled.reflection;
    let mut bindings = Vec::new();
    if let Some(binding) = reflection.uniform_binding {
        bindings.push(BindingLayout {
            binding,
            kind: BindingKind::ConstantBuffer,
        });
    }
    for t in &reflection.textures {
        bindings.push(BindingLayout {
            binding: t.binding,
            kind: BindingKind::Texture,
        });
        //textures may share one sampler
        if let Some(binding) = t.sampler_binding
            && !bindings.iter().any(|b| b.binding == binding)
        {
            bindings.push(BindingLayout {
                binding,
                kind: BindingKind::Sampler,
            });
        }
    }
    PipelineDescriptor {
        label: format!("pass {} {}", pass.index, pass.preset.path.display()),
        kind: PipelineKind::Render {
            vertex: pass.compiled.vertex.clone(),
            fragment: pass.compiled.fragment.clone(),
            vertex_layout: VertexLayout::Quad,
            topology: Topology::TriangleStrip,
            blend,
            target_format: format,
        },
        bindings,
    }
}

/// A pass fills the viewport at its natural scale when it has no scale or 1× viewport scale.
fn fills_viewport(pass: &PassPreset) -> bool {
    pass.is_unscaled()
        || (pass.scale_x == Some(Scale::Viewport(1.0)) && pass.scale_y == Some(Scale::Viewport(1.0)))
}

/// Checks that every texture a pass reads can exist when it runs.
fn check_references(index: usize, compiled: &CompiledPass, passes: usize, luts: usize) -> Result<(), Error> {
    for t in &compiled.reflection.textures {
        let ok = match t.semantic {
            TextureSemantic::PassOutput(n) => (n as usize) < index,
            TextureSemantic::PassFeedback(n) => (n as usize) < passes,
            TextureSemantic::User(n) => (n as usize) < luts,
            _ => true,
        };
        if !ok {
            return Err(Error::ShaderCompile {
                pass: index,
                message: format!("{:?} is not available to this pass", t.semantic),
            });
        }
    }
    Ok(())
}

#[derive(Debug)]
pub struct PassChain {
    preset: Preset,
    passes: Vec<ShaderPass>,
    luts: Vec<Texture>,
    history_depth: u32,
    source_size: (u32, u32),
    viewport_size: (u32, u32),
}

impl PassChain {
    /**
    Compiles every pass and loads every lookup texture.

    Render targets are not created here; call [`PassChain::resize`] once the input and viewport
    sizes are known.  On error everything built so far is released.
    */
    pub fn build(
        device: &mut BoundDevice,
        preset: Preset,
        compiler: &dyn ShaderCompiler,
        images: &dyn ImageLoader,
        final_format: PixelFormat,
    ) -> Result<PassChain, Error> {
        let mut chain = PassChain {
            preset,
            passes: Vec::new(),
            luts: Vec::new(),
            history_depth: 0,
            source_size: (0, 0),
            viewport_size: (0, 0),
        };
        match chain.populate(device, compiler, images, final_format) {
            Ok(()) => {
                logwise::info_sync!(
                    "Built {passes} passes and {luts} lookup textures from {path}",
                    passes = chain.passes.len(),
                    luts = chain.luts.len(),
                    path = chain.preset.path.display().to_string()
                );
                Ok(chain)
            }
            Err(e) => {
                chain.release(device);
                Err(e)
            }
        }
    }

    fn populate(
        &mut self,
        device: &mut BoundDevice,
        compiler: &dyn ShaderCompiler,
        images: &dyn ImageLoader,
        final_format: PixelFormat,
    ) -> Result<(), Error> {
        if self.preset.passes.is_empty() {
            return Err(Error::Preset("preset has no passes".to_string()));
        }
        for lut in &self.preset.luts {
            let image = images.load(&lut.path)?;
            let mips = if lut.mipmap { MipLevels::Full } else { MipLevels::One };
            let config = TextureConfig::new(format!("lut {}", lut.name), image.width, image.height, PixelFormat::Rgba8Unorm)
                .with_mips(mips);
            let mut texture = Texture::create(device, &config)?;
            let uploaded = texture.update(device, &image.pixels, image.width, image.height, image.pitch(), PixelFormat::Rgba8Unorm);
            self.luts.push(texture);
            uploaded?;
        }

        let count = self.preset.passes.len();
        let mut compiled = Vec::with_capacity(count);
        for (i, pass) in self.preset.passes.iter().enumerate() {
            let c = compiler.compile(i, pass, &self.preset)?;
            c.validate(i)?;
            check_references(i, &c, count, self.luts.len())?;
            compiled.push(c);
        }

        let mut feedback = vec![false; count];
        for (i, pass) in self.preset.passes.iter().enumerate() {
            feedback[i] |= pass.feedback;
        }
        for c in &compiled {
            for n in c.reflection.feedback_passes() {
                feedback[n as usize] = true;
            }
        }
        self.history_depth = compiled.iter().map(|c| c.reflection.history_depth()).max().unwrap_or(0);

        for (i, c) in compiled.into_iter().enumerate() {
            let preset = self.preset.passes[i].clone();
            let is_last = i + 1 == count;
            let next_wants_mips = self.preset.passes.get(i + 1).is_some_and(|p| p.mipmap_input);
            let renders_to_final = is_last && fills_viewport(&preset) && !feedback[i] && preset.format.is_none();
            let mut pass = ShaderPass {
                index: i,
                preset,
                compiled: c,
                pipelines: PipelineCache::default(),
                constants: None,
                input_slots: Vec::new(),
                output: Texture::default(),
                feedback: feedback[i].then(Texture::default),
                output_mips: if next_wants_mips { MipLevels::Full } else { MipLevels::One },
                size: (0, 0),
                viewport: Viewport::default(),
                state: PassState::Idle,
                renders_to_final,
            };
            let result = Self::prepare_pass(device, &mut pass, final_format);
            self.passes.push(pass);
            result?;
        }
        Ok(())
    }

    fn prepare_pass(device: &mut BoundDevice, pass: &mut ShaderPass, final_format: PixelFormat) -> Result<(), Error> {
        let reflection = &pass.compiled.reflection;
        if reflection.uniform_size > 0 {
            pass.constants = Some(device.backend_mut().create_buffer(&BufferDescriptor {
                label: format!("pass {} constants", pass.index),
                size: constant_size(reflection.uniform_size),
                usage: BufferUsage::Constant,
            })?);
        }
        for _ in 0..reflection.textures.len() {
            let slot = device.heaps.shader_resource.allocate()?;
            pass.input_slots.push(slot);
        }
        // build the likely pipeline now so compile failures surface while the preset is loading
        let format = if pass.renders_to_final {
            final_format
        } else {
            pass.output_format()
        };
        let descriptor = describe_pass(pass, format, BlendMode::Opaque);
        pass.pipelines
            .get(device, format, BlendMode::Opaque, |_, _| descriptor)
            .map_err(|e| Error::ShaderCompile {
                pass: pass.index,
                message: e.to_string(),
            })?;
        Ok(())
    }

    pub fn preset(&self) -> &Preset {
        &self.preset
    }

    pub fn passes(&self) -> &[ShaderPass] {
        &self.passes
    }

    pub fn pass(&self, index: usize) -> Option<&ShaderPass> {
        self.passes.get(index)
    }

    pub fn len(&self) -> usize {
        self.passes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    pub fn luts(&self) -> &[Texture] {
        &self.luts
    }

    /// Previous frames the passes sample, at most.
    pub fn history_depth(&self) -> u32 {
        self.history_depth
    }

    /// Pass 0 samples the input frame with mips.
    pub fn wants_input_mips(&self) -> bool {
        self.passes.first().is_some_and(|p| p.preset.mipmap_input)
    }

    /// True when `resize` must run before the next render.
    pub fn needs_resize(&self, source: (u32, u32), viewport: (u32, u32)) -> bool {
        self.source_size != source || self.viewport_size != viewport
    }

    /**
    Sizes every pass for an input of `source` pixels and a viewport of `viewport` pixels, and
    (re)creates render targets whose size or format changed.

    The first creation failure aborts the resize.  Passes from that one on keep no render target
    and the chain renders up to the pass before it; [`PassChain::needs_resize`] stays true so the
    next frame tries again.
    */
    pub fn resize(&mut self, device: &mut BoundDevice, source: (u32, u32), viewport: (u32, u32)) -> Result<(), Error> {
        let count = self.passes.len();
        let mut src = source;
        for (i, pass) in self.passes.iter_mut().enumerate() {
            let (sx, sy) = pass.preset.effective_scale(i + 1 == count);
            let size = (sx.resolve(src.0, viewport.0), sy.resolve(src.1, viewport.1));
            pass.size = size;
            pass.viewport = Viewport::full(size.0, size.1);
            src = size;
            if pass.renders_to_final {
                continue;
            }
            let config = TextureConfig::new(format!("pass {i}"), size.0, size.1, pass.output_format())
                .with_usage(TextureUsage::SHADER_RESOURCE | TextureUsage::RENDER_TARGET)
                .with_mips(pass.output_mips);
            let feedback_config = TextureConfig { label: format!("pass {i} feedback"), ..config.clone() };
            let targets = std::iter::once((&mut pass.output, config))
                .chain(pass.feedback.as_mut().map(|f| (f, feedback_config)));
            for (texture, config) in targets {
                if !texture.needs_recreate(&config) {
                    continue;
                }
                texture.release(device);
                match Texture::create(device, &config) {
                    Ok(t) => *texture = t,
                    Err(e) => {
                        logwise::warn_sync!(
                            "Pass {pass} render target failed: {err}",
                            pass = i,
                            err = logwise::privacy::LogIt(&e)
                        );
                        return Err(e);
                    }
                }
            }
        }
        self.source_size = source;
        self.viewport_size = viewport;
        logwise::trace_sync!(
            "Resized chain for {w}x{h} input",
            w = source.0,
            h = source.1
        );
        Ok(())
    }

    /// Copies staged lookup textures and regenerates their mips.
    pub fn flush_luts(
        &mut self,
        device: &mut BoundDevice,
        cmd: &mut CommandList,
        mips: &mut MipGenerators,
    ) -> Result<(), Error> {
        for lut in &mut self.luts {
            if lut.is_dirty() {
                lut.flush(cmd)?;
                lut.invalidate_mips();
            }
            mipmap::refresh(device, cmd, mips, lut)?;
        }
        Ok(())
    }

    /// Swaps each feedback pass's output with last frame's, by handle.
    fn swap_feedback(&mut self) {
        for pass in &mut self.passes {
            if let Some(feedback) = pass.feedback.as_mut() {
                std::mem::swap(&mut pass.output, feedback);
            }
        }
    }

    fn resolve<'a>(&'a self, index: usize, semantic: TextureSemantic, history: &'a FrameHistory) -> Option<&'a Texture> {
        let texture = match semantic {
            TextureSemantic::Original => history.current(),
            TextureSemantic::OriginalHistory(n) => history.slot(n),
            TextureSemantic::Source => match index {
                0 => history.current(),
                i => Some(&self.passes[i - 1].output),
            },
            TextureSemantic::PassOutput(n) => Some(&self.passes.get(n as usize)?.output),
            TextureSemantic::PassFeedback(n) => self.passes.get(n as usize)?.feedback.as_ref(),
            TextureSemantic::User(n) => self.luts.get(n as usize),
        }?;
        texture.is_created().then_some(texture)
    }

    fn texture_size(&self, index: usize, semantic: TextureSemantic, history: &FrameHistory) -> Option<(u32, u32)> {
        match semantic {
            TextureSemantic::Source if index > 0 => Some(self.passes[index - 1].size),
            TextureSemantic::PassOutput(n) | TextureSemantic::PassFeedback(n) => {
                self.passes.get(n as usize).map(|p| p.size)
            }
            _ => self.resolve(index, semantic, history).map(Texture::size),
        }
    }

    /**
    Records every pass in order.

    Returns what the final composite should show.  Missing render targets end the loop early;
    the result then names the last pass that completed.
    */
    pub fn render(
        &mut self,
        device: &mut BoundDevice,
        cmd: &mut CommandList,
        frame: &ChainFrame<'_>,
        mips: &mut MipGenerators,
    ) -> Result<ChainOutput, Error> {
        for pass in &mut self.passes {
            pass.state = PassState::Idle;
        }
        self.swap_feedback();
        let mut produced = ChainOutput::Original;
        for i in 0..self.passes.len() {
            let pass = &self.passes[i];
            if !pass.renders_to_final && !pass.output.is_created() {
                logwise::warn_sync!("Pass {pass} has no render target; chain broken", pass = i);
                return Ok(produced);
            }
            if !self.bind_inputs(device, cmd, i, frame)? {
                logwise::warn_sync!("Pass {pass} is missing an input; chain broken", pass = i);
                return Ok(produced);
            }
            self.bind_target(cmd, i, frame)?;
            self.execute(device, cmd, i, frame)?;

            let pass = &mut self.passes[i];
            if pass.renders_to_final {
                produced = ChainOutput::Final;
            } else {
                pass.output.transition(cmd, ResourceState::ShaderRead)?;
                pass.output.invalidate_mips();
                mipmap::refresh(device, cmd, mips, &mut pass.output)?;
                produced = ChainOutput::Pass(i);
            }
        }
        Ok(produced)
    }

    /// Idle → BoundInputs.  Returns `false` when an input doesn't exist.
    fn bind_inputs(
        &mut self,
        device: &mut BoundDevice,
        cmd: &mut CommandList,
        index: usize,
        frame: &ChainFrame<'_>,
    ) -> Result<bool, Error> {
        let pass = &self.passes[index];
        let filter = pass.filter(frame.smooth);
        let mut writes = Vec::with_capacity(pass.input_slots.len());
        for (binding, slot) in pass.compiled.reflection.textures.iter().zip(&pass.input_slots) {
            let Some(texture) = self.resolve(index, binding.semantic, frame.history) else {
                return Ok(false);
            };
            let Some(resource) = texture.resource() else {
                return Ok(false);
            };
            if texture.state().uniform() != Some(ResourceState::ShaderRead) {
                return Err(Error::InvalidTransition {
                    before: texture.state().mip(0),
                    after: ResourceState::ShaderRead,
                });
            }
            let sampler = match binding.semantic {
                TextureSemantic::User(n) => {
                    let lut = &self.preset.luts[n as usize];
                    SamplerDescriptor {
                        filter: lut.filter,
                        wrap: lut.wrap,
                        mipmapped: texture.mip_levels() > 1,
                    }
                }
                _ => SamplerDescriptor {
                    filter,
                    wrap: pass.preset.wrap,
                    mipmapped: texture.mip_levels() > 1,
                },
            };
            writes.push((
                *binding,
                *slot,
                ViewDescriptor::ShaderResource {
                    texture: resource,
                    format: texture.format(),
                    base_mip: 0,
                    mip_count: texture.mip_levels(),
                },
                device.samplers.lookup(sampler),
            ));
        }
        for (binding, slot, view, sampler) in writes {
            device.backend_mut().write_descriptor(slot, &view)?;
            cmd.record(Command::Bind {
                binding: binding.binding,
                resource: Binding::Texture(slot),
            })?;
            if let Some(sampler_binding) = binding.sampler_binding {
                cmd.record(Command::Bind {
                    binding: sampler_binding,
                    resource: Binding::Sampler(sampler),
                })?;
            }
        }
        self.passes[index].state = PassState::BoundInputs;
        Ok(true)
    }

    /// BoundInputs → RenderTargetBound.
    fn bind_target(&mut self, cmd: &mut CommandList, index: usize, frame: &ChainFrame<'_>) -> Result<(), Error> {
        let pass = &mut self.passes[index];
        if pass.renders_to_final {
            frame.target.bind(cmd, frame.viewport)?;
        } else {
            pass.output.transition(cmd, ResourceState::RenderTarget)?;
            let target = TargetView::of(&pass.output)
                .ok_or_else(|| Error::UnknownResource(pass.output.label().to_string()))?;
            target.bind(cmd, pass.viewport)?;
        }
        pass.state = PassState::RenderTargetBound;
        Ok(())
    }

    /// RenderTargetBound → Executed: rewrite the constants and draw the quad.
    fn execute(
        &mut self,
        device: &mut BoundDevice,
        cmd: &mut CommandList,
        index: usize,
        frame: &ChainFrame<'_>,
    ) -> Result<(), Error> {
        let constants = self.passes[index].constants.map(|buffer| {
            let pass = &self.passes[index];
            let reflection = &pass.compiled.reflection;
            let mut writer = UniformWriter::new(reflection.uniform_size);
            let context = PassUniformContext {
                output_size: pass.size,
                frame_count_mod: pass.preset.frame_count_mod,
                is_final: pass.renders_to_final,
            };
            uniforms::fill(
                &mut writer,
                reflection,
                frame.uniforms,
                context,
                |t| self.texture_size(index, t, frame.history),
                |name| self.preset.parameter(name),
            );
            (buffer, reflection.uniform_binding, writer)
        });

        let pass = &mut self.passes[index];
        let format = if pass.renders_to_final {
            frame.target.format
        } else {
            pass.output.format()
        };
        let descriptor = describe_pass(pass, format, BlendMode::Opaque);
        let pipeline = pass
            .pipelines
            .get(device, format, BlendMode::Opaque, |_, _| descriptor)?;
        cmd.record(Command::SetPipeline(pipeline))?;
        if let Some((buffer, Some(binding), writer)) = constants {
            device.backend_mut().write_buffer(buffer, 0, writer.bytes())?;
            cmd.record(Command::Bind {
                binding,
                resource: Binding::ConstantBuffer {
                    buffer,
                    offset: 0,
                    size: writer.bytes().len() as u64,
                },
            })?;
        }
        cmd.record(Command::SetVertexBuffer {
            buffer: frame.quad,
            offset: 0,
            stride: QUAD_STRIDE,
        })?;
        cmd.record(Command::Draw {
            vertex_count: 4,
            instance_count: 1,
            first_vertex: 0,
            first_instance: 0,
        })?;
        pass.state = PassState::Executed;
        Ok(())
    }

    /// Releases every texture, buffer, descriptor and pipeline.  The chain is empty afterwards.
    pub fn release(&mut self, device: &mut BoundDevice) {
        for mut pass in self.passes.drain(..) {
            pass.release(device);
        }
        for mut lut in self.luts.drain(..) {
            lut.release(device);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn viewport_filling_passes() {
        let unscaled = PassPreset::new("a", "");
        assert!(fills_viewport(&unscaled));
        let full = PassPreset::new("a", "").with_scale(Scale::Viewport(1.0));
        assert!(fills_viewport(&full));
        let half = PassPreset::new("a", "").with_scale(Scale::Viewport(0.5));
        assert!(!fills_viewport(&half));
        let source = PassPreset::new("a", "").with_scale(Scale::Source(1.0));
        assert!(!fills_viewport(&source));
    }
}
