// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
The video driver a frontend talks to.

An [`Engine`] owns the bound device, the present loop, the current shader chain and the overlay
scene.  Everything happens on the thread that calls it.
*/

use crate::Error;
use crate::config::{FrameInfo, HdrConfig, VideoConfig};
use crate::images::device::BoundDevice;
use crate::images::font::{DebugFont, FontProvider, TextStyle};
use crate::images::image_loader::{Image, ImageLoader, PngLoader};
use crate::images::overlay::{Scene, TextureHandle};
use crate::images::pass_chain::PassChain;
use crate::images::port::{FrameContext, InputFrame, Port};
use crate::images::preset::{Preset, PresetLoader, SlangPresetLoader};
use crate::images::shader::ShaderCompiler;
use crate::images::sprites::Sprite;
use crate::images::viewport::ViewportInfo;
use crate::imp::Backend;
use std::path::Path;

/// The external pieces an [`Engine`] calls into.
#[derive(Debug)]
pub struct Collaborators {
    pub compiler: Box<dyn ShaderCompiler>,
    pub presets: Box<dyn PresetLoader>,
    pub images: Box<dyn ImageLoader>,
    pub font: Box<dyn FontProvider>,
}

impl Collaborators {
    /// `compiler` with the file-based preset loader, PNG images and the built-in font.
    pub fn new(compiler: Box<dyn ShaderCompiler>) -> Self {
        Collaborators {
            compiler,
            presets: Box::new(SlangPresetLoader),
            images: Box::new(PngLoader),
            font: Box::new(DebugFont::new()),
        }
    }

    pub fn with_presets(mut self, presets: Box<dyn PresetLoader>) -> Self {
        self.presets = presets;
        self
    }

    pub fn with_images(mut self, images: Box<dyn ImageLoader>) -> Self {
        self.images = images;
        self
    }

    pub fn with_font(mut self, font: Box<dyn FontProvider>) -> Self {
        self.font = font;
        self
    }
}

#[cfg(feature = "backend_wgpu")]
impl Default for Collaborators {
    fn default() -> Self {
        Collaborators::new(Box::new(crate::imp::wgpu::WgslCompiler))
    }
}

#[derive(Debug)]
pub struct Engine {
    //release order is significant: everything below is released before the device
    chain: Option<PassChain>,
    scene: Scene,
    port: Port,
    device: BoundDevice,
    config: VideoConfig,
    compiler: Box<dyn ShaderCompiler>,
    presets: Box<dyn PresetLoader>,
    images: Box<dyn ImageLoader>,
    nonblock: bool,
}

impl Engine {
    /**
    Binds `backend` and builds the present loop.

    Failures here are device-level; there is no retry.
    */
    pub fn new(backend: Box<dyn Backend>, config: VideoConfig, collaborators: Collaborators) -> Result<Engine, Error> {
        let mut device = BoundDevice::bind(backend, config.heaps, config.fence_timeout)?;
        let mut port = Port::new(&mut device, &config)?;
        let mut scene = match Scene::new(&mut device, config.sprite_capacity, collaborators.font) {
            Ok(s) => s,
            Err(e) => {
                port.release(&mut device);
                return Err(e);
            }
        };
        scene.menu.set_enable(false, config.menu_fullscreen);
        scene.overlays.enable(config.overlay_enable);
        scene.overlays.full_screen(config.overlay_fullscreen);
        logwise::info_sync!(
            "Engine ready at {width}x{height}",
            width = config.width,
            height = config.height
        );
        Ok(Engine {
            chain: None,
            scene,
            port,
            device,
            config,
            compiler: collaborators.compiler,
            presets: collaborators.presets,
            images: collaborators.images,
            nonblock: false,
        })
    }

    pub fn device(&self) -> &BoundDevice {
        &self.device
    }

    pub fn config(&self) -> &VideoConfig {
        &self.config
    }

    pub fn port(&self) -> &Port {
        &self.port
    }

    pub fn chain(&self) -> Option<&PassChain> {
        self.chain.as_ref()
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    /**
    Loads the preset at `path` and replaces the current chain with it; `None` removes the chain.

    On failure the previous chain keeps running and the error is returned.
    */
    pub fn set_shader(&mut self, path: Option<&Path>) -> Result<(), Error> {
        let Some(path) = path else {
            self.device.sync()?;
            if let Some(mut old) = self.chain.take() {
                old.release(&mut self.device);
            }
            self.port.invalidate_chain();
            logwise::info_sync!("Shader chain removed");
            return Ok(());
        };
        let preset = self.presets.load(path).inspect_err(|e| {
            logwise::error_sync!(
                "Preset {path} failed to load: {err}",
                path = path.display().to_string(),
                err = logwise::privacy::LogIt(e)
            );
        })?;
        self.set_shader_preset(preset)
    }

    /// [`Engine::set_shader`] for a preset that is already loaded.
    pub fn set_shader_preset(&mut self, preset: Preset) -> Result<(), Error> {
        self.device.sync()?;
        let format = self.port.target_format(&self.device);
        let chain = PassChain::build(
            &mut self.device,
            preset,
            self.compiler.as_ref(),
            self.images.as_ref(),
            format,
        );
        match chain {
            Ok(chain) => {
                if let Some(mut old) = self.chain.replace(chain) {
                    old.release(&mut self.device);
                }
                self.port.invalidate_chain();
                Ok(())
            }
            Err(e) => {
                logwise::error_sync!(
                    "Shader chain not replaced: {err}",
                    err = logwise::privacy::LogIt(&e)
                );
                Err(e)
            }
        }
    }

    /**
    Presents one input frame.

    `input` of `None` presents the previous frame again.  `message` is shown for this frame only.
    */
    pub fn frame(
        &mut self,
        input: Option<InputFrame<'_>>,
        frame_count: u64,
        message: Option<&str>,
        info: &FrameInfo,
    ) -> Result<(), Error> {
        if let Some(message) = message {
            self.scene.push_message(message, TextStyle::default());
        }
        let mut ctx = FrameContext {
            config: &self.config,
            chain: self.chain.as_mut(),
            scene: &mut self.scene,
            input,
            info: *info,
            frame_count,
            nonblock: self.nonblock,
        };
        self.port.frame(&mut self.device, &mut ctx)
    }

    pub fn set_filtering(&mut self, smooth: bool) {
        self.config.smooth = smooth;
    }

    /// `rotation` in 90° steps.
    pub fn set_rotation(&mut self, rotation: u32) {
        self.config.rotation = rotation % 4;
        self.port.invalidate_viewport();
    }

    /// Nonblocking mode presents without vsync and without repeated frames.
    pub fn set_nonblock_state(&mut self, toggle: bool) {
        self.nonblock = toggle;
        self.port.set_vsync(!toggle && self.config.vsync);
    }

    /// `None` follows the core's aspect.
    pub fn set_aspect_ratio(&mut self, aspect: Option<f32>) {
        self.config.aspect_ratio = aspect;
        self.port.invalidate_viewport();
    }

    pub fn apply_state_changes(&mut self) {
        self.port.invalidate_viewport();
    }

    pub fn viewport_info(&self) -> ViewportInfo {
        self.port.viewport()
    }

    /// Queues on-screen text for the next frame.
    pub fn set_osd_msg(&mut self, text: impl Into<String>, style: TextStyle) {
        self.scene.push_message(text, style);
    }

    /// Resizes the swapchain before the next frame.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.config.width = width;
        self.config.height = height;
        self.port.resize(width, height);
    }

    /// Switches HDR output; `None` returns to SDR.
    pub fn set_hdr(&mut self, settings: Option<HdrConfig>) -> Result<(), Error> {
        self.port.set_hdr(&mut self.device, settings)?;
        self.config.hdr = settings;
        Ok(())
    }

    pub fn load_texture(&mut self, image: &Image, smooth: bool) -> Result<TextureHandle, Error> {
        self.scene.textures.load(&mut self.device, image, smooth)
    }

    /// Returns `false` for an unknown handle.
    pub fn unload_texture(&mut self, handle: TextureHandle) -> Result<bool, Error> {
        self.device.sync()?;
        Ok(self.scene.textures.unload(&mut self.device, handle))
    }

    /// Draws `sprite` with a loaded texture on the next frame.
    pub fn draw_sprite(&mut self, handle: TextureHandle, sprite: Sprite) -> bool {
        self.scene.push_sprite(handle, sprite)
    }

    pub fn overlay_load(&mut self, images: &[Image]) -> Result<(), Error> {
        self.device.sync()?;
        self.scene.overlays.load(&mut self.device, images)
    }

    pub fn overlay_enable(&mut self, state: bool) {
        self.scene.overlays.enable(state);
    }

    pub fn overlay_full_screen(&mut self, enable: bool) {
        self.scene.overlays.full_screen(enable);
    }

    pub fn overlay_vertex_geom(&mut self, index: usize, x: f32, y: f32, w: f32, h: f32) -> bool {
        self.scene.overlays.set_vertex_geom(index, x, y, w, h)
    }

    pub fn overlay_tex_geom(&mut self, index: usize, x: f32, y: f32, w: f32, h: f32) -> bool {
        self.scene.overlays.set_tex_coords(index, x, y, w, h)
    }

    pub fn overlay_set_alpha(&mut self, index: usize, alpha: f32) -> bool {
        self.scene.overlays.set_alpha(index, alpha)
    }

    pub fn set_menu_texture_frame(
        &mut self,
        pixels: &[u8],
        rgb32: bool,
        width: u32,
        height: u32,
        alpha: f32,
    ) -> Result<(), Error> {
        if self.scene.menu.texture().size() != (width, height) {
            self.device.sync()?;
        }
        self.scene
            .menu
            .set_frame(&mut self.device, pixels, rgb32, width, height, alpha)
    }

    pub fn set_menu_texture_enable(&mut self, state: bool, fullscreen: bool) {
        self.scene.menu.set_enable(state, fullscreen);
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Err(e) = self.device.sync() {
            logwise::error_sync!(
                "Engine dropped without an idle device: {err}",
                err = logwise::privacy::LogIt(&e)
            );
        }
        if let Some(mut chain) = self.chain.take() {
            chain.release(&mut self.device);
        }
        self.scene.release(&mut self.device);
        self.port.release(&mut self.device);
    }
}
