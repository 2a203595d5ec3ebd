// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Everything drawn over the shaded frame.

The [`Scene`] owns the menu texture, the overlay image set, user-loaded textures, queued OSD
messages and the font atlas, and draws them through one [`SpriteBatch`] in a fixed order:

1. the menu, when enabled
2. overlays, when enabled
3. OSD messages
4. frame statistics

Each layer is drawn either over the whole back buffer or only over the content viewport.
*/

use crate::Error;
use crate::bindings::descriptor_heap::DescriptorHandle;
use crate::bindings::resource_tracking::ResourceState;
use crate::bindings::sampler::{FilterMode, WrapMode};
use crate::bindings::visible_to::TextureConfig;
use crate::images::command_list::CommandList;
use crate::images::device::BoundDevice;
use crate::images::font::{FontProvider, TextStyle, layout_text};
use crate::images::image_loader::Image;
use crate::images::quad::TargetView;
use crate::images::sprites::{Sprite, SpriteBatch, SpriteKind};
use crate::images::texture::Texture;
use crate::images::viewport::Viewport;
use crate::pixel_formats::PixelFormat;

/// A texture owned by the caller's code, identified without exposing the texture itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureHandle(u64);

#[derive(Debug)]
struct UserTexture {
    handle: TextureHandle,
    texture: Texture,
    smooth: bool,
}

/// Images loaded for the caller, such as menu icons.
#[derive(Debug, Default)]
pub struct TextureRegistry {
    next: u64,
    textures: Vec<UserTexture>,
}

impl TextureRegistry {
    /// Creates a texture from `image`; its pixels are copied by the next frame.
    pub fn load(&mut self, device: &mut BoundDevice, image: &Image, smooth: bool) -> Result<TextureHandle, Error> {
        self.next += 1;
        let handle = TextureHandle(self.next);
        let config = TextureConfig::new(format!("user texture {}", self.next), image.width, image.height, PixelFormat::Rgba8Unorm);
        let mut texture = Texture::create(device, &config)?;
        if let Err(e) = texture.update(device, &image.pixels, image.width, image.height, image.pitch(), PixelFormat::Rgba8Unorm) {
            texture.release(device);
            return Err(e);
        }
        self.textures.push(UserTexture {
            handle,
            texture,
            smooth,
        });
        Ok(handle)
    }

    /// Returns `false` when `handle` was not loaded.
    pub fn unload(&mut self, device: &mut BoundDevice, handle: TextureHandle) -> bool {
        let Some(i) = self.textures.iter().position(|t| t.handle == handle) else {
            return false;
        };
        let mut entry = self.textures.swap_remove(i);
        entry.texture.release(device);
        true
    }

    pub fn get(&self, handle: TextureHandle) -> Option<&Texture> {
        self.textures.iter().find(|t| t.handle == handle).map(|t| &t.texture)
    }

    /// The sampler filter chosen when `handle` was loaded.
    pub fn is_smooth(&self, handle: TextureHandle) -> Option<bool> {
        self.textures.iter().find(|t| t.handle == handle).map(|t| t.smooth)
    }

    pub fn len(&self) -> usize {
        self.textures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.textures.is_empty()
    }

    fn flush(&mut self, cmd: &mut CommandList) -> Result<(), Error> {
        for t in &mut self.textures {
            t.texture.flush(cmd)?;
        }
        Ok(())
    }

    fn release(&mut self, device: &mut BoundDevice) {
        for mut t in self.textures.drain(..) {
            t.texture.release(device);
        }
    }
}

/// The frontend's menu, drawn as one textured quad.
#[derive(Debug)]
pub struct MenuTexture {
    texture: Texture,
    alpha: f32,
    enabled: bool,
    fullscreen: bool,
}

impl Default for MenuTexture {
    fn default() -> Self {
        MenuTexture {
            texture: Texture::default(),
            alpha: 1.0,
            enabled: false,
            fullscreen: false,
        }
    }
}

impl MenuTexture {
    /**
    Replaces the menu pixels.

    `rgb32` frames are BGRA8 with a pitch of `width * 4`; other frames are 16-bit BGRA4444.  The
    texture is recreated only when the size changes.
    */
    pub fn set_frame(
        &mut self,
        device: &mut BoundDevice,
        pixels: &[u8],
        rgb32: bool,
        width: u32,
        height: u32,
        alpha: f32,
    ) -> Result<(), Error> {
        let src_format = if rgb32 {
            PixelFormat::Bgra8Unorm
        } else {
            PixelFormat::B4G4R4A4Unorm
        };
        let config = TextureConfig::new("menu", width, height, PixelFormat::Rgba8Unorm);
        if self.texture.needs_recreate(&config) {
            self.texture.release(device);
            self.texture = Texture::create(device, &config)?;
        }
        self.alpha = alpha;
        self.texture
            .update(device, pixels, width, height, src_format.row_bytes(width), src_format)
    }

    pub fn set_enable(&mut self, state: bool, fullscreen: bool) {
        self.enabled = state;
        self.fullscreen = fullscreen;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_fullscreen(&self) -> bool {
        self.fullscreen
    }

    pub fn texture(&self) -> &Texture {
        &self.texture
    }

    fn release(&mut self, device: &mut BoundDevice) {
        self.texture.release(device);
    }
}

#[derive(Debug)]
struct Overlay {
    texture: Texture,
    /// `[x, y, w, h]`, normalized.
    geometry: [f32; 4],
    coords: [f32; 4],
    alpha: f32,
}

/// A set of images the frontend lays over the content, such as an on-screen gamepad.
#[derive(Debug, Default)]
pub struct OverlaySet {
    overlays: Vec<Overlay>,
    enabled: bool,
    fullscreen: bool,
}

impl OverlaySet {
    /// Replaces the set with `images`.  Every overlay starts covering the target at full alpha.
    pub fn load(&mut self, device: &mut BoundDevice, images: &[Image]) -> Result<(), Error> {
        self.release(device);
        for (i, image) in images.iter().enumerate() {
            let config = TextureConfig::new(format!("overlay {i}"), image.width, image.height, PixelFormat::Rgba8Unorm);
            let mut texture = Texture::create(device, &config)?;
            if let Err(e) =
                texture.update(device, &image.pixels, image.width, image.height, image.pitch(), PixelFormat::Rgba8Unorm)
            {
                texture.release(device);
                return Err(e);
            }
            self.overlays.push(Overlay {
                texture,
                geometry: [0.0, 0.0, 1.0, 1.0],
                coords: [0.0, 0.0, 1.0, 1.0],
                alpha: 1.0,
            });
        }
        logwise::info_sync!("Loaded {count} overlays", count = self.overlays.len());
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.overlays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.overlays.is_empty()
    }

    pub fn enable(&mut self, state: bool) {
        self.enabled = state;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn full_screen(&mut self, enable: bool) {
        self.fullscreen = enable;
    }

    /// Returns `false` when there is no overlay `index`.
    pub fn set_vertex_geom(&mut self, index: usize, x: f32, y: f32, w: f32, h: f32) -> bool {
        self.overlays.get_mut(index).map(|o| o.geometry = [x, y, w, h]).is_some()
    }

    pub fn set_tex_coords(&mut self, index: usize, x: f32, y: f32, w: f32, h: f32) -> bool {
        self.overlays.get_mut(index).map(|o| o.coords = [x, y, w, h]).is_some()
    }

    pub fn set_alpha(&mut self, index: usize, alpha: f32) -> bool {
        self.overlays.get_mut(index).map(|o| o.alpha = alpha).is_some()
    }

    fn flush(&mut self, cmd: &mut CommandList) -> Result<(), Error> {
        for o in &mut self.overlays {
            o.texture.flush(cmd)?;
        }
        Ok(())
    }

    fn release(&mut self, device: &mut BoundDevice) {
        for mut o in self.overlays.drain(..) {
            o.texture.release(device);
        }
    }
}

/// Where scene layers are drawn this frame.
#[derive(Debug, Clone, Copy)]
pub struct SceneTarget {
    pub target: TargetView,
    /// The whole back buffer.
    pub full: Viewport,
    /// The letterboxed content rectangle.
    pub content: Viewport,
    pub smooth: bool,
}

#[derive(Debug)]
pub struct Scene {
    pub menu: MenuTexture,
    pub overlays: OverlaySet,
    pub textures: TextureRegistry,
    messages: Vec<(String, TextStyle)>,
    /// Caller sprites for this frame, drawn with the overlays.
    user_sprites: Vec<(TextureHandle, Sprite)>,
    font: Box<dyn FontProvider>,
    font_texture: Texture,
    sprites: SpriteBatch,
}

fn shader_view(texture: &Texture) -> Result<DescriptorHandle, Error> {
    if texture.state().uniform() != Some(ResourceState::ShaderRead) {
        return Err(Error::InvalidTransition {
            before: texture.state().mip(0),
            after: ResourceState::ShaderRead,
        });
    }
    texture
        .shader_view()
        .ok_or_else(|| Error::UnknownResource(texture.label().to_string()))
}

impl Scene {
    pub fn new(device: &mut BoundDevice, sprite_capacity: usize, font: Box<dyn FontProvider>) -> Result<Scene, Error> {
        let atlas = font.atlas();
        let config = TextureConfig::new("font atlas", atlas.width, atlas.height, PixelFormat::A8Unorm);
        let mut font_texture = Texture::create(device, &config)?;
        let uploaded = font_texture.update(
            device,
            &atlas.coverage,
            atlas.width,
            atlas.height,
            atlas.width as usize,
            PixelFormat::A8Unorm,
        );
        let sprites = match uploaded.and_then(|_| SpriteBatch::new(device, sprite_capacity)) {
            Ok(s) => s,
            Err(e) => {
                font_texture.release(device);
                return Err(e);
            }
        };
        Ok(Scene {
            menu: MenuTexture::default(),
            overlays: OverlaySet::default(),
            textures: TextureRegistry::default(),
            messages: Vec::new(),
            user_sprites: Vec::new(),
            font,
            font_texture,
            sprites,
        })
    }

    /// Shows `text` for the next frame only.
    pub fn push_message(&mut self, text: impl Into<String>, style: TextStyle) {
        self.messages.push((text.into(), style));
    }

    /// Draws a loaded texture for the next frame only.  Returns `false` for unknown handles.
    pub fn push_sprite(&mut self, handle: TextureHandle, sprite: Sprite) -> bool {
        if self.textures.get(handle).is_none() {
            return false;
        }
        self.user_sprites.push((handle, sprite));
        true
    }

    pub fn pending_messages(&self) -> usize {
        self.messages.len()
    }

    pub fn sprites(&self) -> &SpriteBatch {
        &self.sprites
    }

    /// Records every pending texture upload.  Runs before anything samples them.
    pub fn flush(&mut self, cmd: &mut CommandList) -> Result<(), Error> {
        self.font_texture.flush(cmd)?;
        self.menu.texture.flush(cmd)?;
        self.overlays.flush(cmd)?;
        self.textures.flush(cmd)
    }

    /// Draws every enabled layer, then forgets this frame's messages.
    pub fn draw(
        &mut self,
        device: &mut BoundDevice,
        cmd: &mut CommandList,
        at: &SceneTarget,
        statistics: Option<&str>,
    ) -> Result<(), Error> {
        self.sprites.begin_frame();
        let samplers = &device.samplers;
        let sampler = |smooth: bool| -> DescriptorHandle { samplers.get(FilterMode::from_smooth(smooth), WrapMode::ClampToEdge) };
        let linear = sampler(true);
        let sampler_nearest = sampler(false);
        let filtered = sampler(at.smooth);

        if self.menu.enabled && self.menu.texture.is_created() {
            let view = shader_view(&self.menu.texture)?;
            self.sprites
                .push(view, linear, SpriteKind::Image, Sprite::fullscreen(self.menu.alpha));
            let viewport = if self.menu.fullscreen { at.full } else { at.content };
            self.sprites.submit(device, cmd, &at.target, viewport)?;
        }

        if self.overlays.enabled && !self.overlays.is_empty() {
            for o in &self.overlays.overlays {
                let view = shader_view(&o.texture)?;
                let sprite = Sprite::new(o.geometry, o.coords, [1.0, 1.0, 1.0, o.alpha]);
                self.sprites.push(view, filtered, SpriteKind::Image, sprite);
            }
            let viewport = if self.overlays.fullscreen { at.full } else { at.content };
            self.sprites.submit(device, cmd, &at.target, viewport)?;
        }

        let user_sprites = std::mem::take(&mut self.user_sprites);
        for (handle, sprite) in &user_sprites {
            let Some(texture) = self.textures.get(*handle) else {
                continue;
            };
            let smooth = self.textures.is_smooth(*handle).unwrap_or(at.smooth);
            let view = shader_view(texture)?;
            let sampler = if smooth { linear } else { sampler_nearest };
            self.sprites.push(view, sampler, SpriteKind::Image, *sprite);
        }
        self.sprites.submit(device, cmd, &at.target, at.full)?;

        let text_size = (at.full.width as u32, at.full.height as u32);
        let messages = std::mem::take(&mut self.messages);
        let statistics = statistics.map(|s| {
            let style = TextStyle {
                scale: 1.0,
                color: [1.0, 1.0, 1.0, 1.0],
                shadow: Some(Default::default()),
                ..TextStyle::default()
            };
            (s.to_string(), style)
        });
        for (text, style) in messages.iter().chain(statistics.iter()) {
            let view = shader_view(&self.font_texture)?;
            let glyphs = layout_text(self.font.as_ref(), text, style, text_size);
            self.sprites.push_all(view, linear, SpriteKind::Glyph, glyphs);
            self.sprites.submit(device, cmd, &at.target, at.full)?;
        }
        Ok(())
    }

    pub fn release(&mut self, device: &mut BoundDevice) {
        self.menu.release(device);
        self.overlays.release(device);
        self.textures.release(device);
        self.font_texture.release(device);
        self.sprites.release(device);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::images::device::HeapCapacities;
    use crate::images::font::DebugFont;
    use crate::imp::headless::HeadlessBackend;

    fn device() -> (BoundDevice, crate::imp::headless::HeadlessProbe) {
        let backend = HeadlessBackend::new(64, 64);
        let probe = backend.probe();
        (BoundDevice::bind(Box::new(backend), HeapCapacities::default(), None).unwrap(), probe)
    }

    #[test]
    fn unloading_returns_the_texture() {
        let (mut device, probe) = device();
        let mut registry = TextureRegistry::default();
        let live = probe.stats().live_textures;
        let a = registry.load(&mut device, &Image::solid(4, 4, [255; 4]), true).unwrap();
        let b = registry.load(&mut device, &Image::solid(2, 2, [0; 4]), false).unwrap();
        assert_ne!(a, b);
        assert_eq!(registry.is_smooth(b), Some(false));
        assert!(registry.unload(&mut device, a));
        assert!(!registry.unload(&mut device, a));
        assert_eq!(probe.stats().live_textures, live + 1);
        registry.release(&mut device);
        assert_eq!(probe.stats().live_textures, live);
    }

    #[test]
    fn overlay_setters_check_the_index() {
        let (mut device, _) = device();
        let mut set = OverlaySet::default();
        set.load(&mut device, &[Image::solid(2, 2, [9; 4])]).unwrap();
        assert!(set.set_alpha(0, 0.5));
        assert!(set.set_vertex_geom(0, 0.1, 0.1, 0.5, 0.5));
        assert!(!set.set_tex_coords(1, 0.0, 0.0, 1.0, 1.0));
        set.release(&mut device);
    }

    #[test]
    fn menu_keeps_its_texture_while_the_size_holds() {
        let (mut device, _) = device();
        let mut menu = MenuTexture::default();
        let frame = vec![0u8; 8 * 4 * 4];
        menu.set_frame(&mut device, &frame, true, 8, 4, 1.0).unwrap();
        let first = menu.texture().resource();
        menu.set_frame(&mut device, &frame, true, 8, 4, 0.5).unwrap();
        assert_eq!(menu.texture().resource(), first);
        let small = vec![0u8; 4 * 4 * 2];
        menu.set_frame(&mut device, &small, false, 4, 4, 0.5).unwrap();
        assert_ne!(menu.texture().resource(), first);
        menu.release(&mut device);
    }

    #[test]
    fn messages_last_one_frame() {
        let (mut device, _) = device();
        let mut scene = Scene::new(&mut device, 64, Box::new(DebugFont::new())).unwrap();
        scene.push_message("hello", TextStyle::default());
        let mut cmd = CommandList::new("scene");
        cmd.reset();
        scene.flush(&mut cmd).unwrap();
        let target = device.heaps.render_target.allocate().unwrap();
        let at = SceneTarget {
            target: TargetView {
                view: target,
                format: PixelFormat::Bgra8Unorm,
                width: 64,
                height: 64,
            },
            full: Viewport::full(64, 64),
            content: Viewport::full(64, 64),
            smooth: true,
        };
        scene.draw(&mut device, &mut cmd, &at, Some("60 fps")).unwrap();
        assert_eq!(scene.pending_messages(), 0);
        assert!(!scene.push_sprite(TextureHandle(99), Sprite::fullscreen(1.0)));
        assert_eq!(cmd.draw_count(), 2);
        scene.release(&mut device);
    }
}
