// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Texture creation, upload and release against the headless backend.

use framechain::{Device, Error};
use framechain::bindings::visible_to::{FormatSupport, MipLevels, TextureConfig, TextureUsage};
use framechain::headless::HeadlessBackend;
use framechain::images::command_list::{Command, CommandList};
use framechain::images::device::{BoundDevice, HeapCapacities};
use framechain::images::texture::Texture;
use framechain::pixel_formats::PixelFormat;
use std::collections::HashSet;

fn bind(backend: HeadlessBackend) -> BoundDevice {
    BoundDevice::bind(Box::new(backend), HeapCapacities::default(), None).unwrap()
}

#[test]
fn render_targets_fall_back_to_a_capable_format() {
    let backend = HeadlessBackend::new(320, 240).with_format_support(PixelFormat::Rgba8Unorm, FormatSupport::SHADER_SAMPLE);
    let mut device = bind(backend);
    let config = TextureConfig::new("pass output", 160, 120, PixelFormat::Rgba8Unorm)
        .with_usage(TextureUsage::SHADER_RESOURCE | TextureUsage::RENDER_TARGET);
    let mut texture = Texture::create(&mut device, &config).unwrap();

    assert_eq!(texture.requested_format(), PixelFormat::Rgba8Unorm);
    assert_ne!(texture.format(), PixelFormat::Rgba8Unorm);
    let support = device.backend().format_support(texture.format());
    assert!(support.contains(FormatSupport::RENDER_TARGET));
    assert!(texture.render_target_view().is_some());
    texture.release(&mut device);
}

#[test]
fn no_capable_format_is_an_error() {
    let backend = HeadlessBackend::new(320, 240).with_format_support(PixelFormat::Rgba16Float, FormatSupport::empty());
    let mut device = bind(backend);
    let config = TextureConfig::new("hdr", 64, 64, PixelFormat::Rgba16Float);
    let err = Texture::create(&mut device, &config).unwrap_err();
    assert!(matches!(err, Error::FormatUnsupported { .. }), "{err}");
}

#[test]
fn release_is_idempotent() {
    let backend = HeadlessBackend::new(320, 240);
    let probe = backend.probe();
    let mut device = bind(backend);
    let textures_before = probe.stats().live_textures;
    let views_before = device.heaps().shader_resource.live();

    let config = TextureConfig::new("lut", 256, 256, PixelFormat::Rgba8Unorm).with_mips(MipLevels::Full);
    let mut texture = Texture::create(&mut device, &config).unwrap();
    assert_eq!(texture.mip_levels(), 9);
    assert_eq!(probe.stats().live_textures, textures_before + 1);

    texture.release(&mut device);
    texture.release(&mut device);
    assert!(!texture.is_created());
    assert_eq!(probe.stats().live_textures, textures_before);
    assert_eq!(device.heaps().shader_resource.live(), views_before);

    let mut never = Texture::default();
    never.release(&mut device);
}

#[test]
fn released_slots_are_never_shared_by_live_textures() {
    let mut device = bind(HeadlessBackend::new(320, 240));
    let config = |label: &str| TextureConfig::new(label, 64, 64, PixelFormat::Rgba8Unorm).with_mips(MipLevels::Full);

    let mut a = Texture::create(&mut device, &config("a")).unwrap();
    let mut b = Texture::create(&mut device, &config("b")).unwrap();
    a.release(&mut device);
    let mut c = Texture::create(&mut device, &config("c")).unwrap();

    let b_slots: HashSet<_> = b.descriptors().into_iter().collect();
    let c_slots: HashSet<_> = c.descriptors().into_iter().collect();
    assert!(!b_slots.is_empty());
    assert!(b_slots.is_disjoint(&c_slots));
    for slot in b_slots.iter().chain(&c_slots) {
        assert!(device.heaps().shader_resource.is_live(*slot));
    }
    b.release(&mut device);
    c.release(&mut device);
}

#[test]
fn uploads_copy_every_level() {
    let mut device = bind(HeadlessBackend::new(320, 240));
    // B5G6R5 has no unordered access on the headless device, so mips are built on the CPU
    let config = TextureConfig::new("frame", 8, 8, PixelFormat::B5G6R5Unorm).with_mips(MipLevels::Full);
    let mut texture = Texture::create(&mut device, &config).unwrap();
    let pixels = vec![0xffu8; 8 * 8 * 2];

    let mut cmd = CommandList::new("upload");
    cmd.reset();
    texture
        .upload(&mut device, &mut cmd, &pixels, 8, 8, 16, PixelFormat::B5G6R5Unorm)
        .unwrap();
    let copies = cmd
        .commands()
        .iter()
        .filter(|c| matches!(c, Command::CopyBufferToTexture { .. }))
        .count();
    assert_eq!(copies, texture.mip_levels() as usize);
    assert!(!texture.is_dirty());

    let short = vec![0u8; 10];
    let err = texture
        .update(&mut device, &short, 8, 8, 16, PixelFormat::B5G6R5Unorm)
        .unwrap_err();
    assert!(matches!(err, Error::ImageLayout(_)));
    texture.release(&mut device);
}
