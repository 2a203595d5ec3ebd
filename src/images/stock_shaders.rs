// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Shaders the orchestrator itself needs: composite blit, sprites, glyphs, mips and HDR.

use crate::Error;
use crate::bindings::visible_to::FormatSupport;
use crate::imp::{BindingKind, BindingLayout, ShaderCode, ShaderStage};
use crate::pixel_formats::PixelFormat;

const BLIT: &str = include_str!("../shaders/blit.wgsl");
const SPRITE: &str = include_str!("../shaders/sprite.wgsl");
const MIP_DOWNSAMPLE: &str = include_str!("../shaders/mip_downsample.wgsl");
const HDR: &str = include_str!("../shaders/hdr.wgsl");

fn stage(source: &str, entry_point: &str) -> ShaderStage {
    ShaderStage {
        code: ShaderCode::Wgsl(source.to_string()),
        entry_point: entry_point.to_string(),
    }
}

/// `(vertex, fragment)` of the quad blit.  Bindings: 0 mvp, 1 texture, 2 sampler.
pub(crate) fn blit() -> (ShaderStage, ShaderStage) {
    (stage(BLIT, "vs_main"), stage(BLIT, "fs_main"))
}

/// Layout shared by the blit and HDR shaders.
pub(crate) fn quad_bindings() -> Vec<BindingLayout> {
    vec![
        BindingLayout {
            binding: 0,
            kind: BindingKind::ConstantBuffer,
        },
        BindingLayout {
            binding: 1,
            kind: BindingKind::Texture,
        },
        BindingLayout {
            binding: 2,
            kind: BindingKind::Sampler,
        },
    ]
}

/// `(vertex, fragment)` for textured sprites.
pub(crate) fn sprite() -> (ShaderStage, ShaderStage) {
    (stage(SPRITE, "vs_main"), stage(SPRITE, "fs_main"))
}

/// Sprite fragment stage that treats the texture as glyph coverage.
pub(crate) fn font_fragment() -> ShaderStage {
    stage(SPRITE, "fs_font")
}

pub(crate) fn sprite_bindings() -> Vec<BindingLayout> {
    vec![
        BindingLayout {
            binding: 0,
            kind: BindingKind::Texture,
        },
        BindingLayout {
            binding: 1,
            kind: BindingKind::Sampler,
        },
    ]
}

pub(crate) fn hdr() -> (ShaderStage, ShaderStage) {
    (stage(HDR, "vs_main"), stage(HDR, "fs_main"))
}

/// WGSL storage texel format for `format`, when the downsample shader can write it.
pub(crate) fn storage_format_name(format: PixelFormat) -> Option<&'static str> {
    match format {
        PixelFormat::Rgba8Unorm => Some("rgba8unorm"),
        PixelFormat::Rgba16Float => Some("rgba16float"),
        _ => None,
    }
}

/// The mip downsample compute shader specialized for `format`.
pub(crate) fn mip_downsample(format: PixelFormat) -> Result<ShaderStage, Error> {
    let name = storage_format_name(format).ok_or(Error::FormatUnsupported {
        requested: format,
        required: FormatSupport::UNORDERED_ACCESS,
    })?;
    Ok(ShaderStage {
        code: ShaderCode::Wgsl(MIP_DOWNSAMPLE.replace("STORAGE_FORMAT", name)),
        entry_point: "cs_main".to_string(),
    })
}
