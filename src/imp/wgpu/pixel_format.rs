// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
use crate::bindings::visible_to::{FormatSupport, TextureUsage};
use crate::pixel_formats::PixelFormat;
use wgpu::{TextureFormat, TextureFormatFeatureFlags, TextureUsages};

/// The wgpu format for `format`; `None` for packed layouts wgpu has no texture format for.
pub(super) fn wgpu_format(format: PixelFormat) -> Option<TextureFormat> {
    match format {
        PixelFormat::Rgba8Unorm => Some(TextureFormat::Rgba8Unorm),
        PixelFormat::Rgba8UnormSrgb => Some(TextureFormat::Rgba8UnormSrgb),
        PixelFormat::Bgra8Unorm => Some(TextureFormat::Bgra8Unorm),
        PixelFormat::Bgra8UnormSrgb => Some(TextureFormat::Bgra8UnormSrgb),
        PixelFormat::Rgb10A2Unorm => Some(TextureFormat::Rgb10a2Unorm),
        PixelFormat::Rgba16Float => Some(TextureFormat::Rgba16Float),
        PixelFormat::R8Unorm => Some(TextureFormat::R8Unorm),
        //glyph coverage falls back to R8, which the font shader reads from the red channel
        PixelFormat::A8Unorm
        | PixelFormat::Bgrx8Unorm
        | PixelFormat::B5G6R5Unorm
        | PixelFormat::B5G5R5A1Unorm
        | PixelFormat::B4G4R4A4Unorm => None,
    }
}

/// The inverse of [`wgpu_format`], for surface formats.
pub(super) fn pixel_format(format: TextureFormat) -> Option<PixelFormat> {
    [
        PixelFormat::Rgba8Unorm,
        PixelFormat::Rgba8UnormSrgb,
        PixelFormat::Bgra8Unorm,
        PixelFormat::Bgra8UnormSrgb,
        PixelFormat::Rgb10A2Unorm,
        PixelFormat::Rgba16Float,
        PixelFormat::R8Unorm,
    ]
    .into_iter()
    .find(|p| wgpu_format(*p) == Some(format))
}

pub(super) fn format_support(adapter: &wgpu::Adapter, format: PixelFormat) -> FormatSupport {
    let Some(format) = wgpu_format(format) else {
        return FormatSupport::empty();
    };
    let features = adapter.get_texture_format_features(format);
    let mut support = FormatSupport::empty();
    if features.allowed_usages.contains(TextureUsages::TEXTURE_BINDING)
        && features.flags.contains(TextureFormatFeatureFlags::FILTERABLE)
    {
        support |= FormatSupport::SHADER_SAMPLE;
    }
    if features.allowed_usages.contains(TextureUsages::RENDER_ATTACHMENT) {
        support |= FormatSupport::RENDER_TARGET;
    }
    if features.allowed_usages.contains(TextureUsages::STORAGE_BINDING)
        && features.flags.contains(TextureFormatFeatureFlags::STORAGE_WRITE_ONLY)
    {
        support |= FormatSupport::UNORDERED_ACCESS;
    }
    if features.flags.contains(TextureFormatFeatureFlags::BLENDABLE) {
        support |= FormatSupport::BLENDABLE;
    }
    support
}

pub(super) fn texture_usages(usage: TextureUsage) -> TextureUsages {
    let mut usages = TextureUsages::empty();
    if usage.contains(TextureUsage::SHADER_RESOURCE) {
        usages |= TextureUsages::TEXTURE_BINDING;
    }
    if usage.contains(TextureUsage::RENDER_TARGET) {
        usages |= TextureUsages::RENDER_ATTACHMENT;
    }
    if usage.contains(TextureUsage::UNORDERED_ACCESS) {
        usages |= TextureUsages::STORAGE_BINDING;
    }
    if usage.contains(TextureUsage::COPY_DEST) {
        usages |= TextureUsages::COPY_DST;
    }
    usages
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn surface_formats_round_trip() {
        assert_eq!(pixel_format(TextureFormat::Bgra8Unorm), Some(PixelFormat::Bgra8Unorm));
        assert_eq!(pixel_format(TextureFormat::Rgba16Float), Some(PixelFormat::Rgba16Float));
        assert_eq!(pixel_format(TextureFormat::Depth32Float), None);
    }

    #[test]
    fn packed_formats_have_no_wgpu_format() {
        assert_eq!(wgpu_format(PixelFormat::B5G6R5Unorm), None);
        assert_eq!(wgpu_format(PixelFormat::A8Unorm), None);
    }

    #[test]
    fn usages_map_bit_for_bit() {
        let usages = texture_usages(TextureUsage::SHADER_RESOURCE | TextureUsage::COPY_DEST);
        assert_eq!(usages, TextureUsages::TEXTURE_BINDING | TextureUsages::COPY_DST);
    }
}
