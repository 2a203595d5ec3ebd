// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Pixel format definitions and CPU-side pixel conversion.
//!
//! This module describes every pixel format the orchestrator can place in a texture,
//! the fallback order used when a device lacks a format, and the byte-level reformat
//! used when uploading frames.
//!
//! # Available Formats
//!
//! ## Packed 16-bit
//! - [`PixelFormat::B5G6R5Unorm`] - RGB565, little-endian
//! - [`PixelFormat::B5G5R5A1Unorm`] - ARGB1555, little-endian
//! - [`PixelFormat::B4G4R4A4Unorm`] - ARGB4444, little-endian
//!
//! ## 32-bit
//! - [`PixelFormat::Rgba8Unorm`], [`PixelFormat::Rgba8UnormSrgb`]
//! - [`PixelFormat::Bgra8Unorm`], [`PixelFormat::Bgra8UnormSrgb`], [`PixelFormat::Bgrx8Unorm`]
//! - [`PixelFormat::Rgb10A2Unorm`] - HDR10 back buffers
//!
//! ## Other
//! - [`PixelFormat::Rgba16Float`] - float framebuffers and scRGB
//! - [`PixelFormat::R8Unorm`], [`PixelFormat::A8Unorm`] - glyph coverage
//!
//! # Examples
//!
//! ```
//! use framechain::pixel_formats::{PixelFormat, convert_pixels};
//!
//! // one red RGB565 pixel, expanded into BGRA8
//! let src = 0xF800u16.to_le_bytes();
//! let mut dst = [0u8; 4];
//! convert_pixels(&src, 2, PixelFormat::B5G6R5Unorm, &mut dst, 4, PixelFormat::Bgra8Unorm, 1, 1);
//! assert_eq!(dst, [0, 0, 255, 255]);
//! ```

/*
Quick note on type design.  images in this crate change format at runtime: the device decides
which format a texture actually gets (see [`PixelFormat::fallbacks`]), and the frame source decides
which format arrives from the CPU.  So unlike a statically-typed texel API, formats here are a plain
enum, and conversion works through a canonical RGBA8 texel.
*/

pub(crate) mod png_support;

pub use half::f16;

/// A pixel layout a texture or a CPU frame can use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PixelFormat {
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Bgra8Unorm,
    Bgra8UnormSrgb,
    /// BGRA8 with the alpha byte ignored (XRGB8888 frames).
    Bgrx8Unorm,
    B5G6R5Unorm,
    B5G5R5A1Unorm,
    B4G4R4A4Unorm,
    Rgb10A2Unorm,
    Rgba16Float,
    R8Unorm,
    A8Unorm,
}

impl PixelFormat {
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgba8Unorm
            | PixelFormat::Rgba8UnormSrgb
            | PixelFormat::Bgra8Unorm
            | PixelFormat::Bgra8UnormSrgb
            | PixelFormat::Bgrx8Unorm
            | PixelFormat::Rgb10A2Unorm => 4,
            PixelFormat::B5G6R5Unorm | PixelFormat::B5G5R5A1Unorm | PixelFormat::B4G4R4A4Unorm => 2,
            PixelFormat::Rgba16Float => 8,
            PixelFormat::R8Unorm | PixelFormat::A8Unorm => 1,
        }
    }

    pub const fn is_srgb(self) -> bool {
        matches!(self, PixelFormat::Rgba8UnormSrgb | PixelFormat::Bgra8UnormSrgb)
    }

    /**
    Formats to try, in order, when this format is requested.

    The first entry is always the format itself.  Later entries can hold every channel of the
    requested format, possibly at a higher precision.
    */
    pub const fn fallbacks(self) -> &'static [PixelFormat] {
        use PixelFormat::*;
        match self {
            Rgba8Unorm => &[Rgba8Unorm, Bgra8Unorm, Rgba16Float],
            Rgba8UnormSrgb => &[Rgba8UnormSrgb, Bgra8UnormSrgb],
            Bgra8Unorm => &[Bgra8Unorm, Rgba8Unorm, Rgba16Float],
            Bgra8UnormSrgb => &[Bgra8UnormSrgb, Rgba8UnormSrgb],
            Bgrx8Unorm => &[Bgrx8Unorm, Bgra8Unorm, Rgba8Unorm],
            B5G6R5Unorm => &[B5G6R5Unorm, Bgrx8Unorm, Bgra8Unorm, Rgba8Unorm],
            B5G5R5A1Unorm => &[B5G5R5A1Unorm, Bgra8Unorm, Rgba8Unorm],
            B4G4R4A4Unorm => &[B4G4R4A4Unorm, Bgra8Unorm, Rgba8Unorm],
            Rgb10A2Unorm => &[Rgb10A2Unorm, Rgba16Float, Rgba8Unorm],
            Rgba16Float => &[Rgba16Float],
            R8Unorm => &[R8Unorm, A8Unorm, Rgba8Unorm],
            A8Unorm => &[A8Unorm, R8Unorm, Rgba8Unorm, Bgra8Unorm],
        }
    }

    /// Row size in bytes for a tightly packed row.
    pub const fn row_bytes(self, width: u32) -> usize {
        self.bytes_per_pixel() * width as usize
    }
}

/// Expands an n-bit channel to 8 bits by bit replication.
#[inline]
fn expand(value: u16, bits: u32) -> u8 {
    let v = value as u32;
    match bits {
        1 => {
            if v != 0 {
                255
            } else {
                0
            }
        }
        4 => (v * 17) as u8,
        5 => ((v << 3) | (v >> 2)) as u8,
        6 => ((v << 2) | (v >> 4)) as u8,
        _ => v as u8,
    }
}

#[inline]
fn unorm_to_u8(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0 + 0.5) as u8
}

/// Decodes one pixel into canonical RGBA8.
pub(crate) fn decode_texel(format: PixelFormat, src: &[u8]) -> [u8; 4] {
    match format {
        PixelFormat::Rgba8Unorm | PixelFormat::Rgba8UnormSrgb => [src[0], src[1], src[2], src[3]],
        PixelFormat::Bgra8Unorm | PixelFormat::Bgra8UnormSrgb => [src[2], src[1], src[0], src[3]],
        PixelFormat::Bgrx8Unorm => [src[2], src[1], src[0], 255],
        PixelFormat::B5G6R5Unorm => {
            let p = u16::from_le_bytes([src[0], src[1]]);
            [
                expand((p >> 11) & 0x1f, 5),
                expand((p >> 5) & 0x3f, 6),
                expand(p & 0x1f, 5),
                255,
            ]
        }
        PixelFormat::B5G5R5A1Unorm => {
            let p = u16::from_le_bytes([src[0], src[1]]);
            [
                expand((p >> 10) & 0x1f, 5),
                expand((p >> 5) & 0x1f, 5),
                expand(p & 0x1f, 5),
                expand(p >> 15, 1),
            ]
        }
        PixelFormat::B4G4R4A4Unorm => {
            let p = u16::from_le_bytes([src[0], src[1]]);
            [
                expand((p >> 8) & 0xf, 4),
                expand((p >> 4) & 0xf, 4),
                expand(p & 0xf, 4),
                expand(p >> 12, 4),
            ]
        }
        PixelFormat::Rgb10A2Unorm => {
            let p = u32::from_le_bytes([src[0], src[1], src[2], src[3]]);
            let c = |shift: u32| ((p >> shift) & 0x3ff) as f32 / 1023.0;
            [
                unorm_to_u8(c(0)),
                unorm_to_u8(c(10)),
                unorm_to_u8(c(20)),
                unorm_to_u8((p >> 30) as f32 / 3.0),
            ]
        }
        PixelFormat::Rgba16Float => {
            let c = |i: usize| f16::from_le_bytes([src[i * 2], src[i * 2 + 1]]).to_f32();
            [
                unorm_to_u8(c(0)),
                unorm_to_u8(c(1)),
                unorm_to_u8(c(2)),
                unorm_to_u8(c(3)),
            ]
        }
        PixelFormat::R8Unorm => [src[0], 0, 0, 255],
        // coverage lands in every channel so any fallback keeps it
        PixelFormat::A8Unorm => [src[0], src[0], src[0], src[0]],
    }
}

/// Encodes canonical RGBA8 into one pixel of `format`.
pub(crate) fn encode_texel(format: PixelFormat, rgba: [u8; 4], dst: &mut [u8]) {
    let [r, g, b, a] = rgba;
    match format {
        PixelFormat::Rgba8Unorm | PixelFormat::Rgba8UnormSrgb => dst[..4].copy_from_slice(&rgba),
        PixelFormat::Bgra8Unorm | PixelFormat::Bgra8UnormSrgb => {
            dst[..4].copy_from_slice(&[b, g, r, a])
        }
        PixelFormat::Bgrx8Unorm => dst[..4].copy_from_slice(&[b, g, r, 255]),
        PixelFormat::B5G6R5Unorm => {
            let p = ((r as u16 >> 3) << 11) | ((g as u16 >> 2) << 5) | (b as u16 >> 3);
            dst[..2].copy_from_slice(&p.to_le_bytes());
        }
        PixelFormat::B5G5R5A1Unorm => {
            let p = ((a as u16 >> 7) << 15)
                | ((r as u16 >> 3) << 10)
                | ((g as u16 >> 3) << 5)
                | (b as u16 >> 3);
            dst[..2].copy_from_slice(&p.to_le_bytes());
        }
        PixelFormat::B4G4R4A4Unorm => {
            let p = ((a as u16 >> 4) << 12)
                | ((r as u16 >> 4) << 8)
                | ((g as u16 >> 4) << 4)
                | (b as u16 >> 4);
            dst[..2].copy_from_slice(&p.to_le_bytes());
        }
        PixelFormat::Rgb10A2Unorm => {
            let c = |v: u8| ((v as u32 * 1023 + 127) / 255) & 0x3ff;
            let p = c(r) | (c(g) << 10) | (c(b) << 20) | ((a as u32 >> 6) << 30);
            dst[..4].copy_from_slice(&p.to_le_bytes());
        }
        PixelFormat::Rgba16Float => {
            for (i, v) in rgba.iter().enumerate() {
                let h = f16::from_f32(*v as f32 / 255.0);
                dst[i * 2..i * 2 + 2].copy_from_slice(&h.to_le_bytes());
            }
        }
        PixelFormat::R8Unorm => dst[0] = r,
        PixelFormat::A8Unorm => dst[0] = a,
    }
}

/// True when the two formats share a byte layout, so rows can be copied verbatim.
pub(crate) fn same_layout(a: PixelFormat, b: PixelFormat) -> bool {
    use PixelFormat::*;
    if a == b {
        return true;
    }
    matches!(
        (a, b),
        (Rgba8Unorm, Rgba8UnormSrgb)
            | (Rgba8UnormSrgb, Rgba8Unorm)
            | (Bgra8Unorm, Bgra8UnormSrgb)
            | (Bgra8UnormSrgb, Bgra8Unorm)
            // X is "don't care" on the destination
            | (Bgra8Unorm, Bgrx8Unorm)
            | (Bgra8UnormSrgb, Bgrx8Unorm)
    )
}

/**
Copies a `width` × `height` block of pixels between two pitched buffers, converting formats.

Sources in any [`PixelFormat`] are accepted; packed 16-bit formats are expanded through an RGBA8
intermediate.  Rows that share a byte layout are copied with `copy_from_slice`.

# Panics
Panics if either buffer is too short for the block.
*/
#[allow(clippy::too_many_arguments)]
pub fn convert_pixels(
    src: &[u8],
    src_pitch: usize,
    src_format: PixelFormat,
    dst: &mut [u8],
    dst_pitch: usize,
    dst_format: PixelFormat,
    width: u32,
    height: u32,
) {
    let src_bpp = src_format.bytes_per_pixel();
    let dst_bpp = dst_format.bytes_per_pixel();
    let verbatim = same_layout(src_format, dst_format);
    for y in 0..height as usize {
        let src_row = &src[y * src_pitch..y * src_pitch + src_format.row_bytes(width)];
        let dst_row = &mut dst[y * dst_pitch..y * dst_pitch + dst_format.row_bytes(width)];
        if verbatim {
            dst_row.copy_from_slice(src_row);
            continue;
        }
        for (s, d) in src_row.chunks_exact(src_bpp).zip(dst_row.chunks_exact_mut(dst_bpp)) {
            encode_texel(dst_format, decode_texel(src_format, s), d);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_565() {
        let white = 0xFFFFu16.to_le_bytes();
        assert_eq!(decode_texel(PixelFormat::B5G6R5Unorm, &white), [255, 255, 255, 255]);
        let green = 0x07E0u16.to_le_bytes();
        assert_eq!(decode_texel(PixelFormat::B5G6R5Unorm, &green), [0, 255, 0, 255]);
    }

    #[test]
    fn expands_5551_and_4444() {
        // alpha bit set, blue saturated
        let p = (0x8000u16 | 0x001f).to_le_bytes();
        assert_eq!(decode_texel(PixelFormat::B5G5R5A1Unorm, &p), [0, 0, 255, 255]);
        let p = 0x0000u16.to_le_bytes();
        assert_eq!(decode_texel(PixelFormat::B5G5R5A1Unorm, &p)[3], 0);
        let p = 0xF800u16.to_le_bytes(); // a=15 r=8
        assert_eq!(decode_texel(PixelFormat::B4G4R4A4Unorm, &p), [136, 0, 0, 255]);
    }

    #[test]
    fn pitched_conversion_respects_padding() {
        // two rows of two 565 pixels with a 2-byte pad per row
        let mut src = vec![0u8; 12];
        src[0..2].copy_from_slice(&0xF800u16.to_le_bytes());
        src[6..8].copy_from_slice(&0x001Fu16.to_le_bytes());
        let mut dst = vec![0u8; 2 * 256];
        convert_pixels(
            &src,
            6,
            PixelFormat::B5G6R5Unorm,
            &mut dst,
            256,
            PixelFormat::Rgba8Unorm,
            2,
            2,
        );
        assert_eq!(&dst[0..4], &[255, 0, 0, 255]);
        assert_eq!(&dst[4..8], &[0, 0, 0, 255]);
        assert_eq!(&dst[256..260], &[0, 0, 255, 255]);
    }

    #[test]
    fn verbatim_rows_for_matching_layouts() {
        let src = [1u8, 2, 3, 4];
        let mut dst = [0u8; 4];
        convert_pixels(&src, 4, PixelFormat::Bgra8Unorm, &mut dst, 4, PixelFormat::Bgrx8Unorm, 1, 1);
        assert_eq!(dst, src);
    }

    #[test]
    fn fallbacks_start_with_self() {
        use PixelFormat::*;
        for f in [
            Rgba8Unorm,
            Rgba8UnormSrgb,
            Bgra8Unorm,
            Bgra8UnormSrgb,
            Bgrx8Unorm,
            B5G6R5Unorm,
            B5G5R5A1Unorm,
            B4G4R4A4Unorm,
            Rgb10A2Unorm,
            Rgba16Float,
            R8Unorm,
            A8Unorm,
        ] {
            assert_eq!(f.fallbacks()[0], f);
        }
    }

    #[test]
    fn half_float_encode() {
        let mut dst = [0u8; 8];
        encode_texel(PixelFormat::Rgba16Float, [255, 0, 0, 255], &mut dst);
        assert_eq!(decode_texel(PixelFormat::Rgba16Float, &dst), [255, 0, 0, 255]);
    }
}
