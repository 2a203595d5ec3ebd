// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Loading lookup textures and overlay images from disk.

use crate::Error;
use crate::pixel_formats::png_support;
use std::path::Path;

/// Tightly packed RGBA8 pixels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl Image {
    /// A single-color image.
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Image {
        Image {
            width,
            height,
            pixels: rgba.repeat(width as usize * height as usize),
        }
    }

    pub fn pitch(&self) -> usize {
        self.width as usize * 4
    }
}

pub trait ImageLoader: std::fmt::Debug {
    fn load(&self, path: &Path) -> Result<Image, Error>;
}

/// Reads PNG files.
#[derive(Debug, Default, Clone, Copy)]
pub struct PngLoader;

impl ImageLoader for PngLoader {
    fn load(&self, path: &Path) -> Result<Image, Error> {
        let bytes = std::fs::read(path)?;
        let (width, height, pixels) = png_support::decode_rgba8(bytes)?;
        logwise::trace_sync!(
            "Loaded {path} {width}x{height}",
            path = path.display().to_string(),
            width = width,
            height = height
        );
        Ok(Image {
            width,
            height,
            pixels,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_files_are_io_errors() {
        let err = PngLoader.load(Path::new("/nonexistent/lut.png")).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn solid_images_are_packed() {
        let image = Image::solid(3, 2, [1, 2, 3, 4]);
        assert_eq!(image.pixels.len(), 24);
        assert_eq!(image.pitch(), 12);
        assert_eq!(&image.pixels[20..], &[1, 2, 3, 4]);
    }
}
