// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
use crate::Error;
use png::ColorType;
use std::io::Cursor;

/// Decodes PNG bytes into tightly packed RGBA8 rows.
pub(crate) fn decode_rgba8(bytes: Vec<u8>) -> Result<(u32, u32, Vec<u8>), Error> {
    let mut decoder = png::Decoder::new(Cursor::new(bytes));
    decoder.set_transformations(png::Transformations::normalize_to_color8());
    let mut reader = decoder.read_info()?;
    let width = reader.info().width;
    let height = reader.info().height;
    let size = reader
        .output_buffer_size()
        .ok_or_else(|| Error::ImageLayout(format!("{width}x{height} does not fit in memory")))?;
    let mut buf = vec![0; size];
    let info = reader.next_frame(&mut buf)?;

    let mut rgba = Vec::with_capacity(width as usize * height as usize * 4);
    for row in buf.chunks_exact(info.line_size).take(height as usize) {
        let row = &row[..info.line_size];
        match info.color_type {
            ColorType::Rgba => rgba.extend_from_slice(&row[..width as usize * 4]),
            ColorType::Rgb => {
                for px in row.chunks_exact(3).take(width as usize) {
                    rgba.extend_from_slice(&[px[0], px[1], px[2], 255]);
                }
            }
            ColorType::Grayscale => {
                for &g in row.iter().take(width as usize) {
                    rgba.extend_from_slice(&[g, g, g, 255]);
                }
            }
            ColorType::GrayscaleAlpha => {
                for px in row.chunks_exact(2).take(width as usize) {
                    rgba.extend_from_slice(&[px[0], px[0], px[0], px[1]]);
                }
            }
            other => {
                return Err(Error::ImageLayout(format!("{other:?}")));
            }
        }
    }
    Ok((width, height, rgba))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(width: u32, height: u32, color: ColorType, data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        {
            let mut encoder = png::Encoder::new(&mut out, width, height);
            encoder.set_color(color);
            encoder.set_depth(png::BitDepth::Eight);
            let mut writer = encoder.write_header().unwrap();
            writer.write_image_data(data).unwrap();
        }
        out
    }

    #[test]
    fn decodes_rgb_to_rgba() {
        let bytes = encode(2, 1, ColorType::Rgb, &[255, 0, 0, 0, 255, 0]);
        let (w, h, px) = decode_rgba8(bytes).unwrap();
        assert_eq!((w, h), (2, 1));
        assert_eq!(px, vec![255, 0, 0, 255, 0, 255, 0, 255]);
    }

    #[test]
    fn decodes_gray_alpha() {
        let bytes = encode(1, 2, ColorType::GrayscaleAlpha, &[10, 20, 30, 40]);
        let (_, _, px) = decode_rgba8(bytes).unwrap();
        assert_eq!(px, vec![10, 10, 10, 20, 30, 30, 30, 40]);
    }

    #[test]
    fn rejects_garbage() {
        assert!(decode_rgba8(vec![1, 2, 3]).is_err());
    }
}
