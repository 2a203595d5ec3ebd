// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Viewport geometry: letterboxing, integer scaling and the output projection.

use glam::Mat4;
use std::f32::consts::FRAC_PI_2;

/// Aspect ratios closer than this are treated as equal.
const ASPECT_EPSILON: f32 = 0.0001;

/// A floating-point viewport in back-buffer pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Viewport {
    pub fn full(width: u32, height: u32) -> Self {
        Viewport {
            x: 0.0,
            y: 0.0,
            width: width as f32,
            height: height as f32,
        }
    }

    pub fn scissor(&self) -> Rect {
        Rect {
            x: self.x.max(0.0) as u32,
            y: self.y.max(0.0) as u32,
            width: self.width.max(0.0) as u32,
            height: self.height.max(0.0) as u32,
        }
    }
}

/// An integer rectangle, used for scissors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Where the content lands on the output, as reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ViewportInfo {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    pub full_width: u32,
    pub full_height: u32,
}

/// How the content rectangle is chosen inside the output.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewportRequest {
    pub output_width: u32,
    pub output_height: u32,
    /// Desired content aspect ratio (width / height).
    pub aspect: f32,
    pub keep_aspect: bool,
    pub scale_integer: bool,
    /// Native content size, used for integer scaling.
    pub content_width: u32,
    pub content_height: u32,
}

/**
Computes the content rectangle.

With `keep_aspect`, the content is pillarboxed or letterboxed so that its aspect matches
`aspect`; with `scale_integer`, the content is the largest whole multiple of its native size
that fits.
*/
pub fn calculate_viewport(req: &ViewportRequest) -> ViewportInfo {
    let w = req.output_width;
    let h = req.output_height;
    let mut info = ViewportInfo {
        x: 0,
        y: 0,
        width: w,
        height: h,
        full_width: w,
        full_height: h,
    };
    if w == 0 || h == 0 {
        return info;
    }

    if req.scale_integer && req.content_height > 0 {
        let base_height = req.content_height;
        let base_width = if req.aspect > 0.0 {
            (base_height as f32 * req.aspect).round() as u32
        } else {
            req.content_width
        }
        .max(1);
        let scale = (w / base_width).min(h / base_height).max(1);
        info.width = base_width * scale;
        info.height = base_height * scale;
        info.x = (w as i32 - info.width as i32) / 2;
        info.y = (h as i32 - info.height as i32) / 2;
        return info;
    }

    if req.keep_aspect && req.aspect > 0.0 {
        let desired = req.aspect;
        let device = w as f32 / h as f32;
        if (device - desired).abs() < ASPECT_EPSILON {
            return info;
        }
        if device > desired {
            let delta = (desired / device - 1.0) / 2.0 + 0.5;
            info.x = (w as f32 * (0.5 - delta)).round() as i32;
            info.width = (2.0 * w as f32 * delta).round() as u32;
        } else {
            let delta = (device / desired - 1.0) / 2.0 + 0.5;
            info.y = (h as f32 * (0.5 - delta)).round() as i32;
            info.height = (2.0 * h as f32 * delta).round() as u32;
        }
    }
    info
}

impl ViewportInfo {
    pub fn viewport(&self) -> Viewport {
        Viewport {
            x: self.x as f32,
            y: self.y as f32,
            width: self.width as f32,
            height: self.height as f32,
        }
    }
}

/// The projection for a unit quad: orthographic over [0, 1]², rotated in 90° steps.
pub fn output_mvp(rotation: u32) -> Mat4 {
    let ortho = Mat4::orthographic_rh(0.0, 1.0, 0.0, 1.0, -1.0, 1.0);
    let rot = Mat4::from_rotation_z((rotation % 4) as f32 * FRAC_PI_2);
    rot * ortho
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4;

    fn req(w: u32, h: u32, aspect: f32) -> ViewportRequest {
        ViewportRequest {
            output_width: w,
            output_height: h,
            aspect,
            keep_aspect: true,
            scale_integer: false,
            content_width: 256,
            content_height: 224,
        }
    }

    #[test]
    fn pillarboxes_wide_outputs() {
        let info = calculate_viewport(&req(1920, 1080, 4.0 / 3.0));
        assert_eq!(info.width, 1440);
        assert_eq!(info.x, 240);
        assert_eq!((info.y, info.height), (0, 1080));
    }

    #[test]
    fn letterboxes_tall_outputs() {
        let info = calculate_viewport(&req(1000, 1000, 2.0));
        assert_eq!((info.x, info.width), (0, 1000));
        assert_eq!(info.height, 500);
        assert_eq!(info.y, 250);
    }

    #[test]
    fn matching_aspect_is_full() {
        let info = calculate_viewport(&req(800, 600, 4.0 / 3.0));
        assert_eq!((info.x, info.y, info.width, info.height), (0, 0, 800, 600));
    }

    #[test]
    fn integer_scale() {
        let mut r = req(1920, 1080, 0.0);
        r.scale_integer = true;
        let info = calculate_viewport(&r);
        // 256x224 fits 4 times vertically, 7 horizontally
        assert_eq!((info.width, info.height), (1024, 896));
        assert_eq!((info.x, info.y), (448, 92));
    }

    #[test]
    fn unrotated_mvp_maps_unit_square() {
        let m = output_mvp(0);
        let a = m * Vec4::new(0.0, 0.0, 0.0, 1.0);
        let b = m * Vec4::new(1.0, 1.0, 0.0, 1.0);
        assert!((a.x + 1.0).abs() < 1e-5 && (a.y + 1.0).abs() < 1e-5);
        assert!((b.x - 1.0).abs() < 1e-5 && (b.y - 1.0).abs() < 1e-5);
    }

    #[test]
    fn half_turn_flips_corners() {
        let m = output_mvp(2);
        let a = m * Vec4::new(0.0, 0.0, 0.0, 1.0);
        assert!((a.x - 1.0).abs() < 1e-5 && (a.y - 1.0).abs() < 1e-5);
    }
}
