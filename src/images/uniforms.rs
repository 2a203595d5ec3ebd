// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Per-pass constant buffer contents.

use crate::images::shader::{Reflection, TextureSemantic, UniformSemantic};
use glam::Mat4;

/// Constant buffers are allocated in multiples of this.
pub(crate) const CONSTANT_ALIGNMENT: usize = 256;

/// `vec4(w, h, 1/w, 1/h)`, the layout of every `*Size` uniform.
pub fn size_vec4(width: u32, height: u32) -> [f32; 4] {
    let w = width.max(1) as f32;
    let h = height.max(1) as f32;
    [w, h, 1.0 / w, 1.0 / h]
}

/// Values that are the same for every pass of a frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameUniforms {
    /// Transform for passes that render into the final viewport.
    pub mvp: Mat4,
    /// Transform for intermediate passes; never rotated.
    pub mvp_no_rotation: Mat4,
    pub frame_count: u64,
    /// 1, or -1 while rewinding.
    pub frame_direction: i32,
    pub frame_time_delta: u32,
    pub original_fps: f32,
    /// Quarter turns, 0..=3.
    pub rotation: u32,
    pub original_aspect: f32,
    pub final_viewport: (u32, u32),
    pub total_subframes: u32,
    pub current_subframe: u32,
}

impl Default for FrameUniforms {
    fn default() -> Self {
        FrameUniforms {
            mvp: Mat4::IDENTITY,
            mvp_no_rotation: Mat4::IDENTITY,
            frame_count: 0,
            frame_direction: 1,
            frame_time_delta: 0,
            original_fps: 60.0,
            rotation: 0,
            original_aspect: 4.0 / 3.0,
            final_viewport: (1, 1),
            total_subframes: 1,
            current_subframe: 1,
        }
    }
}

impl FrameUniforms {
    /// The aspect ratio as seen after rotation.
    pub fn original_aspect_rotated(&self) -> f32 {
        if self.rotation % 2 == 1 {
            1.0 / self.original_aspect
        } else {
            self.original_aspect
        }
    }
}

/**
A CPU image of one constant buffer.

Writes past the end are dropped.  Reflection offsets are checked when a pass is compiled, so this
only trims a value that straddles the end of the buffer.
*/
#[derive(Debug, Clone)]
pub struct UniformWriter {
    bytes: Vec<u8>,
}

impl UniformWriter {
    pub fn new(size: usize) -> Self {
        UniformWriter {
            bytes: vec![0; size],
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    fn put(&mut self, offset: usize, data: &[u8]) {
        if offset + data.len() <= self.bytes.len() {
            self.bytes[offset..offset + data.len()].copy_from_slice(data);
        }
    }

    pub fn write_f32(&mut self, offset: usize, v: f32) {
        self.put(offset, &v.to_le_bytes());
    }

    pub fn write_u32(&mut self, offset: usize, v: u32) {
        self.put(offset, &v.to_le_bytes());
    }

    pub fn write_i32(&mut self, offset: usize, v: i32) {
        self.put(offset, &v.to_le_bytes());
    }

    pub fn write_vec4(&mut self, offset: usize, v: [f32; 4]) {
        self.put(offset, bytemuck::cast_slice(&v));
    }

    pub fn write_mat4(&mut self, offset: usize, m: &Mat4) {
        self.put(offset, bytemuck::cast_slice(&m.to_cols_array()));
    }
}

/// What one pass knows about itself when its uniforms are filled.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PassUniformContext {
    pub output_size: (u32, u32),
    pub frame_count_mod: u32,
    /// Terminal passes use the rotated transform.
    pub is_final: bool,
}

/// Fills `writer` with every uniform `reflection` names.
pub(crate) fn fill(
    writer: &mut UniformWriter,
    reflection: &Reflection,
    frame: &FrameUniforms,
    pass: PassUniformContext,
    texture_size: impl Fn(TextureSemantic) -> Option<(u32, u32)>,
    parameter: impl Fn(&str) -> Option<f32>,
) {
    for member in &reflection.uniforms {
        let o = member.offset;
        match &member.semantic {
            UniformSemantic::Mvp => {
                let m = if pass.is_final {
                    frame.mvp
                } else {
                    frame.mvp_no_rotation
                };
                writer.write_mat4(o, &m);
            }
            UniformSemantic::OutputSize => {
                writer.write_vec4(o, size_vec4(pass.output_size.0, pass.output_size.1))
            }
            UniformSemantic::FinalViewportSize => {
                writer.write_vec4(o, size_vec4(frame.final_viewport.0, frame.final_viewport.1))
            }
            UniformSemantic::FrameCount => {
                let count = if pass.frame_count_mod != 0 {
                    frame.frame_count % pass.frame_count_mod as u64
                } else {
                    frame.frame_count
                };
                writer.write_u32(o, count as u32);
            }
            UniformSemantic::FrameDirection => writer.write_i32(o, frame.frame_direction),
            UniformSemantic::FrameTimeDelta => writer.write_u32(o, frame.frame_time_delta),
            UniformSemantic::OriginalFps => writer.write_f32(o, frame.original_fps),
            UniformSemantic::Rotation => writer.write_u32(o, frame.rotation),
            UniformSemantic::OriginalAspect => writer.write_f32(o, frame.original_aspect),
            UniformSemantic::OriginalAspectRotated => {
                writer.write_f32(o, frame.original_aspect_rotated())
            }
            UniformSemantic::TotalSubFrames => writer.write_u32(o, frame.total_subframes),
            UniformSemantic::CurrentSubFrame => writer.write_u32(o, frame.current_subframe),
            UniformSemantic::TextureSize(t) => {
                let (w, h) = texture_size(*t).unwrap_or((1, 1));
                writer.write_vec4(o, size_vec4(w, h));
            }
            UniformSemantic::Parameter(name) => {
                if let Some(v) = parameter(name) {
                    writer.write_f32(o, v);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::images::shader::UniformMember;

    fn reflection(members: Vec<(UniformSemantic, usize)>) -> Reflection {
        Reflection {
            textures: Vec::new(),
            uniforms: members
                .into_iter()
                .map(|(semantic, offset)| UniformMember { semantic, offset })
                .collect(),
            uniform_binding: Some(0),
            uniform_size: 128,
        }
    }

    fn read_f32(bytes: &[u8], offset: usize) -> f32 {
        f32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap())
    }

    fn read_u32(bytes: &[u8], offset: usize) -> u32 {
        u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap())
    }

    #[test]
    fn frame_count_respects_modulus() {
        let r = reflection(vec![(UniformSemantic::FrameCount, 0)]);
        let frame = FrameUniforms {
            frame_count: 7,
            ..Default::default()
        };
        let mut w = UniformWriter::new(128);
        let ctx = PassUniformContext {
            output_size: (1, 1),
            frame_count_mod: 3,
            is_final: false,
        };
        fill(&mut w, &r, &frame, ctx, |_| None, |_| None);
        assert_eq!(read_u32(w.bytes(), 0), 1);
    }

    #[test]
    fn sizes_and_parameters() {
        let r = reflection(vec![
            (UniformSemantic::OutputSize, 0),
            (UniformSemantic::TextureSize(TextureSemantic::Source), 16),
            (UniformSemantic::Parameter("GAMMA".to_string()), 32),
            (UniformSemantic::OriginalAspectRotated, 36),
        ]);
        let frame = FrameUniforms {
            rotation: 1,
            original_aspect: 2.0,
            ..Default::default()
        };
        let mut w = UniformWriter::new(128);
        let ctx = PassUniformContext {
            output_size: (640, 480),
            frame_count_mod: 0,
            is_final: true,
        };
        fill(
            &mut w,
            &r,
            &frame,
            ctx,
            |t| (t == TextureSemantic::Source).then_some((256, 224)),
            |name| (name == "GAMMA").then_some(2.2),
        );
        let b = w.bytes();
        assert_eq!(read_f32(b, 0), 640.0);
        assert_eq!(read_f32(b, 12), 1.0 / 480.0);
        assert_eq!(read_f32(b, 16), 256.0);
        assert_eq!(read_f32(b, 32), 2.2);
        assert_eq!(read_f32(b, 36), 0.5);
    }

    #[test]
    fn straddling_writes_are_dropped() {
        let mut w = UniformWriter::new(8);
        w.write_vec4(4, [1.0; 4]);
        assert_eq!(w.bytes(), &[0; 8]);
    }
}
