// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Compiled passes, their reflection, and the semantics shaders bind to.

use crate::Error;
use crate::images::preset::{PassPreset, Preset};
use crate::imp::ShaderStage;

/// A texture a pass can sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureSemantic {
    /// The current input frame (history slot 0).
    Original,
    /// The previous pass's output, or the input frame for pass 0.
    Source,
    /// Input frame from `n` frames ago; `OriginalHistory(0)` is `Original`.
    OriginalHistory(u32),
    /// Pass `n`'s output from this frame.
    PassOutput(u32),
    /// Pass `n`'s output from the previous frame.
    PassFeedback(u32),
    /// Lookup texture `n` of the preset.
    User(u32),
}

/// A numeric value a pass's constant buffer can hold.
#[derive(Debug, Clone, PartialEq)]
pub enum UniformSemantic {
    Mvp,
    OutputSize,
    FinalViewportSize,
    FrameCount,
    FrameDirection,
    FrameTimeDelta,
    OriginalFps,
    Rotation,
    OriginalAspect,
    OriginalAspectRotated,
    TotalSubFrames,
    CurrentSubFrame,
    /// `vec4(w, h, 1/w, 1/h)` of a texture.
    TextureSize(TextureSemantic),
    /// A user parameter by name.
    Parameter(String),
}

impl TextureSemantic {
    /**
    Resolves a shader-side texture name.

    Besides the fixed names, pass aliases name `PassOutput`, `<alias>Feedback` names
    `PassFeedback`, and lookup-texture names name `User`.
    */
    pub fn from_name(name: &str, preset: &Preset) -> Option<TextureSemantic> {
        fn indexed(name: &str, prefix: &str) -> Option<u32> {
            name.strip_prefix(prefix).and_then(|n| n.parse().ok())
        }
        match name {
            "Original" => return Some(TextureSemantic::Original),
            "Source" => return Some(TextureSemantic::Source),
            _ => {}
        }
        if let Some(n) = indexed(name, "OriginalHistory") {
            return Some(if n == 0 {
                TextureSemantic::Original
            } else {
                TextureSemantic::OriginalHistory(n)
            });
        }
        if let Some(n) = indexed(name, "PassOutput") {
            return Some(TextureSemantic::PassOutput(n));
        }
        if let Some(n) = indexed(name, "PassFeedback") {
            return Some(TextureSemantic::PassFeedback(n));
        }
        if let Some(i) = preset.alias_index(name) {
            return Some(TextureSemantic::PassOutput(i as u32));
        }
        if let Some(i) = name.strip_suffix("Feedback").and_then(|a| preset.alias_index(a)) {
            return Some(TextureSemantic::PassFeedback(i as u32));
        }
        preset
            .lut_index(name)
            .map(|i| TextureSemantic::User(i as u32))
    }
}

impl UniformSemantic {
    /// Resolves a shader-side uniform name.  Unknown names are user parameters.
    pub fn from_name(name: &str, preset: &Preset) -> UniformSemantic {
        match name {
            "MVP" => UniformSemantic::Mvp,
            "OutputSize" => UniformSemantic::OutputSize,
            "FinalViewportSize" => UniformSemantic::FinalViewportSize,
            "FrameCount" => UniformSemantic::FrameCount,
            "FrameDirection" => UniformSemantic::FrameDirection,
            "FrameTimeDelta" => UniformSemantic::FrameTimeDelta,
            "OriginalFPS" => UniformSemantic::OriginalFps,
            "Rotation" => UniformSemantic::Rotation,
            "OriginalAspect" => UniformSemantic::OriginalAspect,
            "OriginalAspectRotated" => UniformSemantic::OriginalAspectRotated,
            "TotalSubFrames" => UniformSemantic::TotalSubFrames,
            "CurrentSubFrame" => UniformSemantic::CurrentSubFrame,
            _ => name
                .strip_suffix("Size")
                .and_then(|t| TextureSemantic::from_name(t, preset))
                .map(UniformSemantic::TextureSize)
                .unwrap_or_else(|| UniformSemantic::Parameter(name.to_string())),
        }
    }
}

/// A texture the pass samples, and where.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureBinding {
    pub semantic: TextureSemantic,
    pub binding: u32,
    pub sampler_binding: Option<u32>,
}

/// A uniform the pass reads, at a byte offset into its constant buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct UniformMember {
    pub semantic: UniformSemantic,
    pub offset: usize,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Reflection {
    pub textures: Vec<TextureBinding>,
    pub uniforms: Vec<UniformMember>,
    /// Binding of the constant buffer, if the pass has one.
    pub uniform_binding: Option<u32>,
    pub uniform_size: usize,
}

impl Reflection {
    /// Highest `OriginalHistory` index referenced, 0 if none.
    pub fn history_depth(&self) -> u32 {
        let textures = self.textures.iter().map(|t| t.semantic);
        let sizes = self.uniforms.iter().filter_map(|u| match u.semantic {
            UniformSemantic::TextureSize(t) => Some(t),
            _ => None,
        });
        textures
            .chain(sizes)
            .filter_map(|s| match s {
                TextureSemantic::OriginalHistory(n) => Some(n),
                _ => None,
            })
            .max()
            .unwrap_or(0)
    }

    /// Passes whose previous-frame output this pass reads.
    pub fn feedback_passes(&self) -> impl Iterator<Item = u32> + '_ {
        self.textures.iter().filter_map(|t| match t.semantic {
            TextureSemantic::PassFeedback(n) => Some(n),
            _ => None,
        })
    }
}

/// The output of a [`ShaderCompiler`] for one pass.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledPass {
    pub vertex: ShaderStage,
    pub fragment: ShaderStage,
    pub reflection: Reflection,
}

/**
Turns a pass's source into stage code and semantic reflection.

Errors are reported as [`Error::ShaderCompile`].
*/
pub trait ShaderCompiler: std::fmt::Debug {
    fn compile(&self, index: usize, pass: &PassPreset, preset: &Preset) -> Result<CompiledPass, Error>;
}

impl CompiledPass {
    /// Checks the compiled pass is complete enough to build a pipeline from.
    pub(crate) fn validate(&self, index: usize) -> Result<(), Error> {
        let empty = |s: &ShaderStage| s.code.is_empty() || s.entry_point.is_empty();
        if empty(&self.vertex) || empty(&self.fragment) {
            return Err(Error::ShaderCompile {
                pass: index,
                message: "empty shader stage".to_string(),
            });
        }
        if !self.reflection.uniforms.is_empty() && self.reflection.uniform_binding.is_none() {
            return Err(Error::ShaderCompile {
                pass: index,
                message: "uniforms without a constant buffer binding".to_string(),
            });
        }
        for u in &self.reflection.uniforms {
            if u.offset >= self.reflection.uniform_size {
                return Err(Error::ShaderCompile {
                    pass: index,
                    message: format!("uniform {:?} outside the constant buffer", u.semantic),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::images::preset::LutPreset;
    use crate::bindings::sampler::{FilterMode, WrapMode};

    fn preset() -> Preset {
        let mut blur = PassPreset::new("blur", "");
        blur.alias = Some("Blur".to_string());
        Preset {
            passes: vec![blur, PassPreset::new("final", "")],
            luts: vec![LutPreset {
                name: "mask".to_string(),
                path: "mask.png".into(),
                filter: FilterMode::Linear,
                wrap: WrapMode::Repeat,
                mipmap: false,
            }],
            ..Default::default()
        }
    }

    #[test]
    fn resolves_texture_names() {
        let p = preset();
        assert_eq!(TextureSemantic::from_name("Source", &p), Some(TextureSemantic::Source));
        assert_eq!(TextureSemantic::from_name("OriginalHistory0", &p), Some(TextureSemantic::Original));
        assert_eq!(
            TextureSemantic::from_name("OriginalHistory3", &p),
            Some(TextureSemantic::OriginalHistory(3))
        );
        assert_eq!(TextureSemantic::from_name("Blur", &p), Some(TextureSemantic::PassOutput(0)));
        assert_eq!(
            TextureSemantic::from_name("BlurFeedback", &p),
            Some(TextureSemantic::PassFeedback(0))
        );
        assert_eq!(TextureSemantic::from_name("mask", &p), Some(TextureSemantic::User(0)));
        assert_eq!(TextureSemantic::from_name("nothing", &p), None);
    }

    #[test]
    fn resolves_uniform_names() {
        let p = preset();
        assert_eq!(UniformSemantic::from_name("MVP", &p), UniformSemantic::Mvp);
        assert_eq!(
            UniformSemantic::from_name("SourceSize", &p),
            UniformSemantic::TextureSize(TextureSemantic::Source)
        );
        assert_eq!(
            UniformSemantic::from_name("maskSize", &p),
            UniformSemantic::TextureSize(TextureSemantic::User(0))
        );
        assert_eq!(
            UniformSemantic::from_name("STRENGTH", &p),
            UniformSemantic::Parameter("STRENGTH".to_string())
        );
    }

    #[test]
    fn history_depth_counts_sizes_too() {
        let r = Reflection {
            textures: vec![TextureBinding {
                semantic: TextureSemantic::OriginalHistory(2),
                binding: 1,
                sampler_binding: None,
            }],
            uniforms: vec![UniformMember {
                semantic: UniformSemantic::TextureSize(TextureSemantic::OriginalHistory(4)),
                offset: 0,
            }],
            uniform_binding: Some(0),
            uniform_size: 16,
        };
        assert_eq!(r.history_depth(), 4);
    }
}
