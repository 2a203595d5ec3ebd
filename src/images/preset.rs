// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Shader presets: an ordered list of passes plus lookup textures.
//!
//! A preset is produced by a [`PresetLoader`].  [`SlangPresetLoader`] reads the common
//! `key = value` preset text:
//!
//! ```text
//! shaders = 2
//! shader0 = "blur.slang"
//! scale_type0 = viewport
//! scale0 = 0.5
//! filter_linear0 = true
//! shader1 = "scanlines.slang"
//! textures = "mask"
//! mask = "mask.png"
//! mask_linear = true
//! ```

use crate::Error;
use crate::bindings::sampler::{FilterMode, WrapMode};
use crate::pixel_formats::PixelFormat;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// What a pass's output size is relative to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scale {
    /// A multiple of the pass's input size.
    Source(f32),
    /// A multiple of the final viewport.
    Viewport(f32),
    /// A fixed number of pixels.
    Absolute(u32),
}

impl Scale {
    pub fn resolve(&self, source: u32, viewport: u32) -> u32 {
        let size = match *self {
            Scale::Source(f) => (source as f32 * f).round() as u32,
            Scale::Viewport(f) => (viewport as f32 * f).round() as u32,
            Scale::Absolute(px) => px,
        };
        size.max(1)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PassPreset {
    pub path: PathBuf,
    /// Shader source text, consumed only by the compiler.
    pub source: String,
    pub alias: Option<String>,
    /// `None` when the preset doesn't say; see [`PassPreset::effective_scale`].
    pub scale_x: Option<Scale>,
    pub scale_y: Option<Scale>,
    /// `None` lets the frontend's smooth setting decide.
    pub filter: Option<FilterMode>,
    pub wrap: WrapMode,
    /// Generate mips of this pass's input.
    pub mipmap_input: bool,
    /// `FrameCount` is reduced modulo this when nonzero.
    pub frame_count_mod: u32,
    /// Keep last frame's output readable as `PassFeedback`.
    pub feedback: bool,
    pub format: Option<PixelFormat>,
}

impl PassPreset {
    pub fn new(path: impl Into<PathBuf>, source: impl Into<String>) -> Self {
        PassPreset {
            path: path.into(),
            source: source.into(),
            alias: None,
            scale_x: None,
            scale_y: None,
            filter: None,
            wrap: WrapMode::ClampToEdge,
            mipmap_input: false,
            frame_count_mod: 0,
            feedback: false,
            format: None,
        }
    }

    pub fn with_scale(mut self, scale: Scale) -> Self {
        self.scale_x = Some(scale);
        self.scale_y = Some(scale);
        self
    }

    /// Unspecified scales are 1× the source, except on the last pass, which fills the viewport.
    pub fn effective_scale(&self, is_last: bool) -> (Scale, Scale) {
        let default = if is_last {
            Scale::Viewport(1.0)
        } else {
            Scale::Source(1.0)
        };
        (self.scale_x.unwrap_or(default), self.scale_y.unwrap_or(default))
    }

    /// True when neither axis was given a scale.
    pub fn is_unscaled(&self) -> bool {
        self.scale_x.is_none() && self.scale_y.is_none()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LutPreset {
    pub name: String,
    pub path: PathBuf,
    pub filter: FilterMode,
    pub wrap: WrapMode,
    pub mipmap: bool,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Preset {
    pub path: PathBuf,
    pub passes: Vec<PassPreset>,
    pub luts: Vec<LutPreset>,
    /// Parameter overrides by name.
    pub parameters: Vec<(String, f32)>,
}

impl Preset {
    /// Index of the pass with `alias`.
    pub fn alias_index(&self, alias: &str) -> Option<usize> {
        self.passes
            .iter()
            .position(|p| p.alias.as_deref() == Some(alias))
    }

    pub fn lut_index(&self, name: &str) -> Option<usize> {
        self.luts.iter().position(|l| l.name == name)
    }

    pub fn parameter(&self, name: &str) -> Option<f32> {
        self.parameters
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| *v)
    }
}

/// Produces a [`Preset`] from a path.
pub trait PresetLoader: std::fmt::Debug {
    fn load(&self, path: &Path) -> Result<Preset, Error>;
}

/// Loads `key = value` preset files, reading pass sources relative to the preset.
#[derive(Debug, Default, Clone, Copy)]
pub struct SlangPresetLoader;

impl PresetLoader for SlangPresetLoader {
    fn load(&self, path: &Path) -> Result<Preset, Error> {
        let text = std::fs::read_to_string(path)?;
        let base = path.parent().unwrap_or(Path::new("."));
        let mut preset = parse_preset(&text, base, |p| Ok(std::fs::read_to_string(p)?))?;
        preset.path = path.to_path_buf();
        Ok(preset)
    }
}

fn parse_bool(s: &str) -> bool {
    matches!(s, "true" | "1")
}

fn parse_scale(kind: &str, value: Option<&str>) -> Result<Scale, Error> {
    let bad = |v: &str| Error::Preset(format!("bad scale {v}"));
    match kind {
        "source" => Ok(Scale::Source(value.map(|v| v.parse().map_err(|_| bad(v))).transpose()?.unwrap_or(1.0))),
        "viewport" => Ok(Scale::Viewport(value.map(|v| v.parse().map_err(|_| bad(v))).transpose()?.unwrap_or(1.0))),
        "absolute" => {
            let v = value.ok_or_else(|| Error::Preset("absolute scale without size".to_string()))?;
            // absolute sizes are sometimes written as floats
            let px: f32 = v.parse().map_err(|_| bad(v))?;
            Ok(Scale::Absolute(px.max(1.0) as u32))
        }
        other => Err(Error::Preset(format!("unknown scale type {other}"))),
    }
}

/**
Parses preset text.  `read_source` loads each pass's shader relative to `base`.
*/
pub fn parse_preset(
    text: &str,
    base: &Path,
    read_source: impl Fn(&Path) -> Result<String, Error>,
) -> Result<Preset, Error> {
    let mut values: HashMap<String, String> = HashMap::new();
    for line in text.lines() {
        let line = line.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            return Err(Error::Preset(format!("expected key = value, got {line}")));
        };
        let value = value.trim().trim_matches('"').to_string();
        values.insert(key.trim().to_string(), value);
    }
    let get = |k: &str| values.get(k).map(String::as_str);

    let count: usize = get("shaders")
        .ok_or_else(|| Error::Preset("missing shaders".to_string()))?
        .parse()
        .map_err(|_| Error::Preset("shaders is not a number".to_string()))?;
    if count == 0 {
        return Err(Error::Preset("preset has no passes".to_string()));
    }

    let mut passes = Vec::with_capacity(count);
    for i in 0..count {
        let rel = get(&format!("shader{i}")).ok_or_else(|| Error::Preset(format!("missing shader{i}")))?;
        let path = base.join(rel);
        let source = read_source(&path)?;
        let mut pass = PassPreset::new(path, source);
        pass.alias = get(&format!("alias{i}")).filter(|a| !a.is_empty()).map(str::to_string);
        if let Some(f) = get(&format!("filter_linear{i}")) {
            pass.filter = Some(FilterMode::from_smooth(parse_bool(f)));
        }
        if let Some(w) = get(&format!("wrap_mode{i}")) {
            pass.wrap = WrapMode::parse(w).ok_or_else(|| Error::Preset(format!("bad wrap_mode{i} {w}")))?;
        }
        pass.mipmap_input = get(&format!("mipmap_input{i}")).is_some_and(parse_bool);
        pass.feedback = get(&format!("feedback{i}")).is_some_and(parse_bool);
        if let Some(m) = get(&format!("frame_count_mod{i}")) {
            pass.frame_count_mod = m
                .parse()
                .map_err(|_| Error::Preset(format!("bad frame_count_mod{i} {m}")))?;
        }
        if get(&format!("float_framebuffer{i}")).is_some_and(parse_bool) {
            pass.format = Some(PixelFormat::Rgba16Float);
        } else if get(&format!("srgb_framebuffer{i}")).is_some_and(parse_bool) {
            pass.format = Some(PixelFormat::Rgba8UnormSrgb);
        }

        let both_type = get(&format!("scale_type{i}"));
        let both_value = get(&format!("scale{i}"));
        let x_type = get(&format!("scale_type_x{i}")).or(both_type);
        let y_type = get(&format!("scale_type_y{i}")).or(both_type);
        if let Some(t) = x_type {
            pass.scale_x = Some(parse_scale(t, get(&format!("scale_x{i}")).or(both_value))?);
        }
        if let Some(t) = y_type {
            pass.scale_y = Some(parse_scale(t, get(&format!("scale_y{i}")).or(both_value))?);
        }
        passes.push(pass);
    }

    let mut luts = Vec::new();
    if let Some(names) = get("textures") {
        for name in names.split(';').map(str::trim).filter(|n| !n.is_empty()) {
            let rel = get(name).ok_or_else(|| Error::Preset(format!("texture {name} has no path")))?;
            let wrap = match get(&format!("{name}_wrap_mode")) {
                Some(w) => WrapMode::parse(w).ok_or_else(|| Error::Preset(format!("bad wrap mode {w}")))?,
                None => WrapMode::ClampToBorder,
            };
            luts.push(LutPreset {
                name: name.to_string(),
                path: base.join(rel),
                filter: FilterMode::from_smooth(get(&format!("{name}_linear")).is_some_and(parse_bool)),
                wrap,
                mipmap: get(&format!("{name}_mipmap")).is_some_and(parse_bool),
            });
        }
    }

    let mut parameters = Vec::new();
    if let Some(names) = get("parameters") {
        for name in names.split(';').map(str::trim).filter(|n| !n.is_empty()) {
            if let Some(v) = get(name) {
                let v = v
                    .parse()
                    .map_err(|_| Error::Preset(format!("parameter {name} is not a number")))?;
                parameters.push((name.to_string(), v));
            }
        }
    }

    Ok(Preset {
        path: base.to_path_buf(),
        passes,
        luts,
        parameters,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Result<Preset, Error> {
        parse_preset(text, Path::new("/presets"), |p| {
            Ok(format!("source of {}", p.display()))
        })
    }

    #[test]
    fn parses_two_pass_preset() {
        let preset = parse(
            r#"
            # blur then scanlines
            shaders = 2
            shader0 = "blur.slang"
            scale_type0 = viewport
            scale0 = 0.5
            filter_linear0 = true
            alias0 = Blurred
            shader1 = "scanlines.slang"
            frame_count_mod1 = 2
            "#,
        )
        .unwrap();
        assert_eq!(preset.passes.len(), 2);
        let p0 = &preset.passes[0];
        assert_eq!(p0.path, Path::new("/presets/blur.slang"));
        assert_eq!(p0.source, "source of /presets/blur.slang");
        assert_eq!(p0.scale_x, Some(Scale::Viewport(0.5)));
        assert_eq!(p0.filter, Some(FilterMode::Linear));
        assert_eq!(preset.alias_index("Blurred"), Some(0));
        let p1 = &preset.passes[1];
        assert!(p1.is_unscaled());
        assert_eq!(p1.effective_scale(true).0, Scale::Viewport(1.0));
        assert_eq!(p1.frame_count_mod, 2);
    }

    #[test]
    fn parses_luts_and_parameters() {
        let preset = parse(
            r#"
            shaders = 1
            shader0 = a.slang
            textures = "mask;noise"
            mask = mask.png
            mask_linear = true
            mask_mipmap = true
            noise = noise.png
            noise_wrap_mode = repeat
            parameters = "STRENGTH"
            STRENGTH = 0.25
            "#,
        )
        .unwrap();
        assert_eq!(preset.luts.len(), 2);
        assert_eq!(preset.luts[0].filter, FilterMode::Linear);
        assert!(preset.luts[0].mipmap);
        assert_eq!(preset.luts[1].wrap, WrapMode::Repeat);
        assert_eq!(preset.lut_index("noise"), Some(1));
        assert_eq!(preset.parameter("STRENGTH"), Some(0.25));
    }

    #[test]
    fn per_axis_scales() {
        let preset = parse(
            "shaders = 1\nshader0 = a\nscale_type_x0 = absolute\nscale_x0 = 320\nscale_type_y0 = source\nscale_y0 = 2.0\n",
        )
        .unwrap();
        assert_eq!(preset.passes[0].scale_x, Some(Scale::Absolute(320)));
        assert_eq!(preset.passes[0].scale_y, Some(Scale::Source(2.0)));
    }

    #[test]
    fn rejects_missing_passes() {
        assert!(parse("shaders = 2\nshader0 = a\n").is_err());
        assert!(parse("shaders = 0\n").is_err());
        assert!(parse("nonsense").is_err());
        assert!(parse("shaders = 1\nshader0 = a\nscale_type0 = sideways\n").is_err());
    }

    #[test]
    fn scale_resolution() {
        assert_eq!(Scale::Viewport(0.5).resolve(256, 1000), 500);
        assert_eq!(Scale::Source(2.0).resolve(256, 1000), 512);
        assert_eq!(Scale::Absolute(7).resolve(256, 1000), 7);
        assert_eq!(Scale::Source(0.0).resolve(256, 1000), 1);
    }
}
