// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Reflects WGSL pass sources with naga.

A pass is one WGSL module with a vertex and a fragment entry point.  Everything lives in bind
group 0:

* each texture is a global whose name resolves through [`TextureSemantic::from_name`]
  (`Source`, `Original`, `PassOutput1`, a pass alias, a lookup-texture name, ...);
* a texture's sampler is the global named `<texture>Sampler` or `<texture>_sampler`, or the
  module's only sampler;
* uniforms are the members of the one `var<uniform>` struct, named as in
  [`UniformSemantic::from_name`].  A bare `var<uniform>` is a single member at offset 0.
*/

use crate::Error;
use crate::images::preset::{PassPreset, Preset};
use crate::images::shader::{
    CompiledPass, Reflection, ShaderCompiler, TextureBinding, TextureSemantic, UniformMember, UniformSemantic,
};
use crate::imp::{ShaderCode, ShaderStage};
use naga::valid::{Capabilities, ValidationFlags, Validator};
use naga::{AddressSpace, Module, TypeInner};

/// The [`ShaderCompiler`] used with the wgpu backend.
#[derive(Debug, Default, Clone, Copy)]
pub struct WgslCompiler;

struct Global<'a> {
    name: &'a str,
    binding: u32,
    inner: &'a TypeInner,
    ty: naga::Handle<naga::Type>,
}

fn globals<'a>(module: &'a Module, index: usize) -> Result<Vec<(AddressSpace, Global<'a>)>, Error> {
    let mut out = Vec::new();
    for (_, var) in module.global_variables.iter() {
        let Some(binding) = &var.binding else {
            continue;
        };
        let name = var.name.as_deref().unwrap_or("");
        if binding.group != 0 {
            return Err(Error::ShaderCompile {
                pass: index,
                message: format!("{name} is in bind group {}; passes only use group 0", binding.group),
            });
        }
        out.push((
            var.space,
            Global {
                name,
                binding: binding.binding,
                inner: &module.types[var.ty].inner,
                ty: var.ty,
            },
        ));
    }
    Ok(out)
}

fn entry_point(module: &Module, stage: naga::ShaderStage, index: usize) -> Result<String, Error> {
    module
        .entry_points
        .iter()
        .find(|e| e.stage == stage)
        .map(|e| e.name.clone())
        .ok_or_else(|| Error::ShaderCompile {
            pass: index,
            message: format!("no {stage:?} entry point"),
        })
}

fn reflect(module: &Module, index: usize, preset: &Preset) -> Result<Reflection, Error> {
    let globals = globals(module, index)?;
    let samplers: Vec<&Global<'_>> = globals
        .iter()
        .filter(|(_, g)| matches!(g.inner, TypeInner::Sampler { .. }))
        .map(|(_, g)| g)
        .collect();

    let mut reflection = Reflection::default();
    for (space, global) in &globals {
        match global.inner {
            TypeInner::Image { .. } => {
                let semantic = TextureSemantic::from_name(global.name, preset).ok_or_else(|| Error::ShaderCompile {
                    pass: index,
                    message: format!("unknown texture {}", global.name),
                })?;
                let named = [format!("{}Sampler", global.name), format!("{}_sampler", global.name)];
                let sampler = samplers
                    .iter()
                    .find(|s| named.iter().any(|n| n == s.name))
                    .or(match samplers.as_slice() {
                        [only] => Some(only),
                        _ => None,
                    });
                reflection.textures.push(TextureBinding {
                    semantic,
                    binding: global.binding,
                    sampler_binding: sampler.map(|s| s.binding),
                });
            }
            _ if *space == AddressSpace::Uniform => {
                if reflection.uniform_binding.is_some() {
                    return Err(Error::ShaderCompile {
                        pass: index,
                        message: "more than one uniform buffer".to_string(),
                    });
                }
                reflection.uniform_binding = Some(global.binding);
                reflection.uniform_size = module.types[global.ty].inner.size(module.to_ctx()) as usize;
                match global.inner {
                    TypeInner::Struct { members, .. } => {
                        for member in members {
                            let Some(name) = &member.name else { continue };
                            reflection.uniforms.push(UniformMember {
                                semantic: UniformSemantic::from_name(name, preset),
                                offset: member.offset as usize,
                            });
                        }
                    }
                    _ => reflection.uniforms.push(UniformMember {
                        semantic: UniformSemantic::from_name(global.name, preset),
                        offset: 0,
                    }),
                }
            }
            _ => {}
        }
    }
    Ok(reflection)
}

impl ShaderCompiler for WgslCompiler {
    fn compile(&self, index: usize, pass: &PassPreset, preset: &Preset) -> Result<CompiledPass, Error> {
        let source = pass.source.as_str();
        let module = naga::front::wgsl::parse_str(source).map_err(|e| Error::ShaderCompile {
            pass: index,
            message: e.emit_to_string(source),
        })?;
        Validator::new(ValidationFlags::all(), Capabilities::empty())
            .validate(&module)
            .map_err(|e| Error::ShaderCompile {
                pass: index,
                message: e.to_string(),
            })?;
        let reflection = reflect(&module, index, preset)?;
        let stage = |entry_point| ShaderStage {
            code: ShaderCode::Wgsl(pass.source.clone()),
            entry_point,
        };
        let compiled = CompiledPass {
            vertex: stage(entry_point(&module, naga::ShaderStage::Vertex, index)?),
            fragment: stage(entry_point(&module, naga::ShaderStage::Fragment, index)?),
            reflection,
        };
        logwise::trace_sync!(
            "Reflected pass {index}: {textures} textures, {uniforms} uniforms",
            index = index,
            textures = compiled.reflection.textures.len(),
            uniforms = compiled.reflection.uniforms.len()
        );
        Ok(compiled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PASS: &str = r#"
struct Params {
    MVP: mat4x4<f32>,
    SourceSize: vec4<f32>,
    FrameCount: u32,
    scanline_strength: f32,
}

@group(0) @binding(0) var<uniform> params: Params;
@group(0) @binding(1) var Source: texture_2d<f32>;
@group(0) @binding(2) var SourceSampler: sampler;
@group(0) @binding(3) var Original: texture_2d<f32>;
@group(0) @binding(4) var Original_sampler: sampler;

struct VertexOut {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

@vertex
fn vs_main(@location(0) pos: vec2<f32>, @location(1) uv: vec2<f32>) -> VertexOut {
    var out: VertexOut;
    out.position = params.MVP * vec4<f32>(pos, 0.0, 1.0);
    out.uv = uv;
    return out;
}

@fragment
fn fs_main(in: VertexOut) -> @location(0) vec4<f32> {
    let a = textureSample(Source, SourceSampler, in.uv);
    let b = textureSample(Original, Original_sampler, in.uv);
    return mix(a, b, params.scanline_strength);
}
"#;

    fn compile(source: &str) -> Result<CompiledPass, Error> {
        let preset = Preset {
            passes: vec![PassPreset::new("crt.wgsl", source)],
            ..Default::default()
        };
        WgslCompiler.compile(0, &preset.passes[0], &preset)
    }

    #[test]
    fn reflects_textures_samplers_and_uniforms() {
        let compiled = compile(PASS).unwrap();
        assert_eq!(compiled.vertex.entry_point, "vs_main");
        assert_eq!(compiled.fragment.entry_point, "fs_main");
        let r = &compiled.reflection;
        assert_eq!(r.uniform_binding, Some(0));
        assert_eq!(r.uniform_size, 96);
        assert_eq!(
            r.textures,
            vec![
                TextureBinding {
                    semantic: TextureSemantic::Source,
                    binding: 1,
                    sampler_binding: Some(2),
                },
                TextureBinding {
                    semantic: TextureSemantic::Original,
                    binding: 3,
                    sampler_binding: Some(4),
                },
            ]
        );
        let offsets: Vec<_> = r.uniforms.iter().map(|u| (u.semantic.clone(), u.offset)).collect();
        assert_eq!(offsets[0], (UniformSemantic::Mvp, 0));
        assert_eq!(offsets[1], (UniformSemantic::TextureSize(TextureSemantic::Source), 64));
        assert_eq!(offsets[2], (UniformSemantic::FrameCount, 80));
        assert_eq!(offsets[3], (UniformSemantic::Parameter("scanline_strength".to_string()), 84));
    }

    #[test]
    fn unknown_textures_fail() {
        let source = PASS.replace("Original", "Mystery");
        let err = compile(&source).unwrap_err();
        assert!(matches!(err, Error::ShaderCompile { pass: 0, .. }), "{err}");
    }

    #[test]
    fn syntax_errors_carry_the_message() {
        let err = compile("fn broken( {").unwrap_err();
        match err {
            Error::ShaderCompile { message, .. } => assert!(!message.is_empty()),
            other => panic!("unexpected {other}"),
        }
    }

    #[test]
    fn other_groups_are_rejected() {
        let source = PASS.replace("@group(0) @binding(3)", "@group(1) @binding(3)");
        assert!(compile(&source).is_err());
    }
}
