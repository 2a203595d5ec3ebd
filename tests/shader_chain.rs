// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Loading, sizing and replacing shader chains through the engine.

use framechain::config::{FrameInfo, VideoConfig};
use framechain::headless::HeadlessBackend;
use framechain::images::pass_chain::ChainOutput;
use framechain::images::port::InputFrame;
use framechain::images::preset::{PassPreset, Preset, Scale};
use framechain::images::shader::{
    CompiledPass, Reflection, ShaderCompiler, TextureBinding, TextureSemantic, UniformMember, UniformSemantic,
};
use framechain::images::{Collaborators, Engine};
use framechain::pixel_formats::PixelFormat;
use framechain::{Error, ShaderCode, ShaderStage};

/// Compiles every pass to a passthrough that samples `Source`.  Sources containing `broken` fail.
#[derive(Debug)]
struct ScriptedCompiler;

impl ShaderCompiler for ScriptedCompiler {
    fn compile(&self, index: usize, pass: &PassPreset, _preset: &Preset) -> Result<CompiledPass, Error> {
        if pass.source.contains("broken") {
            return Err(Error::ShaderCompile {
                pass: index,
                message: "scripted failure".to_string(),
            });
        }
        let stage = |entry_point: &str| ShaderStage {
            code: ShaderCode::Wgsl(pass.source.clone()),
            entry_point: entry_point.to_string(),
        };
        Ok(CompiledPass {
            vertex: stage("vs_main"),
            fragment: stage("fs_main"),
            reflection: Reflection {
                textures: vec![TextureBinding {
                    semantic: TextureSemantic::Source,
                    binding: 1,
                    sampler_binding: Some(2),
                }],
                uniforms: vec![
                    UniformMember {
                        semantic: UniformSemantic::Mvp,
                        offset: 0,
                    },
                    UniformMember {
                        semantic: UniformSemantic::OutputSize,
                        offset: 64,
                    },
                ],
                uniform_binding: Some(0),
                uniform_size: 80,
            },
        })
    }
}

fn engine(backend: HeadlessBackend) -> Engine {
    Engine::new(Box::new(backend), VideoConfig::default(), Collaborators::new(Box::new(ScriptedCompiler))).unwrap()
}

fn two_pass_preset() -> Preset {
    Preset {
        path: "two-pass.slangp".into(),
        passes: vec![
            PassPreset::new("blur.slang", "blur").with_scale(Scale::Viewport(0.5)),
            PassPreset::new("final.slang", "final"),
        ],
        ..Default::default()
    }
}

fn present(engine: &mut Engine, frame_count: u64) {
    let pixels = vec![0x80u8; 320 * 240 * 4];
    let input = InputFrame {
        pixels: &pixels,
        width: 320,
        height: 240,
        pitch: 320 * 4,
        format: PixelFormat::Bgrx8Unorm,
    };
    engine.frame(Some(input), frame_count, None, &FrameInfo::default()).unwrap();
}

#[test]
fn passes_are_sized_from_the_viewport() {
    let mut engine = engine(HeadlessBackend::new(640, 480));
    engine.set_shader_preset(two_pass_preset()).unwrap();
    present(&mut engine, 1);

    let viewport = engine.viewport_info();
    let chain = engine.chain().unwrap();
    assert_eq!(chain.len(), 2);
    assert_eq!(chain.pass(0).unwrap().size(), (viewport.width / 2, viewport.height / 2));
    assert_eq!(chain.pass(0).unwrap().output().size(), (viewport.width / 2, viewport.height / 2));
    assert!(chain.pass(1).unwrap().renders_to_final());
    assert_eq!(chain.pass(1).unwrap().size(), (viewport.width, viewport.height));
}

#[test]
fn feedback_outputs_swap_every_frame() {
    let mut engine = engine(HeadlessBackend::new(640, 480));
    let mut preset = two_pass_preset();
    preset.passes[0].feedback = true;
    engine.set_shader_preset(preset).unwrap();

    present(&mut engine, 1);
    let pass = engine.chain().unwrap().pass(0).unwrap();
    let (output, feedback) = (pass.output().resource(), pass.feedback().unwrap().resource());
    assert!(output.is_some() && feedback.is_some());
    assert_ne!(output, feedback);

    present(&mut engine, 2);
    let pass = engine.chain().unwrap().pass(0).unwrap();
    assert_eq!(pass.output().resource(), feedback);
    assert_eq!(pass.feedback().unwrap().resource(), output);
}

#[test]
fn a_failed_compile_keeps_the_previous_chain() {
    let mut engine = engine(HeadlessBackend::new(640, 480));
    engine.set_shader_preset(two_pass_preset()).unwrap();
    present(&mut engine, 1);

    let mut broken = two_pass_preset();
    broken.path = "broken.slangp".into();
    broken.passes[1].source = "broken".to_string();
    let err = engine.set_shader_preset(broken).unwrap_err();
    assert!(matches!(err, Error::ShaderCompile { pass: 1, .. }), "{err}");

    let chain = engine.chain().unwrap();
    assert_eq!(chain.preset().path.to_str(), Some("two-pass.slangp"));
    present(&mut engine, 2);
}

#[test]
fn a_rejected_pipeline_is_a_compile_error() {
    let backend = HeadlessBackend::new(640, 480).failing_pipelines_labeled("final.slang");
    let probe = backend.probe();
    let mut engine = engine(backend);
    let pipelines_before = probe.stats().live_pipelines;

    let err = engine.set_shader_preset(two_pass_preset()).unwrap_err();
    assert!(matches!(err, Error::ShaderCompile { pass: 1, .. }), "{err}");
    assert!(engine.chain().is_none());
    // pass 0's pipeline was released along with the half-built chain
    assert_eq!(probe.stats().live_pipelines, pipelines_before);
}

#[test]
fn removing_the_chain_releases_its_resources() {
    let backend = HeadlessBackend::new(640, 480);
    let probe = backend.probe();
    let mut engine = engine(backend);
    present(&mut engine, 1);
    let textures_before = probe.stats().live_textures;

    engine.set_shader_preset(two_pass_preset()).unwrap();
    present(&mut engine, 2);
    assert!(probe.stats().live_textures > textures_before);

    engine.set_shader(None).unwrap();
    present(&mut engine, 3);
    assert!(engine.chain().is_none());
    assert_eq!(probe.stats().live_textures, textures_before);
}

#[test]
fn a_missing_render_target_shows_the_last_good_pass() {
    let backend = HeadlessBackend::new(640, 480).failing_textures_labeled("pass 1");
    let probe = backend.probe();
    let mut engine = engine(backend);
    let mut preset = two_pass_preset();
    preset
        .passes
        .insert(1, PassPreset::new("sharpen.slang", "sharpen").with_scale(Scale::Viewport(1.0)));
    engine.set_shader_preset(preset).unwrap();

    for frame in 1..=3 {
        present(&mut engine, frame);
        assert_eq!(probe.presents(), frame);
        assert_eq!(engine.port().last_output(), Some(ChainOutput::Pass(0)));
    }
    let chain = engine.chain().unwrap();
    assert!(chain.pass(0).unwrap().output().is_created());
    assert!(!chain.pass(1).unwrap().output().is_created());
}
