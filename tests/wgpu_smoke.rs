// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Runs the engine on a real adapter.  Skipped on machines without one.

use framechain::config::{FrameInfo, VideoConfig};
use framechain::images::port::InputFrame;
use framechain::images::preset::{PassPreset, Preset, Scale};
use framechain::images::{Collaborators, Engine};
use framechain::pixel_formats::PixelFormat;
use framechain::wgpu_backend::WgpuBackend;

const PASSTHROUGH: &str = r#"
struct Params {
    MVP: mat4x4<f32>,
    OutputSize: vec4<f32>,
    FrameCount: u32,
}

@group(0) @binding(0) var<uniform> params: Params;
@group(0) @binding(1) var Source: texture_2d<f32>;
@group(0) @binding(2) var SourceSampler: sampler;

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
    let pulse = f32(params.FrameCount % 2u) * 0.1;
    return textureSample(Source, SourceSampler, in.uv) + vec4<f32>(pulse);
}
"#;

fn backend() -> Option<WgpuBackend> {
    match test_executors::spin_on(WgpuBackend::offscreen(128, 96)) {
        Ok(backend) => Some(backend),
        Err(e) => {
            println!("skipping: no adapter ({e})");
            None
        }
    }
}

#[test]
fn frames_render_through_a_two_pass_chain() {
    let Some(backend) = backend() else { return };
    let config = VideoConfig {
        width: 128,
        height: 96,
        black_frame_insertion: 1,
        bfi_dark_frames: 1,
        ..VideoConfig::default()
    };
    let mut engine = Engine::new(Box::new(backend), config, Collaborators::default()).unwrap();
    let preset = Preset {
        path: "smoke.slangp".into(),
        passes: vec![
            PassPreset::new("half.wgsl", PASSTHROUGH).with_scale(Scale::Viewport(0.5)),
            PassPreset::new("final.wgsl", PASSTHROUGH),
        ],
        ..Default::default()
    };
    engine.set_shader_preset(preset).unwrap();

    let pixels: Vec<u8> = (0..32 * 24 * 4).map(|i| (i % 251) as u8).collect();
    for frame in 1..=4 {
        let input = InputFrame {
            pixels: &pixels,
            width: 32,
            height: 24,
            pitch: 32 * 4,
            format: PixelFormat::Bgrx8Unorm,
        };
        engine
            .frame(Some(input), frame, Some("smoke"), &FrameInfo::default())
            .unwrap();
        assert!(!engine.port().is_frame_dupe_locked());
    }
    assert_eq!(engine.port().frames_presented(), 4);
    assert_eq!(engine.chain().unwrap().pass(0).unwrap().size(), (64, 48));
}

#[test]
fn resize_and_shader_removal() {
    let Some(backend) = backend() else { return };
    let config = VideoConfig {
        width: 128,
        height: 96,
        ..VideoConfig::default()
    };
    let mut engine = Engine::new(Box::new(backend), config, Collaborators::default()).unwrap();
    let pixels = vec![0xffu8; 16 * 16 * 2];
    let input = || InputFrame {
        pixels: &pixels,
        width: 16,
        height: 16,
        pitch: 32,
        format: PixelFormat::B5G6R5Unorm,
    };
    engine.frame(Some(input()), 1, None, &FrameInfo::default()).unwrap();
    engine.resize(200, 150);
    engine.frame(Some(input()), 2, None, &FrameInfo::default()).unwrap();
    assert_eq!(engine.viewport_info().full_width, 200);
    engine.set_shader(None).unwrap();
    engine.frame(None, 3, None, &FrameInfo::default()).unwrap();
}
