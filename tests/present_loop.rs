// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Frame pacing: black-frame insertion, subframes and presentation settings.

use framechain::config::{FrameInfo, VideoConfig};
use framechain::headless::{HeadlessBackend, HeadlessProbe};
use framechain::images::command_list::Command;
use framechain::images::pass_chain::ChainOutput;
use framechain::images::port::{InputFrame, PortFlags};
use framechain::images::shader::ShaderCompiler;
use framechain::images::{Collaborators, Engine};
use framechain::pixel_formats::PixelFormat;

/// The chain is never set in these tests, so nothing is compiled.
#[derive(Debug)]
struct NoCompiler;

impl ShaderCompiler for NoCompiler {
    fn compile(
        &self,
        index: usize,
        _pass: &framechain::images::preset::PassPreset,
        _preset: &framechain::images::preset::Preset,
    ) -> Result<framechain::images::shader::CompiledPass, framechain::Error> {
        Err(framechain::Error::ShaderCompile {
            pass: index,
            message: "no compiler".to_string(),
        })
    }
}

fn engine(config: VideoConfig) -> (Engine, HeadlessProbe) {
    engine_on(HeadlessBackend::new(config.width, config.height), config)
}

fn engine_on(backend: HeadlessBackend, config: VideoConfig) -> (Engine, HeadlessProbe) {
    let probe = backend.probe();
    let engine = Engine::new(Box::new(backend), config, Collaborators::new(Box::new(NoCompiler))).unwrap();
    (engine, probe)
}

const PIXELS: [u8; 64 * 48 * 4] = [0x40; 64 * 48 * 4];

fn input() -> InputFrame<'static> {
    InputFrame {
        pixels: &PIXELS,
        width: 64,
        height: 48,
        pitch: 64 * 4,
        format: PixelFormat::Bgrx8Unorm,
    }
}

#[test]
fn black_frame_insertion_presents_extra_frames() {
    let config = VideoConfig {
        black_frame_insertion: 3,
        bfi_dark_frames: 2,
        ..VideoConfig::default()
    };
    let (mut engine, probe) = engine(config);
    for frame in 1..=5 {
        assert!(!engine.port().is_frame_dupe_locked());
        engine.frame(Some(input()), frame, None, &FrameInfo::default()).unwrap();
        assert!(!engine.port().is_frame_dupe_locked());
        assert_eq!(probe.presents(), frame * 4);
    }
    // the last present of each frame is a dark one: cleared, nothing drawn
    let last = probe.stats().last_submission;
    assert!(last.iter().any(|c| matches!(c, Command::ClearRenderTarget { .. })));
    assert!(!last.iter().any(|c| matches!(c, Command::Draw { .. })));
}

#[test]
fn subframes_present_once_each() {
    let config = VideoConfig {
        shader_subframes: 3,
        ..VideoConfig::default()
    };
    let (mut engine, probe) = engine(config);
    engine.frame(Some(input()), 1, None, &FrameInfo::default()).unwrap();
    assert_eq!(probe.presents(), 3);
    assert!(!engine.port().is_frame_dupe_locked());
}

#[test]
fn repeats_stop_while_paused_or_nonblocking() {
    let config = VideoConfig {
        black_frame_insertion: 2,
        bfi_dark_frames: 1,
        ..VideoConfig::default()
    };
    let (mut engine, probe) = engine(config);
    let paused = FrameInfo {
        paused: true,
        ..FrameInfo::default()
    };
    engine.frame(Some(input()), 1, None, &paused).unwrap();
    assert_eq!(probe.presents(), 1);

    engine.set_nonblock_state(true);
    engine.frame(Some(input()), 2, None, &FrameInfo::default()).unwrap();
    assert_eq!(probe.presents(), 2);
    assert_eq!(probe.stats().sync_intervals.last(), Some(&0));

    engine.set_nonblock_state(false);
    engine.frame(Some(input()), 3, None, &FrameInfo::default()).unwrap();
    assert_eq!(probe.presents(), 5);
    assert_eq!(probe.stats().sync_intervals.last(), Some(&1));
}

#[test]
fn repeating_a_frame_without_input() {
    let (mut engine, probe) = engine(VideoConfig::default());
    engine.frame(Some(input()), 1, None, &FrameInfo::default()).unwrap();
    engine.frame(None, 2, None, &FrameInfo::default()).unwrap();
    assert_eq!(probe.presents(), 2);
    assert_eq!(engine.port().frames_presented(), 2);
}

#[test]
fn resize_recreates_the_swapchain() {
    let (mut engine, probe) = engine(VideoConfig::default());
    engine.frame(Some(input()), 1, None, &FrameInfo::default()).unwrap();
    let resizes = probe.stats().swapchain_resizes;

    engine.resize(1280, 720);
    engine.frame(Some(input()), 2, None, &FrameInfo::default()).unwrap();
    assert_eq!(probe.stats().swapchain_resizes, resizes + 1);
    let viewport = engine.viewport_info();
    assert_eq!((viewport.full_width, viewport.full_height), (1280, 720));
    assert!(viewport.width <= 1280 && viewport.height <= 720);
}

#[test]
fn messages_draw_for_one_frame() {
    let (mut engine, probe) = engine(VideoConfig::default());
    engine.frame(Some(input()), 1, None, &FrameInfo::default()).unwrap();
    let plain = probe.stats().last_submission.len();

    engine.frame(Some(input()), 2, Some("Saved state 1"), &FrameInfo::default()).unwrap();
    let with_message = probe.stats().last_submission.len();
    assert!(with_message > plain);
    assert_eq!(engine.scene().pending_messages(), 0);
}

#[test]
fn empty_frames_show_the_previous_one() {
    let (mut engine, probe) = engine(VideoConfig::default());
    engine.frame(Some(input()), 1, None, &FrameInfo::default()).unwrap();
    let current = engine.port().history().current().and_then(|t| t.resource());
    assert!(current.is_some());

    let empty = InputFrame {
        pixels: &[],
        width: 0,
        height: 0,
        pitch: 0,
        format: PixelFormat::Bgrx8Unorm,
    };
    engine.frame(Some(empty), 2, None, &FrameInfo::default()).unwrap();
    assert_eq!(probe.presents(), 2);
    assert_eq!(engine.port().history().size(), Some((64, 48)));
    assert_eq!(engine.port().history().current().and_then(|t| t.resource()), current);
    assert_eq!(engine.port().last_output(), Some(ChainOutput::Original));
}

#[test]
fn frames_present_without_a_history_ring() {
    let backend = HeadlessBackend::new(640, 480).failing_textures_labeled("history");
    let (mut engine, probe) = engine_on(backend, VideoConfig::default());
    for frame in 1..=3 {
        engine.frame(Some(input()), frame, None, &FrameInfo::default()).unwrap();
        assert_eq!(probe.presents(), frame);
        assert!(engine.port().history().current().is_none());
        assert_eq!(engine.port().last_output(), None);
        // the ring is rebuilt on the next frame
        assert!(engine.port().flags().contains(PortFlags::INIT_HISTORY));
    }
    assert_eq!(engine.port().frames_presented(), 3);
}
