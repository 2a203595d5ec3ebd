// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Configuration.

[`VideoConfig`] is fixed when the [`Engine`](crate::images::Engine) is created; a few fields
change afterwards through runtime hooks such as `set_rotation`.  [`FrameInfo`] travels with
every frame.
*/

use crate::images::device::HeapCapacities;
use crate::images::sprites::DEFAULT_SPRITE_CAPACITY;
use std::time::Duration;

/// Environment toggle that logs every command list as it closes.
pub const DUMP_COMMANDS_ENV: &str = "FRAMECHAIN_DUMP_COMMANDS";

/// Tone mapping for HDR back buffers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HdrConfig {
    pub max_nits: f32,
    pub paper_white_nits: f32,
    pub contrast: f32,
    pub expand_gamut: bool,
}

impl Default for HdrConfig {
    fn default() -> Self {
        HdrConfig {
            max_nits: 1000.0,
            paper_white_nits: 200.0,
            contrast: 1.0,
            expand_gamut: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VideoConfig {
    pub vsync: bool,
    /// Vertical blanks per present while vsync is on.
    pub swap_interval: u32,
    /// Extra frames presented after each real one; 0 disables black-frame insertion.
    pub black_frame_insertion: u32,
    /// How many of the inserted frames are black.  The rest repeat the real frame.
    pub bfi_dark_frames: u32,
    /// Times each input frame is shaded and presented; 1 disables subframes.
    pub shader_subframes: u32,
    pub keep_aspect: bool,
    pub scale_integer: bool,
    /// Display aspect; `None` follows the core.
    pub aspect_ratio: Option<f32>,
    pub smooth: bool,
    /// In 90° steps.
    pub rotation: u32,
    pub fullscreen: bool,
    pub width: u32,
    pub height: u32,
    pub sprite_capacity: usize,
    pub heaps: HeapCapacities,
    /// `None` waits forever.
    pub fence_timeout: Option<Duration>,
    pub hdr: Option<HdrConfig>,
    pub menu_fullscreen: bool,
    pub overlay_enable: bool,
    pub overlay_fullscreen: bool,
    pub dump_commands: bool,
}

impl Default for VideoConfig {
    fn default() -> Self {
        VideoConfig {
            vsync: true,
            swap_interval: 1,
            black_frame_insertion: 0,
            bfi_dark_frames: 0,
            shader_subframes: 1,
            keep_aspect: true,
            scale_integer: false,
            aspect_ratio: None,
            smooth: true,
            rotation: 0,
            fullscreen: false,
            width: 640,
            height: 480,
            sprite_capacity: DEFAULT_SPRITE_CAPACITY,
            heaps: HeapCapacities::default(),
            fence_timeout: None,
            hdr: None,
            menu_fullscreen: true,
            overlay_enable: false,
            overlay_fullscreen: false,
            dump_commands: false,
        }
    }
}

impl VideoConfig {
    /// Applies debug toggles from the environment.
    pub fn with_env_overrides(mut self) -> Self {
        if std::env::var(DUMP_COMMANDS_ENV).is_ok_and(|v| v == "1") {
            self.dump_commands = true;
        }
        self
    }

    /// Sync interval for present: 0 without vsync.
    pub fn sync_interval(&self) -> u32 {
        if self.vsync { self.swap_interval.max(1) } else { 0 }
    }
}

/// State of the frontend for one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameInfo {
    pub rewinding: bool,
    pub fast_forward: bool,
    pub paused: bool,
    pub slow_motion: bool,
    pub menu_is_alive: bool,
    /// Microseconds since the previous frame.
    pub frame_time_delta: u32,
    pub original_fps: f32,
    pub core_aspect: f32,
    pub statistics_show: bool,
}

impl Default for FrameInfo {
    fn default() -> Self {
        FrameInfo {
            rewinding: false,
            fast_forward: false,
            paused: false,
            slow_motion: false,
            menu_is_alive: false,
            frame_time_delta: 0,
            original_fps: 60.0,
            core_aspect: 4.0 / 3.0,
            statistics_show: false,
        }
    }
}

impl FrameInfo {
    /// Frames are not paced to the display right now, so repeating them would be wrong.
    pub fn suppresses_repeats(&self) -> bool {
        self.fast_forward || self.slow_motion || self.paused || self.menu_is_alive
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_interval_follows_vsync() {
        let mut config = VideoConfig::default();
        assert_eq!(config.sync_interval(), 1);
        config.swap_interval = 2;
        assert_eq!(config.sync_interval(), 2);
        config.vsync = false;
        assert_eq!(config.sync_interval(), 0);
    }

    #[test]
    fn repeats_are_suppressed_while_paused() {
        let info = FrameInfo {
            paused: true,
            ..FrameInfo::default()
        };
        assert!(info.suppresses_repeats());
        assert!(!FrameInfo::default().suppresses_repeats());
    }
}
