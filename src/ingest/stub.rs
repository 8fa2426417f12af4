//! Synthetic `stub://` frame source.
//!
//! Produces deterministic RGB frames with a slowly drifting pattern so that
//! consecutive frames differ. Pixel content is irrelevant to `SceneBackend`,
//! which synthesizes its own detections; the frames only exercise the
//! frame -> backend handoff.

use anyhow::{anyhow, Result};

use super::FrameSource;
use crate::frame::Frame;

/// Configuration for a synthetic source.
#[derive(Clone, Debug)]
pub struct StubConfig {
    /// Source URL, must start with `stub://`.
    pub url: String,
    pub width: u32,
    pub height: u32,
}

impl Default for StubConfig {
    fn default() -> Self {
        Self {
            url: "stub://bench".to_string(),
            width: 640,
            height: 480,
        }
    }
}

pub struct StubSource {
    config: StubConfig,
    frame_count: u64,
    /// Changes every 50 frames to simulate scene changes.
    scene_state: u8,
    connected: bool,
}

impl StubSource {
    pub fn new(config: StubConfig) -> Self {
        Self {
            config,
            frame_count: 0,
            scene_state: 0,
            connected: false,
        }
    }

    /// Synthetic sources are always reachable.
    pub fn connect(&mut self) -> Result<()> {
        log::info!("StubSource: connected to {} (synthetic)", self.config.url);
        self.connected = true;
        Ok(())
    }

    fn generate_pixels(&mut self) -> Vec<u8> {
        let pixel_count = (self.config.width as usize) * (self.config.height as usize) * 3;

        if self.frame_count % 50 == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }

        let mut pixels = vec![0u8; pixel_count];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 + self.frame_count + self.scene_state as u64) % 256) as u8;
        }
        pixels
    }
}

impl FrameSource for StubSource {
    fn next_frame(&mut self) -> Result<Frame> {
        if !self.connected {
            return Err(anyhow!("{} is not connected", self.config.url));
        }
        self.frame_count += 1;
        let pixels = self.generate_pixels();
        Ok(Frame::new(
            pixels,
            self.config.width,
            self.config.height,
            self.frame_count,
        ))
    }

    fn is_healthy(&self) -> bool {
        self.connected
    }

    fn frames_captured(&self) -> u64 {
        self.frame_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> StubConfig {
        StubConfig {
            url: "stub://test".to_string(),
            width: 16,
            height: 8,
        }
    }

    #[test]
    fn stub_source_requires_connect() {
        let mut source = StubSource::new(small_config());
        assert!(!source.is_healthy());
        assert!(source.next_frame().is_err());
    }

    #[test]
    fn stub_source_produces_sequenced_rgb_frames() -> Result<()> {
        let mut source = StubSource::new(small_config());
        source.connect()?;

        let first = source.next_frame()?;
        let second = source.next_frame()?;
        assert!(first.is_rgb());
        assert_eq!(first.sequence, 1);
        assert_eq!(second.sequence, 2);
        assert_ne!(first.pixels(), second.pixels());
        assert_eq!(source.frames_captured(), 2);
        Ok(())
    }
}
