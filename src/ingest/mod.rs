//! Frame ingestion sources.
//!
//! Live capture is not part of this crate; the measurement core only needs
//! "the current frame" whenever the scheduler samples. This module provides:
//! - the `FrameSource` trait the scheduler pulls from
//! - a synthetic `stub://` source for the daemon, demo and tests
//!
//! Embedders with a real camera implement `FrameSource` themselves.

use anyhow::{anyhow, Result};

use crate::frame::Frame;

pub mod stub;

pub use stub::{StubConfig, StubSource};

/// Produces frames on demand.
pub trait FrameSource {
    /// Capture (or copy out) the most recent frame.
    fn next_frame(&mut self) -> Result<Frame>;

    /// Check if the source is healthy.
    fn is_healthy(&self) -> bool {
        true
    }

    /// Frames produced so far.
    fn frames_captured(&self) -> u64;
}

/// Open a source by URL. Only synthetic `stub://` sources are built in.
pub fn open_source(url: &str, width: u32, height: u32) -> Result<Box<dyn FrameSource>> {
    if url.starts_with("stub://") {
        let mut source = StubSource::new(StubConfig {
            url: url.to_string(),
            width,
            height,
        });
        source.connect()?;
        Ok(Box::new(source))
    } else {
        Err(anyhow!(
            "unsupported frame source {:?}: only stub:// sources are built in",
            url
        ))
    }
}
