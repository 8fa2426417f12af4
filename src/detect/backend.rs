use anyhow::Result;

use crate::detect::result::{DetectOptions, RawDetection};
use crate::frame::Frame;

/// Detector backend trait.
///
/// The model behind a backend is a black box: given a frame it returns class
/// labels, scores and pixel bounding boxes. Backends must treat the frame as
/// borrowed for the duration of the call only.
///
/// An `Err` is a transient failure for that sample. The scheduler reports it
/// and tries again on the next sampling interval.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame.
    ///
    /// Implementations should drop results scoring below
    /// `options.min_score` and return at most `options.max_results` entries.
    fn detect(&mut self, frame: &Frame, options: DetectOptions) -> Result<Vec<RawDetection>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
