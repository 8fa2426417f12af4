use std::collections::VecDeque;

use anyhow::{anyhow, Result};

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{DetectOptions, RawDetection};
use crate::frame::Frame;

enum Scripted {
    Detections(Vec<RawDetection>),
    Failure(String),
}

/// Scripted backend for tests and dry runs.
///
/// Each `detect` call pops the next scripted response. Once the script is
/// exhausted every call returns the fallback batch (empty by default).
/// Responses are cut to `min_score` / `max_results` like a real model would.
pub struct StubBackend {
    script: VecDeque<Scripted>,
    fallback: Vec<RawDetection>,
    calls: u64,
}

impl StubBackend {
    pub fn new() -> Self {
        Self {
            script: VecDeque::new(),
            fallback: Vec::new(),
            calls: 0,
        }
    }

    /// Queue a successful response.
    pub fn push_detections(&mut self, detections: Vec<RawDetection>) -> &mut Self {
        self.script.push_back(Scripted::Detections(detections));
        self
    }

    /// Queue a failed call.
    pub fn push_failure(&mut self, message: impl Into<String>) -> &mut Self {
        self.script.push_back(Scripted::Failure(message.into()));
        self
    }

    /// Response used once the script runs out.
    pub fn with_fallback(mut self, detections: Vec<RawDetection>) -> Self {
        self.fallback = detections;
        self
    }

    /// Number of `detect` calls so far.
    pub fn calls(&self) -> u64 {
        self.calls
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, _frame: &Frame, options: DetectOptions) -> Result<Vec<RawDetection>> {
        self.calls += 1;
        let batch = match self.script.pop_front() {
            Some(Scripted::Detections(batch)) => batch,
            Some(Scripted::Failure(message)) => return Err(anyhow!(message)),
            None => self.fallback.clone(),
        };
        Ok(batch
            .into_iter()
            .filter(|det| det.score >= options.min_score)
            .take(options.max_results)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> Frame {
        Frame::new(vec![0u8; 12], 2, 2, 1)
    }

    #[test]
    fn stub_backend_replays_script_then_fallback() {
        let mut backend = StubBackend::new()
            .with_fallback(vec![RawDetection::new("apple", 0.9, [0.0, 0.0, 10.0, 10.0])]);
        backend
            .push_detections(vec![RawDetection::new("cup", 0.8, [1.0, 1.0, 5.0, 5.0])])
            .push_failure("model busy");

        let options = DetectOptions::default();
        let first = backend.detect(&frame(), options).unwrap();
        assert_eq!(first[0].class, "cup");

        let err = backend.detect(&frame(), options).unwrap_err();
        assert!(err.to_string().contains("model busy"));

        let third = backend.detect(&frame(), options).unwrap();
        assert_eq!(third[0].class, "apple");
        assert_eq!(backend.calls(), 3);
    }

    #[test]
    fn stub_backend_honors_options() {
        let mut backend = StubBackend::new();
        backend.push_detections(vec![
            RawDetection::new("a", 0.9, [0.0, 0.0, 1.0, 1.0]),
            RawDetection::new("b", 0.2, [0.0, 0.0, 1.0, 1.0]),
            RawDetection::new("c", 0.7, [0.0, 0.0, 1.0, 1.0]),
            RawDetection::new("d", 0.6, [0.0, 0.0, 1.0, 1.0]),
        ]);

        let out = backend
            .detect(
                &frame(),
                DetectOptions {
                    min_score: 0.5,
                    max_results: 2,
                },
            )
            .unwrap();
        let classes: Vec<&str> = out.iter().map(|d| d.class.as_str()).collect();
        assert_eq!(classes, vec!["a", "c"]);
    }
}
