//! Frames handed from a `FrameSource` to a `DetectorBackend`.
//!
//! A `Frame` owns its pixel buffer. Backends borrow it for the duration of a
//! `detect` call; the scheduler drops it as soon as the call returns, so no
//! pixel data outlives the tick that sampled it.

/// One captured RGB frame.
#[derive(Clone, Debug)]
pub struct Frame {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Monotonically increasing per source, starting at 1.
    pub sequence: u64,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, sequence: u64) -> Self {
        Self {
            data,
            width,
            height,
            sequence,
        }
    }

    /// Interleaved RGB bytes, `width * height * 3` long for well-formed frames.
    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    /// True when the buffer length matches the declared RGB dimensions.
    pub fn is_rgb(&self) -> bool {
        (self.width as usize)
            .checked_mul(self.height as usize)
            .and_then(|v| v.checked_mul(3))
            .is_some_and(|expected| expected == self.data.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_reports_rgb_layout() {
        let frame = Frame::new(vec![0u8; 4 * 2 * 3], 4, 2, 1);
        assert!(frame.is_rgb());
        assert_eq!(frame.byte_len(), 24);
        assert_eq!(frame.pixels().len(), 24);

        let short = Frame::new(vec![0u8; 5], 4, 2, 2);
        assert!(!short.is_rgb());
    }
}
