//! Fixed-size sample frames
//!
//! A frame is the unit of one pipeline iteration. Its length never changes;
//! a different frame size means building a new frame.

/// Mono frame of normalized samples plus its latest loudness
#[derive(Debug, Clone)]
pub struct AudioFrame {
    samples: Box<[f32]>,
    /// dBFS of the most recent capture, `None` before the first one
    loudness_dbfs: Option<f32>,
}

impl AudioFrame {
    /// Create a silent frame of `frame_size` samples
    pub fn new(frame_size: usize) -> Self {
        Self {
            samples: vec![0.0; frame_size].into_boxed_slice(),
            loudness_dbfs: None,
        }
    }

    pub fn from_samples(samples: Vec<f32>) -> Self {
        Self {
            samples: samples.into_boxed_slice(),
            loudness_dbfs: None,
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Mutable view of the samples; the length stays fixed
    pub fn samples_mut(&mut self) -> &mut [f32] {
        &mut self.samples
    }

    pub fn loudness_dbfs(&self) -> Option<f32> {
        self.loudness_dbfs
    }

    pub fn set_loudness_dbfs(&mut self, dbfs: f32) {
        self.loudness_dbfs = Some(dbfs);
    }

    /// Copy samples and loudness from a frame of the same size.
    ///
    /// # Panics
    /// If the frame sizes differ.
    pub fn copy_from(&mut self, other: &AudioFrame) {
        self.samples.copy_from_slice(&other.samples);
        self.loudness_dbfs = other.loudness_dbfs;
    }

    /// Pull every sample into [-1.0, 1.0], mapping NaN to silence.
    /// Returns how many samples were changed.
    pub fn clamp(&mut self) -> usize {
        let mut clamped = 0;
        for sample in self.samples.iter_mut() {
            if sample.is_nan() {
                *sample = 0.0;
                clamped += 1;
            } else if *sample > 1.0 || *sample < -1.0 {
                *sample = sample.clamp(-1.0, 1.0);
                clamped += 1;
            }
        }
        clamped
    }

    /// Owned copy for monitoring consumers
    pub fn snapshot(&self) -> FrameSnapshot {
        FrameSnapshot {
            samples: self.samples.to_vec(),
            loudness_dbfs: self.loudness_dbfs,
        }
    }
}

/// Copy of a completed frame handed to monitors
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameSnapshot {
    pub samples: Vec<f32>,
    pub loudness_dbfs: Option<f32>,
}

impl FrameSnapshot {
    /// Overwrite this snapshot from a frame, reusing the sample allocation
    pub fn refresh_from(&mut self, frame: &AudioFrame) {
        self.samples.clear();
        self.samples.extend_from_slice(frame.samples());
        self.loudness_dbfs = frame.loudness_dbfs();
    }
}
