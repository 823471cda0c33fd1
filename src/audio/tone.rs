//! Synthetic sine capture source
//!
//! Stands in for a microphone when testing a sink or a transform.

use std::f64::consts::TAU;
use std::thread;
use std::time::{Duration, Instant};

use crate::audio::device::{CaptureSource, FillOutcome};
use crate::codec::{encode_into, SampleFormat};
use crate::error::AudioError;

/// Generates a sine wave as PCM bytes
pub struct ToneSource {
    format: SampleFormat,
    sample_rate: u32,
    frequency_hz: f64,
    amplitude: f32,
    /// Phase in cycles, kept in [0, 1)
    phase: f64,
    /// Block like a real device, one frame duration per fill
    paced: bool,
    /// End of stream after this many frames
    frame_limit: Option<u64>,
    frames_emitted: u64,
    next_deadline: Option<Instant>,
    scratch: Vec<f32>,
}

impl ToneSource {
    pub fn new(format: SampleFormat, sample_rate: u32, frequency_hz: f64, amplitude: f32) -> Self {
        Self {
            format,
            sample_rate,
            frequency_hz,
            amplitude: amplitude.clamp(0.0, 1.0),
            phase: 0.0,
            paced: false,
            frame_limit: None,
            frames_emitted: 0,
            next_deadline: None,
            scratch: Vec::new(),
        }
    }

    /// Sleep so that frames arrive at the real-time rate
    pub fn paced(mut self, paced: bool) -> Self {
        self.paced = paced;
        self
    }

    /// Report end of stream after `frames` fills
    pub fn limit_frames(mut self, frames: u64) -> Self {
        self.frame_limit = Some(frames);
        self
    }

    pub fn frames_emitted(&self) -> u64 {
        self.frames_emitted
    }

    fn wait_for_deadline(&mut self, samples: usize) {
        let period = Duration::from_secs_f64(samples as f64 / self.sample_rate as f64);
        let now = Instant::now();
        let deadline = self.next_deadline.unwrap_or(now) + period;
        if deadline > now {
            thread::sleep(deadline - now);
        }
        self.next_deadline = Some(deadline);
    }
}

impl CaptureSource for ToneSource {
    fn fill(&mut self, buf: &mut [u8]) -> Result<FillOutcome, AudioError> {
        if self.frame_limit.is_some_and(|limit| self.frames_emitted >= limit) {
            return Ok(FillOutcome::EndOfStream);
        }

        let bps = self.format.bytes_per_sample();
        if buf.len() % bps != 0 {
            return Err(AudioError::DeviceFailure(format!(
                "buffer of {} bytes does not hold whole {}-bit samples",
                buf.len(),
                self.format.bits()
            )));
        }

        let count = buf.len() / bps;
        let step = self.frequency_hz / self.sample_rate as f64;
        self.scratch.resize(count, 0.0);
        for sample in self.scratch.iter_mut() {
            *sample = self.amplitude * (TAU * self.phase).sin() as f32;
            self.phase = (self.phase + step).fract();
        }

        encode_into(self.format, &self.scratch, buf)?;

        if self.paced {
            self.wait_for_deadline(count);
        }
        self.frames_emitted += 1;
        Ok(FillOutcome::Filled(buf.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::meter::LevelMeter;
    use crate::codec::decode;

    #[test]
    fn test_tone_level() {
        let mut source = ToneSource::new(SampleFormat::Pcm16, 8000, 1000.0, 1.0);
        let mut buf = vec![0u8; 800 * 2];
        assert_eq!(source.fill(&mut buf).unwrap(), FillOutcome::Filled(1600));

        let samples = decode(&buf, 16).unwrap();
        let dbfs = LevelMeter::default().compute(&samples);
        assert!((dbfs - -3.01).abs() < 0.05, "got {dbfs}");
    }

    #[test]
    fn test_tone_is_continuous_across_frames() {
        let mut source = ToneSource::new(SampleFormat::Pcm16, 8000, 100.0, 0.5);
        let mut whole = ToneSource::new(SampleFormat::Pcm16, 8000, 100.0, 0.5);

        let mut a = vec![0u8; 40];
        let mut b = vec![0u8; 40];
        let mut both = vec![0u8; 80];
        source.fill(&mut a).unwrap();
        source.fill(&mut b).unwrap();
        whole.fill(&mut both).unwrap();

        assert_eq!([a, b].concat(), both);
    }

    #[test]
    fn test_frame_limit() {
        let mut source = ToneSource::new(SampleFormat::Pcm8, 8000, 440.0, 0.5).limit_frames(2);
        let mut buf = [0u8; 16];
        assert_eq!(source.fill(&mut buf).unwrap(), FillOutcome::Filled(16));
        assert_eq!(source.fill(&mut buf).unwrap(), FillOutcome::Filled(16));
        assert_eq!(source.fill(&mut buf).unwrap(), FillOutcome::EndOfStream);
        assert_eq!(source.frames_emitted(), 2);
    }

    #[test]
    fn test_paced_fill_blocks_for_frame_duration() {
        let mut source = ToneSource::new(SampleFormat::Pcm16, 8000, 440.0, 0.5).paced(true);
        let mut buf = vec![0u8; 80 * 2];

        let start = Instant::now();
        for _ in 0..3 {
            source.fill(&mut buf).unwrap();
        }
        // Three 10 ms frames
        assert!(start.elapsed() >= Duration::from_millis(29));
    }

    #[test]
    fn test_odd_buffer_rejected() {
        let mut source = ToneSource::new(SampleFormat::Pcm16, 8000, 440.0, 0.5);
        assert!(source.fill(&mut [0u8; 3]).is_err());
    }
}
