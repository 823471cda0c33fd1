//! Loudness metering
//!
//! RMS and dBFS over one frame, plus the bar mapping used by VU displays.
//! Metering is a side channel: nothing here touches the samples.

use crate::constants::DBFS_FLOOR;

/// Root-mean-square of `samples`, accumulated in `f64`. Empty input is 0.
pub fn rms(samples: &[f32]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum_sq / samples.len() as f64).sqrt()
}

/// Computes frame loudness in dBFS, never below a configured floor
#[derive(Debug, Clone, Copy)]
pub struct LevelMeter {
    floor_dbfs: f32,
}

impl Default for LevelMeter {
    fn default() -> Self {
        Self::new(DBFS_FLOOR)
    }
}

impl LevelMeter {
    pub fn new(floor_dbfs: f32) -> Self {
        Self { floor_dbfs }
    }

    pub fn floor_dbfs(&self) -> f32 {
        self.floor_dbfs
    }

    /// `20 * log10(rms)`. Silent, empty or NaN-tainted frames report the floor.
    pub fn compute(&self, samples: &[f32]) -> f32 {
        let rms = rms(samples);
        if rms.is_nan() || rms <= 0.0 {
            return self.floor_dbfs;
        }
        let dbfs = (20.0 * rms.log10()) as f32;
        dbfs.max(self.floor_dbfs)
    }
}

/// Colour band of a VU bar
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VuZone {
    Green,
    Orange,
    Red,
}

/// Bar level in [0, 1] and its zone
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VuReading {
    pub level: f32,
    pub zone: VuZone,
}

/// Maps dBFS onto a bar: -45 dBFS is empty, the top 40 dB span the bar,
/// scaled by `factor` so full scale stays just short of the top.
#[derive(Debug, Clone, Copy)]
pub struct VuMeter {
    pub factor: f32,
    pub green_threshold: f32,
    pub orange_threshold: f32,
}

impl Default for VuMeter {
    fn default() -> Self {
        Self {
            factor: 0.9,
            green_threshold: 0.5,
            orange_threshold: 0.8,
        }
    }
}

impl VuMeter {
    const RANGE_BOTTOM_DBFS: f32 = -45.0;
    const RANGE_SPAN_DB: f32 = 40.0;

    pub fn level(&self, dbfs: f32) -> f32 {
        let level = (dbfs - Self::RANGE_BOTTOM_DBFS) / Self::RANGE_SPAN_DB * self.factor;
        if level.is_nan() {
            return 0.0;
        }
        level.clamp(0.0, 1.0)
    }

    pub fn reading(&self, dbfs: f32) -> VuReading {
        let level = self.level(dbfs);
        let zone = if level < self.green_threshold {
            VuZone::Green
        } else if level < self.orange_threshold {
            VuZone::Orange
        } else {
            VuZone::Red
        };
        VuReading { level, zone }
    }
}
