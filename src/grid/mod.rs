//! Tempo/Grid Engine
//!
//! Beat-grid math is pure and independent of the transport: a timeline asks
//! for snapped times, grid lines over a window and formatted labels.
//! [`TempoEngine`] decides which BPM the grid uses.

pub mod tempo;

use serde::Serialize;

pub use tempo::{estimate_bpm, DetectionTicket, TempoEngine, TempoSource};

#[cfg(feature = "async")]
pub use tempo::estimate_bpm_async;

use crate::error::{Result, StemsyncError};

/// Grid configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GridSettings {
    bpm: f64,
    time_signature: u32,
    snap_division: u32,
}

impl GridSettings {
    /// `time_signature` is beats per measure; `snap_division` subdivides a
    /// whole note (4 = quarter notes, 16 = sixteenths)
    pub fn new(bpm: f64, time_signature: u32, snap_division: u32) -> Result<Self> {
        if !bpm.is_finite() || bpm <= 0.0 {
            return Err(StemsyncError::InvalidConfig {
                reason: format!("bpm must be positive, got {}", bpm),
            });
        }
        if time_signature == 0 {
            return Err(StemsyncError::InvalidConfig {
                reason: "time signature must be at least 1".to_string(),
            });
        }
        if snap_division == 0 {
            return Err(StemsyncError::InvalidConfig {
                reason: "snap division must be at least 1".to_string(),
            });
        }
        Ok(Self {
            bpm,
            time_signature,
            snap_division,
        })
    }

    pub fn bpm(&self) -> f64 {
        self.bpm
    }

    pub fn time_signature(&self) -> u32 {
        self.time_signature
    }

    pub fn snap_division(&self) -> u32 {
        self.snap_division
    }

    /// Same grid at a different tempo
    pub fn with_bpm(self, bpm: f64) -> Result<Self> {
        Self::new(bpm, self.time_signature, self.snap_division)
    }

    /// Seconds between adjacent grid positions: `60/bpm * 4/division`
    pub fn unit(&self) -> f64 {
        60.0 / self.bpm * (4.0 / self.snap_division as f64)
    }

    /// Nearest grid position to `time`
    pub fn snap(&self, time: f64) -> SnapResult {
        let unit = self.unit();
        let beat_index = (time / unit).round() as i64;
        SnapResult {
            time: beat_index as f64 * unit,
            beat_index,
            measure_index: beat_index.div_euclid(self.time_signature as i64),
        }
    }

    /// Grid positions in `[start, end)`, lazily
    pub fn grid_lines(&self, start: f64, end: f64) -> GridLines {
        let unit = self.unit();
        let (next, last) = if start.is_finite() && end.is_finite() && end > start {
            // Tolerate float error so a line sitting exactly on `start` is kept
            let first = ((start / unit) - 1e-9).ceil() as i64;
            (first, end)
        } else {
            (0, f64::NEG_INFINITY)
        };
        GridLines {
            unit,
            time_signature: self.time_signature as i64,
            next,
            end: last,
        }
    }
}

impl Default for GridSettings {
    fn default() -> Self {
        Self {
            bpm: crate::config::DEFAULT_BPM,
            time_signature: 4,
            snap_division: 4,
        }
    }
}

/// Result of [`GridSettings::snap`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SnapResult {
    pub time: f64,
    /// Index of the grid position counted from zero
    pub beat_index: i64,
    /// `beat_index / time_signature`, floored
    pub measure_index: i64,
}

/// One grid position
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GridLine {
    pub time: f64,
    pub index: i64,
    pub is_measure: bool,
}

/// Lazy iterator over grid positions, see [`GridSettings::grid_lines`]
#[derive(Debug, Clone)]
pub struct GridLines {
    unit: f64,
    time_signature: i64,
    next: i64,
    end: f64,
}

impl Iterator for GridLines {
    type Item = GridLine;

    fn next(&mut self) -> Option<GridLine> {
        let time = self.next as f64 * self.unit;
        if time >= self.end {
            return None;
        }
        let index = self.next;
        self.next += 1;
        Some(GridLine {
            time,
            index,
            is_measure: index.rem_euclid(self.time_signature) == 0,
        })
    }
}

/// Timeline label for `time`
///
/// `Measure.Beat` (both 1-based, quarter-note beats) when a BPM is known,
/// otherwise seconds to two decimals.
pub fn format_time(time: f64, bpm: Option<f64>, time_signature: u32) -> String {
    match bpm {
        Some(bpm) if bpm.is_finite() && bpm > 0.0 && time_signature > 0 => {
            let beat_len = 60.0 / bpm;
            let beats = (time.max(0.0) / beat_len + 1e-9).floor() as u64;
            let per_measure = time_signature as u64;
            format!("{}.{}", beats / per_measure + 1, beats % per_measure + 1)
        }
        _ => format!("{:.2}", time),
    }
}
