//! Tempo selection and estimation
//!
//! BPM precedence is manual override, then detected value, then the
//! configured default. Detection runs elsewhere and reports back through a
//! [`DetectionTicket`]; a ticket that was superseded, whose audio source
//! changed, or whose engine was disposed is discarded on arrival.

use serde::Serialize;

use super::GridSettings;
use crate::config::EngineConfig;
use crate::error::{Result, StemsyncError};

/// Tempos outside this range are folded by octaves
const MIN_FOLDED_BPM: f64 = 70.0;
const MAX_FOLDED_BPM: f64 = 180.0;

/// Where the current BPM comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TempoSource {
    Manual,
    Detected,
    Default,
}

/// Proof of a detection request; hand it back with the result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectionTicket {
    generation: u64,
    source: String,
}

impl DetectionTicket {
    pub fn source(&self) -> &str {
        &self.source
    }
}

#[derive(Debug, Clone)]
pub struct TempoEngine {
    default_bpm: f64,
    manual: Option<f64>,
    detected: Option<f64>,
    audio_source: Option<String>,
    generation: u64,
    in_flight: bool,
    disposed: bool,
}

impl Default for TempoEngine {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_BPM)
    }
}

impl TempoEngine {
    pub fn new(default_bpm: f64) -> Self {
        Self {
            default_bpm,
            manual: None,
            detected: None,
            audio_source: None,
            generation: 0,
            in_flight: false,
            disposed: false,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.default_bpm)
    }

    /// Effective BPM
    pub fn bpm(&self) -> f64 {
        self.manual.or(self.detected).unwrap_or(self.default_bpm)
    }

    /// BPM from an override or detection, `None` when only the default applies
    pub fn known_bpm(&self) -> Option<f64> {
        self.manual.or(self.detected)
    }

    pub fn source(&self) -> TempoSource {
        if self.manual.is_some() {
            TempoSource::Manual
        } else if self.detected.is_some() {
            TempoSource::Detected
        } else {
            TempoSource::Default
        }
    }

    /// Set or clear (`None`) the manual override
    pub fn set_manual_bpm(&mut self, bpm: Option<f64>) -> Result<()> {
        if let Some(value) = bpm {
            if !value.is_finite() || value <= 0.0 {
                return Err(StemsyncError::InvalidConfig {
                    reason: format!("manual bpm must be positive, got {}", value),
                });
            }
        }
        self.manual = bpm;
        log::debug!("[TEMPO] Manual override {:?}", bpm);
        Ok(())
    }

    /// Switch the audio being analysed
    ///
    /// Any detection in flight for the old source is abandoned and its
    /// detected BPM dropped.
    pub fn set_audio_source(&mut self, source: &str) {
        if self.audio_source.as_deref() == Some(source) {
            return;
        }
        if self.in_flight {
            log::debug!("[TEMPO] Audio source changed, abandoning detection");
        }
        self.audio_source = Some(source.to_string());
        self.detected = None;
        self.generation += 1;
        self.in_flight = false;
    }

    /// Start a detection for `source`; `None` once disposed
    pub fn begin_detection(&mut self, source: &str) -> Option<DetectionTicket> {
        if self.disposed {
            return None;
        }
        self.set_audio_source(source);
        self.generation += 1;
        self.in_flight = true;
        Some(DetectionTicket {
            generation: self.generation,
            source: source.to_string(),
        })
    }

    /// Deliver a detection result
    ///
    /// Returns true only when the result was applied. Failures are logged and
    /// the engine keeps its fallback BPM.
    pub fn complete_detection(&mut self, ticket: DetectionTicket, result: Result<f64>) -> bool {
        let current = !self.disposed
            && ticket.generation == self.generation
            && self.audio_source.as_deref() == Some(ticket.source.as_str());
        if !current {
            log::debug!(
                "[TEMPO] Discarding stale detection for '{}'",
                ticket.source
            );
            return false;
        }
        self.in_flight = false;

        match result {
            Ok(bpm) if bpm.is_finite() && bpm > 0.0 => {
                self.detected = Some(bpm);
                log::info!("[TEMPO] Detected {:.1} BPM for '{}'", bpm, ticket.source);
                true
            }
            Ok(bpm) => {
                log::warn!("[TEMPO] Ignoring invalid detected bpm {}", bpm);
                false
            }
            Err(e) => {
                log::warn!(
                    "[TEMPO] Detection failed, using {:.1} BPM: {}",
                    self.bpm(),
                    e
                );
                false
            }
        }
    }

    pub fn is_detecting(&self) -> bool {
        self.in_flight && !self.disposed
    }

    /// Abandon any detection and refuse new ones
    pub fn dispose(&mut self) {
        self.disposed = true;
        self.in_flight = false;
        self.generation += 1;
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Grid at the effective BPM
    pub fn grid(&self, time_signature: u32, snap_division: u32) -> Result<GridSettings> {
        GridSettings::new(self.bpm(), time_signature, snap_division)
    }
}

/// Estimate tempo from onset times in seconds
///
/// Uses the median inter-onset interval, folded by octaves into 70-180 BPM.
/// Needs at least two positive intervals.
pub fn estimate_bpm(onsets: &[f64]) -> Result<f64> {
    let mut intervals: Vec<f64> = onsets
        .windows(2)
        .map(|w| w[1] - w[0])
        .filter(|i| i.is_finite() && *i > f64::EPSILON)
        .collect();
    if intervals.len() < 2 {
        return Err(StemsyncError::detection(format!(
            "need at least 2 onset intervals, got {}",
            intervals.len()
        )));
    }

    intervals.sort_by(|a, b| a.total_cmp(b));
    let mid = intervals.len() / 2;
    let median = if intervals.len() % 2 == 0 {
        (intervals[mid - 1] + intervals[mid]) / 2.0
    } else {
        intervals[mid]
    };

    let mut bpm = 60.0 / median;
    while bpm < MIN_FOLDED_BPM {
        bpm *= 2.0;
    }
    while bpm > MAX_FOLDED_BPM {
        bpm /= 2.0;
    }
    Ok(bpm)
}

/// [`estimate_bpm`] on a blocking worker
#[cfg(feature = "async")]
pub async fn estimate_bpm_async(onsets: Vec<f64>) -> Result<f64> {
    tokio::task::spawn_blocking(move || estimate_bpm(&onsets))
        .await
        .map_err(|e| StemsyncError::detection(format!("estimation task failed: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use test_case::test_case;

    // ------------------------------------------------------------------------
    // Precedence
    // ------------------------------------------------------------------------

    #[test]
    fn test_default_then_detected_then_manual() {
        let mut engine = TempoEngine::default();
        assert_eq!(engine.bpm(), 120.0);
        assert_eq!(engine.source(), TempoSource::Default);
        assert_eq!(engine.known_bpm(), None);

        let ticket = engine.begin_detection("track-1").unwrap();
        assert!(engine.complete_detection(ticket, Ok(96.0)));
        assert_eq!(engine.bpm(), 96.0);
        assert_eq!(engine.source(), TempoSource::Detected);

        engine.set_manual_bpm(Some(140.0)).unwrap();
        assert_eq!(engine.bpm(), 140.0);
        assert_eq!(engine.source(), TempoSource::Manual);

        engine.set_manual_bpm(None).unwrap();
        assert_eq!(engine.bpm(), 96.0);
    }

    #[test]
    fn test_invalid_manual_bpm_rejected() {
        let mut engine = TempoEngine::default();
        assert!(engine.set_manual_bpm(Some(-5.0)).is_err());
        assert_eq!(engine.source(), TempoSource::Default);
    }

    // ------------------------------------------------------------------------
    // Detection Lifecycle
    // ------------------------------------------------------------------------

    #[test]
    fn test_failed_detection_falls_back() {
        let mut engine = TempoEngine::new(110.0);
        let ticket = engine.begin_detection("track-1").unwrap();
        let applied = engine.complete_detection(ticket, Err(StemsyncError::detection("silence")));
        assert!(!applied);
        assert_eq!(engine.bpm(), 110.0);
        assert!(!engine.is_detecting());
    }

    #[test]
    fn test_source_change_abandons_detection() {
        let mut engine = TempoEngine::default();
        let ticket = engine.begin_detection("track-1").unwrap();
        engine.set_audio_source("track-2");
        assert!(!engine.complete_detection(ticket, Ok(90.0)));
        assert_eq!(engine.source(), TempoSource::Default);
    }

    #[test]
    fn test_superseded_ticket_is_discarded() {
        let mut engine = TempoEngine::default();
        let first = engine.begin_detection("track-1").unwrap();
        let second = engine.begin_detection("track-1").unwrap();

        assert!(!engine.complete_detection(first, Ok(80.0)));
        assert!(engine.complete_detection(second, Ok(100.0)));
        assert_eq!(engine.bpm(), 100.0);
    }

    #[test]
    fn test_dispose_abandons_detection() {
        let mut engine = TempoEngine::default();
        let ticket = engine.begin_detection("track-1").unwrap();
        engine.dispose();

        assert!(!engine.complete_detection(ticket, Ok(90.0)));
        assert_eq!(engine.bpm(), 120.0);
        assert!(engine.begin_detection("track-1").is_none());
    }

    #[test]
    fn test_new_source_drops_previous_detection() {
        let mut engine = TempoEngine::default();
        let ticket = engine.begin_detection("track-1").unwrap();
        engine.complete_detection(ticket, Ok(90.0));
        engine.set_audio_source("track-2");
        assert_eq!(engine.source(), TempoSource::Default);
    }

    #[test]
    fn test_grid_uses_effective_bpm() {
        let mut engine = TempoEngine::default();
        engine.set_manual_bpm(Some(60.0)).unwrap();
        let grid = engine.grid(4, 4).unwrap();
        assert_relative_eq!(grid.unit(), 1.0);
    }

    // ------------------------------------------------------------------------
    // Estimation
    // ------------------------------------------------------------------------

    #[test]
    fn test_estimate_steady_pulse() {
        let onsets: Vec<f64> = (0..16).map(|i| i as f64 * 0.5).collect();
        assert_relative_eq!(estimate_bpm(&onsets).unwrap(), 120.0, epsilon = 1e-9);
    }

    #[test]
    fn test_estimate_ignores_outlier_interval() {
        let onsets = [0.0, 0.5, 1.0, 1.5, 3.0, 3.5, 4.0];
        assert_relative_eq!(estimate_bpm(&onsets).unwrap(), 120.0, epsilon = 1e-9);
    }

    #[test_case(0.25, 120.0 ; "double time folds down")]
    #[test_case(1.5, 80.0 ; "slow pulse folds up")]
    #[test_case(2.0, 120.0 ; "half time folds up")]
    fn test_estimate_octave_folding(interval: f64, expected: f64) {
        let onsets: Vec<f64> = (0..8).map(|i| i as f64 * interval).collect();
        assert_relative_eq!(estimate_bpm(&onsets).unwrap(), expected, epsilon = 1e-9);
    }

    #[test]
    fn test_estimate_needs_two_intervals() {
        let err = estimate_bpm(&[0.0, 0.5]).unwrap_err();
        assert_eq!(err.error_code(), "DETECTION_ERROR");
        assert!(err.is_recoverable());
        assert!(estimate_bpm(&[]).is_err());
        assert!(estimate_bpm(&[1.0, 1.0, 1.0]).is_err());
    }

    #[cfg(feature = "async")]
    #[tokio::test]
    async fn test_estimate_async() {
        let onsets: Vec<f64> = (0..8).map(|i| i as f64 * 0.6).collect();
        let bpm = estimate_bpm_async(onsets).await.unwrap();
        assert_relative_eq!(bpm, 100.0, epsilon = 1e-9);
    }
}
