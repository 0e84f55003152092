//! Chord change history for overlays and progression export

use serde::Serialize;

use super::ChordResult;

/// Results below this confidence are not recorded
pub const DEFAULT_MIN_CONFIDENCE: f32 = 0.6;
const DEFAULT_MAX_HISTORY: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChordChange {
    pub label: String,
    /// Transport time the chord was first seen, in seconds
    pub time: f64,
    pub confidence: f32,
}

/// Records chord changes over time
#[derive(Debug, Clone)]
pub struct ChordTracker {
    history: Vec<ChordChange>,
    latest: Option<ChordResult>,
    min_confidence: f32,
    max_history: usize,
}

impl Default for ChordTracker {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_CONFIDENCE)
    }
}

impl ChordTracker {
    pub fn new(min_confidence: f32) -> Self {
        Self {
            history: Vec::new(),
            latest: None,
            min_confidence,
            max_history: DEFAULT_MAX_HISTORY,
        }
    }

    pub fn with_max_history(mut self, max_history: usize) -> Self {
        self.max_history = max_history.max(1);
        self
    }

    /// Feed the result for the frame at `time`
    ///
    /// Returns the change when a new chord was recorded. No-chord frames,
    /// low-confidence results and repeats of the current chord are skipped.
    pub fn observe(&mut self, time: f64, result: &ChordResult) -> Option<&ChordChange> {
        self.latest = Some(result.clone());
        if !result.is_chord() || result.confidence < self.min_confidence {
            return None;
        }
        if self.current() == Some(result.label.as_str()) {
            return None;
        }

        if self.history.len() == self.max_history {
            self.history.remove(0);
        }
        self.history.push(ChordChange {
            label: result.label.clone(),
            time,
            confidence: result.confidence,
        });
        log::debug!("[CHORD] {} at {:.2}s", result.label, time);
        self.history.last()
    }

    /// Label of the last recorded chord
    pub fn current(&self) -> Option<&str> {
        self.history.last().map(|c| c.label.as_str())
    }

    /// Most recent result seen, recorded or not
    pub fn latest(&self) -> Option<&ChordResult> {
        self.latest.as_ref()
    }

    pub fn history(&self) -> &[ChordChange] {
        &self.history
    }

    /// Recorded chords joined as `C - Am - F - G`
    pub fn progression(&self) -> String {
        self.history
            .iter()
            .map(|c| c.label.as_str())
            .collect::<Vec<_>>()
            .join(" - ")
    }

    pub fn clear(&mut self) {
        self.history.clear();
        self.latest = None;
    }
}
