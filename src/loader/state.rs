//! Per-stem load state machine
//!
//! `Pending -> Buffering(progress) -> Ready`, with `Errored` reachable from
//! anywhere and terminal until a `Reset`. Transitions are pure so they can be
//! tested without a decoder.

use std::fmt;

use serde::Serialize;

use crate::cache::Payload;

/// Load state of one stem
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum LoadState {
    #[default]
    Pending,
    /// Buffering with progress in `[0, 100]`
    Buffering(f32),
    Ready,
    Errored(String),
}

impl fmt::Display for LoadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadState::Pending => write!(f, "Pending"),
            LoadState::Buffering(p) => write!(f, "Buffering({:.0}%)", p),
            LoadState::Ready => write!(f, "Ready"),
            LoadState::Errored(reason) => write!(f, "Errored({})", reason),
        }
    }
}

/// Events reported by a stem's underlying media while it loads
#[derive(Debug, Clone)]
pub enum LoadEvent {
    /// Buffered percentage in `[0, 100]`
    Progress(f32),
    /// Enough data to start playback
    Ready,
    /// The whole payload is now local; carries the bytes for a cache write
    FullyDownloaded(Payload),
    Failed(String),
    /// Re-initialize the stem
    Reset,
}

impl LoadState {
    /// Apply one event, returning the next state
    pub fn apply(&self, event: &LoadEvent) -> LoadState {
        match (self, event) {
            (_, LoadEvent::Reset) => LoadState::Pending,
            (LoadState::Errored(_), _) => self.clone(),
            (_, LoadEvent::Failed(reason)) => LoadState::Errored(reason.clone()),

            (LoadState::Pending, LoadEvent::Progress(p)) => {
                LoadState::Buffering(clamp_progress(*p))
            }
            (LoadState::Buffering(current), LoadEvent::Progress(p)) => {
                LoadState::Buffering(current.max(clamp_progress(*p)))
            }
            (LoadState::Ready, LoadEvent::Progress(_)) => LoadState::Ready,

            (_, LoadEvent::Ready) | (_, LoadEvent::FullyDownloaded(_)) => LoadState::Ready,
        }
    }

    /// Contribution to aggregate progress; errors count as resolved
    pub fn progress(&self) -> f32 {
        match self {
            LoadState::Pending => 0.0,
            LoadState::Buffering(p) => *p,
            LoadState::Ready | LoadState::Errored(_) => 100.0,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, LoadState::Ready | LoadState::Errored(_))
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, LoadState::Ready)
    }

    pub fn is_errored(&self) -> bool {
        matches!(self, LoadState::Errored(_))
    }
}

fn clamp_progress(p: f32) -> f32 {
    if p.is_finite() {
        p.clamp(0.0, 100.0)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_happy_path() {
        let state = LoadState::Pending
            .apply(&LoadEvent::Progress(10.0))
            .apply(&LoadEvent::Progress(55.0));
        assert_eq!(state, LoadState::Buffering(55.0));

        let state = state.apply(&LoadEvent::Ready);
        assert_eq!(state, LoadState::Ready);

        let payload: Payload = Arc::from(vec![1u8, 2, 3]);
        assert_eq!(
            state.apply(&LoadEvent::FullyDownloaded(payload)),
            LoadState::Ready
        );
    }

    #[test]
    fn test_progress_never_moves_backwards() {
        let state = LoadState::Buffering(60.0).apply(&LoadEvent::Progress(20.0));
        assert_eq!(state, LoadState::Buffering(60.0));
    }

    #[test]
    fn test_progress_clamped() {
        assert_eq!(
            LoadState::Pending.apply(&LoadEvent::Progress(140.0)),
            LoadState::Buffering(100.0)
        );
        assert_eq!(
            LoadState::Pending.apply(&LoadEvent::Progress(f32::NAN)),
            LoadState::Buffering(0.0)
        );
    }

    #[test]
    fn test_error_is_terminal_until_reset() {
        let errored = LoadState::Buffering(30.0).apply(&LoadEvent::Failed("404".into()));
        assert_eq!(errored, LoadState::Errored("404".into()));
        assert_eq!(errored.apply(&LoadEvent::Ready), errored);
        assert_eq!(errored.apply(&LoadEvent::Progress(90.0)), errored);
        assert_eq!(errored.apply(&LoadEvent::Reset), LoadState::Pending);
    }

    #[test]
    fn test_ready_can_still_fail() {
        let state = LoadState::Ready.apply(&LoadEvent::Failed("decode".into()));
        assert!(state.is_errored());
    }

    #[test]
    fn test_progress_contribution() {
        assert_eq!(LoadState::Pending.progress(), 0.0);
        assert_eq!(LoadState::Buffering(42.0).progress(), 42.0);
        assert_eq!(LoadState::Ready.progress(), 100.0);
        assert_eq!(LoadState::Errored("x".into()).progress(), 100.0);
        assert!(LoadState::Errored("x".into()).is_resolved());
        assert!(!LoadState::Buffering(99.0).is_resolved());
    }
}
