//! Playback handle capability
//!
//! The synchronizer only ever talks to stems through [`PlaybackHandle`], so a
//! real decoder, a media element bridge or [`SimulatedHandle`] are
//! interchangeable.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::{Result, StemsyncError};

/// One stem's playback primitive
pub trait PlaybackHandle {
    /// Start playback from the current position
    ///
    /// Returns `StemsyncError::Playback` when the platform rejects it.
    fn play(&mut self) -> Result<()>;

    fn pause(&mut self);

    /// Move the playhead to `position` seconds
    fn seek(&mut self, position: f64);

    /// Live playhead position in seconds
    fn position(&self) -> f64;

    /// Duration in seconds, once metadata is known
    fn duration(&self) -> Option<f64>;

    /// Output gain in `[0, 1]`
    fn set_gain(&mut self, gain: f32);

    /// Whether playback reached the end of the stem
    fn has_ended(&self) -> bool;

    /// Stop and free underlying resources; the handle is unusable afterwards
    fn release(&mut self);
}

#[derive(Debug)]
struct SimState {
    stem_id: String,
    position: f64,
    duration: Option<f64>,
    rate: f64,
    playing: bool,
    gain: f32,
    released: bool,
    reject_play: Option<String>,
    play_calls: usize,
    seek_calls: usize,
}

/// Software handle driven by explicit time steps
///
/// Clones share state, so a test or simulation can keep a probe after the
/// synchronizer takes ownership of the boxed handle.
#[derive(Debug, Clone)]
pub struct SimulatedHandle {
    state: Rc<RefCell<SimState>>,
}

impl SimulatedHandle {
    pub fn new(stem_id: impl Into<String>, duration: Option<f64>) -> Self {
        Self {
            state: Rc::new(RefCell::new(SimState {
                stem_id: stem_id.into(),
                position: 0.0,
                duration,
                rate: 1.0,
                playing: false,
                gain: 1.0,
                released: false,
                reject_play: None,
                play_calls: 0,
                seek_calls: 0,
            })),
        }
    }

    /// Playback rate relative to real time; anything but 1.0 drifts
    pub fn with_rate(self, rate: f64) -> Self {
        self.state.borrow_mut().rate = rate;
        self
    }

    /// Advance by `dt` seconds of wall time if playing
    pub fn advance(&self, dt: f64) {
        let mut s = self.state.borrow_mut();
        if !s.playing || s.released {
            return;
        }
        s.position += dt * s.rate;
        if let Some(duration) = s.duration {
            if s.position >= duration {
                s.position = duration;
                s.playing = false;
            }
        }
    }

    /// Place the playhead directly, bypassing `seek` bookkeeping
    pub fn set_position(&self, position: f64) {
        self.state.borrow_mut().position = position;
    }

    /// Metadata arriving late
    pub fn set_duration(&self, duration: f64) {
        self.state.borrow_mut().duration = Some(duration);
    }

    /// Make every following `play` fail with `reason`; `None` to accept again
    pub fn reject_play(&self, reason: Option<&str>) {
        self.state.borrow_mut().reject_play = reason.map(str::to_string);
    }

    pub fn is_playing(&self) -> bool {
        self.state.borrow().playing
    }

    pub fn gain(&self) -> f32 {
        self.state.borrow().gain
    }

    pub fn is_released(&self) -> bool {
        self.state.borrow().released
    }

    pub fn play_calls(&self) -> usize {
        self.state.borrow().play_calls
    }

    pub fn seek_calls(&self) -> usize {
        self.state.borrow().seek_calls
    }
}

impl PlaybackHandle for SimulatedHandle {
    fn play(&mut self) -> Result<()> {
        let mut s = self.state.borrow_mut();
        s.play_calls += 1;
        if s.released {
            return Err(StemsyncError::playback(&s.stem_id, "handle released"));
        }
        if let Some(reason) = &s.reject_play {
            return Err(StemsyncError::playback(&s.stem_id, reason.clone()));
        }
        s.playing = true;
        Ok(())
    }

    fn pause(&mut self) {
        self.state.borrow_mut().playing = false;
    }

    fn seek(&mut self, position: f64) {
        let mut s = self.state.borrow_mut();
        s.seek_calls += 1;
        s.position = match s.duration {
            Some(duration) => position.clamp(0.0, duration),
            None => position.max(0.0),
        };
    }

    fn position(&self) -> f64 {
        self.state.borrow().position
    }

    fn duration(&self) -> Option<f64> {
        self.state.borrow().duration
    }

    fn set_gain(&mut self, gain: f32) {
        self.state.borrow_mut().gain = gain;
    }

    fn has_ended(&self) -> bool {
        let s = self.state.borrow();
        matches!(s.duration, Some(d) if s.position >= d)
    }

    fn release(&mut self) {
        let mut s = self.state.borrow_mut();
        s.playing = false;
        s.released = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_advance_only_while_playing() {
        let mut handle = SimulatedHandle::new("vocals", Some(10.0));
        handle.advance(1.0);
        assert_eq!(handle.position(), 0.0);

        handle.play().unwrap();
        handle.advance(1.5);
        assert_relative_eq!(handle.position(), 1.5);
    }

    #[test]
    fn test_rate_introduces_drift() {
        let mut handle = SimulatedHandle::new("bass", None).with_rate(1.01);
        handle.play().unwrap();
        handle.advance(10.0);
        assert_relative_eq!(handle.position(), 10.1, epsilon = 1e-9);
    }

    #[test]
    fn test_reaches_end() {
        let mut handle = SimulatedHandle::new("drums", Some(2.0));
        handle.play().unwrap();
        handle.advance(5.0);
        assert!(handle.has_ended());
        assert!(!handle.is_playing());
    }

    #[test]
    fn test_rejected_play() {
        let mut handle = SimulatedHandle::new("guitar", Some(2.0));
        handle.reject_play(Some("NotAllowedError"));
        let err = handle.play().unwrap_err();
        assert_eq!(err.error_code(), "PLAYBACK_ERROR");
        assert!(!handle.is_playing());
    }

    #[test]
    fn test_clones_share_state() {
        let probe = SimulatedHandle::new("keys", Some(4.0));
        let mut boxed: Box<dyn PlaybackHandle> = Box::new(probe.clone());
        boxed.seek(3.0);
        boxed.set_gain(0.5);
        boxed.release();
        assert_eq!(probe.position(), 3.0);
        assert_eq!(probe.gain(), 0.5);
        assert!(probe.is_released());
    }
}
