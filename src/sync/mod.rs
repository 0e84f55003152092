//! Playback Synchronizer
//!
//! Treats N playback handles as one transport. Each sampled frame the
//! transport time is the mean of the live handle positions that have not
//! reached their own end; when their spread exceeds the drift threshold the
//! single worst offender is snapped back to the mean. Mute/solo/volume live
//! here too and map straight onto handle gains.

pub mod handle;
pub mod mixer;

use std::fmt;

use serde::Serialize;

pub use handle::{PlaybackHandle, SimulatedHandle};
pub use mixer::{effective_gain, is_audible, MasterBus, StemMix};

use crate::config::EngineConfig;
use crate::error::{Result, StemsyncError};

/// Transport state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum TransportState {
    #[default]
    Stopped,
    Playing,
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportState::Stopped => write!(f, "Stopped"),
            TransportState::Playing => write!(f, "Playing"),
        }
    }
}

/// Direction for [`Synchronizer::skip`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipDirection {
    Forward,
    Backward,
}

/// Transport state exposed for UI binding
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TransportSnapshot {
    pub is_playing: bool,
    pub current_time: f64,
    pub duration: f64,
}

/// A re-snap applied to one handle during a frame
#[derive(Debug, Clone, PartialEq)]
pub struct DriftCorrection {
    pub stem_id: String,
    /// Position before correction
    pub from: f64,
    /// The mean it was snapped to
    pub to: f64,
    /// Max minus min of all positions before correction
    pub spread: f64,
}

/// Result of sampling the transport for one frame
#[derive(Debug, Clone, PartialEq)]
pub struct FrameSample {
    pub current_time: f64,
    pub correction: Option<DriftCorrection>,
    /// Playback reached its natural end this frame
    pub ended: bool,
}

struct Track {
    id: String,
    /// `None` when the handle could not be created
    handle: Option<Box<dyn PlaybackHandle>>,
    mix: StemMix,
    available: bool,
    /// Mute applied by [`Synchronizer::mark_unavailable`] rather than the user
    auto_muted: bool,
}

impl Track {
    fn live(&self) -> Option<&dyn PlaybackHandle> {
        if self.available {
            self.handle.as_deref()
        } else {
            None
        }
    }
}

/// Multi-handle transport with drift correction
pub struct Synchronizer {
    tracks: Vec<Track>,
    state: TransportState,
    current_time: f64,
    duration: f64,
    master: MasterBus,
    drift_threshold: f64,
    end_tolerance: f64,
    default_volume: f32,
    corrections: u64,
}

impl Default for Synchronizer {
    fn default() -> Self {
        Self::new(&EngineConfig::default())
    }
}

impl Synchronizer {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            tracks: Vec::new(),
            state: TransportState::Stopped,
            current_time: 0.0,
            duration: 0.0,
            master: MasterBus::default(),
            drift_threshold: config.drift_threshold_secs,
            end_tolerance: config.end_tolerance_secs,
            default_volume: config.default_stem_volume,
            corrections: 0,
        }
    }

    // ========================================================================
    // Handle ownership
    // ========================================================================

    /// Take ownership of a stem's handle
    ///
    /// A handle already registered under `stem_id` is released and replaced,
    /// keeping that stem's mix settings; a mute applied only because the stem
    /// was unavailable is lifted. While playing, the new handle joins at the
    /// current time. If it rejects play the stem is marked unavailable and
    /// the rejection is returned, leaving the other stems playing.
    pub fn add_stem(&mut self, stem_id: &str, mut handle: Box<dyn PlaybackHandle>) -> Result<()> {
        handle.seek(self.current_time);
        if let Some(duration) = handle.duration() {
            self.observe_duration(duration);
        }

        match self.tracks.iter_mut().find(|t| t.id == stem_id) {
            Some(track) => {
                if let Some(old) = track.handle.as_mut() {
                    old.release();
                }
                track.handle = Some(handle);
                track.available = true;
                if track.auto_muted {
                    track.mix.muted = false;
                    track.auto_muted = false;
                }
            }
            None => self.tracks.push(Track {
                id: stem_id.to_string(),
                handle: Some(handle),
                mix: StemMix::with_volume(self.default_volume),
                available: true,
                auto_muted: false,
            }),
        }
        self.apply_gains();
        log::debug!("[SYNC] Added stem '{}' ({} total)", stem_id, self.tracks.len());

        if self.state == TransportState::Playing {
            self.join_playback(stem_id)?;
        }
        Ok(())
    }

    fn join_playback(&mut self, stem_id: &str) -> Result<()> {
        let result = match self
            .tracks
            .iter_mut()
            .find(|t| t.id == stem_id)
            .and_then(|t| t.handle.as_mut())
        {
            Some(handle) => handle.play(),
            None => Ok(()),
        };
        if let Err(e) = result {
            log::warn!("[SYNC] Stem '{}' rejected play while joining: {}", stem_id, e);
            self.mark_unavailable(stem_id);
            return Err(e);
        }
        Ok(())
    }

    /// Register a stem whose handle could not be created, so it still shows
    /// up in the mixer (muted and unavailable)
    pub fn add_unavailable(&mut self, stem_id: &str) {
        if self.mark_unavailable(stem_id) {
            return;
        }
        let mut mix = StemMix::with_volume(self.default_volume);
        mix.muted = true;
        self.tracks.push(Track {
            id: stem_id.to_string(),
            handle: None,
            mix,
            available: false,
            auto_muted: true,
        });
        log::warn!("[SYNC] Stem '{}' has no handle, muted", stem_id);
    }

    /// Exclude a failed stem from the transport and default it to muted
    pub fn mark_unavailable(&mut self, stem_id: &str) -> bool {
        let Some(track) = self.tracks.iter_mut().find(|t| t.id == stem_id) else {
            return false;
        };
        track.available = false;
        if !track.mix.muted {
            track.mix.muted = true;
            track.auto_muted = true;
        }
        if let Some(handle) = track.handle.as_mut() {
            handle.pause();
        }
        self.apply_gains();
        log::warn!("[SYNC] Stem '{}' unavailable, muted", stem_id);
        true
    }

    /// Number of handles owned
    pub fn stem_count(&self) -> usize {
        self.tracks.len()
    }

    /// Number of handles taking part in playback
    pub fn active_count(&self) -> usize {
        self.tracks.iter().filter(|t| t.live().is_some()).count()
    }

    pub fn is_available(&self, stem_id: &str) -> Option<bool> {
        self.track(stem_id).map(|t| t.available)
    }

    /// Raise `duration` if `duration_secs` is larger; never lowers it
    pub fn observe_duration(&mut self, duration_secs: f64) -> bool {
        if duration_secs.is_finite() && duration_secs > self.duration {
            self.duration = duration_secs;
            log::debug!("[SYNC] Duration now {:.3}s", self.duration);
            true
        } else {
            false
        }
    }

    /// Pull durations from every handle that now knows its metadata
    pub fn refresh_durations(&mut self) {
        let durations: Vec<f64> = self
            .tracks
            .iter()
            .filter_map(|t| t.handle.as_ref().and_then(|h| h.duration()))
            .collect();
        for duration in durations {
            self.observe_duration(duration);
        }
    }

    /// Stop and release every handle
    pub fn dispose(&mut self) {
        for handle in self.tracks.iter_mut().filter_map(|t| t.handle.as_mut()) {
            handle.pause();
            handle.release();
        }
        let released = self.tracks.len();
        self.tracks.clear();
        self.state = TransportState::Stopped;
        log::info!("[SYNC] Disposed, released {} handles", released);
    }

    // ========================================================================
    // Transport
    // ========================================================================

    /// Start all available handles together
    ///
    /// Handles are assumed to sit at `current_time` already. If any handle
    /// rejects, every handle is paused again and the first rejection is
    /// returned. With no available handles this is an idle no-op.
    pub fn play(&mut self) -> Result<()> {
        if self.state == TransportState::Playing {
            return Ok(());
        }
        if self.active_count() == 0 {
            log::debug!("[SYNC] Play with no active stems, staying idle");
            return Ok(());
        }

        self.start_all()?;
        self.state = TransportState::Playing;
        log::debug!(
            "[SYNC] Playing {} stems from {:.3}s",
            self.active_count(),
            self.current_time
        );
        Ok(())
    }

    fn start_all(&mut self) -> Result<()> {
        let mut first_error = None;
        for track in self.tracks.iter_mut().filter(|t| t.available) {
            let Some(handle) = track.handle.as_mut() else {
                continue;
            };
            if let Err(e) = handle.play() {
                log::warn!("[SYNC] Stem '{}' rejected play: {}", track.id, e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => {
                self.pause_all();
                self.state = TransportState::Stopped;
                Err(e)
            }
            None => Ok(()),
        }
    }

    fn pause_all(&mut self) {
        for handle in self.tracks.iter_mut().filter_map(|t| t.handle.as_mut()) {
            handle.pause();
        }
    }

    pub fn pause(&mut self) {
        self.pause_all();
        if self.state == TransportState::Playing {
            self.state = TransportState::Stopped;
            log::debug!("[SYNC] Paused at {:.3}s", self.current_time);
        }
    }

    pub fn toggle_play(&mut self) -> Result<()> {
        match self.state {
            TransportState::Playing => {
                self.pause();
                Ok(())
            }
            TransportState::Stopped => self.play(),
        }
    }

    /// Pause and return to the start
    pub fn stop(&mut self) {
        self.pause();
        self.current_time = 0.0;
        for handle in self.tracks.iter_mut().filter_map(|t| t.handle.as_mut()) {
            handle.seek(0.0);
        }
        log::debug!("[SYNC] Stopped, reset to 0");
    }

    /// Move every handle to `clamp(time, 0, duration)`
    ///
    /// Playback pauses around the move and resumes afterwards; if resuming
    /// fails the transport ends up stopped and the error is returned.
    pub fn seek(&mut self, time: f64) -> Result<()> {
        let was_playing = self.state == TransportState::Playing;
        if was_playing {
            self.pause_all();
        }

        let target = if time.is_finite() {
            time.clamp(0.0, self.duration)
        } else {
            self.current_time
        };
        self.current_time = target;
        for handle in self.tracks.iter_mut().filter_map(|t| t.handle.as_mut()) {
            handle.seek(target);
        }
        log::debug!("[SYNC] Seek to {:.3}s", target);

        if was_playing {
            if let Err(e) = self.start_all() {
                self.state = TransportState::Stopped;
                return Err(e);
            }
        }
        Ok(())
    }

    /// Seek relative to the current time
    pub fn skip(&mut self, direction: SkipDirection, amount: f64) -> Result<()> {
        let amount = amount.abs();
        let target = match direction {
            SkipDirection::Forward => self.current_time + amount,
            SkipDirection::Backward => self.current_time - amount,
        };
        self.seek(target.clamp(0.0, self.duration))
    }

    /// Sample positions and correct drift for one scheduled frame
    ///
    /// Handles that reached their own end (shorter stems) no longer take part
    /// in the mean or in drift correction. Returns `None` while stopped or
    /// when no handle is active.
    pub fn tick(&mut self) -> Option<FrameSample> {
        if self.state != TransportState::Playing {
            return None;
        }

        let mut live = 0;
        let mut last_end: f64 = 0.0;
        let mut positions: Vec<(usize, f64)> = Vec::new();
        for (i, track) in self.tracks.iter().enumerate() {
            let Some(handle) = track.live() else {
                continue;
            };
            live += 1;
            if handle.has_ended() {
                last_end = last_end.max(handle.position());
            } else {
                positions.push((i, handle.position()));
            }
        }
        if live == 0 {
            return None;
        }

        let all_ended = positions.is_empty();
        let (time, correction) = if all_ended {
            (last_end.max(self.current_time), None)
        } else {
            let mean = positions.iter().map(|(_, p)| p).sum::<f64>() / positions.len() as f64;
            (mean, self.correct_worst_offender(&positions, mean))
        };
        self.current_time = time;

        let past_end = self.duration > 0.0 && time >= self.duration - self.end_tolerance;
        let ended = all_ended || past_end;
        if ended {
            self.pause_all();
            self.state = TransportState::Stopped;
            log::debug!("[SYNC] Reached end at {:.3}s", time);
        }

        Some(FrameSample {
            current_time: time,
            correction,
            ended,
        })
    }

    fn correct_worst_offender(
        &mut self,
        positions: &[(usize, f64)],
        mean: f64,
    ) -> Option<DriftCorrection> {
        let (min, max) = positions
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), (_, p)| {
                (lo.min(*p), hi.max(*p))
            });
        let spread = max - min;
        if spread <= self.drift_threshold {
            return None;
        }

        let mut worst = positions[0];
        for &(index, position) in &positions[1..] {
            if (position - mean).abs() > (worst.1 - mean).abs() {
                worst = (index, position);
            }
        }

        let track = &mut self.tracks[worst.0];
        if let Some(handle) = track.handle.as_mut() {
            handle.seek(mean);
        }
        self.corrections += 1;
        log::debug!(
            "[SYNC] Drift {:.0}ms, re-snapped '{}' {:.3}s -> {:.3}s",
            spread * 1000.0,
            track.id,
            worst.1,
            mean
        );

        Some(DriftCorrection {
            stem_id: track.id.clone(),
            from: worst.1,
            to: mean,
            spread,
        })
    }

    // ========================================================================
    // Mixer
    // ========================================================================

    fn track(&self, stem_id: &str) -> Option<&Track> {
        self.tracks.iter().find(|t| t.id == stem_id)
    }

    fn mix_mut(&mut self, stem_id: &str) -> Result<&mut StemMix> {
        self.tracks
            .iter_mut()
            .find(|t| t.id == stem_id)
            .map(|t| &mut t.mix)
            .ok_or_else(|| StemsyncError::UnknownStem {
                stem_id: stem_id.to_string(),
            })
    }

    fn any_solo(&self) -> bool {
        self.tracks.iter().any(|t| t.mix.solo)
    }

    fn apply_gains(&mut self) {
        let any_solo = self.any_solo();
        let master = self.master;
        for track in self.tracks.iter_mut() {
            let gain = effective_gain(&track.mix, any_solo, &master);
            if let Some(handle) = track.handle.as_mut() {
                handle.set_gain(gain);
            }
        }
    }

    /// User mute; replaces any automatic mute
    pub fn set_muted(&mut self, stem_id: &str, muted: bool) -> Result<()> {
        self.mix_mut(stem_id)?.muted = muted;
        self.clear_auto_mute(stem_id);
        self.apply_gains();
        Ok(())
    }

    fn clear_auto_mute(&mut self, stem_id: &str) {
        if let Some(track) = self.tracks.iter_mut().find(|t| t.id == stem_id) {
            track.auto_muted = false;
        }
    }

    pub fn set_solo(&mut self, stem_id: &str, solo: bool) -> Result<()> {
        self.mix_mut(stem_id)?.solo = solo;
        self.apply_gains();
        Ok(())
    }

    pub fn set_volume(&mut self, stem_id: &str, volume: f32) -> Result<()> {
        self.mix_mut(stem_id)?.volume = volume.clamp(0.0, 1.0);
        self.apply_gains();
        Ok(())
    }

    pub fn toggle_mute(&mut self, stem_id: &str) -> Result<bool> {
        let mix = self.mix_mut(stem_id)?;
        mix.muted = !mix.muted;
        let muted = mix.muted;
        self.clear_auto_mute(stem_id);
        self.apply_gains();
        Ok(muted)
    }

    pub fn toggle_solo(&mut self, stem_id: &str) -> Result<bool> {
        let mix = self.mix_mut(stem_id)?;
        mix.solo = !mix.solo;
        let solo = mix.solo;
        self.apply_gains();
        Ok(solo)
    }

    pub fn set_master_volume(&mut self, volume: f32) {
        self.master.volume = volume.clamp(0.0, 1.0);
        self.apply_gains();
    }

    pub fn set_master_muted(&mut self, muted: bool) {
        self.master.muted = muted;
        self.apply_gains();
    }

    pub fn master(&self) -> MasterBus {
        self.master
    }

    pub fn mix(&self, stem_id: &str) -> Option<StemMix> {
        self.track(stem_id).map(|t| t.mix)
    }

    /// Audibility under the non-exclusive solo rule; unavailable stems
    /// are never audible
    pub fn is_audible(&self, stem_id: &str) -> Option<bool> {
        let any_solo = self.any_solo();
        self.track(stem_id)
            .map(|t| t.live().is_some() && is_audible(&t.mix, any_solo))
    }

    pub fn effective_gain(&self, stem_id: &str) -> Option<f32> {
        let any_solo = self.any_solo();
        self.track(stem_id)
            .map(|t| effective_gain(&t.mix, any_solo, &self.master))
    }

    /// Stem ids with their mix, in registration order
    pub fn mixes(&self) -> Vec<(String, StemMix)> {
        self.tracks.iter().map(|t| (t.id.clone(), t.mix)).collect()
    }

    // ========================================================================
    // State Queries
    // ========================================================================

    pub fn state(&self) -> TransportState {
        self.state
    }

    pub fn is_playing(&self) -> bool {
        self.state == TransportState::Playing
    }

    pub fn current_time(&self) -> f64 {
        self.current_time
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn drift_threshold(&self) -> f64 {
        self.drift_threshold
    }

    /// Total drift corrections applied
    pub fn corrections(&self) -> u64 {
        self.corrections
    }

    pub fn snapshot(&self) -> TransportSnapshot {
        TransportSnapshot {
            is_playing: self.is_playing(),
            current_time: self.current_time,
            duration: self.duration,
        }
    }
}
