//! Stem session
//!
//! Composes loader, synchronizer, frame scheduler, tempo engine and chord
//! tracker into the object a UI binds to. Every scheduled frame runs time
//! sampling, drift correction and chord classification in that order, so the
//! reported time and chord belong to the same frame.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::cache::StemCache;
use crate::chord::{detect_chord, ChordResult, ChordTracker, SpectralFrame};
use crate::config::EngineConfig;
use crate::error::Result;
use crate::grid::{format_time, GridSettings, TempoEngine, TempoSource};
use crate::loader::{HandleFactory, Instrument, LoadEvent, LoadState, StemLoader, StemSource};
use crate::scheduler::FrameScheduler;
use crate::sync::{DriftCorrection, SkipDirection, Synchronizer, TransportSnapshot};

/// What one dispatched frame produced
#[derive(Debug, Clone, PartialEq)]
pub struct FrameReport {
    pub transport: TransportSnapshot,
    pub correction: Option<DriftCorrection>,
    /// Playback hit its natural end on this frame
    pub ended: bool,
    pub chord: Option<ChordResult>,
}

/// Per-stem view for a mixer UI
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StemView {
    pub id: String,
    pub instrument: Instrument,
    pub state: LoadState,
    pub progress: f32,
    pub muted: bool,
    pub solo: bool,
    pub volume: f32,
    pub audible: bool,
    pub available: bool,
}

/// Serializable session state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub id: Uuid,
    pub transport: TransportSnapshot,
    pub stems: Vec<StemView>,
    pub aggregate_progress: f32,
    pub fully_loaded: bool,
    pub bpm: f64,
    pub tempo_source: TempoSource,
    pub chord: Option<String>,
}

pub struct Session {
    id: Uuid,
    created_at: DateTime<Utc>,
    loader: StemLoader,
    sync: Synchronizer,
    scheduler: FrameScheduler<()>,
    tempo: TempoEngine,
    chords: ChordTracker,
    loaded: bool,
    disposed: bool,
}

impl Session {
    /// Open a session over `sources`; no handles are created yet
    pub fn new(sources: Vec<StemSource>, cache: Arc<StemCache>, config: &EngineConfig) -> Self {
        let session = Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            loader: StemLoader::new(sources, cache),
            sync: Synchronizer::new(config),
            scheduler: FrameScheduler::with_refresh_hz(config.refresh_hz),
            tempo: TempoEngine::from_config(config),
            chords: ChordTracker::default(),
            loaded: false,
            disposed: false,
        };
        log::info!(
            "[SESSION] Opened {} with {} stems",
            session.id,
            session.loader.len()
        );
        session
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    // ========================================================================
    // Loading
    // ========================================================================

    /// Create every stem's handle in priority order
    ///
    /// Returns the number of usable handles. Stems whose handle could not be
    /// created stay in the mixer, muted and unavailable.
    pub fn load(&mut self, factory: &mut dyn HandleFactory) -> usize {
        if self.disposed || self.loaded {
            log::warn!("[SESSION] load() ignored, session already loaded or disposed");
            return 0;
        }
        self.loaded = true;

        let mut created = 0;
        for init in self.loader.initialize(factory) {
            match init.handle {
                Ok(handle) => match self.sync.add_stem(&init.stem_id, handle) {
                    Ok(()) => created += 1,
                    Err(e) => log::warn!("[SESSION] Stem '{}' not started: {}", init.stem_id, e),
                },
                Err(_) => self.sync.add_unavailable(&init.stem_id),
            }
        }
        log::info!("[SESSION] {} of {} stems ready for playback", created, self.loader.len());
        created
    }

    /// Route a media event to the stem's state machine
    ///
    /// Metadata may arrive with any event, so durations are refreshed every
    /// time. A failure mutes the stem without touching the others.
    pub fn on_load_event(&mut self, stem_id: &str, event: LoadEvent) -> Result<LoadState> {
        let state = self.loader.handle_event(stem_id, event)?;
        if let LoadState::Errored(reason) = &state {
            if self.sync.is_available(stem_id) == Some(true) {
                log::warn!("[SESSION] Stem '{}' failed: {}", stem_id, reason);
                self.sync.mark_unavailable(stem_id);
            }
        }
        self.sync.refresh_durations();
        Ok(state)
    }

    /// Retry a stem, typically one that errored
    ///
    /// While playing, the new handle joins at the current transport time.
    /// The automatic mute from the failure is lifted; a user mute is kept.
    pub fn reload_stem(&mut self, stem_id: &str, factory: &mut dyn HandleFactory) -> Result<()> {
        let init = self.loader.reinitialize(stem_id, factory)?;
        match init.handle {
            Ok(handle) => {
                self.sync.add_stem(stem_id, handle)?;
                self.request_frame();
                Ok(())
            }
            Err(e) => {
                self.sync.add_unavailable(stem_id);
                Err(e)
            }
        }
    }

    // ========================================================================
    // Transport
    // ========================================================================

    /// Start playback and begin requesting frames
    pub fn play(&mut self) -> Result<()> {
        self.sync.play()?;
        self.request_frame();
        Ok(())
    }

    pub fn pause(&mut self) {
        self.sync.pause();
        self.request_frame();
    }

    pub fn toggle_play(&mut self) -> Result<()> {
        self.sync.toggle_play()?;
        self.request_frame();
        Ok(())
    }

    pub fn stop(&mut self) {
        self.sync.stop();
        self.request_frame();
    }

    pub fn seek(&mut self, time: f64) -> Result<()> {
        let result = self.sync.seek(time);
        self.request_frame();
        result
    }

    pub fn skip(&mut self, direction: SkipDirection, amount: f64) -> Result<()> {
        let result = self.sync.skip(direction, amount);
        self.request_frame();
        result
    }

    fn request_frame(&mut self) {
        self.scheduler.schedule(());
    }

    /// Whether the host should deliver a display refresh
    pub fn wants_frame(&self) -> bool {
        self.scheduler.wants_frame()
    }

    /// Handle a display refresh at `timestamp` seconds
    ///
    /// `spectrum` is the analyser frame for the same refresh, if the analysis
    /// collaborator has one. Returns `None` when no frame was pending.
    pub fn on_frame(&mut self, timestamp: f64, spectrum: Option<&SpectralFrame>) -> Option<FrameReport> {
        self.scheduler.on_frame(timestamp)?;

        let sample = self.sync.tick();
        let (correction, ended) = match sample {
            Some(s) => (s.correction, s.ended),
            None => (None, false),
        };

        let chord = spectrum.map(|frame| {
            let result = detect_chord(frame);
            self.chords.observe(self.sync.current_time(), &result);
            result
        });

        if self.sync.is_playing() {
            self.request_frame();
        }

        Some(FrameReport {
            transport: self.sync.snapshot(),
            correction,
            ended,
            chord,
        })
    }

    // ========================================================================
    // Components
    // ========================================================================

    /// Mixer and transport controls
    pub fn synchronizer(&self) -> &Synchronizer {
        &self.sync
    }

    pub fn synchronizer_mut(&mut self) -> &mut Synchronizer {
        &mut self.sync
    }

    pub fn loader(&self) -> &StemLoader {
        &self.loader
    }

    pub fn tempo(&self) -> &TempoEngine {
        &self.tempo
    }

    pub fn tempo_mut(&mut self) -> &mut TempoEngine {
        &mut self.tempo
    }

    pub fn chords(&self) -> &ChordTracker {
        &self.chords
    }

    pub fn scheduler(&self) -> &FrameScheduler<()> {
        &self.scheduler
    }

    /// Grid at the session's effective tempo
    pub fn grid(&self, time_signature: u32, snap_division: u32) -> Result<GridSettings> {
        self.tempo.grid(time_signature, snap_division)
    }

    /// Timeline label; raw seconds until a tempo is known
    pub fn format_time(&self, time: f64, time_signature: u32) -> String {
        format_time(time, self.tempo.known_bpm(), time_signature)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let stems = self
            .loader
            .statuses()
            .into_iter()
            .map(|status| {
                let mix = self.sync.mix(&status.id).unwrap_or_default();
                StemView {
                    audible: self.sync.is_audible(&status.id).unwrap_or(false),
                    available: self.sync.is_available(&status.id).unwrap_or(false),
                    id: status.id,
                    instrument: status.instrument,
                    state: status.state,
                    progress: status.progress,
                    muted: mix.muted,
                    solo: mix.solo,
                    volume: mix.volume,
                }
            })
            .collect();

        SessionSnapshot {
            id: self.id,
            transport: self.sync.snapshot(),
            stems,
            aggregate_progress: self.loader.aggregate_progress(),
            fully_loaded: self.loader.is_fully_loaded(),
            bpm: self.tempo.bpm(),
            tempo_source: self.tempo.source(),
            chord: self.chords.current().map(str::to_string),
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Cancel pending frames, stop and release every handle
    ///
    /// Cached payloads held by the handles are dropped with them; the cache
    /// itself outlives the session.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.scheduler.dispose();
        self.sync.dispose();
        self.tempo.dispose();
        self.chords.clear();
        self.disposed = true;
        log::info!("[SESSION] Disposed {}", self.id);
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StemsyncError;
    use crate::loader::StemSourceRef;
    use crate::sync::{PlaybackHandle, SimulatedHandle};
    use std::collections::HashMap;

    /// Factory that keeps a probe per stem
    #[derive(Default)]
    struct ProbeFactory {
        probes: HashMap<String, SimulatedHandle>,
        durations: HashMap<String, f64>,
        fail: Vec<String>,
    }

    impl HandleFactory for ProbeFactory {
        fn create(
            &mut self,
            source: &StemSource,
            _from: StemSourceRef,
        ) -> Result<Box<dyn PlaybackHandle>> {
            if self.fail.contains(&source.id) {
                return Err(StemsyncError::load(&source.id, "404"));
            }
            let duration = self.durations.get(&source.id).copied();
            let handle = SimulatedHandle::new(source.id.clone(), duration);
            self.probes.insert(source.id.clone(), handle.clone());
            Ok(Box::new(handle))
        }
    }

    fn session(ids: &[&str]) -> Session {
        let sources = ids
            .iter()
            .map(|id| StemSource::new(*id, Instrument::from_label(id), format!("mem://{}", id)))
            .collect();
        Session::new(sources, Arc::new(StemCache::in_memory(8)), &EngineConfig::default())
    }

    fn factory_with(durations: &[(&str, f64)]) -> ProbeFactory {
        ProbeFactory {
            durations: durations.iter().map(|(id, d)| (id.to_string(), *d)).collect(),
            ..Default::default()
        }
    }

    /// A frame whose spectrum has peaks at the given frequencies
    fn spectrum(freqs: &[f32]) -> SpectralFrame {
        let (sr, fft) = (44_100.0f32, 8192usize);
        let mut frame = SpectralFrame {
            magnitudes_db: vec![f32::NEG_INFINITY; fft / 2],
            sample_rate: sr,
            fft_size: fft,
        };
        for f in freqs {
            frame.magnitudes_db[(f * fft as f32 / sr).round() as usize] = 0.0;
        }
        frame
    }

    #[test]
    fn test_handles_created_lazily() {
        let mut s = session(&["vocals", "drums"]);
        assert_eq!(s.synchronizer().stem_count(), 0);

        let mut factory = factory_with(&[("vocals", 10.0), ("drums", 12.0)]);
        assert_eq!(s.load(&mut factory), 2);
        assert_eq!(s.synchronizer().stem_count(), 2);
        assert_eq!(s.synchronizer().duration(), 12.0);
        assert_eq!(s.load(&mut factory), 0);
    }

    #[test]
    fn test_frame_pipeline_coalesces_and_reschedules() {
        let mut s = session(&["vocals", "bass"]);
        let mut factory = factory_with(&[("vocals", 60.0), ("bass", 60.0)]);
        s.load(&mut factory);

        s.play().unwrap();
        s.seek(1.0).unwrap();
        assert!(s.wants_frame());
        assert!(s.scheduler().requests_coalesced() >= 1);

        for probe in factory.probes.values() {
            probe.advance(0.5);
        }
        let report = s.on_frame(0.016, None).unwrap();
        assert!((report.transport.current_time - 1.5).abs() < 1e-9);
        assert!(report.transport.is_playing);
        assert!(s.wants_frame(), "playing sessions keep requesting frames");

        s.pause();
        s.on_frame(0.032, None).unwrap();
        assert!(!s.wants_frame());
        assert!(s.on_frame(0.048, None).is_none());
    }

    #[test]
    fn test_chord_uses_same_frame_time() {
        let mut s = session(&["guitar"]);
        let mut factory = factory_with(&[("guitar", 60.0)]);
        s.load(&mut factory);
        s.play().unwrap();
        factory.probes["guitar"].advance(2.0);

        let report = s
            .on_frame(0.016, Some(&spectrum(&[261.63, 329.63, 392.0])))
            .unwrap();
        assert_eq!(report.chord.unwrap().label, "C");
        assert_eq!(s.chords().history()[0].time, report.transport.current_time);
        assert_eq!(s.snapshot().chord.as_deref(), Some("C"));
    }

    #[test]
    fn test_load_failure_mutes_only_that_stem() {
        let mut s = session(&["vocals", "bass", "drums"]);
        let mut factory = factory_with(&[("vocals", 30.0), ("bass", 30.0), ("drums", 30.0)]);
        s.load(&mut factory);

        s.on_load_event("vocals", LoadEvent::Ready).unwrap();
        s.on_load_event("bass", LoadEvent::Failed("network".into()))
            .unwrap();
        s.on_load_event("drums", LoadEvent::Ready).unwrap();

        let snapshot = s.snapshot();
        let bass = snapshot.stems.iter().find(|v| v.id == "bass").unwrap();
        assert!(bass.muted && !bass.available && !bass.audible);
        assert!(snapshot.fully_loaded);

        s.play().unwrap();
        assert!(factory.probes["vocals"].is_playing());
        assert!(factory.probes["drums"].is_playing());
        assert!(!factory.probes["bass"].is_playing());
    }

    #[test]
    fn test_factory_failure_keeps_stem_listed() {
        let mut s = session(&["vocals", "bass"]);
        let mut factory = factory_with(&[("vocals", 30.0)]);
        factory.fail.push("bass".to_string());
        assert_eq!(s.load(&mut factory), 1);

        let snapshot = s.snapshot();
        assert_eq!(snapshot.stems.len(), 2);
        assert!(snapshot.stems.iter().any(|v| v.id == "bass" && v.muted));

        factory.fail.clear();
        s.reload_stem("bass", &mut factory).unwrap();
        assert_eq!(s.synchronizer().active_count(), 2);
        assert_eq!(s.synchronizer().mix("bass").map(|m| m.muted), Some(false));
    }

    #[test]
    fn test_playback_error_notice() {
        let mut s = session(&["vocals", "bass"]);
        let mut factory = factory_with(&[("vocals", 30.0), ("bass", 30.0)]);
        s.load(&mut factory);
        factory.probes["bass"].reject_play(Some("NotAllowedError"));

        let err = s.play().unwrap_err();
        assert!(err.user_notice().is_some());
        assert!(!s.synchronizer().is_playing());
        assert!(factory.probes.values().all(|p| !p.is_playing()));
    }

    #[test]
    fn test_format_time_follows_tempo() {
        let mut s = session(&[]);
        assert_eq!(s.format_time(2.5, 4), "2.50");
        s.tempo_mut().set_manual_bpm(Some(120.0)).unwrap();
        assert_eq!(s.format_time(2.5, 4), "2.2");
        assert_eq!(s.grid(4, 4).unwrap().snap(1.3).beat_index, 3);
    }

    #[test]
    fn test_dispose_cancels_and_releases() {
        let mut s = session(&["vocals", "bass"]);
        let mut factory = factory_with(&[("vocals", 30.0), ("bass", 30.0)]);
        s.load(&mut factory);
        s.play().unwrap();
        assert!(s.wants_frame());

        s.dispose();
        assert!(!s.wants_frame());
        assert!(s.on_frame(0.016, None).is_none());
        assert!(factory.probes.values().all(|p| p.is_released()));
        assert!(s.tempo().is_disposed());
    }

    #[test]
    fn test_drop_releases_handles() {
        let mut factory = factory_with(&[("vocals", 30.0)]);
        {
            let mut s = session(&["vocals"]);
            s.load(&mut factory);
        }
        assert!(factory.probes["vocals"].is_released());
    }

    #[test]
    fn test_chord_tracker_ignores_weak_frames() {
        let mut s = session(&["keys"]);
        let mut factory = factory_with(&[("keys", 60.0)]);
        s.load(&mut factory);
        s.play().unwrap();

        let report = s.on_frame(0.016, Some(&spectrum(&[]))).unwrap();
        assert_eq!(report.chord.unwrap().label, "N/C");
        assert!(s.chords().history().is_empty());
    }

    #[test]
    fn test_reload_while_playing_joins_transport() {
        let mut s = session(&["vocals", "bass"]);
        let mut factory = factory_with(&[("vocals", 60.0), ("bass", 60.0)]);
        factory.fail.push("bass".to_string());
        s.load(&mut factory);
        s.play().unwrap();

        factory.fail.clear();
        s.reload_stem("bass", &mut factory).unwrap();
        assert!(factory.probes["bass"].is_playing());

        let mut now = 0.0;
        for _ in 0..60 {
            factory.probes.values().for_each(|p| p.advance(1.0 / 60.0));
            now += 1.0 / 60.0;
            s.on_frame(now, None).unwrap();
        }
        assert!((factory.probes["vocals"].position() - 1.0).abs() < 1e-9);
        assert!((factory.probes["bass"].position() - 1.0).abs() < 1e-9);
        assert_eq!(s.synchronizer().corrections(), 0);
    }

    #[test]
    fn test_reload_keeps_user_mute() {
        let mut s = session(&["vocals", "bass"]);
        let mut factory = factory_with(&[("vocals", 30.0), ("bass", 30.0)]);
        s.load(&mut factory);
        s.synchronizer_mut().set_muted("bass", true).unwrap();
        s.on_load_event("bass", LoadEvent::Failed("decode".into()))
            .unwrap();

        s.reload_stem("bass", &mut factory).unwrap();
        assert_eq!(s.synchronizer().is_available("bass"), Some(true));
        assert_eq!(s.synchronizer().mix("bass").map(|m| m.muted), Some(true));
    }
}
