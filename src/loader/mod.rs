//! Stem Loader
//!
//! Owns the stem list of a session: initialization order by instrument
//! priority, cache-first handle creation and the per-stem load state machine.
//! Handles are created lazily by [`StemLoader::initialize`], never at
//! construction.

pub mod instrument;
pub mod state;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use instrument::Instrument;
pub use state::{LoadEvent, LoadState};

use crate::cache::{Payload, StemCache};
use crate::error::{Result, StemsyncError};
use crate::sync::PlaybackHandle;

/// A stem as delivered by the track-loading collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StemSource {
    pub id: String,
    pub instrument: Instrument,
    /// Opaque, fetchable source URL
    pub url: String,
}

impl StemSource {
    pub fn new(id: impl Into<String>, instrument: Instrument, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            instrument,
            url: url.into(),
        }
    }
}

/// Where a handle should read its audio from
#[derive(Debug, Clone)]
pub enum StemSourceRef {
    /// Payload already held by the cache
    Cached(Payload),
    /// Cache miss; stream from the source URL
    Remote(String),
}

impl StemSourceRef {
    pub fn is_cached(&self) -> bool {
        matches!(self, StemSourceRef::Cached(_))
    }
}

/// Builds playback handles for stems
pub trait HandleFactory {
    fn create(
        &mut self,
        source: &StemSource,
        from: StemSourceRef,
    ) -> Result<Box<dyn PlaybackHandle>>;
}

/// Outcome of creating one stem's handle
pub struct StemInit {
    pub stem_id: String,
    pub from_cache: bool,
    pub handle: Result<Box<dyn PlaybackHandle>>,
}

/// Per-stem status for progress indicators
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StemStatus {
    pub id: String,
    pub instrument: Instrument,
    pub state: LoadState,
    pub progress: f32,
    pub from_cache: bool,
}

#[derive(Debug)]
struct StemEntry {
    source: StemSource,
    state: LoadState,
    from_cache: bool,
    /// Payload is known to be in the cache
    cached: bool,
}

pub struct StemLoader {
    stems: Vec<StemEntry>,
    cache: Arc<StemCache>,
}

impl StemLoader {
    pub fn new(sources: Vec<StemSource>, cache: Arc<StemCache>) -> Self {
        let mut stems: Vec<StemEntry> = Vec::with_capacity(sources.len());
        for source in sources {
            if stems.iter().any(|s| s.source.id == source.id) {
                log::warn!("[LOADER] Duplicate stem id '{}' ignored", source.id);
                continue;
            }
            stems.push(StemEntry {
                source,
                state: LoadState::Pending,
                from_cache: false,
                cached: false,
            });
        }
        Self { stems, cache }
    }

    /// Stem sources in the order they will be initialized
    ///
    /// Sorted by instrument priority; ties keep their input order.
    pub fn initialization_order(&self) -> Vec<&StemSource> {
        self.order().into_iter().map(|i| &self.stems[i].source).collect()
    }

    fn order(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.stems.len()).collect();
        order.sort_by_key(|&i| self.stems[i].source.instrument.priority());
        order
    }

    /// Create a handle for every stem in priority order
    ///
    /// Each stem tries the cache first and falls back to its URL. A factory
    /// failure errors that stem only.
    pub fn initialize(&mut self, factory: &mut dyn HandleFactory) -> Vec<StemInit> {
        let order = self.order();
        log::info!("[LOADER] Initializing {} stems", order.len());
        order
            .into_iter()
            .map(|index| self.create_handle(index, factory))
            .collect()
    }

    /// Reset one stem to `Pending` and create a fresh handle for it
    pub fn reinitialize(
        &mut self,
        stem_id: &str,
        factory: &mut dyn HandleFactory,
    ) -> Result<StemInit> {
        let index = self.index_of(stem_id)?;
        let entry = &mut self.stems[index];
        entry.state = entry.state.apply(&LoadEvent::Reset);
        log::info!("[LOADER] Re-initializing '{}'", stem_id);
        Ok(self.create_handle(index, factory))
    }

    fn create_handle(&mut self, index: usize, factory: &mut dyn HandleFactory) -> StemInit {
        let url = self.stems[index].source.url.clone();
        let from = match self.cache.get_url(&url) {
            Some(hit) => StemSourceRef::Cached(hit.payload),
            None => StemSourceRef::Remote(url),
        };
        let from_cache = from.is_cached();

        let entry = &mut self.stems[index];
        entry.from_cache = from_cache;
        entry.cached = from_cache;
        let handle = factory.create(&entry.source, from);
        match &handle {
            Ok(_) => log::debug!(
                "[LOADER] '{}' ({}) from {}",
                entry.source.id,
                entry.source.instrument,
                if from_cache { "cache" } else { "network" }
            ),
            Err(e) => {
                log::warn!("[LOADER] '{}' failed to initialize: {}", entry.source.id, e);
                entry.state = entry.state.apply(&LoadEvent::Failed(e.to_string()));
            }
        }

        StemInit {
            stem_id: entry.source.id.clone(),
            from_cache,
            handle,
        }
    }

    fn index_of(&self, stem_id: &str) -> Result<usize> {
        self.stems
            .iter()
            .position(|s| s.source.id == stem_id)
            .ok_or_else(|| StemsyncError::UnknownStem {
                stem_id: stem_id.to_string(),
            })
    }

    /// Feed a media event into a stem's state machine
    ///
    /// `FullyDownloaded` also writes the payload to the cache when it is not
    /// there yet.
    pub fn handle_event(&mut self, stem_id: &str, event: LoadEvent) -> Result<LoadState> {
        let index = self.index_of(stem_id)?;
        let entry = &mut self.stems[index];
        let previous = entry.state.clone();
        entry.state = previous.apply(&event);

        if let LoadEvent::FullyDownloaded(payload) = &event {
            if !entry.cached && !entry.state.is_errored() {
                entry.cached = self.cache.set_url(&entry.source.url, payload.clone());
            }
        }

        if std::mem::discriminant(&previous) != std::mem::discriminant(&entry.state) {
            log::debug!(
                "[LOADER] '{}': {} -> {}",
                stem_id,
                previous,
                entry.state
            );
        }
        Ok(entry.state.clone())
    }

    pub fn state(&self, stem_id: &str) -> Option<&LoadState> {
        self.stems
            .iter()
            .find(|s| s.source.id == stem_id)
            .map(|s| &s.state)
    }

    pub fn source(&self, stem_id: &str) -> Option<&StemSource> {
        self.stems
            .iter()
            .find(|s| s.source.id == stem_id)
            .map(|s| &s.source)
    }

    /// Mean of per-stem progress; 100 for an empty stem list
    pub fn aggregate_progress(&self) -> f32 {
        if self.stems.is_empty() {
            return 100.0;
        }
        let total: f32 = self.stems.iter().map(|s| s.state.progress()).sum();
        total / self.stems.len() as f32
    }

    /// True once every stem is `Ready` or `Errored`
    pub fn is_fully_loaded(&self) -> bool {
        self.stems.iter().all(|s| s.state.is_resolved())
    }

    pub fn statuses(&self) -> Vec<StemStatus> {
        self.stems
            .iter()
            .map(|s| StemStatus {
                id: s.source.id.clone(),
                instrument: s.source.instrument,
                state: s.state.clone(),
                progress: s.state.progress(),
                from_cache: s.from_cache,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.stems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stems.is_empty()
    }

    pub fn cache(&self) -> &Arc<StemCache> {
        &self.cache
    }
}
