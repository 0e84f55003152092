//! Stemsync - Synchronized Stem Playback Core
//!
//! Keeps several independently buffered stems in lock-step, loads and caches
//! their payloads by instrument priority, derives a beat grid from detected
//! or manual tempo, and classifies chords from live spectral frames.
//!
//! # Architecture
//!
//! Components, leaves first:
//! - [`scheduler`]: coalesces update requests into one dispatch per refresh
//! - [`cache`]: two-tier (memory LRU + persistent with TTL) payload cache
//! - [`loader`]: priority-ordered, cache-first handle creation and load states
//! - [`sync`]: one transport over N playback handles with drift correction
//! - [`grid`]: tempo selection and beat-grid math
//! - [`chord`]: spectral frame to chord classification
//!
//! [`Session`] ties them together for a UI; everything runs on the caller's
//! thread, driven by display refreshes.

pub mod cache;
pub mod chord;
pub mod cli;
pub mod config;
pub mod error;
pub mod grid;
pub mod loader;
pub mod scheduler;
pub mod session;
pub mod sync;

pub use cache::{CacheKey, StemCache};
pub use chord::{detect_chord, ChordResult, SpectralFrame};
pub use config::EngineConfig;
pub use error::{Result, StemsyncError};
pub use grid::{GridSettings, TempoEngine};
pub use loader::{HandleFactory, Instrument, LoadEvent, LoadState, StemLoader, StemSource};
pub use scheduler::FrameScheduler;
pub use session::{FrameReport, Session, SessionSnapshot};
pub use sync::{PlaybackHandle, SimulatedHandle, Synchronizer};
