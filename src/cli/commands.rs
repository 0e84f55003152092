//! CLI Command Implementations
//!
//! Implements the actual logic for each CLI command.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{info, warn};

use crate::cache::{open_file_cache, FileStore, StemCache};
use crate::chord::{try_detect_chord, SpectralFrame};
use crate::config::EngineConfig;
use crate::error::{Result, StemsyncError};
use crate::grid::{format_time, GridSettings};
use crate::loader::{HandleFactory, Instrument, LoadEvent, StemSource, StemSourceRef};
use crate::session::Session;
use crate::sync::{PlaybackHandle, SimulatedHandle};

use super::{CacheAction, GridArgs};

impl GridArgs {
    fn settings(&self) -> Result<GridSettings> {
        GridSettings::new(self.bpm, self.signature, self.division)
    }
}

/// Snap one time to the grid.
pub fn snap(time: f64, args: GridArgs) -> Result<()> {
    let grid = args.settings()?;
    let result = grid.snap(time);

    println!("{}", serde_json::to_string_pretty(&result)?);
    println!(
        "{:.3}s -> {:.3}s ({})",
        time,
        result.time,
        format_time(result.time, Some(grid.bpm()), grid.time_signature())
    );
    Ok(())
}

/// Print grid lines in a window.
pub fn grid(start: f64, end: f64, args: GridArgs) -> Result<()> {
    let grid = args.settings()?;
    for line in grid.grid_lines(start, end) {
        let marker = if line.is_measure { "|" } else { " " };
        println!(
            "{} {:>5} {:>9.3}s  {}",
            marker,
            line.index,
            line.time,
            format_time(line.time, Some(grid.bpm()), grid.time_signature())
        );
    }
    Ok(())
}

/// Classify the chord in a JSON spectral frame.
pub fn chord(path: &Path) -> Result<()> {
    info!("Reading spectral frame: {}", path.display());

    let content = fs::read_to_string(path)?;
    let frame: SpectralFrame = serde_json::from_str(&content)?;
    let result = try_detect_chord(&frame)?;

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn cache_config(config: &EngineConfig, dir: Option<PathBuf>) -> Result<EngineConfig> {
    let mut config = config.clone();
    if dir.is_some() {
        config.cache_dir = dir;
    }
    if config.cache_dir.is_none() {
        return Err(StemsyncError::InvalidConfig {
            reason: "no cache directory; pass --dir or set cache_dir".to_string(),
        });
    }
    Ok(config)
}

/// Run a cache maintenance action.
pub fn cache(config: &EngineConfig, dir: Option<PathBuf>, action: CacheAction) -> Result<()> {
    let config = cache_config(config, dir)?;
    let cache_dir = config.cache_dir.clone().unwrap_or_default();

    match action {
        CacheAction::Stats => {
            let stats = open_file_cache(&config)?.stats();
            let bytes = FileStore::open(&cache_dir)?.total_bytes()?;
            println!("Cache directory: {}", cache_dir.display());
            println!("Persistent entries: {}", stats.persistent_entries);
            println!("Persistent size: {:.1} MiB", bytes as f64 / (1024.0 * 1024.0));
            println!("TTL: {} days", config.persistent_ttl_days);
        }
        CacheAction::ClearExpired => {
            let removed = open_file_cache(&config)?.clear_expired();
            println!("Removed {} expired entries", removed);
        }
        CacheAction::Clear => {
            open_file_cache(&config)?.clear();
            println!("Cache cleared: {}", cache_dir.display());
        }
        CacheAction::Prune => {
            let freed = FileStore::open(&cache_dir)?.prune_orphans()?;
            println!("Freed {} bytes of orphaned payloads", freed);
        }
    }
    Ok(())
}

/// Download URLs into the persistent cache.
#[cfg(feature = "http")]
pub fn prefetch(config: &EngineConfig, dir: Option<PathBuf>, urls: &[String]) -> Result<()> {
    use crate::cache::HttpFetcher;

    let config = cache_config(config, dir)?;
    let cache = open_file_cache(&config)?;
    let fetcher = HttpFetcher::new()?;

    let fetched = cache.prefetch(urls, &fetcher);
    println!("Fetched {} of {} stems", fetched, urls.len());
    Ok(())
}

/// Creates simulated handles whose rates drift apart.
struct SimulatedFactory {
    duration: f64,
    drift: f64,
    probes: Vec<SimulatedHandle>,
}

impl HandleFactory for SimulatedFactory {
    fn create(
        &mut self,
        source: &StemSource,
        _from: StemSourceRef,
    ) -> Result<Box<dyn PlaybackHandle>> {
        let rate = 1.0 + self.probes.len() as f64 * self.drift;
        let handle = SimulatedHandle::new(source.id.clone(), Some(self.duration)).with_rate(rate);
        self.probes.push(handle.clone());
        Ok(Box::new(handle))
    }
}

/// Drive a session of simulated stems and report drift corrections.
pub fn simulate(
    config: &EngineConfig,
    stems: &[String],
    seconds: f64,
    duration: f64,
    drift: f64,
    fps: f64,
) -> Result<()> {
    if !(fps > 0.0) || !(duration > 0.0) {
        return Err(StemsyncError::InvalidConfig {
            reason: "fps and duration must be positive".to_string(),
        });
    }

    let sources: Vec<StemSource> = stems
        .iter()
        .map(|label| {
            StemSource::new(
                label.as_str(),
                Instrument::from_label(label),
                format!("sim://{}", label),
            )
        })
        .collect();
    let mut session = Session::new(sources, Arc::new(StemCache::new(config)), config);
    let mut factory = SimulatedFactory {
        duration,
        drift,
        probes: Vec::new(),
    };

    session.load(&mut factory);
    let order: Vec<String> = session
        .loader()
        .initialization_order()
        .iter()
        .map(|s| s.id.clone())
        .collect();
    println!("Initialization order: {}", order.join(", "));
    for id in &order {
        session.on_load_event(id, LoadEvent::Ready)?;
    }

    session.play()?;
    let dt = 1.0 / fps;
    let mut now = 0.0;
    let mut corrections = 0;
    while now < seconds && session.wants_frame() {
        for probe in &factory.probes {
            probe.advance(dt);
        }
        now += dt;

        let Some(report) = session.on_frame(now, None) else {
            continue;
        };
        if let Some(c) = &report.correction {
            corrections += 1;
            println!(
                "{:>8.3}s  drift {:>6.1}ms  {} {:.4}s -> {:.4}s",
                report.transport.current_time,
                c.spread * 1000.0,
                c.stem_id,
                c.from,
                c.to
            );
        }
        if report.ended {
            info!("Playback reached the end at {:.3}s", report.transport.current_time);
            break;
        }
    }
    if corrections == 0 {
        warn!("No drift corrections were needed; try a larger --drift");
    }

    println!(
        "{} frames, {} corrections",
        session.scheduler().frames_dispatched(),
        corrections
    );
    println!("{}", serde_json::to_string_pretty(&session.snapshot())?);
    session.dispose();
    Ok(())
}
