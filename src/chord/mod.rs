//! Chord Detector
//!
//! Pure classification of a spectral frame: build a chromagram, compare it
//! against binary templates for every root and quality by cosine similarity
//! and report the best match.
//!
//! # Example
//!
//! ```
//! use stemsync::chord::{match_chord, ChordQuality, Chromagram, PitchClass};
//!
//! let c_major = Chromagram::from_bins([1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0]);
//! let result = match_chord(&c_major);
//! assert_eq!(result.label, "C");
//! assert_eq!(result.root, Some(PitchClass::C));
//! assert_eq!(result.quality, Some(ChordQuality::Major));
//! ```

pub mod chroma;
pub mod tracker;

use std::fmt;

use serde::Serialize;

pub use chroma::{Chromagram, SpectralFrame};
pub use tracker::{ChordChange, ChordTracker};

use crate::error::Result;

/// Label reported when there is too little energy to classify
pub const NO_CHORD: &str = "N/C";

/// Below this raw chromagram energy the frame is treated as silence
pub const MIN_CHORD_ENERGY: f32 = 0.01;

/// Pitch classes, C = 0
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PitchClass {
    C,
    CSharp,
    D,
    DSharp,
    E,
    F,
    FSharp,
    G,
    GSharp,
    A,
    ASharp,
    B,
}

impl PitchClass {
    pub const ALL: [PitchClass; 12] = [
        PitchClass::C,
        PitchClass::CSharp,
        PitchClass::D,
        PitchClass::DSharp,
        PitchClass::E,
        PitchClass::F,
        PitchClass::FSharp,
        PitchClass::G,
        PitchClass::GSharp,
        PitchClass::A,
        PitchClass::ASharp,
        PitchClass::B,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        const NAMES: [&str; 12] = [
            "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
        ];
        NAMES[self.index()]
    }
}

impl fmt::Display for PitchClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Chord qualities in the template dictionary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChordQuality {
    Major,
    Minor,
    Dominant7,
    Sus4,
}

impl ChordQuality {
    pub const ALL: [ChordQuality; 4] = [
        ChordQuality::Major,
        ChordQuality::Minor,
        ChordQuality::Dominant7,
        ChordQuality::Sus4,
    ];

    /// Semitone offsets from the root
    pub fn intervals(self) -> &'static [usize] {
        match self {
            ChordQuality::Major => &[0, 4, 7],
            ChordQuality::Minor => &[0, 3, 7],
            ChordQuality::Dominant7 => &[0, 4, 7, 10],
            ChordQuality::Sus4 => &[0, 5, 7],
        }
    }

    /// Suffix appended to the root name in labels
    pub fn suffix(self) -> &'static str {
        match self {
            ChordQuality::Major => "",
            ChordQuality::Minor => "m",
            ChordQuality::Dominant7 => "7",
            ChordQuality::Sus4 => "sus4",
        }
    }
}

impl fmt::Display for ChordQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChordQuality::Major => "major",
            ChordQuality::Minor => "minor",
            ChordQuality::Dominant7 => "dominant7",
            ChordQuality::Sus4 => "sus4",
        };
        f.write_str(name)
    }
}

/// Binary 12-vector for `root` + `quality`
pub fn template(root: PitchClass, quality: ChordQuality) -> [f32; 12] {
    let mut t = [0.0; 12];
    for interval in quality.intervals() {
        t[(root.index() + interval) % 12] = 1.0;
    }
    t
}

fn cosine_similarity(a: &[f32; 12], b: &[f32; 12]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// Classified chord for one frame
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChordResult {
    pub chromagram: [f32; 12],
    /// `C`, `Am`, `G7`, `Dsus4`, or [`NO_CHORD`]
    pub label: String,
    pub root: Option<PitchClass>,
    pub quality: Option<ChordQuality>,
    /// Cosine similarity of the best template, 0 for no chord
    pub confidence: f32,
}

impl ChordResult {
    fn no_chord(chromagram: [f32; 12]) -> Self {
        Self {
            chromagram,
            label: NO_CHORD.to_string(),
            root: None,
            quality: None,
            confidence: 0.0,
        }
    }

    pub fn is_chord(&self) -> bool {
        self.root.is_some()
    }
}

/// Best template match for a chromagram
///
/// Ties keep the earlier template (roots from C upward, qualities in
/// [`ChordQuality::ALL`] order).
pub fn match_chord(chroma: &Chromagram) -> ChordResult {
    if chroma.energy < MIN_CHORD_ENERGY {
        return ChordResult::no_chord(chroma.bins);
    }

    let mut best: Option<(PitchClass, ChordQuality, f32)> = None;
    for root in PitchClass::ALL {
        for quality in ChordQuality::ALL {
            let score = cosine_similarity(&chroma.bins, &template(root, quality));
            if best.map_or(true, |(_, _, s)| score > s) {
                best = Some((root, quality, score));
            }
        }
    }

    match best {
        Some((root, quality, confidence)) if confidence > 0.0 => ChordResult {
            chromagram: chroma.bins,
            label: format!("{}{}", root, quality.suffix()),
            root: Some(root),
            quality: Some(quality),
            confidence,
        },
        _ => ChordResult::no_chord(chroma.bins),
    }
}

/// Classify a frame, reporting invalid input as an error
pub fn try_detect_chord(frame: &SpectralFrame) -> Result<ChordResult> {
    Ok(match_chord(&Chromagram::from_frame(frame)?))
}

/// Classify a frame; invalid input yields [`NO_CHORD`]
pub fn detect_chord(frame: &SpectralFrame) -> ChordResult {
    match try_detect_chord(frame) {
        Ok(result) => result,
        Err(e) => {
            log::warn!("[CHORD] Detection failed: {}", e);
            ChordResult::no_chord([0.0; 12])
        }
    }
}
