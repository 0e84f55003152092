//! Instrument types and load priority

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Instrument a stem was separated as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Instrument {
    Vocals,
    Bass,
    Drums,
    Guitar,
    /// Piano and other keyboards
    Keys,
    Other,
}

impl Instrument {
    /// Load priority; lower loads first
    pub fn priority(self) -> u8 {
        match self {
            Instrument::Vocals => 0,
            Instrument::Bass => 1,
            Instrument::Drums => 2,
            Instrument::Guitar => 3,
            Instrument::Keys => 4,
            Instrument::Other => 5,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Instrument::Vocals => "vocals",
            Instrument::Bass => "bass",
            Instrument::Drums => "drums",
            Instrument::Guitar => "guitar",
            Instrument::Keys => "keys",
            Instrument::Other => "other",
        }
    }

    /// Lenient mapping from separator labels; unknown labels are `Other`
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "vocals" | "vocal" | "voice" | "voices" | "vox" => Instrument::Vocals,
            "bass" => Instrument::Bass,
            "drums" | "drum" | "percussion" => Instrument::Drums,
            "guitar" | "guitars" => Instrument::Guitar,
            "piano" | "keys" | "keyboard" | "keyboards" | "synth" => Instrument::Keys,
            _ => Instrument::Other,
        }
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Instrument {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Instrument::from_label(s))
    }
}
