//! Per-stem mix state and audibility rules

use serde::{Deserialize, Serialize};

/// Mute/solo/volume for one stem
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StemMix {
    pub muted: bool,
    pub solo: bool,
    /// Multiplicative gain in `[0, 1]`, independent of mute/solo
    pub volume: f32,
}

impl StemMix {
    pub fn with_volume(volume: f32) -> Self {
        Self {
            muted: false,
            solo: false,
            volume: volume.clamp(0.0, 1.0),
        }
    }
}

impl Default for StemMix {
    fn default() -> Self {
        Self::with_volume(crate::config::DEFAULT_STEM_VOLUME)
    }
}

/// Master bus settings applied on top of every stem
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MasterBus {
    pub volume: f32,
    pub muted: bool,
}

impl Default for MasterBus {
    fn default() -> Self {
        Self {
            volume: 1.0,
            muted: false,
        }
    }
}

/// Solo is non-exclusive: a stem is audible when it is not muted and either
/// nothing is soloed or it is one of the soloed stems.
pub fn is_audible(mix: &StemMix, any_solo: bool) -> bool {
    !mix.muted && (!any_solo || mix.solo)
}

/// Gain actually sent to the handle
pub fn effective_gain(mix: &StemMix, any_solo: bool, master: &MasterBus) -> f32 {
    if master.muted || !is_audible(mix, any_solo) {
        0.0
    } else {
        mix.volume * master.volume
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mix(muted: bool, solo: bool) -> StemMix {
        StemMix {
            muted,
            solo,
            volume: 1.0,
        }
    }

    #[test]
    fn test_single_solo_silences_others() {
        let stems = [mix(false, false), mix(false, true), mix(false, false)];
        let any_solo = stems.iter().any(|m| m.solo);
        let audible: Vec<bool> = stems.iter().map(|m| is_audible(m, any_solo)).collect();
        assert_eq!(audible, vec![false, true, false]);
    }

    #[test]
    fn test_multiple_solos_are_all_audible() {
        let stems = [mix(false, true), mix(false, true), mix(false, false)];
        let audible: Vec<bool> = stems.iter().map(|m| is_audible(m, true)).collect();
        assert_eq!(audible, vec![true, true, false]);
    }

    #[test]
    fn test_no_solo_means_not_muted() {
        assert!(is_audible(&mix(false, false), false));
        assert!(!is_audible(&mix(true, false), false));
    }

    #[test]
    fn test_mute_wins_over_solo() {
        assert!(!is_audible(&mix(true, true), true));
    }

    #[test]
    fn test_effective_gain_multiplies_master() {
        let stem = StemMix::with_volume(0.5);
        let master = MasterBus {
            volume: 0.8,
            muted: false,
        };
        assert!((effective_gain(&stem, false, &master) - 0.4).abs() < 1e-6);

        let muted_master = MasterBus {
            volume: 0.8,
            muted: true,
        };
        assert_eq!(effective_gain(&stem, false, &muted_master), 0.0);
    }

    #[test]
    fn test_volume_is_clamped() {
        assert_eq!(StemMix::with_volume(1.7).volume, 1.0);
        assert_eq!(StemMix::with_volume(-0.2).volume, 0.0);
    }
}
