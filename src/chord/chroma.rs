//! Spectral frame to 12-bin chromagram

use serde::{Deserialize, Serialize};

use crate::error::{Result, StemsyncError};

/// Lowest frequency folded into the chromagram
pub const MIN_FREQ_HZ: f32 = 80.0;
/// Highest frequency folded into the chromagram
pub const MAX_FREQ_HZ: f32 = 1200.0;

/// One analyser frame as delivered by the audio-analysis collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpectralFrame {
    /// Per-bin magnitudes in dB; bin `i` sits at `i * sample_rate / fft_size`
    pub magnitudes_db: Vec<f32>,
    pub sample_rate: f32,
    pub fft_size: usize,
}

impl SpectralFrame {
    pub fn bin_frequency(&self, bin: usize) -> f32 {
        bin as f32 * self.sample_rate / self.fft_size as f32
    }

    pub fn validate(&self) -> Result<()> {
        if !self.sample_rate.is_finite() || self.sample_rate <= 0.0 {
            return Err(StemsyncError::detection(format!(
                "invalid sample rate {}",
                self.sample_rate
            )));
        }
        if self.fft_size == 0 {
            return Err(StemsyncError::detection("fft size must be non-zero"));
        }
        Ok(())
    }
}

/// Pitch class profile, peak-normalized to `[0, 1]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Chromagram {
    pub bins: [f32; 12],
    /// Sum of linear magnitude before normalization
    pub energy: f32,
}

impl Chromagram {
    /// Accumulate in-band bins by pitch class
    pub fn from_frame(frame: &SpectralFrame) -> Result<Self> {
        frame.validate()?;

        let mut bins = [0.0f32; 12];
        for (i, &db) in frame.magnitudes_db.iter().enumerate() {
            let freq = frame.bin_frequency(i);
            if !(MIN_FREQ_HZ..=MAX_FREQ_HZ).contains(&freq) || !db.is_finite() {
                continue;
            }
            let midi = 12.0 * (freq / 440.0).log2() + 69.0;
            let pitch_class = (midi.round() as i32).rem_euclid(12) as usize;
            bins[pitch_class] += 10f32.powf(db / 20.0);
        }

        Ok(Self::from_bins(bins))
    }

    /// Build from raw (unnormalized) pitch-class energies
    pub fn from_bins(raw: [f32; 12]) -> Self {
        let energy: f32 = raw.iter().sum();
        let peak = raw.iter().cloned().fold(0.0f32, f32::max);
        let bins = if peak > 0.0 {
            raw.map(|v| v / peak)
        } else {
            [0.0; 12]
        };
        Self { bins, energy }
    }

    /// Dominant pitch class, if any energy at all
    pub fn peak(&self) -> Option<usize> {
        self.bins
            .iter()
            .enumerate()
            .filter(|(_, v)| **v > 0.0)
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const SR: f32 = 44_100.0;
    const FFT: usize = 8192;

    fn silent_frame() -> SpectralFrame {
        SpectralFrame {
            magnitudes_db: vec![f32::NEG_INFINITY; FFT / 2],
            sample_rate: SR,
            fft_size: FFT,
        }
    }

    fn set_peak(frame: &mut SpectralFrame, freq: f32, db: f32) {
        let bin = (freq * FFT as f32 / SR).round() as usize;
        frame.magnitudes_db[bin] = db;
    }

    #[test]
    fn test_a440_lands_on_pitch_class_a() {
        let mut frame = silent_frame();
        set_peak(&mut frame, 440.0, 0.0);
        let chroma = Chromagram::from_frame(&frame).unwrap();
        assert_eq!(chroma.peak(), Some(9));
        assert_relative_eq!(chroma.bins[9], 1.0);
        assert_relative_eq!(chroma.energy, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_octaves_fold_together() {
        let mut frame = silent_frame();
        set_peak(&mut frame, 130.81, -6.0);
        set_peak(&mut frame, 261.63, -6.0);
        set_peak(&mut frame, 523.25, -6.0);
        let chroma = Chromagram::from_frame(&frame).unwrap();
        assert_eq!(chroma.peak(), Some(0));
        assert_eq!(chroma.bins.iter().filter(|v| **v > 0.0).count(), 1);
    }

    #[test]
    fn test_out_of_band_energy_ignored() {
        let mut frame = silent_frame();
        set_peak(&mut frame, 55.0, 0.0);
        set_peak(&mut frame, 1760.0, 0.0);
        let chroma = Chromagram::from_frame(&frame).unwrap();
        assert_eq!(chroma.energy, 0.0);
        assert_eq!(chroma.peak(), None);
    }

    #[test]
    fn test_db_to_linear() {
        let mut frame = silent_frame();
        set_peak(&mut frame, 440.0, -20.0);
        let chroma = Chromagram::from_frame(&frame).unwrap();
        assert_relative_eq!(chroma.energy, 0.1, epsilon = 1e-6);
    }

    #[test]
    fn test_invalid_frame() {
        let mut frame = silent_frame();
        frame.fft_size = 0;
        assert!(Chromagram::from_frame(&frame).is_err());
        frame.fft_size = FFT;
        frame.sample_rate = 0.0;
        assert!(Chromagram::from_frame(&frame).is_err());
    }

    #[test]
    fn test_from_bins_peak_normalizes() {
        let chroma = Chromagram::from_bins([2.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.5, 0.0, 0.0, 0.0, 0.0]);
        assert_eq!(chroma.bins[0], 1.0);
        assert_eq!(chroma.bins[4], 0.5);
        assert_eq!(chroma.bins[7], 0.25);
        assert_eq!(chroma.energy, 3.5);
    }
}
