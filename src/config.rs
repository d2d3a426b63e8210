//! Pipeline configuration and eager validation

use crate::error::Error;

/// Parameters for one correlation pipeline instance
///
/// All values are fixed for the lifetime of the pipeline: buffers and
/// transform plans are sized from them once at construction. Invalid values
/// fail construction, never a later step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CorrelatorConfig {
    /// Transform size N; must be a power of two
    pub fft_size: usize,
    /// Number of cyclic shifts generated from the reference signal
    pub num_shifts: usize,
    /// Number of input signals correlated per run
    pub num_signals: usize,
    /// Number of correlation output points reported per (signal, shift)
    pub n_kg: usize,
    /// Scale applied during int32 -> float conversion
    pub scale_factor: f32,
    /// Apply a Hamming window to the reference bank
    pub hamming: bool,
}

impl Default for CorrelatorConfig {
    fn default() -> Self {
        Self {
            fft_size: 32768,
            num_shifts: 8,
            num_signals: 4,
            n_kg: 5,
            scale_factor: 1.0 / 32768.0,
            hamming: false,
        }
    }
}

impl CorrelatorConfig {
    /// Validate every parameter
    ///
    /// `n_kg` is capped at `fft_size / 2` because the peak search window
    /// covers only the first half of each correlation window; slots beyond
    /// it would never be written.
    pub fn validate(&self) -> Result<(), Error> {
        if self.fft_size < 2 || !self.fft_size.is_power_of_two() {
            return Err(Error::Config(format!(
                "fft_size must be a power of two >= 2, got {}",
                self.fft_size
            )));
        }
        if self.num_shifts == 0 {
            return Err(Error::Config("num_shifts must be >= 1".into()));
        }
        if self.num_signals == 0 {
            return Err(Error::Config("num_signals must be >= 1".into()));
        }
        if self.n_kg == 0 {
            return Err(Error::Config("n_kg must be >= 1".into()));
        }
        if self.n_kg > self.fft_size / 2 {
            return Err(Error::Config(format!(
                "n_kg ({}) exceeds the peak search range (fft_size / 2 = {})",
                self.n_kg,
                self.fft_size / 2
            )));
        }
        if !(self.scale_factor.is_finite() && self.scale_factor > 0.0) {
            return Err(Error::Config(format!(
                "scale_factor must be finite and > 0, got {}",
                self.scale_factor
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(CorrelatorConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_non_power_of_two_size() {
        let config = CorrelatorConfig {
            fft_size: 1000,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn rejects_zero_counts() {
        for field in 0..3 {
            let mut config = CorrelatorConfig::default();
            match field {
                0 => config.num_shifts = 0,
                1 => config.num_signals = 0,
                _ => config.n_kg = 0,
            }
            assert!(matches!(config.validate(), Err(Error::Config(_))));
        }
    }

    #[test]
    fn rejects_bad_scale() {
        for scale in [0.0f32, -1.0, f32::NAN, f32::INFINITY] {
            let config = CorrelatorConfig {
                scale_factor: scale,
                ..Default::default()
            };
            assert!(matches!(config.validate(), Err(Error::Config(_))));
        }
    }

    #[test]
    fn rejects_oversized_n_kg() {
        let config = CorrelatorConfig {
            fft_size: 16,
            n_kg: 9,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }
}
