//! Parameter definitions with units and documented semantics.
//!
//! All tuning constants live here with:
//! - Physical units (Hz, milliseconds, clip-space units)
//! - Documented ranges and meanings

mod audio;
mod display;

pub use audio::{AudioConfig, FULL_SCALE_AMPLITUDE};
pub use display::{DisplayConfig, BAR_FLOOR};

/// Configuration validation failure
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Complete visualizer configuration
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VisualizerConfig {
    pub audio: AudioConfig,
    pub display: DisplayConfig,
}

impl VisualizerConfig {
    /// Samples shifted into the rolling window per frame at steady state
    pub fn hop_samples(&self) -> usize {
        (self.audio.sample_rate_hz / self.display.fps.max(1)) as usize
    }

    /// Highest displayed frequency (Hz)
    pub fn fmax_hz(&self) -> f32 {
        self.display.output_size as f32 * self.audio.bin_hz()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.audio.validate()?;
        self.display.validate()?;
        if self.display.output_size > self.audio.spectrum_len() {
            return Err(ConfigError::Invalid(format!(
                "{} bars requested but the FFT only yields {} bins",
                self.display.output_size,
                self.audio.spectrum_len()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = VisualizerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.hop_samples(), 735);
    }

    #[test]
    fn test_too_many_bars() {
        let mut config = VisualizerConfig::default();
        config.audio.fft_size = 4096 * 2;
        config.audio.window_duration_ms = 50;
        config.display.output_size = 5000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_fmax() {
        let config = VisualizerConfig::default();
        // 100 bins * 44100 / 16384 ≈ 269 Hz
        assert!((config.fmax_hz() - 269.165).abs() < 0.01);
    }
}
