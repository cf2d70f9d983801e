//! Audio capture and FFT analysis configuration.

use super::ConfigError;

/// Full-scale amplitude of a signed 16-bit sample
pub const FULL_SCALE_AMPLITUDE: f32 = 32768.0;

/// PCM capture and FFT configuration
#[derive(Debug, Clone, PartialEq)]
pub struct AudioConfig {
    /// Input sample rate (Hz)
    /// mpd fifo default: 44100
    pub sample_rate_hz: u32,

    /// Interleaved channels in the input stream (downmixed to mono)
    pub channels: u16,

    /// Length of the rolling PCM window (milliseconds)
    /// 100ms = 4410 samples @ 44.1kHz
    pub window_duration_ms: u32,

    /// FFT length (must be a power of 2, >= window length; the window is zero-padded)
    /// 2^14 = 2.7Hz bin resolution @ 44.1kHz
    pub fft_size: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: 44100,
            channels: 1,
            window_duration_ms: 100,
            fft_size: 1 << 14,
        }
    }
}

impl AudioConfig {
    /// Samples held by the PCM window
    pub fn n_samples(&self) -> usize {
        self.sample_rate_hz as usize * self.window_duration_ms as usize / 1000
    }

    /// Number of complex bins produced by a real-input FFT
    pub fn spectrum_len(&self) -> usize {
        self.fft_size / 2 + 1
    }

    /// Width of one FFT bin (Hz)
    pub fn bin_hz(&self) -> f32 {
        self.sample_rate_hz as f32 / self.fft_size as f32
    }

    /// Normalization applied to raw FFT magnitudes so a full-scale sine maps to ~1.0
    pub fn fft_scale(&self) -> f32 {
        1.0 / ((self.n_samples() / 2 + 1) as f32 * FULL_SCALE_AMPLITUDE)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_rate_hz == 0 {
            return Err(ConfigError::Invalid("sample rate must be > 0".into()));
        }
        if self.channels == 0 {
            return Err(ConfigError::Invalid("channel count must be > 0".into()));
        }
        if !self.fft_size.is_power_of_two() {
            return Err(ConfigError::Invalid(format!(
                "FFT size must be power of 2, got {}",
                self.fft_size
            )));
        }
        if self.n_samples() == 0 {
            return Err(ConfigError::Invalid(format!(
                "window of {}ms holds no samples",
                self.window_duration_ms
            )));
        }
        if self.n_samples() > self.fft_size {
            return Err(ConfigError::Invalid(format!(
                "window of {} samples does not fit FFT size {}",
                self.n_samples(),
                self.fft_size
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_window_length() {
        let config = AudioConfig::default();
        assert_eq!(config.n_samples(), 4410);
        assert_eq!(config.spectrum_len(), 8193);
    }

    #[test]
    fn test_fft_scale_round_trip() {
        let config = AudioConfig::default();
        let unity = config.fft_scale()
            * FULL_SCALE_AMPLITUDE
            * (config.n_samples() / 2 + 1) as f32;
        assert!((unity - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_validate_rejects_bad_fft_size() {
        let config = AudioConfig {
            fft_size: 10000,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = AudioConfig {
            fft_size: 1024, // smaller than the 4410-sample window
            ..Default::default()
        };
        assert!(config.validate().is_err());
        assert!(AudioConfig::default().validate().is_ok());
    }
}
