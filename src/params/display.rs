//! Display, decay and window configuration.

use std::time::Duration;

use super::ConfigError;

/// Bottom edge of the bar area in clip space
pub const BAR_FLOOR: f32 = -1.0;

/// Bar display configuration
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayConfig {
    /// Number of displayed bars (lowest FFT bins)
    pub output_size: usize,

    /// Frame rate cap (frames per second)
    pub fps: u32,

    /// Per-frame fall of a held bar (clip-space units)
    /// 0.008 @ 60fps = full height in ~4s
    pub gravity: f32,

    /// Display slope applied to log10 magnitude
    /// 0.5 = 10dB per quarter screen unit
    pub slope: f32,

    /// Display offset (clip-space y of a full-scale bin)
    pub offset: f32,

    /// Bar gradient color at the top (RGBA)
    pub top_color: [f32; 4],

    /// Bar gradient color at the bottom (RGBA)
    pub bot_color: [f32; 4],

    /// Gridline color (RGBA)
    pub line_color: [f32; 4],

    /// MSAA sample count (1 disables anti-aliasing; 2 and 8 depend on the adapter)
    pub aa_samples: u32,

    /// Window width (pixels)
    pub window_width: u32,

    /// Window height (pixels)
    pub window_height: u32,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            output_size: 100,
            fps: 60,
            gravity: 0.008,
            slope: 0.5,
            offset: 1.0,
            top_color: [0.827 / 2.0, 0.149 / 2.0, 0.008 / 2.0, 1.0],
            bot_color: [0.275 / 2.0, 0.282 / 2.0, 0.294 / 2.0, 1.0],
            line_color: [0.275, 0.282, 0.294, 1.0],
            aa_samples: 4,
            window_width: 1024,
            window_height: 768,
        }
    }
}

impl DisplayConfig {
    /// Duration of one paced frame
    pub fn frame_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.fps as f64)
    }

    /// Full width of one bar (clip-space units)
    pub fn bar_width(&self) -> f32 {
        1.5 / self.output_size as f32
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.output_size == 0 {
            return Err(ConfigError::Invalid("at least one bar is required".into()));
        }
        if self.fps == 0 {
            return Err(ConfigError::Invalid("fps must be > 0".into()));
        }
        if !(self.gravity >= 0.0) {
            return Err(ConfigError::Invalid(format!(
                "gravity must be >= 0, got {}",
                self.gravity
            )));
        }
        if !matches!(self.aa_samples, 1 | 2 | 4 | 8) {
            return Err(ConfigError::Invalid(format!(
                "unsupported MSAA sample count {}",
                self.aa_samples
            )));
        }
        Ok(())
    }
}
