//! Command-line argument parsing.

use std::path::PathBuf;

use clap::Parser;

use crate::params::VisualizerConfig;

/// Command line arguments
#[derive(Parser, Debug)]
#[command(name = "gravbars")]
#[command(about = "Real-time audio spectrum bars with gravity decay", long_about = None)]
pub struct Args {
    /// Named pipe carrying raw little-endian i16 PCM
    #[arg(long, value_name = "PATH", default_value = "/tmp/mpd.fifo")]
    pub fifo: PathBuf,

    /// Capture from an input device instead of the pipe (default device if no name given)
    #[arg(long, value_name = "NAME", num_args = 0..=1, conflicts_with = "fifo")]
    pub device: Option<Option<String>>,

    /// List input devices and exit
    #[arg(long)]
    pub list_devices: bool,

    /// Interleaved channels in the input stream (averaged to mono)
    #[arg(long, value_name = "N", default_value = "1")]
    pub channels: u16,

    /// Input sample rate (Hz)
    #[arg(long, value_name = "HZ", default_value = "44100")]
    pub sample_rate: u32,

    /// Length of the analysed PCM window (milliseconds)
    #[arg(long, value_name = "MS", default_value = "100")]
    pub window_ms: u32,

    /// FFT length, the window is zero-padded to it
    #[arg(long, value_name = "POINTS", default_value = "16384")]
    pub fft_size: usize,

    /// Number of displayed bars (lowest FFT bins)
    #[arg(long, value_name = "N", default_value = "100")]
    pub bins: usize,

    /// Frame rate cap
    #[arg(long, default_value = "60")]
    pub fps: u32,

    /// Per-frame fall of a held bar (clip-space units)
    #[arg(long, default_value = "0.008")]
    pub gravity: f32,

    /// Display slope applied to log10 magnitude
    #[arg(long, default_value = "0.5")]
    pub slope: f32,

    /// Display offset (clip-space y of a full-scale bin)
    #[arg(long, default_value = "1.0", allow_negative_numbers = true)]
    pub offset: f32,

    /// MSAA sample count (1, 2, 4 or 8)
    #[arg(long, value_name = "COUNT", default_value = "4")]
    pub samples: u32,

    /// Window width (pixels)
    #[arg(long, default_value = "1024")]
    pub width: u32,

    /// Window height (pixels)
    #[arg(long, default_value = "768")]
    pub height: u32,

    /// Run this many frames without a window and log the bar heights
    #[arg(long, value_name = "FRAMES")]
    pub headless: Option<u64>,
}

impl Args {
    /// Build the visualizer configuration from the parsed flags
    pub fn to_config(&self) -> VisualizerConfig {
        let mut config = VisualizerConfig::default();

        config.audio.sample_rate_hz = self.sample_rate;
        config.audio.channels = self.channels;
        config.audio.window_duration_ms = self.window_ms;
        config.audio.fft_size = self.fft_size;

        config.display.output_size = self.bins;
        config.display.fps = self.fps;
        config.display.gravity = self.gravity;
        config.display.slope = self.slope;
        config.display.offset = self.offset;
        config.display.aa_samples = self.samples;
        config.display.window_width = self.width;
        config.display.window_height = self.height;

        config
    }

    /// Requested capture device: `Some(None)` means the host default
    pub fn device(&self) -> Option<Option<&str>> {
        self.device.as_ref().map(|name| name.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_config_defaults() {
        let args = Args::parse_from(["gravbars"]);
        assert_eq!(args.fifo, PathBuf::from("/tmp/mpd.fifo"));
        assert!(args.device().is_none());
        assert_eq!(args.to_config(), VisualizerConfig::default());
    }

    #[test]
    fn test_overrides() {
        let args = Args::parse_from([
            "gravbars",
            "--bins",
            "64",
            "--fps",
            "30",
            "--gravity",
            "0.02",
            "--channels",
            "2",
            "--headless",
            "10",
        ]);
        let config = args.to_config();
        assert_eq!(config.display.output_size, 64);
        assert_eq!(config.display.fps, 30);
        assert_eq!(config.display.gravity, 0.02);
        assert_eq!(config.audio.channels, 2);
        assert_eq!(args.headless, Some(10));
    }

    #[test]
    fn test_device_flag() {
        let args = Args::parse_from(["gravbars", "--device"]);
        assert_eq!(args.device(), Some(None));

        let args = Args::parse_from(["gravbars", "--device", "Loopback"]);
        assert_eq!(args.device(), Some(Some("Loopback")));
    }
}
