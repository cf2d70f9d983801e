//! PCM capture and FFT analysis.
//!
//! Sources fill a rolling PCM window; the transform turns it into complex
//! bins for the bar display.

mod device;
mod fft;
mod source;

// Re-export public types
pub use device::{list_devices, DeviceSource, DeviceStream};
pub use fft::SpectrumTransform;
pub use source::{PcmWindow, PipeSource, SampleSource, SourceError};
