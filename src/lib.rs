//! gravbars - real-time audio spectrum bars with gravity decay
//!
//! Raw PCM from a named pipe (or a capture device) is transformed every frame
//! and drawn as a row of bars that jump up with the signal and fall back under
//! a constant per-frame gravity.

pub mod audio;
pub mod cli;
pub mod frame;
pub mod params;
pub mod rendering;
pub mod spectrum;
