//! Capture-device sample source backed by cpal.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::mpsc::{self, Receiver, SyncSender, TryRecvError};

use super::source::{downmix, PcmWindow, SampleSource, SourceError};
use crate::params::AudioConfig;

/// Chunks buffered between the audio callback and the reader worker
const CHANNEL_DEPTH: usize = 64;

/// Keeps the cpal input stream alive.
///
/// cpal streams cannot cross threads, so the stream stays with the caller
/// while the `DeviceSource` half moves to the reader worker.
pub struct DeviceStream {
    _stream: cpal::Stream,
}

/// Samples delivered by a capture device callback
pub struct DeviceSource {
    rx: Receiver<Vec<i16>>,
    name: String,
}

/// Names of the available input devices on the default host
pub fn list_devices() -> Result<Vec<String>, SourceError> {
    let host = cpal::default_host();
    let devices = host
        .input_devices()
        .map_err(|e| SourceError::Device(e.to_string()))?;
    Ok(devices.filter_map(|d| d.name().ok()).collect())
}

impl DeviceSource {
    /// Open an input device (`None` = host default) and start capturing
    pub fn open(
        name: Option<&str>,
        audio: &AudioConfig,
    ) -> Result<(DeviceStream, DeviceSource), SourceError> {
        let host = cpal::default_host();
        let device = match name {
            Some(wanted) => host
                .input_devices()
                .map_err(|e| SourceError::Device(e.to_string()))?
                .find(|d| d.name().map(|n| n == wanted).unwrap_or(false))
                .ok_or_else(|| SourceError::NotFound(wanted.into()))?,
            None => host
                .default_input_device()
                .ok_or_else(|| SourceError::Device("no default input device".into()))?,
        };
        let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());

        let supported = device
            .default_input_config()
            .map_err(|e| SourceError::Device(format!("failed to get input config: {}", e)))?;
        let sample_format = supported.sample_format();
        let config: cpal::StreamConfig = supported.into();
        let channels = config.channels as usize;

        if config.sample_rate.0 != audio.sample_rate_hz {
            log::warn!(
                "Device {} runs at {}Hz, frequency axis assumes {}Hz",
                device_name,
                config.sample_rate.0,
                audio.sample_rate_hz
            );
        }
        log::info!(
            "Audio: {} @ {}Hz, {} channel(s), {:?}",
            device_name,
            config.sample_rate.0,
            channels,
            sample_format
        );

        let (tx, rx) = mpsc::sync_channel(CHANNEL_DEPTH);
        let err_fn = |err: cpal::StreamError| log::error!("Audio stream error: {}", err);

        let stream = match sample_format {
            cpal::SampleFormat::I16 => device.build_input_stream(
                &config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    forward(&tx, data.chunks(channels).map(downmix).collect());
                },
                err_fn,
                None,
            ),
            cpal::SampleFormat::F32 => device.build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let mono = data
                        .chunks(channels)
                        .map(|frame| {
                            let avg = frame.iter().sum::<f32>() / frame.len() as f32;
                            (avg.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
                        })
                        .collect();
                    forward(&tx, mono);
                },
                err_fn,
                None,
            ),
            other => {
                return Err(SourceError::Device(format!(
                    "unsupported sample format {:?}",
                    other
                )))
            }
        }
        .map_err(|e| SourceError::Device(format!("failed to build input stream: {}", e)))?;

        stream
            .play()
            .map_err(|e| SourceError::Device(format!("failed to start input stream: {}", e)))?;

        Ok((
            DeviceStream { _stream: stream },
            DeviceSource {
                rx,
                name: device_name,
            },
        ))
    }

    #[cfg(test)]
    fn from_receiver(rx: Receiver<Vec<i16>>) -> Self {
        Self {
            rx,
            name: "test".into(),
        }
    }
}

/// Hand a chunk to the reader, dropping it if the reader fell behind
fn forward(tx: &SyncSender<Vec<i16>>, chunk: Vec<i16>) {
    let _ = tx.try_send(chunk);
}

impl SampleSource for DeviceSource {
    fn fill(&mut self, window: &mut PcmWindow) -> Result<usize, SourceError> {
        let mut total = 0;
        loop {
            match self.rx.try_recv() {
                Ok(chunk) => {
                    window.push(&chunk);
                    total += chunk.len();
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) if total == 0 => return Err(SourceError::Closed),
                Err(TryRecvError::Disconnected) => break,
            }
        }
        Ok(total)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_drains_pending_chunks() {
        let (tx, rx) = mpsc::sync_channel(4);
        let mut source = DeviceSource::from_receiver(rx);
        let mut window = PcmWindow::new(3);

        tx.send(vec![1, 2]).unwrap();
        tx.send(vec![3, 4]).unwrap();
        assert_eq!(source.fill(&mut window).unwrap(), 4);
        assert_eq!(window.samples(), &[2, 3, 4]);

        // Nothing new yet: a short read, not an error
        assert_eq!(source.fill(&mut window).unwrap(), 0);

        drop(tx);
        assert!(matches!(source.fill(&mut window), Err(SourceError::Closed)));
    }
}
