//! Rolling PCM window and the named-pipe sample source.

use std::fs::{File, OpenOptions};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

/// Errors raised while opening or reading a sample source
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("input not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("permission denied opening {}", .0.display())]
    PermissionDenied(PathBuf),
    #[error("input stream closed")]
    Closed,
    #[error("input stream ended mid-frame after {read} samples")]
    Truncated { read: usize },
    #[error("input I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("audio device error: {0}")]
    Device(String),
}

/// Something that refills the rolling PCM window once per frame.
///
/// `fill` must return promptly: it consumes whatever is available right now
/// and reports how many (mono) samples were shifted into the window. A short
/// count is not an error.
pub trait SampleSource: Send {
    fn fill(&mut self, window: &mut PcmWindow) -> Result<usize, SourceError>;

    /// Human readable name for logs
    fn name(&self) -> &str;
}

/// Fixed-length window of mono i16 samples, newest at the end
#[derive(Debug, Clone)]
pub struct PcmWindow {
    samples: Vec<i16>,
}

impl PcmWindow {
    pub fn new(n_samples: usize) -> Self {
        Self {
            samples: vec![0; n_samples],
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    /// Shift `incoming` into the tail of the window, dropping the oldest samples
    pub fn push(&mut self, incoming: &[i16]) {
        let n = self.samples.len();
        if incoming.len() >= n {
            self.samples.copy_from_slice(&incoming[incoming.len() - n..]);
            return;
        }
        let k = incoming.len();
        self.samples.copy_within(k.., 0);
        self.samples[n - k..].copy_from_slice(incoming);
    }

    /// Reset to silence
    pub fn clear(&mut self) {
        self.samples.fill(0);
    }
}

/// Decodes little-endian interleaved i16 bytes into mono samples.
///
/// Keeps the bytes of an incomplete frame until the rest arrives.
#[derive(Debug)]
pub(crate) struct FrameDecoder {
    channels: usize,
    pending: Vec<u8>,
}

impl FrameDecoder {
    pub(crate) fn new(channels: u16) -> Self {
        Self {
            channels: channels.max(1) as usize,
            pending: Vec::new(),
        }
    }

    fn frame_bytes(&self) -> usize {
        self.channels * 2
    }

    /// Bytes held back from an incomplete frame
    pub(crate) fn pending(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn discard_pending(&mut self) {
        self.pending.clear();
    }

    /// Decode `bytes`, appending one mono sample per complete frame to `out`
    pub(crate) fn decode(&mut self, bytes: &[u8], out: &mut Vec<i16>) {
        let frame_bytes = self.frame_bytes();
        let mut rest = bytes;

        if !self.pending.is_empty() {
            let need = frame_bytes - self.pending.len();
            let take = need.min(rest.len());
            self.pending.extend_from_slice(&rest[..take]);
            rest = &rest[take..];
            if self.pending.len() < frame_bytes {
                return;
            }
            out.push(downmix_bytes(&self.pending));
            self.pending.clear();
        }

        let mut frames = rest.chunks_exact(frame_bytes);
        out.extend(frames.by_ref().map(downmix_bytes));
        self.pending.extend_from_slice(frames.remainder());
    }
}

fn downmix_bytes(frame: &[u8]) -> i16 {
    let channels = frame.len() / 2;
    let sum: i32 = frame
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]) as i32)
        .sum();
    (sum / channels as i32) as i16
}

/// Average one interleaved frame down to a single sample
pub(crate) fn downmix(frame: &[i16]) -> i16 {
    let sum: i32 = frame.iter().map(|&s| s as i32).sum();
    (sum / frame.len().max(1) as i32) as i16
}

/// Raw PCM read from a named pipe (e.g. mpd's fifo output)
pub struct PipeSource {
    file: File,
    name: String,
    decoder: FrameDecoder,
    scratch: Vec<u8>,
    mono: Vec<i16>,
}

impl PipeSource {
    /// Open a pipe for non-blocking reads
    pub fn open(path: impl AsRef<Path>, channels: u16) -> Result<Self, SourceError> {
        let path = path.as_ref();
        let file = open_nonblocking(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => SourceError::NotFound(path.to_path_buf()),
            io::ErrorKind::PermissionDenied => SourceError::PermissionDenied(path.to_path_buf()),
            _ => SourceError::Io(e),
        })?;

        Ok(Self {
            file,
            name: path.display().to_string(),
            decoder: FrameDecoder::new(channels),
            scratch: vec![0; 16 * 1024],
            mono: Vec::new(),
        })
    }
}

#[cfg(unix)]
fn open_nonblocking(path: &Path) -> io::Result<File> {
    use std::os::unix::fs::OpenOptionsExt;

    // A fifo opened without O_NONBLOCK would block until a writer shows up
    OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_NONBLOCK)
        .open(path)
}

#[cfg(not(unix))]
fn open_nonblocking(path: &Path) -> io::Result<File> {
    OpenOptions::new().read(true).open(path)
}

impl SampleSource for PipeSource {
    fn fill(&mut self, window: &mut PcmWindow) -> Result<usize, SourceError> {
        let mut total = 0;
        let mut eof = false;

        // Drain everything currently buffered so the window tracks the newest audio
        loop {
            match self.file.read(&mut self.scratch) {
                Ok(0) => {
                    eof = true;
                    break;
                }
                Ok(n) => {
                    self.mono.clear();
                    self.decoder.decode(&self.scratch[..n], &mut self.mono);
                    window.push(&self.mono);
                    total += self.mono.len();
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(SourceError::Io(e)),
            }
        }

        if eof {
            if self.decoder.pending() > 0 {
                self.decoder.discard_pending();
                return Err(SourceError::Truncated { read: total });
            }
            if total == 0 {
                return Err(SourceError::Closed);
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
    use std::io::Write;

    fn le_bytes(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    #[test]
    fn test_window_rolls() {
        let mut window = PcmWindow::new(4);
        window.push(&[1, 2]);
        assert_eq!(window.samples(), &[0, 0, 1, 2]);
        window.push(&[3, 4, 5]);
        assert_eq!(window.samples(), &[2, 3, 4, 5]);
        window.push(&[6, 7, 8, 9, 10, 11]);
        assert_eq!(window.samples(), &[8, 9, 10, 11]);
        window.clear();
        assert_eq!(window.samples(), &[0, 0, 0, 0]);
    }

    #[test]
    fn test_decoder_handles_split_frames() {
        let mut decoder = FrameDecoder::new(1);
        let bytes = le_bytes(&[100, -200, 300]);
        let mut out = Vec::new();

        decoder.decode(&bytes[..3], &mut out);
        assert_eq!(out, vec![100]);
        assert_eq!(decoder.pending(), 1);

        decoder.decode(&bytes[3..], &mut out);
        assert_eq!(out, vec![100, -200, 300]);
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn test_decoder_downmixes_stereo() {
        let mut decoder = FrameDecoder::new(2);
        let mut out = Vec::new();
        decoder.decode(&le_bytes(&[100, 300, -50, -150]), &mut out);
        assert_eq!(out, vec![200, -100]);
        assert_eq!(downmix(&[i16::MAX, i16::MAX]), i16::MAX);
    }

    #[test]
    fn test_open_missing_path() {
        let err = PipeSource::open("/definitely/not/here.fifo", 1)
            .err()
            .expect("open should fail");
        assert!(matches!(err, SourceError::NotFound(_)));
    }

    #[test]
    fn test_fill_from_file_then_closed() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&le_bytes(&[1, 2, 3, 4, 5, 6])).unwrap();
        file.flush().unwrap();

        let mut source = PipeSource::open(file.path(), 1).unwrap();
        let mut window = PcmWindow::new(4);

        assert_eq!(source.fill(&mut window).unwrap(), 6);
        assert_eq!(window.samples(), &[3, 4, 5, 6]);
        assert!(matches!(source.fill(&mut window), Err(SourceError::Closed)));
    }

    #[test]
    fn test_fill_reports_truncated_frame() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let mut bytes = le_bytes(&[7, 8]);
        bytes.push(0xff);
        file.write_all(&bytes).unwrap();
        file.flush().unwrap();

        let mut source = PipeSource::open(file.path(), 1).unwrap();
        let mut window = PcmWindow::new(4);

        match source.fill(&mut window) {
            Err(SourceError::Truncated { read }) => assert_eq!(read, 2),
            other => panic!("expected truncation, got {:?}", other),
        }
        assert_eq!(window.samples(), &[0, 0, 7, 8]);
    }
}
