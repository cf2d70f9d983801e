//! Forward FFT over the PCM window.

use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::sync::Arc;

use super::source::PcmWindow;

/// Forward real-input FFT with a fixed length.
///
/// No window function and no normalization are applied; callers scale the
/// magnitudes with `AudioConfig::fft_scale`.
pub struct SpectrumTransform {
    fft: Arc<dyn Fft<f32>>,
    buffer: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
    output: Vec<Complex<f32>>,
}

impl SpectrumTransform {
    /// Plan a transform of `window_size` points (PCM shorter than this is zero-padded)
    pub fn configure(window_size: usize) -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(window_size);
        let scratch = vec![Complex::new(0.0, 0.0); fft.get_inplace_scratch_len()];

        Self {
            fft,
            buffer: vec![Complex::new(0.0, 0.0); window_size],
            scratch,
            output: vec![Complex::new(0.0, 0.0); window_size / 2 + 1],
        }
    }

    pub fn window_size(&self) -> usize {
        self.buffer.len()
    }

    /// Transform `pcm`, overwriting the previous output
    pub fn compute(&mut self, pcm: &PcmWindow) -> &[Complex<f32>] {
        let samples = pcm.samples();
        let n = samples.len().min(self.buffer.len());

        for (slot, &s) in self.buffer.iter_mut().zip(&samples[..n]) {
            *slot = Complex::new(s as f32, 0.0);
        }
        self.buffer[n..].fill(Complex::new(0.0, 0.0));

        self.fft.process_with_scratch(&mut self.buffer, &mut self.scratch);

        let bins = self.output.len();
        self.output.copy_from_slice(&self.buffer[..bins]);
        &self.output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    #[test]
    fn test_output_length() {
        let mut transform = SpectrumTransform::configure(1024);
        assert_eq!(transform.compute(&PcmWindow::new(1024)).len(), 513);
        assert_eq!(transform.window_size(), 1024);
    }

    #[test]
    fn test_sine_peaks_at_its_bin() {
        let size = 1024;
        let bin = 32;
        let mut transform = SpectrumTransform::configure(size);
        let mut pcm = PcmWindow::new(size);
        let samples: Vec<i16> = (0..size)
            .map(|i| ((2.0 * PI * bin as f32 * i as f32 / size as f32).sin() * 16000.0) as i16)
            .collect();
        pcm.push(&samples);

        let output = transform.compute(&pcm);
        let peak = output
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.norm().total_cmp(&b.1.norm()))
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(peak, bin);

        // Un-normalized: amplitude * N / 2
        let expected = 16000.0 * size as f32 / 2.0;
        assert!((output[bin].norm() - expected).abs() / expected < 0.01);
    }

    #[test]
    fn test_short_window_is_zero_padded() {
        let mut transform = SpectrumTransform::configure(64);
        let mut pcm = PcmWindow::new(16);
        pcm.push(&[1000; 16]);

        // DC bin is the plain sum of the samples
        let dc = transform.compute(&pcm)[0];
        assert!((dc.re - 16000.0).abs() < 1e-3);
        assert!(dc.im.abs() < 1e-3);
    }

    #[test]
    fn test_silence() {
        let mut transform = SpectrumTransform::configure(256);
        let pcm = PcmWindow::new(200);
        assert!(transform.compute(&pcm).iter().all(|c| c.norm() == 0.0));
    }
}
