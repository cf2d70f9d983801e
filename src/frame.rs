//! Frame loop: paced refill, decay update and draw.
//!
//! Each cycle hands one job to each of two persistent workers, the pacer
//! (sleeps until the frame deadline) and the reader (refills the PCM window
//! and transforms it), then draws on the calling thread and joins both
//! workers before the next cycle starts. The reader owns the source, the
//! window and the transform; the control thread only ever sees the spectrum
//! snapshot it hands back at the join.

use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::audio::{PcmWindow, SampleSource, SourceError, SpectrumTransform};
use crate::params::{ConfigError, VisualizerConfig};
use crate::rendering::{
    BufferId, Primitive, RenderError, RenderSurface, UniformValue, VERTEX_STRIDE,
};
use crate::spectrum::{
    bin_positions, gridlines, projection, BinDecayState, GRIDLINE_VERTICES,
};

/// Errors that stop the frame loop
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("{0} worker stopped unexpectedly")]
    WorkerGone(&'static str),
    #[error("failed to spawn {name} worker: {source}")]
    Spawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Persistent thread that runs one job at a time
struct Worker<J, R> {
    name: &'static str,
    jobs: Option<Sender<J>>,
    results: Receiver<R>,
    handle: Option<JoinHandle<()>>,
}

impl<J: Send + 'static, R: Send + 'static> Worker<J, R> {
    fn spawn<F>(name: &'static str, mut work: F) -> Result<Self, FrameError>
    where
        F: FnMut(J) -> R + Send + 'static,
    {
        let (job_tx, job_rx) = mpsc::channel::<J>();
        let (result_tx, result_rx) = mpsc::channel::<R>();

        let handle = thread::Builder::new()
            .name(format!("gravbars-{}", name))
            .spawn(move || {
                for job in job_rx {
                    if result_tx.send(work(job)).is_err() {
                        break;
                    }
                }
            })
            .map_err(|source| FrameError::Spawn { name, source })?;

        Ok(Self {
            name,
            jobs: Some(job_tx),
            results: result_rx,
            handle: Some(handle),
        })
    }

    fn submit(&self, job: J) -> Result<(), FrameError> {
        self.jobs
            .as_ref()
            .ok_or(FrameError::WorkerGone(self.name))?
            .send(job)
            .map_err(|_| FrameError::WorkerGone(self.name))
    }

    /// Wait for the result of the last submitted job
    fn join(&self) -> Result<R, FrameError> {
        self.results
            .recv()
            .map_err(|_| FrameError::WorkerGone(self.name))
    }
}

impl<J, R> Drop for Worker<J, R> {
    fn drop(&mut self) {
        // Closing the job channel ends the worker's loop
        self.jobs.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("{} worker panicked", self.name);
            }
        }
    }
}

/// What the reader hands back at the join
struct Refill {
    spectrum: Vec<[f32; 2]>,
    outcome: Result<usize, SourceError>,
    started: Instant,
    finished: Instant,
}

/// State owned by the reader worker
struct Reader {
    source: Box<dyn SampleSource>,
    window: PcmWindow,
    transform: SpectrumTransform,
    bins: usize,
}

impl Reader {
    fn refill(&mut self, mut spectrum: Vec<[f32; 2]>) -> Refill {
        let started = Instant::now();
        let outcome = self.source.fill(&mut self.window);
        if matches!(outcome, Err(SourceError::Closed)) {
            self.window.clear();
        }

        let output = self.transform.compute(&self.window);
        spectrum.clear();
        spectrum.extend(output.iter().take(self.bins).map(|c| [c.re, c.im]));

        Refill {
            spectrum,
            outcome,
            started,
            finished: Instant::now(),
        }
    }
}

/// Steady states of one cycle, after both workers have their jobs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramePhase {
    /// Issuing draw calls and presenting while the workers run
    Drawing,
    /// Drawn; waiting on the frame deadline and the refill
    Pacing,
}

/// Input health, tracked so transitions are logged once
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SourceState {
    Live,
    Closed,
    Failed,
}

/// Timing and input summary of one completed frame
#[derive(Debug, Clone, Copy)]
pub struct FrameStats {
    pub frame: u64,
    pub samples_read: usize,
    pub refill_started: Instant,
    pub refill_finished: Instant,
    pub draw_time: Duration,
    pub wait_time: Duration,
    /// Wall time of the whole cycle, pacing included
    pub elapsed: Duration,
}

impl FrameStats {
    /// Time the cycle spent in `phase`
    pub fn time_in(&self, phase: FramePhase) -> Duration {
        match phase {
            FramePhase::Drawing => self.draw_time,
            FramePhase::Pacing => self.wait_time,
        }
    }
}

/// Frame rate counted over fixed reporting intervals
pub struct FpsTracker {
    report_every: Duration,
    window_start: Instant,
    frames_in_window: u32,
    last_fps: Option<f32>,
}

impl FpsTracker {
    pub fn new(report_every: Duration) -> Self {
        Self::starting_at(Instant::now(), report_every)
    }

    fn starting_at(start: Instant, report_every: Duration) -> Self {
        Self {
            report_every,
            window_start: start,
            frames_in_window: 0,
            last_fps: None,
        }
    }

    pub fn record_frame(&mut self) {
        if let Some(fps) = self.record_at(Instant::now()) {
            log::debug!("{:.1} fps", fps);
        }
    }

    /// Count a frame finished at `now`; returns the rate when an interval closes
    fn record_at(&mut self, now: Instant) -> Option<f32> {
        self.frames_in_window += 1;
        let span = now.saturating_duration_since(self.window_start);
        if span < self.report_every {
            return None;
        }
        let fps = self.frames_in_window as f32 / span.as_secs_f32();
        self.window_start = now;
        self.frames_in_window = 0;
        self.last_fps = Some(fps);
        Some(fps)
    }

    /// Rate over the last closed interval
    pub fn current_fps(&self) -> Option<f32> {
        self.last_fps
    }
}

/// Drives the visualizer one frame at a time against a `RenderSurface`
pub struct FrameLoop {
    config: VisualizerConfig,
    source_name: String,
    pacer: Worker<Instant, ()>,
    reader: Worker<Vec<[f32; 2]>, Refill>,
    decay: BinDecayState,
    /// Spectrum drawn this frame (from the previous refill)
    spectrum: Vec<[f32; 2]>,
    /// Buffer lent to the reader for the next refill
    spare: Vec<[f32; 2]>,
    source_state: SourceState,
    frames: u64,
    fps: FpsTracker,
}

impl FrameLoop {
    pub fn new(
        config: &VisualizerConfig,
        source: Box<dyn SampleSource>,
    ) -> Result<Self, FrameError> {
        config.validate()?;
        let bins = config.display.output_size;
        let source_name = source.name().to_string();

        let mut reader = Reader {
            source,
            window: PcmWindow::new(config.audio.n_samples()),
            transform: SpectrumTransform::configure(config.audio.fft_size),
            bins,
        };
        let reader = Worker::spawn("reader", move |spectrum| reader.refill(spectrum))?;
        let pacer = Worker::spawn("pacer", |deadline: Instant| {
            let now = Instant::now();
            if deadline > now {
                thread::sleep(deadline - now);
            }
        })?;

        log::info!(
            "Frame loop: {} bars at {} fps, {} sample window, hop {}, {}-point FFT, input {}",
            bins,
            config.display.fps,
            config.audio.n_samples(),
            config.hop_samples(),
            config.audio.fft_size,
            source_name
        );

        Ok(Self {
            config: config.clone(),
            source_name,
            pacer,
            reader,
            decay: BinDecayState::new(config),
            spectrum: vec![[0.0; 2]; bins],
            spare: Vec::with_capacity(bins),
            source_state: SourceState::Live,
            frames: 0,
            fps: FpsTracker::new(Duration::from_secs(1)),
        })
    }

    /// Upload static geometry, zero the decay state and set every uniform
    pub fn init<S: RenderSurface>(&self, surface: &mut S) -> Result<(), FrameError> {
        let display = &self.config.display;
        let xs = bin_positions(display.output_size);

        surface.upload_static(BufferId::BinX, bytemuck::cast_slice(&xs))?;
        surface.upload_static(BufferId::Gridlines, bytemuck::cast_slice(&gridlines()))?;
        self.decay.zero_fill(surface, &xs)?;

        let scalars = [
            ("fft_scale", self.config.audio.fft_scale()),
            ("slope", display.slope),
            ("offset", display.offset),
            ("width", display.bar_width()),
            ("gravity", display.gravity),
        ];
        for (name, value) in scalars {
            surface.upload_uniform(name, UniformValue::Scalar(value))?;
        }
        surface.upload_uniform("top_color", UniformValue::Vec4(display.top_color))?;
        surface.upload_uniform("bot_color", UniformValue::Vec4(display.bot_color))?;
        surface.upload_uniform("line_color", UniformValue::Vec4(display.line_color))?;
        surface.upload_uniform("trans", UniformValue::Mat4(projection()))?;
        Ok(())
    }

    /// Run one full cycle; both workers are joined before this returns
    pub fn run_frame<S: RenderSurface>(
        &mut self,
        surface: &mut S,
    ) -> Result<FrameStats, FrameError> {
        let started = Instant::now();
        self.pacer.submit(started + self.config.display.frame_period())?;
        let spare = std::mem::take(&mut self.spare);
        if let Err(e) = self.reader.submit(spare) {
            let _ = self.pacer.join();
            return Err(e);
        }

        log::trace!("frame {}: {:?}", self.frames + 1, FramePhase::Drawing);
        let drawn = self.draw(surface);
        let drawn_at = Instant::now();

        log::trace!("frame {}: {:?}", self.frames + 1, FramePhase::Pacing);
        let paced = self.pacer.join();
        let refilled = self.reader.join();
        let wait_time = drawn_at.elapsed();

        paced?;
        let refill = refilled?;
        let samples_read = self.note_outcome(&refill.outcome);
        self.spare = std::mem::replace(&mut self.spectrum, refill.spectrum);
        drawn?;

        self.frames += 1;
        self.fps.record_frame();

        log::trace!(
            "frame {}: {} samples refilled in {:?}",
            self.frames,
            samples_read,
            refill.finished - refill.started
        );

        Ok(FrameStats {
            frame: self.frames,
            samples_read,
            refill_started: refill.started,
            refill_finished: refill.finished,
            draw_time: drawn_at - started,
            wait_time,
            elapsed: started.elapsed(),
        })
    }

    /// Run frames until `should_close` returns true; returns the frame count
    pub fn run<S, F>(&mut self, surface: &mut S, mut should_close: F) -> Result<u64, FrameError>
    where
        S: RenderSurface,
        F: FnMut() -> bool,
    {
        while !should_close() {
            self.run_frame(surface)?;
        }
        Ok(self.frames)
    }

    /// Release every surface resource
    pub fn shutdown<S: RenderSurface>(&mut self, surface: &mut S) {
        surface.release();
        log::info!("Frame loop stopped after {} frames", self.frames);
    }

    fn draw<S: RenderSurface>(&mut self, surface: &mut S) -> Result<(), RenderError> {
        surface.upload_dynamic(BufferId::Spectrum, bytemuck::cast_slice(&self.spectrum))?;
        self.decay.update(surface)?;

        surface.bind_as_vertex_input(BufferId::Gridlines, VERTEX_STRIDE, &["pos"])?;
        surface.draw(Primitive::Lines, GRIDLINE_VERTICES)?;
        self.decay.draw_bars(surface)?;

        surface.present()
    }

    /// Log source transitions and return the samples read this frame
    fn note_outcome(&mut self, outcome: &Result<usize, SourceError>) -> usize {
        let (state, read) = match outcome {
            Ok(n) => (SourceState::Live, *n),
            Err(SourceError::Truncated { read }) => {
                log::debug!(
                    "{}: stream ended mid-frame, dropped partial sample",
                    self.source_name
                );
                (SourceState::Live, *read)
            }
            Err(SourceError::Closed) => (SourceState::Closed, 0),
            Err(e) => {
                if self.source_state != SourceState::Failed {
                    log::warn!("{}: {}", self.source_name, e);
                }
                (SourceState::Failed, 0)
            }
        };

        if state != self.source_state {
            match state {
                SourceState::Closed => {
                    log::warn!("{}: writer closed, rendering silence", self.source_name)
                }
                SourceState::Live if read > 0 => {
                    log::info!("{}: input resumed", self.source_name)
                }
                _ => {}
            }
            // Stay in the old state until samples actually arrive
            if state != SourceState::Live || read > 0 {
                self.source_state = state;
            }
        }
        read
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn decay(&self) -> &BinDecayState {
        &self.decay
    }

    /// Spectrum the next frame will draw
    pub fn spectrum(&self) -> &[[f32; 2]] {
        &self.spectrum
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    pub fn config(&self) -> &VisualizerConfig {
        &self.config
    }

    pub fn current_fps(&self) -> Option<f32> {
        self.fps.current_fps()
    }
}
