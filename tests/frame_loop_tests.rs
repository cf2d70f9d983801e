//! Frame loop behaviour against the headless surface.

use std::collections::VecDeque;
use std::io::Write;
use std::thread;
use std::time::{Duration, Instant};

use gravbars::audio::{PcmWindow, PipeSource, SampleSource, SourceError};
use gravbars::frame::{FrameLoop, FramePhase, FrameStats};
use gravbars::params::VisualizerConfig;
use gravbars::rendering::{BufferId, CpuSurface, Primitive};
use gravbars::spectrum::{bin_positions, projection, GRIDLINE_VERTICES};

/// Small FFT so debug builds stay well inside a 10ms frame
fn test_config() -> VisualizerConfig {
    let mut config = VisualizerConfig::default();
    config.audio.window_duration_ms = 20;
    config.audio.fft_size = 2048;
    config.display.fps = 100;
    config.display.gravity = 0.01;
    config
}

fn sine(freq_hz: f32, amplitude: f32, n: usize, sample_rate: u32) -> Vec<i16> {
    (0..n)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            (amplitude * (2.0 * std::f32::consts::PI * freq_hz * t).sin()) as i16
        })
        .collect()
}

/// Plays back one chunk per fill, then reports nothing new
struct ScriptedSource {
    chunks: VecDeque<Vec<i16>>,
}

impl ScriptedSource {
    fn new(chunks: Vec<Vec<i16>>) -> Self {
        Self {
            chunks: chunks.into(),
        }
    }
}

impl SampleSource for ScriptedSource {
    fn fill(&mut self, window: &mut PcmWindow) -> Result<usize, SourceError> {
        match self.chunks.pop_front() {
            Some(chunk) => {
                window.push(&chunk);
                Ok(chunk.len())
            }
            None => Ok(0),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Takes a while to fill, never delivers samples
struct SlowSource {
    delay: Duration,
}

impl SampleSource for SlowSource {
    fn fill(&mut self, _window: &mut PcmWindow) -> Result<usize, SourceError> {
        thread::sleep(self.delay);
        Ok(0)
    }

    fn name(&self) -> &str {
        "slow"
    }
}

/// Writer already gone
struct ClosedSource;

impl SampleSource for ClosedSource {
    fn fill(&mut self, _window: &mut PcmWindow) -> Result<usize, SourceError> {
        Err(SourceError::Closed)
    }

    fn name(&self) -> &str {
        "closed"
    }
}

fn start(config: &VisualizerConfig, source: Box<dyn SampleSource>) -> (FrameLoop, CpuSurface) {
    let frame_loop = FrameLoop::new(config, source).unwrap();
    let mut surface = CpuSurface::new(config.display.output_size);
    frame_loop.init(&mut surface).unwrap();
    (frame_loop, surface)
}

fn run_frames(frame_loop: &mut FrameLoop, surface: &mut CpuSurface, n: usize) -> Vec<FrameStats> {
    (0..n).map(|_| frame_loop.run_frame(surface).unwrap()).collect()
}

fn max_held(frame_loop: &FrameLoop, surface: &CpuSurface) -> (usize, f32) {
    surface
        .held(frame_loop.decay().roles().active)
        .into_iter()
        .enumerate()
        .fold((0, f32::MIN), |best, (i, h)| if h > best.1 { (i, h) } else { best })
}

#[test]
fn test_init_uploads_static_state() {
    let config = test_config();
    let (_frame_loop, surface) = start(&config, Box::new(ScriptedSource::new(vec![])));

    assert_eq!(surface.bin_x(), bin_positions(100).as_slice());
    assert_eq!(surface.gridlines().len(), GRIDLINE_VERTICES as usize);
    assert_eq!(surface.held(BufferId::DecayA), vec![0.0; 100]);
    assert_eq!(surface.held(BufferId::DecayB), vec![0.0; 100]);

    let uniforms = surface.uniforms();
    assert_eq!(uniforms.bars.trans, projection().to_cols_array_2d());
    assert_eq!(uniforms.decay.gravity, 0.01);
    assert_eq!(uniforms.decay.fft_scale, config.audio.fft_scale());
    assert!((uniforms.decay.width - 0.015).abs() < 1e-7);
}

#[test]
fn test_pacing_matches_fps() {
    let config = test_config();
    let (mut frame_loop, mut surface) = start(&config, Box::new(ScriptedSource::new(vec![])));
    let period = config.display.frame_period();

    let started = Instant::now();
    let stats = run_frames(&mut frame_loop, &mut surface, 100);
    let elapsed = started.elapsed().as_secs_f64();

    // Never faster than the cap
    assert!(stats.iter().all(|s| s.elapsed >= period));
    assert!(elapsed >= 0.99, "100 frames took {:.3}s", elapsed);
    assert!(elapsed <= 1.1, "100 frames took {:.3}s", elapsed);
}

#[test]
fn test_refills_never_overlap() {
    let config = test_config();
    let source = SlowSource {
        delay: Duration::from_millis(4),
    };
    let (mut frame_loop, mut surface) = start(&config, Box::new(source));

    let stats = run_frames(&mut frame_loop, &mut surface, 20);
    for pair in stats.windows(2) {
        assert!(pair[1].refill_started >= pair[0].refill_finished);
    }
}

#[test]
fn test_fast_frame_spends_its_slack_pacing() {
    let config = test_config();
    let (mut frame_loop, mut surface) = start(&config, Box::new(ScriptedSource::new(vec![])));
    let period = config.display.frame_period();

    for stats in run_frames(&mut frame_loop, &mut surface, 5) {
        let drawing = stats.time_in(FramePhase::Drawing);
        let pacing = stats.time_in(FramePhase::Pacing);
        assert!(drawing + pacing <= stats.elapsed);
        // Headless drawing is far quicker than one 10ms period
        assert!(pacing >= period / 2, "paced for {:?}", pacing);
    }
}

#[test]
fn test_slow_refill_stretches_frame() {
    let mut config = test_config();
    config.display.fps = 200;
    let source = SlowSource {
        delay: Duration::from_millis(15),
    };
    let (mut frame_loop, mut surface) = start(&config, Box::new(source));

    for stats in run_frames(&mut frame_loop, &mut surface, 3) {
        assert!(stats.elapsed >= Duration::from_millis(15));
        // The refill outlasts the 5ms deadline, so the wait is on the reader
        assert!(stats.time_in(FramePhase::Pacing) >= Duration::from_millis(10));
    }
}

#[test]
fn test_draw_order_and_bin_count() {
    let config = test_config();
    let chunks = vec![sine(440.0, 8000.0, 882, 44100); 5];
    let (mut frame_loop, mut surface) = start(&config, Box::new(ScriptedSource::new(chunks)));

    for _ in 0..5 {
        frame_loop.run_frame(&mut surface).unwrap();
        assert_eq!(frame_loop.spectrum().len(), 100);

        let frame = surface.last_frame();
        let primitives: Vec<Primitive> = frame.iter().map(|d| d.primitive).collect();
        assert_eq!(
            primitives,
            vec![Primitive::Points, Primitive::Lines, Primitive::Triangles]
        );
        assert_eq!(frame[0].count, 100);
        assert_eq!(frame[1].count, GRIDLINE_VERTICES);
        assert_eq!(frame[2].count, 600);

        // The bars read the buffer the update just wrote
        assert_eq!(frame[2].vertex_input, frame[0].capture_target);
        assert_eq!(frame[2].vertex_input, Some(frame_loop.decay().roles().active));
    }
    assert_eq!(surface.frames_presented(), 5);
}

#[test]
fn test_roles_swap_every_frame() {
    let config = test_config();
    let (mut frame_loop, mut surface) = start(&config, Box::new(ScriptedSource::new(vec![])));

    let mut previous = frame_loop.decay().roles();
    for frame in 1..=4u64 {
        frame_loop.run_frame(&mut surface).unwrap();
        let roles = frame_loop.decay().roles();
        assert_eq!(roles.active, previous.inactive);
        assert_eq!(roles.inactive, previous.active);
        assert_eq!(frame_loop.decay().updates(), frame);
        previous = roles;
    }
}

#[test]
fn test_bars_rise_then_fall_by_gravity() {
    let config = test_config();
    let n = config.audio.n_samples();
    let chunks = vec![sine(440.0, 16000.0, n, 44100), vec![0; n]];
    let (mut frame_loop, mut surface) = start(&config, Box::new(ScriptedSource::new(chunks)));

    // Frame 1 draws the initial silence while the sine is read
    frame_loop.run_frame(&mut surface).unwrap();
    assert_eq!(max_held(&frame_loop, &surface).1, 0.0);

    // Frame 2 draws the sine
    frame_loop.run_frame(&mut surface).unwrap();
    let (peak_bin, peak) = max_held(&frame_loop, &surface);
    let expected_bin = (440.0 / config.audio.bin_hz()).round() as usize;
    assert!(peak_bin.abs_diff(expected_bin) <= 1, "peak at bin {}", peak_bin);
    assert!(peak > 1.5, "peak height {}", peak);

    // Silence from here on: the peak falls by gravity each frame
    run_frames(&mut frame_loop, &mut surface, 3);
    let held = surface.held(frame_loop.decay().roles().active);
    assert!((held[peak_bin] - (peak - 3.0 * 0.01)).abs() < 1e-4);
}

#[test]
fn test_closed_source_renders_silence() {
    let config = test_config();
    let (mut frame_loop, mut surface) = start(&config, Box::new(ClosedSource));

    for stats in run_frames(&mut frame_loop, &mut surface, 5) {
        assert_eq!(stats.samples_read, 0);
    }
    assert!(frame_loop.spectrum().iter().all(|c| *c == [0.0, 0.0]));
    assert_eq!(max_held(&frame_loop, &surface).1, 0.0);
    assert_eq!(frame_loop.frames(), 5);
}

#[test]
fn test_pipe_source_end_to_end() {
    let config = test_config();
    let samples = sine(1000.0, 12000.0, 882, 44100);
    let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&bytes).unwrap();
    file.flush().unwrap();

    let source = PipeSource::open(file.path(), 1).unwrap();
    let (mut frame_loop, mut surface) = start(&config, Box::new(source));

    let stats = run_frames(&mut frame_loop, &mut surface, 2);
    assert_eq!(stats[0].samples_read, 882);
    // Writer side is exhausted from then on
    assert_eq!(stats[1].samples_read, 0);
    assert!(frame_loop.spectrum().iter().all(|c| *c == [0.0, 0.0]));
}

#[test]
fn test_shutdown_releases_surface() {
    let config = test_config();
    let (mut frame_loop, mut surface) = start(&config, Box::new(ScriptedSource::new(vec![])));
    let mut frames = 0;
    let count = frame_loop
        .run(&mut surface, || {
            frames += 1;
            frames > 3
        })
        .unwrap();
    assert_eq!(count, 3);

    frame_loop.shutdown(&mut surface);
    assert!(surface.is_released());
}

#[test]
fn test_rejects_invalid_config() {
    let mut config = test_config();
    config.display.output_size = 5000;
    assert!(FrameLoop::new(&config, Box::new(ClosedSource)).is_err());
}
