//! gravbars - real-time audio spectrum bars with gravity decay

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use winit::{
    application::ApplicationHandler,
    event::*,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::{Window, WindowId},
};

use gravbars::audio::{
    list_devices, DeviceSource, DeviceStream, PipeSource, SampleSource, SourceError,
};
use gravbars::cli::Args;
use gravbars::frame::{FrameError, FrameLoop};
use gravbars::params::VisualizerConfig;
use gravbars::rendering::{CpuSurface, GpuSurface, RenderError};

/// Windowed application state
struct App {
    config: VisualizerConfig,
    frame_loop: FrameLoop,
    window: Option<Arc<Window>>,
    surface: Option<GpuSurface>,
    // Capture stream must outlive the frame loop's reader
    _stream: Option<DeviceStream>,
    failed: bool,
}

impl App {
    fn new(config: VisualizerConfig, frame_loop: FrameLoop, stream: Option<DeviceStream>) -> Self {
        Self {
            config,
            frame_loop,
            window: None,
            surface: None,
            _stream: stream,
            failed: false,
        }
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, message: String) {
        log::error!("{}", message);
        self.failed = true;
        event_loop.exit();
    }

    fn render_frame(&mut self, event_loop: &ActiveEventLoop) {
        let Some(surface) = self.surface.as_mut() else {
            return;
        };

        match self.frame_loop.run_frame(surface) {
            Ok(_) => {}
            // Reconfigure surface if lost or outdated
            Err(FrameError::Render(RenderError::Frame(
                wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated,
            ))) => surface.reconfigure(),
            Err(FrameError::Render(RenderError::Frame(wgpu::SurfaceError::Timeout))) => {
                log::warn!("Surface timeout, frame skipped");
            }
            Err(e) => self.fail(event_loop, format!("Render error: {}", e)),
        }
    }
}

impl ApplicationHandler for App {
    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }

    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return; // Already initialized
        }

        let window_attributes = Window::default_attributes()
            .with_title(format!("Spectrum (fmax={:.0}Hz)", self.config.fmax_hz()))
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.display.window_width,
                self.config.display.window_height,
            ));

        let window = match event_loop.create_window(window_attributes) {
            Ok(window) => Arc::new(window),
            Err(e) => return self.fail(event_loop, format!("Failed to create window: {}", e)),
        };

        let created = pollster::block_on(GpuSurface::new(Arc::clone(&window), &self.config));
        let mut surface = match created {
            Ok(surface) => surface,
            Err(e) => return self.fail(event_loop, format!("Failed to initialize GPU: {}", e)),
        };

        if let Err(e) = self.frame_loop.init(&mut surface) {
            return self.fail(event_loop, format!("Failed to upload initial state: {}", e));
        }

        log::info!("Press ESC to quit");
        self.window = Some(window);
        self.surface = Some(surface);
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => event_loop.exit(),
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        state: ElementState::Pressed,
                        physical_key: PhysicalKey::Code(KeyCode::Escape),
                        ..
                    },
                ..
            } => event_loop.exit(),
            WindowEvent::Resized(size) => {
                if let Some(surface) = self.surface.as_mut() {
                    surface.resize(size.width, size.height);
                }
            }
            WindowEvent::RedrawRequested => self.render_frame(event_loop),
            _ => {}
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(surface) = self.surface.as_mut() {
            self.frame_loop.shutdown(surface);
        }
    }
}

/// Open the pipe, or the capture device when one was requested
fn open_source(
    args: &Args,
    config: &VisualizerConfig,
) -> Result<(Box<dyn SampleSource>, Option<DeviceStream>), SourceError> {
    match args.device() {
        Some(name) => {
            let (stream, source) = DeviceSource::open(name, &config.audio)?;
            Ok((Box::new(source), Some(stream)))
        }
        None => {
            let source = PipeSource::open(&args.fifo, config.audio.channels)?;
            Ok((Box::new(source), None))
        }
    }
}

/// Run a fixed number of frames on the CPU surface and log the result
fn run_headless(frame_loop: &mut FrameLoop, frames: u64) -> Result<(), FrameError> {
    let mut surface = CpuSurface::new(frame_loop.config().display.output_size);
    frame_loop.init(&mut surface)?;

    let mut remaining = frames;
    frame_loop.run(&mut surface, || {
        if remaining == 0 {
            return true;
        }
        remaining -= 1;
        false
    })?;

    let held = surface.held(frame_loop.decay().roles().active);
    let heights: Vec<String> = held.iter().map(|h| format!("{:.3}", h)).collect();
    let fps = frame_loop
        .current_fps()
        .map_or_else(|| "n/a".to_string(), |fps| format!("{:.1}", fps));
    log::info!(
        "Held bar heights after {} frames ({} fps): {}",
        frames,
        fps,
        heights.join(" ")
    );

    frame_loop.shutdown(&mut surface);
    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    if args.list_devices {
        return match list_devices() {
            Ok(names) => {
                for name in names {
                    println!("{}", name);
                }
                ExitCode::SUCCESS
            }
            Err(e) => {
                log::error!("{}", e);
                ExitCode::FAILURE
            }
        };
    }

    let config = args.to_config();
    if let Err(e) = config.validate() {
        log::error!("{}", e);
        return ExitCode::FAILURE;
    }

    let (source, stream) = match open_source(&args, &config) {
        Ok(opened) => opened,
        Err(e) => {
            log::error!("Failed to open input: {}", e);
            return ExitCode::FAILURE;
        }
    };
    log::info!(
        "Input: {} ({} Hz, {} ch), fmax {:.0} Hz",
        source.name(),
        config.audio.sample_rate_hz,
        config.audio.channels,
        config.fmax_hz()
    );

    let mut frame_loop = match FrameLoop::new(&config, source) {
        Ok(frame_loop) => frame_loop,
        Err(e) => {
            log::error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Some(frames) = args.headless {
        let result = run_headless(&mut frame_loop, frames);
        drop(stream);
        return match result {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                log::error!("{}", e);
                ExitCode::FAILURE
            }
        };
    }

    let event_loop = match EventLoop::new() {
        Ok(event_loop) => event_loop,
        Err(e) => {
            log::error!("Failed to create event loop: {}", e);
            return ExitCode::FAILURE;
        }
    };
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(config, frame_loop, stream);
    if let Err(e) = event_loop.run_app(&mut app) {
        log::error!("Event loop error: {}", e);
        return ExitCode::FAILURE;
    }

    if app.failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
