//! wgpu render surface.
//!
//! The decay update runs as a compute pass over the two storage buffers; the
//! bar and gridline draws read the same buffers as vertex input. Calls made
//! through `RenderSurface` are recorded as frame operations and encoded into
//! one command buffer at `present`, so the queue sees them in issue order.

use std::ops::Range;
use std::sync::Arc;

use winit::window::Window;

use super::{
    check_capacity, check_vertex_binding, BufferId, Primitive, RenderError, RenderSurface,
    UniformSet, UniformValue, RECORD_STRIDE, VERTEX_STRIDE,
};
use crate::params::VisualizerConfig;

const DECAY_WORKGROUP_SIZE: u32 = 64;

/// Work recorded between two presents
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameOp {
    /// Update pass reading decay buffer `source` into the other one
    Decay { source: usize, count: u32 },
    Lines { count: u32 },
    Bars { source: usize, count: u32 },
}

impl FrameOp {
    fn is_render(&self) -> bool {
        !matches!(self, FrameOp::Decay { .. })
    }
}

/// One pass of an encoded frame
#[derive(Debug, Clone, PartialEq, Eq)]
enum Pass {
    Decay { source: usize, count: u32 },
    /// Render ops `ops[range]` in one render pass
    Render { range: Range<usize>, clear: bool },
}

/// Split recorded ops into passes: each decay op is its own compute pass,
/// runs of render ops share a render pass, the first render pass clears.
/// A frame without render ops still gets a clearing pass.
fn plan_passes(ops: &[FrameOp]) -> Vec<Pass> {
    let mut passes = Vec::new();
    let mut cleared = false;
    let mut start = 0;
    while start < ops.len() {
        if let FrameOp::Decay { source, count } = ops[start] {
            passes.push(Pass::Decay { source, count });
            start += 1;
        } else {
            let run = ops[start..].iter().take_while(|op| op.is_render()).count();
            passes.push(Pass::Render {
                range: start..start + run,
                clear: !cleared,
            });
            cleared = true;
            start += run;
        }
    }
    if !cleared {
        passes.push(Pass::Render {
            range: 0..0,
            clear: true,
        });
    }
    passes
}

/// Passes that must still run when no swapchain image could be acquired.
///
/// The decay roles have already swapped, so the update has to land in the
/// target buffer even though nothing is drawn.
fn passes_without_frame(passes: &[Pass]) -> Vec<Pass> {
    passes
        .iter()
        .filter(|pass| matches!(pass, Pass::Decay { .. }))
        .cloned()
        .collect()
}

/// Multisampled color target resolved into the swapchain image
struct MsaaTarget {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
}

/// Render surface backed by a wgpu device and a window swapchain
pub struct GpuSurface {
    surface: wgpu::Surface<'static>,
    device: wgpu::Device,
    queue: wgpu::Queue,
    config: wgpu::SurfaceConfiguration,
    sample_count: u32,
    msaa: Option<MsaaTarget>,
    decay_pipeline: wgpu::ComputePipeline,
    bar_pipeline: wgpu::RenderPipeline,
    line_pipeline: wgpu::RenderPipeline,
    spectrum_buffer: wgpu::Buffer,
    bin_x_buffer: wgpu::Buffer,
    decay_buffers: [wgpu::Buffer; 2],
    gridline_buffer: wgpu::Buffer,
    decay_params_buffer: wgpu::Buffer,
    bar_uniform_buffer: wgpu::Buffer,
    line_uniform_buffer: wgpu::Buffer,
    /// Indexed by the decay buffer read as source
    decay_bind_groups: [wgpu::BindGroup; 2],
    bar_bind_group: wgpu::BindGroup,
    line_bind_group: wgpu::BindGroup,
    uniforms: UniformSet,
    uniforms_dirty: bool,
    bins: usize,
    vertex_input: Option<(BufferId, u64)>,
    capture_target: Option<BufferId>,
    ops: Vec<FrameOp>,
    frames: u64,
    released: bool,
}

impl GpuSurface {
    /// Create the device, swapchain, buffers and pipelines for `window`
    pub async fn new(window: Arc<Window>, config: &VisualizerConfig) -> Result<Self, RenderError> {
        let size = window.inner_size();
        let bins = config.display.output_size;
        let sample_count = config.display.aa_samples;

        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let surface = instance
            .create_surface(window)
            .map_err(|e| RenderError::Surface(e.to_string()))?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .ok_or(RenderError::Adapter)?;

        let info = adapter.get_info();
        log::info!("GPU adapter: {} ({:?})", info.name, info.backend);

        // Colors are given in display space, so prefer a non-sRGB target
        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .find(|f| !f.is_srgb())
            .copied()
            .unwrap_or(surface_caps.formats[0]);

        let required_features = msaa_features(
            sample_count,
            adapter.features(),
            adapter.get_texture_format_features(surface_format).flags,
        )?;

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Visualizer Device"),
                    required_features,
                    required_limits: wgpu::Limits::default(),
                    memory_hints: Default::default(),
                },
                None,
            )
            .await
            .map_err(|e| RenderError::Device(e.to_string()))?;

        let surface_config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::Fifo,
            alpha_mode: surface_caps.alpha_modes[0],
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &surface_config);

        let decay_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Decay Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("decay.wgsl").into()),
        });
        let bar_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Bar Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("bars.wgsl").into()),
        });
        let line_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Gridline Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("lines.wgsl").into()),
        });

        // Buffers
        let buffer = |label: &str, id: BufferId, usage: wgpu::BufferUsages| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size: id.capacity(bins),
                usage,
                mapped_at_creation: false,
            })
        };
        let storage = wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST;
        let spectrum_buffer = buffer("Spectrum Buffer", BufferId::Spectrum, storage);
        let bin_x_buffer = buffer("Bin X Buffer", BufferId::BinX, storage);
        let decay_buffers = [
            buffer(
                "Decay Buffer A",
                BufferId::DecayA,
                storage | wgpu::BufferUsages::VERTEX,
            ),
            buffer(
                "Decay Buffer B",
                BufferId::DecayB,
                storage | wgpu::BufferUsages::VERTEX,
            ),
        ];
        let gridline_buffer = buffer(
            "Gridline Buffer",
            BufferId::Gridlines,
            wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
        );

        let uniforms = UniformSet::default();
        let uniform_buffer = |label: &str, contents: &[u8]| {
            use wgpu::util::DeviceExt;
            device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            })
        };
        let decay_params_buffer =
            uniform_buffer("Decay Params Buffer", bytemuck::bytes_of(&uniforms.decay));
        let bar_uniform_buffer =
            uniform_buffer("Bar Uniform Buffer", bytemuck::bytes_of(&uniforms.bars));
        let line_uniform_buffer =
            uniform_buffer("Line Uniform Buffer", bytemuck::bytes_of(&uniforms.lines));

        // Decay compute pipeline
        let storage_entry = |binding: u32, read_only: bool| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };
        let decay_bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Decay Bind Group Layout"),
                entries: &[
                    storage_entry(0, true),
                    storage_entry(1, false),
                    storage_entry(2, true),
                    storage_entry(3, true),
                    wgpu::BindGroupLayoutEntry {
                        binding: 4,
                        visibility: wgpu::ShaderStages::COMPUTE,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Uniform,
                            has_dynamic_offset: false,
                            min_binding_size: None,
                        },
                        count: None,
                    },
                ],
            });

        let decay_bind_group = |source: usize| {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(if source == 0 {
                    "Decay Bind Group A→B"
                } else {
                    "Decay Bind Group B→A"
                }),
                layout: &decay_bind_group_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: decay_buffers[source].as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: decay_buffers[1 - source].as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: spectrum_buffer.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 3,
                        resource: bin_x_buffer.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 4,
                        resource: decay_params_buffer.as_entire_binding(),
                    },
                ],
            })
        };
        let decay_bind_groups = [decay_bind_group(0), decay_bind_group(1)];

        let decay_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Decay Pipeline Layout"),
            bind_group_layouts: &[&decay_bind_group_layout],
            push_constant_ranges: &[],
        });

        let decay_pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("Decay Pipeline"),
            layout: Some(&decay_pipeline_layout),
            module: &decay_shader,
            entry_point: Some("main"),
            compilation_options: Default::default(),
            cache: None,
        });

        // Bar and gridline render pipelines
        let uniform_layout = |label: &str| {
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(label),
                entries: &[wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                }],
            })
        };
        let bar_bind_group_layout = uniform_layout("Bar Bind Group Layout");
        let line_bind_group_layout = uniform_layout("Line Bind Group Layout");

        let bar_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Bar Bind Group"),
            layout: &bar_bind_group_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: bar_uniform_buffer.as_entire_binding(),
            }],
        });
        let line_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Line Bind Group"),
            layout: &line_bind_group_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: line_uniform_buffer.as_entire_binding(),
            }],
        });

        let render_pipeline = |label: &str,
                               shader: &wgpu::ShaderModule,
                               layout: &wgpu::BindGroupLayout,
                               topology: wgpu::PrimitiveTopology| {
            let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(label),
                bind_group_layouts: &[layout],
                push_constant_ranges: &[],
            });
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(label),
                layout: Some(&pipeline_layout),
                vertex: wgpu::VertexState {
                    module: shader,
                    entry_point: Some("vs_main"),
                    buffers: &[wgpu::VertexBufferLayout {
                        array_stride: VERTEX_STRIDE as wgpu::BufferAddress,
                        step_mode: wgpu::VertexStepMode::Vertex,
                        attributes: &[wgpu::VertexAttribute {
                            offset: 0,
                            shader_location: 0,
                            format: wgpu::VertexFormat::Float32x2,
                        }],
                    }],
                    compilation_options: Default::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module: shader,
                    entry_point: Some("fs_main"),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: surface_format,
                        blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: Default::default(),
                }),
                primitive: wgpu::PrimitiveState {
                    topology,
                    strip_index_format: None,
                    front_face: wgpu::FrontFace::Ccw,
                    cull_mode: None,
                    polygon_mode: wgpu::PolygonMode::Fill,
                    unclipped_depth: false,
                    conservative: false,
                },
                depth_stencil: None,
                multisample: wgpu::MultisampleState {
                    count: sample_count,
                    mask: !0,
                    alpha_to_coverage_enabled: false,
                },
                multiview: None,
                cache: None,
            })
        };
        let bar_pipeline = render_pipeline(
            "Bar Pipeline",
            &bar_shader,
            &bar_bind_group_layout,
            wgpu::PrimitiveTopology::TriangleList,
        );
        let line_pipeline = render_pipeline(
            "Gridline Pipeline",
            &line_shader,
            &line_bind_group_layout,
            wgpu::PrimitiveTopology::LineList,
        );

        let msaa = create_msaa_target(&device, &surface_config, sample_count);

        Ok(Self {
            surface,
            device,
            queue,
            config: surface_config,
            sample_count,
            msaa,
            decay_pipeline,
            bar_pipeline,
            line_pipeline,
            spectrum_buffer,
            bin_x_buffer,
            decay_buffers,
            gridline_buffer,
            decay_params_buffer,
            bar_uniform_buffer,
            line_uniform_buffer,
            decay_bind_groups,
            bar_bind_group,
            line_bind_group,
            uniforms,
            uniforms_dirty: false,
            bins,
            vertex_input: None,
            capture_target: None,
            ops: Vec::new(),
            frames: 0,
            released: false,
        })
    }

    /// Resize the swapchain; zero-sized windows are ignored
    pub fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 || self.released {
            return;
        }
        self.config.width = width;
        self.config.height = height;
        self.reconfigure();
    }

    /// Reconfigure the swapchain at its current size (after `Lost` / `Outdated`)
    pub fn reconfigure(&mut self) {
        if self.released {
            return;
        }
        self.surface.configure(&self.device, &self.config);
        if let Some(old) = self.msaa.take() {
            old.texture.destroy();
        }
        self.msaa = create_msaa_target(&self.device, &self.config, self.sample_count);
    }

    fn buffer(&self, id: BufferId) -> &wgpu::Buffer {
        match id {
            BufferId::Spectrum => &self.spectrum_buffer,
            BufferId::BinX => &self.bin_x_buffer,
            BufferId::DecayA => &self.decay_buffers[0],
            BufferId::DecayB => &self.decay_buffers[1],
            BufferId::Gridlines => &self.gridline_buffer,
        }
    }

    fn write(&mut self, buffer: BufferId, data: &[u8]) -> Result<(), RenderError> {
        if self.released {
            return Err(RenderError::Binding(format!("{:?} written after release", buffer)));
        }
        check_capacity(buffer, data.len(), self.bins)?;
        if data.is_empty() {
            return Ok(());
        }
        self.queue.write_buffer(self.buffer(buffer), 0, data);
        Ok(())
    }

    fn flush_uniforms(&mut self) {
        if !self.uniforms_dirty {
            return;
        }
        self.queue.write_buffer(
            &self.decay_params_buffer,
            0,
            bytemuck::bytes_of(&self.uniforms.decay),
        );
        self.queue.write_buffer(
            &self.bar_uniform_buffer,
            0,
            bytemuck::bytes_of(&self.uniforms.bars),
        );
        self.queue.write_buffer(
            &self.line_uniform_buffer,
            0,
            bytemuck::bytes_of(&self.uniforms.lines),
        );
        self.uniforms_dirty = false;
    }

    fn encode_decay(&self, encoder: &mut wgpu::CommandEncoder, source: usize, count: u32) {
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("Decay Pass"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&self.decay_pipeline);
        pass.set_bind_group(0, &self.decay_bind_groups[source], &[]);
        pass.dispatch_workgroups(count.div_ceil(DECAY_WORKGROUP_SIZE), 1, 1);
    }

    fn submit_compute_only(&self, passes: &[Pass]) {
        if passes.is_empty() {
            return;
        }
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Decay Encoder"),
            });
        for pass in passes {
            if let Pass::Decay { source, count } = *pass {
                self.encode_decay(&mut encoder, source, count);
            }
        }
        self.queue.submit(std::iter::once(encoder.finish()));
    }

    fn encode_draws(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        frame_view: &wgpu::TextureView,
        ops: &[FrameOp],
        clear: bool,
    ) {
        let (view, resolve_target) = match &self.msaa {
            Some(target) => (&target.view, Some(frame_view)),
            None => (frame_view, None),
        };
        let load = if clear {
            wgpu::LoadOp::Clear(wgpu::Color::BLACK)
        } else {
            wgpu::LoadOp::Load
        };

        let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Spectrum Pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view,
                resolve_target,
                ops: wgpu::Operations {
                    load,
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });

        for op in ops {
            match *op {
                FrameOp::Lines { count } => {
                    render_pass.set_pipeline(&self.line_pipeline);
                    render_pass.set_bind_group(0, &self.line_bind_group, &[]);
                    render_pass.set_vertex_buffer(0, self.gridline_buffer.slice(..));
                    render_pass.draw(0..count, 0..1);
                }
                FrameOp::Bars { source, count } => {
                    render_pass.set_pipeline(&self.bar_pipeline);
                    render_pass.set_bind_group(0, &self.bar_bind_group, &[]);
                    render_pass.set_vertex_buffer(0, self.decay_buffers[source].slice(..));
                    render_pass.draw(0..count, 0..1);
                }
                FrameOp::Decay { .. } => {}
            }
        }
    }
}

/// Device features needed to render with `sample_count` samples.
///
/// 1x and 4x are always available; other counts depend on the adapter and
/// the surface format.
fn msaa_features(
    sample_count: u32,
    adapter_features: wgpu::Features,
    format_flags: wgpu::TextureFormatFeatureFlags,
) -> Result<wgpu::Features, RenderError> {
    if matches!(sample_count, 1 | 4) {
        return Ok(wgpu::Features::empty());
    }
    let adapter_specific = wgpu::Features::TEXTURE_ADAPTER_SPECIFIC_FORMAT_FEATURES;
    if adapter_features.contains(adapter_specific)
        && format_flags.sample_count_supported(sample_count)
    {
        Ok(adapter_specific)
    } else {
        Err(RenderError::Multisample(sample_count))
    }
}

fn create_msaa_target(
    device: &wgpu::Device,
    config: &wgpu::SurfaceConfiguration,
    sample_count: u32,
) -> Option<MsaaTarget> {
    if sample_count <= 1 {
        return None;
    }
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("MSAA Target"),
        size: wgpu::Extent3d {
            width: config.width,
            height: config.height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count,
        dimension: wgpu::TextureDimension::D2,
        format: config.format,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
        view_formats: &[],
    });
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    Some(MsaaTarget { texture, view })
}

impl RenderSurface for GpuSurface {
    fn upload_static(&mut self, buffer: BufferId, data: &[u8]) -> Result<(), RenderError> {
        if self.frames > 0 {
            return Err(RenderError::Sealed(buffer));
        }
        self.write(buffer, data)
    }

    fn upload_dynamic(&mut self, buffer: BufferId, data: &[u8]) -> Result<(), RenderError> {
        self.write(buffer, data)
    }

    fn upload_uniform(&mut self, name: &str, value: UniformValue) -> Result<(), RenderError> {
        self.uniforms.set(name, value)?;
        self.uniforms_dirty = true;
        Ok(())
    }

    fn bind_as_vertex_input(
        &mut self,
        buffer: BufferId,
        stride: u64,
        _attributes: &[&str],
    ) -> Result<(), RenderError> {
        check_vertex_binding(buffer, stride)?;
        self.vertex_input = Some((buffer, stride));
        Ok(())
    }

    fn bind_as_capture_target(&mut self, buffer: BufferId) -> Result<(), RenderError> {
        if buffer.decay_index().is_none() {
            return Err(RenderError::Binding(format!(
                "{:?} cannot be a capture target",
                buffer
            )));
        }
        self.capture_target = Some(buffer);
        Ok(())
    }

    fn draw(&mut self, primitive: Primitive, count: u32) -> Result<(), RenderError> {
        let Some((input, stride)) = self.vertex_input else {
            return Err(RenderError::Binding("draw without vertex input".into()));
        };

        let op = match primitive {
            Primitive::Points => {
                let target = self.capture_target.take().ok_or_else(|| {
                    RenderError::Binding("decay pass needs a capture target".into())
                })?;
                let (Some(source), Some(dest)) = (input.decay_index(), target.decay_index())
                else {
                    return Err(RenderError::Binding(format!(
                        "decay pass cannot read {:?} into {:?}",
                        input, target
                    )));
                };
                if source == dest || stride != RECORD_STRIDE {
                    return Err(RenderError::Binding(format!(
                        "decay pass cannot read {:?} with stride {} into {:?}",
                        input, stride, target
                    )));
                }
                let count = count.min(self.bins as u32);
                if self.uniforms.decay.count != count {
                    self.uniforms.decay.count = count;
                    self.uniforms_dirty = true;
                }
                FrameOp::Decay { source, count }
            }
            Primitive::Lines => {
                if input != BufferId::Gridlines {
                    return Err(RenderError::Binding(format!("cannot draw lines from {:?}", input)));
                }
                FrameOp::Lines { count }
            }
            Primitive::Triangles => match input.decay_index() {
                Some(source) if stride == VERTEX_STRIDE => FrameOp::Bars { source, count },
                _ => {
                    return Err(RenderError::Binding(format!(
                        "cannot draw bars from {:?} with stride {}",
                        input, stride
                    )))
                }
            },
        };
        self.ops.push(op);
        Ok(())
    }

    fn present(&mut self) -> Result<(), RenderError> {
        let ops = std::mem::take(&mut self.ops);
        self.vertex_input = None;
        self.capture_target = None;
        if self.released {
            return Err(RenderError::Binding("present after release".into()));
        }

        self.flush_uniforms();
        let passes = plan_passes(&ops);

        let output = match self.surface.get_current_texture() {
            Ok(output) => output,
            Err(e) => {
                self.submit_compute_only(&passes_without_frame(&passes));
                return Err(e.into());
            }
        };
        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Frame Encoder"),
            });

        for pass in passes {
            match pass {
                Pass::Decay { source, count } => self.encode_decay(&mut encoder, source, count),
                Pass::Render { range, clear } => {
                    self.encode_draws(&mut encoder, &view, &ops[range], clear)
                }
            }
        }

        self.queue.submit(std::iter::once(encoder.finish()));
        output.present();
        self.frames += 1;
        Ok(())
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.ops.clear();
        // Let queued work finish before the buffers go away
        self.device.poll(wgpu::Maintain::Wait);
        self.spectrum_buffer.destroy();
        self.bin_x_buffer.destroy();
        for buffer in &self.decay_buffers {
            buffer.destroy();
        }
        self.gridline_buffer.destroy();
        self.decay_params_buffer.destroy();
        self.bar_uniform_buffer.destroy();
        self.line_uniform_buffer.destroy();
        if let Some(target) = self.msaa.take() {
            target.texture.destroy();
        }
        self.released = true;
        log::debug!("GPU surface released after {} frames", self.frames);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAME: [FrameOp; 3] = [
        FrameOp::Decay {
            source: 0,
            count: 100,
        },
        FrameOp::Lines { count: 16 },
        FrameOp::Bars {
            source: 1,
            count: 600,
        },
    ];

    #[test]
    fn test_render_ops_share_one_clearing_pass() {
        assert_eq!(
            plan_passes(&FRAME),
            vec![
                Pass::Decay {
                    source: 0,
                    count: 100
                },
                Pass::Render {
                    range: 1..3,
                    clear: true
                },
            ]
        );
    }

    #[test]
    fn test_only_first_render_pass_clears() {
        let ops = [FRAME[1], FRAME[0], FRAME[2]];
        assert_eq!(
            plan_passes(&ops),
            vec![
                Pass::Render {
                    range: 0..1,
                    clear: true
                },
                Pass::Decay {
                    source: 0,
                    count: 100
                },
                Pass::Render {
                    range: 2..3,
                    clear: false
                },
            ]
        );
    }

    #[test]
    fn test_empty_frame_still_clears() {
        assert_eq!(
            plan_passes(&[]),
            vec![Pass::Render {
                range: 0..0,
                clear: true
            }]
        );
    }

    #[test]
    fn test_decay_survives_missing_frame() {
        let passes = plan_passes(&FRAME);
        assert_eq!(
            passes_without_frame(&passes),
            vec![Pass::Decay {
                source: 0,
                count: 100
            }]
        );

        let draws_only = plan_passes(&FRAME[1..]);
        assert!(passes_without_frame(&draws_only).is_empty());
    }

    #[test]
    fn test_msaa_guaranteed_counts_need_no_features() {
        let none = wgpu::TextureFormatFeatureFlags::empty();
        for count in [1, 4] {
            assert_eq!(
                msaa_features(count, wgpu::Features::empty(), none).unwrap(),
                wgpu::Features::empty()
            );
        }
    }

    #[test]
    fn test_msaa_adapter_specific_counts() {
        let feature = wgpu::Features::TEXTURE_ADAPTER_SPECIFIC_FORMAT_FEATURES;
        let x2 = wgpu::TextureFormatFeatureFlags::MULTISAMPLE_X2;

        assert_eq!(msaa_features(2, feature, x2).unwrap(), feature);
        // Format supports it but the device could not enable the feature
        assert!(matches!(
            msaa_features(2, wgpu::Features::empty(), x2),
            Err(RenderError::Multisample(2))
        ));
        assert!(matches!(
            msaa_features(8, feature, x2),
            Err(RenderError::Multisample(8))
        ));
    }
}
