//! Headless software render surface.
//!
//! Keeps every buffer in host memory, runs the decay pass with
//! `decay_kernel`, and records the draw calls of the last presented frame.

use bytemuck::AnyBitPattern;

use super::{
    check_capacity, check_vertex_binding, BufferId, Primitive, RenderError, RenderSurface,
    UniformSet, UniformValue,
};
use crate::spectrum::{decay_kernel, DecayRecord};

/// A draw issued during a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawCall {
    pub primitive: Primitive,
    pub count: u32,
    pub vertex_input: Option<BufferId>,
    pub capture_target: Option<BufferId>,
}

/// Render surface that executes on the CPU
pub struct CpuSurface {
    bins: usize,
    spectrum: Vec<[f32; 2]>,
    xs: Vec<f32>,
    decay: [Vec<DecayRecord>; 2],
    gridlines: Vec<[f32; 2]>,
    uniforms: UniformSet,
    vertex_input: Option<BufferId>,
    capture_target: Option<BufferId>,
    pending: Vec<DrawCall>,
    last_frame: Vec<DrawCall>,
    frames: u64,
    released: bool,
}

impl CpuSurface {
    /// Surface sized for `bins` bars
    pub fn new(bins: usize) -> Self {
        Self {
            bins,
            spectrum: vec![[0.0; 2]; bins],
            xs: vec![0.0; bins],
            decay: [
                vec![DecayRecord::default(); bins],
                vec![DecayRecord::default(); bins],
            ],
            gridlines: Vec::new(),
            uniforms: UniformSet::default(),
            vertex_input: None,
            capture_target: None,
            pending: Vec::new(),
            last_frame: Vec::new(),
            frames: 0,
            released: false,
        }
    }

    pub fn uniforms(&self) -> &UniformSet {
        &self.uniforms
    }

    /// Contents of a decay buffer
    pub fn records(&self, buffer: BufferId) -> &[DecayRecord] {
        match buffer.decay_index() {
            Some(i) => &self.decay[i],
            None => &[],
        }
    }

    /// Held bar heights stored in a decay buffer
    pub fn held(&self, buffer: BufferId) -> Vec<f32> {
        let floor = self.uniforms.decay.floor;
        self.records(buffer).iter().map(|r| r.held(floor)).collect()
    }

    pub fn spectrum(&self) -> &[[f32; 2]] {
        &self.spectrum
    }

    pub fn bin_x(&self) -> &[f32] {
        &self.xs
    }

    pub fn gridlines(&self) -> &[[f32; 2]] {
        &self.gridlines
    }

    /// Draw calls of the last presented frame
    pub fn last_frame(&self) -> &[DrawCall] {
        &self.last_frame
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    fn write(&mut self, buffer: BufferId, data: &[u8]) -> Result<(), RenderError> {
        check_capacity(buffer, data.len(), self.bins)?;
        match buffer {
            BufferId::Spectrum => overwrite(&mut self.spectrum, data),
            BufferId::BinX => overwrite(&mut self.xs, data),
            BufferId::DecayA => overwrite(&mut self.decay[0], data),
            BufferId::DecayB => overwrite(&mut self.decay[1], data),
            BufferId::Gridlines => {
                self.gridlines = decode(data);
            }
        }
        Ok(())
    }

    fn run_decay(&mut self, count: u32) -> Result<(), RenderError> {
        let (source, target) = match (self.vertex_input, self.capture_target) {
            (Some(s), Some(t)) => (s, t),
            _ => {
                return Err(RenderError::Binding(
                    "decay pass needs a vertex input and a capture target".into(),
                ))
            }
        };
        let (Some(src), Some(dst)) = (source.decay_index(), target.decay_index()) else {
            return Err(RenderError::Binding(format!(
                "decay pass cannot read {:?} into {:?}",
                source, target
            )));
        };
        if src == dst {
            return Err(RenderError::Binding(format!(
                "{:?} is both read source and capture target",
                source
            )));
        }

        let prev = self.decay[src].clone();
        let next = &mut self.decay[dst];
        let count = (count as usize)
            .min(prev.len())
            .min(next.len())
            .min(self.spectrum.len())
            .min(self.xs.len());
        let mut params = self.uniforms.decay;
        params.count = count as u32;

        for i in 0..count {
            next[i] = decay_kernel(&prev[i], self.spectrum[i], self.xs[i], &params);
        }
        Ok(())
    }
}

/// Copy bytes over the front of `dst`, leaving the tail untouched
fn overwrite<T: AnyBitPattern>(dst: &mut [T], data: &[u8]) {
    for (slot, value) in dst.iter_mut().zip(decode::<T>(data)) {
        *slot = value;
    }
}

fn decode<T: AnyBitPattern>(data: &[u8]) -> Vec<T> {
    data.chunks_exact(std::mem::size_of::<T>())
        .map(bytemuck::pod_read_unaligned)
        .collect()
}

impl RenderSurface for CpuSurface {
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
        self.uniforms.set(name, value)
    }

    fn bind_as_vertex_input(
        &mut self,
        buffer: BufferId,
        stride: u64,
        _attributes: &[&str],
    ) -> Result<(), RenderError> {
        check_vertex_binding(buffer, stride)?;
        self.vertex_input = Some(buffer);
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
        if primitive == Primitive::Points {
            self.run_decay(count)?;
        } else if self.vertex_input.is_none() {
            return Err(RenderError::Binding("draw without vertex input".into()));
        }

        self.pending.push(DrawCall {
            primitive,
            count,
            vertex_input: self.vertex_input,
            capture_target: self.capture_target,
        });

        // Capture binding lasts for one pass
        if primitive == Primitive::Points {
            self.capture_target = None;
        }
        Ok(())
    }

    fn present(&mut self) -> Result<(), RenderError> {
        self.last_frame = std::mem::take(&mut self.pending);
        self.vertex_input = None;
        self.frames += 1;
        Ok(())
    }

    fn release(&mut self) {
        self.spectrum.clear();
        self.xs.clear();
        self.decay = [Vec::new(), Vec::new()];
        self.gridlines.clear();
        self.released = true;
    }
}
