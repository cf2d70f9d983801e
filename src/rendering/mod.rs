//! Render surface boundary.
//!
//! The frame loop drives drawing through the narrow `RenderSurface` contract
//! and only ever names buffers by `BufferId`. `GpuSurface` implements it with
//! wgpu; `CpuSurface` is a headless software implementation that runs the
//! decay pass on the CPU.

mod cpu;
mod gpu;
mod uniforms;

use glam::Mat4;

pub use cpu::{CpuSurface, DrawCall};
pub use gpu::GpuSurface;
pub use uniforms::{BarUniforms, LineUniforms, UniformSet};

use crate::spectrum::{DecayRecord, GRIDLINE_VERTICES};

/// Bytes per 2D vertex (gridlines, bar corners)
pub const VERTEX_STRIDE: u64 = std::mem::size_of::<[f32; 2]>() as u64;

/// Bytes per bin record in a decay buffer
pub const RECORD_STRIDE: u64 = std::mem::size_of::<DecayRecord>() as u64;

/// Logical buffers owned by a render surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferId {
    /// Complex FFT bins, attribute `a`
    Spectrum,
    /// Bar centers, attribute `x`
    BinX,
    /// Decay state, first of the pair
    DecayA,
    /// Decay state, second of the pair
    DecayB,
    /// Gridline vertices, attribute `pos`
    Gridlines,
}

impl BufferId {
    /// Index into the decay pair, if this is a decay buffer
    pub fn decay_index(self) -> Option<usize> {
        match self {
            BufferId::DecayA => Some(0),
            BufferId::DecayB => Some(1),
            _ => None,
        }
    }

    /// Capacity in bytes for a display of `bins` bars
    pub fn capacity(self, bins: usize) -> u64 {
        let bins = bins as u64;
        match self {
            BufferId::Spectrum => bins * VERTEX_STRIDE,
            BufferId::BinX => bins * std::mem::size_of::<f32>() as u64,
            BufferId::DecayA | BufferId::DecayB => bins * RECORD_STRIDE,
            BufferId::Gridlines => GRIDLINE_VERTICES as u64 * VERTEX_STRIDE,
        }
    }
}

/// What a `draw` call issues
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Primitive {
    /// One invocation per bin, output captured into the capture target
    Points,
    /// Line list from the bound vertex input
    Lines,
    /// Triangle list from the bound vertex input
    Triangles,
}

/// Value uploaded to a named uniform
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    Scalar(f32),
    Vec4([f32; 4]),
    Mat4(Mat4),
}

/// Errors raised by a render surface
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("failed to create surface: {0}")]
    Surface(String),
    #[error("failed to find suitable GPU adapter")]
    Adapter,
    #[error("failed to request device: {0}")]
    Device(String),
    #[error("unknown uniform '{0}'")]
    UnknownUniform(String),
    #[error("uniform '{name}' expects a {expected}")]
    UniformType {
        name: String,
        expected: &'static str,
    },
    #[error("{len} bytes do not fit {buffer:?} ({capacity} bytes)")]
    Overflow {
        buffer: BufferId,
        len: usize,
        capacity: u64,
    },
    #[error("static upload to {0:?} after the first frame")]
    Sealed(BufferId),
    #[error("invalid binding: {0}")]
    Binding(String),
    #[error("{0}x multisampling is not supported by this adapter")]
    Multisample(u32),
    #[error("failed to acquire frame: {0}")]
    Frame(#[from] wgpu::SurfaceError),
}

/// Draw-call façade between the frame loop and a graphics backend
pub trait RenderSurface {
    /// Upload data that stays fixed for the process lifetime (before the first frame)
    fn upload_static(&mut self, buffer: BufferId, data: &[u8]) -> Result<(), RenderError>;

    /// Upload data that changes per frame
    fn upload_dynamic(&mut self, buffer: BufferId, data: &[u8]) -> Result<(), RenderError>;

    /// Set a named scalar, vector or matrix uniform
    fn upload_uniform(&mut self, name: &str, value: UniformValue) -> Result<(), RenderError>;

    /// Bind `buffer` as the vertex input of the next draw
    fn bind_as_vertex_input(
        &mut self,
        buffer: BufferId,
        stride: u64,
        attributes: &[&str],
    ) -> Result<(), RenderError>;

    /// Bind `buffer` to receive the output of the next `Points` draw
    fn bind_as_capture_target(&mut self, buffer: BufferId) -> Result<(), RenderError>;

    fn draw(&mut self, primitive: Primitive, count: u32) -> Result<(), RenderError>;

    /// Finish the frame and show it
    fn present(&mut self) -> Result<(), RenderError>;

    /// Release every resource owned by the surface
    fn release(&mut self);
}

/// Check an upload against the capacity of its buffer
pub(crate) fn check_capacity(buffer: BufferId, len: usize, bins: usize) -> Result<(), RenderError> {
    let capacity = buffer.capacity(bins);
    if len as u64 > capacity {
        return Err(RenderError::Overflow {
            buffer,
            len,
            capacity,
        });
    }
    Ok(())
}

/// Check a vertex binding against the layouts the pipelines understand
pub(crate) fn check_vertex_binding(buffer: BufferId, stride: u64) -> Result<(), RenderError> {
    let ok = match buffer {
        BufferId::Gridlines => stride == VERTEX_STRIDE,
        BufferId::DecayA | BufferId::DecayB => stride == VERTEX_STRIDE || stride == RECORD_STRIDE,
        BufferId::Spectrum | BufferId::BinX => false,
    };
    if !ok {
        return Err(RenderError::Binding(format!(
            "{:?} cannot be read with stride {}",
            buffer, stride
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_stride_is_twelve_floats() {
        assert_eq!(RECORD_STRIDE, 12 * 4);
        assert_eq!(BufferId::DecayA.capacity(100), 4800);
    }

    #[test]
    fn test_capacity_check() {
        assert!(check_capacity(BufferId::BinX, 400, 100).is_ok());
        assert!(matches!(
            check_capacity(BufferId::BinX, 404, 100),
            Err(RenderError::Overflow { .. })
        ));
    }

    #[test]
    fn test_vertex_binding_check() {
        assert!(check_vertex_binding(BufferId::Gridlines, VERTEX_STRIDE).is_ok());
        assert!(check_vertex_binding(BufferId::DecayB, RECORD_STRIDE).is_ok());
        assert!(check_vertex_binding(BufferId::Spectrum, VERTEX_STRIDE).is_err());
        assert!(check_vertex_binding(BufferId::Gridlines, RECORD_STRIDE).is_err());
    }
}
