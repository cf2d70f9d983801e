//! Per-bin gravity decay with double-buffered state.
//!
//! Each bin holds a bar height that rises instantly to a louder value and
//! otherwise falls by `gravity` per frame:
//!
//! ```text
//! displayed = max(new, held - gravity)
//! held'     = displayed
//! ```
//!
//! The state lives in two buffers. Each frame the update pass reads the
//! active buffer and writes every bin into the inactive one, then the roles
//! swap so the freshly written buffer is read by the bar draw and by the next
//! update. The pass runs wherever the surface executes it: a compute shader
//! for `GpuSurface`, `decay_kernel` in a loop for `CpuSurface`.

use bytemuck::{Pod, Zeroable};

use crate::params::{VisualizerConfig, BAR_FLOOR};
use crate::rendering::{
    BufferId, Primitive, RenderError, RenderSurface, RECORD_STRIDE, VERTEX_STRIDE,
};

/// Decay state of one bin: the bar quad as two triangles.
///
/// Vertex 0 is the top-left corner; its y carries the held height.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct DecayRecord {
    pub corners: [[f32; 2]; 6],
}

impl DecayRecord {
    /// Bar centered at `x`, `width` wide, rising `height` above `floor`
    pub fn bar(x: f32, width: f32, floor: f32, height: f32) -> Self {
        let left = x - width * 0.5;
        let right = x + width * 0.5;
        let top = floor + height;
        Self {
            corners: [
                [left, top],
                [left, floor],
                [right, top],
                [right, top],
                [left, floor],
                [right, floor],
            ],
        }
    }

    /// Held height above `floor`
    pub fn held(&self, floor: f32) -> f32 {
        self.corners[0][1] - floor
    }
}

/// Parameters of the update pass (uniform block of the decay shader)
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct DecayParams {
    pub fft_scale: f32,
    pub slope: f32,
    pub offset: f32,
    pub width: f32,
    pub gravity: f32,
    pub floor: f32,
    pub count: u32,
    pub _padding: f32,
}

impl Default for DecayParams {
    fn default() -> Self {
        Self {
            fft_scale: 1.0,
            slope: 1.0,
            offset: 0.0,
            width: 0.0,
            gravity: 0.0,
            floor: BAR_FLOOR,
            count: 0,
            _padding: 0.0,
        }
    }
}

/// One step of the gravity recurrence
pub fn gravity_step(new: f32, held: f32, gravity: f32) -> f32 {
    new.max(held - gravity)
}

/// Bar height for a complex bin: `slope * log10(|a| * fft_scale) + offset` above the floor.
///
/// Silence maps to 0. NaN input is not sanitized.
pub fn bar_height(bin: [f32; 2], params: &DecayParams) -> f32 {
    let magnitude = (bin[0] * bin[0] + bin[1] * bin[1]).sqrt() * params.fft_scale;
    let level = params.slope * magnitude.log10() + params.offset;
    (level - params.floor).max(0.0)
}

/// Update one bin; mirrors `decay.wgsl`
pub fn decay_kernel(
    prev: &DecayRecord,
    bin: [f32; 2],
    x: f32,
    params: &DecayParams,
) -> DecayRecord {
    let held = gravity_step(
        bar_height(bin, params),
        prev.held(params.floor),
        params.gravity,
    );
    DecayRecord::bar(x, params.width, params.floor, held)
}

/// Read-source / write-target assignment of the decay pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferRoles {
    /// Previous frame's state, read by the update pass and the bar draw
    pub active: BufferId,
    /// This frame's capture target
    pub inactive: BufferId,
}

impl Default for BufferRoles {
    fn default() -> Self {
        Self {
            active: BufferId::DecayA,
            inactive: BufferId::DecayB,
        }
    }
}

impl BufferRoles {
    pub fn swap(&mut self) {
        std::mem::swap(&mut self.active, &mut self.inactive);
    }
}

/// Bookkeeping for the double-buffered decay state
#[derive(Debug)]
pub struct BinDecayState {
    roles: BufferRoles,
    bins: u32,
    width: f32,
    updates: u64,
}

impl BinDecayState {
    pub fn new(config: &VisualizerConfig) -> Self {
        Self {
            roles: BufferRoles::default(),
            bins: config.display.output_size as u32,
            width: config.display.bar_width(),
            updates: 0,
        }
    }

    pub fn roles(&self) -> BufferRoles {
        self.roles
    }

    pub fn bins(&self) -> u32 {
        self.bins
    }

    /// Number of update passes issued so far
    pub fn updates(&self) -> u64 {
        self.updates
    }

    /// Zero-height bars at `xs`; the state both buffers start from
    pub fn initial_records(&self, xs: &[f32]) -> Vec<DecayRecord> {
        xs.iter()
            .map(|&x| DecayRecord::bar(x, self.width, BAR_FLOOR, 0.0))
            .collect()
    }

    /// Clear both buffers so the first update sees `held = 0` everywhere
    pub fn zero_fill<S: RenderSurface>(
        &self,
        surface: &mut S,
        xs: &[f32],
    ) -> Result<(), RenderError> {
        let records = self.initial_records(xs);
        surface.upload_static(BufferId::DecayA, bytemuck::cast_slice(&records))?;
        surface.upload_static(BufferId::DecayB, bytemuck::cast_slice(&records))?;
        Ok(())
    }

    /// Issue the update pass: active → inactive, then swap roles
    pub fn update<S: RenderSurface>(&mut self, surface: &mut S) -> Result<(), RenderError> {
        surface.bind_as_capture_target(self.roles.inactive)?;
        surface.bind_as_vertex_input(self.roles.active, RECORD_STRIDE, &["gravity_old"])?;
        surface.draw(Primitive::Points, self.bins)?;
        self.roles.swap();
        self.updates += 1;
        Ok(())
    }

    /// Draw the bars captured by the last update
    pub fn draw_bars<S: RenderSurface>(&self, surface: &mut S) -> Result<(), RenderError> {
        surface.bind_as_vertex_input(self.roles.active, VERTEX_STRIDE, &["gravity_old"])?;
        surface.draw(Primitive::Triangles, self.bins * 6)
    }
}
