//! Uniform blocks and the name → field mapping of the shader contract.

use bytemuck::{Pod, Zeroable};
use glam::Mat4;

use super::{RenderError, UniformValue};
use crate::params::BAR_FLOOR;
use crate::spectrum::DecayParams;

/// Uniform buffer for the bar shader
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct BarUniforms {
    pub trans: [[f32; 4]; 4],
    pub top_color: [f32; 4],
    pub bot_color: [f32; 4],
    pub floor: f32,
    pub offset: f32,
    pub _padding: [f32; 2], // Round up to 16-byte multiple
}

impl Default for BarUniforms {
    fn default() -> Self {
        Self {
            trans: Mat4::IDENTITY.to_cols_array_2d(),
            top_color: [1.0; 4],
            bot_color: [1.0; 4],
            floor: BAR_FLOOR,
            offset: 1.0,
            _padding: [0.0; 2],
        }
    }
}

/// Uniform buffer for the gridline shader
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct LineUniforms {
    pub trans: [[f32; 4]; 4],
    pub line_color: [f32; 4],
    pub slope: f32,
    pub offset: f32,
    pub _padding: [f32; 2],
}

impl Default for LineUniforms {
    fn default() -> Self {
        Self {
            trans: Mat4::IDENTITY.to_cols_array_2d(),
            line_color: [1.0; 4],
            slope: 1.0,
            offset: 0.0,
            _padding: [0.0; 2],
        }
    }
}

/// All uniform state of the three shaders
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct UniformSet {
    pub decay: DecayParams,
    pub bars: BarUniforms,
    pub lines: LineUniforms,
}

impl UniformSet {
    /// Assign a contract uniform by name; shared names update every block using them
    pub fn set(&mut self, name: &str, value: UniformValue) -> Result<(), RenderError> {
        match name {
            "fft_scale" => self.decay.fft_scale = scalar(name, value)?,
            "width" => self.decay.width = scalar(name, value)?,
            "gravity" => self.decay.gravity = scalar(name, value)?,
            "slope" => {
                let v = scalar(name, value)?;
                self.decay.slope = v;
                self.lines.slope = v;
            }
            "offset" => {
                let v = scalar(name, value)?;
                self.decay.offset = v;
                self.lines.offset = v;
                self.bars.offset = v;
            }
            "top_color" => self.bars.top_color = vec4(name, value)?,
            "bot_color" => self.bars.bot_color = vec4(name, value)?,
            "line_color" => self.lines.line_color = vec4(name, value)?,
            "trans" => {
                let m = mat4(name, value)?.to_cols_array_2d();
                self.bars.trans = m;
                self.lines.trans = m;
            }
            other => return Err(RenderError::UnknownUniform(other.to_string())),
        }
        Ok(())
    }
}

fn scalar(name: &str, value: UniformValue) -> Result<f32, RenderError> {
    match value {
        UniformValue::Scalar(v) => Ok(v),
        _ => Err(type_error(name, "scalar")),
    }
}

fn vec4(name: &str, value: UniformValue) -> Result<[f32; 4], RenderError> {
    match value {
        UniformValue::Vec4(v) => Ok(v),
        _ => Err(type_error(name, "vec4")),
    }
}

fn mat4(name: &str, value: UniformValue) -> Result<Mat4, RenderError> {
    match value {
        UniformValue::Mat4(m) => Ok(m),
        _ => Err(type_error(name, "mat4")),
    }
}

fn type_error(name: &str, expected: &'static str) -> RenderError {
    RenderError::UniformType {
        name: name.to_string(),
        expected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_sizes_match_wgsl() {
        assert_eq!(std::mem::size_of::<BarUniforms>(), 112);
        assert_eq!(std::mem::size_of::<LineUniforms>(), 96);
        assert_eq!(std::mem::size_of::<DecayParams>(), 32);
    }

    #[test]
    fn test_shared_names_fan_out() {
        let mut set = UniformSet::default();
        set.set("offset", UniformValue::Scalar(0.75)).unwrap();
        assert_eq!(set.decay.offset, 0.75);
        assert_eq!(set.lines.offset, 0.75);
        assert_eq!(set.bars.offset, 0.75);

        let m = Mat4::from_scale(glam::Vec3::splat(2.0));
        set.set("trans", UniformValue::Mat4(m)).unwrap();
        assert_eq!(set.bars.trans, m.to_cols_array_2d());
        assert_eq!(set.lines.trans, m.to_cols_array_2d());
    }

    #[test]
    fn test_rejects_unknown_and_mistyped() {
        let mut set = UniformSet::default();
        assert!(matches!(
            set.set("brightness", UniformValue::Scalar(1.0)),
            Err(RenderError::UnknownUniform(_))
        ));
        assert!(matches!(
            set.set("top_color", UniformValue::Scalar(1.0)),
            Err(RenderError::UniformType { .. })
        ));
    }
}
