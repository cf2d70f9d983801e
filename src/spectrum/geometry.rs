//! Static bar positions, decibel gridlines and the view transform.

use glam::Mat4;

/// Gridline levels (dB relative to full scale)
pub const GRIDLINE_DB: [f32; 9] = [0.0, -10.0, -20.0, -30.0, -40.0, -50.0, -60.0, -70.0, -80.0];

/// Vertices in the gridline buffer (two per line)
pub const GRIDLINE_VERTICES: u32 = GRIDLINE_DB.len() as u32 * 2;

/// Bar centers, evenly spaced over [-1, 1] and ascending.
///
/// Bin `i` of `n` sits at the middle of its slot:
/// `((i + 0.5) - n/2) / (n/2)`, so the outermost bars are inset by `1/n`.
pub fn bin_positions(n: usize) -> Vec<f32> {
    let half = n as f32 * 0.5;
    (0..n).map(|i| ((i as f32 + 0.5) - half) / half).collect()
}

/// Horizontal gridlines as line-list vertices.
///
/// y is the level in bels (dB / 20); the line shader applies slope/offset.
pub fn gridlines() -> Vec<[f32; 2]> {
    GRIDLINE_DB
        .iter()
        .flat_map(|db| {
            let y = db / 20.0;
            [[-1.0, y], [1.0, y]]
        })
        .collect()
}

/// Transformation uploaded as `trans` (orthographic unit cube)
pub fn projection() -> Mat4 {
    Mat4::orthographic_rh_gl(-1.0, 1.0, -1.0, 1.0, -1.0, 1.0)
}
