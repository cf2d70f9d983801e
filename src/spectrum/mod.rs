//! Bar layout and the gravity decay state.

mod decay;
mod geometry;

pub use decay::{
    bar_height, decay_kernel, gravity_step, BinDecayState, BufferRoles, DecayParams, DecayRecord,
};
pub use geometry::{bin_positions, gridlines, projection, GRIDLINE_DB, GRIDLINE_VERTICES};
