//! Resumable selection generation: box, flood fill, and contour fills over a host world.
#![forbid(unsafe_code)]

mod builder;
mod strategy;

pub use builder::{SelectStage, SelectionBuilder, SelectionError};
pub use strategy::{Axis, FillMatcher, FillStrategy};

/// Clear cells kept between an unbounded fill and the edge of the largest mask.
pub const BORDER_ALLOWANCE: i32 = 2;
