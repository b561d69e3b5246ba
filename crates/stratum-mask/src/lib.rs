//! Bit-per-cell membership masks over bounded cuboids.
#![forbid(unsafe_code)]

pub mod codec;
mod mask;
mod origin;

pub use codec::MaskDecodeError;
pub use mask::{MAX_DIM, VoxelMask};
pub use origin::VoxelMaskWithOrigin;
