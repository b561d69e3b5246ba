//! Region fragments: captured voxel attributes plus the staged engines that move
//! them between a host world and memory.
#![forbid(unsafe_code)]

mod compare;
mod fragment;
mod read;
mod store;
mod write;

pub use compare::{FragmentMismatch, compare_fragments};
pub use fragment::RegionFragment;
pub use read::{FragmentRead, ReadStage};
pub use write::{FragmentWrite, WriteStage};

/// Filled fraction above which a read uses a dense backing.
pub const DENSE_FILL_THRESHOLD: f64 = 0.25;
