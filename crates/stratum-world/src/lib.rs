//! Host world capability consumed by region I/O, plus an in-memory host.
#![forbid(unsafe_code)]

mod access;
mod memory;

pub use access::{ClientId, WorldAccess};
pub use memory::{MemoryWorld, MemoryWorldStats};
