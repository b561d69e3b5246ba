//! Voxel block values, opaque payloads, and per-type orientation rules.
#![forbid(unsafe_code)]

pub mod equivalence;
pub mod rules;
pub mod types;

pub use equivalence::MaterialEquivalence;
pub use rules::{ConfigError, VariantRules};
pub use types::{Block, BlockId, FloatingObject, ObjectId, TilePayload, Variant};
