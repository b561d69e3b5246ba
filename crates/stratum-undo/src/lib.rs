//! Layered undo for region writes: capture a pre-image while writing, roll back later
//! even when newer writes overlap, and keep a bounded per-world history.
#![forbid(unsafe_code)]

mod capture;
mod history;
mod layer;
mod rollback;

pub use capture::{CaptureAndWrite, CaptureStage};
pub use history::{HistoryEntry, OwnerId, TransactionId, WorldHistory};
pub use layer::{SharedUndoLayer, UndoLayer};
pub use rollback::{UndoChanges, UndoStage, UndoTransaction};

/// Cells of context captured around every write.
pub const BORDER_WIDTH: usize = 1;
