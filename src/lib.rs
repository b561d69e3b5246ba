//! Region copy, rotate and undo over a voxel world, driven a tick at a time.
#![forbid(unsafe_code)]

pub mod config;
pub mod logging;
pub mod service;

pub use config::{ConfigError, ServiceConfig};
pub use service::{Refusal, RegionService, ServiceStatus, TransactionIds};
