//! Logger setup for the binary. Library crates only use the `log` facade.

use log::LevelFilter;
use std::fs::File;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum LogInitError {
    #[error("cannot create log file {path}: {source}")]
    File {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    AlreadySet(#[from] log::SetLoggerError),
}

/// Log to `file` when given, else to stderr through `env_logger` with `level` as
/// the fallback filter (`RUST_LOG` still wins).
pub fn init(level: &str, file: Option<&Path>) -> Result<(), LogInitError> {
    match file {
        Some(path) => {
            let out = File::create(path).map_err(|source| LogInitError::File {
                path: path.display().to_string(),
                source,
            })?;
            let filter = level.parse::<LevelFilter>().unwrap_or(LevelFilter::Info);
            simplelog::WriteLogger::init(filter, simplelog::Config::default(), out)?;
        }
        None => {
            env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).try_init()?;
        }
    }
    Ok(())
}
