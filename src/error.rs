use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Error kinds surfaced by the mapping run.
///
/// `Config` and `IoOpen` are fatal at startup. `IoRead` and `IoWrite` are
/// fatal mid-run: the worker that hits one flips the stop flag and the error
/// is re-raised after all workers have joined. `BadRecord` is recovered
/// locally by the Read Source (skip with a warning).
#[derive(Debug, Error)]
pub enum MapError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("could not open {}: {source}", path.display())]
    IoOpen { path: PathBuf, source: io::Error },

    #[error("read error on {}: {source}", path.display())]
    IoRead { path: PathBuf, source: io::Error },

    #[error("write error: {0}")]
    IoWrite(io::Error),

    #[error("malformed record: {0}")]
    BadRecord(String),
}

impl MapError {
    pub fn open(path: &std::path::Path, source: io::Error) -> Self {
        MapError::IoOpen {
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn read(path: &std::path::Path, source: io::Error) -> Self {
        MapError::IoRead {
            path: path.to_path_buf(),
            source,
        }
    }
}
