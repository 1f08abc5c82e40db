//! The handle file: the running client's pid at a well-known path
//!
//! The client writes it itself (`--writepid`), so a later invocation of this
//! program can find the process to terminate.

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HandleError {
    #[error("Failed to read {}: {source}", path.display())]
    ReadError {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{} does not contain a pid: {content:?}", path.display())]
    InvalidPid { path: PathBuf, content: String },
}

#[derive(Debug, Clone)]
pub struct TunnelHandle {
    path: PathBuf,
}

impl TunnelHandle {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The recorded pid, or `None` when there is no handle file
    pub fn read_pid(&self) -> Result<Option<u32>, HandleError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(HandleError::ReadError {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        let trimmed = content.trim();
        match trimmed.parse::<u32>() {
            Ok(pid) if pid > 0 => Ok(Some(pid)),
            _ => Err(HandleError::InvalidPid {
                path: self.path.clone(),
                content: trimmed.to_string(),
            }),
        }
    }

    /// Remove the file; `Ok(false)` if it was already gone
    pub fn remove(&self) -> io::Result<bool> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }
}
