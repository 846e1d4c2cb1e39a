use std::fs;
use std::io;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Where a command writes its response document. Built per invocation; no
/// global file handles.
pub enum Output {
    Stdout,
    File(PathBuf),
}

impl Output {
    pub fn new(path: Option<PathBuf>) -> Self {
        match path {
            Some(path) => Output::File(path),
            None => Output::Stdout,
        }
    }

    pub fn write_json<T: Serialize>(&self, value: &T) -> Result<(), OutputError> {
        let mut payload = serde_json::to_string_pretty(value)?;
        payload.push('\n');
        match self {
            Output::Stdout => {
                print!("{payload}");
            }
            Output::File(path) => {
                fs::write(path, payload)?;
            }
        }
        Ok(())
    }
}
