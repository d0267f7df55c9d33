pub mod collect;
pub mod drain;
pub mod enqueue;
pub mod status;
pub mod touch;
pub mod watch;

use anyhow::Result;
use serde::Serialize;

use crate::fold::config::{TimefoldConfig, load_config};
use crate::fold::paths::{TimefoldPaths, resolve_paths};

#[derive(Debug, Clone, Serialize)]
pub struct CommandReport {
    pub command: String,
    pub ok: bool,
    pub details: Vec<String>,
    pub issues: Vec<String>,
}

impl CommandReport {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ok: true,
            details: Vec::new(),
            issues: Vec::new(),
        }
    }

    pub fn detail(&mut self, text: impl Into<String>) {
        self.details.push(text.into());
    }

    pub fn issue(&mut self, text: impl Into<String>) {
        self.ok = false;
        self.issues.push(text.into());
    }
}

/// Paths and config as every command sees them.
pub fn load_runtime() -> Result<(TimefoldPaths, TimefoldConfig)> {
    let paths = resolve_paths()?;
    let cfg = load_config(&paths.home)?;
    Ok((paths, cfg))
}
