use crate::error::TimefoldError;
use crate::fold::util::write_atomic;
use anyhow::Result;
use serde_json::Value;
use std::path::{Component, Path, PathBuf};

/// Raw file writes under the data directory, keyed by relative path.
#[derive(Debug, Clone)]
pub struct FileRepository {
    root: PathBuf,
}

impl FileRepository {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    pub fn resolve(&self, relative: &str) -> Result<PathBuf> {
        let rel = Path::new(relative.trim());
        let mut has_normal = false;
        for component in rel.components() {
            match component {
                Component::Normal(_) => has_normal = true,
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(TimefoldError::UnsafePath(relative.to_string()).into());
                }
            }
        }
        if !has_normal {
            return Err(TimefoldError::UnsafePath(relative.to_string()).into());
        }
        Ok(self.root.join(rel))
    }

    /// String bodies are written verbatim; anything else as pretty JSON.
    pub fn write(&self, relative: &str, body: &Value) -> Result<PathBuf> {
        let target = self.resolve(relative)?;
        let bytes = match body {
            Value::String(text) => text.clone().into_bytes(),
            other => {
                let mut rendered = serde_json::to_string_pretty(other)?;
                rendered.push('\n');
                rendered.into_bytes()
            }
        };
        write_atomic(&target, &bytes)?;
        Ok(target)
    }
}
