use crate::error::TimefoldError;
use crate::fold::request::{OperationRequest, PendingRequest};
use crate::fold::spool::{SpoolNamer, list_sorted};
use crate::fold::util::{move_file, remove_file_if_exists};
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Directory of pending operation requests, one file each.
#[derive(Debug)]
pub struct RequestStore {
    dir: PathBuf,
    namer: SpoolNamer,
}

impl RequestStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            namer: SpoolNamer::default(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persist `request` and return the filename it was stored under.
    pub fn add(&self, request: &OperationRequest) -> Result<String> {
        if let OperationRequest::Invalid { reason } = request {
            return Err(TimefoldError::InvalidRequest(format!(
                "refusing to enqueue an invalid request: {reason}"
            ))
            .into());
        }
        let body = serde_json::to_vec_pretty(request)
            .with_context(|| format!("failed to serialize {} request", request.kind()))?;
        self.namer.write_new(&self.dir, &body)
    }

    /// Every pending request in arrival order. Unreadable files come back as
    /// [`OperationRequest::Invalid`] so they still count toward quarantine.
    pub fn list_pending(&self) -> Result<Vec<PendingRequest>> {
        let mut out = Vec::new();
        for (file_name, path) in list_sorted(&self.dir)? {
            let request = match fs::read_to_string(&path) {
                Ok(raw) => match serde_json::from_str::<OperationRequest>(&raw) {
                    Ok(request) => request,
                    Err(err) => OperationRequest::Invalid {
                        reason: format!("parse failed: {err}"),
                    },
                },
                Err(err) => OperationRequest::Invalid {
                    reason: format!("read failed: {err}"),
                },
            };
            out.push(PendingRequest { file_name, request });
        }
        Ok(out)
    }

    pub fn delete(&self, file_name: &str) -> Result<()> {
        remove_file_if_exists(&self.dir.join(file_name))
    }

    /// Move the request file, unmodified, into `backup_dir` under the same name.
    pub fn quarantine(&self, file_name: &str, backup_dir: &Path) -> Result<PathBuf> {
        let target = backup_dir.join(file_name);
        move_file(&self.dir.join(file_name), &target)
            .with_context(|| format!("failed to quarantine {file_name}"))?;
        Ok(target)
    }

    pub fn pending_count(&self) -> Result<usize> {
        Ok(list_sorted(&self.dir)?.len())
    }
}
