//! Operation requests as persisted in the request spool.
//!
//! Each request is one JSON file with a `type` discriminator:
//!
//! ```text
//! {"type":"processBatch"}
//! {"type":"projectChange","action":"add","branch":"main","directory":"/w/p","project":"Acme"}
//! {"type":"writeTimeReport","file":"reports/2024-05.json","body":{...}}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProjectAction {
    Add,
    Update,
    Delete,
    AddUnbound,
}

impl ProjectAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::AddUnbound => "addUnbound",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectChange {
    pub action: ProjectAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileWrite {
    /// Path relative to the data directory.
    pub file: String,
    pub body: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum OperationRequest {
    ProcessBatch,
    Housekeeping,
    ProjectChange(ProjectChange),
    WriteTimeReport(FileWrite),
    UpdateProjects(FileWrite),
    /// A spooled file that did not parse. Never written back to disk.
    #[serde(skip)]
    Invalid { reason: String },
}

impl OperationRequest {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ProcessBatch => "processBatch",
            Self::Housekeeping => "housekeeping",
            Self::ProjectChange(_) => "projectChange",
            Self::WriteTimeReport(_) => "writeTimeReport",
            Self::UpdateProjects(_) => "updateProjects",
            Self::Invalid { .. } => "invalid",
        }
    }

    /// Commit message for the handlers that commit exactly what the request
    /// names. `processBatch` and `housekeeping` build their own.
    pub fn commit_message(&self) -> String {
        match self {
            Self::ProjectChange(change) => format!(
                "{}: {} {}/{}",
                self.kind(),
                change.action.as_str(),
                change.branch.as_deref().unwrap_or(""),
                change.directory.as_deref().unwrap_or("")
            ),
            Self::WriteTimeReport(write) | Self::UpdateProjects(write) => {
                format!("{}: {}", self.kind(), write.file)
            }
            Self::ProcessBatch | Self::Housekeeping | Self::Invalid { .. } => {
                self.kind().to_string()
            }
        }
    }
}

/// A request read back from the spool, keyed by its filename.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingRequest {
    pub file_name: String,
    pub request: OperationRequest,
}
