use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TimefoldError {
    #[error("lock {path} not acquired within {waited_ms}ms")]
    LockTimeout { path: PathBuf, waited_ms: u64 },
    #[error("refusing path outside the data directory: {0}")]
    UnsafePath(String),
    #[error("request cannot be applied: {0}")]
    InvalidRequest(String),
    #[error("config file invalid or unreadable: {0}")]
    InvalidConfig(String),
    #[error("no project assignment for {branch}/{directory}")]
    UnknownAssignment { branch: String, directory: String },
}

impl TimefoldError {
    pub fn code(&self) -> TimefoldErrorCode {
        match self {
            Self::LockTimeout { .. } => TimefoldErrorCode::E001Locked,
            Self::UnsafePath(_) => TimefoldErrorCode::E002UnsafePath,
            Self::InvalidRequest(_) => TimefoldErrorCode::E003InvalidRequest,
            Self::InvalidConfig(_) => TimefoldErrorCode::E004ConfigInvalid,
            Self::UnknownAssignment { .. } => TimefoldErrorCode::E005UnknownAssignment,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimefoldErrorCode {
    E001Locked,
    E002UnsafePath,
    E003InvalidRequest,
    E004ConfigInvalid,
    E005UnknownAssignment,
    E006Quarantined,
    E007CollectFailed,
}

impl TimefoldErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::E001Locked => "E001_LOCKED",
            Self::E002UnsafePath => "E002_UNSAFE_PATH",
            Self::E003InvalidRequest => "E003_INVALID_REQUEST",
            Self::E004ConfigInvalid => "E004_CONFIG_INVALID",
            Self::E005UnknownAssignment => "E005_UNKNOWN_ASSIGNMENT",
            Self::E006Quarantined => "E006_QUARANTINED",
            Self::E007CollectFailed => "E007_COLLECT_FAILED",
        }
    }
}
