use anyhow::{Context, Result};

use crate::commands::{CommandReport, load_runtime};
use crate::fold::request::OperationRequest;
use crate::fold::request_store::RequestStore;

pub fn run(raw_request: &str) -> Result<CommandReport> {
    let mut report = CommandReport::new("enqueue");
    let request: OperationRequest = serde_json::from_str(raw_request)
        .context("request must be JSON with a known `type`")?;

    let (paths, _cfg) = load_runtime()?;
    let store = RequestStore::new(&paths.requests_dir);
    let file_name = store.add(&request)?;

    report.detail(format!("type={}", request.kind()));
    report.detail(format!("file={file_name}"));
    report.detail(format!("requests_dir={}", paths.requests_dir.display()));
    Ok(report)
}
