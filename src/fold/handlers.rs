//! Per-kind request handlers. Each one applies its change and commits; the
//! processor owns ordering, retries and deletion.

use crate::error::TimefoldError;
use crate::fold::batch::batch_file_name;
use crate::fold::collector::Collector;
use crate::fold::committer::Committer;
use crate::fold::files::FileRepository;
use crate::fold::mover::{QueueMover, group_entries};
use crate::fold::paths::TimefoldPaths;
use crate::fold::projects::ProjectRepository;
use crate::fold::request::OperationRequest;
use crate::fold::state;
use crate::fold::util::{now_epoch_secs, remove_file_if_exists, write_atomic};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub fn system_clock() -> Clock {
    Arc::new(Utc::now)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerOutcome {
    Committed {
        message: String,
        recorded: bool,
    },
    BatchWritten {
        file_name: String,
        events: usize,
        rejected: usize,
        undeleted: usize,
        recorded: bool,
    },
    Housekeeping {
        files_collected: usize,
        recorded: bool,
    },
    NoOp(&'static str),
}

impl HandlerOutcome {
    /// Whether the committer actually recorded a new commit.
    pub fn recorded_commit(&self) -> bool {
        match self {
            Self::Committed { recorded, .. }
            | Self::BatchWritten { recorded, .. }
            | Self::Housekeeping { recorded, .. } => *recorded,
            Self::NoOp(_) => false,
        }
    }
}

pub struct Handlers {
    paths: TimefoldPaths,
    committer: Arc<dyn Committer>,
    projects: ProjectRepository,
    files: FileRepository,
    mover: QueueMover,
    collector: Arc<Collector>,
    clock: Clock,
}

impl Handlers {
    pub fn new(
        paths: TimefoldPaths,
        committer: Arc<dyn Committer>,
        collector: Arc<Collector>,
        clock: Clock,
    ) -> Self {
        Self {
            projects: ProjectRepository::new(&paths.data_dir),
            files: FileRepository::new(&paths.data_dir),
            mover: QueueMover::new(
                &paths.queue_dir,
                &paths.staging_dir,
                paths.queue_backup_dir(),
            ),
            paths,
            committer,
            collector,
            clock,
        }
    }

    pub fn committer(&self) -> &Arc<dyn Committer> {
        &self.committer
    }

    pub fn collector(&self) -> &Arc<Collector> {
        &self.collector
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    pub fn apply(&self, request: &OperationRequest) -> Result<HandlerOutcome> {
        match request {
            OperationRequest::ProcessBatch => self.process_batch(),
            OperationRequest::Housekeeping => self.housekeeping(),
            OperationRequest::ProjectChange(change) => {
                self.projects.apply(change)?;
                self.commit_request(request)
            }
            OperationRequest::WriteTimeReport(write) | OperationRequest::UpdateProjects(write) => {
                self.files.write(&write.file, &write.body)?;
                self.commit_request(request)
            }
            OperationRequest::Invalid { reason } => {
                Err(TimefoldError::InvalidRequest(reason.clone()).into())
            }
        }
    }

    fn commit_request(&self, request: &OperationRequest) -> Result<HandlerOutcome> {
        let message = request.commit_message();
        let recorded = self.committer.commit(&message)?;
        Ok(HandlerOutcome::Committed { message, recorded })
    }

    fn process_batch(&self) -> Result<HandlerOutcome> {
        self.mover.stage_all()?;
        let staged = self.mover.read_staged()?;
        if staged.entries.is_empty() {
            return Ok(HandlerOutcome::NoOp("queue empty"));
        }

        let batch = group_entries(&staged.entries);
        let file_name = batch_file_name()?;
        let path = self.paths.batches_dir.join(&file_name);

        let written = serde_json::to_vec_pretty(&batch)
            .context("failed to serialize batch")
            .and_then(|body| write_atomic(&path, &body))
            .and_then(|()| self.committer.commit(&format!("processBatch: {file_name}")));
        let recorded = match written {
            Ok(recorded) => recorded,
            Err(err) => {
                if let Err(cleanup) = remove_file_if_exists(&path) {
                    eprintln!("timefold processBatch: {cleanup:#}");
                }
                if let Err(rollback) = self.mover.rollback() {
                    eprintln!("timefold processBatch: rollback failed: {rollback:#}");
                }
                return Err(err);
            }
        };

        let undeleted = self.mover.delete_staged(&staged.entries);
        Ok(HandlerOutcome::BatchWritten {
            file_name,
            events: batch.event_count(),
            rejected: staged.rejected.len(),
            undeleted: undeleted.len(),
            recorded,
        })
    }

    fn housekeeping(&self) -> Result<HandlerOutcome> {
        let now = self.now();
        let today = now.date_naive();
        if state::load(&self.paths)?.last_housekeeping_day == Some(today) {
            return Ok(HandlerOutcome::NoOp("housekeeping already ran today"));
        }

        let collected = self.collector.collect(now)?;
        let recorded = if collected.collected {
            self.committer.commit(&format!(
                "housekeeping: collected {} batch files",
                collected.files_processed
            ))?
        } else {
            false
        };
        self.committer.housekeeping()?;

        let collected_at = now_epoch_secs()?;
        state::update(&self.paths, |s| {
            s.last_housekeeping_day = Some(today);
            s.last_collect_epoch_secs = Some(collected_at);
        })?;
        Ok(HandlerOutcome::Housekeeping {
            files_collected: collected.files_processed,
            recorded,
        })
    }
}
