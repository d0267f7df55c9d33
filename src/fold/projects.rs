use crate::error::TimefoldError;
use crate::fold::request::{ProjectAction, ProjectChange};
use crate::fold::util::write_atomic;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectMap {
    /// branch → directory → project
    pub assignments: BTreeMap<String, BTreeMap<String, String>>,
    /// Projects known by name but not bound to any branch/directory yet.
    pub unbound: BTreeSet<String>,
}

impl ProjectMap {
    pub fn project_for(&self, branch: &str, directory: &str) -> Option<&str> {
        self.assignments
            .get(branch)
            .and_then(|dirs| dirs.get(directory))
            .map(String::as_str)
    }
}

/// Read-modify-write access to `{data}/projects.json`.
#[derive(Debug, Clone)]
pub struct ProjectRepository {
    path: PathBuf,
}

fn required<'a>(value: Option<&'a str>, field: &str, action: ProjectAction) -> Result<&'a str> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        Some(v) => Ok(v),
        None => Err(TimefoldError::InvalidRequest(format!(
            "projectChange {} requires `{field}`",
            action.as_str()
        ))
        .into()),
    }
}

impl ProjectRepository {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join("projects.json"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<ProjectMap> {
        if !self.path.exists() {
            return Ok(ProjectMap::default());
        }
        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        let parsed = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse {}", self.path.display()))?;
        Ok(parsed)
    }

    fn save(&self, map: &ProjectMap) -> Result<()> {
        let data = serde_json::to_string_pretty(map)?;
        write_atomic(&self.path, format!("{data}\n").as_bytes())
    }

    pub fn apply(&self, change: &ProjectChange) -> Result<ProjectMap> {
        let mut map = self.load()?;
        let action = change.action;
        match action {
            ProjectAction::Add | ProjectAction::Update => {
                let branch = required(change.branch.as_deref(), "branch", action)?;
                let directory = required(change.directory.as_deref(), "directory", action)?;
                let project = required(change.project.as_deref(), "project", action)?;
                if action == ProjectAction::Update && map.project_for(branch, directory).is_none()
                {
                    return Err(TimefoldError::UnknownAssignment {
                        branch: branch.to_string(),
                        directory: directory.to_string(),
                    }
                    .into());
                }
                map.assignments
                    .entry(branch.to_string())
                    .or_default()
                    .insert(directory.to_string(), project.to_string());
                map.unbound.remove(project);
            }
            ProjectAction::Delete => {
                let branch = required(change.branch.as_deref(), "branch", action)?;
                let directory = required(change.directory.as_deref(), "directory", action)?;
                if let Some(dirs) = map.assignments.get_mut(branch) {
                    dirs.remove(directory);
                    if dirs.is_empty() {
                        map.assignments.remove(branch);
                    }
                }
            }
            ProjectAction::AddUnbound => {
                let project = required(change.project.as_deref(), "project", action)?;
                map.unbound.insert(project.to_string());
            }
        }
        self.save(&map)?;
        Ok(map)
    }
}
