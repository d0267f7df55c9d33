//! Naming and listing for spool directories: one immutable JSON file per
//! record, named `{millis:013}_{hash12}.json` so lexical order is arrival order.

use crate::fold::util::{fingerprint_hex, now_epoch_millis, write_atomic};
use anyhow::{Context, Result};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub const SPOOL_EXT: &str = "json";
const HASH_LEN: usize = 12;

#[derive(Debug, Default)]
struct NamerState {
    last_millis: u64,
    sequence: u64,
}

/// Hands out strictly increasing millisecond prefixes for one writer.
#[derive(Debug, Default)]
pub struct SpoolNamer {
    state: Mutex<NamerState>,
}

impl SpoolNamer {
    pub fn next_name(&self, content: &[u8]) -> Result<String> {
        let now = now_epoch_millis()?;
        let (millis, sequence) = {
            let mut state = self
                .state
                .lock()
                .map_err(|_| anyhow::anyhow!("spool namer mutex poisoned"))?;
            let millis = if now > state.last_millis {
                now
            } else {
                state.last_millis + 1
            };
            state.last_millis = millis;
            state.sequence += 1;
            (millis, state.sequence)
        };
        Ok(format!(
            "{millis:013}_{}.{SPOOL_EXT}",
            fingerprint_hex(content, sequence, HASH_LEN)
        ))
    }

    /// Write `content` as a new record in `dir` and return its filename.
    pub fn write_new(&self, dir: &Path, content: &[u8]) -> Result<String> {
        fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
        let name = self.next_name(content)?;
        write_atomic(&dir.join(&name), content)?;
        Ok(name)
    }
}

pub fn is_spool_name(name: &str) -> bool {
    let Some(stem) = name.strip_suffix(".json") else {
        return false;
    };
    let Some((millis, hash)) = stem.split_once('_') else {
        return false;
    };
    !millis.is_empty()
        && millis.bytes().all(|b| b.is_ascii_digit())
        && !hash.is_empty()
        && hash.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Spool files in `dir`, ascending by filename. A missing directory is empty.
pub fn list_sorted(dir: &Path) -> Result<Vec<(String, PathBuf)>> {
    let read_dir = match fs::read_dir(dir) {
        Ok(read_dir) => read_dir,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read {}", dir.display()));
        }
    };

    let mut out = Vec::new();
    for entry in read_dir {
        let entry = entry.with_context(|| format!("failed to read {}", dir.display()))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !is_spool_name(name) {
            continue;
        }
        out.push((name.to_string(), path));
    }
    out.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(out)
}
