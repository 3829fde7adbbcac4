//! Event log file discovery.
//!
//! An event log is either a single file or a Spark rolling event log
//! directory (`eventlog_v2_<app>/events_<n>_<app>[.codec]`).

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::{PipelineError, Result};
use crate::pipeline::codec::Codec;

/// Prefix of the numbered files of a rolling event log.
const ROLLING_PREFIX: &str = "events_";

/// One file of an event log, ready to parse.
#[derive(Debug, Clone, PartialEq)]
pub struct EventLogFile {
    pub path: PathBuf,
    pub codec: Codec,
    pub size: u64,
    /// Position `<n>` within a rolling log; `None` for a single-file log.
    pub index: Option<u64>,
}

/// Resolve `path` into the ordered list of files making up the event log.
pub fn resolve_event_files(path: &Path) -> Result<Vec<EventLogFile>> {
    let meta = std::fs::metadata(path).map_err(|e| invalid(path, format!("cannot read: {}", e)))?;

    if meta.is_file() {
        if meta.len() == 0 {
            return Err(invalid(path, "event log is empty"));
        }
        return Ok(vec![EventLogFile {
            path: path.to_path_buf(),
            codec: Codec::from_path(path)?,
            size: meta.len(),
            index: None,
        }]);
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(path)
        .min_depth(1)
        .max_depth(1)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        let Some(index) = rolling_index(&name) else {
            tracing::debug!(file = %name, "Ignoring non-event file in rolling log directory");
            continue;
        };
        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        if size == 0 {
            tracing::debug!(file = %name, "Skipping empty rolling log file");
            continue;
        }
        files.push(EventLogFile {
            path: entry.path().to_path_buf(),
            codec: Codec::from_path(entry.path())?,
            size,
            index: Some(index),
        });
    }

    if files.is_empty() {
        return Err(invalid(path, "directory contains no events_<n>_* event log files"));
    }

    files.sort_by_key(|f| f.index);
    tracing::info!(files = files.len(), "Resolved rolling event log {}", path.display());
    Ok(files)
}

/// `<n>` from `events_<n>_<app>...`.
fn rolling_index(file_name: &str) -> Option<u64> {
    let rest = file_name.strip_prefix(ROLLING_PREFIX)?;
    let digits: &str = rest.split('_').next()?;
    digits.parse().ok()
}

fn invalid(path: &Path, reason: impl Into<String>) -> PipelineError {
    PipelineError::InvalidInput {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rolling_index() {
        assert_eq!(rolling_index("events_1_app-20220330"), Some(1));
        assert_eq!(rolling_index("events_12_app.zstd"), Some(12));
        assert_eq!(rolling_index("appstatus_app-20220330"), None);
        assert_eq!(rolling_index("events_x_app"), None);
    }

    #[test]
    fn test_single_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app-1.gz");
        std::fs::write(&path, b"not really gzip").unwrap();

        let files = resolve_event_files(&path).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].codec, Codec::Gzip);
        assert_eq!(files[0].index, None);
    }

    #[test]
    fn test_rolling_directory_ordered_numerically() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["events_10_app", "events_2_app", "events_1_app", "appstatus_app"] {
            std::fs::write(dir.path().join(name), b"{}\n").unwrap();
        }

        let files = resolve_event_files(dir.path()).unwrap();
        let indexes: Vec<Option<u64>> = files.iter().map(|f| f.index).collect();
        assert_eq!(indexes, vec![Some(1), Some(2), Some(10)]);
    }

    #[test]
    fn test_missing_empty_and_bare_inputs() {
        let dir = tempfile::tempdir().unwrap();

        let err = resolve_event_files(&dir.path().join("nope")).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidInput { .. }));

        let empty = dir.path().join("empty");
        std::fs::write(&empty, b"").unwrap();
        assert!(resolve_event_files(&empty).is_err());

        let bare = dir.path().join("bare");
        std::fs::create_dir(&bare).unwrap();
        std::fs::write(bare.join("appstatus_app"), b"").unwrap();
        assert!(resolve_event_files(&bare).is_err());
    }

    #[test]
    fn test_unsupported_codec_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app-1.lz4");
        std::fs::write(&path, b"data").unwrap();
        assert!(resolve_event_files(&path).is_err());
    }
}
