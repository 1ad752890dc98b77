// Call logging sinks
//
// Request/response traffic is written to dedicated JSONL sinks under
// `logs/llm/...`, `logs/embedding/...`, `logs/vector/...`, optionally inside
// a `batch-<id>/` subdirectory. Sinks are process-wide; writes are
// serialized per sink behind a mutex. Retention prunes per category by file
// count (most-recent wins) and by age in days, sparing files currently
// open.
//
// The batch id is scoped task-local state: initialized at request entry and
// restored on exit, so concurrent requests never observe each other's
// batches.

use chrono::Utc;
use serde_json::Value;
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;

use crate::sanitize::sanitize_id;

/// Log categories with their own subdirectory and retention knobs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogCategory {
    Llm,
    Embedding,
    Vector,
}

impl LogCategory {
    fn dir_name(&self) -> &'static str {
        match self {
            LogCategory::Llm => "llm",
            LogCategory::Embedding => "embedding",
            LogCategory::Vector => "vector",
        }
    }

    fn env_prefix(&self) -> &'static str {
        match self {
            LogCategory::Llm => "LLM_ADAPTER_LLM_LOG",
            LogCategory::Embedding => "LLM_ADAPTER_EMBEDDING_LOG",
            LogCategory::Vector => "LLM_ADAPTER_VECTOR_LOG",
        }
    }
}

/// Per-category retention limits
#[derive(Debug, Clone, Copy, Default)]
pub struct Retention {
    pub max_files: Option<usize>,
    pub max_age_days: Option<u32>,
}

impl Retention {
    /// Read `<PREFIX>_MAX_FILES` / `<PREFIX>_MAX_AGE_DAYS`
    fn from_env(category: LogCategory) -> Self {
        fn read<T: std::str::FromStr>(category: LogCategory, suffix: &str) -> Option<T> {
            std::env::var(format!("{}_{}", category.env_prefix(), suffix))
                .ok()
                .and_then(|v| v.trim().parse().ok())
        }
        Self {
            max_files: read(category, "MAX_FILES"),
            max_age_days: read(category, "MAX_AGE_DAYS"),
        }
    }
}

// ============================================================================
// Batch id scoping
// ============================================================================

tokio::task_local! {
    static BATCH_ID: Option<String>;
}

/// Run `fut` with the given batch id visible to every sink opened inside
pub async fn with_batch_id<F>(batch_id: Option<String>, fut: F) -> F::Output
where
    F: std::future::Future,
{
    let sanitized = batch_id.map(|id| sanitize_id(&id));
    BATCH_ID.scope(sanitized, fut).await
}

/// Batch id for the current task: the scoped value, else the
/// `LLM_ADAPTER_BATCH_ID` environment default
pub fn current_batch_id() -> Option<String> {
    let scoped = BATCH_ID.try_with(|id| id.clone()).ok().flatten();
    scoped.or_else(|| {
        std::env::var("LLM_ADAPTER_BATCH_ID")
            .ok()
            .filter(|v| !v.is_empty())
            .map(|v| sanitize_id(&v))
    })
}

fn file_logs_disabled() -> bool {
    std::env::var("LLM_ADAPTER_DISABLE_FILE_LOGS").as_deref() == Ok("1")
}

/// Whether the console sink should be skipped (read by the server binary)
pub fn console_logs_disabled() -> bool {
    std::env::var("LLM_ADAPTER_DISABLE_CONSOLE_LOGS").as_deref() == Ok("1")
}

fn batch_dir_layout() -> bool {
    std::env::var("LLM_ADAPTER_BATCH_DIR").as_deref() == Ok("1")
}

// ============================================================================
// Call logger
// ============================================================================

/// JSONL sink for one call
///
/// No-op when file logs are disabled; write failures are logged once and
/// never fail the call.
pub struct CallLogger {
    inner: Option<Mutex<CallLogFile>>,
}

struct CallLogFile {
    file: File,
    path: PathBuf,
}

impl CallLogger {
    /// Open a sink for one call in the given category.
    ///
    /// The path is `<root>/<category>/[batch-<id>/]<timestamp>-<call_id>.log`.
    /// Opening also runs retention for the category directory.
    pub fn open(root: &Path, category: LogCategory, call_id: &str) -> Self {
        if file_logs_disabled() {
            return Self { inner: None };
        }

        let mut dir = root.join(category.dir_name());
        if batch_dir_layout() {
            if let Some(batch) = current_batch_id() {
                dir = dir.join(format!("batch-{batch}"));
            }
        }

        let filename = format!(
            "{}-{}.log",
            Utc::now().format("%Y%m%dT%H%M%S%.3f"),
            sanitize_id(call_id)
        );
        let path = dir.join(filename);

        let file = fs::create_dir_all(&dir)
            .and_then(|_| OpenOptions::new().create(true).append(true).open(&path));

        match file {
            Ok(file) => {
                let mut exclude = HashSet::new();
                exclude.insert(path.clone());
                prune_directory(&dir, Retention::from_env(category), &exclude);
                Self {
                    inner: Some(Mutex::new(CallLogFile { file, path })),
                }
            }
            Err(e) => {
                warn!(error = %e, dir = %dir.display(), "failed to open call log sink");
                Self { inner: None }
            }
        }
    }

    /// Disabled sink (used by tests and when logging is off)
    pub fn disabled() -> Self {
        Self { inner: None }
    }

    /// Append one JSONL event
    pub fn log(&self, event: &Value) {
        let Some(inner) = &self.inner else { return };
        let Ok(mut guard) = inner.lock() else { return };
        let line = serde_json::to_string(event).unwrap_or_default();
        if let Err(e) = writeln!(guard.file, "{line}") {
            warn!(error = %e, path = %guard.path.display(), "call log write failed");
        }
    }

    /// Path of the open sink, when enabled
    pub fn path(&self) -> Option<PathBuf> {
        self.inner
            .as_ref()
            .and_then(|m| m.lock().ok().map(|g| g.path.clone()))
    }
}

// ============================================================================
// Retention
// ============================================================================

/// Prune `.log` files in `dir` down to the retention limits. Files in
/// `exclude` (currently open) are spared; most recent files win the count
/// cut.
pub fn prune_directory(dir: &Path, retention: Retention, exclude: &HashSet<PathBuf>) {
    if retention.max_files.is_none() && retention.max_age_days.is_none() {
        return;
    }

    let Ok(entries) = fs::read_dir(dir) else { return };
    let mut files: Vec<(PathBuf, std::time::SystemTime)> = entries
        .flatten()
        .filter_map(|entry| {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("log") {
                return None;
            }
            if exclude.contains(&path) {
                return None;
            }
            let modified = entry.metadata().ok()?.modified().ok()?;
            Some((path, modified))
        })
        .collect();

    // Newest first
    files.sort_by(|a, b| b.1.cmp(&a.1));

    let mut doomed: Vec<&PathBuf> = Vec::new();

    if let Some(max_files) = retention.max_files {
        // The excluded (open) file occupies one slot
        let keep = max_files.saturating_sub(exclude.len().min(max_files));
        doomed.extend(files.iter().skip(keep).map(|(p, _)| p));
    }

    if let Some(max_age_days) = retention.max_age_days {
        let cutoff =
            std::time::SystemTime::now() - std::time::Duration::from_secs(max_age_days as u64 * 86_400);
        doomed.extend(
            files
                .iter()
                .filter(|(_, modified)| *modified < cutoff)
                .map(|(p, _)| p),
        );
    }

    doomed.sort();
    doomed.dedup();
    for path in doomed {
        if let Err(e) = fs::remove_file(path) {
            warn!(error = %e, path = %path.display(), "failed to prune log file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn touch(dir: &Path, name: &str, age_secs: u64) -> PathBuf {
        let path = dir.join(name);
        File::create(&path).unwrap();
        let mtime = std::time::SystemTime::now() - std::time::Duration::from_secs(age_secs);
        let file = File::options().write(true).open(&path).unwrap();
        file.set_modified(mtime).unwrap();
        path
    }

    #[test]
    fn prune_by_count_keeps_most_recent() {
        let dir = tempfile::tempdir().unwrap();
        let old = touch(dir.path(), "a.log", 300);
        let mid = touch(dir.path(), "b.log", 200);
        let new = touch(dir.path(), "c.log", 100);

        prune_directory(
            dir.path(),
            Retention {
                max_files: Some(2),
                max_age_days: None,
            },
            &HashSet::new(),
        );

        assert!(!old.exists());
        assert!(mid.exists());
        assert!(new.exists());
    }

    #[test]
    fn prune_by_age_removes_stale_files() {
        let dir = tempfile::tempdir().unwrap();
        let stale = touch(dir.path(), "stale.log", 3 * 86_400);
        let fresh = touch(dir.path(), "fresh.log", 3_600);

        prune_directory(
            dir.path(),
            Retention {
                max_files: None,
                max_age_days: Some(1),
            },
            &HashSet::new(),
        );

        assert!(!stale.exists());
        assert!(fresh.exists());
    }

    #[test]
    fn open_files_are_spared() {
        let dir = tempfile::tempdir().unwrap();
        let open = touch(dir.path(), "open.log", 10 * 86_400);
        let mut exclude = HashSet::new();
        exclude.insert(open.clone());

        prune_directory(
            dir.path(),
            Retention {
                max_files: Some(0),
                max_age_days: Some(1),
            },
            &exclude,
        );

        assert!(open.exists());
    }

    #[test]
    fn non_log_files_are_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let other = touch(dir.path(), "data.txt", 10 * 86_400);
        prune_directory(
            dir.path(),
            Retention {
                max_files: Some(0),
                max_age_days: None,
            },
            &HashSet::new(),
        );
        assert!(other.exists());
    }

    #[tokio::test]
    async fn logger_writes_jsonl_under_category_dir() {
        let root = tempfile::tempdir().unwrap();
        let logger = CallLogger::open(root.path(), LogCategory::Llm, "call.one");
        logger.log(&json!({"event": "request", "n": 1}));
        logger.log(&json!({"event": "response", "n": 2}));

        let path = logger.path().unwrap();
        assert!(path.starts_with(root.path().join("llm")));
        let contents = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["event"], "request");
    }

    #[tokio::test]
    async fn batch_id_is_task_scoped() {
        let outer = current_batch_id();
        let inner = with_batch_id(Some("run/42".to_string()), async {
            current_batch_id()
        })
        .await;
        // Sanitized and only visible inside the scope
        assert_eq!(inner.as_deref(), Some("run_42"));
        assert_eq!(outer, current_batch_id());
    }
}
