/*============================================================
  Synavera Project: Syn-Pilot
  Module: synpilot_core::queue
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Persist pending update tasks as a single JSON document so
    the scheduled runner can drain work registered by the
    request-handling bridge between invocations.

  Security / Safety Notes:
    The queue file lives under the operator-controlled storage
    root; content is data only and never executed.

  Dependencies:
    serde/serde_json for the task document, libc for the
    writability probe.

  Operational Scope:
    Append-side used by the bridge when an update is requested;
    drain-side used by the runner. At most one runner at a time
    is assumed (host single-flight cron), not enforced.

  Revision History:
    2025-06-18 COD  Authored durable task queue.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Malformed state degrades to empty, never to a stuck queue
    - Explicit tagged queue state instead of sentinel booleans
    - Best-effort clear keeps the drain loop unblockable
============================================================*/

use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, SynpilotError};

/// Queue entry registered by the bridge for a core update.
pub const CORE_UPDATE_MARKER: &str = "october";

/// One requested unit of update work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateTask {
    pub packages: Vec<String>,
    pub uuid: String,
    #[serde(rename = "callbackUrl")]
    pub callback_url: String,
}

impl UpdateTask {
    /// True when the entry is the core-update marker task.
    pub fn is_core_update(&self) -> bool {
        self.packages.len() == 1 && self.packages[0] == CORE_UPDATE_MARKER
    }
}

/// Parsed state of the persisted queue file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueState {
    Empty,
    Pending(Vec<UpdateTask>),
}

/// File-backed FIFO of pending update tasks.
pub struct TaskQueue {
    path: PathBuf,
}

impl TaskQueue {
    /// Bind the queue to its well-known storage path.
    pub fn at<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    /// Path backing this queue.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one task, preserving any previously queued entries.
    pub fn register_task(
        &self,
        packages: Vec<String>,
        uuid: impl Into<String>,
        callback_url: impl Into<String>,
    ) -> Result<()> {
        let mut tasks = self.get_tasks();
        tasks.push(UpdateTask {
            packages,
            uuid: uuid.into(),
            callback_url: callback_url.into(),
        });

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|err| {
                SynpilotError::Filesystem(format!(
                    "Failed to create queue directory {}: {err}",
                    parent.display()
                ))
            })?;
        }

        let document = serde_json::to_string(&tasks).map_err(|err| {
            SynpilotError::Serialization(format!("Failed to encode task queue: {err}"))
        })?;

        std::fs::write(&self.path, document).map_err(|err| {
            SynpilotError::Filesystem(format!(
                "Failed to write queue file {}: {err}",
                self.path.display()
            ))
        })?;

        Ok(())
    }

    /// True iff the queue file exists, regardless of its content.
    pub fn has_task(&self) -> bool {
        self.path.exists()
    }

    /// Read the persisted queue. Unreadable or malformed content is
    /// treated as an empty queue, never as an error.
    pub fn read(&self) -> QueueState {
        let Ok(content) = std::fs::read_to_string(&self.path) else {
            return QueueState::Empty;
        };

        match serde_json::from_str::<Vec<UpdateTask>>(&content) {
            Ok(tasks) if !tasks.is_empty() => QueueState::Pending(tasks),
            _ => QueueState::Empty,
        }
    }

    /// Vec view of `read()` for callers that do not branch on state.
    pub fn get_tasks(&self) -> Vec<UpdateTask> {
        match self.read() {
            QueueState::Empty => Vec::new(),
            QueueState::Pending(tasks) => tasks,
        }
    }

    /// Best-effort removal of the queue file.
    pub fn clear(&self) {
        let _ = std::fs::remove_file(&self.path);
    }

    /// Whether the executing process may write the queue path. Probes
    /// the file itself, falling back to its parent directory while the
    /// file does not exist yet.
    pub fn is_writable(&self) -> bool {
        if self.path.exists() {
            return access_writable(&self.path);
        }

        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => access_writable(parent),
            _ => access_writable(Path::new(".")),
        }
    }
}

fn access_writable(path: &Path) -> bool {
    let Ok(cpath) = CString::new(path.as_os_str().as_bytes()) else {
        return false;
    };
    unsafe { libc::access(cpath.as_ptr(), libc::W_OK) == 0 }
}
