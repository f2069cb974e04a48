/*============================================================
  Synavera Project: Syn-Pilot
  Module: synpilot_core::platform
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1
  ------------------------------------------------------------
  Purpose:
    Host-platform collaborators for the update orchestrator:
    the schema migration runner and the advisory build store.

  Security / Safety Notes:
    The migration runner executes the site's own artisan
    entry point with scheduler privileges; the build store
    writes a small advisory document under the storage root.

  Dependencies:
    tokio::process for artisan execution, serde_json for the
    build record.

  Operational Scope:
    Default implementations injected at construction; tests
    and embedders may substitute their own.

  Revision History:
    2025-06-20 COD  Authored platform collaborator layer.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Collaborators injected explicitly, never global
    - Idempotent migration entry point, safe to retry
    - Advisory state failures never block reporting
============================================================*/

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use tokio::process::Command;

use crate::error::{Result, SynpilotError};

/// Applies pending schema migrations. Idempotent, safe to retry.
#[async_trait]
pub trait MigrationRunner: Send + Sync {
    /// Run pending migrations and return the console output.
    async fn migrate(&self) -> Result<String>;
}

/// Durable advisory store for the last known platform build.
pub trait SettingsStore: Send + Sync {
    fn set_build(&self, build: &str) -> Result<()>;
}

/// Runs `php artisan october:migrate` inside the project root.
pub struct ArtisanMigrator {
    project_root: PathBuf,
}

impl ArtisanMigrator {
    pub fn new(project_root: PathBuf) -> Self {
        Self { project_root }
    }
}

#[async_trait]
impl MigrationRunner for ArtisanMigrator {
    async fn migrate(&self) -> Result<String> {
        let output = Command::new("php")
            .arg("artisan")
            .arg("october:migrate")
            .current_dir(&self.project_root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|err| {
                if err.kind() == std::io::ErrorKind::NotFound {
                    SynpilotError::CommandMissing {
                        command: "php".into(),
                    }
                } else {
                    SynpilotError::Runtime(format!("Failed to spawn php artisan: {err}"))
                }
            })?;

        if !output.status.success() {
            return Err(SynpilotError::CommandFailure {
                command: "php artisan october:migrate".into(),
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Build record persisted for the bridge layer to read back.
#[derive(Debug, Serialize)]
struct BuildRecord<'a> {
    build: &'a str,
    recorded_at: String,
}

/// JSON-file implementation of the advisory build store.
pub struct FileSettingsStore {
    path: PathBuf,
}

impl FileSettingsStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl SettingsStore for FileSettingsStore {
    fn set_build(&self, build: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|err| {
                SynpilotError::Filesystem(format!(
                    "Failed to create settings directory {}: {err}",
                    parent.display()
                ))
            })?;
        }

        let record = BuildRecord {
            build,
            recorded_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        };

        let document = serde_json::to_string(&record).map_err(|err| {
            SynpilotError::Serialization(format!("Failed to encode build record: {err}"))
        })?;

        std::fs::write(&self.path, document).map_err(|err| {
            SynpilotError::Filesystem(format!(
                "Failed to write build record {}: {err}",
                self.path.display()
            ))
        })
    }
}
