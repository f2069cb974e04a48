/*============================================================
  Synavera Project: Syn-Pilot
  Module: synpilot_core::composer
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Drive the composer binary for targeted package updates,
    recovery installs, and environment probes, normalising
    output and failure modes for the orchestration layer.

  Security / Safety Notes:
    Executes composer with the privileges of the scheduler
    user only; the binary path is taken from operator
    configuration or a fixed system directory list.

  Dependencies:
    tokio::process for async command execution.

  Operational Scope:
    Supplies the update orchestrator with process-level
    operations; never called directly by the bridge layer.

  Revision History:
    2025-06-18 COD  Crafted composer integration layer.
    2025-07-02 COD  Applied the update wall-clock cap to the
                    recovery install as well.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Deterministic command invocation with explicit checks
    - Structured parsing with clear failure modes
    - Dev/no-dev profile preserved across invocations
============================================================*/

use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::process::Command;

use crate::config::ComposerConfig;
use crate::error::{Result, SynpilotError};
use crate::logger::{LogLevel, Logger};

/// Composer package name of the October core, used for build lookups.
const OCTOBER_SYSTEM_PACKAGE: &str = "october/system";

/// Manifest composer maintains next to the installed dependency tree.
const INSTALLED_MANIFEST: &str = "vendor/composer/installed.json";

/// A direct dependency reported by `composer show`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledPackage {
    pub name: String,
    pub version: String,
}

/// Outcome of one composer invocation.
struct ProcessOutcome {
    success: bool,
    status: i32,
    stdout: String,
    stderr: String,
    command: String,
}

/// Async wrapper around the composer binary for one project root.
pub struct Composer {
    binary: Option<PathBuf>,
    bin_dirs: Vec<PathBuf>,
    project_root: PathBuf,
    timeout: Duration,
    logger: Arc<Logger>,
}

impl Composer {
    /// Bind composer to a project root using operator configuration.
    pub fn new(config: &ComposerConfig, project_root: PathBuf, logger: Arc<Logger>) -> Self {
        Self {
            binary: config.binary.clone(),
            bin_dirs: config.bin_dirs.clone(),
            project_root,
            timeout: Duration::from_secs(config.timeout),
            logger,
        }
    }

    /// Run `composer update` scoped to exactly the given packages, with
    /// transitive dependencies and the detected dev/no-dev profile.
    pub async fn update_packages(&self, packages: &[String]) -> Result<String> {
        if packages.is_empty() {
            return Err(SynpilotError::Runtime("No package provided".into()));
        }

        let mut parts: Vec<String> = vec!["update".into()];
        parts.extend(packages.iter().cloned());
        if let Some(flag) = self.dev_flag()? {
            parts.push(flag.into());
        }
        parts.push("--with-dependencies".into());

        let outcome = self.run(&parts, Some(self.timeout)).await?;

        if !outcome.success {
            self.logger.block(
                LogLevel::Error,
                "COMPOSER",
                format!("{}\n{}", outcome.command, outcome.stderr),
            );
            return Err(SynpilotError::CommandFailure {
                command: outcome.command,
                status: outcome.status,
                stderr: outcome.stderr,
            });
        }

        Ok(format!("{}\n{}", outcome.stderr, outcome.stdout))
    }

    /// Run a full `composer install`, the recovery step after a failed
    /// update. An undetectable dev profile is tolerated here.
    pub async fn install(&self) -> Result<String> {
        let mut parts: Vec<String> = vec!["install".into()];
        if let Ok(Some(flag)) = self.dev_flag() {
            parts.push(flag.into());
        }

        let outcome = self.run(&parts, Some(self.timeout)).await?;

        if outcome.success {
            self.logger.block(
                LogLevel::Info,
                "COMPOSER",
                format!("{}\n{}{}", outcome.command, outcome.stderr, outcome.stdout),
            );
            return Ok(format!("{}\n{}", outcome.stderr, outcome.stdout));
        }

        self.logger.block(
            LogLevel::Error,
            "COMPOSER",
            format!("{}\n{}", outcome.command, outcome.stderr),
        );
        Err(SynpilotError::CommandFailure {
            command: outcome.command,
            status: outcome.status,
            stderr: outcome.stderr,
        })
    }

    /// True when the composer binary answers the version probe.
    #[allow(dead_code)]
    pub async fn is_installed(&self) -> bool {
        match self.run(&["--version".into()], None).await {
            Ok(outcome) => outcome.success,
            Err(_) => false,
        }
    }

    /// Semantic version token from the composer banner.
    pub async fn version(&self) -> Result<String> {
        let probe = self.run(&["--version".into()], None).await;

        let outcome = match probe {
            Ok(outcome) if outcome.success => outcome,
            _ => {
                return Err(SynpilotError::CommandMissing {
                    command: "composer".into(),
                })
            }
        };

        parse_version_banner(&outcome.stdout).ok_or_else(|| {
            SynpilotError::Runtime(format!(
                "Unable to parse composer version banner `{}`",
                outcome.stdout.trim()
            ))
        })
    }

    /// Direct installed dependencies via `composer show`. Returns None
    /// when the underlying call fails; an undecodable payload yields an
    /// empty list, matching the lenient probe contract.
    pub async fn list_packages(&self) -> Option<Vec<InstalledPackage>> {
        let parts: Vec<String> = vec!["show".into(), "--direct".into(), "--format=json".into()];

        let outcome = match self.run(&parts, None).await {
            Ok(outcome) if outcome.success => outcome,
            _ => return None,
        };

        Some(parse_show_document(&outcome.stdout))
    }

    /// Recover whether the last install included dev dependencies from
    /// composer's installed manifest. Hard failure when undetectable:
    /// a blind update would silently change the dependency profile.
    pub fn is_dev_packages_installed(&self) -> Result<bool> {
        let path = self.project_root.join(INSTALLED_MANIFEST);

        if !path.exists() {
            return Err(SynpilotError::ManifestMissing {
                path: INSTALLED_MANIFEST.into(),
            });
        }

        let content = std::fs::read_to_string(&path).map_err(|err| {
            SynpilotError::Filesystem(format!(
                "Failed to read manifest {}: {err}",
                path.display()
            ))
        })?;

        let document: serde_json::Value = serde_json::from_str(&content).map_err(|_| {
            SynpilotError::ManifestInvalid {
                path: INSTALLED_MANIFEST.into(),
            }
        })?;

        match document.get("dev").and_then(|value| value.as_bool()) {
            Some(dev) => Ok(dev),
            None => Err(SynpilotError::ManifestInvalid {
                path: INSTALLED_MANIFEST.into(),
            }),
        }
    }

    /// Installed version of the October core package, if any.
    pub async fn system_core_version(&self) -> Option<String> {
        let packages = self.list_packages().await?;

        packages
            .into_iter()
            .find(|package| package.name.eq_ignore_ascii_case(OCTOBER_SYSTEM_PACKAGE))
            .map(|package| package.version)
    }

    fn dev_flag(&self) -> Result<Option<&'static str>> {
        Ok(if self.is_dev_packages_installed()? {
            None
        } else {
            Some("--no-dev")
        })
    }

    /// Resolve the argv prefix for composer. A configured binary is
    /// used verbatim; otherwise the PHP interpreter and the composer
    /// executable are located in the standard system directories.
    fn resolve_argv(&self) -> Result<Vec<String>> {
        if let Some(binary) = &self.binary {
            return Ok(vec![binary.to_string_lossy().into_owned()]);
        }

        let php = find_executable("php", &self.bin_dirs).ok_or_else(|| {
            SynpilotError::CommandMissing {
                command: "php".into(),
            }
        })?;

        let composer = find_executable("composer", &self.bin_dirs)
            .unwrap_or_else(|| PathBuf::from("composer"));

        Ok(vec![
            php.to_string_lossy().into_owned(),
            composer.to_string_lossy().into_owned(),
        ])
    }

    async fn run(&self, parts: &[String], timeout: Option<Duration>) -> Result<ProcessOutcome> {
        let mut argv = self.resolve_argv()?;
        argv.extend(parts.iter().cloned());
        argv.push("--no-ansi".into());
        let command = argv.join(" ");

        let mut process = Command::new(&argv[0]);
        process
            .args(&argv[1..])
            .current_dir(&self.project_root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = process
            .spawn()
            .map_err(|err| map_spawn_error(err, &argv[0]))?;

        let output = match timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
                Ok(result) => result,
                Err(_) => {
                    return Err(SynpilotError::Runtime(format!(
                        "Command `{command}` timed out after {}s",
                        limit.as_secs()
                    )));
                }
            },
            None => child.wait_with_output().await,
        }
        .map_err(|err| SynpilotError::Runtime(format!("Failed to run `{command}`: {err}")))?;

        Ok(ProcessOutcome {
            success: output.status.success(),
            status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            command,
        })
    }
}

/// Extract the version token from composer's self-reported banner,
/// e.g. `Composer version 2.7.1 2024-02-09 15:26:28` -> `2.7.1`.
fn parse_version_banner(output: &str) -> Option<String> {
    let cleaned = output.replace("Composer version", "").replace("Composer", "");

    cleaned
        .split_whitespace()
        .next()
        .map(|token| token.to_string())
}

#[derive(Debug, Deserialize)]
struct ShowDocument {
    #[serde(default)]
    installed: Vec<ShowEntry>,
}

#[derive(Debug, Deserialize)]
struct ShowEntry {
    name: String,
    version: String,
}

fn parse_show_document(payload: &str) -> Vec<InstalledPackage> {
    let Ok(document) = serde_json::from_str::<ShowDocument>(payload) else {
        return Vec::new();
    };

    document
        .installed
        .into_iter()
        .map(|entry| InstalledPackage {
            name: entry.name,
            version: strip_version_prefix(&entry.version),
        })
        .collect()
}

/// Strip a single leading `v` from a version string.
pub fn strip_version_prefix(version: &str) -> String {
    version
        .strip_prefix('v')
        .unwrap_or(version)
        .to_string()
}

fn find_executable(name: &str, extra_dirs: &[PathBuf]) -> Option<PathBuf> {
    let path_dirs = std::env::var_os("PATH")
        .map(|value| std::env::split_paths(&value).collect::<Vec<_>>())
        .unwrap_or_default();

    path_dirs
        .iter()
        .chain(extra_dirs.iter())
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
}

fn is_executable(path: &Path) -> bool {
    use std::os::unix::ffi::OsStrExt;

    let Ok(cpath) = std::ffi::CString::new(path.as_os_str().as_bytes()) else {
        return false;
    };
    unsafe { libc::access(cpath.as_ptr(), libc::X_OK) == 0 }
}

fn map_spawn_error(err: io::Error, command: &str) -> SynpilotError {
    if err.kind() == io::ErrorKind::NotFound {
        SynpilotError::CommandMissing {
            command: command.into(),
        }
    } else {
        SynpilotError::Runtime(format!("Failed to spawn {command}: {err}"))
    }
}
