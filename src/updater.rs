/*============================================================
  Synavera Project: Syn-Pilot
  Module: synpilot_core::updater
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Orchestrate composer-level updates: resolve plugin codes,
    enforce environment preconditions, run targeted or core
    updates, and drive post-update housekeeping.

  Security / Safety Notes:
    The update path refuses packages absent from the installed
    set, so it can never be used to introduce new dependencies.

  Dependencies:
    semver for the composer version gate.

  Operational Scope:
    Invoked per task by the queue runner; collaborators are
    injected at construction and owned for the run.

  Revision History:
    2025-06-21 COD  Authored update orchestration layer.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Preconditions checked before any mutating subprocess
    - Per-item lookup results folded, not exception-swallowed
    - Housekeeping failures never mask the update outcome
============================================================*/

use std::collections::HashSet;
use std::sync::Arc;

use crate::composer::Composer;
use crate::error::{Result, SynpilotError};
use crate::logger::Logger;
use crate::marketplace::PluginRegistry;
use crate::platform::{MigrationRunner, SettingsStore};
use crate::resolver::normalize_version;

/// Umbrella packages updated together as "the core".
const CORE_PACKAGES: [&str; 2] = ["october/*", "laravel/framework"];

/// Total attempts granted to the migration step.
const MIGRATION_ATTEMPTS: u32 = 2;

/// Composer-level update orchestrator for one managed project.
pub struct UpdateManager {
    composer: Composer,
    plugins: Arc<dyn PluginRegistry>,
    migrator: Arc<dyn MigrationRunner>,
    settings: Arc<dyn SettingsStore>,
    logger: Arc<Logger>,
}

impl UpdateManager {
    pub fn new(
        composer: Composer,
        plugins: Arc<dyn PluginRegistry>,
        migrator: Arc<dyn MigrationRunner>,
        settings: Arc<dyn SettingsStore>,
        logger: Arc<Logger>,
    ) -> Self {
        Self {
            composer,
            plugins,
            migrator,
            settings,
            logger,
        }
    }

    /// Update the packages behind the given plugin codes. Codes that
    /// fail to resolve are skipped; an empty resolution is an error.
    #[allow(dead_code)]
    pub async fn update_plugin(&self, plugins: &[String]) -> Result<String> {
        let packages = self.composer_packages_from_plugin_codes(plugins).await;

        if packages.is_empty() {
            return Err(SynpilotError::PluginNotFound);
        }

        self.update_packages(&packages).await
    }

    /// Update exactly the given installed packages. Requesting a
    /// package outside the installed set is refused by name.
    pub async fn update_packages(&self, packages: &[String]) -> Result<String> {
        self.check_composer_version().await?;

        let installed: HashSet<String> = self
            .composer
            .list_packages()
            .await
            .unwrap_or_default()
            .into_iter()
            .map(|package| package.name)
            .collect();

        let missing: Vec<String> = packages
            .iter()
            .filter(|package| !installed.contains(*package))
            .cloned()
            .collect();

        if !missing.is_empty() {
            return Err(SynpilotError::PackageNotInstalled { packages: missing });
        }

        self.composer.update_packages(packages).await
    }

    /// Update the platform core as one unit.
    pub async fn update_core(&self) -> Result<String> {
        self.check_composer_version().await?;

        let packages: Vec<String> = CORE_PACKAGES.iter().map(|p| p.to_string()).collect();
        self.composer.update_packages(&packages).await
    }

    /// Full reinstall, the recovery path after a failed update.
    pub async fn install(&self) -> Result<String> {
        self.composer.install().await
    }

    /// Apply pending migrations with a bounded retry. The final
    /// failure is swallowed; whatever output was captured is returned
    /// for inclusion in the task report.
    pub async fn run_database_migrations(&self) -> String {
        let mut last_output = String::new();

        for attempt in 1..=MIGRATION_ATTEMPTS {
            match self.migrator.migrate().await {
                Ok(output) => return output,
                Err(err) => {
                    self.logger.warn(
                        "MIGRATE",
                        format!("Attempt {attempt}/{MIGRATION_ATTEMPTS} failed: {err}"),
                    );
                    last_output = err.to_string();
                }
            }
        }

        last_output
    }

    /// Per-code registry lookup folded into the resolvable subset.
    pub async fn composer_packages_from_plugin_codes(&self, plugins: &[String]) -> Vec<String> {
        let mut packages = Vec::new();

        for code in plugins {
            match self.plugins.plugin_package(code).await {
                Ok(Some(package)) => packages.push(package),
                Ok(None) => {
                    self.logger
                        .debug("PLUGIN", format!("{code} has no composer package"));
                }
                Err(err) => {
                    self.logger
                        .debug("PLUGIN", format!("Lookup for {code} skipped: {err}"));
                }
            }
        }

        packages
    }

    /// The update path requires composer 2; below that the solver
    /// rewrites lock files incompatibly.
    pub async fn check_composer_version(&self) -> Result<()> {
        let version = self.composer.version().await?;

        let outdated = match normalize_version(&version) {
            Some(parsed) => parsed.major < 2,
            None => true,
        };

        if outdated {
            return Err(SynpilotError::ComposerOutdated { version });
        }

        Ok(())
    }

    /// Record the freshly installed core build in the settings store.
    /// Advisory bookkeeping only; every failure path is logged and
    /// dropped.
    pub async fn set_platform_build(&self) {
        let Some(version) = self.composer.system_core_version().await else {
            return;
        };

        let Some(build) = build_from_version(&version) else {
            return;
        };

        if let Err(err) = self.settings.set_build(&build) {
            self.logger
                .warn("BUILD", format!("Failed to record build {build}: {err}"));
        }
    }
}

/// Trailing build number of a 3-component version string,
/// eg: 1.2.3 -> 3, 1.2.3-dev -> 3.
fn build_from_version(version: &str) -> Option<String> {
    let parts: Vec<&str> = version.split('.').collect();
    if parts.len() != 3 {
        return None;
    }

    let mut last = parts[2];
    if !is_numeric(last) {
        last = last.split('-').next().unwrap_or_default();
    }

    if !is_numeric(last) {
        return None;
    }

    Some(last.to_string())
}

fn is_numeric(token: &str) -> bool {
    !token.is_empty() && token.chars().all(|c| c.is_ascii_digit())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::composer::tests::{composer_with, fake_composer, write_installed_manifest};
    use crate::error::Result;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::Mutex;

    pub(crate) struct StaticRegistry {
        entries: HashMap<String, Option<String>>,
        failing: Vec<String>,
    }

    impl StaticRegistry {
        pub(crate) fn new(
            entries: &[(&str, Option<&str>)],
            failing: &[&str],
        ) -> Self {
            Self {
                entries: entries
                    .iter()
                    .map(|(code, package)| {
                        ((*code).to_string(), package.map(|p| p.to_string()))
                    })
                    .collect(),
                failing: failing.iter().map(|c| c.to_string()).collect(),
            }
        }
    }

    #[async_trait]
    impl crate::marketplace::PluginRegistry for StaticRegistry {
        async fn plugin_package(&self, code: &str) -> Result<Option<String>> {
            if self.failing.iter().any(|c| c == code) {
                return Err(SynpilotError::Network("gateway unreachable".into()));
            }
            Ok(self.entries.get(code).cloned().flatten())
        }
    }

    pub(crate) struct FakeMigrator {
        failures_left: Mutex<u32>,
        output: String,
    }

    impl FakeMigrator {
        pub(crate) fn new(failures: u32, output: &str) -> Self {
            Self {
                failures_left: Mutex::new(failures),
                output: output.to_string(),
            }
        }
    }

    #[async_trait]
    impl MigrationRunner for FakeMigrator {
        async fn migrate(&self) -> Result<String> {
            let mut left = self.failures_left.lock().expect("lock");
            if *left > 0 {
                *left -= 1;
                return Err(SynpilotError::Runtime("deadlock on migrations table".into()));
            }
            Ok(self.output.clone())
        }
    }

    pub(crate) struct RecordingStore {
        pub(crate) build: Mutex<Option<String>>,
    }

    impl RecordingStore {
        pub(crate) fn new() -> Self {
            Self {
                build: Mutex::new(None),
            }
        }
    }

    impl SettingsStore for RecordingStore {
        fn set_build(&self, build: &str) -> Result<()> {
            *self.build.lock().expect("lock") = Some(build.to_string());
            Ok(())
        }
    }

    pub(crate) fn manager_for(root: &Path, script: &str) -> UpdateManager {
        manager_with(root, script, StaticRegistry::new(&[], &[]), FakeMigrator::new(0, "Migrated"))
    }

    pub(crate) fn manager_with(
        root: &Path,
        script: &str,
        registry: StaticRegistry,
        migrator: FakeMigrator,
    ) -> UpdateManager {
        let binary = fake_composer(root, script);
        let composer = composer_with(binary, root.to_path_buf(), 600);
        let logger = Arc::new(Logger::new(None, false).expect("logger"));

        UpdateManager::new(
            composer,
            Arc::new(registry),
            Arc::new(migrator),
            Arc::new(RecordingStore::new()),
            logger,
        )
    }

    /// Fake composer that records every invocation in `calls.log` so
    /// tests can assert which subprocesses ran.
    fn recording_script(version: &str, installed_json: &str) -> String {
        format!(
            "echo \"$@\" >> calls.log\ncase \"$1\" in\n  --version) echo \"Composer version {version} 2024-02-09\";;\n  show) echo '{installed_json}';;\n  update) echo \"updated $2\";;\n  install) echo \"reinstalled\";;\nesac"
        )
    }

    fn logged_calls(root: &Path) -> String {
        std::fs::read_to_string(root.join("calls.log")).unwrap_or_default()
    }

    #[tokio::test]
    async fn missing_packages_are_refused_by_name_without_updating() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_installed_manifest(dir.path(), r#"{"dev":true,"packages":[]}"#);
        let manager = manager_for(
            dir.path(),
            &recording_script(
                "2.6.5",
                r#"{"installed":[{"name":"acme/kernel","version":"1.0.0"}]}"#,
            ),
        );

        let err = manager
            .update_packages(&["acme/kernel".into(), "acme/blog".into(), "acme/shop".into()])
            .await
            .expect_err("must fail");

        match err {
            SynpilotError::PackageNotInstalled { packages } => {
                assert_eq!(packages, vec!["acme/blog".to_string(), "acme/shop".to_string()]);
            }
            other => panic!("unexpected error: {other:?}"),
        }

        assert!(!logged_calls(dir.path()).contains("update"));
    }

    #[tokio::test]
    async fn composer_one_fails_the_gate_before_any_subprocess_update() {
        let dir = tempfile::tempdir().expect("tempdir");
        let manager = manager_for(
            dir.path(),
            &recording_script("1.10.22", r#"{"installed":[]}"#),
        );

        let err = manager
            .update_packages(&["acme/blog".into()])
            .await
            .expect_err("must fail");

        assert!(matches!(err, SynpilotError::ComposerOutdated { .. }));
        assert_eq!(err.callback_code(), Some("composer-2"));
        assert!(!logged_calls(dir.path()).contains("update"));
    }

    #[tokio::test]
    async fn installed_packages_update_through_composer() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_installed_manifest(dir.path(), r#"{"dev":true,"packages":[]}"#);
        let manager = manager_for(
            dir.path(),
            &recording_script(
                "2.6.5",
                r#"{"installed":[{"name":"acme/blog","version":"1.0.0"}]}"#,
            ),
        );

        let output = manager
            .update_packages(&["acme/blog".into()])
            .await
            .expect("update");
        assert!(output.contains("updated acme/blog"));
    }

    #[tokio::test]
    async fn core_update_targets_the_umbrella_packages() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_installed_manifest(dir.path(), r#"{"dev":true,"packages":[]}"#);
        let manager = manager_for(
            dir.path(),
            &recording_script("2.6.5", r#"{"installed":[]}"#),
        );

        let output = manager.update_core().await.expect("core update");
        assert!(output.contains("updated october/*"));

        let calls = logged_calls(dir.path());
        assert!(calls.contains("update october/* laravel/framework"));
    }

    #[tokio::test]
    async fn plugin_codes_fold_into_the_resolvable_subset() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_installed_manifest(dir.path(), r#"{"dev":true,"packages":[]}"#);
        let registry = StaticRegistry::new(
            &[
                ("Acme.Blog", Some("acme/blog-plugin")),
                ("Acme.Ghost", None),
            ],
            &["Acme.Flaky"],
        );
        let manager = manager_with(
            dir.path(),
            &recording_script(
                "2.6.5",
                r#"{"installed":[{"name":"acme/blog-plugin","version":"1.0.0"}]}"#,
            ),
            registry,
            FakeMigrator::new(0, "Migrated"),
        );

        let output = manager
            .update_plugin(&[
                "Acme.Blog".into(),
                "Acme.Ghost".into(),
                "Acme.Flaky".into(),
            ])
            .await
            .expect("plugin update");
        assert!(output.contains("updated acme/blog-plugin"));
    }

    #[tokio::test]
    async fn wholly_unresolvable_plugin_lists_are_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = StaticRegistry::new(&[("Acme.Ghost", None)], &["Acme.Flaky"]);
        let manager = manager_with(
            dir.path(),
            &recording_script("2.6.5", r#"{"installed":[]}"#),
            registry,
            FakeMigrator::new(0, "Migrated"),
        );

        let err = manager
            .update_plugin(&["Acme.Ghost".into(), "Acme.Flaky".into()])
            .await
            .expect_err("must fail");
        assert!(matches!(err, SynpilotError::PluginNotFound));
    }

    #[tokio::test]
    async fn migrations_retry_once_and_swallow_the_final_failure() {
        let dir = tempfile::tempdir().expect("tempdir");
        let manager = manager_with(
            dir.path(),
            "exit 0",
            StaticRegistry::new(&[], &[]),
            FakeMigrator::new(1, "Migrated: 2 tables"),
        );
        assert_eq!(manager.run_database_migrations().await, "Migrated: 2 tables");

        let manager = manager_with(
            dir.path(),
            "exit 0",
            StaticRegistry::new(&[], &[]),
            FakeMigrator::new(5, "never reached"),
        );
        let output = manager.run_database_migrations().await;
        assert!(output.contains("deadlock on migrations table"));
    }

    #[tokio::test]
    async fn platform_build_is_extracted_from_the_core_version() {
        let dir = tempfile::tempdir().expect("tempdir");
        let binary = fake_composer(
            dir.path(),
            &recording_script(
                "2.6.5",
                r#"{"installed":[{"name":"october/system","version":"v3.5.9"}]}"#,
            ),
        );
        let composer = composer_with(binary, dir.path().to_path_buf(), 600);
        let logger = Arc::new(Logger::new(None, false).expect("logger"));
        let store = Arc::new(RecordingStore::new());

        let manager = UpdateManager::new(
            composer,
            Arc::new(StaticRegistry::new(&[], &[])),
            Arc::new(FakeMigrator::new(0, "Migrated")),
            store.clone(),
            logger,
        );

        manager.set_platform_build().await;
        assert_eq!(store.build.lock().expect("lock").as_deref(), Some("9"));
    }

    #[test]
    fn build_extraction_follows_the_three_component_rule() {
        assert_eq!(build_from_version("1.2.3"), Some("3".to_string()));
        assert_eq!(build_from_version("1.2.3-dev"), Some("3".to_string()));
        assert_eq!(build_from_version("3.5.475"), Some("475".to_string()));
        assert_eq!(build_from_version("1.2"), None);
        assert_eq!(build_from_version("1.2.x"), None);
        assert_eq!(build_from_version("1.2.3.4"), None);
    }
}
