/*============================================================
  Synavera Project: Syn-Pilot
  Module: synpilot_core::runner
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Drain the pending update queue: execute each task through
    the orchestrator and report every outcome to its callback
    endpoint.

  Security / Safety Notes:
    Callback URLs are operator-registered; reports carry
    composer console output and task metadata only.

  Dependencies:
    reqwest for callback POSTs, chrono for wall-clock stamps.

  Operational Scope:
    Invoked by the host scheduler. Tasks run strictly
    sequentially; one failing task never aborts the pass.

  Revision History:
    2025-06-21 COD  Authored queue drain loop.
  ------------------------------------------------------------
  SSE Principles Observed:
    - One report per task, success or failure
    - Queue cleared only after the full pass
    - Unreachable callback endpoints never abort the run
============================================================*/

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use reqwest::header::ACCEPT;

use crate::config::CallbackConfig;
use crate::error::{Result, SynpilotError};
use crate::logger::Logger;
use crate::queue::{QueueState, TaskQueue, UpdateTask};
use crate::updater::UpdateManager;

/// Tally of one drain pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Scheduled task that executes queued updates and reports back.
pub struct QueueRunner {
    queue: TaskQueue,
    manager: UpdateManager,
    client: reqwest::Client,
    logger: Arc<Logger>,
}

impl QueueRunner {
    pub fn new(
        queue: TaskQueue,
        manager: UpdateManager,
        callback: &CallbackConfig,
        logger: Arc<Logger>,
    ) -> Result<Self> {
        let mut builder = reqwest::Client::builder().user_agent("Syn-Pilot-Core/0.6 (linux)");
        if let Some(timeout) = callback.timeout {
            builder = builder.timeout(Duration::from_secs(timeout));
        }
        let client = builder
            .build()
            .map_err(|err| SynpilotError::Network(format!("Failed to build HTTP client: {err}")))?;

        Ok(Self {
            queue,
            manager,
            client,
            logger,
        })
    }

    /// Drain the queue. The queue file is removed after the full
    /// pass; an interrupted run leaves it for the next invocation.
    pub async fn run(&self) -> Result<RunSummary> {
        let mut summary = RunSummary::default();

        if !self.queue.has_task() {
            self.logger.info("QUEUE", "Nothing to do");
            return Ok(summary);
        }

        let tasks = match self.queue.read() {
            QueueState::Pending(tasks) => tasks,
            QueueState::Empty => {
                self.logger
                    .info("QUEUE", "No tasks to run (invalid schedule file format)");
                return Ok(summary);
            }
        };

        if !self.queue.is_writable() {
            let message = format!(
                "\"{}\" should be writable from the user that runs the Syn-Pilot scheduler",
                self.queue.path().display()
            );
            self.logger.error("QUEUE", &message);
            return Err(SynpilotError::Filesystem(message));
        }

        self.logger
            .info("QUEUE", format!("Draining {} task(s)", tasks.len()));

        for task in &tasks {
            summary.processed += 1;
            let start = Utc::now().timestamp();

            if let Err(err) = self.manager.check_composer_version().await {
                self.report(task, start, &err.to_string(), false, None, err.callback_code())
                    .await;
                summary.failed += 1;
                continue;
            }

            let update = if task.is_core_update() {
                self.manager.update_core().await
            } else {
                self.manager.update_packages(&task.packages).await
            };

            let mut output = match update {
                Ok(output) => output,
                Err(err) => {
                    let fallback = self.run_install_to_ensure_all_works().await;
                    self.report(task, start, &err.to_string(), false, Some(fallback), None)
                        .await;
                    summary.failed += 1;
                    continue;
                }
            };

            output.push_str("\n\n");
            output.push_str(&self.manager.run_database_migrations().await);

            // Keep the recorded platform build in step with composer.
            self.manager.set_platform_build().await;

            self.report(task, start, &output, true, None, None).await;
            summary.succeeded += 1;
        }

        self.queue.clear();

        Ok(summary)
    }

    async fn run_install_to_ensure_all_works(&self) -> bool {
        match self.manager.install().await {
            Ok(_) => true,
            Err(err) => {
                self.logger
                    .info("FALLBACK", format!("Recovery install failed: {err}"));
                false
            }
        }
    }

    /// One POST per task. Transport failures are logged and dropped;
    /// the next task must still run.
    async fn report(
        &self,
        task: &UpdateTask,
        start: i64,
        content: &str,
        success: bool,
        fallback_success: Option<bool>,
        error_code: Option<&'static str>,
    ) {
        let mut form: Vec<(&'static str, String)> = vec![
            ("status", if success { "success" } else { "failed" }.into()),
            ("content", content.to_string()),
            ("uuid", task.uuid.clone()),
        ];

        for package in &task.packages {
            form.push(("packages[]", package.clone()));
        }

        form.push(("start_at", start.to_string()));
        form.push(("end_at", Utc::now().timestamp().to_string()));

        if let Some(code) = error_code {
            form.push(("error_code", code.into()));
        }

        if !success {
            let fallback = if fallback_success.unwrap_or(false) {
                "success"
            } else {
                "failed"
            };
            form.push(("fallback_status", fallback.into()));
        }

        let result = self
            .client
            .post(&task.callback_url)
            .header(ACCEPT, "application/json")
            .form(&form)
            .send()
            .await;

        match result {
            Ok(response) => {
                self.logger.debug(
                    "CALLBACK",
                    format!("{} answered {} for {}", task.callback_url, response.status(), task.uuid),
                );
            }
            Err(err) => {
                self.logger.warn(
                    "CALLBACK",
                    format!("Report to {} failed: {err}", task.callback_url),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::composer::tests::{composer_with, fake_composer, write_installed_manifest};
    use crate::queue::CORE_UPDATE_MARKER;
    use crate::updater::tests::{FakeMigrator, RecordingStore, StaticRegistry};
    use mockito::Matcher;
    use std::path::Path;

    /// Fake composer covering the whole drain pass: probes succeed,
    /// core updates succeed, targeted updates conflict, recovery
    /// installs succeed.
    const DRAIN_SCRIPT: &str = r#"echo "$@" >> calls.log
case "$1" in
  --version) echo "Composer version 2.6.5 2023-10-06";;
  show) echo '{"installed":[{"name":"acme/blog","version":"v1.0.0"},{"name":"october/system","version":"v3.5.9"}]}';;
  install) echo "reinstalled";;
  update)
    if [ "$2" = "october/*" ]; then
      echo "core updated"
    else
      echo "version conflict" >&2
      exit 1
    fi;;
esac"#;

    fn runner_for(root: &Path, script: &str, migrator: FakeMigrator) -> QueueRunner {
        let binary = fake_composer(root, script);
        let composer = composer_with(binary, root.to_path_buf(), 600);
        let logger = Arc::new(Logger::new(None, false).expect("logger"));

        let manager = UpdateManager::new(
            composer,
            Arc::new(StaticRegistry::new(&[], &[])),
            Arc::new(migrator),
            Arc::new(RecordingStore::new()),
            logger.clone(),
        );

        QueueRunner::new(
            TaskQueue::at(root.join("update_scheduled")),
            manager,
            &CallbackConfig::default(),
            logger,
        )
        .expect("runner")
    }

    fn logged_calls(root: &Path) -> String {
        std::fs::read_to_string(root.join("calls.log")).unwrap_or_default()
    }

    #[tokio::test]
    async fn empty_queue_is_nothing_to_do() {
        let dir = tempfile::tempdir().expect("tempdir");
        let runner = runner_for(dir.path(), "exit 0", FakeMigrator::new(0, "Migrated"));

        let summary = runner.run().await.expect("run");
        assert_eq!(summary, RunSummary::default());
    }

    #[tokio::test]
    async fn corrupted_queue_is_skipped_and_left_in_place() {
        let dir = tempfile::tempdir().expect("tempdir");
        let runner = runner_for(dir.path(), "exit 0", FakeMigrator::new(0, "Migrated"));
        std::fs::write(dir.path().join("update_scheduled"), "{not json").expect("corrupt queue");

        let summary = runner.run().await.expect("run");
        assert_eq!(summary.processed, 0);
        assert!(dir.path().join("update_scheduled").exists());
    }

    #[tokio::test]
    async fn outdated_composer_reports_composer_2_without_updating() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut server = mockito::Server::new_async().await;

        let mock = server
            .mock("POST", "/callback")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("status".into(), "failed".into()),
                Matcher::UrlEncoded("uuid".into(), "uuid-gate".into()),
                Matcher::UrlEncoded("error_code".into(), "composer-2".into()),
            ]))
            .with_status(200)
            .expect(1)
            .create_async()
            .await;

        let script = "echo \"$@\" >> calls.log\nif [ \"$1\" = \"--version\" ]; then echo \"Composer version 1.10.22 2021-04-27\"; fi";
        let runner = runner_for(dir.path(), script, FakeMigrator::new(0, "Migrated"));
        runner
            .queue
            .register_task(
                vec!["acme/blog".into()],
                "uuid-gate",
                format!("{}/callback", server.url()),
            )
            .expect("register");

        let summary = runner.run().await.expect("run");
        assert_eq!(summary.failed, 1);
        mock.assert_async().await;
        assert!(!logged_calls(dir.path()).contains("update"));
        assert!(!runner.queue.has_task());
    }

    #[tokio::test]
    async fn mixed_pass_reports_both_outcomes_and_clears_the_queue() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_installed_manifest(dir.path(), r#"{"dev":true,"packages":[]}"#);
        let mut server = mockito::Server::new_async().await;

        let core_mock = server
            .mock("POST", "/callback")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("status".into(), "success".into()),
                Matcher::UrlEncoded("uuid".into(), "uuid-core".into()),
                Matcher::UrlEncoded("packages[]".into(), CORE_UPDATE_MARKER.into()),
                Matcher::Regex("core\\+updated".into()),
                Matcher::Regex("Migrated".into()),
            ]))
            .with_status(200)
            .expect(1)
            .create_async()
            .await;

        let failure_mock = server
            .mock("POST", "/callback")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("status".into(), "failed".into()),
                Matcher::UrlEncoded("uuid".into(), "uuid-pkg".into()),
                Matcher::UrlEncoded("packages[]".into(), "acme/blog".into()),
                Matcher::UrlEncoded("fallback_status".into(), "success".into()),
            ]))
            .with_status(200)
            .expect(1)
            .create_async()
            .await;

        let runner = runner_for(
            dir.path(),
            DRAIN_SCRIPT,
            FakeMigrator::new(0, "Migrated: 2 tables"),
        );
        let callback_url = format!("{}/callback", server.url());
        runner
            .queue
            .register_task(vec![CORE_UPDATE_MARKER.into()], "uuid-core", &callback_url)
            .expect("register core");
        runner
            .queue
            .register_task(vec!["acme/blog".into()], "uuid-pkg", &callback_url)
            .expect("register package");

        let summary = runner.run().await.expect("run");
        assert_eq!(summary.processed, 2);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 1);

        core_mock.assert_async().await;
        failure_mock.assert_async().await;

        // Exactly one recovery install ran, for the failed task.
        let calls = logged_calls(dir.path());
        assert_eq!(calls.matches("install").count(), 1);
        assert!(!runner.queue.has_task());
    }

    #[tokio::test]
    async fn unreachable_callback_does_not_abort_the_pass() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_installed_manifest(dir.path(), r#"{"dev":true,"packages":[]}"#);

        let runner = runner_for(dir.path(), DRAIN_SCRIPT, FakeMigrator::new(0, "Migrated"));
        runner
            .queue
            .register_task(
                vec![CORE_UPDATE_MARKER.into()],
                "uuid-core",
                "http://127.0.0.1:9/callback",
            )
            .expect("register");

        let summary = runner.run().await.expect("run");
        assert_eq!(summary.succeeded, 1);
        assert!(!runner.queue.has_task());
    }
}
