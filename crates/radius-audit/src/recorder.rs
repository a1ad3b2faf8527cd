//! The audit recorder and its sinks.

use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use radius_config::AuditSettings;
use radius_core::{CanonicalEvent, PipelineResult};
use tracing::debug;

use crate::entry::AuditEntry;

/// Records audit entries to the configured sinks.
///
/// The file sink is synchronous; webhook and OTLP sinks are fire-and-forget
/// `tokio::spawn` posts so the pipeline never waits on the network. A file
/// append failure pushes the line into an in-memory fallback buffer, which
/// the next successful append flushes.
pub struct AuditRecorder {
    settings: AuditSettings,
    file_path: Option<PathBuf>,
    fallback: Mutex<Vec<String>>,
    client: reqwest::Client,
}

impl AuditRecorder {
    /// Build a recorder from audit settings.
    #[must_use]
    pub fn new(settings: AuditSettings) -> Self {
        let file_path = settings.file.as_ref().map(PathBuf::from);
        Self {
            settings,
            file_path,
            fallback: Mutex::new(Vec::new()),
            client: reqwest::Client::new(),
        }
    }

    /// Record an event entering the pipeline.
    pub fn record_event(&self, event: &CanonicalEvent) {
        let entry = AuditEntry::for_event(
            event,
            self.settings.include_arguments,
            self.settings.include_results,
        );
        self.emit(&entry);
    }

    /// Record a completed pipeline result for an event.
    pub fn record_result(&self, event: &CanonicalEvent, result: &PipelineResult) {
        let entry = AuditEntry::for_result(
            event,
            result,
            self.settings.include_arguments,
            self.settings.include_results,
        );
        self.emit(&entry);
    }

    /// Lines currently parked in the fallback buffer (test support).
    #[must_use]
    pub fn fallback_len(&self) -> usize {
        self.fallback
            .lock()
            .map(|buffer| buffer.len())
            .unwrap_or(0)
    }

    fn emit(&self, entry: &AuditEntry) {
        let line = entry.to_line();

        if self.settings.stdout {
            println!("{line}");
        }

        if self.file_path.is_some() {
            self.append_to_file(&line);
        }

        if let Some(url) = &self.settings.webhook_url {
            self.post_remote(url.clone(), serde_json::json!({ "entry": entry }));
        }

        if let Some(url) = &self.settings.otlp_url {
            self.post_remote(url.clone(), entry.to_otlp());
        }
    }

    /// Synchronous append; failures buffer the line, successes flush the
    /// buffer first so ordering is preserved.
    fn append_to_file(&self, line: &str) {
        let Some(path) = &self.file_path else {
            return;
        };
        let result = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut file| {
                let mut buffer = self
                    .fallback
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner);
                for buffered in buffer.drain(..) {
                    writeln!(file, "{buffered}")?;
                }
                writeln!(file, "{line}")
            });

        if let Err(err) = result {
            eprintln!("radius audit: file sink failed ({err}), buffering entry");
            if let Ok(mut buffer) = self.fallback.lock() {
                buffer.push(line.to_owned());
            }
        }
    }

    /// Fire-and-forget POST; errors go to stderr only.
    fn post_remote(&self, url: String, body: serde_json::Value) {
        let client = self.client.clone();
        let timeout = Duration::from_millis(self.settings.webhook_timeout_ms);
        if tokio::runtime::Handle::try_current().is_err() {
            // No runtime (synchronous caller in tests); skip remote sinks.
            debug!(url = %url, "no async runtime, skipping remote audit sink");
            return;
        }
        tokio::spawn(async move {
            let outcome = client.post(&url).timeout(timeout).json(&body).send().await;
            match outcome {
                Ok(response) if !response.status().is_success() => {
                    eprintln!(
                        "radius audit: remote sink {url} returned {}",
                        response.status()
                    );
                },
                Err(err) => {
                    eprintln!("radius audit: remote sink {url} failed: {err}");
                },
                Ok(_) => {},
            }
        });
    }
}

impl std::fmt::Debug for AuditRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditRecorder")
            .field("file", &self.file_path)
            .field("stdout", &self.settings.stdout)
            .field("webhook", &self.settings.webhook_url.is_some())
            .field("otlp", &self.settings.otlp_url.is_some())
            .finish()
    }
}
