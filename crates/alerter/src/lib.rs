//! # KPI Harvester Alerter
//!
//! The outward-facing end of a run: free-text notes for flagged dates and the
//! end-of-run summary notification. Both are best-effort; a failure here never
//! touches recorded data.

use async_trait::async_trait;
use chrono::NaiveDate;
use configuration::{AlertsConfig, NotesConfig};
use core_types::{FlaggedMetric, RetryPolicy, RunSummary};
use std::sync::Arc;

pub mod error;
pub mod notes;
pub mod telegram;

pub use error::AlerterError;
pub use notes::{OpenAiNoteGenerator, PlainNoteGenerator};
pub use telegram::TelegramAlerter;

/// Delivers the end-of-run summary.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, summary: &RunSummary) -> Result<(), AlerterError>;
}

/// Turns the flagged metrics of one date into the text of its `notes` cell.
#[async_trait]
pub trait NoteGenerator: Send + Sync {
    async fn generate(&self, date: NaiveDate, flagged: &[FlaggedMetric]) -> Result<String, AlerterError>;
}

/// Writes the summary to the log when no delivery channel is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, summary: &RunSummary) -> Result<(), AlerterError> {
        tracing::info!(
            run_id = %summary.run_id,
            anomalies = summary.flagged_count(),
            "Run summary:\n{}",
            summary.render_text()
        );
        Ok(())
    }
}

/// OpenAI when a key is configured, local bullet lists otherwise.
pub fn note_generator_from_config(config: &NotesConfig, retry: RetryPolicy) -> Arc<dyn NoteGenerator> {
    match config.openai_api_key.as_deref() {
        Some(key) => match OpenAiNoteGenerator::new(key, &config.model, retry) {
            Ok(generator) => Arc::new(generator),
            Err(e) => {
                tracing::warn!(error = %e, "Falling back to plain notes.");
                Arc::new(PlainNoteGenerator)
            }
        },
        None => Arc::new(PlainNoteGenerator),
    }
}

/// Telegram when configured, the log otherwise.
pub fn notifier_from_config(config: &AlertsConfig, retry: RetryPolicy) -> Arc<dyn Notifier> {
    match config.telegram.as_ref().and_then(|t| TelegramAlerter::new(t, retry)) {
        Some(alerter) => Arc::new(alerter),
        None => Arc::new(LogNotifier),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn log_notifier_never_fails() {
        assert!(LogNotifier.send(&RunSummary::new(Uuid::new_v4())).await.is_ok());
    }

    #[tokio::test]
    async fn without_a_key_notes_are_plain() {
        let generator = note_generator_from_config(&NotesConfig::default(), RetryPolicy::immediate(1));
        let text = generator
            .generate(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(), &[])
            .await
            .unwrap();
        assert_eq!(text, "");
    }
}
