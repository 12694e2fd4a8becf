use crate::error::EngineError;
use crate::window::compute_window;
use alerter::{NoteGenerator, Notifier};
use analyzer::Classifier;
use api_client::SourceFetcher;
use chrono::NaiveDate;
use configuration::Config;
use core_types::{DateReport, DateStatus, Flag, FlaggedMetric, MetricKey, MetricMap, MetricValue, RunSummary};
use futures::future::join_all;
use ledger::{Ledger, RowHandle, Schema, TableTransport};
use std::sync::Arc;
use tracing::Instrument;
use uuid::Uuid;

/// Drives one run over the backfill window: fetch, record, classify, annotate,
/// and finally notify.
///
/// Dates are processed strictly oldest to newest, because the baseline of a date
/// is built from the rows written for the dates before it.
pub struct RunOrchestrator {
    transport: Arc<dyn TableTransport>,
    sources: Vec<Arc<dyn SourceFetcher>>,
    classifier: Classifier,
    notes: Option<Arc<dyn NoteGenerator>>,
    notifier: Option<Arc<dyn Notifier>>,
    backfill_days: u32,
}

impl RunOrchestrator {
    pub fn new(transport: Arc<dyn TableTransport>, classifier: Classifier, backfill_days: u32) -> Self {
        Self {
            transport,
            sources: Vec::new(),
            classifier,
            notes: None,
            notifier: None,
            backfill_days,
        }
    }

    /// Wires every collaborator the configuration enables.
    pub fn from_config(config: &Config, transport: Arc<dyn TableTransport>) -> Result<Self, EngineError> {
        let retry = config.retry.policy();
        let sources = api_client::sources_from_config(&config.sources, retry, config.run.timezone)
            .map_err(|e| EngineError::Configuration(e.to_string()))?;
        tracing::info!(sources = sources.len(), "Data sources configured.");

        Ok(Self::new(
            transport,
            Classifier::from_config(&config.anomaly),
            config.run.backfill_days,
        )
        .with_sources(sources)
        .with_notes(alerter::note_generator_from_config(&config.notes, retry))
        .with_notifier(alerter::notifier_from_config(&config.alerts, retry)))
    }

    pub fn with_sources(mut self, sources: impl IntoIterator<Item = Arc<dyn SourceFetcher>>) -> Self {
        self.sources.extend(sources);
        self
    }

    pub fn with_notes(mut self, notes: Arc<dyn NoteGenerator>) -> Self {
        self.notes = Some(notes);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn backfill_days(&self) -> u32 {
        self.backfill_days
    }

    /// Processes the backfill window ending the day before `today`.
    ///
    /// Fails as a whole only when the ledger cannot be claimed or its schema
    /// cannot be established; every narrower failure is recorded in the summary.
    pub async fn run(&self, today: NaiveDate) -> Result<RunSummary, EngineError> {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("run", %run_id);

        async move {
            self.transport.begin_run().await.map_err(EngineError::Lock)?;
            let result = self.run_locked(run_id, today).await;
            if let Err(e) = self.transport.end_run().await {
                tracing::warn!(error = %e, "Failed to release the ledger lock.");
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn run_locked(&self, run_id: Uuid, today: NaiveDate) -> Result<RunSummary, EngineError> {
        let mut ledger = Ledger::open(Arc::clone(&self.transport)).await?;
        let declared: Vec<MetricKey> = self.sources.iter().flat_map(|s| s.known_keys()).collect();
        ledger.reconcile_schema(&declared).await?;

        let window = compute_window(today, self.backfill_days);
        tracing::info!(
            dates = window.len(),
            sources = self.sources.len(),
            "Starting run."
        );

        let mut summary = RunSummary::new(run_id);
        for date in window {
            let report = self
                .process_date(&mut ledger, date)
                .instrument(tracing::info_span!("date", %date))
                .await;
            summary.dates.push(report);
        }

        self.finalize(&summary).await;
        tracing::info!(
            anomalies = summary.flagged_count(),
            failed_dates = summary.failed_dates().count(),
            "Run finished."
        );
        Ok(summary)
    }

    async fn process_date(&self, ledger: &mut Ledger, date: NaiveDate) -> DateReport {
        let (values, unavailable_sources) = self.fetch_date(ledger.schema(), date).await;

        if let Err(e) = ledger.reconcile_schema(values.keys()).await {
            tracing::error!(error = %e, "Schema update failed; skipping date.");
            return DateReport::failed(date, e.to_string(), unavailable_sources);
        }
        let rerun = match ledger.find_row(date).await {
            Ok(existing) => existing.is_some(),
            Err(e) => {
                tracing::error!(error = %e, "Row lookup failed; skipping date.");
                return DateReport::failed(date, e.to_string(), unavailable_sources);
            }
        };
        let row = match ledger.upsert_row(date, &values).await {
            Ok(row) => row,
            Err(e) => {
                tracing::error!(error = %e, "Row write failed; skipping date.");
                return DateReport::failed(date, e.to_string(), unavailable_sources);
            }
        };
        tracing::debug!(metrics = values.len(), rerun, "Row recorded.");

        let (flagged, classified) = self.classify_metrics(ledger, date, &values).await;
        let note = self.annotate(ledger, &row, date, &flagged, &classified, rerun).await;

        DateReport {
            date,
            status: DateStatus::Recorded,
            flagged,
            note,
            unavailable_sources,
        }
    }

    /// Calls every source concurrently and merges their maps.
    ///
    /// A failed source contributes `Unavailable` for each key it owns: the keys
    /// it declares plus the schema keys under its prefix.
    async fn fetch_date(&self, schema: &Schema, date: NaiveDate) -> (MetricMap, Vec<String>) {
        let results = join_all(
            self.sources
                .iter()
                .map(|source| async move { (source, source.fetch(date).await) }),
        )
        .await;

        let mut values = MetricMap::new();
        let mut gaps = MetricMap::new();
        let mut unavailable = Vec::new();
        for (source, result) in results {
            match result {
                Ok(metrics) => values.extend(metrics),
                Err(e) => {
                    tracing::warn!(source = source.name(), error = %e, "Source unavailable.");
                    unavailable.push(source.name().to_string());

                    let prefix = source.key_prefix();
                    let owned = schema
                        .metric_keys()
                        .iter()
                        .filter(|k| !prefix.is_empty() && k.as_str().starts_with(&prefix))
                        .cloned();
                    for key in source.known_keys().into_iter().chain(owned) {
                        gaps.insert(key, MetricValue::Unavailable);
                    }
                }
            }
        }
        // A key some other source did deliver keeps its value.
        for (key, gap) in gaps {
            values.entry(key).or_insert(gap);
        }
        (values, unavailable)
    }

    /// Classifies every schema metric that has a value for `date` against its
    /// history strictly before `date`.
    ///
    /// Returns the flagged metrics and every key that was classified.
    async fn classify_metrics(
        &self,
        ledger: &Ledger,
        date: NaiveDate,
        values: &MetricMap,
    ) -> (Vec<FlaggedMetric>, Vec<MetricKey>) {
        let mut flagged = Vec::new();
        let mut classified = Vec::new();
        for key in ledger.schema().metric_keys() {
            let Some(current) = values.get(key) else {
                continue;
            };
            let history = match ledger.history_of(key, date).await {
                Ok(history) => history,
                Err(e) => {
                    tracing::warn!(metric = %key, error = %e, "History unreadable; metric skipped.");
                    continue;
                }
            };

            let outcome = self.classifier.classify(current, &history);
            classified.push(key.clone());
            if let (true, MetricValue::Number(value), Some(baseline)) =
                (outcome.flag.is_anomaly(), current, outcome.baseline)
            {
                tracing::info!(metric = %key, %value, %baseline, flag = %outcome.flag, "Anomaly.");
                flagged.push(FlaggedMetric {
                    metric: key.clone(),
                    value: *value,
                    baseline,
                    flag: outcome.flag,
                });
            }
        }
        (flagged, classified)
    }

    /// Marks flagged cells and writes the note. Failures here leave the flagged list intact.
    ///
    /// On a rerun, marks and the note left by an earlier run are cleared
    /// wherever this run no longer flags anything.
    async fn annotate(
        &self,
        ledger: &Ledger,
        row: &RowHandle,
        date: NaiveDate,
        flagged: &[FlaggedMetric],
        classified: &[MetricKey],
        rerun: bool,
    ) -> Option<String> {
        for f in flagged {
            if let Err(e) = ledger.mark_cell(row, &f.metric, f.flag).await {
                tracing::warn!(metric = %f.metric, error = %e, "Failed to mark cell.");
            }
        }
        if rerun {
            let cleared = classified
                .iter()
                .filter(|key| !flagged.iter().any(|f| &f.metric == *key));
            for key in cleared {
                if let Err(e) = ledger.mark_cell(row, key, Flag::None).await {
                    tracing::warn!(metric = %key, error = %e, "Failed to clear cell mark.");
                }
            }
        }

        let note = match (&self.notes, flagged.is_empty()) {
            (Some(generator), false) => match generator.generate(date, flagged).await {
                Ok(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
                Ok(_) => None,
                Err(e) => {
                    tracing::warn!(error = %e, "Note generation failed.");
                    None
                }
            },
            _ => None,
        };
        match &note {
            Some(text) => {
                if let Err(e) = ledger.annotate(row, text).await {
                    tracing::warn!(error = %e, "Failed to write note.");
                }
            }
            None if rerun => {
                if let Err(e) = ledger.clear_note(row).await {
                    tracing::warn!(error = %e, "Failed to clear note.");
                }
            }
            None => {}
        }
        note
    }

    async fn finalize(&self, summary: &RunSummary) {
        if !summary.has_anomalies() {
            tracing::info!("No anomalies in this run; nothing to notify.");
            return;
        }
        let Some(notifier) = &self.notifier else {
            return;
        };
        if let Err(e) = notifier.send(summary).await {
            tracing::error!(error = %e, "Failed to send the run summary.");
        }
    }
}
