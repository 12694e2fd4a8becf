use crate::enums::Flag;
use crate::metric::MetricKey;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use uuid::Uuid;

/// A metric whose value for a date deviated from its baseline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlaggedMetric {
    pub metric: MetricKey,
    pub value: Decimal,
    pub baseline: Decimal,
    pub flag: Flag,
}

/// Whether the ledger row for a date could be written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DateStatus {
    Recorded,
    Failed(String),
}

/// Everything that happened to a single date of the backfill window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateReport {
    pub date: NaiveDate,
    pub status: DateStatus,
    pub flagged: Vec<FlaggedMetric>,
    pub note: Option<String>,
    /// Sources that failed entirely for this date.
    pub unavailable_sources: Vec<String>,
}

impl DateReport {
    pub fn failed(date: NaiveDate, reason: impl Into<String>, unavailable_sources: Vec<String>) -> Self {
        Self {
            date,
            status: DateStatus::Failed(reason.into()),
            flagged: Vec::new(),
            note: None,
            unavailable_sources,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, DateStatus::Failed(_))
    }
}

/// The result of one full invocation over the backfill window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub dates: Vec<DateReport>,
}

impl RunSummary {
    pub fn new(run_id: Uuid) -> Self {
        Self { run_id, dates: Vec::new() }
    }

    pub fn flagged_count(&self) -> usize {
        self.dates.iter().map(|d| d.flagged.len()).sum()
    }

    pub fn has_anomalies(&self) -> bool {
        self.flagged_count() > 0
    }

    pub fn failed_dates(&self) -> impl Iterator<Item = &DateReport> {
        self.dates.iter().filter(|d| d.is_failed())
    }

    /// Plain-text body of the end-of-run alert.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        for report in self.dates.iter().filter(|d| !d.flagged.is_empty()) {
            let _ = writeln!(out, "[{}] {} anomalies", report.date, report.flagged.len());
            for f in &report.flagged {
                let _ = writeln!(
                    out,
                    "  {} {}: {:.2} (baseline {:.2})",
                    f.flag, f.metric, f.value, f.baseline
                );
            }
            if let Some(note) = report.note.as_deref().filter(|n| !n.trim().is_empty()) {
                let _ = writeln!(out, "{}", note.trim());
            }
        }

        let failed: Vec<_> = self.failed_dates().collect();
        if !failed.is_empty() {
            let _ = writeln!(out, "\nFailed dates:");
            for report in failed {
                if let DateStatus::Failed(reason) = &report.status {
                    let _ = writeln!(out, "  {}: {}", report.date, reason);
                }
            }
        }

        let sources: Vec<_> = self
            .dates
            .iter()
            .filter(|d| !d.unavailable_sources.is_empty())
            .collect();
        if !sources.is_empty() {
            let _ = writeln!(out, "\nUnavailable sources:");
            for report in sources {
                let _ = writeln!(out, "  {}: {}", report.date, report.unavailable_sources.join(", "));
            }
        }
        out.trim_end().to_string()
    }
}
