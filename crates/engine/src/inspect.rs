use crate::error::EngineError;
use analyzer::{Classification, Classifier};
use chrono::NaiveDate;
use core_types::{MetricKey, MetricValue};
use ledger::{Ledger, TableTransport};
use rust_decimal::Decimal;
use std::sync::Arc;

/// How a recorded value compares to its history, as the run would see it.
#[derive(Debug, Clone, PartialEq)]
pub struct BaselineReport {
    pub metric: MetricKey,
    pub date: NaiveDate,
    /// Entries recorded before `date`, `Unavailable` ones included.
    pub history_len: usize,
    pub baseline: Option<Decimal>,
    pub recorded: Option<MetricValue>,
    pub classification: Option<Classification>,
}

/// Reads the ledger without writing to it.
pub async fn inspect_baseline(
    transport: Arc<dyn TableTransport>,
    classifier: &Classifier,
    metric: &MetricKey,
    date: NaiveDate,
) -> Result<BaselineReport, EngineError> {
    let ledger = Ledger::open(transport).await?;
    if !ledger.schema().contains(metric) {
        return Err(EngineError::Configuration(format!(
            "metric '{}' is not a ledger column",
            metric
        )));
    }
    let history = ledger.history_of(metric, date).await?;
    let recorded = ledger.recorded_value(metric, date).await?;

    Ok(BaselineReport {
        metric: metric.clone(),
        date,
        history_len: history.len(),
        baseline: classifier.baseline(&history),
        classification: recorded.map(|value| classifier.classify(&value, &history)),
        recorded,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::{Flag, MetricMap};
    use ledger::MemoryTable;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn reports_baseline_and_flag_of_a_recorded_value() {
        let table = Arc::new(MemoryTable::new());
        let key = MetricKey::new("x").unwrap();
        let mut ledger = Ledger::open(table.clone()).await.unwrap();
        ledger.reconcile_schema([&key]).await.unwrap();
        for d in 1..=15 {
            let value = if d == 15 { dec!(140) } else { dec!(100) };
            let row: MetricMap = [(key.clone(), MetricValue::Number(value))].into_iter().collect();
            ledger
                .upsert_row(NaiveDate::from_ymd_opt(2024, 4, d).unwrap(), &row)
                .await
                .unwrap();
        }

        let report = inspect_baseline(
            table,
            &Classifier::default(),
            &key,
            NaiveDate::from_ymd_opt(2024, 4, 15).unwrap(),
        )
        .await
        .unwrap();

        assert_eq!(report.history_len, 14);
        assert_eq!(report.baseline, Some(dec!(100)));
        assert_eq!(report.recorded, Some(MetricValue::Number(dec!(140))));
        assert_eq!(report.classification.map(|c| c.flag), Some(Flag::Green));
    }

    #[tokio::test]
    async fn unknown_metric_is_rejected() {
        let table = Arc::new(MemoryTable::new());
        let result = inspect_baseline(
            table,
            &Classifier::default(),
            &MetricKey::new("ghost").unwrap(),
            NaiveDate::from_ymd_opt(2024, 4, 15).unwrap(),
        )
        .await;
        assert!(matches!(result, Err(EngineError::Configuration(_))));
    }
}
