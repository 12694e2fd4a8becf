use crate::error::LedgerError;
use crate::schema::Schema;
use crate::transport::{RowHandle, TableTransport};
use chrono::NaiveDate;
use core_types::{Flag, MetricKey, MetricMap, MetricValue, DATE_COLUMN, NOTES_COLUMN};
use std::sync::Arc;

/// The dynamic-schema metrics table.
///
/// Holds the current schema in memory and the last header it persisted, so a
/// reconcile that changes nothing performs no write.
pub struct Ledger {
    transport: Arc<dyn TableTransport>,
    schema: Schema,
    stored_header: Vec<String>,
}

impl Ledger {
    /// Reads and validates the stored header.
    pub async fn open(transport: Arc<dyn TableTransport>) -> Result<Self, LedgerError> {
        let stored_header = transport.read_header().await?;
        let schema = Schema::from_header(&stored_header)?;
        tracing::debug!(columns = stored_header.len(), "Ledger opened.");
        Ok(Self {
            transport,
            schema,
            stored_header,
        })
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Merges `candidates` into the schema and persists the header if it changed.
    pub async fn reconcile_schema<'a, I>(&mut self, candidates: I) -> Result<&Schema, LedgerError>
    where
        I: IntoIterator<Item = &'a MetricKey>,
    {
        let merged = self.schema.merged(candidates);
        let columns = merged.columns();
        if columns != self.stored_header {
            let added = merged.metric_keys().len() - self.schema.metric_keys().len();
            self.transport.write_header(&columns).await?;
            tracing::info!(added, columns = columns.len(), "Ledger header rewritten.");
            self.stored_header = columns;
        }
        self.schema = merged;
        Ok(&self.schema)
    }

    /// The stored row for `date`, if one exists.
    pub async fn find_row(&self, date: NaiveDate) -> Result<Option<RowHandle>, LedgerError> {
        Ok(self.transport.find_row(date).await?)
    }

    /// Writes `values` into the row for `date`, creating the row if needed.
    ///
    /// Only the keys present in `values` are touched. Every key must already be
    /// part of the schema.
    pub async fn upsert_row(
        &self,
        date: NaiveDate,
        values: &MetricMap,
    ) -> Result<RowHandle, LedgerError> {
        if let Some(unknown) = values.keys().find(|k| !self.schema.contains(k)) {
            return Err(LedgerError::UnknownColumn(unknown.to_string()));
        }

        let row = match self.transport.find_row(date).await? {
            Some(row) => row,
            None => {
                let row = self.transport.append_row(date).await?;
                self.transport
                    .write_cell(&row, DATE_COLUMN, &date.to_string())
                    .await?;
                row
            }
        };

        let cells: Vec<(String, String)> = values
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_cell_text()))
            .collect();
        self.transport.write_cells(&row, &cells).await?;
        Ok(row)
    }

    /// Recorded values of `key` for dates strictly before `before`, oldest first.
    ///
    /// Empty and unparseable cells are skipped; `N/A` cells come back as
    /// `MetricValue::Unavailable`.
    pub async fn history_of(
        &self,
        key: &MetricKey,
        before: NaiveDate,
    ) -> Result<Vec<MetricValue>, LedgerError> {
        let mut cells: Vec<_> = self
            .transport
            .read_column(key.as_str())
            .await?
            .into_iter()
            .filter(|c| c.date < before)
            .filter_map(|c| MetricValue::parse_cell(&c.raw).map(|v| (c.date, v)))
            .collect();
        // Rows are appended in run order, which is not always date order.
        cells.sort_by_key(|(date, _)| *date);
        Ok(cells.into_iter().map(|(_, v)| v).collect())
    }

    /// The value recorded for `key` on exactly `date`, if any.
    pub async fn recorded_value(
        &self,
        key: &MetricKey,
        date: NaiveDate,
    ) -> Result<Option<MetricValue>, LedgerError> {
        Ok(self
            .transport
            .read_column(key.as_str())
            .await?
            .into_iter()
            .find(|c| c.date == date)
            .and_then(|c| MetricValue::parse_cell(&c.raw)))
    }

    /// Writes the free-text annotation of a row.
    pub async fn annotate(&self, row: &RowHandle, text: &str) -> Result<(), LedgerError> {
        self.transport.write_cell(row, NOTES_COLUMN, text).await?;
        Ok(())
    }

    /// Empties the annotation of a row.
    pub async fn clear_note(&self, row: &RowHandle) -> Result<(), LedgerError> {
        self.transport.write_cell(row, NOTES_COLUMN, "").await?;
        Ok(())
    }

    /// Marks a metric cell with its anomaly flag; `Flag::None` removes the mark.
    pub async fn mark_cell(
        &self,
        row: &RowHandle,
        key: &MetricKey,
        flag: Flag,
    ) -> Result<(), LedgerError> {
        if !self.schema.contains(key) {
            return Err(LedgerError::UnknownColumn(key.to_string()));
        }
        self.transport.set_cell_style(row, key.as_str(), flag).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryTable;
    use rust_decimal_macros::dec;

    fn key(s: &str) -> MetricKey {
        MetricKey::new(s).unwrap()
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    async fn fresh() -> (Arc<MemoryTable>, Ledger) {
        let table = Arc::new(MemoryTable::new());
        let ledger = Ledger::open(table.clone()).await.unwrap();
        (table, ledger)
    }

    fn map(entries: &[(&str, MetricValue)]) -> MetricMap {
        entries.iter().map(|(k, v)| (key(k), *v)).collect()
    }

    #[tokio::test]
    async fn reconcile_twice_writes_header_once() {
        let (table, mut ledger) = fresh().await;
        let keys = [key("b_eur"), key("a_eur")];

        let first = ledger.reconcile_schema(&keys).await.unwrap().columns();
        let second = ledger.reconcile_schema(&keys).await.unwrap().columns();

        assert_eq!(first, second);
        assert_eq!(first, vec!["date", "a_eur", "b_eur", "notes"]);
        assert_eq!(table.header_writes(), 1);
        assert_eq!(table.header(), first);
    }

    #[tokio::test]
    async fn new_keys_extend_without_dropping_old_ones() {
        let (table, mut ledger) = fresh().await;
        ledger.reconcile_schema(&[key("m_eur")]).await.unwrap();
        ledger.reconcile_schema(&[key("a_eur")]).await.unwrap();
        assert_eq!(table.header(), vec!["date", "a_eur", "m_eur", "notes"]);
        assert_eq!(table.header_writes(), 2);
    }

    #[tokio::test]
    async fn reopening_reads_the_persisted_schema() {
        let (table, mut ledger) = fresh().await;
        ledger.reconcile_schema(&[key("x_eur")]).await.unwrap();
        drop(ledger);

        let mut reopened = Ledger::open(table.clone()).await.unwrap();
        assert!(reopened.schema().contains(&key("x_eur")));
        reopened.reconcile_schema(&[key("x_eur")]).await.unwrap();
        assert_eq!(table.header_writes(), 1);
    }

    #[tokio::test]
    async fn corrupt_header_fails_open() {
        let table = Arc::new(MemoryTable::new());
        table
            .write_header(&["metric".to_string(), "notes".to_string()])
            .await
            .unwrap();
        assert!(matches!(
            Ledger::open(table).await,
            Err(LedgerError::CorruptSchema(_))
        ));
    }

    #[tokio::test]
    async fn upsert_same_date_updates_in_place() {
        let (table, mut ledger) = fresh().await;
        ledger
            .reconcile_schema(&[key("a"), key("b"), key("c")])
            .await
            .unwrap();

        ledger
            .upsert_row(
                day(1),
                &map(&[
                    ("a", MetricValue::Number(dec!(1))),
                    ("b", MetricValue::Number(dec!(2))),
                ]),
            )
            .await
            .unwrap();
        ledger
            .upsert_row(
                day(1),
                &map(&[
                    ("b", MetricValue::Number(dec!(20))),
                    ("c", MetricValue::Unavailable),
                ]),
            )
            .await
            .unwrap();

        assert_eq!(table.row_dates(), vec![day(1)]);
        assert_eq!(table.cell(day(1), "a").as_deref(), Some("1"));
        assert_eq!(table.cell(day(1), "b").as_deref(), Some("20"));
        assert_eq!(table.cell(day(1), "c").as_deref(), Some("N/A"));
        assert_eq!(table.cell(day(1), "date").as_deref(), Some("2024-03-01"));
    }

    #[tokio::test]
    async fn new_rows_leave_absent_cells_empty() {
        let (table, mut ledger) = fresh().await;
        ledger.reconcile_schema(&[key("a"), key("b")]).await.unwrap();
        ledger
            .upsert_row(day(2), &map(&[("a", MetricValue::Number(dec!(5)))]))
            .await
            .unwrap();
        assert_eq!(table.cell(day(2), "b"), None);
    }

    #[tokio::test]
    async fn upsert_rejects_keys_outside_the_schema() {
        let (table, ledger) = fresh().await;
        let err = ledger
            .upsert_row(day(1), &map(&[("ghost", MetricValue::Number(dec!(1)))]))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::UnknownColumn(_)));
        assert!(table.row_dates().is_empty());
    }

    #[tokio::test]
    async fn history_is_strictly_before_and_chronological() {
        let (_table, mut ledger) = fresh().await;
        ledger.reconcile_schema(&[key("a")]).await.unwrap();
        // Written out of date order on purpose.
        for (d, v) in [(3, dec!(30)), (1, dec!(10)), (2, dec!(20)), (4, dec!(40))] {
            ledger
                .upsert_row(day(d), &map(&[("a", MetricValue::Number(v))]))
                .await
                .unwrap();
        }

        let history = ledger.history_of(&key("a"), day(4)).await.unwrap();
        assert_eq!(
            history,
            vec![
                MetricValue::Number(dec!(10)),
                MetricValue::Number(dec!(20)),
                MetricValue::Number(dec!(30)),
            ]
        );
    }

    #[tokio::test]
    async fn history_keeps_unavailable_and_skips_garbage() {
        let (table, mut ledger) = fresh().await;
        ledger.reconcile_schema(&[key("a")]).await.unwrap();
        ledger
            .upsert_row(day(1), &map(&[("a", MetricValue::Unavailable)]))
            .await
            .unwrap();
        let row2 = ledger
            .upsert_row(day(2), &map(&[("a", MetricValue::Number(dec!(7)))]))
            .await
            .unwrap();
        table.write_cell(&row2, "a", "#VALUE!").await.unwrap();

        let history = ledger.history_of(&key("a"), day(9)).await.unwrap();
        assert_eq!(history, vec![MetricValue::Unavailable]);
    }

    #[tokio::test]
    async fn annotate_and_mark_cell() {
        let (table, mut ledger) = fresh().await;
        ledger.reconcile_schema(&[key("a")]).await.unwrap();
        let row = ledger
            .upsert_row(day(1), &map(&[("a", MetricValue::Number(dec!(1)))]))
            .await
            .unwrap();

        ledger.annotate(&row, "- a is high").await.unwrap();
        ledger.mark_cell(&row, &key("a"), Flag::Green).await.unwrap();

        assert_eq!(table.cell(day(1), "notes").as_deref(), Some("- a is high"));
        assert_eq!(table.style(day(1), "a"), Some(Flag::Green));
        assert!(ledger.mark_cell(&row, &key("zzz"), Flag::Red).await.is_err());
    }

    #[tokio::test]
    async fn clearing_removes_note_and_mark() {
        let (table, mut ledger) = fresh().await;
        ledger.reconcile_schema(&[key("a")]).await.unwrap();
        let row = ledger
            .upsert_row(day(1), &map(&[("a", MetricValue::Number(dec!(1)))]))
            .await
            .unwrap();
        ledger.annotate(&row, "- a is low").await.unwrap();
        ledger.mark_cell(&row, &key("a"), Flag::Red).await.unwrap();

        assert_eq!(ledger.find_row(day(1)).await.unwrap(), Some(row));
        ledger.clear_note(&row).await.unwrap();
        ledger.mark_cell(&row, &key("a"), Flag::None).await.unwrap();

        assert_eq!(table.cell(day(1), "notes"), None);
        assert_eq!(table.style(day(1), "a"), None);
        assert_eq!(table.cell(day(1), "a").as_deref(), Some("1"));
        assert_eq!(ledger.find_row(day(2)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn recorded_value_reads_one_date() {
        let (_table, mut ledger) = fresh().await;
        ledger.reconcile_schema(&[key("a")]).await.unwrap();
        ledger
            .upsert_row(day(5), &map(&[("a", MetricValue::Number(dec!(12.5)))]))
            .await
            .unwrap();
        assert_eq!(
            ledger.recorded_value(&key("a"), day(5)).await.unwrap(),
            Some(MetricValue::Number(dec!(12.5)))
        );
        assert_eq!(ledger.recorded_value(&key("a"), day(6)).await.unwrap(), None);
    }
}
