use crate::error::TransportError;
use async_trait::async_trait;
use chrono::NaiveDate;
use core_types::Flag;

/// Identifies one stored row for follow-up cell writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RowHandle {
    /// Backend-specific row identifier (position or primary key).
    pub id: i64,
    pub date: NaiveDate,
}

/// One non-empty cell of a column, together with the date of its row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnCell {
    pub date: NaiveDate,
    pub raw: String,
}

/// The storage contract the ledger is written against.
///
/// Cells are addressed by column key, never by position, so rewriting the
/// header to insert a new column leaves every stored cell where it was.
/// Implementations retry transient failures themselves; an error returned
/// from here means the retry budget is spent.
#[async_trait]
pub trait TableTransport: Send + Sync {
    /// Claims the table for a single writer. Fails with `TransportError::Locked`
    /// while another run holds it.
    async fn begin_run(&self) -> Result<(), TransportError>;

    async fn end_run(&self) -> Result<(), TransportError>;

    /// The stored header row, empty for a fresh table.
    async fn read_header(&self) -> Result<Vec<String>, TransportError>;

    async fn write_header(&self, header: &[String]) -> Result<(), TransportError>;

    async fn find_row(&self, date: NaiveDate) -> Result<Option<RowHandle>, TransportError>;

    /// Appends an empty row for `date` after every existing row.
    async fn append_row(&self, date: NaiveDate) -> Result<RowHandle, TransportError>;

    /// All non-empty cells of `column` in row order.
    async fn read_column(&self, column: &str) -> Result<Vec<ColumnCell>, TransportError>;

    async fn write_cell(
        &self,
        row: &RowHandle,
        column: &str,
        value: &str,
    ) -> Result<(), TransportError>;

    /// Writes several cells of one row. Backends with batching override this.
    async fn write_cells(
        &self,
        row: &RowHandle,
        cells: &[(String, String)],
    ) -> Result<(), TransportError> {
        for (column, value) in cells {
            self.write_cell(row, column, value).await?;
        }
        Ok(())
    }

    async fn set_cell_style(
        &self,
        row: &RowHandle,
        column: &str,
        flag: Flag,
    ) -> Result<(), TransportError>;
}
