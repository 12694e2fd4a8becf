use crate::error::TransportError;
use crate::transport::{ColumnCell, RowHandle, TableTransport};
use async_trait::async_trait;
use chrono::NaiveDate;
use core_types::Flag;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone, Default)]
struct MemoryRow {
    date: NaiveDate,
    cells: BTreeMap<String, String>,
    styles: BTreeMap<String, Flag>,
}

#[derive(Debug, Default)]
struct MemoryState {
    header: Vec<String>,
    rows: Vec<MemoryRow>,
}

/// A process-local table. Backs dry runs and tests.
#[derive(Debug, Default)]
pub struct MemoryTable {
    state: Mutex<MemoryState>,
    header_writes: AtomicUsize,
    locked: AtomicBool,
}

impl MemoryTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        // No code path panics while holding the lock, but stay usable if one does.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// How many times the header has been persisted.
    pub fn header_writes(&self) -> usize {
        self.header_writes.load(Ordering::SeqCst)
    }

    pub fn header(&self) -> Vec<String> {
        self.state().header.clone()
    }

    /// Dates of all rows in storage order.
    pub fn row_dates(&self) -> Vec<NaiveDate> {
        self.state().rows.iter().map(|r| r.date).collect()
    }

    pub fn cell(&self, date: NaiveDate, column: &str) -> Option<String> {
        self.state()
            .rows
            .iter()
            .find(|r| r.date == date)
            .and_then(|r| r.cells.get(column).cloned())
    }

    pub fn style(&self, date: NaiveDate, column: &str) -> Option<Flag> {
        self.state()
            .rows
            .iter()
            .find(|r| r.date == date)
            .and_then(|r| r.styles.get(column).copied())
    }

    fn row_mut<'a>(
        state: &'a mut MemoryState,
        row: &RowHandle,
    ) -> Result<&'a mut MemoryRow, TransportError> {
        usize::try_from(row.id)
            .ok()
            .and_then(|idx| state.rows.get_mut(idx))
            .filter(|r| r.date == row.date)
            .ok_or_else(|| TransportError::Backend(format!("no row {} for {}", row.id, row.date)))
    }
}

#[async_trait]
impl TableTransport for MemoryTable {
    async fn begin_run(&self) -> Result<(), TransportError> {
        if self.locked.swap(true, Ordering::SeqCst) {
            return Err(TransportError::Locked);
        }
        Ok(())
    }

    async fn end_run(&self) -> Result<(), TransportError> {
        self.locked.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn read_header(&self) -> Result<Vec<String>, TransportError> {
        Ok(self.header())
    }

    async fn write_header(&self, header: &[String]) -> Result<(), TransportError> {
        self.state().header = header.to_vec();
        self.header_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn find_row(&self, date: NaiveDate) -> Result<Option<RowHandle>, TransportError> {
        Ok(self
            .state()
            .rows
            .iter()
            .position(|r| r.date == date)
            .map(|idx| RowHandle { id: idx as i64, date }))
    }

    async fn append_row(&self, date: NaiveDate) -> Result<RowHandle, TransportError> {
        let mut state = self.state();
        state.rows.push(MemoryRow {
            date,
            ..Default::default()
        });
        Ok(RowHandle {
            id: (state.rows.len() - 1) as i64,
            date,
        })
    }

    async fn read_column(&self, column: &str) -> Result<Vec<ColumnCell>, TransportError> {
        Ok(self
            .state()
            .rows
            .iter()
            .filter_map(|r| {
                r.cells.get(column).map(|raw| ColumnCell {
                    date: r.date,
                    raw: raw.clone(),
                })
            })
            .collect())
    }

    async fn write_cell(
        &self,
        row: &RowHandle,
        column: &str,
        value: &str,
    ) -> Result<(), TransportError> {
        let mut state = self.state();
        let stored = Self::row_mut(&mut state, row)?;
        if value.is_empty() {
            stored.cells.remove(column);
        } else {
            stored.cells.insert(column.to_string(), value.to_string());
        }
        Ok(())
    }

    async fn set_cell_style(
        &self,
        row: &RowHandle,
        column: &str,
        flag: Flag,
    ) -> Result<(), TransportError> {
        let mut state = self.state();
        let stored = Self::row_mut(&mut state, row)?;
        if flag.is_anomaly() {
            stored.styles.insert(column.to_string(), flag);
        } else {
            stored.styles.remove(column);
        }
        Ok(())
    }
}
