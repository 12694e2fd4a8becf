use crate::error::LedgerError;
use core_types::{MetricKey, DATE_COLUMN, NOTES_COLUMN};

/// The column layout of the ledger: `date`, the metric keys in lexicographic
/// order, `notes`. Keys only ever get added.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
    metrics: Vec<MetricKey>,
}

impl Schema {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parses a stored header row. An empty header is a fresh table.
    pub fn from_header(header: &[String]) -> Result<Self, LedgerError> {
        if header.is_empty() {
            return Ok(Self::empty());
        }
        if header.len() < 2 || header[0] != DATE_COLUMN || header[header.len() - 1] != NOTES_COLUMN {
            return Err(LedgerError::CorruptSchema(format!(
                "expected '{}' first and '{}' last, found {:?}",
                DATE_COLUMN, NOTES_COLUMN, header
            )));
        }
        let mut metrics = header[1..header.len() - 1]
            .iter()
            .map(|raw| {
                MetricKey::new(raw.as_str())
                    .map_err(|e| LedgerError::CorruptSchema(e.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        metrics.sort();
        metrics.dedup();
        Ok(Self { metrics })
    }

    pub fn metric_keys(&self) -> &[MetricKey] {
        &self.metrics
    }

    pub fn contains(&self, key: &MetricKey) -> bool {
        self.metrics.binary_search(key).is_ok()
    }

    /// Full header row including the fixed columns.
    pub fn columns(&self) -> Vec<String> {
        let mut columns = Vec::with_capacity(self.metrics.len() + 2);
        columns.push(DATE_COLUMN.to_string());
        columns.extend(self.metrics.iter().map(|k| k.to_string()));
        columns.push(NOTES_COLUMN.to_string());
        columns
    }

    /// The union of this schema with `candidates`.
    pub fn merged<'a, I>(&self, candidates: I) -> Schema
    where
        I: IntoIterator<Item = &'a MetricKey>,
    {
        let mut metrics = self.metrics.clone();
        metrics.extend(candidates.into_iter().filter(|k| !self.contains(k)).cloned());
        metrics.sort();
        metrics.dedup();
        Schema { metrics }
    }
}
