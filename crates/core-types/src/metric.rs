use crate::error::CoreError;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Name of the fixed first column of the ledger.
pub const DATE_COLUMN: &str = "date";
/// Name of the fixed last column of the ledger.
pub const NOTES_COLUMN: &str = "notes";
/// Cell text written for an `Unavailable` value.
pub const UNAVAILABLE_TEXT: &str = "N/A";

/// A metric column identifier such as `shopware6_main_storefront_gross_sales_eur`.
///
/// Keys are discovered at runtime, so the only guarantee is their shape: non-empty,
/// free of whitespace and control characters, and never one of the reserved
/// `date`/`notes` column names.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MetricKey(String);

impl MetricKey {
    pub fn new(key: impl Into<String>) -> Result<Self, CoreError> {
        let key = key.into();
        if key.is_empty() {
            return Err(CoreError::InvalidMetricKey(key, "key is empty".to_string()));
        }
        if key == DATE_COLUMN || key == NOTES_COLUMN {
            return Err(CoreError::InvalidMetricKey(
                key,
                "key collides with a reserved column".to_string(),
            ));
        }
        if key.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(CoreError::InvalidMetricKey(
                key,
                "key contains whitespace or control characters".to_string(),
            ));
        }
        Ok(Self(key))
    }

    /// Builds a key from its namespace parts, slugging each one.
    ///
    /// `["shopware6", "Main Shop", "Storefront", "gross_sales_eur"]` becomes
    /// `shopware6_main_shop_storefront_gross_sales_eur`.
    pub fn from_parts(parts: &[&str]) -> Result<Self, CoreError> {
        let joined = parts
            .iter()
            .map(|p| slug(p))
            .filter(|p| !p.is_empty())
            .collect::<Vec<_>>()
            .join("_");
        Self::new(joined)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Lowercases and collapses every run of non-alphanumeric characters into one `_`.
pub fn slug(part: &str) -> String {
    let mut out = String::with_capacity(part.len());
    let mut pending_sep = false;
    for c in part.chars() {
        if c.is_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.extend(c.to_lowercase());
        } else {
            pending_sep = true;
        }
    }
    out
}

impl fmt::Display for MetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for MetricKey {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<MetricKey> for String {
    fn from(key: MetricKey) -> Self {
        key.0
    }
}

impl AsRef<str> for MetricKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A single metric observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetricValue {
    Number(Decimal),
    /// The source could not deliver this value. Distinct from zero and from "no history".
    Unavailable,
}

impl MetricValue {
    /// Converts a float coming from a JSON payload. Non-finite values become `Unavailable`.
    pub fn from_f64(value: f64) -> Self {
        if !value.is_finite() {
            return MetricValue::Unavailable;
        }
        Decimal::from_f64(value)
            .map(MetricValue::Number)
            .unwrap_or(MetricValue::Unavailable)
    }

    pub fn as_number(&self) -> Option<Decimal> {
        match self {
            MetricValue::Number(n) => Some(*n),
            MetricValue::Unavailable => None,
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, MetricValue::Unavailable)
    }

    /// The raw text stored in a ledger cell.
    pub fn to_cell_text(&self) -> String {
        match self {
            MetricValue::Number(n) => n.normalize().to_string(),
            MetricValue::Unavailable => UNAVAILABLE_TEXT.to_string(),
        }
    }

    /// Parses raw cell text. Empty or unparseable cells carry no observation and yield `None`.
    pub fn parse_cell(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        if raw.eq_ignore_ascii_case(UNAVAILABLE_TEXT) {
            return Some(MetricValue::Unavailable);
        }
        Decimal::from_str(raw)
            .or_else(|_| Decimal::from_scientific(raw))
            .ok()
            .map(MetricValue::Number)
    }
}

impl From<Decimal> for MetricValue {
    fn from(value: Decimal) -> Self {
        MetricValue::Number(value)
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Number(n) => write!(f, "{:.2}", n),
            MetricValue::Unavailable => f.write_str(UNAVAILABLE_TEXT),
        }
    }
}

/// The flat metric map a source produces for one date.
pub type MetricMap = BTreeMap<MetricKey, MetricValue>;
