use serde::{Deserialize, Serialize};
use std::fmt;

/// The outcome of classifying a metric against its own history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Flag {
    /// Significantly above the baseline.
    Green,
    /// Significantly below the baseline.
    Red,
    /// No data, no baseline, or within tolerance.
    None,
}

impl Flag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Flag::Green => "green",
            Flag::Red => "red",
            Flag::None => "none",
        }
    }

    /// Returns true for the flags that mark a cell and end up in notes and alerts.
    pub fn is_anomaly(&self) -> bool {
        !matches!(self, Flag::None)
    }

    /// Parses a stored style back into a flag. Unknown styles are treated as `None`.
    pub fn from_style(style: &str) -> Self {
        match style {
            "green" => Flag::Green,
            "red" => Flag::Red,
            _ => Flag::None,
        }
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
