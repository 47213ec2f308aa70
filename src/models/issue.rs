use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Free-text description column
pub const SHORT_DESCRIPTION: &str = "short_description";

/// Issue category column
pub const CATEGORY: &str = "category";

/// Issue location column
pub const LOCATION: &str = "location";

/// Administrator-assigned priority column (training target)
pub const ADMIN_PRIORITY: &str = "admin_priority";

/// Raw feature columns in canonical order
pub const FEATURE_COLUMNS: [&str; 3] = [SHORT_DESCRIPTION, CATEGORY, LOCATION];

/// Columns a training dataset must carry, in canonical order
pub const TRAINING_COLUMNS: [&str; 4] = [SHORT_DESCRIPTION, CATEGORY, LOCATION, ADMIN_PRIORITY];

/// Loosely-typed inference input as it arrives from a caller
pub type InputRecord = serde_json::Map<String, Value>;

/// A civic issue report
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IssueRecord {
    /// Short free-text description of the issue
    pub short_description: String,

    /// Category label (e.g. "Roads")
    pub category: String,

    /// Location label (e.g. "Downtown")
    pub location: String,

    /// Priority tier, present only on training data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_priority: Option<String>,
}

impl IssueRecord {
    /// Create an unlabeled record
    pub fn new(
        short_description: impl Into<String>,
        category: impl Into<String>,
        location: impl Into<String>,
    ) -> Self {
        Self {
            short_description: short_description.into(),
            category: category.into(),
            location: location.into(),
            admin_priority: None,
        }
    }

    pub fn with_priority(mut self, priority: impl Into<String>) -> Self {
        self.admin_priority = Some(priority.into());
        self
    }

    /// Build a record from caller-supplied fields.
    ///
    /// Fields are read in canonical order; anything beyond the three
    /// feature columns is dropped. Absent, null, blank or non-scalar values
    /// count as missing and are reported together.
    pub fn from_fields(fields: &InputRecord) -> Result<Self> {
        let mut values: Vec<String> = Vec::with_capacity(FEATURE_COLUMNS.len());
        let mut missing = Vec::new();

        for column in FEATURE_COLUMNS {
            match fields.get(column).and_then(scalar_to_string) {
                Some(value) => values.push(value),
                None => missing.push(column.to_string()),
            }
        }

        if !missing.is_empty() {
            return Err(AppError::MissingColumn { missing });
        }

        let mut values = values.into_iter();
        Ok(Self {
            short_description: values.next().unwrap_or_default(),
            category: values.next().unwrap_or_default(),
            location: values.next().unwrap_or_default(),
            admin_priority: None,
        })
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null | Value::Array(_) | Value::Object(_) => return None,
    };

    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Untyped tabular dataset as read from a CSV file.
///
/// Cells are `None` where the source had no value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawDataset {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl RawDataset {
    pub fn new(headers: Vec<String>, rows: Vec<Vec<Option<String>>>) -> Self {
        Self { headers, rows }
    }

    /// (rows, columns)
    pub fn shape(&self) -> (usize, usize) {
        (self.rows.len(), self.headers.len())
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// Required columns absent from the header, in the order given
    pub fn missing_columns(&self, required: &[&str]) -> Vec<String> {
        required
            .iter()
            .filter(|column| self.column_index(column).is_none())
            .map(|column| column.to_string())
            .collect()
    }

    /// Cell value, treating blank strings as missing
    pub fn value(&self, row: usize, column: usize) -> Option<&str> {
        self.rows
            .get(row)
            .and_then(|r| r.get(column))
            .and_then(|cell| cell.as_deref())
            .filter(|v| !v.trim().is_empty())
    }
}
