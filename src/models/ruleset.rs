//! Extraction rulesets
//!
//! A ruleset ("extension") tells extraction how to read one institution's
//! CSV export: which columns hold what, how dates look, and whether amounts
//! need their sign flipped.

use serde::{Deserialize, Serialize};

/// Column mapping and parsing options for one document layout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Ruleset {
    /// Index of the date column
    pub date_column: usize,

    /// Signed amount column; when absent, inflow/outflow columns are used
    pub amount_column: Option<usize>,
    pub outflow_column: Option<usize>,
    pub inflow_column: Option<usize>,

    pub description_column: Option<usize>,
    pub comment_column: Option<usize>,

    /// Column carrying the bank's settlement status
    pub status_column: Option<usize>,

    /// Status cell value (case-insensitive) that means pending
    pub pending_marker: String,

    /// chrono format tried before the common fallbacks
    pub date_format: String,

    /// Whether the first row is a header
    pub has_header: bool,

    pub delimiter: char,

    /// Some banks report purchases as positive numbers
    pub invert_amounts: bool,

    /// Skip rows that fail to parse instead of failing the document
    pub skip_invalid_rows: bool,

    /// Tags copied onto every extracted entry
    pub tags: Vec<String>,
}

impl Default for Ruleset {
    fn default() -> Self {
        Self {
            date_column: 0,
            amount_column: Some(1),
            outflow_column: None,
            inflow_column: None,
            description_column: Some(2),
            comment_column: None,
            status_column: None,
            pending_marker: "pending".to_string(),
            date_format: "%Y-%m-%d".to_string(),
            has_header: true,
            delimiter: ',',
            invert_amounts: false,
            skip_invalid_rows: false,
            tags: Vec::new(),
        }
    }
}

impl Ruleset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Date, description, signed amount with a US date format
    pub fn simple_bank() -> Self {
        Self {
            amount_column: Some(2),
            description_column: Some(1),
            date_format: "%m/%d/%Y".to_string(),
            ..Self::default()
        }
    }

    /// Separate debit/credit columns
    pub fn separate_inout(
        date_col: usize,
        outflow_col: usize,
        inflow_col: usize,
        description_col: usize,
    ) -> Self {
        Self {
            date_column: date_col,
            amount_column: None,
            outflow_column: Some(outflow_col),
            inflow_column: Some(inflow_col),
            description_column: Some(description_col),
            ..Self::default()
        }
    }

    pub fn with_status_column(mut self, column: usize) -> Self {
        self.status_column = Some(column);
        self
    }

    pub fn with_header(mut self, has_header: bool) -> Self {
        self.has_header = has_header;
        self
    }

    pub fn skipping_invalid_rows(mut self) -> Self {
        self.skip_invalid_rows = true;
        self
    }

    /// Configuration problems that would make every document fail
    pub fn validate(&self) -> Result<(), String> {
        if !self.delimiter.is_ascii() {
            return Err(format!("Delimiter '{}' must be a single ASCII character", self.delimiter));
        }
        match (self.amount_column, self.outflow_column, self.inflow_column) {
            (Some(_), _, _) | (None, Some(_), Some(_)) => Ok(()),
            _ => Err("Ruleset needs an amount column or both inflow and outflow columns".into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_validate() {
        assert!(Ruleset::new().validate().is_ok());
        assert!(Ruleset::simple_bank().validate().is_ok());
        assert!(Ruleset::separate_inout(0, 2, 3, 1).validate().is_ok());
    }

    #[test]
    fn test_missing_amount_columns_rejected() {
        let ruleset = Ruleset {
            amount_column: None,
            outflow_column: Some(2),
            ..Ruleset::default()
        };
        assert!(ruleset.validate().is_err());
    }

    #[test]
    fn test_non_ascii_delimiter_rejected() {
        let ruleset = Ruleset {
            delimiter: '§',
            ..Ruleset::default()
        };
        assert!(ruleset.validate().is_err());
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let ruleset: Ruleset = serde_yaml::from_str("amount_column: 3\ninvert_amounts: true\n").unwrap();
        assert_eq!(ruleset.amount_column, Some(3));
        assert!(ruleset.invert_amounts);
        assert_eq!(ruleset.date_format, "%Y-%m-%d");
        assert!(ruleset.has_header);
    }
}
