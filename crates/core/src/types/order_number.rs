//! Human-readable order numbers.
//!
//! Order numbers follow the `PREFIX-YYYYMMDD-NNN` format: a configurable
//! prefix, the order date, and a zero-padded daily sequence starting at 001.
//! Numbers are unique and the daily sequence is strictly increasing.

use core::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Errors that can occur when parsing an [`OrderNumber`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum OrderNumberError {
    /// The input does not match the `PREFIX-YYYYMMDD-NNN` shape.
    #[error("order number must have the form PREFIX-YYYYMMDD-NNN")]
    Malformed,
    /// The date segment is not a valid calendar date.
    #[error("invalid date segment: {0}")]
    InvalidDate(String),
    /// The sequence segment is not a number in 1..=999.
    #[error("invalid sequence segment: {0}")]
    InvalidSequence(String),
}

/// A human-readable order number in `PREFIX-YYYYMMDD-NNN` format.
///
/// ## Examples
///
/// ```
/// use chrono::NaiveDate;
/// use wandersim_core::OrderNumber;
///
/// let date = NaiveDate::from_ymd_opt(2026, 3, 14).expect("valid date");
/// let number = OrderNumber::new("WS", date, 1);
/// assert_eq!(number.to_string(), "WS-20260314-001");
///
/// let parsed: OrderNumber = "WS-20260314-001".parse().expect("valid number");
/// assert_eq!(parsed.sequence(), 1);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderNumber(String);

impl OrderNumber {
    /// Build an order number from its parts.
    ///
    /// The sequence is zero-padded to three digits; values above 999 widen
    /// naturally rather than truncating.
    #[must_use]
    pub fn new(prefix: &str, date: NaiveDate, sequence: u32) -> Self {
        Self(format!("{prefix}-{}-{sequence:03}", date.format("%Y%m%d")))
    }

    /// Returns the order number as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the `OrderNumber` and returns its inner string.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }

    /// The prefix segment (everything before the date).
    #[must_use]
    pub fn prefix(&self) -> &str {
        self.0.rsplitn(3, '-').nth(2).unwrap_or("")
    }

    /// The date segment.
    ///
    /// Returns `None` when the stored string does not carry a valid date
    /// (possible only for values constructed through deserialization).
    #[must_use]
    pub fn date(&self) -> Option<NaiveDate> {
        let segment = self.0.rsplitn(3, '-').nth(1)?;
        NaiveDate::parse_from_str(segment, "%Y%m%d").ok()
    }

    /// The daily sequence number.
    ///
    /// Returns 0 when the stored string does not carry a numeric sequence.
    #[must_use]
    pub fn sequence(&self) -> u32 {
        self.0
            .rsplit('-')
            .next()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0)
    }

    /// The next order number in the same day's sequence.
    #[must_use]
    pub fn next(&self) -> Self {
        let prefix = self.prefix();
        let date_segment = self.0.rsplitn(3, '-').nth(1).unwrap_or("");
        Self(format!(
            "{prefix}-{date_segment}-{:03}",
            self.sequence() + 1
        ))
    }
}

impl fmt::Display for OrderNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for OrderNumber {
    type Err = OrderNumberError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.rsplitn(3, '-');
        let sequence = parts.next().ok_or(OrderNumberError::Malformed)?;
        let date = parts.next().ok_or(OrderNumberError::Malformed)?;
        let prefix = parts.next().ok_or(OrderNumberError::Malformed)?;

        if prefix.is_empty() {
            return Err(OrderNumberError::Malformed);
        }

        NaiveDate::parse_from_str(date, "%Y%m%d")
            .map_err(|_| OrderNumberError::InvalidDate(date.to_owned()))?;

        let seq: u32 = sequence
            .parse()
            .map_err(|_| OrderNumberError::InvalidSequence(sequence.to_owned()))?;
        if seq == 0 || sequence.len() < 3 {
            return Err(OrderNumberError::InvalidSequence(sequence.to_owned()));
        }

        Ok(Self(s.to_owned()))
    }
}
