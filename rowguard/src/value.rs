//! Scalar values shared by the SQL and in-memory predicate renderers.
//!
//! A [`Value`] is one cell of a table. Both backends funnel their data
//! through this type so that casts and comparisons behave identically
//! whether a rule runs as generated SQL or as an in-memory mask.

use chrono::{NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use std::cmp::Ordering;
use std::fmt;

/// Datetime formats tried, in order, when a value is cast to timestamp
/// without an explicit format. Mirrors what a permissive engine-side
/// `cast(.. as timestamp)` accepts.
pub static CANDIDATE_DATETIME_FORMATS: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d",
        "%Y/%m/%d",
        "%d-%m-%Y",
        "%d/%m/%Y",
    ]
});

/// A single scalar cell value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// SQL NULL / Arrow null
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value
    Int(i64),
    /// Floating point value
    Float(f64),
    /// String value
    Str(String),
    /// Timestamp value (no timezone)
    Timestamp(NaiveDateTime),
}

impl Value {
    /// Returns true for SQL NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns true when the value is null or its string form is empty.
    ///
    /// This is the shared "missing" notion: a column is considered
    /// populated only when it is non-null AND non-empty as a string.
    pub fn is_null_or_empty(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Str(s) => s.is_empty(),
            _ => false,
        }
    }

    /// The string form of the value, as `cast(x as string)` would yield.
    /// Returns `None` for null.
    pub fn string_form(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Bool(b) => Some(b.to_string()),
            Value::Int(i) => Some(i.to_string()),
            Value::Float(f) => Some(format_float(*f)),
            Value::Str(s) => Some(s.clone()),
            Value::Timestamp(ts) => Some(ts.format("%Y-%m-%d %H:%M:%S").to_string()),
        }
    }

    /// Safe cast to float: `None` stands for the SQL NULL a safe cast
    /// yields on non-numeric input.
    pub fn to_float(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Str(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
    }

    /// Safe cast to timestamp. With a format, only that format is
    /// accepted; without one, the candidate formats are tried in order.
    pub fn to_timestamp(&self, format: Option<&str>) -> Option<NaiveDateTime> {
        match self {
            Value::Timestamp(ts) => Some(*ts),
            Value::Str(s) => {
                let s = s.trim();
                if s.is_empty() {
                    return None;
                }
                match format {
                    Some(fmt) => parse_datetime(s, fmt),
                    None => CANDIDATE_DATETIME_FORMATS
                        .iter()
                        .find_map(|fmt| parse_datetime(s, fmt)),
                }
            }
            _ => None,
        }
    }

    /// Renders the value as a SQL literal.
    pub fn to_sql_literal(&self) -> String {
        match self {
            Value::Null => "NULL".to_string(),
            Value::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => format_float(*f),
            Value::Str(s) => format!("'{}'", s.replace('\'', "''")),
            Value::Timestamp(ts) => format!("'{}'", ts.format("%Y-%m-%d %H:%M:%S")),
        }
    }

    /// Three-way comparison with SQL semantics: any null operand makes
    /// the comparison undefined.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, _) | (_, Value::Null) => None,
            (Value::Timestamp(a), Value::Timestamp(b)) => Some(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Str(a), Value::Str(b)) => {
                // Numeric strings compare numerically when both parse,
                // the way engines coerce; otherwise lexically.
                match (a.trim().parse::<f64>(), b.trim().parse::<f64>()) {
                    (Ok(x), Ok(y)) => x.partial_cmp(&y),
                    _ => Some(a.cmp(b)),
                }
            }
            _ => {
                let a = self.to_float()?;
                let b = other.to_float()?;
                a.partial_cmp(&b)
            }
        }
    }

    /// A stable key component for content-based row grouping. Nulls get
    /// a marker that cannot collide with real string forms.
    pub fn group_key_component(&self) -> String {
        match self.string_form() {
            Some(s) => format!("v:{s}"),
            None => "\u{0}null".to_string(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.string_form() {
            Some(s) => write!(f, "{s}"),
            None => write!(f, "NULL"),
        }
    }
}

fn parse_datetime(s: &str, fmt: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, fmt)
        .ok()
        .or_else(|| NaiveDate::parse_from_str(s, fmt).ok().map(|d| d.and_hms_opt(0, 0, 0).unwrap()))
}

/// Integral floats print without a trailing `.0` so string forms line up
/// with engine output (`1` rather than `1.0`).
fn format_float(f: f64) -> String {
    if f.fract() == 0.0 && f.is_finite() && f.abs() < 1e15 {
        format!("{}", f as i64)
    } else {
        format!("{f}")
    }
}
