//! Duplicate detection.
//!
//! Uniqueness cannot be phrased as a row predicate, so this check counts
//! `count(*) - count(distinct col)` in live mode and via a group-count
//! pass in memory. The violation count is the number of surplus rows;
//! the sample contains every row of a duplicated group, which can exceed
//! the count.

use crate::check::{count_cell, CheckResult, Severity, DEFAULT_SAMPLE_CAP};
use crate::error::Result;
use crate::expr::Expr;
use crate::frame::Frame;
use crate::source::Source;
use std::collections::HashMap;
use tracing::{debug, instrument};

/// A single-column uniqueness check.
#[derive(Debug, Clone)]
pub struct UniquenessCheck {
    column: String,
    description: String,
    ignore: Option<Expr>,
    severity: Severity,
    fetch_sample: bool,
    output_columns: Option<Vec<String>>,
    sample_cap: usize,
}

impl UniquenessCheck {
    /// Creates a uniqueness check over `column`.
    pub fn new(description: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            description: description.into(),
            ignore: None,
            severity: Severity::Blocking,
            fetch_sample: true,
            output_columns: None,
            sample_cap: DEFAULT_SAMPLE_CAP,
        }
    }

    /// Sets the ignore filter selecting exempt rows.
    pub fn with_ignore(mut self, ignore: Option<Expr>) -> Self {
        self.ignore = ignore;
        self
    }

    /// Sets the severity.
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// Enables or disables sample fetching.
    pub fn with_sample(mut self, fetch_sample: bool) -> Self {
        self.fetch_sample = fetch_sample;
        self
    }

    /// Restricts the sample to the given columns.
    pub fn with_output_columns(mut self, columns: Option<Vec<String>>) -> Self {
        self.output_columns = columns;
        self
    }

    /// Caps the number of sample rows.
    pub fn with_sample_cap(mut self, cap: usize) -> Self {
        self.sample_cap = cap;
        self
    }

    /// Counts surplus rows with one aggregate query; the sample pulls
    /// every member of a duplicated group through a HAVING subquery.
    #[instrument(skip(self, source), fields(check = %self.description))]
    pub async fn run_live(&self, source: &Source, table: &str) -> Result<CheckResult> {
        let dialect = source.dialect().as_ref();
        let where_clause = match &self.ignore {
            Some(ignore) => format!(" WHERE {}", ignore.to_sql(dialect)?),
            None => String::new(),
        };
        let member = format!("cast({} as string)", self.column);
        let count_sql = format!(
            "SELECT count(*) - count(distinct {member}) as n_dup FROM {table}{where_clause}"
        );
        let counts = source.run_query(&count_sql).await?;
        let violations = count_cell(&counts.value(0, 0))?;
        debug!(violations, "counted duplicate rows");

        let mut result = CheckResult {
            description: self.description.clone(),
            severity: self.severity,
            violations,
            sample: None,
            truncated: false,
        };
        if violations == 0 || !self.fetch_sample {
            return Ok(result);
        }

        let projection = match &self.output_columns {
            Some(columns) => columns.join(", "),
            None => "*".to_string(),
        };
        let and_ignore = match &self.ignore {
            Some(ignore) => format!(" AND {}", ignore.to_sql(dialect)?),
            None => String::new(),
        };
        let sample_sql = format!(
            "SELECT {projection} FROM {table} WHERE {member} IN \
             (SELECT {member} FROM {table}{where_clause} GROUP BY 1 HAVING count(*) > 1)\
             {and_ignore} LIMIT {}",
            self.sample_cap
        );
        let sample = source.run_query(&sample_sql).await?;
        result.truncated = sample.num_rows() == self.sample_cap;
        result.sample = Some(sample);
        Ok(result)
    }

    /// Group-count pass over the resident frame.
    #[instrument(skip(self, frame), fields(check = %self.description))]
    pub fn run_materialized(&self, frame: &Frame) -> Result<CheckResult> {
        let eligible = match &self.ignore {
            Some(ignore) => ignore.mask(frame)?,
            None => vec![true; frame.num_rows()],
        };
        let idx = frame.column_index(&self.column)?;
        let mut group_sizes: HashMap<String, u64> = HashMap::new();
        let mut total = 0u64;
        // Null keys count toward the surplus (live mode's count(distinct)
        // skips them) but are never sampled, matching NULL IN (..).
        let keys: Vec<Option<String>> = (0..frame.num_rows())
            .map(|row| {
                if !eligible[row] {
                    return None;
                }
                total += 1;
                let value = frame.value(idx, row);
                if value.is_null() {
                    return None;
                }
                let key = value.group_key_component();
                *group_sizes.entry(key.clone()).or_insert(0) += 1;
                Some(key)
            })
            .collect();
        let violations = total - group_sizes.len() as u64;
        debug!(violations, "counted duplicate rows");

        let mut result = CheckResult {
            description: self.description.clone(),
            severity: self.severity,
            violations,
            sample: None,
            truncated: false,
        };
        if violations == 0 || !self.fetch_sample {
            return Ok(result);
        }

        let mask: Vec<bool> = keys
            .iter()
            .map(|key| match key {
                Some(k) => group_sizes.get(k).copied().unwrap_or(0) > 1,
                None => false,
            })
            .collect();
        let mut sample = frame.filter(&mask)?;
        result.truncated = sample.num_rows() > self.sample_cap;
        sample = sample.head(self.sample_cap);
        if let Some(columns) = &self.output_columns {
            sample = sample.select(columns)?;
        }
        result.sample = Some(sample);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn frame_with_dupes() -> Frame {
        let columns = vec!["id".to_string(), "name".to_string()];
        let rows = vec![
            vec![Value::Int(1), Value::Str("a".into())],
            vec![Value::Int(2), Value::Str("b".into())],
            vec![Value::Int(1), Value::Str("c".into())],
            vec![Value::Int(3), Value::Str("d".into())],
            vec![Value::Int(1), Value::Str("e".into())],
        ];
        Frame::from_rows(&columns, &rows).unwrap()
    }

    #[test]
    fn test_materialized_counts_surplus_rows() {
        let check = UniquenessCheck::new("id unique", "id");
        let result = check.run_materialized(&frame_with_dupes()).unwrap();
        // Three rows share id=1: two surplus rows, three sampled.
        assert_eq!(result.violations, 2);
        assert_eq!(result.sample.unwrap().num_rows(), 3);
    }

    #[test]
    fn test_materialized_all_unique() {
        let columns = vec!["id".to_string()];
        let rows = vec![vec![Value::Int(1)], vec![Value::Int(2)]];
        let frame = Frame::from_rows(&columns, &rows).unwrap();
        let check = UniquenessCheck::new("id unique", "id");
        let result = check.run_materialized(&frame).unwrap();
        assert!(result.is_ok());
        assert!(result.sample.is_none());
    }

    #[test]
    fn test_numeric_and_string_forms_collide() {
        // A string "1" and an integer 1 are the same key in both
        // backends, since live mode compares string casts.
        let columns = vec!["id".to_string()];
        let rows = vec![
            vec![Value::Str("1".into())],
            vec![Value::Int(1)],
        ];
        let frame = Frame::from_rows(&columns, &rows).unwrap();
        let check = UniquenessCheck::new("id unique", "id");
        let result = check.run_materialized(&frame).unwrap();
        assert_eq!(result.violations, 1);
    }
}
