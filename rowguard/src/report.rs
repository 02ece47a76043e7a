//! Cross-check consolidation.
//!
//! Merges the violation samples of every executed check into one
//! de-duplicated report: one row per distinct violating logical record,
//! annotated with the blocking and warning descriptions it collected.
//! Records are identified by the table's unique key when one is declared
//! and trustworthy, by full row content otherwise. Content identity
//! folds genuinely duplicate source rows together, which can understate
//! distinct violating records.

use crate::check::{CheckResult, Severity};
use crate::error::Result;
use crate::frame::Frame;
use crate::value::Value;
use std::collections::{BTreeSet, HashMap};
use tracing::instrument;

/// Report column carrying the joined blocking descriptions.
pub const BLOCKING_COLUMN: &str = "blocking_descriptions";
/// Report column carrying the joined warning descriptions.
pub const WARNING_COLUMN: &str = "warning_descriptions";
/// Report column flagging records with no blocking failure.
pub const WARNING_ONLY_COLUMN: &str = "warning_only";

/// The consolidated violation report of one table.
#[derive(Debug, Clone)]
pub struct ConsolidatedReport {
    rows: Frame,
    truncated: bool,
}

impl ConsolidatedReport {
    /// One row per violating record: the unioned data columns followed
    /// by the description columns and the warning-only flag.
    pub fn rows(&self) -> &Frame {
        &self.rows
    }

    /// True when any contributing sample hit its row cap, making
    /// row-level totals lower bounds.
    pub fn truncated(&self) -> bool {
        self.truncated
    }
}

/// One logical record under construction.
#[derive(Debug, Default)]
struct Record {
    values: HashMap<String, Value>,
    blocking: BTreeSet<String>,
    warning: BTreeSet<String>,
}

/// Builds the consolidated report from a table's accumulated results.
///
/// `unique_key` selects key-based grouping; pass `None` to group by full
/// row content (also the right call when the key itself has duplicates).
/// With `include_warnings` false, warning-severity results are left out
/// entirely.
#[instrument(skip(results))]
pub fn consolidate(
    results: &[CheckResult],
    unique_key: Option<&str>,
    include_warnings: bool,
) -> Result<ConsolidatedReport> {
    let mut truncated = false;
    let mut columns: Vec<String> = Vec::new();
    let mut order: Vec<String> = Vec::new();
    let mut records: HashMap<String, Record> = HashMap::new();

    for result in results {
        if result.violations == 0 {
            continue;
        }
        if result.severity == Severity::Warning && !include_warnings {
            continue;
        }
        let Some(sample) = &result.sample else { continue };
        truncated |= result.truncated;
        for name in sample.column_names() {
            if !columns.contains(&name) {
                columns.push(name);
            }
        }
        for row in 0..sample.num_rows() {
            let key = group_key(sample, row, unique_key);
            let record = records.entry(key.clone()).or_insert_with(|| {
                order.push(key);
                Record::default()
            });
            // First non-null value wins per column, filling the holes
            // left by checks that projected different column sets.
            for (idx, name) in sample.column_names().into_iter().enumerate() {
                let value = sample.value(idx, row);
                if value.is_null() {
                    continue;
                }
                record.values.entry(name).or_insert(value);
            }
            match result.severity {
                Severity::Blocking => record.blocking.insert(result.description.clone()),
                Severity::Warning => record.warning.insert(result.description.clone()),
            };
        }
    }

    let mut out_columns = columns.clone();
    out_columns.push(BLOCKING_COLUMN.to_string());
    out_columns.push(WARNING_COLUMN.to_string());
    out_columns.push(WARNING_ONLY_COLUMN.to_string());

    let mut rows = Vec::with_capacity(order.len());
    for key in &order {
        let record = &records[key];
        let mut row: Vec<Value> = columns
            .iter()
            .map(|c| record.values.get(c).cloned().unwrap_or(Value::Null))
            .collect();
        row.push(join_descriptions(&record.blocking));
        row.push(join_descriptions(&record.warning));
        row.push(Value::Bool(record.blocking.is_empty()));
        rows.push(row);
    }
    Ok(ConsolidatedReport {
        rows: Frame::from_rows(&out_columns, &rows)?,
        truncated,
    })
}

/// Group identity of one sample row: the unique-key value when declared
/// and present in the sample, full row content otherwise.
fn group_key(sample: &Frame, row: usize, unique_key: Option<&str>) -> String {
    if let Some(key) = unique_key {
        if let Ok(idx) = sample.column_index(key) {
            return format!("k:{}", sample.value(idx, row).group_key_component());
        }
    }
    let mut parts: Vec<String> = Vec::with_capacity(sample.batch().num_columns() + 1);
    // Content keys embed column names so that equal values in different
    // columns cannot collide across checks.
    for (idx, name) in sample.column_names().into_iter().enumerate() {
        parts.push(format!("{name}={}", sample.value(idx, row).group_key_component()));
    }
    format!("c:{}", parts.join("\u{1}"))
}

fn join_descriptions(descriptions: &BTreeSet<String>) -> Value {
    if descriptions.is_empty() {
        Value::Null
    } else {
        Value::Str(
            descriptions
                .iter()
                .cloned()
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(columns: &[&str], rows: Vec<Vec<Value>>) -> Frame {
        let columns: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
        Frame::from_rows(&columns, &rows).unwrap()
    }

    fn result(
        description: &str,
        severity: Severity,
        sample: Frame,
        truncated: bool,
    ) -> CheckResult {
        CheckResult {
            description: description.to_string(),
            severity,
            violations: sample.num_rows() as u64,
            sample: Some(sample),
            truncated,
        }
    }

    fn two_failures() -> Vec<CheckResult> {
        vec![
            result(
                "amount must be positive",
                Severity::Blocking,
                sample(
                    &["id", "amount"],
                    vec![vec![Value::Int(2), Value::Str("-5".into())]],
                ),
                false,
            ),
            result(
                "amount looks unusual",
                Severity::Warning,
                sample(
                    &["id", "amount"],
                    vec![
                        vec![Value::Int(2), Value::Str("-5".into())],
                        vec![Value::Int(7), Value::Str("9999".into())],
                    ],
                ),
                false,
            ),
        ]
    }

    #[test]
    fn test_key_grouping_unions_descriptions() {
        let report = consolidate(&two_failures(), Some("id"), true).unwrap();
        let rows = report.rows();
        assert_eq!(rows.num_rows(), 2);
        // id=2 failed the blocking check and triggered the warning.
        assert_eq!(rows.value_by_name("id", 0).unwrap(), Value::Int(2));
        assert_eq!(
            rows.value_by_name(BLOCKING_COLUMN, 0).unwrap(),
            Value::Str("amount must be positive".into())
        );
        assert_eq!(
            rows.value_by_name(WARNING_COLUMN, 0).unwrap(),
            Value::Str("amount looks unusual".into())
        );
        assert_eq!(
            rows.value_by_name(WARNING_ONLY_COLUMN, 0).unwrap(),
            Value::Bool(false)
        );
        // id=7 only triggered the warning.
        assert_eq!(
            rows.value_by_name(WARNING_ONLY_COLUMN, 1).unwrap(),
            Value::Bool(true)
        );
        assert!(rows
            .value_by_name(BLOCKING_COLUMN, 1)
            .unwrap()
            .is_null());
    }

    #[test]
    fn test_warnings_excluded_on_request() {
        let report = consolidate(&two_failures(), Some("id"), false).unwrap();
        assert_eq!(report.rows().num_rows(), 1);
        assert!(report
            .rows()
            .value_by_name(WARNING_COLUMN, 0)
            .unwrap()
            .is_null());
    }

    #[test]
    fn test_consolidation_commutes_over_execution_order() {
        let mut reversed = two_failures();
        reversed.reverse();
        let a = consolidate(&two_failures(), Some("id"), true).unwrap();
        let b = consolidate(&reversed, Some("id"), true).unwrap();
        assert_eq!(a.rows().num_rows(), b.rows().num_rows());
        for row_a in 0..a.rows().num_rows() {
            let id = a.rows().value_by_name("id", row_a).unwrap();
            let row_b = (0..b.rows().num_rows())
                .find(|r| b.rows().value_by_name("id", *r).unwrap() == id)
                .unwrap();
            for col in [BLOCKING_COLUMN, WARNING_COLUMN, WARNING_ONLY_COLUMN] {
                assert_eq!(
                    a.rows().value_by_name(col, row_a).unwrap(),
                    b.rows().value_by_name(col, row_b).unwrap()
                );
            }
        }
    }

    #[test]
    fn test_enriched_columns_fill_within_key_group() {
        let results = vec![
            result(
                "date outside validity",
                Severity::Blocking,
                sample(
                    &["id", "valid_until"],
                    vec![vec![Value::Int(2), Value::Str("2020-01-01".into())]],
                ),
                false,
            ),
            result(
                "amount must be positive",
                Severity::Blocking,
                sample(
                    &["id", "amount"],
                    vec![vec![Value::Int(2), Value::Str("-5".into())]],
                ),
                false,
            ),
        ];
        let report = consolidate(&results, Some("id"), true).unwrap();
        let rows = report.rows();
        assert_eq!(rows.num_rows(), 1);
        // Both projections contribute their columns to the one record.
        assert_eq!(
            rows.value_by_name("valid_until", 0).unwrap(),
            Value::Str("2020-01-01".into())
        );
        assert_eq!(
            rows.value_by_name("amount", 0).unwrap(),
            Value::Str("-5".into())
        );
    }

    #[test]
    fn test_content_grouping_without_key() {
        let results = vec![
            result(
                "check one",
                Severity::Blocking,
                sample(&["a"], vec![vec![Value::Str("x".into())]]),
                false,
            ),
            result(
                "check two",
                Severity::Blocking,
                sample(&["a"], vec![vec![Value::Str("x".into())]]),
                false,
            ),
        ];
        let report = consolidate(&results, None, true).unwrap();
        let rows = report.rows();
        assert_eq!(rows.num_rows(), 1);
        assert_eq!(
            rows.value_by_name(BLOCKING_COLUMN, 0).unwrap(),
            Value::Str("check one; check two".into())
        );
    }

    #[test]
    fn test_truncation_propagates() {
        let results = vec![result(
            "capped check",
            Severity::Blocking,
            sample(&["a"], vec![vec![Value::Str("x".into())]]),
            true,
        )];
        assert!(consolidate(&results, None, true).unwrap().truncated());
        assert!(!consolidate(&two_failures(), None, true).unwrap().truncated());
    }

    #[test]
    fn test_clean_results_yield_empty_report() {
        let results = vec![CheckResult::passed("all good", Severity::Blocking)];
        let report = consolidate(&results, None, true).unwrap();
        assert_eq!(report.rows().num_rows(), 0);
    }
}
