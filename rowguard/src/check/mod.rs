//! The rule abstraction.
//!
//! A [`Check`] binds a negative filter (rows that fail), an optional
//! ignore filter (rows exempt) and reporting options, then executes once
//! against either backend: one aggregate query plus at most one sample
//! query in live mode, or two mask passes over the resident frame in
//! materialized mode. The result is a [`CheckResult`]; the check itself
//! is not re-runnable and is discarded after execution.
//!
//! Rules that cannot be expressed as a row predicate (duplicate
//! detection, dimension lookups, interval overlaps) live in the
//! submodules and produce the same [`CheckResult`] shape.

use crate::error::{GuardError, Result};
use crate::expr::Expr;
use crate::frame::Frame;
use crate::source::Source;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, instrument};

pub mod foreign_key;
pub mod overlap;
pub mod uniqueness;

/// Default cap on sample rows fetched per check.
pub const DEFAULT_SAMPLE_CAP: usize = 100;

/// How a failed check weighs on the table's verdict.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Violations count toward pass/fail.
    #[default]
    Blocking,
    /// Violations are reported but do not fail the table.
    Warning,
}

impl Severity {
    /// Lower-case string form, matching the serde representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Blocking => "blocking",
            Severity::Warning => "warning",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of one executed check.
///
/// The count always comes from the counting pass and stays authoritative
/// even when the sample was capped; `truncated` signals that row-level
/// totals derived from the sample are lower bounds.
#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    /// Human-readable description of the rule.
    pub description: String,
    /// Severity the rule was invoked with.
    pub severity: Severity,
    /// Number of violating rows.
    pub violations: u64,
    /// Capped sample of violating rows, when fetched.
    #[serde(skip)]
    pub sample: Option<Frame>,
    /// True when the sample hit its row cap.
    pub truncated: bool,
}

impl CheckResult {
    /// A result with no violations and no sample.
    pub fn passed(description: impl Into<String>, severity: Severity) -> Self {
        Self {
            description: description.into(),
            severity,
            violations: 0,
            sample: None,
            truncated: false,
        }
    }

    /// True when the check found no violating rows.
    pub fn is_ok(&self) -> bool {
        self.violations == 0
    }

    /// True when this result alone fails the table.
    pub fn is_blocking_failure(&self) -> bool {
        self.violations > 0 && self.severity == Severity::Blocking
    }
}

/// Options common to every rule invocation.
#[derive(Debug, Clone)]
pub struct CheckOptions {
    /// Extra caller-supplied exemption predicate, ANDed into the ignore
    /// filter.
    pub ignore_filter: Option<Expr>,
    /// Columns that must be populated for a row to be eligible.
    pub columns_not_null: Vec<String>,
    /// Whether to fetch a row sample in addition to the count.
    pub fetch_sample: bool,
    /// Projection for the sample; all columns when unset.
    pub output_columns: Option<Vec<String>>,
    /// Severity of a violation.
    pub severity: Severity,
    /// Overrides the generated description.
    pub description: Option<String>,
    /// Overrides the table's sample cap.
    pub sample_cap: Option<usize>,
}

impl Default for CheckOptions {
    fn default() -> Self {
        Self {
            ignore_filter: None,
            columns_not_null: Vec::new(),
            fetch_sample: true,
            output_columns: None,
            severity: Severity::Blocking,
            description: None,
            sample_cap: None,
        }
    }
}

impl CheckOptions {
    /// Blocking defaults with samples fetched.
    pub fn new() -> Self {
        Self::default()
    }

    /// A warning-severity variant of the defaults.
    pub fn warning() -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::default()
        }
    }

    /// The effective description, falling back to the rule's own.
    pub fn describe(&self, fallback: impl Into<String>) -> String {
        match &self.description {
            Some(d) => d.clone(),
            None => fallback.into(),
        }
    }
}

/// A bound, executable rule over one table.
#[derive(Debug, Clone)]
pub struct Check {
    description: String,
    negative: Expr,
    ignore: Option<Expr>,
    severity: Severity,
    fetch_sample: bool,
    output_columns: Option<Vec<String>>,
    sample_cap: usize,
}

impl Check {
    /// Creates a check from its negative filter and a description.
    pub fn new(description: impl Into<String>, negative: Expr) -> Self {
        Self {
            description: description.into(),
            negative,
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

    /// The check's description.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Counts violations with one aggregate query, then fetches at most
    /// `sample_cap` violating rows when violations exist and samples are
    /// wanted.
    #[instrument(skip(self, source), fields(check = %self.description))]
    pub async fn run_live(&self, source: &Source, table: &str) -> Result<CheckResult> {
        let dialect = source.dialect().as_ref();
        let negative_sql = self.negative.to_sql(dialect)?;
        let where_clause = match &self.ignore {
            Some(ignore) => format!(" WHERE {}", ignore.to_sql(dialect)?),
            None => String::new(),
        };
        let count_sql = format!(
            "SELECT CASE WHEN {negative_sql} THEN 'KO' ELSE 'OK' END as status, \
             count(*) as n_rows FROM {table}{where_clause} GROUP BY 1"
        );
        let (violations, passed) = ko_ok_counts(&source.run_query(&count_sql).await?)?;
        debug!(violations, passed, "counted violations");

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
        let sample_where = match &self.ignore {
            Some(ignore) => format!("({negative_sql}) AND {}", ignore.to_sql(dialect)?),
            None => negative_sql,
        };
        let sample_sql = format!(
            "SELECT {projection} FROM {table} WHERE {sample_where} LIMIT {}",
            self.sample_cap
        );
        let sample = source.run_query(&sample_sql).await?;
        result.truncated = sample.num_rows() == self.sample_cap;
        result.sample = Some(sample);
        Ok(result)
    }

    /// Counts and samples against a resident frame with two mask passes.
    #[instrument(skip(self, frame), fields(check = %self.description))]
    pub fn run_materialized(&self, frame: &Frame) -> Result<CheckResult> {
        let eligible = match &self.ignore {
            Some(ignore) => ignore.mask(frame)?,
            None => vec![true; frame.num_rows()],
        };
        let failing = self.negative.mask(frame)?;
        let combined: Vec<bool> = eligible
            .iter()
            .zip(&failing)
            .map(|(e, f)| *e && *f)
            .collect();
        let violations = combined.iter().filter(|b| **b).count() as u64;
        debug!(violations, "counted violations");

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

        let mut sample = frame.filter(&combined)?;
        // Flag before capping: the resident row set gives the exact size.
        result.truncated = sample.num_rows() > self.sample_cap;
        sample = sample.head(self.sample_cap);
        if let Some(columns) = &self.output_columns {
            sample = sample.select(columns)?;
        }
        result.sample = Some(sample);
        Ok(result)
    }
}

/// Live execution over a hand-built relation and negative fragment, for
/// the strategies whose SQL (joins, windows, concat keys) falls outside
/// the predicate IR. Issues the same count-then-sample query pair as
/// [`Check::run_live`].
#[derive(Debug)]
pub(crate) struct RawSqlCheck<'a> {
    pub description: &'a str,
    pub severity: Severity,
    pub fetch_sample: bool,
    pub projection: String,
    pub sample_cap: usize,
}

impl RawSqlCheck<'_> {
    #[instrument(skip(self, source, relation, negative_sql, where_sql), fields(check = %self.description))]
    pub(crate) async fn run(
        &self,
        source: &Source,
        relation: &str,
        negative_sql: &str,
        where_sql: Option<&str>,
    ) -> Result<CheckResult> {
        let where_clause = match where_sql {
            Some(w) => format!(" WHERE {w}"),
            None => String::new(),
        };
        let count_sql = format!(
            "SELECT CASE WHEN {negative_sql} THEN 'KO' ELSE 'OK' END as status, \
             count(*) as n_rows FROM {relation}{where_clause} GROUP BY 1"
        );
        let (violations, passed) = ko_ok_counts(&source.run_query(&count_sql).await?)?;
        debug!(violations, passed, "counted violations");

        let mut result = CheckResult {
            description: self.description.to_string(),
            severity: self.severity,
            violations,
            sample: None,
            truncated: false,
        };
        if violations == 0 || !self.fetch_sample {
            return Ok(result);
        }

        let sample_where = match where_sql {
            Some(w) => format!("({negative_sql}) AND {w}"),
            None => negative_sql.to_string(),
        };
        let sample_sql = format!(
            "SELECT {} FROM {relation} WHERE {sample_where} LIMIT {}",
            self.projection, self.sample_cap
        );
        let sample = source.run_query(&sample_sql).await?;
        result.truncated = sample.num_rows() == self.sample_cap;
        result.sample = Some(sample);
        Ok(result)
    }
}

/// Parses the KO/OK aggregate result into (violations, passed). Missing
/// groups mean zero rows on that side.
pub(crate) fn ko_ok_counts(frame: &Frame) -> Result<(u64, u64)> {
    let mut ko = 0u64;
    let mut ok = 0u64;
    for row in 0..frame.num_rows() {
        let status = frame
            .value(0, row)
            .string_form()
            .unwrap_or_default()
            .to_uppercase();
        let count = count_cell(&frame.value(1, row))?;
        match status.as_str() {
            "KO" => ko = count,
            "OK" => ok = count,
            other => {
                return Err(GuardError::query(format!(
                    "unexpected status group '{other}' in count query result"
                )))
            }
        }
    }
    Ok((ko, ok))
}

/// Reads a count cell from an aggregate query result.
pub(crate) fn count_cell(value: &Value) -> Result<u64> {
    match value {
        Value::Int(i) if *i >= 0 => Ok(*i as u64),
        Value::Float(f) if *f >= 0.0 => Ok(*f as u64),
        Value::Str(s) => s
            .parse::<u64>()
            .map_err(|_| GuardError::query(format!("count query returned non-numeric '{s}'"))),
        other => Err(GuardError::query(format!(
            "count query returned non-numeric {other}"
        ))),
    }
}
