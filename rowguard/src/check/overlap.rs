//! Interval-intersection detection.
//!
//! Rows carry a validity interval (start and end columns, optionally a
//! partition key such as a contract id). Intervals within one partition
//! must not overlap. Live mode sorts each partition with a window
//! function and compares every interval's end with the next start; the
//! in-memory pass sorts eligible rows the same way. The flagged row is
//! the earlier interval of an overlapping pair.

use crate::check::{CheckResult, RawSqlCheck, Severity, DEFAULT_SAMPLE_CAP};
use crate::error::Result;
use crate::expr::Expr;
use crate::frame::Frame;
use crate::source::Source;
use chrono::NaiveDateTime;
use tracing::{debug, instrument};

/// An interval-overlap check over one table.
#[derive(Debug, Clone)]
pub struct OverlapCheck {
    key_columns: Vec<String>,
    start_column: String,
    end_column: String,
    start_format: Option<String>,
    end_format: Option<String>,
    /// When true, intervals may touch: a start equal to the previous end
    /// is not an overlap.
    extremes_exclude: bool,
    description: String,
    ignore: Option<Expr>,
    severity: Severity,
    fetch_sample: bool,
    output_columns: Option<Vec<String>>,
    sample_cap: usize,
}

impl OverlapCheck {
    /// Creates an overlap check partitioned by `key_columns` (empty for
    /// a single global sequence).
    pub fn new(
        description: impl Into<String>,
        key_columns: Vec<String>,
        start_column: impl Into<String>,
        end_column: impl Into<String>,
    ) -> Self {
        Self {
            key_columns,
            start_column: start_column.into(),
            end_column: end_column.into(),
            start_format: None,
            end_format: None,
            extremes_exclude: true,
            description: description.into(),
            ignore: None,
            severity: Severity::Blocking,
            fetch_sample: true,
            output_columns: None,
            sample_cap: DEFAULT_SAMPLE_CAP,
        }
    }

    /// Sets the parse formats for the start and end columns.
    pub fn with_formats(
        mut self,
        start_format: Option<String>,
        end_format: Option<String>,
    ) -> Self {
        self.start_format = start_format;
        self.end_format = end_format;
        self
    }

    /// Whether touching intervals (end equal to the next start) are
    /// admitted. Defaults to true.
    pub fn with_extremes_exclude(mut self, extremes_exclude: bool) -> Self {
        self.extremes_exclude = extremes_exclude;
        self
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

    fn overlap_op(&self) -> &'static str {
        if self.extremes_exclude {
            "<"
        } else {
            "<="
        }
    }

    /// One window subquery computes the next interval start per
    /// partition; overlap rows fall out of a comparison against it.
    #[instrument(skip(self, source), fields(check = %self.description))]
    pub async fn run_live(&self, source: &Source, table: &str) -> Result<CheckResult> {
        let dialect = source.dialect().as_ref();
        let start_ts = dialect.cast_timestamp(&self.start_column, self.start_format.as_deref());
        let end_ts = dialect.cast_timestamp(&self.end_column, self.end_format.as_deref());
        let partition = if self.key_columns.is_empty() {
            String::new()
        } else {
            format!("PARTITION BY {} ", self.key_columns.join(", "))
        };
        let where_clause = match &self.ignore {
            Some(ignore) => format!(" WHERE {}", ignore.to_sql(dialect)?),
            None => String::new(),
        };
        let relation = format!(
            "(SELECT *, lead({start_ts}) OVER ({partition}ORDER BY {start_ts}) as next_start \
             FROM {table}{where_clause}) w"
        );
        let negative = format!("coalesce(next_start {} {end_ts}, FALSE)", self.overlap_op());
        let projection = match &self.output_columns {
            Some(columns) => columns.join(", "),
            None => "*".to_string(),
        };
        let raw = RawSqlCheck {
            description: &self.description,
            severity: self.severity,
            fetch_sample: self.fetch_sample,
            projection,
            sample_cap: self.sample_cap,
        };
        raw.run(source, &relation, &negative, None).await
    }

    /// Sort-and-scan pass over the resident frame.
    #[instrument(skip(self, frame), fields(check = %self.description))]
    pub fn run_materialized(&self, frame: &Frame) -> Result<CheckResult> {
        let eligible = match &self.ignore {
            Some(ignore) => ignore.mask(frame)?,
            None => vec![true; frame.num_rows()],
        };
        let start_idx = frame.column_index(&self.start_column)?;
        let end_idx = frame.column_index(&self.end_column)?;

        // Rows without a parseable start cannot be ordered and cannot
        // overlap anything; rows without an end stay in the sequence but
        // are never flagged, like their SQL comparison collapsing to
        // false.
        let mut intervals: Vec<(String, NaiveDateTime, Option<NaiveDateTime>, usize)> = Vec::new();
        for row in 0..frame.num_rows() {
            if !eligible[row] {
                continue;
            }
            let start = frame
                .value(start_idx, row)
                .to_timestamp(self.start_format.as_deref());
            let Some(start) = start else { continue };
            let end = frame
                .value(end_idx, row)
                .to_timestamp(self.end_format.as_deref());
            let mut group = String::new();
            for key in &self.key_columns {
                group.push_str(&frame.value_by_name(key, row)?.group_key_component());
                group.push('\u{1}');
            }
            intervals.push((group, start, end, row));
        }
        intervals.sort_by(|a, b| (&a.0, a.1).cmp(&(&b.0, b.1)));

        let mut mask = vec![false; frame.num_rows()];
        for pair in intervals.windows(2) {
            let (group, _, end, row) = &pair[0];
            let (next_group, next_start, _, _) = &pair[1];
            if group != next_group {
                continue;
            }
            let Some(end) = end else { continue };
            let overlaps = if self.extremes_exclude {
                next_start < end
            } else {
                next_start <= end
            };
            if overlaps {
                mask[*row] = true;
            }
        }
        let violations = mask.iter().filter(|b| **b).count() as u64;
        debug!(violations, "counted overlapping intervals");

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
