//! Checked tables.
//!
//! A [`Table`] owns one backend (a live source plus table name, or a
//! resident [`Frame`]), the declarative context every rule shares (base
//! filter, unique key, datetime formats, row caps) and the append-only
//! list of results produced by the rules invoked on it. Rule methods
//! translate their parameters into predicates or dedicated strategies,
//! execute once against the backend and record the outcome; the report
//! module consumes the accumulated results.

use crate::check::foreign_key::{ForeignKeyCheck, OrderedRange, TableData};
use crate::check::overlap::OverlapCheck;
use crate::check::uniqueness::UniquenessCheck;
use crate::check::{count_cell, Check, CheckOptions, CheckResult};
use crate::error::{GuardError, Result};
use crate::expr::{CompareOp, Expr};
use crate::frame::Frame;
use crate::predicate::{
    self, format_violation, ignore_predicate, not_null_guard, null_or_empty, Coercion,
};
use crate::report::{self, ConsolidatedReport};
use crate::source::Source;
use crate::value::{Value, CANDIDATE_DATETIME_FORMATS};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{instrument, warn};

/// Rows sampled when inferring a column's datetime format.
const FORMAT_INFERENCE_SAMPLE: usize = 20;

/// Default cap on sample rows per check, overridable per table and per
/// invocation.
pub const DEFAULT_TABLE_SAMPLE_CAP: usize = 100;

/// Where a table's rows live.
#[derive(Debug, Clone)]
pub enum Backend {
    /// Queried on demand through a bound source.
    Live { source: Arc<Source>, table: String },
    /// Fully resident in memory.
    Materialized { frame: Frame },
}

/// A table under validation.
#[derive(Debug, Clone)]
pub struct Table {
    name: String,
    backend: Backend,
    unique_key: Option<String>,
    base_filter: Option<Expr>,
    datetime_formats: HashMap<String, Option<String>>,
    sample_cap: usize,
    output_columns: Option<Vec<String>>,
    key_problem: bool,
    results: Vec<CheckResult>,
}

impl Table {
    /// A live table reached through `source`. `table` is used verbatim
    /// in generated FROM clauses and may be qualified (`db.table`).
    pub fn live(source: Arc<Source>, table: impl Into<String>) -> Self {
        let table = table.into();
        Self {
            name: table.clone(),
            backend: Backend::Live { source, table },
            unique_key: None,
            base_filter: None,
            datetime_formats: HashMap::new(),
            sample_cap: DEFAULT_TABLE_SAMPLE_CAP,
            output_columns: None,
            key_problem: false,
            results: Vec::new(),
        }
    }

    /// A materialized table over a resident frame.
    pub fn materialized(name: impl Into<String>, frame: Frame) -> Self {
        Self {
            name: name.into(),
            backend: Backend::Materialized { frame },
            unique_key: None,
            base_filter: None,
            datetime_formats: HashMap::new(),
            sample_cap: DEFAULT_TABLE_SAMPLE_CAP,
            output_columns: None,
            key_problem: false,
            results: Vec::new(),
        }
    }

    /// Declares the unique-key column used by key checks and report
    /// grouping.
    pub fn with_unique_key(mut self, column: impl Into<String>) -> Self {
        self.unique_key = Some(column.into());
        self
    }

    /// A persistent filter ANDed into every check on this table.
    pub fn with_base_filter(mut self, filter: Expr) -> Self {
        self.base_filter = Some(filter);
        self
    }

    /// Declares the datetime parse format of a column, short-circuiting
    /// inference.
    pub fn with_datetime_format(
        mut self,
        column: impl Into<String>,
        format: impl Into<String>,
    ) -> Self {
        self.datetime_formats
            .insert(column.into(), Some(format.into()));
        self
    }

    /// Table-level default cap on sample rows.
    pub fn with_sample_cap(mut self, cap: usize) -> Self {
        self.sample_cap = cap;
        self
    }

    /// Table-level default projection for samples.
    pub fn with_output_columns(mut self, columns: Vec<String>) -> Self {
        self.output_columns = Some(columns);
        self
    }

    /// The table's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The declared unique key, if any.
    pub fn unique_key(&self) -> Option<&str> {
        self.unique_key.as_deref()
    }

    /// True when a uniqueness check found duplicates in the unique key.
    pub fn key_problem(&self) -> bool {
        self.key_problem
    }

    /// Results of every check run so far, in execution order.
    pub fn results(&self) -> &[CheckResult] {
        &self.results
    }

    /// Drops the accumulated results (and the key-problem flag).
    pub fn clear_results(&mut self) {
        self.results.clear();
        self.key_problem = false;
    }

    /// Consolidates the accumulated results into one de-duplicated
    /// report. Grouping uses the unique key unless the key itself was
    /// found to have duplicates, in which case full row content is the
    /// only safe identity.
    pub fn consolidated_rows(&self, include_warnings: bool) -> Result<ConsolidatedReport> {
        let key = if self.key_problem {
            None
        } else {
            self.unique_key.as_deref()
        };
        report::consolidate(&self.results, key, include_warnings)
    }

    /// Number of rows, respecting the base filter.
    #[instrument(skip(self), fields(table = %self.name))]
    pub async fn row_count(&self) -> Result<u64> {
        match &self.backend {
            Backend::Live { source, table } => {
                let where_clause = match &self.base_filter {
                    Some(f) => format!(" WHERE {}", f.to_sql(source.dialect().as_ref())?),
                    None => String::new(),
                };
                let sql = format!("SELECT count(*) as n_rows FROM {table}{where_clause}");
                let frame = source.run_query(&sql).await?;
                count_cell(&frame.value(0, 0))
            }
            Backend::Materialized { frame } => match &self.base_filter {
                Some(f) => Ok(f.mask(frame)?.iter().filter(|b| **b).count() as u64),
                None => Ok(frame.num_rows() as u64),
            },
        }
    }

    // --- rule invocations -------------------------------------------------

    /// Rows where `column` is null or empty.
    pub async fn check_not_empty_column(
        &mut self,
        column: &str,
        options: CheckOptions,
    ) -> Result<u64> {
        let check = self.build_check(
            format!("column {column} must not be empty"),
            null_or_empty(column),
            &[],
            &options,
        );
        self.execute(check).await
    }

    /// [`Self::check_not_empty_column`] over several columns; returns a
    /// column → count map.
    pub async fn check_not_empty_columns(
        &mut self,
        columns: &[String],
        options: CheckOptions,
    ) -> Result<HashMap<String, u64>> {
        let mut counts = HashMap::with_capacity(columns.len());
        for column in columns {
            let count = self.check_not_empty_column(column, options.clone()).await?;
            counts.insert(column.clone(), count);
        }
        Ok(counts)
    }

    /// Rows where the declared unique key is null or empty.
    pub async fn check_key_not_null(&mut self, options: CheckOptions) -> Result<u64> {
        let key = self.require_unique_key()?.to_string();
        let check = self.build_check(
            format!("unique key {key} must not be empty"),
            null_or_empty(&key),
            &[],
            &options,
        );
        self.execute(check).await
    }

    /// Duplicate values in `column`.
    pub async fn check_unique_column(
        &mut self,
        column: &str,
        options: CheckOptions,
    ) -> Result<u64> {
        let check = UniquenessCheck::new(
            options.describe(format!("column {column} must not have duplicates")),
            column,
        )
        .with_ignore(self.ignore_for(&[column.to_string()], &options))
        .with_severity(options.severity)
        .with_sample(options.fetch_sample)
        .with_output_columns(self.projection(&options))
        .with_sample_cap(self.cap(&options));
        let result = match &self.backend {
            Backend::Live { source, table } => check.run_live(source, table).await?,
            Backend::Materialized { frame } => check.run_materialized(frame)?,
        };
        Ok(self.record(result))
    }

    /// Duplicate values in the declared unique key; duplicates also set
    /// the table's key-problem flag, which degrades report grouping.
    pub async fn check_key_unique(&mut self, options: CheckOptions) -> Result<u64> {
        let key = self.require_unique_key()?.to_string();
        let options = CheckOptions {
            description: Some(
                options.describe(format!("unique key {key} must not have duplicates")),
            ),
            ..options
        };
        let violations = self.check_unique_column(&key, options).await?;
        if violations > 0 {
            warn!(table = %self.name, key = %key, "unique key has duplicates");
            self.key_problem = true;
        }
        Ok(violations)
    }

    /// Values of each column that fail to parse as a datetime with the
    /// given format (or the column's declared/inferred format).
    pub async fn check_datetime_format(
        &mut self,
        columns: &[String],
        format: Option<String>,
        options: CheckOptions,
    ) -> Result<HashMap<String, u64>> {
        let mut counts = HashMap::with_capacity(columns.len());
        for column in columns {
            let fmt = match &format {
                Some(f) => Some(f.clone()),
                None => self.format_for(column).await?,
            };
            let described = match &fmt {
                Some(f) => format!("column {column} must match datetime format {f}"),
                None => format!("column {column} must be a valid datetime"),
            };
            let check = self.build_check(
                options.describe(described),
                format_violation(column, fmt),
                &[column.clone()],
                &options,
            );
            let count = self.execute(check).await?;
            counts.insert(column.clone(), count);
        }
        Ok(counts)
    }

    /// Numeric values of `column` outside `[min, max]`, with per-bound
    /// inclusivity.
    pub async fn check_range(
        &mut self,
        column: &str,
        min: Option<Value>,
        max: Option<Value>,
        min_included: bool,
        max_included: bool,
        options: CheckOptions,
    ) -> Result<u64> {
        self.range_check(
            column,
            min,
            max,
            min_included,
            max_included,
            Coercion::Float,
            options,
        )
        .await
    }

    /// Date values of `column` outside `[min, max]`.
    pub async fn check_date_range(
        &mut self,
        column: &str,
        min: Option<Value>,
        max: Option<Value>,
        min_included: bool,
        max_included: bool,
        format: Option<String>,
        options: CheckOptions,
    ) -> Result<u64> {
        let fmt = match format {
            Some(f) => Some(f),
            None => self.format_for(column).await?,
        };
        self.range_check(
            column,
            min,
            max,
            min_included,
            max_included,
            Coercion::Timestamp(fmt),
            options,
        )
        .await
    }

    /// Date values of `column` later than now.
    pub async fn check_not_in_future(
        &mut self,
        column: &str,
        format: Option<String>,
        options: CheckOptions,
    ) -> Result<u64> {
        let options = CheckOptions {
            description: Some(
                options.describe(format!("column {column} must not be in the future")),
            ),
            ..options
        };
        let now = Value::Timestamp(Utc::now().naive_utc());
        self.check_date_range(column, None, Some(now), true, true, format, options)
            .await
    }

    /// Rows where the numeric values of `columns` are not ascending left
    /// to right.
    pub async fn check_ordering(
        &mut self,
        columns: &[String],
        strictly_ascending: bool,
        options: CheckOptions,
    ) -> Result<u64> {
        let negative =
            predicate::ordering_violation(columns, strictly_ascending, &Coercion::Float);
        let check = self.build_check(
            format!("columns {} must be in ascending order", columns.join(", ")),
            negative,
            columns,
            &options,
        );
        self.execute(check).await
    }

    /// Rows where the date values of `columns` are not ascending left to
    /// right. Each column parses with its own declared or inferred
    /// format.
    pub async fn check_date_ordering(
        &mut self,
        columns: &[String],
        strictly_ascending: bool,
        options: CheckOptions,
    ) -> Result<u64> {
        let mut operands = Vec::with_capacity(columns.len());
        for column in columns {
            let fmt = self.format_for(column).await?;
            operands.push(Expr::col(column).cast_timestamp(fmt));
        }
        let negative = predicate::ordering_violation_operands(&operands, strictly_ascending);
        let check = self.build_check(
            format!(
                "date columns {} must be in ascending order",
                columns.join(", ")
            ),
            negative,
            columns,
            &options,
        );
        self.execute(check).await
    }

    /// Values of `column` outside the admitted list.
    pub async fn check_in_list(
        &mut self,
        column: &str,
        values: &[String],
        case_sensitive: bool,
        options: CheckOptions,
    ) -> Result<u64> {
        let negative = predicate::set_membership_violation(column, values, case_sensitive);
        let check = self.build_check(
            format!("column {column} must be one of the admitted values"),
            negative,
            &[column.to_string()],
            &options,
        );
        self.execute(check).await
    }

    /// Values of `column` not matching `pattern`.
    pub async fn check_regex(
        &mut self,
        column: &str,
        pattern: &str,
        case_sensitive: bool,
        options: CheckOptions,
    ) -> Result<u64> {
        let negative = predicate::pattern_violation(column, pattern, case_sensitive);
        let check = self.build_check(
            format!("column {column} must match the pattern {pattern}"),
            negative,
            &[column.to_string()],
            &options,
        );
        self.execute(check).await
    }

    /// Rows selected by a caller-supplied violation predicate.
    pub async fn check_custom(
        &mut self,
        negative: Expr,
        options: CheckOptions,
    ) -> Result<u64> {
        let check = self.build_check("custom predicate check".to_string(), negative, &[], &options);
        self.execute(check).await
    }

    /// Fact rows whose key has no counterpart in `dimension`. `pk`
    /// defaults to the dimension's declared unique key.
    pub async fn check_foreign_key(
        &mut self,
        fk: Vec<String>,
        dimension: &Table,
        pk: Option<Vec<String>>,
        options: CheckOptions,
    ) -> Result<u64> {
        let pk = Self::resolve_pk(dimension, pk)?;
        let description = options.describe(format!(
            "values of {} must exist in {}",
            fk.join(", "),
            dimension.name
        ));
        let check = ForeignKeyCheck::new(description, fk.clone(), pk)?
            .with_ignore(self.ignore_without_base(&fk, &options))
            .with_severity(options.severity)
            .with_sample(options.fetch_sample)
            .with_output_columns(self.projection(&options))
            .with_sample_cap(self.cap(&options));
        let result = check.run_match(self.data(), dimension.data()).await?;
        Ok(self.record(result))
    }

    /// Fact rows whose date violates the expected relation with the
    /// matched dimension date. Both tables must share a backend.
    #[allow(clippy::too_many_arguments)]
    pub async fn check_foreign_key_ordered_range(
        &mut self,
        fk: Vec<String>,
        dimension: &Table,
        pk: Option<Vec<String>>,
        fact_column: &str,
        dim_column: &str,
        operator: CompareOp,
        options: CheckOptions,
    ) -> Result<u64> {
        let pk = Self::resolve_pk(dimension, pk)?;
        let fact_format = self.format_for(fact_column).await?;
        let dim_format = dimension.declared_format(dim_column);
        let params = OrderedRange {
            fact_column: fact_column.to_string(),
            dim_column: dim_column.to_string(),
            operator,
            fact_format,
            dim_format,
        };
        let description = options.describe(format!(
            "column {fact_column} must be {} {dim_column} of {}",
            operator.as_sql(),
            dimension.name
        ));
        let mut guards = fk.clone();
        guards.push(fact_column.to_string());
        let check = ForeignKeyCheck::new(description, fk, pk)?
            .with_ignore(self.ignore_without_base(&guards, &options))
            .with_severity(options.severity)
            .with_sample(options.fetch_sample)
            .with_output_columns(self.projection(&options))
            .with_sample_cap(self.cap(&options));
        let result = check
            .run_ordered_range(self.data(), dimension.data(), &params)
            .await?;
        Ok(self.record(result))
    }

    /// Rows whose validity interval overlaps the next interval of the
    /// same partition.
    pub async fn check_interval_overlap(
        &mut self,
        key_columns: Vec<String>,
        start_column: &str,
        end_column: &str,
        extremes_exclude: bool,
        options: CheckOptions,
    ) -> Result<u64> {
        let start_format = self.format_for(start_column).await?;
        let end_format = self.format_for(end_column).await?;
        let mut guards = key_columns.clone();
        guards.push(start_column.to_string());
        let check = OverlapCheck::new(
            options.describe(format!(
                "intervals {start_column}..{end_column} must not overlap"
            )),
            key_columns,
            start_column,
            end_column,
        )
        .with_formats(start_format, end_format)
        .with_extremes_exclude(extremes_exclude)
        .with_ignore(self.ignore_for(&guards, &options))
        .with_severity(options.severity)
        .with_sample(options.fetch_sample)
        .with_output_columns(self.projection(&options))
        .with_sample_cap(self.cap(&options));
        let result = match &self.backend {
            Backend::Live { source, table } => check.run_live(source, table).await?,
            Backend::Materialized { frame } => check.run_materialized(frame)?,
        };
        Ok(self.record(result))
    }

    /// Runs the standard battery: key not-null and uniqueness when a key
    /// is declared, not-empty on `not_empty_columns`, datetime format on
    /// `datetime_columns`. A failing check is logged and skipped so its
    /// siblings still run.
    #[instrument(skip_all, fields(table = %self.name))]
    pub async fn run_basic_checks(
        &mut self,
        not_empty_columns: &[String],
        datetime_columns: &[String],
        options: CheckOptions,
    ) {
        if self.unique_key.is_some() {
            if let Err(e) = self.check_key_not_null(options.clone()).await {
                warn!(error = %e, "key not-null check could not run");
            }
            if let Err(e) = self.check_key_unique(options.clone()).await {
                warn!(error = %e, "key uniqueness check could not run");
            }
        }
        for column in not_empty_columns {
            if let Err(e) = self.check_not_empty_column(column, options.clone()).await {
                warn!(column = %column, error = %e, "not-empty check could not run");
            }
        }
        for column in datetime_columns {
            if let Err(e) = self
                .check_datetime_format(std::slice::from_ref(column), None, options.clone())
                .await
            {
                warn!(column = %column, error = %e, "datetime format check could not run");
            }
        }
    }

    // --- internals --------------------------------------------------------

    async fn range_check(
        &mut self,
        column: &str,
        min: Option<Value>,
        max: Option<Value>,
        min_included: bool,
        max_included: bool,
        coercion: Coercion,
        options: CheckOptions,
    ) -> Result<u64> {
        let bounds = describe_bounds(&min, &max, min_included, max_included);
        let negative = predicate::range_violation(
            column,
            min,
            max,
            min_included,
            max_included,
            &coercion,
        );
        let check = self.build_check(
            format!("column {column} must be {bounds}"),
            negative,
            &[column.to_string()],
            &options,
        );
        self.execute(check).await
    }

    fn build_check(
        &self,
        fallback: String,
        negative: Expr,
        guard_columns: &[String],
        options: &CheckOptions,
    ) -> Check {
        Check::new(options.describe(fallback), negative)
            .with_ignore(self.ignore_for(guard_columns, options))
            .with_severity(options.severity)
            .with_sample(options.fetch_sample)
            .with_output_columns(self.projection(options))
            .with_sample_cap(self.cap(options))
    }

    async fn execute(&mut self, check: Check) -> Result<u64> {
        let result = match &self.backend {
            Backend::Live { source, table } => check.run_live(source, table).await?,
            Backend::Materialized { frame } => check.run_materialized(frame)?,
        };
        Ok(self.record(result))
    }

    fn record(&mut self, result: CheckResult) -> u64 {
        let violations = result.violations;
        self.results.push(result);
        violations
    }

    /// Ignore filter with the base filter included.
    fn ignore_for(&self, guard_columns: &[String], options: &CheckOptions) -> Option<Expr> {
        let extra: Vec<Expr> = options.ignore_filter.iter().cloned().collect();
        ignore_predicate(
            &self.guard_union(guard_columns, options),
            &extra,
            self.base_filter.as_ref(),
        )
    }

    /// Ignore filter without the base filter, for the strategies that
    /// apply the base filter through [`TableData`].
    fn ignore_without_base(
        &self,
        guard_columns: &[String],
        options: &CheckOptions,
    ) -> Option<Expr> {
        let extra: Vec<Expr> = options.ignore_filter.iter().cloned().collect();
        ignore_predicate(&self.guard_union(guard_columns, options), &extra, None)
    }

    fn guard_union(&self, guard_columns: &[String], options: &CheckOptions) -> Vec<String> {
        let mut columns = guard_columns.to_vec();
        for column in &options.columns_not_null {
            if !columns.contains(column) {
                columns.push(column.clone());
            }
        }
        columns
    }

    fn projection(&self, options: &CheckOptions) -> Option<Vec<String>> {
        options
            .output_columns
            .clone()
            .or_else(|| self.output_columns.clone())
    }

    fn cap(&self, options: &CheckOptions) -> usize {
        options.sample_cap.unwrap_or(self.sample_cap)
    }

    fn require_unique_key(&self) -> Result<&str> {
        self.unique_key.as_deref().ok_or_else(|| {
            GuardError::Schema(format!("table {} declares no unique key", self.name))
        })
    }

    fn resolve_pk(dimension: &Table, pk: Option<Vec<String>>) -> Result<Vec<String>> {
        match pk {
            Some(pk) => Ok(pk),
            None => match dimension.unique_key() {
                Some(key) => Ok(vec![key.to_string()]),
                None => Err(GuardError::Schema(format!(
                    "dimension table {} declares no unique key and no primary key was given",
                    dimension.name
                ))),
            },
        }
    }

    fn data(&self) -> TableData<'_> {
        match &self.backend {
            Backend::Live { source, table } => TableData::Live {
                source: source.as_ref(),
                table,
                filter: self.base_filter.as_ref(),
            },
            Backend::Materialized { frame } => TableData::Materialized {
                frame,
                filter: self.base_filter.as_ref(),
            },
        }
    }

    /// The column's datetime format: declared, previously inferred, or
    /// inferred now by sampling populated values. `None` means no single
    /// candidate format fit and the engine default applies.
    async fn format_for(&mut self, column: &str) -> Result<Option<String>> {
        if let Some(cached) = self.datetime_formats.get(column) {
            return Ok(cached.clone());
        }
        let samples = self.sample_column(column).await?;
        let inferred = infer_format(&samples);
        self.datetime_formats
            .insert(column.to_string(), inferred.clone());
        Ok(inferred)
    }

    fn declared_format(&self, column: &str) -> Option<String> {
        self.datetime_formats.get(column).cloned().flatten()
    }

    /// Up to [`FORMAT_INFERENCE_SAMPLE`] populated string values of a
    /// column.
    async fn sample_column(&self, column: &str) -> Result<Vec<String>> {
        match &self.backend {
            Backend::Live { source, table } => {
                let mut filter = not_null_guard(column);
                if let Some(base) = &self.base_filter {
                    filter = filter.and(base.clone());
                }
                let sql = format!(
                    "SELECT {column} FROM {table} WHERE {} LIMIT {FORMAT_INFERENCE_SAMPLE}",
                    filter.to_sql(source.dialect().as_ref())?
                );
                let frame = source.run_query(&sql).await?;
                Ok((0..frame.num_rows())
                    .filter_map(|row| frame.value(0, row).string_form())
                    .collect())
            }
            Backend::Materialized { frame } => {
                let idx = frame.column_index(column)?;
                Ok((0..frame.num_rows())
                    .filter_map(|row| {
                        let value = frame.value(idx, row);
                        if value.is_null_or_empty() {
                            None
                        } else {
                            value.string_form()
                        }
                    })
                    .take(FORMAT_INFERENCE_SAMPLE)
                    .collect())
            }
        }
    }
}

/// First candidate format that parses every sampled value; `None` when
/// the sample is empty or nothing fits.
fn infer_format(samples: &[String]) -> Option<String> {
    if samples.is_empty() {
        return None;
    }
    CANDIDATE_DATETIME_FORMATS
        .iter()
        .find(|fmt| {
            samples
                .iter()
                .all(|s| Value::Str(s.clone()).to_timestamp(Some(fmt)).is_some())
        })
        .map(|fmt| fmt.to_string())
}

fn describe_bounds(
    min: &Option<Value>,
    max: &Option<Value>,
    min_included: bool,
    max_included: bool,
) -> String {
    let lower = min.as_ref().map(|v| {
        let edge = if min_included { "at least" } else { "above" };
        format!("{edge} {v}")
    });
    let upper = max.as_ref().map(|v| {
        let edge = if max_included { "at most" } else { "below" };
        format!("{edge} {v}")
    });
    match (lower, upper) {
        (Some(l), Some(u)) => format!("{l} and {u}"),
        (Some(l), None) => l,
        (None, Some(u)) => u,
        (None, None) => "unbounded".to_string(),
    }
}
