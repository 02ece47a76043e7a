//! Dimension-table lookups.
//!
//! Two rule shapes share the fact/dimension machinery: the match check
//! (every fact key must exist in the dimension) and the ordered-range
//! check (a fact date must relate to the matched dimension date by a
//! given operator). Keys are compared on their string forms, joined with
//! `|` for composite keys, so live concat keys and in-memory key sets
//! agree.
//!
//! The match check supports all four backend pairings; the ordered-range
//! check needs both sides on the same backend.

use crate::check::{CheckResult, RawSqlCheck, Severity, DEFAULT_SAMPLE_CAP};
use crate::error::{GuardError, Result};
use crate::expr::{CompareOp, Expr};
use crate::frame::Frame;
use crate::source::Source;
use crate::value::Value;
use std::collections::{HashMap, HashSet};
use tracing::{debug, instrument};

/// Separator used when concatenating composite key components.
const KEY_SEPARATOR: char = '|';

/// One side of a foreign-key check: a live table with an optional base
/// filter, or a resident frame with an optional filter predicate.
#[derive(Debug, Clone, Copy)]
pub enum TableData<'a> {
    Live {
        source: &'a Source,
        table: &'a str,
        filter: Option<&'a Expr>,
    },
    Materialized {
        frame: &'a Frame,
        filter: Option<&'a Expr>,
    },
}

/// Parameters of the ordered-range variant: the expected relation
/// between a fact date column and the matched dimension date column.
#[derive(Debug, Clone)]
pub struct OrderedRange {
    /// Date column on the fact table.
    pub fact_column: String,
    /// Date column on the dimension table.
    pub dim_column: String,
    /// Expected relation, e.g. `fact_column <= dim_column`.
    pub operator: CompareOp,
    /// Parse format for the fact column, engine default when unset.
    pub fact_format: Option<String>,
    /// Parse format for the dimension column.
    pub dim_format: Option<String>,
}

/// A foreign-key check binding fact key columns to dimension key columns.
#[derive(Debug, Clone)]
pub struct ForeignKeyCheck {
    fk: Vec<String>,
    pk: Vec<String>,
    description: String,
    ignore: Option<Expr>,
    severity: Severity,
    fetch_sample: bool,
    output_columns: Option<Vec<String>>,
    sample_cap: usize,
}

impl ForeignKeyCheck {
    /// Creates a check binding `fk` on the fact side to `pk` on the
    /// dimension side. The two lists must have equal, non-zero length.
    pub fn new(
        description: impl Into<String>,
        fk: Vec<String>,
        pk: Vec<String>,
    ) -> Result<Self> {
        if fk.is_empty() || fk.len() != pk.len() {
            return Err(GuardError::Schema(format!(
                "foreign key has {} column(s) but primary key has {}; both sides must declare \
                 the same non-zero number of columns",
                fk.len(),
                pk.len()
            )));
        }
        Ok(Self {
            fk,
            pk,
            description: description.into(),
            ignore: None,
            severity: Severity::Blocking,
            fetch_sample: true,
            output_columns: None,
            sample_cap: DEFAULT_SAMPLE_CAP,
        })
    }

    /// Sets the fact-side ignore filter.
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

    /// Restricts the sample to the given fact columns.
    pub fn with_output_columns(mut self, columns: Option<Vec<String>>) -> Self {
        self.output_columns = columns;
        self
    }

    /// Caps the number of sample rows.
    pub fn with_sample_cap(mut self, cap: usize) -> Self {
        self.sample_cap = cap;
        self
    }

    /// Runs the match check: counts and samples fact rows whose key has
    /// no dimension counterpart.
    #[instrument(skip_all, fields(check = %self.description))]
    pub async fn run_match(
        &self,
        fact: TableData<'_>,
        dim: TableData<'_>,
    ) -> Result<CheckResult> {
        match (fact, dim) {
            (
                TableData::Live { source, table, filter },
                TableData::Live {
                    table: dim_table,
                    filter: dim_filter,
                    ..
                },
            ) => {
                self.match_live_live(source, table, filter, dim_table, dim_filter)
                    .await
            }
            (
                TableData::Live { source, table, filter },
                TableData::Materialized {
                    frame,
                    filter: dim_filter,
                },
            ) => {
                let keys = materialized_key_set(frame, &self.pk, dim_filter)?;
                self.match_live_keys(source, table, filter, &keys).await
            }
            (
                TableData::Materialized { frame, filter },
                TableData::Live {
                    source,
                    table: dim_table,
                    filter: dim_filter,
                },
            ) => {
                let keys = live_key_set(source, dim_table, &self.pk, dim_filter).await?;
                self.match_materialized(frame, filter, &keys)
            }
            (
                TableData::Materialized { frame, filter },
                TableData::Materialized {
                    frame: dim_frame,
                    filter: dim_filter,
                },
            ) => {
                let keys = materialized_key_set(dim_frame, &self.pk, dim_filter)?;
                self.match_materialized(frame, filter, &keys)
            }
        }
    }

    /// Runs the ordered-range variant. Both sides must share a backend;
    /// the sample carries the matched dimension date as an extra column.
    #[instrument(skip_all, fields(check = %self.description))]
    pub async fn run_ordered_range(
        &self,
        fact: TableData<'_>,
        dim: TableData<'_>,
        params: &OrderedRange,
    ) -> Result<CheckResult> {
        match (fact, dim) {
            (
                TableData::Live { source, table, filter },
                TableData::Live {
                    table: dim_table,
                    filter: dim_filter,
                    ..
                },
            ) => {
                self.ordered_live_live(source, table, filter, dim_table, dim_filter, params)
                    .await
            }
            (
                TableData::Materialized { frame, filter },
                TableData::Materialized {
                    frame: dim_frame,
                    filter: dim_filter,
                },
            ) => self.ordered_materialized(frame, filter, dim_frame, dim_filter, params),
            _ => Err(GuardError::NotSupported(
                "the ordered-range foreign-key check requires the fact and dimension tables \
                 on the same backend"
                    .to_string(),
            )),
        }
    }

    fn join_on(&self) -> String {
        self.fk
            .iter()
            .zip(&self.pk)
            .map(|(f, p)| format!("cast(f.{f} as string) = cast(d.{p} as string)"))
            .collect::<Vec<_>>()
            .join(" AND ")
    }

    /// Renders one side as a filtered subselect so joined column names
    /// cannot collide.
    fn subselect(source: &Source, table: &str, filter: Option<&Expr>) -> Result<String> {
        Ok(match filter {
            Some(f) => format!(
                "(SELECT * FROM {table} WHERE {})",
                f.to_sql(source.dialect().as_ref())?
            ),
            None => table.to_string(),
        })
    }

    async fn match_live_live(
        &self,
        source: &Source,
        table: &str,
        filter: Option<&Expr>,
        dim_table: &str,
        dim_filter: Option<&Expr>,
    ) -> Result<CheckResult> {
        let ignore = combine(filter, self.ignore.as_ref());
        let fact_sub = Self::subselect(source, table, ignore.as_ref())?;
        let dim_sub = Self::subselect(source, dim_table, dim_filter)?;
        let relation = format!("{fact_sub} f LEFT JOIN {dim_sub} d ON {}", self.join_on());
        let negative = format!("d.{} IS NULL", self.pk[0]);
        let raw = RawSqlCheck {
            description: &self.description,
            severity: self.severity,
            fetch_sample: self.fetch_sample,
            projection: self.fact_projection(),
            sample_cap: self.sample_cap,
        };
        raw.run(source, &relation, &negative, None).await
    }

    async fn match_live_keys(
        &self,
        source: &Source,
        table: &str,
        filter: Option<&Expr>,
        keys: &HashSet<String>,
    ) -> Result<CheckResult> {
        let dialect = source.dialect().as_ref();
        let ignore = combine(filter, self.ignore.as_ref());
        let where_sql = match &ignore {
            Some(e) => Some(e.to_sql(dialect)?),
            None => None,
        };
        let negative = if keys.is_empty() {
            // Empty dimension: every eligible fact row is unmatched.
            "TRUE".to_string()
        } else {
            let mut quoted: Vec<String> = keys
                .iter()
                .map(|k| format!("'{}'", k.replace('\'', "''")))
                .collect();
            quoted.sort();
            format!(
                "{} NOT IN ({})",
                self.concat_key_sql(),
                quoted.join(",")
            )
        };
        let raw = RawSqlCheck {
            description: &self.description,
            severity: self.severity,
            fetch_sample: self.fetch_sample,
            projection: self.plain_projection(),
            sample_cap: self.sample_cap,
        };
        raw.run(source, table, &negative, where_sql.as_deref()).await
    }

    fn match_materialized(
        &self,
        frame: &Frame,
        filter: Option<&Expr>,
        keys: &HashSet<String>,
    ) -> Result<CheckResult> {
        let ignore = combine(filter, self.ignore.as_ref());
        let eligible = match &ignore {
            Some(e) => e.mask(frame)?,
            None => vec![true; frame.num_rows()],
        };
        let mut mask = Vec::with_capacity(frame.num_rows());
        for row in 0..frame.num_rows() {
            if !eligible[row] {
                mask.push(false);
                continue;
            }
            // A null key component leaves the membership test undefined,
            // which never selects the row.
            match row_key(frame, &self.fk, row)? {
                Some(key) => mask.push(!keys.contains(&key)),
                None => mask.push(false),
            }
        }
        self.finish_materialized(frame, &mask)
    }

    async fn ordered_live_live(
        &self,
        source: &Source,
        table: &str,
        filter: Option<&Expr>,
        dim_table: &str,
        dim_filter: Option<&Expr>,
        params: &OrderedRange,
    ) -> Result<CheckResult> {
        let dialect = source.dialect().as_ref();
        let ignore = combine(filter, self.ignore.as_ref());
        let fact_sub = Self::subselect(source, table, ignore.as_ref())?;
        let dim_sub = Self::subselect(source, dim_table, dim_filter)?;
        let relation = format!("{fact_sub} f LEFT JOIN {dim_sub} d ON {}", self.join_on());
        let fact_ts = dialect.cast_timestamp(
            &format!("f.{}", params.fact_column),
            params.fact_format.as_deref(),
        );
        let dim_ts = dialect.cast_timestamp(
            &format!("d.{}", params.dim_column),
            params.dim_format.as_deref(),
        );
        // Unmatched rows compare against NULL and collapse to OK; the
        // match check owns those.
        let negative = format!(
            "coalesce({fact_ts} {} {dim_ts}, FALSE)",
            params.operator.negate().as_sql()
        );
        let alias = dim_alias(params);
        let projection = format!("{}, d.{} as {alias}", self.fact_projection(), params.dim_column);
        let raw = RawSqlCheck {
            description: &self.description,
            severity: self.severity,
            fetch_sample: self.fetch_sample,
            projection,
            sample_cap: self.sample_cap,
        };
        raw.run(source, &relation, &negative, None).await
    }

    fn ordered_materialized(
        &self,
        frame: &Frame,
        filter: Option<&Expr>,
        dim_frame: &Frame,
        dim_filter: Option<&Expr>,
        params: &OrderedRange,
    ) -> Result<CheckResult> {
        let dim_values = materialized_key_map(dim_frame, &self.pk, &params.dim_column, dim_filter)?;
        let ignore = combine(filter, self.ignore.as_ref());
        let eligible = match &ignore {
            Some(e) => e.mask(frame)?,
            None => vec![true; frame.num_rows()],
        };
        let fact_idx = frame.column_index(&params.fact_column)?;
        let mut mask = Vec::with_capacity(frame.num_rows());
        let mut matched: Vec<Option<Value>> = Vec::with_capacity(frame.num_rows());
        for row in 0..frame.num_rows() {
            let dim_value = match (eligible[row], row_key(frame, &self.fk, row)?) {
                (true, Some(key)) => dim_values.get(&key).cloned(),
                _ => None,
            };
            let violates = match &dim_value {
                Some(value) => {
                    let fact_ts = frame
                        .value(fact_idx, row)
                        .to_timestamp(params.fact_format.as_deref());
                    let dim_ts = value.to_timestamp(params.dim_format.as_deref());
                    match (fact_ts, dim_ts) {
                        (Some(f), Some(d)) => op_matches(params.operator.negate(), f.cmp(&d)),
                        _ => false,
                    }
                }
                None => false,
            };
            mask.push(violates);
            matched.push(dim_value);
        }
        let violations = mask.iter().filter(|b| **b).count() as u64;
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

        // Rebuild the sample row-wise so the matched dimension date can
        // ride along as an extra column.
        let alias = dim_alias(params);
        let mut columns = match &self.output_columns {
            Some(cols) => cols.clone(),
            None => frame.column_names(),
        };
        columns.push(alias);
        let mut rows = Vec::new();
        for row in 0..frame.num_rows() {
            if !mask[row] {
                continue;
            }
            let mut values = Vec::with_capacity(columns.len());
            for name in &columns[..columns.len() - 1] {
                values.push(frame.value_by_name(name, row)?);
            }
            values.push(matched[row].clone().unwrap_or(Value::Null));
            rows.push(values);
        }
        result.truncated = rows.len() > self.sample_cap;
        rows.truncate(self.sample_cap);
        result.sample = Some(Frame::from_rows(&columns, &rows)?);
        Ok(result)
    }

    fn finish_materialized(&self, frame: &Frame, mask: &[bool]) -> Result<CheckResult> {
        let violations = mask.iter().filter(|b| **b).count() as u64;
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
        let mut sample = frame.filter(mask)?;
        result.truncated = sample.num_rows() > self.sample_cap;
        sample = sample.head(self.sample_cap);
        if let Some(columns) = &self.output_columns {
            sample = sample.select(columns)?;
        }
        result.sample = Some(sample);
        Ok(result)
    }

    /// Fact-side projection for joined queries.
    fn fact_projection(&self) -> String {
        match &self.output_columns {
            Some(columns) => columns
                .iter()
                .map(|c| format!("f.{c}"))
                .collect::<Vec<_>>()
                .join(", "),
            None => "f.*".to_string(),
        }
    }

    fn plain_projection(&self) -> String {
        match &self.output_columns {
            Some(columns) => columns.join(", "),
            None => "*".to_string(),
        }
    }

    /// SQL expression producing the concatenated string key of a fact row.
    fn concat_key_sql(&self) -> String {
        if self.fk.len() == 1 {
            format!("cast({} as string)", self.fk[0])
        } else {
            let parts: Vec<String> = self
                .fk
                .iter()
                .map(|c| format!("cast({c} as string)"))
                .collect();
            format!("concat({})", parts.join(&format!(", '{KEY_SEPARATOR}', ")))
        }
    }
}

/// Combines a table filter with a check-level ignore filter.
fn combine(filter: Option<&Expr>, ignore: Option<&Expr>) -> Option<Expr> {
    match (filter, ignore) {
        (Some(f), Some(i)) => Some(f.clone().and(i.clone())),
        (Some(f), None) => Some(f.clone()),
        (None, Some(i)) => Some(i.clone()),
        (None, None) => None,
    }
}

fn op_matches(op: CompareOp, ordering: std::cmp::Ordering) -> bool {
    use std::cmp::Ordering;
    match op {
        CompareOp::Lt => ordering == Ordering::Less,
        CompareOp::LtEq => ordering != Ordering::Greater,
        CompareOp::Gt => ordering == Ordering::Greater,
        CompareOp::GtEq => ordering != Ordering::Less,
        CompareOp::Eq => ordering == Ordering::Equal,
        CompareOp::NotEq => ordering != Ordering::Equal,
    }
}

/// Alias for the dimension date column carried into the sample, renamed
/// when it would collide with the fact column.
fn dim_alias(params: &OrderedRange) -> String {
    if params.dim_column == params.fact_column {
        format!("{}_2", params.dim_column)
    } else {
        params.dim_column.clone()
    }
}

/// The concatenated string key of one frame row; `None` when any
/// component is null.
fn row_key(frame: &Frame, columns: &[String], row: usize) -> Result<Option<String>> {
    let mut parts = Vec::with_capacity(columns.len());
    for column in columns {
        match frame.value_by_name(column, row)?.string_form() {
            Some(s) => parts.push(s),
            None => return Ok(None),
        }
    }
    Ok(Some(parts.join(&KEY_SEPARATOR.to_string())))
}

/// Distinct key strings of a resident dimension frame.
fn materialized_key_set(
    frame: &Frame,
    pk: &[String],
    filter: Option<&Expr>,
) -> Result<HashSet<String>> {
    let eligible = match filter {
        Some(f) => f.mask(frame)?,
        None => vec![true; frame.num_rows()],
    };
    let mut keys = HashSet::new();
    for row in 0..frame.num_rows() {
        if !eligible[row] {
            continue;
        }
        if let Some(key) = row_key(frame, pk, row)? {
            keys.insert(key);
        }
    }
    Ok(keys)
}

/// Key → first value of `value_column` for a resident dimension frame.
fn materialized_key_map(
    frame: &Frame,
    pk: &[String],
    value_column: &str,
    filter: Option<&Expr>,
) -> Result<HashMap<String, Value>> {
    let eligible = match filter {
        Some(f) => f.mask(frame)?,
        None => vec![true; frame.num_rows()],
    };
    let idx = frame.column_index(value_column)?;
    let mut map = HashMap::new();
    for row in 0..frame.num_rows() {
        if !eligible[row] {
            continue;
        }
        if let Some(key) = row_key(frame, pk, row)? {
            map.entry(key).or_insert_with(|| frame.value(idx, row));
        }
    }
    Ok(map)
}

/// Resolves a live dimension's key set with one `SELECT DISTINCT`.
async fn live_key_set(
    source: &Source,
    table: &str,
    pk: &[String],
    filter: Option<&Expr>,
) -> Result<HashSet<String>> {
    let projection: Vec<String> = pk
        .iter()
        .map(|c| format!("cast({c} as string) as {c}"))
        .collect();
    let where_clause = match filter {
        Some(f) => format!(" WHERE {}", f.to_sql(source.dialect().as_ref())?),
        None => String::new(),
    };
    let sql = format!(
        "SELECT DISTINCT {} FROM {table}{where_clause}",
        projection.join(", ")
    );
    let frame = source.run_query(&sql).await?;
    let mut keys = HashSet::new();
    for row in 0..frame.num_rows() {
        let mut parts = Vec::with_capacity(pk.len());
        let mut complete = true;
        for column in 0..frame.batch().num_columns() {
            match frame.value(column, row).string_form() {
                Some(s) => parts.push(s),
                None => {
                    complete = false;
                    break;
                }
            }
        }
        if complete {
            keys.insert(parts.join(&KEY_SEPARATOR.to_string()));
        }
    }
    Ok(keys)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn facts() -> Frame {
        let columns = vec!["id".to_string(), "country".to_string()];
        let rows = vec![
            vec![Value::Int(1), Value::Str("IT".into())],
            vec![Value::Int(2), Value::Str("FR".into())],
            vec![Value::Int(3), Value::Str("XX".into())],
            vec![Value::Int(4), Value::Null],
        ];
        Frame::from_rows(&columns, &rows).unwrap()
    }

    fn dims() -> Frame {
        let columns = vec!["code".to_string(), "valid_until".to_string()];
        let rows = vec![
            vec![Value::Str("IT".into()), Value::Str("2030-01-01".into())],
            vec![Value::Str("FR".into()), Value::Str("2020-01-01".into())],
        ];
        Frame::from_rows(&columns, &rows).unwrap()
    }

    #[test]
    fn test_arity_mismatch_is_schema_error() {
        let err = ForeignKeyCheck::new(
            "fk",
            vec!["a".to_string(), "b".to_string()],
            vec!["x".to_string()],
        )
        .unwrap_err();
        assert!(matches!(err, GuardError::Schema(_)));
    }

    #[tokio::test]
    async fn test_match_materialized_both_sides() {
        let facts = facts();
        let dims = dims();
        let check = ForeignKeyCheck::new(
            "country exists",
            vec!["country".to_string()],
            vec!["code".to_string()],
        )
        .unwrap();
        let result = check
            .run_match(
                TableData::Materialized { frame: &facts, filter: None },
                TableData::Materialized { frame: &dims, filter: None },
            )
            .await
            .unwrap();
        // "XX" is unmatched; the null key is exempt.
        assert_eq!(result.violations, 1);
        let sample = result.sample.unwrap();
        assert_eq!(sample.value_by_name("id", 0).unwrap(), Value::Int(3));
    }

    #[tokio::test]
    async fn test_ordered_range_mixed_backends_not_supported() {
        use crate::source::{QueryRunner, Source};
        use async_trait::async_trait;
        use std::sync::Arc;

        #[derive(Debug)]
        struct ProbeOnlyRunner;

        #[async_trait]
        impl QueryRunner for ProbeOnlyRunner {
            async fn run_query(&self, sql: &str) -> Result<Frame> {
                if sql == "SELECT 1 as probe" {
                    return Frame::from_rows(&["probe".to_string()], &[vec![Value::Int(1)]]);
                }
                Err(GuardError::query("unexpected query"))
            }
        }

        let source = Source::with_dialect(Arc::new(ProbeOnlyRunner), "impala")
            .await
            .unwrap();
        let facts = facts();
        let check = ForeignKeyCheck::new(
            "dates in range",
            vec!["country".to_string()],
            vec!["code".to_string()],
        )
        .unwrap();
        let params = OrderedRange {
            fact_column: "event_date".to_string(),
            dim_column: "valid_until".to_string(),
            operator: CompareOp::LtEq,
            fact_format: None,
            dim_format: None,
        };
        let err = check
            .run_ordered_range(
                TableData::Materialized { frame: &facts, filter: None },
                TableData::Live { source: &source, table: "dim_country", filter: None },
                &params,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, GuardError::NotSupported(_)));
    }

    #[tokio::test]
    async fn test_ordered_range_materialized() {
        let columns = vec!["country".to_string(), "event_date".to_string()];
        let rows = vec![
            vec![Value::Str("IT".into()), Value::Str("2029-06-01".into())],
            vec![Value::Str("FR".into()), Value::Str("2025-06-01".into())],
        ];
        let facts = Frame::from_rows(&columns, &rows).unwrap();
        let dims = dims();
        let check = ForeignKeyCheck::new(
            "event before validity end",
            vec!["country".to_string()],
            vec!["code".to_string()],
        )
        .unwrap();
        let params = OrderedRange {
            fact_column: "event_date".to_string(),
            dim_column: "valid_until".to_string(),
            operator: CompareOp::LtEq,
            fact_format: None,
            dim_format: None,
        };
        let result = check
            .run_ordered_range(
                TableData::Materialized { frame: &facts, filter: None },
                TableData::Materialized { frame: &dims, filter: None },
                &params,
            )
            .await
            .unwrap();
        // FR's event date 2025 exceeds its validity end 2020.
        assert_eq!(result.violations, 1);
        let sample = result.sample.unwrap();
        assert_eq!(
            sample.value_by_name("country", 0).unwrap(),
            Value::Str("FR".into())
        );
        assert!(sample.has_column("valid_until"));
    }

    #[test]
    fn test_concat_key_sql() {
        let single = ForeignKeyCheck::new("fk", vec!["a".to_string()], vec!["x".to_string()])
            .unwrap();
        assert_eq!(single.concat_key_sql(), "cast(a as string)");
        let multi = ForeignKeyCheck::new(
            "fk",
            vec!["a".to_string(), "b".to_string()],
            vec!["x".to_string(), "y".to_string()],
        )
        .unwrap();
        assert_eq!(
            multi.concat_key_sql(),
            "concat(cast(a as string), '|', cast(b as string))"
        );
    }

    #[test]
    fn test_row_key_null_component() {
        let frame = facts();
        assert_eq!(
            row_key(&frame, &["country".to_string()], 3).unwrap(),
            None
        );
        assert_eq!(
            row_key(&frame, &["id".to_string(), "country".to_string()], 0).unwrap(),
            Some("1|IT".to_string())
        );
    }
}
