//! SQL dialect adapters.
//!
//! Different engines disagree on cast, regex and datetime-format syntax.
//! A [`Dialect`] turns the handful of fragments the check engine needs
//! into engine-specific SQL, and can probe an unknown engine with small
//! literal-valued queries to find out whether its syntax is understood.
//!
//! Adapters are tried in the order returned by [`registered_dialects`];
//! the first whose probes all pass wins. Extending to a new engine means
//! adding an adapter, not touching the detection logic.

use crate::error::{GuardError, Result};
use crate::source::QueryRunner;
use crate::value::Value;
use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;
use tracing::debug;

mod bigquery;
mod impala;

pub use bigquery::BigQuery;
pub use impala::Impala;

/// Engine-specific SQL fragment generation plus capability probes.
#[async_trait]
pub trait Dialect: Debug + Send + Sync {
    /// Lower-case identifier of the dialect, e.g. `"impala"`.
    fn name(&self) -> &'static str;

    /// Safe cast of `expr` to a timestamp. `format` is a strftime format
    /// string; the adapter translates it to the engine's tokens. Without
    /// a format the engine's default parsing applies. Unparseable input
    /// must yield NULL, never an error.
    fn cast_timestamp(&self, expr: &str, format: Option<&str>) -> String;

    /// Safe cast of `expr` to a float; non-numeric input must yield NULL.
    fn cast_float(&self, expr: &str) -> String;

    /// Boolean regex-match fragment over the string form of `expr`.
    fn regex_match(&self, expr: &str, pattern: &str, case_sensitive: bool) -> String;

    /// The engine token for one strftime directive (the character after
    /// `%`), or `None` when the engine has no equivalent.
    fn format_token(&self, directive: char) -> Option<&'static str>;

    /// Translates a full strftime format string to engine tokens.
    /// Unknown directives pass through unchanged.
    fn convert_format(&self, strftime: &str) -> String {
        let mut out = String::with_capacity(strftime.len());
        let mut chars = strftime.chars();
        while let Some(c) = chars.next() {
            if c != '%' {
                out.push(c);
                continue;
            }
            match chars.next() {
                Some('%') => out.push('%'),
                Some(directive) => match self.format_token(directive) {
                    Some(token) => out.push_str(token),
                    None => {
                        out.push('%');
                        out.push(directive);
                    }
                },
                None => out.push('%'),
            }
        }
        out
    }

    /// Probes whether the engine understands this adapter's timestamp
    /// cast: a literal parsed with the wrong format must come back NULL,
    /// with the right format non-NULL.
    async fn probe_timestamp_cast(&self, runner: &dyn QueryRunner) -> bool {
        let sql = format!(
            "SELECT {} as a, {} as b",
            self.cast_timestamp("'01-02-2021'", Some("%Y-%m-%d")),
            self.cast_timestamp("'02-02-2021'", Some("%d-%m-%Y")),
        );
        expect_nullness(runner, &sql, true, false).await
    }

    /// Probes the safe float cast: numeric input non-NULL, non-numeric
    /// input NULL.
    async fn probe_float_cast(&self, runner: &dyn QueryRunner) -> bool {
        let sql = format!(
            "SELECT {} as a, {} as b",
            self.cast_float("3"),
            self.cast_float("'x'"),
        );
        expect_nullness(runner, &sql, false, true).await
    }

    /// Probes the regex predicate, including the case-insensitive form.
    async fn probe_regex(&self, runner: &dyn QueryRunner) -> bool {
        let pattern = "^[0-9]{4}-[0-9]{2}-[0-9]{2}$";
        let sql = format!(
            "SELECT {} as a, {} as b",
            self.regex_match("'2022-01-18'", pattern, true),
            self.regex_match("'2022-01-182'", pattern, false),
        );
        expect_booleans(runner, &sql, true, false).await
    }

    /// Probes the strftime-token replacement table with a format that
    /// exercises date and time directives together.
    async fn probe_format_replacement(&self, runner: &dyn QueryRunner) -> bool {
        let format = "%d/%m/%Y %H:%M:%S";
        let sql = format!(
            "SELECT {} as a, {} as b",
            self.cast_timestamp("'31/12/2021 23:59:58'", Some(format)),
            self.cast_timestamp("'2021-12-31'", Some(format)),
        );
        expect_nullness(runner, &sql, false, true).await
    }

    /// Runs all capability probes. Every probe must pass for the adapter
    /// to be considered a match.
    async fn probe_all(&self, runner: &dyn QueryRunner) -> bool {
        self.probe_timestamp_cast(runner).await
            && self.probe_float_cast(runner).await
            && self.probe_regex(runner).await
            && self.probe_format_replacement(runner).await
    }
}

/// The adapters tried during auto-detection, in order.
pub fn registered_dialects() -> Vec<Arc<dyn Dialect>> {
    vec![Arc::new(Impala), Arc::new(BigQuery)]
}

/// Looks up an adapter by its name.
pub fn dialect_by_name(name: &str) -> Result<Arc<dyn Dialect>> {
    let lowered = name.to_lowercase();
    registered_dialects()
        .into_iter()
        .find(|d| d.name() == lowered)
        .ok_or_else(|| {
            let admitted: Vec<&str> = registered_dialects().iter().map(|d| d.name()).collect();
            GuardError::DialectUnsupported(format!(
                "dialect '{name}' unknown; values admitted are: {}",
                admitted.join(", ")
            ))
        })
}

/// Auto-detects the dialect by probing the registered adapters in order
/// and binding the first whose probes all succeed.
pub async fn detect_dialect(runner: &dyn QueryRunner) -> Result<Arc<dyn Dialect>> {
    for dialect in registered_dialects() {
        debug!(dialect = dialect.name(), "probing dialect");
        if dialect.probe_all(runner).await {
            debug!(dialect = dialect.name(), "dialect probes passed");
            return Ok(dialect);
        }
    }
    Err(GuardError::DialectUnsupported(
        "no registered dialect passed its capability probes".to_string(),
    ))
}

/// Runs a two-column probe query and checks the null-ness of both cells.
/// Any query failure counts as a failed probe.
async fn expect_nullness(runner: &dyn QueryRunner, sql: &str, a_null: bool, b_null: bool) -> bool {
    match runner.run_query(sql).await {
        Ok(frame) => {
            frame.num_rows() == 1
                && frame.batch().num_columns() >= 2
                && frame.value(0, 0).is_null() == a_null
                && frame.value(1, 0).is_null() == b_null
        }
        Err(_) => false,
    }
}

/// Runs a two-column probe query and checks both boolean cells.
async fn expect_booleans(runner: &dyn QueryRunner, sql: &str, a: bool, b: bool) -> bool {
    match runner.run_query(sql).await {
        Ok(frame) => {
            frame.num_rows() == 1
                && frame.batch().num_columns() >= 2
                && frame.value(0, 0) == Value::Bool(a)
                && frame.value(1, 0) == Value::Bool(b)
        }
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dialect_by_name() {
        assert_eq!(dialect_by_name("impala").unwrap().name(), "impala");
        assert_eq!(dialect_by_name("BigQuery").unwrap().name(), "bigquery");
        assert!(matches!(
            dialect_by_name("oracle").unwrap_err(),
            GuardError::DialectUnsupported(_)
        ));
    }

    #[test]
    fn test_convert_format_passthrough() {
        let dialect = Impala;
        assert_eq!(dialect.convert_format("%Y-%m-%d"), "yyyy-MM-dd");
        // Unknown directives survive untouched.
        assert_eq!(dialect.convert_format("%Q"), "%Q");
        assert_eq!(dialect.convert_format("100%%"), "100%");
    }
}
