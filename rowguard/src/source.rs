//! Live query sources.
//!
//! The engine never talks to a database driver directly: the caller
//! supplies a [`QueryRunner`] and the engine treats it as an opaque,
//! synchronous-per-call query capability. A [`Source`] binds a runner to
//! a [`Dialect`](crate::dialect::Dialect), chosen once (by probing or by
//! name) and fixed for the source's lifetime.

use crate::dialect::{detect_dialect, dialect_by_name, Dialect};
use crate::error::{GuardError, Result};
use crate::frame::Frame;
use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;
use tracing::{debug, instrument};

/// A caller-supplied query-execution capability.
///
/// Implementations wrap whatever client library reaches the engine and
/// return results as a [`Frame`]. The engine issues one query per check
/// operation and blocks on it; there is no retry or cancellation.
#[async_trait]
pub trait QueryRunner: Debug + Send + Sync {
    /// Executes `sql` and returns the result table.
    async fn run_query(&self, sql: &str) -> Result<Frame>;
}

/// A query runner bound to a fixed SQL dialect.
#[derive(Debug, Clone)]
pub struct Source {
    runner: Arc<dyn QueryRunner>,
    dialect: Arc<dyn Dialect>,
}

impl Source {
    /// Connects to a source with dialect auto-detection: verifies the
    /// runner answers queries at all, then probes the registered
    /// dialects in order and binds the first full match.
    #[instrument(skip(runner))]
    pub async fn connect(runner: Arc<dyn QueryRunner>) -> Result<Self> {
        check_connectivity(runner.as_ref()).await?;
        let dialect = detect_dialect(runner.as_ref()).await?;
        debug!(dialect = dialect.name(), "source bound to dialect");
        Ok(Self { runner, dialect })
    }

    /// Connects with an explicitly named dialect, skipping the probes.
    #[instrument(skip(runner))]
    pub async fn with_dialect(runner: Arc<dyn QueryRunner>, name: &str) -> Result<Self> {
        check_connectivity(runner.as_ref()).await?;
        let dialect = dialect_by_name(name)?;
        Ok(Self { runner, dialect })
    }

    /// The dialect this source was bound to.
    pub fn dialect(&self) -> &Arc<dyn Dialect> {
        &self.dialect
    }

    /// Executes a query through the underlying runner.
    #[instrument(skip(self, sql), fields(dialect = self.dialect.name()))]
    pub async fn run_query(&self, sql: &str) -> Result<Frame> {
        debug!(sql, "running query");
        self.runner.run_query(sql).await
    }
}

/// One-row sanity query; failure means the runner itself is broken, not
/// that a dialect mismatched.
async fn check_connectivity(runner: &dyn QueryRunner) -> Result<()> {
    let frame = runner.run_query("SELECT 1 as probe").await.map_err(|e| {
        GuardError::query_with_source("connectivity check failed", Box::new(e))
    })?;
    if frame.num_rows() == 1
        && frame.batch().num_columns() == 1
        && frame.value(0, 0).to_float() == Some(1.0)
    {
        Ok(())
    } else {
        Err(GuardError::query(
            "connectivity check returned unexpected result; check your run_query implementation",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;
    use std::sync::Mutex;

    /// Canned-response runner: matches each incoming query against
    /// substring patterns and records everything it was asked.
    #[derive(Debug, Default)]
    struct ScriptedRunner {
        responses: Vec<(&'static str, Vec<Vec<Value>>, Vec<&'static str>)>,
        log: Mutex<Vec<String>>,
    }

    impl ScriptedRunner {
        fn respond(
            mut self,
            needle: &'static str,
            columns: Vec<&'static str>,
            rows: Vec<Vec<Value>>,
        ) -> Self {
            self.responses.push((needle, rows, columns));
            self
        }
    }

    #[async_trait]
    impl QueryRunner for ScriptedRunner {
        async fn run_query(&self, sql: &str) -> Result<Frame> {
            self.log.lock().unwrap().push(sql.to_string());
            for (needle, rows, columns) in &self.responses {
                if sql.contains(needle) {
                    let columns: Vec<String> =
                        columns.iter().map(|c| c.to_string()).collect();
                    return Frame::from_rows(&columns, rows);
                }
            }
            Err(GuardError::query(format!("no canned response for: {sql}")))
        }
    }

    fn probe_ok_runner() -> ScriptedRunner {
        // Answers shaped like an Impala engine would answer the probes.
        ScriptedRunner::default()
            .respond("SELECT 1 as probe", vec!["probe"], vec![vec![Value::Int(1)]])
            .respond(
                "to_timestamp('01-02-2021'",
                vec!["a", "b"],
                vec![vec![Value::Null, Value::Str("2021-02-02 00:00:00".into())]],
            )
            .respond(
                "cast('x' as float)",
                vec!["a", "b"],
                vec![vec![Value::Float(3.0), Value::Null]],
            )
            .respond(
                "regexp_like('2022-01-18'",
                vec!["a", "b"],
                vec![vec![Value::Bool(true), Value::Bool(false)]],
            )
            .respond(
                "to_timestamp('31/12/2021 23:59:58'",
                vec!["a", "b"],
                vec![vec![Value::Str("2021-12-31 23:59:58".into()), Value::Null]],
            )
    }

    #[tokio::test]
    async fn test_auto_detection_binds_first_matching_dialect() {
        let source = Source::connect(Arc::new(probe_ok_runner())).await.unwrap();
        assert_eq!(source.dialect().name(), "impala");
    }

    #[tokio::test]
    async fn test_detection_fails_when_no_probe_passes() {
        let runner = ScriptedRunner::default().respond(
            "SELECT 1 as probe",
            vec!["probe"],
            vec![vec![Value::Int(1)]],
        );
        let err = Source::connect(Arc::new(runner)).await.unwrap_err();
        assert!(matches!(err, GuardError::DialectUnsupported(_)));
    }

    #[tokio::test]
    async fn test_explicit_dialect_skips_probes() {
        let runner = ScriptedRunner::default().respond(
            "SELECT 1 as probe",
            vec!["probe"],
            vec![vec![Value::Int(1)]],
        );
        let source = Source::with_dialect(Arc::new(runner), "bigquery").await.unwrap();
        assert_eq!(source.dialect().name(), "bigquery");
    }

    #[tokio::test]
    async fn test_broken_runner_fails_connectivity() {
        let runner = ScriptedRunner::default();
        let err = Source::connect(Arc::new(runner)).await.unwrap_err();
        assert!(matches!(err, GuardError::Query { .. }));
    }
}
