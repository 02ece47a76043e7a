//! Shared test doubles.

use async_trait::async_trait;
use rowguard::error::GuardError;
use rowguard::frame::Frame;
use rowguard::source::QueryRunner;
use rowguard::value::Value;
use rowguard::Result;
use std::sync::Mutex;

/// Canned-response query runner: each incoming query is matched against
/// substring needles in registration order, and every query is logged so
/// tests can assert on the generated SQL.
#[derive(Debug, Default)]
pub struct FakeRunner {
    responses: Vec<(String, Vec<String>, Vec<Vec<Value>>)>,
    log: Mutex<Vec<String>>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a canned response for queries containing `needle`.
    pub fn respond(mut self, needle: &str, columns: &[&str], rows: Vec<Vec<Value>>) -> Self {
        self.responses.push((
            needle.to_string(),
            columns.iter().map(|c| c.to_string()).collect(),
            rows,
        ));
        self
    }

    /// Every query issued so far, in order.
    pub fn queries(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

#[async_trait]
impl QueryRunner for FakeRunner {
    async fn run_query(&self, sql: &str) -> Result<Frame> {
        self.log.lock().unwrap().push(sql.to_string());
        if sql == "SELECT 1 as probe" {
            return Frame::from_rows(&["probe".to_string()], &[vec![Value::Int(1)]]);
        }
        for (needle, columns, rows) in &self.responses {
            if sql.contains(needle.as_str()) {
                return Frame::from_rows(columns, rows);
            }
        }
        Err(GuardError::query(format!("no canned response for: {sql}")))
    }
}

/// A two-column KO/OK aggregate frame.
pub fn counts(ko: i64, ok: i64) -> Vec<Vec<Value>> {
    vec![
        vec![Value::Str("KO".into()), Value::Int(ko)],
        vec![Value::Str("OK".into()), Value::Int(ok)],
    ]
}
