//! Prelude for commonly used types and traits in rowguard.

pub use crate::check::{CheckOptions, CheckResult, Severity};
pub use crate::error::{GuardError, Result};
pub use crate::expr::{CompareOp, Expr};
pub use crate::frame::Frame;
pub use crate::report::ConsolidatedReport;
pub use crate::source::{QueryRunner, Source};
pub use crate::table::Table;
pub use crate::value::Value;
