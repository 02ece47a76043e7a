//! # Rowguard - Declarative Data-Quality Checks for Rust
//!
//! Rowguard validates tabular datasets against a declarative set of
//! data-quality rules and consolidates the violating rows into one
//! de-duplicated, warning-aware report. A table is checked either live,
//! through a caller-supplied query function against a relational engine,
//! or fully in memory as an Arrow record batch, and every rule runs
//! identically on both backends.
//!
//! ## Overview
//!
//! Each rule compiles into a single predicate tree with two renderers:
//! dialect-portable SQL for live sources and a vectorized mask for
//! resident frames. The SQL dialect (Impala or BigQuery) is chosen by
//! name or auto-detected through small capability-probe queries. Rules
//! that need more than a row predicate (uniqueness, dimension lookups,
//! interval overlaps) ship as dedicated strategies with the same
//! dual-backend contract.
//!
//! ## Quick Start
//!
//! ```rust
//! use rowguard::prelude::*;
//!
//! # async fn example() -> rowguard::Result<()> {
//! // Build a materialized table from rows (or wrap an Arrow batch).
//! let frame = Frame::from_rows(
//!     &["id".to_string(), "amount".to_string()],
//!     &[
//!         vec![Value::Int(1), Value::Str("10".into())],
//!         vec![Value::Int(2), Value::Str("-5".into())],
//!         vec![Value::Int(3), Value::Str("".into())],
//!     ],
//! )?;
//! let mut orders = Table::materialized("orders", frame).with_unique_key("id");
//!
//! // Invoke rules; each appends its result to the table.
//! orders
//!     .check_not_empty_column("amount", CheckOptions::new())
//!     .await?;
//! orders
//!     .check_range("amount", Some(Value::Int(0)), None, true, true, CheckOptions::new())
//!     .await?;
//!
//! // Consolidate: one row per violating record, with the descriptions
//! // of every check it failed.
//! let report = orders.consolidated_rows(true)?;
//! assert_eq!(report.rows().num_rows(), 2);
//! # Ok(())
//! # }
//! ```
//!
//! For live tables, implement [`QueryRunner`](source::QueryRunner) over
//! your database client, bind it with [`Source::connect`](source::Source::connect)
//! (dialect auto-detection) or [`Source::with_dialect`](source::Source::with_dialect),
//! and build the table with [`Table::live`](table::Table::live).

pub mod check;
pub mod dialect;
pub mod error;
pub mod expr;
pub mod frame;
pub mod logging;
pub mod predicate;
pub mod prelude;
pub mod report;
pub mod source;
pub mod table;
pub mod value;

pub use error::{GuardError, Result};
