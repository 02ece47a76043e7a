//! End-to-end consolidation: many checks on one table, one report.

use rowguard::check::CheckOptions;
use rowguard::frame::Frame;
use rowguard::report::{BLOCKING_COLUMN, WARNING_COLUMN, WARNING_ONLY_COLUMN};
use rowguard::table::Table;
use rowguard::value::Value;

fn orders() -> Frame {
    Frame::from_rows(
        &[
            "id".to_string(),
            "amount".to_string(),
            "created".to_string(),
        ],
        &[
            vec![
                Value::Int(1),
                Value::Str("10".into()),
                Value::Str("2024-01-01".into()),
            ],
            vec![
                Value::Int(2),
                Value::Str("-5".into()),
                Value::Str("not a date".into()),
            ],
            vec![Value::Int(3), Value::Str(String::new()), Value::Null],
        ],
    )
    .unwrap()
}

#[tokio::test]
async fn one_row_per_violating_record() {
    let mut table = Table::materialized("orders", orders()).with_unique_key("id");
    table
        .check_not_empty_column("amount", CheckOptions::new())
        .await
        .unwrap();
    table
        .check_range(
            "amount",
            Some(Value::Int(0)),
            None,
            true,
            true,
            CheckOptions::new(),
        )
        .await
        .unwrap();
    table
        .check_datetime_format(
            &["created".to_string()],
            Some("%Y-%m-%d".to_string()),
            CheckOptions::warning(),
        )
        .await
        .unwrap();

    let report = table.consolidated_rows(true).unwrap();
    let rows = report.rows();
    // id=2 fails the range check and triggers the format warning; id=3
    // fails not-empty. Two distinct records.
    assert_eq!(rows.num_rows(), 2);
    assert!(!report.truncated());

    let find = |id: i64| {
        (0..rows.num_rows())
            .find(|r| rows.value_by_name("id", *r).unwrap() == Value::Int(id))
            .unwrap()
    };
    let two = find(2);
    assert!(!rows
        .value_by_name(BLOCKING_COLUMN, two)
        .unwrap()
        .is_null());
    assert!(!rows.value_by_name(WARNING_COLUMN, two).unwrap().is_null());
    assert_eq!(
        rows.value_by_name(WARNING_ONLY_COLUMN, two).unwrap(),
        Value::Bool(false)
    );
    let three = find(3);
    assert!(rows.value_by_name(WARNING_COLUMN, three).unwrap().is_null());
}

#[tokio::test]
async fn warnings_can_be_left_out() {
    let mut table = Table::materialized("orders", orders()).with_unique_key("id");
    table
        .check_datetime_format(
            &["created".to_string()],
            Some("%Y-%m-%d".to_string()),
            CheckOptions::warning(),
        )
        .await
        .unwrap();
    let with_warnings = table.consolidated_rows(true).unwrap();
    assert_eq!(with_warnings.rows().num_rows(), 1);
    assert_eq!(
        with_warnings
            .rows()
            .value_by_name(WARNING_ONLY_COLUMN, 0)
            .unwrap(),
        Value::Bool(true)
    );
    let without = table.consolidated_rows(false).unwrap();
    assert_eq!(without.rows().num_rows(), 0);
}

#[tokio::test]
async fn duplicate_key_degrades_to_content_grouping() {
    let frame = Frame::from_rows(
        &["id".to_string(), "amount".to_string()],
        &[
            vec![Value::Int(1), Value::Str("-5".into())],
            vec![Value::Int(1), Value::Str("-9".into())],
        ],
    )
    .unwrap();
    let mut table = Table::materialized("orders", frame).with_unique_key("id");
    table.check_key_unique(CheckOptions::new()).await.unwrap();
    table
        .check_range(
            "amount",
            Some(Value::Int(0)),
            None,
            true,
            true,
            CheckOptions::new(),
        )
        .await
        .unwrap();
    assert!(table.key_problem());
    // With a duplicated key the two rows must not fold into one record.
    let report = table.consolidated_rows(true).unwrap();
    assert_eq!(report.rows().num_rows(), 2);
}

#[tokio::test]
async fn truncated_sample_marks_the_report() {
    let rows: Vec<Vec<Value>> = (0..10)
        .map(|i| vec![Value::Int(i), Value::Null])
        .collect();
    let frame = Frame::from_rows(&["id".to_string(), "a".to_string()], &rows).unwrap();
    let mut table = Table::materialized("t", frame)
        .with_unique_key("id")
        .with_sample_cap(4);
    table
        .check_not_empty_column("a", CheckOptions::new())
        .await
        .unwrap();
    let report = table.consolidated_rows(true).unwrap();
    assert!(report.truncated());
    // The report can only surface the sampled rows: a lower bound.
    assert_eq!(report.rows().num_rows(), 4);
}

#[tokio::test]
async fn clear_results_resets_the_report() {
    let mut table = Table::materialized("orders", orders());
    table
        .check_not_empty_column("amount", CheckOptions::new())
        .await
        .unwrap();
    assert_eq!(table.consolidated_rows(true).unwrap().rows().num_rows(), 1);
    table.clear_results();
    assert_eq!(table.consolidated_rows(true).unwrap().rows().num_rows(), 0);
}
