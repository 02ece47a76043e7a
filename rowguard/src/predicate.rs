//! Predicate builders.
//!
//! Pure functions composing the two filters every rule needs: the
//! negative filter (selects rows that FAIL the rule) and the ignore
//! filter (selects rows exempt from it, typically null/empty cells and
//! whatever base filter the table carries). Builders return [`Expr`]
//! trees, so each predicate gets both renderings for free.

use crate::expr::{CompareOp, Expr};
use crate::value::Value;

/// How a column is coerced before a range or ordering comparison.
#[derive(Debug, Clone)]
pub enum Coercion {
    /// Safe cast to float.
    Float,
    /// Safe cast to timestamp with an optional strftime format.
    Timestamp(Option<String>),
}

impl Coercion {
    /// Applies the coercion to a column reference.
    pub fn apply(&self, column: &str) -> Expr {
        match self {
            Coercion::Float => Expr::col(column).cast_float(),
            Coercion::Timestamp(format) => Expr::col(column).cast_timestamp(format.clone()),
        }
    }

    /// Coerces a literal bound the same way the column is coerced.
    pub fn apply_literal(&self, value: Value) -> Expr {
        match self {
            Coercion::Float => match value.to_float() {
                Some(f) => Expr::lit(Value::Float(f)),
                None => Expr::lit(Value::Null),
            },
            Coercion::Timestamp(format) => match value.to_timestamp(format.as_deref()) {
                Some(ts) => Expr::lit(Value::Timestamp(ts)),
                None => Expr::lit(Value::Null),
            },
        }
    }
}

/// A column counts as populated only when it is non-null AND its string
/// form is non-empty.
pub fn not_null_guard(column: &str) -> Expr {
    Expr::col(column).is_null().not().and(Expr::compare(
        CompareOp::NotEq,
        Expr::col(column).cast_string(),
        Expr::lit(Value::Str(String::new())),
    ))
}

/// The complement of [`not_null_guard`]: null or empty string form.
pub fn null_or_empty(column: &str) -> Expr {
    Expr::col(column).is_null().or(Expr::compare(
        CompareOp::Eq,
        Expr::col(column).cast_string(),
        Expr::lit(Value::Str(String::new())),
    ))
}

/// Builds the ignore filter: not-null guards for the given columns, any
/// rule-specific extra predicates, and the table's base filter, ANDed.
/// `None` when nothing applies.
pub fn ignore_predicate(
    columns_not_null: &[String],
    extra: &[Expr],
    table_filter: Option<&Expr>,
) -> Option<Expr> {
    let mut parts: Vec<Expr> = columns_not_null
        .iter()
        .map(|c| not_null_guard(c))
        .collect();
    parts.extend(extra.iter().cloned());
    if let Some(filter) = table_filter {
        parts.push(filter.clone());
    }
    Expr::and_all(parts)
}

/// Negative filter for a range rule: the coerced column below the lower
/// bound or above the upper one. An inclusive bound excludes only values
/// strictly outside it; an absent bound drops that side entirely. With
/// neither bound the predicate is always false.
pub fn range_violation(
    column: &str,
    min: Option<Value>,
    max: Option<Value>,
    min_included: bool,
    max_included: bool,
    coercion: &Coercion,
) -> Expr {
    let mut arms = Vec::new();
    if let Some(min) = min {
        let op = if min_included { CompareOp::Lt } else { CompareOp::LtEq };
        arms.push(Expr::compare(
            op,
            coercion.apply(column),
            coercion.apply_literal(min),
        ));
    }
    if let Some(max) = max {
        let op = if max_included { CompareOp::Gt } else { CompareOp::GtEq };
        arms.push(Expr::compare(
            op,
            coercion.apply(column),
            coercion.apply_literal(max),
        ));
    }
    Expr::Or(arms)
}

/// Negative filter for an ordering rule over `columns`, expected
/// ascending left to right. The disjunction covers every ordered pair,
/// not just adjacent ones: ascending order must hold transitively, and
/// coerced comparisons are not guaranteed monotone-transitive. Each arm
/// collapses undefined comparisons to false so rows with missing cells
/// are not selected. A single column yields no pairs, hence no
/// violations.
pub fn ordering_violation(columns: &[String], strictly_ascending: bool, coercion: &Coercion) -> Expr {
    let operands: Vec<Expr> = columns.iter().map(|c| coercion.apply(c)).collect();
    ordering_violation_operands(&operands, strictly_ascending)
}

/// Like [`ordering_violation`] but over pre-coerced operands, for rules
/// that coerce each column differently (e.g. one parse format per date
/// column).
pub fn ordering_violation_operands(operands: &[Expr], strictly_ascending: bool) -> Expr {
    let op = if strictly_ascending {
        CompareOp::GtEq
    } else {
        CompareOp::Gt
    };
    let mut arms = Vec::new();
    for later in 1..operands.len() {
        for earlier in 0..later {
            arms.push(
                Expr::compare(op, operands[earlier].clone(), operands[later].clone())
                    .coalesce_false(),
            );
        }
    }
    Expr::Or(arms)
}

/// Negative filter for a set-membership rule: the string form of the
/// column outside the admitted values, case-folded when requested.
pub fn set_membership_violation(column: &str, values: &[String], case_sensitive: bool) -> Expr {
    Expr::col(column).in_list(values.to_vec(), true, !case_sensitive)
}

/// Negative filter for a pattern rule: string form does not match.
pub fn pattern_violation(column: &str, pattern: &str, case_sensitive: bool) -> Expr {
    Expr::col(column).regex_match(pattern, case_sensitive, true)
}

/// Negative filter for a datetime-format rule: the safe timestamp cast
/// came back null on a populated cell.
pub fn format_violation(column: &str, format: Option<String>) -> Expr {
    Expr::col(column).cast_timestamp(format).is_null()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::Impala;
    use crate::frame::Frame;
    use arrow::array::StringArray;
    use arrow::datatypes::{DataType, Field, Schema};
    use arrow::record_batch::RecordBatch;
    use std::sync::Arc;

    fn single_column_frame(values: Vec<Option<&str>>) -> Frame {
        let schema = Arc::new(Schema::new(vec![Field::new("a", DataType::Utf8, true)]));
        let batch = RecordBatch::try_new(
            schema,
            vec![Arc::new(StringArray::from(values))],
        )
        .unwrap();
        Frame::new(batch)
    }

    #[test]
    fn test_not_null_guard_sql() {
        let sql = not_null_guard("a").to_sql(&Impala).unwrap();
        assert_eq!(sql, "((NOT (a IS NULL)) AND (cast(a as string) != ''))");
    }

    #[test]
    fn test_not_null_guard_mask() {
        let frame = single_column_frame(vec![Some("x"), Some(""), None]);
        let mask = not_null_guard("a").mask(&frame).unwrap();
        assert_eq!(mask, vec![true, false, false]);
        let inverse = null_or_empty("a").mask(&frame).unwrap();
        assert_eq!(inverse, vec![false, true, true]);
    }

    #[test]
    fn test_range_violation_bounds() {
        let frame =
            single_column_frame(vec![Some("-1"), Some("0"), Some("50"), Some("100"), Some("101")]);
        // min inclusive, max exclusive: 0 passes, 100 fails.
        let expr = range_violation(
            "a",
            Some(Value::Int(0)),
            Some(Value::Int(100)),
            true,
            false,
            &Coercion::Float,
        );
        assert_eq!(
            expr.mask(&frame).unwrap(),
            vec![true, false, false, true, true]
        );
    }

    #[test]
    fn test_range_no_bounds_is_always_false() {
        let frame = single_column_frame(vec![Some("5")]);
        let expr = range_violation("a", None, None, true, true, &Coercion::Float);
        assert_eq!(expr.mask(&frame).unwrap(), vec![false]);
        assert_eq!(expr.to_sql(&Impala).unwrap(), "FALSE");
    }

    #[test]
    fn test_range_point_interval() {
        let frame = single_column_frame(vec![Some("5"), Some("6")]);
        // min == max, both inclusive: only exact equality passes.
        let both_inclusive = range_violation(
            "a",
            Some(Value::Int(5)),
            Some(Value::Int(5)),
            true,
            true,
            &Coercion::Float,
        );
        assert_eq!(both_inclusive.mask(&frame).unwrap(), vec![false, true]);
        // One bound exclusive: nothing passes.
        let exclusive = range_violation(
            "a",
            Some(Value::Int(5)),
            Some(Value::Int(5)),
            true,
            false,
            &Coercion::Float,
        );
        assert_eq!(exclusive.mask(&frame).unwrap(), vec![true, true]);
    }

    #[test]
    fn test_ordering_single_column_never_fires() {
        let frame = single_column_frame(vec![Some("3")]);
        let expr = ordering_violation(&["a".to_string()], true, &Coercion::Float);
        assert_eq!(expr.mask(&frame).unwrap(), vec![false]);
    }

    #[test]
    fn test_ordering_sql_covers_all_pairs() {
        let columns = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let sql = ordering_violation(&columns, false, &Coercion::Float)
            .to_sql(&Impala)
            .unwrap();
        // Three ordered pairs: (a,b), (a,c), (b,c).
        assert_eq!(sql.matches(" > ").count(), 3);
        assert!(sql.contains("coalesce"));
    }

    #[test]
    fn test_set_membership_case_folding() {
        let frame = single_column_frame(vec![Some("Yes"), Some("no"), Some("maybe")]);
        let sensitive =
            set_membership_violation("a", &["Yes".to_string(), "no".to_string()], true);
        assert_eq!(sensitive.mask(&frame).unwrap(), vec![false, false, true]);
        let folded =
            set_membership_violation("a", &["YES".to_string(), "NO".to_string()], false);
        assert_eq!(folded.mask(&frame).unwrap(), vec![false, false, true]);
    }

    #[test]
    fn test_ignore_predicate_composition() {
        let filter = Expr::compare(
            CompareOp::Gt,
            Expr::col("a").cast_float(),
            Expr::lit(Value::Float(0.0)),
        );
        let combined = ignore_predicate(&["a".to_string()], &[], Some(&filter)).unwrap();
        let frame = single_column_frame(vec![Some("1"), Some("-1"), None]);
        assert_eq!(combined.mask(&frame).unwrap(), vec![true, false, false]);
        assert!(ignore_predicate(&[], &[], None).is_none());
    }
}
