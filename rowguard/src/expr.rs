//! The predicate intermediate representation.
//!
//! Every rule compiles its negative filter and ignore filter into one
//! [`Expr`] tree, which then has exactly two renderers: [`Expr::to_sql`]
//! for live sources (dialect-aware) and [`Expr::mask`] for in-memory
//! frames. Keeping a single tree per rule is what guarantees that both
//! backends classify identical rows identically.
//!
//! Null handling follows SQL three-valued logic in both renderers: a
//! comparison with a null operand is undefined, and an undefined
//! predicate keeps a row out of the selection. Rules that must treat
//! undefined as "pass" wrap their arms in [`Expr::coalesce_false`].

use crate::dialect::Dialect;
use crate::error::{GuardError, Result};
use crate::frame::Frame;
use crate::value::Value;
use regex::Regex;
use std::cmp::Ordering;
use std::collections::BTreeSet;

/// Comparison operators available to rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// `<`
    Lt,
    /// `<=`
    LtEq,
    /// `>`
    Gt,
    /// `>=`
    GtEq,
    /// `=`
    Eq,
    /// `!=`
    NotEq,
}

impl CompareOp {
    /// SQL spelling of the operator.
    pub fn as_sql(&self) -> &'static str {
        match self {
            CompareOp::Lt => "<",
            CompareOp::LtEq => "<=",
            CompareOp::Gt => ">",
            CompareOp::GtEq => ">=",
            CompareOp::Eq => "=",
            CompareOp::NotEq => "!=",
        }
    }

    /// The logical negation, used to turn an expected ordering into the
    /// predicate that selects rows violating it.
    pub fn negate(&self) -> CompareOp {
        match self {
            CompareOp::Lt => CompareOp::GtEq,
            CompareOp::LtEq => CompareOp::Gt,
            CompareOp::Gt => CompareOp::LtEq,
            CompareOp::GtEq => CompareOp::Lt,
            CompareOp::Eq => CompareOp::NotEq,
            CompareOp::NotEq => CompareOp::Eq,
        }
    }

    /// Parses the SQL spelling.
    pub fn parse(text: &str) -> Result<CompareOp> {
        match text {
            "<" => Ok(CompareOp::Lt),
            "<=" => Ok(CompareOp::LtEq),
            ">" => Ok(CompareOp::Gt),
            ">=" => Ok(CompareOp::GtEq),
            "=" | "==" => Ok(CompareOp::Eq),
            "!=" | "<>" => Ok(CompareOp::NotEq),
            other => Err(GuardError::Parse(format!(
                "operator '{other}' not recognized; possible values are <, <=, >, >=, =, !="
            ))),
        }
    }

    fn matches(&self, ordering: Ordering) -> bool {
        match self {
            CompareOp::Lt => ordering == Ordering::Less,
            CompareOp::LtEq => ordering != Ordering::Greater,
            CompareOp::Gt => ordering == Ordering::Greater,
            CompareOp::GtEq => ordering != Ordering::Less,
            CompareOp::Eq => ordering == Ordering::Equal,
            CompareOp::NotEq => ordering != Ordering::Equal,
        }
    }
}

/// A tagged expression tree over column references, literals and a fixed
/// operator vocabulary.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Reference to a column of the checked table.
    Column(String),
    /// Constant scalar.
    Literal(Value),
    /// `expr IS NULL`
    IsNull(Box<Expr>),
    /// Logical negation (three-valued).
    Not(Box<Expr>),
    /// Conjunction; the empty conjunction is TRUE.
    And(Vec<Expr>),
    /// Disjunction; the empty disjunction is FALSE.
    Or(Vec<Expr>),
    /// Binary comparison.
    Compare {
        op: CompareOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// String-form membership against a literal list.
    InList {
        expr: Box<Expr>,
        values: Vec<String>,
        negated: bool,
        case_insensitive: bool,
    },
    /// Dialect-backed regular expression match on the string form.
    RegexMatch {
        expr: Box<Expr>,
        pattern: String,
        case_sensitive: bool,
        negated: bool,
    },
    /// Safe cast to float; non-numeric input becomes NULL.
    CastFloat(Box<Expr>),
    /// Safe cast to timestamp with an optional strftime format.
    CastTimestamp {
        expr: Box<Expr>,
        format: Option<String>,
    },
    /// Cast to string form.
    CastString(Box<Expr>),
    /// `coalesce(expr, FALSE)`: collapses undefined to false.
    CoalesceFalse(Box<Expr>),
}

impl Expr {
    /// Column reference.
    pub fn col(name: impl Into<String>) -> Expr {
        Expr::Column(name.into())
    }

    /// Scalar literal.
    pub fn lit(value: Value) -> Expr {
        Expr::Literal(value)
    }

    /// The always-false predicate.
    pub fn always_false() -> Expr {
        Expr::Or(Vec::new())
    }

    /// Conjunction with another expression.
    pub fn and(self, other: Expr) -> Expr {
        match self {
            Expr::And(mut parts) => {
                parts.push(other);
                Expr::And(parts)
            }
            first => Expr::And(vec![first, other]),
        }
    }

    /// Disjunction with another expression.
    pub fn or(self, other: Expr) -> Expr {
        match self {
            Expr::Or(mut parts) => {
                parts.push(other);
                Expr::Or(parts)
            }
            first => Expr::Or(vec![first, other]),
        }
    }

    /// Logical negation.
    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Expr {
        Expr::Not(Box::new(self))
    }

    /// `IS NULL` test.
    pub fn is_null(self) -> Expr {
        Expr::IsNull(Box::new(self))
    }

    /// Comparison between two expressions.
    pub fn compare(op: CompareOp, left: Expr, right: Expr) -> Expr {
        Expr::Compare {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Safe float cast.
    pub fn cast_float(self) -> Expr {
        Expr::CastFloat(Box::new(self))
    }

    /// Safe timestamp cast with an optional strftime format.
    pub fn cast_timestamp(self, format: Option<String>) -> Expr {
        Expr::CastTimestamp {
            expr: Box::new(self),
            format,
        }
    }

    /// String cast.
    pub fn cast_string(self) -> Expr {
        Expr::CastString(Box::new(self))
    }

    /// Collapses an undefined result to false.
    pub fn coalesce_false(self) -> Expr {
        Expr::CoalesceFalse(Box::new(self))
    }

    /// String-form membership test.
    pub fn in_list(self, values: Vec<String>, negated: bool, case_insensitive: bool) -> Expr {
        Expr::InList {
            expr: Box::new(self),
            values,
            negated,
            case_insensitive,
        }
    }

    /// Regular expression match on the string form.
    pub fn regex_match(self, pattern: impl Into<String>, case_sensitive: bool, negated: bool) -> Expr {
        Expr::RegexMatch {
            expr: Box::new(self),
            pattern: pattern.into(),
            case_sensitive,
            negated,
        }
    }

    /// ANDs a list of expressions; `None` when the list is empty.
    pub fn and_all(exprs: Vec<Expr>) -> Option<Expr> {
        let mut iter = exprs.into_iter();
        let first = iter.next()?;
        Some(iter.fold(first, |acc, e| acc.and(e)))
    }

    /// All column names referenced by this expression.
    pub fn columns(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns(&self, out: &mut BTreeSet<String>) {
        match self {
            Expr::Column(name) => {
                out.insert(name.clone());
            }
            Expr::Literal(_) => {}
            Expr::IsNull(e)
            | Expr::Not(e)
            | Expr::CastFloat(e)
            | Expr::CastString(e)
            | Expr::CoalesceFalse(e) => e.collect_columns(out),
            Expr::CastTimestamp { expr, .. } => expr.collect_columns(out),
            Expr::And(parts) | Expr::Or(parts) => {
                for p in parts {
                    p.collect_columns(out);
                }
            }
            Expr::Compare { left, right, .. } => {
                left.collect_columns(out);
                right.collect_columns(out);
            }
            Expr::InList { expr, .. } | Expr::RegexMatch { expr, .. } => expr.collect_columns(out),
        }
    }

    /// Renders the expression as a SQL fragment for the given dialect.
    pub fn to_sql(&self, dialect: &dyn Dialect) -> Result<String> {
        Ok(match self {
            Expr::Column(name) => name.clone(),
            Expr::Literal(value) => value.to_sql_literal(),
            Expr::IsNull(e) => format!("({} IS NULL)", e.to_sql(dialect)?),
            Expr::Not(e) => format!("(NOT {})", e.to_sql(dialect)?),
            Expr::And(parts) => {
                if parts.is_empty() {
                    "TRUE".to_string()
                } else {
                    let rendered: Vec<String> = parts
                        .iter()
                        .map(|p| p.to_sql(dialect))
                        .collect::<Result<_>>()?;
                    format!("({})", rendered.join(" AND "))
                }
            }
            Expr::Or(parts) => {
                if parts.is_empty() {
                    "FALSE".to_string()
                } else {
                    let rendered: Vec<String> = parts
                        .iter()
                        .map(|p| p.to_sql(dialect))
                        .collect::<Result<_>>()?;
                    format!("({})", rendered.join(" OR "))
                }
            }
            Expr::Compare { op, left, right } => format!(
                "({} {} {})",
                left.to_sql(dialect)?,
                op.as_sql(),
                right.to_sql(dialect)?
            ),
            Expr::InList {
                expr,
                values,
                negated,
                case_insensitive,
            } => {
                let member = format!("cast({} as string)", expr.to_sql(dialect)?);
                let member = if *case_insensitive {
                    format!("lower({member})")
                } else {
                    member
                };
                let quoted: Vec<String> = values
                    .iter()
                    .map(|v| {
                        let v = if *case_insensitive { v.to_lowercase() } else { v.clone() };
                        format!("'{}'", v.replace('\'', "''"))
                    })
                    .collect();
                let keyword = if *negated { "NOT IN" } else { "IN" };
                format!("({member} {keyword} ({}))", quoted.join(","))
            }
            Expr::RegexMatch {
                expr,
                pattern,
                case_sensitive,
                negated,
            } => {
                let fragment =
                    dialect.regex_match(&expr.to_sql(dialect)?, pattern, *case_sensitive);
                if *negated {
                    format!("(NOT {fragment})")
                } else {
                    fragment
                }
            }
            Expr::CastFloat(e) => dialect.cast_float(&e.to_sql(dialect)?),
            Expr::CastTimestamp { expr, format } => {
                dialect.cast_timestamp(&expr.to_sql(dialect)?, format.as_deref())
            }
            Expr::CastString(e) => format!("cast({} as string)", e.to_sql(dialect)?),
            Expr::CoalesceFalse(e) => format!("coalesce({}, FALSE)", e.to_sql(dialect)?),
        })
    }

    /// Evaluates the expression over every row of a frame, yielding one
    /// value per row. Column references resolve against the frame; a
    /// missing column is a schema error.
    pub fn eval_vector(&self, frame: &Frame) -> Result<Vec<Value>> {
        let rows = frame.num_rows();
        Ok(match self {
            Expr::Column(name) => {
                let idx = frame.column_index(name)?;
                (0..rows).map(|r| frame.value(idx, r)).collect()
            }
            Expr::Literal(value) => vec![value.clone(); rows],
            Expr::IsNull(e) => e
                .eval_vector(frame)?
                .into_iter()
                .map(|v| Value::Bool(v.is_null()))
                .collect(),
            Expr::Not(e) => e
                .eval_vector(frame)?
                .into_iter()
                .map(|v| match v {
                    Value::Null => Ok(Value::Null),
                    Value::Bool(b) => Ok(Value::Bool(!b)),
                    other => Err(GuardError::Internal(format!(
                        "NOT applied to non-boolean value {other}"
                    ))),
                })
                .collect::<Result<_>>()?,
            Expr::And(parts) => fold_logical(parts, frame, rows, true)?,
            Expr::Or(parts) => fold_logical(parts, frame, rows, false)?,
            Expr::Compare { op, left, right } => {
                let lhs = left.eval_vector(frame)?;
                let rhs = right.eval_vector(frame)?;
                lhs.into_iter()
                    .zip(rhs)
                    .map(|(l, r)| match l.compare(&r) {
                        Some(ordering) => Value::Bool(op.matches(ordering)),
                        None => Value::Null,
                    })
                    .collect()
            }
            Expr::InList {
                expr,
                values,
                negated,
                case_insensitive,
            } => {
                let members: Vec<String> = if *case_insensitive {
                    values.iter().map(|v| v.to_lowercase()).collect()
                } else {
                    values.clone()
                };
                expr.eval_vector(frame)?
                    .into_iter()
                    .map(|v| match v.string_form() {
                        Some(s) => {
                            let s = if *case_insensitive { s.to_lowercase() } else { s };
                            Value::Bool(members.contains(&s) != *negated)
                        }
                        None => Value::Null,
                    })
                    .collect()
            }
            Expr::RegexMatch {
                expr,
                pattern,
                case_sensitive,
                negated,
            } => {
                let full_pattern = if *case_sensitive {
                    pattern.clone()
                } else {
                    format!("(?i){pattern}")
                };
                let regex = Regex::new(&full_pattern)
                    .map_err(|e| GuardError::Parse(format!("invalid regex '{pattern}': {e}")))?;
                expr.eval_vector(frame)?
                    .into_iter()
                    .map(|v| match v.string_form() {
                        Some(s) => Value::Bool(regex.is_match(&s) != *negated),
                        None => Value::Null,
                    })
                    .collect()
            }
            Expr::CastFloat(e) => e
                .eval_vector(frame)?
                .into_iter()
                .map(|v| match v.to_float() {
                    Some(f) => Value::Float(f),
                    None => Value::Null,
                })
                .collect(),
            Expr::CastTimestamp { expr, format } => expr
                .eval_vector(frame)?
                .into_iter()
                .map(|v| match v.to_timestamp(format.as_deref()) {
                    Some(ts) => Value::Timestamp(ts),
                    None => Value::Null,
                })
                .collect(),
            Expr::CastString(e) => e
                .eval_vector(frame)?
                .into_iter()
                .map(|v| match v.string_form() {
                    Some(s) => Value::Str(s),
                    None => Value::Null,
                })
                .collect(),
            Expr::CoalesceFalse(e) => e
                .eval_vector(frame)?
                .into_iter()
                .map(|v| match v {
                    Value::Null => Value::Bool(false),
                    other => other,
                })
                .collect(),
        })
    }

    /// Evaluates the expression as a boolean row mask. An undefined
    /// (null) result keeps the row out of the selection, matching SQL
    /// WHERE semantics.
    pub fn mask(&self, frame: &Frame) -> Result<Vec<bool>> {
        self.eval_vector(frame)?
            .into_iter()
            .map(|v| match v {
                Value::Bool(b) => Ok(b),
                Value::Null => Ok(false),
                other => Err(GuardError::Internal(format!(
                    "predicate produced non-boolean value {other}"
                ))),
            })
            .collect()
    }
}

/// Three-valued AND/OR over element-wise operands.
fn fold_logical(parts: &[Expr], frame: &Frame, rows: usize, is_and: bool) -> Result<Vec<Value>> {
    // Empty conjunction is TRUE, empty disjunction FALSE.
    let mut acc = vec![Some(is_and); rows];
    for part in parts {
        let vector = part.eval_vector(frame)?;
        for (slot, value) in acc.iter_mut().zip(vector) {
            let operand = match value {
                Value::Bool(b) => Some(b),
                Value::Null => None,
                other => {
                    return Err(GuardError::Internal(format!(
                        "logical operator applied to non-boolean value {other}"
                    )))
                }
            };
            *slot = if is_and {
                match (*slot, operand) {
                    (Some(false), _) | (_, Some(false)) => Some(false),
                    (Some(true), Some(true)) => Some(true),
                    _ => None,
                }
            } else {
                match (*slot, operand) {
                    (Some(true), _) | (_, Some(true)) => Some(true),
                    (Some(false), Some(false)) => Some(false),
                    _ => None,
                }
            };
        }
    }
    Ok(acc
        .into_iter()
        .map(|slot| match slot {
            Some(b) => Value::Bool(b),
            None => Value::Null,
        })
        .collect())
}
