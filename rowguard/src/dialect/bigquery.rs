//! BigQuery dialect adapter.

use super::Dialect;

/// BigQuery SQL: `safe_cast` for both timestamp and float (NULL on bad
/// input by definition) and `regexp_contains`, with `(?i)` for
/// case-insensitive matching since BigQuery regexes are RE2.
#[derive(Debug, Clone, Copy, Default)]
pub struct BigQuery;

impl Dialect for BigQuery {
    fn name(&self) -> &'static str {
        "bigquery"
    }

    fn cast_timestamp(&self, expr: &str, format: Option<&str>) -> String {
        match format {
            Some(fmt) => format!(
                "safe_cast({expr} as timestamp FORMAT '{}')",
                self.convert_format(fmt)
            ),
            None => format!("safe_cast({expr} as timestamp)"),
        }
    }

    fn cast_float(&self, expr: &str) -> String {
        format!("safe_cast({expr} as float64)")
    }

    fn regex_match(&self, expr: &str, pattern: &str, case_sensitive: bool) -> String {
        let pattern = if case_sensitive {
            pattern.to_string()
        } else {
            format!("(?i){pattern}")
        };
        let escaped = pattern.replace('\'', "''");
        format!("regexp_contains(cast({expr} as string), '{escaped}')")
    }

    fn format_token(&self, directive: char) -> Option<&'static str> {
        match directive {
            'Y' => Some("YYYY"),
            'y' => Some("YY"),
            'm' => Some("MM"),
            'd' => Some("DD"),
            'H' => Some("HH24"),
            'M' => Some("MI"),
            'S' => Some("SS"),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_cast_fragments() {
        let d = BigQuery;
        assert_eq!(
            d.cast_timestamp("birth_date", Some("%Y-%m-%d")),
            "safe_cast(birth_date as timestamp FORMAT 'YYYY-MM-DD')"
        );
        assert_eq!(
            d.cast_timestamp("birth_date", None),
            "safe_cast(birth_date as timestamp)"
        );
    }

    #[test]
    fn test_float_cast_fragment() {
        assert_eq!(BigQuery.cast_float("'3'"), "safe_cast('3' as float64)");
    }

    #[test]
    fn test_regex_case_insensitive_uses_inline_flag() {
        assert_eq!(
            BigQuery.regex_match("code", "^ab$", false),
            "regexp_contains(cast(code as string), '(?i)^ab$')"
        );
    }
}
