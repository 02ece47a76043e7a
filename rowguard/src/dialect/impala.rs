//! Impala dialect adapter.

use super::Dialect;

/// Impala SQL: `to_timestamp` with Java-style format tokens,
/// `cast(.. as float)` (which already yields NULL on bad input) and
/// `regexp_like` with the `'i'` flag for case-insensitive matching.
#[derive(Debug, Clone, Copy, Default)]
pub struct Impala;

impl Dialect for Impala {
    fn name(&self) -> &'static str {
        "impala"
    }

    fn cast_timestamp(&self, expr: &str, format: Option<&str>) -> String {
        match format {
            Some(fmt) => format!("to_timestamp({expr}, '{}')", self.convert_format(fmt)),
            None => format!("cast({expr} as timestamp)"),
        }
    }

    fn cast_float(&self, expr: &str) -> String {
        format!("cast({expr} as float)")
    }

    fn regex_match(&self, expr: &str, pattern: &str, case_sensitive: bool) -> String {
        let escaped = pattern.replace('\'', "''");
        if case_sensitive {
            format!("regexp_like({expr}, '{escaped}')")
        } else {
            format!("regexp_like({expr}, '{escaped}', 'i')")
        }
    }

    fn format_token(&self, directive: char) -> Option<&'static str> {
        match directive {
            'Y' => Some("yyyy"),
            'y' => Some("yy"),
            'm' => Some("MM"),
            'd' => Some("dd"),
            'H' => Some("HH"),
            'M' => Some("mm"),
            'S' => Some("ss"),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_cast_fragments() {
        let d = Impala;
        assert_eq!(
            d.cast_timestamp("birth_date", Some("%d-%m-%Y")),
            "to_timestamp(birth_date, 'dd-MM-yyyy')"
        );
        assert_eq!(
            d.cast_timestamp("birth_date", None),
            "cast(birth_date as timestamp)"
        );
    }

    #[test]
    fn test_regex_fragments() {
        let d = Impala;
        assert_eq!(
            d.regex_match("code", "^A'B$", true),
            "regexp_like(code, '^A''B$')"
        );
        assert_eq!(
            d.regex_match("code", "^ab$", false),
            "regexp_like(code, '^ab$', 'i')"
        );
    }
}
