//! Lenient numeric parsing for scraped text.
//!
//! Ranking pages render counts as "1,234", "12.7K viewers" or "-" and the
//! crawl must never fail on a malformed cell. Every function here is total:
//! the result is either a finite number or the caller's default.

/// Options controlling how display text is cleaned before parsing.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizeOptions {
    /// Value returned for empty, missing or unparsable input.
    pub default: Option<f64>,
    /// Strip every character that is not a digit, `.` or `-`.
    pub remove_non_numeric: bool,
    pub decimal_separator: char,
    pub thousands_separator: char,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            default: None,
            remove_non_numeric: true,
            decimal_separator: '.',
            thousands_separator: ',',
        }
    }
}

impl NormalizeOptions {
    /// Same options with a different default.
    pub fn with_default(mut self, default: f64) -> Self {
        self.default = Some(default);
        self
    }
}

/// Parse display text into a number, or return `opts.default`.
pub fn normalize(text: Option<&str>, opts: &NormalizeOptions) -> Option<f64> {
    let trimmed = match text.map(str::trim) {
        Some(t) if !t.is_empty() => t,
        _ => return opts.default,
    };

    let mut cleaned: String = trimmed
        .chars()
        .filter(|c| *c != opts.thousands_separator)
        .collect();

    if opts.decimal_separator != '.' {
        cleaned = cleaned.replace(opts.decimal_separator, ".");
    }

    if opts.remove_non_numeric {
        cleaned.retain(|c| c.is_ascii_digit() || c == '.' || c == '-');
    }

    match parse_leading_float(&cleaned) {
        Some(value) if value.is_finite() => Some(value),
        _ => opts.default,
    }
}

/// Parse as an integer, flooring fractional values. Defaults to 0.
pub fn normalize_integer(text: Option<&str>) -> i64 {
    normalize_integer_with(text, &NormalizeOptions::default())
}

/// Integer parse with explicit options; `opts.default` replaces the 0 fallback.
pub fn normalize_integer_with(text: Option<&str>, opts: &NormalizeOptions) -> i64 {
    let fallback = opts.default.unwrap_or(0.0);
    let value = normalize(text, opts).unwrap_or(fallback).floor();
    // `as` saturates at the i64 bounds.
    value as i64
}

/// Parse as a float. Defaults to 0.0.
pub fn normalize_float(text: Option<&str>) -> f64 {
    normalize(text, &NormalizeOptions::default()).unwrap_or(0.0)
}

/// Parse the longest numeric prefix of `s`, ignoring trailing garbage.
///
/// Accepts an optional sign, digits with an optional fraction and an
/// optional exponent. At least one mantissa digit is required.
fn parse_leading_float(s: &str) -> Option<f64> {
    let bytes = s.as_bytes();
    let mut end = 0;

    if matches!(bytes.first(), Some(b'+') | Some(b'-')) {
        end += 1;
    }

    let int_start = end;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    let mut mantissa_digits = end - int_start;

    if end < bytes.len() && bytes[end] == b'.' {
        let frac_start = end + 1;
        let mut frac_end = frac_start;
        while frac_end < bytes.len() && bytes[frac_end].is_ascii_digit() {
            frac_end += 1;
        }
        if mantissa_digits > 0 || frac_end > frac_start {
            mantissa_digits += frac_end - frac_start;
            end = frac_end;
        }
    }

    if mantissa_digits == 0 {
        return None;
    }

    if end < bytes.len() && matches!(bytes[end], b'e' | b'E') {
        let mut exp_end = end + 1;
        if matches!(bytes.get(exp_end), Some(b'+') | Some(b'-')) {
            exp_end += 1;
        }
        let digits_start = exp_end;
        while exp_end < bytes.len() && bytes[exp_end].is_ascii_digit() {
            exp_end += 1;
        }
        if exp_end > digits_start {
            end = exp_end;
        }
    }

    s[..end].parse::<f64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_examples() {
        assert_eq!(normalize_integer(Some("1,234")), 1234);
        assert_eq!(normalize_integer(Some("")), 0);
        assert_eq!(normalize_integer(None), 0);
        assert_eq!(normalize_integer(Some("12.7")), 12);
    }

    #[test]
    fn test_strips_units_and_whitespace() {
        assert_eq!(normalize_integer(Some("  3,120,000 명 ")), 3_120_000);
        assert_eq!(normalize_integer(Some("₩ 45,000")), 45_000);
        assert_eq!(normalize_float(Some("1.5K")), 1.5);
    }

    #[test]
    fn test_negative_values_floor_down() {
        assert_eq!(normalize_integer(Some("-12.2")), -13);
        assert_eq!(normalize_integer(Some("-1,000")), -1000);
    }

    #[test]
    fn test_unparsable_returns_default() {
        let opts = NormalizeOptions::default();
        assert_eq!(normalize(Some("-"), &opts), None);
        assert_eq!(normalize(Some("..."), &opts), None);
        assert_eq!(normalize(Some("n/a"), &opts), None);
        assert_eq!(normalize(Some("n/a"), &opts.clone().with_default(7.0)), Some(7.0));
        assert_eq!(normalize_integer(Some("--")), 0);
    }

    #[test]
    fn test_trailing_garbage_after_number() {
        // "1.2.3" parses its numeric prefix.
        assert_eq!(normalize_float(Some("1.2.3")), 1.2);
        assert_eq!(normalize_float(Some("10-20")), 10.0);
    }

    #[test]
    fn test_custom_separators() {
        let opts = NormalizeOptions {
            decimal_separator: ',',
            thousands_separator: '.',
            ..Default::default()
        };
        assert_eq!(normalize(Some("1.234,5"), &opts), Some(1234.5));
    }

    #[test]
    fn test_keep_non_numeric_uses_prefix() {
        let opts = NormalizeOptions {
            remove_non_numeric: false,
            ..Default::default()
        };
        assert_eq!(normalize(Some("42 viewers"), &opts), Some(42.0));
        assert_eq!(normalize(Some("viewers 42"), &opts), None);
    }

    #[test]
    fn test_non_finite_is_rejected() {
        let opts = NormalizeOptions {
            remove_non_numeric: false,
            ..Default::default()
        };
        assert_eq!(normalize(Some("1e999"), &opts), None);
        assert_eq!(normalize(Some("inf"), &opts), None);
        // With default cleaning the exponent marker is stripped.
        assert_eq!(normalize_integer(Some("1e999")), 1999);
    }

    #[test]
    fn test_never_nan() {
        let samples = [
            "", " ", "-", ".", "-.", "e5", "1e", "1e+", "NaN", "∞", "1,2,3", "０１２",
            "9999999999999999999999999",
        ];
        for s in samples {
            let v = normalize_float(Some(s));
            assert!(v.is_finite(), "{s:?} produced {v}");
        }
    }

    #[test]
    fn test_integer_saturates() {
        assert_eq!(normalize_integer(Some("99999999999999999999999")), i64::MAX);
    }
}
