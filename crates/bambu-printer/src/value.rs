//! Field extraction over schema-less telemetry documents.
//!
//! Reports arrive as arbitrarily nested JSON. A numeric field may be an
//! integer, a float, or an arbitrary-precision decimal depending on
//! firmware, so every numeric read goes through [`coerce_number`]. Text is
//! never read as a number.

use serde_json::{Map, Number, Value};

/// A wire number reduced to one of two canonical shapes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Numeric {
    /// Value written as a whole number (a zero fraction counts as whole).
    Integer(i64),
    /// Value with a non-zero fraction, an exponent, or outside the
    /// integer range.
    Float(f64),
}

impl Numeric {
    /// Value as a float.
    pub fn as_f64(self) -> f64 {
        match self {
            Numeric::Integer(i) => i as f64,
            Numeric::Float(f) => f,
        }
    }

    /// Integer value, only when the wire text was a whole number.
    pub fn exact_integer(self) -> Option<i64> {
        match self {
            Numeric::Integer(i) => Some(i),
            Numeric::Float(_) => None,
        }
    }

    /// Integer value with any fraction dropped.
    pub fn truncate(self) -> i64 {
        match self {
            Numeric::Integer(i) => i,
            Numeric::Float(f) => f.trunc() as i64,
        }
    }
}

/// Coerce a native integer, float, or decimal number into a [`Numeric`].
///
/// Returns `None` for every non-number, numeric-looking strings included.
pub fn coerce_number(value: &Value) -> Option<Numeric> {
    match value {
        Value::Number(n) => from_number(n),
        _ => None,
    }
}

fn from_number(n: &Number) -> Option<Numeric> {
    if let Some(i) = n.as_i64() {
        return Some(Numeric::Integer(i));
    }
    if let Some(i) = integral_text(&n.to_string()) {
        return Some(Numeric::Integer(i));
    }
    n.as_f64().filter(|f| f.is_finite()).map(Numeric::Float)
}

/// Parse decimal text that is exactly a whole number: an optional sign,
/// digits, and an optional fraction made only of zeros. Exponent forms
/// are not whole.
fn integral_text(text: &str) -> Option<i64> {
    let (whole, fraction) = match text.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (text, ""),
    };
    let digits = whole.strip_prefix('-').unwrap_or(whole);
    if digits.is_empty()
        || !digits.bytes().all(|b| b.is_ascii_digit())
        || !fraction.bytes().all(|b| b == b'0')
    {
        return None;
    }
    whole.parse().ok()
}

/// Integer value only if the field is a number written without a fraction.
///
/// `30` parses, `30.0`, `"30"` and `"30 min"` do not.
pub fn strict_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        _ => None,
    }
}

/// Descend `value` key by key.
pub fn lookup<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter()
        .try_fold(value, |current, key| current.as_object()?.get(*key))
}

/// Descend a top-level mapping key by key.
pub fn lookup_in<'a>(map: &'a Map<String, Value>, path: &[&str]) -> Option<&'a Value> {
    let (first, rest) = path.split_first()?;
    lookup(map.get(*first)?, rest)
}

pub(crate) fn integer_or_zero(value: Option<&Value>) -> i64 {
    value.and_then(coerce_number).map(Numeric::truncate).unwrap_or(0)
}

pub(crate) fn float_or_zero(value: Option<&Value>) -> f64 {
    value.and_then(coerce_number).map(Numeric::as_f64).unwrap_or(0.0)
}

pub(crate) fn text_or_empty(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_numeric_representations_agree() {
        let integer = json!(16);
        let float = json!(16.0);
        let decimal: Value = serde_json::from_str("16").unwrap();
        let padded: Value = serde_json::from_str("16.000").unwrap();

        for value in [&integer, &float, &decimal, &padded] {
            let n = coerce_number(value).unwrap();
            assert_eq!(n.exact_integer(), Some(16), "{value}");
        }
    }

    #[test]
    fn test_near_integer_decimal_is_not_whole() {
        let value: Value = serde_json::from_str("16.0000000000000001").unwrap();
        let n = coerce_number(&value).unwrap();
        assert_eq!(n.exact_integer(), None);
        assert_eq!(n.truncate(), 16);

        let exponent: Value = serde_json::from_str("1.6e1").unwrap();
        assert_eq!(coerce_number(&exponent).unwrap().exact_integer(), None);
    }

    #[test]
    fn test_fractional_values() {
        let n = coerce_number(&json!(25.5)).unwrap();
        assert_eq!(n.as_f64(), 25.5);
        assert_eq!(n.exact_integer(), None);
        assert_eq!(n.truncate(), 25);

        let negative: Value = serde_json::from_str("-3.0").unwrap();
        assert_eq!(coerce_number(&negative).unwrap().exact_integer(), Some(-3));
    }

    #[test]
    fn test_non_numeric_values() {
        assert!(coerce_number(&json!(true)).is_none());
        assert!(coerce_number(&json!(null)).is_none());
        assert!(coerce_number(&json!("16")).is_none());
        assert!(coerce_number(&json!("38.25")).is_none());
        assert!(coerce_number(&json!("-45dBm")).is_none());
        assert!(coerce_number(&json!([1])).is_none());
    }

    #[test]
    fn test_strict_integer() {
        assert_eq!(strict_integer(&json!(42)), Some(42));
        assert_eq!(strict_integer(&json!(42.0)), None);
        assert_eq!(strict_integer(&json!("42")), None);
        assert_eq!(strict_integer(&json!(42.5)), None);
        assert_eq!(strict_integer(&json!("soon")), None);
        assert_eq!(strict_integer(&json!(null)), None);
    }

    #[test]
    fn test_lookup_stops_at_non_mapping() {
        let doc = json!({"print": {"device": {"ctc": {"info": {"temp": 31}}}, "ams": [1, 2]}});
        assert_eq!(
            lookup(&doc, &["print", "device", "ctc", "info", "temp"]),
            Some(&json!(31))
        );
        assert_eq!(lookup(&doc, &["print", "ams", "0"]), None);
        assert_eq!(lookup(&doc, &["print", "missing"]), None);
        assert_eq!(lookup(&doc, &[]), Some(&doc));
    }

    #[test]
    fn test_field_defaults() {
        assert_eq!(integer_or_zero(None), 0);
        assert_eq!(integer_or_zero(Some(&json!("n/a"))), 0);
        assert_eq!(integer_or_zero(Some(&json!("42"))), 0);
        assert_eq!(float_or_zero(Some(&json!(60))), 60.0);
        assert_eq!(text_or_empty(Some(&json!("-42dBm"))), "-42dBm");
        assert_eq!(text_or_empty(Some(&json!(7))), "7");
        assert_eq!(text_or_empty(Some(&json!(null))), "");
    }
}
