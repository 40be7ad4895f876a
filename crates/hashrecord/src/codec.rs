//! Value normalization codec
//!
//! Every field is stored in the hash as a tagged string `"{tag}|{payload}"`:
//!
//! | tag | value                | payload                     |
//! |-----|----------------------|-----------------------------|
//! | `s` | string               | raw text                    |
//! | `n` | number               | decimal / `NaN` / `Infinity`|
//! | `b` | boolean              | `true` / `false`            |
//! | `i` | big integer          | decimal                     |
//! | `d` | date                 | epoch milliseconds          |
//! | `o` | null, array, object  | JSON text                   |
//! | `u` | undefined            | empty                       |
//!
//! `normalize` never fails and `denormalize` accepts any string; unknown
//! tags and unparseable payloads decode to [`Value::Undefined`].

use std::collections::BTreeMap;
use std::sync::OnceLock;

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use regex::Regex;

/// Field values keyed by column name.
pub type Values = BTreeMap<String, Value>;

/// Build a [`Values`] map from `(column, value)` pairs.
pub fn values<I, K, V>(pairs: I) -> Values
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<Value>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

/// A dynamically typed field value.
#[derive(Debug, Clone, Default)]
pub enum Value {
    /// No value. Normalizes to `u|`.
    #[default]
    Undefined,
    /// JSON null. Normalizes to `o|null`, distinct from `Undefined`.
    Null,
    Bool(bool),
    Number(f64),
    BigInt(i128),
    String(String),
    Date(DateTime<Utc>),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
}

impl Value {
    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::Date(d) => Some(*d),
            _ => None,
        }
    }

    /// Look up a member of an object value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Object(map) => map.get(key),
            _ => None,
        }
    }

    /// Short name of the runtime type, used in diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::BigInt(_) => "bigint",
            Value::String(_) => "string",
            Value::Date(_) => "date",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }

    /// JSON rendering for display; `Undefined` renders as `null`.
    pub fn to_json(&self) -> serde_json::Value {
        to_json(self).unwrap_or(serde_json::Value::Null)
    }
}

// Deep equality where NaN equals NaN, so decoded records compare equal to
// the values they were built from.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Value::BigInt(a), Value::BigInt(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Date(a), Value::Date(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a == b,
            _ => false,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n as f64)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Number(n as f64)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(d: DateTime<Utc>) -> Self {
        Value::Date(d)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Value::Object(map)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        from_json(json, false)
    }
}

/// Options applied when decoding a stored value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeOptions {
    /// Turn ISO-8601 date-time strings nested in `o|` payloads back into dates.
    pub parse_date: bool,
}

/// Encode a value as a tagged string.
pub fn normalize(value: &Value) -> String {
    match value {
        Value::Date(d) => format!("d|{}", d.timestamp_millis()),
        Value::Null | Value::Array(_) | Value::Object(_) => {
            // to_json only yields None for Undefined
            let json = to_json(value).unwrap_or(serde_json::Value::Null);
            format!("o|{}", json)
        }
        Value::Bool(b) => format!("b|{}", b),
        Value::Number(n) => format!("n|{}", format_number(*n)),
        Value::String(s) => format!("s|{}", s),
        Value::BigInt(i) => format!("i|{}", i),
        Value::Undefined => "u|".to_string(),
    }
}

/// Decode a tagged string produced by [`normalize`].
pub fn denormalize(text: &str, options: DecodeOptions) -> Value {
    let (Some(tag), Some(payload)) = (text.get(..2), text.get(2..)) else {
        return Value::Undefined;
    };

    match tag {
        "d|" => payload
            .parse::<i64>()
            .ok()
            .and_then(DateTime::from_timestamp_millis)
            .map(Value::Date)
            .unwrap_or(Value::Undefined),
        "o|" => match serde_json::from_str::<serde_json::Value>(payload) {
            Ok(json) => from_json(json, options.parse_date),
            Err(_) => Value::Undefined,
        },
        "b|" => Value::Bool(payload == "true"),
        "n|" => Value::Number(parse_number(payload)),
        "s|" => Value::String(payload.to_string()),
        "i|" => payload
            .trim()
            .parse::<i128>()
            .map(Value::BigInt)
            .unwrap_or(Value::Undefined),
        _ => Value::Undefined,
    }
}

/// Render a number the way a JavaScript engine prints it.
fn format_number(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if n == 0.0 {
        return "0".to_string();
    }

    let abs = n.abs();
    if (1e-6..1e21).contains(&abs) {
        if n.fract() == 0.0 {
            format!("{:.0}", n)
        } else {
            format!("{}", n)
        }
    } else {
        // 1.5e300 -> 1.5e+300
        let exp = format!("{:e}", n);
        match exp.split_once('e') {
            Some((mantissa, power)) if !power.starts_with('-') => {
                format!("{}e+{}", mantissa, power)
            }
            _ => exp,
        }
    }
}

/// Parse number text with JavaScript `Number()` semantics.
fn parse_number(text: &str) -> f64 {
    let text = text.trim();
    match text {
        "" => 0.0,
        "NaN" => f64::NAN,
        "Infinity" | "+Infinity" => f64::INFINITY,
        "-Infinity" => f64::NEG_INFINITY,
        _ => {
            // Rust also accepts "inf"/"nan" spellings which Number() rejects
            let lower = text.to_ascii_lowercase();
            if lower.contains("inf") || lower.contains("nan") {
                return f64::NAN;
            }
            text.parse::<f64>().unwrap_or(f64::NAN)
        }
    }
}

fn json_number(n: f64) -> serde_json::Value {
    if !n.is_finite() {
        return serde_json::Value::Null;
    }
    if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        return serde_json::Value::from(n as i64);
    }
    serde_json::Number::from_f64(n)
        .map(serde_json::Value::Number)
        .unwrap_or(serde_json::Value::Null)
}

/// Convert to JSON. `Undefined` has no JSON form and yields `None`.
fn to_json(value: &Value) -> Option<serde_json::Value> {
    let json = match value {
        Value::Undefined => return None,
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Number(n) => json_number(*n),
        Value::BigInt(i) => serde_json::Value::String(i.to_string()),
        Value::String(s) => serde_json::Value::String(s.clone()),
        Value::Date(d) => {
            serde_json::Value::String(d.to_rfc3339_opts(SecondsFormat::Millis, true))
        }
        Value::Array(items) => serde_json::Value::Array(
            items
                .iter()
                .map(|item| to_json(item).unwrap_or(serde_json::Value::Null))
                .collect(),
        ),
        Value::Object(map) => serde_json::Value::Object(
            map.iter()
                .filter_map(|(k, v)| to_json(v).map(|json| (k.clone(), json)))
                .collect(),
        ),
    };
    Some(json)
}

fn from_json(json: serde_json::Value, parse_date: bool) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(b),
        serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
        serde_json::Value::String(s) => {
            if parse_date && iso_regex().is_match(&s) {
                if let Some(date) = parse_iso_datetime(&s) {
                    return Value::Date(date);
                }
            }
            Value::String(s)
        }
        serde_json::Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| from_json(item, parse_date))
                .collect(),
        ),
        serde_json::Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, from_json(v, parse_date)))
                .collect(),
        ),
    }
}

fn iso_regex() -> &'static Regex {
    static ISO: OnceLock<Regex> = OnceLock::new();
    ISO.get_or_init(|| {
        Regex::new(
            r"^(\d{4})-(\d{2})-(\d{2})T(\d{2}):(\d{2}):(\d{2}(?:\.\d*))(?:Z|(\+|-)([\d|:]*))?$",
        )
        .expect("ISO-8601 pattern is valid")
    })
}

/// Strings without an offset are read as UTC.
fn parse_iso_datetime(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(d) = DateTime::parse_from_rfc3339(text) {
        return Some(d.with_timezone(&Utc));
    }
    if let Ok(d) = DateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f%z") {
        return Some(d.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn round_trip(value: &Value) -> Value {
        denormalize(&normalize(value), DecodeOptions::default())
    }

    fn sample_date() -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_700_000_123_456).unwrap()
    }

    #[test]
    fn test_tags() {
        assert_eq!(normalize(&Value::from("abc")), "s|abc");
        assert_eq!(normalize(&Value::from(1)), "n|1");
        assert_eq!(normalize(&Value::from(true)), "b|true");
        assert_eq!(normalize(&Value::BigInt(42)), "i|42");
        assert_eq!(normalize(&Value::Date(sample_date())), "d|1700000123456");
        assert_eq!(normalize(&Value::Undefined), "u|");
        assert_eq!(normalize(&Value::Null), "o|null");
        assert_eq!(normalize(&Value::Array(vec![1.into(), 2.into()])), "o|[1,2]");
    }

    #[test]
    fn test_null_and_undefined_stay_distinct() {
        assert_eq!(round_trip(&Value::Null), Value::Null);
        assert_eq!(round_trip(&Value::Undefined), Value::Undefined);
        assert_ne!(normalize(&Value::Null), normalize(&Value::Undefined));
    }

    #[test]
    fn test_round_trip_strings() {
        for s in ["", "-a", "|~!@#$%^&*()_+[]", "s|nested", "ünïcödé"] {
            assert_eq!(round_trip(&Value::from(s)), Value::from(s));
        }
    }

    #[test]
    fn test_round_trip_numbers() {
        let numbers = [
            1.0,
            0.0,
            -1.0,
            0.3333333333333333,
            f64::MAX,
            f64::MIN_POSITIVE,
            1e-7,
            1e21,
            123456789.125,
            f64::NAN,
            f64::INFINITY,
            f64::NEG_INFINITY,
        ];
        for n in numbers {
            assert_eq!(round_trip(&Value::Number(n)), Value::Number(n), "{}", n);
        }
    }

    #[test]
    fn test_number_text_matches_js() {
        assert_eq!(normalize(&Value::Number(f64::NAN)), "n|NaN");
        assert_eq!(normalize(&Value::Number(f64::NEG_INFINITY)), "n|-Infinity");
        assert_eq!(normalize(&Value::Number(1.5)), "n|1.5");
        assert_eq!(normalize(&Value::Number(1e21)), "n|1e+21");
        assert_eq!(normalize(&Value::Number(-0.0)), "n|0");
        assert_eq!(
            normalize(&Value::Number(f64::MAX)),
            "n|1.7976931348623157e+308"
        );
    }

    #[test]
    fn test_number_parse_follows_number_semantics() {
        assert_eq!(parse_number(""), 0.0);
        assert!(parse_number("inf").is_nan());
        assert!(parse_number("abc").is_nan());
        assert_eq!(parse_number(" 12 "), 12.0);
    }

    #[test]
    fn test_round_trip_scalars() {
        for value in [
            Value::from(true),
            Value::from(false),
            Value::BigInt(i128::MAX),
            Value::BigInt(-17),
            Value::Date(sample_date()),
        ] {
            assert_eq!(round_trip(&value), value);
        }
    }

    #[test]
    fn test_round_trip_objects() {
        let values: Vec<Value> = vec![
            serde_json::json!({"a": 1}).into(),
            serde_json::json!({"a": {"b": {"c": 1}}}).into(),
            serde_json::json!({}).into(),
            serde_json::json!([1, "two", null, [3.5]]).into(),
        ];
        for value in values {
            assert_eq!(round_trip(&value), value);
        }
    }

    #[test]
    fn test_undefined_members_are_dropped() {
        let mut map = BTreeMap::new();
        map.insert("gone".to_string(), Value::Undefined);
        map.insert("kept".to_string(), Value::from(1));
        assert_eq!(normalize(&Value::Object(map)), r#"o|{"kept":1}"#);

        let array = Value::Array(vec![Value::Undefined, Value::Number(f64::NAN)]);
        assert_eq!(normalize(&array), "o|[null,null]");
    }

    #[test]
    fn test_nested_date_rehydration() {
        let date = sample_date();
        let mut c = BTreeMap::new();
        c.insert("c".to_string(), Value::Date(date));
        let mut b = BTreeMap::new();
        b.insert("b".to_string(), Value::Object(c));
        let mut a = BTreeMap::new();
        a.insert("a".to_string(), Value::Object(b));
        let value = Value::Object(a);

        let text = normalize(&value);
        let restored = denormalize(&text, DecodeOptions { parse_date: true });
        assert_eq!(restored, value);

        let raw = denormalize(&text, DecodeOptions { parse_date: false });
        let nested = raw.get("a").and_then(|v| v.get("b")).and_then(|v| v.get("c"));
        assert_eq!(nested, Some(&Value::from("2023-11-14T22:15:23.456Z")));
    }

    #[test]
    fn test_date_pattern_requires_fraction() {
        let text = r#"o|{"at":"2023-11-14T22:15:23Z","local":"2023-11-14T22:15:23.5"}"#;
        let value = denormalize(text, DecodeOptions { parse_date: true });
        assert_eq!(value.get("at"), Some(&Value::from("2023-11-14T22:15:23Z")));
        assert!(value.get("local").and_then(Value::as_date).is_some());
    }

    #[test]
    fn test_garbage_decodes_to_undefined() {
        let opts = DecodeOptions::default();
        assert_eq!(denormalize("o|{not json", opts), Value::Undefined);
        assert_eq!(denormalize("x|what", opts), Value::Undefined);
        assert_eq!(denormalize("", opts), Value::Undefined);
        assert_eq!(denormalize("i|1.5", opts), Value::Undefined);
        assert_eq!(denormalize("d|NaN", opts), Value::Undefined);
    }

    #[test]
    fn test_boolean_is_literal_true_only() {
        let opts = DecodeOptions::default();
        assert_eq!(denormalize("b|true", opts), Value::Bool(true));
        assert_eq!(denormalize("b|TRUE", opts), Value::Bool(false));
    }

    #[test]
    fn test_display_json() {
        assert_eq!(Value::Undefined.to_json(), serde_json::Value::Null);
        let object = Value::Object(values([("n", Value::from(2)), ("u", Value::Undefined)]));
        assert_eq!(object.to_json(), serde_json::json!({"n": 2}));
        assert_eq!(
            Value::Date(sample_date()).to_json(),
            serde_json::json!("2023-11-14T22:15:23.456Z")
        );
    }
}
