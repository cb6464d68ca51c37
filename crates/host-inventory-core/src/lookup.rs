//! Safe nested lookup over JSON payloads.
//!
//! Provider payloads are loosely shaped: keys go missing, lists arrive as
//! objects, numbers arrive as strings. [`dig`] walks a path of [`Seg`]s and
//! returns `None` as soon as a segment is absent or the node has the wrong
//! shape. It never panics, and a JSON `null` at the end of the path is
//! reported as absent.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;

/// One step of a lookup path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Seg<'a> {
    /// Object member.
    Key(&'a str),
    /// Array element.
    Index(usize),
}

/// Walk `path` from `value`.
pub fn dig<'v>(value: &'v Value, path: &[Seg<'_>]) -> Option<&'v Value> {
    path.iter()
        .try_fold(value, |node, seg| match (seg, node) {
            (Seg::Key(key), Value::Object(map)) => map.get(*key),
            (Seg::Index(i), Value::Array(items)) => items.get(*i),
            _ => None,
        })
        .filter(|v| !v.is_null())
}

/// Text at `path`. Numbers and booleans are rendered as text.
pub fn dig_text(value: &Value, path: &[Seg<'_>]) -> Option<String> {
    dig(value, path).and_then(as_text)
}

/// Array at `path`, or an empty slice when absent or not an array.
pub fn dig_array<'v>(value: &'v Value, path: &[Seg<'_>]) -> &'v [Value] {
    match dig(value, path) {
        Some(Value::Array(items)) => items.as_slice(),
        _ => &[],
    }
}

/// Timestamp at `path`. See [`parse_timestamp`].
pub fn dig_timestamp(value: &Value, path: &[Seg<'_>]) -> Option<DateTime<Utc>> {
    dig(value, path).and_then(parse_timestamp)
}

pub fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Parse a provider timestamp.
///
/// Accepts RFC 3339, ISO-8601 with a `+hhmm` offset, naive ISO-8601 (taken
/// as UTC), and epoch values given as integers, floats or digit strings.
/// Epoch values above 10^11 are read as milliseconds, the rest as seconds.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => parse_timestamp_text(s.trim()),
        Value::Number(n) => match n.as_i64() {
            Some(raw) => from_epoch(raw),
            None => from_epoch_f64(n.as_f64()?),
        },
        _ => None,
    }
}

fn parse_timestamp_text(s: &str) -> Option<DateTime<Utc>> {
    let unsigned = s.strip_prefix('-').unwrap_or(s);
    if !unsigned.is_empty() && unsigned.bytes().all(|b| b.is_ascii_digit() || b == b'.') {
        return match s.parse::<i64>() {
            Ok(raw) => from_epoch(raw),
            Err(_) => from_epoch_f64(s.parse().ok()?),
        };
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Some(dt) = ["%Y-%m-%dT%H:%M:%S%.f%z", "%Y-%m-%d %H:%M:%S%.f%z"]
        .iter()
        .find_map(|fmt| DateTime::parse_from_str(s, fmt).ok())
    {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| naive.and_utc())
}

const MILLIS_THRESHOLD: i64 = 100_000_000_000;

fn from_epoch(raw: i64) -> Option<DateTime<Utc>> {
    if raw.abs() > MILLIS_THRESHOLD {
        Utc.timestamp_millis_opt(raw).single()
    } else {
        Utc.timestamp_opt(raw, 0).single()
    }
}

fn from_epoch_f64(raw: f64) -> Option<DateTime<Utc>> {
    if !raw.is_finite() {
        return None;
    }
    let seconds = if raw.abs() > MILLIS_THRESHOLD as f64 {
        raw / 1000.0
    } else {
        raw
    };
    let whole = seconds.floor();
    let mut secs = whole as i64;
    let mut nanos = ((seconds - whole) * 1e9).round() as u32;
    if nanos >= 1_000_000_000 {
        secs = secs.checked_add(1)?;
        nanos -= 1_000_000_000;
    }
    Utc.timestamp_opt(secs, nanos).single()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn dig_follows_keys_and_indices() {
        let v = json!({"a": {"list": [{"b": 1}, {"b": 2}]}});
        let path = [Seg::Key("a"), Seg::Key("list"), Seg::Index(1), Seg::Key("b")];
        assert_eq!(dig(&v, &path), Some(&json!(2)));
    }

    #[test]
    fn dig_tolerates_missing_and_mistyped_nodes() {
        let v = json!({"a": "scalar", "b": [1, 2], "c": null});
        assert_eq!(dig(&v, &[Seg::Key("missing"), Seg::Key("x")]), None);
        assert_eq!(dig(&v, &[Seg::Key("a"), Seg::Key("x")]), None);
        assert_eq!(dig(&v, &[Seg::Key("b"), Seg::Key("x")]), None);
        assert_eq!(dig(&v, &[Seg::Key("b"), Seg::Index(9)]), None);
        assert_eq!(dig(&v, &[Seg::Key("c")]), None);
        assert_eq!(dig(&json!(42), &[Seg::Index(0)]), None);
        assert!(dig_array(&v, &[Seg::Key("a")]).is_empty());
    }

    #[test]
    fn dig_with_empty_path_returns_root() {
        let v = json!({"a": 1});
        assert_eq!(dig(&v, &[]), Some(&v));
    }

    #[test]
    fn timestamps_in_several_shapes() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(parse_timestamp(&json!("2024-01-01T00:00:00Z")), Some(expected));
        assert_eq!(parse_timestamp(&json!("2024-01-01T02:00:00+02:00")), Some(expected));
        assert_eq!(parse_timestamp(&json!("2024-01-01T00:00:00")), Some(expected));
        assert_eq!(parse_timestamp(&json!(1_704_067_200)), Some(expected));
        assert_eq!(parse_timestamp(&json!(1_704_067_200_000_i64)), Some(expected));
        assert_eq!(parse_timestamp(&json!("yesterday")), None);
        assert_eq!(parse_timestamp(&json!({"t": 1})), None);
    }

    #[test]
    fn fractional_epochs_keep_sub_second_precision() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
            + chrono::Duration::milliseconds(500);
        assert_eq!(parse_timestamp(&json!(1_704_067_200.5)), Some(expected));
        assert_eq!(parse_timestamp(&json!(1_704_067_200_500.0)), Some(expected));
        assert_eq!(parse_timestamp(&json!("1704067200.5")), Some(expected));
        assert_eq!(parse_timestamp(&json!(f64::MAX)), None);
    }

    #[test]
    fn digit_strings_are_epochs() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(parse_timestamp(&json!("1704067200")), Some(expected));
        assert_eq!(parse_timestamp(&json!(" 1704067200000 ")), Some(expected));
        assert_eq!(parse_timestamp(&json!("")), None);
        assert_eq!(parse_timestamp(&json!(".")), None);
    }

    #[test]
    fn compact_utc_offsets() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(parse_timestamp(&json!("2024-01-01T00:00:00.000+0000")), Some(expected));
        assert_eq!(parse_timestamp(&json!("2024-01-01T01:00:00+0100")), Some(expected));
        assert_eq!(parse_timestamp(&json!("2024-01-01 00:00:00+0000")), Some(expected));
    }
}
