//! Helper functions injected into every modifier template.
//!
//! | name | use |
//! |---|---|
//! | `toJSON` | `[[ toJSON .request.api.body ]]` |
//! | `toMap` | `[[ (toMap .response.body).data ]]` |
//! | `default` | `[[ .request.query.page \| default "1" ]]` |
//! | `now` | `[[ now ]]` |
//! | `unixEpoch` | `[[ unixEpoch ]]` |
//! | `randAlphaNum` | `[[ randAlphaNum 12 ]]` |
//! | `date` | `[[ now \| date "2006-01-02" ]]` (Go reference layout) |
//! | `upper` / `lower` | `[[ upper .request.method ]]` |
//! | `debug` | `[[ debug .context ]]` |

use crate::template::{arity, FuncMap, Value};
use chrono::{DateTime, Utc};
use rand::distr::Alphanumeric;
use rand::Rng;
use regex::Regex;
use std::sync::{Arc, LazyLock};

static LIBRARY: LazyLock<Arc<FuncMap>> = LazyLock::new(|| {
    Arc::new(
        FuncMap::new()
            .with("toJSON", to_json)
            .with("toMap", to_map)
            .with("default", default)
            .with("now", now)
            .with("unixEpoch", unix_epoch)
            .with("randAlphaNum", rand_alpha_num)
            .with("date", date)
            .with("upper", upper)
            .with("lower", lower)
            .with("debug", debug),
    )
});

/// Go layout tokens, longest first so that e.g. `2006` wins over `2`.
static LAYOUT_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"2006|January|Jan|Monday|Mon|MST|Z07:00|Z0700|-07:00|-0700|\.000000000|\.000000|\.000|01|02|_2|15|03|04|05|06|PM|pm|1|2|3|4|5",
    )
    .unwrap()
});

/// Longest string `randAlphaNum` will produce.
pub const MAX_RANDOM_LENGTH: usize = 4096;

/// The shared function library.
pub fn library() -> Arc<FuncMap> {
    Arc::clone(&LIBRARY)
}

/// Random alphanumeric string of `len` characters.
pub fn random_alphanumeric(len: usize) -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

fn to_json(args: &[Value]) -> Result<Value, String> {
    arity(args, 1)?;
    serde_json::to_string(&args[0].to_json())
        .map(Value::String)
        .map_err(|e| e.to_string())
}

fn to_map(args: &[Value]) -> Result<Value, String> {
    arity(args, 1)?;
    match &args[0] {
        Value::Map(_) => Ok(args[0].clone()),
        Value::Missing | Value::Null => Ok(Value::Null),
        Value::String(s) => match serde_json::from_str::<serde_json::Value>(s) {
            Ok(json @ serde_json::Value::Object(_)) => Ok(Value::from_json(json)),
            Ok(_) => Err("JSON text is not an object".to_string()),
            Err(e) => Err(e.to_string()),
        },
        other => Err(format!("cannot convert {} to map", other.type_name())),
    }
}

/// `default fallback value`: `fallback` when `value` is missing, null or "".
fn default(args: &[Value]) -> Result<Value, String> {
    arity(args, 2)?;
    let value = &args[1];
    let empty = value.is_nil() || matches!(value, Value::String(s) if s.is_empty());
    Ok(if empty { args[0].clone() } else { value.clone() })
}

fn now(args: &[Value]) -> Result<Value, String> {
    arity(args, 0)?;
    Ok(Value::Time(Utc::now()))
}

fn unix_epoch(args: &[Value]) -> Result<Value, String> {
    arity(args, 0)?;
    Ok(Value::Int(Utc::now().timestamp()))
}

fn rand_alpha_num(args: &[Value]) -> Result<Value, String> {
    arity(args, 1)?;
    let len = match &args[0] {
        Value::Int(n) => usize::try_from(*n).map_err(|_| format!("negative length {}", n))?,
        other => return Err(format!("length must be an int, got {}", other.type_name())),
    };
    if len > MAX_RANDOM_LENGTH {
        return Err(format!(
            "length {} exceeds the maximum of {}",
            len, MAX_RANDOM_LENGTH
        ));
    }
    Ok(Value::String(random_alphanumeric(len)))
}

/// `date layout t` where `t` is a time, epoch seconds or an RFC 3339 string.
fn date(args: &[Value]) -> Result<Value, String> {
    arity(args, 2)?;
    let Value::String(layout) = &args[0] else {
        return Err("layout must be a string".to_string());
    };
    let time = match &args[1] {
        Value::Time(t) => *t,
        Value::Int(secs) => {
            DateTime::from_timestamp(*secs, 0).ok_or_else(|| format!("timestamp {} out of range", secs))?
        }
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| e.to_string())?,
        other => return Err(format!("cannot format {} as a date", other.type_name())),
    };
    Ok(Value::String(format_go_layout(&time, layout)))
}

/// Format a time with a Go reference layout (`Mon Jan 2 15:04:05 MST 2006`).
pub fn format_go_layout(time: &DateTime<Utc>, layout: &str) -> String {
    let layout = match layout {
        "RFC3339" => "2006-01-02T15:04:05Z07:00",
        "DateTime" => "2006-01-02 15:04:05",
        "DateOnly" => "2006-01-02",
        "TimeOnly" => "15:04:05",
        other => other,
    };

    let mut strftime = String::new();
    let mut last = 0;
    for token in LAYOUT_TOKEN.find_iter(layout) {
        strftime.push_str(&layout[last..token.start()].replace('%', "%%"));
        strftime.push_str(match token.as_str() {
            "2006" => "%Y",
            "January" => "%B",
            "Jan" => "%b",
            "Monday" => "%A",
            "Mon" => "%a",
            "MST" => "%Z",
            // times are always UTC here
            "Z07:00" | "Z0700" => "Z",
            "-07:00" => "%:z",
            "-0700" => "%z",
            ".000000000" => "%.9f",
            ".000000" => "%.6f",
            ".000" => "%.3f",
            "01" => "%m",
            "02" => "%d",
            "_2" => "%e",
            "15" => "%H",
            "03" => "%I",
            "04" => "%M",
            "05" => "%S",
            "06" => "%y",
            "PM" => "%p",
            "pm" => "%P",
            "1" => "%-m",
            "2" => "%-d",
            "3" => "%-I",
            "4" => "%-M",
            _ => "%-S",
        });
        last = token.end();
    }
    strftime.push_str(&layout[last..].replace('%', "%%"));
    time.format(&strftime).to_string()
}

fn upper(args: &[Value]) -> Result<Value, String> {
    arity(args, 1)?;
    Ok(map_text(&args[0], str::to_uppercase))
}

fn lower(args: &[Value]) -> Result<Value, String> {
    arity(args, 1)?;
    Ok(map_text(&args[0], str::to_lowercase))
}

/// Apply `f` to the rendered text of `value`. Missing and null values pass
/// through so the placeholder is still recognised and stripped.
fn map_text(value: &Value, f: fn(&str) -> String) -> Value {
    if value.is_nil() {
        return value.clone();
    }
    Value::String(f(&value.to_string()))
}

/// Indented JSON dump of a value.
fn debug(args: &[Value]) -> Result<Value, String> {
    arity(args, 1)?;
    serde_json::to_string_pretty(&args[0].to_json())
        .map(Value::String)
        .map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn call(name: &str, args: &[Value]) -> Result<Value, String> {
        library().get(name).expect("registered")(args)
    }

    #[test]
    fn test_to_json() {
        let value = Value::from_json(json!({"b": 1, "a": [true, null]}));
        assert_eq!(
            call("toJSON", &[value]).unwrap(),
            Value::String(r#"{"a":[true,null],"b":1}"#.to_string())
        );
    }

    #[test]
    fn test_to_map() {
        let parsed = call("toMap", &[Value::from(r#"{"x": 1}"#)]).unwrap();
        assert_eq!(parsed.get("x"), Some(&Value::Int(1)));
        assert_eq!(call("toMap", &[Value::Missing]).unwrap(), Value::Null);
        assert!(call("toMap", &[Value::Int(1)]).is_err());
    }

    #[test]
    fn test_default() {
        let fallback = Value::from("n/a");
        assert_eq!(call("default", &[fallback.clone(), Value::Missing]).unwrap(), fallback);
        assert_eq!(call("default", &[fallback.clone(), Value::from("")]).unwrap(), fallback);
        assert_eq!(
            call("default", &[fallback, Value::Int(0)]).unwrap(),
            Value::Int(0)
        );
    }

    #[test]
    fn test_rand_alpha_num() {
        let Value::String(s) = call("randAlphaNum", &[Value::Int(24)]).unwrap() else {
            panic!("expected string");
        };
        assert_eq!(s.len(), 24);
        assert!(s.chars().all(|c| c.is_ascii_alphanumeric()));
        assert!(call("randAlphaNum", &[Value::Int(-1)]).is_err());
    }

    #[test]
    fn test_date_layouts() {
        let t = Utc.with_ymd_and_hms(2024, 3, 7, 15, 4, 5).unwrap();
        assert_eq!(format_go_layout(&t, "2006-01-02"), "2024-03-07");
        assert_eq!(
            format_go_layout(&t, "2006-01-02T15:04:05Z07:00"),
            "2024-03-07T15:04:05Z"
        );
        assert_eq!(format_go_layout(&t, "Jan 2, 3:04PM"), "Mar 7, 3:04PM");
        assert_eq!(format_go_layout(&t, "100%"), "100%");
    }

    #[test]
    fn test_date_accepts_epoch_and_strings() {
        let layout = Value::from("2006-01-02");
        assert_eq!(
            call("date", &[layout.clone(), Value::Int(0)]).unwrap(),
            Value::from("1970-01-01")
        );
        assert_eq!(
            call("date", &[layout, Value::from("2023-12-31T23:00:00Z")]).unwrap(),
            Value::from("2023-12-31")
        );
    }

    #[test]
    fn test_upper_lower() {
        assert_eq!(call("upper", &[Value::from("get")]).unwrap(), Value::from("GET"));
        assert_eq!(call("lower", &[Value::from("X-Id")]).unwrap(), Value::from("x-id"));
    }

    #[test]
    fn test_upper_lower_keep_missing() {
        assert_eq!(call("upper", &[Value::Missing]).unwrap(), Value::Missing);
        assert_eq!(call("lower", &[Value::Null]).unwrap(), Value::Null);
    }

    #[test]
    fn test_rand_alpha_num_rejects_huge_length() {
        let limit = MAX_RANDOM_LENGTH as i64;
        assert!(call("randAlphaNum", &[Value::Int(limit)]).is_ok());
        let err = call("randAlphaNum", &[Value::Int(1_000_000_000_000_000)]).unwrap_err();
        assert!(err.contains("exceeds the maximum"));
    }

    #[test]
    fn test_debug_renders_json() {
        let value = Value::from_json(json!({"a": 1, "b": [true, null]}));
        let Value::String(out) = call("debug", &[value]).unwrap() else {
            panic!("expected a string");
        };
        assert!(!out.contains("Int("));
        let parsed: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed, json!({"a": 1, "b": [true, null]}));
    }
}
