use chrono::{DateTime, Utc};

pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

pub fn now_seconds() -> i64 {
    Utc::now().timestamp()
}

pub fn millis_to_datetime(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}

/// Accepts RFC 3339 strings, `YYYY-MM-DD HH:MM:SS` (SQLite's CURRENT_TIMESTAMP)
/// and unix timestamps in seconds or milliseconds.
pub fn parse_timestamp(value: &serde_json::Value) -> Option<DateTime<Utc>> {
    match value {
        serde_json::Value::String(s) => {
            let s = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&Utc));
            }
            if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
                return Some(naive.and_utc());
            }
            s.parse::<i64>().ok().and_then(from_unix)
        }
        serde_json::Value::Number(n) => n.as_i64().and_then(from_unix),
        _ => None,
    }
}

fn from_unix(value: i64) -> Option<DateTime<Utc>> {
    // anything past year 2286 in seconds is treated as milliseconds
    if value > 9_999_999_999 {
        DateTime::from_timestamp_millis(value)
    } else {
        DateTime::from_timestamp(value, 0)
    }
}
