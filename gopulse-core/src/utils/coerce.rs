use serde_json::Value;

/// Reads a numeric field leniently. Integers pass through, finite floats are
/// truncated, anything else (strings, null, objects, a missing key) is `None`.
pub fn count_field(body: &Value, key: &str) -> Option<i64> {
    let value = body.get(key)?;
    value
        .as_i64()
        .or_else(|| value.as_u64().map(|n| i64::try_from(n).unwrap_or(i64::MAX)))
        .or_else(|| {
            value
                .as_f64()
                .filter(|f| f.is_finite())
                .map(|f| f.trunc() as i64)
        })
}

/// Collapses a possibly-absent, possibly-negative count to a valid one.
pub fn clamp_count(raw: Option<i64>) -> u64 {
    raw.and_then(|n| u64::try_from(n).ok()).unwrap_or(0)
}
