use chrono::{DateTime, Utc};

/// Redmine releases before 2.x render timestamps as `2015/02/20 20:30:30 +0900`.
const SLASH_FORMAT: &str = "%Y/%m/%d %H:%M:%S %z";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unrecognized timestamp: {0:?}")]
pub struct TimestampError(pub String);

/// Parse a tracker timestamp into a UTC instant.
///
/// Tries RFC 3339 first (`2015-02-20T11:30:30Z`), then the slash-delimited
/// format with a numeric offset. Either way the result is normalized to UTC so
/// values from different servers compare directly.
pub fn normalize(text: &str) -> Result<DateTime<Utc>, TimestampError> {
    let trimmed = text.trim();
    DateTime::parse_from_rfc3339(trimmed)
        .or_else(|_| DateTime::parse_from_str(trimmed, SLASH_FORMAT))
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|_| TimestampError(text.to_string()))
}
