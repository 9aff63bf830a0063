//! Utility functions for Alfa

/// Current wall-clock time as Unix milliseconds
pub fn current_timestamp() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Strip credentials from a connection URL so it can be logged
///
/// Unparseable input is returned unchanged.
///
/// # Examples
///
/// ```
/// use alfa_common::redact_url;
///
/// assert_eq!(redact_url("redis://:secret@10.0.0.1:6379/1"), "redis://***@10.0.0.1:6379/1");
/// assert_eq!(redact_url("redis://10.0.0.1:6379/1"), "redis://10.0.0.1:6379/1");
/// ```
pub fn redact_url(raw: &str) -> String {
    let Ok(mut parsed) = url::Url::parse(raw) else {
        return raw.to_string();
    };
    if parsed.password().is_none() && parsed.username().is_empty() {
        return raw.to_string();
    }
    let _ = parsed.set_password(None);
    let _ = parsed.set_username("***");
    parsed.to_string()
}
