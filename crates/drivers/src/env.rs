use std::time::Duration;

/// Read a non-empty integer environment variable as milliseconds.
pub(crate) fn env_millis(name: &str) -> Option<Duration> {
    let raw = std::env::var(name).ok()?;
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    raw.parse::<u64>().ok().map(Duration::from_millis)
}
