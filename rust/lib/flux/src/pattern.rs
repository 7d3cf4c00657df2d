//! MQTT-style path patterns for subscriptions.
//!
//! - Exact: `devices/list`
//! - Single-level: `devices/+` matches `devices/list` but not `devices/list/error`
//! - Multi-level: `devices/#` matches `devices` and everything under it
//! - All: `#`

/// Check whether `path` matches a subscription `pattern`.
pub fn matches(pattern: &str, path: &str) -> bool {
    let mut pat = pattern.split('/');
    let mut segs = path.split('/');

    loop {
        match (pat.next(), segs.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => continue,
            (Some(p), Some(s)) if p == s => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}
