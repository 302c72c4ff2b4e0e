//! Dotted event-name patterns

/// Check whether `pattern` matches the dotted event `name`.
///
/// Supports:
/// - `*`: every event
/// - `timer.*`: `timer` itself and every event under it (`timer.started`)
/// - `*.updated`: every event whose last segments are `updated`
///   (`client.updated`, `time_entry.updated`)
/// - anything else: exact match
pub fn event_matches(pattern: &str, name: &str) -> bool {
    if pattern == "*" {
        return true;
    }

    if let Some(prefix) = pattern.strip_suffix(".*") {
        return name == prefix
            || name
                .strip_prefix(prefix)
                .is_some_and(|rest| rest.len() > 1 && rest.starts_with('.'));
    }

    if let Some(suffix) = pattern.strip_prefix("*.") {
        return name
            .strip_suffix(suffix)
            .is_some_and(|head| head.len() > 1 && head.ends_with('.'));
    }

    pattern == name
}
