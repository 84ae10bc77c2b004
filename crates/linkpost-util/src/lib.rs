/// Check if env variable is set and not equal `0` or `false` which are common
/// ways to disable something.
pub fn is_env_var_set(var: &str) -> bool {
    std::env::var_os(var).is_some_and(|v| v != "0" && v != "false")
}

/// Read an env variable, treating unset, non-unicode and blank values alike.
///
/// CI secret stores like to export empty strings for secrets that were never
/// filled in, and those must not count as configured.
pub fn env_var_nonempty(var: &str) -> Option<String> {
    nonempty(std::env::var(var).ok())
}

/// Collapse blank strings into `None` and trim the rest.
pub fn nonempty(value: Option<String>) -> Option<String> {
    value.and_then(|v| {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else if trimmed.len() == v.len() {
            Some(v)
        } else {
            Some(trimmed.to_owned())
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nonempty_drops_blank_values() {
        assert_eq!(nonempty(None), None);
        assert_eq!(nonempty(Some(String::new())), None);
        assert_eq!(nonempty(Some("  \t".into())), None);
    }

    #[test]
    fn nonempty_trims_values() {
        assert_eq!(nonempty(Some("token".into())), Some("token".into()));
        assert_eq!(nonempty(Some(" token\n".into())), Some("token".into()));
    }
}
