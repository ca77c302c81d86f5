//! Subprocess environment construction: a strict opt-in allowlist prevents
//! accidental secret propagation to third-party agent CLIs (§6).

/// Build the environment for a spawned agent: only variables named in
/// `allowlist` are copied from the current process environment.
pub fn filtered_env(allowlist: &[String]) -> Vec<(String, String)> {
    allowlist
        .iter()
        .filter_map(|name| std::env::var(name).ok().map(|v| (name.clone(), v)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_allowlisted_vars_pass_through() {
        std::env::set_var("IE_TEST_ALLOWED_VAR", "value");
        std::env::set_var("IE_TEST_BLOCKED_VAR", "secret");
        let allowlist = vec!["IE_TEST_ALLOWED_VAR".to_string()];
        let env = filtered_env(&allowlist);
        assert!(env.iter().any(|(k, v)| k == "IE_TEST_ALLOWED_VAR" && v == "value"));
        assert!(!env.iter().any(|(k, _)| k == "IE_TEST_BLOCKED_VAR"));
        std::env::remove_var("IE_TEST_ALLOWED_VAR");
        std::env::remove_var("IE_TEST_BLOCKED_VAR");
    }

    #[test]
    fn missing_allowlisted_var_is_skipped_not_empty() {
        let allowlist = vec!["IE_TEST_DEFINITELY_UNSET_VAR".to_string()];
        let env = filtered_env(&allowlist);
        assert!(env.is_empty());
    }
}
