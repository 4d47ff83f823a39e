//! Configuration loader: merges env vars, .env file, and config.toml.

use common::{ClientConfig, Error};
use std::path::Path;

fn parse_positive_u64(raw: &str, env_name: &str) -> Result<u64, Error> {
    let parsed = raw
        .trim()
        .parse::<u64>()
        .map_err(|_| Error::Config(format!("{env_name} must be an integer > 0")))?;
    if parsed == 0 {
        return Err(Error::Config(format!("{env_name} must be an integer > 0")));
    }
    Ok(parsed)
}

fn parse_positive_u32(raw: &str, env_name: &str) -> Result<u32, Error> {
    let parsed = parse_positive_u64(raw, env_name)?;
    u32::try_from(parsed).map_err(|_| Error::Config(format!("{env_name} is too large")))
}

fn validate_config(config: &ClientConfig) -> Result<(), Error> {
    let mut issues: Vec<String> = Vec::new();

    let root = config.api_root.trim();
    if root.is_empty() {
        issues.push("api_root must not be empty".into());
    } else if !(root.starts_with("http://") || root.starts_with("https://")) {
        issues.push(format!("api_root must be an http(s) URL, got {root:?}"));
    }
    if config.state_dir.trim().is_empty() {
        issues.push("state_dir must not be empty".into());
    }
    let namespace = config.storage_namespace.trim();
    if namespace.is_empty() {
        issues.push("storage_namespace must not be empty".into());
    } else if namespace.contains(['/', '\\']) || namespace.starts_with('.') {
        issues.push("storage_namespace must be a plain file stem".into());
    }

    if config.http.timeout_secs == 0 {
        issues.push("http.timeout_secs must be > 0".into());
    }
    if config.http.user_agent.trim().is_empty() {
        issues.push("http.user_agent must not be empty".into());
    }

    if config.rate_limit.reads_per_sec == 0 {
        issues.push("rate_limit.reads_per_sec must be > 0".into());
    }
    if config.rate_limit.writes_per_sec == 0 {
        issues.push("rate_limit.writes_per_sec must be > 0".into());
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "Invalid config:\n - {}",
            issues.join("\n - ")
        )))
    }
}

/// Apply `SCREENER_*` overrides read through `var`.
fn apply_env_overrides<F>(config: &mut ClientConfig, var: F) -> Result<(), Error>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(root) = var("SCREENER_API_ROOT") {
        config.api_root = root.trim().to_string();
    }
    if let Some(dir) = var("SCREENER_STATE_DIR") {
        config.state_dir = dir.trim().to_string();
    }
    if let Some(ns) = var("SCREENER_STORAGE_NAMESPACE") {
        config.storage_namespace = ns.trim().to_string();
    }
    if let Some(raw) = var("SCREENER_TIMEOUT_SECS") {
        config.http.timeout_secs = parse_positive_u64(&raw, "SCREENER_TIMEOUT_SECS")?;
    }
    if let Some(raw) = var("SCREENER_READS_PER_SEC") {
        config.rate_limit.reads_per_sec = parse_positive_u32(&raw, "SCREENER_READS_PER_SEC")?;
    }
    if let Some(raw) = var("SCREENER_WRITES_PER_SEC") {
        config.rate_limit.writes_per_sec = parse_positive_u32(&raw, "SCREENER_WRITES_PER_SEC")?;
    }
    Ok(())
}

/// Load client configuration from environment and optional config file.
pub fn load_config() -> Result<ClientConfig, Error> {
    // 1. Load .env file from project root or parent directories.
    if let Err(e) = dotenvy::dotenv() {
        tracing::debug!("No .env file loaded: {}", e);
    }

    // 2. Start with defaults.
    let mut config = ClientConfig::default();

    // 3. Try loading config.toml if it exists.
    let config_path = Path::new("config.toml");
    if config_path.exists() {
        let contents = std::fs::read_to_string(config_path)
            .map_err(|e| Error::Config(format!("Failed to read config.toml: {}", e)))?;
        config = toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("Failed to parse config.toml: {}", e)))?;
    }

    // 4. Override with environment variables (highest priority).
    apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;

    validate_config(&config)?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        assert!(validate_config(&ClientConfig::default()).is_ok());
    }

    #[test]
    fn test_env_overrides_win() {
        let mut config = ClientConfig::default();
        apply_env_overrides(
            &mut config,
            env(&[
                ("SCREENER_API_ROOT", " https://screener.example.com/api/v1 "),
                ("SCREENER_STORAGE_NAMESPACE", "staging-auth"),
                ("SCREENER_TIMEOUT_SECS", "30"),
                ("SCREENER_WRITES_PER_SEC", "2"),
            ]),
        )
        .expect("valid overrides");

        assert_eq!(config.api_root, "https://screener.example.com/api/v1");
        assert_eq!(config.storage_namespace, "staging-auth");
        assert_eq!(config.http.timeout_secs, 30);
        assert_eq!(config.rate_limit.writes_per_sec, 2);
        assert_eq!(config.rate_limit.reads_per_sec, 20);
    }

    #[test]
    fn test_bad_numeric_override_is_rejected() {
        let mut config = ClientConfig::default();
        let err = apply_env_overrides(&mut config, env(&[("SCREENER_TIMEOUT_SECS", "0")]))
            .expect_err("zero timeout");
        assert!(matches!(err, Error::Config(ref m) if m.contains("SCREENER_TIMEOUT_SECS")));

        let err = apply_env_overrides(&mut config, env(&[("SCREENER_READS_PER_SEC", "fast")]))
            .expect_err("not a number");
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_validation_collects_every_issue() {
        let mut config = ClientConfig::default();
        config.api_root = "localhost:8000".into();
        config.storage_namespace = "../escape".into();
        config.rate_limit.reads_per_sec = 0;

        let Err(Error::Config(message)) = validate_config(&config) else {
            panic!("expected a config error");
        };
        assert!(message.contains("api_root"));
        assert!(message.contains("storage_namespace"));
        assert!(message.contains("rate_limit.reads_per_sec"));
    }

    #[test]
    fn test_config_toml_sections_are_optional() {
        let config: ClientConfig = toml::from_str(
            r#"
            api_root = "https://screener.example.com/api/v1"

            [rate_limit]
            reads_per_sec = 5
            "#,
        )
        .expect("partial config parses");

        assert_eq!(config.rate_limit.reads_per_sec, 5);
        assert_eq!(config.rate_limit.writes_per_sec, 10);
        assert_eq!(config.http.timeout_secs, 15);
        assert_eq!(config.storage_namespace, "auth-storage");
    }
}
