//! Semantic validation for parsed service configuration values.

use anyhow::{bail, Result};

use crate::config::types::{FlowmeshConfig, StoreBackendKind};

const PULL_POLICIES: [&str; 3] = ["Always", "IfNotPresent", "Never"];

fn is_dns_label(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= 63
        && value
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !value.starts_with('-')
        && !value.ends_with('-')
}

fn require_positive(value: u64, name: &str, errors: &mut Vec<String>) {
    if value == 0 {
        errors.push(format!("{name} must be > 0"));
    }
}

/// Validate a loaded service configuration.
/// Returns `Ok(())` if valid, Err with all validation errors if not.
///
/// # Errors
///
/// Returns an error listing all validation failures found in the config.
pub fn validate_config(config: &FlowmeshConfig) -> Result<()> {
    let mut errors = Vec::new();

    if config.cluster.in_cluster && config.cluster.kubeconfig.is_some() {
        errors.push("cluster.in_cluster and cluster.kubeconfig are mutually exclusive".to_string());
    }

    if !is_dns_label(&config.kafka.namespace) {
        errors.push(format!(
            "kafka.namespace '{}' is not a valid namespace name",
            config.kafka.namespace
        ));
    }
    if config.kafka.cluster.trim().is_empty() {
        errors.push("kafka.cluster must not be empty".to_string());
    }
    if config.kafka.topic_partitions == 0 {
        errors.push("kafka.topic_partitions must be at least 1".to_string());
    }
    if config.kafka.topic_replicas == 0 {
        errors.push("kafka.topic_replicas must be at least 1".to_string());
    }

    if config.images.sandbox.trim().is_empty() {
        errors.push("images.sandbox must not be empty".to_string());
    }
    if config.images.kcat.trim().is_empty() {
        errors.push("images.kcat must not be empty".to_string());
    }
    if !PULL_POLICIES.contains(&config.images.pull_policy.as_str()) {
        errors.push(format!(
            "images.pull_policy '{}' must be one of {}",
            config.images.pull_policy,
            PULL_POLICIES.join(", ")
        ));
    }

    if config.runtime.command.iter().all(|part| part.trim().is_empty()) {
        errors.push("runtime.command must not be empty".to_string());
    }
    if config.runtime.port == 0 {
        errors.push("runtime.port must be > 0".to_string());
    }

    let t = &config.timeouts;
    require_positive(t.verify_seconds, "timeouts.verify_seconds", &mut errors);
    require_positive(t.preflight_seconds, "timeouts.preflight_seconds", &mut errors);
    require_positive(t.preflight_step_seconds, "timeouts.preflight_step_seconds", &mut errors);
    require_positive(t.unit_test_seconds, "timeouts.unit_test_seconds", &mut errors);
    require_positive(t.unit_test_step_seconds, "timeouts.unit_test_step_seconds", &mut errors);
    if t.preflight_step_seconds > t.preflight_seconds {
        errors.push("timeouts.preflight_step_seconds must not exceed timeouts.preflight_seconds".to_string());
    }

    let p = &config.poll;
    for (value, name) in [
        (p.service_ms, "poll.service_ms"),
        (p.sink_ms, "poll.sink_ms"),
        (p.source_ms, "poll.source_ms"),
        (p.job_ms, "poll.job_ms"),
        (p.job_uid_ms, "poll.job_uid_ms"),
        (p.upstream_logs_ms, "poll.upstream_logs_ms"),
        (p.downstream_logs_ms, "poll.downstream_logs_ms"),
    ] {
        require_positive(value, name, &mut errors);
    }
    if p.log_tail_lines <= 0 {
        errors.push("poll.log_tail_lines must be > 0".to_string());
    }

    if config.server.port == 0 {
        errors.push("server.port must be > 0".to_string());
    }

    if config.store.backend == StoreBackendKind::Postgres && config.store.connection.is_none() {
        errors.push("store.backend 'postgres' requires store.connection".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        bail!("Config validation failed:\n  - {}", errors.join("\n  - "));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parser::parse_config_str;

    #[test]
    fn test_default_config_passes() {
        assert!(validate_config(&FlowmeshConfig::default()).is_ok());
    }

    #[test]
    fn test_bad_namespace_fails() {
        let config = parse_config_str("kafka:\n  namespace: Kafka_NS\n").unwrap();
        let err = validate_config(&config).unwrap_err().to_string();
        assert!(err.contains("not a valid namespace name"));
    }

    #[test]
    fn test_postgres_without_connection_fails() {
        let config = parse_config_str("store:\n  backend: postgres\n").unwrap();
        let err = validate_config(&config).unwrap_err().to_string();
        assert!(err.contains("requires store.connection"));
    }

    #[test]
    fn test_all_errors_reported() {
        let yaml = r#"
images:
  sandbox: ""
  pull_policy: Sometimes
timeouts:
  verify_seconds: 0
poll:
  job_ms: 0
"#;
        let config = parse_config_str(yaml).unwrap();
        let err = validate_config(&config).unwrap_err().to_string();
        assert!(err.contains("images.sandbox must not be empty"));
        assert!(err.contains("pull_policy 'Sometimes'"));
        assert!(err.contains("timeouts.verify_seconds must be > 0"));
        assert!(err.contains("poll.job_ms must be > 0"));
    }

    #[test]
    fn test_in_cluster_with_kubeconfig_fails() {
        let yaml = "cluster:\n  in_cluster: true\n  kubeconfig: /tmp/kc\n";
        let config = parse_config_str(yaml).unwrap();
        let err = validate_config(&config).unwrap_err().to_string();
        assert!(err.contains("mutually exclusive"));
    }
}
