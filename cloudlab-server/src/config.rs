use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use cloudlab_orchestrations::OrchestratorConfig;

#[derive(Debug, Clone)]
pub struct Config {
    pub orchestrator: OrchestratorConfig,
    /// YAML file backing the instance store
    pub store_path: PathBuf,
    /// Directory for the log file; console only when unset
    pub log_dir: Option<PathBuf>,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup, empty values count as unset
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let defaults = OrchestratorConfig::default();

        let orchestrator = OrchestratorConfig {
            namespace: var("CLOUDLAB_NAMESPACE").unwrap_or(defaults.namespace),
            owner_label: var("CLOUDLAB_OWNER_LABEL").unwrap_or(defaults.owner_label),
            image_pull_secret: var("CLOUDLAB_IMAGE_PULL_SECRET"),
            service_type: var("CLOUDLAB_SERVICE_TYPE").unwrap_or(defaults.service_type),
            poll_interval: seconds(&var, "CLOUDLAB_POLL_INTERVAL_SECS")?
                .unwrap_or(defaults.poll_interval),
            ready_timeout: seconds(&var, "CLOUDLAB_READY_TIMEOUT_SECS")?
                .unwrap_or(defaults.ready_timeout),
            container_creating_timeout: seconds(&var, "CLOUDLAB_CONTAINER_CREATING_TIMEOUT_SECS")?
                .unwrap_or(defaults.container_creating_timeout),
            helper_path: var("CLOUDLAB_HELPER_PATH"),
        };

        Ok(Self {
            orchestrator,
            store_path: var("CLOUDLAB_STORE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("instances.yaml")),
            log_dir: var("CLOUDLAB_LOG_DIR").map(PathBuf::from),
        })
    }
}

fn seconds(var: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<Duration>> {
    let Some(raw) = var(key) else {
        return Ok(None);
    };
    let duration = f64::from_str(raw.trim())
        .ok()
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        .with_context(|| format!("{} must be a non-negative number of seconds, got '{}'", key, raw))?;
    Ok(Some(duration))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[]).unwrap();
        assert_eq!(config.orchestrator, OrchestratorConfig::default());
        assert_eq!(config.store_path, PathBuf::from("instances.yaml"));
        assert!(config.log_dir.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = config(&[
            ("CLOUDLAB_NAMESPACE", "panosc"),
            ("CLOUDLAB_SERVICE_TYPE", "NodePort"),
            ("CLOUDLAB_POLL_INTERVAL_SECS", "0.5"),
            ("CLOUDLAB_HELPER_PATH", "/etc/cloudlab/helper.yaml"),
            ("CLOUDLAB_IMAGE_PULL_SECRET", ""),
        ])
        .unwrap();

        assert_eq!(config.orchestrator.namespace, "panosc");
        assert_eq!(config.orchestrator.service_type, "NodePort");
        assert_eq!(config.orchestrator.poll_interval, Duration::from_millis(500));
        assert_eq!(config.orchestrator.helper_path.as_deref(), Some("/etc/cloudlab/helper.yaml"));
        assert_eq!(config.orchestrator.image_pull_secret, None);
    }

    #[test]
    fn test_malformed_duration_fails() {
        let err = config(&[("CLOUDLAB_READY_TIMEOUT_SECS", "soon")]).unwrap_err();
        assert!(err.to_string().contains("CLOUDLAB_READY_TIMEOUT_SECS"));

        assert!(config(&[("CLOUDLAB_POLL_INTERVAL_SECS", "-1")]).is_err());
    }

    #[test]
    fn test_out_of_range_duration_fails() {
        for raw in ["1e30", "inf", "NaN"] {
            let err = config(&[("CLOUDLAB_CONTAINER_CREATING_TIMEOUT_SECS", raw)]).unwrap_err();
            assert!(err.to_string().contains("CLOUDLAB_CONTAINER_CREATING_TIMEOUT_SECS"), "{}", raw);
        }
    }
}
