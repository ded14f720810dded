// src/config/mod.rs
mod models;

pub use models::*;

use anyhow::{Context, Result};
use std::path::Path;

/// Load configuration from a file (YAML or JSON)
pub async fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    let contents = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read config file {}", path.display()))?;

    let config = parse_config(&contents, path)?;
    config.validate()?;
    Ok(config)
}

fn parse_config(contents: &str, path: &Path) -> Result<Config> {
    let is_yaml = matches!(
        path.extension().and_then(|s| s.to_str()),
        Some("yaml") | Some("yml")
    );

    if is_yaml {
        serde_yaml::from_str(contents).context("Failed to parse YAML config")
    } else {
        serde_json::from_str(contents).context("Failed to parse JSON config")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_json_config() {
        let json = r#"{
            "proxy": {"targets": [{"name": "peer", "url": "http://127.0.0.1:8888/"}]},
            "tasks": [{"name": "ticker"}]
        }"#;
        let config = parse_config(json, Path::new("config.json")).unwrap();
        config.validate().unwrap();
        assert_eq!(config.proxy.unwrap().targets[0].request_timeout, 10.0);
        assert!(!config.tasks[0].enabled);
    }

    #[test]
    fn test_yaml_extension_selects_yaml() {
        let yaml = "tasks:\n  - name: ticker\n    enabled: true\n";
        let config = parse_config(yaml, Path::new("daq.yml")).unwrap();
        assert!(config.tasks[0].enabled);
        assert!(parse_config(yaml, Path::new("daq.json")).is_err());
    }

    #[tokio::test]
    async fn test_missing_file_reports_path() {
        let err = load_config("/nonexistent/daq.yaml").await.unwrap_err();
        assert!(err.to_string().contains("/nonexistent/daq.yaml"));
    }
}
