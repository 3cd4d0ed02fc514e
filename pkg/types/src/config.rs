use serde::{Deserialize, Serialize};

/// Server configuration file (YAML).
///
/// Example `config.yaml`:
/// ```yaml
/// data-dir: /var/lib/m8s/data
/// workers: 4
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfigFile {
    #[serde(default, alias = "data-dir")]
    pub data_dir: Option<String>,
    /// Reconcile worker pool size per controller.
    #[serde(default)]
    pub workers: Option<usize>,
}

/// Load a YAML config file, returning the default if the file doesn't exist.
pub fn load_config_file<T: serde::de::DeserializeOwned + Default>(path: &str) -> anyhow::Result<T> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(T::default());
        }
        Err(e) => return Err(e.into()),
    };
    let config: T = serde_yaml::from_str(&content)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let cfg: ServerConfigFile = load_config_file("/nonexistent/m8s.yaml").unwrap();
        assert!(cfg.data_dir.is_none());
        assert!(cfg.workers.is_none());
    }

    #[test]
    fn kebab_case_aliases() {
        let cfg: ServerConfigFile =
            serde_yaml::from_str("data-dir: /tmp/m8s\nworkers: 8\n").unwrap();
        assert_eq!(cfg.data_dir.as_deref(), Some("/tmp/m8s"));
        assert_eq!(cfg.workers, Some(8));
    }
}
