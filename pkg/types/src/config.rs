use serde::{Deserialize, Serialize};

/// Controller manager configuration file (YAML).
///
/// Example `config.yaml`:
/// ```yaml
/// server: http://10.0.0.1:6443
/// sweep-interval-secs: 15
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManagerConfigFile {
    /// Base URL of the API server.
    #[serde(default)]
    pub server: Option<String>,
    /// Interval of the autoscaler's periodic full sweep, in seconds.
    #[serde(default, alias = "sweep-interval-secs")]
    pub sweep_interval_secs: Option<u64>,
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
