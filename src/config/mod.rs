//! Configuration for the echo drivers.
//!
//! - [`types`]: the YAML document, every field defaulted
//! - [`validate`]: range checks and conversion into engine settings
//!
//! Running without a config file is the same as loading `{}`.

mod types;
mod validate;

pub use types::*;
pub use validate::{
    client_tls_settings, key_exchange_policy, server_tls_settings, validate_config,
};

/// Loads and validates a config file, or returns the defaults when `path` is
/// `None`.
pub async fn load_config(path: Option<&str>) -> std::io::Result<Config> {
    let config_filename = match path {
        Some(p) => p,
        None => return Ok(Config::default()),
    };

    let config_bytes = match tokio::fs::read(config_filename).await {
        Ok(b) => b,
        Err(e) => {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("Could not read config file {config_filename}: {e}"),
            ));
        }
    };

    let config_str = match String::from_utf8(config_bytes) {
        Ok(s) => s,
        Err(e) => {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("Could not parse config file {config_filename} as UTF8: {e}"),
            ));
        }
    };

    // An empty file deserializes as YAML null.
    let config = if config_str.trim().is_empty() {
        Config::default()
    } else {
        match serde_yaml::from_str::<Config>(&config_str) {
            Ok(c) => c,
            Err(e) => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("Could not parse config file {config_filename} as config YAML: {e}"),
                ));
            }
        }
    };

    validate_config(&config)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_load_without_path_gives_defaults() {
        let config = load_config(None).await.unwrap();
        assert_eq!(config.server.backlog, DEFAULT_BACKLOG);
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pqecho.yaml");
        std::fs::write(&path, "client:\n  port: 8443\n").unwrap();

        let config = load_config(path.to_str()).await.unwrap();
        assert_eq!(config.client.port, 8443);
        assert_eq!(config.server.buffer_size, DEFAULT_BUFFER_SIZE);
    }

    #[tokio::test]
    async fn test_empty_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.yaml");
        std::fs::write(&path, "").unwrap();
        let config = load_config(path.to_str()).await.unwrap();
        assert_eq!(config.client.port, DEFAULT_PORT);
    }

    #[tokio::test]
    async fn test_load_errors_are_invalid_input() {
        let dir = tempfile::tempdir().unwrap();

        let missing = dir.path().join("missing.yaml");
        let err = load_config(missing.to_str()).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);

        let bad = dir.path().join("bad.yaml");
        std::fs::write(&bad, "server: [").unwrap();
        let err = load_config(bad.to_str()).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);

        let hybrid = dir.path().join("hybrid.yaml");
        std::fs::write(&hybrid, "key_exchange_groups: [X25519MLKEM768]\n").unwrap();
        let err = load_config(hybrid.to_str()).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);
    }
}
