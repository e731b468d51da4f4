//! Config validation, and conversion into engine settings.

use std::io::{Error, ErrorKind, Result};
use std::time::Duration;

use crate::async_tls::{ClientTlsSettings, ServerTlsSettings};
use crate::kx_policy::KeyExchangePolicy;

use super::types::{ClientConfig, Config, MAX_BUFFER_SIZE, ServerConfig};

fn invalid_input(message: String) -> Error {
    Error::new(ErrorKind::InvalidInput, message)
}

fn validate_buffer_size(section: &str, buffer_size: usize) -> Result<()> {
    if buffer_size == 0 || buffer_size > MAX_BUFFER_SIZE {
        return Err(invalid_input(format!(
            "{section}.buffer_size must be between 1 and {MAX_BUFFER_SIZE}, got {buffer_size}"
        )));
    }
    Ok(())
}

fn validate_server(config: &ServerConfig) -> Result<()> {
    if config.backlog == 0 {
        return Err(invalid_input("server.backlog must be at least 1".to_string()));
    }
    validate_buffer_size("server", config.buffer_size)
}

fn validate_client(config: &ClientConfig) -> Result<()> {
    if config.port == 0 {
        return Err(invalid_input("client.port must not be 0".to_string()));
    }
    if config.default_host.is_empty() {
        return Err(invalid_input("client.default_host must not be empty".to_string()));
    }
    if config.server_name.is_empty() {
        return Err(invalid_input("client.server_name must not be empty".to_string()));
    }
    validate_buffer_size("client", config.buffer_size)
}

/// Checks the whole config. Policy violations are reported here so that
/// a bad `key_exchange_groups` never reaches an engine.
pub fn validate_config(config: &Config) -> Result<()> {
    validate_server(&config.server)?;
    validate_client(&config.client)?;
    key_exchange_policy(config)?;
    Ok(())
}

pub fn key_exchange_policy(config: &Config) -> Result<KeyExchangePolicy> {
    KeyExchangePolicy::from_names(config.key_exchange_groups.as_slice())
        .map_err(|e| invalid_input(format!("invalid key_exchange_groups: {e}")))
}

pub fn server_tls_settings(config: &Config) -> Result<ServerTlsSettings> {
    Ok(ServerTlsSettings {
        cert_path: config.server.cert.clone(),
        key_path: config.server.key.clone(),
        policy: key_exchange_policy(config)?,
    })
}

pub fn client_tls_settings(config: &Config) -> Result<ClientTlsSettings> {
    Ok(ClientTlsSettings {
        ca_cert_path: config.client.ca_cert.clone(),
        server_name: config.client.server_name.clone(),
        policy: key_exchange_policy(config)?,
    })
}

impl ServerConfig {
    pub fn handshake_timeout(&self) -> Option<Duration> {
        match self.handshake_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}
