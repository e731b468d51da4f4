use std::net::SocketAddr;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::tls_context::{DEFAULT_CA_CERT_PATH, DEFAULT_SERVER_NAME};

pub const DEFAULT_PORT: u16 = 4433;
pub const DEFAULT_BACKLOG: u32 = 16;
pub const DEFAULT_BUFFER_SIZE: usize = 4096;
pub const MAX_BUFFER_SIZE: usize = 64 * 1024;
pub const DEFAULT_HANDSHAKE_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_CLIENT_HOST: &str = "::1";

fn default_bind_address() -> SocketAddr {
    SocketAddr::from((std::net::Ipv6Addr::UNSPECIFIED, DEFAULT_PORT))
}

fn default_cert_path() -> PathBuf {
    PathBuf::from("cert/srv.crt")
}

fn default_key_path() -> PathBuf {
    PathBuf::from("cert/srv.key")
}

fn default_backlog() -> u32 {
    DEFAULT_BACKLOG
}

fn default_buffer_size() -> usize {
    DEFAULT_BUFFER_SIZE
}

fn default_handshake_timeout_secs() -> u64 {
    DEFAULT_HANDSHAKE_TIMEOUT_SECS
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_client_host() -> String {
    DEFAULT_CLIENT_HOST.to_string()
}

fn default_server_name() -> String {
    DEFAULT_SERVER_NAME.to_string()
}

fn default_ca_cert_path() -> Option<PathBuf> {
    Some(PathBuf::from(DEFAULT_CA_CERT_PATH))
}

fn default_key_exchange_groups() -> Vec<String> {
    vec![crate::kx_policy::REQUIRED_GROUP.name().to_string()]
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(alias = "key_exchange_group", default = "default_key_exchange_groups")]
    pub key_exchange_groups: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            client: ClientConfig::default(),
            key_exchange_groups: default_key_exchange_groups(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(alias = "address", default = "default_bind_address")]
    pub bind_address: SocketAddr,
    #[serde(alias = "cert_path", default = "default_cert_path")]
    pub cert: PathBuf,
    #[serde(alias = "key_path", default = "default_key_path")]
    pub key: PathBuf,
    #[serde(default = "default_backlog")]
    pub backlog: u32,
    /// 0 disables the timeout.
    #[serde(default = "default_handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            cert: default_cert_path(),
            key: default_key_path(),
            backlog: DEFAULT_BACKLOG,
            handshake_timeout_secs: DEFAULT_HANDSHAKE_TIMEOUT_SECS,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(alias = "host", default = "default_client_host")]
    pub default_host: String,
    #[serde(default = "default_server_name")]
    pub server_name: String,
    /// `null` turns verification off even if `cert/ca.crt` exists.
    #[serde(alias = "ca_cert_path", default = "default_ca_cert_path")]
    pub ca_cert: Option<PathBuf>,
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            default_host: default_client_host(),
            server_name: default_server_name(),
            ca_cert: default_ca_cert_path(),
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}
