use std::{env, fs, path::Path, path::PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sslc_common::config::{certs_dir_from_env, socket_name_from_env};

const ENFORCE_PEER_UID_ENV: &str = "SSLC_ENFORCE_PEER_UID";

/// Service-side limits and endpoint settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Socket name or absolute path to listen on
    pub socket_name:      String,
    /// Directory holding the built-in certificates
    pub certs_dir:        PathBuf,
    /// Certificates a single root chain may hold
    pub max_chain_certs:  usize,
    /// Live chains, client cert contexts and sslc contexts per connection
    pub max_handles:      usize,
    /// Largest random-data request
    pub max_random_data:  u32,
    /// Reject clients running as a different user
    pub enforce_peer_uid: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            socket_name:      sslc_common::SOCKET_NAME.to_string(),
            certs_dir:        PathBuf::from("certs"),
            max_chain_certs:  16,
            max_handles:      64,
            max_random_data:  0x1000,
            enforce_peer_uid: true,
        }
    }
}

impl ServiceConfig {
    /// Defaults overridden by `SSLC_SOCKET`, `SSLC_CERTS_DIR` and
    /// `SSLC_ENFORCE_PEER_UID`
    pub fn from_env() -> Self {
        let mut config = Self {
            socket_name: socket_name_from_env(),
            certs_dir: certs_dir_from_env(),
            ..Self::default()
        };

        if let Ok(value) = env::var(ENFORCE_PEER_UID_ENV) {
            config.enforce_peer_uid = !matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "0" | "false" | "no" | "off"
            );
        }

        config
    }

    /// Load a JSON configuration file; missing fields keep their defaults
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read service config from {:?}", path))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse service config {:?}", path))
    }

    pub fn with_socket_name<S: Into<String>>(mut self, socket_name: S) -> Self {
        self.socket_name = socket_name.into();
        self
    }

    pub fn with_certs_dir<P: Into<PathBuf>>(mut self, certs_dir: P) -> Self {
        self.certs_dir = certs_dir.into();
        self
    }

    pub fn with_max_chain_certs(mut self, max: usize) -> Self {
        self.max_chain_certs = max;
        self
    }

    pub fn with_max_handles(mut self, max: usize) -> Self {
        self.max_handles = max;
        self
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "socket_name": "/run/sslc.sock", "max_chain_certs": 4 }}"#).unwrap();

        let config = ServiceConfig::from_file(file.path()).unwrap();
        assert_eq!(config.socket_name, "/run/sslc.sock");
        assert_eq!(config.max_chain_certs, 4);
        assert_eq!(config.max_random_data, ServiceConfig::default().max_random_data);
        assert!(config.enforce_peer_uid);
    }

    #[test]
    fn malformed_json_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(ServiceConfig::from_file(file.path()).is_err());
    }
}
