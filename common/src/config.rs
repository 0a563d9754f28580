use std::{
    env,
    path::{Path, PathBuf},
};

/// The socket the service and its clients communicate over
pub const SOCKET_NAME: &str = "sslc.sock";

/// Overrides [`SOCKET_NAME`] for both the service and the client
pub const SOCKET_ENV: &str = "SSLC_SOCKET";

const CERTS_DIR_ENV: &str = "SSLC_CERTS_DIR";
const DEFAULT_CERTS_DIR: &str = "certs";

// Subdirectories holding the built-in identities
const ROOTS_SUBDIR: &str = "roots";
const CLIENTS_SUBDIR: &str = "clients";

/// Directory relative to which plain socket names are resolved
const SOCKET_DIR: &str = "/tmp";

/// Returns the socket name from the environment, falling back to
/// [`SOCKET_NAME`].
pub fn socket_name_from_env() -> String {
    env::var(SOCKET_ENV).unwrap_or_else(|_| SOCKET_NAME.to_string())
}

/// Resolves a socket name to a filesystem path.
///
/// Names containing a `/` are used verbatim; bare names live in `/tmp`.
pub fn socket_path(socket_name: &str) -> PathBuf {
    if socket_name.contains('/') {
        PathBuf::from(socket_name)
    } else {
        Path::new(SOCKET_DIR).join(socket_name)
    }
}

/// Returns the certificate directory from the environment
pub fn certs_dir_from_env() -> PathBuf {
    env::var(CERTS_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CERTS_DIR))
}

/// Locations of the built-in certificates provisioned to the service
#[derive(Debug, Clone)]
pub struct BuiltinCertPath {
    /// Directory containing `roots/` and `clients/`
    pub base: PathBuf,
}

impl BuiltinCertPath {
    /// Uses the given certificate directory
    pub fn new<P: Into<PathBuf>>(base: P) -> Self {
        Self { base: base.into() }
    }

    /// PEM file holding the default root certificate with this id
    pub fn root_cert(&self, id: u32) -> PathBuf {
        self.base.join(ROOTS_SUBDIR).join(format!("{id:02x}.pem"))
    }

    /// PEM certificate and key files of the default client identity
    pub fn client_cert(&self, id: u32) -> (PathBuf, PathBuf) {
        let dir = self.base.join(CLIENTS_SUBDIR);
        (
            dir.join(format!("{id:02x}.pem")),
            dir.join(format!("{id:02x}.key.pem")),
        )
    }
}

impl Default for BuiltinCertPath {
    fn default() -> Self {
        Self::new(certs_dir_from_env())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_names_resolve_under_tmp() {
        assert_eq!(socket_path("sslc.sock"), PathBuf::from("/tmp/sslc.sock"));
        assert_eq!(
            socket_path("/run/user/1000/sslc.sock"),
            PathBuf::from("/run/user/1000/sslc.sock")
        );
    }

    #[test]
    fn builtin_paths_use_two_hex_digits() {
        let paths = BuiltinCertPath::new("/etc/sslc");
        assert_eq!(paths.root_cert(0xA), PathBuf::from("/etc/sslc/roots/0a.pem"));
        let (cert, key) = paths.client_cert(0x40);
        assert_eq!(cert, PathBuf::from("/etc/sslc/clients/40.pem"));
        assert_eq!(key, PathBuf::from("/etc/sslc/clients/40.key.pem"));
    }
}
