use std::{collections::HashMap, fs, io::BufReader, path::Path};

use anyhow::{anyhow, Context, Result};
use rustls::pki_types::CertificateDer;
use rustls_pemfile::{certs, private_key};
use sha2::{Digest, Sha256};
use sslc_common::{BuiltinCertPath, DefaultClientCert, DefaultRootCert};

use crate::identity::ClientIdentity;

/// Default root certificates and client identities provisioned from disk
#[derive(Debug, Default, Clone)]
pub struct BuiltinStore {
    roots:   HashMap<u32, CertificateDer<'static>>,
    clients: HashMap<u32, ClientIdentity>,
}

impl BuiltinStore {
    /// Load every built-in found under the certificate directory. Missing
    /// files leave that id unprovisioned.
    pub fn load(paths: &BuiltinCertPath) -> Result<Self> {
        let mut store = Self::default();

        for root in DefaultRootCert::ALL {
            let path = paths.root_cert(root.id());
            if !path.exists() {
                tracing::debug!("No default root provisioned for {}", root);
                continue;
            }

            let cert = read_certs(&path)?
                .into_iter()
                .next()
                .ok_or_else(|| anyhow!("No certificate found in {:?}", path))?;
            tracing::info!("Loaded default root {} ({})", root, fingerprint(&cert));
            store.roots.insert(root.id(), cert);
        }

        for client in DefaultClientCert::ALL {
            let (cert_path, key_path) = paths.client_cert(client.id());
            if !cert_path.exists() {
                tracing::debug!("No default client cert provisioned for {}", client.name());
                continue;
            }

            let cert_chain = read_certs(&cert_path)?;
            let key_pem = fs::read(&key_path)
                .with_context(|| format!("Failed to read private key from {:?}", key_path))?;
            let key = private_key(&mut BufReader::new(&*key_pem))
                .with_context(|| format!("Failed to parse private key {:?}", key_path))?
                .ok_or_else(|| anyhow!("No private key found in {:?}", key_path))?;

            if let Some(leaf) = cert_chain.first() {
                tracing::info!(
                    "Loaded default client cert {} ({})",
                    client.name(),
                    fingerprint(leaf)
                );
            }
            store.clients.insert(
                client.id(),
                ClientIdentity {
                    certs: cert_chain,
                    key,
                },
            );
        }

        Ok(store)
    }

    pub fn root(&self, id: u32) -> Option<&CertificateDer<'static>> {
        self.roots.get(&id)
    }

    pub fn client(&self, id: u32) -> Option<&ClientIdentity> {
        self.clients.get(&id)
    }

    pub fn root_count(&self) -> usize {
        self.roots.len()
    }
}

fn read_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let pem = fs::read(path).with_context(|| format!("Failed to read certificate {:?}", path))?;
    certs(&mut BufReader::new(&*pem))
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("Failed to parse certificate PEM data in {:?}", path))
}

/// SHA-256 fingerprint in lowercase hex
pub fn fingerprint(cert: &CertificateDer<'_>) -> String {
    hex::encode(Sha256::digest(cert.as_ref()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo_certs() -> BuiltinCertPath {
        BuiltinCertPath::new(concat!(env!("CARGO_MANIFEST_DIR"), "/../certs"))
    }

    #[test]
    fn loads_provisioned_defaults_only() {
        let store = BuiltinStore::load(&repo_certs()).unwrap();
        assert!(store.root(DefaultRootCert::NintendoCa.id()).is_some());
        assert!(store.root(DefaultRootCert::Comodo.id()).is_none());
        assert!(store.client(DefaultClientCert::ClCertA.id()).is_some());
    }

    #[test]
    fn empty_directory_provisions_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = BuiltinStore::load(&BuiltinCertPath::new(dir.path())).unwrap();
        assert_eq!(store.root_count(), 0);
    }

    #[test]
    fn fingerprint_is_sha256_hex() {
        let cert = CertificateDer::from(vec![0u8; 4]);
        assert_eq!(
            fingerprint(&cert),
            "df3f619804a92fdb4057192dc43dd748ea778adc52bc498ce80524c014b81119"
        );
    }
}
