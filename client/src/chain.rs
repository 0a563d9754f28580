//! Root certificate chains: sets of CA certificates a session trusts when it
//! verifies the server.

use sslc_common::{protocol::Command, DefaultRootCert};

use crate::{Result, ServiceConnection, SslcError};

/// A root certificate chain held by the service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RootCertChain(u32);

impl RootCertChain {
    /// Id assigned by the service
    pub fn id(self) -> u32 {
        self.0
    }
}

/// One certificate inside a [`RootCertChain`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CertEntry {
    chain: RootCertChain,
    id:    u32,
}

impl CertEntry {
    pub fn id(self) -> u32 {
        self.id
    }

    /// The chain the entry was added to
    pub fn chain(self) -> RootCertChain {
        self.chain
    }
}

impl ServiceConnection {
    /// Create an empty root certificate chain.
    pub fn create_root_cert_chain(&self) -> Result<RootCertChain> {
        let id = self.call_handle(Command::CreateRootCertChain)?;
        tracing::debug!("Created root cert chain {}", id);
        Ok(RootCertChain(id))
    }

    /// Destroy a chain together with every entry it holds.
    pub fn destroy_root_cert_chain(&self, chain: RootCertChain) -> Result<()> {
        self.call_ack(Command::DestroyRootCertChain { chain: chain.0 })
    }

    /// Add a DER-encoded CA certificate to a chain.
    pub fn add_trusted_root_ca(&self, chain: RootCertChain, der: &[u8]) -> Result<CertEntry> {
        if der.is_empty() {
            return Err(SslcError::InvalidArgument("empty certificate".into()));
        }

        let id = self.call_handle(Command::AddTrustedRootCa {
            chain: chain.0,
            cert:  der.to_vec(),
        })?;
        Ok(CertEntry { chain, id })
    }

    /// Add one of the service's built-in root certificates to a chain.
    pub fn add_default_cert(
        &self,
        chain: RootCertChain,
        cert: DefaultRootCert,
    ) -> Result<CertEntry> {
        let id = self.call_handle(Command::RootCertChainAddDefaultCert {
            chain:   chain.0,
            cert_id: cert.id(),
        })?;
        tracing::debug!("Added {} to chain {} as entry {}", cert, chain.0, id);
        Ok(CertEntry { chain, id })
    }

    /// Remove one entry from `chain`. Fails with
    /// [`SslcError::InvalidHandle`] if the entry is unknown or was added to
    /// a different chain.
    pub fn remove_cert(&self, chain: RootCertChain, entry: CertEntry) -> Result<()> {
        self.call_ack(Command::RootCertChainRemoveCert {
            chain: chain.0,
            cert:  entry.id,
        })
    }
}
