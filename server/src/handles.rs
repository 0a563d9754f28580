use std::collections::{BTreeMap, HashMap};

use rustls::{crypto::CryptoProvider, pki_types::CertificateDer, RootCertStore};
use sslc_common::{protocol::HandleKind, SslOptions};

use crate::{
    builtin::BuiltinStore,
    context::TlsContext,
    fault::Fault,
    identity::{parse_certificate, ClientIdentity},
};

/// Capacities enforced by a [`HandleTable`]
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub max_handles:     usize,
    pub max_chain_certs: usize,
}

#[derive(Debug, Default)]
struct RootChain {
    entries: BTreeMap<u32, CertificateDer<'static>>,
}

/// Every handle a single client connection owns. Ids come from one counter
/// and are never reused.
#[derive(Debug)]
pub struct HandleTable {
    limits:       Limits,
    next_id:      u32,
    chains:       HashMap<u32, RootChain>,
    client_certs: HashMap<u32, ClientIdentity>,
    contexts:     HashMap<u32, TlsContext>,
}

impl HandleTable {
    pub fn new(limits: Limits) -> Self {
        Self {
            limits,
            next_id: 0,
            chains: HashMap::new(),
            client_certs: HashMap::new(),
            contexts: HashMap::new(),
        }
    }

    fn allocate(&mut self) -> Result<u32, Fault> {
        let live = self.chains.len() + self.client_certs.len() + self.contexts.len();
        if live >= self.limits.max_handles {
            return Err(Fault::exhausted(format!(
                "handle table full ({} handles)",
                self.limits.max_handles
            )));
        }
        self.next_id = self
            .next_id
            .checked_add(1)
            .ok_or_else(|| Fault::exhausted("handle ids exhausted"))?;
        Ok(self.next_id)
    }

    /// Number of live handles, for logging on teardown
    pub fn live_handles(&self) -> usize {
        self.chains.len() + self.client_certs.len() + self.contexts.len()
    }

    pub fn create_chain(&mut self) -> Result<u32, Fault> {
        let id = self.allocate()?;
        self.chains.insert(id, RootChain::default());
        Ok(id)
    }

    pub fn destroy_chain(&mut self, chain: u32) -> Result<(), Fault> {
        self.chains
            .remove(&chain)
            .map(|_| ())
            .ok_or_else(|| Fault::invalid_handle(HandleKind::RootCertChain, chain))
    }

    pub fn add_trusted_cert(&mut self, chain: u32, der: &[u8]) -> Result<u32, Fault> {
        self.chain_with_room(chain)?;
        let cert = parse_certificate(der)?;
        self.insert_entry(chain, cert)
    }

    pub fn add_default_cert(
        &mut self,
        chain: u32,
        cert_id: u32,
        builtins: &BuiltinStore,
    ) -> Result<u32, Fault> {
        self.chain_with_room(chain)?;
        let cert = builtins.root(cert_id).cloned().ok_or_else(|| {
            Fault::invalid_argument(format!("default root cert {cert_id:#x} is not provisioned"))
        })?;
        self.insert_entry(chain, cert)
    }

    pub fn remove_cert(&mut self, chain: u32, cert: u32) -> Result<(), Fault> {
        let entries = &mut self
            .chains
            .get_mut(&chain)
            .ok_or_else(|| Fault::invalid_handle(HandleKind::RootCertChain, chain))?
            .entries;
        entries
            .remove(&cert)
            .map(|_| ())
            .ok_or_else(|| Fault::invalid_handle(HandleKind::CertEntry, cert))
    }

    /// Entry ids currently in a chain
    pub fn chain_entries(&self, chain: u32) -> Result<Vec<u32>, Fault> {
        self.chains
            .get(&chain)
            .map(|c| c.entries.keys().copied().collect())
            .ok_or_else(|| Fault::invalid_handle(HandleKind::RootCertChain, chain))
    }

    /// Trust anchors of a chain as they are now
    pub fn root_store(&self, chain: u32) -> Result<RootCertStore, Fault> {
        let chain_ref = self
            .chains
            .get(&chain)
            .ok_or_else(|| Fault::invalid_handle(HandleKind::RootCertChain, chain))?;
        let mut store = RootCertStore::empty();
        let (added, ignored) = store.add_parsable_certificates(chain_ref.entries.values().cloned());
        tracing::debug!(
            "Chain {} snapshot: {} anchors, {} ignored",
            chain,
            added,
            ignored
        );
        Ok(store)
    }

    fn chain_with_room(&self, chain: u32) -> Result<(), Fault> {
        let chain_ref = self
            .chains
            .get(&chain)
            .ok_or_else(|| Fault::invalid_handle(HandleKind::RootCertChain, chain))?;
        if chain_ref.entries.len() >= self.limits.max_chain_certs {
            return Err(Fault::exhausted(format!(
                "root cert chain {chain} is full ({} certs)",
                self.limits.max_chain_certs
            )));
        }
        Ok(())
    }

    fn insert_entry(&mut self, chain: u32, cert: CertificateDer<'static>) -> Result<u32, Fault> {
        // Entries do not count against the handle table, only the chain
        self.next_id = self
            .next_id
            .checked_add(1)
            .ok_or_else(|| Fault::exhausted("handle ids exhausted"))?;
        let id = self.next_id;
        self.chains
            .get_mut(&chain)
            .ok_or_else(|| Fault::invalid_handle(HandleKind::RootCertChain, chain))?
            .entries
            .insert(id, cert);
        Ok(id)
    }

    pub fn open_client_cert(
        &mut self,
        cert: &[u8],
        key: &[u8],
        provider: &CryptoProvider,
    ) -> Result<u32, Fault> {
        // Parse first so a malformed pair allocates nothing
        let identity = ClientIdentity::from_der(cert, key, provider)?;
        let id = self.allocate()?;
        self.client_certs.insert(id, identity);
        Ok(id)
    }

    pub fn open_default_client_cert(
        &mut self,
        cert_id: u32,
        builtins: &BuiltinStore,
    ) -> Result<u32, Fault> {
        let identity = builtins.client(cert_id).cloned().ok_or_else(|| {
            Fault::invalid_argument(format!("default client cert {cert_id:#x} is not provisioned"))
        })?;
        let id = self.allocate()?;
        self.client_certs.insert(id, identity);
        Ok(id)
    }

    pub fn close_client_cert(&mut self, client_cert: u32) -> Result<(), Fault> {
        self.client_certs
            .remove(&client_cert)
            .map(|_| ())
            .ok_or_else(|| Fault::invalid_handle(HandleKind::ClientCert, client_cert))
    }

    pub fn client_identity(&self, client_cert: u32) -> Result<ClientIdentity, Fault> {
        self.client_certs
            .get(&client_cert)
            .cloned()
            .ok_or_else(|| Fault::invalid_handle(HandleKind::ClientCert, client_cert))
    }

    pub fn create_context(&mut self, options: SslOptions, hostname: &str) -> Result<u32, Fault> {
        let context = TlsContext::new(hostname, options)?;
        let id = self.allocate()?;
        self.contexts.insert(id, context);
        Ok(id)
    }

    pub fn destroy_context(&mut self, context: u32) -> Result<(), Fault> {
        self.contexts
            .remove(&context)
            .map(|_| ())
            .ok_or_else(|| Fault::invalid_handle(HandleKind::Context, context))
    }

    pub fn context(&self, context: u32) -> Result<&TlsContext, Fault> {
        self.contexts
            .get(&context)
            .ok_or_else(|| Fault::invalid_handle(HandleKind::Context, context))
    }

    pub fn context_mut(&mut self, context: u32) -> Result<&mut TlsContext, Fault> {
        self.contexts
            .get_mut(&context)
            .ok_or_else(|| Fault::invalid_handle(HandleKind::Context, context))
    }
}
