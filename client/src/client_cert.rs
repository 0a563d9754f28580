use sslc_common::{protocol::Command, DefaultClientCert};

use crate::{Result, ServiceConnection};

/// A client certificate and private key held by the service, presented when
/// a server asks for client authentication
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientCertContext(u32);

impl ClientCertContext {
    pub fn id(self) -> u32 {
        self.0
    }
}

impl ServiceConnection {
    /// Open a client certificate context from a DER certificate and a DER
    /// private key (PKCS#8, SEC1 or PKCS#1).
    ///
    /// Nothing is allocated when either input fails to parse.
    pub fn open_client_cert_context(&self, cert: &[u8], key: &[u8]) -> Result<ClientCertContext> {
        self.call_handle(Command::OpenClientCertContext {
            cert: cert.to_vec(),
            key:  key.to_vec(),
        })
        .map(ClientCertContext)
    }

    /// Open one of the service's built-in client identities.
    pub fn open_default_client_cert_context(
        &self,
        cert: DefaultClientCert,
    ) -> Result<ClientCertContext> {
        let id = self.call_handle(Command::OpenDefaultClientCertContext { cert_id: cert.id() })?;
        tracing::debug!("Opened default client cert {} as {}", cert.name(), id);
        Ok(ClientCertContext(id))
    }

    /// Close a client certificate context. Sessions whose handshake already
    /// started keep the identity they captured.
    pub fn close_client_cert_context(&self, ctx: ClientCertContext) -> Result<()> {
        self.call_ack(Command::CloseClientCertContext { client_cert: ctx.0 })
    }
}
