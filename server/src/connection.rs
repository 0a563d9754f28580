use std::sync::Arc;

use rustls::{crypto::CryptoProvider, RootCertStore};
use sslc_common::protocol::{Command, Reply, ResultCode, PROTOCOL_VERSION, MAX_TRANSFER_SIZE};

use crate::{
    builtin::BuiltinStore,
    config::ServiceConfig,
    context::{client_config, ContextState},
    fault::Fault,
    handles::{HandleTable, Limits},
    rng::RandomBridge,
};

/// Command processing for one client connection. Every handle created here
/// dies with the connection.
pub struct ConnectionHandler {
    provider: Arc<CryptoProvider>,
    builtins: Arc<BuiltinStore>,
    handles:  HandleTable,
    random:   RandomBridge,
}

impl ConnectionHandler {
    pub fn new(
        config: &ServiceConfig,
        provider: Arc<CryptoProvider>,
        builtins: Arc<BuiltinStore>,
    ) -> Self {
        Self {
            provider,
            builtins,
            handles: HandleTable::new(Limits {
                max_handles:     config.max_handles,
                max_chain_certs: config.max_chain_certs,
            }),
            random: RandomBridge::new(config.max_random_data),
        }
    }

    pub fn handles(&self) -> &HandleTable {
        &self.handles
    }

    /// Execute one command, converting failures into an error reply
    pub fn process_command(&mut self, command: Command) -> Reply {
        match self.execute(command) {
            Ok(reply) => reply,
            Err(fault) => {
                tracing::debug!("Command failed: {}", fault);
                fault.into()
            }
        }
    }

    fn execute(&mut self, command: Command) -> Result<Reply, Fault> {
        let provider = &self.provider;
        let handles = &mut self.handles;

        match command {
            Command::Initialize { version } => {
                if version != PROTOCOL_VERSION {
                    return Err(Fault::new(
                        ResultCode::UnsupportedVersion,
                        format!("protocol version {version} unsupported, expected {PROTOCOL_VERSION}"),
                    ));
                }
                Ok(Reply::Ack)
            }
            Command::CreateRootCertChain => handles.create_chain().map(Reply::Handle),
            Command::DestroyRootCertChain { chain } => {
                handles.destroy_chain(chain).map(|_| Reply::Ack)
            }
            Command::AddTrustedRootCa { chain, cert } => {
                handles.add_trusted_cert(chain, &cert).map(Reply::Handle)
            }
            Command::RootCertChainAddDefaultCert { chain, cert_id } => handles
                .add_default_cert(chain, cert_id, &self.builtins)
                .map(Reply::Handle),
            Command::RootCertChainRemoveCert { chain, cert } => {
                handles.remove_cert(chain, cert).map(|_| Reply::Ack)
            }
            Command::OpenClientCertContext { cert, key } => handles
                .open_client_cert(&cert, &key, provider)
                .map(Reply::Handle),
            Command::OpenDefaultClientCertContext { cert_id } => handles
                .open_default_client_cert(cert_id, &self.builtins)
                .map(Reply::Handle),
            Command::CloseClientCertContext { client_cert } => {
                handles.close_client_cert(client_cert).map(|_| Reply::Ack)
            }
            Command::SeedRng => {
                self.random.seed();
                Ok(Reply::Ack)
            }
            Command::GenerateRandomData { size } => {
                self.random.generate(provider, size).map(Reply::RandomData)
            }
            Command::CreateContext { options, hostname } => {
                handles.create_context(options, &hostname).map(Reply::Handle)
            }
            Command::DestroyContext { context } => {
                handles.destroy_context(context).map(|_| Reply::Ack)
            }
            Command::StartConnection { context } => self.start_connection(context),
            Command::Read { context, len, peek } => {
                let len = (len as usize).min(MAX_TRANSFER_SIZE);
                handles.context_mut(context)?.read(len, peek)
            }
            Command::Write { context, data } => {
                if data.len() > MAX_TRANSFER_SIZE {
                    return Err(Fault::invalid_argument(format!(
                        "write of {} bytes exceeds {MAX_TRANSFER_SIZE}",
                        data.len()
                    )));
                }
                handles.context_mut(context)?.write(&data)
            }
            Command::ContextSetRootCertChain { context, chain } => {
                handles.context_mut(context)?.set_root_chain(chain);
                Ok(Reply::Ack)
            }
            Command::ContextSetClientCert {
                context,
                client_cert,
            } => {
                handles.context_mut(context)?.set_client_cert(client_cert);
                Ok(Reply::Ack)
            }
            Command::ContextSetHandle8 { context, handle } => {
                handles.context_mut(context)?.set_handle8(handle);
                Ok(Reply::Ack)
            }
            Command::ContextClearOpt { context, bitmask } => {
                handles.context_mut(context)?.clear_options(bitmask);
                Ok(Reply::Ack)
            }
            Command::ContextGetState { context } => {
                Ok(Reply::State(handles.context(context)?.state_word()))
            }
            Command::SupplyTransport { context, incoming } => {
                handles.context_mut(context)?.supply(&incoming)
            }
            Command::TransportFailed { context, reason } => {
                Err(handles.context_mut(context)?.transport_failed(&reason))
            }
            Command::Shutdown => Ok(Reply::Ack),
        }
    }

    fn start_connection(&mut self, context: u32) -> Result<Reply, Fault> {
        let ctx = self.handles.context(context)?;
        if ctx.state() == ContextState::Created {
            // Snapshot the chain and client cert as they are right now
            let roots = match ctx.root_chain() {
                Some(chain) => self.handles.root_store(chain)?,
                None => RootCertStore::empty(),
            };
            let identity = ctx
                .client_cert()
                .map(|id| self.handles.client_identity(id))
                .transpose()?;
            if let Some(handle) = ctx.handle8() {
                tracing::debug!("Context {} carries auxiliary handle {}", context, handle);
            }

            let config = client_config(&self.provider, ctx.options(), roots, identity)?;
            self.handles.context_mut(context)?.begin(config)?;
        }

        self.handles.context_mut(context)?.drive_handshake()
    }
}
