use std::{sync::Mutex, time::Duration};

use sslc_common::{
    codec::{recv_message, send_message},
    config::socket_name_from_env,
    platform_socket::{connect_socket, PlatformSocket},
    protocol::{Command, Reply, Request, Response, PROTOCOL_VERSION},
};

use crate::{Result, SslcError};

/// Configuration for reaching the TLS service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Socket name or absolute path of the service endpoint
    pub socket_name: String,
    /// Read/write timeout on the service channel, per exchange
    pub timeout:     Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            socket_name: socket_name_from_env(),
            timeout:     Duration::from_secs(30),
        }
    }
}

impl ClientConfig {
    /// Creates a client configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the socket name
    pub fn with_socket_name<S: Into<String>>(mut self, socket_name: S) -> Self {
        self.socket_name = socket_name.into();
        self
    }

    /// Set the service channel timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

struct Channel {
    socket:  PlatformSocket,
    next_id: u32,
    /// A frame was cut short or a reply went astray; the stream can no
    /// longer be trusted to line up with requests
    broken:  bool,
}

/// An open connection to the TLS service.
///
/// Every handle created through this connection belongs to it and becomes
/// meaningless once it is torn down. The connection can be shared between
/// threads; each command holds the channel only for its own request and
/// reply.
pub struct ServiceConnection {
    channel: Mutex<Channel>,
}

impl ServiceConnection {
    /// Connect to the configured endpoint and announce the protocol version.
    pub fn initialize(config: ClientConfig) -> Result<Self> {
        tracing::debug!("Connecting to TLS service at {}", config.socket_name);

        let socket = connect_socket(&config.socket_name, Some(config.timeout))
            .map_err(|e| SslcError::ServiceUnavailable(format!("{e:#}")))?;
        let conn = Self::from_existing(socket);

        match conn.call(Command::Initialize {
            version: PROTOCOL_VERSION,
        }) {
            Ok(Reply::Ack) => {}
            Ok(other) => return Err(unexpected("Initialize", &other)),
            Err(e @ SslcError::ServiceUnavailable(_)) => return Err(e),
            Err(e) => return Err(SslcError::ServiceUnavailable(e.to_string())),
        }

        tracing::info!("Connected to TLS service at {}", config.socket_name);
        Ok(conn)
    }

    /// Adopt an already connected socket. No discovery and no version
    /// announcement take place.
    pub fn from_existing(socket: PlatformSocket) -> Self {
        Self {
            channel: Mutex::new(Channel {
                socket,
                next_id: 0,
                broken: false,
            }),
        }
    }

    /// Close the connection. The service releases every handle created
    /// through it.
    pub fn teardown(self) {
        if let Err(e) = self.call(Command::Shutdown) {
            tracing::debug!("Shutdown not acknowledged: {}", e);
        }
        tracing::debug!("Service connection closed");
    }

    /// Send one command and wait for its reply. Error replies are returned
    /// as [`SslcError`].
    pub(crate) fn call(&self, command: Command) -> Result<Reply> {
        match self.request(command)? {
            Reply::Error {
                code,
                message,
                diagnostic,
                ..
            } => Err(SslcError::from_remote(code, message, diagnostic)),
            reply => Ok(reply),
        }
    }

    /// Send one command and return whatever the service replied, error
    /// replies included.
    ///
    /// Any failure that could leave part of a frame on the channel marks the
    /// connection broken; every later request fails with
    /// [`SslcError::ServiceUnavailable`].
    pub(crate) fn request(&self, command: Command) -> Result<Reply> {
        let mut channel = self
            .channel
            .lock()
            .map_err(|_| SslcError::Protocol("service channel poisoned".into()))?;
        if channel.broken {
            return Err(SslcError::ServiceUnavailable(
                "service channel is out of step after an earlier failure".into(),
            ));
        }

        channel.next_id = channel.next_id.wrapping_add(1);
        let request_id = channel.next_id;
        tracing::trace!("Request {}: {:?}", request_id, command);

        let sent = send_message(
            &mut channel.socket,
            &Request {
                id: request_id,
                command,
            },
        );
        if let Err(e) = sent {
            channel.broken = true;
            return Err(SslcError::ServiceUnavailable(format!(
                "failed to send request: {e:#}"
            )));
        }

        let response: Response = match recv_message(&mut channel.socket) {
            Ok(response) => response,
            Err(e) => {
                channel.broken = true;
                return Err(SslcError::ServiceUnavailable(format!(
                    "failed to receive reply: {e:#}"
                )));
            }
        };

        if response.id != request_id {
            channel.broken = true;
            return Err(SslcError::Protocol(format!(
                "Response ID mismatch: expected {}, got {}",
                request_id, response.id
            )));
        }
        Ok(response.reply)
    }

    /// Send a command whose only successful reply is an acknowledgement
    pub(crate) fn call_ack(&self, command: Command) -> Result<()> {
        let name = command_name(&command);
        match self.call(command)? {
            Reply::Ack => Ok(()),
            other => Err(unexpected(name, &other)),
        }
    }

    /// Send a command that answers with a new handle id
    pub(crate) fn call_handle(&self, command: Command) -> Result<u32> {
        let name = command_name(&command);
        match self.call(command)? {
            Reply::Handle(id) => Ok(id),
            other => Err(unexpected(name, &other)),
        }
    }
}

pub(crate) fn unexpected(command: &str, reply: &Reply) -> SslcError {
    SslcError::Protocol(format!("unexpected reply to {command}: {reply:?}"))
}

fn command_name(command: &Command) -> &'static str {
    match command {
        Command::Initialize { .. } => "Initialize",
        Command::CreateRootCertChain => "CreateRootCertChain",
        Command::DestroyRootCertChain { .. } => "DestroyRootCertChain",
        Command::AddTrustedRootCa { .. } => "AddTrustedRootCa",
        Command::RootCertChainAddDefaultCert { .. } => "RootCertChainAddDefaultCert",
        Command::RootCertChainRemoveCert { .. } => "RootCertChainRemoveCert",
        Command::OpenClientCertContext { .. } => "OpenClientCertContext",
        Command::OpenDefaultClientCertContext { .. } => "OpenDefaultClientCertContext",
        Command::CloseClientCertContext { .. } => "CloseClientCertContext",
        Command::SeedRng => "SeedRng",
        Command::GenerateRandomData { .. } => "GenerateRandomData",
        Command::CreateContext { .. } => "CreateContext",
        Command::DestroyContext { .. } => "DestroyContext",
        Command::StartConnection { .. } => "StartConnection",
        Command::Read { .. } => "Read",
        Command::Write { .. } => "Write",
        Command::ContextSetRootCertChain { .. } => "ContextSetRootCertChain",
        Command::ContextSetClientCert { .. } => "ContextSetClientCert",
        Command::ContextSetHandle8 { .. } => "ContextSetHandle8",
        Command::ContextClearOpt { .. } => "ContextClearOpt",
        Command::ContextGetState { .. } => "ContextGetState",
        Command::SupplyTransport { .. } => "SupplyTransport",
        Command::TransportFailed { .. } => "TransportFailed",
        Command::Shutdown => "Shutdown",
    }
}
