//! # Control Client
//!
//! Line-oriented client for the control protocol. Connecting performs the
//! `InitiateComm` handshake.
//!
//! ```rust,ignore
//! let mut client = ControlClient::connect(addr, "C1").await?;
//! let reply = client.register_service("svc.echo", None, Properties::new()).await?;
//! ```

use std::collections::VecDeque;
use std::net::SocketAddr;

use shared_types::{ControlCommand, Envelope, Properties};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::debug;

use crate::error::ControllerError;
use crate::handler::{INIT_KEY, INTERFACE_NAME_KEY, SERVICE_CLASS_KEY, SERVICE_CONFIG_KEY};

pub struct ControlClient {
    client_id: String,
    local_addr: SocketAddr,
    reader: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
    /// Envelopes read while waiting for a specific reply.
    backlog: VecDeque<Envelope>,
}

impl ControlClient {
    /// Connect and handshake as `client_id`.
    pub async fn connect(
        addr: SocketAddr,
        client_id: impl Into<String>,
    ) -> Result<Self, ControllerError> {
        let stream = TcpStream::connect(addr).await?;
        let local_addr = stream.local_addr()?;
        let (read_half, writer) = stream.into_split();
        let mut client = Self {
            client_id: client_id.into(),
            local_addr,
            reader: BufReader::new(read_half).lines(),
            writer,
            backlog: VecDeque::new(),
        };

        let hello = Envelope::command(ControlCommand::InitiateComm).with_client(&client.client_id);
        let reply = client.request(hello).await?;
        if reply.get::<bool>(INIT_KEY) != Some(true) {
            return Err(ControllerError::Handshake(reply.errors.join("; ")));
        }
        debug!(client = %client.client_id, "[ControlClient] Connected");
        Ok(client)
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Local address of this connection.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Write one envelope.
    pub async fn send(&mut self, envelope: &Envelope) -> Result<(), ControllerError> {
        let mut line = envelope.to_json_line()?;
        line.push('\n');
        self.writer.write_all(line.as_bytes()).await?;
        Ok(())
    }

    /// Write a raw line (no newline appended beyond the one given).
    pub async fn send_raw(&mut self, line: &str) -> Result<(), ControllerError> {
        self.writer.write_all(line.as_bytes()).await?;
        Ok(())
    }

    /// Next envelope from the controller. `None` once the connection closed.
    pub async fn recv(&mut self) -> Result<Option<Envelope>, ControllerError> {
        if let Some(envelope) = self.backlog.pop_front() {
            return Ok(Some(envelope));
        }
        self.read_envelope().await
    }

    async fn read_envelope(&mut self) -> Result<Option<Envelope>, ControllerError> {
        match self.reader.next_line().await? {
            Some(line) => Ok(Some(Envelope::from_json_line(&line)?)),
            None => Ok(None),
        }
    }

    /// Send `envelope` and wait for the reply carrying the same id.
    pub async fn request(&mut self, envelope: Envelope) -> Result<Envelope, ControllerError> {
        let id = envelope.id;
        self.send(&envelope).await?;
        loop {
            match self.read_envelope().await? {
                Some(reply) if reply.id == id => return Ok(reply),
                Some(other) => self.backlog.push_back(other),
                None => return Err(ControllerError::ConnectionClosed),
            }
        }
    }

    /// Send a bare control command and wait for its reply.
    pub async fn command(&mut self, command: ControlCommand) -> Result<Envelope, ControllerError> {
        let envelope = Envelope::command(command).with_client(&self.client_id);
        self.request(envelope).await
    }

    pub async fn register_service(
        &mut self,
        service_class: &str,
        interface_name: Option<&str>,
        config: Properties,
    ) -> Result<Envelope, ControllerError> {
        let mut envelope =
            Envelope::command(ControlCommand::RegisterService).with_client(&self.client_id);
        envelope.insert(SERVICE_CLASS_KEY, service_class);
        if let Some(name) = interface_name {
            envelope.insert(INTERFACE_NAME_KEY, name);
        }
        envelope.insert(SERVICE_CONFIG_KEY, config);
        self.request(envelope).await
    }

    /// `StartService`, `StopService` or `GracefullyStopService`.
    pub async fn service_command(
        &mut self,
        command: ControlCommand,
        service_class: &str,
    ) -> Result<Envelope, ControllerError> {
        let mut envelope = Envelope::command(command).with_client(&self.client_id);
        envelope.insert(SERVICE_CLASS_KEY, service_class);
        self.request(envelope).await
    }

    /// Route `envelope` as data. Replies arrive through [`recv`](Self::recv).
    pub async fn send_data(&mut self, mut envelope: Envelope) -> Result<(), ControllerError> {
        envelope.command = Some(ControlCommand::Send);
        envelope.client = Some(self.client_id.clone());
        self.send(&envelope).await
    }

    /// Ask the controller to close this session.
    pub async fn close(mut self) -> Result<(), ControllerError> {
        let envelope = Envelope::command(ControlCommand::CloseClient).with_client(&self.client_id);
        self.send(&envelope).await?;
        self.writer.shutdown().await?;
        Ok(())
    }
}
