//! High-level client API.

use crate::config::Config;
use crate::connection::Connection;
use crate::dispatch::DispatchOutcome;
use crate::error::ClientError;
use crate::session::{ProgressCallback, ResultHandler};
use crate::stream::ClientStream;
use p4rpc_protocol::{FunctionSpec, Packet, ResultMap, TextCodec};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};

/// Operating system family reported to the server.
pub const OS_NAME: &str = if cfg!(windows) { "NT" } else { "UNIX" };

/// Wire charset name that means "not a unicode server".
const NO_CHARSET: &str = "none";

/// High-level client: one connection plus the configuration that shapes
/// every command sent on it.
pub struct Client<S = ClientStream> {
    conn: Connection<S>,
    config: Config,
    progress: Option<Arc<dyn ProgressCallback>>,
}

impl Client<ClientStream> {
    /// Connects to the configured server.
    pub async fn connect(config: Config) -> Result<Self, ClientError> {
        let charset = config.charset.context()?;
        let conn = Connection::connect(&config.server, charset).await?;
        Ok(Self::new(conn, config))
    }
}

impl<S> Client<S> {
    pub fn new(conn: Connection<S>, config: Config) -> Self {
        Self {
            conn,
            config,
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressCallback>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn connection(&self) -> &Connection<S> {
        &self.conn
    }

    pub fn connection_mut(&mut self) -> &mut Connection<S> {
        &mut self.conn
    }

    /// Returns whether commands can still be sent.
    pub fn is_usable(&self) -> bool {
        self.conn.is_usable()
    }

    // =========================================================================
    // Packet construction
    // =========================================================================

    /// Builds the `protocol` packet that opens every command.
    pub fn protocol_packet(&self) -> Result<Packet, ClientError> {
        let protocol = &self.config.protocol;
        let server = &self.config.server;
        let codec = self.conn.charset().wire();

        let mut packet = Packet::new(FunctionSpec::ProtocolProtocol.encode());
        packet.push("cmpfile", "");
        packet.push_text("client", &protocol.client_level.to_string(), codec)?;
        packet.push_text("api", &protocol.api_level.to_string(), codec)?;
        if protocol.enable_streams {
            packet.push("enableStreams", "");
        }
        packet.push_text("host", &self.host_name(), codec)?;
        packet.push_text("port", &server.port, codec)?;
        packet.push_text("sndbuf", &server.sndbuf.to_string(), codec)?;
        packet.push_text("rcvbuf", &server.rcvbuf.to_string(), codec)?;
        if let Some(ref app) = protocol.application_name {
            packet.push_text("app", app, codec)?;
        }
        Ok(packet)
    }

    /// Builds the user command packet: flags, positional arguments, then
    /// the client environment.
    pub fn command_packet(&self, command: &str, args: &[String]) -> Result<Packet, ClientError> {
        let protocol = &self.config.protocol;
        let spec = FunctionSpec::from_user_command(command, protocol.relaxed_command_names)?;
        let codec = self.conn.charset().wire();

        let mut packet = Packet::new(spec.wire_name(command));
        if protocol.tagged {
            packet.push("tag", "");
        }
        if protocol.enable_progress {
            packet.push("progress", "1");
        }
        for arg in args {
            packet.push_arg(arg, codec)?;
        }

        push_env(&mut packet, "prog", Some(protocol.program_name.as_str()), codec)?;
        push_env(&mut packet, "version", Some(protocol.program_version.as_str()), codec)?;
        push_env(&mut packet, "client", protocol.client.as_deref(), codec)?;
        push_env(&mut packet, "cwd", self.working_dir().as_deref(), codec)?;
        push_env(&mut packet, "host", Some(self.host_name().as_str()), codec)?;
        push_env(&mut packet, "os", Some(OS_NAME), codec)?;
        push_env(&mut packet, "user", protocol.user.as_deref(), codec)?;
        let charset = self.config.charset.wire.as_str();
        if charset != NO_CHARSET {
            push_env(&mut packet, "charset", Some(charset), codec)?;
        }
        Ok(packet)
    }

    fn host_name(&self) -> String {
        self.config
            .protocol
            .host
            .clone()
            .or_else(|| std::env::var("HOSTNAME").ok())
            .or_else(|| std::env::var("COMPUTERNAME").ok())
            .unwrap_or_else(|| "localhost".to_string())
    }

    fn working_dir(&self) -> Option<String> {
        self.config
            .protocol
            .cwd
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .map(|p| p.to_string_lossy().into_owned())
    }
}

fn push_env(
    packet: &mut Packet,
    name: &str,
    value: Option<&str>,
    codec: &dyn TextCodec,
) -> Result<(), ClientError> {
    if let Some(value) = value {
        packet.push_text(name, value, codec)?;
    }
    Ok(())
}

impl<S> Client<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    // =========================================================================
    // Commands
    // =========================================================================

    /// Runs a command and collects every result.
    pub async fn run(
        &mut self,
        command: &str,
        args: &[String],
    ) -> Result<Vec<ResultMap>, ClientError> {
        self.run_command(command, args, None).await
    }

    /// Runs a command, streaming each result to `handler`.
    pub async fn run_with_handler(
        &mut self,
        command: &str,
        args: &[String],
        handler: &mut dyn ResultHandler,
    ) -> Result<(), ClientError> {
        self.run_command(command, args, Some(handler)).await.map(|_| ())
    }

    /// Sends the capability and command packets, then polls until the
    /// server releases the command.
    ///
    /// Results go to `handler` when one is given and are collected
    /// otherwise. A failed or fatal server message turns a normal release
    /// into [`ClientError::Server`].
    pub async fn run_command(
        &mut self,
        command: &str,
        args: &[String],
        mut handler: Option<&mut dyn ResultHandler>,
    ) -> Result<Vec<ResultMap>, ClientError> {
        // Both packets are built first so a bad argument never reaches the wire.
        let protocol = self.protocol_packet()?;
        let request = self.command_packet(command, args)?;
        tracing::debug!("Running {} with {} args", request.function(), args.len());

        let mut env = self.conn.open_command(self.progress.clone())?;
        env.send_packet(&protocol).await?;
        env.send_packet(&request).await?;

        let mut results = Vec::new();
        loop {
            match env.poll().await {
                DispatchOutcome::Continue => {}
                DispatchOutcome::Routed(map) => match handler.as_mut() {
                    Some(handler) => {
                        if !handler.handle_result(map) {
                            env.request_cancel();
                        }
                    }
                    None => results.push(map),
                },
                DispatchOutcome::StopNormal => break,
                DispatchOutcome::Error(e) => return Err(e),
            }
        }

        if env.failed() {
            return Err(ClientError::Server(env.errors()));
        }
        Ok(results)
    }

    /// Tears down a command whose future was dropped mid-flight.
    ///
    /// Sends `release2` if the stream still accepts writes, then closes the
    /// connection, which cannot be reused.
    pub async fn abort(&mut self) -> Result<(), ClientError> {
        if self.conn.is_usable() {
            let release2 = Packet::new(FunctionSpec::ProtocolRelease2.encode());
            if let Err(e) = self.conn.send_packet(&release2).await {
                tracing::debug!("Failed to send release2: {}", e);
            }
        }
        self.conn.close().await
    }

    /// Closes the connection.
    pub async fn close(&mut self) -> Result<(), ClientError> {
        self.conn.close().await
    }
}
