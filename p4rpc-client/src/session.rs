//! Command session environment.
//!
//! A [`CommandEnvironment`] lives for one user command. It holds the
//! command's correlation key, the capabilities negotiated so far and an
//! optional progress callback, and drives the dispatch loop through
//! [`CommandEnvironment::poll`].
//!
//! `stop(key)` fires exactly once per command: on release, on cancel, or
//! when the environment is dropped on any other path.

use crate::connection::Connection;
use crate::dispatch::{dispatch, DispatchOutcome};
use crate::error::ClientError;
use crate::negotiation::{Capabilities, NegotiationState, Negotiator};
use p4rpc_protocol::{
    Field, FunctionError, FunctionSpec, Packet, ResultMap, ResultValue, ServerMessage,
};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};

/// Progress and cancellation hooks for a command.
pub trait ProgressCallback: Send + Sync {
    fn start(&self, _key: u32) {}

    /// Called before each inbound packet is processed; `marker` is its
    /// function name. Returning `false` cancels the command.
    fn tick(&self, _key: u32, _marker: Option<&str>) -> bool {
        true
    }

    fn stop(&self, _key: u32) {}
}

/// Receives flattened results as they stream in.
pub trait ResultHandler {
    /// Returning `false` cancels the command.
    fn handle_result(&mut self, result: ResultMap) -> bool;
}

impl<F> ResultHandler for F
where
    F: FnMut(ResultMap) -> bool,
{
    fn handle_result(&mut self, result: ResultMap) -> bool {
        self(result)
    }
}

/// Per-command state bound to one connection.
pub struct CommandEnvironment<'c, S> {
    pub(crate) conn: &'c mut Connection<S>,
    pub(crate) capabilities: Capabilities,
    pub(crate) negotiator: Negotiator,
    key: u32,
    progress: Option<Arc<dyn ProgressCallback>>,
    messages: Vec<ServerMessage>,
    stopped: bool,
    released: bool,
    cancel_requested: bool,
}

impl<'c, S> CommandEnvironment<'c, S> {
    pub(crate) fn open(
        conn: &'c mut Connection<S>,
        progress: Option<Arc<dyn ProgressCallback>>,
    ) -> Self {
        let key = conn.state().allocate_key();
        tracing::debug!("Opening command {}", key);
        if let Some(ref progress) = progress {
            progress.start(key);
        }

        Self {
            conn,
            capabilities: Capabilities::new(),
            negotiator: Negotiator::new(),
            key,
            progress,
            messages: Vec::new(),
            stopped: false,
            released: false,
            cancel_requested: false,
        }
    }

    /// Correlation key, unique among open commands on the connection.
    pub fn key(&self) -> u32 {
        self.key
    }

    pub fn connection(&self) -> &Connection<S> {
        &*self.conn
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    pub fn capabilities_mut(&mut self) -> &mut Capabilities {
        &mut self.capabilities
    }

    pub fn capability(&self, name: &str) -> Option<&ResultValue> {
        self.capabilities.get(name)
    }

    /// A capability's value, if it is text.
    pub fn capability_str(&self, name: &str) -> Option<&str> {
        self.capabilities.get(name).and_then(ResultValue::as_str)
    }

    pub fn progress(&self) -> Option<&Arc<dyn ProgressCallback>> {
        self.progress.as_ref()
    }

    pub fn state(&self) -> NegotiationState {
        self.negotiator.state()
    }

    /// Every server message seen so far.
    pub fn messages(&self) -> &[ServerMessage] {
        &self.messages
    }

    /// Messages of failed or fatal severity.
    pub fn errors(&self) -> Vec<ServerMessage> {
        self.messages.iter().filter(|m| m.is_error()).cloned().collect()
    }

    /// Whether the server reported the command as failed.
    pub fn failed(&self) -> bool {
        self.messages.iter().any(ServerMessage::is_error)
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Asks for the command to be torn down before the next packet.
    pub fn request_cancel(&mut self) {
        self.cancel_requested = true;
    }

    pub(crate) fn record_messages(&mut self, messages: Vec<ServerMessage>) {
        self.messages.extend(messages);
    }

    /// Completes the command after the server's `release`.
    pub(crate) fn release(&mut self) {
        self.conn.state().merge_capabilities(&self.capabilities);
        self.negotiator.close();
        self.released = true;
        self.fire_stop();
        tracing::debug!("Command {} released", self.key);
    }

    fn fire_stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        if let Some(ref progress) = self.progress {
            progress.stop(self.key);
        }
    }
}

impl<'c, S> CommandEnvironment<'c, S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Sends `spec` with `fields` in the given order.
    pub async fn send(
        &mut self,
        spec: FunctionSpec,
        fields: impl IntoIterator<Item = Field>,
    ) -> Result<(), ClientError> {
        if spec == FunctionSpec::UserSpecified {
            // Has no wire name of its own; use `send_packet` with the real one.
            return Err(FunctionError::Unknown(spec.encode().to_string()).into());
        }

        let mut packet = Packet::new(spec.encode());
        for field in fields {
            packet.push(field.name, field.value);
        }
        self.send_packet(&packet).await
    }

    pub async fn send_packet(&mut self, packet: &Packet) -> Result<(), ClientError> {
        self.conn.send_packet(packet).await
    }

    /// Reads and dispatches the next packet.
    ///
    /// Call repeatedly until the outcome is `StopNormal` or `Error`. A
    /// released command reports `StopNormal` even when the server sent
    /// failed or fatal messages, so callers check [`failed`](Self::failed)
    /// afterwards.
    pub async fn poll(&mut self) -> DispatchOutcome {
        match self.try_poll().await {
            Ok(outcome) => outcome,
            Err(e) => {
                if e.is_connection_fatal() {
                    self.conn.mark_unusable();
                }
                self.fire_stop();
                DispatchOutcome::Error(e)
            }
        }
    }

    async fn try_poll(&mut self) -> Result<DispatchOutcome, ClientError> {
        if self.released {
            return Ok(DispatchOutcome::StopNormal);
        }
        if self.cancel_requested {
            return Err(self.cancel().await);
        }

        let packet = self.conn.recv_packet().await?;
        let spec = FunctionSpec::decode(packet.function(), false).map_err(|e| {
            tracing::error!("Server sent {}", e);
            ClientError::ProtocolViolation(e.to_string())
        })?;

        let proceed = self
            .progress
            .as_ref()
            .map_or(true, |p| p.tick(self.key, Some(packet.function())));
        if !proceed {
            return Err(self.cancel().await);
        }

        dispatch(spec, self, packet).await
    }

    /// Tears the command down with `release2`.
    async fn cancel(&mut self) -> ClientError {
        tracing::warn!("Cancelling command {}", self.key);
        let release2 = Packet::new(FunctionSpec::ProtocolRelease2.encode());
        if let Err(e) = self.conn.send_packet(&release2).await {
            tracing::debug!("Failed to send release2: {}", e);
        }
        // Server output for this command may still be in flight.
        self.conn.mark_unusable();
        self.fire_stop();
        ClientError::Cancelled
    }
}

impl<S> Drop for CommandEnvironment<'_, S> {
    fn drop(&mut self) {
        self.fire_stop();
        self.conn.state().release_key(self.key);
    }
}
