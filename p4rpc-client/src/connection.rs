//! Connection management.
//!
//! A connection owns one ordered byte stream. Commands run on it one at a
//! time through a [`CommandEnvironment`], while state that outlives a single
//! command (capabilities, compression, correlation keys, statistics) lives in
//! a shared [`ConnectionState`].

use crate::compression::{Deflater, Inflater};
use crate::negotiation::Capabilities;
use crate::config::ServerConfig;
use crate::error::ClientError;
use crate::session::{CommandEnvironment, ProgressCallback};
use crate::stream::ClientStream;
use p4rpc_protocol::{CharsetContext, Packet, PacketDecoder, ResultValue};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Default read buffer size (8 KiB).
pub const DEFAULT_READ_BUFFER_SIZE: usize = 8 * 1024;

/// Minimum read buffer size (1 KiB).
pub const MIN_READ_BUFFER_SIZE: usize = 1024;

/// Maximum read buffer size (1 MiB).
pub const MAX_READ_BUFFER_SIZE: usize = 1024 * 1024;

/// Capability that switches the connection to case-insensitive names.
pub const NOCASE_CAPABILITY: &str = "nocase";

/// Traffic counters for one connection.
///
/// Byte counts are packet sizes on the wire before compression.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionStats {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub largest_sent: usize,
    pub largest_received: usize,
}

impl ConnectionStats {
    fn record_sent(&mut self, len: usize) {
        self.packets_sent += 1;
        self.bytes_sent += len as u64;
        self.largest_sent = self.largest_sent.max(len);
    }

    fn record_received(&mut self, len: usize) {
        self.packets_received += 1;
        self.bytes_received += len as u64;
        self.largest_received = self.largest_received.max(len);
    }
}

/// Connection-wide state shared with every command on the connection.
#[derive(Debug)]
pub struct ConnectionState {
    usable: AtomicBool,
    compressed: AtomicBool,
    case_insensitive: AtomicBool,
    server_capabilities: RwLock<Capabilities>,
    keys: Mutex<BTreeSet<u32>>,
    stats: Mutex<ConnectionStats>,
}

impl ConnectionState {
    pub fn new() -> Self {
        Self {
            usable: AtomicBool::new(true),
            compressed: AtomicBool::new(false),
            case_insensitive: AtomicBool::new(false),
            server_capabilities: RwLock::new(Capabilities::new()),
            keys: Mutex::new(BTreeSet::new()),
            stats: Mutex::new(ConnectionStats::default()),
        }
    }

    pub fn is_usable(&self) -> bool {
        self.usable.load(Ordering::SeqCst)
    }

    /// Marks the stream as untrustworthy. There is no way back.
    pub fn mark_unusable(&self) {
        if self.usable.swap(false, Ordering::SeqCst) {
            tracing::warn!("Connection marked unusable");
        }
    }

    pub fn is_compressed(&self) -> bool {
        self.compressed.load(Ordering::SeqCst)
    }

    /// Whether the server asked for case-insensitive names.
    pub fn is_case_insensitive(&self) -> bool {
        self.case_insensitive.load(Ordering::SeqCst)
    }

    /// Capabilities retained from completed commands.
    pub fn server_capabilities(&self) -> Capabilities {
        self.server_capabilities.read().clone()
    }

    pub fn capability(&self, name: &str) -> Option<ResultValue> {
        self.server_capabilities.read().get(name).cloned()
    }

    /// A capability's value, if it is text.
    pub fn capability_str(&self, name: &str) -> Option<String> {
        self.server_capabilities
            .read()
            .get(name)
            .and_then(ResultValue::as_str)
            .map(str::to_owned)
    }

    pub(crate) fn merge_capabilities(&self, capabilities: &Capabilities) {
        if capabilities.is_empty() {
            return;
        }
        if capabilities.contains_key(NOCASE_CAPABILITY) {
            self.case_insensitive.store(true, Ordering::SeqCst);
        }
        let mut current = self.server_capabilities.write();
        for (name, value) in capabilities {
            current.insert(name.clone(), value.clone());
        }
    }

    /// Allocates the lowest correlation key not held by an open command.
    pub fn allocate_key(&self) -> u32 {
        let mut keys = self.keys.lock();
        let key = keys
            .iter()
            .enumerate()
            .find(|(i, k)| *i as u32 != **k)
            .map(|(i, _)| i as u32)
            .unwrap_or(keys.len() as u32);
        keys.insert(key);
        key
    }

    pub fn release_key(&self, key: u32) -> bool {
        self.keys.lock().remove(&key)
    }

    /// Number of commands currently holding a key.
    pub fn open_commands(&self) -> usize {
        self.keys.lock().len()
    }

    pub fn stats(&self) -> ConnectionStats {
        *self.stats.lock()
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::new()
    }
}

/// A connection to a server over any ordered byte stream.
pub struct Connection<S = ClientStream> {
    stream: S,
    decoder: PacketDecoder,
    read_buf: Vec<u8>,
    deflater: Option<Deflater>,
    inflater: Option<Inflater>,
    charset: CharsetContext,
    state: Arc<ConnectionState>,
    read_timeout: Option<Duration>,
}

impl Connection<ClientStream> {
    /// Opens a socket to the configured server.
    pub async fn connect(
        config: &ServerConfig,
        charset: CharsetContext,
    ) -> Result<Self, ClientError> {
        let stream = ClientStream::connect(config).await?;
        tracing::info!("Connected to {}", config.port);
        Ok(Self::new(stream, charset)
            .with_read_timeout(config.so_timeout())
            .with_read_buffer_size(config.rcvbuf))
    }
}

impl<S> Connection<S> {
    pub fn new(stream: S, charset: CharsetContext) -> Self {
        Self {
            stream,
            decoder: PacketDecoder::new(),
            read_buf: vec![0u8; DEFAULT_READ_BUFFER_SIZE],
            deflater: None,
            inflater: None,
            charset,
            state: Arc::new(ConnectionState::new()),
            read_timeout: None,
        }
    }

    /// Sets the per-read timeout; `None` waits forever.
    pub fn with_read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        let size = size.clamp(MIN_READ_BUFFER_SIZE, MAX_READ_BUFFER_SIZE);
        self.read_buf = vec![0u8; size];
        self
    }

    pub fn state(&self) -> &Arc<ConnectionState> {
        &self.state
    }

    pub fn charset(&self) -> &CharsetContext {
        &self.charset
    }

    pub fn is_usable(&self) -> bool {
        self.state.is_usable()
    }

    pub fn mark_unusable(&self) {
        self.state.mark_unusable();
    }

    pub fn is_compressed(&self) -> bool {
        self.state.is_compressed()
    }

    pub fn server_capabilities(&self) -> Capabilities {
        self.state.server_capabilities()
    }

    pub fn stats(&self) -> ConnectionStats {
        self.state.stats()
    }

    pub fn read_buffer_size(&self) -> usize {
        self.read_buf.len()
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    fn ensure_usable(&self) -> Result<(), ClientError> {
        if self.is_usable() {
            Ok(())
        } else {
            Err(ClientError::ConnectionUnusable)
        }
    }

    fn check<T>(&self, result: Result<T, ClientError>) -> Result<T, ClientError> {
        if let Err(ref e) = result {
            if e.is_connection_fatal() {
                tracing::debug!("Connection error: {}", e);
                self.mark_unusable();
            }
        }
        result
    }
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Begins a command on this connection.
    pub fn open_command(
        &mut self,
        progress: Option<Arc<dyn ProgressCallback>>,
    ) -> Result<CommandEnvironment<'_, S>, ClientError> {
        self.ensure_usable()?;
        Ok(CommandEnvironment::open(self, progress))
    }

    /// Writes one packet and flushes.
    pub async fn send_packet(&mut self, packet: &Packet) -> Result<(), ClientError> {
        self.ensure_usable()?;
        let encoded = packet.encode()?;
        tracing::debug!(
            "Sending {} ({} bytes, {} fields)",
            packet.function(),
            encoded.len(),
            packet.len()
        );

        let result = self.write_bytes(&encoded).await;
        self.check(result)?;
        self.state.stats.lock().record_sent(encoded.len());
        Ok(())
    }

    async fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), ClientError> {
        match self.deflater.as_mut() {
            Some(deflater) => {
                let compressed = deflater.compress(bytes)?;
                self.stream.write_all(&compressed).await?;
            }
            None => self.stream.write_all(bytes).await?,
        }
        self.stream.flush().await?;
        Ok(())
    }

    /// Reads the next whole packet.
    pub async fn recv_packet(&mut self) -> Result<Packet, ClientError> {
        self.ensure_usable()?;
        let result = self.read_packet().await;
        let packet = self.check(result)?;
        tracing::debug!("Received {} ({} fields)", packet.function(), packet.len());
        self.state
            .stats
            .lock()
            .record_received(packet.encoded_len());
        Ok(packet)
    }

    async fn read_packet(&mut self) -> Result<Packet, ClientError> {
        loop {
            if let Some(packet) = self.decoder.decode_packet()? {
                return Ok(packet);
            }

            let n = match self.read_timeout {
                Some(timeout) => tokio::time::timeout(timeout, self.stream.read(&mut self.read_buf))
                    .await
                    .map_err(|_| {
                        tracing::debug!("Read timeout");
                        ClientError::Timeout
                    })??,
                None => self.stream.read(&mut self.read_buf).await?,
            };

            if n == 0 {
                tracing::debug!("Connection closed by server");
                return Err(ClientError::ConnectionClosed);
            }

            match self.inflater.as_mut() {
                Some(inflater) => {
                    let mut plain = Vec::with_capacity(n * 4);
                    inflater.decompress(&self.read_buf[..n], &mut plain)?;
                    self.decoder.extend(&plain);
                }
                None => self.decoder.extend(&self.read_buf[..n]),
            }
        }
    }

    /// Switches both directions to the compressed stream.
    ///
    /// Bytes already buffered past the last decoded packet arrived after the
    /// switch and are inflated in place. Calling this again is a no-op.
    pub fn enable_compression(&mut self) -> Result<(), ClientError> {
        if self.deflater.is_some() {
            return Ok(());
        }

        let mut inflater = Inflater::new();
        let pending = self.decoder.take_buffered();
        if !pending.is_empty() {
            let mut plain = Vec::new();
            let result = inflater.decompress(&pending, &mut plain);
            self.check(result)?;
            self.decoder.extend(&plain);
        }

        self.deflater = Some(Deflater::new());
        self.inflater = Some(inflater);
        self.state.compressed.store(true, Ordering::SeqCst);
        tracing::info!("Stream compression enabled");
        Ok(())
    }

    /// Shuts the stream down. The connection cannot be used afterwards.
    pub async fn close(&mut self) -> Result<(), ClientError> {
        tracing::debug!("Closing connection...");
        self.mark_unusable();
        self.decoder.clear();
        self.stream.shutdown().await?;
        tracing::debug!("Connection closed");
        Ok(())
    }
}
