//! Streaming encoder and decoder for packets.

use crate::error::ProtocolError;
use crate::packet::Packet;
use bytes::{Bytes, BytesMut};

/// Encodes packets into wire bytes.
pub struct PacketEncoder;

impl PacketEncoder {
    /// Encodes a single packet.
    pub fn encode(packet: &Packet) -> Result<BytesMut, ProtocolError> {
        packet.encode()
    }

    /// Encodes several packets back to back into one buffer.
    pub fn encode_all<'a>(
        packets: impl IntoIterator<Item = &'a Packet>,
    ) -> Result<BytesMut, ProtocolError> {
        let mut buf = BytesMut::new();
        for packet in packets {
            packet.encode_into(&mut buf)?;
        }
        Ok(buf)
    }
}

/// Buffers transport reads and yields whole packets.
pub struct PacketDecoder {
    buffer: BytesMut,
}

impl PacketDecoder {
    pub fn new() -> Self {
        Self::with_capacity(8192)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(capacity),
        }
    }

    /// Appends data to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Appends bytes to the internal buffer.
    pub fn extend_bytes(&mut self, data: Bytes) {
        self.buffer.extend_from_slice(&data);
    }

    /// Attempts to decode the next packet from the buffer.
    ///
    /// `Ok(None)` means more bytes are needed; an error means the stream
    /// can no longer be trusted.
    pub fn decode_packet(&mut self) -> Result<Option<Packet>, ProtocolError> {
        Packet::decode_buf(&mut self.buffer)
    }

    /// Returns the number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Removes and returns everything buffered but not yet decoded.
    pub fn take_buffered(&mut self) -> BytesMut {
        self.buffer.split()
    }

    /// Clears the internal buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for PacketDecoder {
    fn default() -> Self {
        Self::new()
    }
}
