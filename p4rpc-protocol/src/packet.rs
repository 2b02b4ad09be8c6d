//! Binary packet format.
//!
//! Packet layout (5 bytes preamble + payload):
//!
//! ```text
//! +----------+------------------------+
//! | checksum | payload_len (LE u32)   |
//! | 1 byte   | 4 bytes                |
//! +----------+------------------------+
//! | field* ...  func field            |
//! +-----------------------------------+
//!
//! field:
//! +------------+------+----------------+-------------+------+
//! | name bytes | 0x00 | value_len (LE) | value bytes | 0x00 |
//! +------------+------+----------------+-------------+------+
//! ```
//!
//! The checksum is the XOR of the four length bytes. The function name is
//! carried as the field `func` and is always written last.

use crate::charset::TextCodec;
use crate::error::{CharsetError, ProtocolError};
use crate::result_map::ResultMap;
use crate::utf8;
use crate::MAX_PAYLOAD_SIZE;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Size of the packet preamble in bytes.
pub const PREAMBLE_SIZE: usize = 5;

/// Field carrying the function name.
pub const FUNCTION_FIELD: &str = "func";

/// Length prefix and checksum in front of every packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Preamble {
    pub length: u32,
}

impl Preamble {
    pub fn new(length: u32) -> Self {
        Self { length }
    }

    fn checksum(len: [u8; 4]) -> u8 {
        len[0] ^ len[1] ^ len[2] ^ len[3]
    }

    pub fn encode(&self) -> [u8; PREAMBLE_SIZE] {
        let len = self.length.to_le_bytes();
        [Self::checksum(len), len[0], len[1], len[2], len[3]]
    }

    /// Parses and validates a preamble.
    pub fn decode(bytes: [u8; PREAMBLE_SIZE]) -> Result<Self, ProtocolError> {
        let len = [bytes[1], bytes[2], bytes[3], bytes[4]];
        let expected = Self::checksum(len);
        if bytes[0] != expected {
            return Err(ProtocolError::ChecksumMismatch {
                expected,
                actual: bytes[0],
            });
        }
        Ok(Self::new(u32::from_le_bytes(len)))
    }
}

/// One named field. Positional arguments have an empty name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub value: Bytes,
}

impl Field {
    pub fn new(name: impl Into<String>, value: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Decodes the value as text with the given codec.
    pub fn text(&self, codec: &dyn TextCodec) -> Result<String, CharsetError> {
        codec.decode(&self.value)
    }

    fn encoded_len(&self) -> usize {
        field_len(self.name.len(), self.value.len())
    }
}

fn field_len(name_len: usize, value_len: usize) -> usize {
    name_len + 1 + 4 + value_len + 1
}

/// Result of decoding from a byte slice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A whole packet and the number of bytes it occupied.
    Complete { packet: Packet, consumed: usize },
    /// The buffer holds a partial packet.
    NeedMore { needed: usize },
}

/// A function name plus its fields in wire order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    function: String,
    fields: Vec<Field>,
}

impl Packet {
    pub fn new(function: impl Into<String>) -> Self {
        Self {
            function: function.into(),
            fields: Vec::new(),
        }
    }

    pub fn function(&self) -> &str {
        &self.function
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn into_fields(self) -> Vec<Field> {
        self.fields
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Appends a raw field.
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<Bytes>) {
        self.fields.push(Field::new(name, value));
    }

    /// Appends a text field encoded with `codec`.
    pub fn push_text(
        &mut self,
        name: impl Into<String>,
        text: &str,
        codec: &dyn TextCodec,
    ) -> Result<(), CharsetError> {
        let value = codec.encode(text)?;
        self.push(name, value);
        Ok(())
    }

    /// Appends a nameless positional argument.
    pub fn push_arg(&mut self, text: &str, codec: &dyn TextCodec) -> Result<(), CharsetError> {
        self.push_text("", text, codec)
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Bytes>) -> Self {
        self.push(name, value);
        self
    }

    pub fn with_text(
        mut self,
        name: impl Into<String>,
        text: &str,
        codec: &dyn TextCodec,
    ) -> Result<Self, CharsetError> {
        self.push_text(name, text, codec)?;
        Ok(self)
    }

    /// First value for `name`.
    pub fn get(&self, name: &str) -> Option<&Bytes> {
        self.fields.iter().find(|f| f.name == name).map(|f| &f.value)
    }

    /// Every value for `name`, in wire order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Bytes> + 'a {
        self.fields
            .iter()
            .filter(move |f| f.name == name)
            .map(|f| &f.value)
    }

    /// First value for `name` if it is well-formed UTF-8.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(|v| utf8::decode(v).ok())
    }

    /// First value for `name` decoded with `codec`.
    pub fn text(&self, name: &str, codec: &dyn TextCodec) -> Result<Option<String>, CharsetError> {
        self.get(name).map(|v| codec.decode(v)).transpose()
    }

    /// Flattens the packet into a key-addressable map.
    ///
    /// The function name is entered first, so a stray `func` field later in
    /// the packet lands under `func0`.
    pub fn to_result_map(&self, codec: &dyn TextCodec) -> ResultMap {
        let mut map = ResultMap::new();
        map.insert(FUNCTION_FIELD, self.function.clone());
        map.extend_fields(&self.fields, codec);
        map
    }

    fn payload_len(&self) -> usize {
        self.fields.iter().map(Field::encoded_len).sum::<usize>()
            + field_len(FUNCTION_FIELD.len(), self.function.len())
    }

    /// Total bytes this packet occupies on the wire.
    pub fn encoded_len(&self) -> usize {
        PREAMBLE_SIZE + self.payload_len()
    }

    /// Encodes the packet into a fresh buffer.
    pub fn encode(&self) -> Result<BytesMut, ProtocolError> {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_into(&mut buf)?;
        Ok(buf)
    }

    /// Appends the encoded packet to `buf`.
    pub fn encode_into(&self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        let payload_len = self.payload_len();
        if payload_len > MAX_PAYLOAD_SIZE as usize {
            return Err(ProtocolError::PacketTooLarge {
                size: payload_len as u64,
                max: MAX_PAYLOAD_SIZE,
            });
        }

        buf.reserve(PREAMBLE_SIZE + payload_len);
        buf.put_slice(&Preamble::new(payload_len as u32).encode());

        for field in &self.fields {
            put_field(buf, field.name.as_bytes(), &field.value);
        }
        put_field(buf, FUNCTION_FIELD.as_bytes(), self.function.as_bytes());

        Ok(())
    }

    /// Decodes one packet from the front of `buf` without consuming it.
    pub fn decode(buf: &[u8]) -> Result<Decoded, ProtocolError> {
        let total = match Self::frame_len(buf)? {
            Ok(total) => total,
            Err(needed) => return Ok(Decoded::NeedMore { needed }),
        };
        let payload = Bytes::copy_from_slice(&buf[PREAMBLE_SIZE..total]);
        Ok(Decoded::Complete {
            packet: Self::parse_payload(payload)?,
            consumed: total,
        })
    }

    /// Decodes one packet, consuming it from `buf`.
    ///
    /// Returns `Ok(Some(packet))` if a complete packet was decoded,
    /// `Ok(None)` if more data is needed, or `Err` on framing errors.
    pub fn decode_buf(buf: &mut BytesMut) -> Result<Option<Self>, ProtocolError> {
        let total = match Self::frame_len(buf)? {
            Ok(total) => total,
            Err(_) => return Ok(None),
        };
        let mut frame = buf.split_to(total);
        frame.advance(PREAMBLE_SIZE);
        Self::parse_payload(frame.freeze()).map(Some)
    }

    /// Validates the preamble and returns the full frame length, or the
    /// number of missing bytes.
    fn frame_len(buf: &[u8]) -> Result<Result<usize, usize>, ProtocolError> {
        if buf.len() < PREAMBLE_SIZE {
            return Ok(Err(PREAMBLE_SIZE - buf.len()));
        }

        let preamble = Preamble::decode([buf[0], buf[1], buf[2], buf[3], buf[4]])?;
        if preamble.length == 0 {
            return Err(ProtocolError::EmptyPayload);
        }
        if preamble.length > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PacketTooLarge {
                size: preamble.length as u64,
                max: MAX_PAYLOAD_SIZE,
            });
        }

        let total = PREAMBLE_SIZE + preamble.length as usize;
        if buf.len() < total {
            return Ok(Err(total - buf.len()));
        }
        Ok(Ok(total))
    }

    fn parse_payload(payload: Bytes) -> Result<Self, ProtocolError> {
        let mut fields = Vec::new();
        let mut function = None;
        let mut pos = 0;

        while pos < payload.len() {
            let start = pos;

            let name_len = payload[pos..]
                .iter()
                .position(|&b| b == 0)
                .ok_or(ProtocolError::TruncatedField { offset: start })?;
            let name = utf8::decode(&payload[pos..pos + name_len])
                .map_err(|_| ProtocolError::InvalidFieldName { offset: start })?
                .to_owned();
            pos += name_len + 1;

            if payload.len() - pos < 4 {
                return Err(ProtocolError::TruncatedField { offset: start });
            }
            let value_len = u32::from_le_bytes([
                payload[pos],
                payload[pos + 1],
                payload[pos + 2],
                payload[pos + 3],
            ]) as usize;
            pos += 4;

            // The value is followed by one terminator byte.
            if value_len >= payload.len() - pos {
                return Err(ProtocolError::TruncatedField { offset: start });
            }
            let end = pos + value_len;
            if payload[end] != 0 {
                return Err(ProtocolError::MissingTerminator { offset: start });
            }
            let value = payload.slice(pos..end);
            pos = end + 1;

            if name == FUNCTION_FIELD && function.is_none() {
                let func = utf8::decode(&value).map_err(|_| ProtocolError::InvalidFunctionName)?;
                function = Some(func.to_owned());
            } else {
                fields.push(Field { name, value });
            }
        }

        Ok(Self {
            function: function.ok_or(ProtocolError::MissingFunction)?,
            fields,
        })
    }
}

fn put_field(buf: &mut BytesMut, name: &[u8], value: &[u8]) {
    buf.put_slice(name);
    buf.put_u8(0);
    buf.put_u32_le(value.len() as u32);
    buf.put_slice(value);
    buf.put_u8(0);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::charset::Utf8Codec;
    use proptest::prelude::*;

    /// A server "protocol" packet captured from a live server.
    const PROTOCOL_PAYLOAD: &[u8] = &[
        120, 102, 105, 108, 101, 115, 0, 1, 0, 0, 0, 55, 0, 115, 101, 114, 118, 101, 114, 0, 1, 0,
        0, 0, 51, 0, 115, 101, 114, 118, 101, 114, 50, 0, 2, 0, 0, 0, 52, 49, 0, 115, 101, 114, 118,
        101, 114, 73, 68, 0, 0, 0, 0, 0, 0, 114, 101, 118, 118, 101, 114, 0, 1, 0, 0, 0, 57, 0, 116,
        122, 111, 102, 102, 115, 101, 116, 0, 4, 0, 0, 0, 55, 50, 48, 48, 0, 115, 110, 100, 98, 117,
        102, 0, 6, 0, 0, 0, 51, 49, 57, 52, 56, 55, 0, 114, 99, 118, 98, 117, 102, 0, 6, 0, 0, 0, 51,
        49, 57, 52, 56, 56, 0, 102, 117, 110, 99, 0, 8, 0, 0, 0, 112, 114, 111, 116, 111, 99, 111,
        108, 0,
    ];

    fn captured_packet() -> Vec<u8> {
        let mut bytes = vec![0x8c, 0x8c, 0, 0, 0];
        bytes.extend_from_slice(PROTOCOL_PAYLOAD);
        bytes
    }

    #[test]
    fn test_preamble_checksum() {
        let preamble = Preamble::new(140);
        assert_eq!(preamble.encode(), [0x8c, 0x8c, 0, 0, 0]);
        assert_eq!(Preamble::decode([0x8c, 0x8c, 0, 0, 0]).unwrap(), preamble);

        let encoded = Preamble::new(0x0102_0304).encode();
        assert_eq!(encoded, [0x04, 0x04, 0x03, 0x02, 0x01]);
    }

    #[test]
    fn test_decode_captured_packet() {
        let bytes = captured_packet();
        let Decoded::Complete { packet, consumed } = Packet::decode(&bytes).unwrap() else {
            panic!("expected a complete packet");
        };

        assert_eq!(consumed, bytes.len());
        assert_eq!(packet.function(), "protocol");
        let names: Vec<_> = packet.fields().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(
            names,
            ["xfiles", "server", "server2", "serverID", "revver", "tzoffset", "sndbuf", "rcvbuf"]
        );
        assert_eq!(packet.get_str("server2"), Some("41"));
        assert_eq!(packet.get_str("serverID"), Some(""));
        assert_eq!(packet.get_str("tzoffset"), Some("7200"));
    }

    #[test]
    fn test_encode_is_bit_exact() {
        let packet = Packet::new("protocol")
            .with_field("xfiles", "7")
            .with_field("server", "3")
            .with_field("server2", "41")
            .with_field("serverID", "")
            .with_field("revver", "9")
            .with_field("tzoffset", "7200")
            .with_field("sndbuf", "319487")
            .with_field("rcvbuf", "319488");

        let encoded = packet.encode().unwrap();
        assert_eq!(encoded.as_ref(), captured_packet().as_slice());
        assert_eq!(packet.encoded_len(), encoded.len());
    }

    #[test]
    fn test_incomplete_packet() {
        let bytes = captured_packet();

        assert_eq!(
            Packet::decode(&bytes[..3]).unwrap(),
            Decoded::NeedMore { needed: 2 }
        );
        assert_eq!(
            Packet::decode(&bytes[..100]).unwrap(),
            Decoded::NeedMore {
                needed: bytes.len() - 100
            }
        );

        let mut buf = BytesMut::from(&bytes[..50]);
        assert!(Packet::decode_buf(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 50);
    }

    #[test]
    fn test_checksum_mismatch() {
        let mut bytes = captured_packet();
        bytes[0] = 0;
        let result = Packet::decode(&bytes);
        assert!(matches!(
            result,
            Err(ProtocolError::ChecksumMismatch {
                expected: 0x8c,
                actual: 0
            })
        ));
    }

    #[test]
    fn test_empty_payload() {
        let result = Packet::decode(&[0, 0, 0, 0, 0]);
        assert!(matches!(result, Err(ProtocolError::EmptyPayload)));
    }

    #[test]
    fn test_packet_too_large() {
        let preamble = Preamble::new(MAX_PAYLOAD_SIZE + 1).encode();
        let result = Packet::decode(&preamble);
        assert!(matches!(result, Err(ProtocolError::PacketTooLarge { .. })));
    }

    #[test]
    fn test_truncated_field() {
        // Declared value length runs past the payload.
        let payload = b"func\0\x09\0\0\0protocol\0";
        let mut bytes = Preamble::new(payload.len() as u32).encode().to_vec();
        bytes.extend_from_slice(payload);
        assert!(matches!(
            Packet::decode(&bytes),
            Err(ProtocolError::TruncatedField { offset: 0 })
        ));
    }

    #[test]
    fn test_missing_terminator() {
        let payload = b"func\0\x08\0\0\0protocolX";
        let mut bytes = Preamble::new(payload.len() as u32).encode().to_vec();
        bytes.extend_from_slice(payload);
        assert!(matches!(
            Packet::decode(&bytes),
            Err(ProtocolError::MissingTerminator { offset: 0 })
        ));
    }

    #[test]
    fn test_missing_function() {
        let payload = b"a\0\x01\0\0\0b\0";
        let mut bytes = Preamble::new(payload.len() as u32).encode().to_vec();
        bytes.extend_from_slice(payload);
        assert!(matches!(
            Packet::decode(&bytes),
            Err(ProtocolError::MissingFunction)
        ));
    }

    #[test]
    fn test_duplicate_fields_keep_order() {
        let packet = Packet::new("client-Message")
            .with_field("fmt0", "first")
            .with_field("code0", "1")
            .with_field("fmt0", "second");
        let encoded = packet.encode().unwrap();

        let mut buf = BytesMut::from(&encoded[..]);
        let decoded = Packet::decode_buf(&mut buf).unwrap().unwrap();
        let values: Vec<_> = decoded.get_all("fmt0").map(|v| v.as_ref()).collect();
        assert_eq!(values, [b"first".as_ref(), b"second".as_ref()]);
        assert_eq!(decoded.get("fmt0").unwrap().as_ref(), b"first");
    }

    #[test]
    fn test_repeated_func_field_in_result_map() {
        let mut payload = BytesMut::new();
        put_field(&mut payload, b"func", b"client-Message");
        put_field(&mut payload, b"code0", b"285219840");
        put_field(&mut payload, b"func", b"stray");
        let mut bytes = Preamble::new(payload.len() as u32).encode().to_vec();
        bytes.extend_from_slice(&payload);

        let packet = match Packet::decode(&bytes).unwrap() {
            Decoded::Complete { packet, consumed } => {
                assert_eq!(consumed, bytes.len());
                packet
            }
            other => panic!("unexpected decode result: {:?}", other),
        };
        assert_eq!(packet.function(), "client-Message");

        let map = packet.to_result_map(&Utf8Codec::default());
        assert_eq!(map.get_str("func"), Some("client-Message"));
        assert_eq!(map.get_str("func0"), Some("stray"));
        let keys: Vec<_> = map.keys().collect();
        assert_eq!(keys, ["func", "code0", "func0"]);
    }

    #[test]
    fn test_multiple_packets_in_buffer() {
        let first = Packet::new("flush1").with_field("fseq", "1");
        let second = Packet::new("release");

        let mut buf = BytesMut::new();
        first.encode_into(&mut buf).unwrap();
        second.encode_into(&mut buf).unwrap();

        assert_eq!(Packet::decode_buf(&mut buf).unwrap().unwrap(), first);
        assert_eq!(Packet::decode_buf(&mut buf).unwrap().unwrap(), second);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_positional_and_text_fields() {
        let codec = Utf8Codec::default();
        let mut packet = Packet::new("user-files");
        packet.push_arg("//depot/...", &codec).unwrap();
        packet.push_text("tag", "", &codec).unwrap();

        assert_eq!(packet.fields()[0].name, "");
        assert_eq!(packet.text("", &codec).unwrap().as_deref(), Some("//depot/..."));
        assert_eq!(packet.text("missing", &codec).unwrap(), None);
    }

    fn any_field() -> impl Strategy<Value = Field> {
        (
            "[a-zA-Z0-9]{0,10}".prop_filter("reserved", |n| n != FUNCTION_FIELD),
            proptest::collection::vec(any::<u8>(), 0..64),
        )
            .prop_map(|(name, value)| Field::new(name, value))
    }

    proptest! {
        #[test]
        fn test_packet_round_trip(
            function in "[a-z]{1,8}(-[A-Za-z]{1,12})?",
            fields in proptest::collection::vec(any_field(), 0..12),
        ) {
            let mut packet = Packet::new(function);
            for field in fields {
                packet.push(field.name, field.value);
            }

            let encoded = packet.encode().unwrap();
            match Packet::decode(&encoded).unwrap() {
                Decoded::Complete { packet: decoded, consumed } => {
                    prop_assert_eq!(consumed, encoded.len());
                    prop_assert_eq!(decoded, packet);
                }
                Decoded::NeedMore { .. } => prop_assert!(false, "packet reported incomplete"),
            }
        }
    }
}
