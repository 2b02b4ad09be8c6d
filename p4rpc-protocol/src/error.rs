//! Protocol error types.
//!
//! Errors fall into two families. [`ProtocolError`] covers framing faults:
//! once one is raised the byte boundaries of the stream can no longer be
//! trusted and the connection must be dropped. [`CharsetError`] and
//! [`FunctionError`] are local to a single field or command and leave the
//! connection usable.

use thiserror::Error;

/// Framing errors raised while encoding or decoding packets.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("preamble checksum mismatch: expected {expected:#04x}, got {actual:#04x}")]
    ChecksumMismatch { expected: u8, actual: u8 },

    #[error("packet too large: {size} bytes (max {max})")]
    PacketTooLarge { size: u64, max: u32 },

    #[error("empty packet payload")]
    EmptyPayload,

    #[error("truncated field at payload offset {offset}")]
    TruncatedField { offset: usize },

    #[error("field at payload offset {offset} is missing its null terminator")]
    MissingTerminator { offset: usize },

    #[error("field name at payload offset {offset} is not valid UTF-8")]
    InvalidFieldName { offset: usize },

    #[error("packet has no function field")]
    MissingFunction,

    #[error("function name is not valid UTF-8")]
    InvalidFunctionName,

    #[error("charset error: {0}")]
    Charset(#[from] CharsetError),
}

impl ProtocolError {
    /// Returns whether this error leaves the stream in an untrusted state.
    ///
    /// Charset failures happen before any bytes hit the wire, so they only
    /// fail the command that produced them.
    pub fn is_connection_fatal(&self) -> bool {
        !matches!(self, ProtocolError::Charset(_))
    }
}

/// Kind of malformed UTF-8 found by the strict validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Utf8ErrorKind {
    /// A byte that can never start a sequence (0x80..=0xC1, 0xF5..=0xFF).
    InvalidLeadByte,
    /// A continuation byte was expected but something else was found.
    InvalidContinuation,
    /// The input ended in the middle of a multi-byte sequence.
    Truncated,
    /// A code point encoded with more bytes than necessary.
    Overlong,
    /// A UTF-16 surrogate code point (U+D800..=U+DFFF).
    Surrogate,
    /// A code point above U+10FFFF.
    OutOfRange,
}

impl std::fmt::Display for Utf8ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Utf8ErrorKind::InvalidLeadByte => write!(f, "invalid lead byte"),
            Utf8ErrorKind::InvalidContinuation => write!(f, "invalid continuation byte"),
            Utf8ErrorKind::Truncated => write!(f, "truncated sequence"),
            Utf8ErrorKind::Overlong => write!(f, "overlong encoding"),
            Utf8ErrorKind::Surrogate => write!(f, "surrogate code point"),
            Utf8ErrorKind::OutOfRange => write!(f, "code point above U+10FFFF"),
        }
    }
}

/// Text transcoding errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CharsetError {
    #[error("unknown charset: {0}")]
    UnknownCharset(String),

    #[error("malformed UTF-8 at byte {valid_up_to}: {kind}")]
    MalformedUtf8 {
        valid_up_to: usize,
        kind: Utf8ErrorKind,
    },

    #[error("bytes are not valid {charset}")]
    Undecodable { charset: &'static str },

    #[error("character {ch:?} cannot be represented in {charset}")]
    Unmappable { charset: &'static str, ch: char },

    #[error("odd byte count {len} for {charset}")]
    OddLength { charset: &'static str, len: usize },
}

/// Function registry errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FunctionError {
    #[error("unknown function: {0}")]
    Unknown(String),

    #[error("unknown protocol function: {0}")]
    UnknownProtocol(String),
}

impl FunctionError {
    /// Returns the wire string that failed to decode.
    pub fn wire_name(&self) -> &str {
        match self {
            FunctionError::Unknown(name) | FunctionError::UnknownProtocol(name) => name,
        }
    }
}
