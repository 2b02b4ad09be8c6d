//! # p4rpc-protocol
//!
//! Wire protocol implementation for the Perforce RPC client engine.
//!
//! This crate provides:
//! - Binary packet framing with a checksummed length preamble
//! - The function registry and its categories
//! - Strict UTF-8 validation and charset codecs
//! - Line-ending modes and file type decoding
//! - Server message decoding and format interpolation

pub mod charset;
pub mod codec;
pub mod error;
pub mod file_type;
pub mod function;
pub mod line_ending;
pub mod message;
pub mod packet;
pub mod result_map;
pub mod utf8;

pub use charset::{codec_for, CharsetContext, TextCodec, Utf8Codec, CHARSET_NAMES};
pub use codec::{PacketDecoder, PacketEncoder};
pub use error::{CharsetError, FunctionError, ProtocolError, Utf8ErrorKind};
pub use file_type::FileType;
pub use function::{category_of, Category, FunctionSpec};
pub use line_ending::{decode_line_ending, LineEnding, Terminator, UnitLayout};
pub use message::{MessageCode, ServerMessage, Severity};
pub use packet::{Decoded, Field, Packet, Preamble, FUNCTION_FIELD, PREAMBLE_SIZE};
pub use result_map::{ResultMap, ResultValue};

/// Default server port.
pub const DEFAULT_PORT: u16 = 1666;

/// Maximum packet payload size (256 MiB).
pub const MAX_PAYLOAD_SIZE: u32 = 256 * 1024 * 1024;
