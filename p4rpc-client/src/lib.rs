//! # p4rpc-client
//!
//! Client side of the Perforce RPC protocol.
//!
//! This crate provides:
//! - Plain TCP and TLS transports, with optional stream compression
//! - A connection that frames packets over any async byte stream
//! - The protocol negotiation state machine and packet dispatcher
//! - Per-command session environments with progress and cancellation
//! - Configuration from YAML and `P4*` environment variables

pub mod address;
pub mod client;
pub mod compression;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod negotiation;
pub mod session;
pub mod stream;
pub mod tls;

#[cfg(test)]
pub(crate) mod testing;

pub use address::ServerAddress;
pub use client::Client;
pub use config::{CharsetConfig, Config, ConfigError, ProtocolConfig, ServerConfig, TlsConfig};
pub use connection::{Connection, ConnectionState, ConnectionStats};
pub use dispatch::{dispatch, DispatchOutcome};
pub use error::{ClientError, ErrorClass};
pub use negotiation::{Capabilities, ControlAction, NegotiationState, Negotiator};
pub use session::{CommandEnvironment, ProgressCallback, ResultHandler};
pub use stream::ClientStream;
