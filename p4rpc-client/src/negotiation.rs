//! Protocol negotiation.
//!
//! Control packets move a command through
//! `Handshaking -> Negotiated -> [CompressionPending -> CompressedActive] ->
//! Releasing -> Closed`. The [`Negotiator`] decides what each control packet
//! requires; the caller performs the I/O.

use crate::error::ClientError;
use p4rpc_protocol::{FunctionSpec, Packet, ResultValue, TextCodec};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

/// Capabilities offered by the server, keyed by name. Values the wire
/// charset cannot decode are kept as raw bytes.
pub type Capabilities = HashMap<String, ResultValue>;

/// Fields a `flush1` carries that must be echoed back in `flush2`.
pub const FLUSH_FIELDS: &[&str] = &["fseq", "himark", "rseq"];

/// Where a command is in the control sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum NegotiationState {
    Handshaking,
    Negotiated,
    CompressionPending,
    CompressedActive,
    Releasing,
    Closed,
}

impl fmt::Display for NegotiationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NegotiationState::Handshaking => "handshaking",
            NegotiationState::Negotiated => "negotiated",
            NegotiationState::CompressionPending => "compression-pending",
            NegotiationState::CompressedActive => "compressed-active",
            NegotiationState::Releasing => "releasing",
            NegotiationState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// What a control packet asks of the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlAction {
    /// Nothing to do.
    Continue,
    /// Send this packet before anything else.
    Reply(Packet),
    /// Send this packet uncompressed, then compress the stream.
    StartCompression(Packet),
    /// The server finished the command.
    Release,
}

/// Control-packet state machine for one command.
#[derive(Debug)]
pub struct Negotiator {
    state: NegotiationState,
}

impl Negotiator {
    pub fn new() -> Self {
        Self {
            state: NegotiationState::Handshaking,
        }
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    /// Handles one control packet.
    ///
    /// Capability values are copied uninterpreted into `capabilities`,
    /// as text when `codec` can decode them and as bytes otherwise.
    /// Control functions that only the client sends are violations.
    pub fn handle(
        &mut self,
        spec: FunctionSpec,
        packet: &Packet,
        capabilities: &mut Capabilities,
        codec: &dyn TextCodec,
    ) -> Result<ControlAction, ClientError> {
        match spec {
            FunctionSpec::ProtocolProtocol => {
                for field in packet.fields() {
                    let value = match codec.decode(&field.value) {
                        Ok(text) => ResultValue::Text(text),
                        Err(e) => {
                            tracing::debug!("Keeping capability {} as bytes: {}", field.name, e);
                            ResultValue::Bytes(field.value.to_vec())
                        }
                    };
                    capabilities.insert(field.name.clone(), value);
                }
                tracing::debug!("Server offered {} capabilities", packet.len());
                if self.state == NegotiationState::Handshaking {
                    self.state = NegotiationState::Negotiated;
                }
                Ok(ControlAction::Continue)
            }

            FunctionSpec::ProtocolFlush1 => {
                let mut reply = Packet::new(FunctionSpec::ProtocolFlush2.encode());
                for name in FLUSH_FIELDS {
                    if let Some(value) = packet.get(name) {
                        reply.push(*name, value.clone());
                    }
                }
                tracing::debug!("Answering flush1");
                Ok(ControlAction::Reply(reply))
            }

            FunctionSpec::ProtocolCompress1 => match self.state {
                NegotiationState::CompressionPending | NegotiationState::CompressedActive => {
                    tracing::debug!("Ignoring repeated compress1");
                    Ok(ControlAction::Continue)
                }
                _ => {
                    self.state = NegotiationState::CompressionPending;
                    Ok(ControlAction::StartCompression(Packet::new(
                        FunctionSpec::ProtocolCompress2.encode(),
                    )))
                }
            },

            FunctionSpec::ProtocolRelease => {
                self.state = NegotiationState::Releasing;
                Ok(ControlAction::Release)
            }

            FunctionSpec::ProtocolFlush2
            | FunctionSpec::ProtocolCompress2
            | FunctionSpec::ProtocolRelease2 => Err(ClientError::ProtocolViolation(format!(
                "received {}, which only the client sends",
                spec
            ))),

            FunctionSpec::ProtocolEcho
            | FunctionSpec::ProtocolCrypto
            | FunctionSpec::ProtocolErrorHandler
            | FunctionSpec::ProtocolFuncHandler => {
                tracing::debug!("Ignoring reserved control function {}", spec);
                Ok(ControlAction::Continue)
            }

            other => Err(ClientError::ProtocolViolation(format!(
                "{} is not a control function",
                other
            ))),
        }
    }

    /// The stream is now compressed.
    pub fn compression_active(&mut self) {
        if self.state == NegotiationState::CompressionPending {
            self.state = NegotiationState::CompressedActive;
        }
    }

    /// The release has been fully processed.
    pub fn close(&mut self) {
        self.state = NegotiationState::Closed;
    }
}

impl Default for Negotiator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use p4rpc_protocol::Utf8Codec;

    fn handle(
        negotiator: &mut Negotiator,
        spec: FunctionSpec,
        packet: &Packet,
        caps: &mut Capabilities,
    ) -> Result<ControlAction, ClientError> {
        negotiator.handle(spec, packet, caps, &Utf8Codec::default())
    }

    #[test]
    fn test_capabilities_copied_verbatim() {
        let mut negotiator = Negotiator::new();
        let mut caps = Capabilities::new();
        let packet = Packet::new("protocol")
            .with_field("level", "2")
            .with_field("compress", "1");

        let action = handle(&mut negotiator, FunctionSpec::ProtocolProtocol, &packet, &mut caps);
        assert_eq!(action.unwrap(), ControlAction::Continue);
        assert_eq!(negotiator.state(), NegotiationState::Negotiated);

        let expected: Capabilities = [("level", "2"), ("compress", "1")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), ResultValue::from(v)))
            .collect();
        assert_eq!(caps, expected);
    }

    #[test]
    fn test_undecodable_capability_kept_as_bytes() {
        let mut negotiator = Negotiator::new();
        let mut caps = Capabilities::new();
        let packet = Packet::new("protocol")
            .with_field("server2", "56")
            .with_field("token", vec![0xFF, 0xFE]);

        let action = handle(&mut negotiator, FunctionSpec::ProtocolProtocol, &packet, &mut caps);
        assert_eq!(action.unwrap(), ControlAction::Continue);
        assert_eq!(caps.len(), 2);
        assert_eq!(caps["server2"], ResultValue::from("56"));
        assert_eq!(caps["token"], ResultValue::Bytes(vec![0xFF, 0xFE]));
    }

    #[test]
    fn test_flush1_echoes_marks() {
        let mut negotiator = Negotiator::new();
        let packet = Packet::new("flush1")
            .with_field("fseq", "100")
            .with_field("himark", "2000")
            .with_field("rseq", "90");

        let action = handle(
            &mut negotiator,
            FunctionSpec::ProtocolFlush1,
            &packet,
            &mut Capabilities::new(),
        )
        .unwrap();

        let expected = Packet::new("flush2")
            .with_field("fseq", "100")
            .with_field("himark", "2000")
            .with_field("rseq", "90");
        assert_eq!(action, ControlAction::Reply(expected));
    }

    #[test]
    fn test_compress_transitions() {
        let mut negotiator = Negotiator::new();
        let packet = Packet::new("compress1");
        let mut caps = Capabilities::new();

        let action = handle(&mut negotiator, FunctionSpec::ProtocolCompress1, &packet, &mut caps);
        assert_eq!(
            action.unwrap(),
            ControlAction::StartCompression(Packet::new("compress2"))
        );
        assert_eq!(negotiator.state(), NegotiationState::CompressionPending);

        negotiator.compression_active();
        assert_eq!(negotiator.state(), NegotiationState::CompressedActive);

        let action = handle(&mut negotiator, FunctionSpec::ProtocolCompress1, &packet, &mut caps);
        assert_eq!(action.unwrap(), ControlAction::Continue);
    }

    #[test]
    fn test_release() {
        let mut negotiator = Negotiator::new();
        let action = handle(
            &mut negotiator,
            FunctionSpec::ProtocolRelease,
            &Packet::new("release"),
            &mut Capabilities::new(),
        );
        assert_eq!(action.unwrap(), ControlAction::Release);
        assert_eq!(negotiator.state(), NegotiationState::Releasing);

        negotiator.close();
        assert_eq!(negotiator.state(), NegotiationState::Closed);
    }

    #[test]
    fn test_client_only_functions_are_violations() {
        for spec in [
            FunctionSpec::ProtocolFlush2,
            FunctionSpec::ProtocolCompress2,
            FunctionSpec::ProtocolRelease2,
        ] {
            let mut negotiator = Negotiator::new();
            let err = handle(
                &mut negotiator,
                spec,
                &Packet::new(spec.encode()),
                &mut Capabilities::new(),
            )
            .unwrap_err();
            assert!(matches!(err, ClientError::ProtocolViolation(_)));
            assert!(err.is_connection_fatal());
        }
    }

    #[test]
    fn test_reserved_functions_continue() {
        for spec in [
            FunctionSpec::ProtocolEcho,
            FunctionSpec::ProtocolCrypto,
            FunctionSpec::ProtocolErrorHandler,
            FunctionSpec::ProtocolFuncHandler,
        ] {
            let mut negotiator = Negotiator::new();
            let action = handle(
                &mut negotiator,
                spec,
                &Packet::new(spec.encode()),
                &mut Capabilities::new(),
            );
            assert_eq!(action.unwrap(), ControlAction::Continue);
            assert_eq!(negotiator.state(), NegotiationState::Handshaking);
        }
    }

    #[test]
    fn test_non_control_function_rejected() {
        let mut negotiator = Negotiator::new();
        let result = handle(
            &mut negotiator,
            FunctionSpec::ClientMessage,
            &Packet::new("client-Message"),
            &mut Capabilities::new(),
        );
        assert!(result.is_err());
    }
}
