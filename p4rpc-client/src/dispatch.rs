//! Inbound packet dispatch.
//!
//! Control functions go to the negotiation state machine. Everything else
//! is flattened into a [`ResultMap`] and handed back to the caller.

use crate::error::ClientError;
use crate::negotiation::ControlAction;
use crate::session::CommandEnvironment;
use p4rpc_protocol::{FunctionSpec, Packet, ResultMap, ServerMessage, Severity};
use tokio::io::{AsyncRead, AsyncWrite};

/// Result of dispatching one inbound packet.
#[derive(Debug)]
pub enum DispatchOutcome {
    /// More packets are expected.
    Continue,
    /// The server released the command.
    ///
    /// Also returned when the command's server messages reported failure;
    /// check [`CommandEnvironment::failed`](crate::session::CommandEnvironment::failed).
    StopNormal,
    /// The command failed.
    Error(ClientError),
    /// A result for the caller.
    Routed(ResultMap),
}

impl DispatchOutcome {
    /// Whether polling should stop.
    pub fn is_terminal(&self) -> bool {
        matches!(self, DispatchOutcome::StopNormal | DispatchOutcome::Error(_))
    }
}

/// Dispatches one decoded packet within `env`.
pub async fn dispatch<S>(
    spec: FunctionSpec,
    env: &mut CommandEnvironment<'_, S>,
    packet: Packet,
) -> Result<DispatchOutcome, ClientError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    if spec.is_protocol() {
        return control(spec, env, &packet).await;
    }

    let map = packet.to_result_map(env.conn.charset().wire());
    if spec == FunctionSpec::ClientMessage {
        let messages = ServerMessage::from_result_map(&map);
        for message in &messages {
            match message.severity {
                Severity::Failed | Severity::Fatal => {
                    tracing::debug!("Server error {}: {}", message.code.unique_code(), message)
                }
                Severity::Warn => tracing::debug!("Server warning: {}", message),
                _ => {}
            }
        }
        env.record_messages(messages);
    }

    Ok(DispatchOutcome::Routed(map))
}

async fn control<S>(
    spec: FunctionSpec,
    env: &mut CommandEnvironment<'_, S>,
    packet: &Packet,
) -> Result<DispatchOutcome, ClientError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let action = env.negotiator.handle(
        spec,
        packet,
        &mut env.capabilities,
        env.conn.charset().wire(),
    )?;

    match action {
        ControlAction::Continue => Ok(DispatchOutcome::Continue),
        ControlAction::Reply(reply) => {
            env.conn.send_packet(&reply).await?;
            Ok(DispatchOutcome::Continue)
        }
        ControlAction::StartCompression(reply) => {
            if env.conn.is_compressed() {
                tracing::debug!("Stream already compressed");
            } else {
                env.conn.send_packet(&reply).await?;
                env.conn.enable_compression()?;
            }
            env.negotiator.compression_active();
            Ok(DispatchOutcome::Continue)
        }
        ControlAction::Release => {
            env.release();
            Ok(DispatchOutcome::StopNormal)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::negotiation::{Capabilities, NegotiationState};
    use crate::testing::FakeServer;
    use p4rpc_protocol::{Category, ResultValue};

    #[tokio::test]
    async fn test_capability_map_from_protocol() {
        let (mut conn, mut server) = FakeServer::pair();
        server
            .send(
                &Packet::new("protocol-protocol")
                    .with_field("level", "2")
                    .with_field("compress", "1"),
            )
            .await;

        let mut env = conn.open_command(None).unwrap();
        assert!(matches!(env.poll().await, DispatchOutcome::Continue));

        let expected: Capabilities = [("level", "2"), ("compress", "1")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), ResultValue::from(v)))
            .collect();
        assert_eq!(env.capabilities(), &expected);
        assert_eq!(env.state(), NegotiationState::Negotiated);
    }

    #[tokio::test]
    async fn test_capabilities_kept_on_connection_after_release() {
        let (mut conn, mut server) = FakeServer::pair();
        server
            .send(&Packet::new("protocol").with_field("nocase", ""))
            .await;
        server.send(&Packet::new("release")).await;

        {
            let mut env = conn.open_command(None).unwrap();
            assert!(matches!(env.poll().await, DispatchOutcome::Continue));
            assert!(matches!(env.poll().await, DispatchOutcome::StopNormal));
        }

        assert_eq!(conn.state().capability_str("nocase").as_deref(), Some(""));
        assert!(conn.state().is_case_insensitive());
    }

    #[tokio::test]
    async fn test_flush1_answered_with_flush2() {
        let (mut conn, mut server) = FakeServer::pair();
        server
            .send(
                &Packet::new("flush1")
                    .with_field("fseq", "4096")
                    .with_field("himark", "2000")
                    .with_field("rseq", "1024"),
            )
            .await;

        {
            let mut env = conn.open_command(None).unwrap();
            assert!(matches!(env.poll().await, DispatchOutcome::Continue));
        }

        let reply = server.recv().await;
        assert_eq!(reply.function(), "flush2");
        assert_eq!(reply.get_str("himark"), Some("2000"));
        assert_eq!(reply.get_str("fseq"), Some("4096"));
        assert_eq!(reply.get_str("rseq"), Some("1024"));
    }

    #[tokio::test]
    async fn test_flush2_from_server_is_fatal() {
        let (mut conn, mut server) = FakeServer::pair();
        server.send(&Packet::new("flush2")).await;

        {
            let mut env = conn.open_command(None).unwrap();
            let outcome = env.poll().await;
            assert!(matches!(
                outcome,
                DispatchOutcome::Error(ClientError::ProtocolViolation(_))
            ));
        }
        assert!(!conn.is_usable());
    }

    #[tokio::test]
    async fn test_compress1_switches_stream() {
        let (mut conn, mut server) = FakeServer::pair();
        server.send(&Packet::new("compress1")).await;

        {
            let mut env = conn.open_command(None).unwrap();
            assert!(matches!(env.poll().await, DispatchOutcome::Continue));
            assert_eq!(env.state(), NegotiationState::CompressedActive);
            assert!(env.connection().is_compressed());

            // compress2 went out before the switch.
            assert_eq!(server.recv().await, Packet::new("compress2"));
            server.enable_compression();

            server
                .send(&Packet::new("client-OutputInfo").with_field("data", "compressed"))
                .await;
            server.send(&Packet::new("release")).await;

            match env.poll().await {
                DispatchOutcome::Routed(map) => {
                    assert_eq!(map.get_str("data"), Some("compressed"));
                }
                other => panic!("unexpected outcome: {:?}", other),
            }
            assert!(matches!(env.poll().await, DispatchOutcome::StopNormal));

            env.send(FunctionSpec::UserInfo, Vec::new()).await.unwrap();
        }

        assert_eq!(server.recv().await, Packet::new("user-info"));
    }

    #[tokio::test]
    async fn test_reserved_control_functions_continue() {
        let (mut conn, mut server) = FakeServer::pair();
        let reserved: Vec<FunctionSpec> = FunctionSpec::ALL
            .iter()
            .copied()
            .filter(|f| {
                matches!(
                    f,
                    FunctionSpec::ProtocolEcho
                        | FunctionSpec::ProtocolCrypto
                        | FunctionSpec::ProtocolErrorHandler
                        | FunctionSpec::ProtocolFuncHandler
                )
            })
            .collect();
        assert!(reserved.iter().all(|f| f.category() == Category::Protocol));

        for spec in &reserved {
            server.send(&Packet::new(spec.encode())).await;
        }

        let mut env = conn.open_command(None).unwrap();
        for _ in &reserved {
            assert!(matches!(env.poll().await, DispatchOutcome::Continue));
        }
        assert!(env.connection().is_usable());
    }

    #[tokio::test]
    async fn test_client_message_routed_and_recorded() {
        let (mut conn, mut server) = FakeServer::pair();
        // Failed severity, one argument.
        server
            .send(
                &Packet::new("client-Message")
                    .with_field("code0", "822150148")
                    .with_field("fmt0", "%depotFile% - no such file(s).")
                    .with_field("depotFile", "//depot/missing"),
            )
            .await;

        let mut env = conn.open_command(None).unwrap();
        match env.poll().await {
            DispatchOutcome::Routed(map) => {
                assert_eq!(map.get_str("func"), Some("client-Message"));
                assert_eq!(map.get_str("depotFile"), Some("//depot/missing"));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }

        assert!(env.failed());
        let errors = env.errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].text, "//depot/missing - no such file(s).");
        assert!(env.connection().is_usable());
    }

    #[test]
    fn test_terminal_outcomes() {
        assert!(DispatchOutcome::StopNormal.is_terminal());
        assert!(DispatchOutcome::Error(ClientError::Cancelled).is_terminal());
        assert!(!DispatchOutcome::Continue.is_terminal());
        assert!(!DispatchOutcome::Routed(ResultMap::new()).is_terminal());
    }
}
