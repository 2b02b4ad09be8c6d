//! In-memory server end for tests.

use crate::compression::{Deflater, Inflater};
use crate::connection::Connection;
use p4rpc_protocol::{CharsetContext, Packet, PacketDecoder};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

const DUPLEX_CAPACITY: usize = 256 * 1024;

pub(crate) struct FakeServer {
    stream: DuplexStream,
    decoder: PacketDecoder,
    deflater: Option<Deflater>,
    inflater: Option<Inflater>,
}

impl FakeServer {
    /// A UTF-8 client connection wired to a fake server.
    pub fn pair() -> (Connection<DuplexStream>, FakeServer) {
        let (client, server) = tokio::io::duplex(DUPLEX_CAPACITY);
        (
            Connection::new(client, CharsetContext::utf8()),
            FakeServer {
                stream: server,
                decoder: PacketDecoder::new(),
                deflater: None,
                inflater: None,
            },
        )
    }

    pub fn enable_compression(&mut self) {
        self.deflater = Some(Deflater::new());
        self.inflater = Some(Inflater::new());
    }

    pub async fn send(&mut self, packet: &Packet) {
        let wire = packet.encode().unwrap();
        match self.deflater.as_mut() {
            Some(deflater) => {
                let compressed = deflater.compress(&wire).unwrap();
                self.send_raw(&compressed).await;
            }
            None => self.send_raw(&wire).await,
        }
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.unwrap();
        self.stream.flush().await.unwrap();
    }

    pub async fn recv(&mut self) -> Packet {
        let mut buf = vec![0u8; 4096];
        loop {
            if let Some(packet) = self.decoder.decode_packet().unwrap() {
                return packet;
            }
            let n = self.stream.read(&mut buf).await.unwrap();
            assert!(n > 0, "client closed the stream");
            match self.inflater.as_mut() {
                Some(inflater) => {
                    let mut plain = Vec::new();
                    inflater.decompress(&buf[..n], &mut plain).unwrap();
                    self.decoder.extend(&plain);
                }
                None => self.decoder.extend(&buf[..n]),
            }
        }
    }
}
