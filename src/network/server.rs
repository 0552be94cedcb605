//! TCP server and connection handling
//!
//! Frames are `MAGIC (4) | length (4, big endian) | JSON body`. Each
//! connection gets a writer task draining the peer's queue while the
//! connection task itself reads frames and forwards them to the node.

use crate::network::message::{Message, MAGIC, MAX_MESSAGE_SIZE};
use crate::network::peer::{PeerError, PeerHandle, PeerManager, PEER_QUEUE_SIZE};
use bytes::{Buf, BufMut, BytesMut};
use futures::sink::SinkExt;
use futures::stream::StreamExt;
use std::io::{Error as IoError, ErrorKind};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::{Decoder, Encoder, Framed};

/// Size of the frame header: magic plus body length
const HEADER_SIZE: usize = 8;

/// Message codec for length-prefixed framing
pub struct MessageCodec;

impl Encoder<Message> for MessageCodec {
    type Error = IoError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let data = item
            .to_bytes()
            .map_err(|e| IoError::new(ErrorKind::InvalidData, e.to_string()))?;

        if data.len() > MAX_MESSAGE_SIZE {
            return Err(IoError::new(
                ErrorKind::InvalidData,
                format!("message of {} bytes exceeds limit", data.len()),
            ));
        }

        dst.reserve(HEADER_SIZE + data.len());
        dst.put_slice(&MAGIC);
        dst.put_u32(data.len() as u32);
        dst.put_slice(&data);

        Ok(())
    }
}

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = IoError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            if src.len() < HEADER_SIZE {
                return Ok(None);
            }

            if src[..4] != MAGIC {
                return Err(IoError::new(ErrorKind::InvalidData, "Invalid magic bytes"));
            }

            let len = u32::from_be_bytes([src[4], src[5], src[6], src[7]]) as usize;
            if len > MAX_MESSAGE_SIZE {
                return Err(IoError::new(
                    ErrorKind::InvalidData,
                    format!("frame of {} bytes exceeds limit", len),
                ));
            }

            if src.len() < HEADER_SIZE + len {
                src.reserve(HEADER_SIZE + len - src.len());
                return Ok(None);
            }

            src.advance(HEADER_SIZE);
            let data = src.split_to(len);

            // A well-framed but undecodable body is dropped; the stream stays aligned
            match Message::from_bytes(&data) {
                Ok(msg) => return Ok(Some(msg)),
                Err(e) => log::warn!("Dropping malformed message: {}", e),
            }
        }
    }
}

/// TCP server for accepting peer connections
pub struct Server {
    listener: TcpListener,
    port: u16,
}

impl Server {
    /// Bind to a port and create the server; port 0 picks a free port
    pub async fn bind(port: u16) -> Result<Self, IoError> {
        let addr = format!("0.0.0.0:{}", port);
        let listener = TcpListener::bind(&addr).await?;
        let port = listener.local_addr()?.port();
        log::info!("P2P server listening on 0.0.0.0:{}", port);

        Ok(Self { listener, port })
    }

    /// Get the listening port
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Accept incoming connections
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr), IoError> {
        self.listener.accept().await
    }
}

/// Connect to a peer
pub async fn connect_to_peer(addr: &str) -> Result<(TcpStream, SocketAddr), PeerError> {
    let stream = TcpStream::connect(addr)
        .await
        .map_err(|e| PeerError::ConnectionFailed(format!("{}: {}", addr, e)))?;

    let peer_addr = stream
        .peer_addr()
        .map_err(|e| PeerError::ConnectionFailed(e.to_string()))?;

    Ok((stream, peer_addr))
}

/// Handle a peer connection (both inbound and outbound).
///
/// Registers the peer, asks it for its tip, then forwards every decoded
/// message to `message_tx` until the socket closes, reading fails, or the
/// writer task stops. The peer is removed from `peer_manager` on the way out.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    peer_manager: Arc<PeerManager>,
    message_tx: mpsc::Sender<(SocketAddr, Message)>,
    outbound: bool,
) -> Result<(), PeerError> {
    let framed = Framed::new(stream, MessageCodec);
    let (mut writer, mut reader) = framed.split();

    let (tx, mut rx) = mpsc::channel::<Message>(PEER_QUEUE_SIZE);
    let handle = PeerHandle { addr, tx };

    peer_manager.add_peer(addr, handle, outbound).await?;

    if let Err(e) = writer.send(Message::QueryLatest).await {
        peer_manager.remove_peer(&addr).await;
        return Err(PeerError::IoError(e));
    }
    log::debug!("Sent QueryLatest to {}", addr);

    let mut write_handle = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if let Err(e) = writer.send(msg).await {
                log::warn!("Error writing to {}: {}", addr, e);
                break;
            }
        }
    });

    loop {
        tokio::select! {
            frame = reader.next() => match frame {
                Some(Ok(msg)) => {
                    if message_tx.send((addr, msg)).await.is_err() {
                        break;
                    }
                }
                Some(Err(e)) => {
                    log::warn!("Error reading from {}: {}", addr, e);
                    break;
                }
                None => {
                    log::info!("Peer {} disconnected", addr);
                    break;
                }
            },
            _ = &mut write_handle => {
                log::warn!("Writer for {} stopped, closing connection", addr);
                break;
            }
        }
    }

    write_handle.abort();
    peer_manager.remove_peer(&addr).await;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Block;

    #[test]
    fn test_message_codec() {
        let mut codec = MessageCodec;
        let msg = Message::ResponseChain(vec![Block::genesis()]);

        let mut buf = BytesMut::new();
        codec.encode(msg.clone(), &mut buf).unwrap();
        assert_eq!(&buf[..4], b"PWCH");

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, msg);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_partial_frame_waits() {
        let mut codec = MessageCodec;
        let mut full = BytesMut::new();
        codec.encode(Message::QueryAll, &mut full).unwrap();

        let mut partial = BytesMut::from(&full[..full.len() - 1]);
        assert!(codec.decode(&mut partial).unwrap().is_none());

        partial.extend_from_slice(&full[full.len() - 1..]);
        assert_eq!(codec.decode(&mut partial).unwrap(), Some(Message::QueryAll));
    }

    #[test]
    fn test_bad_frames_rejected() {
        let mut codec = MessageCodec;

        let mut bad_magic = BytesMut::from(&b"NOPE\x00\x00\x00\x02{}"[..]);
        assert!(codec.decode(&mut bad_magic).is_err());

        let mut oversized = BytesMut::new();
        oversized.put_slice(&MAGIC);
        oversized.put_u32(MAX_MESSAGE_SIZE as u32 + 1);
        assert!(codec.decode(&mut oversized).is_err());
    }

    #[test]
    fn test_malformed_body_is_skipped() {
        let mut codec = MessageCodec;
        let mut buf = BytesMut::new();

        let body = br#"{"type":2,"data":[{"index":1}]}"#;
        buf.put_slice(&MAGIC);
        buf.put_u32(body.len() as u32);
        buf.put_slice(body);
        codec.encode(Message::QueryLatest, &mut buf).unwrap();

        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Message::QueryLatest));
        assert!(buf.is_empty());

        let mut lone = BytesMut::new();
        lone.put_slice(&MAGIC);
        lone.put_u32(2);
        lone.put_slice(b"{}");
        assert_eq!(codec.decode(&mut lone).unwrap(), None);
        assert!(lone.is_empty());
    }

    #[tokio::test]
    async fn test_connection_queries_tip_and_forwards() {
        let server = Server::bind(0).await.unwrap();
        let port = server.port();
        let manager = Arc::new(PeerManager::new());
        let (message_tx, mut message_rx) = mpsc::channel(16);

        let accept_manager = Arc::clone(&manager);
        tokio::spawn(async move {
            let (stream, addr) = server.accept().await.unwrap();
            handle_connection(stream, addr, accept_manager, message_tx, false)
                .await
                .unwrap();
        });

        let (stream, _) = connect_to_peer(&format!("127.0.0.1:{}", port))
            .await
            .unwrap();
        let mut client = Framed::new(stream, MessageCodec);

        // The accepting side opens with a tip query
        assert_eq!(client.next().await.unwrap().unwrap(), Message::QueryLatest);

        client.send(Message::QueryAll).await.unwrap();
        let (_, forwarded) = message_rx.recv().await.unwrap();
        assert_eq!(forwarded, Message::QueryAll);
        assert_eq!(manager.peer_count().await, 1);
    }

    #[tokio::test]
    async fn test_failed_write_drops_peer() {
        let server = Server::bind(0).await.unwrap();
        let port = server.port();
        let manager = Arc::new(PeerManager::new());
        let (message_tx, _message_rx) = mpsc::channel(16);

        let accept_manager = Arc::clone(&manager);
        let (addr_tx, addr_rx) = tokio::sync::oneshot::channel();
        tokio::spawn(async move {
            let (stream, addr) = server.accept().await.unwrap();
            addr_tx.send(addr).unwrap();
            handle_connection(stream, addr, accept_manager, message_tx, false)
                .await
                .unwrap();
        });

        let (stream, _) = connect_to_peer(&format!("127.0.0.1:{}", port))
            .await
            .unwrap();
        let mut client = Framed::new(stream, MessageCodec);
        assert_eq!(client.next().await.unwrap().unwrap(), Message::QueryLatest);
        let peer = addr_rx.await.unwrap();

        // Larger than any frame the encoder will write
        let mut block = Block::genesis();
        let mut tx = crate::core::Transaction::coinbase("04", 1);
        tx.tx_outs[0].address = "a".repeat(MAX_MESSAGE_SIZE + 1);
        block.data.push(tx);
        manager
            .send_to(&peer, Message::ResponseChain(vec![block]))
            .await
            .unwrap();

        let mut dropped = false;
        for _ in 0..100 {
            if manager.peer_count().await == 0 {
                dropped = true;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        assert!(dropped);
        drop(client);
    }
}
