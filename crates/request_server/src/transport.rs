//! TCP and WebSocket transport adapters.
//!
//! The dispatch core is transport-agnostic: it consumes [`TransportEvent`]s
//! from a channel and emits frames through per-connection senders. These
//! adapters do the byte plumbing — length-prefixed framing over raw TCP,
//! one binary message per frame over WebSocket — and nothing else. Node-to-
//! node links use suffixed framing, where every frame carries a trailing
//! `u64` routing id.

use crate::connection::{ConnectionHandle, ConnectionManager};
use crate::dispatch::RequestEnvelope;
use crate::error::ServerError;
use crate::node::TransportEvent;
use futures_util::{SinkExt, StreamExt};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use warden_protocol::frame::{LENGTH_PREFIX, TARGET_SUFFIX};
use warden_protocol::RequestFrame;

/// Upper bound on one frame body; anything larger poisons the connection.
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// How frames are delimited on a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// `u32 length | body` — client connections.
    Plain,
    /// `u32 length | body | u64 target` — node-to-node links.
    Suffixed,
}

/// Accepts TCP connections forever, spawning one task per connection.
pub async fn serve_tcp(
    listener: TcpListener,
    manager: Arc<ConnectionManager>,
    events: mpsc::UnboundedSender<TransportEvent>,
    framing: Framing,
) {
    if let Ok(addr) = listener.local_addr() {
        info!("🌐 TCP listener on {addr} ({framing:?} framing)");
    }
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                tokio::spawn(run_tcp_connection(
                    stream,
                    peer,
                    manager.clone(),
                    events.clone(),
                    framing,
                ));
            }
            Err(err) => {
                warn!(error = %err, "TCP accept failed");
            }
        }
    }
}

/// Accepts WebSocket connections forever; each binary message is one frame.
pub async fn serve_websocket(
    listener: TcpListener,
    manager: Arc<ConnectionManager>,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    if let Ok(addr) = listener.local_addr() {
        info!("🌐 WebSocket listener on {addr}");
    }
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                tokio::spawn(run_ws_connection(stream, peer, manager.clone(), events.clone()));
            }
            Err(err) => {
                warn!(error = %err, "WebSocket accept failed");
            }
        }
    }
}

/// Connects out to a peer node (the broker) with suffixed framing and wires
/// the connection into the manager and event stream.
pub async fn connect_peer(
    address: &str,
    manager: &Arc<ConnectionManager>,
    events: mpsc::UnboundedSender<TransportEvent>,
) -> Result<ConnectionHandle, ServerError> {
    let stream = TcpStream::connect(address).await?;
    let peer = stream.peer_addr()?;
    let (handle, outgoing) = manager.open_connection(Some(peer));
    let connection_id = handle.id();
    let (read_half, write_half) = stream.into_split();
    tokio::spawn(write_frames(write_half, outgoing));
    tokio::spawn(async move {
        read_suffixed_frames(read_half, connection_id, &events).await;
        let _ = events.send(TransportEvent::Disconnected { connection_id });
    });
    Ok(handle)
}

async fn run_tcp_connection(
    stream: TcpStream,
    peer: SocketAddr,
    manager: Arc<ConnectionManager>,
    events: mpsc::UnboundedSender<TransportEvent>,
    framing: Framing,
) {
    let (handle, outgoing) = manager.open_connection(Some(peer));
    let connection_id = handle.id();
    let (read_half, write_half) = stream.into_split();
    let writer = tokio::spawn(write_frames(write_half, outgoing));

    match framing {
        Framing::Plain => read_plain_frames(read_half, connection_id, &events).await,
        Framing::Suffixed => read_suffixed_frames(read_half, connection_id, &events).await,
    }

    let _ = events.send(TransportEvent::Disconnected { connection_id });
    writer.abort();
}

async fn write_frames(
    mut write_half: tokio::net::tcp::OwnedWriteHalf,
    mut outgoing: mpsc::UnboundedReceiver<Vec<u8>>,
) {
    while let Some(frame) = outgoing.recv().await {
        if write_half.write_all(&frame).await.is_err() {
            break;
        }
    }
}

async fn read_plain_frames(
    mut read_half: OwnedReadHalf,
    connection_id: u64,
    events: &mpsc::UnboundedSender<TransportEvent>,
) {
    loop {
        match read_frame(&mut read_half, Framing::Plain).await {
            Ok(Some(bytes)) => match RequestFrame::decode(&bytes[LENGTH_PREFIX..]) {
                Ok(frame) => {
                    let envelope = RequestEnvelope {
                        connection_id,
                        frame,
                    };
                    if events.send(TransportEvent::Request(envelope)).is_err() {
                        break;
                    }
                }
                Err(_) => {
                    // A frame too short for its category/method header
                    // cannot be answered; drop it and keep reading.
                    debug!(connection = connection_id, "dropping headerless frame");
                }
            },
            Ok(None) => break,
            Err(err) => {
                debug!(connection = connection_id, error = %err, "read failed");
                break;
            }
        }
    }
}

async fn read_suffixed_frames(
    mut read_half: OwnedReadHalf,
    connection_id: u64,
    events: &mpsc::UnboundedSender<TransportEvent>,
) {
    loop {
        match read_frame(&mut read_half, Framing::Suffixed).await {
            Ok(Some(envelope)) => {
                let event = TransportEvent::Forwarded {
                    connection_id,
                    envelope,
                };
                if events.send(event).is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(err) => {
                debug!(connection = connection_id, error = %err, "peer read failed");
                break;
            }
        }
    }
}

/// Reads one frame (plus the routing suffix under suffixed framing),
/// returning the raw bytes including the length prefix. `None` is a clean
/// end of stream.
async fn read_frame(
    read_half: &mut OwnedReadHalf,
    framing: Framing,
) -> io::Result<Option<Vec<u8>>> {
    let mut length_bytes = [0u8; LENGTH_PREFIX];
    match read_half.read_exact(&mut length_bytes).await {
        Ok(_) => {}
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err),
    }

    let length = u32::from_le_bytes(length_bytes) as usize;
    if length > MAX_FRAME_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame of {length} bytes exceeds the limit"),
        ));
    }

    let extra = match framing {
        Framing::Plain => 0,
        Framing::Suffixed => TARGET_SUFFIX,
    };
    let mut buffer = vec![0u8; LENGTH_PREFIX + length + extra];
    buffer[..LENGTH_PREFIX].copy_from_slice(&length_bytes);
    read_half.read_exact(&mut buffer[LENGTH_PREFIX..]).await?;
    Ok(Some(buffer))
}

async fn run_ws_connection(
    stream: TcpStream,
    peer: SocketAddr,
    manager: Arc<ConnectionManager>,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    let websocket = match tokio_tungstenite::accept_async(stream).await {
        Ok(websocket) => websocket,
        Err(err) => {
            debug!(%peer, error = %err, "WebSocket handshake failed");
            return;
        }
    };
    let (mut sink, mut source) = websocket.split();
    let (handle, mut outgoing) = manager.open_connection(Some(peer));
    let connection_id = handle.id();

    let writer = tokio::spawn(async move {
        while let Some(frame) = outgoing.recv().await {
            if sink.send(Message::Binary(frame)).await.is_err() {
                break;
            }
        }
    });

    while let Some(message) = source.next().await {
        match message {
            Ok(Message::Binary(data)) => {
                if let Some(frame) = decode_ws_frame(&data) {
                    let envelope = RequestEnvelope {
                        connection_id,
                        frame,
                    };
                    if events.send(TransportEvent::Request(envelope)).is_err() {
                        break;
                    }
                } else {
                    debug!(connection = connection_id, "dropping malformed WS frame");
                }
            }
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }

    let _ = events.send(TransportEvent::Disconnected { connection_id });
    writer.abort();
}

/// A WebSocket message must carry exactly one frame whose declared length
/// matches the message size.
fn decode_ws_frame(data: &[u8]) -> Option<RequestFrame> {
    if data.len() < LENGTH_PREFIX {
        return None;
    }
    let mut length_bytes = [0u8; LENGTH_PREFIX];
    length_bytes.copy_from_slice(&data[..LENGTH_PREFIX]);
    let length = u32::from_le_bytes(length_bytes) as usize;
    if length > MAX_FRAME_SIZE || data.len() - LENGTH_PREFIX != length {
        return None;
    }
    RequestFrame::decode(&data[LENGTH_PREFIX..]).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ws_frames_must_be_self_consistent() {
        let frame = RequestFrame {
            category: 1,
            method: 1,
            payload: Vec::new(),
        };
        let encoded = frame.encode();
        assert_eq!(decode_ws_frame(&encoded), Some(frame));

        // Truncated and padded messages are both rejected.
        assert_eq!(decode_ws_frame(&encoded[..encoded.len() - 1]), None);
        let mut padded = encoded;
        padded.push(0);
        assert_eq!(decode_ws_frame(&padded), None);
    }
}
