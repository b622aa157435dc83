//! Minimal RFC 6455 server side: a stateless handshake/frame codec plus
//! the observer hub that fans pose records out to every connected client.
//!
//! Observers only ever receive; after the 101 response the channel is
//! one-directional (server to observer) and frames go out unmasked.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use sha1::{Digest, Sha1};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

/// Fixed GUID from RFC 6455 section 1.3.
const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

const OPCODE_TEXT: u8 = 0x1;
const FIN_BIT: u8 = 0x80;

/// Derive the `Sec-WebSocket-Accept` value for a client key.
pub fn accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// Pull the `Sec-WebSocket-Key` header out of a raw request block.
pub fn parse_handshake_key(request: &str) -> Option<String> {
    for line in request.lines() {
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("sec-websocket-key") {
                return Some(value.trim().to_string());
            }
        }
    }
    None
}

/// Full 101 response for an upgrade request.
pub fn handshake_response(client_key: &str) -> String {
    format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n\r\n",
        accept_key(client_key)
    )
}

/// Encode one unmasked text frame (7-bit length, or 16/64-bit extended
/// length for larger payloads).
pub fn encode_text_frame(payload: &str) -> Vec<u8> {
    let bytes = payload.as_bytes();
    let mut frame = Vec::with_capacity(bytes.len() + 10);
    frame.push(FIN_BIT | OPCODE_TEXT);

    let len = bytes.len();
    if len < 126 {
        frame.push(len as u8);
    } else if len <= u16::MAX as usize {
        frame.push(126);
        frame.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        frame.push(127);
        frame.extend_from_slice(&(len as u64).to_be_bytes());
    }

    frame.extend_from_slice(bytes);
    frame
}

/// Frames queued per observer before new ones are shed for that peer.
const PEER_QUEUE: usize = 64;

/// The set of connected observers. Each observer gets its own writer
/// task fed by a bounded queue, so a stalled socket only sheds its own
/// frames: broadcasts to everyone else, and new registrations, proceed.
pub struct ObserverHub {
    peers: tokio::sync::Mutex<Vec<(SocketAddr, mpsc::Sender<Vec<u8>>)>>,
}

impl ObserverHub {
    pub fn new() -> Arc<Self> {
        Arc::new(ObserverHub {
            peers: tokio::sync::Mutex::new(Vec::new()),
        })
    }

    pub async fn observer_count(&self) -> usize {
        self.peers.lock().await.len()
    }

    /// Push one text record to every connected observer. Never waits on
    /// a socket: a full queue drops the frame for that peer, a closed
    /// queue (the writer task hit a send error) drops the peer.
    pub async fn broadcast(&self, record: &str) {
        let frame = encode_text_frame(record);
        let mut peers = self.peers.lock().await;

        peers.retain(|(addr, queue)| match queue.try_send(frame.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                log::debug!("[WS] observer {addr} lagging, frame shed");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                log::warn!("[WS] dropping observer {addr}");
                false
            }
        });
    }

    async fn register(&self, addr: SocketAddr, mut writer: OwnedWriteHalf) {
        let (queue, mut frames) = mpsc::channel::<Vec<u8>>(PEER_QUEUE);
        tokio::spawn(async move {
            while let Some(frame) = frames.recv().await {
                if writer.write_all(&frame).await.is_err() {
                    break;
                }
            }
        });
        self.peers.lock().await.push((addr, queue));
        log::info!("[WS] observer {addr} connected");
    }
}

/// Accept loop for the observer broadcast endpoint. The listener is bound
/// by the caller so a port conflict is fatal at startup, not later.
pub async fn serve(listener: TcpListener, hub: Arc<ObserverHub>) -> Result<()> {
    loop {
        let (stream, addr) = listener.accept().await?;
        let hub = hub.clone();
        tokio::spawn(async move {
            if let Err(e) = admit(stream, addr, &hub).await {
                log::warn!("[WS] handshake with {addr} failed: {e}");
            }
        });
    }
}

async fn admit(mut stream: TcpStream, addr: SocketAddr, hub: &Arc<ObserverHub>) -> Result<()> {
    let mut request = vec![0u8; 4096];
    let mut used = 0;

    // Read until the header block terminator; clients send nothing else.
    loop {
        let n = stream.read(&mut request[used..]).await?;
        if n == 0 {
            return Err(anyhow!("connection closed during handshake"));
        }
        used += n;
        if request[..used].windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
        if used == request.len() {
            return Err(anyhow!("oversized handshake request"));
        }
    }

    let text = String::from_utf8_lossy(&request[..used]);
    let key = parse_handshake_key(&text).ok_or_else(|| anyhow!("missing Sec-WebSocket-Key"))?;
    stream.write_all(handshake_response(&key).as_bytes()).await?;

    let (_read_half, write_half) = stream.into_split();
    hub.register(addr, write_half).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rfc6455_sample_accept_key() {
        // Vector from RFC 6455 section 1.3.
        assert_eq!(
            accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn test_handshake_response_shape() {
        let response = handshake_response("dGhlIHNhbXBsZSBub25jZQ==");
        assert!(response.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        assert!(response.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));
        assert!(response.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_parse_handshake_key() {
        let request = "GET /telemetry HTTP/1.1\r\n\
                       Host: bridge:8765\r\n\
                       Upgrade: websocket\r\n\
                       Connection: Upgrade\r\n\
                       Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
                       Sec-WebSocket-Version: 13\r\n\r\n";
        assert_eq!(
            parse_handshake_key(request).as_deref(),
            Some("dGhlIHNhbXBsZSBub25jZQ==")
        );
        assert_eq!(parse_handshake_key("GET / HTTP/1.1\r\n\r\n"), None);
    }

    #[test]
    fn test_short_text_frame() {
        // Single-frame unmasked "Hello", from RFC 6455 section 5.7.
        assert_eq!(
            encode_text_frame("Hello"),
            vec![0x81, 0x05, 0x48, 0x65, 0x6c, 0x6c, 0x6f]
        );
    }

    #[test]
    fn test_extended_16bit_length() {
        let payload = "x".repeat(126);
        let frame = encode_text_frame(&payload);
        assert_eq!(frame[0], 0x81);
        assert_eq!(frame[1], 126);
        assert_eq!(u16::from_be_bytes([frame[2], frame[3]]), 126);
        assert_eq!(frame.len(), 4 + 126);
    }

    #[test]
    fn test_extended_64bit_length() {
        let payload = "y".repeat(70 * 1024);
        let frame = encode_text_frame(&payload);
        assert_eq!(frame[1], 127);
        let mut len_bytes = [0u8; 8];
        len_bytes.copy_from_slice(&frame[2..10]);
        assert_eq!(u64::from_be_bytes(len_bytes), 70 * 1024);
        assert_eq!(frame.len(), 10 + 70 * 1024);
    }

    #[test]
    fn test_boundary_stays_seven_bit() {
        let frame = encode_text_frame(&"z".repeat(125));
        assert_eq!(frame[1], 125);
        assert_eq!(frame.len(), 2 + 125);
    }

    #[tokio::test]
    async fn test_observer_receives_broadcast_and_dead_peer_is_dropped() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hub = ObserverHub::new();
        tokio::spawn(serve(listener, hub.clone()));

        let mut client = TcpStream::connect(addr).await.unwrap();
        client
            .write_all(
                b"GET / HTTP/1.1\r\n\
                  Host: test\r\n\
                  Upgrade: websocket\r\n\
                  Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n",
            )
            .await
            .unwrap();

        let mut response = vec![0u8; 1024];
        let n = client.read(&mut response).await.unwrap();
        let response = String::from_utf8_lossy(&response[..n]);
        assert!(response.contains("101 Switching Protocols"));
        assert!(response.contains("s3pPLMBiTxaQ9kYGzzhZRbK+xOo="));

        // Registration happens right after the 101 goes out.
        for _ in 0..50 {
            if hub.observer_count().await == 1 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(hub.observer_count().await, 1);

        let record = "1.000,0.500,0.500,0.000,90";
        hub.broadcast(record).await;
        let mut frame = vec![0u8; 256];
        let n = client.read(&mut frame).await.unwrap();
        assert_eq!(&frame[..n], encode_text_frame(record).as_slice());

        // A closed observer is removed on the next failing send without
        // disturbing the broadcast loop.
        drop(client);
        for _ in 0..50 {
            hub.broadcast("0.000,0.000,0.000,0.000,0").await;
            if hub.observer_count().await == 0 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(hub.observer_count().await, 0);
    }

    #[tokio::test]
    async fn test_stalled_observer_does_not_block_broadcast() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hub = ObserverHub::new();
        tokio::spawn(serve(listener, hub.clone()));

        let mut client = TcpStream::connect(addr).await.unwrap();
        client
            .write_all(
                b"GET / HTTP/1.1\r\n\
                  Host: test\r\n\
                  Upgrade: websocket\r\n\
                  Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n",
            )
            .await
            .unwrap();
        let mut response = vec![0u8; 1024];
        client.read(&mut response).await.unwrap();
        for _ in 0..50 {
            if hub.observer_count().await == 1 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(hub.observer_count().await, 1);

        // The client never reads past the handshake. Push far more than
        // its queue and socket buffers can absorb; every broadcast must
        // still return promptly and the lagging peer stays connected,
        // merely shedding frames.
        let payload = "p".repeat(64 * 1024);
        let pushed = tokio::time::timeout(std::time::Duration::from_secs(5), async {
            for _ in 0..512 {
                hub.broadcast(&payload).await;
            }
        })
        .await;
        assert!(pushed.is_ok(), "broadcast stalled on a non-reading observer");
        assert_eq!(hub.observer_count().await, 1);
        drop(client);
    }
}
