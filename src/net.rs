#![cfg(feature = "net")]

//! Newline-delimited JSON transport over TCP.
//!
//! Each accepted connection is one session with a fresh random id. Every
//! line is decoded as a [`ClientMessage`] and answered with exactly one
//! [`ServerMessage`] line. Handling runs on the blocking pool because
//! verification re-executes shaders.
//!
//! Frames are read through a [`MAX_FRAME_BYTES`] cap. An oversized line is
//! discarded in bounded chunks and answered with an error, and the session
//! continues with the next line.

use crate::config::ProtocolConfig;
use crate::hashing::random_token;
use crate::messages::{ClientMessage, ErrorMessage, ServerMessage};
use crate::server::DrmServer;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

/// Largest accepted frame, excluding its newline.
pub const MAX_FRAME_BYTES: usize = 1 << 20;

const FRAME_TOO_LARGE: &str = "frame too large";

#[derive(Debug, PartialEq, Eq)]
enum Frame {
    Line,
    Oversized,
    Eof,
}

/// Listener settings.
#[derive(Debug, Clone)]
pub struct DrmServerConfig {
    /// Socket to bind.
    pub listen: SocketAddr,
    /// Protocol settings for the server.
    pub protocol: ProtocolConfig,
}

impl DrmServerConfig {
    /// Config listening on `listen` with `protocol` settings.
    pub fn new(listen: SocketAddr, protocol: ProtocolConfig) -> Self {
        Self { listen, protocol }
    }
}

/// Start the protocol service and serve sessions until the process exits.
pub async fn run_drm_server(cfg: DrmServerConfig) -> io::Result<()> {
    let listener = TcpListener::bind(cfg.listen).await?;
    let server = Arc::new(DrmServer::new(cfg.protocol));
    info!(addr = %cfg.listen, version = %server.manifest().version, "listening");
    serve(listener, server).await
}

/// Accepts connections on an already bound listener.
pub async fn serve(listener: TcpListener, server: Arc<DrmServer>) -> io::Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        let server = Arc::clone(&server);
        tokio::spawn(async move {
            if let Err(err) = handle_connection(stream, server).await {
                warn!(%peer, %err, "connection error");
            }
        });
    }
}

async fn handle_connection(stream: TcpStream, server: Arc<DrmServer>) -> io::Result<()> {
    let session = random_token();
    debug!(%session, "session opened");
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut line = Vec::new();
    loop {
        let reply = match read_frame(&mut reader, &mut line).await? {
            Frame::Eof => break,
            Frame::Oversized => {
                warn!(%session, "oversized frame discarded");
                error_message(FRAME_TOO_LARGE)
            }
            Frame::Line if line.iter().all(u8::is_ascii_whitespace) => continue,
            Frame::Line => match serde_json::from_slice::<ClientMessage>(&line) {
                Ok(message) => dispatch(&server, &session, message).await,
                Err(err) => error_message(format!("malformed message: {err}")),
            },
        };
        let mut frame = serde_json::to_vec(&reply)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        frame.push(b'\n');
        write_half.write_all(&frame).await?;
    }
    debug!(%session, "session closed");
    Ok(())
}

/// Reads one newline-terminated frame into `buf`, never buffering more than
/// `MAX_FRAME_BYTES + 1` bytes.
async fn read_frame<R>(reader: &mut R, buf: &mut Vec<u8>) -> io::Result<Frame>
where
    R: AsyncBufRead + Unpin,
{
    let limit = MAX_FRAME_BYTES as u64 + 1;
    buf.clear();
    if (&mut *reader).take(limit).read_until(b'\n', buf).await? == 0 {
        return Ok(Frame::Eof);
    }
    if buf.ends_with(b"\n") || buf.len() <= MAX_FRAME_BYTES {
        return Ok(Frame::Line);
    }
    loop {
        buf.clear();
        let read = (&mut *reader).take(limit).read_until(b'\n', buf).await?;
        if read == 0 || buf.ends_with(b"\n") {
            break;
        }
    }
    buf.clear();
    Ok(Frame::Oversized)
}

async fn dispatch(server: &Arc<DrmServer>, session: &str, message: ClientMessage) -> ServerMessage {
    let server = Arc::clone(server);
    let session = session.to_string();
    let outcome = tokio::task::spawn_blocking(move || server.handle(&session, message)).await;
    match outcome {
        Ok(Ok(reply)) => reply,
        Ok(Err(err)) => error_message(err.to_string()),
        Err(err) => error_message(format!("handler failed: {err}")),
    }
}

fn error_message(error: impl Into<String>) -> ServerMessage {
    ServerMessage::Error(ErrorMessage {
        error: error.into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientSession;
    use crate::shader::ShaderRegistry;
    use crate::solver::ClientSolver;

    async fn exchange(
        writer: &mut tokio::net::tcp::OwnedWriteHalf,
        lines: &mut tokio::io::Lines<BufReader<tokio::net::tcp::OwnedReadHalf>>,
        message: &ClientMessage,
    ) -> ServerMessage {
        let mut frame = serde_json::to_vec(message).unwrap();
        frame.push(b'\n');
        writer.write_all(&frame).await.unwrap();
        let line = lines.next_line().await.unwrap().unwrap();
        serde_json::from_str(&line).unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn session_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = Arc::new(DrmServer::new(ProtocolConfig::default()));
        tokio::spawn(serve(listener, server));

        let stream = TcpStream::connect(addr).await.unwrap();
        let (read_half, mut writer) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();
        let cfg = ProtocolConfig::default();
        let mut client = ClientSession::new(
            ClientSolver::new("tcp", cfg.version, ShaderRegistry::new(cfg.build_salt)),
            cfg.state_proof_links,
        );

        let ack = exchange(&mut writer, &mut lines, &client.init_message()).await;
        let response = client.handle(ack).unwrap().unwrap();
        let verdict = exchange(&mut writer, &mut lines, &response).await;
        client.handle(verdict).unwrap();
        assert_eq!(client.trust_score(), Some(55));

        writer.write_all(b"{\"type\":\"bogus\"}\n").await.unwrap();
        let line = lines.next_line().await.unwrap().unwrap();
        let reply: ServerMessage = serde_json::from_str(&line).unwrap();
        assert!(matches!(reply, ServerMessage::Error(_)));
    }

    #[tokio::test]
    async fn frames_are_capped() {
        let mut input = vec![b'x'; MAX_FRAME_BYTES + 10];
        input.push(b'\n');
        input.extend_from_slice(b"{}\n");
        input.extend(vec![b'y'; MAX_FRAME_BYTES]);
        input.push(b'\n');
        let mut reader = &input[..];
        let mut buf = Vec::new();

        assert_eq!(read_frame(&mut reader, &mut buf).await.unwrap(), Frame::Oversized);
        assert!(buf.is_empty());
        assert_eq!(read_frame(&mut reader, &mut buf).await.unwrap(), Frame::Line);
        assert_eq!(buf, b"{}\n");
        assert_eq!(read_frame(&mut reader, &mut buf).await.unwrap(), Frame::Line);
        assert_eq!(buf.len(), MAX_FRAME_BYTES + 1);
        assert_eq!(read_frame(&mut reader, &mut buf).await.unwrap(), Frame::Eof);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn oversized_frame_is_refused_and_session_continues() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = Arc::new(DrmServer::new(ProtocolConfig::default()));
        tokio::spawn(serve(listener, server));

        let stream = TcpStream::connect(addr).await.unwrap();
        let (read_half, mut writer) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();

        let mut oversized = vec![b' '; MAX_FRAME_BYTES * 2];
        oversized.push(b'\n');
        writer.write_all(&oversized).await.unwrap();
        let line = lines.next_line().await.unwrap().unwrap();
        match serde_json::from_str::<ServerMessage>(&line).unwrap() {
            ServerMessage::Error(err) => assert_eq!(err.error, FRAME_TOO_LARGE),
            other => panic!("unexpected reply {other:?}"),
        }

        let cfg = ProtocolConfig::default();
        let client = ClientSession::new(
            ClientSolver::new("tcp", cfg.version, ShaderRegistry::new(cfg.build_salt)),
            cfg.state_proof_links,
        );
        let ack = exchange(&mut writer, &mut lines, &client.init_message()).await;
        assert!(matches!(ack, ServerMessage::InitAck(_)));
    }
}
