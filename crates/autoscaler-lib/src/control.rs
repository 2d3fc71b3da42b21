//! Operator control port
//!
//! A listening socket polled once per tick with a bounded accept. Each
//! connection carries one command line: `bye` or `quit` end the run,
//! `get_data` is answered with the most recent status line.

use crate::error::ScalerResult;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::debug;

pub const DEFAULT_LISTEN_PORT: u16 = 8888;
pub const DEFAULT_ACCEPT_TIMEOUT: Duration = Duration::from_millis(3000);

/// How long an accepted client may take to send its command
const READ_TIMEOUT: Duration = Duration::from_secs(3);

/// Longest command line read from a client, newline included
const MAX_COMMAND_LEN: u64 = 256;

/// A command received on the control port
#[derive(Debug)]
pub enum ControlCommand {
    /// End the run after the current tick
    Quit,
    /// Reply with the last status line
    GetData(ControlReply),
    Unknown(String),
}

impl ControlCommand {
    fn parse(line: &str, stream: TcpStream) -> Self {
        match line {
            "bye" | "quit" => ControlCommand::Quit,
            "get_data" => ControlCommand::GetData(ControlReply { stream }),
            other => ControlCommand::Unknown(other.to_string()),
        }
    }
}

/// The client connection a `get_data` reply is written to
#[derive(Debug)]
pub struct ControlReply {
    stream: TcpStream,
}

impl ControlReply {
    /// Write `line` plus a newline, then close the connection.
    pub async fn send(mut self, line: &str) -> ScalerResult<()> {
        self.stream.write_all(line.as_bytes()).await?;
        self.stream.write_all(b"\n").await?;
        self.stream.shutdown().await?;
        Ok(())
    }
}

pub struct ControlServer {
    listener: TcpListener,
    accept_timeout: Duration,
}

impl ControlServer {
    /// Listen on all interfaces at `port` (0 picks a free port).
    pub async fn bind(port: u16, accept_timeout: Duration) -> ScalerResult<Self> {
        let listener = TcpListener::bind(("0.0.0.0", port)).await?;
        Ok(Self {
            listener,
            accept_timeout,
        })
    }

    pub fn local_addr(&self) -> ScalerResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn accept_timeout(&self) -> Duration {
        self.accept_timeout
    }

    /// Wait up to the accept timeout for one client and read its command.
    ///
    /// Returns `None` when nobody connected in time.
    pub async fn poll(&self) -> ScalerResult<Option<ControlCommand>> {
        let (stream, peer) = match timeout(self.accept_timeout, self.listener.accept()).await {
            Ok(accepted) => accepted?,
            Err(_) => return Ok(None),
        };

        let mut reader = BufReader::new(stream).take(MAX_COMMAND_LEN);
        let mut line = String::new();
        match timeout(READ_TIMEOUT, reader.read_line(&mut line)).await {
            Ok(read) => {
                read?;
            }
            Err(_) => {
                return Err(io::Error::new(io::ErrorKind::TimedOut, "control client sent no command").into());
            }
        }
        if reader.limit() == 0 && !line.ends_with('\n') {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "control command too long").into());
        }

        let command = line.trim();
        debug!(peer = %peer, command = %command, "Control command received");
        Ok(Some(ControlCommand::parse(command, reader.into_inner().into_inner())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    async fn server() -> (ControlServer, SocketAddr) {
        let server = ControlServer::bind(0, Duration::from_millis(200)).await.unwrap();
        let port = server.local_addr().unwrap().port();
        (server, SocketAddr::from(([127, 0, 0, 1], port)))
    }

    async fn send_command(address: SocketAddr, command: &'static str) -> String {
        let mut stream = TcpStream::connect(address).await.unwrap();
        stream.write_all(command.as_bytes()).await.unwrap();
        stream.shutdown().await.unwrap();
        let mut reply = String::new();
        stream.read_to_string(&mut reply).await.unwrap();
        reply
    }

    #[tokio::test]
    async fn test_poll_times_out_without_client() {
        let (server, _) = server().await;
        assert!(server.poll().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_quit_and_bye() {
        let (server, address) = server().await;

        for command in ["quit\n", "bye\n", "bye"] {
            let client = tokio::spawn(send_command(address, command));
            assert!(matches!(server.poll().await.unwrap(), Some(ControlCommand::Quit)));
            assert_eq!(client.await.unwrap(), "");
        }
    }

    #[tokio::test]
    async fn test_get_data_replies_and_closes() {
        let (server, address) = server().await;
        let client = tokio::spawn(send_command(address, "get_data\r\n"));

        match server.poll().await.unwrap() {
            Some(ControlCommand::GetData(reply)) => {
                reply.send("1700000000000, 1.000, 2.000, 3.000").await.unwrap();
            }
            other => panic!("unexpected command: {:?}", other),
        }

        assert_eq!(client.await.unwrap(), "1700000000000, 1.000, 2.000, 3.000\n");
    }

    #[tokio::test]
    async fn test_unknown_command() {
        let (server, address) = server().await;
        let client = tokio::spawn(send_command(address, "restart\n"));

        match server.poll().await.unwrap() {
            Some(ControlCommand::Unknown(line)) => assert_eq!(line, "restart"),
            other => panic!("unexpected command: {:?}", other),
        }
        assert_eq!(client.await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_overlong_command_rejected() {
        let (server, address) = server().await;
        let mut client = TcpStream::connect(address).await.unwrap();
        client.write_all(&[b'x'; 1024]).await.unwrap();

        let err = server.poll().await.unwrap_err();
        assert!(err.to_string().contains("too long"), "unexpected error: {}", err);
    }

    #[tokio::test]
    async fn test_command_at_length_limit_accepted() {
        let (server, address) = server().await;
        let command: &'static str = Box::leak(format!("{}\n", "y".repeat(255)).into_boxed_str());
        let client = tokio::spawn(send_command(address, command));

        match server.poll().await.unwrap() {
            Some(ControlCommand::Unknown(line)) => assert_eq!(line.len(), 255),
            other => panic!("unexpected command: {:?}", other),
        }
        client.await.unwrap();
    }

    #[test]
    fn test_defaults() {
        assert_eq!(DEFAULT_LISTEN_PORT, 8888);
        assert_eq!(DEFAULT_ACCEPT_TIMEOUT, Duration::from_secs(3));
    }
}
