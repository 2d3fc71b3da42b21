//! Client for the autoscaler control port

use anyhow::{bail, Context, Result};
use autoscaler_lib::models::StatusLine;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// One-command-per-connection client
pub struct ControlClient {
    address: String,
    timeout: Duration,
}

impl ControlClient {
    /// Create a client; `timeout` bounds each whole exchange
    pub fn new(address: impl Into<String>, timeout: Duration) -> Self {
        Self {
            address: address.into(),
            timeout,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Send one command line and return everything the server replies.
    ///
    /// The controller only accepts between ticks, so the reply can take up
    /// to one tick to arrive.
    pub async fn send(&self, command: &str) -> Result<String> {
        timeout(self.timeout, self.exchange(command))
            .await
            .with_context(|| format!("no reply from {} within {:?}", self.address, self.timeout))?
    }

    async fn exchange(&self, command: &str) -> Result<String> {
        let mut stream = TcpStream::connect(&self.address)
            .await
            .with_context(|| format!("Failed to connect to {}", self.address))?;

        stream
            .write_all(format!("{}\n", command).as_bytes())
            .await
            .context("Failed to send command")?;
        stream.shutdown().await.context("Failed to send command")?;

        let mut reply = String::new();
        stream
            .read_to_string(&mut reply)
            .await
            .context("Failed to read reply")?;
        Ok(reply)
    }

    /// Fetch the most recent status line
    pub async fn get_data(&self) -> Result<StatusLine> {
        let reply = self.send("get_data").await?;
        let line = reply.trim();
        if line.is_empty() {
            bail!("controller has no status line yet");
        }
        line.parse().context("Controller replied with a malformed status line")
    }

    /// Ask the controller to end the run
    pub async fn quit(&self) -> Result<()> {
        self.send("quit").await.map(|_| ())
    }
}
