//! Producer fan-out
//!
//! Holds one persistent TCP connection per producer endpoint and writes a
//! single `<rate>\n` line per scale-out. Connections are opened eagerly at
//! startup; an endpoint that was unreachable then is retried when it is
//! next dispatched to.

use crate::error::{ScalerError, ScalerResult};
use std::fmt;
use std::io;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Upper bound on a single connect attempt
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// One producer host accepting rate commands
#[derive(Debug)]
pub struct ProducerEndpoint {
    pub host: String,
    pub port: u16,
    conn: Option<TcpStream>,
}

impl ProducerEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            conn: None,
        }
    }

    /// Parse a `host:port` item
    pub fn parse(item: &str) -> ScalerResult<Self> {
        let item = item.trim();
        let (host, port) = item
            .rsplit_once(':')
            .ok_or_else(|| ScalerError::BadConfig(format!("producer endpoint \"{}\" is not host:port", item)))?;

        if host.is_empty() {
            return Err(ScalerError::BadConfig(format!("producer endpoint \"{}\" has no host", item)));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| ScalerError::BadConfig(format!("producer endpoint \"{}\" has a bad port", item)))?;

        Ok(Self::new(host, port))
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    async fn connect(&mut self) -> ScalerResult<()> {
        let address = self.address();
        let stream = match timeout(CONNECT_TIMEOUT, TcpStream::connect(&address)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                return Err(ScalerError::EndpointUnreachable {
                    endpoint: address,
                    source,
                })
            }
            Err(_) => {
                return Err(ScalerError::EndpointUnreachable {
                    endpoint: address,
                    source: io::Error::new(io::ErrorKind::TimedOut, "connect timed out"),
                })
            }
        };

        stream.set_nodelay(true).ok();
        self.conn = Some(stream);
        Ok(())
    }

    async fn send(&mut self, payload: &[u8]) -> io::Result<()> {
        match self.conn.as_mut() {
            Some(conn) => {
                conn.write_all(payload).await?;
                conn.flush().await
            }
            None => Err(io::Error::new(io::ErrorKind::NotConnected, "no connection")),
        }
    }
}

impl fmt::Display for ProducerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// The fixed set of producer endpoints
#[derive(Debug)]
pub struct ProducerFanout {
    endpoints: Vec<ProducerEndpoint>,
}

impl ProducerFanout {
    pub fn new(endpoints: Vec<ProducerEndpoint>) -> ScalerResult<Self> {
        if endpoints.is_empty() {
            return Err(ScalerError::BadConfig(
                "at least one producer endpoint is required".to_string(),
            ));
        }
        Ok(Self { endpoints })
    }

    /// Parse a comma-separated `host:port` list
    pub fn parse(csv: &str) -> ScalerResult<Self> {
        let endpoints = csv
            .split(',')
            .filter(|item| !item.trim().is_empty())
            .map(ProducerEndpoint::parse)
            .collect::<ScalerResult<Vec<_>>>()?;

        Self::new(endpoints)
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn endpoints(&self) -> &[ProducerEndpoint] {
        &self.endpoints
    }

    pub fn connected_count(&self) -> usize {
        self.endpoints.iter().filter(|e| e.is_connected()).count()
    }

    /// Open every connection. Failures are logged per endpoint and do not
    /// prevent the others; returns how many endpoints are connected.
    pub async fn connect_all(&mut self) -> usize {
        for endpoint in &mut self.endpoints {
            match endpoint.connect().await {
                Ok(()) => info!(endpoint = %endpoint, "Connected to producer"),
                Err(e) => warn!(error = %e, "Producer endpoint unreachable at startup"),
            }
        }
        self.connected_count()
    }

    /// Command the producer at `index` to add `rate` units of load.
    ///
    /// A missing connection is opened first. A failed write drops the
    /// connection so the next dispatch to this endpoint reconnects.
    pub async fn dispatch(&mut self, index: usize, rate: u64) -> ScalerResult<()> {
        let count = self.endpoints.len();
        let endpoint = self
            .endpoints
            .get_mut(index)
            .ok_or_else(|| ScalerError::BadConfig(format!("producer index {} out of range 0..{}", index, count)))?;

        if !endpoint.is_connected() {
            debug!(endpoint = %endpoint, "Reconnecting to producer");
            endpoint.connect().await?;
        }

        let payload = format!("{}\n", rate);
        if let Err(source) = endpoint.send(payload.as_bytes()).await {
            endpoint.conn = None;
            return Err(ScalerError::EndpointUnreachable {
                endpoint: endpoint.address(),
                source,
            });
        }

        debug!(endpoint = %endpoint, rate = rate, "Dispatched rate command");
        Ok(())
    }

    /// Release all connections
    pub async fn close_all(&mut self) {
        for endpoint in &mut self.endpoints {
            if let Some(mut conn) = endpoint.conn.take() {
                if let Err(e) = conn.shutdown().await {
                    debug!(endpoint = %endpoint, error = %e, "Error closing producer connection");
                }
            }
        }
    }
}
