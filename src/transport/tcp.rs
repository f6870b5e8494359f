use super::{LineBuffer, Transport};
use crate::config::NetworkConfig;
use crate::error::{Result, TransportError};
use crate::protocol::ProtocolController;

use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// TCP server answering each request line with one response line.
///
/// At most `max_connections` clients are served at once; further clients
/// are accepted but wait for a free slot.
pub struct TcpTransport {
    listener: TcpListener,
    controller: ProtocolController,
    slots: Arc<Semaphore>,
}

impl TcpTransport {
    pub async fn bind(config: &NetworkConfig, controller: ProtocolController) -> Result<Self> {
        let address = format!("{}:{}", config.ip, config.port);
        let listener = TcpListener::bind(&address)
            .await
            .map_err(|source| TransportError::BindFailed {
                address: address.clone(),
                source,
            })?;

        info!("TCP transport listening on {}", address);

        Ok(Self {
            listener,
            controller,
            slots: Arc::new(Semaphore::new(config.max_connections.max(1))),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn name(&self) -> &'static str {
        "tcp"
    }

    async fn serve(&self, cancel: CancellationToken) -> Result<()> {
        loop {
            let (stream, peer) = tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(connection) => connection,
                    Err(e) => {
                        warn!("Failed to accept connection: {}", e);
                        continue;
                    }
                },
            };

            let controller = self.controller.clone();
            let slots = Arc::clone(&self.slots);
            let cancel = cancel.child_token();

            tokio::spawn(async move {
                let _permit = tokio::select! {
                    _ = cancel.cancelled() => return,
                    permit = slots.acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => return,
                    },
                };

                info!("Client connected: {}", peer);
                if let Err(e) = handle_connection(stream, &controller, &cancel).await {
                    debug!("Connection {} ended with error: {}", peer, e);
                }
                info!("Client disconnected: {}", peer);
            });
        }

        info!("TCP transport stopped");
        Ok(())
    }
}

async fn handle_connection(
    stream: TcpStream,
    controller: &ProtocolController,
    cancel: &CancellationToken,
) -> std::io::Result<()> {
    let (mut reader, mut writer) = stream.into_split();
    let mut lines = LineBuffer::new();
    let mut buf = [0u8; 512];

    loop {
        let read = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            read = reader.read(&mut buf) => read?,
        };

        if read == 0 {
            return Ok(());
        }

        for line in lines.push(&buf[..read]) {
            let response = controller.handle_line(&line).await;
            if let Err(e) = writer.write_all(response.to_line().as_bytes()).await {
                error!("Failed to send response: {}", e);
                return Err(e);
            }
        }
    }
}
