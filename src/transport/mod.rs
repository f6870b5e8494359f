mod serial;
mod tcp;

#[cfg(test)]
mod tests;

pub use serial::{baud_rate_constant, push_notification, SerialTransport};
pub use tcp::TcpTransport;

use crate::error::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// A link carrying request lines to a protocol controller
#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &'static str;

    /// Serve requests until `cancel` fires
    async fn serve(&self, cancel: CancellationToken) -> Result<()>;
}

/// Splits a byte stream into trimmed, non-empty request lines
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

/// Longest partial line kept while waiting for its newline
const MAX_LINE_BYTES: usize = 1024;

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append received bytes and return every line they complete
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);

        let mut lines = Vec::new();
        while let Some(end) = self.pending.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=end).collect();
            let line = String::from_utf8_lossy(&raw).trim().to_string();
            if !line.is_empty() {
                lines.push(line);
            }
        }

        if self.pending.len() > MAX_LINE_BYTES {
            tracing::warn!("Discarding {} bytes without a newline", self.pending.len());
            self.pending.clear();
        }

        lines
    }
}
