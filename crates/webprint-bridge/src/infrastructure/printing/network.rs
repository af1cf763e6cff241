//! Raw TCP printing.
//!
//! Most receipt and label printers accept a raw job on TCP port 9100: the
//! client connects, writes the bytes and closes the connection.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{info, instrument};

use crate::application::devices::{DeviceError, SocketSink};

/// [`SocketSink`] that writes jobs to network printers over TCP.
#[derive(Debug, Clone)]
pub struct NetworkPrinter {
    timeout: Duration,
}

impl Default for NetworkPrinter {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

impl NetworkPrinter {
    /// `timeout` bounds both the connect and the write.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl SocketSink for NetworkPrinter {
    #[instrument(skip(self, data), fields(data_len = data.len()))]
    async fn send(&self, addr: &str, data: &[u8]) -> Result<(), DeviceError> {
        let mut stream = tokio::time::timeout(self.timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| DeviceError::Timeout(format!("connecting to {addr}")))?
            .map_err(|e| DeviceError::Socket(format!("{addr}: {e}")))?;

        let write = async {
            stream.write_all(data).await?;
            stream.flush().await?;
            stream.shutdown().await
        };
        tokio::time::timeout(self.timeout, write)
            .await
            .map_err(|_| DeviceError::Timeout(format!("writing to {addr}")))?
            .map_err(|e| DeviceError::Socket(format!("{addr}: {e}")))?;

        info!("raw socket job sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_send_delivers_all_bytes_then_closes() {
        // Arrange
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let receiver = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut received = Vec::new();
            socket.read_to_end(&mut received).await.unwrap();
            received
        });

        // Act
        NetworkPrinter::default().send(&addr, b"\x1B@Hello\n").await.unwrap();

        // Assert
        assert_eq!(receiver.await.unwrap(), b"\x1B@Hello\n");
    }

    #[tokio::test]
    async fn test_send_to_closed_port_is_socket_error() {
        // Arrange: bind then drop to get a port nobody listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        // Act
        let result = NetworkPrinter::default().send(&addr, b"x").await;

        // Assert
        assert!(matches!(result, Err(DeviceError::Socket(_))));
    }
}
