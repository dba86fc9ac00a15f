//! Line-oriented TCP transport (raw socket instruments).

use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::debug;

use super::Transport;
use crate::error::TransportError;

/// TCP connection exchanging newline-terminated messages.
pub struct TcpTransport {
    address: String,
    timeout: Duration,
    write_termination: String,
    read_termination: u8,
    stream: Option<BufReader<TcpStream>>,
}

impl TcpTransport {
    pub fn new(address: &str, timeout: Duration) -> Self {
        Self {
            address: address.to_string(),
            timeout,
            write_termination: "\n".to_string(),
            read_termination: b'\n',
            stream: None,
        }
    }

    pub fn with_termination(mut self, write: &str, read: u8) -> Self {
        self.write_termination = write.to_string();
        self.read_termination = read;
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    fn stream(&mut self) -> Result<&mut BufReader<TcpStream>, TransportError> {
        self.stream.as_mut().ok_or(TransportError::NotConnected)
    }

    async fn send(&mut self, command: &str) -> Result<(), TransportError> {
        let message = format!("{command}{}", self.write_termination);
        let stream = self.stream()?;
        stream.get_mut().write_all(message.as_bytes()).await?;
        stream.get_mut().flush().await?;
        Ok(())
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn name(&self) -> &str {
        "tcp"
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    async fn open(&mut self) -> Result<(), TransportError> {
        let stream = tokio::time::timeout(self.timeout, TcpStream::connect(&self.address))
            .await
            .map_err(|_| TransportError::Timeout(self.timeout))??;
        stream.set_nodelay(true)?;
        self.stream = Some(BufReader::new(stream));
        debug!(address = %self.address, "tcp link opened");
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if let Some(mut stream) = self.stream.take() {
            stream.get_mut().shutdown().await?;
            debug!(address = %self.address, "tcp link closed");
        }
        Ok(())
    }

    async fn write(&mut self, command: &str) -> Result<(), TransportError> {
        self.send(command).await
    }

    async fn query(&mut self, command: &str) -> Result<String, TransportError> {
        self.send(command).await?;
        let timeout = self.timeout;
        let delimiter = self.read_termination;
        let stream = self.stream()?;
        let mut buffer = Vec::new();
        let read = tokio::time::timeout(timeout, stream.read_until(delimiter, &mut buffer))
            .await
            .map_err(|_| TransportError::Timeout(timeout))??;
        if read == 0 {
            self.stream = None;
            return Err(TransportError::UnexpectedEof);
        }
        Ok(String::from_utf8_lossy(&buffer).trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_query_roundtrip_over_loopback() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 64];
            let n = socket.read(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], b"*IDN?\n");
            socket.write_all(b"ACME,PSU,0,1.0\n").await.unwrap();
        });

        let mut link = TcpTransport::new(&address, Duration::from_secs(1));
        link.open().await.unwrap();
        assert_eq!(link.query("*IDN?").await.unwrap(), "ACME,PSU,0,1.0");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_query_times_out_without_answer() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_millis(200)).await;
            drop(socket);
        });

        let mut link = TcpTransport::new(&address, Duration::from_millis(50));
        link.open().await.unwrap();
        assert!(matches!(
            link.query("VOLT?").await,
            Err(TransportError::Timeout(_))
        ));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_write_requires_connection() {
        let mut link = TcpTransport::new("127.0.0.1:1", Duration::from_millis(50));
        assert!(matches!(
            link.write("VOLT 1").await,
            Err(TransportError::NotConnected)
        ));
    }
}
