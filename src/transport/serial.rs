//! RS-232 transport.
//!
//! `serialport` is blocking, so every exchange runs on Tokio's blocking pool.

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use parking_lot::Mutex;
use serialport::SerialPort;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::Transport;
use crate::error::TransportError;

/// Serial port exchanging delimiter-terminated messages.
pub struct SerialTransport {
    /// Device path such as `/dev/ttyUSB0` or `COM3`.
    port_name: String,
    baud_rate: u32,
    timeout: Duration,
    write_termination: String,
    read_termination: u8,
    port: Option<Arc<Mutex<Box<dyn SerialPort>>>>,
}

impl SerialTransport {
    pub fn new(port_name: &str, baud_rate: u32, timeout: Duration) -> Self {
        Self {
            port_name: port_name.to_string(),
            baud_rate,
            timeout,
            write_termination: "\r\n".to_string(),
            read_termination: b'\n',
            port: None,
        }
    }

    pub fn with_termination(mut self, write: &str, read: u8) -> Self {
        self.write_termination = write.to_string();
        self.read_termination = read;
        self
    }

    fn port(&self) -> Result<Arc<Mutex<Box<dyn SerialPort>>>, TransportError> {
        self.port.clone().ok_or(TransportError::NotConnected)
    }
}

fn write_line(port: &mut dyn SerialPort, message: &str) -> anyhow::Result<()> {
    use std::io::Write;
    port.write_all(message.as_bytes())
        .context("Failed to write to serial port")?;
    port.flush().context("Failed to flush serial port")?;
    Ok(())
}

#[async_trait]
impl Transport for SerialTransport {
    fn name(&self) -> &str {
        "serial"
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    async fn open(&mut self) -> Result<(), TransportError> {
        let port_name = self.port_name.clone();
        let baud_rate = self.baud_rate;
        let port = tokio::task::spawn_blocking(move || {
            serialport::new(&port_name, baud_rate)
                .timeout(Duration::from_millis(100))
                .open()
                .with_context(|| format!("Failed to open serial port '{port_name}' at {baud_rate} baud"))
        })
        .await
        .context("Serial I/O task panicked")??;
        self.port = Some(Arc::new(Mutex::new(port)));
        debug!(port = %self.port_name, baud_rate, "serial port opened");
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.port.take().is_some() {
            debug!(port = %self.port_name, "serial port closed");
        }
        Ok(())
    }

    async fn write(&mut self, command: &str) -> Result<(), TransportError> {
        let port = self.port()?;
        let message = format!("{command}{}", self.write_termination);
        tokio::task::spawn_blocking(move || {
            let mut guard = port.lock();
            write_line(&mut **guard, &message)
        })
        .await
        .context("Serial I/O task panicked")??;
        Ok(())
    }

    async fn query(&mut self, command: &str) -> Result<String, TransportError> {
        let port = self.port()?;
        let message = format!("{command}{}", self.write_termination);
        let delimiter = self.read_termination;
        let timeout = self.timeout;

        let response = tokio::task::spawn_blocking(move || -> anyhow::Result<String> {
            use std::io::Read;

            let mut guard = port.lock();
            write_line(&mut **guard, &message)?;

            let mut response = Vec::new();
            let mut byte = [0u8; 1];
            let started = std::time::Instant::now();
            loop {
                if started.elapsed() > timeout {
                    return Err(anyhow!("Serial read timeout after {timeout:?}"));
                }
                match guard.read(&mut byte) {
                    Ok(0) => return Err(anyhow!("Unexpected EOF from serial port")),
                    Ok(_) => {
                        response.push(byte[0]);
                        if byte[0] == delimiter {
                            break;
                        }
                    }
                    // The port timeout is shorter than ours.
                    Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
                    Err(e) => return Err(anyhow!("Serial read error: {e}")),
                }
            }
            Ok(String::from_utf8_lossy(&response).trim().to_string())
        })
        .await
        .context("Serial I/O task panicked")??;

        debug!(command, %response, "serial exchange");
        Ok(response)
    }
}
