//! Trait abstraction for the GPS byte stream to enable testing

use bytes::{Buf, Bytes, BytesMut};
use std::io;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info, warn};

use crate::error::{LoggerError, Result};

/// Chunks buffered between the serial reader task and the control loop
const CHANNEL_CAPACITY: usize = 64;

/// Read size of the serial reader task
const READ_CHUNK: usize = 256;

/// Non-blocking source of raw GPS bytes
pub trait ByteStream: Send {
    /// Copy pending bytes into `buf`
    ///
    /// Returns `Ok(0)` when nothing is pending. Never waits for data.
    fn try_read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

/// GPS receiver on a serial port
///
/// A reader task owns the port and forwards chunks over a channel, so the
/// control loop can drain whatever has arrived without waiting.
pub struct SerialGpsStream {
    rx: Option<mpsc::Receiver<Bytes>>,
    pending: Bytes,
    port_path: String,
}

impl std::fmt::Debug for SerialGpsStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialGpsStream")
            .field("port_path", &self.port_path)
            .finish_non_exhaustive()
    }
}

impl SerialGpsStream {
    /// Open the GPS serial port (8N1) and start the reader task
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`LoggerError::Serial`] if the port cannot be opened
    pub fn open(path: &str, baud_rate: u32) -> Result<Self> {
        let port = tokio_serial::new(path, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| LoggerError::Serial(format!("Failed to open {}: {}", path, e)))?;

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        tokio::spawn(read_loop(port, tx, path.to_string()));

        info!("GPS serial port opened at {} ({} baud)", path, baud_rate);

        Ok(Self {
            rx: Some(rx),
            pending: Bytes::new(),
            port_path: path.to_string(),
        })
    }

    /// A stream that never yields data, used when no GPS port is available
    pub fn detached(path: &str) -> Self {
        Self {
            rx: None,
            pending: Bytes::new(),
            port_path: path.to_string(),
        }
    }

    pub fn port_path(&self) -> &str {
        &self.port_path
    }
}

impl ByteStream for SerialGpsStream {
    fn try_read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pending.is_empty() {
            let Some(rx) = self.rx.as_mut() else {
                return Ok(0);
            };

            match rx.try_recv() {
                Ok(chunk) => self.pending = chunk,
                Err(TryRecvError::Empty) => return Ok(0),
                Err(TryRecvError::Disconnected) => {
                    self.rx = None;
                    return Err(io::Error::new(
                        io::ErrorKind::BrokenPipe,
                        format!("GPS reader for {} stopped", self.port_path),
                    ));
                }
            }
        }

        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.advance(n);
        Ok(n)
    }
}

async fn read_loop(mut port: tokio_serial::SerialStream, tx: mpsc::Sender<Bytes>, path: String) {
    let mut buf = BytesMut::with_capacity(READ_CHUNK);

    loop {
        buf.reserve(READ_CHUNK);
        match port.read_buf(&mut buf).await {
            Ok(0) => {
                warn!("GPS serial port {} closed", path);
                break;
            }
            Ok(n) => {
                debug!("Read {} bytes from {}", n, path);
                if tx.send(buf.split().freeze()).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!("Failed to read GPS serial port {}: {}", path, e);
                break;
            }
        }
    }
}

#[cfg(test)]
pub mod mocks {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// Mock byte stream for testing
    #[derive(Clone, Default)]
    pub struct MockByteStream {
        pub pending: Arc<Mutex<VecDeque<u8>>>,
        pub read_error: Arc<Mutex<Option<io::ErrorKind>>>,
    }

    impl MockByteStream {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn push(&self, data: &[u8]) {
            self.pending.lock().unwrap().extend(data.iter().copied());
        }

        pub fn set_read_error(&self, error: io::ErrorKind) {
            *self.read_error.lock().unwrap() = Some(error);
        }

        pub fn remaining(&self) -> usize {
            self.pending.lock().unwrap().len()
        }
    }

    impl ByteStream for MockByteStream {
        fn try_read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if let Some(error) = *self.read_error.lock().unwrap() {
                return Err(io::Error::new(error, "Mock read error"));
            }

            let mut pending = self.pending.lock().unwrap();
            let n = buf.len().min(pending.len());
            for (slot, byte) in buf.iter_mut().zip(pending.drain(..n)) {
                *slot = byte;
            }
            Ok(n)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detached_stream_yields_nothing() {
        let mut stream = SerialGpsStream::detached("/dev/serial0");
        let mut buf = [0u8; 16];

        assert_eq!(stream.try_read(&mut buf).unwrap(), 0);
        assert_eq!(stream.port_path(), "/dev/serial0");
    }

    #[tokio::test]
    async fn test_open_invalid_port_returns_error() {
        let result = SerialGpsStream::open("/dev/nonexistent_gps_device_12345", 9600);

        match result {
            Err(LoggerError::Serial(msg)) => {
                assert!(msg.contains("/dev/nonexistent_gps_device_12345"));
                assert!(msg.contains("Failed to open"));
            }
            other => panic!("Expected Serial error, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_chunks_split_across_reads() {
        let (tx, rx) = mpsc::channel(4);
        let mut stream = SerialGpsStream {
            rx: Some(rx),
            pending: Bytes::new(),
            port_path: "test".to_string(),
        };

        tx.send(Bytes::from_static(b"$GPGGA,")).await.unwrap();
        tx.send(Bytes::from_static(b"123519")).await.unwrap();

        let mut buf = [0u8; 4];
        let mut collected = Vec::new();
        loop {
            let n = stream.try_read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            collected.extend_from_slice(&buf[..n]);
        }

        assert_eq!(collected, b"$GPGGA,123519");
    }

    #[tokio::test]
    async fn test_reader_gone_reports_broken_pipe_once() {
        let (tx, rx) = mpsc::channel(4);
        let mut stream = SerialGpsStream {
            rx: Some(rx),
            pending: Bytes::new(),
            port_path: "test".to_string(),
        };
        drop(tx);

        let mut buf = [0u8; 4];
        let err = stream.try_read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
        assert_eq!(stream.try_read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_mock_stream_drains_in_order() {
        let mut stream = mocks::MockByteStream::new();
        stream.push(b"abcdef");

        let mut buf = [0u8; 4];
        assert_eq!(stream.try_read(&mut buf).unwrap(), 4);
        assert_eq!(&buf, b"abcd");
        assert_eq!(stream.remaining(), 2);
    }
}
