//! Single-frame capture from the printer's camera socket.
//!
//! The camera speaks a small binary protocol over TLS on port 6000. The
//! client sends an 80-byte authentication block, after which the printer
//! streams JPEG frames, each preceded by a 16-byte header whose first three
//! bytes carry the payload length (little-endian).

use std::io::{self, Read, Write};
use std::time::{Duration, Instant};

use crate::error::{BambuError, Result};
use crate::tls::{self, TlsStream};

/// Default camera port.
pub const DEFAULT_CAMERA_PORT: u16 = 6000;

/// Default capture deadline.
pub const DEFAULT_CAPTURE_TIMEOUT: Duration = Duration::from_secs(10);

const AUTH_MAGIC: u32 = 0x40;
const AUTH_KIND: u32 = 0x3000;
const AUTH_FIELD_LEN: usize = 32;
const HEADER_LEN: usize = 16;
const READ_CHUNK: usize = 4096;

const JPEG_START: [u8; 4] = [0xff, 0xd8, 0xff, 0xe0];
const JPEG_END: [u8; 2] = [0xff, 0xd9];

/// Byte stream a frame can be captured from.
pub trait FrameTransport: Read + Write {
    /// Bound the next read. `None` blocks indefinitely.
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()>;
}

impl FrameTransport for TlsStream {
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        TlsStream::set_read_timeout(self, timeout)
    }
}

/// Build the 80-byte authentication block.
pub fn auth_packet(username: &str, access_code: &str) -> [u8; 80] {
    let mut packet = [0u8; 80];
    packet[0..4].copy_from_slice(&AUTH_MAGIC.to_le_bytes());
    packet[4..8].copy_from_slice(&AUTH_KIND.to_le_bytes());
    // Bytes 8..16 are two reserved zero words.
    write_padded(&mut packet[16..48], username.as_bytes());
    write_padded(&mut packet[48..80], access_code.as_bytes());
    packet
}

fn write_padded(field: &mut [u8], value: &[u8]) {
    let len = value.len().min(AUTH_FIELD_LEN);
    field[..len].copy_from_slice(&value[..len]);
}

#[derive(Debug, Default)]
enum ReaderState {
    #[default]
    AwaitingHeader,
    Accumulating {
        target: usize,
        frame: Vec<u8>,
    },
}

/// Incremental frame extractor, fed one read at a time.
///
/// Headers are recognised by read size: only a read of exactly 16 bytes is
/// taken as a header while no frame is in progress.
#[derive(Debug, Default)]
pub struct FrameReader {
    state: ReaderState,
}

impl FrameReader {
    /// Create a reader waiting for a header.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a frame is currently being accumulated.
    pub fn is_accumulating(&self) -> bool {
        matches!(self.state, ReaderState::Accumulating { .. })
    }

    /// Process one read. Returns a frame once a complete, valid JPEG has
    /// been collected.
    pub fn feed(&mut self, chunk: &[u8]) -> Option<Vec<u8>> {
        if chunk.is_empty() {
            return None;
        }

        match &mut self.state {
            ReaderState::AwaitingHeader => {
                if chunk.len() == HEADER_LEN {
                    let target = usize::from(chunk[0])
                        | usize::from(chunk[1]) << 8
                        | usize::from(chunk[2]) << 16;
                    if target > 0 {
                        tracing::trace!(target, "frame header");
                        self.state = ReaderState::Accumulating {
                            target,
                            frame: Vec::with_capacity(target),
                        };
                    }
                }
                None
            }
            ReaderState::Accumulating { target, frame } => {
                frame.extend_from_slice(chunk);
                if frame.len() < *target {
                    return None;
                }
                frame.truncate(*target);

                let ReaderState::Accumulating { frame, .. } = std::mem::take(&mut self.state)
                else {
                    return None;
                };
                if frame.starts_with(&JPEG_START) && frame.ends_with(&JPEG_END) {
                    Some(frame)
                } else {
                    tracing::debug!(len = frame.len(), "discarding frame without JPEG markers");
                    None
                }
            }
        }
    }
}

/// Authenticate on `transport` and read until one JPEG frame arrives.
///
/// Fails with [`BambuError::NoFrame`] when `deadline` passes or the peer
/// closes the stream. Other read errors are returned as-is.
pub fn capture_frame<T: FrameTransport>(
    transport: &mut T,
    username: &str,
    access_code: &str,
    deadline: Duration,
) -> Result<Vec<u8>> {
    transport.write_all(&auth_packet(username, access_code))?;
    transport.flush()?;

    let started = Instant::now();
    let mut reader = FrameReader::new();
    let mut buf = [0u8; READ_CHUNK];

    loop {
        let remaining = deadline.saturating_sub(started.elapsed());
        if remaining.is_zero() {
            tracing::debug!("camera deadline passed");
            return Err(BambuError::NoFrame);
        }
        transport.set_read_timeout(Some(remaining))?;

        match transport.read(&mut buf) {
            Ok(0) => {
                tracing::debug!("camera stream closed by peer");
                return Err(BambuError::NoFrame);
            }
            Ok(n) => {
                if let Some(frame) = reader.feed(&buf[..n]) {
                    return Ok(frame);
                }
            }
            Err(e) => match e.kind() {
                io::ErrorKind::Interrupted => continue,
                io::ErrorKind::WouldBlock
                | io::ErrorKind::TimedOut
                | io::ErrorKind::UnexpectedEof => return Err(BambuError::NoFrame),
                _ => return Err(e.into()),
            },
        }
    }
}

/// Camera connection settings.
#[derive(Debug, Clone)]
pub struct CameraConfig {
    /// Printer host or IP.
    pub host: String,
    /// Camera port.
    pub port: u16,
    /// Username (always `bblp` on current firmware).
    pub username: String,
    /// LAN access code.
    pub access_code: String,
    /// Connect timeout and capture deadline.
    pub timeout: Duration,
}

impl CameraConfig {
    /// Settings with default port, username and timeout.
    pub fn new(host: impl Into<String>, access_code: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_CAMERA_PORT,
            username: crate::DEFAULT_USERNAME.to_string(),
            access_code: access_code.into(),
            timeout: DEFAULT_CAPTURE_TIMEOUT,
        }
    }
}

/// Blocking camera client.
#[derive(Debug, Clone)]
pub struct CameraClient {
    config: CameraConfig,
}

impl CameraClient {
    /// Create a client. No connection is made until [`snapshot`](Self::snapshot).
    pub fn new(config: CameraConfig) -> Self {
        Self { config }
    }

    /// Connect, capture one frame, and close the connection.
    pub fn snapshot(&self) -> Result<Vec<u8>> {
        let config = &self.config;
        let mut stream = TlsStream::connect(
            tls::client_config(),
            &config.host,
            config.port,
            config.timeout,
        )?;
        let frame = capture_frame(
            &mut stream,
            &config.username,
            &config.access_code,
            config.timeout,
        )?;
        tracing::debug!(bytes = frame.len(), "captured camera frame");
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Replays scripted reads, then reports a timeout.
    struct ScriptedTransport {
        reads: VecDeque<io::Result<Vec<u8>>>,
        written: Vec<u8>,
        timeouts: Vec<Option<Duration>>,
    }

    impl ScriptedTransport {
        fn new(reads: Vec<io::Result<Vec<u8>>>) -> Self {
            Self {
                reads: reads.into(),
                written: Vec::new(),
                timeouts: Vec::new(),
            }
        }
    }

    impl Read for ScriptedTransport {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.reads.pop_front() {
                Some(Ok(chunk)) => {
                    buf[..chunk.len()].copy_from_slice(&chunk);
                    Ok(chunk.len())
                }
                Some(Err(e)) => Err(e),
                None => Err(io::Error::new(io::ErrorKind::WouldBlock, "scripted timeout")),
            }
        }
    }

    impl Write for ScriptedTransport {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl FrameTransport for ScriptedTransport {
        fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
            self.timeouts.push(timeout);
            Ok(())
        }
    }

    fn header(len: usize) -> Vec<u8> {
        let mut header = vec![0u8; HEADER_LEN];
        header[0] = (len & 0xff) as u8;
        header[1] = ((len >> 8) & 0xff) as u8;
        header[2] = ((len >> 16) & 0xff) as u8;
        header
    }

    fn jpeg(len: usize) -> Vec<u8> {
        let mut frame = vec![0x11; len];
        frame[..4].copy_from_slice(&JPEG_START);
        frame[len - 2..].copy_from_slice(&JPEG_END);
        frame
    }

    #[test]
    fn test_auth_packet_layout() {
        let packet = auth_packet("bblp", "12345678");
        assert_eq!(&packet[0..4], &[0x40, 0, 0, 0]);
        assert_eq!(&packet[4..8], &[0x00, 0x30, 0, 0]);
        assert_eq!(&packet[8..16], &[0; 8]);
        assert_eq!(&packet[16..20], b"bblp");
        assert!(packet[20..48].iter().all(|b| *b == 0));
        assert_eq!(&packet[48..56], b"12345678");
        assert!(packet[56..80].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_auth_packet_truncates_long_fields() {
        let long = "x".repeat(40);
        let packet = auth_packet(&long, "code");
        assert!(packet[16..48].iter().all(|b| *b == b'x'));
        assert_eq!(&packet[48..52], b"code");
    }

    #[test]
    fn test_capture_single_frame() {
        let frame = jpeg(10);
        let mut transport = ScriptedTransport::new(vec![Ok(header(10)), Ok(frame.clone())]);

        let captured = capture_frame(&mut transport, "bblp", "code", Duration::from_secs(1)).unwrap();
        assert_eq!(captured, frame);
        assert_eq!(transport.written.len(), 80);
        assert!(transport.timeouts.iter().all(Option::is_some));
    }

    #[test]
    fn test_capture_frame_split_across_reads() {
        let frame = jpeg(300);
        let mut transport = ScriptedTransport::new(vec![
            Ok(vec![0; 7]),
            Ok(header(300)),
            Ok(frame[..100].to_vec()),
            Ok(frame[100..116].to_vec()),
            Ok(frame[116..].to_vec()),
        ]);

        let captured = capture_frame(&mut transport, "bblp", "code", Duration::from_secs(1)).unwrap();
        assert_eq!(captured, frame);
    }

    #[test]
    fn test_excess_bytes_are_truncated() {
        let frame = jpeg(10);
        let mut chunk = frame.clone();
        chunk.extend_from_slice(&[0xaa; 6]);
        let mut reader = FrameReader::new();

        assert_eq!(reader.feed(&header(10)), None);
        // Trailing bytes beyond the declared length are dropped, and the
        // marker check runs on the truncated buffer.
        assert_eq!(reader.feed(&chunk), Some(frame));
    }

    #[test]
    fn test_corrupted_start_marker_times_out() {
        let mut bad = jpeg(10);
        bad[0] = 0x00;
        let mut transport = ScriptedTransport::new(vec![Ok(header(10)), Ok(bad)]);

        let err = capture_frame(&mut transport, "bblp", "code", Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, BambuError::NoFrame));
        assert!(err.is_timeout());
    }

    #[test]
    fn test_recovers_after_bad_frame() {
        let mut bad = jpeg(10);
        bad[9] = 0x00;
        let good = jpeg(12);
        let mut transport = ScriptedTransport::new(vec![
            Ok(header(10)),
            Ok(bad),
            Ok(header(12)),
            Ok(good.clone()),
        ]);

        let captured = capture_frame(&mut transport, "bblp", "code", Duration::from_secs(1)).unwrap();
        assert_eq!(captured, good);
    }

    #[test]
    fn test_zero_length_header_keeps_waiting() {
        let mut reader = FrameReader::new();
        assert_eq!(reader.feed(&header(0)), None);
        assert!(!reader.is_accumulating());
        assert_eq!(reader.feed(&[]), None);
        assert_eq!(reader.feed(&header(4)), None);
        assert!(reader.is_accumulating());
    }

    #[test]
    fn test_header_sized_read_while_accumulating_is_payload() {
        let frame = jpeg(32);
        let mut reader = FrameReader::new();
        reader.feed(&header(32));
        assert_eq!(reader.feed(&frame[..16]), None);
        assert_eq!(reader.feed(&frame[16..]), Some(frame));
    }

    #[test]
    fn test_peer_close_reports_no_frame() {
        let mut transport = ScriptedTransport::new(vec![Ok(header(10)), Ok(Vec::new())]);
        let err = capture_frame(&mut transport, "bblp", "code", Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, BambuError::NoFrame));
    }

    #[test]
    fn test_interrupted_read_is_retried() {
        let frame = jpeg(10);
        let mut transport = ScriptedTransport::new(vec![
            Err(io::Error::from(io::ErrorKind::Interrupted)),
            Ok(header(10)),
            Ok(frame.clone()),
        ]);
        let captured = capture_frame(&mut transport, "bblp", "code", Duration::from_secs(1)).unwrap();
        assert_eq!(captured, frame);
    }

    #[test]
    fn test_other_read_errors_propagate() {
        let mut transport = ScriptedTransport::new(vec![Err(io::Error::from(
            io::ErrorKind::ConnectionReset,
        ))]);
        let err = capture_frame(&mut transport, "bblp", "code", Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, BambuError::IoError(_)));
    }

    #[test]
    fn test_expired_deadline_reads_nothing() {
        let mut transport = ScriptedTransport::new(vec![Ok(header(10)), Ok(jpeg(10))]);
        let err = capture_frame(&mut transport, "bblp", "code", Duration::ZERO).unwrap_err();
        assert!(matches!(err, BambuError::NoFrame));
        assert_eq!(transport.reads.len(), 2);
    }
}
