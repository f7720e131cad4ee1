//! Error types for printer communication.

use thiserror::Error;

/// Errors from printer operations.
#[derive(Error, Debug)]
pub enum BambuError {
    /// Transport could not be established.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// MQTT client error.
    #[error("MQTT error: {0}")]
    MqttError(String),

    /// No telemetry arrived before the deadline.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Camera stream ended or timed out without a complete JPEG frame.
    #[error("no camera frame received")]
    NoFrame,

    /// A gcode line failed pre-flight validation.
    #[error("invalid gcode line: {0}")]
    InvalidGcode(String),

    /// A status code had a type that cannot be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// TLS setup or handshake failure.
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// File-transfer server rejected a command.
    #[error("FTP error {code}: {message}")]
    Ftp {
        /// Reply code sent by the server.
        code: u16,
        /// Reply text.
        message: String,
    },

    /// Peer sent something that does not follow the protocol.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Print-job archive could not be written.
    #[error("archive error: {0}")]
    Archive(String),

    /// Discovery error.
    #[error("discovery error: {0}")]
    DiscoveryError(String),

    /// JSON encoding or decoding failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl BambuError {
    /// True for the "no data before the deadline" conditions.
    pub fn is_timeout(&self) -> bool {
        matches!(self, BambuError::Timeout(_) | BambuError::NoFrame)
    }
}

/// Result type for printer operations.
pub type Result<T> = std::result::Result<T, BambuError>;
