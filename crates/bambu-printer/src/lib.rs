#![warn(missing_docs)]

//! LAN-mode access to Bambu Lab printers.
//!
//! This crate provides:
//! - Telemetry aggregation over MQTT ([`StateAggregator`], [`PrinterClient`])
//! - Status decoding ([`Status`], [`PrintStatus`], [`GcodeState`])
//! - Command envelopes ([`PrinterCommand`])
//! - G-code pre-flight checks ([`gcode::is_valid_line`])
//! - Camera snapshots ([`CameraClient`], [`camera::capture_frame`])
//! - Storage access over implicit FTPS ([`FtpClient`])
//! - Printer discovery via SSDP
//!
//! # Example
//!
//! ```ignore
//! use bambu_printer::{MqttConfig, PrinterClient, PrinterCommand};
//!
//! let client = PrinterClient::connect(MqttConfig::new("192.168.1.20", "01S00A", "12345678")).await?;
//! client.push_all().await?;
//! client.wait_for_ready(None).await?;
//!
//! let status = client.status();
//! println!("{} {}%", status.gcode_state, status.percent);
//!
//! client.publish(&PrinterCommand::PrintPause).await?;
//! client.close().await?;
//! ```

pub mod archive;
pub mod camera;
pub mod commands;
pub mod discovery;
pub mod error;
pub mod ftp;
pub mod gcode;
pub mod mqtt;
pub mod state;
pub mod status;
pub mod tls;
pub mod value;

/// Username printers expect on every channel in LAN mode.
pub const DEFAULT_USERNAME: &str = "bblp";

pub use camera::{CameraClient, CameraConfig};
pub use commands::{CalibrationOptions, Fan, PrinterCommand, StartPrint};
pub use discovery::{discover, discover_async, DiscoveredPrinter};
pub use error::{BambuError, Result};
pub use ftp::{FileTransfer, FtpClient, FtpConfig};
pub use mqtt::{MqttConfig, PrinterClient};
pub use state::StateAggregator;
pub use status::{AmsStatus, AmsTray, AmsUnit, GcodeState, PrintStatus, Status};
