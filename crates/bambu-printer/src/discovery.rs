//! LAN printer discovery via SSDP.
//!
//! Printers answer an M-SEARCH for the Bambu device URN, and also announce
//! themselves with unsolicited NOTIFY datagrams. Both carry the serial in
//! `USN` and vendor fields such as `DevModel.bambu.com`.

use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::error::{BambuError, Result};

const SSDP_GROUP: Ipv4Addr = Ipv4Addr::new(239, 255, 255, 250);
/// Printers listen on both the vendor port and the standard one.
const SSDP_PORTS: [u16; 2] = [2021, 1990];
const DEVICE_URN: &str = "urn:bambulab-com:device:3dprinter:1";

/// A printer that answered discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveredPrinter {
    /// Address the answer came from.
    pub ip: IpAddr,
    /// Printer serial number.
    pub serial: String,
    /// Model code (e.g. "BL-P001", "C11").
    pub model: String,
    /// User-assigned name.
    pub name: String,
    /// Firmware version, when announced.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub firmware: Option<String>,
}

/// Search the local network for `timeout` and return every printer that
/// answered, once per serial.
pub fn discover(timeout: Duration) -> Result<Vec<DiscoveredPrinter>> {
    let discovery_err = |e: io::Error| BambuError::DiscoveryError(e.to_string());

    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).map_err(discovery_err)?;
    socket.set_broadcast(true).map_err(discovery_err)?;

    for port in SSDP_PORTS {
        let target = SocketAddr::from((SSDP_GROUP, port));
        let request = search_request(port);
        if let Err(e) = socket.send_to(request.as_bytes(), target) {
            tracing::warn!(%target, error = %e, "SSDP search failed");
        }
    }

    let started = Instant::now();
    let mut printers: Vec<DiscoveredPrinter> = Vec::new();
    let mut buf = [0u8; 2048];

    loop {
        let remaining = timeout.saturating_sub(started.elapsed());
        if remaining.is_zero() {
            break;
        }
        socket.set_read_timeout(Some(remaining)).map_err(discovery_err)?;

        match socket.recv_from(&mut buf) {
            Ok((len, from)) => {
                let Some(printer) = std::str::from_utf8(&buf[..len])
                    .ok()
                    .and_then(|text| parse_announcement(text, from.ip()))
                else {
                    continue;
                };
                if !printers.iter().any(|p| p.serial == printer.serial) {
                    tracing::debug!(serial = %printer.serial, ip = %printer.ip, "found printer");
                    printers.push(printer);
                }
            }
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                break
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(discovery_err(e)),
        }
    }

    Ok(printers)
}

/// Run [`discover`] on the blocking pool.
pub async fn discover_async(timeout: Duration) -> Result<Vec<DiscoveredPrinter>> {
    tokio::task::spawn_blocking(move || discover(timeout))
        .await
        .map_err(|e| BambuError::DiscoveryError(e.to_string()))?
}

fn search_request(port: u16) -> String {
    format!(
        "M-SEARCH * HTTP/1.1\r\n\
         HOST: {SSDP_GROUP}:{port}\r\n\
         MAN: \"ssdp:discover\"\r\n\
         MX: 3\r\n\
         ST: {DEVICE_URN}\r\n\
         \r\n"
    )
}

/// Parse an M-SEARCH response or NOTIFY datagram.
///
/// Returns `None` for other SSDP traffic and for answers without a serial.
fn parse_announcement(datagram: &str, from: IpAddr) -> Option<DiscoveredPrinter> {
    let headers: HashMap<String, &str> = datagram
        .lines()
        .skip(1)
        .filter_map(|line| line.split_once(':'))
        .map(|(name, value)| (name.trim().to_ascii_lowercase(), value.trim()))
        .collect();

    let is_printer = ["st", "nt"]
        .iter()
        .any(|key| headers.get(*key).is_some_and(|v| v.contains("bambulab")));
    if !is_printer {
        return None;
    }

    // USN is either the bare serial or `uuid:SERIAL::urn:...`.
    let usn: &str = headers.get("usn")?;
    let serial = usn
        .strip_prefix("uuid:")
        .unwrap_or(usn)
        .split("::")
        .next()
        .map(str::trim)
        .filter(|s| !s.is_empty())?
        .to_string();

    let vendor = |key: &str| headers.get(key).map(|v| v.to_string()).filter(|v| !v.is_empty());
    let model = vendor("devmodel.bambu.com").unwrap_or_else(|| "unknown".into());
    let name = vendor("devname.bambu.com").unwrap_or_else(|| serial.clone());
    let ip = headers
        .get("location")
        .and_then(|loc| loc.parse().ok())
        .unwrap_or(from);

    Some(DiscoveredPrinter {
        ip,
        serial,
        model,
        name,
        firmware: vendor("devversion.bambu.com"),
    })
}
