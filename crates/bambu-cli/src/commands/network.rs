//! Reachability checks and discovery.

use std::io::{self, Write};
use std::time::Duration;

use anyhow::Result;
use bambu_printer::{discover_async, DiscoveredPrinter};
use clap::Args;
use serde::Serialize;
use serde_json::json;
use tokio::net::TcpStream;

use super::Context;
use crate::context::{Needs, PrinterTarget};
use crate::output::{self, Format};

#[derive(Args, Debug)]
pub struct DiscoverArgs {
    /// Seconds to listen for answers
    #[arg(long, default_value_t = 5)]
    pub wait: u64,
}

#[derive(Debug, Serialize)]
struct PortCheck {
    name: &'static str,
    port: u16,
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl PortCheck {
    fn line(&self) -> String {
        match &self.error {
            None => format!("{}: ok", self.name),
            Some(e) => format!("{}: failed ({e})", self.name),
        }
    }
}

fn ports(target: &PrinterTarget) -> Vec<(&'static str, u16)> {
    let mut ports = vec![("mqtt", target.mqtt_port), ("ftp", target.ftp_port)];
    if !target.no_camera {
        ports.push(("camera", target.camera_port));
    }
    ports
}

async fn check(host: &str, name: &'static str, port: u16, timeout: Duration) -> PortCheck {
    let error = match tokio::time::timeout(timeout, TcpStream::connect((host, port))).await {
        Ok(Ok(_)) => None,
        Ok(Err(e)) => Some(e.to_string()),
        Err(_) => Some(format!("timed out after {}s", timeout.as_secs())),
    };
    PortCheck {
        name,
        port,
        ok: error.is_none(),
        error,
    }
}

pub async fn doctor(ctx: &Context<'_>) -> Result<()> {
    let target = ctx.target(Needs::ADDRESS)?;

    let mut checks = Vec::new();
    for (name, port) in ports(&target) {
        let result = check(&target.host, name, port, target.timeout).await;
        tracing::debug!(name, port, ok = result.ok, "port check");
        checks.push(result);
    }

    let mut out = io::stdout().lock();
    if ctx.format() == Format::Json {
        return output::write_json(&mut out, &json!({ "host": target.host, "checks": checks }));
    }
    for check in &checks {
        writeln!(out, "{}", check.line())?;
    }
    Ok(())
}

pub async fn discover(ctx: &Context<'_>, args: DiscoverArgs) -> Result<()> {
    let printers = discover_async(Duration::from_secs(args.wait)).await?;
    write_printers(&mut io::stdout().lock(), ctx.format(), &printers)
}

fn write_printers(out: &mut impl Write, format: Format, printers: &[DiscoveredPrinter]) -> Result<()> {
    match format {
        Format::Json => output::write_json(out, &json!({ "printers": printers })),
        Format::Plain => {
            for p in printers {
                writeln!(out, "{}\t{}\t{}\t{}", p.ip, p.serial, p.model, p.name)?;
            }
            Ok(())
        }
        Format::Human => {
            if printers.is_empty() {
                writeln!(out, "No printers found")?;
            }
            for p in printers {
                write!(out, "{} ({}) serial={} ip={}", p.name, p.model, p.serial, p.ip)?;
                if let Some(firmware) = &p.firmware {
                    write!(out, " firmware={firmware}")?;
                }
                writeln!(out)?;
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn target(no_camera: bool) -> PrinterTarget {
        PrinterTarget {
            profile: None,
            host: "127.0.0.1".into(),
            serial: String::new(),
            username: "bblp".into(),
            access_code: String::new(),
            mqtt_port: 8883,
            ftp_port: 990,
            camera_port: 6000,
            timeout: Duration::from_secs(1),
            no_camera,
        }
    }

    #[test]
    fn test_camera_port_skipped_when_disabled() {
        assert_eq!(ports(&target(false)).len(), 3);
        assert_eq!(ports(&target(true)), vec![("mqtt", 8883), ("ftp", 990)]);
    }

    #[tokio::test]
    async fn test_check_open_and_closed_ports() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let open = listener.local_addr().unwrap().port();
        let ok = check("127.0.0.1", "mqtt", open, Duration::from_secs(1)).await;
        assert_eq!(ok.line(), "mqtt: ok");

        drop(listener);
        let closed = check("127.0.0.1", "ftp", open, Duration::from_secs(1)).await;
        assert!(!closed.ok);
        assert!(closed.line().starts_with("ftp: failed ("));
    }

    #[test]
    fn test_write_printers() {
        let printers = vec![DiscoveredPrinter {
            ip: IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20)),
            serial: "01S00A".into(),
            model: "BL-P001".into(),
            name: "Workshop".into(),
            firmware: None,
        }];

        let mut out = Vec::new();
        write_printers(&mut out, Format::Human, &printers).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "Workshop (BL-P001) serial=01S00A ip=192.168.1.20\n"
        );

        let mut out = Vec::new();
        write_printers(&mut out, Format::Plain, &printers).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "192.168.1.20\t01S00A\tBL-P001\tWorkshop\n"
        );
    }
}
