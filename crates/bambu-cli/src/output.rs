//! Output formatting.

use std::collections::BTreeMap;
use std::io::Write;

use anyhow::Result;
use bambu_printer::{AmsStatus, Status};
use serde::Serialize;

/// Output format selected by `--json` / `--plain`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Human,
    Plain,
    Json,
}

impl Format {
    pub fn select(json: bool, plain: bool) -> Self {
        if json {
            Format::Json
        } else if plain {
            Format::Plain
        } else {
            Format::Human
        }
    }
}

/// Pretty JSON followed by a newline.
pub fn write_json<W: Write, T: Serialize + ?Sized>(out: &mut W, value: &T) -> Result<()> {
    serde_json::to_writer_pretty(&mut *out, value)?;
    writeln!(out)?;
    Ok(())
}

/// `key=value` lines, sorted by key.
pub fn write_plain<W: Write>(out: &mut W, fields: &BTreeMap<&str, String>) -> Result<()> {
    for (key, value) in fields {
        writeln!(out, "{key}={value}")?;
    }
    Ok(())
}

/// One decimal place.
pub fn fmt_float(value: f64) -> String {
    format!("{value:.1}")
}

pub fn status_fields(status: &Status) -> BTreeMap<&'static str, String> {
    BTreeMap::from([
        ("gcode_state", status.gcode_state.to_string()),
        ("print_status", status.print_status.to_string()),
        ("percent", status.percent.to_string()),
        ("layer_current", status.layer_current.to_string()),
        ("layer_total", status.layer_total.to_string()),
        ("bed_temp", fmt_float(status.bed_temp)),
        ("nozzle_temp", fmt_float(status.nozzle_temp)),
        ("chamber_temp", fmt_float(status.chamber_temp)),
        ("file", status.file.clone()),
        ("light", status.light.clone()),
        ("wifi_signal", status.wifi_signal.clone()),
        ("error_code", status.error_code.to_string()),
        (
            "remaining_minutes",
            status
                .remaining_minutes
                .map(|m| m.to_string())
                .unwrap_or_default(),
        ),
    ])
}

pub fn write_status(out: &mut impl Write, format: Format, status: &Status) -> Result<()> {
    match format {
        Format::Json => write_json(out, status),
        Format::Plain => write_plain(out, &status_fields(status)),
        Format::Human => write_status_human(out, status),
    }
}

fn write_status_human(out: &mut impl Write, status: &Status) -> Result<()> {
    writeln!(out, "State: {} ({})", status.gcode_state, status.print_status)?;
    writeln!(
        out,
        "Progress: {}% ({}/{})",
        status.percent, status.layer_current, status.layer_total
    )?;
    writeln!(
        out,
        "Temps: bed={}C nozzle={}C chamber={}C",
        fmt_float(status.bed_temp),
        fmt_float(status.nozzle_temp),
        fmt_float(status.chamber_temp)
    )?;
    if let Some(minutes) = status.remaining_minutes {
        writeln!(out, "Remaining: {minutes} min")?;
    }
    if !status.file.is_empty() {
        writeln!(out, "File: {}", status.file)?;
    }
    writeln!(out, "Light: {}", status.light)?;
    if !status.wifi_signal.is_empty() {
        let unit = if status.wifi_signal.ends_with("dBm") { "" } else { " dBm" };
        writeln!(out, "WiFi: {}{unit}", status.wifi_signal)?;
    }
    writeln!(out, "Error: {}", status.error_code)?;
    Ok(())
}

/// `ams=<json>` on a single line.
pub fn write_ams_plain(out: &mut impl Write, ams: Option<&AmsStatus>) -> Result<()> {
    writeln!(out, "ams={}", serde_json::to_string(&ams)?)?;
    Ok(())
}

pub fn write_ams_human(out: &mut impl Write, ams: Option<&AmsStatus>) -> Result<()> {
    let Some(ams) = ams else {
        writeln!(out, "No AMS data")?;
        return Ok(());
    };
    if !ams.connected {
        writeln!(out, "No AMS connected")?;
        return Ok(());
    }
    if ams.units.is_empty() {
        writeln!(out, "No AMS units found")?;
        return Ok(());
    }

    for unit in &ams.units {
        writeln!(
            out,
            "AMS {}: humidity={} temp={}",
            unit.id, unit.humidity, unit.temperature
        )?;
        for tray in &unit.trays {
            write!(
                out,
                "  tray {}: name={} type={} color={}",
                tray.id, tray.name, tray.filament_type, tray.color
            )?;
            if let Some(remaining) = tray.remaining {
                write!(out, " remaining={remaining}%")?;
            }
            writeln!(out)?;
        }
    }
    if let Some(tray) = &ams.active_tray {
        writeln!(out, "Active tray: {tray}")?;
    }
    Ok(())
}
