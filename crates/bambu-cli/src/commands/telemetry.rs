//! Read-only telemetry commands.

use std::collections::BTreeMap;
use std::io::{self, Write};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::Result;
use bambu_printer::Status;
use clap::{Args, Subcommand};
use serde_json::json;

use super::Context;
use crate::context::Needs;
use crate::output::{self, Format};

#[derive(Args, Debug)]
pub struct WatchArgs {
    /// Seconds between updates
    #[arg(long, default_value_t = 5, value_parser = clap::value_parser!(u64).range(1..))]
    pub interval: u64,

    /// Request a full report before every update
    #[arg(long)]
    pub refresh: bool,
}

#[derive(Subcommand, Debug)]
pub enum AmsCommand {
    /// Show AMS units and trays
    Status,
}

pub async fn status(ctx: &Context<'_>) -> Result<()> {
    let target = ctx.target(Needs::MQTT)?;
    let client = target.connect_with_telemetry().await?;
    let status = client.status();
    output::write_status(&mut io::stdout().lock(), ctx.format(), &status)?;
    client.close().await?;
    Ok(())
}

pub async fn watch(ctx: &Context<'_>, args: WatchArgs) -> Result<()> {
    let target = ctx.target(Needs::MQTT)?;
    let client = target.connect_with_telemetry().await?;
    let format = ctx.format();

    let mut ticker = tokio::time::interval(Duration::from_secs(args.interval));
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => break,
        }
        write_watch_update(&mut io::stdout().lock(), format, &client.status(), unix_now())?;
        if args.refresh {
            if let Err(e) = client.push_all().await {
                tracing::warn!(error = %e, "pushall request failed");
            }
        }
    }

    client.close().await?;
    Ok(())
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

fn write_watch_update(
    out: &mut impl Write,
    format: Format,
    status: &Status,
    timestamp: u64,
) -> Result<()> {
    match format {
        Format::Plain => {
            let mut fields = output::status_fields(status);
            fields.insert("timestamp", timestamp.to_string());
            output::write_plain(out, &fields)
        }
        _ => output::write_status(out, format, status),
    }
}

pub async fn temps_get(ctx: &Context<'_>) -> Result<()> {
    let target = ctx.target(Needs::MQTT)?;
    let client = target.connect_with_telemetry().await?;
    write_temps(&mut io::stdout().lock(), ctx.format(), &client.status())?;
    client.close().await?;
    Ok(())
}

fn write_temps(out: &mut impl Write, format: Format, status: &Status) -> Result<()> {
    match format {
        Format::Json => output::write_json(
            out,
            &json!({
                "bed": status.bed_temp,
                "nozzle": status.nozzle_temp,
                "chamber": status.chamber_temp,
            }),
        ),
        Format::Plain => output::write_plain(
            out,
            &BTreeMap::from([
                ("bed", output::fmt_float(status.bed_temp)),
                ("nozzle", output::fmt_float(status.nozzle_temp)),
                ("chamber", output::fmt_float(status.chamber_temp)),
            ]),
        ),
        Format::Human => {
            writeln!(out, "Bed: {} C", output::fmt_float(status.bed_temp))?;
            writeln!(out, "Nozzle: {} C", output::fmt_float(status.nozzle_temp))?;
            writeln!(out, "Chamber: {} C", output::fmt_float(status.chamber_temp))?;
            Ok(())
        }
    }
}

pub async fn ams(ctx: &Context<'_>, command: AmsCommand) -> Result<()> {
    match command {
        AmsCommand::Status => {
            let target = ctx.target(Needs::MQTT)?;
            let client = target.connect_with_telemetry().await?;
            let ams = client.ams();

            let mut out = io::stdout().lock();
            match ctx.format() {
                Format::Json => output::write_json(&mut out, &json!({ "ams": ams }))?,
                Format::Plain => output::write_ams_plain(&mut out, ams.as_ref())?,
                Format::Human => output::write_ams_human(&mut out, ams.as_ref())?,
            }
            client.close().await?;
            Ok(())
        }
    }
}
