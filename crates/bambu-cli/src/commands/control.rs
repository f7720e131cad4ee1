//! Commands that publish a single request to the printer.

use std::io::{self, BufRead};

use anyhow::{bail, Context as _, Result};
use bambu_printer::commands::{self, Fan};
use bambu_printer::gcode::validate_lines;
use bambu_printer::{CalibrationOptions, PrinterCommand};
use clap::{Args, Subcommand, ValueEnum};

use super::{publish, telemetry, Context};

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LightAction {
    /// Turn the chamber light on
    On,
    /// Turn the chamber light off
    Off,
    /// Show printer status
    Status,
}

#[derive(Subcommand, Debug)]
pub enum TempsCommand {
    /// Show current temperatures
    Get,
    /// Set heater targets (M140/M104/M141)
    Set {
        /// Bed target in °C
        #[arg(long)]
        bed: Option<u32>,
        /// Nozzle target in °C
        #[arg(long)]
        nozzle: Option<u32>,
        /// Chamber target in °C
        #[arg(long)]
        chamber: Option<u32>,
    },
}

#[derive(Subcommand, Debug)]
pub enum GcodeCommand {
    /// Send G-code lines
    Send {
        /// Lines to send
        lines: Vec<String>,
        /// Read lines from stdin, skipping blank ones
        #[arg(long, conflicts_with = "lines")]
        stdin: bool,
        /// Skip line validation
        #[arg(long)]
        no_check: bool,
    },
}

#[derive(Args, Debug)]
pub struct CalibrateArgs {
    /// Skip bed leveling
    #[arg(long)]
    pub no_bed_level: bool,
    /// Skip motor noise cancellation
    #[arg(long)]
    pub no_motor_noise: bool,
    /// Skip vibration compensation
    #[arg(long)]
    pub no_vibration: bool,
}

impl CalibrateArgs {
    fn options(&self) -> CalibrationOptions {
        CalibrationOptions {
            bed_leveling: !self.no_bed_level,
            motor_noise: !self.no_motor_noise,
            vibration: !self.no_vibration,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum MoveCommand {
    /// Absolute Z move
    Z {
        /// Target height in mm
        #[arg(long)]
        height: f64,
    },
}

#[derive(Subcommand, Debug)]
pub enum FansCommand {
    /// Set fan speeds (M106), as 0-255 or a 0-1 fraction
    Set {
        /// Part cooling fan
        #[arg(long)]
        part: Option<String>,
        /// Auxiliary fan
        #[arg(long)]
        aux: Option<String>,
        /// Chamber fan
        #[arg(long)]
        chamber: Option<String>,
    },
}

pub async fn light(ctx: &Context<'_>, action: LightAction) -> Result<()> {
    let on = match action {
        LightAction::Status => return telemetry::status(ctx).await,
        LightAction::On => true,
        LightAction::Off => false,
    };
    if ctx.dry_run(format_args!("set light {}", if on { "on" } else { "off" }))? {
        return Ok(());
    }
    publish(ctx, &PrinterCommand::SetLight { on }).await
}

pub async fn temps(ctx: &Context<'_>, command: TempsCommand) -> Result<()> {
    match command {
        TempsCommand::Get => telemetry::temps_get(ctx).await,
        TempsCommand::Set { bed, nozzle, chamber } => {
            let lines = commands::temperature_gcode(bed, nozzle, chamber);
            if lines.is_empty() {
                bail!("set at least one temperature");
            }
            if ctx.dry_run(format_args!("set temperatures: {}", lines.join(", ")))? {
                return Ok(());
            }
            publish(ctx, &PrinterCommand::gcode(lines)).await
        }
    }
}

pub async fn gcode(ctx: &Context<'_>, command: GcodeCommand) -> Result<()> {
    let GcodeCommand::Send {
        lines,
        stdin,
        no_check,
    } = command;

    ctx.confirm("gcode")?;

    let lines = if stdin {
        if ctx.connection.access_code_stdin {
            bail!("cannot use --access-code-stdin with gcode --stdin");
        }
        read_lines(io::stdin().lock())?
    } else {
        lines
    };
    if lines.is_empty() {
        bail!("gcode send requires at least one line or --stdin");
    }
    if !no_check {
        validate_lines(&lines)?;
    }

    if ctx.dry_run(format_args!("send {} gcode line(s)", lines.len()))? {
        return Ok(());
    }
    publish(ctx, &PrinterCommand::gcode(lines)).await
}

/// Non-blank lines from `reader`.
fn read_lines<R: BufRead>(reader: R) -> Result<Vec<String>> {
    let mut lines = Vec::new();
    for line in reader.lines() {
        let line = line.context("failed to read gcode from stdin")?;
        if !line.trim().is_empty() {
            lines.push(line);
        }
    }
    Ok(lines)
}

pub async fn calibrate(ctx: &Context<'_>, args: CalibrateArgs) -> Result<()> {
    ctx.confirm("calibrate")?;
    if ctx.dry_run("start calibration")? {
        return Ok(());
    }
    publish(ctx, &PrinterCommand::Calibrate(args.options())).await
}

pub async fn home(ctx: &Context<'_>) -> Result<()> {
    if ctx.dry_run("home printer")? {
        return Ok(());
    }
    publish(ctx, &PrinterCommand::gcode(commands::home_gcode())).await
}

pub async fn move_axis(ctx: &Context<'_>, command: MoveCommand) -> Result<()> {
    let MoveCommand::Z { height } = command;
    if !height.is_finite() || height < 0.0 {
        bail!("--height must be a non-negative number");
    }
    if ctx.dry_run(format_args!("move Z to {height}"))? {
        return Ok(());
    }
    publish(ctx, &PrinterCommand::gcode(commands::move_z_gcode(height))).await
}

pub async fn fans(ctx: &Context<'_>, command: FansCommand) -> Result<()> {
    let FansCommand::Set { part, aux, chamber } = command;
    let speeds = fan_speeds(&[
        (Fan::Part, part.as_deref()),
        (Fan::Aux, aux.as_deref()),
        (Fan::Chamber, chamber.as_deref()),
    ])?;
    if speeds.is_empty() {
        bail!("set at least one fan speed");
    }
    if ctx.dry_run("set fan speeds")? {
        return Ok(());
    }
    publish(ctx, &PrinterCommand::gcode(commands::fan_gcode(&speeds))).await
}

fn fan_speeds(requested: &[(Fan, Option<&str>)]) -> Result<Vec<(Fan, u8)>> {
    requested
        .iter()
        .filter_map(|(fan, speed)| speed.map(|s| (*fan, s)))
        .map(|(fan, speed)| match commands::parse_fan_speed(speed) {
            Some(value) => Ok((fan, value)),
            None => bail!("invalid fan speed {speed:?}: use 0-255 or a fraction 0-1"),
        })
        .collect()
}

pub async fn reboot(ctx: &Context<'_>) -> Result<()> {
    ctx.confirm("reboot")?;
    if ctx.dry_run("reboot printer")? {
        return Ok(());
    }
    publish(ctx, &PrinterCommand::Reboot).await
}
