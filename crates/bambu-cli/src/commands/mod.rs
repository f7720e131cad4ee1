//! One handler per user action.

use std::fmt::Display;
use std::io::{self, IsTerminal, Write};

use anyhow::Result;
use bambu_printer::PrinterCommand;
use clap::Subcommand;

use crate::confirm::{self, ConfirmOptions};
use crate::context::{ConnectionArgs, Needs, PrinterTarget};
use crate::output::Format;
use crate::GlobalOpts;

mod config;
mod control;
mod files;
mod network;
mod print;
mod telemetry;

pub use config::ConfigCommand;
pub use control::{CalibrateArgs, FansCommand, GcodeCommand, LightAction, MoveCommand, TempsCommand};
pub use files::{CameraCommand, FilesCommand};
pub use network::DiscoverArgs;
pub use print::PrintCommand;
pub use telemetry::{AmsCommand, WatchArgs};

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show printer status
    Status,

    /// Print status repeatedly until interrupted
    Watch(WatchArgs),

    /// Chamber light
    Light {
        #[arg(value_enum)]
        action: LightAction,
    },

    /// Heater temperatures
    #[command(subcommand)]
    Temps(TempsCommand),

    /// Start and control print jobs
    #[command(subcommand)]
    Print(PrintCommand),

    /// Printer storage
    #[command(subcommand)]
    Files(FilesCommand),

    /// Chamber camera
    #[command(subcommand)]
    Camera(CameraCommand),

    /// Raw G-code
    #[command(subcommand)]
    Gcode(GcodeCommand),

    /// Automatic Material System
    #[command(subcommand)]
    Ams(AmsCommand),

    /// Run calibration routines
    Calibrate(CalibrateArgs),

    /// Home all axes
    Home,

    /// Move an axis
    #[command(subcommand)]
    Move(MoveCommand),

    /// Fan speeds
    #[command(subcommand)]
    Fans(FansCommand),

    /// Reboot the printer
    Reboot,

    /// Printer profiles
    #[command(subcommand)]
    Config(ConfigCommand),

    /// Check that the printer ports are reachable
    Doctor,

    /// Find printers on the local network
    Discover(DiscoverArgs),
}

/// Parsed global state shared by every handler.
pub struct Context<'a> {
    pub global: &'a GlobalOpts,
    pub connection: &'a ConnectionArgs,
}

impl<'a> Context<'a> {
    pub fn new(global: &'a GlobalOpts, connection: &'a ConnectionArgs) -> Self {
        Self { global, connection }
    }

    pub fn format(&self) -> Format {
        Format::select(self.global.json, self.global.plain)
    }

    pub fn target(&self, needs: Needs) -> Result<PrinterTarget> {
        self.connection.resolve(needs)
    }

    /// Gate a destructive action behind `--force`, `--confirm` or a prompt.
    pub fn confirm(&self, action: &str) -> Result<()> {
        let stdin = io::stdin();
        let options = ConfirmOptions {
            force: self.global.force,
            token: self.global.confirm.as_deref(),
            no_input: self.global.no_input,
            interactive: stdin.is_terminal(),
        };
        confirm::require(action, &options, &mut stdin.lock(), &mut io::stderr())
    }

    /// Under `--dry-run`, print `Would <what>` and report that the caller
    /// should stop.
    pub fn dry_run(&self, what: impl Display) -> Result<bool> {
        if !self.global.dry_run {
            return Ok(false);
        }
        writeln!(io::stdout(), "Would {what}")?;
        Ok(true)
    }
}

pub async fn run(command: Command, ctx: &Context<'_>) -> Result<()> {
    match command {
        Command::Status => telemetry::status(ctx).await,
        Command::Watch(args) => telemetry::watch(ctx, args).await,
        Command::Light { action } => control::light(ctx, action).await,
        Command::Temps(cmd) => control::temps(ctx, cmd).await,
        Command::Print(cmd) => print::run(ctx, cmd).await,
        Command::Files(cmd) => files::run(ctx, cmd).await,
        Command::Camera(cmd) => files::camera(ctx, cmd).await,
        Command::Gcode(cmd) => control::gcode(ctx, cmd).await,
        Command::Ams(cmd) => telemetry::ams(ctx, cmd).await,
        Command::Calibrate(args) => control::calibrate(ctx, args).await,
        Command::Home => control::home(ctx).await,
        Command::Move(cmd) => control::move_axis(ctx, cmd).await,
        Command::Fans(cmd) => control::fans(ctx, cmd).await,
        Command::Reboot => control::reboot(ctx).await,
        Command::Config(cmd) => config::run(ctx, cmd),
        Command::Doctor => network::doctor(ctx).await,
        Command::Discover(args) => network::discover(ctx, args).await,
    }
}

/// Connect, send one command and disconnect.
pub(crate) async fn publish(ctx: &Context<'_>, command: &PrinterCommand) -> Result<()> {
    let target = ctx.target(Needs::MQTT)?;
    let client = target.connect().await?;
    client.publish(command).await?;
    client.close().await?;
    Ok(())
}

/// Refuse to dump binary data on a terminal unless forced.
pub(crate) fn ensure_binary_stdout(force: bool) -> Result<()> {
    if !force && io::stdout().is_terminal() {
        anyhow::bail!("refusing to write binary data to terminal; use --force or --out <file>");
    }
    Ok(())
}
