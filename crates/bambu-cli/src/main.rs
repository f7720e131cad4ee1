//! bambu - control and monitor Bambu Lab printers over the LAN
//!
//! ```bash
//! bambu config set --printer x1c --ip 192.168.1.20 --serial 01S00A... \
//!     --access-code-file ~/.config/bambu/x1c.code --default
//! bambu status
//! bambu --json watch --interval 10
//! bambu print start benchy.3mf --plate 1
//! bambu --printer p1s camera snapshot --out cam.jpg
//! ```

use anyhow::Result;
use clap::{Args, Parser};
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod confirm;
mod context;
mod output;

use commands::Command;
use context::ConnectionArgs;

/// Bambu Lab printer CLI
#[derive(Parser, Debug)]
#[command(name = "bambu")]
#[command(about = "Control and monitor Bambu Lab printers in LAN mode", long_about = None)]
#[command(version)]
struct Cli {
    #[command(flatten)]
    connection: ConnectionArgs,

    #[command(flatten)]
    global: GlobalOpts,

    #[command(subcommand)]
    command: Command,
}

/// Output and safety flags accepted before or after the subcommand.
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalOpts {
    /// JSON output
    #[arg(long, global = true, conflicts_with = "plain")]
    pub json: bool,

    /// Stable key=value output
    #[arg(long, global = true)]
    pub plain: bool,

    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Never prompt
    #[arg(long, global = true)]
    pub no_input: bool,

    /// Skip confirmation prompts
    #[arg(short, long, global = true)]
    pub force: bool,

    /// Confirm a destructive action by name (e.g. --confirm=stop)
    #[arg(long, global = true, value_name = "ACTION")]
    pub confirm: Option<String>,

    /// Show what would be done without doing it
    #[arg(short = 'n', long, global = true)]
    pub dry_run: bool,
}

impl GlobalOpts {
    fn log_directive(&self) -> &'static str {
        if self.verbose {
            "bambu=debug"
        } else if self.quiet {
            "bambu=error"
        } else {
            "bambu=warn"
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.global.log_directive()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let ctx = commands::Context::new(&cli.global, &cli.connection);
    commands::run(cli.command, &ctx).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["bambu", "--ip", "10.0.0.5", "status", "--json", "-v"]).unwrap();
        assert!(cli.global.json);
        assert_eq!(cli.global.log_directive(), "bambu=debug");
        assert_eq!(cli.connection.ip.as_deref(), Some("10.0.0.5"));
    }

    #[test]
    fn test_json_conflicts_with_plain() {
        let err = Cli::try_parse_from(["bambu", "--json", "--plain", "status"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn test_confirm_token() {
        let cli = Cli::try_parse_from(["bambu", "reboot", "--confirm=reboot"]).unwrap();
        assert_eq!(cli.global.confirm.as_deref(), Some("reboot"));
        assert!(matches!(cli.command, Command::Reboot));
    }
}
