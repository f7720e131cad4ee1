//! Storage and camera commands.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use bambu_printer::FileTransfer;
use clap::Subcommand;
use serde_json::json;

use super::{ensure_binary_stdout, Context};
use crate::context::Needs;
use crate::output::{self, Format};

#[derive(Subcommand, Debug)]
pub enum FilesCommand {
    /// List files on the printer
    List {
        /// Directory to list
        #[arg(long, default_value = "")]
        dir: String,
    },
    /// Upload a local file
    Upload {
        /// Local file
        local: PathBuf,
        /// Remote name (default: the local file name)
        #[arg(long = "as", value_name = "REMOTE")]
        remote: Option<String>,
    },
    /// Download a file
    Download {
        /// Remote file
        remote: String,
        /// Output path, or - for stdout
        #[arg(long)]
        out: String,
    },
    /// Delete a file
    Delete {
        /// Remote file
        remote: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum CameraCommand {
    /// Save one JPEG frame
    Snapshot {
        /// Output path, or - for stdout
        #[arg(long, default_value = "snapshot.jpg")]
        out: String,
    },
}

pub async fn run(ctx: &Context<'_>, command: FilesCommand) -> Result<()> {
    match command {
        FilesCommand::List { dir } => {
            let ftp = ctx.target(Needs::ACCESS)?.ftp_client();
            let entries = blocking(move || Ok(ftp.list(&dir)?)).await?;
            write_entries(&mut io::stdout().lock(), ctx.format(), &entries)
        }
        FilesCommand::Upload { local, remote } => {
            if ctx.dry_run(format_args!("upload {}", local.display()))? {
                return Ok(());
            }
            let ftp = ctx.target(Needs::ACCESS)?.ftp_client();
            let remote = remote.unwrap_or_else(|| file_name(&local));
            blocking(move || {
                let bytes = ftp.upload(&local, &remote)?;
                tracing::debug!(remote = %remote, bytes, "uploaded");
                Ok(())
            })
            .await
        }
        FilesCommand::Download { remote, out } => {
            if out == "-" {
                ensure_binary_stdout(ctx.global.force)?;
            }
            let ftp = ctx.target(Needs::ACCESS)?.ftp_client();
            blocking(move || {
                if out == "-" {
                    let mut stdout = io::stdout().lock();
                    ftp.download(&remote, &mut stdout)?;
                    stdout.flush()?;
                } else {
                    let file = File::create(&out).with_context(|| format!("failed to create {out}"))?;
                    let mut writer = BufWriter::new(file);
                    ftp.download(&remote, &mut writer)?;
                    writer.flush()?;
                }
                Ok(())
            })
            .await
        }
        FilesCommand::Delete { remote } => {
            ctx.confirm("delete")?;
            if ctx.dry_run(format_args!("delete {remote}"))? {
                return Ok(());
            }
            let ftp = ctx.target(Needs::ACCESS)?.ftp_client();
            blocking(move || Ok(ftp.delete(&remote)?)).await
        }
    }
}

pub async fn camera(ctx: &Context<'_>, command: CameraCommand) -> Result<()> {
    let CameraCommand::Snapshot { out } = command;
    if ctx.dry_run(format_args!("take snapshot to {out}"))? {
        return Ok(());
    }

    let camera = ctx.target(Needs::ACCESS)?.camera_client()?;
    let frame = blocking(move || Ok(camera.snapshot()?)).await?;

    if out == "-" {
        ensure_binary_stdout(ctx.global.force)?;
        let mut stdout = io::stdout().lock();
        stdout.write_all(&frame)?;
        stdout.flush()?;
    } else {
        std::fs::write(&out, &frame).with_context(|| format!("failed to write {out}"))?;
    }
    Ok(())
}

/// Run blocking network I/O off the async runtime.
async fn blocking<T, F>(op: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(op)
        .await
        .context("blocking task failed")?
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

fn write_entries(out: &mut impl Write, format: Format, entries: &[String]) -> Result<()> {
    if format == Format::Json {
        return output::write_json(out, &json!({ "entries": entries }));
    }
    for entry in entries {
        writeln!(out, "{entry}")?;
    }
    Ok(())
}
