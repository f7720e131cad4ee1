//! Print job commands.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context as _, Result};
use bambu_printer::commands::plate_location;
use bambu_printer::{archive, FileTransfer, PrinterCommand, StartPrint};
use clap::{ArgAction, Args, Subcommand};

use super::{publish, Context};
use crate::context::Needs;

#[derive(Subcommand, Debug)]
pub enum PrintCommand {
    /// Upload a file and start printing it
    Start(StartArgs),
    /// Pause the current job
    Pause,
    /// Resume a paused job
    Resume,
    /// Stop the current job
    Stop,
}

#[derive(Args, Debug)]
pub struct StartArgs {
    /// Local .3mf or .gcode file (or a remote name with --no-upload)
    pub file: PathBuf,

    /// Plate number or gcode path inside the archive
    #[arg(long, default_value = "1")]
    pub plate: String,

    /// Print a file already on the printer
    #[arg(long)]
    pub no_upload: bool,

    /// Feed filament from the external spool
    #[arg(long)]
    pub no_ams: bool,

    /// Comma-separated AMS slot per filament
    #[arg(long, default_value = "0")]
    pub ams_mapping: String,

    /// Comma-separated object ids to skip
    #[arg(long)]
    pub skip_objects: Option<String>,

    /// Run flow calibration first
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub flow_calibration: bool,

    /// Name on the printer (default: derived from the file name)
    #[arg(long)]
    pub remote_name: Option<String>,
}

pub async fn run(ctx: &Context<'_>, command: PrintCommand) -> Result<()> {
    match command {
        PrintCommand::Start(args) => start(ctx, args).await,
        PrintCommand::Pause => publish(ctx, &PrinterCommand::PrintPause).await,
        PrintCommand::Resume => publish(ctx, &PrinterCommand::PrintResume).await,
        PrintCommand::Stop => {
            ctx.confirm("stop")?;
            if ctx.dry_run("stop print")? {
                return Ok(());
            }
            publish(ctx, &PrinterCommand::PrintStop).await
        }
    }
}

async fn start(ctx: &Context<'_>, args: StartArgs) -> Result<()> {
    if ctx.dry_run(format_args!("start print for {}", args.file.display()))? {
        return Ok(());
    }

    let target = ctx.target(Needs::MQTT)?;
    let request = start_request(&args)?;

    if !args.no_upload {
        let ftp = target.ftp_client();
        let local = args.file.clone();
        let remote = request.file.clone();
        let plate = request.plate_location.clone();
        tokio::task::spawn_blocking(move || upload_job(&ftp, &local, &remote, &plate))
            .await
            .context("upload task failed")??;
    }

    let client = target.connect().await?;
    client.publish(&PrinterCommand::PrintStart(request)).await?;
    client.close().await?;
    Ok(())
}

/// Build the start request, checking flag combinations.
fn start_request(args: &StartArgs) -> Result<StartPrint> {
    let plate_location = plate_location(&args.plate);
    let ams_mapping = parse_int_list(&args.ams_mapping).context("invalid --ams-mapping")?;
    let skip_objects = match args.skip_objects.as_deref().filter(|s| !s.is_empty()) {
        Some(list) => parse_int_list(list).context("invalid --skip-objects")?,
        None => Vec::new(),
    };

    let file = if args.no_upload {
        if archive::has_extension(&args.file.to_string_lossy(), ".gcode") {
            bail!("--no-upload cannot be used with .gcode input");
        }
        args.remote_name
            .clone()
            .unwrap_or_else(|| args.file.to_string_lossy().into_owned())
    } else {
        args.remote_name
            .clone()
            .unwrap_or_else(|| archive::remote_name_for(&args.file))
    };

    Ok(StartPrint {
        file,
        plate_location,
        use_ams: !args.no_ams,
        ams_mapping,
        skip_objects,
        flow_calibration: args.flow_calibration,
    })
}

/// Upload `local` as `remote`, packaging bare G-code first.
fn upload_job(ftp: &impl FileTransfer, local: &Path, remote: &str, plate: &str) -> Result<()> {
    let bytes = if archive::needs_packaging(local) {
        let packaged = archive::package_gcode(local, plate)
            .with_context(|| format!("failed to package {}", local.display()))?;
        ftp.upload(packaged.path(), remote)?
    } else {
        ftp.upload(local, remote)?
    };
    tracing::debug!(remote, bytes, "uploaded print job");
    Ok(())
}

/// Comma-separated integers; an empty list means `[0]`.
fn parse_int_list(input: &str) -> Result<Vec<i64>> {
    let mut values = Vec::new();
    for part in input.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        values.push(
            part.parse()
                .with_context(|| format!("{part:?} is not an integer"))?,
        );
    }
    if values.is_empty() {
        values.push(0);
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::{Read, Write};
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn args(file: &str) -> StartArgs {
        StartArgs {
            file: PathBuf::from(file),
            plate: "1".into(),
            no_upload: false,
            no_ams: false,
            ams_mapping: "0".into(),
            skip_objects: None,
            flow_calibration: true,
            remote_name: None,
        }
    }

    #[derive(Default)]
    struct RecordingStorage {
        uploads: Mutex<Vec<(String, Vec<u8>)>>,
    }

    impl FileTransfer for RecordingStorage {
        fn list(&self, _dir: &str) -> bambu_printer::Result<Vec<String>> {
            Ok(Vec::new())
        }

        fn upload_from(&self, reader: &mut dyn Read, remote: &str) -> bambu_printer::Result<u64> {
            let mut data = Vec::new();
            reader.read_to_end(&mut data)?;
            let len = data.len() as u64;
            self.uploads.lock().unwrap().push((remote.to_string(), data));
            Ok(len)
        }

        fn download(&self, _remote: &str, _out: &mut dyn Write) -> bambu_printer::Result<u64> {
            Ok(0)
        }

        fn delete(&self, _remote: &str) -> bambu_printer::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_parse_int_list() {
        assert_eq!(parse_int_list("0, 1,,3").unwrap(), vec![0, 1, 3]);
        assert_eq!(parse_int_list("").unwrap(), vec![0]);
        assert_eq!(parse_int_list("-1").unwrap(), vec![-1]);
        assert!(parse_int_list("1,x").is_err());
    }

    #[test]
    fn test_start_request_defaults() {
        let request = start_request(&args("parts/benchy.gcode")).unwrap();
        assert_eq!(request.file, "benchy.3mf");
        assert_eq!(request.plate_location, "Metadata/plate_1.gcode");
        assert!(request.use_ams);
        assert_eq!(request.ams_mapping, vec![0]);
        assert!(request.skip_objects.is_empty());
    }

    #[test]
    fn test_start_request_options() {
        let request = start_request(&StartArgs {
            plate: "3".into(),
            no_ams: true,
            ams_mapping: "2,0".into(),
            skip_objects: Some("7, 9".into()),
            flow_calibration: false,
            remote_name: Some("job.3mf".into()),
            ..args("benchy.3mf")
        })
        .unwrap();
        assert_eq!(request.file, "job.3mf");
        assert_eq!(request.plate_location, "Metadata/plate_3.gcode");
        assert!(!request.use_ams);
        assert_eq!(request.ams_mapping, vec![2, 0]);
        assert_eq!(request.skip_objects, vec![7, 9]);
        assert!(!request.flow_calibration);
    }

    #[test]
    fn test_no_upload_keeps_remote_path() {
        let request = start_request(&StartArgs {
            no_upload: true,
            ..args("cache/benchy.3mf")
        })
        .unwrap();
        assert_eq!(request.file, "cache/benchy.3mf");

        let err = start_request(&StartArgs {
            no_upload: true,
            ..args("benchy.GCODE")
        })
        .unwrap_err();
        assert!(err.to_string().contains("--no-upload"));
    }

    #[test]
    fn test_upload_job_packages_gcode() {
        let dir = TempDir::new().unwrap();
        let gcode = dir.path().join("cube.gcode");
        fs::write(&gcode, "G28\nG1 X10\n").unwrap();

        let storage = RecordingStorage::default();
        upload_job(&storage, &gcode, "cube.3mf", "Metadata/plate_2.gcode").unwrap();

        let uploads = storage.uploads.lock().unwrap();
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].0, "cube.3mf");
        assert_eq!(&uploads[0].1[..2], b"PK");
    }

    #[test]
    fn test_upload_job_sends_3mf_as_is() {
        let dir = TempDir::new().unwrap();
        let project = dir.path().join("cube.3mf");
        fs::write(&project, b"already an archive").unwrap();

        let storage = RecordingStorage::default();
        upload_job(&storage, &project, "cube.3mf", "Metadata/plate_1.gcode").unwrap();

        let uploads = storage.uploads.lock().unwrap();
        assert_eq!(uploads[0].1, b"already an archive");
    }
}
