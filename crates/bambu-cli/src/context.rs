//! Printer resolution.
//!
//! Connection settings come from, in order: command-line flags (or their
//! `BAMBU_*` environment variables), the selected profile, then defaults.

use std::env;
use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use bambu_printer::camera::DEFAULT_CAMERA_PORT;
use bambu_printer::ftp::DEFAULT_FTP_PORT;
use bambu_printer::mqtt::DEFAULT_MQTT_PORT;
use bambu_printer::{
    CameraClient, CameraConfig, FtpClient, FtpConfig, MqttConfig, PrinterClient,
    DEFAULT_USERNAME,
};
use clap::Args;

use crate::config::{self, Config, Profile};

const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Which printer to talk to and how.
#[derive(Args, Debug, Clone, Default)]
pub struct ConnectionArgs {
    /// Profile name from the config file
    #[arg(long, env = "BAMBU_PROFILE")]
    pub printer: Option<String>,

    /// Printer IP address
    #[arg(long, env = "BAMBU_IP")]
    pub ip: Option<String>,

    /// Printer serial number
    #[arg(long, env = "BAMBU_SERIAL")]
    pub serial: Option<String>,

    /// File containing the LAN access code
    #[arg(long, env = "BAMBU_ACCESS_CODE_FILE")]
    pub access_code_file: Option<PathBuf>,

    /// Read the access code from stdin
    #[arg(long)]
    pub access_code_stdin: bool,

    /// MQTT port
    #[arg(long, env = "BAMBU_MQTT_PORT")]
    pub mqtt_port: Option<u16>,

    /// FTPS port
    #[arg(long, env = "BAMBU_FTP_PORT")]
    pub ftp_port: Option<u16>,

    /// Camera port
    #[arg(long, env = "BAMBU_CAMERA_PORT")]
    pub camera_port: Option<u16>,

    /// Network timeout in seconds
    #[arg(long, env = "BAMBU_TIMEOUT")]
    pub timeout: Option<u64>,

    /// Disable camera access
    #[arg(long, env = "BAMBU_NO_CAMERA")]
    pub no_camera: bool,

    /// User config file (default: <config dir>/bambu/config.json)
    #[arg(long)]
    pub config: Option<PathBuf>,
}

/// Which credentials a command cannot run without.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Needs {
    pub access_code: bool,
    pub serial: bool,
}

impl Needs {
    /// Telemetry and commands.
    pub const MQTT: Needs = Needs {
        access_code: true,
        serial: true,
    };
    /// Storage and camera.
    pub const ACCESS: Needs = Needs {
        access_code: true,
        serial: false,
    };
    /// Reachability checks.
    pub const ADDRESS: Needs = Needs {
        access_code: false,
        serial: false,
    };
}

/// Fully resolved connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrinterTarget {
    pub profile: Option<String>,
    pub host: String,
    pub serial: String,
    pub username: String,
    pub access_code: String,
    pub mqtt_port: u16,
    pub ftp_port: u16,
    pub camera_port: u16,
    pub timeout: Duration,
    pub no_camera: bool,
}

impl ConnectionArgs {
    /// Path of the user config file that `config` subcommands edit.
    pub fn user_config_path(&self) -> Result<PathBuf> {
        match &self.config {
            Some(path) => Ok(path.clone()),
            None => config::user_config_path(),
        }
    }

    /// Resolve against the merged user and project config, reading the
    /// access code from the process stdin when asked to.
    pub fn resolve(&self, needs: Needs) -> Result<PrinterTarget> {
        let cwd = env::current_dir().context("cannot determine working directory")?;
        let (_, config) = config::load_merged(self.config.as_deref(), &cwd)?;
        self.resolve_with(&config, needs, &mut io::stdin().lock())
    }

    /// Resolve against `config`, reading `--access-code-stdin` from `stdin`.
    pub fn resolve_with<R: Read>(
        &self,
        config: &Config,
        needs: Needs,
        stdin: &mut R,
    ) -> Result<PrinterTarget> {
        let selected = config.select(self.printer.as_deref());
        let fallback = Profile::default();
        let (profile_name, profile) = match selected {
            Some((name, profile)) => (Some(name.to_string()), profile),
            None => (self.printer.clone().filter(|n| !n.is_empty()), &fallback),
        };
        if profile_name.is_some() && selected.is_none() {
            tracing::debug!(profile = ?profile_name, "profile not found in config");
        }

        let host = first_text(self.ip.as_deref(), &profile.ip);
        let serial = first_text(self.serial.as_deref(), &profile.serial);
        let username = first_text(None, &profile.username);

        let access_code = if needs.access_code {
            let file = self
                .access_code_file
                .clone()
                .or_else(|| Some(PathBuf::from(&profile.access_code_file)))
                .filter(|p| !p.as_os_str().is_empty());
            read_access_code(file, self.access_code_stdin, stdin)?
        } else {
            String::new()
        };

        if host.is_empty() {
            bail!("missing printer IP; use --ip or config");
        }
        if needs.serial && serial.is_empty() {
            bail!("missing printer serial; use --serial or config");
        }

        let timeout = self
            .timeout
            .filter(|t| *t != 0)
            .or(Some(profile.timeout_seconds).filter(|t| *t != 0))
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        Ok(PrinterTarget {
            profile: profile_name,
            host,
            serial,
            username: if username.is_empty() {
                DEFAULT_USERNAME.to_string()
            } else {
                username
            },
            access_code,
            mqtt_port: first_port(self.mqtt_port, profile.mqtt_port, DEFAULT_MQTT_PORT),
            ftp_port: first_port(self.ftp_port, profile.ftp_port, DEFAULT_FTP_PORT),
            camera_port: first_port(self.camera_port, profile.camera_port, DEFAULT_CAMERA_PORT),
            timeout: Duration::from_secs(timeout),
            no_camera: self.no_camera || profile.no_camera,
        })
    }
}

fn first_text(flag: Option<&str>, profile: &str) -> String {
    flag.filter(|v| !v.is_empty())
        .unwrap_or(profile)
        .to_string()
}

fn first_port(flag: Option<u16>, profile: u16, default: u16) -> u16 {
    flag.filter(|p| *p != 0)
        .or(Some(profile).filter(|p| *p != 0))
        .unwrap_or(default)
}

/// Read and trim the access code from stdin or a file.
fn read_access_code<R: Read>(file: Option<PathBuf>, from_stdin: bool, stdin: &mut R) -> Result<String> {
    if from_stdin {
        let mut data = String::new();
        stdin
            .read_to_string(&mut data)
            .context("failed to read access code from stdin")?;
        let code = data.trim();
        if code.is_empty() {
            bail!("access code from stdin is empty");
        }
        return Ok(code.to_string());
    }

    let Some(path) = file else {
        bail!("missing access code; use --access-code-file or --access-code-stdin");
    };
    let data = fs::read_to_string(&path)
        .with_context(|| format!("failed to read access code file {}", path.display()))?;
    let code = data.trim();
    if code.is_empty() {
        bail!("access code file {} is empty", path.display());
    }
    Ok(code.to_string())
}

impl PrinterTarget {
    pub fn mqtt_config(&self) -> MqttConfig {
        MqttConfig {
            host: self.host.clone(),
            port: self.mqtt_port,
            serial: self.serial.clone(),
            username: self.username.clone(),
            access_code: self.access_code.clone(),
            timeout: self.timeout,
        }
    }

    pub fn ftp_client(&self) -> FtpClient {
        FtpClient::new(FtpConfig {
            host: self.host.clone(),
            port: self.ftp_port,
            username: self.username.clone(),
            access_code: self.access_code.clone(),
            timeout: self.timeout,
        })
    }

    pub fn camera_client(&self) -> Result<CameraClient> {
        if self.no_camera {
            bail!("camera access is disabled for this printer");
        }
        Ok(CameraClient::new(CameraConfig {
            host: self.host.clone(),
            port: self.camera_port,
            username: self.username.clone(),
            access_code: self.access_code.clone(),
            timeout: self.timeout,
        }))
    }

    /// Connect for publishing commands.
    pub async fn connect(&self) -> Result<PrinterClient> {
        PrinterClient::connect(self.mqtt_config())
            .await
            .with_context(|| format!("failed to connect to {}:{}", self.host, self.mqtt_port))
    }

    /// Connect, request a full report and wait for it.
    ///
    /// A printer that stays silent still yields a client; readers then see
    /// the defaults of an empty document.
    pub async fn connect_with_telemetry(&self) -> Result<PrinterClient> {
        let client = self.connect().await?;
        if let Err(e) = client.push_all().await {
            tracing::warn!(error = %e, "pushall request failed");
        }
        if let Err(e) = client.wait_for_ready(Some(self.timeout)).await {
            tracing::warn!(error = %e, "no telemetry received");
        }
        Ok(client)
    }
}
