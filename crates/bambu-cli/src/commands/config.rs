//! Profile management. Edits the user config file only.

use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::Result;
use clap::Subcommand;
use serde_json::{json, Value};

use super::Context;
use crate::config::{Config, Profile};
use crate::output::{self, Format};

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Show the config file
    List,

    /// Show one value
    Get {
        /// `default_profile` or a profile field (ip, serial, mqtt_port, ...)
        key: String,
        /// Profile to read from
        #[arg(long)]
        printer: Option<String>,
    },

    /// Create or update a profile
    Set {
        /// Profile name
        #[arg(long)]
        printer: String,
        #[arg(long)]
        ip: Option<String>,
        #[arg(long)]
        serial: Option<String>,
        #[arg(long)]
        access_code_file: Option<PathBuf>,
        /// Username (default: bblp)
        #[arg(long)]
        username: Option<String>,
        #[arg(long)]
        mqtt_port: Option<u16>,
        #[arg(long)]
        ftp_port: Option<u16>,
        #[arg(long)]
        camera_port: Option<u16>,
        /// Timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,
        /// Disable camera access
        #[arg(long)]
        no_camera: bool,
        /// Make this the default profile
        #[arg(long)]
        default: bool,
    },

    /// Delete a profile
    Remove {
        /// Profile name
        #[arg(long)]
        printer: String,
    },
}

pub fn run(ctx: &Context<'_>, command: ConfigCommand) -> Result<()> {
    let path = ctx.connection.user_config_path()?;
    let mut config = Config::load(&path)?;
    let mut out = io::stdout().lock();

    match command {
        ConfigCommand::List => {
            if ctx.format() != Format::Json {
                writeln!(out, "Config file: {}", path.display())?;
            }
            output::write_json(&mut out, &config)
        }
        ConfigCommand::Get { key, printer } => {
            let profile = printer.or_else(|| ctx.connection.printer.clone());
            let value = config.value(profile.as_deref(), &key);
            if ctx.format() == Format::Json {
                return output::write_json(&mut out, &json!({ "key": key, "value": value }));
            }
            writeln!(out, "{}", display_value(&value))?;
            Ok(())
        }
        ConfigCommand::Set {
            printer,
            ip,
            serial,
            access_code_file,
            username,
            mqtt_port,
            ftp_port,
            camera_port,
            timeout,
            no_camera,
            default,
        } => {
            let update = Profile {
                ip: ip.unwrap_or_default(),
                serial: serial.unwrap_or_default(),
                access_code_file: access_code_file
                    .map(|p| p.display().to_string())
                    .unwrap_or_default(),
                username: username.unwrap_or_default(),
                no_camera,
                mqtt_port: mqtt_port.unwrap_or_default(),
                ftp_port: ftp_port.unwrap_or_default(),
                camera_port: camera_port.unwrap_or_default(),
                timeout_seconds: timeout.unwrap_or_default(),
            };
            apply_set(&mut config, &printer, &update, default);
            config.save(&path)?;
            tracing::debug!(profile = %printer, path = %path.display(), "profile saved");
            Ok(())
        }
        ConfigCommand::Remove { printer } => {
            apply_remove(&mut config, &printer);
            config.save(&path)
        }
    }
}

fn apply_set(config: &mut Config, name: &str, update: &Profile, make_default: bool) {
    config
        .profiles
        .entry(name.to_string())
        .or_default()
        .merge(update);
    if make_default {
        config.default_profile = name.to_string();
    }
}

fn apply_remove(config: &mut Config, name: &str) {
    config.profiles.remove(name);
    if config.default_profile == name {
        config.default_profile.clear();
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_merges_into_existing_profile() {
        let mut config = Config::default();
        apply_set(
            &mut config,
            "x1c",
            &Profile {
                ip: "10.0.0.5".into(),
                serial: "AAA".into(),
                ..Profile::default()
            },
            true,
        );
        apply_set(
            &mut config,
            "x1c",
            &Profile {
                mqtt_port: 1883,
                ..Profile::default()
            },
            false,
        );

        let profile = &config.profiles["x1c"];
        assert_eq!(profile.ip, "10.0.0.5");
        assert_eq!(profile.mqtt_port, 1883);
        assert_eq!(config.default_profile, "x1c");
    }

    #[test]
    fn test_remove_clears_default() {
        let mut config = Config::default();
        apply_set(&mut config, "a", &Profile::default(), true);
        apply_set(&mut config, "b", &Profile::default(), false);

        apply_remove(&mut config, "b");
        assert_eq!(config.default_profile, "a");

        apply_remove(&mut config, "a");
        assert!(config.profiles.is_empty());
        assert!(config.default_profile.is_empty());
    }

    #[test]
    fn test_display_value() {
        assert_eq!(display_value(&Value::Null), "");
        assert_eq!(display_value(&json!("10.0.0.5")), "10.0.0.5");
        assert_eq!(display_value(&json!(8883)), "8883");
        assert_eq!(display_value(&json!(true)), "true");
    }
}
