//! Printer profiles.
//!
//! Profiles live in a JSON file in the user config directory, optionally
//! overlaid by a `.bambu.json` in the working directory.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Project-level config file name.
pub const PROJECT_FILE: &str = ".bambu.json";

/// Connection settings for one printer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Profile {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub ip: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub serial: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub access_code_file: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub username: String,
    #[serde(skip_serializing_if = "is_false")]
    pub no_camera: bool,
    #[serde(skip_serializing_if = "is_zero")]
    pub mqtt_port: u16,
    #[serde(skip_serializing_if = "is_zero")]
    pub ftp_port: u16,
    #[serde(skip_serializing_if = "is_zero")]
    pub camera_port: u16,
    #[serde(skip_serializing_if = "is_zero")]
    pub timeout_seconds: u64,
}

fn is_false(value: &bool) -> bool {
    !*value
}

fn is_zero<T: Default + PartialEq>(value: &T) -> bool {
    *value == T::default()
}

impl Profile {
    /// Overlay `other` on top of `self`: set fields win, `no_camera` sticks.
    pub fn merge(&mut self, other: &Profile) {
        fn text(slot: &mut String, value: &str) {
            if !value.is_empty() {
                *slot = value.to_string();
            }
        }
        fn number<T: Copy + Default + PartialEq>(slot: &mut T, value: T) {
            if value != T::default() {
                *slot = value;
            }
        }

        text(&mut self.ip, &other.ip);
        text(&mut self.serial, &other.serial);
        text(&mut self.access_code_file, &other.access_code_file);
        text(&mut self.username, &other.username);
        number(&mut self.mqtt_port, other.mqtt_port);
        number(&mut self.ftp_port, other.ftp_port);
        number(&mut self.camera_port, other.camera_port);
        number(&mut self.timeout_seconds, other.timeout_seconds);
        self.no_camera |= other.no_camera;
    }

    /// Value of a single field by its file key.
    pub fn field(&self, key: &str) -> Option<Value> {
        let value = match key {
            "ip" => Value::from(self.ip.clone()),
            "serial" => Value::from(self.serial.clone()),
            "access_code_file" => Value::from(self.access_code_file.clone()),
            "username" => Value::from(self.username.clone()),
            "no_camera" => Value::from(self.no_camera),
            "mqtt_port" => Value::from(self.mqtt_port),
            "ftp_port" => Value::from(self.ftp_port),
            "camera_port" => Value::from(self.camera_port),
            "timeout_seconds" => Value::from(self.timeout_seconds),
            _ => return None,
        };
        Some(value)
    }
}

/// Contents of one config file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub default_profile: String,
    pub profiles: BTreeMap<String, Profile>,
}

impl Config {
    /// Read a config file. A missing file is an empty config.
    pub fn load(path: &Path) -> Result<Self> {
        let data = match fs::read_to_string(path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read {}", path.display()))
            }
        };
        serde_json::from_str(&data).with_context(|| format!("invalid config {}", path.display()))
    }

    /// Write the config as pretty JSON, readable only by the owner.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }

        let mut data = serde_json::to_vec_pretty(self)?;
        data.push(b'\n');

        let mut file = open_private(path)
            .with_context(|| format!("failed to write {}", path.display()))?;
        file.write_all(&data)?;
        Ok(())
    }

    /// Overlay `other` (the project file) on top of `self` (the user file).
    pub fn merge(mut self, other: Config) -> Config {
        if !other.default_profile.is_empty() {
            self.default_profile = other.default_profile;
        }
        for (name, profile) in other.profiles {
            self.profiles.entry(name).or_default().merge(&profile);
        }
        self
    }

    /// Pick the profile to use: explicit name, then `default_profile`,
    /// then the only profile if there is exactly one.
    pub fn select(&self, requested: Option<&str>) -> Option<(&str, &Profile)> {
        let name = requested
            .filter(|n| !n.is_empty())
            .or_else(|| Some(self.default_profile.as_str()).filter(|n| !n.is_empty()));

        match name {
            Some(name) => self.profiles.get_key_value(name).map(|(n, p)| (n.as_str(), p)),
            None if self.profiles.len() == 1 => {
                self.profiles.iter().next().map(|(n, p)| (n.as_str(), p))
            }
            None => None,
        }
    }

    /// Look up `default_profile` or a profile field.
    pub fn value(&self, profile: Option<&str>, key: &str) -> Value {
        if key == "default_profile" {
            return Value::from(self.default_profile.clone());
        }
        profile
            .and_then(|name| self.profiles.get(name))
            .and_then(|p| p.field(key))
            .unwrap_or(Value::Null)
    }
}

#[cfg(unix)]
fn open_private(path: &Path) -> io::Result<fs::File> {
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

    let file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    // `mode` only applies on creation.
    file.set_permissions(fs::Permissions::from_mode(0o600))?;
    Ok(file)
}

#[cfg(not(unix))]
fn open_private(path: &Path) -> io::Result<fs::File> {
    fs::File::create(path)
}

/// `<config dir>/bambu/config.json`.
pub fn user_config_path() -> Result<PathBuf> {
    let mut path = dirs::config_dir().context("cannot determine config directory")?;
    path.push("bambu");
    path.push("config.json");
    Ok(path)
}

/// `.bambu.json` in `dir`.
pub fn project_config_path(dir: &Path) -> PathBuf {
    dir.join(PROJECT_FILE)
}

/// User file (or `override_path`) merged with the project file in `cwd`.
pub fn load_merged(override_path: Option<&Path>, cwd: &Path) -> Result<(PathBuf, Config)> {
    let user_path = match override_path {
        Some(path) => path.to_path_buf(),
        None => user_config_path()?,
    };
    let user = Config::load(&user_path)?;
    let project = Config::load(&project_config_path(cwd))?;
    Ok((user_path, user.merge(project)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn profile(ip: &str, serial: &str) -> Profile {
        Profile {
            ip: ip.into(),
            serial: serial.into(),
            ..Profile::default()
        }
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let config = Config::load(&dir.path().join("nope.json")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut config = Config::default();
        config.default_profile = "x1c".into();
        config.profiles.insert("x1c".into(), profile("192.168.1.20", "01S00A"));
        config.save(&path).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.ends_with('\n'));
        assert!(!text.contains("mqtt_port"), "zero fields are omitted");
        assert_eq!(Config::load(&path).unwrap(), config);
    }

    #[cfg(unix)]
    #[test]
    fn test_save_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        Config::default().save(&path).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_invalid_json_is_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{not json").unwrap();
        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn test_merge_project_over_user() {
        let mut user = Config::default();
        user.default_profile = "home".into();
        user.profiles.insert(
            "home".into(),
            Profile {
                mqtt_port: 1883,
                no_camera: true,
                ..profile("10.0.0.5", "AAA")
            },
        );

        let mut project = Config::default();
        project.profiles.insert("home".into(), profile("10.0.0.9", ""));
        project.profiles.insert("lab".into(), profile("10.1.0.1", "BBB"));

        let merged = user.merge(project);
        let home = &merged.profiles["home"];
        assert_eq!(home.ip, "10.0.0.9");
        assert_eq!(home.serial, "AAA");
        assert_eq!(home.mqtt_port, 1883);
        assert!(home.no_camera);
        assert_eq!(merged.default_profile, "home");
        assert_eq!(merged.profiles["lab"].serial, "BBB");
    }

    #[test]
    fn test_select_profile() {
        let mut config = Config::default();
        config.profiles.insert("only".into(), profile("10.0.0.5", "AAA"));
        assert_eq!(config.select(None).map(|(n, _)| n), Some("only"));
        assert!(config.select(Some("other")).is_none());

        config.profiles.insert("second".into(), profile("10.0.0.6", "BBB"));
        assert!(config.select(None).is_none());

        config.default_profile = "second".into();
        assert_eq!(config.select(None).map(|(n, _)| n), Some("second"));
        assert_eq!(config.select(Some("only")).map(|(n, _)| n), Some("only"));
    }

    #[test]
    fn test_value_lookup() {
        let mut config = Config::default();
        config.default_profile = "x1c".into();
        config.profiles.insert(
            "x1c".into(),
            Profile {
                ftp_port: 2121,
                ..profile("10.0.0.5", "AAA")
            },
        );

        assert_eq!(config.value(None, "default_profile"), Value::from("x1c"));
        assert_eq!(config.value(Some("x1c"), "ftp_port"), Value::from(2121));
        assert_eq!(config.value(Some("x1c"), "bogus"), Value::Null);
        assert_eq!(config.value(None, "ip"), Value::Null);
    }

    #[test]
    fn test_load_merged_reads_project_file() {
        let home = TempDir::new().unwrap();
        let project = TempDir::new().unwrap();
        let user_path = home.path().join("config.json");

        let mut user = Config::default();
        user.profiles.insert("p".into(), profile("10.0.0.5", "AAA"));
        user.save(&user_path).unwrap();
        fs::write(
            project_config_path(project.path()),
            r#"{"profiles":{"p":{"serial":"ZZZ"}}}"#,
        )
        .unwrap();

        let (path, merged) = load_merged(Some(&user_path), project.path()).unwrap();
        assert_eq!(path, user_path);
        assert_eq!(merged.profiles["p"].ip, "10.0.0.5");
        assert_eq!(merged.profiles["p"].serial, "ZZZ");
    }
}
