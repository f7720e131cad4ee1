//! Bambu printer commands.
//!
//! Every command is a JSON envelope published to `device/<serial>/request`.
//! Envelopes are built fresh per call and carry exactly one top-level tag:
//! `print` for job control, `system` for device control, `pushing` for a
//! telemetry refresh.

use serde_json::{json, Value};

/// Sequence id the printer expects on `project_file` requests.
const START_SEQUENCE_ID: &str = "10000000";

/// Plate location used when none is given.
pub const DEFAULT_PLATE_LOCATION: &str = "Metadata/plate_1.gcode";

/// Start-print request for a file already on the printer's storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartPrint {
    /// Remote file name.
    pub file: String,
    /// Archive-internal gcode path (see [`plate_location`]).
    pub plate_location: String,
    /// Feed from the AMS.
    pub use_ams: bool,
    /// AMS slot per filament, in order.
    pub ams_mapping: Vec<i64>,
    /// Object ids to skip.
    pub skip_objects: Vec<i64>,
    /// Run flow calibration before printing.
    pub flow_calibration: bool,
}

/// Calibration routines to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalibrationOptions {
    /// Bed leveling.
    pub bed_leveling: bool,
    /// Motor noise cancellation.
    pub motor_noise: bool,
    /// Vibration compensation.
    pub vibration: bool,
}

impl Default for CalibrationOptions {
    fn default() -> Self {
        Self {
            bed_leveling: true,
            motor_noise: true,
            vibration: true,
        }
    }
}

impl CalibrationOptions {
    /// Option bitmask: bed leveling = 2, vibration = 4, motor noise = 8.
    pub fn bitmask(&self) -> u32 {
        let mut mask = 0;
        if self.bed_leveling {
            mask |= 1 << 1;
        }
        if self.vibration {
            mask |= 1 << 2;
        }
        if self.motor_noise {
            mask |= 1 << 3;
        }
        mask
    }
}

/// Command to send to the printer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrinterCommand {
    /// Request a full status push.
    PushAll,
    /// Switch the chamber light.
    SetLight {
        /// Light on or off.
        on: bool,
    },
    /// Start a print job.
    PrintStart(StartPrint),
    /// Pause current print.
    PrintPause,
    /// Resume paused print.
    PrintResume,
    /// Stop current print.
    PrintStop,
    /// Send one or more G-code lines.
    Gcode(Vec<String>),
    /// Run calibration routines.
    Calibrate(CalibrationOptions),
    /// Reboot the printer.
    Reboot,
}

impl PrinterCommand {
    /// Build a G-code command from individual lines.
    pub fn gcode<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        PrinterCommand::Gcode(lines.into_iter().map(Into::into).collect())
    }

    /// Short action name, used in logs and confirmation prompts.
    pub fn action(&self) -> &'static str {
        match self {
            PrinterCommand::PushAll => "pushall",
            PrinterCommand::SetLight { .. } => "light",
            PrinterCommand::PrintStart(_) => "start",
            PrinterCommand::PrintPause => "pause",
            PrinterCommand::PrintResume => "resume",
            PrinterCommand::PrintStop => "stop",
            PrinterCommand::Gcode(_) => "gcode",
            PrinterCommand::Calibrate(_) => "calibrate",
            PrinterCommand::Reboot => "reboot",
        }
    }

    /// Convert command to JSON payload.
    pub fn to_json(&self) -> Value {
        match self {
            PrinterCommand::PushAll => json!({
                "pushing": {
                    "sequence_id": "0",
                    "command": "pushall"
                }
            }),

            PrinterCommand::SetLight { on } => json!({
                "system": {
                    "sequence_id": "0",
                    "command": "ledctrl",
                    "led_node": "chamber_light",
                    "led_mode": if *on { "on" } else { "off" },
                    "led_on_time": 500,
                    "led_off_time": 500,
                    "loop_times": 0,
                    "interval_time": 0
                }
            }),

            PrinterCommand::PrintStart(start) => {
                let mut cmd = json!({
                    "print": {
                        "sequence_id": START_SEQUENCE_ID,
                        "command": "project_file",
                        "param": start.plate_location,
                        "file": start.file,
                        "url": format!("ftp:///{}", start.file),
                        "bed_type": "textured_plate",
                        "bed_leveling": true,
                        "flow_cali": start.flow_calibration,
                        "vibration_cali": true,
                        "layer_inspect": false,
                        "use_ams": start.use_ams,
                        "ams_mapping": start.ams_mapping
                    }
                });

                if !start.skip_objects.is_empty() {
                    if let Some(print) = cmd.get_mut("print") {
                        print["skip_objects"] = json!(start.skip_objects);
                    }
                }

                cmd
            }

            PrinterCommand::PrintPause => json!({
                "print": {
                    "command": "pause"
                }
            }),

            PrinterCommand::PrintResume => json!({
                "print": {
                    "command": "resume"
                }
            }),

            PrinterCommand::PrintStop => json!({
                "print": {
                    "command": "stop"
                }
            }),

            PrinterCommand::Gcode(lines) => json!({
                "print": {
                    "sequence_id": "0",
                    "command": "gcode_line",
                    "param": lines.join("\n")
                }
            }),

            PrinterCommand::Calibrate(options) => json!({
                "print": {
                    "command": "calibration",
                    "option": options.bitmask()
                }
            }),

            PrinterCommand::Reboot => json!({
                "system": {
                    "command": "reboot"
                }
            }),
        }
    }
}

/// Topic printers publish reports on.
pub fn report_topic(serial: &str) -> String {
    format!("device/{serial}/report")
}

/// Topic printers accept commands on.
pub fn request_topic(serial: &str) -> String {
    format!("device/{serial}/request")
}

/// Resolve a plate number or gcode path to an archive-internal location.
///
/// Empty input means plate 1, a plain digit string `N` means
/// `Metadata/plate_N.gcode`, and anything else is already a path.
pub fn plate_location(plate: &str) -> String {
    if plate.is_empty() {
        DEFAULT_PLATE_LOCATION.to_string()
    } else if plate.bytes().all(|b| b.is_ascii_digit()) {
        format!("Metadata/plate_{plate}.gcode")
    } else {
        plate.to_string()
    }
}

/// G-code for setting heater targets. `None` leaves a heater alone.
pub fn temperature_gcode(bed: Option<u32>, nozzle: Option<u32>, chamber: Option<u32>) -> Vec<String> {
    let mut lines = Vec::new();
    if let Some(temp) = bed {
        lines.push(format!("M140 S{temp}"));
    }
    if let Some(temp) = nozzle {
        lines.push(format!("M104 S{temp}"));
    }
    if let Some(temp) = chamber {
        lines.push(format!("M141 S{temp}"));
    }
    lines
}

/// G-code for homing all axes.
pub fn home_gcode() -> Vec<String> {
    vec!["G28".to_string()]
}

/// G-code for an absolute Z move.
pub fn move_z_gcode(height: f64) -> Vec<String> {
    vec!["G90".to_string(), format!("G0 Z{height}")]
}

/// Fan selector for `M106`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fan {
    /// Part cooling fan.
    Part,
    /// Auxiliary fan.
    Aux,
    /// Chamber fan.
    Chamber,
}

impl Fan {
    fn index(self) -> u8 {
        match self {
            Fan::Part => 1,
            Fan::Aux => 2,
            Fan::Chamber => 3,
        }
    }
}

/// G-code for setting fan speeds (0-255).
pub fn fan_gcode(speeds: &[(Fan, u8)]) -> Vec<String> {
    speeds
        .iter()
        .map(|(fan, speed)| format!("M106 P{} S{}", fan.index(), speed))
        .collect()
}

/// Parse a fan speed: a fraction with a decimal point (`0.5`, truncated
/// after scaling) or a raw value (`128`). Returns `None` for anything
/// outside 0-1 / 0-255.
pub fn parse_fan_speed(input: &str) -> Option<u8> {
    let input = input.trim();
    if input.contains('.') {
        let fraction: f64 = input.parse().ok()?;
        if !(0.0..=1.0).contains(&fraction) {
            return None;
        }
        Some((fraction * 255.0) as u8)
    } else {
        input.parse::<u8>().ok()
    }
}
