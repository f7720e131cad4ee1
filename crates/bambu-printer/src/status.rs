//! Printer status types and decoding.

use std::fmt;

use serde::{Serialize, Serializer};
use serde_json::Value;

use crate::error::{BambuError, Result};
use crate::state::StateAggregator;
use crate::value::{self, Numeric};

/// Printer sub-stage reported in `print.stg_cur`.
///
/// Variants follow the device's stage table; see [`PrintStatus::name`].
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrintStatus {
    Printing,
    AutoBedLeveling,
    HeatbedPreheating,
    SweepingXyMechMode,
    ChangingFilament,
    M400Pause,
    PausedFilamentRunout,
    HeatingHotend,
    CalibratingExtrusion,
    ScanningBedSurface,
    InspectingFirstLayer,
    IdentifyingBuildPlateType,
    CalibratingMicroLidar,
    HomingToolhead,
    CleaningNozzleTip,
    CheckingExtruderTemperature,
    PausedUser,
    PausedFrontCoverFalling,
    CalibratingLidar,
    CalibratingExtrusionFlow,
    PausedNozzleTemperatureMalfunction,
    PausedHeatBedTemperatureMalfunction,
    FilamentUnloading,
    PausedSkippedStep,
    FilamentLoading,
    CalibratingMotorNoise,
    PausedAmsLost,
    PausedLowFanSpeedHeatBreak,
    PausedChamberTemperatureControlError,
    CoolingChamber,
    PausedUserGcode,
    MotorNoiseShowoff,
    PausedNozzleFilamentCoveredDetected,
    PausedCutterError,
    PausedFirstLayerError,
    PausedNozzleClog,
    /// Code 255, nothing running.
    Idle,
    /// Any code outside the table.
    Unknown,
}

impl PrintStatus {
    /// Look up a device code. Codes outside the table map to `Unknown`.
    pub fn from_code(code: i64) -> Self {
        use PrintStatus::*;
        match code {
            0 => Printing,
            1 => AutoBedLeveling,
            2 => HeatbedPreheating,
            3 => SweepingXyMechMode,
            4 => ChangingFilament,
            5 => M400Pause,
            6 => PausedFilamentRunout,
            7 => HeatingHotend,
            8 => CalibratingExtrusion,
            9 => ScanningBedSurface,
            10 => InspectingFirstLayer,
            11 => IdentifyingBuildPlateType,
            12 => CalibratingMicroLidar,
            13 => HomingToolhead,
            14 => CleaningNozzleTip,
            15 => CheckingExtruderTemperature,
            16 => PausedUser,
            17 => PausedFrontCoverFalling,
            18 => CalibratingLidar,
            19 => CalibratingExtrusionFlow,
            20 => PausedNozzleTemperatureMalfunction,
            21 => PausedHeatBedTemperatureMalfunction,
            22 => FilamentUnloading,
            23 => PausedSkippedStep,
            24 => FilamentLoading,
            25 => CalibratingMotorNoise,
            26 => PausedAmsLost,
            27 => PausedLowFanSpeedHeatBreak,
            28 => PausedChamberTemperatureControlError,
            29 => CoolingChamber,
            30 => PausedUserGcode,
            31 => MotorNoiseShowoff,
            32 => PausedNozzleFilamentCoveredDetected,
            33 => PausedCutterError,
            34 => PausedFirstLayerError,
            35 => PausedNozzleClog,
            255 => Idle,
            _ => Unknown,
        }
    }

    /// Canonical uppercase name.
    pub fn name(&self) -> &'static str {
        use PrintStatus::*;
        match self {
            Printing => "PRINTING",
            AutoBedLeveling => "AUTO_BED_LEVELING",
            HeatbedPreheating => "HEATBED_PREHEATING",
            SweepingXyMechMode => "SWEEPING_XY_MECH_MODE",
            ChangingFilament => "CHANGING_FILAMENT",
            M400Pause => "M400_PAUSE",
            PausedFilamentRunout => "PAUSED_FILAMENT_RUNOUT",
            HeatingHotend => "HEATING_HOTEND",
            CalibratingExtrusion => "CALIBRATING_EXTRUSION",
            ScanningBedSurface => "SCANNING_BED_SURFACE",
            InspectingFirstLayer => "INSPECTING_FIRST_LAYER",
            IdentifyingBuildPlateType => "IDENTIFYING_BUILD_PLATE_TYPE",
            CalibratingMicroLidar => "CALIBRATING_MICRO_LIDAR",
            HomingToolhead => "HOMING_TOOLHEAD",
            CleaningNozzleTip => "CLEANING_NOZZLE_TIP",
            CheckingExtruderTemperature => "CHECKING_EXTRUDER_TEMPERATURE",
            PausedUser => "PAUSED_USER",
            PausedFrontCoverFalling => "PAUSED_FRONT_COVER_FALLING",
            CalibratingLidar => "CALIBRATING_LIDAR",
            CalibratingExtrusionFlow => "CALIBRATING_EXTRUSION_FLOW",
            PausedNozzleTemperatureMalfunction => "PAUSED_NOZZLE_TEMPERATURE_MALFUNCTION",
            PausedHeatBedTemperatureMalfunction => "PAUSED_HEAT_BED_TEMPERATURE_MALFUNCTION",
            FilamentUnloading => "FILAMENT_UNLOADING",
            PausedSkippedStep => "PAUSED_SKIPPED_STEP",
            FilamentLoading => "FILAMENT_LOADING",
            CalibratingMotorNoise => "CALIBRATING_MOTOR_NOISE",
            PausedAmsLost => "PAUSED_AMS_LOST",
            PausedLowFanSpeedHeatBreak => "PAUSED_LOW_FAN_SPEED_HEAT_BREAK",
            PausedChamberTemperatureControlError => "PAUSED_CHAMBER_TEMPERATURE_CONTROL_ERROR",
            CoolingChamber => "COOLING_CHAMBER",
            PausedUserGcode => "PAUSED_USER_GCODE",
            MotorNoiseShowoff => "MOTOR_NOISE_SHOWOFF",
            PausedNozzleFilamentCoveredDetected => "PAUSED_NOZZLE_FILAMENT_COVERED_DETECTED",
            PausedCutterError => "PAUSED_CUTTER_ERROR",
            PausedFirstLayerError => "PAUSED_FIRST_LAYER_ERROR",
            PausedNozzleClog => "PAUSED_NOZZLE_CLOG",
            Idle => "IDLE",
            Unknown => "UNKNOWN",
        }
    }

    /// Decode a code delivered as an integer, float, or arbitrary-precision
    /// decimal.
    ///
    /// Non-numbers (strings included) are an error; numbers that are not
    /// whole or fall outside the table decode to `Unknown`.
    pub fn decode(code: &Value) -> Result<Self> {
        let numeric = value::coerce_number(code)
            .ok_or_else(|| BambuError::Decode(format!("unsupported status type: {code}")))?;
        Ok(numeric
            .exact_integer()
            .map_or(PrintStatus::Unknown, PrintStatus::from_code))
    }
}

impl fmt::Display for PrintStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for PrintStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

/// Decode a print-status code to its canonical name.
pub fn decode_print_status(code: &Value) -> Result<&'static str> {
    PrintStatus::decode(code).map(|status| status.name())
}

/// Job-level state reported in `print.gcode_state`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum GcodeState {
    /// Nothing loaded.
    Idle,
    /// Job received, printer getting ready.
    Prepare,
    /// Printing.
    Running,
    /// Paused by the user or a fault.
    Pause,
    /// Last job finished.
    Finish,
    /// Last job failed.
    Failed,
    /// Missing or unrecognised value.
    #[default]
    Unknown,
}

impl GcodeState {
    /// Decode a reported value; anything unexpected is `Unknown`.
    pub fn decode(value: &Value) -> Self {
        match value.as_str() {
            Some("IDLE") => GcodeState::Idle,
            Some("PREPARE") => GcodeState::Prepare,
            Some("RUNNING") => GcodeState::Running,
            Some("PAUSE") => GcodeState::Pause,
            Some("FINISH") => GcodeState::Finish,
            Some("FAILED") => GcodeState::Failed,
            _ => GcodeState::Unknown,
        }
    }

    /// Canonical uppercase name.
    pub fn name(&self) -> &'static str {
        match self {
            GcodeState::Idle => "IDLE",
            GcodeState::Prepare => "PREPARE",
            GcodeState::Running => "RUNNING",
            GcodeState::Pause => "PAUSE",
            GcodeState::Finish => "FINISH",
            GcodeState::Failed => "FAILED",
            GcodeState::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for GcodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for GcodeState {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

/// Decode a gcode state to its canonical name.
pub fn decode_gcode_state(value: &Value) -> &'static str {
    GcodeState::decode(value).name()
}

/// Flattened printer status, derived on demand from the device state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Status {
    /// Job-level state.
    pub gcode_state: GcodeState,
    /// Current sub-stage.
    pub print_status: PrintStatus,
    /// Print progress (0-100).
    pub percent: i64,
    /// Current layer number.
    pub layer_current: i64,
    /// Total layer count.
    pub layer_total: i64,
    /// Bed temperature (°C).
    pub bed_temp: f64,
    /// Nozzle temperature (°C).
    pub nozzle_temp: f64,
    /// Chamber temperature (°C).
    pub chamber_temp: f64,
    /// Remaining time in minutes, when the printer reports a whole number.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_minutes: Option<i64>,
    /// Current file name.
    pub file: String,
    /// Chamber light mode.
    pub light: String,
    /// WiFi signal as reported (e.g. `-42dBm`).
    pub wifi_signal: String,
    /// Last print error code.
    pub error_code: i64,
}

impl Status {
    /// Build a status view from the aggregator's current `print` section.
    pub fn from_state(state: &StateAggregator) -> Self {
        let print = state.get(&["print"]).unwrap_or(Value::Null);
        Self::from_print_section(&print)
    }

    /// Build a status view from a `print` section.
    ///
    /// Missing or malformed fields fall back to zero, empty, or
    /// `UNKNOWN`; remaining minutes is left out instead.
    pub fn from_print_section(print: &Value) -> Self {
        let field = |name: &str| value::lookup(print, &[name]);

        let gcode_state = field("gcode_state").map_or(GcodeState::Unknown, GcodeState::decode);
        let print_status = match field("stg_cur").map(PrintStatus::decode) {
            Some(Ok(status)) => status,
            Some(Err(err)) => {
                tracing::debug!(%err, "undecodable print status");
                PrintStatus::Unknown
            }
            None => PrintStatus::Unknown,
        };

        Self {
            gcode_state,
            print_status,
            percent: value::integer_or_zero(field("mc_percent")),
            layer_current: value::integer_or_zero(field("layer_num")),
            layer_total: value::integer_or_zero(field("total_layer_num")),
            bed_temp: value::float_or_zero(field("bed_temper")),
            nozzle_temp: value::float_or_zero(field("nozzle_temper")),
            chamber_temp: chamber_temperature(print),
            remaining_minutes: field("mc_remaining_time").and_then(value::strict_integer),
            file: value::text_or_empty(field("gcode_file")),
            light: light_mode(print),
            wifi_signal: value::text_or_empty(field("wifi_signal")),
            error_code: value::integer_or_zero(field("print_error")),
        }
    }
}

/// Build a status view from the aggregator.
pub fn build_status(state: &StateAggregator) -> Status {
    Status::from_state(state)
}

/// Chamber temperature, falling back to the chamber controller's reading.
fn chamber_temperature(print: &Value) -> f64 {
    value::lookup(print, &["chamber_temper"])
        .and_then(value::coerce_number)
        .or_else(|| {
            value::lookup(print, &["device", "ctc", "info", "temp"]).and_then(value::coerce_number)
        })
        .map_or(0.0, Numeric::as_f64)
}

fn light_mode(print: &Value) -> String {
    value::lookup(print, &["lights_report"])
        .and_then(Value::as_array)
        .and_then(|lights| lights.first())
        .and_then(|light| light.get("mode"))
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string()
}

/// AMS (Automatic Material System) status.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AmsStatus {
    /// Whether any AMS unit is attached.
    pub connected: bool,
    /// AMS unit statuses.
    pub units: Vec<AmsUnit>,
    /// Tray currently feeding the toolhead, if reported.
    pub active_tray: Option<String>,
}

/// Single AMS unit status.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AmsUnit {
    /// Unit ID.
    pub id: String,
    /// Humidity index as reported.
    pub humidity: String,
    /// Temperature (°C) as reported.
    pub temperature: String,
    /// Trays in this unit.
    pub trays: Vec<AmsTray>,
}

/// AMS tray status.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AmsTray {
    /// Tray ID (0-3).
    pub id: String,
    /// Filament preset name.
    pub name: String,
    /// Filament type (e.g., "PLA", "PETG").
    pub filament_type: String,
    /// Filament color (RGBA hex).
    pub color: String,
    /// Remaining filament percentage, when the spool is tracked.
    pub remaining: Option<i64>,
}

impl AmsStatus {
    /// Parse the `print.ams` section. Returns `None` if it is not a mapping.
    pub fn from_report(ams: &Value) -> Option<Self> {
        let info = ams.as_object()?;
        let text = |v: Option<&Value>| value::text_or_empty(v);

        let connected = !matches!(info.get("ams_exist_bits").and_then(Value::as_str), Some("0"));
        let units = info
            .get("ams")
            .and_then(Value::as_array)
            .map(|units| {
                units
                    .iter()
                    .filter(|unit| unit.is_object())
                    .map(|unit| AmsUnit {
                        id: text(unit.get("id")),
                        humidity: text(unit.get("humidity")),
                        temperature: text(unit.get("temp")),
                        trays: unit
                            .get("tray")
                            .and_then(Value::as_array)
                            .map(|trays| {
                                trays
                                    .iter()
                                    .filter(|tray| tray.is_object())
                                    .map(|tray| AmsTray {
                                        id: text(tray.get("id")),
                                        name: text(tray.get("tray_id_name")),
                                        filament_type: text(tray.get("tray_type")),
                                        color: text(tray.get("tray_color")),
                                        remaining: tray
                                            .get("remain")
                                            .and_then(value::strict_integer)
                                            .filter(|r| *r >= 0),
                                    })
                                    .collect()
                            })
                            .unwrap_or_default(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        let active_tray = info
            .get("tray_now")
            .map(|v| text(Some(v)))
            .filter(|t| !t.is_empty() && t != "255");

        Some(Self {
            connected,
            units,
            active_tray,
        })
    }
}
