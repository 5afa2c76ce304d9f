//! Settings surface and persistent record store.
//!
//! The `$` command family reads and writes typed configuration through a
//! closed set of two-character mnemonics (`$xsr1500` sets the X seek rate,
//! `$jm50000000` the machine jerk limit). Settings persist as a linear
//! array of fixed-size records bracketed by schema-marker records; a marker
//! mismatch at boot rewrites the whole store from compiled defaults.
//!
//! An optional INI profile can overlay the compiled defaults before the
//! record store is applied.

use std::fmt::Write as _;
use std::path::Path;

use configparser::ini::Ini;
use motion::config::AxisMode;
use motion::stepper::F_DDA;
use motion::{Config, PathControl, Plane, Status, Units, AXES, AXIS_NAMES, NON_AXIS};
use thiserror::Error;
use tracing::{info, warn};

/// Store schema version. Integer part is the schema, fraction the default
/// profile revision.
pub const SETTINGS_VERSION: f64 = 100.10;

/// Record code of the schema marker ("P_" in listings).
pub const MARKER_CODE: i8 = 0;

/// One persisted setting.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SettingsRecord {
    /// Axis index, or [`NON_AXIS`] for machine settings and markers.
    pub axis: i8,
    /// Mnemonic ordinal; [`MARKER_CODE`] for schema markers.
    pub mnemonic: i8,
    pub value: f64,
}

/// Closed mnemonic set. The discriminant order defines the record codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mnemonic {
    // Per-axis settings.
    Ma,
    Mo,
    Sa,
    Tr,
    Mi,
    Po,
    Sr,
    Fr,
    Su,
    Tm,
    Ra,
    Pw,
    Lm,
    He,
    Hr,
    Hc,
    Ho,
    Hb,
    // Machine settings.
    Jm,
    Ju,
    Jl,
    Mt,
    Mm,
    Ar,
    Ea,
    Hm,
    Rt,
    Ri,
    Gl,
    Gu,
    Gp,
    Gd,
    Gf,
    Gs,
    Gt,
}

struct MnemonicEntry {
    mnemonic: Mnemonic,
    token: &'static str,
    per_axis: bool,
    label: &'static str,
}

const MNEMONICS: &[MnemonicEntry] = &[
    MnemonicEntry { mnemonic: Mnemonic::Ma, token: "MA", per_axis: true, label: "map to axis" },
    MnemonicEntry { mnemonic: Mnemonic::Mo, token: "MO", per_axis: true, label: "axis mode" },
    MnemonicEntry { mnemonic: Mnemonic::Sa, token: "SA", per_axis: true, label: "step angle (degrees)" },
    MnemonicEntry { mnemonic: Mnemonic::Tr, token: "TR", per_axis: true, label: "travel per revolution" },
    MnemonicEntry { mnemonic: Mnemonic::Mi, token: "MI", per_axis: true, label: "microsteps" },
    MnemonicEntry { mnemonic: Mnemonic::Po, token: "PO", per_axis: true, label: "polarity" },
    MnemonicEntry { mnemonic: Mnemonic::Sr, token: "SR", per_axis: true, label: "seek rate (units/min)" },
    MnemonicEntry { mnemonic: Mnemonic::Fr, token: "FR", per_axis: true, label: "feed rate (units/min)" },
    MnemonicEntry { mnemonic: Mnemonic::Su, token: "SU", per_axis: true, label: "steps per unit (derived)" },
    MnemonicEntry { mnemonic: Mnemonic::Tm, token: "TM", per_axis: true, label: "travel maximum" },
    MnemonicEntry { mnemonic: Mnemonic::Ra, token: "RA", per_axis: true, label: "rotary radius (mm/radian)" },
    MnemonicEntry { mnemonic: Mnemonic::Pw, token: "PW", per_axis: true, label: "power down when idle" },
    MnemonicEntry { mnemonic: Mnemonic::Lm, token: "LM", per_axis: true, label: "limit switch mode" },
    MnemonicEntry { mnemonic: Mnemonic::He, token: "HE", per_axis: true, label: "homing enable" },
    MnemonicEntry { mnemonic: Mnemonic::Hr, token: "HR", per_axis: true, label: "homing seek rate" },
    MnemonicEntry { mnemonic: Mnemonic::Hc, token: "HC", per_axis: true, label: "homing close rate" },
    MnemonicEntry { mnemonic: Mnemonic::Ho, token: "HO", per_axis: true, label: "homing offset" },
    MnemonicEntry { mnemonic: Mnemonic::Hb, token: "HB", per_axis: true, label: "homing backoff" },
    MnemonicEntry { mnemonic: Mnemonic::Jm, token: "JM", per_axis: false, label: "max linear jerk" },
    MnemonicEntry { mnemonic: Mnemonic::Ju, token: "JU", per_axis: false, label: "angular jerk upper threshold" },
    MnemonicEntry { mnemonic: Mnemonic::Jl, token: "JL", per_axis: false, label: "angular jerk lower threshold" },
    MnemonicEntry { mnemonic: Mnemonic::Mt, token: "MT", per_axis: false, label: "min segment time (uSec)" },
    MnemonicEntry { mnemonic: Mnemonic::Mm, token: "MM", per_axis: false, label: "min segment length (mm)" },
    MnemonicEntry { mnemonic: Mnemonic::Ar, token: "AR", per_axis: false, label: "mm per arc segment" },
    MnemonicEntry { mnemonic: Mnemonic::Ea, token: "EA", per_axis: false, label: "enable acceleration" },
    MnemonicEntry { mnemonic: Mnemonic::Hm, token: "HM", per_axis: false, label: "homing mode (home on startup)" },
    MnemonicEntry { mnemonic: Mnemonic::Rt, token: "RT", per_axis: false, label: "reduction tolerance (mm)" },
    MnemonicEntry { mnemonic: Mnemonic::Ri, token: "RI", per_axis: false, label: "reduction max iterations" },
    MnemonicEntry { mnemonic: Mnemonic::Gl, token: "GL", per_axis: false, label: "gcode plane (17/18/19)" },
    MnemonicEntry { mnemonic: Mnemonic::Gu, token: "GU", per_axis: false, label: "gcode units (20/21)" },
    MnemonicEntry { mnemonic: Mnemonic::Gp, token: "GP", per_axis: false, label: "gcode path control (61/61.1/64)" },
    MnemonicEntry { mnemonic: Mnemonic::Gd, token: "GD", per_axis: false, label: "gcode distance mode (90/91)" },
    MnemonicEntry { mnemonic: Mnemonic::Gf, token: "GF", per_axis: false, label: "gcode default feed rate" },
    MnemonicEntry { mnemonic: Mnemonic::Gs, token: "GS", per_axis: false, label: "gcode default spindle speed" },
    MnemonicEntry { mnemonic: Mnemonic::Gt, token: "GT", per_axis: false, label: "gcode default tool" },
];

impl Mnemonic {
    pub fn code(self) -> i8 {
        MNEMONICS
            .iter()
            .position(|e| e.mnemonic == self)
            .map(|i| i as i8 + 1)
            .unwrap_or(MARKER_CODE)
    }

    pub fn from_code(code: i8) -> Option<Mnemonic> {
        if code <= 0 {
            return None;
        }
        MNEMONICS.get(code as usize - 1).map(|e| e.mnemonic)
    }

    pub fn from_token(token: &str) -> Option<Mnemonic> {
        let token = token.to_ascii_uppercase();
        MNEMONICS.iter().find(|e| e.token == token).map(|e| e.mnemonic)
    }

    fn entry(self) -> &'static MnemonicEntry {
        &MNEMONICS[self.code() as usize - 1]
    }

    pub fn per_axis(self) -> bool {
        self.entry().per_axis
    }
}

// --- Apply / read one setting ---

fn axis_mode_from_value(value: f64) -> Option<AxisMode> {
    AxisMode::from_ordinal(value as u8)
}

/// Apply one setting to the configuration, recomputing derived values.
pub fn apply_setting(cfg: &mut Config, axis: Option<usize>, mnemonic: Mnemonic, value: f64) -> Status {
    if mnemonic.per_axis() != axis.is_some() {
        return Status::ParameterNotFound;
    }
    if let Some(axis) = axis {
        let a = &mut cfg.a[axis];
        match mnemonic {
            Mnemonic::Ma => {
                if !(0.0..AXES as f64).contains(&value) {
                    return Status::ParameterOverRange;
                }
                a.map_axis = value as usize;
            }
            Mnemonic::Mo => match axis_mode_from_value(value) {
                Some(mode) => a.axis_mode = mode,
                None => return Status::ParameterOverRange,
            },
            Mnemonic::Sa => {
                if value <= 0.0 || value > 90.0 {
                    return Status::ParameterOverRange;
                }
                a.step_angle = value;
            }
            Mnemonic::Tr => {
                if value <= 0.0 {
                    return Status::ParameterUnderRange;
                }
                a.travel_per_rev = value;
            }
            Mnemonic::Mi => {
                if ![1.0, 2.0, 4.0, 8.0].contains(&value) {
                    return Status::ParameterOverRange;
                }
                a.microsteps = value as u8;
            }
            Mnemonic::Po => {
                if value != 0.0 && value != 1.0 {
                    return Status::ParameterOverRange;
                }
                a.polarity = value as u8;
            }
            Mnemonic::Sr => {
                if value <= 0.0 {
                    return Status::ParameterUnderRange;
                }
                a.max_seek_rate = value;
            }
            Mnemonic::Fr => {
                if value <= 0.0 {
                    return Status::ParameterUnderRange;
                }
                a.max_feed_rate = value;
            }
            // Derived, read-only.
            Mnemonic::Su => return Status::UnsupportedStatement,
            Mnemonic::Tm => a.travel_max = value.abs(),
            Mnemonic::Ra => {
                if value <= 0.0 {
                    return Status::ParameterUnderRange;
                }
                a.radius = value;
            }
            Mnemonic::Pw => a.power_mode_idle = value != 0.0,
            Mnemonic::Lm => a.limit_mode = value != 0.0,
            Mnemonic::He => a.homing_enable = value != 0.0,
            Mnemonic::Hr => a.homing_rate = value.abs(),
            Mnemonic::Hc => a.homing_close_rate = value.abs(),
            Mnemonic::Ho => a.homing_offset = value,
            Mnemonic::Hb => a.homing_backoff = value.abs(),
            _ => return Status::ParameterNotFound,
        }
        a.recompute();
        // The DDA can emit at most one pulse per tick per motor.
        if a.max_seek_rate * a.steps_per_unit / 60.0 > F_DDA {
            a.max_seek_rate = F_DDA * 60.0 / a.steps_per_unit;
            a.recompute();
            return Status::MaxSeekRateExceeded;
        }
        if a.max_feed_rate * a.steps_per_unit / 60.0 > F_DDA {
            a.max_feed_rate = F_DDA * 60.0 / a.steps_per_unit;
            a.recompute();
            return Status::MaxFeedRateExceeded;
        }
        return Status::Ok;
    }

    let m = &mut cfg.m;
    match mnemonic {
        Mnemonic::Jm => {
            if value <= 0.0 {
                return Status::ParameterUnderRange;
            }
            m.max_linear_jerk = value;
        }
        Mnemonic::Ju => m.angular_jerk_upper = value.clamp(0.0, 1.0),
        Mnemonic::Jl => m.angular_jerk_lower = value.clamp(0.0, 1.0),
        Mnemonic::Mt => {
            if value <= 0.0 {
                return Status::ParameterUnderRange;
            }
            m.min_segment_time_us = value;
        }
        Mnemonic::Mm => m.min_segment_len = value.abs(),
        Mnemonic::Ar => {
            if value <= 0.0 {
                return Status::ParameterUnderRange;
            }
            m.mm_per_arc_segment = value;
        }
        Mnemonic::Ea => m.accel_enabled = value != 0.0,
        Mnemonic::Hm => m.homing_on_startup = value != 0.0,
        Mnemonic::Rt => {
            if value <= 0.0 {
                return Status::ParameterUnderRange;
            }
            m.reduction_tolerance = value;
        }
        Mnemonic::Ri => {
            if value < 1.0 {
                return Status::ParameterUnderRange;
            }
            m.reduction_max_iterations = value as u32;
        }
        Mnemonic::Gl => {
            m.gcode_plane = match value as i32 {
                17 => Plane::Xy,
                18 => Plane::Xz,
                19 => Plane::Yz,
                _ => return Status::ParameterOverRange,
            }
        }
        Mnemonic::Gu => {
            m.gcode_units = match value as i32 {
                20 => Units::Inches,
                21 => Units::Mm,
                _ => return Status::ParameterOverRange,
            }
        }
        Mnemonic::Gp => {
            m.gcode_path_control = match (value * 10.0).round() as i32 {
                610 => PathControl::ExactStop,
                611 => PathControl::ExactPath,
                640 => PathControl::Continuous,
                _ => return Status::ParameterOverRange,
            }
        }
        Mnemonic::Gd => {
            m.gcode_distance_absolute = match value as i32 {
                90 => true,
                91 => false,
                _ => return Status::ParameterOverRange,
            }
        }
        Mnemonic::Gf => {
            if value <= 0.0 {
                return Status::ParameterUnderRange;
            }
            m.gcode_feed_rate = value;
        }
        Mnemonic::Gs => m.gcode_spindle_speed = value.abs(),
        Mnemonic::Gt => m.gcode_tool = value as u8,
        _ => return Status::ParameterNotFound,
    }
    Status::Ok
}

/// Read one setting back out of the configuration.
pub fn read_setting(cfg: &Config, axis: Option<usize>, mnemonic: Mnemonic) -> f64 {
    if let Some(axis) = axis {
        let a = &cfg.a[axis];
        return match mnemonic {
            Mnemonic::Ma => a.map_axis as f64,
            Mnemonic::Mo => a.axis_mode.ordinal() as f64,
            Mnemonic::Sa => a.step_angle,
            Mnemonic::Tr => a.travel_per_rev,
            Mnemonic::Mi => a.microsteps as f64,
            Mnemonic::Po => a.polarity as f64,
            Mnemonic::Sr => a.max_seek_rate,
            Mnemonic::Fr => a.max_feed_rate,
            Mnemonic::Su => a.steps_per_unit,
            Mnemonic::Tm => a.travel_max,
            Mnemonic::Ra => a.radius,
            Mnemonic::Pw => a.power_mode_idle as u8 as f64,
            Mnemonic::Lm => a.limit_mode as u8 as f64,
            Mnemonic::He => a.homing_enable as u8 as f64,
            Mnemonic::Hr => a.homing_rate,
            Mnemonic::Hc => a.homing_close_rate,
            Mnemonic::Ho => a.homing_offset,
            Mnemonic::Hb => a.homing_backoff,
            _ => 0.0,
        };
    }
    let m = &cfg.m;
    match mnemonic {
        Mnemonic::Jm => m.max_linear_jerk,
        Mnemonic::Ju => m.angular_jerk_upper,
        Mnemonic::Jl => m.angular_jerk_lower,
        Mnemonic::Mt => m.min_segment_time_us,
        Mnemonic::Mm => m.min_segment_len,
        Mnemonic::Ar => m.mm_per_arc_segment,
        Mnemonic::Ea => m.accel_enabled as u8 as f64,
        Mnemonic::Hm => m.homing_on_startup as u8 as f64,
        Mnemonic::Rt => m.reduction_tolerance,
        Mnemonic::Ri => m.reduction_max_iterations as f64,
        Mnemonic::Gl => match m.gcode_plane {
            Plane::Xy => 17.0,
            Plane::Xz => 18.0,
            Plane::Yz => 19.0,
        },
        Mnemonic::Gu => match m.gcode_units {
            Units::Inches => 20.0,
            Units::Mm => 21.0,
        },
        Mnemonic::Gp => match m.gcode_path_control {
            PathControl::ExactStop => 61.0,
            PathControl::ExactPath => 61.1,
            PathControl::Continuous => 64.0,
        },
        Mnemonic::Gd => {
            if m.gcode_distance_absolute {
                90.0
            } else {
                91.0
            }
        }
        Mnemonic::Gf => m.gcode_feed_rate,
        Mnemonic::Gs => m.gcode_spindle_speed,
        Mnemonic::Gt => m.gcode_tool as f64,
        _ => 0.0,
    }
}

// --- Persistent record store ---

/// Contract for the persistent medium. The medium itself (flash, file,
/// whatever) is external; records are fixed-size and addressed linearly.
pub trait SettingsStore {
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    fn read(&self, index: usize) -> Option<SettingsRecord>;
    fn write(&mut self, index: usize, record: SettingsRecord);
    fn truncate(&mut self, len: usize);
}

/// Volatile in-memory store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Vec<SettingsRecord>,
}

impl SettingsStore for MemoryStore {
    fn len(&self) -> usize {
        self.records.len()
    }

    fn read(&self, index: usize) -> Option<SettingsRecord> {
        self.records.get(index).copied()
    }

    fn write(&mut self, index: usize, record: SettingsRecord) {
        if index >= self.records.len() {
            self.records.resize(
                index + 1,
                SettingsRecord { axis: NON_AXIS, mnemonic: MARKER_CODE, value: 0.0 },
            );
        }
        self.records[index] = record;
    }

    fn truncate(&mut self, len: usize) {
        self.records.truncate(len);
    }
}

fn marker() -> SettingsRecord {
    SettingsRecord { axis: NON_AXIS, mnemonic: MARKER_CODE, value: SETTINGS_VERSION }
}

/// Write the whole configuration to the store, bracketed by markers.
pub fn persist(cfg: &Config, store: &mut dyn SettingsStore) {
    let mut i = 0;
    store.write(i, marker());
    i += 1;
    for entry in MNEMONICS {
        if entry.per_axis {
            continue;
        }
        store.write(
            i,
            SettingsRecord {
                axis: NON_AXIS,
                mnemonic: entry.mnemonic.code(),
                value: read_setting(cfg, None, entry.mnemonic),
            },
        );
        i += 1;
    }
    for axis in 0..AXES {
        for entry in MNEMONICS {
            // Derived values are recomputed, not stored.
            if !entry.per_axis || entry.mnemonic == Mnemonic::Su {
                continue;
            }
            store.write(
                i,
                SettingsRecord {
                    axis: axis as i8,
                    mnemonic: entry.mnemonic.code(),
                    value: read_setting(cfg, Some(axis), entry.mnemonic),
                },
            );
            i += 1;
        }
    }
    store.write(i, marker());
    store.truncate(i + 1);
}

/// Boot-time load: a bad or missing leading marker rewrites the store from
/// the compiled defaults in `cfg`; otherwise every record is applied in
/// order.
pub fn load_or_init(cfg: &mut Config, store: &mut dyn SettingsStore) -> Status {
    let valid = store.read(0).is_some_and(|r| {
        r.axis == NON_AXIS && r.mnemonic == MARKER_CODE && (r.value - SETTINGS_VERSION).abs() < 1e-9
    });
    if !valid {
        info!("settings store invalid or outdated; rewriting from defaults");
        persist(cfg, store);
        return Status::Ok;
    }
    for i in 0..store.len() {
        let Some(record) = store.read(i) else { continue };
        if record.mnemonic == MARKER_CODE {
            continue;
        }
        let Some(mnemonic) = Mnemonic::from_code(record.mnemonic) else {
            warn!(code = record.mnemonic, "unknown settings record skipped");
            continue;
        };
        let axis = (record.axis >= 0).then_some(record.axis as usize);
        let st = apply_setting(cfg, axis, mnemonic, record.value);
        if st.is_error() {
            warn!(?mnemonic, value = record.value, "settings record rejected: {}", st.message());
        }
    }
    Status::Ok
}

// --- $ command surface ---

fn axis_index(letter: char) -> Option<usize> {
    AXIS_NAMES.iter().position(|&c| c == letter.to_ascii_uppercase())
}

/// Render the machine settings listing.
pub fn render_machine(cfg: &Config) -> String {
    let mut out = String::new();
    for entry in MNEMONICS {
        if entry.per_axis {
            continue;
        }
        let value = read_setting(cfg, None, entry.mnemonic);
        let _ = writeln!(out, "${}  {:<32} {}", entry.token.to_lowercase(), entry.label, value);
    }
    out
}

/// Render one axis listing.
pub fn render_axis(cfg: &Config, axis: usize) -> String {
    let name = AXIS_NAMES[axis].to_ascii_lowercase();
    let mut out = String::new();
    for entry in MNEMONICS {
        if !entry.per_axis {
            continue;
        }
        let value = read_setting(cfg, Some(axis), entry.mnemonic);
        let _ = writeln!(out, "${}{}  {:<32} {}", name, entry.token.to_lowercase(), entry.label, value);
    }
    out
}

pub fn render_help() -> String {
    let mut out = String::from(
        "Settings: $ machine, $$ all, $<axis> one axis, $e store dump\n\
         Set with $<axis><mnemonic><value> or $<mnemonic><value>\n",
    );
    for entry in MNEMONICS {
        let scope = if entry.per_axis { "axis" } else { "machine" };
        let _ = writeln!(out, "  {:<2} [{:<7}] {}", entry.token, scope, entry.label);
    }
    out
}

pub fn render_store(store: &dyn SettingsStore) -> String {
    let mut out = String::new();
    for i in 0..store.len() {
        if let Some(r) = store.read(i) {
            let axis = if r.axis == NON_AXIS {
                '-'
            } else {
                AXIS_NAMES[r.axis as usize]
            };
            let token = Mnemonic::from_code(r.mnemonic)
                .map(|m| m.entry().token)
                .unwrap_or("P_");
            let _ = writeln!(out, "[{i:3}] {axis} {token} {}", r.value);
        }
    }
    out
}

/// Handle one `$` line. Returns the text to print and a status.
pub fn dispatch(line: &str, cfg: &mut Config, store: &mut dyn SettingsStore) -> (String, Status) {
    let rest = line[1..].trim();
    if rest.is_empty() {
        return (render_machine(cfg), Status::Ok);
    }
    if rest == "$" {
        let mut out = render_machine(cfg);
        for axis in 0..AXES {
            out.push_str(&render_axis(cfg, axis));
        }
        return (out, Status::Ok);
    }
    if rest.eq_ignore_ascii_case("h") {
        return (render_help(), Status::Ok);
    }
    if rest.eq_ignore_ascii_case("e") {
        return (render_store(store), Status::Ok);
    }
    if rest.len() == 1 {
        if let Some(axis) = axis_index(rest.chars().next().unwrap()) {
            return (render_axis(cfg, axis), Status::Ok);
        }
        return (String::new(), Status::UnrecognizedCommand);
    }

    // $<axis><mnemonic>[value] or $<mnemonic>[value]
    let chars: Vec<char> = rest.chars().collect();
    let (axis, token_start) = match axis_index(chars[0]) {
        Some(axis) if chars.len() >= 3 && chars[1].is_ascii_alphabetic() && chars[2].is_ascii_alphabetic() => {
            (Some(axis), 1)
        }
        _ => (None, 0),
    };
    if chars.len() < token_start + 2 {
        return (String::new(), Status::UnrecognizedCommand);
    }
    let token: String = chars[token_start..token_start + 2].iter().collect();
    let Some(mnemonic) = Mnemonic::from_token(&token) else {
        return (String::new(), Status::ParameterNotFound);
    };
    if mnemonic.per_axis() != axis.is_some() {
        return (String::new(), Status::ParameterNotFound);
    }

    let value_str: String = chars[token_start + 2..].iter().collect();
    if value_str.trim().is_empty() {
        // Read-back form.
        let value = read_setting(cfg, axis, mnemonic);
        return (format!("{} {}", mnemonic.entry().label, value), Status::Ok);
    }
    let value: f64 = match value_str.trim().parse() {
        Ok(v) => v,
        Err(_) => return (String::new(), Status::BadNumberFormat),
    };
    let status = apply_setting(cfg, axis, mnemonic, value);
    if !status.is_error() {
        persist(cfg, store);
    }
    (String::new(), status)
}

// --- INI bootstrap profile ---

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("cannot read profile: {0}")]
    Load(String),
    #[error("profile value {section}.{key} is invalid")]
    BadValue { section: String, key: String },
}

const MACHINE_KEYS: &[(&str, Mnemonic)] = &[
    ("max_linear_jerk", Mnemonic::Jm),
    ("angular_jerk_upper", Mnemonic::Ju),
    ("angular_jerk_lower", Mnemonic::Jl),
    ("min_segment_time_us", Mnemonic::Mt),
    ("min_segment_len", Mnemonic::Mm),
    ("mm_per_arc_segment", Mnemonic::Ar),
    ("accel_enabled", Mnemonic::Ea),
    ("homing_on_startup", Mnemonic::Hm),
    ("reduction_tolerance", Mnemonic::Rt),
    ("reduction_max_iterations", Mnemonic::Ri),
    ("gcode_feed_rate", Mnemonic::Gf),
];

const AXIS_KEYS: &[(&str, Mnemonic)] = &[
    ("step_angle", Mnemonic::Sa),
    ("travel_per_rev", Mnemonic::Tr),
    ("microsteps", Mnemonic::Mi),
    ("polarity", Mnemonic::Po),
    ("seek_rate", Mnemonic::Sr),
    ("feed_rate", Mnemonic::Fr),
    ("travel_max", Mnemonic::Tm),
    ("homing_enable", Mnemonic::He),
    ("homing_rate", Mnemonic::Hr),
    ("homing_close_rate", Mnemonic::Hc),
    ("homing_offset", Mnemonic::Ho),
    ("homing_backoff", Mnemonic::Hb),
];

/// Overlay an INI profile onto the configuration. Sections: `[machine]` and
/// one `[axis_<letter>]` per axis.
pub fn load_profile(path: &Path, cfg: &mut Config) -> Result<(), ProfileError> {
    let mut ini = Ini::new();
    ini.load(path).map_err(ProfileError::Load)?;

    for (key, mnemonic) in MACHINE_KEYS {
        if let Ok(Some(value)) = ini.getfloat("machine", key) {
            let st = apply_setting(cfg, None, *mnemonic, value);
            if st.is_error() {
                return Err(ProfileError::BadValue { section: "machine".into(), key: (*key).into() });
            }
        }
    }
    for axis in 0..AXES {
        let section = format!("axis_{}", AXIS_NAMES[axis].to_ascii_lowercase());
        for (key, mnemonic) in AXIS_KEYS {
            if let Ok(Some(value)) = ini.getfloat(&section, key) {
                let st = apply_setting(cfg, Some(axis), *mnemonic, value);
                if st.is_error() {
                    return Err(ProfileError::BadValue { section: section.clone(), key: (*key).into() });
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use motion::X;

    #[test]
    fn mnemonic_codes_round_trip() {
        for entry in MNEMONICS {
            let code = entry.mnemonic.code();
            assert!(code > 0);
            assert_eq!(Mnemonic::from_code(code), Some(entry.mnemonic));
            assert_eq!(Mnemonic::from_token(entry.token), Some(entry.mnemonic));
        }
        assert_eq!(Mnemonic::from_code(MARKER_CODE), None);
    }

    #[test]
    fn set_and_read_back_recomputes_derived() {
        let mut cfg = Config::default();
        let mut store = MemoryStore::default();
        let (_, st) = dispatch("$xsr750", &mut cfg, &mut store);
        assert_eq!(st, Status::Ok);
        assert_eq!(read_setting(&cfg, Some(X), Mnemonic::Sr), 750.0);
        // Derived whole-step rate follows: 750 mm/min * 160 steps/mm / 60.
        assert!((cfg.a[X].seek_steps_sec - 2000.0).abs() < 1e-9);
    }

    #[test]
    fn microsteps_validated() {
        let mut cfg = Config::default();
        assert_eq!(apply_setting(&mut cfg, Some(X), Mnemonic::Mi, 3.0), Status::ParameterOverRange);
        assert_eq!(apply_setting(&mut cfg, Some(X), Mnemonic::Mi, 4.0), Status::Ok);
        assert!((cfg.a[X].steps_per_unit - 640.0).abs() < 1e-9);
    }

    #[test]
    fn seek_rate_clamped_to_dda_capacity() {
        let mut cfg = Config::default();
        // 1280 steps/mm at 50 kHz caps out at 2343.75 mm/min.
        let st = apply_setting(&mut cfg, Some(X), Mnemonic::Sr, 5000.0);
        assert_eq!(st, Status::MaxSeekRateExceeded);
        assert!(cfg.a[X].max_seek_rate * cfg.a[X].steps_per_unit / 60.0 <= F_DDA + 1e-6);
    }

    #[test]
    fn store_round_trips_configuration() {
        let mut cfg = Config::default();
        cfg.m.max_linear_jerk = 42_000_000.0;
        cfg.a[X].max_feed_rate = 999.0;
        cfg.recompute();
        let mut store = MemoryStore::default();
        persist(&cfg, &mut store);

        // Markers bracket the record array.
        let first = store.read(0).unwrap();
        let last = store.read(store.len() - 1).unwrap();
        for r in [first, last] {
            assert_eq!(r.axis, NON_AXIS);
            assert_eq!(r.mnemonic, MARKER_CODE);
            assert_eq!(r.value, SETTINGS_VERSION);
        }

        let mut fresh = Config::default();
        assert_eq!(load_or_init(&mut fresh, &mut store), Status::Ok);
        assert_eq!(fresh.m.max_linear_jerk, 42_000_000.0);
        assert_eq!(fresh.a[X].max_feed_rate, 999.0);
    }

    #[test]
    fn version_mismatch_rewrites_from_defaults() {
        let mut store = MemoryStore::default();
        store.write(0, SettingsRecord { axis: NON_AXIS, mnemonic: MARKER_CODE, value: 1.0 });
        store.write(
            1,
            SettingsRecord { axis: 0, mnemonic: Mnemonic::Sr.code(), value: 123.0 },
        );
        let mut cfg = Config::default();
        load_or_init(&mut cfg, &mut store);
        // The stale record did not survive the rewrite.
        assert_eq!(cfg.a[X].max_seek_rate, Config::default().a[X].max_seek_rate);
        assert_eq!(store.read(0).unwrap().value, SETTINGS_VERSION);
    }

    #[test]
    fn listing_and_unknown_mnemonics() {
        let mut cfg = Config::default();
        let mut store = MemoryStore::default();
        let (out, st) = dispatch("$x", &mut cfg, &mut store);
        assert_eq!(st, Status::Ok);
        assert!(out.contains("seek rate"));
        let (_, st) = dispatch("$zz1", &mut cfg, &mut store);
        assert_eq!(st, Status::ParameterNotFound);
        let (_, st) = dispatch("$xsrabc", &mut cfg, &mut store);
        assert_eq!(st, Status::BadNumberFormat);
    }
}
