//! Endpoint, wire-format, and metric constants for the ThinkGear Connector.
//!
//! The ThinkGear Connector (TGC) is a small local daemon that bridges a
//! NeuroSky headset to applications over a plain TCP socket on loopback.
//! After the client writes one JSON configuration object, TGC streams
//! newline-delimited JSON objects, one packet per line.

use serde::Serialize;

// ── Endpoint ─────────────────────────────────────────────────────────────────

/// Loopback address the ThinkGear Connector listens on.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// TCP port the ThinkGear Connector listens on.
pub const DEFAULT_PORT: u16 = 13854;

// ── Configuration command ────────────────────────────────────────────────────

/// The single configuration object written to TGC right after connecting.
///
/// Serialises to `{"enableRawOutput":true,"format":"Json"}`.  TGC sends no
/// reply; it simply switches the stream into line-delimited JSON mode.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigCommand {
    /// Include the ~512 Hz `rawEeg` samples in the stream.
    pub enable_raw_output: bool,
    /// Output format; TGC only understands `"Json"` and `"BinaryPacket"`.
    pub format: &'static str,
}

impl ConfigCommand {
    /// Request line-delimited JSON, with or without raw samples.
    pub fn json(enable_raw_output: bool) -> Self {
        Self {
            enable_raw_output,
            format: "Json",
        }
    }
}

/// Encode the configuration command as the exact bytes written to the socket.
///
/// ```
/// # use thinkgear_rs::protocol::encode_config_command;
/// assert_eq!(
///     encode_config_command(true),
///     br#"{"enableRawOutput":true,"format":"Json"}"#.to_vec()
/// );
/// ```
pub fn encode_config_command(enable_raw_output: bool) -> Vec<u8> {
    // Serialising a struct of a bool and a static str cannot fail.
    serde_json::to_vec(&ConfigCommand::json(enable_raw_output)).unwrap_or_default()
}

// ── Signal quality ───────────────────────────────────────────────────────────

/// `poorSignalLevel` value meaning "no contact / no data yet".
///
/// TGC also reports this sentinel on packets that do not carry the field at
/// all, so it is the decoder default.
pub const NO_CONTACT: u8 = 200;

/// Upper bound (inclusive) of the noisy-contact band dropped by artifact
/// rejection.  The band is `1..=ARTIFACT_MAX_SIGNAL_LEVEL`.
pub const ARTIFACT_MAX_SIGNAL_LEVEL: u8 = 50;

/// Signal quality below which contact is classed as "fair" rather than poor.
pub const FAIR_CONTACT_LIMIT: u8 = 50;

// ── Waveform window ──────────────────────────────────────────────────────────

/// Number of points retained in the rolling raw waveform.
pub const WAVEFORM_CAPACITY: usize = 200;

/// Display amplitude of an empty waveform slot (vertical centre of `0..=100`).
pub const WAVEFORM_BASELINE: f64 = 50.0;

/// Raw units per display unit when mapping `rawEeg` onto `0..=100`.
///
/// Raw samples span roughly ±2048 in practice (±32768 in theory), so the
/// display clamps at the edges for large excursions.
pub const WAVEFORM_RAW_DIVISOR: f64 = 20.0;

/// Raw units per jitter unit: `jitter = |raw| / JITTER_DIVISOR`.
pub const JITTER_DIVISOR: f64 = 10.0;

// ── Blink / alert ────────────────────────────────────────────────────────────

/// How long `blink_active` stays set after the most recent blink.
pub const BLINK_HOLD_MS: i64 = 500;

/// Attention level above which an armed alert fires, unless configured.
pub const DEFAULT_ALERT_THRESHOLD: u8 = 80;

// ── Session log ──────────────────────────────────────────────────────────────

/// Header row written as the first line of every session log.
pub const LOG_HEADER: [&str; 4] = ["Time", "Attention", "Meditation", "Raw"];

/// File-name prefix for session logs (`BrainSession_<millis>.csv`).
pub const LOG_FILE_PREFIX: &str = "BrainSession_";
