use std::fmt;

use serde::Deserialize;

use crate::protocol::{FAIR_CONTACT_LIMIT, NO_CONTACT};

/// The eight `eegPower` sub-bands reported once per second by TGC.
///
/// Values are unitless relative powers computed by the headset ASIC; they are
/// only meaningful relative to each other and across time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BandPower {
    pub delta: u32,
    pub theta: u32,
    pub low_alpha: u32,
    pub high_alpha: u32,
    pub low_beta: u32,
    pub high_beta: u32,
    pub low_gamma: u32,
    pub high_gamma: u32,
}

/// The once-per-second "cognitive" fields.
///
/// TGC always sends `eSense` and `eegPower` together on the same line; the
/// decoder rejects lines carrying only one of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CognitiveBundle {
    /// eSense attention, 0–100.
    pub attention: u8,
    /// eSense meditation, 0–100.
    pub meditation: u8,
    pub band_power: BandPower,
}

/// One decoded line of the ThinkGear JSON stream.
///
/// A packet carries any nonempty subset of a raw sample, a blink event, and a
/// cognitive bundle.  Absent fields take their defaults rather than `None`
/// so nothing downstream has to special-case a missing sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TelemetryPacket {
    /// `poorSignalLevel`: 0 = good contact, 200 = no contact.
    /// Defaults to [`NO_CONTACT`] when the line does not carry it.
    pub signal_quality: u8,
    pub cognitive: Option<CognitiveBundle>,
    /// `blinkStrength`; nonzero only on the line reporting the blink.
    pub blink_strength: u8,
    /// `rawEeg`; zero when the line carries no raw sample.
    pub raw_sample: i32,
}

impl Default for TelemetryPacket {
    fn default() -> Self {
        Self {
            signal_quality: NO_CONTACT,
            cognitive: None,
            blink_strength: 0,
            raw_sample: 0,
        }
    }
}

/// Lifecycle of the TGC connection as seen by the consumer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    #[default]
    Idle,
    /// Carries the `host:port` being dialled.
    Connecting(String),
    Connected,
    Error(String),
    Disconnected,
}

impl ConnectionStatus {
    /// `true` for the two states the link never leaves on its own.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Error(_) | Self::Disconnected)
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Ready"),
            Self::Connecting(addr) => write!(f, "Connecting to {addr}"),
            Self::Connected => write!(f, "Connected to ThinkGear Connector"),
            Self::Error(msg) => write!(f, "Error: {msg}"),
            Self::Disconnected => write!(f, "Disconnected"),
        }
    }
}

/// Dominant band among delta, theta, alpha and beta (gamma is never considered).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PeakBand {
    /// No cognitive bundle has been received yet.
    #[default]
    None,
    Delta,
    Theta,
    Alpha,
    Beta,
}

impl PeakBand {
    /// Label with the conventional mental-state hint.
    pub fn label(&self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Delta => "Delta (Sleep)",
            Self::Theta => "Theta (Dream)",
            Self::Alpha => "Alpha (Relax)",
            Self::Beta => "Beta (Active)",
        }
    }
}

impl fmt::Display for PeakBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Electrode contact bucket derived from `poorSignalLevel`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContactQuality {
    /// Level 0.
    Good,
    /// Level 1–49.
    Fair,
    /// Level 50 and above, including the 200 "no contact" sentinel.
    Poor,
}

impl ContactQuality {
    pub fn from_signal_level(level: u8) -> Self {
        match level {
            0 => Self::Good,
            l if l < FAIR_CONTACT_LIMIT => Self::Fair,
            _ => Self::Poor,
        }
    }
}

/// One point of the rolling waveform: x position and display amplitude (0–100).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WavePoint {
    pub index: usize,
    pub amplitude: f64,
}

/// Events emitted by [`crate::thinkgear_client::ThinkGearClient`].
///
/// Packets arrive in wire order.  Status events mark every lifecycle
/// transition; after `Status(Disconnected)` or `Status(Error(_))` the link
/// sends nothing further.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    Status(ConnectionStatus),
    Packet(TelemetryPacket),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contact_buckets() {
        assert_eq!(ContactQuality::from_signal_level(0), ContactQuality::Good);
        assert_eq!(ContactQuality::from_signal_level(1), ContactQuality::Fair);
        assert_eq!(ContactQuality::from_signal_level(49), ContactQuality::Fair);
        assert_eq!(ContactQuality::from_signal_level(50), ContactQuality::Poor);
        assert_eq!(ContactQuality::from_signal_level(NO_CONTACT), ContactQuality::Poor);
    }

    #[test]
    fn status_text() {
        assert_eq!(ConnectionStatus::Idle.to_string(), "Ready");
        assert_eq!(
            ConnectionStatus::Connecting("127.0.0.1:13854".into()).to_string(),
            "Connecting to 127.0.0.1:13854"
        );
        assert!(ConnectionStatus::Error("refused".into()).is_terminal());
        assert!(!ConnectionStatus::Connected.is_terminal());
    }
}
