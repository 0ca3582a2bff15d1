//! Line decoder for the ThinkGear JSON stream.
//!
//! [`decode_line`] is pure and never panics: anything that is not a usable
//! packet comes back as a [`DecodeError`] so the read loop can log it and
//! keep going.  TGC regularly emits partial lines right after connecting and
//! status-only lines (`{"poorSignalLevel":200,"status":"scanning"}`) while
//! the headset is searching, so failures here are routine.
//!
//! | Line shape | Result |
//! |---|---|
//! | `{"rawEeg":-41}` | raw-only packet, quality defaults to 200 |
//! | `{"blinkStrength":57}` | blink-only packet |
//! | `{"eSense":{..},"eegPower":{..},"poorSignalLevel":0}` | cognitive packet |
//! | `{"eSense":{..}}` without `eegPower` | [`DecodeError::PartialBundle`] |
//! | `{"poorSignalLevel":200,"status":"scanning"}` | [`DecodeError::NoPayload`] |
//! | empty / whitespace | [`DecodeError::Empty`] |
//! | truncated JSON | [`DecodeError::Json`] |

use serde::Deserialize;
use thiserror::Error;

use crate::protocol::NO_CONTACT;
use crate::types::{BandPower, CognitiveBundle, TelemetryPacket};

/// Why a line did not produce a [`TelemetryPacket`].
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("empty line")]
    Empty,
    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("line carries no raw sample, blink, or cognitive bundle")]
    NoPayload,
    #[error("eSense and eegPower must arrive together")]
    PartialBundle,
}

// Wire shape.  Unknown keys (`status`, `mental effort`, …) are ignored.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePacket {
    #[serde(default = "no_contact")]
    poor_signal_level: u8,
    #[serde(rename = "eSense")]
    e_sense: Option<WireESense>,
    eeg_power: Option<BandPower>,
    #[serde(default)]
    blink_strength: u8,
    #[serde(default)]
    raw_eeg: i32,
}

#[derive(Debug, Deserialize)]
struct WireESense {
    #[serde(default)]
    attention: u8,
    #[serde(default)]
    meditation: u8,
}

fn no_contact() -> u8 {
    NO_CONTACT
}

/// Decode one line (with or without its trailing `\r\n`) into a packet.
///
/// ```
/// # use thinkgear_rs::parse::decode_line;
/// let p = decode_line(r#"{"rawEeg":40}"#).unwrap();
/// assert_eq!(p.raw_sample, 40);
/// assert_eq!(p.signal_quality, 200);
/// assert!(decode_line(r#"{"rawEeg":4"#).is_err());
/// ```
pub fn decode_line(line: &str) -> Result<TelemetryPacket, DecodeError> {
    let line = line.trim();
    if line.is_empty() {
        return Err(DecodeError::Empty);
    }

    let wire: WirePacket = serde_json::from_str(line)?;

    let cognitive = match (wire.e_sense, wire.eeg_power) {
        (Some(e), Some(band_power)) => Some(CognitiveBundle {
            attention: e.attention,
            meditation: e.meditation,
            band_power,
        }),
        (None, None) => None,
        _ => return Err(DecodeError::PartialBundle),
    };

    if cognitive.is_none() && wire.blink_strength == 0 && wire.raw_eeg == 0 {
        return Err(DecodeError::NoPayload);
    }

    Ok(TelemetryPacket {
        signal_quality: wire.poor_signal_level,
        cognitive,
        blink_strength: wire.blink_strength,
        raw_sample: wire.raw_eeg,
    })
}
