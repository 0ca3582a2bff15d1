//! # thinkgear-rs
//!
//! Async Rust client and real-time metrics pipeline for NeuroSky headsets
//! (MindWave, MindWave Mobile) streaming through the
//! [ThinkGear Connector](https://developer.neurosky.com/) on `127.0.0.1:13854`.
//!
//! ## Pipeline
//!
//! ```text
//! ThinkGearClient ──LinkEvent──> Session ──SessionUpdate──> UI / CLI
//!   (read loop)      unbounded    (single writer       + watch snapshot
//!                     mpsc         of MetricState)     + CSV session log
//! ```
//!
//! The client task only reads and decodes; the session task owns the
//! [`metrics::MetricState`] and derives everything else:
//!
//! | Metric | Source | Rule |
//! |---|---|---|
//! | signal quality, attention, meditation, band power | cognitive packets (~1 Hz) | overwritten per packet |
//! | peak band | band power | argmax of delta/theta/alpha/beta, gamma ignored |
//! | jitter | raw samples (~512 Hz) | `|raw| / 10` |
//! | waveform | raw samples | 200-point rolling window |
//! | blink | blink packets | held for 500 ms after the latest blink |
//! | alert | attention | fires when armed and attention > threshold |
//!
//! Packets with a `poorSignalLevel` in `1..=50` are dropped while artifact
//! rejection is on.
//!
//! ## Quick start
//!
//! ```no_run
//! use thinkgear_rs::prelude::*;
//!
//! #[tokio::main]
//! async fn main() {
//!     let (link_rx, handle) = ThinkGearClient::new(ThinkGearClientConfig::default()).connect();
//!     let (session, mut out) = Session::new(SessionConfig::default());
//!
//!     let (cmd_tx, cmd_rx) = tokio::sync::mpsc::unbounded_channel();
//!     tokio::spawn(session.run(link_rx, cmd_rx));
//!
//!     while let Some(update) = out.updates.recv().await {
//!         if update.changed.contains(&Field::Attention) {
//!             println!("attention {}", update.state.attention);
//!         }
//!     }
//!     handle.disconnect().await;
//!     drop(cmd_tx);
//! }
//! ```
//!
//! ## Module overview
//!
//! | Module | Purpose |
//! |---|---|
//! | [`prelude`] | One-line glob import of the most commonly needed types |
//! | [`thinkgear_client`] | TCP connection, configuration command, read loop, [`thinkgear_client::ThinkGearHandle`] |
//! | [`parse`] | Line decoder for the JSON stream |
//! | [`metrics`] | Immutable metric snapshots and the update rules |
//! | [`session`] | Single-writer consumer loop, blink timers, logging |
//! | [`recorder`] | Session log sinks (CSV) |
//! | [`types`] | Packet, status, and event types |
//! | [`protocol`] | Endpoint, wire, and metric constants |

pub mod metrics;
pub mod parse;
pub mod protocol;
pub mod recorder;
pub mod session;
pub mod thinkgear_client;
pub mod types;

// ── Prelude ───────────────────────────────────────────────────────────────────

/// Convenience re-exports for downstream crates.
pub mod prelude {
    // ── Client ────────────────────────────────────────────────────────────────
    pub use crate::thinkgear_client::{ThinkGearClient, ThinkGearClientConfig, ThinkGearHandle};

    // ── Session ───────────────────────────────────────────────────────────────
    pub use crate::metrics::{ChangedFields, Field, MetricState, MetricUpdate};
    pub use crate::recorder::{CsvRecorder, LogRecord, SessionRecorder};
    pub use crate::session::{Session, SessionCommand, SessionConfig, SessionOutputs, SessionUpdate};

    // ── Events and data types ─────────────────────────────────────────────────
    pub use crate::parse::{decode_line, DecodeError};
    pub use crate::types::{
        BandPower, CognitiveBundle, ConnectionStatus, ContactQuality, LinkEvent, PeakBand,
        TelemetryPacket, WavePoint,
    };

    // ── Protocol constants ────────────────────────────────────────────────────
    pub use crate::protocol::{DEFAULT_HOST, DEFAULT_PORT, WAVEFORM_CAPACITY};
}
