//! The derived-metrics view of a session.
//!
//! [`MetricState`] is an immutable snapshot: every operation takes `&self`
//! and returns a [`MetricUpdate`] carrying the *next* snapshot together with
//! the set of [`Field`]s that differ from the current one.  Only the session
//! loop ([`crate::session`]) calls these, so there is exactly one writer, and
//! readers holding an older `Arc<MetricState>` never see a half-applied packet.

use std::collections::{BTreeSet, VecDeque};

use chrono::{DateTime, Duration, Utc};

use crate::protocol::{
    ARTIFACT_MAX_SIGNAL_LEVEL, BLINK_HOLD_MS, DEFAULT_ALERT_THRESHOLD, JITTER_DIVISOR, NO_CONTACT,
    WAVEFORM_BASELINE, WAVEFORM_CAPACITY, WAVEFORM_RAW_DIVISOR,
};
use crate::recorder::LogRecord;
use crate::types::{
    BandPower, CognitiveBundle, ConnectionStatus, ContactQuality, PeakBand, TelemetryPacket,
    WavePoint,
};

/// Snapshot fields a presentation layer can watch individually.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Field {
    ConnectionStatus,
    SignalQuality,
    Attention,
    Meditation,
    BandPower,
    PeakBand,
    JitterMetric,
    Waveform,
    BlinkActive,
    BlinkStrength,
    AlertArmed,
    AlertThreshold,
    ArtifactRejection,
    Logging,
}

/// Fields that changed in one update, in declaration order.
pub type ChangedFields = BTreeSet<Field>;

/// Result of applying one input to a [`MetricState`].
#[derive(Debug, Clone)]
pub struct MetricUpdate {
    pub state: MetricState,
    pub changed: ChangedFields,
    /// The packet carried attention above the threshold while the alert was
    /// armed.  Derived per update; never carried into the next one.
    pub alert_fired: bool,
    /// Row to hand to the session recorder, present only for cognitive
    /// packets while logging is on.
    pub log_record: Option<LogRecord>,
}

impl MetricUpdate {
    pub fn is_noop(&self) -> bool {
        self.changed.is_empty() && !self.alert_fired && self.log_record.is_none()
    }
}

/// Everything derived from the packet stream so far.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricState {
    pub connection_status: ConnectionStatus,
    /// Last `poorSignalLevel` taken from a cognitive packet.
    pub signal_quality: u8,
    pub attention: u8,
    pub meditation: u8,
    pub band_power: BandPower,
    pub peak_band: PeakBand,
    /// `|raw| / 10` of the most recent raw sample.
    pub jitter_metric: f64,
    /// Most recent nonzero raw sample, as logged in the `Raw` column.
    pub last_raw_sample: i32,
    pub blink_active: bool,
    pub blink_strength: u8,
    pub alert_armed: bool,
    pub alert_threshold: u8,
    pub artifact_rejection: bool,
    pub logging: bool,
    waveform: VecDeque<WavePoint>,
    blink_deadline: Option<DateTime<Utc>>,
}

impl Default for MetricState {
    fn default() -> Self {
        Self {
            connection_status: ConnectionStatus::Idle,
            signal_quality: NO_CONTACT,
            attention: 0,
            meditation: 0,
            band_power: BandPower::default(),
            peak_band: PeakBand::None,
            jitter_metric: 0.0,
            last_raw_sample: 0,
            blink_active: false,
            blink_strength: 0,
            alert_armed: false,
            alert_threshold: DEFAULT_ALERT_THRESHOLD,
            artifact_rejection: true,
            logging: false,
            waveform: (0..WAVEFORM_CAPACITY)
                .map(|index| WavePoint {
                    index,
                    amplitude: WAVEFORM_BASELINE,
                })
                .collect(),
            blink_deadline: None,
        }
    }
}

impl MetricState {
    /// Fresh session state with the given alert and artifact settings.
    pub fn new(alert_armed: bool, alert_threshold: u8, artifact_rejection: bool) -> Self {
        Self {
            alert_armed,
            alert_threshold,
            artifact_rejection,
            ..Self::default()
        }
    }

    /// The rolling waveform, oldest first; always exactly
    /// [`WAVEFORM_CAPACITY`] points indexed `0..WAVEFORM_CAPACITY`.
    pub fn waveform(&self) -> &VecDeque<WavePoint> {
        &self.waveform
    }

    /// When the current blink flag lapses, if one is pending.
    pub fn blink_deadline(&self) -> Option<DateTime<Utc>> {
        self.blink_deadline
    }

    pub fn contact(&self) -> ContactQuality {
        ContactQuality::from_signal_level(self.signal_quality)
    }

    // ── Packet path ──────────────────────────────────────────────────────────

    /// Fold one packet into the state.
    ///
    /// Steps run in a fixed order: artifact rejection, lazy blink expiry,
    /// raw sample, blink, cognitive bundle.  A rejected packet yields an
    /// update with no changes at all.
    pub fn apply(&self, packet: &TelemetryPacket, now: DateTime<Utc>) -> MetricUpdate {
        if self.artifact_rejection && is_artifact(packet.signal_quality) {
            return self.unchanged();
        }

        let mut next = self.clone();
        next.lapse_blink(now);

        if packet.raw_sample != 0 {
            next.push_raw(packet.raw_sample);
        }

        if packet.blink_strength > 0 {
            next.blink_active = true;
            next.blink_strength = packet.blink_strength;
            // A newer blink replaces the pending deadline rather than adding to it.
            next.blink_deadline = Some(now + Duration::milliseconds(BLINK_HOLD_MS));
        }

        let mut alert_fired = false;
        let mut log_record = None;
        if let Some(bundle) = packet.cognitive {
            next.take_bundle(packet.signal_quality, &bundle);
            alert_fired = next.alert_armed && next.attention > next.alert_threshold;
            if next.logging {
                log_record = Some(LogRecord {
                    time: now,
                    attention: next.attention,
                    meditation: next.meditation,
                    raw: next.last_raw_sample,
                });
            }
        }

        let changed = self.diff(&next);
        MetricUpdate {
            state: next,
            changed,
            alert_fired,
            log_record,
        }
    }

    /// Clear the blink flag if its deadline is at or before `now`.
    ///
    /// Scheduled expiries are delivered with the deadline they were armed
    /// for, so a stale timer from an earlier blink finds a later deadline
    /// and leaves the flag alone.
    pub fn expire_blink(&self, now: DateTime<Utc>) -> MetricUpdate {
        self.derive(|s| s.lapse_blink(now))
    }

    // ── Control path ─────────────────────────────────────────────────────────

    pub fn with_status(&self, status: ConnectionStatus) -> MetricUpdate {
        self.derive(|s| s.connection_status = status)
    }

    pub fn with_alert_armed(&self, armed: bool) -> MetricUpdate {
        self.derive(|s| s.alert_armed = armed)
    }

    pub fn with_alert_threshold(&self, threshold: u8) -> MetricUpdate {
        self.derive(|s| s.alert_threshold = threshold)
    }

    pub fn with_artifact_rejection(&self, enabled: bool) -> MetricUpdate {
        self.derive(|s| s.artifact_rejection = enabled)
    }

    pub fn with_logging(&self, logging: bool) -> MetricUpdate {
        self.derive(|s| s.logging = logging)
    }

    // ── Internals ────────────────────────────────────────────────────────────

    fn unchanged(&self) -> MetricUpdate {
        MetricUpdate {
            state: self.clone(),
            changed: ChangedFields::new(),
            alert_fired: false,
            log_record: None,
        }
    }

    fn derive(&self, f: impl FnOnce(&mut MetricState)) -> MetricUpdate {
        let mut next = self.clone();
        f(&mut next);
        let changed = self.diff(&next);
        MetricUpdate {
            state: next,
            changed,
            alert_fired: false,
            log_record: None,
        }
    }

    fn lapse_blink(&mut self, now: DateTime<Utc>) {
        if self.blink_deadline.is_some_and(|deadline| now >= deadline) {
            self.blink_active = false;
            self.blink_deadline = None;
        }
    }

    fn push_raw(&mut self, raw: i32) {
        while self.waveform.len() >= WAVEFORM_CAPACITY {
            self.waveform.pop_front();
        }
        self.waveform.push_back(WavePoint {
            index: WAVEFORM_CAPACITY,
            amplitude: scale_raw(raw),
        });
        // Re-base x so the window always reads 0..capacity left to right.
        for (i, p) in self.waveform.iter_mut().enumerate() {
            p.index = i;
        }
        self.jitter_metric = f64::from(raw).abs() / JITTER_DIVISOR;
        self.last_raw_sample = raw;
    }

    fn take_bundle(&mut self, signal_quality: u8, bundle: &CognitiveBundle) {
        self.signal_quality = signal_quality;
        self.attention = bundle.attention;
        self.meditation = bundle.meditation;
        self.band_power = bundle.band_power;
        self.peak_band = classify_peak(&bundle.band_power);
    }

    fn diff(&self, next: &MetricState) -> ChangedFields {
        let mut changed = ChangedFields::new();
        let mut mark = |differs: bool, field: Field| {
            if differs {
                changed.insert(field);
            }
        };
        mark(self.connection_status != next.connection_status, Field::ConnectionStatus);
        mark(self.signal_quality != next.signal_quality, Field::SignalQuality);
        mark(self.attention != next.attention, Field::Attention);
        mark(self.meditation != next.meditation, Field::Meditation);
        mark(self.band_power != next.band_power, Field::BandPower);
        mark(self.peak_band != next.peak_band, Field::PeakBand);
        mark(self.jitter_metric != next.jitter_metric, Field::JitterMetric);
        mark(self.waveform != next.waveform, Field::Waveform);
        mark(self.blink_active != next.blink_active, Field::BlinkActive);
        mark(self.blink_strength != next.blink_strength, Field::BlinkStrength);
        mark(self.alert_armed != next.alert_armed, Field::AlertArmed);
        mark(self.alert_threshold != next.alert_threshold, Field::AlertThreshold);
        mark(self.artifact_rejection != next.artifact_rejection, Field::ArtifactRejection);
        mark(self.logging != next.logging, Field::Logging);
        changed
    }
}

/// Noisy-contact band: 1..=50.  Level 0 (clean) and the 200 sentinel pass.
pub fn is_artifact(signal_quality: u8) -> bool {
    signal_quality > 0 && signal_quality <= ARTIFACT_MAX_SIGNAL_LEVEL && signal_quality != NO_CONTACT
}

/// Map a raw sample onto the 0–100 display range, centred on the baseline.
pub fn scale_raw(raw: i32) -> f64 {
    (WAVEFORM_BASELINE - f64::from(raw) / WAVEFORM_RAW_DIVISOR).clamp(0.0, 100.0)
}

/// Dominant band over delta, theta, low/high alpha and low/high beta.
///
/// Gamma never participates.  Ties go to the first band in that order, with
/// either alpha half counting as alpha; anything past alpha is beta.
pub fn classify_peak(b: &BandPower) -> PeakBand {
    let max = [
        b.delta,
        b.theta,
        b.low_alpha,
        b.high_alpha,
        b.low_beta,
        b.high_beta,
    ]
    .into_iter()
    .max()
    .unwrap_or_default();

    if max == b.delta {
        PeakBand::Delta
    } else if max == b.theta {
        PeakBand::Theta
    } else if max == b.low_alpha || max == b.high_alpha {
        PeakBand::Alpha
    } else {
        PeakBand::Beta
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn ms(n: i64) -> DateTime<Utc> {
        t0() + Duration::milliseconds(n)
    }

    fn raw(sample: i32) -> TelemetryPacket {
        TelemetryPacket {
            raw_sample: sample,
            ..TelemetryPacket::default()
        }
    }

    fn blink(strength: u8) -> TelemetryPacket {
        TelemetryPacket {
            blink_strength: strength,
            ..TelemetryPacket::default()
        }
    }

    fn bands() -> BandPower {
        BandPower {
            delta: 5,
            theta: 5,
            low_alpha: 10,
            high_alpha: 3,
            low_beta: 1,
            high_beta: 1,
            low_gamma: 99,
            high_gamma: 99,
        }
    }

    fn cognitive(signal_quality: u8, attention: u8) -> TelemetryPacket {
        TelemetryPacket {
            signal_quality,
            cognitive: Some(CognitiveBundle {
                attention,
                meditation: 40,
                band_power: bands(),
            }),
            ..TelemetryPacket::default()
        }
    }

    fn assert_window(state: &MetricState) {
        assert_eq!(state.waveform().len(), WAVEFORM_CAPACITY);
        for (i, p) in state.waveform().iter().enumerate() {
            assert_eq!(p.index, i);
        }
    }

    #[test]
    fn defaults() {
        let s = MetricState::default();
        assert_eq!(s.signal_quality, 200);
        assert_eq!(s.peak_band, PeakBand::None);
        assert_eq!(s.contact(), ContactQuality::Poor);
        assert!(s.waveform().iter().all(|p| p.amplitude == WAVEFORM_BASELINE));
        assert_window(&s);
    }

    #[test]
    fn raw_sample_sets_jitter_and_appends() {
        let u = MetricState::default().apply(&raw(40), t0());
        assert_eq!(u.state.jitter_metric, 4.0);
        assert_eq!(u.state.waveform().back().unwrap().amplitude, 48.0);
        assert_eq!(u.state.last_raw_sample, 40);
        assert!(u.changed.contains(&Field::Waveform));
        assert!(u.changed.contains(&Field::JitterMetric));
        assert_window(&u.state);
    }

    #[test]
    fn negative_raw_uses_magnitude() {
        let u = MetricState::default().apply(&raw(-125), t0());
        assert_eq!(u.state.jitter_metric, 12.5);
    }

    #[test]
    fn scaled_amplitude_is_clamped() {
        assert_eq!(scale_raw(5000), 0.0);
        assert_eq!(scale_raw(-5000), 100.0);
        assert_eq!(scale_raw(0), 50.0);
    }

    #[test]
    fn waveform_stays_contiguous_under_long_streams() {
        let mut s = MetricState::default();
        for i in 1..=650 {
            s = s.apply(&raw(i), t0()).state;
            assert_window(&s);
        }
        // Oldest retained sample is the 451st pushed.
        assert_eq!(s.waveform()[0].amplitude, scale_raw(451));
        assert_eq!(s.waveform()[199].amplitude, scale_raw(650));
    }

    #[test]
    fn artifact_rejected_when_enabled() {
        let base = MetricState::default();
        let u = base.apply(&cognitive(30, 90), t0());
        assert!(u.changed.is_empty());
        assert!(u.is_noop());
        assert_eq!(u.state, base);
    }

    #[test]
    fn artifact_passes_when_disabled() {
        let base = MetricState::new(false, 80, false);
        let u = base.apply(&cognitive(30, 90), t0());
        assert_eq!(u.state.signal_quality, 30);
        assert!(u.changed.contains(&Field::SignalQuality));
    }

    #[test]
    fn artifact_band_edges() {
        assert!(!is_artifact(0));
        assert!(is_artifact(1));
        assert!(is_artifact(50));
        assert!(!is_artifact(51));
        assert!(!is_artifact(200));
    }

    #[test]
    fn sentinel_never_rejected() {
        for rejection in [true, false] {
            let base = MetricState::new(false, 80, rejection);
            let u = base.apply(&cognitive(200, 10), t0());
            assert_eq!(u.state.attention, 10);
            assert_eq!(u.state.signal_quality, 200);
        }
    }

    #[test]
    fn cognitive_fields_are_idempotent() {
        let base = MetricState::default();
        let p = cognitive(0, 55);
        let a = base.apply(&p, t0()).state;
        let b = base.apply(&p, t0()).state;
        assert_eq!(a, b);
        let again = a.apply(&p, t0());
        assert!(again.changed.is_empty());
        assert_eq!(again.state.attention, 55);
        assert_eq!(again.state.band_power, a.band_power);
    }

    #[test]
    fn blink_is_debounced_from_latest_event() {
        let s = MetricState::default();
        let s = s.apply(&blink(60), ms(0)).state;
        assert!(s.blink_active);
        let s = s.apply(&blink(80), ms(100)).state;
        assert_eq!(s.blink_strength, 80);
        assert_eq!(s.blink_deadline(), Some(ms(600)));

        // The first blink's timer fires: the flag must survive.
        let u = s.expire_blink(ms(500));
        assert!(u.state.blink_active);
        assert!(u.changed.is_empty());

        let u = u.state.expire_blink(ms(600));
        assert!(!u.state.blink_active);
        assert_eq!(u.changed, ChangedFields::from([Field::BlinkActive]));
        assert_eq!(u.state.blink_deadline(), None);
    }

    #[test]
    fn blink_lapses_lazily_on_next_packet() {
        let s = MetricState::default().apply(&blink(60), ms(0)).state;
        let u = s.apply(&raw(10), ms(750));
        assert!(!u.state.blink_active);
        assert!(u.changed.contains(&Field::BlinkActive));
    }

    #[test]
    fn peak_ignores_gamma() {
        assert_eq!(classify_peak(&bands()), PeakBand::Alpha);
    }

    #[test]
    fn peak_tie_break_order() {
        let tie = BandPower {
            delta: 7,
            theta: 7,
            ..BandPower::default()
        };
        assert_eq!(classify_peak(&tie), PeakBand::Delta);

        let alpha_tie = BandPower {
            high_alpha: 9,
            low_beta: 9,
            ..BandPower::default()
        };
        assert_eq!(classify_peak(&alpha_tie), PeakBand::Alpha);

        let beta = BandPower {
            high_beta: 3,
            ..BandPower::default()
        };
        assert_eq!(classify_peak(&beta), PeakBand::Beta);

        // All zero: delta is evaluated first.
        assert_eq!(classify_peak(&BandPower::default()), PeakBand::Delta);
    }

    #[test]
    fn alert_fires_once_over_sequence() {
        let mut s = MetricState::new(true, 80, true);
        let mut fired = Vec::new();
        for attention in [70, 85, 60] {
            let u = s.apply(&cognitive(0, attention), t0());
            fired.push(u.alert_fired);
            s = u.state;
        }
        assert_eq!(fired, vec![false, true, false]);
    }

    #[test]
    fn alert_requires_strictly_above_threshold() {
        let s = MetricState::new(true, 80, true);
        assert!(!s.apply(&cognitive(0, 80), t0()).alert_fired);
        let unarmed = MetricState::new(false, 80, true);
        assert!(!unarmed.apply(&cognitive(0, 99), t0()).alert_fired);
    }

    #[test]
    fn log_record_only_while_logging() {
        let s = MetricState::default().apply(&raw(-7), t0()).state;
        assert!(s.apply(&cognitive(0, 50), ms(1)).log_record.is_none());

        let s = s.with_logging(true).state;
        let rec = s.apply(&cognitive(0, 50), ms(1)).log_record.unwrap();
        assert_eq!(rec.time, ms(1));
        assert_eq!(rec.attention, 50);
        assert_eq!(rec.meditation, 40);
        assert_eq!(rec.raw, -7);

        // Raw-only packets never produce a row.
        assert!(s.apply(&raw(3), ms(2)).log_record.is_none());
    }

    #[test]
    fn settings_report_their_field() {
        let s = MetricState::default();
        assert_eq!(
            s.with_status(ConnectionStatus::Connected).changed,
            ChangedFields::from([Field::ConnectionStatus])
        );
        assert_eq!(
            s.with_alert_threshold(60).changed,
            ChangedFields::from([Field::AlertThreshold])
        );
        assert!(s.with_artifact_rejection(true).changed.is_empty());
        assert_eq!(
            s.with_alert_armed(true).changed,
            ChangedFields::from([Field::AlertArmed])
        );
    }
}
