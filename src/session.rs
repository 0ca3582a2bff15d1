//! The consumer side of the pipeline.
//!
//! A [`Session`] is the single writer of [`MetricState`].  It drains three
//! inputs on one task:
//!
//! * [`LinkEvent`]s from the client, in wire order;
//! * [`SessionCommand`]s from the user surface;
//! * blink-expiry wake-ups it schedules for itself.
//!
//! Every applied input that changes anything produces a new
//! `Arc<MetricState>`, published both on a `watch` channel (latest snapshot
//! for concurrent readers) and as a [`SessionUpdate`] carrying the changed
//! fields.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use tokio::sync::{mpsc, watch};

use crate::metrics::{ChangedFields, Field, MetricState, MetricUpdate};
use crate::protocol::DEFAULT_ALERT_THRESHOLD;
use crate::recorder::{CsvRecorder, SessionRecorder};
use crate::types::LinkEvent;

/// Settings a session starts with.  All but `log_dir` can be changed later
/// through [`SessionCommand`]s.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub alert_armed: bool,
    pub alert_threshold: u8,
    pub artifact_rejection: bool,
    /// Where `BrainSession_*.csv` files are created.
    pub log_dir: PathBuf,
    /// Open a session log as soon as the session starts.
    pub log_on_start: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            alert_armed: false,
            alert_threshold: DEFAULT_ALERT_THRESHOLD,
            artifact_rejection: true,
            log_dir: PathBuf::from("."),
            log_on_start: false,
        }
    }
}

/// User-surface requests, applied in order with packets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    ArmAlert(bool),
    SetAlertThreshold(u8),
    SetArtifactRejection(bool),
    StartLogging,
    StopLogging,
    ToggleLogging,
    /// End the session loop after closing any open log.
    Shutdown,
}

/// One published change.
#[derive(Debug, Clone)]
pub struct SessionUpdate {
    pub state: Arc<MetricState>,
    pub changed: ChangedFields,
    /// Attention crossed the armed threshold on this packet.  Playing a
    /// sound or flashing the screen is up to the receiver.
    pub alert_fired: bool,
}

/// Receiving ends handed to the presentation layer.
pub struct SessionOutputs {
    pub updates: mpsc::UnboundedReceiver<SessionUpdate>,
    pub snapshots: watch::Receiver<Arc<MetricState>>,
}

pub struct Session {
    config: SessionConfig,
    state: Arc<MetricState>,
    recorder: Option<Box<dyn SessionRecorder>>,
    snapshot_tx: watch::Sender<Arc<MetricState>>,
    updates_tx: mpsc::UnboundedSender<SessionUpdate>,
    blink_tx: mpsc::UnboundedSender<DateTime<Utc>>,
    blink_rx: Option<mpsc::UnboundedReceiver<DateTime<Utc>>>,
}

impl Session {
    pub fn new(config: SessionConfig) -> (Self, SessionOutputs) {
        let state = Arc::new(MetricState::new(
            config.alert_armed,
            config.alert_threshold,
            config.artifact_rejection,
        ));
        let (snapshot_tx, snapshots) = watch::channel(Arc::clone(&state));
        let (updates_tx, updates) = mpsc::unbounded_channel();
        let (blink_tx, blink_rx) = mpsc::unbounded_channel();

        let session = Self {
            config,
            state,
            recorder: None,
            snapshot_tx,
            updates_tx,
            blink_tx,
            blink_rx: Some(blink_rx),
        };
        (session, SessionOutputs { updates, snapshots })
    }

    /// Current snapshot.
    pub fn state(&self) -> Arc<MetricState> {
        Arc::clone(&self.state)
    }

    /// Start logging into a caller-supplied recorder instead of a CSV file.
    pub fn start_logging_with(&mut self, recorder: Box<dyn SessionRecorder>) {
        self.stop_logging();
        self.recorder = Some(recorder);
        let update = self.state.with_logging(true);
        self.publish(update);
    }

    /// Drive the session until the link channel closes or a
    /// [`SessionCommand::Shutdown`] arrives.  Returns the final snapshot.
    ///
    /// If the command sender is dropped the session keeps consuming link
    /// events.
    pub async fn run(
        mut self,
        mut links: mpsc::UnboundedReceiver<LinkEvent>,
        mut commands: mpsc::UnboundedReceiver<SessionCommand>,
    ) -> Arc<MetricState> {
        let Some(mut blinks) = self.blink_rx.take() else {
            return self.state();
        };
        if self.config.log_on_start && self.recorder.is_none() {
            self.start_logging();
        }

        let mut commands_open = true;
        loop {
            tokio::select! {
                event = links.recv() => match event {
                    Some(event) => self.on_link_event(event),
                    None => {
                        debug!("Link channel closed; ending session.");
                        break;
                    }
                },
                cmd = commands.recv(), if commands_open => match cmd {
                    Some(SessionCommand::Shutdown) => {
                        info!("Session shutdown requested.");
                        break;
                    }
                    Some(cmd) => self.on_command(cmd),
                    None => commands_open = false,
                },
                Some(deadline) = blinks.recv() => {
                    let update = self.state.expire_blink(deadline);
                    self.publish(update);
                }
            }
        }

        self.stop_logging();
        self.state()
    }

    // ── Inputs ───────────────────────────────────────────────────────────────

    /// Apply one link event as of now.
    pub fn on_link_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Status(status) => {
                info!("Link status: {status}");
                let update = self.state.with_status(status);
                self.publish(update);
            }
            LinkEvent::Packet(packet) => {
                let previous_deadline = self.state.blink_deadline();
                let mut update = self.state.apply(&packet, Utc::now());

                // A repeat blink may move only the deadline, with no visible field changing.
                if let Some(deadline) = update.state.blink_deadline() {
                    if Some(deadline) != previous_deadline {
                        self.schedule_blink_expiry(deadline);
                    }
                }
                if update.alert_fired {
                    info!(
                        "Attention {} above alert threshold {}",
                        update.state.attention, update.state.alert_threshold
                    );
                }
                if let Some(record) = update.log_record.take() {
                    if let Some(recorder) = self.recorder.as_mut() {
                        if let Err(e) = recorder.append(&record) {
                            error!("Session log write failed, logging stopped: {e:#}");
                            self.recorder = None;
                            let stopped = update.state.with_logging(false);
                            update.changed.extend(stopped.changed);
                            update.state = stopped.state;
                        }
                    }
                }
                self.publish(update);
            }
        }
    }

    pub fn on_command(&mut self, cmd: SessionCommand) {
        debug!("Session command: {cmd:?}");
        match cmd {
            SessionCommand::ArmAlert(armed) => {
                let update = self.state.with_alert_armed(armed);
                self.publish(update);
            }
            SessionCommand::SetAlertThreshold(threshold) => {
                let update = self.state.with_alert_threshold(threshold);
                self.publish(update);
            }
            SessionCommand::SetArtifactRejection(enabled) => {
                let update = self.state.with_artifact_rejection(enabled);
                self.publish(update);
            }
            SessionCommand::StartLogging => self.start_logging(),
            SessionCommand::StopLogging => self.stop_logging(),
            SessionCommand::ToggleLogging => {
                if self.recorder.is_some() {
                    self.stop_logging();
                } else {
                    self.start_logging();
                }
            }
            // Only meaningful inside `run`.
            SessionCommand::Shutdown => {}
        }
    }

    // ── Logging ──────────────────────────────────────────────────────────────

    fn start_logging(&mut self) {
        if self.recorder.is_some() {
            return;
        }
        match CsvRecorder::create_in(&self.config.log_dir) {
            Ok(recorder) => {
                self.recorder = Some(Box::new(recorder));
                let update = self.state.with_logging(true);
                self.publish(update);
            }
            Err(e) => error!("Could not start session log: {e:#}"),
        }
    }

    fn stop_logging(&mut self) {
        let Some(mut recorder) = self.recorder.take() else {
            return;
        };
        if let Err(e) = recorder.close() {
            warn!("Closing session log failed: {e:#}");
        }
        let update = self.state.with_logging(false);
        self.publish(update);
    }

    // ── Internals ────────────────────────────────────────────────────────────

    fn schedule_blink_expiry(&self, deadline: DateTime<Utc>) {
        let delay = (deadline - Utc::now()).to_std().unwrap_or_default();
        let tx = self.blink_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // The session may already be gone.
            let _ = tx.send(deadline);
        });
    }

    fn publish(&mut self, update: MetricUpdate) {
        let deadline_moved = update.state.blink_deadline() != self.state.blink_deadline();
        if update.changed.is_empty() && !update.alert_fired && !deadline_moved {
            return;
        }
        let state = Arc::new(update.state);
        self.state = Arc::clone(&state);
        self.snapshot_tx.send_replace(Arc::clone(&state));
        if update.changed.is_empty() && !update.alert_fired {
            return;
        }
        if update.changed.contains(&Field::BlinkActive) {
            debug!("Blink active: {}", state.blink_active);
        }
        let _ = self.updates_tx.send(SessionUpdate {
            state,
            changed: update.changed,
            alert_fired: update.alert_fired,
        });
    }
}
