use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use log::{error, info};
use tokio::sync::mpsc;

use thinkgear_rs::metrics::Field;
use thinkgear_rs::protocol::{DEFAULT_ALERT_THRESHOLD, DEFAULT_HOST, DEFAULT_PORT};
use thinkgear_rs::session::{Session, SessionCommand, SessionConfig};
use thinkgear_rs::thinkgear_client::{ThinkGearClient, ThinkGearClientConfig};

/// Stream NeuroSky headset metrics from the ThinkGear Connector.
#[derive(Debug, Parser)]
#[command(name = "thinkgear", version, about)]
struct Args {
    /// ThinkGear Connector host.
    #[arg(long, default_value = DEFAULT_HOST)]
    host: String,
    /// ThinkGear Connector port.
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,
    /// Do not request raw samples (no waveform or jitter).
    #[arg(long)]
    no_raw: bool,
    /// Attention level above which the alert fires.
    #[arg(long, default_value_t = DEFAULT_ALERT_THRESHOLD)]
    threshold: u8,
    /// Arm the attention alert at startup.
    #[arg(long)]
    arm_alert: bool,
    /// Keep packets from the noisy-contact band (poorSignalLevel 1-50).
    #[arg(long)]
    no_artifact_rejection: bool,
    /// Directory for BrainSession_*.csv logs.
    #[arg(long, default_value = ".")]
    log_dir: PathBuf,
    /// Start logging immediately.
    #[arg(long)]
    log: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // ── Logging ───────────────────────────────────────────────────────────────
    // Set RUST_LOG=debug for verbose output, e.g.:
    //   RUST_LOG=thinkgear_rs=debug cargo run
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // ── Configuration ─────────────────────────────────────────────────────────
    let args = Args::parse();
    let client_config = ThinkGearClientConfig {
        host: args.host,
        port: args.port,
        enable_raw_output: !args.no_raw,
        ..ThinkGearClientConfig::default()
    };
    let session_config = SessionConfig {
        alert_armed: args.arm_alert,
        alert_threshold: args.threshold,
        artifact_rejection: !args.no_artifact_rejection,
        log_dir: args.log_dir,
        log_on_start: args.log,
    };

    // ── Connect ───────────────────────────────────────────────────────────────
    let (link_rx, handle) = ThinkGearClient::new(client_config).connect();
    let handle = Arc::new(handle);

    let (session, mut out) = Session::new(session_config);
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<SessionCommand>();
    let session_task = tokio::spawn(session.run(link_rx, cmd_rx));

    info!("Commands (type + Enter):");
    info!("  q      – quit");
    info!("  l      – toggle session logging");
    info!("  a      – arm / disarm attention alert");
    info!("  t <n>  – set alert threshold");
    info!("  r      – toggle artifact rejection");
    info!("  s      – print current snapshot\n");

    // ── Stdin command loop ────────────────────────────────────────────────────
    // Lines are read on a dedicated OS thread and relayed to an async task.
    let (line_tx, mut line_rx) = mpsc::unbounded_channel::<String>();
    std::thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(l) => {
                    if line_tx.send(l.trim().to_owned()).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });

    let handle_cmd = Arc::clone(&handle);
    let snapshots = out.snapshots.clone();
    tokio::spawn(async move {
        while let Some(line) = line_rx.recv().await {
            if line == "q" {
                info!("Quit requested.");
                handle_cmd.disconnect().await;
                let _ = cmd_tx.send(SessionCommand::Shutdown);
                break;
            }
            let mut words = line.split_whitespace();
            let cmd = match words.next() {
                Some("l") => SessionCommand::ToggleLogging,
                Some("a") => SessionCommand::ArmAlert(!snapshots.borrow().alert_armed),
                Some("r") => {
                    SessionCommand::SetArtifactRejection(!snapshots.borrow().artifact_rejection)
                }
                Some("t") => match words.next().and_then(|n| n.parse::<u8>().ok()) {
                    Some(n) => SessionCommand::SetAlertThreshold(n),
                    None => {
                        error!("Usage: t <0-255>");
                        continue;
                    }
                },
                Some("s") => {
                    let s = Arc::clone(&snapshots.borrow());
                    println!(
                        "{} | signal={} attention={} meditation={} peak={} jitter={:.1} blink={} \
                         alert={}@{} rejection={} logging={}",
                        s.connection_status,
                        s.signal_quality,
                        s.attention,
                        s.meditation,
                        s.peak_band,
                        s.jitter_metric,
                        s.blink_active,
                        s.alert_armed,
                        s.alert_threshold,
                        s.artifact_rejection,
                        s.logging
                    );
                    continue;
                }
                Some(other) => {
                    error!("Unknown command '{other}'");
                    continue;
                }
                None => continue,
            };
            if cmd_tx.send(cmd).is_err() {
                break;
            }
        }
    });

    // ── Main update loop ──────────────────────────────────────────────────────
    while let Some(update) = out.updates.recv().await {
        let s = &update.state;
        let changed = &update.changed;

        if changed.contains(&Field::ConnectionStatus) {
            info!("{}", s.connection_status);
            if s.connection_status.is_terminal() {
                info!("Link ended; restart to reconnect.");
            }
        }

        if changed.contains(&Field::SignalQuality)
            || changed.contains(&Field::Attention)
            || changed.contains(&Field::Meditation)
            || changed.contains(&Field::BandPower)
        {
            let b = &s.band_power;
            println!(
                "[eSense] signal={:3} ({:?})  attention={:3}  meditation={:3}  peak={}  jitter={:6.1}",
                s.signal_quality,
                s.contact(),
                s.attention,
                s.meditation,
                s.peak_band,
                s.jitter_metric
            );
            println!(
                "[bands]  δ={} θ={} α={}/{} β={}/{} γ={}/{}",
                b.delta,
                b.theta,
                b.low_alpha,
                b.high_alpha,
                b.low_beta,
                b.high_beta,
                b.low_gamma,
                b.high_gamma
            );
        }

        if changed.contains(&Field::BlinkActive) && s.blink_active {
            println!("[blink]  strength={}", s.blink_strength);
        }

        if update.alert_fired {
            // Terminal bell.
            println!("\x07[ALERT]  attention {} > {}", s.attention, s.alert_threshold);
        }

        if changed.contains(&Field::Logging) {
            info!("Session logging {}", if s.logging { "on" } else { "off" });
        }
        if changed.contains(&Field::AlertArmed) || changed.contains(&Field::AlertThreshold) {
            info!(
                "Alert {} at threshold {}",
                if s.alert_armed { "armed" } else { "disarmed" },
                s.alert_threshold
            );
        }
        if changed.contains(&Field::ArtifactRejection) {
            info!(
                "Artifact rejection {}",
                if s.artifact_rejection { "on" } else { "off" }
            );
        }
    }

    handle.disconnect().await;
    let final_state = session_task.await?;
    info!("Session ended: {}", final_state.connection_status);
    Ok(())
}
