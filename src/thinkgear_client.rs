use std::sync::Mutex;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::parse::decode_line;
use crate::protocol::{encode_config_command, DEFAULT_HOST, DEFAULT_PORT};
use crate::types::{ConnectionStatus, LinkEvent};

// ── ThinkGearClientConfig ─────────────────────────────────────────────────────

/// Configuration for [`ThinkGearClient`].
#[derive(Debug, Clone)]
pub struct ThinkGearClientConfig {
    /// Address of the ThinkGear Connector.  Default: `"127.0.0.1"`.
    pub host: String,
    /// Port of the ThinkGear Connector.  Default: `13854`.
    pub port: u16,
    /// Ask TGC to include `rawEeg` samples in the stream.
    ///
    /// Without raw output only blink and once-per-second cognitive lines
    /// arrive, so the waveform and jitter metric never move.  Default: `true`.
    pub enable_raw_output: bool,
    /// Give up on the TCP connect after this many seconds. Default: `10`.
    pub connect_timeout_secs: u64,
}

impl Default for ThinkGearClientConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.into(),
            port: DEFAULT_PORT,
            enable_raw_output: true,
            connect_timeout_secs: 10,
        }
    }
}

impl ThinkGearClientConfig {
    /// `host:port` as dialled.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// ── ThinkGearClient ───────────────────────────────────────────────────────────

/// TCP client for the ThinkGear Connector.
///
/// [`connect`](ThinkGearClient::connect) returns immediately; dialling,
/// configuration and the read loop all run on a spawned task that reports
/// back exclusively through [`LinkEvent`]s:
///
/// ```text
/// Status(Connecting) ─┬─> Status(Error)                      connect failed
///                     └─> Status(Connected) ─> Packet* ─┬─> Status(Disconnected)
///                                                       └─> Status(Error)
/// ```
///
/// Each connect produces exactly one terminal status.  No retry is attempted;
/// that decision belongs to the caller.
pub struct ThinkGearClient {
    config: ThinkGearClientConfig,
}

impl ThinkGearClient {
    pub fn new(config: ThinkGearClientConfig) -> Self {
        Self { config }
    }

    /// Start connecting in the background.
    ///
    /// The event channel is unbounded so the read loop never waits on the
    /// consumer.  Must be called from within a Tokio runtime.
    pub fn connect(&self) -> (mpsc::UnboundedReceiver<LinkEvent>, ThinkGearHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = watch::channel(false);
        let config = self.config.clone();
        let addr = config.addr();

        let task = tokio::spawn(run_link(config, tx, stop_rx));

        let handle = ThinkGearHandle {
            addr,
            stop_tx,
            task: Mutex::new(Some(task)),
        };
        (rx, handle)
    }
}

// ── Link task ─────────────────────────────────────────────────────────────────

/// How the read loop ended.
enum LoopEnd {
    /// `disconnect()` was called, the handle was dropped, or the consumer
    /// went away.
    Stopped,
    /// TGC closed the socket.
    Eof,
    Failed(String),
}

async fn run_link(
    config: ThinkGearClientConfig,
    tx: mpsc::UnboundedSender<LinkEvent>,
    mut stop_rx: watch::Receiver<bool>,
) {
    let addr = config.addr();
    let status = |s: ConnectionStatus| {
        let _ = tx.send(LinkEvent::Status(s));
    };

    status(ConnectionStatus::Connecting(addr.clone()));
    info!("Connecting to ThinkGear Connector at {addr} …");

    let dial = tokio::time::timeout(
        Duration::from_secs(config.connect_timeout_secs),
        TcpStream::connect(&addr),
    );
    let mut stream = tokio::select! {
        res = dial => match res {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                warn!("Connect to {addr} failed: {e}");
                status(ConnectionStatus::Error(e.to_string()));
                return;
            }
            Err(_) => {
                let msg = format!(
                    "connect to {addr} timed out after {} s",
                    config.connect_timeout_secs
                );
                warn!("{msg}");
                status(ConnectionStatus::Error(msg));
                return;
            }
        },
        _ = stop_rx.changed() => {
            info!("Disconnect requested while connecting to {addr}.");
            status(ConnectionStatus::Disconnected);
            return;
        }
    };

    // One write, no reply expected.
    let command = encode_config_command(config.enable_raw_output);
    if let Err(e) = stream.write_all(&command).await {
        warn!("Could not configure ThinkGear Connector: {e}");
        status(ConnectionStatus::Error(e.to_string()));
        return;
    }
    debug!("Sent config: {}", String::from_utf8_lossy(&command));

    status(ConnectionStatus::Connected);
    info!("Connected to ThinkGear Connector at {addr}");

    // `stream` is owned by the reader from here and dropped (closed) on
    // every path out of this function.
    let reader = BufReader::new(stream);
    match read_loop(reader, &tx, &mut stop_rx).await {
        LoopEnd::Stopped => {
            info!("Link to {addr} stopped.");
            status(ConnectionStatus::Disconnected);
        }
        LoopEnd::Eof => {
            info!("ThinkGear Connector closed the connection.");
            status(ConnectionStatus::Disconnected);
        }
        LoopEnd::Failed(e) => {
            warn!("Read from {addr} failed: {e}");
            status(ConnectionStatus::Error(e));
        }
    }
}

/// Read, decode and forward lines until stopped or the socket ends.
///
/// Lines are read as bytes and decoded lossily so that a corrupt byte
/// sequence costs one packet rather than the connection.
async fn read_loop(
    mut reader: BufReader<TcpStream>,
    tx: &mpsc::UnboundedSender<LinkEvent>,
    stop_rx: &mut watch::Receiver<bool>,
) -> LoopEnd {
    let mut buf = Vec::with_capacity(512);
    let mut line_count: u64 = 0;
    let mut dropped: u64 = 0;

    loop {
        if *stop_rx.borrow() {
            return LoopEnd::Stopped;
        }
        buf.clear();
        let read = tokio::select! {
            biased;
            // Err here means the handle was dropped; treat it as a stop.
            _ = stop_rx.changed() => return LoopEnd::Stopped,
            res = reader.read_until(b'\n', &mut buf) => res,
        };

        match read {
            Ok(0) => return LoopEnd::Eof,
            Ok(_) => {}
            Err(e) => return LoopEnd::Failed(e.to_string()),
        }

        line_count += 1;
        let line = String::from_utf8_lossy(&buf);
        match decode_line(&line) {
            Ok(packet) => {
                if tx.send(LinkEvent::Packet(packet)).is_err() {
                    debug!("Event receiver dropped; stopping read loop.");
                    return LoopEnd::Stopped;
                }
            }
            Err(e) => {
                dropped += 1;
                debug!("Dropped line #{line_count}: {e}");
            }
        }

        if line_count <= 3 || line_count % 512 == 0 {
            info!("Read loop: line #{line_count} ({dropped} undecodable so far)");
        }
    }
}

// ── ThinkGearHandle ───────────────────────────────────────────────────────────

/// Control handle for a link started by [`ThinkGearClient::connect`].
///
/// Dropping the handle stops the link the same way as
/// [`disconnect`](ThinkGearHandle::disconnect), without waiting for it.
pub struct ThinkGearHandle {
    addr: String,
    stop_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ThinkGearHandle {
    /// The `host:port` this link dials.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// `true` until the link task has finished.
    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .map(|t| t.as_ref().is_some_and(|t| !t.is_finished()))
            .unwrap_or(false)
    }

    /// Stop the link and wait for the socket to be released.
    ///
    /// Safe to call from any task and more than once.  If the link is still
    /// connecting or reading, it emits `Status(Disconnected)` before this
    /// returns; a link that already reached a terminal status emits nothing
    /// further.
    pub async fn disconnect(&self) {
        self.stop_tx.send_replace(true);
        let task = self.task.lock().ok().and_then(|mut t| t.take());
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("Link task for {} ended abnormally: {e}", self.addr);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    async fn listener() -> (TcpListener, ThinkGearClientConfig) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let config = ThinkGearClientConfig {
            port,
            connect_timeout_secs: 2,
            ..ThinkGearClientConfig::default()
        };
        (listener, config)
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<LinkEvent>) -> LinkEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for link event")
            .expect("link channel closed")
    }

    #[test]
    fn default_endpoint() {
        assert_eq!(ThinkGearClientConfig::default().addr(), "127.0.0.1:13854");
    }

    #[tokio::test]
    async fn streams_packets_and_skips_garbage() {
        let (listener, config) = listener().await;
        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let expected = encode_config_command(true);
            let mut got = vec![0u8; expected.len()];
            sock.read_exact(&mut got).await.unwrap();
            assert_eq!(got, expected);
            sock.write_all(b"{\"rawEeg\":40}\r\n\r\n{\"eSense\":{\"att\r\n{\"blinkStrength\":55}\r\n")
                .await
                .unwrap();
        });

        let (mut rx, handle) = ThinkGearClient::new(config).connect();
        assert!(matches!(
            next(&mut rx).await,
            LinkEvent::Status(ConnectionStatus::Connecting(_))
        ));
        assert_eq!(next(&mut rx).await, LinkEvent::Status(ConnectionStatus::Connected));
        match next(&mut rx).await {
            LinkEvent::Packet(p) => assert_eq!(p.raw_sample, 40),
            other => panic!("unexpected {other:?}"),
        }
        match next(&mut rx).await {
            LinkEvent::Packet(p) => assert_eq!(p.blink_strength, 55),
            other => panic!("unexpected {other:?}"),
        }
        server.await.unwrap();
        assert_eq!(
            next(&mut rx).await,
            LinkEvent::Status(ConnectionStatus::Disconnected)
        );
        handle.disconnect().await;
        assert!(!handle.is_running());
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn refused_connection_reports_error() {
        let (listener, config) = listener().await;
        drop(listener);

        let (mut rx, handle) = ThinkGearClient::new(config).connect();
        assert!(matches!(
            next(&mut rx).await,
            LinkEvent::Status(ConnectionStatus::Connecting(_))
        ));
        assert!(matches!(
            next(&mut rx).await,
            LinkEvent::Status(ConnectionStatus::Error(_))
        ));
        assert!(rx.recv().await.is_none());
        // Nothing more is emitted after a terminal status.
        handle.disconnect().await;
    }

    #[tokio::test]
    async fn disconnect_interrupts_blocked_read() {
        let (listener, config) = listener().await;
        let (hold_tx, hold_rx) = tokio::sync::oneshot::channel::<()>();
        let server = tokio::spawn(async move {
            let (sock, _) = listener.accept().await.unwrap();
            // Keep the socket open and silent until the test is done.
            let _ = hold_rx.await;
            drop(sock);
        });

        let (mut rx, handle) = ThinkGearClient::new(config).connect();
        next(&mut rx).await;
        assert_eq!(next(&mut rx).await, LinkEvent::Status(ConnectionStatus::Connected));
        assert!(handle.is_running());

        tokio::time::timeout(Duration::from_secs(2), handle.disconnect())
            .await
            .expect("disconnect did not interrupt the read");
        assert_eq!(
            next(&mut rx).await,
            LinkEvent::Status(ConnectionStatus::Disconnected)
        );
        assert!(!handle.is_running());
        assert!(rx.recv().await.is_none());

        let _ = hold_tx.send(());
        server.await.unwrap();
    }
}
