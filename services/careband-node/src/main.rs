//! CareBand replay node.
//!
//! Feeds a recorded token script through a scripted transport into the full
//! pipeline (threshold engine, persistence, alert dispatch, acknowledgment)
//! and prints what happened as JSON lines on stdout.
//!
//! ```text
//! careband-node --script night.txt [--config careband.toml] [--auto-ack] [--start-ms 1700000000000]
//! careband-node --version-json
//! ```
//!
//! The config path may also come from `CAREBAND_CONFIG`.

mod script;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use careband_alerts::{
    alert_history, relay_prompts, AckMessage, AckPrompt, AckResponse, AckSurface,
    AcknowledgmentLoop, Alert, ChannelNotifier, RetryPolicy,
};
use careband_core::{current_timestamp_ms, logging, Config};
use careband_link::{PeerHandle, ScriptedTransport};
use careband_monitor::{vitals_in_range, LinkStatus, Monitor, MonitorHandle, SessionStatus, VitalRecord};
use careband_store::{DocumentStore, MemoryStore, SqliteStore};
use script::{Action, Step};
use serde::Serialize;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{info, warn};

const NODE_PROTOCOL_VERSION: u32 = 1;
const CONFIG_ENV: &str = "CAREBAND_CONFIG";
const REPLAY_PEER: &str = "00:00:00:00:CA:FE";
const ACK_BUFFER: usize = 64;
const NOTIFY_BUFFER: usize = 64;
const SETTLE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Serialize)]
struct NodeVersionHandshake {
    version: &'static str,
    protocol_version: u32,
}

#[derive(Debug, Default)]
struct Args {
    version_json: bool,
    config: Option<PathBuf>,
    script: Option<PathBuf>,
    auto_ack: bool,
    start_ms: Option<u64>,
}

fn parse_args(args: &[String]) -> Result<Args> {
    let mut parsed = Args::default();
    let mut iter = args.iter().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--version-json" => parsed.version_json = true,
            "--auto-ack" => parsed.auto_ack = true,
            "--config" => {
                let path = iter.next().context("--config was provided without a path")?;
                parsed.config = Some(PathBuf::from(path));
            }
            "--script" => {
                let path = iter.next().context("--script was provided without a path")?;
                parsed.script = Some(PathBuf::from(path));
            }
            "--start-ms" => {
                let value = iter.next().context("--start-ms was provided without a value")?;
                parsed.start_ms = Some(value.parse().context("--start-ms must be an integer")?);
            }
            other => bail!("unknown argument {other:?}"),
        }
    }
    Ok(parsed)
}

fn load_config(args: &Args) -> Result<Config> {
    let path = args
        .config
        .clone()
        .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));
    match path {
        Some(path) => Config::from_file(&path)
            .with_context(|| format!("failed to load config {}", path.display())),
        None => Ok(Config::default_config()),
    }
}

fn open_store(config: &Config) -> Result<Arc<dyn DocumentStore>> {
    match &config.persistence.sqlite_path {
        Some(path) => {
            let store = SqliteStore::open(path)
                .with_context(|| format!("failed to open store {}", path.display()))?;
            info!(path = %path.display(), "Using SQLite store");
            Ok(Arc::new(store))
        }
        None => {
            info!("Using in-memory store");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

fn emit(value: serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string(&value)?);
    Ok(())
}

/// Acknowledges every prompt.
struct AutoAck;

#[async_trait]
impl AckSurface for AutoAck {
    async fn present(&self, prompt: &AckPrompt) -> bool {
        info!(alert_type = %prompt.alert_type, "Prompt acknowledged");
        true
    }
}

/// Logs prompts and leaves them unanswered; script `ACK` lines answer instead.
struct LogOnly;

#[async_trait]
impl AckSurface for LogOnly {
    async fn present(&self, prompt: &AckPrompt) -> bool {
        info!(alert_type = %prompt.alert_type, message = %prompt.message, "Prompt shown");
        false
    }
}

struct Replay {
    transport: ScriptedTransport,
    handle: MonitorHandle,
    status: watch::Receiver<SessionStatus>,
    alerts: broadcast::Receiver<Alert>,
    acks: mpsc::Sender<AckMessage>,
    peer: PeerHandle,
    user_id: String,
    base_ms: u64,
    injected: u64,
}

impl Replay {
    async fn connect(&mut self) -> Result<()> {
        self.handle.connect(self.peer.clone()).await?;
        self.wait_for(|s| matches!(s.link, LinkStatus::Ready { .. }))
            .await
            .context("session never became ready")
    }

    async fn apply(&mut self, step: Step) -> Result<()> {
        let at_ms = self.base_ms + step.offset_ms;
        match step.action {
            Action::Token(token) => {
                if self.transport.inject_token(token.as_str(), at_ms).await {
                    self.injected += 1;
                } else {
                    warn!(token = %token, "No link, token skipped");
                }
            }
            Action::Ack(alert_type) => {
                self.drain().await?;
                let (message, reply) = AckMessage::respond(AckResponse {
                    alert_id: None,
                    alert_type: alert_type.clone(),
                    subject_user_id: self.user_id.clone(),
                    acknowledged: true,
                    responded_at_ms: at_ms,
                });
                self.acks
                    .send(message)
                    .await
                    .map_err(|_| anyhow!("acknowledgment loop stopped"))?;
                let outcome = reply.await?;
                emit(json!({ "event": "ack", "alertType": alert_type, "outcome": outcome }))?;
            }
            Action::Drop(reason) => {
                self.drain().await?;
                self.transport.drop_link(&reason).await;
                self.wait_for(|s| s.link == LinkStatus::Idle).await?;
                emit(json!({ "event": "link_lost", "reason": reason, "atMs": at_ms }))?;
                self.connect().await?;
            }
        }
        Ok(())
    }

    /// Wait until every delivered token is processed, then print new alerts.
    async fn drain(&mut self) -> Result<()> {
        let injected = self.injected;
        self.wait_for(|s| s.parse_stats.total() >= injected).await?;
        loop {
            match self.alerts.try_recv() {
                Ok(alert) => emit(json!({ "event": "alert", "alert": alert }))?,
                Err(broadcast::error::TryRecvError::Lagged(missed)) => {
                    warn!(missed, "Alert output lagged");
                }
                Err(_) => break,
            }
        }
        Ok(())
    }

    async fn wait_for(&mut self, done: impl Fn(&SessionStatus) -> bool) -> Result<()> {
        tokio::time::timeout(SETTLE_TIMEOUT, self.status.wait_for(|s| done(s)))
            .await
            .context("timed out waiting for the monitor")?
            .map_err(|_| anyhow!("monitor stopped"))?;
        Ok(())
    }

    async fn finish(mut self) -> Result<SessionStatus> {
        self.drain().await?;
        let status = self.status.borrow().clone();
        self.handle.shutdown().await?;
        Ok(status)
    }
}

/// The user's alert history, newest first, once `expected` records landed.
async fn wait_for_alerts(store: &dyn DocumentStore, user_id: &str, expected: u64) -> Result<Vec<Alert>> {
    let deadline = tokio::time::Instant::now() + SETTLE_TIMEOUT;
    loop {
        let alerts = alert_history(store, user_id).await?;
        if alerts.len() as u64 >= expected || tokio::time::Instant::now() >= deadline {
            return Ok(alerts);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Vital records saved during the replay window.
async fn wait_for_vitals(
    store: &dyn DocumentStore,
    user_id: &str,
    window: (u64, u64),
    expected: u64,
) -> Result<Vec<VitalRecord>> {
    let deadline = tokio::time::Instant::now() + SETTLE_TIMEOUT;
    loop {
        let records = vitals_in_range(store, user_id, window.0, window.1).await?;
        if records.len() as u64 >= expected || tokio::time::Instant::now() >= deadline {
            return Ok(records);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

async fn run(args: Args, config: Config) -> Result<()> {
    let script_path = args.script.clone().context("missing required --script <path> argument")?;
    let steps = script::load(&script_path)
        .with_context(|| format!("failed to load script {}", script_path.display()))?;

    let store = open_store(&config)?;
    let retry = RetryPolicy::from_config(&config.retry);

    let (ack_loop, acks) = AcknowledgmentLoop::new(
        Arc::clone(&store),
        retry,
        config.session.notified_to.as_str(),
        ACK_BUFFER,
    );
    let ack_task = tokio::spawn(ack_loop.run());

    let (notifier, notifications) = ChannelNotifier::new(NOTIFY_BUFFER);
    let surface: Arc<dyn AckSurface> = if args.auto_ack {
        Arc::new(AutoAck)
    } else {
        Arc::new(LogOnly)
    };
    let relay = tokio::spawn(relay_prompts(notifications, surface, acks.clone()));

    let peer = PeerHandle::new(REPLAY_PEER, Some("CareBand replay".to_string()));
    let transport = ScriptedTransport::new(vec![peer.clone()]);
    let (monitor, handle) = Monitor::new(
        &config,
        Arc::new(transport.clone()),
        Arc::clone(&store),
        Arc::new(notifier),
        Some(acks.clone()),
    );
    let monitor_task = tokio::spawn(monitor.run());

    let base_ms = args.start_ms.unwrap_or_else(current_timestamp_ms);
    let end_ms = base_ms + steps.iter().map(|s| s.offset_ms).max().unwrap_or(0);
    let user_id = config.session.user_id.clone();
    info!(steps = steps.len(), base_ms, "Replay starting");

    let mut replay = Replay {
        transport,
        status: handle.status(),
        alerts: handle.subscribe_alerts(),
        handle,
        acks,
        peer,
        user_id: user_id.clone(),
        base_ms,
        injected: 0,
    };
    replay.connect().await?;
    for step in steps {
        replay.apply(step).await?;
    }
    let status = replay.finish().await?;
    monitor_task.await?;
    relay.await?;
    ack_task.await?;

    for alert in wait_for_alerts(store.as_ref(), &user_id, status.alerts_raised).await? {
        emit(json!({ "event": "stored", "alert": alert }))?;
    }
    let vitals =
        wait_for_vitals(store.as_ref(), &user_id, (base_ms, end_ms), status.samples_persisted).await?;
    for record in vitals {
        emit(json!({ "event": "stored_vital", "record": record }))?;
    }
    info!(
        samples = status.parse_stats.samples,
        dropped = status.parse_stats.dropped(),
        alerts = status.alerts_raised,
        persisted = status.samples_persisted,
        "Replay finished"
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let args = parse_args(&args)?;

    if args.version_json {
        let handshake = NodeVersionHandshake {
            version: careband_core::VERSION,
            protocol_version: NODE_PROTOCOL_VERSION,
        };
        println!("{}", serde_json::to_string(&handshake)?);
        return Ok(());
    }

    let config = load_config(&args)?;
    logging::init_from(&config.logging);
    info!(version = careband_core::VERSION, user_id = %config.session.user_id, "CareBand node starting");

    run(args, config).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(args: &[&str]) -> Vec<String> {
        std::iter::once("careband-node")
            .chain(args.iter().copied())
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_parse_args() {
        let args = parse_args(&argv(&["--script", "a.txt", "--auto-ack", "--start-ms", "1000"])).unwrap();
        assert_eq!(args.script, Some(PathBuf::from("a.txt")));
        assert!(args.auto_ack);
        assert_eq!(args.start_ms, Some(1000));
        assert!(!args.version_json);
    }

    #[test]
    fn test_parse_args_rejects_bad_input() {
        assert!(parse_args(&argv(&["--config"])).is_err());
        assert!(parse_args(&argv(&["--start-ms", "soon"])).is_err());
        assert!(parse_args(&argv(&["--verbose"])).is_err());
    }

    #[tokio::test]
    async fn test_replay_end_to_end() {
        let mut script = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(
            &mut script,
            b"0 BPM:130\n1000 BPM:130\n5000 BPM:130\n5500 BPM:abc\n6000 ACK hr_high\n",
        )
        .unwrap();

        let args = Args {
            script: Some(script.path().to_path_buf()),
            start_ms: Some(1_700_000_000_000),
            ..Default::default()
        };
        let mut config = Config::default_config();
        config.retry.max_attempts = 1;
        run(args, config).await.unwrap();
    }
}
