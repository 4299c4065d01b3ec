//! Worker supervisor: background tasks that watch each configured server.
//!
//! `start` spawns one task per enabled concern of a server (chat relay, save
//! check, status report). The tasks of a server share one shutdown signal;
//! each task owns its own tail or stall state and opens a fresh remote
//! session on every poll. A poll that gets no answer within the concern's
//! interval fails as a transport error and is retried on the next tick.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use palwatch_core::{RemoteConnector, RemoteError, RemoteResult, ServerTarget};

use crate::cache::{SnapshotCache, fetch_snapshot};
use crate::chat::ChatFilter;
use crate::error::{MonitorError, MonitorResult};
use crate::events::{EventSink, LinkEvent, MonitorEvent, RelayMessage, RestartNotice, StatusReport};
use crate::stall::{StallDetector, StallSettings, StallVerdict};
use crate::tailer::LogTailer;

/// Wall clock in seconds since the Unix epoch.
pub type Clock = Arc<dyn Fn() -> u64 + Send + Sync>;

const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// What a worker task watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Concern {
    Chat,
    Save,
    Status,
}

impl Concern {
    pub fn as_str(self) -> &'static str {
        match self {
            Concern::Chat => "chat",
            Concern::Save => "save",
            Concern::Status => "status",
        }
    }
}

/// Identifies one `start` of a server.
///
/// Stopping through a handle only affects the workers it was returned for,
/// not a later replacement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerHandle {
    server: String,
    id: u64,
}

impl WorkerHandle {
    pub fn server(&self) -> &str {
        &self.server
    }
}

struct WorkerSlot {
    id: u64,
    tasks: Vec<(Concern, JoinHandle<()>)>,
    shutdown_tx: watch::Sender<bool>,
}

/// Everything a worker task needs, cloned into each task.
#[derive(Clone)]
struct WorkerContext {
    target: Arc<ServerTarget>,
    connector: Arc<dyn RemoteConnector>,
    cache: Arc<SnapshotCache>,
    sink: Arc<dyn EventSink>,
    clock: Clock,
}

/// Manages the worker tasks of every monitored server.
pub struct WorkerSupervisor {
    connector: Arc<dyn RemoteConnector>,
    cache: Arc<SnapshotCache>,
    sink: Arc<dyn EventSink>,
    clock: Clock,
    join_timeout: Duration,
    /// Running workers: server name → slot.
    workers: Arc<RwLock<HashMap<String, WorkerSlot>>>,
    next_id: AtomicU64,
}

impl WorkerSupervisor {
    pub fn new(
        connector: Arc<dyn RemoteConnector>,
        cache: Arc<SnapshotCache>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            connector,
            cache,
            sink,
            clock: Arc::new(epoch_secs),
            join_timeout: DEFAULT_JOIN_TIMEOUT,
            workers: Arc::new(RwLock::new(HashMap::new())),
            next_id: AtomicU64::new(1),
        }
    }

    /// Replace the wall clock used by the save check.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// How long `stop` waits for a task before aborting it.
    pub fn with_join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout = timeout;
        self
    }

    pub fn cache(&self) -> &Arc<SnapshotCache> {
        &self.cache
    }

    /// Start the workers for `target`, replacing any already running for a
    /// server of the same name.
    pub async fn start(&self, target: ServerTarget) -> WorkerHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let ctx = WorkerContext {
            target: Arc::new(target),
            connector: Arc::clone(&self.connector),
            cache: Arc::clone(&self.cache),
            sink: Arc::clone(&self.sink),
            clock: Arc::clone(&self.clock),
        };
        let server = ctx.target.name.clone();

        let mut tasks = Vec::new();
        if ctx.target.chat_enabled() {
            let ctx = ctx.clone();
            let rx = shutdown_rx.clone();
            tasks.push((Concern::Chat, tokio::spawn(run_chat_loop(ctx, rx))));
        }
        if ctx.target.save_check_enabled() {
            let ctx = ctx.clone();
            let rx = shutdown_rx.clone();
            tasks.push((Concern::Save, tokio::spawn(run_save_loop(ctx, rx))));
        }
        if ctx.target.status.enabled {
            let ctx = ctx.clone();
            let rx = shutdown_rx.clone();
            tasks.push((Concern::Status, tokio::spawn(run_status_loop(ctx, rx))));
        }

        let concerns: Vec<&str> = tasks.iter().map(|(c, _)| c.as_str()).collect();
        if tasks.is_empty() {
            warn!(%server, "no concern enabled, nothing to watch");
        } else {
            info!(%server, concerns = ?concerns, "workers started");
        }

        let old = self.workers.write().await.insert(
            server.clone(),
            WorkerSlot {
                id,
                tasks,
                shutdown_tx,
            },
        );
        if let Some(old) = old {
            debug!(%server, "replacing running workers");
            self.join_slot(&server, old).await;
        }

        WorkerHandle { server, id }
    }

    /// Stop the workers `handle` was returned for. Stopping twice is a
    /// no-op.
    pub async fn stop(&self, handle: &WorkerHandle) {
        let slot = {
            let mut workers = self.workers.write().await;
            let current = workers
                .get(&handle.server)
                .is_some_and(|slot| slot.id == handle.id);
            if current {
                workers.remove(&handle.server)
            } else {
                None
            }
        };
        if let Some(slot) = slot {
            self.join_slot(&handle.server, slot).await;
            info!(server = %handle.server, "workers stopped");
        }
    }

    /// Stop whatever workers are running for `server`.
    pub async fn stop_server(&self, server: &str) {
        let slot = self.workers.write().await.remove(server);
        if let Some(slot) = slot {
            self.join_slot(server, slot).await;
            info!(%server, "workers stopped");
        }
    }

    /// Stop every worker (graceful shutdown).
    pub async fn stop_all(&self) {
        let slots: Vec<_> = self.workers.write().await.drain().collect();
        for (server, slot) in slots {
            self.join_slot(&server, slot).await;
            debug!(%server, "workers stopped");
        }
        info!("all workers stopped");
    }

    /// Names of servers with running workers, sorted.
    pub async fn active(&self) -> Vec<String> {
        let mut names: Vec<String> = self.workers.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn is_running(&self, server: &str) -> bool {
        self.workers.read().await.contains_key(server)
    }

    /// Concerns with a task for `server`.
    pub async fn concerns(&self, server: &str) -> Vec<Concern> {
        self.workers
            .read()
            .await
            .get(server)
            .map(|slot| slot.tasks.iter().map(|(c, _)| *c).collect())
            .unwrap_or_default()
    }

    async fn join_slot(&self, server: &str, slot: WorkerSlot) {
        let _ = slot.shutdown_tx.send(true);
        for (concern, mut task) in slot.tasks {
            if tokio::time::timeout(self.join_timeout, &mut task).await.is_err() {
                warn!(%server, concern = concern.as_str(), "worker did not stop in time, aborting");
                task.abort();
            }
        }
    }
}

/// Stat `path` over a fresh filesystem session, giving each remote step
/// at most `deadline`.
pub async fn sample_mtime(
    connector: &dyn RemoteConnector,
    target: &ServerTarget,
    path: &str,
    deadline: Duration,
) -> RemoteResult<u64> {
    let fs = within(deadline, "open session", connector.open_fs(target)).await?;
    let result = within(deadline, path, fs.stat_mtime(path)).await;
    if tokio::time::timeout(deadline, fs.close()).await.is_err() {
        debug!(server = %target.name, "session close timed out");
    }
    result
}

/// Run `fut`, failing with a transport error if it takes longer than
/// `deadline`.
async fn within<T, E>(
    deadline: Duration,
    what: &str,
    fut: impl Future<Output = Result<T, E>>,
) -> Result<T, E>
where
    E: From<RemoteError>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => {
            let e = RemoteError::Transport(format!("{what}: no answer within {deadline:?}"));
            Err(e.into())
        }
    }
}

async fn run_chat_loop(ctx: WorkerContext, mut shutdown: watch::Receiver<bool>) {
    let target = Arc::clone(&ctx.target);
    let Some(sftp) = target.sftp.as_ref() else {
        return;
    };
    let interval = target.chat.interval();
    let relay_delay = target.chat.relay_delay();
    let filter = ChatFilter::new(target.chat.blocked_phrases.iter().cloned());
    let mut tailer = LogTailer::new(&target.name, &sftp.log_path);

    debug!(server = %target.name, dir = %sftp.log_path, "chat loop starting");

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.changed() => break,
        }
        tokio::select! {
            result = chat_tick(&ctx, &mut tailer, &filter, interval, relay_delay) => {
                if let Err(e) = result {
                    log_failure(&target.name, Concern::Chat, &e);
                }
            }
            _ = shutdown.changed() => break,
        }
    }
    debug!(server = %target.name, "chat loop shutting down");
}

async fn chat_tick(
    ctx: &WorkerContext,
    tailer: &mut LogTailer,
    filter: &ChatFilter,
    deadline: Duration,
    relay_delay: Duration,
) -> MonitorResult<()> {
    let fs = within(deadline, "open session", ctx.connector.open_fs(&ctx.target)).await?;
    let batch = within(deadline, "log poll", tailer.poll_chat(fs.as_ref(), filter)).await;
    if tokio::time::timeout(deadline, fs.close()).await.is_err() {
        debug!(server = %ctx.target.name, "session close timed out");
    }
    let batch = batch?;

    let target = &ctx.target;
    for request in batch.links {
        info!(server = %target.name, player = %request.player_name, "link request seen");
        let event = MonitorEvent::Link(LinkEvent {
            server: target.name.clone(),
            guild_id: target.guild_id,
            request,
        });
        emit(ctx, event).await;
    }

    for (i, msg) in batch.messages.into_iter().enumerate() {
        if i > 0 && !relay_delay.is_zero() {
            tokio::time::sleep(relay_delay).await;
        }
        let event = MonitorEvent::Chat(RelayMessage::new(&target.name, target.guild_id, msg));
        emit(ctx, event).await;
    }
    Ok(())
}

async fn run_save_loop(ctx: WorkerContext, mut shutdown: watch::Receiver<bool>) {
    let target = Arc::clone(&ctx.target);
    let Some(path) = target.level_save_path() else {
        return;
    };
    let interval = target.save.interval();
    let mut detector = StallDetector::new(&target.name, StallSettings::from(&target.save));

    debug!(server = %target.name, %path, "save loop starting");

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.changed() => break,
        }
        tokio::select! {
            result = save_tick(&ctx, &mut detector, &path, interval) => {
                if let Err(e) = result {
                    log_failure(&target.name, Concern::Save, &e);
                }
            }
            _ = shutdown.changed() => break,
        }
    }
    debug!(server = %target.name, "save loop shutting down");
}

async fn save_tick(
    ctx: &WorkerContext,
    detector: &mut StallDetector,
    path: &str,
    deadline: Duration,
) -> MonitorResult<()> {
    let sample = sample_mtime(ctx.connector.as_ref(), &ctx.target, path, deadline).await;
    let now = (ctx.clock)();
    let api = ctx.connector.health_api(&ctx.target);

    // Sample failures are consumed by the detector; only a failed shutdown
    // request comes back as an error.
    if let StallVerdict::Escalate(reason) = detector.poll(api.as_ref(), now, sample).await? {
        let notice = RestartNotice::new(
            &ctx.target.name,
            ctx.target.guild_id,
            reason,
            detector.settings().shutdown_delay_secs,
        );
        emit(ctx, MonitorEvent::Restart(notice)).await;
    }
    Ok(())
}

async fn run_status_loop(ctx: WorkerContext, mut shutdown: watch::Receiver<bool>) {
    let target = Arc::clone(&ctx.target);
    let interval = target.status.interval();

    debug!(server = %target.name, endpoint = %target.endpoint_key(), "status loop starting");

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.changed() => break,
        }
        tokio::select! {
            result = status_tick(&ctx, interval) => {
                if let Err(e) = result {
                    log_failure(&target.name, Concern::Status, &e);
                }
            }
            _ = shutdown.changed() => break,
        }
    }
    debug!(server = %target.name, "status loop shutting down");
}

async fn status_tick(ctx: &WorkerContext, deadline: Duration) -> MonitorResult<()> {
    let api = ctx.connector.health_api(&ctx.target);
    let key = ctx.target.endpoint_key();
    let fetch = ctx.cache.get_or_fetch(&key, || fetch_snapshot(api.as_ref()));
    let snapshot = within(deadline, "status fetch", fetch).await?;
    let report = StatusReport {
        server: ctx.target.name.clone(),
        guild_id: ctx.target.guild_id,
        snapshot,
    };
    emit(ctx, MonitorEvent::Status(report)).await;
    Ok(())
}

/// Hand `event` to the sink; a failed delivery is logged and dropped.
async fn emit(ctx: &WorkerContext, event: MonitorEvent) {
    let kind = event.kind();
    if let Err(e) = ctx.sink.deliver(event).await {
        warn!(server = %ctx.target.name, event = kind, error = %e, "event delivery failed");
    }
}

fn log_failure(server: &str, concern: Concern, e: &MonitorError) {
    let concern = concern.as_str();
    match e {
        MonitorError::EscalationFailed { .. } => {
            error!(%server, concern, error = %e, kind = e.kind(), "escalation failed");
        }
        MonitorError::Remote(RemoteError::Auth(_)) => {
            error!(%server, concern, error = %e, kind = e.kind(), "credentials rejected");
        }
        MonitorError::Remote(remote) if remote.is_unreachable() => {
            warn!(%server, concern, error = %e, kind = e.kind(), "server unreachable");
        }
        _ => {
            warn!(%server, concern, error = %e, kind = e.kind(), "poll failed");
        }
    }
}

fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::LogSink;
    use crate::memory::MemoryConnector;
    use palwatch_core::PalwatchConfig;

    fn target(name: &str) -> ServerTarget {
        let toml = format!(
            r#"
[[servers]]
name = "{name}"
host = "10.0.0.5"
api_password = "pw"

[servers.sftp]
username = "pal"
password = "pw"
save_path = "Pal/Saved/SaveGames/0/ABC"
"#
        );
        PalwatchConfig::from_toml(&toml).unwrap().servers.remove(0)
    }

    fn supervisor(connector: MemoryConnector) -> WorkerSupervisor {
        WorkerSupervisor::new(
            Arc::new(connector),
            Arc::new(SnapshotCache::default()),
            Arc::new(LogSink),
        )
    }

    #[tokio::test]
    async fn starts_and_stops() {
        let sup = supervisor(MemoryConnector::new());
        assert!(sup.active().await.is_empty());

        let handle = sup.start(target("main")).await;
        assert!(sup.is_running("main").await);
        assert_eq!(
            sup.concerns("main").await,
            vec![Concern::Chat, Concern::Save, Concern::Status]
        );

        sup.stop(&handle).await;
        assert!(!sup.is_running("main").await);
        // Second stop is a no-op.
        sup.stop(&handle).await;
    }

    #[tokio::test]
    async fn disabled_concerns_get_no_task() {
        let sup = supervisor(MemoryConnector::new());
        let mut t = target("main");
        t.sftp = None;
        sup.start(t).await;
        assert_eq!(sup.concerns("main").await, vec![Concern::Status]);
        sup.stop_all().await;
    }

    #[tokio::test]
    async fn stop_all_clears_every_server() {
        let sup = supervisor(MemoryConnector::new());
        sup.start(target("a")).await;
        sup.start(target("b")).await;
        assert_eq!(sup.active().await, vec!["a", "b"]);

        sup.stop_all().await;
        assert!(sup.active().await.is_empty());
    }

    #[tokio::test]
    async fn restart_replaces_and_stale_handle_is_ignored() {
        let sup = supervisor(MemoryConnector::new());
        let first = sup.start(target("main")).await;
        let second = sup.start(target("main")).await;
        assert_ne!(first, second);
        assert_eq!(sup.active().await.len(), 1);

        sup.stop(&first).await;
        assert!(sup.is_running("main").await);

        sup.stop_server("main").await;
        assert!(!sup.is_running("main").await);
    }

    #[tokio::test]
    async fn sample_mtime_closes_session() {
        let connector = MemoryConnector::new();
        let (_, fs) = connector.add("main");
        fs.touch("Pal/Saved/SaveGames/0/ABC/Level.sav", 1234);

        let t = target("main");
        let path = t.level_save_path().unwrap();
        let deadline = Duration::from_secs(5);
        assert_eq!(sample_mtime(&connector, &t, &path, deadline).await, Ok(1234));
        assert_eq!(fs.close_count(), 1);

        connector.set_connect_failure("main", Some(RemoteError::Auth("bad password".into())));
        let err = sample_mtime(&connector, &t, &path, deadline).await.unwrap_err();
        assert_eq!(err.kind(), "auth");
    }

    #[tokio::test(start_paused = true)]
    async fn sample_mtime_gives_up_on_a_silent_host() {
        let connector = MemoryConnector::new();
        let (_, fs) = connector.add("main");
        fs.set_unresponsive(true);

        let t = target("main");
        let path = t.level_save_path().unwrap();
        let err = sample_mtime(&connector, &t, &path, Duration::from_secs(60))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "transport");
    }
}
