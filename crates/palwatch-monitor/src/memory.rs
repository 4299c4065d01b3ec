//! In-memory remotes for tests. Built with the `test-util` feature.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use palwatch_core::{
    BoxFuture, HealthApi, PlayerList, RemoteConnector, RemoteEntry, RemoteError, RemoteFs,
    RemoteResult, ServerInfo, ServerMetrics, ServerTarget,
};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct FsState {
    files: HashMap<String, (u64, Vec<u8>)>,
    read_failures: VecDeque<RemoteError>,
    stat_failures: VecDeque<RemoteError>,
}

/// A remote filesystem backed by a map of path → (mtime, content).
///
/// Clones share the same files.
#[derive(Debug, Clone, Default)]
pub struct MemoryFs {
    state: Arc<Mutex<FsState>>,
    closes: Arc<AtomicUsize>,
    live: Arc<AtomicUsize>,
    unresponsive: Arc<AtomicBool>,
}

impl MemoryFs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace `dir/name` with `lines`, newline terminated.
    pub fn write(&self, dir: &str, name: &str, mtime: u64, lines: &[&str]) {
        let mut content = lines.join("\n");
        if !lines.is_empty() {
            content.push('\n');
        }
        let path = join(dir, name);
        lock(&self.state)
            .files
            .insert(path, (mtime, content.into_bytes()));
    }

    /// Set the mtime of `path`, creating an empty file if needed.
    pub fn touch(&self, path: &str, mtime: u64) {
        let mut state = lock(&self.state);
        let entry = state
            .files
            .entry(path.to_string())
            .or_insert_with(|| (mtime, Vec::new()));
        entry.0 = mtime;
    }

    pub fn remove(&self, path: &str) {
        lock(&self.state).files.remove(path);
    }

    pub fn fail_next_read(&self, err: RemoteError) {
        lock(&self.state).read_failures.push_back(err);
    }

    pub fn fail_next_stat(&self, err: RemoteError) {
        lock(&self.state).stat_failures.push_back(err);
    }

    /// Number of sessions closed through [`RemoteFs::close`].
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Sessions handed out by [`MemoryConnector`] and not yet dropped.
    pub fn live_sessions(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// While set, every file operation hangs without answering, like a
    /// half-open connection.
    pub fn set_unresponsive(&self, hang: bool) {
        self.unresponsive.store(hang, Ordering::SeqCst);
    }

    async fn answer(&self) {
        if self.unresponsive.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
    }
}

fn join(dir: &str, name: &str) -> String {
    let dir = dir.trim_end_matches('/');
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{dir}/{name}")
    }
}

impl RemoteFs for MemoryFs {
    fn list_dir<'a>(&'a self, path: &'a str) -> BoxFuture<'a, RemoteResult<Vec<RemoteEntry>>> {
        Box::pin(async move {
            self.answer().await;
            let prefix = format!("{}/", path.trim_end_matches('/'));
            let state = lock(&self.state);
            let entries = state
                .files
                .iter()
                .filter_map(|(p, (mtime, _))| {
                    let name = p.strip_prefix(&prefix)?;
                    (!name.contains('/')).then(|| RemoteEntry::file(name, *mtime))
                })
                .collect();
            Ok(entries)
        })
    }

    fn stat_mtime<'a>(&'a self, path: &'a str) -> BoxFuture<'a, RemoteResult<u64>> {
        Box::pin(async move {
            self.answer().await;
            let mut state = lock(&self.state);
            if let Some(err) = state.stat_failures.pop_front() {
                return Err(err);
            }
            state
                .files
                .get(path)
                .map(|(mtime, _)| *mtime)
                .ok_or_else(|| RemoteError::NotFound(path.to_string()))
        })
    }

    fn read_file<'a>(&'a self, path: &'a str) -> BoxFuture<'a, RemoteResult<Vec<u8>>> {
        Box::pin(async move {
            self.answer().await;
            let mut state = lock(&self.state);
            if let Some(err) = state.read_failures.pop_front() {
                return Err(err);
            }
            state
                .files
                .get(path)
                .map(|(_, content)| content.clone())
                .ok_or_else(|| RemoteError::NotFound(path.to_string()))
        })
    }

    fn close(self: Box<Self>) -> BoxFuture<'static, ()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Box::pin(async {})
    }
}

/// One session opened by [`MemoryConnector`]; counted live until dropped.
struct MemorySession {
    fs: MemoryFs,
}

impl MemorySession {
    fn open(fs: MemoryFs) -> Self {
        fs.live.fetch_add(1, Ordering::SeqCst);
        Self { fs }
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        self.fs.live.fetch_sub(1, Ordering::SeqCst);
    }
}

impl RemoteFs for MemorySession {
    fn list_dir<'a>(&'a self, path: &'a str) -> BoxFuture<'a, RemoteResult<Vec<RemoteEntry>>> {
        self.fs.list_dir(path)
    }

    fn stat_mtime<'a>(&'a self, path: &'a str) -> BoxFuture<'a, RemoteResult<u64>> {
        self.fs.stat_mtime(path)
    }

    fn read_file<'a>(&'a self, path: &'a str) -> BoxFuture<'a, RemoteResult<Vec<u8>>> {
        self.fs.read_file(path)
    }

    fn close(self: Box<Self>) -> BoxFuture<'static, ()> {
        self.fs.closes.fetch_add(1, Ordering::SeqCst);
        Box::pin(async {})
    }
}

/// Calls recorded by [`MemoryApi`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiCall {
    Info,
    Metrics,
    Players,
    Announce(String),
    Shutdown(u32, String),
    Kick(String, String),
}

#[derive(Debug, Default)]
struct ApiState {
    info: ServerInfo,
    metrics: ServerMetrics,
    players: PlayerList,
    calls: Vec<ApiCall>,
    failure: Option<RemoteError>,
    shutdown_failure: Option<RemoteError>,
}

/// A control API that answers from memory and records every call.
#[derive(Debug, Clone, Default)]
pub struct MemoryApi {
    state: Arc<Mutex<ApiState>>,
}

impl MemoryApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_metrics(&self, metrics: ServerMetrics) {
        lock(&self.state).metrics = metrics;
    }

    pub fn set_info(&self, info: ServerInfo) {
        lock(&self.state).info = info;
    }

    pub fn set_players(&self, players: PlayerList) {
        lock(&self.state).players = players;
    }

    /// Make every read call fail with `err` until cleared with `None`.
    pub fn set_failure(&self, err: Option<RemoteError>) {
        lock(&self.state).failure = err;
    }

    /// Make shutdown requests fail with `err` until cleared with `None`.
    pub fn set_shutdown_failure(&self, err: Option<RemoteError>) {
        lock(&self.state).shutdown_failure = err;
    }

    pub fn calls(&self) -> Vec<ApiCall> {
        lock(&self.state).calls.clone()
    }

    pub fn shutdowns(&self) -> Vec<(u32, String)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                ApiCall::Shutdown(delay, msg) => Some((delay, msg)),
                _ => None,
            })
            .collect()
    }

    fn read<T: Clone>(&self, call: ApiCall, pick: impl FnOnce(&ApiState) -> T) -> RemoteResult<T> {
        let mut state = lock(&self.state);
        state.calls.push(call);
        match &state.failure {
            Some(err) => Err(err.clone()),
            None => Ok(pick(&*state)),
        }
    }
}

impl HealthApi for MemoryApi {
    fn info(&self) -> BoxFuture<'_, RemoteResult<ServerInfo>> {
        Box::pin(async move { self.read(ApiCall::Info, |s| s.info.clone()) })
    }

    fn metrics(&self) -> BoxFuture<'_, RemoteResult<ServerMetrics>> {
        Box::pin(async move { self.read(ApiCall::Metrics, |s| s.metrics.clone()) })
    }

    fn players(&self) -> BoxFuture<'_, RemoteResult<PlayerList>> {
        Box::pin(async move { self.read(ApiCall::Players, |s| s.players.clone()) })
    }

    fn announce<'a>(&'a self, message: &'a str) -> BoxFuture<'a, RemoteResult<()>> {
        Box::pin(async move { self.read(ApiCall::Announce(message.to_string()), |_| ()) })
    }

    fn shutdown<'a>(&'a self, delay_secs: u32, message: &'a str) -> BoxFuture<'a, RemoteResult<()>> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state
                .calls
                .push(ApiCall::Shutdown(delay_secs, message.to_string()));
            match &state.shutdown_failure {
                Some(err) => Err(err.clone()),
                None => Ok(()),
            }
        })
    }

    fn kick<'a>(&'a self, user_id: &'a str, reason: &'a str) -> BoxFuture<'a, RemoteResult<()>> {
        Box::pin(async move {
            self.read(
                ApiCall::Kick(user_id.to_string(), reason.to_string()),
                |_| (),
            )
        })
    }
}

/// Hands out the same in-memory remotes for every server name registered.
#[derive(Debug, Clone, Default)]
pub struct MemoryConnector {
    remotes: Arc<Mutex<HashMap<String, (MemoryApi, MemoryFs)>>>,
    connect_failures: Arc<Mutex<HashMap<String, RemoteError>>>,
    opened: Arc<AtomicUsize>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register remotes for `server`, returning handles to inspect them.
    pub fn add(&self, server: &str) -> (MemoryApi, MemoryFs) {
        let pair = (MemoryApi::new(), MemoryFs::new());
        lock(&self.remotes).insert(server.to_string(), pair.clone());
        pair
    }

    /// Make `open_fs` fail for `server` until cleared with `None`.
    pub fn set_connect_failure(&self, server: &str, err: Option<RemoteError>) {
        let mut failures = lock(&self.connect_failures);
        match err {
            Some(err) => failures.insert(server.to_string(), err),
            None => failures.remove(server),
        };
    }

    /// Number of filesystem sessions opened so far.
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    fn pair(&self, server: &str) -> (MemoryApi, MemoryFs) {
        lock(&self.remotes)
            .entry(server.to_string())
            .or_default()
            .clone()
    }
}

impl RemoteConnector for MemoryConnector {
    fn health_api(&self, target: &ServerTarget) -> Arc<dyn HealthApi> {
        Arc::new(self.pair(&target.name).0)
    }

    fn open_fs<'a>(
        &'a self,
        target: &'a ServerTarget,
    ) -> BoxFuture<'a, RemoteResult<Box<dyn RemoteFs>>> {
        Box::pin(async move {
            if let Some(err) = lock(&self.connect_failures).get(&target.name) {
                return Err(err.clone());
            }
            self.opened.fetch_add(1, Ordering::SeqCst);
            let fs: Box<dyn RemoteFs> = Box::new(MemorySession::open(self.pair(&target.name).1));
            Ok(fs)
        })
    }
}
