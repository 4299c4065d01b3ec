//! End-to-end worker behavior against in-memory remotes, on paused time.

use std::sync::Arc;
use std::time::Duration;

use palwatch_core::{PalwatchConfig, RemoteError, ServerMetrics, ServerTarget};
use palwatch_monitor::memory::{ApiCall, MemoryConnector};
use palwatch_monitor::{
    ChannelSink, Clock, MonitorEvent, SnapshotCache, WorkerSupervisor,
};
use tokio::sync::mpsc;

const T0: u64 = 1_700_000_000;
const LOG_DIR: &str = "Pal/Binaries/Win64/PalDefender/Logs";
const SAVE: &str = "Pal/Saved/SaveGames/0/ABC/Level.sav";

fn config(extra: &str) -> PalwatchConfig {
    let toml = format!(
        r#"
[[servers]]
name = "main"
guild_id = 7
host = "10.0.0.5"
api_password = "pw"

[servers.sftp]
username = "pal"
password = "pw"
save_path = "Pal/Saved/SaveGames/0/ABC"

{extra}
"#
    );
    PalwatchConfig::from_toml(&toml).unwrap()
}

fn only(config: PalwatchConfig) -> ServerTarget {
    config.servers.into_iter().next().unwrap()
}

/// Epoch clock that follows tokio's (paused) time.
fn paused_clock() -> Clock {
    let start = tokio::time::Instant::now();
    Arc::new(move || T0 + start.elapsed().as_secs())
}

fn supervisor(connector: &MemoryConnector) -> (WorkerSupervisor, mpsc::Receiver<MonitorEvent>) {
    let (sink, rx) = ChannelSink::channel(64);
    let sup = WorkerSupervisor::new(
        Arc::new(connector.clone()),
        Arc::new(SnapshotCache::new(Duration::from_secs(25))),
        Arc::new(sink),
    )
    .with_clock(paused_clock());
    (sup, rx)
}

fn drain(rx: &mut mpsc::Receiver<MonitorEvent>) -> Vec<MonitorEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn chat_line(who: &str, text: &str) -> String {
    format!("[Chat::Global]['{who}' (UserId=steam_{who}, IP=1.1.1.1)]: {text}")
}

#[tokio::test(start_paused = true)]
async fn relays_only_new_chat_lines() {
    let connector = MemoryConnector::new();
    let (_, fs) = connector.add("main");
    let hello = chat_line("Zoe", "old news");
    fs.write(LOG_DIR, "a.log", 1, &["boot", &hello]);

    let target = only(config(
        "[servers.save]\nenabled = false\n[servers.status]\nenabled = false",
    ));
    let (sup, mut rx) = supervisor(&connector);
    let handle = sup.start(target).await;

    // First poll at 15s establishes the baseline.
    tokio::time::sleep(Duration::from_secs(16)).await;
    assert!(drain(&mut rx).is_empty());

    let hi = chat_line("Zoe", "hi");
    let blocked = chat_line("Eve", "/adminpassword x");
    let link = chat_line("Bo", "!link ab12");
    let bye = chat_line("Zoe", "bye");
    fs.write(LOG_DIR, "a.log", 2, &["boot", &hello, &hi, &blocked, &link, &bye]);

    tokio::time::sleep(Duration::from_secs(20)).await;
    let events = drain(&mut rx);
    let texts: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            MonitorEvent::Chat(m) => Some(m.text.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(texts, vec!["hi", "bye"]);

    let links: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            MonitorEvent::Link(l) => Some(l),
            _ => None,
        })
        .collect();
    assert_eq!(links.len(), 1);
    assert_eq!(links[0].request.code, "AB12");
    assert_eq!(links[0].guild_id, 7);

    // Nothing new, nothing relayed.
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(drain(&mut rx).is_empty());

    sup.stop(&handle).await;
    assert!(connector.opened() >= 3);
    assert_eq!(fs.close_count(), connector.opened());
}

#[tokio::test(start_paused = true)]
async fn stalled_save_triggers_one_restart() {
    let connector = MemoryConnector::new();
    let (api, fs) = connector.add("main");
    fs.touch(SAVE, T0 - 3600);

    let target = only(config(
        "[servers.chat]\nenabled = false\n[servers.status]\nenabled = false",
    ));
    let (sup, mut rx) = supervisor(&connector);
    sup.start(target).await;

    // Samples at 60s steps: warm-up at 60, grace until 360, stalls at
    // 360/420/480.
    tokio::time::sleep(Duration::from_secs(490)).await;
    assert_eq!(
        api.shutdowns(),
        vec![(30, "Save stalled! Restarting in 30 seconds!".to_string())]
    );
    let restarts: Vec<_> = drain(&mut rx)
        .into_iter()
        .filter(|e| matches!(e, MonitorEvent::Restart(_)))
        .collect();
    assert_eq!(restarts.len(), 1);

    // Back in the grace period: no second restart right away.
    tokio::time::sleep(Duration::from_secs(240)).await;
    assert_eq!(api.shutdowns().len(), 1);

    sup.stop_all().await;
}

#[tokio::test(start_paused = true)]
async fn advancing_save_never_restarts() {
    let connector = MemoryConnector::new();
    let (api, fs) = connector.add("main");
    fs.touch(SAVE, T0);

    let target = only(config(
        "[servers.chat]\nenabled = false\n[servers.status]\nenabled = false",
    ));
    let (sup, _rx) = supervisor(&connector);
    sup.start(target).await;

    for step in 1..=20u64 {
        tokio::time::sleep(Duration::from_secs(60)).await;
        fs.touch(SAVE, T0 + step * 60);
    }
    assert!(api.shutdowns().is_empty());
    sup.stop_all().await;
}

#[tokio::test(start_paused = true)]
async fn unreachable_save_escalates_under_shared_policy() {
    let connector = MemoryConnector::new();
    let (api, _fs) = connector.add("main");
    connector.set_connect_failure("main", Some(RemoteError::Transport("timed out".into())));

    let target = only(config(
        "[servers.chat]\nenabled = false\n[servers.status]\nenabled = false",
    ));
    let (sup, _rx) = supervisor(&connector);
    sup.start(target).await;

    // Failures at 60/120/180 reach the threshold of 3.
    tokio::time::sleep(Duration::from_secs(190)).await;
    assert_eq!(
        api.shutdowns(),
        vec![(
            30,
            "Save check failed repeatedly. Restarting in 30 seconds.".to_string()
        )]
    );
    sup.stop_all().await;
}

#[tokio::test(start_paused = true)]
async fn servers_on_one_endpoint_share_a_status_fetch() {
    let connector = MemoryConnector::new();
    let (api_a, _) = connector.add("a");
    let (api_b, _) = connector.add("b");
    let metrics = ServerMetrics {
        current_players: 4,
        max_players: 32,
        ..ServerMetrics::default()
    };
    api_a.set_metrics(metrics.clone());
    api_b.set_metrics(metrics);

    let disabled = "[servers.chat]\nenabled = false\n[servers.save]\nenabled = false";
    let mut a = only(config(disabled));
    a.name = "a".into();
    let mut b = a.clone();
    b.name = "b".into();

    let (sup, mut rx) = supervisor(&connector);
    sup.start(a).await;
    sup.start(b).await;

    tokio::time::sleep(Duration::from_secs(181)).await;
    let statuses: Vec<_> = drain(&mut rx)
        .into_iter()
        .filter_map(|e| match e {
            MonitorEvent::Status(s) => Some(s),
            _ => None,
        })
        .collect();
    assert_eq!(statuses.len(), 2);
    assert!(statuses.iter().all(|s| s.snapshot.metrics.current_players == 4));

    let metric_calls = api_a
        .calls()
        .into_iter()
        .chain(api_b.calls())
        .filter(|c| *c == ApiCall::Metrics)
        .count();
    assert_eq!(metric_calls, 1);
    assert_eq!(sup.cache().fetch_count(), 1);

    sup.stop_all().await;
}

#[tokio::test(start_paused = true)]
async fn status_failure_keeps_worker_alive() {
    let connector = MemoryConnector::new();
    let (api, _) = connector.add("main");
    api.set_failure(Some(RemoteError::Auth("401 Unauthorized".into())));

    let target = only(config(
        "[servers.chat]\nenabled = false\n[servers.save]\nenabled = false",
    ));
    let (sup, mut rx) = supervisor(&connector);
    sup.start(target).await;

    tokio::time::sleep(Duration::from_secs(181)).await;
    assert!(drain(&mut rx).is_empty());

    api.set_failure(None);
    tokio::time::sleep(Duration::from_secs(180)).await;
    let events = drain(&mut rx);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind(), "status");
    assert!(sup.is_running("main").await);

    sup.stop_all().await;
}

#[tokio::test(start_paused = true)]
async fn stop_interrupts_workers_promptly() {
    let connector = MemoryConnector::new();
    connector.add("main");
    let (sup, _rx) = supervisor(&connector);
    let handle = sup.start(only(config(""))).await;

    let started = tokio::time::Instant::now();
    sup.stop(&handle).await;
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(sup.active().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn hung_log_read_is_retried_on_next_interval() {
    let connector = MemoryConnector::new();
    let (_, fs) = connector.add("main");
    fs.write(LOG_DIR, "a.log", 1, &["boot"]);
    fs.set_unresponsive(true);

    let target = only(config(
        "[servers.save]\nenabled = false\n[servers.status]\nenabled = false",
    ));
    let (sup, mut rx) = supervisor(&connector);
    sup.start(target).await;

    // Each poll waits out one 15s interval, then the next one starts.
    tokio::time::sleep(Duration::from_secs(3600)).await;
    assert!(connector.opened() > 100, "opened {}", connector.opened());
    assert!(fs.live_sessions() <= 1);

    // Once the host answers again the relay picks up.
    fs.set_unresponsive(false);
    tokio::time::sleep(Duration::from_secs(31)).await;
    fs.write(LOG_DIR, "a.log", 2, &["boot", &chat_line("Zoe", "back")]);
    tokio::time::sleep(Duration::from_secs(31)).await;
    let texts: Vec<_> = drain(&mut rx)
        .into_iter()
        .filter_map(|e| match e {
            MonitorEvent::Chat(m) => Some(m.text),
            _ => None,
        })
        .collect();
    assert_eq!(texts, vec!["back"]);

    sup.stop_all().await;
}

#[tokio::test(start_paused = true)]
async fn stop_cancels_in_flight_poll() {
    let connector = MemoryConnector::new();
    let (_, fs) = connector.add("main");
    fs.touch(SAVE, T0);
    fs.set_unresponsive(true);

    let (sup, _rx) = supervisor(&connector);
    let handle = sup.start(only(config(""))).await;

    // Chat polls at 15s and hangs on the log listing.
    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(connector.opened(), 1);
    assert_eq!(fs.live_sessions(), 1);

    let started = tokio::time::Instant::now();
    sup.stop(&handle).await;
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(!sup.is_running("main").await);
    assert_eq!(fs.live_sessions(), 0);
}
