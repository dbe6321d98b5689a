//! Poll scheduler: drives periodic probing of every configured address.
//!
//! Each address gets its own tokio task. Within a task, probe results are
//! awaited inline, so samples for one address are evaluated strictly in
//! order; across addresses nothing serializes, and one slow or failing
//! address can never delay another's round.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc, RwLock};

use crate::db::Store;
use crate::monitor::{Status, StatusRegistry, TransitionEvent};
use crate::probe::{ProbeOutcome, Prober};

/// Extra seconds on top of the probe timeout before the scheduler gives up
/// on a probe. Config validation keeps `timeout + margin` strictly under the
/// poll interval.
pub const PROBE_BOUND_MARGIN_SECS: u64 = 2;

/// The poll scheduler. Owns one probe loop per monitored address and fans
/// committed transitions out to the alert and history subscribers.
pub struct PollScheduler {
    registry: Arc<StatusRegistry>,
    prober: Arc<dyn Prober>,
    stop_chans: Arc<RwLock<HashMap<String, broadcast::Sender<()>>>>,
    alert_tx: mpsc::Sender<TransitionEvent>,
    history_tx: mpsc::Sender<TransitionEvent>,
    interval: Duration,
    probe_timeout: Duration,
}

impl PollScheduler {
    pub fn new(
        registry: Arc<StatusRegistry>,
        prober: Arc<dyn Prober>,
        alert_tx: mpsc::Sender<TransitionEvent>,
        history_tx: mpsc::Sender<TransitionEvent>,
        interval: Duration,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            prober,
            stop_chans: Arc::new(RwLock::new(HashMap::new())),
            alert_tx,
            history_tx,
            interval,
            probe_timeout,
        }
    }

    /// Start one poll loop per address.
    pub async fn start(&self, addresses: &[String]) {
        tracing::info!(
            "Monitoring {} controllers every {}s",
            addresses.len(),
            self.interval.as_secs(),
        );
        for address in addresses {
            self.watch_address(address.clone()).await;
        }
    }

    async fn watch_address(&self, address: String) {
        let mut stop_chans = self.stop_chans.write().await;

        if stop_chans.contains_key(&address) {
            return; // Already running (duplicate list entry)
        }

        let (stop_tx, _) = broadcast::channel(1);
        stop_chans.insert(address.clone(), stop_tx.clone());
        drop(stop_chans);

        tracing::debug!("Scheduler: watching {}", address);

        let loop_cfg = PollLoop {
            address,
            registry: self.registry.clone(),
            prober: self.prober.clone(),
            alert_tx: self.alert_tx.clone(),
            history_tx: self.history_tx.clone(),
            interval: self.interval,
            probe_timeout: self.probe_timeout,
        };

        tokio::spawn(run_poll_loop(loop_cfg, stop_tx.subscribe()));
    }

    /// Stop all poll loops. In-flight probes finish or time out on their own;
    /// no new rounds are issued.
    pub async fn shutdown(&self) {
        let mut stop_chans = self.stop_chans.write().await;
        for (address, stop_tx) in stop_chans.drain() {
            let _ = stop_tx.send(());
            tracing::debug!("Scheduler: stopped {}", address);
        }
    }
}

struct PollLoop {
    address: String,
    registry: Arc<StatusRegistry>,
    prober: Arc<dyn Prober>,
    alert_tx: mpsc::Sender<TransitionEvent>,
    history_tx: mpsc::Sender<TransitionEvent>,
    interval: Duration,
    probe_timeout: Duration,
}

/// Probe loop for a single address.
async fn run_poll_loop(cfg: PollLoop, mut stop_rx: broadcast::Receiver<()>) {
    let mut interval = tokio::time::interval(cfg.interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = stop_rx.recv() => {
                break;
            }
            _ = interval.tick() => {
                // Jitter to avoid probing every controller at the same instant.
                let jitter = rand::random::<u64>() % 100;
                tokio::time::sleep(Duration::from_millis(jitter)).await;

                let observed = probe_once(&cfg).await;
                let now = Utc::now();

                if let Some(event) = cfg.registry.observe(&cfg.address, observed, now) {
                    log_transition(&event);
                    if cfg.alert_tx.send(event.clone()).await.is_err() {
                        tracing::error!("Alert queue closed; dropping event for {}", cfg.address);
                    }
                    if cfg.history_tx.send(event).await.is_err() {
                        tracing::error!("History queue closed; dropping event for {}", cfg.address);
                    }
                }
            }
        }
    }
}

/// One bounded probe, mapped to the sample the state machine consumes.
/// Errors and timeouts count as unreachable; they must persist through the
/// grace window like any other disagreement before anything changes.
async fn probe_once(cfg: &PollLoop) -> Status {
    let probe = cfg.prober.probe(&cfg.address, cfg.probe_timeout);

    // Hard bound regardless of prober behavior, strictly under the interval.
    let bound = cfg.probe_timeout + Duration::from_secs(PROBE_BOUND_MARGIN_SECS);
    match tokio::time::timeout(bound, probe).await {
        Ok(ProbeOutcome::Reachable) => Status::Up,
        Ok(ProbeOutcome::Unreachable) => Status::Down,
        Ok(ProbeOutcome::Error) => {
            tracing::debug!("Probe error for {}; treating as unreachable", cfg.address);
            Status::Down
        }
        Err(_) => {
            tracing::debug!("Probe for {} exceeded its bound", cfg.address);
            Status::Down
        }
    }
}

fn log_transition(event: &TransitionEvent) {
    match event.to {
        Status::Down => tracing::warn!(
            "{} changed state to OFFLINE (was {})",
            event.address,
            event.from
        ),
        _ => tracing::info!(
            "{} changed state to {} (was {})",
            event.address,
            event.to.to_string().to_uppercase(),
            event.from
        ),
    }
}

/// Consume transition events and append them to the history store.
///
/// A failed append is retried a couple of times, then logged as a distinct
/// history-gap error. Store trouble never propagates into the poll loops.
pub async fn run_history_writer(mut rx: mpsc::Receiver<TransitionEvent>, store: Store) {
    const APPEND_ATTEMPTS: u32 = 3;

    while let Some(event) = rx.recv().await {
        let mut written = false;
        for attempt in 1..=APPEND_ATTEMPTS {
            match store.append_transition(&event) {
                Ok(true) => {
                    written = true;
                    break;
                }
                Ok(false) => {
                    tracing::debug!(
                        "History: duplicate transition for {} -> {} discarded",
                        event.address,
                        event.to
                    );
                    written = true;
                    break;
                }
                Err(e) => {
                    tracing::warn!(
                        "History append failed for {} (attempt {}/{}): {}",
                        event.address,
                        attempt,
                        APPEND_ATTEMPTS,
                        e
                    );
                    tokio::time::sleep(Duration::from_millis(200 * attempt as u64)).await;
                }
            }
        }
        if !written {
            tracing::error!(
                "History gap: transition {} {} -> {} at {} was not persisted",
                event.address,
                event.from,
                event.to,
                event.occurred_at
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tempfile::NamedTempFile;

    struct ScriptedProber;

    #[async_trait]
    impl Prober for ScriptedProber {
        async fn probe(&self, address: &str, _timeout: Duration) -> ProbeOutcome {
            match address {
                "fast-up" => ProbeOutcome::Reachable,
                "hung" => {
                    // Never answers; the scheduler's hard bound must kick in.
                    tokio::time::sleep(Duration::from_secs(600)).await;
                    ProbeOutcome::Reachable
                }
                _ => ProbeOutcome::Unreachable,
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_probe_does_not_block_other_addresses() {
        let addresses = vec!["fast-up".to_string(), "hung".to_string()];
        let registry = Arc::new(StatusRegistry::new(&addresses, Duration::from_secs(0)));
        let (alert_tx, mut alert_rx) = mpsc::channel(16);
        let (history_tx, mut history_rx) = mpsc::channel(16);

        let scheduler = PollScheduler::new(
            registry.clone(),
            Arc::new(ScriptedProber),
            alert_tx,
            history_tx,
            Duration::from_secs(30),
            Duration::from_secs(5),
        );
        scheduler.start(&addresses).await;

        // First round: the fast address commits Unknown -> Up immediately,
        // the hung one commits Unknown -> Down once its bound expires.
        let mut commits = Vec::new();
        for _ in 0..2 {
            let event = tokio::time::timeout(Duration::from_secs(60), alert_rx.recv())
                .await
                .expect("transition within one round")
                .expect("channel open");
            commits.push((event.address.clone(), event.to));
        }
        commits.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(
            commits,
            vec![
                ("fast-up".to_string(), Status::Up),
                ("hung".to_string(), Status::Down),
            ]
        );

        // Both events also reach the history subscriber.
        assert!(history_rx.recv().await.is_some());
        assert!(history_rx.recv().await.is_some());

        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_history_writer_appends_and_dedupes() {
        let tmp = NamedTempFile::new().unwrap();
        let store = Store::new(tmp.path()).unwrap();
        let (tx, rx) = mpsc::channel(16);

        let writer = tokio::spawn(run_history_writer(rx, store.clone()));

        let event = TransitionEvent {
            address: "10.0.0.1".to_string(),
            from: Status::Unknown,
            to: Status::Up,
            occurred_at: Utc::now(),
        };
        tx.send(event.clone()).await.unwrap();
        tx.send(event).await.unwrap(); // redelivery
        drop(tx);
        writer.await.unwrap();

        assert_eq!(store.transition_count().unwrap(), 1);
    }
}
