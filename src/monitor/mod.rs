//! Per-controller health state machine.
//!
//! Each monitored address owns a [`ControllerState`] that folds a noisy
//! stream of reachability samples into a debounced Up/Down status. A status
//! change only commits once the disagreeing signal has persisted for the
//! configured grace period; a single bad sample never flips anything.
//!
//! This module is pure state + transition logic. Probing, alerting, and
//! persistence live elsewhere and consume the [`TransitionEvent`]s emitted
//! here.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Confirmed status of a controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Unknown,
    Up,
    Down,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Unknown => "unknown",
            Status::Up => "up",
            Status::Down => "down",
        }
    }

    pub fn parse(s: &str) -> Option<Status> {
        match s {
            "unknown" => Some(Status::Unknown),
            "up" => Some(Status::Up),
            "down" => Some(Status::Down),
            _ => None,
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A committed status change for one controller.
///
/// Emitted exactly once per commit and consumed independently by the alert
/// dispatcher and the history writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionEvent {
    pub address: String,
    pub from: Status,
    pub to: Status,
    pub occurred_at: DateTime<Utc>,
}

/// State machine for a single controller.
#[derive(Debug)]
pub struct ControllerState {
    address: String,
    status: Status,
    status_since: DateTime<Utc>,
    /// First disagreeing sample since the last confirmed status, if any.
    pending_since: Option<DateTime<Utc>>,
    last_seen_up: Option<DateTime<Utc>>,
    last_seen_down: Option<DateTime<Utc>>,
    /// Whether a down alert was delivered for the current down episode.
    alerted: bool,
    grace: Duration,
}

impl ControllerState {
    pub fn new(address: String, grace: Duration, now: DateTime<Utc>) -> Self {
        Self {
            address,
            status: Status::Unknown,
            status_since: now,
            pending_since: None,
            last_seen_up: None,
            last_seen_down: None,
            alerted: false,
            grace,
        }
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn alerted(&self) -> bool {
        self.alerted
    }

    /// Feed one observed sample (`Up` or `Down`, never `Unknown`) into the
    /// state machine. Returns a transition event iff a status change commits.
    ///
    /// Rules:
    /// - `Unknown` status commits to the first observation immediately;
    ///   there is no known-good prior state to protect.
    /// - A sample agreeing with the confirmed status clears any pending
    ///   streak. Flapping earns no credit.
    /// - A disagreeing sample starts a pending streak, and commits once the
    ///   streak has lasted at least the grace period.
    pub fn observe(&mut self, observed: Status, now: DateTime<Utc>) -> Option<TransitionEvent> {
        debug_assert!(observed != Status::Unknown);

        match observed {
            Status::Up => self.last_seen_up = Some(now),
            Status::Down => self.last_seen_down = Some(now),
            Status::Unknown => return None,
        }

        if self.status == Status::Unknown {
            return Some(self.commit(observed, now));
        }

        if observed == self.status {
            self.pending_since = None;
            return None;
        }

        let pending_since = *self.pending_since.get_or_insert(now);
        if now - pending_since >= self.grace {
            return Some(self.commit(observed, now));
        }

        None
    }

    /// Atomically commit a status change: status, status_since, and the
    /// pending streak move together.
    fn commit(&mut self, to: Status, now: DateTime<Utc>) -> TransitionEvent {
        let from = self.status;
        self.status = to;
        self.status_since = now;
        self.pending_since = None;
        if to == Status::Up {
            // alerted may only be true while Down.
            self.alerted = false;
        }
        TransitionEvent {
            address: self.address.clone(),
            from,
            to,
            occurred_at: now,
        }
    }
}

/// Point-in-time view of one controller, for the read-only web layer.
#[derive(Debug, Clone, Serialize)]
pub struct ControllerSnapshot {
    pub address: String,
    pub status: Status,
    pub status_since: DateTime<Utc>,
    pub last_seen_up: Option<DateTime<Utc>>,
    pub last_seen_down: Option<DateTime<Utc>>,
    pub alerted: bool,
}

/// Registry of all monitored controllers.
///
/// The address set is fixed at startup, so the map itself is immutable; each
/// entry carries its own lock. The poll loop for an address is the only
/// writer of that entry (plus the alert dispatcher flipping `alerted`), and
/// snapshot reads are safe alongside it.
pub struct StatusRegistry {
    controllers: HashMap<String, Mutex<ControllerState>>,
}

impl StatusRegistry {
    /// Build a registry for the configured address list. Every controller
    /// starts as `Unknown`; prior in-memory state never survives a restart.
    pub fn new(addresses: &[String], grace: StdDuration) -> Self {
        let grace = Duration::from_std(grace).unwrap_or(Duration::MAX);
        let now = Utc::now();
        let controllers = addresses
            .iter()
            .map(|addr| {
                (
                    addr.clone(),
                    Mutex::new(ControllerState::new(addr.clone(), grace, now)),
                )
            })
            .collect();
        Self { controllers }
    }

    /// Route a sample to its controller. Unknown addresses are ignored.
    pub fn observe(
        &self,
        address: &str,
        observed: Status,
        now: DateTime<Utc>,
    ) -> Option<TransitionEvent> {
        let state = self.controllers.get(address)?;
        let mut state = state.lock().unwrap();
        state.observe(observed, now)
    }

    /// Record whether a down alert was delivered for the current episode.
    /// A controller that is no longer Down keeps `alerted == false`.
    pub fn mark_alerted(&self, address: &str, alerted: bool) {
        if let Some(state) = self.controllers.get(address) {
            let mut state = state.lock().unwrap();
            if state.status == Status::Down || !alerted {
                state.alerted = alerted;
            }
        }
    }

    pub fn is_alerted(&self, address: &str) -> bool {
        self.controllers
            .get(address)
            .map(|s| s.lock().unwrap().alerted)
            .unwrap_or(false)
    }

    /// Current state of every controller, computed on demand.
    pub fn snapshot(&self) -> Vec<ControllerSnapshot> {
        let mut snaps: Vec<ControllerSnapshot> = self
            .controllers
            .values()
            .map(|state| {
                let state = state.lock().unwrap();
                ControllerSnapshot {
                    address: state.address.clone(),
                    status: state.status,
                    status_since: state.status_since,
                    last_seen_up: state.last_seen_up,
                    last_seen_down: state.last_seen_down,
                    alerted: state.alerted,
                }
            })
            .collect();
        snaps.sort_by(|a, b| a.address.cmp(&b.address));
        snaps
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn state(grace_secs: i64) -> ControllerState {
        ControllerState::new("10.0.0.1".to_string(), Duration::seconds(grace_secs), t(0))
    }

    #[test]
    fn test_first_sample_commits_immediately() {
        let mut s = state(300);
        let event = s.observe(Status::Up, t(0)).unwrap();
        assert_eq!(event.from, Status::Unknown);
        assert_eq!(event.to, Status::Up);
        assert_eq!(s.status(), Status::Up);

        // Unknown -> Down likewise needs no grace period.
        let mut s = state(300);
        let event = s.observe(Status::Down, t(0)).unwrap();
        assert_eq!(event.from, Status::Unknown);
        assert_eq!(event.to, Status::Down);
    }

    #[test]
    fn test_single_disagreeing_sample_never_flips() {
        let mut s = state(300);
        s.observe(Status::Up, t(0));

        assert!(s.observe(Status::Down, t(30)).is_none());
        assert_eq!(s.status(), Status::Up);
    }

    #[test]
    fn test_commit_after_grace_elapsed() {
        let mut s = state(300);
        s.observe(Status::Up, t(0));

        assert!(s.observe(Status::Down, t(30)).is_none());
        assert!(s.observe(Status::Down, t(60)).is_none());
        assert!(s.observe(Status::Down, t(300)).is_none()); // 270s of disagreement
        let event = s.observe(Status::Down, t(330)).unwrap(); // 300s
        assert_eq!(event.from, Status::Up);
        assert_eq!(event.to, Status::Down);
        assert_eq!(event.occurred_at, t(330));
    }

    #[test]
    fn test_agreeing_sample_resets_pending_streak() {
        let mut s = state(300);
        s.observe(Status::Up, t(0));

        assert!(s.observe(Status::Down, t(30)).is_none());
        assert!(s.observe(Status::Down, t(200)).is_none());
        // Recovery in the middle of the streak: no flapping credit carries over.
        assert!(s.observe(Status::Up, t(230)).is_none());
        assert!(s.observe(Status::Down, t(260)).is_none());
        assert!(s.observe(Status::Down, t(500)).is_none()); // only 240s since restart
        assert!(s.observe(Status::Down, t(560)).is_some());
    }

    #[test]
    fn test_spec_scenario_one_second_interval() {
        // interval=1s, grace=3s, outcomes [up,up,down,down,down,down,up]
        let mut s = state(3);
        let outcomes = [
            Status::Up,
            Status::Up,
            Status::Down,
            Status::Down,
            Status::Down,
            Status::Down,
            Status::Up,
        ];

        let mut events = Vec::new();
        for (i, o) in outcomes.iter().enumerate() {
            if let Some(e) = s.observe(*o, t(i as i64)) {
                events.push(e);
            }
        }

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].from, Status::Unknown);
        assert_eq!(events[0].to, Status::Up);
        assert_eq!(events[0].occurred_at, t(0));
        assert_eq!(events[1].from, Status::Up);
        assert_eq!(events[1].to, Status::Down);
        assert_eq!(events[1].occurred_at, t(5));
        // Only one up sample after the outage: no recovery commit yet.
        assert_eq!(s.status(), Status::Down);
    }

    #[test]
    fn test_replay_is_deterministic() {
        let outcomes = [
            (Status::Up, 0),
            (Status::Down, 30),
            (Status::Down, 400),
            (Status::Up, 430),
            (Status::Up, 800),
            (Status::Down, 830),
        ];

        let run = || {
            let mut s = state(300);
            outcomes
                .iter()
                .filter_map(|(o, secs)| s.observe(*o, t(*secs)))
                .collect::<Vec<_>>()
        };

        let first = run();
        let second = run();
        assert_eq!(first, second);
        assert!(!first.is_empty());
    }

    #[test]
    fn test_alerted_clears_on_recovery_commit() {
        let mut s = state(0);
        s.observe(Status::Up, t(0));
        s.observe(Status::Down, t(30));
        assert_eq!(s.status(), Status::Down);
        s.alerted = true;

        s.observe(Status::Up, t(60));
        assert_eq!(s.status(), Status::Up);
        assert!(!s.alerted());
    }

    #[test]
    fn test_registry_routes_and_snapshots() {
        let addrs = vec!["10.0.0.2".to_string(), "10.0.0.1".to_string()];
        let registry = StatusRegistry::new(&addrs, StdDuration::from_secs(300));

        let now = Utc::now();
        let event = registry.observe("10.0.0.1", Status::Up, now).unwrap();
        assert_eq!(event.to, Status::Up);
        assert!(registry.observe("10.9.9.9", Status::Up, now).is_none());

        let snaps = registry.snapshot();
        assert_eq!(snaps.len(), 2);
        assert_eq!(snaps[0].address, "10.0.0.1");
        assert_eq!(snaps[0].status, Status::Up);
        assert_eq!(snaps[1].status, Status::Unknown);
    }

    #[test]
    fn test_mark_alerted_only_sticks_while_down() {
        let addrs = vec!["10.0.0.1".to_string()];
        let registry = StatusRegistry::new(&addrs, StdDuration::from_secs(0));
        let now = Utc::now();

        registry.observe("10.0.0.1", Status::Down, now);
        registry.mark_alerted("10.0.0.1", true);
        assert!(registry.is_alerted("10.0.0.1"));

        registry.observe("10.0.0.1", Status::Up, now + Duration::seconds(1));
        assert!(!registry.is_alerted("10.0.0.1"));

        // Late delivery confirmation after recovery must not set the flag.
        registry.mark_alerted("10.0.0.1", true);
        assert!(!registry.is_alerted("10.0.0.1"));
    }
}
