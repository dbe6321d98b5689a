//! Alert dispatch.
//!
//! Consumes committed transition events and turns episode boundaries into
//! mail: one down alert per `Up -> Down`, one recovery per `Down -> Up`.
//! Recovery is always sent, whether or not the down alert was delivered, so
//! an outage can never end silently unacknowledged. Delivery runs on its own
//! task with bounded retries; a slow or broken mailer never touches the
//! polling path and never causes an event to be processed twice.

mod mailer;

pub use mailer::*;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::monitor::{Status, StatusRegistry, TransitionEvent};

/// Bounded retry schedule for mail delivery.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_secs(2),
        }
    }
}

/// The alert dispatcher. Owns the notification side of the event stream.
pub struct AlertDispatcher;

impl AlertDispatcher {
    /// Spawn the dispatch loop. It runs until the event channel closes.
    pub fn start(
        notifier: Arc<dyn Notifier>,
        registry: Arc<StatusRegistry>,
        rx: mpsc::Receiver<TransitionEvent>,
        policy: RetryPolicy,
    ) -> JoinHandle<()> {
        tokio::spawn(run_dispatch_loop(notifier, registry, rx, policy))
    }
}

async fn run_dispatch_loop(
    notifier: Arc<dyn Notifier>,
    registry: Arc<StatusRegistry>,
    mut rx: mpsc::Receiver<TransitionEvent>,
    policy: RetryPolicy,
) {
    while let Some(event) = rx.recv().await {
        handle_event(notifier.as_ref(), &registry, &event, &policy).await;
    }
    tracing::debug!("Alert dispatcher: event channel closed");
}

async fn handle_event(
    notifier: &dyn Notifier,
    registry: &StatusRegistry,
    event: &TransitionEvent,
    policy: &RetryPolicy,
) {
    match (event.from, event.to) {
        (Status::Up, Status::Down) => {
            if registry.is_alerted(&event.address) {
                // Redelivered event for an episode that already got its mail.
                tracing::debug!("Alert for {} already sent this episode", event.address);
                return;
            }
            let subject = format!("[ALERT] Controller {} offline", event.address);
            let body = format!(
                "Controller {} has been unreachable since {}.",
                event.address,
                event.occurred_at.format("%Y-%m-%d %H:%M:%S UTC"),
            );
            if deliver_with_retry(notifier, policy, &subject, &body).await {
                registry.mark_alerted(&event.address, true);
                tracing::info!("Alert email sent for {}", event.address);
            }
        }
        (Status::Down, Status::Up) => {
            let subject = format!("[RECOVERED] Controller {} back online", event.address);
            let body = format!(
                "Controller {} is reachable again at {}.",
                event.address,
                event.occurred_at.format("%Y-%m-%d %H:%M:%S UTC"),
            );
            if deliver_with_retry(notifier, policy, &subject, &body).await {
                tracing::info!("Recovery email sent for {}", event.address);
            }
            registry.mark_alerted(&event.address, false);
        }
        _ => {
            // Unknown -> Up/Down baselines (first observation after start)
            // are logged by the scheduler but never mailed.
        }
    }
}

/// Try delivery up to `policy.attempts` times with doubling backoff. A final
/// failure is logged and the notification is dropped; it is never re-queued.
async fn deliver_with_retry(
    notifier: &dyn Notifier,
    policy: &RetryPolicy,
    subject: &str,
    body: &str,
) -> bool {
    let mut delay = policy.base_delay;
    for attempt in 1..=policy.attempts {
        match notifier.notify(subject, body).await {
            Ok(()) => return true,
            Err(e) => {
                tracing::warn!(
                    "Failed to send {:?} (attempt {}/{}): {}",
                    subject,
                    attempt,
                    policy.attempts,
                    e
                );
                if attempt < policy.attempts {
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
            }
        }
    }
    tracing::error!("Giving up on notification {:?} after {} attempts", subject, policy.attempts);
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Notifier that fails the first `fail_first` calls, then succeeds.
    struct FlakyNotifier {
        fail_first: usize,
        calls: AtomicUsize,
        delivered: AtomicUsize,
    }

    impl FlakyNotifier {
        fn new(fail_first: usize) -> Self {
            Self {
                fail_first,
                calls: AtomicUsize::new(0),
                delivered: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Notifier for FlakyNotifier {
        async fn notify(&self, _subject: &str, _body: &str) -> Result<(), NotifyError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first {
                Err(NotifyError::Status(503))
            } else {
                self.delivered.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            attempts: 3,
            base_delay: Duration::from_millis(5),
        }
    }

    fn down_event(address: &str) -> TransitionEvent {
        TransitionEvent {
            address: address.to_string(),
            from: Status::Up,
            to: Status::Down,
            occurred_at: Utc::now(),
        }
    }

    fn up_event(address: &str) -> TransitionEvent {
        TransitionEvent {
            address: address.to_string(),
            from: Status::Down,
            to: Status::Up,
            occurred_at: Utc::now(),
        }
    }

    fn down_registry(address: &str) -> Arc<StatusRegistry> {
        let registry = Arc::new(StatusRegistry::new(
            &[address.to_string()],
            Duration::from_secs(0),
        ));
        registry.observe(address, Status::Down, Utc::now());
        registry
    }

    #[tokio::test]
    async fn test_down_alert_delivered_once_after_retries() {
        let notifier = Arc::new(FlakyNotifier::new(2));
        let registry = down_registry("10.0.0.1");
        let (tx, rx) = mpsc::channel(4);

        let handle =
            AlertDispatcher::start(notifier.clone(), registry.clone(), rx, fast_policy());

        tx.send(down_event("10.0.0.1")).await.unwrap();
        drop(tx);
        handle.await.unwrap();

        // Two failures, then exactly one successful delivery.
        assert_eq!(notifier.calls.load(Ordering::SeqCst), 3);
        assert_eq!(notifier.delivered.load(Ordering::SeqCst), 1);
        assert!(registry.is_alerted("10.0.0.1"));
    }

    #[tokio::test]
    async fn test_alerted_episode_gets_no_second_mail() {
        let notifier = Arc::new(FlakyNotifier::new(0));
        let registry = down_registry("10.0.0.1");
        let (tx, rx) = mpsc::channel(4);

        let handle =
            AlertDispatcher::start(notifier.clone(), registry.clone(), rx, fast_policy());

        tx.send(down_event("10.0.0.1")).await.unwrap();
        // Same episode, redelivered (e.g. a restart replaying the queue).
        tx.send(down_event("10.0.0.1")).await.unwrap();
        drop(tx);
        handle.await.unwrap();

        assert_eq!(notifier.delivered.load(Ordering::SeqCst), 1);
        assert!(registry.is_alerted("10.0.0.1"));
    }

    #[tokio::test]
    async fn test_delivery_failure_is_dropped_not_retried_forever() {
        let notifier = Arc::new(FlakyNotifier::new(usize::MAX));
        let registry = down_registry("10.0.0.1");
        let (tx, rx) = mpsc::channel(4);

        let handle =
            AlertDispatcher::start(notifier.clone(), registry.clone(), rx, fast_policy());

        tx.send(down_event("10.0.0.1")).await.unwrap();
        drop(tx);
        handle.await.unwrap();

        assert_eq!(notifier.calls.load(Ordering::SeqCst), 3);
        assert_eq!(notifier.delivered.load(Ordering::SeqCst), 0);
        // No delivery, no alerted flag: history still has the record and the
        // transition was logged, but the episode never becomes "alerted".
        assert!(!registry.is_alerted("10.0.0.1"));
    }

    #[tokio::test]
    async fn test_recovery_sent_even_without_prior_alert() {
        let notifier = Arc::new(FlakyNotifier::new(0));
        let registry = Arc::new(StatusRegistry::new(
            &["10.0.0.1".to_string()],
            Duration::from_secs(0),
        ));
        let (tx, rx) = mpsc::channel(4);

        let handle =
            AlertDispatcher::start(notifier.clone(), registry.clone(), rx, fast_policy());

        // Down -> Up without any delivered down alert: the chosen policy is
        // "always notify recovery".
        tx.send(up_event("10.0.0.1")).await.unwrap();
        drop(tx);
        handle.await.unwrap();

        assert_eq!(notifier.delivered.load(Ordering::SeqCst), 1);
        assert!(!registry.is_alerted("10.0.0.1"));
    }

    #[tokio::test]
    async fn test_baseline_transitions_send_nothing() {
        let notifier = Arc::new(FlakyNotifier::new(0));
        let registry = Arc::new(StatusRegistry::new(
            &["10.0.0.1".to_string()],
            Duration::from_secs(0),
        ));
        let (tx, rx) = mpsc::channel(4);

        let handle =
            AlertDispatcher::start(notifier.clone(), registry.clone(), rx, fast_policy());

        tx.send(TransitionEvent {
            address: "10.0.0.1".to_string(),
            from: Status::Unknown,
            to: Status::Down,
            occurred_at: Utc::now(),
        })
        .await
        .unwrap();
        tx.send(TransitionEvent {
            address: "10.0.0.1".to_string(),
            from: Status::Unknown,
            to: Status::Up,
            occurred_at: Utc::now(),
        })
        .await
        .unwrap();
        drop(tx);
        handle.await.unwrap();

        assert_eq!(notifier.calls.load(Ordering::SeqCst), 0);
    }
}
