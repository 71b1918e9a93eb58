use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use berth_common::WorkerIdentity;

use crate::registry::{NodeHandle, NodeRegistry};

/// How long to wait for a started container's agent to connect.
/// The total bound is `poll_interval * max_attempts`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessPolicy {
    pub poll_interval: Duration,
    pub max_attempts: u32,
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1000),
            max_attempts: 60,
        }
    }
}

impl ReadinessPolicy {
    /// At least one attempt is always made.
    pub fn new(poll_interval: Duration, max_attempts: u32) -> Self {
        Self {
            poll_interval,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn budget(&self) -> Duration {
        self.poll_interval.saturating_mul(self.max_attempts)
    }
}

pub enum Readiness {
    Online(Arc<dyn NodeHandle>),
    /// The node record disappeared; `attempt` is the poll that noticed.
    Vanished { attempt: u32 },
    TimedOut { attempts: u32, waited: Duration },
    Cancelled,
}

/// Poll the registry until the node's channel reports online.
///
/// Each attempt first sleeps one interval, then looks the node up. A missing
/// node ends the wait immediately; a failed lookup only costs the attempt.
pub async fn await_online(
    registry: &dyn NodeRegistry,
    identity: &WorkerIdentity,
    policy: &ReadinessPolicy,
    cancel: &CancellationToken,
) -> Readiness {
    let started = Instant::now();

    for attempt in 1..=policy.max_attempts {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Readiness::Cancelled,
            _ = tokio::time::sleep(policy.poll_interval) => {}
        }

        match registry.get_node(identity).await {
            Ok(None) => {
                tracing::warn!(%identity, attempt, "node removed while waiting for it to come online");
                return Readiness::Vanished { attempt };
            }
            Ok(Some(node)) => match node.connection_channel().await {
                Ok(channel) if channel.online => {
                    tracing::info!(%identity, attempt, elapsed=?started.elapsed(), "node is online");
                    return Readiness::Online(node);
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(%identity, attempt, error=%e, "failed to read connection channel");
                }
            },
            Err(e) => {
                tracing::warn!(%identity, attempt, error=%e, "node lookup failed");
            }
        }

        tracing::info!(
            %identity,
            attempt,
            max_attempts = policy.max_attempts,
            "waiting for node to come online"
        );
    }

    Readiness::TimedOut {
        attempts: policy.max_attempts,
        waited: started.elapsed(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeRegistry, Poll};
    use berth_common::PendingNode;

    async fn registered(registry: &FakeRegistry) -> WorkerIdentity {
        let identity = WorkerIdentity::generate();
        let node = PendingNode {
            identity: identity.clone(),
            image_name: "jdk17".into(),
            description: String::new(),
            remote_root: "/w".into(),
            mode: Default::default(),
            labels: vec![],
            backing_container_id: None,
        };
        registry.register_node(&node).await.unwrap();
        identity
    }

    fn fast(max_attempts: u32) -> ReadinessPolicy {
        ReadinessPolicy::new(Duration::from_millis(10), max_attempts)
    }

    #[test]
    fn test_default_policy() {
        let p = ReadinessPolicy::default();
        assert_eq!(p.poll_interval, Duration::from_secs(1));
        assert_eq!(p.max_attempts, 60);
        assert_eq!(p.budget(), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_zero_attempts_still_polls_once() {
        let policy = ReadinessPolicy::new(Duration::from_millis(10), 0);
        assert_eq!(policy.max_attempts, 1);

        let registry = FakeRegistry::default();
        let identity = registered(&registry).await;
        let out = await_online(&registry, &identity, &policy, &CancellationToken::new()).await;

        assert!(matches!(out, Readiness::Online(_)));
        assert_eq!(registry.poll_count(), 1);
    }

    #[tokio::test]
    async fn test_times_out_after_max_attempts() {
        let registry = FakeRegistry::default();
        registry.default_poll(Poll::Offline);
        let identity = registered(&registry).await;

        let started = std::time::Instant::now();
        let out = await_online(&registry, &identity, &fast(3), &CancellationToken::new()).await;

        assert!(matches!(out, Readiness::TimedOut { attempts: 3, .. }));
        assert_eq!(registry.poll_count(), 3);
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[tokio::test]
    async fn test_vanished_stops_polling() {
        let registry = FakeRegistry::default();
        registry.script(&[Poll::Offline, Poll::Absent, Poll::Offline, Poll::Offline, Poll::Offline]);
        let identity = registered(&registry).await;

        let out = await_online(&registry, &identity, &fast(5), &CancellationToken::new()).await;

        assert!(matches!(out, Readiness::Vanished { attempt: 2 }));
        assert_eq!(registry.poll_count(), 2);
    }

    #[tokio::test]
    async fn test_lookup_error_is_retried() {
        let registry = FakeRegistry::default();
        registry.script(&[Poll::Error, Poll::Offline, Poll::Online]);
        let identity = registered(&registry).await;

        let out = await_online(&registry, &identity, &fast(5), &CancellationToken::new()).await;

        let Readiness::Online(node) = out else {
            panic!("expected node to come online");
        };
        assert_eq!(node.identity(), &identity);
        assert_eq!(registry.poll_count(), 3);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_wait() {
        let registry = FakeRegistry::default();
        registry.default_poll(Poll::Offline);
        let identity = registered(&registry).await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let out = await_online(&registry, &identity, &fast(5), &cancel).await;

        assert!(matches!(out, Readiness::Cancelled));
        assert_eq!(registry.poll_count(), 0);
    }
}
