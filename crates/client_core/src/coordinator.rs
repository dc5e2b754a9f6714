use std::{collections::HashMap, fmt::Debug, hash::Hash, sync::Arc};

use async_trait::async_trait;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, info};

/// Authoritative server update for one entity's group membership.
/// Implemented outside the core (HTTP, IPC, test double).
#[async_trait]
pub trait GroupMutator<I, G>: Send + Sync {
    async fn apply(&self, entity_id: &I, group: &G) -> anyhow::Result<()>;
}

/// Resolution of one confirmation chain. Failures are values, never panics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationOutcome {
    pub success: bool,
    pub error: Option<String>,
}

impl MutationOutcome {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(reason.into()),
        }
    }
}

struct InFlight<G> {
    latest_target: G,
    waiters: Vec<oneshot::Sender<MutationOutcome>>,
}

/// Serializes confirming calls per entity id. The first caller for an id
/// drives the mutator; later callers that arrive before resolution only
/// update the remembered target and wait. When the in-flight call resolves
/// against a stale target, exactly one follow-up call is issued for the
/// latest one, so the entity converges to the last requested group without
/// ever having two confirming calls outstanding.
pub struct MutationCoordinator<I, G> {
    mutator: Arc<dyn GroupMutator<I, G>>,
    in_flight: Mutex<HashMap<I, InFlight<G>>>,
}

impl<I, G> MutationCoordinator<I, G>
where
    I: Clone + Eq + Hash + Debug + Send + Sync,
    G: Clone + PartialEq + Debug + Send + Sync,
{
    pub fn new(mutator: Arc<dyn GroupMutator<I, G>>) -> Self {
        Self {
            mutator,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub async fn confirm(&self, entity_id: I, target: G) -> MutationOutcome {
        let waiter = {
            let mut in_flight = self.in_flight.lock().await;
            match in_flight.get_mut(&entity_id) {
                Some(entry) => {
                    debug!(
                        entity_id = ?entity_id,
                        target = ?target,
                        "coordinator: superseding in-flight confirmation"
                    );
                    entry.latest_target = target.clone();
                    let (tx, rx) = oneshot::channel();
                    entry.waiters.push(tx);
                    Some(rx)
                }
                None => {
                    in_flight.insert(
                        entity_id.clone(),
                        InFlight {
                            latest_target: target.clone(),
                            waiters: Vec::new(),
                        },
                    );
                    None
                }
            }
        };

        match waiter {
            Some(rx) => rx
                .await
                .unwrap_or_else(|_| MutationOutcome::failed("confirmation dropped before resolving")),
            None => self.drive(entity_id, target).await,
        }
    }

    async fn drive(&self, entity_id: I, mut target: G) -> MutationOutcome {
        loop {
            let outcome = match self.mutator.apply(&entity_id, &target).await {
                Ok(()) => MutationOutcome::ok(),
                Err(err) => MutationOutcome::failed(err.to_string()),
            };

            let mut in_flight = self.in_flight.lock().await;
            let Some(entry) = in_flight.get_mut(&entity_id) else {
                return outcome;
            };
            if entry.latest_target != target {
                target = entry.latest_target.clone();
                drop(in_flight);
                info!(
                    entity_id = ?entity_id,
                    target = ?target,
                    "coordinator: target superseded while in flight, confirming latest"
                );
                continue;
            }
            if let Some(entry) = in_flight.remove(&entity_id) {
                for waiter in entry.waiters {
                    let _ = waiter.send(outcome.clone());
                }
            }
            return outcome;
        }
    }
}

#[cfg(test)]
#[path = "tests/coordinator_tests.rs"]
mod tests;
