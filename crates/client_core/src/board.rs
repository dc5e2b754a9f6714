use std::{
    collections::HashMap,
    fmt::Debug,
    hash::Hash,
    sync::{Arc, Mutex},
};

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::coordinator::{GroupMutator, MutationCoordinator};

const BOARD_EVENT_CAPACITY: usize = 256;

/// A draggable domain record with mutable group membership. Each board binds
/// its own record type and group enum through this trait.
pub trait BoardEntity: Clone + Send + Sync + 'static {
    type Id: Clone + Eq + Hash + Debug + Send + Sync + 'static;
    type Group: Clone + Eq + Hash + Debug + Send + Sync + 'static;

    fn id(&self) -> Self::Id;
    fn group(&self) -> Self::Group;
    fn set_group(&mut self, group: Self::Group);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveStatus {
    /// Dropped back where it started, or the drag did not match the
    /// projection; nothing changed and no call was made.
    Noop,
    /// Reordered within one group. Position is not authoritative, so no
    /// confirming call is made.
    Reordered,
    /// Cross-group move confirmed by the server.
    Committed,
    /// Confirmation failed; the entity was returned to its previous group.
    RolledBack,
    /// A newer move for the same entity took over recovery before this one
    /// resolved; this move changed nothing further.
    Superseded,
}

/// What the caller feeds its notification sink.
#[derive(Debug, Clone)]
pub struct MoveResult {
    pub status: MoveStatus,
    pub error: Option<String>,
}

impl MoveResult {
    fn local(status: MoveStatus) -> Self {
        Self {
            status,
            error: None,
        }
    }

    pub fn success(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone)]
pub enum BoardEvent<I, G> {
    Rebuilt,
    Moved { entity_id: I, from: G, to: G },
    Committed { entity_id: I, group: G },
    RolledBack { entity_id: I, group: G, error: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingStatus {
    Pending,
    Committed,
    RolledBack,
}

/// One in-flight confirmation. Created when a cross-group drag lands,
/// destroyed when the confirming call resolves. At most one per entity id.
#[derive(Debug, Clone)]
struct PendingMutation<G> {
    ticket: u64,
    previous_group: G,
    previous_index: usize,
    target_group: G,
    status: PendingStatus,
    generation: u64,
}

struct BoardState<T: BoardEntity> {
    columns: Vec<T::Group>,
    lanes: HashMap<T::Group, Vec<T>>,
    pending: HashMap<T::Id, PendingMutation<T::Group>>,
    generation: u64,
    next_ticket: u64,
}

impl<T: BoardEntity> BoardState<T> {
    fn empty_lanes(columns: &[T::Group]) -> HashMap<T::Group, Vec<T>> {
        columns
            .iter()
            .map(|group| (group.clone(), Vec::new()))
            .collect()
    }
}

/// Grouped, ordered projection of one board's entities with optimistic
/// cross-group moves. The projection is mutated only here; consumers render
/// from `columns()` snapshots and re-render on `subscribe()` events.
pub struct BoardEngine<T: BoardEntity> {
    state: Mutex<BoardState<T>>,
    coordinator: MutationCoordinator<T::Id, T::Group>,
    events: broadcast::Sender<BoardEvent<T::Id, T::Group>>,
}

impl<T: BoardEntity> BoardEngine<T> {
    pub fn new(
        columns: Vec<T::Group>,
        mutator: Arc<dyn GroupMutator<T::Id, T::Group>>,
    ) -> Self {
        let (events, _) = broadcast::channel(BOARD_EVENT_CAPACITY);
        let lanes = BoardState::<T>::empty_lanes(&columns);
        Self {
            state: Mutex::new(BoardState {
                columns,
                lanes,
                pending: HashMap::new(),
                generation: 0,
                next_ticket: 0,
            }),
            coordinator: MutationCoordinator::new(mutator),
            events,
        }
    }

    /// Wholesale rebuild from a fresh server list. Input order is preserved
    /// within each group; entities in groups the board does not display are
    /// dropped. A fresh list supersedes local optimism, so all pending
    /// mutation state is discarded.
    pub fn rebuild(&self, entities: impl IntoIterator<Item = T>) {
        {
            let mut state = self.lock_state();
            let mut lanes = BoardState::<T>::empty_lanes(&state.columns);
            for entity in entities {
                match lanes.get_mut(&entity.group()) {
                    Some(lane) => lane.push(entity),
                    None => warn!(
                        entity_id = ?entity.id(),
                        group = ?entity.group(),
                        "board: dropping entity in undisplayed group"
                    ),
                }
            }
            state.lanes = lanes;
            state.pending.clear();
            state.generation += 1;
        }
        let _ = self.events.send(BoardEvent::Rebuilt);
    }

    /// Column snapshot in canonical order, for rendering.
    pub fn columns(&self) -> Vec<(T::Group, Vec<T>)> {
        let state = self.lock_state();
        state
            .columns
            .iter()
            .map(|group| {
                let lane = state.lanes.get(group).cloned().unwrap_or_default();
                (group.clone(), lane)
            })
            .collect()
    }

    pub fn lane(&self, group: &T::Group) -> Vec<T> {
        self.lock_state()
            .lanes
            .get(group)
            .cloned()
            .unwrap_or_default()
    }

    /// Group and index of an entity, if displayed.
    pub fn locate(&self, entity_id: &T::Id) -> Option<(T::Group, usize)> {
        let state = self.lock_state();
        for group in &state.columns {
            if let Some(lane) = state.lanes.get(group) {
                if let Some(index) = lane.iter().position(|e| e.id() == *entity_id) {
                    return Some((group.clone(), index));
                }
            }
        }
        None
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BoardEvent<T::Id, T::Group>> {
        self.events.subscribe()
    }

    /// Applies a drag result. The projection is updated synchronously before
    /// any network call; cross-group moves are then confirmed through the
    /// coordinator and rolled back on failure. Never panics on a stale drag.
    pub async fn move_entity(
        &self,
        entity_id: &T::Id,
        from_group: &T::Group,
        from_index: usize,
        to_group: &T::Group,
        to_index: usize,
    ) -> MoveResult {
        if from_group == to_group && from_index == to_index {
            return MoveResult::local(MoveStatus::Noop);
        }

        let ticket = {
            let mut state = self.lock_state();

            let Some(source) = state.lanes.get_mut(from_group) else {
                return MoveResult::local(MoveStatus::Noop);
            };
            // A drag started against a projection that has since been
            // rebuilt carries stale coordinates; ignore it.
            if source.get(from_index).map(|e| e.id()) != Some(entity_id.clone()) {
                debug!(entity_id = ?entity_id, "board: stale drag coordinates, ignoring");
                return MoveResult::local(MoveStatus::Noop);
            }
            let mut entity = source.remove(from_index);

            if from_group == to_group {
                let at = to_index.min(source.len());
                source.insert(at, entity);
                drop(state);
                let _ = self.events.send(BoardEvent::Moved {
                    entity_id: entity_id.clone(),
                    from: from_group.clone(),
                    to: to_group.clone(),
                });
                return MoveResult::local(MoveStatus::Reordered);
            }

            entity.set_group(to_group.clone());
            let Some(dest) = state.lanes.get_mut(to_group) else {
                // Unknown destination column; put the entity back untouched.
                let mut entity = entity;
                entity.set_group(from_group.clone());
                if let Some(source) = state.lanes.get_mut(from_group) {
                    let at = from_index.min(source.len());
                    source.insert(at, entity);
                }
                return MoveResult::local(MoveStatus::Noop);
            };
            let at = to_index.min(dest.len());
            dest.insert(at, entity);

            let ticket = state.next_ticket;
            state.next_ticket += 1;
            let generation = state.generation;
            state.pending.insert(
                entity_id.clone(),
                PendingMutation {
                    ticket,
                    previous_group: from_group.clone(),
                    previous_index: from_index,
                    target_group: to_group.clone(),
                    status: PendingStatus::Pending,
                    generation,
                },
            );
            ticket
        };

        let _ = self.events.send(BoardEvent::Moved {
            entity_id: entity_id.clone(),
            from: from_group.clone(),
            to: to_group.clone(),
        });

        let outcome = self
            .coordinator
            .confirm(entity_id.clone(), to_group.clone())
            .await;

        self.resolve(entity_id, ticket, outcome.success, outcome.error)
    }

    fn resolve(
        &self,
        entity_id: &T::Id,
        ticket: u64,
        success: bool,
        error: Option<String>,
    ) -> MoveResult {
        let mut state = self.lock_state();

        // Only the move that owns the live pending record acts on the
        // outcome. A rebuild or a newer move of the same entity has taken
        // over in the meantime otherwise.
        let owns = state.pending.get(entity_id).is_some_and(|p| {
            p.ticket == ticket
                && p.generation == state.generation
                && p.status == PendingStatus::Pending
        });
        if !owns {
            debug!(entity_id = ?entity_id, "board: confirmation superseded, skipping resolution");
            return MoveResult {
                status: MoveStatus::Superseded,
                error,
            };
        }
        let Some(mut pending) = state.pending.remove(entity_id) else {
            return MoveResult {
                status: MoveStatus::Superseded,
                error,
            };
        };

        if success {
            pending.status = PendingStatus::Committed;
            let group = pending.target_group.clone();
            drop(state);
            info!(
                entity_id = ?entity_id,
                group = ?group,
                status = ?pending.status,
                "board: move committed"
            );
            let _ = self.events.send(BoardEvent::Committed {
                entity_id: entity_id.clone(),
                group,
            });
            return MoveResult {
                status: MoveStatus::Committed,
                error: None,
            };
        }

        pending.status = PendingStatus::RolledBack;
        let reason = error.unwrap_or_else(|| "mutation failed".to_string());

        // Locate by id, not by index: the entity may have been reordered
        // within the target lane since the drag landed. Absent entirely
        // means a benign race with a newer snapshot; never re-insert a
        // stale entity.
        let removed = state
            .lanes
            .get_mut(&pending.target_group)
            .and_then(|lane| {
                lane.iter()
                    .position(|e| e.id() == *entity_id)
                    .map(|index| lane.remove(index))
            });
        if let Some(mut entity) = removed {
            entity.set_group(pending.previous_group.clone());
            if let Some(lane) = state.lanes.get_mut(&pending.previous_group) {
                let at = pending.previous_index.min(lane.len());
                lane.insert(at, entity);
            }
        }
        let group = pending.previous_group.clone();
        drop(state);

        info!(
            entity_id = ?entity_id,
            group = ?group,
            status = ?pending.status,
            error = %reason,
            "board: move rolled back"
        );
        let _ = self.events.send(BoardEvent::RolledBack {
            entity_id: entity_id.clone(),
            group,
            error: reason.clone(),
        });
        MoveResult {
            status: MoveStatus::RolledBack,
            error: Some(reason),
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, BoardState<T>> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
#[path = "tests/board_tests.rs"]
mod tests;
