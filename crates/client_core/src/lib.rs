//! Client-side core for the operations dashboard: optimistic board
//! mutations, snapshot/live feed reconciliation, and push-channel
//! supervision. UI layers subscribe to the outputs and call in; they never
//! own the state.

use std::sync::{Arc, Mutex};

use shared::{
    domain::{ActivityId, AlertId, ProjectId, UserId},
    protocol::{ActivityPayload, AlertPayload, ClientCommand, ServerEvent},
};
use tokio::{
    sync::broadcast,
    task::JoinHandle,
};
use tokio_stream::wrappers::BroadcastStream;
use tracing::warn;

pub mod board;
pub mod boards;
pub mod connection;
pub mod coordinator;
pub mod feed;
pub mod http;
pub mod transport;

pub use board::{BoardEngine, BoardEntity, BoardEvent, MoveResult, MoveStatus};
pub use boards::{ClientBoard, ProjectBoard, TicketBoard};
pub use connection::{ConnectionState, ConnectionSupervisor, PushSession, PushTransport, RetryPolicy};
pub use coordinator::{GroupMutator, MutationCoordinator, MutationOutcome};
pub use feed::{merge, FeedEvent, FeedStore};
pub use http::{HttpGroupMutator, HttpSnapshotFetcher, SnapshotFetcher};
pub use transport::WebSocketTransport;

const CLIENT_EVENT_CAPACITY: usize = 256;

/// What the dashboard shell observes: connection status for the indicator,
/// feed updates for the bell and banners.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    Connection(ConnectionState),
    AlertReceived(AlertPayload),
    AlertDismissed(AlertId),
    ActivityReceived(ActivityPayload),
    ActivityRead(ActivityId),
    SessionReady { user_id: UserId, rooms: Vec<String> },
    FeedsRefreshed,
    Error(String),
}

/// Ties the push channel, the feed store, and the snapshot fetcher into one
/// long-lived client. Board engines are created separately per board view
/// (see [`boards`]) and share nothing with this shell.
pub struct DashboardClient {
    supervisor: Arc<ConnectionSupervisor>,
    fetcher: Arc<dyn SnapshotFetcher>,
    feeds: Mutex<FeedStore>,
    events: broadcast::Sender<ClientEvent>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl DashboardClient {
    pub fn new(
        transport: Arc<dyn PushTransport>,
        fetcher: Arc<dyn SnapshotFetcher>,
        policy: RetryPolicy,
    ) -> Arc<Self> {
        Arc::new(Self {
            supervisor: ConnectionSupervisor::new(transport, policy),
            fetcher,
            feeds: Mutex::new(FeedStore::new()),
            events: broadcast::channel(CLIENT_EVENT_CAPACITY).0,
            pump: Mutex::new(None),
        })
    }

    /// Connects the push channel and starts routing pushed events into the
    /// feed store. Idempotent while already running.
    pub async fn connect(self: &Arc<Self>) {
        // Subscribe before the supervisor starts so nothing pushed during
        // the first session is missed.
        self.start_pump();
        self.supervisor.connect().await;
    }

    fn start_pump(self: &Arc<Self>) {
        let mut pump = self.lock_pump();
        if pump.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }
        let client = Arc::clone(self);
        let mut transitions = self.supervisor.subscribe_transitions();
        let mut pushed = self.supervisor.subscribe_events();
        *pump = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    transition = transitions.recv() => match transition {
                        Ok(state) => {
                            let _ = client.events.send(ClientEvent::Connection(state));
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "connection transitions lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    event = pushed.recv() => match event {
                        Ok(event) => client.route_event(event),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "push events lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        }));
    }

    pub async fn disconnect(&self) {
        self.supervisor.disconnect().await;
        if let Some(task) = self.lock_pump().take() {
            task.abort();
        }
        let _ = self
            .events
            .send(ClientEvent::Connection(ConnectionState::Disconnected));
    }

    fn route_event(&self, event: ServerEvent) {
        self.lock_feeds().apply_event(&event);
        let out = match event {
            ServerEvent::Alert { alert } => ClientEvent::AlertReceived(alert),
            ServerEvent::AlertDismissed { alert_id } => ClientEvent::AlertDismissed(alert_id),
            ServerEvent::Activity { activity } => ClientEvent::ActivityReceived(activity),
            ServerEvent::ActivityRead { activity_id } => ClientEvent::ActivityRead(activity_id),
            ServerEvent::SessionReady { user_id, rooms } => {
                ClientEvent::SessionReady { user_id, rooms }
            }
            ServerEvent::Error(err) => ClientEvent::Error(err.message),
        };
        let _ = self.events.send(out);
    }

    /// Pulls fresh feed snapshots and reconciles them with live state.
    pub async fn refresh_feeds(&self) -> anyhow::Result<()> {
        let alerts = self.fetcher.fetch_alerts().await?;
        let activities = self.fetcher.fetch_activities().await?;
        {
            let mut feeds = self.lock_feeds();
            feeds.merge_alert_snapshot(&alerts);
            feeds.merge_activity_snapshot(&activities);
        }
        let _ = self.events.send(ClientEvent::FeedsRefreshed);
        Ok(())
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.supervisor.state()
    }

    pub fn watch_connection(&self) -> tokio::sync::watch::Receiver<ConnectionState> {
        self.supervisor.watch_state()
    }

    pub fn alerts(&self) -> Vec<AlertPayload> {
        self.lock_feeds().alerts().to_vec()
    }

    pub fn activities(&self) -> Vec<ActivityPayload> {
        self.lock_feeds().activities().to_vec()
    }

    pub fn unread_activity_count(&self) -> usize {
        self.lock_feeds().unread_count()
    }

    /// Dismisses locally right away and notifies the server if connected.
    pub async fn dismiss_alert(&self, alert_id: &AlertId) {
        self.lock_feeds().dismiss_alert(alert_id);
        let _ = self
            .events
            .send(ClientEvent::AlertDismissed(alert_id.clone()));
        self.supervisor
            .send_command(ClientCommand::DismissAlert {
                alert_id: alert_id.clone(),
            })
            .await;
    }

    pub async fn snooze_alert(&self, alert_id: &AlertId, duration_ms: u64) {
        self.lock_feeds().dismiss_alert(alert_id);
        let _ = self
            .events
            .send(ClientEvent::AlertDismissed(alert_id.clone()));
        self.supervisor
            .send_command(ClientCommand::SnoozeAlert {
                alert_id: alert_id.clone(),
                duration_ms,
            })
            .await;
    }

    pub async fn mark_activity_read(&self, activity_id: &ActivityId) {
        self.lock_feeds().mark_activity_read(activity_id);
        self.supervisor
            .send_command(ClientCommand::MarkActivityRead {
                activity_id: activity_id.clone(),
            })
            .await;
    }

    pub async fn mark_all_activities_read(&self) {
        let unread: Vec<ActivityId> = {
            let feeds = self.lock_feeds();
            feeds
                .unread_activities()
                .into_iter()
                .map(|a| a.activity_id)
                .collect()
        };
        for activity_id in unread {
            self.mark_activity_read(&activity_id).await;
        }
    }

    pub async fn subscribe_project(&self, project_id: &ProjectId) -> bool {
        self.supervisor
            .send_command(ClientCommand::SubscribeProject {
                project_id: project_id.clone(),
            })
            .await
    }

    pub async fn unsubscribe_project(&self, project_id: &ProjectId) -> bool {
        self.supervisor
            .send_command(ClientCommand::UnsubscribeProject {
                project_id: project_id.clone(),
            })
            .await
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    pub fn event_stream(&self) -> BroadcastStream<ClientEvent> {
        BroadcastStream::new(self.events.subscribe())
    }

    fn lock_feeds(&self) -> std::sync::MutexGuard<'_, FeedStore> {
        self.feeds.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_pump(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.pump.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
