use std::{collections::VecDeque, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::protocol::{
    ActivityAction, ActivityKind, AlertEntityKind, AlertSeverity,
};
use tokio::time::timeout;

use super::*;

fn at(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).expect("valid timestamp")
}

fn alert(id: &str, secs: i64) -> AlertPayload {
    AlertPayload {
        alert_id: AlertId::new(id),
        severity: AlertSeverity::Warning,
        title: format!("alert {id}"),
        message: "test".to_string(),
        entity_kind: AlertEntityKind::System,
        entity_id: None,
        entity_name: None,
        action_url: None,
        created_at: at(secs),
        expires_at: None,
    }
}

fn activity(id: &str, secs: i64) -> ActivityPayload {
    ActivityPayload {
        activity_id: ActivityId::new(id),
        kind: ActivityKind::Ticket,
        action: ActivityAction::Updated,
        title: format!("activity {id}"),
        description: "test".to_string(),
        user_id: UserId::new("u1"),
        user_name: "Sam".to_string(),
        entity_id: "t1".to_string(),
        entity_name: "Ticket t1".to_string(),
        created_at: at(secs),
    }
}

/// Transport double: each connect pops the next batch of events, emits
/// them, then holds the session open. Commands sent back are recorded.
struct TestTransport {
    batches: Mutex<VecDeque<Vec<ServerEvent>>>,
    sent: Arc<Mutex<Vec<ClientCommand>>>,
}

impl TestTransport {
    fn new(batches: Vec<Vec<ServerEvent>>) -> Arc<Self> {
        Arc::new(Self {
            batches: Mutex::new(batches.into()),
            sent: Arc::new(Mutex::new(Vec::new())),
        })
    }

    fn sent(&self) -> Vec<ClientCommand> {
        self.sent.lock().expect("sent lock").clone()
    }
}

#[async_trait]
impl PushTransport for TestTransport {
    async fn open(&self) -> anyhow::Result<Box<dyn PushSession>> {
        let events = self
            .batches
            .lock()
            .expect("batches lock")
            .pop_front()
            .unwrap_or_default();
        Ok(Box::new(TestSession {
            events: events.into(),
            sent: Arc::clone(&self.sent),
        }))
    }
}

struct TestSession {
    events: VecDeque<ServerEvent>,
    sent: Arc<Mutex<Vec<ClientCommand>>>,
}

#[async_trait]
impl PushSession for TestSession {
    async fn next_event(&mut self) -> Option<ServerEvent> {
        match self.events.pop_front() {
            Some(event) => Some(event),
            None => {
                std::future::pending::<()>().await;
                None
            }
        }
    }

    async fn send(&mut self, command: ClientCommand) -> anyhow::Result<()> {
        self.sent.lock().expect("sent lock").push(command);
        Ok(())
    }

    async fn close(&mut self) {}
}

/// Snapshot double returning fixed feed contents.
struct StaticFetcher {
    alerts: Vec<AlertPayload>,
    activities: Vec<ActivityPayload>,
}

impl StaticFetcher {
    fn empty() -> Arc<Self> {
        Arc::new(Self {
            alerts: Vec::new(),
            activities: Vec::new(),
        })
    }

    fn with_alerts(alerts: Vec<AlertPayload>) -> Arc<Self> {
        Arc::new(Self {
            alerts,
            activities: Vec::new(),
        })
    }
}

#[async_trait]
impl SnapshotFetcher for StaticFetcher {
    async fn fetch_alerts(&self) -> anyhow::Result<Vec<AlertPayload>> {
        Ok(self.alerts.clone())
    }

    async fn fetch_activities(&self) -> anyhow::Result<Vec<ActivityPayload>> {
        Ok(self.activities.clone())
    }

    async fn fetch_clients(&self) -> anyhow::Result<Vec<shared::domain::ClientRecord>> {
        Ok(Vec::new())
    }

    async fn fetch_tickets(&self) -> anyhow::Result<Vec<shared::domain::TicketRecord>> {
        Ok(Vec::new())
    }

    async fn fetch_projects(&self) -> anyhow::Result<Vec<shared::domain::ProjectRecord>> {
        Ok(Vec::new())
    }
}

fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        base_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(50),
        max_attempts: None,
    }
}

async fn wait_for_event<F>(
    rx: &mut broadcast::Receiver<ClientEvent>,
    mut matches: F,
) -> ClientEvent
where
    F: FnMut(&ClientEvent) -> bool,
{
    timeout(Duration::from_secs(2), async {
        loop {
            let event = rx.recv().await.expect("event channel closed");
            if matches(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for client event")
}

async fn wait_connected(client: &Arc<DashboardClient>) {
    let mut watch = client.watch_connection();
    timeout(Duration::from_secs(2), async {
        while *watch.borrow() != ConnectionState::Connected {
            watch.changed().await.expect("supervisor gone");
        }
    })
    .await
    .expect("never connected");
}

async fn wait_for_sent(transport: &TestTransport, count: usize) -> Vec<ClientCommand> {
    timeout(Duration::from_secs(2), async {
        loop {
            let sent = transport.sent();
            if sent.len() >= count {
                return sent;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("timed out waiting for sent commands")
}

#[tokio::test]
async fn pushed_alerts_land_in_the_store_and_surface_as_events() {
    let transport = TestTransport::new(vec![vec![ServerEvent::Alert {
        alert: alert("a1", 10),
    }]]);
    let client = DashboardClient::new(transport, StaticFetcher::empty(), fast_policy());
    let mut events = client.subscribe_events();

    client.connect().await;
    let event = wait_for_event(&mut events, |e| matches!(e, ClientEvent::AlertReceived(_))).await;
    match event {
        ClientEvent::AlertReceived(alert) => assert_eq!(alert.alert_id.as_str(), "a1"),
        other => panic!("expected AlertReceived, got {other:?}"),
    }
    assert_eq!(client.alerts().len(), 1);

    client.disconnect().await;
}

#[tokio::test]
async fn refresh_reconciles_snapshot_with_live_alerts() {
    let transport = TestTransport::new(vec![vec![
        ServerEvent::Alert { alert: alert("a1", 12) },
        ServerEvent::Alert { alert: alert("a2", 15) },
    ]]);
    // The snapshot holds a stale copy of a1 plus one alert the push channel
    // never delivered.
    let fetcher = StaticFetcher::with_alerts(vec![alert("a1", 10), alert("a3", 5)]);
    let client = DashboardClient::new(transport, fetcher, fast_policy());
    let mut events = client.subscribe_events();

    client.connect().await;
    let mut received = 0;
    while received < 2 {
        wait_for_event(&mut events, |e| matches!(e, ClientEvent::AlertReceived(_))).await;
        received += 1;
    }

    client.refresh_feeds().await.expect("refresh succeeds");
    wait_for_event(&mut events, |e| matches!(e, ClientEvent::FeedsRefreshed)).await;

    let alerts = client.alerts();
    let ids: Vec<&str> = alerts.iter().map(|a| a.alert_id.as_str()).collect();
    assert_eq!(ids, vec!["a2", "a1", "a3"]);
    assert_eq!(alerts[1].created_at, at(12), "live copy beats the snapshot");

    client.disconnect().await;
}

#[tokio::test]
async fn dismissing_an_alert_is_local_first_then_notifies_the_server() {
    let transport = TestTransport::new(vec![vec![ServerEvent::Alert {
        alert: alert("a1", 10),
    }]]);
    let client = DashboardClient::new(
        transport.clone() as Arc<dyn PushTransport>,
        StaticFetcher::empty(),
        fast_policy(),
    );
    let mut events = client.subscribe_events();

    client.connect().await;
    wait_connected(&client).await;
    wait_for_event(&mut events, |e| matches!(e, ClientEvent::AlertReceived(_))).await;

    client.dismiss_alert(&AlertId::new("a1")).await;
    assert!(client.alerts().is_empty(), "removal does not wait for the server");
    wait_for_event(&mut events, |e| matches!(e, ClientEvent::AlertDismissed(_))).await;

    let sent = wait_for_sent(&transport, 1).await;
    assert!(matches!(
        &sent[0],
        ClientCommand::DismissAlert { alert_id } if alert_id.as_str() == "a1"
    ));

    client.disconnect().await;
}

#[tokio::test]
async fn snoozing_sends_the_duration() {
    let transport = TestTransport::new(vec![vec![ServerEvent::Alert {
        alert: alert("a1", 10),
    }]]);
    let client = DashboardClient::new(
        transport.clone() as Arc<dyn PushTransport>,
        StaticFetcher::empty(),
        fast_policy(),
    );
    let mut events = client.subscribe_events();

    client.connect().await;
    wait_connected(&client).await;
    wait_for_event(&mut events, |e| matches!(e, ClientEvent::AlertReceived(_))).await;

    client.snooze_alert(&AlertId::new("a1"), 60_000).await;
    assert!(client.alerts().is_empty(), "snoozed alerts leave the feed");

    let sent = wait_for_sent(&transport, 1).await;
    assert!(matches!(
        &sent[0],
        ClientCommand::SnoozeAlert { alert_id, duration_ms }
            if alert_id.as_str() == "a1" && *duration_ms == 60_000
    ));

    client.disconnect().await;
}

#[tokio::test]
async fn read_tracking_flows_through_the_client() {
    let transport = TestTransport::new(vec![vec![
        ServerEvent::Activity { activity: activity("ev1", 10) },
        ServerEvent::Activity { activity: activity("ev2", 11) },
    ]]);
    let client = DashboardClient::new(
        transport.clone() as Arc<dyn PushTransport>,
        StaticFetcher::empty(),
        fast_policy(),
    );
    let mut events = client.subscribe_events();

    client.connect().await;
    wait_connected(&client).await;
    let mut received = 0;
    while received < 2 {
        wait_for_event(&mut events, |e| matches!(e, ClientEvent::ActivityReceived(_))).await;
        received += 1;
    }
    assert_eq!(client.unread_activity_count(), 2);

    client.mark_activity_read(&ActivityId::new("ev1")).await;
    assert_eq!(client.unread_activity_count(), 1);

    client.mark_all_activities_read().await;
    assert_eq!(client.unread_activity_count(), 0);

    let sent = wait_for_sent(&transport, 2).await;
    assert!(sent
        .iter()
        .all(|c| matches!(c, ClientCommand::MarkActivityRead { .. })));

    client.disconnect().await;
}

#[tokio::test]
async fn server_errors_surface_with_their_message() {
    use shared::error::{ApiError, ErrorCode};

    let transport = TestTransport::new(vec![vec![ServerEvent::Error(ApiError::new(
        ErrorCode::RateLimited,
        "slow down",
    ))]]);
    let client = DashboardClient::new(transport, StaticFetcher::empty(), fast_policy());
    let mut events = client.subscribe_events();

    client.connect().await;
    let event = wait_for_event(&mut events, |e| matches!(e, ClientEvent::Error(_))).await;
    match event {
        ClientEvent::Error(message) => assert_eq!(message, "slow down"),
        other => panic!("expected Error, got {other:?}"),
    }

    client.disconnect().await;
}

#[tokio::test]
async fn connection_lifecycle_surfaces_as_client_events() {
    let transport = TestTransport::new(vec![Vec::new()]);
    let client = DashboardClient::new(transport, StaticFetcher::empty(), fast_policy());
    let mut events = client.subscribe_events();

    client.connect().await;
    let mut seen = Vec::new();
    while seen.last() != Some(&ConnectionState::Connected) {
        match wait_for_event(&mut events, |e| matches!(e, ClientEvent::Connection(_))).await {
            ClientEvent::Connection(state) => seen.push(state),
            other => panic!("expected Connection, got {other:?}"),
        }
    }
    assert_eq!(
        seen,
        vec![ConnectionState::Connecting, ConnectionState::Connected]
    );

    client.disconnect().await;
    assert_eq!(client.connection_state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn project_subscriptions_require_a_connection() {
    let transport = TestTransport::new(vec![Vec::new()]);
    let client = DashboardClient::new(
        transport.clone() as Arc<dyn PushTransport>,
        StaticFetcher::empty(),
        fast_policy(),
    );

    assert!(!client.subscribe_project(&ProjectId::new("p1")).await);

    client.connect().await;
    wait_connected(&client).await;
    assert!(client.subscribe_project(&ProjectId::new("p1")).await);
    let sent = wait_for_sent(&transport, 1).await;
    assert!(matches!(
        &sent[0],
        ClientCommand::SubscribeProject { project_id } if project_id.as_str() == "p1"
    ));

    client.disconnect().await;
}
