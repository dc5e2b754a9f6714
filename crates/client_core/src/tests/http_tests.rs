use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, patch},
    Json, Router,
};
use serde_json::{json, Value};
use shared::{
    domain::{ClientId, ClientType, TicketId, TicketPriority},
    protocol::{AlertEntityKind, AlertSeverity},
};
use tokio::{net::TcpListener, sync::mpsc, time::timeout};

use super::*;

fn sample_alert(id: &str) -> AlertPayload {
    AlertPayload {
        alert_id: shared::domain::AlertId::new(id),
        severity: AlertSeverity::Critical,
        title: format!("alert {id}"),
        message: "deadline at risk".to_string(),
        entity_kind: AlertEntityKind::Project,
        entity_id: Some("p1".to_string()),
        entity_name: Some("Website Redesign".to_string()),
        action_url: None,
        created_at: chrono::Utc::now(),
        expires_at: None,
    }
}

fn sample_client(id: &str) -> ClientRecord {
    ClientRecord {
        client_id: ClientId::new(id),
        name: format!("Client {id}"),
        email: format!("{id}@example.com"),
        phone: None,
        website: None,
        client_type: ClientType::Software,
        active: true,
        created_at: chrono::Utc::now(),
    }
}

#[derive(Clone)]
struct PatchState {
    patches: mpsc::UnboundedSender<(String, Value)>,
    status: StatusCode,
}

async fn patch_route(
    State(state): State<PatchState>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> StatusCode {
    let _ = state.patches.send((id, body));
    state.status
}

async fn spawn_api(
    router: Router,
) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    format!("http://{addr}")
}

fn patch_router(resource: &'static str, status: StatusCode) -> (Router, mpsc::UnboundedReceiver<(String, Value)>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let router = Router::new()
        .route(&format!("/{resource}/:id"), patch(patch_route))
        .with_state(PatchState {
            patches: tx,
            status,
        });
    (router, rx)
}

#[tokio::test]
async fn snapshot_fetcher_decodes_feeds() {
    let alerts = vec![sample_alert("a1"), sample_alert("a2")];
    let clients = vec![sample_client("c1")];
    let router = Router::new()
        .route("/alerts", get(move || async move { Json(alerts.clone()) }))
        .route("/clients", get(move || async move { Json(clients.clone()) }));
    let base_url = spawn_api(router).await;

    let fetcher = HttpSnapshotFetcher::new(&base_url);
    let fetched = fetcher.fetch_alerts().await.expect("alerts fetch");
    assert_eq!(fetched.len(), 2);
    assert_eq!(fetched[0].alert_id.as_str(), "a1");

    let fetched = fetcher.fetch_clients().await.expect("clients fetch");
    assert_eq!(fetched.len(), 1);
    assert_eq!(fetched[0].client_id.as_str(), "c1");

    // No /projects route; a 404 surfaces as an error, not an empty list.
    assert!(fetcher.fetch_projects().await.is_err());
}

#[tokio::test]
async fn client_mutator_patches_the_type_field() {
    let (router, mut patches) = patch_router("clients", StatusCode::OK);
    let base_url = spawn_api(router).await;

    let mutator = HttpGroupMutator::clients(&base_url);
    mutator
        .apply(&ClientId::new("c1"), &ClientType::Creative)
        .await
        .expect("patch succeeds");

    let (id, body) = timeout(Duration::from_secs(2), patches.recv())
        .await
        .expect("timed out waiting for patch")
        .expect("server closed");
    assert_eq!(id, "c1");
    assert_eq!(body, json!({ "type": "creative" }));
}

#[tokio::test]
async fn ticket_mutator_patches_the_priority_field() {
    let (router, mut patches) = patch_router("tickets", StatusCode::OK);
    let base_url = spawn_api(router).await;

    let mutator = HttpGroupMutator::tickets(&base_url);
    mutator
        .apply(&TicketId::new("t1"), &TicketPriority::Urgent)
        .await
        .expect("patch succeeds");

    let (id, body) = timeout(Duration::from_secs(2), patches.recv())
        .await
        .expect("timed out waiting for patch")
        .expect("server closed");
    assert_eq!(id, "t1");
    assert_eq!(body, json!({ "priority": "urgent" }));
}

#[tokio::test]
async fn http_error_statuses_fail_the_mutation() {
    let (router, _patches) = patch_router("clients", StatusCode::UNPROCESSABLE_ENTITY);
    let base_url = spawn_api(router).await;

    let mutator = HttpGroupMutator::clients(&base_url);
    let result = mutator.apply(&ClientId::new("c1"), &ClientType::Creative).await;
    assert!(result.is_err());
}

#[test]
fn base_urls_lose_trailing_slashes() {
    assert_eq!(
        normalize_base_url("http://dash.internal:4000///".to_string()),
        "http://dash.internal:4000"
    );
    assert_eq!(
        normalize_base_url("http://dash.internal".to_string()),
        "http://dash.internal"
    );
}
