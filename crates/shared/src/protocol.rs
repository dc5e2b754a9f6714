use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    domain::{ActivityId, AlertId, ProjectId, UserId},
    error::ApiError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Critical,
    Warning,
    Info,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertEntityKind {
    Project,
    Ticket,
    Client,
    Sprint,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertPayload {
    pub alert_id: AlertId,
    pub severity: AlertSeverity,
    pub title: String,
    pub message: String,
    pub entity_kind: AlertEntityKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_url: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Ticket,
    Project,
    Client,
    File,
    Comment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityAction {
    Created,
    Updated,
    Deleted,
    Assigned,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityPayload {
    pub activity_id: ActivityId,
    pub kind: ActivityKind,
    pub action: ActivityAction,
    pub title: String,
    pub description: String,
    pub user_id: UserId,
    pub user_name: String,
    pub entity_id: String,
    pub entity_name: String,
    pub created_at: DateTime<Utc>,
}

/// Events pushed by the server over the live channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerEvent {
    Alert {
        alert: AlertPayload,
    },
    AlertDismissed {
        alert_id: AlertId,
    },
    Activity {
        activity: ActivityPayload,
    },
    ActivityRead {
        activity_id: ActivityId,
    },
    SessionReady {
        user_id: UserId,
        rooms: Vec<String>,
    },
    Error(ApiError),
}

/// Commands the client sends back over the live channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientCommand {
    DismissAlert {
        alert_id: AlertId,
    },
    SnoozeAlert {
        alert_id: AlertId,
        duration_ms: u64,
    },
    MarkActivityRead {
        activity_id: ActivityId,
    },
    SubscribeProject {
        project_id: ProjectId,
    },
    UnsubscribeProject {
        project_id: ProjectId,
    },
}
