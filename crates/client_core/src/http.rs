use std::fmt::Display;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use shared::{
    domain::{ClientRecord, ProjectRecord, TicketRecord},
    protocol::{ActivityPayload, AlertPayload},
};
use tracing::debug;

use crate::coordinator::GroupMutator;

/// Point-in-time reads of server state, re-invoked on explicit refresh or
/// filter change.
#[async_trait]
pub trait SnapshotFetcher: Send + Sync {
    async fn fetch_alerts(&self) -> anyhow::Result<Vec<AlertPayload>>;
    async fn fetch_activities(&self) -> anyhow::Result<Vec<ActivityPayload>>;
    async fn fetch_clients(&self) -> anyhow::Result<Vec<ClientRecord>>;
    async fn fetch_tickets(&self) -> anyhow::Result<Vec<TicketRecord>>;
    async fn fetch_projects(&self) -> anyhow::Result<Vec<ProjectRecord>>;
}

pub struct HttpSnapshotFetcher {
    http: reqwest::Client,
    base_url: String,
}

impl HttpSnapshotFetcher {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: normalize_base_url(base_url.into()),
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> anyhow::Result<T> {
        let url = format!("{}{path}", self.base_url);
        debug!(url = %url, "snapshot fetch");
        let response = self.http.get(&url).send().await?.error_for_status()?;
        Ok(response.json().await?)
    }
}

#[async_trait]
impl SnapshotFetcher for HttpSnapshotFetcher {
    async fn fetch_alerts(&self) -> anyhow::Result<Vec<AlertPayload>> {
        self.get_json("/alerts").await
    }

    async fn fetch_activities(&self) -> anyhow::Result<Vec<ActivityPayload>> {
        self.get_json("/activities").await
    }

    async fn fetch_clients(&self) -> anyhow::Result<Vec<ClientRecord>> {
        self.get_json("/clients").await
    }

    async fn fetch_tickets(&self) -> anyhow::Result<Vec<TicketRecord>> {
        self.get_json("/tickets").await
    }

    async fn fetch_projects(&self) -> anyhow::Result<Vec<ProjectRecord>> {
        self.get_json("/projects").await
    }
}

/// Confirms a group change with `PATCH /{resource}/{id}` carrying a
/// single-field JSON body, the shape the dashboard API expects.
pub struct HttpGroupMutator {
    http: reqwest::Client,
    base_url: String,
    resource: &'static str,
    field: &'static str,
}

impl HttpGroupMutator {
    pub fn new(
        base_url: impl Into<String>,
        resource: &'static str,
        field: &'static str,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: normalize_base_url(base_url.into()),
            resource,
            field,
        }
    }

    pub fn clients(base_url: impl Into<String>) -> Self {
        Self::new(base_url, "clients", "type")
    }

    pub fn tickets(base_url: impl Into<String>) -> Self {
        Self::new(base_url, "tickets", "priority")
    }

    pub fn projects(base_url: impl Into<String>) -> Self {
        Self::new(base_url, "projects", "status")
    }
}

#[async_trait]
impl<I, G> GroupMutator<I, G> for HttpGroupMutator
where
    I: Display + Send + Sync,
    G: Serialize + Send + Sync,
{
    async fn apply(&self, entity_id: &I, group: &G) -> anyhow::Result<()> {
        let url = format!("{}/{}/{}", self.base_url, self.resource, entity_id);
        let mut body = serde_json::Map::new();
        body.insert(self.field.to_string(), serde_json::to_value(group)?);
        self.http
            .patch(&url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

fn normalize_base_url(mut base_url: String) -> String {
    while base_url.ends_with('/') {
        base_url.pop();
    }
    base_url
}

#[cfg(test)]
#[path = "tests/http_tests.rs"]
mod tests;
