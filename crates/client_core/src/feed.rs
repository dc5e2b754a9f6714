use std::collections::HashSet;

use chrono::{DateTime, Utc};
use shared::{
    domain::{ActivityId, AlertId},
    protocol::{ActivityPayload, AlertPayload, AlertSeverity, ServerEvent},
};
use tracing::debug;

/// Presentation-boundary caps, matching what the dashboard surfaces render.
pub const MAX_ALERTS: usize = 50;
pub const MAX_ACTIVITIES: usize = 100;

/// Anything that can flow through the snapshot/live reconciliation.
pub trait FeedEvent: Clone {
    fn event_id(&self) -> &str;
    fn occurred_at(&self) -> DateTime<Utc>;
}

impl FeedEvent for AlertPayload {
    fn event_id(&self) -> &str {
        self.alert_id.as_str()
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

impl FeedEvent for ActivityPayload {
    fn event_id(&self) -> &str {
        self.activity_id.as_str()
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// Reconciles a point-in-time snapshot with the live push stream into one
/// coherent list: newest first, no duplicate ids, and on a duplicate the
/// live copy wins. Pure and idempotent; callers cap the length themselves.
pub fn merge<T: FeedEvent>(snapshot: &[T], live: &[T]) -> Vec<T> {
    let mut seen = HashSet::with_capacity(snapshot.len() + live.len());
    let mut merged = Vec::with_capacity(snapshot.len() + live.len());
    for event in live.iter().chain(snapshot.iter()) {
        if seen.insert(event.event_id().to_owned()) {
            merged.push(event.clone());
        }
    }
    // Stable sort keeps live-before-snapshot order on timestamp ties.
    merged.sort_by(|a, b| b.occurred_at().cmp(&a.occurred_at()));
    merged
}

/// Client-side alert and activity state fed by the push channel and
/// refreshed from snapshots. Owns the read-tracking the activity bell
/// renders from.
#[derive(Debug, Default)]
pub struct FeedStore {
    alerts: Vec<AlertPayload>,
    activities: Vec<ActivityPayload>,
    read_activity_ids: HashSet<ActivityId>,
}

impl FeedStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply_event(&mut self, event: &ServerEvent) {
        match event {
            ServerEvent::Alert { alert } => self.push_alert(alert.clone()),
            ServerEvent::AlertDismissed { alert_id } => self.dismiss_alert(alert_id),
            ServerEvent::Activity { activity } => self.push_activity(activity.clone()),
            ServerEvent::ActivityRead { activity_id } => self.mark_activity_read(activity_id),
            ServerEvent::SessionReady { .. } | ServerEvent::Error(_) => {}
        }
    }

    pub fn push_alert(&mut self, alert: AlertPayload) {
        // A re-delivered alert replaces the cached copy.
        self.alerts.retain(|a| a.alert_id != alert.alert_id);
        self.alerts.insert(0, alert);
        self.alerts.truncate(MAX_ALERTS);
    }

    pub fn dismiss_alert(&mut self, alert_id: &AlertId) {
        self.alerts.retain(|a| &a.alert_id != alert_id);
    }

    pub fn prune_expired_alerts(&mut self, now: DateTime<Utc>) {
        self.alerts
            .retain(|a| a.expires_at.map_or(true, |expires_at| expires_at > now));
    }

    pub fn push_activity(&mut self, activity: ActivityPayload) {
        self.activities
            .retain(|a| a.activity_id != activity.activity_id);
        self.activities.insert(0, activity);
        self.activities.truncate(MAX_ACTIVITIES);
    }

    pub fn mark_activity_read(&mut self, activity_id: &ActivityId) {
        self.read_activity_ids.insert(activity_id.clone());
    }

    pub fn mark_all_activities_read(&mut self) {
        for activity in &self.activities {
            self.read_activity_ids.insert(activity.activity_id.clone());
        }
    }

    pub fn is_activity_read(&self, activity_id: &ActivityId) -> bool {
        self.read_activity_ids.contains(activity_id)
    }

    pub fn unread_count(&self) -> usize {
        self.activities
            .iter()
            .filter(|a| !self.read_activity_ids.contains(&a.activity_id))
            .count()
    }

    pub fn alerts(&self) -> &[AlertPayload] {
        &self.alerts
    }

    pub fn alerts_with_severity(&self, severity: AlertSeverity) -> Vec<AlertPayload> {
        self.alerts
            .iter()
            .filter(|a| a.severity == severity)
            .cloned()
            .collect()
    }

    pub fn activities(&self) -> &[ActivityPayload] {
        &self.activities
    }

    pub fn unread_activities(&self) -> Vec<ActivityPayload> {
        self.activities
            .iter()
            .filter(|a| !self.read_activity_ids.contains(&a.activity_id))
            .cloned()
            .collect()
    }

    /// Reconcile a freshly fetched alert snapshot with live state.
    pub fn merge_alert_snapshot(&mut self, snapshot: &[AlertPayload]) {
        let mut merged = merge(snapshot, &self.alerts);
        merged.truncate(MAX_ALERTS);
        debug!(total = merged.len(), "feed: merged alert snapshot");
        self.alerts = merged;
    }

    /// Reconcile a freshly fetched activity snapshot with live state.
    /// Read-tracking survives the refresh.
    pub fn merge_activity_snapshot(&mut self, snapshot: &[ActivityPayload]) {
        let mut merged = merge(snapshot, &self.activities);
        merged.truncate(MAX_ACTIVITIES);
        debug!(total = merged.len(), "feed: merged activity snapshot");
        self.activities = merged;
    }

    pub fn clear_alerts(&mut self) {
        self.alerts.clear();
    }

    pub fn clear_activities(&mut self) {
        self.activities.clear();
        self.read_activity_ids.clear();
    }
}

#[cfg(test)]
#[path = "tests/feed_tests.rs"]
mod tests;
