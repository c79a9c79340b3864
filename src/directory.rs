//! Tracker directory: the trackers registered in the app.
//!
//! The directory is the single owner of the tracker list. Screens get it
//! through [`AppState`](crate::state::AppState) and observe changes by
//! subscribing to a `watch` channel that always carries the latest snapshot,
//! so a slow map session only ever sees the newest list.

use serde::{Deserialize, Serialize};
use tokio::sync::{watch, RwLock};
use tracing::info;

use crate::geo::GpsFix;
use crate::markers::{MarkerEntity, TrackerAsset, TrackerId};

/// A registered tracker and its last known position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tracker {
    pub id: TrackerId,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_fix: Option<GpsFix>,
}

impl Tracker {
    pub fn new(id: &str, label: &str) -> Self {
        Self {
            id: TrackerId(id.to_string()),
            label: label.to_string(),
            last_fix: None,
        }
    }

    #[must_use]
    pub fn with_fix(mut self, fix: GpsFix) -> Self {
        self.last_fix = Some(fix);
        self
    }

    pub fn asset(&self) -> TrackerAsset {
        TrackerAsset {
            id: self.id.clone(),
            label: self.label.clone(),
        }
    }

    /// Marker entry for this tracker, `None` until a position is known.
    pub fn marker_entry(&self) -> Option<(MarkerEntity, GpsFix)> {
        self.last_fix
            .map(|fix| (MarkerEntity::TrackerAsset(self.asset()), fix))
    }
}

/// Shared, observable list of trackers.
pub struct TrackerDirectory {
    trackers: RwLock<Vec<Tracker>>,
    changes: watch::Sender<Vec<Tracker>>,
}

impl TrackerDirectory {
    pub fn new(initial: Vec<Tracker>) -> Self {
        let (changes, _) = watch::channel(initial.clone());
        Self {
            trackers: RwLock::new(initial),
            changes,
        }
    }

    /// Receiver that always holds the latest tracker list.
    pub fn subscribe(&self) -> watch::Receiver<Vec<Tracker>> {
        self.changes.subscribe()
    }

    pub async fn list(&self) -> Vec<Tracker> {
        self.trackers.read().await.clone()
    }

    pub async fn get(&self, id: &TrackerId) -> Option<Tracker> {
        self.trackers
            .read()
            .await
            .iter()
            .find(|t| &t.id == id)
            .cloned()
    }

    pub async fn len(&self) -> usize {
        self.trackers.read().await.len()
    }

    /// Register a tracker. Ids must be unique.
    pub async fn add(&self, tracker: Tracker) -> Result<(), String> {
        let mut trackers = self.trackers.write().await;
        if trackers.iter().any(|t| t.id == tracker.id) {
            return Err(format!("tracker {} already registered", tracker.id));
        }
        info!("Directory: added tracker {} ({})", tracker.id, tracker.label);
        trackers.push(tracker);
        self.publish(&trackers);
        Ok(())
    }

    /// Delete a tracker. Returns `false` if it was not registered.
    pub async fn remove(&self, id: &TrackerId) -> bool {
        let mut trackers = self.trackers.write().await;
        let Some(index) = trackers.iter().position(|t| &t.id == id) else {
            return false;
        };
        trackers.remove(index);
        info!("Directory: removed tracker {id}");
        self.publish(&trackers);
        true
    }

    /// Record a new position for a tracker. Returns `false` for unknown ids.
    pub async fn update_fix(&self, id: &TrackerId, fix: GpsFix) -> bool {
        let mut trackers = self.trackers.write().await;
        let Some(tracker) = trackers.iter_mut().find(|t| &t.id == id) else {
            return false;
        };
        tracker.last_fix = Some(fix);
        self.publish(&trackers);
        true
    }

    fn publish(&self, trackers: &[Tracker]) {
        self.changes.send_replace(trackers.to_vec());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_add_rejects_duplicate() {
        let dir = TrackerDirectory::new(vec![Tracker::new("A", "Van")]);
        assert!(dir.add(Tracker::new("A", "Other")).await.is_err());
        assert!(dir.add(Tracker::new("B", "Bike")).await.is_ok());
        assert_eq!(dir.len().await, 2);
    }

    #[tokio::test]
    async fn test_remove_unknown_is_false() {
        let dir = TrackerDirectory::new(vec![Tracker::new("A", "Van")]);
        assert!(!dir.remove(&TrackerId("Z".into())).await);
        assert!(dir.remove(&TrackerId("A".into())).await);
        assert!(dir.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_subscribers_see_latest_snapshot() {
        let dir = TrackerDirectory::new(Vec::new());
        let mut rx = dir.subscribe();
        dir.add(Tracker::new("A", "Van")).await.unwrap();
        dir.update_fix(&TrackerId("A".into()), GpsFix::new(1.0, 2.0))
            .await;

        rx.changed().await.unwrap();
        let snapshot = rx.borrow_and_update().clone();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].last_fix, Some(GpsFix::new(1.0, 2.0)));
    }

    #[test]
    fn test_marker_entry_needs_fix() {
        let tracker = Tracker::new("A", "Van");
        assert!(tracker.marker_entry().is_none());
        let (entity, fix) = tracker.with_fix(GpsFix::new(1.0, 1.0)).marker_entry().unwrap();
        assert_eq!(fix, GpsFix::new(1.0, 1.0));
        assert!(matches!(entity, MarkerEntity::TrackerAsset(a) if a.label == "Van"));
    }
}
