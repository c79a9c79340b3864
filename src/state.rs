//! Shared application state handed explicitly to every consumer.

use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tokio::sync::broadcast;

use crate::config::Config;
use crate::directory::TrackerDirectory;

/// Capacity of the session event broadcast channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Application state for trackmap.
///
/// Cloning is cheap; every clone refers to the same directory and channel.
#[derive(Clone)]
pub struct AppState {
    /// Immutable configuration loaded at startup.
    pub config: Arc<Config>,
    /// Monotonic instant when the app started (for uptime calculation).
    pub start_time: Instant,
    /// Registered trackers. The map session only reads it.
    pub directory: Arc<TrackerDirectory>,
    /// Broadcast channel for map session events (markers, camera, layers).
    pub session_events: broadcast::Sender<Value>,
}

impl AppState {
    /// Build the state, seeding the directory with the configured trackers.
    pub fn new(config: Config) -> Self {
        let directory = TrackerDirectory::new(config.trackers());
        let (session_events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            config: Arc::new(config),
            start_time: Instant::now(),
            directory: Arc::new(directory),
            session_events,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_directory_seeded_from_config() {
        let config = Config::parse(
            r#"
            [[trackers]]
            id = "TK-1"
            label = "Van"
            "#,
        )
        .unwrap();
        let state = AppState::new(config);
        let clone = state.clone();
        assert_eq!(clone.directory.len().await, 1);
        assert!(Arc::ptr_eq(&state.directory, &clone.directory));
    }
}
