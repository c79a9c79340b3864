//! Configuration loading and defaults.
//!
//! Configuration is resolved in order of precedence (highest wins):
//!
//! 1. **Environment variables**: `TRACKMAP_STYLE`, `TRACKMAP_TRACK_FILE`,
//!    `TRACKMAP_LOG`
//! 2. **Config file**: path via `--config <path>`, or `trackmap.toml` in CWD
//! 3. **Compiled defaults**: see each field's default value below
//!
//! The TOML file mirrors the struct hierarchy:
//!
//! ```toml
//! [map]
//! container = "map"
//! style = "mapbox://styles/mapbox/streets-v11"
//! style_file = "style.json"        # optional, layer list for the headless map
//! initial_zoom = 13.0
//! initial_latitude = 0.0
//! initial_longitude = 0.0
//! fly_to_delay_ms = 100
//!
//! [location]
//! track_file = "track.log"         # optional, fixes to replay
//! replay_interval_ms = 1000
//! grant_permission = true
//!
//! [logging]
//! level = "info"
//!
//! [[trackers]]
//! id = "TK-1"
//! label = "Van"
//! latitude = 41.15                 # optional, last known position
//! longitude = -8.61
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::directory::Tracker;
use crate::engine::MapOptions;
use crate::geo::GpsFix;

/// Config file looked up in the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "trackmap.toml";

/// Top-level configuration, deserialized from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub map: MapConfig,
    #[serde(default)]
    pub location: LocationConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Trackers registered at startup.
    #[serde(default)]
    pub trackers: Vec<TrackerConfig>,
}

/// Map instance and camera settings.
#[derive(Debug, Clone, Deserialize)]
pub struct MapConfig {
    /// Display container the map binds to (default `map`).
    #[serde(default = "default_container")]
    pub container: String,
    /// Style reference passed to the engine. Override with `TRACKMAP_STYLE`.
    #[serde(default = "default_style")]
    pub style: String,
    /// Mapbox style JSON providing the layer list of the headless map.
    pub style_file: Option<String>,
    /// Zoom level at startup (default 13).
    #[serde(default = "default_initial_zoom")]
    pub initial_zoom: f64,
    #[serde(default)]
    pub initial_latitude: f64,
    #[serde(default)]
    pub initial_longitude: f64,
    /// Delay before flying to the first fix, in milliseconds (default 100).
    #[serde(default = "default_fly_to_delay_ms")]
    pub fly_to_delay_ms: u64,
}

/// Location source settings.
#[derive(Debug, Clone, Deserialize)]
pub struct LocationConfig {
    /// Track file replayed as the device position. Override with `TRACKMAP_TRACK_FILE`.
    pub track_file: Option<String>,
    /// Milliseconds between replayed fixes (default 1000).
    #[serde(default = "default_replay_interval_ms")]
    pub replay_interval_ms: u64,
    /// Answer to the location permission request (default true).
    #[serde(default = "default_grant_permission")]
    pub grant_permission: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// tracing filter level (default `info`). Overridden by `RUST_LOG` env var.
    #[serde(default = "default_log_level")]
    pub level: String,
}

/// A tracker entry in the config file.
#[derive(Debug, Clone, Deserialize)]
pub struct TrackerConfig {
    pub id: String,
    pub label: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl TrackerConfig {
    /// Directory entry; the position is kept only when both coordinates are set.
    pub fn to_tracker(&self) -> Tracker {
        let tracker = Tracker::new(&self.id, &self.label);
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => tracker.with_fix(GpsFix::new(lat, lon)),
            _ => tracker,
        }
    }
}

fn default_container() -> String {
    "map".to_string()
}
fn default_style() -> String {
    "mapbox://styles/mapbox/streets-v11".to_string()
}
fn default_initial_zoom() -> f64 {
    13.0
}
fn default_fly_to_delay_ms() -> u64 {
    100
}
fn default_replay_interval_ms() -> u64 {
    1000
}
fn default_grant_permission() -> bool {
    true
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            container: default_container(),
            style: default_style(),
            style_file: None,
            initial_zoom: default_initial_zoom(),
            initial_latitude: 0.0,
            initial_longitude: 0.0,
            fly_to_delay_ms: default_fly_to_delay_ms(),
        }
    }
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            track_file: None,
            replay_interval_ms: default_replay_interval_ms(),
            grant_permission: default_grant_permission(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl MapConfig {
    pub fn options(&self) -> MapOptions {
        MapOptions {
            container: self.container.clone(),
            style: self.style.clone(),
            center: GpsFix::new(self.initial_latitude, self.initial_longitude),
            zoom: self.initial_zoom,
        }
    }

    pub fn fly_to_delay(&self) -> Duration {
        Duration::from_millis(self.fly_to_delay_ms)
    }
}

impl LocationConfig {
    pub fn replay_interval(&self) -> Duration {
        Duration::from_millis(self.replay_interval_ms)
    }
}

impl Config {
    /// Load configuration with the precedence chain: env vars > file > defaults.
    ///
    /// If `path` is `Some`, that file must exist. Otherwise `trackmap.toml` in
    /// the current directory is used when present.
    pub fn load(path: Option<&str>) -> Result<Self, String> {
        let mut config = match path {
            Some(p) => Self::from_file(Path::new(p))?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Self::default(),
        };

        // Env var overrides
        if let Ok(style) = std::env::var("TRACKMAP_STYLE") {
            config.map.style = style;
        }
        if let Ok(track) = std::env::var("TRACKMAP_TRACK_FILE") {
            config.location.track_file = Some(track);
        }
        if let Ok(level) = std::env::var("TRACKMAP_LOG") {
            config.logging.level = level;
        }

        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {e}", path.display()))?;
        Self::parse(&content)
            .map_err(|e| format!("Failed to parse config file {}: {e}", path.display()))
    }

    /// Parse TOML content without env overrides.
    pub fn parse(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| e.to_string())
    }

    /// Reject values the map cannot work with.
    pub fn validate(&self) -> Result<(), String> {
        let center = GpsFix::new(self.map.initial_latitude, self.map.initial_longitude);
        if !center.is_valid() {
            return Err(format!("map initial centre out of range: {center}"));
        }
        if !(0.0..=24.0).contains(&self.map.initial_zoom) {
            return Err(format!(
                "map initial_zoom must be within 0..=24, got {}",
                self.map.initial_zoom
            ));
        }
        for tracker in &self.trackers {
            if tracker.latitude.is_some() != tracker.longitude.is_some() {
                return Err(format!(
                    "tracker {} needs both latitude and longitude",
                    tracker.id
                ));
            }
            if let Some(fix) = tracker.to_tracker().last_fix {
                if !fix.is_valid() {
                    return Err(format!("tracker {} position out of range: {fix}", tracker.id));
                }
            }
        }
        Ok(())
    }

    /// Directory entries for the configured trackers.
    pub fn trackers(&self) -> Vec<Tracker> {
        self.trackers.iter().map(TrackerConfig::to_tracker).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.map.container, "map");
        assert_eq!(config.map.initial_zoom, 13.0);
        assert_eq!(config.map.fly_to_delay(), Duration::from_millis(100));
        assert!(config.location.grant_permission);
        assert_eq!(config.logging.level, "info");
        assert!(config.trackers.is_empty());
    }

    #[test]
    fn test_parse_full() {
        let config = Config::parse(
            r#"
            [map]
            style = "custom"
            initial_zoom = 10.5
            fly_to_delay_ms = 250

            [location]
            track_file = "run.log"
            grant_permission = false

            [[trackers]]
            id = "TK-1"
            label = "Van"
            latitude = 41.15
            longitude = -8.61

            [[trackers]]
            id = "TK-2"
            label = "Bike"
            "#,
        )
        .unwrap();
        assert_eq!(config.map.style, "custom");
        assert_eq!(config.map.options().zoom, 10.5);
        assert_eq!(config.location.track_file.as_deref(), Some("run.log"));
        assert!(!config.location.grant_permission);

        let trackers = config.trackers();
        assert_eq!(trackers.len(), 2);
        assert_eq!(trackers[0].last_fix, Some(GpsFix::new(41.15, -8.61)));
        assert_eq!(trackers[1].last_fix, None);
    }

    #[test]
    fn test_validate_rejects_half_position() {
        let config = Config::parse(
            r#"
            [[trackers]]
            id = "TK-1"
            label = "Van"
            latitude = 41.15
            "#,
        )
        .unwrap();
        assert!(config.validate().unwrap_err().contains("TK-1"));
    }

    #[test]
    fn test_validate_rejects_bad_zoom() {
        let config = Config::parse("[map]\ninitial_zoom = 40.0\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_missing_file_fails() {
        let err = Config::load(Some("/nonexistent/trackmap.toml")).unwrap_err();
        assert!(err.contains("Failed to read config file"));
    }
}
