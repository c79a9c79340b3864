#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::float_cmp)]

//! trackmap library: map core of a GPS tracker app.
//!
//! Keeps on-map markers in sync with the device's live position and with the
//! registered trackers, and owns the camera and derived map layers:
//!
//! - `watcher`: one-shot + continuous position watch with cancellation
//! - `markers`: identity-keyed marker store (upsert, replace, reconcile, hover, click)
//! - `viewport`: map init, deferred fly-to, visibility resize, 3D buildings layer
//! - `session`: single-task event loop wiring the three together
//! - `engine`: mapping engine seam and the headless in-memory engine
//! - `location`: location provider seam and track replay
//! - `directory`: observable tracker list
//! - `config`: configuration loading
//! - `state`: application state handle

pub mod config;
pub mod directory;
pub mod engine;
pub mod geo;
pub mod location;
pub mod markers;
pub mod session;
pub mod state;
pub mod viewport;
pub mod watcher;

// Re-export key types at crate root for convenience.
pub use config::Config;
pub use directory::{Tracker, TrackerDirectory};
pub use engine::MapEngine;
pub use geo::{GpsFix, Viewport};
pub use location::{LocationError, LocationProvider};
pub use markers::{MarkerEntity, MarkerRef, MarkerStore};
pub use session::{MapSession, SessionEvent, SessionHandle};
pub use state::AppState;
pub use viewport::ViewportController;
pub use watcher::{PositionWatcher, WatchHandle};
