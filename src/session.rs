//! Map session: the event loop that keeps the map in sync.
//!
//! A [`MapSession`] owns the engine, the [`MarkerStore`] and the
//! [`ViewportController`]. Platform events arrive as [`SessionEvent`]s on one
//! channel and are handled strictly one at a time, so none of the components
//! needs locking. [`spawn_session`] wires a session to the app: it starts the
//! position watcher, forwards tracker directory snapshots and returns a
//! [`SessionHandle`] for the UI side to push pointer and layout events.
//!
//! Self-position fixes are applied in arrival order. Only the first fix
//! flagged as initial moves the camera; continuous fixes move the marker only.

use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::directory::Tracker;
use crate::engine::{MapEngine, MapOptions};
use crate::geo::GpsFix;
use crate::location::{LocationError, LocationProvider};
use crate::markers::{MarkerEntity, MarkerRef, MarkerStore, SelectCallback};
use crate::state::AppState;
use crate::viewport::{ViewportController, ViewportError, Visibility};
use crate::watcher::{PositionWatcher, WatchHandle};

/// Title of the alert shown when the device position cannot be obtained.
pub const LOCATION_ALERT_TITLE: &str = "Error";
/// Message of the alert shown when the device position cannot be obtained.
pub const LOCATION_ALERT_MESSAGE: &str = "Error getting location.";

/// Input to the session loop.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A position reading; `initial` marks the one-shot read.
    Fix { fix: GpsFix, initial: bool },
    LocationFailed(LocationError),
    /// The base map style finished loading.
    StyleLoaded,
    /// Layout check: whether the map container is attached.
    ContentCheck { attached: bool },
    PointerEnter(MarkerRef),
    PointerLeave(MarkerRef),
    Click(MarkerRef),
    /// New snapshot of the tracker directory.
    TrackersChanged(Vec<Tracker>),
    Shutdown,
}

/// Surfaces blocking, user-facing notifications.
pub trait Notifier: Send {
    fn alert(&self, title: &str, message: &str);
}

/// Notifier that only writes the alert to the log.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn alert(&self, title: &str, message: &str) {
        warn!("Alert: {title}: {message}");
    }
}

/// How tracker markers follow directory changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RefreshStrategy {
    /// Drop and recreate every tracker marker.
    #[default]
    Replace,
    /// Identity-keyed diff with minimal marker operations.
    Reconcile,
}

/// Static settings of a session.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub map: MapOptions,
    pub fly_to_delay: Duration,
    pub refresh: RefreshStrategy,
}

/// One map session.
pub struct MapSession<E> {
    engine: E,
    markers: MarkerStore,
    viewport: ViewportController,
    settings: SessionSettings,
    notifier: Box<dyn Notifier>,
    events: broadcast::Sender<Value>,
    self_marker: Option<MarkerRef>,
    flown: bool,
}

impl<E: MapEngine> MapSession<E> {
    /// Create the session and initialise the map on `engine`.
    pub fn new(
        mut engine: E,
        settings: SessionSettings,
        on_select: SelectCallback,
        notifier: Box<dyn Notifier>,
        events: broadcast::Sender<Value>,
    ) -> Result<Self, ViewportError> {
        let mut viewport = ViewportController::new();
        viewport.initialize(&mut engine, &settings.map)?;
        Ok(Self {
            engine,
            markers: MarkerStore::new(on_select),
            viewport,
            settings,
            notifier,
            events,
            self_marker: None,
            flown: false,
        })
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn markers(&self) -> &MarkerStore {
        &self.markers
    }

    pub fn viewport(&self) -> &ViewportController {
        &self.viewport
    }

    pub fn self_marker(&self) -> Option<MarkerRef> {
        self.self_marker
    }

    fn publish(&self, event: Value) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Handle one event. Returns `false` once the session should stop.
    pub fn handle(&mut self, event: SessionEvent, now: Instant) -> bool {
        match event {
            SessionEvent::Fix { fix, initial } => self.on_fix(fix, initial, now),
            SessionEvent::LocationFailed(err) => {
                warn!("Session: {err}");
                self.notifier
                    .alert(LOCATION_ALERT_TITLE, LOCATION_ALERT_MESSAGE);
                self.publish(json!({
                    "type": "location.error",
                    "reason": err.as_str(),
                    "detail": err.to_string(),
                }));
            }
            SessionEvent::StyleLoaded => match self.viewport.enable_derived_layer(&mut self.engine)
            {
                Ok(placement) => self.publish(json!({
                    "type": "layer.inserted",
                    "placement": placement,
                })),
                Err(e) => warn!("Session: derived layer not inserted: {e}"),
            },
            SessionEvent::ContentCheck { attached } => {
                if let Some(visibility) = self.viewport.on_content_check(&mut self.engine, attached)
                {
                    debug!("Session: container {visibility:?}");
                    if visibility == Visibility::Visible {
                        self.publish(json!({"type": "map.resized"}));
                    }
                }
            }
            SessionEvent::PointerEnter(r) => self.markers.pointer_enter(&mut self.engine, r),
            SessionEvent::PointerLeave(r) => self.markers.pointer_leave(&mut self.engine, r),
            SessionEvent::Click(r) => {
                if self.markers.click(r) {
                    if let Some(MarkerEntity::TrackerAsset(asset)) =
                        self.markers.get(r).map(|m| &m.context.entity)
                    {
                        self.publish(json!({
                            "type": "tracker.selected",
                            "id": asset.id.as_str(),
                        }));
                    }
                }
            }
            SessionEvent::TrackersChanged(trackers) => self.refresh_trackers(&trackers),
            SessionEvent::Shutdown => return false,
        }
        true
    }

    fn on_fix(&mut self, fix: GpsFix, initial: bool, now: Instant) {
        if !fix.is_valid() {
            warn!("Session: ignoring invalid fix {fix}");
            return;
        }
        let created = self.self_marker.is_none();
        let r = self
            .markers
            .upsert(&mut self.engine, MarkerEntity::SelfPosition, fix);
        self.self_marker = Some(r);
        if created {
            self.publish(json!({
                "type": "marker.created",
                "entity": "self",
                "latitude": fix.latitude,
                "longitude": fix.longitude,
            }));
        }

        if initial && !self.flown {
            self.flown = true;
            self.viewport.fly_to(fix, self.settings.fly_to_delay, now);
        }
    }

    fn refresh_trackers(&mut self, trackers: &[Tracker]) {
        let located = trackers.iter().filter(|t| t.last_fix.is_some()).count();
        if located < trackers.len() {
            debug!(
                "Session: {} tracker(s) without a position are not drawn",
                trackers.len() - located
            );
        }
        match self.settings.refresh {
            RefreshStrategy::Replace => {
                let refs = self.markers.replace_all(
                    &mut self.engine,
                    trackers.iter().filter_map(Tracker::marker_entry),
                );
                info!("Session: redrew {} tracker marker(s)", refs.len());
            }
            RefreshStrategy::Reconcile => {
                let changes = self.markers.reconcile(
                    &mut self.engine,
                    trackers
                        .iter()
                        .filter_map(|t| t.last_fix.map(|fix| (t.asset(), fix))),
                );
                info!("Session: {} tracker marker change(s)", changes.len());
            }
        }
        self.publish(json!({
            "type": "markers.refreshed",
            "trackers": self.markers.tracker_count(),
        }));
    }

    /// Run the pending fly-to if it is due.
    pub fn tick(&mut self, now: Instant) {
        if let Some(center) = self.viewport.fire_due(&mut self.engine, now) {
            self.publish(json!({
                "type": "camera.fly_to",
                "latitude": center.latitude,
                "longitude": center.longitude,
            }));
        }
    }

    /// Drop pending camera work and remove every marker.
    pub fn teardown(&mut self) {
        self.viewport.teardown(&mut self.engine);
        self.markers.clear(&mut self.engine);
        self.self_marker = None;
    }

    /// Process events until `Shutdown` or until every sender is gone, then
    /// tear down and hand the engine back.
    pub async fn run(mut self, mut rx: mpsc::UnboundedReceiver<SessionEvent>) -> E {
        loop {
            let deadline = self.viewport.next_deadline();
            tokio::select! {
                event = rx.recv() => {
                    let Some(event) = event else { break };
                    if !self.handle(event, Instant::now()) {
                        break;
                    }
                }
                () = sleep_until_opt(deadline) => self.tick(Instant::now()),
            }
        }
        info!("Session: shutting down");
        self.teardown();
        self.engine
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(d) => tokio::time::sleep_until(d).await,
        None => std::future::pending().await,
    }
}

/// Running session plus the tasks feeding it.
///
/// Dropping the handle stops the feeders and asks the session to tear down.
pub struct SessionHandle<E> {
    tx: mpsc::UnboundedSender<SessionEvent>,
    watch: WatchHandle,
    forwarder: JoinHandle<()>,
    task: Option<JoinHandle<E>>,
}

impl<E> SessionHandle<E> {
    /// Queue an event. Returns `false` if the session has already stopped.
    pub fn send(&self, event: SessionEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    /// Stop the watcher and the session; returns the engine after teardown.
    pub async fn shutdown(mut self) -> Result<E, String> {
        self.stop();
        let task = self.task.take().ok_or("session already stopped")?;
        task.await.map_err(|e| format!("session task failed: {e}"))
    }

    fn stop(&self) {
        self.watch.cancel();
        self.forwarder.abort();
        let _ = self.tx.send(SessionEvent::Shutdown);
    }
}

impl<E> Drop for SessionHandle<E> {
    fn drop(&mut self) {
        if self.task.is_some() {
            debug!("Session: handle dropped, stopping session");
            self.stop();
        }
    }
}

/// Start a session on `engine` fed by `provider` and the app's directory.
pub fn spawn_session<E, P>(
    state: &AppState,
    engine: E,
    provider: std::sync::Arc<P>,
    on_select: SelectCallback,
    notifier: Box<dyn Notifier>,
    refresh: RefreshStrategy,
) -> Result<SessionHandle<E>, ViewportError>
where
    E: MapEngine + Send + 'static,
    P: LocationProvider,
{
    let settings = SessionSettings {
        map: state.config.map.options(),
        fly_to_delay: state.config.map.fly_to_delay(),
        refresh,
    };
    let session = MapSession::new(
        engine,
        settings,
        on_select,
        notifier,
        state.session_events.clone(),
    )?;

    let (tx, rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(session.run(rx));

    let fix_tx = tx.clone();
    let err_tx = tx.clone();
    let watch = PositionWatcher::new(provider).start(
        move |fix, initial| {
            let _ = fix_tx.send(SessionEvent::Fix { fix, initial });
        },
        move |err| {
            let _ = err_tx.send(SessionEvent::LocationFailed(err));
        },
    );

    let mut changes = state.directory.subscribe();
    let dir_tx = tx.clone();
    let forwarder = tokio::spawn(async move {
        let initial = changes.borrow_and_update().clone();
        if dir_tx.send(SessionEvent::TrackersChanged(initial)).is_err() {
            return;
        }
        while changes.changed().await.is_ok() {
            let snapshot = changes.borrow_and_update().clone();
            if dir_tx.send(SessionEvent::TrackersChanged(snapshot)).is_err() {
                break;
            }
        }
    });

    Ok(SessionHandle {
        tx,
        watch,
        forwarder,
        task: Some(task),
    })
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::config::Config;
    use crate::engine::headless::HeadlessMap;
    use crate::location::ReplayProvider;
    use crate::markers::{MarkerContext, MarkerKey, TrackerId};
    use crate::viewport::BUILDINGS_LAYER_ID;

    #[derive(Clone, Default)]
    struct RecordingNotifier(Arc<Mutex<Vec<String>>>);

    impl Notifier for RecordingNotifier {
        fn alert(&self, title: &str, message: &str) {
            self.0.lock().unwrap().push(format!("{title}: {message}"));
        }
    }

    fn settings(refresh: RefreshStrategy) -> SessionSettings {
        SessionSettings {
            map: MapOptions {
                container: "map".into(),
                style: "streets".into(),
                center: GpsFix::new(0.0, 0.0),
                zoom: 13.0,
            },
            fly_to_delay: Duration::from_millis(100),
            refresh,
        }
    }

    fn session(refresh: RefreshStrategy) -> (MapSession<HeadlessMap>, RecordingNotifier) {
        let notifier = RecordingNotifier::default();
        let (events, _) = broadcast::channel(64);
        let session = MapSession::new(
            HeadlessMap::with_default_style(),
            settings(refresh),
            Box::new(|_: &MarkerContext| {}),
            Box::new(notifier.clone()),
            events,
        )
        .unwrap();
        (session, notifier)
    }

    fn fix(session: &mut MapSession<HeadlessMap>, f: GpsFix, initial: bool, now: Instant) {
        assert!(session.handle(SessionEvent::Fix { fix: f, initial }, now));
    }

    #[test]
    fn test_fly_to_once_for_initial_fix_only() {
        let (mut s, _) = session(RefreshStrategy::Replace);
        let now = Instant::now();
        let initial = GpsFix::new(10.0, 10.0);

        for i in 0..3 {
            fix(&mut s, GpsFix::new(f64::from(i), 1.0), false, now);
        }
        assert_eq!(s.viewport().next_deadline(), None);

        fix(&mut s, initial, true, now);
        fix(&mut s, GpsFix::new(20.0, 20.0), true, now);
        fix(&mut s, GpsFix::new(30.0, 30.0), false, now);

        s.tick(now + Duration::from_secs(1));
        s.tick(now + Duration::from_secs(2));
        assert_eq!(s.engine().fly_to_count(), 1);
        assert_eq!(s.engine().camera().unwrap().center, initial);
    }

    #[test]
    fn test_self_marker_last_write_wins() {
        let (mut s, _) = session(RefreshStrategy::Replace);
        let now = Instant::now();
        let last = GpsFix::new(3.0, 3.0);
        fix(&mut s, GpsFix::new(1.0, 1.0), false, now);
        fix(&mut s, GpsFix::new(2.0, 2.0), true, now);
        fix(&mut s, last, false, now);

        assert_eq!(s.markers().len(), 1);
        let marker = s.markers().get(s.self_marker().unwrap()).unwrap();
        assert_eq!(marker.fix, last);
        assert_eq!(s.engine().marker(marker.glyph).unwrap().at, last);
    }

    #[test]
    fn test_invalid_fix_ignored() {
        let (mut s, _) = session(RefreshStrategy::Replace);
        fix(&mut s, GpsFix::new(f64::NAN, 0.0), true, Instant::now());
        assert!(s.self_marker().is_none());
        assert_eq!(s.viewport().next_deadline(), None);
    }

    #[test]
    fn test_location_failure_alerts_and_continues() {
        let (mut s, notifier) = session(RefreshStrategy::Replace);
        assert!(s.handle(
            SessionEvent::LocationFailed(LocationError::PermissionDenied),
            Instant::now()
        ));
        assert_eq!(
            *notifier.0.lock().unwrap(),
            vec!["Error: Error getting location.".to_string()]
        );
        assert!(s.self_marker().is_none());
        assert!(s.handle(SessionEvent::StyleLoaded, Instant::now()));
    }

    #[test]
    fn test_trackers_changed_draws_located_trackers() {
        let (mut s, _) = session(RefreshStrategy::Replace);
        let trackers = vec![
            Tracker::new("A", "Van").with_fix(GpsFix::new(1.0, 1.0)),
            Tracker::new("B", "Bike"),
        ];
        s.handle(SessionEvent::TrackersChanged(trackers), Instant::now());
        assert_eq!(s.markers().tracker_count(), 1);
        assert!(s
            .markers()
            .find(&MarkerKey::Tracker(TrackerId("A".into())))
            .is_some());
    }

    #[test]
    fn test_reconcile_strategy_keeps_refs() {
        let (mut s, _) = session(RefreshStrategy::Reconcile);
        let now = Instant::now();
        let key = MarkerKey::Tracker(TrackerId("A".into()));
        s.handle(
            SessionEvent::TrackersChanged(vec![
                Tracker::new("A", "Van").with_fix(GpsFix::new(1.0, 1.0))
            ]),
            now,
        );
        let before = s.markers().find(&key);
        s.handle(
            SessionEvent::TrackersChanged(vec![
                Tracker::new("A", "Van").with_fix(GpsFix::new(2.0, 2.0))
            ]),
            now,
        );
        assert_eq!(s.markers().find(&key), before);
    }

    #[test]
    fn test_shutdown_stops_and_teardown_clears() {
        let (mut s, _) = session(RefreshStrategy::Replace);
        let now = Instant::now();
        fix(&mut s, GpsFix::new(1.0, 1.0), true, now);
        assert!(!s.handle(SessionEvent::Shutdown, now));
        s.teardown();
        s.tick(now + Duration::from_secs(1));
        assert_eq!(s.engine().fly_to_count(), 0);
        assert!(s.engine().markers().is_empty());
    }

    #[test]
    fn test_layer_inserted_event_carries_placement() {
        let (events, mut rx) = broadcast::channel(8);
        let mut s = MapSession::new(
            HeadlessMap::with_default_style(),
            settings(RefreshStrategy::Replace),
            Box::new(|_: &MarkerContext| {}),
            Box::new(LogNotifier),
            events,
        )
        .unwrap();
        s.handle(SessionEvent::StyleLoaded, Instant::now());

        let event = rx.try_recv().unwrap();
        assert_eq!(event["type"], "layer.inserted");
        assert_eq!(
            event["placement"],
            json!({"kind": "below", "before": "road-label"})
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_handle_stops_session() {
        let state = AppState::new(Config::default());
        let mut events = state.session_events.subscribe();
        let provider = Arc::new(ReplayProvider::new(Vec::new(), Duration::from_secs(1)));
        let handle = spawn_session(
            &state,
            HeadlessMap::with_default_style(),
            provider,
            Box::new(|_: &MarkerContext| {}),
            Box::new(LogNotifier),
            RefreshStrategy::Replace,
        )
        .unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        drop(handle);
        tokio::time::sleep(Duration::from_secs(1)).await;
        while events.try_recv().is_ok() {}

        state
            .directory
            .add(Tracker::new("A", "Van").with_fix(GpsFix::new(1.0, 1.0)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event["type"].as_str().unwrap_or_default().to_string());
        }
        assert!(!seen.contains(&"markers.refreshed".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_session_end_to_end() {
        let config = Config::parse(
            r#"
            [[trackers]]
            id = "TK-1"
            label = "Van"
            latitude = 41.15
            longitude = -8.61
            "#,
        )
        .unwrap();
        let state = AppState::new(config);
        let mut events = state.session_events.subscribe();

        let track = vec![GpsFix::new(45.5, -73.5), GpsFix::new(45.6, -73.6)];
        let provider = Arc::new(ReplayProvider::new(track, Duration::from_secs(1)));
        let handle = spawn_session(
            &state,
            HeadlessMap::with_default_style(),
            provider,
            Box::new(|_: &MarkerContext| {}),
            Box::new(LogNotifier),
            RefreshStrategy::Replace,
        )
        .unwrap();

        assert!(handle.send(SessionEvent::StyleLoaded));
        assert!(handle.send(SessionEvent::ContentCheck { attached: true }));
        assert!(handle.send(SessionEvent::ContentCheck { attached: true }));
        tokio::time::sleep(Duration::from_secs(5)).await;

        let map = handle.shutdown().await.unwrap();
        assert_eq!(map.fly_to_count(), 1);
        assert_eq!(map.resize_count(), 1);
        assert_eq!(map.layer_ids()[3], BUILDINGS_LAYER_ID);
        // torn down
        assert!(map.markers().is_empty());

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event["type"].as_str().unwrap_or_default().to_string());
        }
        assert!(seen.contains(&"marker.created".to_string()));
        assert!(seen.contains(&"markers.refreshed".to_string()));
        assert!(seen.contains(&"camera.fly_to".to_string()));
        assert_eq!(seen.iter().filter(|t| *t == "map.resized").count(), 1);
    }
}
