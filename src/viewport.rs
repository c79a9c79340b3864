//! Map viewport controller: camera, container visibility and derived layers.
//!
//! The controller creates the map once per session and then reacts to three
//! kinds of input:
//!
//! - **Fly-to requests** are deferred by a short delay so the transition does
//!   not fight an in-progress layout reflow. The pending transition is a plain
//!   deadline; the session awaits it and calls [`ViewportController::fire_due`].
//!   Teardown drops it, so a late timer never reaches a disposed map.
//! - **Content checks** report whether the container is attached to the
//!   layout. The controller resizes the map once per hidden → visible edge.
//! - **Style loaded** inserts the 3D buildings layer below the first text
//!   label layer.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use serde_json::json;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::engine::{ControlId, LayerSpec, MapEngine, MapOptions, StyleLayer};
use crate::geo::{GpsFix, Viewport};

/// Id of the derived 3D buildings layer.
pub const BUILDINGS_LAYER_ID: &str = "3d-buildings";

/// Zoom level at which buildings start to extrude.
pub const BUILDINGS_MIN_ZOOM: f64 = 15.0;

/// Zoom level at which buildings reach their full height.
pub const BUILDINGS_FULL_ZOOM: f64 = 15.05;

/// Container visibility as last observed by a content check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Hidden,
    Visible,
}

/// Where the derived layer ended up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "before", rename_all = "snake_case")]
pub enum LayerPlacement {
    /// Directly below the named label layer.
    Below(String),
    /// On top of the stack, no label layer was found.
    Top,
    /// Already inserted earlier in this session.
    AlreadyPresent,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ViewportError {
    AlreadyInitialized,
    NotInitialized,
    Engine(String),
}

impl fmt::Display for ViewportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyInitialized => write!(f, "map already initialized"),
            Self::NotInitialized => write!(f, "map not initialized"),
            Self::Engine(e) => write!(f, "map engine: {e}"),
        }
    }
}

impl std::error::Error for ViewportError {}

#[derive(Debug, Clone, Copy)]
struct PendingFlyTo {
    center: GpsFix,
    due: Instant,
}

/// Owns the camera and map-level layers of one session.
#[derive(Debug)]
pub struct ViewportController {
    viewport: Option<Viewport>,
    control: Option<ControlId>,
    visibility: Visibility,
    pending: Option<PendingFlyTo>,
    buildings: bool,
}

impl Default for ViewportController {
    fn default() -> Self {
        Self::new()
    }
}

impl ViewportController {
    pub fn new() -> Self {
        Self {
            viewport: None,
            control: None,
            visibility: Visibility::Hidden,
            pending: None,
            buildings: false,
        }
    }

    /// Create the map and its navigation control. Only once per session.
    pub fn initialize<E: MapEngine>(
        &mut self,
        engine: &mut E,
        options: &MapOptions,
    ) -> Result<(), ViewportError> {
        if self.viewport.is_some() {
            return Err(ViewportError::AlreadyInitialized);
        }
        engine.create_map(options).map_err(ViewportError::Engine)?;
        self.control = Some(engine.add_navigation_control());
        self.viewport = Some(Viewport {
            center: options.center,
            zoom: options.zoom,
        });
        info!(
            "Viewport: map on {} at {} zoom {}",
            options.container, options.center, options.zoom
        );
        Ok(())
    }

    pub fn viewport(&self) -> Option<Viewport> {
        self.viewport
    }

    pub fn visibility(&self) -> Visibility {
        self.visibility
    }

    /// Schedule a camera transition to `center` once `delay` has elapsed.
    ///
    /// A later request replaces an earlier pending one.
    pub fn fly_to(&mut self, center: GpsFix, delay: Duration, now: Instant) {
        debug!("Viewport: fly-to {center} in {}ms", delay.as_millis());
        self.pending = Some(PendingFlyTo {
            center,
            due: now + delay,
        });
    }

    /// Deadline of the pending fly-to, if any.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.map(|p| p.due)
    }

    /// Run the pending fly-to if it is due. Returns the new centre.
    pub fn fire_due<E: MapEngine>(&mut self, engine: &mut E, now: Instant) -> Option<GpsFix> {
        let pending = self.pending.filter(|p| p.due <= now)?;
        self.pending = None;
        let viewport = self.viewport.as_mut()?;
        engine.fly_to(pending.center);
        viewport.center = pending.center;
        Some(pending.center)
    }

    /// Drop the pending fly-to without running it.
    pub fn cancel_fly_to(&mut self) -> bool {
        self.pending.take().is_some()
    }

    /// Content check: `attached` is whether the container currently has a
    /// layout parent. Resizes once on each hidden → visible edge and returns
    /// the new state when it changed. Checks before the map exists are
    /// ignored, so the first check after `initialize` still resizes.
    pub fn on_content_check<E: MapEngine>(
        &mut self,
        engine: &mut E,
        attached: bool,
    ) -> Option<Visibility> {
        if self.viewport.is_none() {
            return None;
        }
        match (self.visibility, attached) {
            (Visibility::Hidden, true) => {
                self.visibility = Visibility::Visible;
                engine.resize();
                Some(Visibility::Visible)
            }
            (Visibility::Visible, false) => {
                self.visibility = Visibility::Hidden;
                Some(Visibility::Hidden)
            }
            _ => None,
        }
    }

    /// Insert the 3D buildings layer below the first text label layer of the
    /// loaded style, or on top when the style has no labels.
    pub fn enable_derived_layer<E: MapEngine>(
        &mut self,
        engine: &mut E,
    ) -> Result<LayerPlacement, ViewportError> {
        if self.viewport.is_none() {
            return Err(ViewportError::NotInitialized);
        }
        if self.buildings {
            return Ok(LayerPlacement::AlreadyPresent);
        }
        let layers = engine.style_layers();
        let before = label_layer_id(&layers).map(str::to_string);
        engine
            .insert_layer(buildings_layer(), before.as_deref())
            .map_err(ViewportError::Engine)?;
        self.buildings = true;
        let placement = before.map_or(LayerPlacement::Top, LayerPlacement::Below);
        info!("Viewport: {BUILDINGS_LAYER_ID} inserted ({placement:?})");
        Ok(placement)
    }

    /// Drop pending work and detach the navigation control.
    pub fn teardown<E: MapEngine>(&mut self, engine: &mut E) {
        if self.cancel_fly_to() {
            debug!("Viewport: pending fly-to dropped on teardown");
        }
        if let Some(control) = self.control.take() {
            engine.remove_control(control);
        }
    }
}

/// First `symbol` layer that renders a `text-field`.
pub fn label_layer_id(layers: &[StyleLayer]) -> Option<&str> {
    layers.iter().find(|l| l.is_label()).map(|l| l.id.as_str())
}

/// Fill-extrusion layer for buildings flagged `extrude`, growing from flat at
/// zoom 15 to full `height`/`min_height` at zoom 15.05.
pub fn buildings_layer() -> LayerSpec {
    let ramp = |attribute: &str| {
        json!([
            "interpolate", ["linear"], ["zoom"],
            BUILDINGS_MIN_ZOOM, 0,
            BUILDINGS_FULL_ZOOM, ["get", attribute]
        ])
    };
    LayerSpec {
        id: BUILDINGS_LAYER_ID.to_string(),
        kind: "fill-extrusion".to_string(),
        source: "composite".to_string(),
        source_layer: "building".to_string(),
        filter: json!(["==", "extrude", "true"]),
        min_zoom: BUILDINGS_MIN_ZOOM,
        paint: json!({
            "fill-extrusion-color": "#aaa",
            "fill-extrusion-height": ramp("height"),
            "fill-extrusion-base": ramp("min_height"),
            "fill-extrusion-opacity": 0.6,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::headless::HeadlessMap;

    fn options() -> MapOptions {
        MapOptions {
            container: "map".into(),
            style: "streets".into(),
            center: GpsFix::new(0.0, 0.0),
            zoom: 13.0,
        }
    }

    fn ready(map: &mut HeadlessMap) -> ViewportController {
        let mut vp = ViewportController::new();
        vp.initialize(map, &options()).unwrap();
        vp
    }

    #[test]
    fn test_initialize_once() {
        let mut map = HeadlessMap::default();
        let mut vp = ready(&mut map);
        assert_eq!(
            vp.initialize(&mut map, &options()),
            Err(ViewportError::AlreadyInitialized)
        );
        assert_eq!(map.controls().len(), 1);
        assert_eq!(vp.viewport().unwrap().zoom, 13.0);
    }

    #[test]
    fn test_label_layer_inserted_before_symbol() {
        let mut map = HeadlessMap::with_style(vec![
            StyleLayer::new("fill", "fill", false),
            StyleLayer::new("labels", "symbol", true),
            StyleLayer::new("line", "line", false),
        ]);
        let mut vp = ready(&mut map);
        let placement = vp.enable_derived_layer(&mut map).unwrap();
        assert_eq!(placement, LayerPlacement::Below("labels".into()));
        assert_eq!(map.layer_ids(), vec!["fill", BUILDINGS_LAYER_ID, "labels", "line"]);
    }

    #[test]
    fn test_placement_serializes_tagged() {
        assert_eq!(
            serde_json::to_value(LayerPlacement::Below("road-label".into())).unwrap(),
            json!({"kind": "below", "before": "road-label"})
        );
        assert_eq!(
            serde_json::to_value(LayerPlacement::Top).unwrap(),
            json!({"kind": "top"})
        );
    }

    #[test]
    fn test_no_label_layer_goes_on_top() {
        let mut map = HeadlessMap::with_style(vec![
            StyleLayer::new("fill", "fill", false),
            StyleLayer::new("icons", "symbol", false),
            StyleLayer::new("line", "line", false),
        ]);
        let mut vp = ready(&mut map);
        assert_eq!(vp.enable_derived_layer(&mut map).unwrap(), LayerPlacement::Top);
        assert_eq!(map.layer_ids(), vec!["fill", "icons", "line", BUILDINGS_LAYER_ID]);
    }

    #[test]
    fn test_derived_layer_inserted_once() {
        let mut map = HeadlessMap::with_default_style();
        let mut vp = ready(&mut map);
        vp.enable_derived_layer(&mut map).unwrap();
        assert_eq!(
            vp.enable_derived_layer(&mut map).unwrap(),
            LayerPlacement::AlreadyPresent
        );
        assert_eq!(map.inserted_layers().len(), 1);
    }

    #[test]
    fn test_derived_layer_requires_map() {
        let mut map = HeadlessMap::with_default_style();
        let mut vp = ViewportController::new();
        assert_eq!(
            vp.enable_derived_layer(&mut map),
            Err(ViewportError::NotInitialized)
        );
    }

    #[test]
    fn test_buildings_layer_ramps() {
        let layer = buildings_layer();
        assert_eq!(layer.min_zoom, 15.0);
        let height = &layer.paint["fill-extrusion-height"];
        assert_eq!(height[3], 15.0);
        assert_eq!(height[4], 0);
        assert_eq!(height[5], 15.05);
        assert_eq!(height[6], json!(["get", "height"]));
        assert_eq!(layer.paint["fill-extrusion-base"][6], json!(["get", "min_height"]));
    }

    #[test]
    fn test_resize_once_per_visible_edge() {
        let mut map = HeadlessMap::default();
        let mut vp = ready(&mut map);

        assert_eq!(vp.on_content_check(&mut map, true), Some(Visibility::Visible));
        for _ in 0..5 {
            assert_eq!(vp.on_content_check(&mut map, true), None);
        }
        assert_eq!(map.resize_count(), 1);

        assert_eq!(vp.on_content_check(&mut map, false), Some(Visibility::Hidden));
        assert_eq!(vp.on_content_check(&mut map, false), None);
        assert_eq!(map.resize_count(), 1);

        vp.on_content_check(&mut map, true);
        assert_eq!(map.resize_count(), 2);
    }

    #[test]
    fn test_content_check_before_initialize_still_resizes_later() {
        let mut map = HeadlessMap::default();
        let mut vp = ViewportController::new();
        assert_eq!(vp.on_content_check(&mut map, true), None);
        assert_eq!(vp.visibility(), Visibility::Hidden);

        vp.initialize(&mut map, &options()).unwrap();
        assert_eq!(vp.on_content_check(&mut map, true), Some(Visibility::Visible));
        assert_eq!(map.resize_count(), 1);
    }

    #[test]
    fn test_fly_to_fires_after_delay() {
        let mut map = HeadlessMap::default();
        let mut vp = ready(&mut map);
        let now = Instant::now();
        let target = GpsFix::new(41.15, -8.61);

        vp.fly_to(target, Duration::from_millis(100), now);
        assert_eq!(vp.fire_due(&mut map, now + Duration::from_millis(50)), None);
        assert_eq!(map.fly_to_count(), 0);

        assert_eq!(
            vp.fire_due(&mut map, now + Duration::from_millis(100)),
            Some(target)
        );
        assert_eq!(map.fly_to_count(), 1);
        assert_eq!(map.camera().unwrap().center, target);
        assert_eq!(vp.viewport().unwrap().center, target);
        assert_eq!(vp.next_deadline(), None);
    }

    #[test]
    fn test_teardown_drops_pending_fly_to() {
        let mut map = HeadlessMap::default();
        let mut vp = ready(&mut map);
        let now = Instant::now();
        vp.fly_to(GpsFix::new(1.0, 1.0), Duration::from_millis(100), now);
        vp.teardown(&mut map);
        assert_eq!(vp.fire_due(&mut map, now + Duration::from_secs(1)), None);
        assert_eq!(map.fly_to_count(), 0);
        assert!(map.controls().is_empty());
    }
}
