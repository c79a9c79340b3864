//! Seam to the mapping engine that renders the map.
//!
//! The core never draws anything itself. It asks a [`MapEngine`] to create
//! the map, place glyph markers and popups, inspect the loaded style and
//! insert layers into it. [`headless::HeadlessMap`] is an in-memory engine
//! used by the CLI and by tests.

pub mod headless;

use serde::Serialize;
use serde_json::Value;

use crate::geo::GpsFix;

/// Handle to a glyph marker created by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GlyphId(pub u64);

/// Handle to a popup created by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PopupId(pub u64);

/// Handle to a map control (e.g. the navigation control).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ControlId(pub u64);

/// Options for creating the map instance.
#[derive(Debug, Clone, PartialEq)]
pub struct MapOptions {
    /// Identifier of the display container the map is bound to.
    pub container: String,
    /// Style reference (URL or name).
    pub style: String,
    pub center: GpsFix,
    pub zoom: f64,
}

/// How a marker is drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Glyph {
    /// The engine's default pin, used for the device's own position.
    DefaultPin,
    /// Square icon of the given pixel size, used for tracker assets.
    Icon { size_px: u32 },
}

/// Popup presentation settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PopupOptions {
    /// Pixel offset from the marker anchor.
    pub offset: f64,
    pub close_button: bool,
    pub close_on_click: bool,
}

impl Default for PopupOptions {
    fn default() -> Self {
        Self {
            offset: 20.0,
            close_button: false,
            close_on_click: false,
        }
    }
}

/// A layer of the loaded style, reduced to what layer placement needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyleLayer {
    pub id: String,
    /// Layer type (`fill`, `line`, `symbol`, ...).
    pub kind: String,
    /// Whether the layout has a `text-field`, i.e. the layer renders labels.
    pub has_text_field: bool,
}

impl StyleLayer {
    pub fn new(id: &str, kind: &str, has_text_field: bool) -> Self {
        Self {
            id: id.to_string(),
            kind: kind.to_string(),
            has_text_field,
        }
    }

    /// Whether this layer draws text labels.
    pub fn is_label(&self) -> bool {
        self.kind == "symbol" && self.has_text_field
    }

    /// Extract the layer list from a Mapbox-style JSON document.
    ///
    /// Layers without an `id` or `type` are rejected; a missing `layout`
    /// simply means no text field.
    pub fn from_style_json(style: &Value) -> Result<Vec<Self>, String> {
        let layers = style
            .get("layers")
            .and_then(Value::as_array)
            .ok_or("style has no \"layers\" array")?;

        layers
            .iter()
            .enumerate()
            .map(|(i, layer)| -> Result<Self, String> {
                let id = layer
                    .get("id")
                    .and_then(Value::as_str)
                    .ok_or_else(|| format!("layer {i} has no id"))?;
                let kind = layer
                    .get("type")
                    .and_then(Value::as_str)
                    .ok_or_else(|| format!("layer {id} has no type"))?;
                let has_text_field = layer
                    .get("layout")
                    .and_then(|l| l.get("text-field"))
                    .is_some_and(|v| !v.is_null());
                Ok(Self::new(id, kind, has_text_field))
            })
            .collect()
    }
}

/// A layer definition handed to [`MapEngine::insert_layer`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayerSpec {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub source: String,
    #[serde(rename = "source-layer")]
    pub source_layer: String,
    pub filter: Value,
    #[serde(rename = "minzoom")]
    pub min_zoom: f64,
    pub paint: Value,
}

/// Capabilities the core needs from a mapping engine.
///
/// Calls are made from a single task; implementations need not be `Sync`.
/// Operations on handles the engine no longer knows about must be no-ops.
pub trait MapEngine {
    /// Create the map bound to `options.container`.
    fn create_map(&mut self, options: &MapOptions) -> Result<(), String>;

    fn add_navigation_control(&mut self) -> ControlId;
    fn remove_control(&mut self, id: ControlId);

    fn create_marker(&mut self, glyph: Glyph, at: GpsFix) -> GlyphId;
    fn move_marker(&mut self, id: GlyphId, at: GpsFix);
    fn remove_marker(&mut self, id: GlyphId);

    fn create_popup(&mut self, options: PopupOptions, text: &str) -> PopupId;
    fn set_popup_text(&mut self, id: PopupId, text: &str);
    /// Show the popup on the map at `at`.
    fn show_popup(&mut self, id: PopupId, at: GpsFix);
    /// Hide the popup without disposing it.
    fn hide_popup(&mut self, id: PopupId);
    fn remove_popup(&mut self, id: PopupId);

    /// Layers of the currently loaded style, bottom to top.
    fn style_layers(&self) -> Vec<StyleLayer>;
    /// Insert `layer` directly below the layer `before`, or on top when `None`.
    fn insert_layer(&mut self, layer: LayerSpec, before: Option<&str>) -> Result<(), String>;

    /// Animated camera transition to `center`, keeping the zoom level.
    fn fly_to(&mut self, center: GpsFix);
    /// Recompute the framebuffer size from the container.
    fn resize(&mut self);
}
