//! In-memory [`MapEngine`] that keeps the map's state without rendering it.
//!
//! Every call is applied to plain collections so the resulting map (markers,
//! visible popups, layer stack, camera) can be inspected afterwards. The CLI
//! runs sessions against it and the tests assert on it.

use std::collections::BTreeMap;

use tracing::debug;

use super::{
    ControlId, Glyph, GlyphId, LayerSpec, MapEngine, MapOptions, PopupId, PopupOptions, StyleLayer,
};
use crate::geo::{GpsFix, Viewport};

/// A glyph marker placed on the headless map.
#[derive(Debug, Clone, PartialEq)]
pub struct HeadlessMarker {
    pub glyph: Glyph,
    pub at: GpsFix,
}

/// A popup known to the headless map.
#[derive(Debug, Clone, PartialEq)]
pub struct HeadlessPopup {
    pub options: PopupOptions,
    pub text: String,
    /// Where it is shown, `None` while hidden.
    pub shown_at: Option<GpsFix>,
}

/// Headless map engine.
#[derive(Debug, Default)]
pub struct HeadlessMap {
    options: Option<MapOptions>,
    camera: Option<Viewport>,
    controls: Vec<ControlId>,
    markers: BTreeMap<GlyphId, HeadlessMarker>,
    popups: BTreeMap<PopupId, HeadlessPopup>,
    layers: Vec<StyleLayer>,
    inserted: Vec<LayerSpec>,
    next_handle: u64,
    resizes: u32,
    flights: u32,
}

impl HeadlessMap {
    /// Headless map whose loaded style has the given layers.
    pub fn with_style(layers: Vec<StyleLayer>) -> Self {
        Self {
            layers,
            ..Self::default()
        }
    }

    /// A small street style: fills, a road line and a text label layer.
    pub fn with_default_style() -> Self {
        Self::with_style(vec![
            StyleLayer::new("background", "background", false),
            StyleLayer::new("water", "fill", false),
            StyleLayer::new("road", "line", false),
            StyleLayer::new("road-label", "symbol", true),
            StyleLayer::new("place-label", "symbol", true),
        ])
    }

    fn next(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    pub fn is_created(&self) -> bool {
        self.options.is_some()
    }

    pub fn camera(&self) -> Option<Viewport> {
        self.camera
    }

    pub fn controls(&self) -> &[ControlId] {
        &self.controls
    }

    pub fn markers(&self) -> &BTreeMap<GlyphId, HeadlessMarker> {
        &self.markers
    }

    pub fn marker(&self, id: GlyphId) -> Option<&HeadlessMarker> {
        self.markers.get(&id)
    }

    pub fn popups(&self) -> &BTreeMap<PopupId, HeadlessPopup> {
        &self.popups
    }

    pub fn popup(&self, id: PopupId) -> Option<&HeadlessPopup> {
        self.popups.get(&id)
    }

    /// Ids of the current layer stack, bottom to top.
    pub fn layer_ids(&self) -> Vec<&str> {
        self.layers.iter().map(|l| l.id.as_str()).collect()
    }

    /// Full definitions of the layers inserted through [`MapEngine::insert_layer`].
    pub fn inserted_layers(&self) -> &[LayerSpec] {
        &self.inserted
    }

    pub fn resize_count(&self) -> u32 {
        self.resizes
    }

    pub fn fly_to_count(&self) -> u32 {
        self.flights
    }
}

impl MapEngine for HeadlessMap {
    fn create_map(&mut self, options: &MapOptions) -> Result<(), String> {
        if self.options.is_some() {
            return Err(format!("map already bound to {}", options.container));
        }
        debug!(
            "headless: map on {} style={} center={} zoom={}",
            options.container, options.style, options.center, options.zoom
        );
        self.camera = Some(Viewport {
            center: options.center,
            zoom: options.zoom,
        });
        self.options = Some(options.clone());
        Ok(())
    }

    fn add_navigation_control(&mut self) -> ControlId {
        let id = ControlId(self.next());
        self.controls.push(id);
        id
    }

    fn remove_control(&mut self, id: ControlId) {
        self.controls.retain(|c| *c != id);
    }

    fn create_marker(&mut self, glyph: Glyph, at: GpsFix) -> GlyphId {
        let id = GlyphId(self.next());
        self.markers.insert(id, HeadlessMarker { glyph, at });
        id
    }

    fn move_marker(&mut self, id: GlyphId, at: GpsFix) {
        if let Some(marker) = self.markers.get_mut(&id) {
            marker.at = at;
        }
    }

    fn remove_marker(&mut self, id: GlyphId) {
        self.markers.remove(&id);
    }

    fn create_popup(&mut self, options: PopupOptions, text: &str) -> PopupId {
        let id = PopupId(self.next());
        self.popups.insert(
            id,
            HeadlessPopup {
                options,
                text: text.to_string(),
                shown_at: None,
            },
        );
        id
    }

    fn set_popup_text(&mut self, id: PopupId, text: &str) {
        if let Some(popup) = self.popups.get_mut(&id) {
            popup.text = text.to_string();
        }
    }

    fn show_popup(&mut self, id: PopupId, at: GpsFix) {
        if let Some(popup) = self.popups.get_mut(&id) {
            popup.shown_at = Some(at);
        }
    }

    fn hide_popup(&mut self, id: PopupId) {
        if let Some(popup) = self.popups.get_mut(&id) {
            popup.shown_at = None;
        }
    }

    fn remove_popup(&mut self, id: PopupId) {
        self.popups.remove(&id);
    }

    fn style_layers(&self) -> Vec<StyleLayer> {
        self.layers.clone()
    }

    fn insert_layer(&mut self, layer: LayerSpec, before: Option<&str>) -> Result<(), String> {
        if self.layers.iter().any(|l| l.id == layer.id) {
            return Err(format!("layer {} already exists", layer.id));
        }
        let index = match before {
            Some(id) => self
                .layers
                .iter()
                .position(|l| l.id == id)
                .ok_or_else(|| format!("no layer {id} to insert before"))?,
            None => self.layers.len(),
        };
        self.layers
            .insert(index, StyleLayer::new(&layer.id, &layer.kind, false));
        self.inserted.push(layer);
        Ok(())
    }

    fn fly_to(&mut self, center: GpsFix) {
        self.flights += 1;
        if let Some(camera) = self.camera.as_mut() {
            camera.center = center;
        }
    }

    fn resize(&mut self) {
        self.resizes += 1;
    }
}
