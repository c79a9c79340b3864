//! Marker store: one visual marker per logical entity.
//!
//! The store maps each [`MarkerKey`] (the device's own position or a tracker
//! id) to the [`VisualMarker`] drawn for it. `upsert` creates lazily and moves
//! in place afterwards, so an identity never gets two markers. Tracker markers
//! carry a popup label shown while the pointer hovers the glyph; clicks are
//! routed to the integrator's `on_select` callback together with the marker's
//! own [`MarkerContext`].
//!
//! Two refresh strategies exist for the tracker set:
//!
//! - [`MarkerStore::replace_all`] drops every tracker marker and recreates the
//!   batch. Cheap to reason about, fine for tens of trackers.
//! - [`MarkerStore::reconcile`] diffs by identity and applies the minimal set
//!   of [`MarkerChange`]s.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::engine::{Glyph, GlyphId, MapEngine, PopupId, PopupOptions};
use crate::geo::GpsFix;

/// Pixel size of a tracker glyph.
pub const TRACKER_ICON_PX: u32 = 40;

/// Identifier of a tracker device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackerId(pub String);

impl TrackerId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TrackerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A tracker shown on the map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerAsset {
    pub id: TrackerId,
    pub label: String,
}

/// What a marker represents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkerEntity {
    /// The device running the app.
    SelfPosition,
    TrackerAsset(TrackerAsset),
}

impl MarkerEntity {
    pub fn key(&self) -> MarkerKey {
        match self {
            Self::SelfPosition => MarkerKey::SelfPosition,
            Self::TrackerAsset(asset) => MarkerKey::Tracker(asset.id.clone()),
        }
    }
}

/// Identity of a marker; at most one marker exists per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MarkerKey {
    SelfPosition,
    Tracker(TrackerId),
}

/// Stable reference to a marker, never reused within a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MarkerRef(u64);

/// Per-marker data fixed at creation, handed to interaction callbacks.
#[derive(Debug, Clone, PartialEq)]
pub struct MarkerContext {
    pub entity: MarkerEntity,
    pub popup: Option<PopupId>,
}

/// A marker drawn on the map.
#[derive(Debug, Clone, PartialEq)]
pub struct VisualMarker {
    pub glyph: GlyphId,
    pub fix: GpsFix,
    pub context: MarkerContext,
    /// Whether the label popup is currently shown (hover state).
    pub label_visible: bool,
}

impl VisualMarker {
    pub fn key(&self) -> MarkerKey {
        self.context.entity.key()
    }
}

/// One step of a [`MarkerStore::reconcile`] pass.
#[derive(Debug, Clone, PartialEq)]
pub enum MarkerChange {
    Added(TrackerId),
    Removed(TrackerId),
    Moved { id: TrackerId, from: GpsFix, to: GpsFix },
    Relabeled { id: TrackerId, label: String },
}

/// Called with the clicked tracker's context.
pub type SelectCallback = Box<dyn FnMut(&MarkerContext) + Send>;

/// Owns every marker of a map session.
pub struct MarkerStore {
    markers: BTreeMap<MarkerRef, VisualMarker>,
    index: HashMap<MarkerKey, MarkerRef>,
    next_ref: u64,
    on_select: SelectCallback,
}

impl MarkerStore {
    /// `on_select` receives clicks on tracker markers.
    pub fn new(on_select: SelectCallback) -> Self {
        Self {
            markers: BTreeMap::new(),
            index: HashMap::new(),
            next_ref: 0,
            on_select,
        }
    }

    /// Create the marker for `entity`, or move the existing one to `fix`.
    pub fn upsert<E: MapEngine>(
        &mut self,
        engine: &mut E,
        entity: MarkerEntity,
        fix: GpsFix,
    ) -> MarkerRef {
        let key = entity.key();
        if let Some(&r) = self.index.get(&key) {
            if let Some(marker) = self.markers.get_mut(&r) {
                if marker.fix != fix {
                    engine.move_marker(marker.glyph, fix);
                    marker.fix = fix;
                    if marker.label_visible {
                        if let Some(popup) = marker.context.popup {
                            engine.show_popup(popup, fix);
                        }
                    }
                }
                if let (MarkerEntity::TrackerAsset(new), MarkerEntity::TrackerAsset(old)) =
                    (&entity, &mut marker.context.entity)
                {
                    if new.label != old.label {
                        if let Some(popup) = marker.context.popup {
                            engine.set_popup_text(popup, &new.label);
                        }
                        old.label.clone_from(&new.label);
                    }
                }
                return r;
            }
        }

        let (glyph, popup) = match &entity {
            MarkerEntity::SelfPosition => (engine.create_marker(Glyph::DefaultPin, fix), None),
            MarkerEntity::TrackerAsset(asset) => {
                let popup = engine.create_popup(PopupOptions::default(), &asset.label);
                let glyph = engine.create_marker(
                    Glyph::Icon {
                        size_px: TRACKER_ICON_PX,
                    },
                    fix,
                );
                (glyph, Some(popup))
            }
        };

        self.next_ref += 1;
        let r = MarkerRef(self.next_ref);
        debug!("Markers: created {key:?} at {fix}");
        self.index.insert(key, r);
        self.markers.insert(
            r,
            VisualMarker {
                glyph,
                fix,
                context: MarkerContext { entity, popup },
                label_visible: false,
            },
        );
        r
    }

    /// Remove a marker and its popup. Unknown or already removed refs are ignored.
    pub fn remove<E: MapEngine>(&mut self, engine: &mut E, r: MarkerRef) -> bool {
        let Some(marker) = self.markers.remove(&r) else {
            return false;
        };
        self.index.remove(&marker.key());
        if let Some(popup) = marker.context.popup {
            engine.hide_popup(popup);
            engine.remove_popup(popup);
        }
        engine.remove_marker(marker.glyph);
        debug!("Markers: removed {:?}", marker.key());
        true
    }

    /// Replace every tracker marker with fresh ones for `entries`.
    ///
    /// The self-position marker is left alone, as are `SelfPosition`
    /// entries in `entries`.
    pub fn replace_all<E, I>(&mut self, engine: &mut E, entries: I) -> Vec<MarkerRef>
    where
        E: MapEngine,
        I: IntoIterator<Item = (MarkerEntity, GpsFix)>,
    {
        for r in self.tracker_refs() {
            self.remove(engine, r);
        }
        entries
            .into_iter()
            .filter(|(entity, _)| matches!(entity, MarkerEntity::TrackerAsset(_)))
            .map(|(entity, fix)| self.upsert(engine, entity, fix))
            .collect()
    }

    /// Bring tracker markers in line with `entries` using minimal operations.
    ///
    /// Markers whose identity is absent from `entries` are removed, new
    /// identities are added, and existing ones are moved or relabeled in place.
    pub fn reconcile<E, I>(&mut self, engine: &mut E, entries: I) -> Vec<MarkerChange>
    where
        E: MapEngine,
        I: IntoIterator<Item = (TrackerAsset, GpsFix)>,
    {
        // Repeated ids collapse onto the last entry, kept at the first position.
        let mut batch: Vec<(TrackerAsset, GpsFix)> = Vec::new();
        let mut slots: HashMap<TrackerId, usize> = HashMap::new();
        for (asset, fix) in entries {
            match slots.get(&asset.id) {
                Some(&i) => batch[i] = (asset, fix),
                None => {
                    slots.insert(asset.id.clone(), batch.len());
                    batch.push((asset, fix));
                }
            }
        }

        let mut changes = Vec::new();
        let mut wanted = HashSet::new();

        for (asset, fix) in batch {
            wanted.insert(asset.id.clone());
            let key = MarkerKey::Tracker(asset.id.clone());
            match self.index.get(&key).and_then(|r| self.markers.get(r)) {
                None => changes.push(MarkerChange::Added(asset.id.clone())),
                Some(existing) => {
                    if existing.fix != fix {
                        changes.push(MarkerChange::Moved {
                            id: asset.id.clone(),
                            from: existing.fix,
                            to: fix,
                        });
                    }
                    if let MarkerEntity::TrackerAsset(old) = &existing.context.entity {
                        if old.label != asset.label {
                            changes.push(MarkerChange::Relabeled {
                                id: asset.id.clone(),
                                label: asset.label.clone(),
                            });
                        }
                    }
                }
            }
            self.upsert(engine, MarkerEntity::TrackerAsset(asset), fix);
        }

        let stale: Vec<(MarkerRef, TrackerId)> = self
            .markers
            .iter()
            .filter_map(|(r, m)| match m.key() {
                MarkerKey::Tracker(id) if !wanted.contains(&id) => Some((*r, id)),
                _ => None,
            })
            .collect();
        for (r, id) in stale {
            self.remove(engine, r);
            changes.push(MarkerChange::Removed(id));
        }

        changes
    }

    /// Pointer entered a marker's glyph: show its label.
    pub fn pointer_enter<E: MapEngine>(&mut self, engine: &mut E, r: MarkerRef) {
        if let Some(marker) = self.markers.get_mut(&r) {
            if let Some(popup) = marker.context.popup {
                engine.show_popup(popup, marker.fix);
                marker.label_visible = true;
            }
        }
    }

    /// Pointer left a marker's glyph: hide its label.
    pub fn pointer_leave<E: MapEngine>(&mut self, engine: &mut E, r: MarkerRef) {
        if let Some(marker) = self.markers.get_mut(&r) {
            if let Some(popup) = marker.context.popup {
                engine.hide_popup(popup);
                marker.label_visible = false;
            }
        }
    }

    /// Route a click to `on_select`. Returns whether a tracker was selected.
    pub fn click(&mut self, r: MarkerRef) -> bool {
        match self.markers.get(&r) {
            Some(marker) if matches!(marker.context.entity, MarkerEntity::TrackerAsset(_)) => {
                (self.on_select)(&marker.context);
                true
            }
            _ => false,
        }
    }

    /// Remove every marker, self position included.
    pub fn clear<E: MapEngine>(&mut self, engine: &mut E) {
        let refs: Vec<MarkerRef> = self.markers.keys().copied().collect();
        for r in refs {
            self.remove(engine, r);
        }
    }

    pub fn get(&self, r: MarkerRef) -> Option<&VisualMarker> {
        self.markers.get(&r)
    }

    pub fn find(&self, key: &MarkerKey) -> Option<MarkerRef> {
        self.index.get(key).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (MarkerRef, &VisualMarker)> {
        self.markers.iter().map(|(r, m)| (*r, m))
    }

    pub fn len(&self) -> usize {
        self.markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }

    pub fn tracker_count(&self) -> usize {
        self.index
            .keys()
            .filter(|k| matches!(k, MarkerKey::Tracker(_)))
            .count()
    }

    fn tracker_refs(&self) -> Vec<MarkerRef> {
        self.index
            .iter()
            .filter(|(k, _)| matches!(k, MarkerKey::Tracker(_)))
            .map(|(_, r)| *r)
            .collect()
    }
}
