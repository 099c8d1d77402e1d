//! Map controller and the reactive store → map coupling.
//!
//! [`MapController`] is an imperative façade over a [`MapSurface`]: clear,
//! add markers, fly, and frame a point set with terrain-aware framing. It is
//! built from a ready [`MapCapabilities`] bundle and thrown away (never
//! patched) when the capabilities change.
//!
//! [`MapSync`] owns the reaction to store changes:
//!
//! - a new marker generation (or new padding) → clear, re-add every marker
//!   and, unless auto-framing is suppressed, frame them;
//! - a pending camera target → take it from the store (which also clears
//!   the suppression flag) and fly there.

use tokio::sync::watch;
use tracing::{debug, info};

use crate::capabilities::{CapabilitySet, MapCapabilities};
use crate::framing::look_at_with_padding;
use crate::models::{CameraTarget, GeoPoint, MapMarker, MapState, Padding};
use crate::store::MapStore;

/// Upper bound on any camera animation.
pub const MAX_FLY_DURATION_MS: u64 = 10_000;

pub struct MapController {
    caps: MapCapabilities,
    fly_duration_ms: u64,
}

impl MapController {
    pub fn new(caps: MapCapabilities, fly_duration_ms: u64) -> Self {
        Self {
            caps,
            fly_duration_ms: fly_duration_ms.min(MAX_FLY_DURATION_MS),
        }
    }

    pub fn clear_map(&self) {
        self.caps.map.clear_markers();
    }

    pub fn add_markers(&self, markers: &[MapMarker]) {
        for marker in markers {
            self.caps.map.add_marker(marker);
        }
    }

    pub fn fly_to(&self, target: &CameraTarget) {
        debug!(
            lat = target.center.lat,
            lng = target.center.lng,
            range = target.range,
            "flying camera"
        );
        self.caps.map.fly_camera_to(target, self.fly_duration_ms);
    }

    /// Orbit around `target` for `rounds` turns.
    pub fn fly_around(&self, target: &CameraTarget, rounds: u32) {
        self.caps
            .map
            .fly_camera_around(target, self.fly_duration_ms, rounds);
    }

    /// Fly to a camera that shows every point inside the padded viewport.
    ///
    /// Returns the camera flown to, or `None` for an empty point set.
    pub async fn frame_entities(&self, points: &[GeoPoint], padding: Padding) -> Option<CameraTarget> {
        let target =
            look_at_with_padding(points, padding, Some(self.caps.elevation.as_ref())).await?;
        self.fly_to(&target);
        Some(target)
    }
}

/// Keeps a map surface in step with a [`MapStore`].
pub struct MapSync {
    store: MapStore,
    state_rx: watch::Receiver<MapState>,
    padding_rx: watch::Receiver<Padding>,
    caps_rx: watch::Receiver<CapabilitySet>,
    fly_duration_ms: u64,
    controller: Option<MapController>,
    rendered_generation: Option<u64>,
    rendered_padding: Option<Padding>,
}

impl MapSync {
    pub fn new(
        store: MapStore,
        padding_rx: watch::Receiver<Padding>,
        caps_rx: watch::Receiver<CapabilitySet>,
        fly_duration_ms: u64,
    ) -> Self {
        let state_rx = store.subscribe();
        let mut sync = Self {
            store,
            state_rx,
            padding_rx,
            caps_rx,
            fly_duration_ms,
            controller: None,
            rendered_generation: None,
            rendered_padding: None,
        };
        sync.rebuild_controller();
        sync
    }

    /// Whether a controller is currently available.
    pub fn is_ready(&self) -> bool {
        self.controller.is_some()
    }

    fn rebuild_controller(&mut self) {
        let caps = self.caps_rx.borrow_and_update().clone();
        self.controller = caps
            .map_ready()
            .map(|ready| MapController::new(ready, self.fly_duration_ms));
        // a fresh controller starts from an empty surface
        self.rendered_generation = None;
        info!(
            capabilities = %caps.describe(),
            ready = self.controller.is_some(),
            "map controller rebuilt"
        );
    }

    /// Apply the current store state to the map once.
    ///
    /// Marker changes are rendered before the pending camera target is
    /// consumed, so a close-up set together with its marker is not undone
    /// by auto-framing.
    pub async fn sync_once(&mut self) {
        if self.caps_rx.has_changed().unwrap_or(false) {
            self.rebuild_controller();
        }

        let state = self.state_rx.borrow_and_update().clone();
        let padding = *self.padding_rx.borrow_and_update();

        let Some(controller) = &self.controller else {
            debug!("map controller not ready; skipping state update");
            return;
        };

        let markers_changed = self.rendered_generation != Some(state.generation)
            || self.rendered_padding != Some(padding);
        if markers_changed {
            controller.clear_map();
            controller.add_markers(&state.markers);
            if !state.markers.is_empty() && !state.prevent_auto_frame {
                let positions: Vec<GeoPoint> = state.markers.iter().map(|m| m.position).collect();
                controller.frame_entities(&positions, padding).await;
            }
            self.rendered_generation = Some(state.generation);
            self.rendered_padding = Some(padding);
        }

        if state.camera_target.is_some() {
            if let Some(target) = self.store.take_camera_target() {
                controller.fly_to(&target);
            }
        }
    }

    /// React to changes until the padding or capability sender is dropped.
    pub async fn run(mut self) {
        self.sync_once().await;
        loop {
            tokio::select! {
                changed = self.state_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                changed = self.padding_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                changed = self.caps_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    self.rebuild_controller();
                }
            }
            self.sync_once().await;
        }
        debug!("map sync stopped");
    }
}
