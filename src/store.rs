//! Map state store.
//!
//! [`MapStore`] is the single source of truth for what the map shows. It is
//! constructed once at startup and handed (by cheap clone) to the tool
//! dispatcher and the map controller loop. Every change notifies subscribers
//! through a [`tokio::sync::watch`] channel.
//!
//! # Atomicity
//!
//! All mutations run inside one closure holding the channel's lock, so a
//! multi-field update (replace markers + set camera target + suppress
//! auto-frame) is observed by subscribers as a single change.
//!
//! # Generations
//!
//! Each marker-set write is stamped with a ticket from a monotonic counter
//! and recorded as [`MapState::generation`]. Background writers reserve a
//! ticket when they start ([`MapStore::reserve_ticket`]) and apply through
//! [`MapStore::apply_if_current`], which refuses the write when a newer
//! ticket has already landed. This keeps a slow marker resolution from
//! overwriting markers placed by a later tool call.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::watch;

use crate::models::{CameraTarget, MapMarker, MapState};

/// Shared handle to the map state.
#[derive(Clone)]
pub struct MapStore {
    tx: Arc<watch::Sender<MapState>>,
    tickets: Arc<AtomicU64>,
}

/// Mutable view of the state handed to [`MapStore::update`] closures.
pub struct StateWriter<'a> {
    state: &'a mut MapState,
    tickets: &'a AtomicU64,
    ticket: Option<u64>,
    changed: bool,
}

impl StateWriter<'_> {
    /// Replace the whole marker set, stamping it with a new generation.
    pub fn replace_markers(&mut self, markers: Vec<MapMarker>) {
        let ticket = match self.ticket {
            Some(t) => t,
            None => self.tickets.fetch_add(1, Ordering::SeqCst) + 1,
        };
        self.state.markers = markers;
        self.state.generation = ticket;
        self.changed = true;
    }

    pub fn clear_markers(&mut self) {
        self.replace_markers(Vec::new());
    }

    pub fn set_camera_target(&mut self, target: Option<CameraTarget>) {
        if self.state.camera_target != target {
            self.state.camera_target = target;
            self.changed = true;
        }
    }

    pub fn set_prevent_auto_frame(&mut self, prevent: bool) {
        if self.state.prevent_auto_frame != prevent {
            self.state.prevent_auto_frame = prevent;
            self.changed = true;
        }
    }

    pub fn state(&self) -> &MapState {
        self.state
    }
}

impl MapStore {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(MapState::default());
        Self {
            tx: Arc::new(tx),
            tickets: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Clone of the current state.
    pub fn snapshot(&self) -> MapState {
        self.tx.borrow().clone()
    }

    /// Receiver that is notified on every change.
    pub fn subscribe(&self) -> watch::Receiver<MapState> {
        self.tx.subscribe()
    }

    /// Run `f` as one atomic update. Subscribers are notified only if the
    /// closure actually changed something.
    pub fn update<R>(&self, f: impl FnOnce(&mut StateWriter<'_>) -> R) -> R {
        let mut out = None;
        self.tx.send_if_modified(|state| {
            let mut writer = StateWriter {
                state,
                tickets: &self.tickets,
                ticket: None,
                changed: false,
            };
            out = Some(f(&mut writer));
            writer.changed
        });
        // send_if_modified always invokes the closure exactly once
        out.unwrap_or_else(|| unreachable!("update closure was not invoked"))
    }

    /// Reserve a generation ticket for a write that will happen later.
    pub fn reserve_ticket(&self) -> u64 {
        self.tickets.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Apply `f` only if no marker write newer than `ticket` has landed.
    ///
    /// Returns `false` (and leaves the state untouched) when the ticket is
    /// stale.
    pub fn apply_if_current(&self, ticket: u64, f: impl FnOnce(&mut StateWriter<'_>)) -> bool {
        let mut applied = false;
        self.tx.send_if_modified(|state| {
            if ticket <= state.generation {
                return false;
            }
            let mut writer = StateWriter {
                state,
                tickets: &self.tickets,
                ticket: Some(ticket),
                changed: false,
            };
            f(&mut writer);
            applied = true;
            writer.changed
        });
        applied
    }

    pub fn set_markers(&self, markers: Vec<MapMarker>) {
        self.update(|w| w.replace_markers(markers));
    }

    pub fn clear_markers(&self) {
        self.update(|w| w.clear_markers());
    }

    pub fn set_camera_target(&self, target: Option<CameraTarget>) {
        self.update(|w| w.set_camera_target(target));
    }

    pub fn set_prevent_auto_frame(&self, prevent: bool) {
        self.update(|w| w.set_prevent_auto_frame(prevent));
    }

    /// Consume the pending camera target.
    ///
    /// Resets the target to `None` and re-enables auto-framing in the same
    /// update. Returns `None` when nothing is pending.
    pub fn take_camera_target(&self) -> Option<CameraTarget> {
        self.update(|w| {
            let target = w.state.camera_target.take();
            if target.is_some() {
                w.changed = true;
                w.set_prevent_auto_frame(false);
            }
            target
        })
    }

    /// Return to the initial state between sessions. The marker reset takes
    /// a fresh generation, so resolutions started before the reset are
    /// discarded.
    pub fn reset(&self) {
        self.update(|w| {
            w.clear_markers();
            w.set_camera_target(None);
            w.set_prevent_auto_frame(false);
        });
    }
}

impl Default for MapStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::GeoPoint;

    fn marker(label: &str) -> MapMarker {
        MapMarker {
            position: GeoPoint::new(25.0, 55.0, 1.0),
            label: label.to_string(),
            show_label: true,
        }
    }

    fn target() -> CameraTarget {
        CameraTarget::new(GeoPoint::new(25.0, 55.0, 200.0), 500.0, 60.0, 0.0, 0.0)
    }

    #[test]
    fn test_take_camera_target_consumes_once() {
        let store = MapStore::new();
        store.update(|w| {
            w.set_prevent_auto_frame(true);
            w.set_camera_target(Some(target()));
        });

        assert_eq!(store.take_camera_target(), Some(target()));
        let state = store.snapshot();
        assert!(state.camera_target.is_none());
        assert!(!state.prevent_auto_frame);

        assert_eq!(store.take_camera_target(), None);
    }

    #[test]
    fn test_marker_writes_advance_generation() {
        let store = MapStore::new();
        store.set_markers(vec![marker("a")]);
        let first = store.snapshot().generation;
        store.clear_markers();
        assert!(store.snapshot().generation > first);
    }

    #[test]
    fn test_stale_ticket_is_discarded() {
        let store = MapStore::new();
        let early = store.reserve_ticket();
        store.set_markers(vec![marker("later call")]);

        let applied = store.apply_if_current(early, |w| w.replace_markers(vec![marker("slow")]));
        assert!(!applied);
        assert_eq!(store.snapshot().markers[0].label, "later call");
    }

    #[test]
    fn test_newer_ticket_applies_and_older_one_loses() {
        let store = MapStore::new();
        let first = store.reserve_ticket();
        let second = store.reserve_ticket();

        assert!(store.apply_if_current(second, |w| w.replace_markers(vec![marker("second")])));
        assert!(!store.apply_if_current(first, |w| w.replace_markers(vec![marker("first")])));
        assert_eq!(store.snapshot().markers[0].label, "second");
        assert_eq!(store.snapshot().generation, second);
    }

    #[tokio::test]
    async fn test_noop_update_does_not_notify() {
        let store = MapStore::new();
        let mut rx = store.subscribe();
        rx.borrow_and_update();

        store.set_prevent_auto_frame(false);
        assert!(!rx.has_changed().unwrap());

        store.set_prevent_auto_frame(true);
        assert!(rx.has_changed().unwrap());
    }

    #[test]
    fn test_reset_invalidates_inflight_tickets() {
        let store = MapStore::new();
        let ticket = store.reserve_ticket();
        store.set_camera_target(Some(target()));
        store.reset();

        assert!(!store.apply_if_current(ticket, |w| w.replace_markers(vec![marker("old")])));
        let state = store.snapshot();
        assert!(state.markers.is_empty());
        assert!(state.camera_target.is_none());
    }
}
