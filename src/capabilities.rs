//! External capabilities the orchestrator depends on.
//!
//! The places, elevation and grounded-search services and the 3D map
//! surface are collaborators outside this crate. Each is modelled as a
//! trait so the orchestrator can run against HTTP clients
//! ([`crate::google`]), in-memory doubles ([`crate::memory`]) or a real
//! rendering front end.
//!
//! Capabilities may arrive independently and at different times. Rather than
//! scattering `if let Some(...)` checks around call sites, the orchestration
//! layer works from a [`CapabilitySet`] and asks it for a fully-ready
//! [`MapCapabilities`] bundle before building a controller.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use crate::grounding::GroundedResponse;
use crate::models::{CameraTarget, LatLng, MapMarker};

/// Fields returned by a place lookup.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlaceFields {
    pub location: Option<LatLng>,
    pub display_name: Option<String>,
}

/// Resolves place identifiers to a location and display name.
#[async_trait]
pub trait PlacesLookup: Send + Sync {
    /// Fetch the location and display name of one place.
    ///
    /// `place_id` is the bare identifier (no `places/` prefix).
    async fn fetch_fields(&self, place_id: &str) -> Result<PlaceFields>;
}

/// Terrain elevation lookups.
#[async_trait]
pub trait ElevationService: Send + Sync {
    /// Elevation in metres for each location, in input order. The service may
    /// return fewer results than requested.
    async fn elevations(&self, locations: &[LatLng]) -> Result<Vec<f64>>;
}

/// Parameters for a grounded search.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroundingRequest {
    pub prompt: String,
    pub system_instruction: Option<String>,
    pub enable_widget: Option<bool>,
}

/// Answers a natural-language query with map-grounded evidence.
#[async_trait]
pub trait GroundedSearch: Send + Sync {
    /// Returns `Ok(None)` when the service produced no usable response.
    async fn search(&self, request: &GroundingRequest) -> Result<Option<GroundedResponse>>;
}

/// The 3D map primitive.
///
/// Commands are fire-and-forget: the surface animates on its own time.
pub trait MapSurface: Send + Sync {
    fn fly_camera_to(&self, camera: &CameraTarget, duration_ms: u64);
    fn fly_camera_around(&self, camera: &CameraTarget, duration_ms: u64, rounds: u32);
    fn add_marker(&self, marker: &MapMarker);
    fn clear_markers(&self);
}

/// Whatever capabilities are currently available.
#[derive(Clone, Default)]
pub struct CapabilitySet {
    pub map: Option<Arc<dyn MapSurface>>,
    pub elevation: Option<Arc<dyn ElevationService>>,
    pub places: Option<Arc<dyn PlacesLookup>>,
    pub grounding: Option<Arc<dyn GroundedSearch>>,
}

/// Everything a [`MapController`](crate::controller::MapController) needs.
#[derive(Clone)]
pub struct MapCapabilities {
    pub map: Arc<dyn MapSurface>,
    pub elevation: Arc<dyn ElevationService>,
}

impl CapabilitySet {
    /// Returns the controller bundle once both the map surface and the
    /// elevation service are present.
    pub fn map_ready(&self) -> Option<MapCapabilities> {
        Some(MapCapabilities {
            map: self.map.clone()?,
            elevation: self.elevation.clone()?,
        })
    }

    /// Short human-readable summary, e.g. `map+elevation+places`.
    pub fn describe(&self) -> String {
        let mut parts = Vec::new();
        if self.map.is_some() {
            parts.push("map");
        }
        if self.elevation.is_some() {
            parts.push("elevation");
        }
        if self.places.is_some() {
            parts.push("places");
        }
        if self.grounding.is_some() {
            parts.push("grounding");
        }
        if parts.is_empty() {
            "none".to_string()
        } else {
            parts.join("+")
        }
    }
}
