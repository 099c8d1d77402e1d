//! In-memory capability implementations for offline runs and tests.
//!
//! - [`RecordingSurface`] records every map command instead of rendering.
//! - [`StaticPlaces`] answers place lookups from a table.
//! - [`StaticElevation`] returns a fixed or per-location elevation.
//! - [`CannedGrounding`] replays a prepared grounded response.
//!
//! All of them are deterministic and never touch the network.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError, RwLock};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Serialize;

use crate::capabilities::{
    ElevationService, GroundedSearch, GroundingRequest, MapSurface, PlaceFields, PlacesLookup,
};
use crate::catalog::Catalog;
use crate::grounding::GroundedResponse;
use crate::models::{CameraTarget, LatLng, MapMarker};

/// A command issued to a [`RecordingSurface`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum SurfaceCommand {
    FlyTo {
        camera: CameraTarget,
        duration_ms: u64,
    },
    FlyAround {
        camera: CameraTarget,
        duration_ms: u64,
        rounds: u32,
    },
    AddMarker {
        marker: MapMarker,
    },
    ClearMarkers,
}

/// Map surface that keeps a log of commands and the markers it would show.
pub struct RecordingSurface {
    commands: Mutex<Vec<SurfaceCommand>>,
    markers: Mutex<Vec<MapMarker>>,
}

impl RecordingSurface {
    pub fn new() -> Self {
        Self {
            commands: Mutex::new(Vec::new()),
            markers: Mutex::new(Vec::new()),
        }
    }

    pub fn commands(&self) -> Vec<SurfaceCommand> {
        self.commands.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Markers currently on the surface.
    pub fn markers(&self) -> Vec<MapMarker> {
        self.markers.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Every camera the surface was asked to fly to, in order.
    pub fn flights(&self) -> Vec<CameraTarget> {
        self.commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter_map(|c| match c {
                SurfaceCommand::FlyTo { camera, .. } => Some(*camera),
                _ => None,
            })
            .collect()
    }

    pub fn last_flight(&self) -> Option<CameraTarget> {
        self.flights().last().copied()
    }
}

impl Default for RecordingSurface {
    fn default() -> Self {
        Self::new()
    }
}

impl MapSurface for RecordingSurface {
    fn fly_camera_to(&self, camera: &CameraTarget, duration_ms: u64) {
        self.commands.lock().unwrap_or_else(PoisonError::into_inner).push(SurfaceCommand::FlyTo {
            camera: *camera,
            duration_ms,
        });
    }

    fn fly_camera_around(&self, camera: &CameraTarget, duration_ms: u64, rounds: u32) {
        self.commands.lock().unwrap_or_else(PoisonError::into_inner).push(SurfaceCommand::FlyAround {
            camera: *camera,
            duration_ms,
            rounds,
        });
    }

    fn add_marker(&self, marker: &MapMarker) {
        self.markers.lock().unwrap_or_else(PoisonError::into_inner).push(marker.clone());
        self.commands.lock().unwrap_or_else(PoisonError::into_inner).push(SurfaceCommand::AddMarker {
            marker: marker.clone(),
        });
    }

    fn clear_markers(&self) {
        self.markers.lock().unwrap_or_else(PoisonError::into_inner).clear();
        self.commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(SurfaceCommand::ClearMarkers);
    }
}

enum PlaceEntry {
    Found(PlaceFields),
    Failing(String),
}

/// Place lookups answered from an in-memory table.
///
/// Unknown identifiers fail, like a rejected request would.
pub struct StaticPlaces {
    entries: RwLock<HashMap<String, PlaceEntry>>,
    delays: RwLock<HashMap<String, Duration>>,
}

impl StaticPlaces {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            delays: RwLock::new(HashMap::new()),
        }
    }

    /// Place table built from every project in the catalog, keyed by a slug
    /// of the project name. Used by `mapctl call --offline`.
    pub fn from_catalog(catalog: &Catalog) -> Self {
        let places = Self::new();
        for community in catalog.communities() {
            for project in &community.projects {
                places.insert(
                    &project_place_id(&project.name),
                    &project.name,
                    project.position,
                );
            }
        }
        places
    }

    pub fn insert(&self, place_id: &str, display_name: &str, location: LatLng) {
        self.entries.write().unwrap_or_else(PoisonError::into_inner).insert(
            place_id.to_string(),
            PlaceEntry::Found(PlaceFields {
                location: Some(location),
                display_name: Some(display_name.to_string()),
            }),
        );
    }

    /// Register a place that resolves but has no location.
    pub fn insert_without_location(&self, place_id: &str, display_name: &str) {
        self.entries.write().unwrap_or_else(PoisonError::into_inner).insert(
            place_id.to_string(),
            PlaceEntry::Found(PlaceFields {
                location: None,
                display_name: Some(display_name.to_string()),
            }),
        );
    }

    /// Register a place whose lookup is rejected with `message`.
    pub fn insert_failing(&self, place_id: &str, message: &str) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(place_id.to_string(), PlaceEntry::Failing(message.to_string()));
    }

    /// Delay the lookup of `place_id` by `delay`.
    pub fn delay(&self, place_id: &str, delay: Duration) {
        self.delays
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(place_id.to_string(), delay);
    }
}

impl Default for StaticPlaces {
    fn default() -> Self {
        Self::new()
    }
}

/// Identifier used for catalog projects in [`StaticPlaces::from_catalog`].
pub fn project_place_id(name: &str) -> String {
    name.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

#[async_trait]
impl PlacesLookup for StaticPlaces {
    async fn fetch_fields(&self, place_id: &str) -> Result<PlaceFields> {
        let delay = self.delays.read().unwrap_or_else(PoisonError::into_inner).get(place_id).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        match self.entries.read().unwrap_or_else(PoisonError::into_inner).get(place_id) {
            Some(PlaceEntry::Found(fields)) => Ok(fields.clone()),
            Some(PlaceEntry::Failing(message)) => bail!("{}", message),
            None => bail!("place not found: {}", place_id),
        }
    }
}

/// Elevation service with a fixed answer.
pub struct StaticElevation {
    default_elevation: Option<f64>,
    overrides: Vec<(LatLng, f64)>,
}

impl StaticElevation {
    /// Every location reports `elevation`.
    pub fn flat(elevation: f64) -> Self {
        Self {
            default_elevation: Some(elevation),
            overrides: Vec::new(),
        }
    }

    /// Every request fails, as if the service were down.
    pub fn unavailable() -> Self {
        Self {
            default_elevation: None,
            overrides: Vec::new(),
        }
    }

    /// Report `elevation` for locations within ~1 m of `at`.
    pub fn with_point(mut self, at: LatLng, elevation: f64) -> Self {
        self.overrides.push((at, elevation));
        self
    }
}

#[async_trait]
impl ElevationService for StaticElevation {
    async fn elevations(&self, locations: &[LatLng]) -> Result<Vec<f64>> {
        let Some(default_elevation) = self.default_elevation else {
            bail!("elevation service unavailable");
        };
        Ok(locations
            .iter()
            .map(|loc| {
                self.overrides
                    .iter()
                    .find(|(at, _)| {
                        (at.lat - loc.lat).abs() < 1e-5 && (at.lng - loc.lng).abs() < 1e-5
                    })
                    .map(|(_, e)| *e)
                    .unwrap_or(default_elevation)
            })
            .collect())
    }
}

/// Grounded search that replays a prepared response and records requests.
pub struct CannedGrounding {
    response: Option<GroundedResponse>,
    requests: Mutex<Vec<GroundingRequest>>,
}

impl CannedGrounding {
    pub fn new(response: Option<GroundedResponse>) -> Self {
        Self {
            response,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<GroundingRequest> {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl GroundedSearch for CannedGrounding {
    async fn search(&self, request: &GroundingRequest) -> Result<Option<GroundedResponse>> {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner).push(request.clone());
        Ok(self.response.clone())
    }
}
