//! Core data models used throughout the map orchestrator.
//!
//! These types describe what is shown on the map (markers, camera commands),
//! the viewport insets reserved by surrounding UI, and the grounding evidence
//! returned by the model runtime.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// A geographic position with altitude in metres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
    #[serde(default)]
    pub altitude: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64, altitude: f64) -> Self {
        Self { lat, lng, altitude }
    }

    /// Returns the same position at a different altitude.
    pub fn with_altitude(self, altitude: f64) -> Self {
        Self { altitude, ..self }
    }

    /// Drops the altitude component.
    pub fn lat_lng(&self) -> LatLng {
        LatLng {
            lat: self.lat,
            lng: self.lng,
        }
    }
}

/// A plain latitude/longitude pair, as exchanged with lookup services.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    pub fn at_altitude(self, altitude: f64) -> GeoPoint {
        GeoPoint::new(self.lat, self.lng, altitude)
    }
}

/// A labelled marker on the map.
///
/// Markers are never patched in place: the store always replaces the whole
/// set at once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapMarker {
    pub position: GeoPoint,
    pub label: String,
    pub show_label: bool,
}

/// A one-shot camera command.
///
/// `range` is the distance from the camera to `center` in metres, `tilt` is
/// in degrees from straight down (0) to horizon (90), `heading` is a compass
/// bearing in `[0, 360)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraTarget {
    pub center: GeoPoint,
    pub range: f64,
    pub tilt: f64,
    pub heading: f64,
    pub roll: f64,
}

impl CameraTarget {
    /// Builds a target with tilt clamped to `[0, 90]`, heading normalised to
    /// `[0, 360)` and a strictly positive range.
    pub fn new(center: GeoPoint, range: f64, tilt: f64, heading: f64, roll: f64) -> Self {
        Self {
            center,
            range: if range > 0.0 { range } else { f64::EPSILON },
            tilt: tilt.clamp(0.0, 90.0),
            heading: heading.rem_euclid(360.0),
            roll,
        }
    }
}

/// Fractional viewport insets `[top, right, bottom, left]` reserved for UI
/// overlapping the map. Each inset lies in `[0, 1)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "[f64; 4]", into = "[f64; 4]")]
pub struct Padding {
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
    pub left: f64,
}

impl Padding {
    pub fn new(top: f64, right: f64, bottom: f64, left: f64) -> Result<Self> {
        for (name, value) in [
            ("top", top),
            ("right", right),
            ("bottom", bottom),
            ("left", left),
        ] {
            if !(0.0..1.0).contains(&value) {
                bail!("padding.{} must be in [0, 1), got {}", name, value);
            }
        }
        Ok(Self {
            top,
            right,
            bottom,
            left,
        })
    }

    /// Uniform inset on all four sides.
    pub fn uniform(inset: f64) -> Result<Self> {
        Self::new(inset, inset, inset, inset)
    }

    /// Fraction of the viewport width left visible between the insets.
    pub fn visible_width(&self) -> f64 {
        1.0 - self.left - self.right
    }

    /// Fraction of the viewport height left visible between the insets.
    pub fn visible_height(&self) -> f64 {
        1.0 - self.top - self.bottom
    }
}

impl Default for Padding {
    fn default() -> Self {
        Self {
            top: 0.05,
            right: 0.05,
            bottom: 0.05,
            left: 0.05,
        }
    }
}

impl TryFrom<[f64; 4]> for Padding {
    type Error = anyhow::Error;

    fn try_from(value: [f64; 4]) -> Result<Self> {
        Self::new(value[0], value[1], value[2], value[3])
    }
}

impl From<Padding> for [f64; 4] {
    fn from(p: Padding) -> Self {
        [p.top, p.right, p.bottom, p.left]
    }
}

/// Snapshot of everything the map should currently show.
///
/// `generation` identifies the last marker-set write; see
/// [`MapStore`](crate::store::MapStore) for how it orders concurrent writers.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MapState {
    pub markers: Vec<MapMarker>,
    pub camera_target: Option<CameraTarget>,
    pub prevent_auto_frame: bool,
    pub generation: u64,
}

/// Evidence item attached to a grounded model answer.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroundingChunk {
    pub place_id: Option<String>,
    pub title: Option<String>,
    pub place_answer_sources: bool,
}

/// Which grounding results get markers on the map.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkerBehavior {
    /// Only places whose title appears in the answer text.
    #[default]
    Mentioned,
    /// Every place found; labels only on mentioned ones.
    All,
    /// No markers at all.
    None,
}

impl MarkerBehavior {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarkerBehavior::Mentioned => "mentioned",
            MarkerBehavior::All => "all",
            MarkerBehavior::None => "none",
        }
    }
}

impl std::str::FromStr for MarkerBehavior {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "mentioned" => Ok(MarkerBehavior::Mentioned),
            "all" => Ok(MarkerBehavior::All),
            "none" => Ok(MarkerBehavior::None),
            other => bail!("unknown marker behavior: '{}'", other),
        }
    }
}
