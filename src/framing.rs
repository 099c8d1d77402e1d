//! Camera framing.
//!
//! Computes a [`CameraTarget`] that fits a set of points into the part of
//! the viewport not covered by UI padding, lifted above the highest terrain
//! under those points.
//!
//! The computation is split in two:
//!
//! - [`frame_points`] is pure: points + elevations + padding → camera.
//! - [`look_at_with_padding`] queries an [`ElevationService`] first and falls
//!   back to [`DEFAULT_ELEVATION`] when the service is missing, fails, or
//!   returns too few results.
//!
//! # Range
//!
//! The bounding box is converted to metres (equirectangular approximation at
//! the box's mid latitude). Each axis is divided by the fraction of the
//! viewport left visible on that axis, so larger insets always need a
//! larger range. The larger of the two extents, plus a margin, is turned
//! into a camera distance using a fixed vertical field of view.

use tracing::{debug, warn};

use crate::capabilities::ElevationService;
use crate::models::{CameraTarget, GeoPoint, LatLng, Padding};

/// Elevation assumed when terrain data is unavailable.
pub const DEFAULT_ELEVATION: f64 = 0.0;

/// Height of the camera center above the highest framed terrain.
pub const FRAME_ALTITUDE_OFFSET: f64 = 100.0;
pub const DEFAULT_FRAME_TILT: f64 = 45.0;
pub const MIN_FRAME_RANGE: f64 = 500.0;
pub const MAX_FRAME_RANGE: f64 = 5_000_000.0;

/// Close-up placement used for a single point.
pub const CLOSE_UP_RANGE: f64 = 500.0;
pub const CLOSE_UP_TILT: f64 = 60.0;
pub const CLOSE_UP_ALTITUDE: f64 = 200.0;

const METERS_PER_DEGREE: f64 = 111_320.0;
const FIELD_OF_VIEW_DEG: f64 = 35.0;
const FRAME_MARGIN: f64 = 1.2;
const MIN_VISIBLE_FRACTION: f64 = 0.05;

/// Close-up camera directly over `position`, `CLOSE_UP_ALTITUDE` above
/// `ground`.
pub fn close_up(position: GeoPoint, ground: f64) -> CameraTarget {
    CameraTarget::new(
        position.with_altitude(ground + CLOSE_UP_ALTITUDE),
        CLOSE_UP_RANGE,
        CLOSE_UP_TILT,
        0.0,
        0.0,
    )
}

/// Latitude/longitude extents of a point set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl Bounds {
    pub fn of(points: &[GeoPoint]) -> Option<Self> {
        let first = points.first()?;
        let init = Self {
            min_lat: first.lat,
            max_lat: first.lat,
            min_lng: first.lng,
            max_lng: first.lng,
        };
        Some(points.iter().skip(1).fold(init, |b, p| Self {
            min_lat: b.min_lat.min(p.lat),
            max_lat: b.max_lat.max(p.lat),
            min_lng: b.min_lng.min(p.lng),
            max_lng: b.max_lng.max(p.lng),
        }))
    }

    pub fn center(&self) -> LatLng {
        LatLng::new(
            (self.min_lat + self.max_lat) / 2.0,
            (self.min_lng + self.max_lng) / 2.0,
        )
    }

    /// East-west and north-south size in metres.
    pub fn size_meters(&self) -> (f64, f64) {
        let mid_lat = self.center().lat.to_radians();
        let width = (self.max_lng - self.min_lng) * METERS_PER_DEGREE * mid_lat.cos();
        let height = (self.max_lat - self.min_lat) * METERS_PER_DEGREE;
        (width.abs(), height.abs())
    }
}

/// Camera distance that fits `bounds` into the unpadded viewport area.
pub fn fit_range(bounds: &Bounds, padding: Padding) -> f64 {
    let (width, height) = bounds.size_meters();
    let visible_w = padding.visible_width().max(MIN_VISIBLE_FRACTION);
    let visible_h = padding.visible_height().max(MIN_VISIBLE_FRACTION);

    let extent = (width / visible_w).max(height / visible_h) * FRAME_MARGIN;
    let half_fov = (FIELD_OF_VIEW_DEG / 2.0).to_radians();
    let range = (extent / 2.0) / half_fov.tan();

    range.clamp(MIN_FRAME_RANGE, MAX_FRAME_RANGE)
}

/// Frame `points` given per-point terrain `elevations`.
///
/// Missing elevations (the slice is shorter than `points`) and non-finite
/// ones count as [`DEFAULT_ELEVATION`]. Returns `None` for an empty point set.
pub fn frame_points(
    points: &[GeoPoint],
    elevations: &[f64],
    padding: Padding,
) -> Option<CameraTarget> {
    let bounds = Bounds::of(points)?;
    let max_elevation = (0..points.len())
        .map(|i| {
            elevations
                .get(i)
                .copied()
                .filter(|e| e.is_finite())
                .unwrap_or(DEFAULT_ELEVATION)
        })
        .fold(f64::NEG_INFINITY, f64::max);

    if let [only] = points {
        return Some(close_up(*only, max_elevation));
    }

    let center = bounds
        .center()
        .at_altitude(max_elevation + FRAME_ALTITUDE_OFFSET);
    Some(CameraTarget::new(
        center,
        fit_range(&bounds, padding),
        DEFAULT_FRAME_TILT,
        0.0,
        0.0,
    ))
}

/// Query terrain elevation for `points` and frame them.
pub async fn look_at_with_padding(
    points: &[GeoPoint],
    padding: Padding,
    elevation: Option<&dyn ElevationService>,
) -> Option<CameraTarget> {
    if points.is_empty() {
        return None;
    }

    let elevations = match elevation {
        Some(service) => {
            let locations: Vec<LatLng> = points.iter().map(GeoPoint::lat_lng).collect();
            match service.elevations(&locations).await {
                Ok(values) if !values.is_empty() => values,
                Ok(_) => {
                    debug!("elevation service returned no results; using default elevation");
                    Vec::new()
                }
                Err(e) => {
                    warn!(error = %e, "elevation lookup failed; using default elevation");
                    Vec::new()
                }
            }
        }
        None => {
            debug!("elevation service unavailable; using default elevation");
            Vec::new()
        }
    };

    frame_points(points, &elevations, padding)
}
