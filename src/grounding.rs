//! Grounded responses and marker resolution.
//!
//! A grounded search answers a query with free text plus a list of
//! [`GroundingChunk`]s, most of which reference a place by identifier. This
//! module turns those references into [`MapMarker`]s:
//!
//! 1. [`GroundedResponse::from_json`] extracts the answer text and chunks from
//!    the service payload, keeping the raw JSON for the model.
//! 2. [`resolve_markers`] filters the chunks according to the
//!    [`MarkerBehavior`] and looks every surviving place up concurrently.
//!    Individual failures are dropped; the batch never fails as a whole.
//! 3. [`apply_resolved_markers`] writes the result to the [`MapStore`],
//!    either as a close-up on a single authoritative place or as a general
//!    marker update left to auto-framing.

use anyhow::{bail, Result};
use futures_util::future::join_all;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use tracing::{debug, info};

use crate::capabilities::PlacesLookup;
use crate::framing::close_up;
use crate::models::{CameraTarget, GroundingChunk, MapMarker, MarkerBehavior};
use crate::store::{MapStore, StateWriter};

/// Altitude given to resolved place markers.
const MARKER_ALTITUDE: f64 = 1.0;

/// A grounded search response.
///
/// Serializes as the raw payload so it can be handed back to the model
/// untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct GroundedResponse {
    raw: Value,
    text: Option<String>,
    chunks: Vec<GroundingChunk>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawResponse {
    #[serde(default)]
    candidates: Vec<RawCandidate>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCandidate {
    content: Option<RawContent>,
    grounding_metadata: Option<RawMetadata>,
}

#[derive(Deserialize)]
struct RawContent {
    #[serde(default)]
    parts: Vec<RawPart>,
}

#[derive(Deserialize)]
struct RawPart {
    text: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMetadata {
    #[serde(default)]
    grounding_chunks: Vec<RawChunk>,
}

#[derive(Deserialize)]
struct RawChunk {
    maps: Option<RawMapsChunk>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMapsChunk {
    place_id: Option<String>,
    title: Option<String>,
    place_answer_sources: Option<Value>,
}

impl GroundedResponse {
    /// Parse a `generateContent`-style payload.
    ///
    /// Only the first candidate is considered. Chunks that are not map
    /// chunks are kept with empty fields so they still count as evidence.
    pub fn from_json(raw: Value) -> Result<Self> {
        if !raw.is_object() {
            bail!("grounded response must be a JSON object");
        }
        let parsed: RawResponse = serde_json::from_value(raw.clone())?;
        let first = parsed.candidates.into_iter().next();

        let text = first
            .as_ref()
            .and_then(|c| c.content.as_ref())
            .and_then(|content| content.parts.first())
            .and_then(|part| part.text.clone());

        let chunks = first
            .and_then(|c| c.grounding_metadata)
            .map(|m| m.grounding_chunks)
            .unwrap_or_default()
            .into_iter()
            .map(|chunk| match chunk.maps {
                Some(maps) => GroundingChunk {
                    place_id: maps.place_id.filter(|id| !id.is_empty()),
                    title: maps.title,
                    place_answer_sources: maps
                        .place_answer_sources
                        .is_some_and(|v| !v.is_null() && v != Value::Bool(false)),
                },
                None => GroundingChunk::default(),
            })
            .collect();

        Ok(Self { raw, text, chunks })
    }

    /// Build a response in the service's payload shape.
    pub fn new(text: Option<&str>, chunks: Vec<GroundingChunk>) -> Self {
        let raw_chunks: Vec<Value> = chunks
            .iter()
            .map(|c| {
                let mut maps = serde_json::Map::new();
                if let Some(id) = &c.place_id {
                    maps.insert("placeId".into(), Value::String(id.clone()));
                }
                if let Some(title) = &c.title {
                    maps.insert("title".into(), Value::String(title.clone()));
                }
                if c.place_answer_sources {
                    maps.insert("placeAnswerSources".into(), serde_json::json!({}));
                }
                serde_json::json!({ "maps": maps })
            })
            .collect();

        let raw = serde_json::json!({
            "candidates": [{
                "content": { "role": "model", "parts": [{ "text": text }] },
                "groundingMetadata": { "groundingChunks": raw_chunks },
            }]
        });

        Self {
            raw,
            text: text.map(str::to_string),
            chunks,
        }
    }

    /// The model's free-text answer.
    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    pub fn chunks(&self) -> &[GroundingChunk] {
        &self.chunks
    }

    pub fn raw(&self) -> &Value {
        &self.raw
    }
}

impl Serialize for GroundedResponse {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.raw.serialize(serializer)
    }
}

/// Strip the `places/` resource prefix from a place identifier.
pub fn bare_place_id(place_id: &str) -> &str {
    place_id.strip_prefix("places/").unwrap_or(place_id)
}

/// Whether the chunk's title appears in the answer. An empty title never
/// counts as mentioned.
fn title_in(text: Option<&str>, chunk: &GroundingChunk) -> bool {
    match (text, chunk.title.as_deref()) {
        (Some(text), Some(title)) if !title.is_empty() => text.contains(title),
        _ => false,
    }
}

/// Turn grounding chunks into markers.
///
/// Output order follows chunk order; duplicates are kept. Lookups that fail
/// or come back without a location are dropped.
pub async fn resolve_markers(
    chunks: &[GroundingChunk],
    places: &dyn PlacesLookup,
    answer_text: Option<&str>,
    behavior: MarkerBehavior,
) -> Vec<MapMarker> {
    if behavior == MarkerBehavior::None || chunks.is_empty() {
        return Vec::new();
    }

    // an empty answer is no answer: nothing to filter against
    let answer_text = answer_text.filter(|t| !t.is_empty());

    let mut candidates: Vec<(&GroundingChunk, &str)> = chunks
        .iter()
        .filter_map(|c| c.place_id.as_deref().map(|id| (c, id)))
        .collect();

    if behavior == MarkerBehavior::Mentioned && answer_text.is_some() {
        candidates.retain(|(chunk, _)| title_in(answer_text, chunk));
    }

    if candidates.is_empty() {
        return Vec::new();
    }

    let lookups = candidates
        .iter()
        .map(|(_, id)| places.fetch_fields(bare_place_id(id)));
    let results = join_all(lookups).await;

    candidates
        .iter()
        .zip(results)
        .filter_map(|((chunk, id), result)| {
            let fields = match result {
                Ok(fields) => fields,
                Err(e) => {
                    debug!(place_id = %id, error = %e, "place lookup failed; dropping marker");
                    return None;
                }
            };
            let Some(location) = fields.location else {
                debug!(place_id = %id, "place has no location; dropping marker");
                return None;
            };

            let show_label = match behavior {
                MarkerBehavior::All => title_in(answer_text, chunk),
                _ => true,
            };

            Some(MapMarker {
                position: location.at_altitude(MARKER_ALTITUDE),
                label: fields.display_name.unwrap_or_default(),
                show_label,
            })
        })
        .collect()
}

/// Write resolved markers to the store.
///
/// A single marker backed by a chunk with `place_answer_sources` gets a
/// close-up camera and suppresses auto-framing; anything else replaces the
/// markers and re-enables auto-framing.
///
/// With `ticket = Some(t)` the write is dropped if a newer marker write has
/// landed since `t` was reserved. Returns whether the write was applied.
pub fn apply_resolved_markers(
    store: &MapStore,
    markers: Vec<MapMarker>,
    chunks: &[GroundingChunk],
    ticket: Option<u64>,
) -> bool {
    let has_answer_sources = chunks.iter().any(|c| c.place_answer_sources);
    let close_up_target = match markers.as_slice() {
        [only] if has_answer_sources => Some(close_up(only.position, 0.0)),
        _ => None,
    };

    match ticket {
        Some(ticket) => store.apply_if_current(ticket, |w| {
            write_markers(w, markers, close_up_target)
        }),
        None => {
            store.update(|w| write_markers(w, markers, close_up_target));
            true
        }
    }
}

fn write_markers(w: &mut StateWriter<'_>, markers: Vec<MapMarker>, close_up: Option<CameraTarget>) {
    match close_up {
        Some(target) => {
            w.set_prevent_auto_frame(true);
            w.replace_markers(markers);
            w.set_camera_target(Some(target));
        }
        None => {
            w.set_prevent_auto_frame(false);
            w.replace_markers(markers);
        }
    }
}

/// Resolve the markers of `response` and apply them to `store`.
///
/// This is the body of the background task spawned by the `mapsGrounding`
/// tool.
pub async fn resolve_and_apply(
    store: &MapStore,
    places: &dyn PlacesLookup,
    response: &GroundedResponse,
    behavior: MarkerBehavior,
    ticket: Option<u64>,
) -> bool {
    let markers = resolve_markers(response.chunks(), places, response.text(), behavior).await;
    let count = markers.len();
    let applied = apply_resolved_markers(store, markers, response.chunks(), ticket);
    if applied {
        info!(markers = count, "applied grounded markers");
    } else {
        info!(
            markers = count,
            "discarded grounded markers overtaken by a newer map update"
        );
    }
    applied
}
