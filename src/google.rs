//! HTTP capability implementations for Google Maps Platform and Gemini.
//!
//! - **[`PlacesClient`]**: Places API (New) `GET /places/{id}` with a field
//!   mask of `location,displayName`.
//! - **[`ElevationClient`]**: Elevation API, batched by
//!   [`ELEVATION_BATCH_SIZE`] locations per request.
//! - **[`GeminiGrounding`]**: `generateContent` with the Google Maps
//!   grounding tool enabled.
//!
//! API keys are read from the environment variable named in config. A
//! missing key leaves the corresponding capability out of the
//! [`CapabilitySet`] instead of failing startup.
//!
//! # Retry Strategy
//!
//! All clients share [`send_json`]:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 250ms, 500ms, 1s, 2s, ... (capped at 2^4 steps)

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::capabilities::{
    CapabilitySet, ElevationService, GroundedSearch, GroundingRequest, PlaceFields, PlacesLookup,
};
use crate::config::{Config, GroundingConfig, MapsConfig};
use crate::grounding::GroundedResponse;
use crate::models::LatLng;

/// Maximum number of locations per Elevation API request.
pub const ELEVATION_BATCH_SIZE: usize = 256;

fn http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?)
}

fn api_key(env_name: &str) -> Option<String> {
    std::env::var(env_name).ok().filter(|k| !k.trim().is_empty())
}

/// Send a request built by `build`, retrying transient failures, and parse
/// the body as JSON.
async fn send_json(
    service: &str,
    max_retries: u32,
    build: impl Fn() -> reqwest::RequestBuilder,
) -> Result<serde_json::Value> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_millis(250 << (attempt - 1).min(4));
            debug!(service, attempt, ?delay, "retrying request");
            tokio::time::sleep(delay).await;
        }

        match build().send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return response
                        .json()
                        .await
                        .with_context(|| format!("{} returned invalid JSON", service));
                }

                let body_text = response.text().await.unwrap_or_default();
                if status.as_u16() == 429 || status.is_server_error() {
                    last_err = Some(anyhow::anyhow!("{} error {}: {}", service, status, body_text));
                    continue;
                }

                bail!("{} error {}: {}", service, status, body_text);
            }
            Err(e) => {
                last_err = Some(e.into());
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("{} failed after retries", service)))
}

// ============ Places ============

/// Places API (New) client.
pub struct PlacesClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    max_retries: u32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaceBody {
    location: Option<PlaceLocation>,
    display_name: Option<LocalizedText>,
}

#[derive(Deserialize)]
struct PlaceLocation {
    latitude: f64,
    longitude: f64,
}

#[derive(Deserialize)]
struct LocalizedText {
    text: String,
}

impl PlacesClient {
    pub fn new(config: &MapsConfig, api_key: String) -> Result<Self> {
        Ok(Self {
            client: http_client(config.timeout_secs)?,
            base_url: config.places_base_url.trim_end_matches('/').to_string(),
            api_key,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl PlacesLookup for PlacesClient {
    async fn fetch_fields(&self, place_id: &str) -> Result<PlaceFields> {
        let url = format!("{}/places/{}", self.base_url, place_id);
        let json = send_json("places", self.max_retries, || {
            self.client
                .get(&url)
                .header("X-Goog-Api-Key", &self.api_key)
                .header("X-Goog-FieldMask", "location,displayName")
        })
        .await?;

        let body: PlaceBody = serde_json::from_value(json)?;
        Ok(PlaceFields {
            location: body
                .location
                .map(|l| LatLng::new(l.latitude, l.longitude)),
            display_name: body.display_name.map(|d| d.text),
        })
    }
}

// ============ Elevation ============

/// Elevation API client.
pub struct ElevationClient {
    client: reqwest::Client,
    url: String,
    api_key: String,
    max_retries: u32,
}

#[derive(Deserialize)]
struct ElevationBody {
    status: String,
    #[serde(default)]
    results: Vec<ElevationResult>,
    error_message: Option<String>,
}

#[derive(Deserialize)]
struct ElevationResult {
    elevation: f64,
}

/// Encode locations as the Elevation API's `lat,lng|lat,lng` list.
fn encode_locations(locations: &[LatLng]) -> String {
    locations
        .iter()
        .map(|l| format!("{:.6},{:.6}", l.lat, l.lng))
        .collect::<Vec<_>>()
        .join("|")
}

impl ElevationClient {
    pub fn new(config: &MapsConfig, api_key: String) -> Result<Self> {
        Ok(Self {
            client: http_client(config.timeout_secs)?,
            url: config.elevation_url.clone(),
            api_key,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl ElevationService for ElevationClient {
    async fn elevations(&self, locations: &[LatLng]) -> Result<Vec<f64>> {
        let mut out = Vec::with_capacity(locations.len());

        for batch in locations.chunks(ELEVATION_BATCH_SIZE) {
            let encoded = encode_locations(batch);
            let json = send_json("elevation", self.max_retries, || {
                self.client
                    .get(&self.url)
                    .query(&[("locations", encoded.as_str()), ("key", self.api_key.as_str())])
            })
            .await?;

            let body: ElevationBody = serde_json::from_value(json)?;
            match body.status.as_str() {
                "OK" => out.extend(body.results.into_iter().map(|r| r.elevation)),
                "ZERO_RESULTS" => {}
                other => bail!(
                    "elevation status {}: {}",
                    other,
                    body.error_message.unwrap_or_default()
                ),
            }
        }

        Ok(out)
    }
}

// ============ Grounded search ============

/// Gemini `generateContent` client with Google Maps grounding.
pub struct GeminiGrounding {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
    max_retries: u32,
}

impl GeminiGrounding {
    pub fn new(config: &GroundingConfig, api_key: String) -> Result<Self> {
        Ok(Self {
            client: http_client(config.timeout_secs)?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
            max_retries: config.max_retries,
        })
    }
}

/// Request body for a grounded `generateContent` call.
pub fn grounding_body(request: &GroundingRequest) -> serde_json::Value {
    let mut maps_tool = serde_json::Map::new();
    if let Some(enable) = request.enable_widget {
        maps_tool.insert("enableWidget".into(), serde_json::Value::Bool(enable));
    }

    let mut body = serde_json::json!({
        "contents": [{ "role": "user", "parts": [{ "text": request.prompt }] }],
        "tools": [{ "googleMaps": maps_tool }],
    });
    if let Some(instruction) = &request.system_instruction {
        body["systemInstruction"] = serde_json::json!({ "parts": [{ "text": instruction }] });
    }
    body
}

#[async_trait]
impl GroundedSearch for GeminiGrounding {
    async fn search(&self, request: &GroundingRequest) -> Result<Option<GroundedResponse>> {
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        let body = grounding_body(request);

        let json = send_json("grounding", self.max_retries, || {
            self.client
                .post(&url)
                .header("x-goog-api-key", &self.api_key)
                .json(&body)
        })
        .await?;

        let has_candidates = json
            .get("candidates")
            .and_then(|c| c.as_array())
            .is_some_and(|c| !c.is_empty());
        if !has_candidates {
            return Ok(None);
        }

        Ok(Some(GroundedResponse::from_json(json)?))
    }
}

// ============ Wiring ============

/// Build the HTTP-backed capabilities available with the current
/// environment. The map surface is never provided here; it belongs to the
/// rendering front end.
pub fn capabilities_from_config(config: &Config) -> Result<CapabilitySet> {
    let mut caps = CapabilitySet::default();

    match api_key(&config.maps.api_key_env) {
        Some(key) => {
            caps.places = Some(Arc::new(PlacesClient::new(&config.maps, key.clone())?));
            caps.elevation = Some(Arc::new(ElevationClient::new(&config.maps, key)?));
        }
        None => warn!(
            env = %config.maps.api_key_env,
            "maps API key not set; places and elevation lookups unavailable"
        ),
    }

    if config.grounding.is_enabled() {
        match api_key(&config.grounding.api_key_env) {
            Some(key) => {
                caps.grounding = Some(Arc::new(GeminiGrounding::new(&config.grounding, key)?));
            }
            None => warn!(
                env = %config.grounding.api_key_env,
                "grounding API key not set; grounded search unavailable"
            ),
        }
    }

    Ok(caps)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_locations() {
        let encoded = encode_locations(&[LatLng::new(25.1, 55.2), LatLng::new(-1.5, 3.25)]);
        assert_eq!(encoded, "25.100000,55.200000|-1.500000,3.250000");
    }

    #[test]
    fn test_grounding_body_shape() {
        let body = grounding_body(&GroundingRequest {
            prompt: "schools near Dubai Marina".to_string(),
            system_instruction: Some("Be brief.".to_string()),
            enable_widget: Some(true),
        });
        assert_eq!(body["contents"][0]["parts"][0]["text"], "schools near Dubai Marina");
        assert_eq!(body["tools"][0]["googleMaps"]["enableWidget"], true);
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "Be brief.");

        let plain = grounding_body(&GroundingRequest {
            prompt: "parks".to_string(),
            ..Default::default()
        });
        assert!(plain.get("systemInstruction").is_none());
        assert!(plain["tools"][0]["googleMaps"].as_object().unwrap().is_empty());
    }

    #[test]
    fn test_place_body_parses() {
        let body: PlaceBody = serde_json::from_value(serde_json::json!({
            "location": { "latitude": 25.19, "longitude": 55.27 },
            "displayName": { "text": "Dubai Mall", "languageCode": "en" }
        }))
        .unwrap();
        assert_eq!(body.display_name.unwrap().text, "Dubai Mall");
        assert_eq!(body.location.unwrap().latitude, 25.19);
    }

    #[test]
    fn test_missing_keys_leave_capabilities_out() {
        let mut config = Config::default();
        config.maps.api_key_env = "MAPCTL_TEST_UNSET_MAPS_KEY".to_string();
        config.grounding.api_key_env = "MAPCTL_TEST_UNSET_GEMINI_KEY".to_string();
        let caps = capabilities_from_config(&config).unwrap();
        assert_eq!(caps.describe(), "none");
    }
}
