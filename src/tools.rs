//! Tool dispatcher.
//!
//! The model drives the map through three function-calling tools. This
//! module owns their declarations, validates incoming arguments against
//! them, and routes each call to its handler.
//!
//! # Tools
//!
//! | Tool | Arguments | Effect on the map |
//! |------|-----------|-------------------|
//! | `mapsGrounding` | `query`, `markerBehavior?` | grounded search; markers resolved in the background |
//! | `locateCommunity` | `communityName` | clears markers, establishing shot of the community |
//! | `findProjects` | `communityName`, `projectType` | one marker per matching project, auto-framed |
//!
//! # Dispatch
//!
//! 1. Look up the [`ToolSpec`] by name. Unknown or disabled tools fail with
//!    [`DispatchError::UnknownTool`].
//! 2. Validate the arguments against the tool's parameter schema. A
//!    violation becomes a plain-text [`ToolResponse`] and nothing changes.
//! 3. Parse the arguments into the closed [`ToolCall`] enum and run the
//!    matching handler.
//!
//! Handlers report user-facing outcomes ("not found", "no match") as text,
//! never as errors. The dispatcher keeps no state between calls; everything
//! it touches lives in the [`ToolContext`].

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::capabilities::{CapabilitySet, GroundingRequest};
use crate::catalog::{filter_by_type, Catalog};
use crate::config::GroundingConfig;
use crate::error::{ArgumentError, DispatchError};
use crate::grounding::{resolve_and_apply, GroundedResponse};
use crate::models::{CameraTarget, GroundingChunk, LatLng, MapMarker, MarkerBehavior, Padding};
use crate::store::MapStore;

/// Establishing shot used by `locateCommunity`.
pub const COMMUNITY_ALTITUDE: f64 = 2_000.0;
pub const COMMUNITY_RANGE: f64 = 10_000.0;
pub const COMMUNITY_TILT: f64 = 30.0;

/// Altitude of project markers placed by `findProjects`.
pub const PROJECT_MARKER_ALTITUDE: f64 = 1.0;

/// Returned whenever grounded search is unavailable or comes back empty.
pub const GROUNDING_FAILURE: &str = "Failed to get a response from maps grounding.";

// ═══════════════════════════════════════════════════════════════════════
// Declarations
// ═══════════════════════════════════════════════════════════════════════

/// How the model runtime should treat a tool's response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Scheduling {
    /// Interrupt the model's current turn with the result.
    Interrupt,
    /// Deliver the result without interrupting.
    NonInterrupting,
}

/// A function declaration as handed to the model runtime.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
    #[serde(rename = "isEnabled")]
    pub enabled: bool,
    pub scheduling: Scheduling,
}

/// Declarations of every tool the dispatcher understands.
pub fn tool_specs() -> Vec<ToolSpec> {
    vec![
        ToolSpec {
            name: "mapsGrounding".to_string(),
            description: "Uses Google Maps data to find any type of place or point of interest: \
                schools, hospitals, malls, restaurants, parks, museums, hotels and more. Use it \
                whenever the user asks about locations, amenities or places."
                .to_string(),
            parameters: json!({
                "type": "OBJECT",
                "properties": {
                    "query": {
                        "type": "STRING",
                        "description": "A natural language search query that names the area, \
                            e.g. \"schools in Downtown Dubai\" or \"parks near Dubai Marina\"."
                    },
                    "markerBehavior": {
                        "type": "STRING",
                        "description": "Which results get markers: \"all\" for every result, \
                            \"mentioned\" for places named in your answer, \"none\" for no markers.",
                        "enum": ["mentioned", "all", "none"],
                        "default": "mentioned"
                    }
                },
                "required": ["query"]
            }),
            enabled: true,
            scheduling: Scheduling::Interrupt,
        },
        ToolSpec {
            name: "locateCommunity".to_string(),
            description: "Shows a specific Dubai community on the map with a wide establishing \
                shot of the area."
                .to_string(),
            parameters: json!({
                "type": "OBJECT",
                "properties": {
                    "communityName": {
                        "type": "STRING",
                        "description": "Name of the community, e.g. \"Dubai Hills Estate\"."
                    }
                },
                "required": ["communityName"]
            }),
            enabled: true,
            scheduling: Scheduling::Interrupt,
        },
        ToolSpec {
            name: "findProjects".to_string(),
            description: "Finds real estate projects of a given type within a community and \
                marks each one on the map."
                .to_string(),
            parameters: json!({
                "type": "OBJECT",
                "properties": {
                    "communityName": {
                        "type": "STRING",
                        "description": "The community to search in."
                    },
                    "projectType": {
                        "type": "STRING",
                        "description": "The type of project, e.g. \"Villas\", \"Apartments\" or \"Off-plan\"."
                    }
                },
                "required": ["communityName", "projectType"]
            }),
            enabled: true,
            scheduling: Scheduling::Interrupt,
        },
    ]
}

/// Look up an enabled tool by name.
pub fn find_spec(name: &str) -> Option<ToolSpec> {
    tool_specs()
        .into_iter()
        .find(|spec| spec.name == name && spec.enabled)
}

// ═══════════════════════════════════════════════════════════════════════
// Calls and responses
// ═══════════════════════════════════════════════════════════════════════

/// A function call emitted by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

impl FunctionCall {
    pub fn new(name: &str, args: Value) -> Self {
        Self {
            id: None,
            name: name.to_string(),
            args,
        }
    }
}

/// A validated tool invocation.
///
/// `systemInstruction` and `enableWidget` are not declared to the model but
/// are accepted from programmatic callers.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "tool", content = "args")]
pub enum ToolCall {
    #[serde(rename = "mapsGrounding", rename_all = "camelCase")]
    MapsGrounding {
        query: String,
        #[serde(default)]
        marker_behavior: MarkerBehavior,
        #[serde(default)]
        system_instruction: Option<String>,
        #[serde(default)]
        enable_widget: Option<bool>,
    },
    #[serde(rename = "locateCommunity", rename_all = "camelCase")]
    LocateCommunity { community_name: String },
    #[serde(rename = "findProjects", rename_all = "camelCase")]
    FindProjects {
        community_name: String,
        project_type: String,
    },
}

impl ToolCall {
    /// Parse arguments that already passed schema validation.
    pub fn parse(tool: &str, args: Value) -> Result<Self, ArgumentError> {
        serde_json::from_value(json!({ "tool": tool, "args": args }))
            .map_err(|e| ArgumentError::Malformed(e.to_string()))
    }
}

/// What a handler hands back to the model.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ToolResponse {
    Text(String),
    Grounded(GroundedResponse),
}

impl ToolResponse {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ToolResponse::Text(text) => Some(text),
            ToolResponse::Grounded(_) => None,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Validation
// ═══════════════════════════════════════════════════════════════════════

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Validate `params` against a tool's parameter schema and fill in
/// declared defaults.
///
/// Schema type names are matched case-insensitively (`STRING` and `string`
/// are the same). Required string parameters must not be blank. Properties
/// the schema does not declare pass through untouched.
pub fn validate_params(schema: &Value, params: &Value) -> Result<Value, ArgumentError> {
    let params_obj = match params {
        Value::Object(map) => map.clone(),
        Value::Null => serde_json::Map::new(),
        _ => return Err(ArgumentError::NotAnObject),
    };

    let properties = schema
        .get("properties")
        .and_then(|p| p.as_object())
        .cloned()
        .unwrap_or_default();

    let required: Vec<String> = schema
        .get("required")
        .and_then(|r| r.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(|s| s.to_string()))
                .collect()
        })
        .unwrap_or_default();

    let mut result = params_obj.clone();

    for req_field in &required {
        let present = match params_obj.get(req_field) {
            None | Some(Value::Null) => false,
            Some(Value::String(s)) => !s.trim().is_empty(),
            Some(_) => true,
        };
        if !present {
            return Err(ArgumentError::Missing(req_field.clone()));
        }
    }

    for (prop_name, prop_schema) in &properties {
        let Some(value) = params_obj.get(prop_name).filter(|v| !v.is_null()) else {
            if let Some(default) = prop_schema.get("default") {
                result.insert(prop_name.clone(), default.clone());
            } else {
                result.remove(prop_name);
            }
            continue;
        };

        if let Some(expected_type) = prop_schema.get("type").and_then(|t| t.as_str()) {
            let type_ok = match expected_type.to_ascii_lowercase().as_str() {
                "string" => value.is_string(),
                "integer" => value.is_i64() || value.is_u64(),
                "number" => value.is_number(),
                "boolean" => value.is_boolean(),
                "array" => value.is_array(),
                "object" => value.is_object(),
                _ => true,
            };
            if !type_ok {
                return Err(ArgumentError::WrongType {
                    name: prop_name.clone(),
                    expected: expected_type.to_ascii_lowercase(),
                    actual: json_type_name(value),
                });
            }
        }

        if let Some(enum_values) = prop_schema.get("enum").and_then(|e| e.as_array()) {
            if !enum_values.contains(value) {
                let allowed: Vec<String> = enum_values.iter().map(|v| v.to_string()).collect();
                return Err(ArgumentError::NotAllowed {
                    name: prop_name.clone(),
                    allowed: allowed.join(", "),
                });
            }
        }
    }

    Ok(Value::Object(result))
}

// ═══════════════════════════════════════════════════════════════════════
// ToolContext
// ═══════════════════════════════════════════════════════════════════════

/// Grounding settings applied to every `mapsGrounding` call.
#[derive(Debug, Clone, PartialEq)]
pub struct GroundingOptions {
    /// Fallback when the call carries no system instruction.
    pub system_instruction: Option<String>,
    pub enable_widget: bool,
    /// Reserve a generation ticket when resolution starts so a slower
    /// resolution cannot overwrite markers placed after it.
    pub discard_stale_resolutions: bool,
}

impl Default for GroundingOptions {
    fn default() -> Self {
        Self {
            system_instruction: None,
            enable_widget: false,
            discard_stale_resolutions: true,
        }
    }
}

impl From<&GroundingConfig> for GroundingOptions {
    fn from(config: &GroundingConfig) -> Self {
        Self {
            system_instruction: config.system_instruction.clone(),
            enable_widget: config.enable_widget,
            discard_stale_resolutions: config.discard_stale_resolutions,
        }
    }
}

/// The last grounded response and its chunks, held for the surrounding UI
/// (attribution widget, source list).
pub struct HeldGrounding {
    response: watch::Sender<Option<GroundedResponse>>,
    chunks: watch::Sender<Option<Vec<GroundingChunk>>>,
}

impl HeldGrounding {
    pub fn new() -> Self {
        Self {
            response: watch::channel(None).0,
            chunks: watch::channel(None).0,
        }
    }

    pub fn set_response(&self, response: Option<GroundedResponse>) {
        self.response.send_replace(response);
    }

    pub fn set_chunks(&self, chunks: Option<Vec<GroundingChunk>>) {
        self.chunks.send_replace(chunks);
    }

    pub fn response(&self) -> Option<GroundedResponse> {
        self.response.borrow().clone()
    }

    pub fn chunks(&self) -> Option<Vec<GroundingChunk>> {
        self.chunks.borrow().clone()
    }

    pub fn subscribe_response(&self) -> watch::Receiver<Option<GroundedResponse>> {
        self.response.subscribe()
    }
}

impl Default for HeldGrounding {
    fn default() -> Self {
        Self::new()
    }
}

/// Handles of fire-and-forget tasks, kept so callers can wait for them.
#[derive(Default)]
pub struct BackgroundTasks {
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `task` on the current runtime without waiting for it.
    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(task);
        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);
    }

    /// Number of tasks spawned and not yet drained.
    pub fn pending(&self) -> usize {
        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Wait for every task spawned so far. Returns how many were awaited.
    pub async fn drain(&self) -> usize {
        let mut drained = 0;
        loop {
            let handles: Vec<JoinHandle<()>> = std::mem::take(
                &mut *self.handles.lock().unwrap_or_else(PoisonError::into_inner),
            );
            if handles.is_empty() {
                return drained;
            }
            for handle in handles {
                if let Err(e) = handle.await {
                    warn!(error = %e, "background task failed");
                }
                drained += 1;
            }
        }
    }
}

/// Everything a tool handler may touch.
///
/// Cheap to share: the store is a handle, the rest sits behind `Arc`s or
/// watch receivers.
pub struct ToolContext {
    store: MapStore,
    capabilities: watch::Receiver<CapabilitySet>,
    padding: watch::Receiver<Padding>,
    catalog: Arc<Catalog>,
    held: Arc<HeldGrounding>,
    options: GroundingOptions,
    tasks: Arc<BackgroundTasks>,
}

impl ToolContext {
    /// Context with the built-in catalog, default padding and default
    /// grounding options.
    pub fn new(store: MapStore, capabilities: watch::Receiver<CapabilitySet>) -> Self {
        Self {
            store,
            capabilities,
            padding: watch::channel(Padding::default()).1,
            catalog: Arc::new(Catalog::builtin()),
            held: Arc::new(HeldGrounding::new()),
            options: GroundingOptions::default(),
            tasks: Arc::new(BackgroundTasks::new()),
        }
    }

    pub fn with_padding(mut self, padding: watch::Receiver<Padding>) -> Self {
        self.padding = padding;
        self
    }

    pub fn with_catalog(mut self, catalog: Arc<Catalog>) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn with_grounding_options(mut self, options: GroundingOptions) -> Self {
        self.options = options;
        self
    }

    pub fn store(&self) -> &MapStore {
        &self.store
    }

    /// The capabilities available right now.
    pub fn capabilities(&self) -> CapabilitySet {
        self.capabilities.borrow().clone()
    }

    pub fn padding(&self) -> Padding {
        *self.padding.borrow()
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn held(&self) -> &HeldGrounding {
        &self.held
    }

    pub fn options(&self) -> &GroundingOptions {
        &self.options
    }

    pub fn tasks(&self) -> &BackgroundTasks {
        &self.tasks
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Dispatch
// ═══════════════════════════════════════════════════════════════════════

/// Route one function call to its handler.
pub async fn dispatch(call: &FunctionCall, ctx: &ToolContext) -> Result<ToolResponse, DispatchError> {
    let spec = find_spec(&call.name).ok_or_else(|| DispatchError::UnknownTool(call.name.clone()))?;

    let parsed = validate_params(&spec.parameters, &call.args)
        .and_then(|args| ToolCall::parse(&spec.name, args));
    let tool_call = match parsed {
        Ok(tool_call) => tool_call,
        Err(e) => {
            warn!(tool = %call.name, error = %e, "rejected tool arguments");
            return Ok(ToolResponse::Text(format!(
                "Invalid arguments for {}: {}",
                spec.name, e
            )));
        }
    };

    info!(tool = %call.name, id = ?call.id, "dispatching tool call");

    let response = match tool_call {
        ToolCall::LocateCommunity { community_name } => {
            ToolResponse::Text(locate_community(ctx, &community_name))
        }
        ToolCall::FindProjects {
            community_name,
            project_type,
        } => ToolResponse::Text(find_projects(ctx, &community_name, &project_type)),
        ToolCall::MapsGrounding {
            query,
            marker_behavior,
            system_instruction,
            enable_widget,
        } => {
            let request = GroundingRequest {
                prompt: query,
                system_instruction: system_instruction.or_else(|| ctx.options.system_instruction.clone()),
                enable_widget: enable_widget.or(ctx.options.enable_widget.then_some(true)),
            };
            maps_grounding(ctx, request, marker_behavior).await
        }
    };
    Ok(response)
}

/// Camera for an establishing shot of a community.
pub fn community_camera(position: LatLng) -> CameraTarget {
    CameraTarget::new(
        position.at_altitude(COMMUNITY_ALTITUDE),
        COMMUNITY_RANGE,
        COMMUNITY_TILT,
        0.0,
        0.0,
    )
}

fn locate_community(ctx: &ToolContext, community_name: &str) -> String {
    let Some(community) = ctx.catalog.find_community(community_name) else {
        let (first, second) = ctx.catalog.suggestions();
        info!(community = %community_name, "community not found");
        return format!(
            "Sorry, I couldn't find the community \"{}\". Please try another, like \"{}\" or \"{}\".",
            community_name, first, second
        );
    };

    let target = community_camera(community.position);
    ctx.store.update(|w| {
        w.clear_markers();
        w.set_camera_target(Some(target));
    });
    format!("Located {} on the map.", community_name)
}

fn find_projects(ctx: &ToolContext, community_name: &str, project_type: &str) -> String {
    let Some(projects) = ctx.catalog.projects_in(community_name) else {
        info!(community = %community_name, "no project data");
        return format!("I don't have project data for \"{}\" right now.", community_name);
    };

    let matching = filter_by_type(projects, project_type);
    if matching.is_empty() {
        info!(community = %community_name, project_type, "no projects of requested type");
        return format!(
            "I couldn't find any \"{}\" projects in {}. You could try another type.",
            project_type, community_name
        );
    }

    let markers: Vec<MapMarker> = matching
        .iter()
        .map(|p| MapMarker {
            position: p.position.at_altitude(PROJECT_MARKER_ALTITUDE),
            label: p.name.clone(),
            show_label: true,
        })
        .collect();
    let count = markers.len();

    ctx.store.update(|w| {
        w.set_prevent_auto_frame(false);
        w.replace_markers(markers);
    });
    format!(
        "Found and marked {} {} projects in {}.",
        count, project_type, community_name
    )
}

async fn maps_grounding(
    ctx: &ToolContext,
    request: GroundingRequest,
    behavior: MarkerBehavior,
) -> ToolResponse {
    let caps = ctx.capabilities();
    let Some(search) = caps.grounding else {
        warn!("grounded search unavailable");
        return ToolResponse::Text(GROUNDING_FAILURE.to_string());
    };

    let response = match search.search(&request).await {
        Ok(Some(response)) => response,
        Ok(None) => {
            warn!(query = %request.prompt, "grounded search returned no response");
            return ToolResponse::Text(GROUNDING_FAILURE.to_string());
        }
        Err(e) => {
            warn!(query = %request.prompt, error = %e, "grounded search failed");
            return ToolResponse::Text(GROUNDING_FAILURE.to_string());
        }
    };

    ctx.held.set_response(Some(response.clone()));

    if response.chunks().is_empty() {
        debug!("grounded response has no chunks; clearing markers");
        ctx.store.clear_markers();
        return ToolResponse::Grounded(response);
    }

    ctx.held.set_chunks(Some(response.chunks().to_vec()));

    if behavior == MarkerBehavior::None {
        ctx.store.clear_markers();
    } else if let Some(places) = caps.places {
        let ticket = ctx
            .options
            .discard_stale_resolutions
            .then(|| ctx.store.reserve_ticket());
        let store = ctx.store.clone();
        let resolving = response.clone();
        debug!(
            chunks = resolving.chunks().len(),
            behavior = behavior.as_str(),
            ?ticket,
            "resolving grounded markers in background"
        );
        ctx.tasks.spawn(async move {
            resolve_and_apply(&store, &*places, &resolving, behavior, ticket).await;
        });
    } else {
        debug!("places lookup unavailable; skipping markers");
    }

    ToolResponse::Grounded(response)
}
