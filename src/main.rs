//! # Map orchestrator CLI (`mapctl`)
//!
//! Drives the tool dispatcher and map controller from the command line. The
//! map surface is always a recording one: every command that touches the map
//! prints the state it ended in and the map commands it issued.
//!
//! ## Usage
//!
//! ```bash
//! mapctl --config ./config/mapctl.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `mapctl tools` | Print the tool declarations handed to the model |
//! | `mapctl communities` | List catalog communities and their project types |
//! | `mapctl call <tool> --arg k=v` | Dispatch one tool call and sync the map |
//! | `mapctl replay <file>` | Dispatch a recorded list of tool-call events |
//! | `mapctl frame --point lat,lng` | Compute the camera that frames a point set |
//!
//! `--offline` swaps every network capability for in-memory ones built from
//! the catalog.
//!
//! ## Examples
//!
//! ```bash
//! mapctl call locateCommunity --arg communityName="Palm Jumeirah"
//! mapctl call findProjects --arg communityName="Dubai Marina" --arg projectType=Apartments
//! mapctl call mapsGrounding --arg query="villas in Dubai Hills" --arg markerBehavior=all --offline
//! mapctl frame --point 25.10,55.26 --point 25.20,55.27 --padding 0.05,0.05,0.05,0.4
//! RUST_LOG=map_orchestrator=debug mapctl replay session.json --offline
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use map_orchestrator::capabilities::{CapabilitySet, ElevationService};
use map_orchestrator::catalog::Catalog;
use map_orchestrator::config::{self, Config};
use map_orchestrator::controller::MapSync;
use map_orchestrator::framing::look_at_with_padding;
use map_orchestrator::google::capabilities_from_config;
use map_orchestrator::grounding::GroundedResponse;
use map_orchestrator::memory::{
    project_place_id, CannedGrounding, RecordingSurface, StaticElevation, StaticPlaces,
};
use map_orchestrator::models::{GeoPoint, GroundingChunk, Padding};
use map_orchestrator::session::{handle_tool_call, ToolCallEvent};
use map_orchestrator::store::MapStore;
use map_orchestrator::tools::{tool_specs, FunctionCall, GroundingOptions, ToolContext};

/// Map orchestrator CLI.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. A missing file means built-in defaults.
#[derive(Parser)]
#[command(
    name = "mapctl",
    about = "Drive the map orchestration engine from the command line",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/mapctl.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the tool declarations as JSON.
    Tools,

    /// List catalog communities and the project types in each.
    Communities,

    /// Dispatch a single tool call, wait for background marker resolution,
    /// and sync the map once.
    Call {
        /// Tool name, e.g. `locateCommunity`.
        name: String,

        /// Tool argument as `key=value`. Repeatable.
        #[arg(long = "arg", value_parser = parse_key_val)]
        args: Vec<(String, String)>,

        /// Use in-memory capabilities instead of Google services.
        #[arg(long)]
        offline: bool,
    },

    /// Dispatch every tool-call event from a JSON file, syncing the map
    /// after each one.
    ///
    /// The file holds an array of `{"functionCalls": [...]}` objects.
    Replay {
        file: PathBuf,

        #[arg(long)]
        offline: bool,
    },

    /// Print the camera target that frames a set of points.
    Frame {
        /// Point as `lat,lng` or `lat,lng,altitude`. Repeatable.
        #[arg(long = "point", value_parser = parse_point, required = true)]
        points: Vec<GeoPoint>,

        /// Viewport insets as `top,right,bottom,left` fractions.
        #[arg(long, value_parser = parse_padding)]
        padding: Option<Padding>,

        /// Assume flat terrain instead of querying the Elevation API.
        #[arg(long)]
        offline: bool,
    },
}

/// Parse a `KEY=VALUE` pair.
fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("invalid KEY=VALUE: no '=' found in '{}'", s))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

fn parse_numbers(s: &str) -> Result<Vec<f64>, String> {
    s.split(',')
        .map(|part| {
            part.trim()
                .parse::<f64>()
                .map_err(|e| format!("invalid number '{}': {}", part, e))
        })
        .collect()
}

fn parse_point(s: &str) -> Result<GeoPoint, String> {
    match parse_numbers(s)?.as_slice() {
        [lat, lng] => Ok(GeoPoint::new(*lat, *lng, 0.0)),
        [lat, lng, alt] => Ok(GeoPoint::new(*lat, *lng, *alt)),
        _ => Err(format!("expected lat,lng[,altitude], got '{}'", s)),
    }
}

fn parse_padding(s: &str) -> Result<Padding, String> {
    match parse_numbers(s)?.as_slice() {
        [top, right, bottom, left] => {
            Padding::new(*top, *right, *bottom, *left).map_err(|e| e.to_string())
        }
        _ => Err(format!("expected top,right,bottom,left, got '{}'", s)),
    }
}

/// Tool argument from the command line. Booleans stay booleans; everything
/// else is a string, which is what every declared parameter expects.
fn arg_value(raw: &str) -> Value {
    match raw {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::String(raw.to_string()),
    }
}

fn load_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        config::load_config(path)
    } else {
        debug!(path = %path.display(), "config file not found; using defaults");
        Ok(Config::default())
    }
}

/// A grounded answer that mentions every catalog project, used offline.
fn offline_grounding(catalog: &Catalog) -> GroundedResponse {
    let projects: Vec<_> = catalog
        .communities()
        .iter()
        .flat_map(|c| c.projects.iter())
        .collect();
    let names: Vec<&str> = projects.iter().map(|p| p.name.as_str()).collect();
    let chunks = projects
        .iter()
        .map(|p| GroundingChunk {
            place_id: Some(format!("places/{}", project_place_id(&p.name))),
            title: Some(p.name.clone()),
            place_answer_sources: false,
        })
        .collect();
    GroundedResponse::new(Some(&format!("Places to look at: {}.", names.join(", "))), chunks)
}

/// Everything one CLI run shares: the store, the context the dispatcher
/// sees, and the map sync loop feeding a recording surface.
struct Session {
    ctx: ToolContext,
    sync: MapSync,
    surface: Arc<RecordingSurface>,
    // held so the receivers stay connected for the whole run
    _caps_tx: watch::Sender<CapabilitySet>,
    _padding_tx: watch::Sender<Padding>,
}

impl Session {
    fn start(cfg: &Config, offline: bool) -> Result<Self> {
        let catalog = Arc::new(Catalog::from_config(&cfg.catalog));
        let surface = Arc::new(RecordingSurface::new());

        let mut caps = if offline {
            let mut caps = CapabilitySet::default();
            caps.elevation = Some(Arc::new(StaticElevation::flat(0.0)));
            caps.places = Some(Arc::new(StaticPlaces::from_catalog(&catalog)));
            caps.grounding = Some(Arc::new(CannedGrounding::new(Some(offline_grounding(
                &catalog,
            )))));
            caps
        } else {
            capabilities_from_config(cfg)?
        };
        caps.map = Some(surface.clone());

        let store = MapStore::new();
        let (caps_tx, caps_rx) = watch::channel(caps);
        let (padding_tx, padding_rx) = watch::channel(cfg.camera.padding);

        let sync = MapSync::new(
            store.clone(),
            padding_rx.clone(),
            caps_rx.clone(),
            cfg.camera.fly_duration_ms,
        );
        let ctx = ToolContext::new(store, caps_rx)
            .with_padding(padding_rx)
            .with_catalog(catalog)
            .with_grounding_options(GroundingOptions::from(&cfg.grounding));

        Ok(Self {
            ctx,
            sync,
            surface,
            _caps_tx: caps_tx,
            _padding_tx: padding_tx,
        })
    }

    /// Dispatch a batch, wait for its background work, and sync the map.
    async fn run_batch(&mut self, calls: &[FunctionCall]) -> Value {
        let responses = handle_tool_call(calls, &self.ctx).await;
        self.ctx.tasks().drain().await;
        self.sync.sync_once().await;
        json!(responses)
    }

    fn report(&self, responses: Value) -> Value {
        json!({
            "responses": responses,
            "state": self.ctx.store().snapshot(),
            "commands": self.surface.commands(),
            "heldGrounding": self.ctx.held().response(),
        })
    }
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = load_or_default(&cli.config)?;

    match cli.command {
        Commands::Tools => {
            print_json(&tool_specs())?;
        }
        Commands::Communities => {
            let catalog = Catalog::from_config(&cfg.catalog);
            for community in catalog.communities() {
                let mut types: Vec<&str> = community
                    .projects
                    .iter()
                    .map(|p| p.project_type.as_str())
                    .collect();
                types.sort_unstable();
                types.dedup();
                let types = if types.is_empty() {
                    "(no project data)".to_string()
                } else {
                    types.join(", ")
                };
                println!(
                    "{:<28} {:>9.4},{:<9.4} {}",
                    community.name, community.position.lat, community.position.lng, types
                );
            }
        }
        Commands::Call {
            name,
            args,
            offline,
        } => {
            let args: serde_json::Map<String, Value> = args
                .into_iter()
                .map(|(k, v)| (k, arg_value(&v)))
                .collect();
            let mut session = Session::start(&cfg, offline)?;
            let responses = session
                .run_batch(&[FunctionCall::new(&name, Value::Object(args))])
                .await;
            print_json(&session.report(responses))?;
        }
        Commands::Replay { file, offline } => {
            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read replay file: {}", file.display()))?;
            let events: Vec<ToolCallEvent> = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse replay file: {}", file.display()))?;

            let mut session = Session::start(&cfg, offline)?;
            let mut all = Vec::new();
            for event in &events {
                all.push(session.run_batch(&event.function_calls).await);
            }
            print_json(&session.report(Value::Array(all)))?;
        }
        Commands::Frame {
            points,
            padding,
            offline,
        } => {
            let padding = padding.unwrap_or(cfg.camera.padding);
            let elevation: Option<Arc<dyn ElevationService>> = if offline {
                Some(Arc::new(StaticElevation::flat(0.0)))
            } else {
                capabilities_from_config(&cfg)?.elevation
            };
            let target = look_at_with_padding(&points, padding, elevation.as_deref()).await;
            print_json(&target)?;
        }
    }

    Ok(())
}
