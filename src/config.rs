use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

use crate::models::Padding;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub maps: MapsConfig,
    #[serde(default)]
    pub grounding: GroundingConfig,
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MapsConfig {
    /// Name of the environment variable holding the Maps Platform key.
    #[serde(default = "default_maps_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_places_base_url")]
    pub places_base_url: String,
    #[serde(default = "default_elevation_url")]
    pub elevation_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for MapsConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_maps_key_env(),
            places_base_url: default_places_base_url(),
            elevation_url: default_elevation_url(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_maps_key_env() -> String {
    "GOOGLE_MAPS_API_KEY".to_string()
}
fn default_places_base_url() -> String {
    "https://places.googleapis.com/v1".to_string()
}
fn default_elevation_url() -> String {
    "https://maps.googleapis.com/maps/api/elevation/json".to_string()
}
fn default_timeout_secs() -> u64 {
    10
}
fn default_max_retries() -> u32 {
    2
}

#[derive(Debug, Deserialize, Clone)]
pub struct GroundingConfig {
    #[serde(default = "default_grounding_provider")]
    pub provider: String,
    #[serde(default = "default_grounding_model")]
    pub model: String,
    #[serde(default = "default_grounding_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_grounding_base_url")]
    pub base_url: String,
    /// Used when a tool call does not carry its own system instruction.
    #[serde(default)]
    pub system_instruction: Option<String>,
    #[serde(default)]
    pub enable_widget: bool,
    /// Drop marker resolutions overtaken by a newer marker write.
    #[serde(default = "default_true")]
    pub discard_stale_resolutions: bool,
    #[serde(default = "default_timeout_secs_grounding")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for GroundingConfig {
    fn default() -> Self {
        Self {
            provider: default_grounding_provider(),
            model: default_grounding_model(),
            api_key_env: default_grounding_key_env(),
            base_url: default_grounding_base_url(),
            system_instruction: None,
            enable_widget: false,
            discard_stale_resolutions: true,
            timeout_secs: default_timeout_secs_grounding(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_grounding_provider() -> String {
    "gemini".to_string()
}
fn default_grounding_model() -> String {
    "gemini-2.5-flash".to_string()
}
fn default_grounding_key_env() -> String {
    "GEMINI_API_KEY".to_string()
}
fn default_grounding_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}
fn default_timeout_secs_grounding() -> u64 {
    30
}
fn default_true() -> bool {
    true
}

impl GroundingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CameraConfig {
    #[serde(default = "default_fly_duration_ms")]
    pub fly_duration_ms: u64,
    #[serde(default)]
    pub padding: Padding,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            fly_duration_ms: default_fly_duration_ms(),
            padding: Padding::default(),
        }
    }
}

fn default_fly_duration_ms() -> u64 {
    5000
}

#[derive(Debug, Deserialize, Clone)]
pub struct CatalogConfig {
    #[serde(default = "default_true")]
    pub include_builtin: bool,
    #[serde(default)]
    pub communities: Vec<ExtraCommunity>,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            include_builtin: true,
            communities: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExtraCommunity {
    pub name: String,
    pub lat: f64,
    pub lng: f64,
    #[serde(default)]
    pub projects: Vec<ExtraProject>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExtraProject {
    pub name: String,
    #[serde(rename = "type")]
    pub project_type: String,
    pub lat: f64,
    pub lng: f64,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    validate(&config)?;

    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.maps.timeout_secs == 0 {
        anyhow::bail!("maps.timeout_secs must be > 0");
    }
    if config.grounding.timeout_secs == 0 {
        anyhow::bail!("grounding.timeout_secs must be > 0");
    }

    match config.grounding.provider.as_str() {
        "disabled" | "gemini" => {}
        other => anyhow::bail!(
            "Unknown grounding provider: '{}'. Must be disabled or gemini.",
            other
        ),
    }

    for community in &config.catalog.communities {
        if community.name.trim().is_empty() {
            anyhow::bail!("catalog.communities entries must have a name");
        }
        if !(-90.0..=90.0).contains(&community.lat) || !(-180.0..=180.0).contains(&community.lng)
        {
            anyhow::bail!(
                "catalog community '{}' has an invalid coordinate",
                community.name
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let file = write_config("");
        let cfg = load_config(file.path()).unwrap();
        assert_eq!(cfg.camera.padding, Padding::default());
        assert!(cfg.grounding.discard_stale_resolutions);
        assert!(cfg.catalog.include_builtin);
        assert_eq!(cfg.maps.api_key_env, "GOOGLE_MAPS_API_KEY");
    }

    #[test]
    fn test_full_config_parses() {
        let file = write_config(
            r#"
[grounding]
provider = "disabled"
discard_stale_resolutions = false

[camera]
fly_duration_ms = 1200
padding = [0.05, 0.05, 0.1, 0.35]

[[catalog.communities]]
name = "Jumeirah Village Circle"
lat = 25.06
lng = 55.21

[[catalog.communities.projects]]
name = "Binghatti Heights"
type = "Apartments"
lat = 25.061
lng = 55.209
"#,
        );
        let cfg = load_config(file.path()).unwrap();
        assert!(!cfg.grounding.is_enabled());
        assert!(!cfg.grounding.discard_stale_resolutions);
        assert_eq!(cfg.camera.padding.left, 0.35);
        assert_eq!(cfg.catalog.communities[0].projects[0].project_type, "Apartments");
    }

    #[test]
    fn test_rejects_bad_padding_and_provider() {
        let file = write_config("[camera]\npadding = [0.05, 0.05, 0.05, 1.5]\n");
        assert!(load_config(file.path()).is_err());

        let file = write_config("[grounding]\nprovider = \"bing\"\n");
        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(load_config(Path::new("/nonexistent/mapctl.toml")).is_err());
    }
}
