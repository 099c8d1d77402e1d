use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let config_dir = tmp.path().join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let config_content = r#"[grounding]
provider = "disabled"

[camera]
fly_duration_ms = 1500
padding = [0.05, 0.05, 0.05, 0.3]

[[catalog.communities]]
name = "Jumeirah Village Circle"
lat = 25.0587
lng = 55.2060

[[catalog.communities.projects]]
name = "Binghatti Corner"
type = "Apartments"
lat = 25.0601
lng = 55.2089
"#;

    let config_path = config_dir.join("mapctl.toml");
    fs::write(&config_path, config_content).unwrap();
    (tmp, config_path)
}

fn run_mapctl(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = env!("CARGO_BIN_EXE_mapctl");
    let output = Command::new(binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run mapctl binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn run_json(config_path: &Path, args: &[&str]) -> Value {
    let (stdout, stderr, success) = run_mapctl(config_path, args);
    assert!(success, "mapctl {:?} failed: stdout={}, stderr={}", args, stdout, stderr);
    serde_json::from_str(&stdout)
        .unwrap_or_else(|e| panic!("stdout is not JSON ({}): {}", e, stdout))
}

#[test]
fn test_tools_lists_declarations() {
    let (_tmp, config_path) = setup_test_env();
    let specs = run_json(&config_path, &["tools"]);
    let names: Vec<&str> = specs
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["mapsGrounding", "locateCommunity", "findProjects"]);
}

#[test]
fn test_communities_include_config_entries() {
    let (_tmp, config_path) = setup_test_env();
    let (stdout, stderr, success) = run_mapctl(&config_path, &["communities"]);
    assert!(success, "communities failed: {}", stderr);
    assert!(stdout.contains("Dubai Hills Estate"));
    assert!(stdout.contains("Jumeirah Village Circle"));
    assert!(stdout.contains("(no project data)"));
}

#[test]
fn test_call_locate_flies_camera() {
    let (_tmp, config_path) = setup_test_env();
    let report = run_json(
        &config_path,
        &[
            "call",
            "locateCommunity",
            "--arg",
            "communityName=Palm Jumeirah",
            "--offline",
        ],
    );

    assert_eq!(
        report["responses"][0]["response"]["result"],
        "Located Palm Jumeirah on the map."
    );
    assert!(report["state"]["cameraTarget"].is_null());
    let commands = report["commands"].as_array().unwrap();
    let fly = commands
        .iter()
        .find(|c| c["command"] == "fly_to")
        .unwrap_or_else(|| panic!("no fly command in {:?}", commands));
    assert_eq!(fly["duration_ms"], 1500);
    assert_eq!(fly["camera"]["range"], 10000.0);
}

#[test]
fn test_call_find_projects_in_config_community() {
    let (_tmp, config_path) = setup_test_env();
    let report = run_json(
        &config_path,
        &[
            "call",
            "findProjects",
            "--arg",
            "communityName=jumeirah village circle",
            "--arg",
            "projectType=apartments",
            "--offline",
        ],
    );
    assert_eq!(report["state"]["markers"][0]["label"], "Binghatti Corner");
    assert_eq!(report["state"]["markers"][0]["showLabel"], true);
}

#[test]
fn test_call_grounding_disabled_fails_softly() {
    let (_tmp, config_path) = setup_test_env();
    let report = run_json(
        &config_path,
        &["call", "mapsGrounding", "--arg", "query=schools"],
    );
    assert_eq!(
        report["responses"][0]["response"]["result"],
        "Failed to get a response from maps grounding."
    );
}

#[test]
fn test_call_unknown_tool_is_not_fatal() {
    let (_tmp, config_path) = setup_test_env();
    let report = run_json(&config_path, &["call", "bookFlight", "--offline"]);
    let result = report["responses"][0]["response"]["result"].as_str().unwrap();
    assert!(result.contains("bookFlight"));
}

#[test]
fn test_replay_runs_events_in_order() {
    let (tmp, config_path) = setup_test_env();
    let replay = tmp.path().join("session.json");
    fs::write(
        &replay,
        r#"[
  { "functionCalls": [ { "id": "1", "name": "locateCommunity", "args": { "communityName": "Dubai Marina" } } ] },
  { "functionCalls": [ { "id": "2", "name": "findProjects", "args": { "communityName": "Dubai Marina", "projectType": "Apartments" } } ] }
]"#,
    )
    .unwrap();

    let report = run_json(&config_path, &["replay", replay.to_str().unwrap(), "--offline"]);
    assert_eq!(report["responses"].as_array().unwrap().len(), 2);
    assert_eq!(report["responses"][1][0]["id"], "2");
    assert_eq!(report["state"]["markers"].as_array().unwrap().len(), 2);
}

#[test]
fn test_frame_points_offline() {
    let (_tmp, config_path) = setup_test_env();
    let target = run_json(
        &config_path,
        &[
            "frame",
            "--point",
            "25.10,55.26",
            "--point",
            "25.20,55.27",
            "--offline",
        ],
    );
    assert_eq!(target["tilt"], 45.0);
    assert!((target["center"]["lat"].as_f64().unwrap() - 25.15).abs() < 1e-9);
}

#[test]
fn test_frame_rejects_bad_padding() {
    let (_tmp, config_path) = setup_test_env();
    let (_, _, success) = run_mapctl(
        &config_path,
        &["frame", "--point", "25.1,55.2", "--padding", "0,0,0,1.2", "--offline"],
    );
    assert!(!success);
}
