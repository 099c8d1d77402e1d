//! End-to-end runs of the dispatcher, store and map sync against in-memory
//! capabilities.

use map_orchestrator::capabilities::CapabilitySet;
use map_orchestrator::controller::MapSync;
use map_orchestrator::grounding::{resolve_markers, GroundedResponse};
use map_orchestrator::memory::{CannedGrounding, RecordingSurface, StaticElevation, StaticPlaces};
use map_orchestrator::models::{
    CameraTarget, GeoPoint, GroundingChunk, LatLng, MapMarker, MarkerBehavior, Padding,
};
use map_orchestrator::session::handle_tool_call;
use map_orchestrator::store::MapStore;
use map_orchestrator::tools::{dispatch, FunctionCall, GroundingOptions, ToolContext, ToolResponse};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

struct Rig {
    ctx: ToolContext,
    sync: MapSync,
    surface: Arc<RecordingSurface>,
    places: Arc<StaticPlaces>,
    _caps_tx: watch::Sender<CapabilitySet>,
    _padding_tx: watch::Sender<Padding>,
}

fn rig_with(grounding: Option<GroundedResponse>, options: GroundingOptions) -> Rig {
    let surface = Arc::new(RecordingSurface::new());
    let places = Arc::new(StaticPlaces::new());
    let mut caps = CapabilitySet::default();
    caps.map = Some(surface.clone());
    caps.elevation = Some(Arc::new(StaticElevation::flat(10.0)));
    caps.places = Some(places.clone());
    caps.grounding = Some(Arc::new(CannedGrounding::new(grounding)));

    let store = MapStore::new();
    let (caps_tx, caps_rx) = watch::channel(caps);
    let (padding_tx, padding_rx) = watch::channel(Padding::default());
    let sync = MapSync::new(store.clone(), padding_rx.clone(), caps_rx.clone(), 3000);
    let ctx = ToolContext::new(store, caps_rx)
        .with_padding(padding_rx)
        .with_grounding_options(options);

    Rig {
        ctx,
        sync,
        surface,
        places,
        _caps_tx: caps_tx,
        _padding_tx: padding_tx,
    }
}

fn rig() -> Rig {
    rig_with(None, GroundingOptions::default())
}

fn chunk(id: &str, title: &str) -> GroundingChunk {
    GroundingChunk {
        place_id: Some(format!("places/{}", id)),
        title: Some(title.to_string()),
        place_answer_sources: false,
    }
}

async fn call(ctx: &ToolContext, name: &str, args: serde_json::Value) -> String {
    match dispatch(&FunctionCall::new(name, args), ctx).await.unwrap() {
        ToolResponse::Text(text) => text,
        ToolResponse::Grounded(_) => panic!("expected a text response"),
    }
}

#[tokio::test]
async fn test_locate_dubai_hills_estate() {
    let mut rig = rig();
    let reply = call(
        &rig.ctx,
        "locateCommunity",
        json!({ "communityName": "Dubai Hills Estate" }),
    )
    .await;
    assert_eq!(reply, "Located Dubai Hills Estate on the map.");

    let expected = CameraTarget {
        center: GeoPoint::new(25.1118, 55.2575, 2000.0),
        range: 10_000.0,
        tilt: 30.0,
        heading: 0.0,
        roll: 0.0,
    };
    assert_eq!(rig.ctx.store().snapshot().camera_target, Some(expected));

    rig.sync.sync_once().await;
    assert_eq!(rig.surface.last_flight(), Some(expected));
    assert!(rig.ctx.store().snapshot().camera_target.is_none());

    // a consumed target is not flown to again
    rig.sync.sync_once().await;
    assert_eq!(rig.surface.flights().len(), 1);
}

#[tokio::test]
async fn test_unknown_communities_leave_state_untouched() {
    let rig = rig();
    rig.ctx.store().set_markers(vec![MapMarker {
        position: GeoPoint::new(25.0, 55.0, 1.0),
        label: "existing".to_string(),
        show_label: true,
    }]);
    let before = rig.ctx.store().snapshot();

    for name in ["Atlantis", "", "Dubai Hills", "Downtown  Dubai"] {
        let reply = call(&rig.ctx, "locateCommunity", json!({ "communityName": name })).await;
        assert!(
            reply.starts_with("Sorry, I couldn't find the community")
                || reply.starts_with("Invalid arguments"),
            "unexpected reply for {:?}: {}",
            name,
            reply
        );
        assert_eq!(rig.ctx.store().snapshot(), before);
    }

    let reply = call(&rig.ctx, "locateCommunity", json!({ "communityName": "Atlantis" })).await;
    assert_eq!(
        reply,
        "Sorry, I couldn't find the community \"Atlantis\". Please try another, like \"Dubai Hills Estate\" or \"Downtown Dubai\"."
    );
}

#[tokio::test]
async fn test_find_villas_in_dubai_hills() {
    let mut rig = rig();
    let reply = call(
        &rig.ctx,
        "findProjects",
        json!({ "communityName": "Dubai Hills Estate", "projectType": "Villas" }),
    )
    .await;
    assert_eq!(reply, "Found and marked 1 Villas projects in Dubai Hills Estate.");
    assert_eq!(
        rig.ctx.store().snapshot().markers,
        vec![MapMarker {
            position: GeoPoint::new(25.1050, 55.2600, 1.0),
            label: "Maple at Dubai Hills".to_string(),
            show_label: true,
        }]
    );

    rig.sync.sync_once().await;
    assert_eq!(rig.surface.markers().len(), 1);
    // a single marker is framed as a close-up over its terrain
    let flight = rig.surface.last_flight().unwrap();
    assert_eq!(flight.range, 500.0);
    assert_eq!(flight.center.altitude, 210.0);
}

#[tokio::test]
async fn test_find_townhouses_leaves_markers_alone() {
    let rig = rig();
    call(
        &rig.ctx,
        "findProjects",
        json!({ "communityName": "Downtown Dubai", "projectType": "Apartments" }),
    )
    .await;
    let before = rig.ctx.store().snapshot();

    let reply = call(
        &rig.ctx,
        "findProjects",
        json!({ "communityName": "Dubai Hills Estate", "projectType": "Townhouse" }),
    )
    .await;
    assert_eq!(
        reply,
        "I couldn't find any \"Townhouse\" projects in Dubai Hills Estate. You could try another type."
    );
    assert_eq!(rig.ctx.store().snapshot(), before);
}

#[tokio::test]
async fn test_resolution_survives_one_rejected_lookup() {
    let places = StaticPlaces::new();
    places.insert("mall", "Dubai Mall", LatLng::new(25.1985, 55.2796));
    places.insert_failing("rejected", "PERMISSION_DENIED");
    let chunks = vec![chunk("mall", "Dubai Mall"), chunk("rejected", "Mystery")];

    let markers = resolve_markers(&chunks, &places, None, MarkerBehavior::All).await;
    assert_eq!(markers.len(), 1);
    assert_eq!(markers[0].label, "Dubai Mall");
}

#[tokio::test]
async fn test_none_behavior_never_places_markers() {
    let response = GroundedResponse::new(
        Some("Dubai Mall and Zabeel Park."),
        vec![chunk("mall", "Dubai Mall"), chunk("park", "Zabeel Park")],
    );
    let rig = rig_with(Some(response), GroundingOptions::default());
    rig.places.insert("mall", "Dubai Mall", LatLng::new(25.1985, 55.2796));
    rig.places.insert("park", "Zabeel Park", LatLng::new(25.2317, 55.2989));
    rig.ctx.store().set_markers(vec![MapMarker {
        position: GeoPoint::new(25.0, 55.0, 1.0),
        label: "existing".to_string(),
        show_label: true,
    }]);

    dispatch(
        &FunctionCall::new("mapsGrounding", json!({ "query": "malls", "markerBehavior": "none" })),
        &rig.ctx,
    )
    .await
    .unwrap();
    rig.ctx.tasks().drain().await;
    assert!(rig.ctx.store().snapshot().markers.is_empty());
}

#[tokio::test]
async fn test_authoritative_single_place_gets_close_up() {
    let mut source = chunk("mall", "Dubai Mall");
    source.place_answer_sources = true;
    let response = GroundedResponse::new(Some("Dubai Mall is open until midnight."), vec![source]);
    let mut rig = rig_with(Some(response), GroundingOptions::default());
    rig.places.insert("mall", "Dubai Mall", LatLng::new(25.1985, 55.2796));

    let responses = handle_tool_call(
        &[FunctionCall::new("mapsGrounding", json!({ "query": "Dubai Mall hours" }))],
        &rig.ctx,
    )
    .await;
    assert!(responses[0].response["result"]["candidates"].is_array());
    rig.ctx.tasks().drain().await;

    let state = rig.ctx.store().snapshot();
    assert!(state.prevent_auto_frame);
    let target = state.camera_target.unwrap();
    assert_eq!(target.range, 500.0);
    assert_eq!(target.tilt, 60.0);

    rig.sync.sync_once().await;
    // only the close-up is flown; auto-framing was suppressed
    assert_eq!(rig.surface.flights(), vec![target]);
    assert_eq!(rig.surface.markers().len(), 1);
    assert!(!rig.ctx.store().snapshot().prevent_auto_frame);
}

#[tokio::test]
async fn test_slow_resolution_does_not_overwrite_later_call() {
    let response = GroundedResponse::new(Some("Dubai Mall"), vec![chunk("mall", "Dubai Mall")]);
    let rig = rig_with(Some(response), GroundingOptions::default());
    rig.places.insert("mall", "Dubai Mall", LatLng::new(25.1985, 55.2796));
    rig.places.delay("mall", Duration::from_millis(100));

    dispatch(
        &FunctionCall::new("mapsGrounding", json!({ "query": "malls" })),
        &rig.ctx,
    )
    .await
    .unwrap();
    call(
        &rig.ctx,
        "findProjects",
        json!({ "communityName": "Dubai Marina", "projectType": "Apartments" }),
    )
    .await;
    rig.ctx.tasks().drain().await;

    let labels: Vec<String> = rig
        .ctx
        .store()
        .snapshot()
        .markers
        .into_iter()
        .map(|m| m.label)
        .collect();
    assert_eq!(labels, vec!["Marina Gate", "Address Beach Resort"]);
}

#[tokio::test]
async fn test_slow_resolution_wins_when_guard_disabled() {
    let response = GroundedResponse::new(Some("Dubai Mall"), vec![chunk("mall", "Dubai Mall")]);
    let rig = rig_with(
        Some(response),
        GroundingOptions {
            discard_stale_resolutions: false,
            ..Default::default()
        },
    );
    rig.places.insert("mall", "Dubai Mall", LatLng::new(25.1985, 55.2796));
    rig.places.delay("mall", Duration::from_millis(100));

    dispatch(
        &FunctionCall::new("mapsGrounding", json!({ "query": "malls" })),
        &rig.ctx,
    )
    .await
    .unwrap();
    call(
        &rig.ctx,
        "findProjects",
        json!({ "communityName": "Dubai Marina", "projectType": "Apartments" }),
    )
    .await;
    rig.ctx.tasks().drain().await;

    let markers = rig.ctx.store().snapshot().markers;
    assert_eq!(markers.len(), 1);
    assert_eq!(markers[0].label, "Dubai Mall");
}

#[tokio::test]
async fn test_left_padding_pushes_camera_back() {
    let mut rig = rig();
    call(
        &rig.ctx,
        "findProjects",
        json!({ "communityName": "Downtown Dubai", "projectType": "Apartments" }),
    )
    .await;
    rig.sync.sync_once().await;
    let narrow = rig.surface.last_flight().unwrap();

    rig._padding_tx
        .send(Padding::new(0.05, 0.05, 0.05, 0.6).unwrap())
        .unwrap();
    rig.sync.sync_once().await;
    let wide = rig.surface.last_flight().unwrap();

    assert!(wide.range >= narrow.range);
    assert_eq!(wide.center, narrow.center);
}
