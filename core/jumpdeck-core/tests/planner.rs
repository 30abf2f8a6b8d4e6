//! Planner client behaviour against a scripted host: caching and single-flight.

mod common;

use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use common::{fast_config, neutron_result, ScriptedPlanner};
use jumpdeck_core::planner::payload::{build_payload, PayloadContext};
use jumpdeck_core::{CacheStore, PlannerClient, PlannerMode, PlannerSettings, RouteRequest, RouteStatus};
use serde_json::json;
use tempfile::TempDir;

fn client(planner: Arc<ScriptedPlanner>, temp: &TempDir) -> PlannerClient {
    let settings = PlannerSettings::from_config(&fast_config(json!({})));
    PlannerClient::new(
        planner,
        settings,
        CacheStore::new(temp.path().join("spansh")),
        CacheStore::new(temp.path().join("spansh_suggest")),
    )
}

fn request() -> RouteRequest {
    RouteRequest {
        start: Some("Sol".into()),
        destination: Some("Colonia".into()),
        jump_range: Some(42.5),
        efficiency: Some(60),
        ..RouteRequest::default()
    }
}

#[test]
fn test_concurrent_identical_requests_share_one_round_trip() {
    let temp = TempDir::new().unwrap();
    let planner = Arc::new(ScriptedPlanner::new(neutron_result()).with_poll_delay(Duration::from_millis(300)));
    let client = Arc::new(client(planner.clone(), &temp));
    let payload = build_payload(PlannerMode::Neutron, &request(), &PayloadContext::default()).unwrap();

    let callers = 6;
    let barrier = Arc::new(Barrier::new(callers));
    let handles: Vec<_> = (0..callers)
        .map(|_| {
            let client = Arc::clone(&client);
            let barrier = Arc::clone(&barrier);
            let payload = payload.clone();
            thread::spawn(move || {
                barrier.wait();
                client.route(&payload, None).unwrap()
            })
        })
        .collect();
    let responses: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(planner.post_count(), 1);
    assert_eq!(planner.poll_count(), 1);
    let systems = &responses[0].route.systems;
    assert_eq!(systems.len(), 4);
    assert!(responses.iter().all(|r| &r.route.systems == systems));
    assert!(responses.iter().all(|r| r.cache_key == responses[0].cache_key));
}

#[test]
fn test_cache_survives_a_new_client() {
    let temp = TempDir::new().unwrap();
    let planner = Arc::new(ScriptedPlanner::new(neutron_result()));
    let payload = build_payload(PlannerMode::Neutron, &request(), &PayloadContext::default()).unwrap();

    let first = client(planner.clone(), &temp).route(&payload, None).unwrap();
    assert_eq!(first.status, RouteStatus::Success);

    let second = client(planner.clone(), &temp).route(&payload, None).unwrap();
    assert_eq!(second.status, RouteStatus::CacheHit);
    assert_eq!(planner.post_count(), 1);
    assert_eq!(second.route.systems, first.route.systems);
}

#[test]
fn test_different_inputs_do_not_share_cache() {
    let temp = TempDir::new().unwrap();
    let planner = Arc::new(ScriptedPlanner::new(neutron_result()));
    let client = client(planner.clone(), &temp);
    let ctx = PayloadContext::default();

    let a = build_payload(PlannerMode::Neutron, &request(), &ctx).unwrap();
    let b = build_payload(
        PlannerMode::Neutron,
        &RouteRequest {
            efficiency: Some(80),
            ..request()
        },
        &ctx,
    )
    .unwrap();

    let ra = client.route(&a, None).unwrap();
    let rb = client.route(&b, None).unwrap();
    assert_ne!(ra.cache_key, rb.cache_key);
    assert_eq!(planner.post_count(), 2);
    assert_eq!(rb.status, RouteStatus::Success);
}

#[test]
fn test_empty_result_is_not_cached() {
    let temp = TempDir::new().unwrap();
    let planner = Arc::new(ScriptedPlanner::new(json!({"system_jumps": []})));
    let client = client(planner.clone(), &temp);
    let payload = build_payload(PlannerMode::Neutron, &request(), &PayloadContext::default()).unwrap();

    assert_eq!(client.route(&payload, None).unwrap().status, RouteStatus::Empty);
    assert_eq!(client.route(&payload, None).unwrap().status, RouteStatus::Empty);
    assert_eq!(planner.post_count(), 2);
    assert_eq!(client.telemetry().len(), 2);
}
