//! End-to-end tests of the HTTP API over the in-memory store.
//!
//! Every test builds the production router with a recording publisher so the published
//! events can be inspected, and signs its own HS512 tokens.

use http::{HeaderName, HeaderValue, StatusCode};
use axum_test::{TestRequest, TestServer};
use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde_json::{json, Value};
use std::sync::Arc;

use observations_api::core::config::{DatabaseBackend, Environment, MessagingBackend, ServiceConfig};
use observations_api::messaging::RecordingPublisher;
use observations_api::observations::{InMemoryObservationStore, ObservationService};
use observations_api::{build_router, AppState};

const SECRET: &str = "integration-test-secret";
const ISSUER: &str = "http://localhost/";
const ADAPTER_WORKER: &str = "dhos-observations-adapter-worker";

struct TestApp {
    server: TestServer,
    publisher: Arc<RecordingPublisher>,
}

fn test_config(environment: Environment) -> ServiceConfig {
    let mut config = ServiceConfig::default();
    config.environment = environment;
    config.database.backend = DatabaseBackend::Memory;
    config.messaging.backend = MessagingBackend::Log;
    config.auth.hs_key = Some(SECRET.to_string());
    config.auth.hs_issuer = Some(ISSUER.to_string());
    config.observability.metrics.enabled = false;
    config
}

fn test_app_in(environment: Environment) -> TestApp {
    let config = test_config(environment);
    let publisher = Arc::new(RecordingPublisher::new());
    let service = Arc::new(ObservationService::new(
        Arc::new(InMemoryObservationStore::new()),
        publisher.clone(),
        config.environment,
    ));
    let app = build_router(AppState::new(service), &config, None);
    TestApp {
        server: TestServer::new(app).unwrap(),
        publisher,
    }
}

fn test_app() -> TestApp {
    test_app_in(Environment::Test)
}

fn token(scopes: &[&str], metadata: Value) -> String {
    let claims = json!({
        "exp": Utc::now().timestamp() + 600,
        "iat": Utc::now().timestamp(),
        "iss": ISSUER,
        "scope": scopes.join(" "),
        "metadata": metadata,
    });
    encode(
        &Header::new(Algorithm::HS512),
        &claims,
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .expect("Failed to create test JWT")
}

fn clinician_token() -> String {
    token(
        &["read:send_observation", "write:send_observation"],
        json!({"clinician_id": "clinician-1"}),
    )
}

fn adapter_token() -> String {
    token(&["write:observation"], json!({"system_id": ADAPTER_WORKER}))
}

fn bearer(request: TestRequest, jwt: &str) -> TestRequest {
    request.add_header(
        HeaderName::from_static("authorization"),
        HeaderValue::from_str(&format!("Bearer {}", jwt)).unwrap(),
    )
}

fn observation_set(encounter_id: &str, location: &str, record_time: &str) -> Value {
    json!({
        "encounter_id": encounter_id,
        "patient_id": "patient-1",
        "record_time": record_time,
        "score_system": "news2",
        "score_value": 2,
        "score_severity": "low",
        "spo2_scale": 1,
        "is_partial": false,
        "time_next_obs_set_due": "2021-05-10T12:00:00.000Z",
        "location": location,
        "obx_reference_range": "0-4",
        "observations": [
            {
                "observation_type": "heart_rate",
                "measured_time": record_time,
                "observation_value": 72,
                "observation_unit": "bpm",
                "score_value": 0
            },
            {
                "observation_type": "spo2",
                "measured_time": record_time,
                "observation_value": 95,
                "observation_unit": "%",
                "score_value": 1
            }
        ]
    })
}

async fn create(app: &TestApp, body: &Value) -> Value {
    let response = bearer(app.server.post("/dhos/v2/observation_set"), &clinician_token())
        .json(body)
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    response.json::<Value>()
}

async fn count(app: &TestApp, encounter_id: &str) -> i64 {
    let response = bearer(app.server.post("/dhos/v2/observation_set/count"), &clinician_token())
        .json(&json!([encounter_id]))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    response.json::<Value>()[encounter_id].as_i64().unwrap()
}

#[tokio::test]
async fn test_running_needs_no_token() {
    let app = test_app();
    let response = app.server.get("/running").await;
    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(response.json::<Value>(), json!({"running": true}));
}

#[tokio::test]
async fn test_create_returns_full_set_and_publishes_events() {
    let app = test_app();
    let created = create(&app, &observation_set("encounter-1", "ward-a", "2021-05-10T10:00:00.000Z")).await;

    assert_eq!(created["encounter_id"], "encounter-1");
    assert_eq!(created["obx_reference_range"], "0-4");
    assert_eq!(created["created_by"], "clinician-1");
    assert_eq!(created["mins_late"], 0);
    assert_eq!(created["observations"].as_array().unwrap().len(), 2);

    let names = app.publisher.event_names();
    assert!(names.contains(&"OBSERVATION_SET_UPDATED"));
    assert!(names.contains(&"ENCOUNTER_UPDATED"));

    let messages = app.publisher.messages();
    let encounter_event = messages
        .iter()
        .find(|message| message.name == "ENCOUNTER_UPDATED")
        .unwrap();
    assert_eq!(encounter_event.routing_key, "dhos.DM000007");
    assert_eq!(encounter_event.body, json!({"encounter_id": "encounter-1"}));

    let set_event = messages
        .iter()
        .find(|message| message.name == "OBSERVATION_SET_UPDATED")
        .unwrap();
    assert_eq!(
        set_event.body["actions"][0]["data"]["observation_set"]["uuid"],
        created["uuid"]
    );
}

#[tokio::test]
async fn test_suppressed_publish_still_audits() {
    let app = test_app();
    let response = bearer(app.server.post("/dhos/v2/observation_set"), &clinician_token())
        .add_query_param("suppress_obs_publish", "true")
        .json(&observation_set("encounter-1", "ward-a", "2021-05-10T10:00:00.000Z"))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(app.publisher.event_names(), vec!["AUDIT_MESSAGE"]);
}

#[tokio::test]
async fn test_count_goes_from_one_to_two() {
    let app = test_app();
    create(&app, &observation_set("encounter-1", "ward-a", "2021-05-10T10:00:00.000Z")).await;
    assert_eq!(count(&app, "encounter-1").await, 1);

    create(&app, &observation_set("encounter-1", "ward-a", "2021-05-10T11:00:00.000Z")).await;
    assert_eq!(count(&app, "encounter-1").await, 2);
    assert_eq!(count(&app, "encounter-unknown").await, 0);
}

#[tokio::test]
async fn test_latest_is_most_recently_created_even_after_update() {
    let app = test_app();
    let first = create(&app, &observation_set("encounter-1", "ward-a", "2021-05-10T10:00:00.000Z")).await;
    let second = create(&app, &observation_set("encounter-1", "ward-a", "2021-05-10T11:00:00.000Z")).await;

    let patch = json!({
        "score_value": 5,
        "score_severity": "medium",
        "observations": [{"observation_type": "spo2", "score_value": 3}]
    });
    let path = format!("/dhos/v2/observation_set/{}", first["uuid"].as_str().unwrap());
    let response = bearer(app.server.patch(&path), &adapter_token()).json(&patch).await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let updated = response.json::<Value>();
    assert_eq!(updated["score_value"], 5);
    assert_eq!(updated["score_severity"], "medium");
    assert!(updated.get("obx_reference_range").is_none());

    let response = bearer(app.server.get("/dhos/v2/observation_set/latest"), &clinician_token())
        .add_query_param("encounter_id", "encounter-1")
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(response.json::<Value>()["uuid"], second["uuid"]);

    let response = bearer(app.server.post("/dhos/v2/observation_set/latest"), &clinician_token())
        .json(&json!(["encounter-1", "encounter-2"]))
        .await;
    let latest = response.json::<Value>();
    assert_eq!(latest["encounter-1"]["uuid"], second["uuid"]);
    assert!(latest.get("encounter-2").is_none());
}

#[tokio::test]
async fn test_latest_for_encounter_without_sets_is_404() {
    let app = test_app();
    let response = bearer(app.server.get("/dhos/v2/observation_set/latest"), &clinician_token())
        .add_query_param("encounter_id", "encounter-9")
        .await;
    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_patch_requires_adapter_worker() {
    let app = test_app();
    let created = create(&app, &observation_set("encounter-1", "ward-a", "2021-05-10T10:00:00.000Z")).await;
    let path = format!("/dhos/v2/observation_set/{}", created["uuid"].as_str().unwrap());
    let patch = json!({"score_value": 1, "observations": []});

    let response = bearer(app.server.patch(&path), &clinician_token()).json(&patch).await;
    assert_eq!(response.status_code(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_patch_with_unknown_observation_type_is_404() {
    let app = test_app();
    let created = create(&app, &observation_set("encounter-1", "ward-a", "2021-05-10T10:00:00.000Z")).await;
    let path = format!("/dhos/v2/observation_set/{}", created["uuid"].as_str().unwrap());
    let patch = json!({
        "score_value": 1,
        "observations": [{"observation_type": "temperature", "score_value": 1}]
    });

    let response = bearer(app.server.patch(&path), &adapter_token()).json(&patch).await;
    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_search_by_single_location_and_by_list() {
    let app = test_app();
    let in_a = create(&app, &observation_set("encounter-1", "ward-a", "2021-05-10T10:00:00.000Z")).await;
    create(&app, &observation_set("encounter-2", "ward-b", "2021-05-11T10:00:00.000Z")).await;
    create(&app, &observation_set("encounter-3", "ward-c", "2021-05-12T10:00:00.000Z")).await;

    let response = bearer(app.server.get("/dhos/v2/observation_set_search"), &clinician_token())
        .add_query_param("location", "ward-a")
        .add_query_param("start_date", "2021-05-01")
        .add_query_param("end_date", "2021-05-31")
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let found = response.json::<Value>();
    assert_eq!(found.as_array().unwrap().len(), 1);
    assert_eq!(found[0]["uuid"], in_a["uuid"]);

    let response = bearer(app.server.post("/dhos/v2/observation_set_search"), &clinician_token())
        .add_query_param("start_date", "2021-05-01")
        .add_query_param("end_date", "2021-05-31")
        .json(&json!(["ward-a", "ward-b"]))
        .await;
    let found = response.json::<Value>();
    assert_eq!(found.as_array().unwrap().len(), 2);
    // Newest record first
    assert_eq!(found[1]["uuid"], in_a["uuid"]);

    let response = bearer(app.server.post("/dhos/v2/observation_set_search"), &clinician_token())
        .add_query_param("start_date", "2021-05-01")
        .add_query_param("end_date", "2021-05-31")
        .add_query_param("compact", "true")
        .json(&json!(["ward-a"]))
        .await;
    assert_eq!(response.json::<Value>(), json!([{"uuid": in_a["uuid"]}]));
}

#[tokio::test]
async fn test_search_with_inverted_range_is_422() {
    let app = test_app();
    let response = bearer(app.server.get("/dhos/v2/observation_set_search"), &clinician_token())
        .add_query_param("location", "ward-a")
        .add_query_param("start_date", "2021-06-01")
        .add_query_param("end_date", "2021-05-01")
        .await;
    assert_eq!(response.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(
        response.json::<Value>()["error"]["message"],
        "End date is before Start date"
    );
}

#[tokio::test]
async fn test_monthly_reports_after_aggregation() {
    let app = test_app();
    create(&app, &observation_set("encounter-1", "ward-a", "2021-05-10T10:00:00.000Z")).await;
    create(&app, &observation_set("encounter-2", "ward-b", "2021-05-11T10:00:00.000Z")).await;

    let response = bearer(app.server.post("/dhos/v2/aggregate_obs"), &clinician_token()).await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let time_taken = response.json::<Value>()["time_taken"].as_str().unwrap().to_string();
    assert!(time_taken.ends_with(" seconds"));

    let response = bearer(app.server.post("/dhos/v2/observation_sets_by_month"), &clinician_token())
        .add_query_param("start_date", "2021-01-01")
        .add_query_param("end_date", "2021-12-31")
        .json(&json!(["ward-a"]))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let monthly = response.json::<Value>();
    assert_eq!(monthly["2021-05"]["all_obs_sets"], 1);
    assert_eq!(monthly["2021-05"]["low"], 1);
    assert_eq!(monthly["2021-05"]["heart_rate"], 0);
    assert_eq!(monthly["2021-05"]["temperature"], 1);

    let response = bearer(app.server.get("/dhos/v2/observation_sets_by_month"), &clinician_token())
        .add_query_param("start_date", "2021-01-01")
        .add_query_param("end_date", "2021-12-31")
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let by_location = response.json::<Value>();
    assert_eq!(by_location["ward-a"]["2021-05"]["all_obs_sets"], 1);
    assert_eq!(by_location["ward-b"]["2021-05"]["all_obs_sets"], 1);
}

#[tokio::test]
async fn test_reports_only_see_refreshed_aggregate() {
    let app = test_app();
    create(&app, &observation_set("encounter-1", "ward-a", "2021-05-10T10:00:00.000Z")).await;

    let monthly = || {
        bearer(app.server.post("/dhos/v2/observation_sets_by_month"), &clinician_token())
            .add_query_param("start_date", "2021-01-01")
            .add_query_param("end_date", "2021-12-31")
    };

    assert_eq!(monthly().await.json::<Value>(), json!({}));
    bearer(app.server.post("/dhos/v2/aggregate_obs"), &clinician_token()).await;
    assert_eq!(monthly().await.json::<Value>()["2021-05"]["all_obs_sets"], 1);
}

#[tokio::test]
async fn test_on_time_and_missing_stats() {
    let app = test_app();
    create(&app, &observation_set("encounter-1", "ward-a", "2021-05-10T10:00:00.000Z")).await;
    bearer(app.server.post("/dhos/v2/aggregate_obs"), &clinician_token()).await;

    let response = bearer(app.server.post("/dhos/v2/on_time_obs_stats"), &clinician_token())
        .add_query_param("start_date", "2021-05-01")
        .add_query_param("end_date", "2021-05-31")
        .json(&json!(["ward-a"]))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let on_time = response.json::<Value>();
    assert_eq!(on_time["on_time"], 1);
    assert_eq!(on_time["late"], 0);
    assert_eq!(on_time["ward-a"]["date"]["2021-05-10"]["on_time"], 1);

    let response = bearer(app.server.post("/dhos/v2/missing_obs_stats"), &clinician_token())
        .add_query_param("start_date", "2021-05-01")
        .add_query_param("end_date", "2021-05-31")
        .json(&json!(["ward-a"]))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let missing = response.json::<Value>();
    assert_eq!(missing["total_obs_sets"], 1);
    assert_eq!(missing["spo2_missing"], 0);
    assert_eq!(missing["temperature_missing"], 1);
}

#[tokio::test]
async fn test_missing_token_is_401() {
    let app = test_app();
    let response = app
        .server
        .post("/dhos/v2/observation_set")
        .json(&observation_set("encounter-1", "ward-a", "2021-05-10T10:00:00.000Z"))
        .await;
    assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
    assert!(app.publisher.messages().is_empty());
}

#[tokio::test]
async fn test_token_signed_with_other_key_is_401() {
    let app = test_app();
    let forged = encode(
        &Header::new(Algorithm::HS512),
        &json!({"exp": Utc::now().timestamp() + 600, "iss": ISSUER, "scope": "read:observation", "metadata": {"clinician_id": "c"}}),
        &EncodingKey::from_secret(b"someone-else"),
    )
    .unwrap();
    let response = bearer(app.server.get("/dhos/v2/observation_set"), &forged)
        .add_query_param("encounter_id", "encounter-1")
        .await;
    assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_read_scope_cannot_create() {
    let app = test_app();
    let reader = token(&["read:observation"], json!({"clinician_id": "clinician-1"}));
    let response = bearer(app.server.post("/dhos/v2/observation_set"), &reader)
        .json(&observation_set("encounter-1", "ward-a", "2021-05-10T10:00:00.000Z"))
        .await;
    assert_eq!(response.status_code(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_invalid_observation_is_400() {
    let app = test_app();
    let mut body = observation_set("encounter-1", "ward-a", "2021-05-10T10:00:00.000Z");
    body["observations"][0]["observation_string"] = json!("high");
    let response = bearer(app.server.post("/dhos/v2/observation_set"), &clinician_token())
        .json(&body)
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);

    body["observations"] = json!([]);
    let response = bearer(app.server.post("/dhos/v2/observation_set"), &clinician_token())
        .json(&body)
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_list_by_encounter_is_compact_by_default() {
    let app = test_app();
    create(&app, &observation_set("encounter-1", "ward-a", "2021-05-10T10:00:00.000Z")).await;
    create(&app, &observation_set("encounter-2", "ward-a", "2021-05-10T11:00:00.000Z")).await;

    let response = bearer(app.server.get("/dhos/v2/observation_set"), &clinician_token())
        .add_query_param("encounter_id", "encounter-1,encounter-2")
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let sets = response.json::<Value>();
    assert_eq!(sets.as_array().unwrap().len(), 2);
    assert!(sets[0].get("obx_reference_range").is_none());
    assert_eq!(sets[0]["encounter_id"], "encounter-2");

    let response = bearer(app.server.get("/dhos/v2/observation_set"), &clinician_token())
        .add_query_param("encounter_id", "encounter-1")
        .json(&json!({}))
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_patient_listing_and_get_by_id() {
    let app = test_app();
    let created = create(&app, &observation_set("encounter-1", "ward-a", "2021-05-10T10:00:00.000Z")).await;

    let response = bearer(
        app.server.get("/dhos/v2/patient/patient-1/observation_set"),
        &clinician_token(),
    )
    .await;
    assert_eq!(response.json::<Value>()[0]["uuid"], created["uuid"]);

    let path = format!("/dhos/v2/observation_set/{}", created["uuid"].as_str().unwrap());
    let response = bearer(app.server.get(&path), &clinician_token()).await;
    assert_eq!(response.json::<Value>()["obx_reference_range"], "0-4");

    let response = bearer(app.server.get("/dhos/v2/observation_set/missing-id"), &clinician_token()).await;
    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_drop_data_outside_production() {
    let app = test_app();
    create(&app, &observation_set("encounter-1", "ward-a", "2021-05-10T10:00:00.000Z")).await;

    let response = app.server.post("/drop_data").await;
    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(count(&app, "encounter-1").await, 0);
}

#[tokio::test]
async fn test_drop_data_not_mounted_in_production() {
    let app = test_app_in(Environment::Production);
    let response = app.server.post("/drop_data").await;
    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_search_results_are_compact() {
    let app = test_app();
    let in_a = create(&app, &observation_set("encounter-1", "ward-a", "2021-05-10T10:00:00.000Z")).await;

    let search = || {
        bearer(app.server.get("/dhos/v2/observation_set_search"), &clinician_token())
            .add_query_param("location", "ward-a")
            .add_query_param("start_date", "2021-05-01")
            .add_query_param("end_date", "2021-05-31")
    };

    let response = search().add_query_param("compact", "true").await;
    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(response.json::<Value>(), json!([{"uuid": in_a["uuid"]}]));

    let full = search().await.json::<Value>();
    assert_eq!(full[0]["uuid"], in_a["uuid"]);
    assert_eq!(full[0]["observations"].as_array().unwrap().len(), 2);
    assert!(full[0].get("obx_reference_range").is_none());

    let response = bearer(app.server.post("/dhos/v2/observation_set_search"), &clinician_token())
        .add_query_param("start_date", "2021-05-01")
        .add_query_param("end_date", "2021-05-31")
        .json(&json!(["ward-a"]))
        .await;
    assert!(response.json::<Value>()[0].get("obx_reference_range").is_none());
}

#[tokio::test]
async fn test_zero_limit_returns_nothing() {
    let app = test_app();
    create(&app, &observation_set("encounter-1", "ward-a", "2021-05-10T10:00:00.000Z")).await;

    let response = bearer(app.server.get("/dhos/v2/observation_set"), &clinician_token())
        .add_query_param("encounter_id", "encounter-1")
        .add_query_param("limit", "0")
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(response.json::<Value>(), json!([]));
}

#[tokio::test]
async fn test_latest_follows_creation_not_record_time() {
    let app = test_app();
    create(&app, &observation_set("encounter-1", "ward-a", "2021-05-10T15:00:00.000Z")).await;
    let newest = create(&app, &observation_set("encounter-1", "ward-a", "2021-05-10T09:00:00.000Z")).await;

    let response = bearer(app.server.get("/dhos/v2/observation_set/latest"), &clinician_token())
        .add_query_param("encounter_id", "encounter-1")
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(response.json::<Value>()["uuid"], newest["uuid"]);
}

#[tokio::test]
async fn test_latest_across_several_encounters() {
    let app = test_app();
    create(&app, &observation_set("encounter-1", "ward-a", "2021-05-10T15:00:00.000Z")).await;
    let newest = create(&app, &observation_set("encounter-2", "ward-a", "2021-05-10T09:00:00.000Z")).await;

    let response = bearer(app.server.get("/dhos/v2/observation_set/latest"), &clinician_token())
        .add_query_param("encounter_id", "encounter-1,encounter-2")
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(response.json::<Value>()["uuid"], newest["uuid"]);

    let response = bearer(app.server.get("/dhos/v2/observation_set/latest"), &clinician_token())
        .add_query_param("encounter_id", "encounter-8")
        .add_query_param("encounter_id", "encounter-9")
        .await;
    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
    assert_eq!(
        response.json::<Value>()["error"]["message"],
        "Encounter encounter-8, encounter-9 has no observation sets"
    );
}

#[tokio::test]
async fn test_single_set_gets_reject_json_bodies() {
    let app = test_app();
    let created = create(&app, &observation_set("encounter-1", "ward-a", "2021-05-10T10:00:00.000Z")).await;

    let response = bearer(app.server.get("/dhos/v2/observation_set/latest"), &clinician_token())
        .add_query_param("encounter_id", "encounter-1")
        .json(&json!({}))
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);

    let path = format!("/dhos/v2/observation_set/{}", created["uuid"].as_str().unwrap());
    let response = bearer(app.server.get(&path), &clinician_token()).json(&json!({})).await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    assert_eq!(
        response.json::<Value>()["error"]["message"],
        "Request validation failed: general - Request should not contain a JSON body"
    );
}

#[tokio::test]
async fn test_blank_encounter_id_is_treated_as_missing() {
    let app = test_app();
    let mut body = observation_set("", "ward-a", "2021-05-10T10:00:00.000Z");
    let created = create(&app, &body).await;

    assert!(created["encounter_id"].is_null());
    assert_eq!(
        app.publisher.event_names(),
        vec!["AUDIT_MESSAGE", "OBSERVATION_SET_UPDATED"]
    );

    body["patient_id"] = json!("");
    let response = bearer(app.server.post("/dhos/v2/observation_set"), &clinician_token())
        .json(&body)
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_modified_since() {
    let app = test_app();
    let created = create(&app, &observation_set("encounter-1", "ward-a", "2021-05-10T10:00:00.000Z")).await;

    let response = bearer(app.server.get("/dhos/v2/observation_sets"), &clinician_token())
        .add_query_param("modified_since", "2000-01-01T00:00:00.000Z")
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let sets = response.json::<Value>();
    assert_eq!(sets.as_array().unwrap().len(), 1);
    assert_eq!(sets[0]["uuid"], created["uuid"]);

    let response = bearer(app.server.get("/dhos/v2/observation_sets"), &clinician_token())
        .add_query_param("modified_since", "2999-01-01")
        .await;
    assert_eq!(response.json::<Value>(), json!([]));

    let response = bearer(app.server.get("/dhos/v2/observation_sets"), &clinician_token())
        .add_query_param("modified_since", "last tuesday")
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_on_time_intervals() {
    let app = test_app();
    create(&app, &observation_set("encounter-1", "ward-a", "2021-05-10T10:00:00.000Z")).await;
    create(&app, &observation_set("encounter-1", "ward-a", "2021-05-10T12:20:00.000Z")).await;
    bearer(app.server.post("/dhos/v2/aggregate_obs"), &clinician_token()).await;

    let response = bearer(app.server.post("/dhos/v2/on_time_intervals"), &clinician_token())
        .add_query_param("start_date", "2021-05-01")
        .add_query_param("end_date", "2021-05-31")
        .json(&json!(["ward-a"]))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let intervals = response.json::<Value>();

    // The first set of the encounter is on time, the second is 20 minutes past 12:00
    assert_eq!(intervals["risk"]["low"]["minus0_14"], 1);
    assert_eq!(intervals["risk"]["low"]["plus16_30"], 1);
    assert_eq!(intervals["risk"]["low"]["plus180"], 0);
    assert_eq!(intervals["ward-a"]["risk"]["low"]["plus16_30"], 1);
}
