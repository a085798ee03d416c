//! # API Handlers
//!
//! Each handler parses its query string and body, calls [`ObservationService`] and renders
//! the result. Authentication and scope checks have already run as middleware by the time a
//! handler executes.
//!
//! Bodies are taken as raw [`Bytes`] and decoded with [`parse_json_body`] so malformed JSON
//! maps to a 400 with the service's error body rather than the framework's default rejection.

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap},
    response::Json,
    Extension,
};
use bytes::Bytes;
use serde_json::{json, Map, Value};
use std::sync::Arc;

use super::query::{parse_json_body, parse_optional_json_body, QueryParams};
use super::AppState;
use crate::auth::AuthContext;
use crate::core::error::{ObservationsError, ObservationsResult};
use crate::observations::dates::{parse_day, parse_range, parse_timestamp, RangeEdge};
use crate::observations::model::{render_all, ObservationSet, ObservationSetRequest, ObservationSetUpdate};
use crate::observations::service::format_time_taken;
use crate::observations::store::{AggregateFilter, LocationSearch};

type JsonResult = ObservationsResult<Json<Value>>;

fn to_json<T: serde::Serialize>(value: &T) -> JsonResult {
    Ok(Json(serde_json::to_value(value)?))
}

/// GET endpoints refuse JSON bodies
fn reject_json_body(headers: &HeaderMap, body: &Bytes) -> ObservationsResult<()> {
    let declares_json = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map_or(false, |value| value.starts_with("application/json"));

    if declares_json || !body.iter().all(u8::is_ascii_whitespace) {
        return Err(ObservationsError::validation("Request should not contain a JSON body"));
    }
    Ok(())
}

/// `start_date`/`end_date` as a day range for the aggregate reports
fn aggregate_filter(
    params: &QueryParams,
    locations: Option<Vec<String>>,
) -> ObservationsResult<AggregateFilter> {
    let start = parse_day("start_date", params.require("start_date")?)?;
    let end = parse_day("end_date", params.require("end_date")?)?;
    if start > end {
        return Err(ObservationsError::unprocessable("End date is before Start date"));
    }
    Ok(AggregateFilter {
        start,
        end,
        locations,
    })
}

fn location_search(params: &QueryParams, locations: Vec<String>) -> ObservationsResult<LocationSearch> {
    let (start, end) = parse_range(params.require("start_date")?, params.require("end_date")?)?;
    Ok(LocationSearch {
        locations,
        start,
        end,
        limit: params.limit()?,
    })
}

/// Search results never carry the OBX fields; `compact` reduces them to uuids
fn render_search(sets: &[ObservationSet], compact: bool) -> JsonResult {
    if compact {
        let uuids = sets.iter().map(|set| json!({"uuid": set.uuid})).collect();
        return Ok(Json(Value::Array(uuids)));
    }
    Ok(Json(Value::Array(render_all(sets, true)?)))
}

pub async fn create_observation_set(
    State(state): State<AppState>,
    Extension(caller): Extension<Arc<AuthContext>>,
    params: QueryParams,
    body: Bytes,
) -> JsonResult {
    let suppress = params.flag("suppress_obs_publish", false)?;
    let request: ObservationSetRequest = parse_json_body(&body)?;
    let created = state
        .service
        .create_observation_set(request, &caller, suppress)
        .await?;
    Ok(Json(created.render(false)?))
}

pub async fn update_observation_set(
    State(state): State<AppState>,
    Extension(caller): Extension<Arc<AuthContext>>,
    Path(observation_set_id): Path<String>,
    body: Bytes,
) -> JsonResult {
    let update: ObservationSetUpdate = parse_json_body(&body)?;
    let updated = state
        .service
        .update_observation_set(&observation_set_id, &update, &caller)
        .await?;
    Ok(Json(updated.render(true)?))
}

pub async fn list_by_encounter(
    State(state): State<AppState>,
    params: QueryParams,
    headers: HeaderMap,
    body: Bytes,
) -> JsonResult {
    reject_json_body(&headers, &body)?;
    let encounter_ids = params.require_values("encounter_id")?;
    let compact = params.flag("compact", true)?;
    let sets = state
        .service
        .list_for_encounters(&encounter_ids, params.limit()?)
        .await?;
    Ok(Json(Value::Array(render_all(&sets, compact)?)))
}

pub async fn latest_by_encounter(
    State(state): State<AppState>,
    params: QueryParams,
    headers: HeaderMap,
    body: Bytes,
) -> JsonResult {
    reject_json_body(&headers, &body)?;
    let encounter_ids = params.require_values("encounter_id")?;
    let compact = params.flag("compact", true)?;
    let latest = state.service.latest_for_encounter(&encounter_ids).await?;
    Ok(Json(latest.render(compact)?))
}

pub async fn latest_by_encounters(
    State(state): State<AppState>,
    params: QueryParams,
    body: Bytes,
) -> JsonResult {
    let encounter_ids: Vec<String> = parse_json_body(&body)?;
    let compact = params.flag("compact", false)?;
    let latest = state.service.latest_for_encounters(&encounter_ids).await?;

    let mut rendered = Map::new();
    for (encounter_id, set) in latest {
        rendered.insert(encounter_id, set.render(compact)?);
    }
    Ok(Json(Value::Object(rendered)))
}

pub async fn get_observation_set(
    State(state): State<AppState>,
    Path(observation_set_id): Path<String>,
    params: QueryParams,
    headers: HeaderMap,
    body: Bytes,
) -> JsonResult {
    reject_json_body(&headers, &body)?;
    let compact = params.flag("compact", false)?;
    let set = state.service.get_observation_set(&observation_set_id).await?;
    Ok(Json(set.render(compact)?))
}

pub async fn count_by_encounters(State(state): State<AppState>, body: Bytes) -> JsonResult {
    let encounter_ids: Vec<String> = parse_json_body(&body)?;
    let counts = state.service.count_for_encounters(&encounter_ids).await?;
    to_json(&counts)
}

pub async fn search_by_location(
    State(state): State<AppState>,
    params: QueryParams,
    headers: HeaderMap,
    body: Bytes,
) -> JsonResult {
    reject_json_body(&headers, &body)?;
    let search = location_search(&params, params.require_values("location")?)?;
    let sets = state.service.search_by_locations(&search).await?;
    render_search(&sets, params.flag("compact", false)?)
}

pub async fn search_by_locations(
    State(state): State<AppState>,
    params: QueryParams,
    body: Bytes,
) -> JsonResult {
    let locations: Vec<String> = parse_json_body(&body)?;
    let search = location_search(&params, locations)?;
    let sets = state.service.search_by_locations(&search).await?;
    render_search(&sets, params.flag("compact", false)?)
}

pub async fn list_by_patient(
    State(state): State<AppState>,
    Path(patient_id): Path<String>,
    params: QueryParams,
) -> JsonResult {
    let sets = state
        .service
        .list_for_patient(&patient_id, params.limit()?)
        .await?;
    Ok(Json(Value::Array(render_all(&sets, true)?)))
}

pub async fn modified_since(State(state): State<AppState>, params: QueryParams) -> JsonResult {
    let since = parse_timestamp(
        "modified_since",
        params.require("modified_since")?,
        RangeEdge::Start,
    )?;
    let compact = params.flag("compact", false)?;
    let sets = state.service.modified_since(since).await?;
    Ok(Json(Value::Array(render_all(&sets, compact)?)))
}

pub async fn refresh_aggregates(State(state): State<AppState>) -> JsonResult {
    let elapsed = state.service.refresh_aggregates().await?;
    Ok(Json(json!({"time_taken": format_time_taken(elapsed)})))
}

pub async fn on_time_stats(
    State(state): State<AppState>,
    params: QueryParams,
    body: Bytes,
) -> JsonResult {
    let filter = aggregate_filter(&params, parse_optional_json_body(&body)?)?;
    to_json(&state.service.on_time_report(&filter).await?)
}

pub async fn missing_stats(
    State(state): State<AppState>,
    params: QueryParams,
    body: Bytes,
) -> JsonResult {
    let filter = aggregate_filter(&params, parse_optional_json_body(&body)?)?;
    to_json(&state.service.missing_report(&filter).await?)
}

pub async fn on_time_intervals(
    State(state): State<AppState>,
    params: QueryParams,
    body: Bytes,
) -> JsonResult {
    let filter = aggregate_filter(&params, parse_optional_json_body(&body)?)?;
    to_json(&state.service.interval_report(&filter).await?)
}

pub async fn monthly_stats(
    State(state): State<AppState>,
    params: QueryParams,
    body: Bytes,
) -> JsonResult {
    let filter = aggregate_filter(&params, parse_optional_json_body(&body)?)?;
    to_json(&state.service.monthly_report(&filter).await?)
}

pub async fn monthly_stats_by_location(
    State(state): State<AppState>,
    params: QueryParams,
) -> JsonResult {
    let filter = aggregate_filter(&params, None)?;
    to_json(&state.service.monthly_by_location_report(&filter).await?)
}

pub async fn drop_data(State(state): State<AppState>) -> JsonResult {
    state.service.drop_data().await?;
    Ok(Json(json!({})))
}
