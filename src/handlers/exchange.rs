use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::Value;

use crate::db::ObservationFilter;
use crate::handlers::ActorContext;
use crate::models::fhir::{Bundle, BundleEntry, FhirObservation};
use crate::models::ExchangeError;
use crate::pagination::{bundle_links, pagination_meta, PageParams};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct PatientSearchQuery {
    #[serde(rename = "_has:_group:member:_id")]
    pub study_id: Option<i64>,
    pub identifier: Option<String>,
    #[serde(rename = "_page")]
    pub page: Option<i64>,
    #[serde(rename = "_count")]
    pub count: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ObservationSearchQuery {
    #[serde(rename = "patient._has:_group:member:_id")]
    pub study_id: Option<i64>,
    pub patient: Option<String>,
    #[serde(rename = "patient.identifier")]
    pub patient_identifier: Option<String>,
    pub code: Option<String>,
    #[serde(rename = "_page")]
    pub page: Option<i64>,
    #[serde(rename = "_count")]
    pub count: Option<i64>,
}

pub async fn search_patients(
    State(state): State<AppState>,
    ActorContext(actor): ActorContext,
    Query(query): Query<PatientSearchQuery>,
) -> Result<Json<Bundle>, ExchangeError> {
    let params = PageParams::new(query.page, query.count);
    let identifier = query.identifier.as_deref().map(identifier_value);
    let (resources, total) = state
        .translator
        .search_patients(&actor, query.study_id, identifier, params)
        .await?;

    let base_url = format!("{}/fhir/r5/Patient", state.site_url);
    let entries = resources
        .into_iter()
        .map(|patient| {
            let full_url = patient
                .id
                .as_deref()
                .map(|id| format!("{base_url}/{id}"));
            Ok(BundleEntry {
                full_url,
                resource: Some(serde_json::to_value(&patient).map_err(to_unexpected)?),
                ..Default::default()
            })
        })
        .collect::<Result<Vec<_>, ExchangeError>>()?;
    Ok(Json(Bundle::searchset(
        total,
        entries,
        bundle_links(&base_url, params, total),
        pagination_meta(params, total),
    )))
}

pub async fn search_observations(
    State(state): State<AppState>,
    ActorContext(actor): ActorContext,
    Query(query): Query<ObservationSearchQuery>,
) -> Result<Json<Bundle>, ExchangeError> {
    let params = PageParams::new(query.page, query.count);
    let filter = observation_filter(&query)?;
    let (resources, total) = state
        .translator
        .search_observations(&actor, filter, params)
        .await?;

    let base_url = format!("{}/fhir/r5/Observation", state.site_url);
    let entries = resources
        .into_iter()
        .map(|observation: FhirObservation| {
            let full_url = observation
                .id
                .as_deref()
                .map(|id| format!("{base_url}/{id}"));
            Ok(BundleEntry {
                full_url,
                resource: Some(serde_json::to_value(&observation).map_err(to_unexpected)?),
                ..Default::default()
            })
        })
        .collect::<Result<Vec<_>, ExchangeError>>()?;
    Ok(Json(Bundle::searchset(
        total,
        entries,
        bundle_links(&base_url, params, total),
        pagination_meta(params, total),
    )))
}

pub async fn create_observation(
    State(state): State<AppState>,
    ActorContext(actor): ActorContext,
    Json(resource): Json<Value>,
) -> Result<(StatusCode, Json<FhirObservation>), ExchangeError> {
    let observation_id = state.translator.create_observation(&actor, &resource).await?;
    let created = state
        .translator
        .read_observation(&actor, observation_id)
        .await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn process_batch(
    State(state): State<AppState>,
    ActorContext(actor): ActorContext,
    Json(bundle): Json<Value>,
) -> Result<Json<Bundle>, ExchangeError> {
    let response = state.batch.process(&actor, &bundle).await?;
    Ok(Json(response))
}

/// `system|value` search tokens match on the value half; a bare token is the
/// value itself.
fn identifier_value(token: &str) -> &str {
    match token.split_once('|') {
        Some((_, value)) => value,
        None => token,
    }
}

fn observation_filter(query: &ObservationSearchQuery) -> Result<ObservationFilter, ExchangeError> {
    let patient_id = match query.patient.as_deref() {
        None => None,
        Some(raw) => Some(parse_patient_param(raw)?),
    };
    let (coding_system, coding_code) = match query.code.as_deref() {
        None => (None, None),
        Some(token) => {
            let (system, code) = match token.split_once('|') {
                Some((system, code)) => (system, code),
                None => ("", token),
            };
            let widen = |half: &str| {
                if half.is_empty() {
                    "%".to_string()
                } else {
                    half.to_string()
                }
            };
            (Some(widen(system)), Some(widen(code)))
        }
    };
    Ok(ObservationFilter {
        study_id: query.study_id,
        patient_id,
        patient_identifier: query
            .patient_identifier
            .as_deref()
            .map(|token| identifier_value(token).to_string()),
        coding_system,
        coding_code,
        ..Default::default()
    })
}

fn parse_patient_param(raw: &str) -> Result<i64, ExchangeError> {
    let id = raw.strip_prefix("Patient/").unwrap_or(raw);
    id.parse::<i64>().map_err(|_| {
        ExchangeError::validation(format!("patient parameter '{raw}' is not a patient id."))
    })
}

fn to_unexpected(err: serde_json::Error) -> ExchangeError {
    ExchangeError::Unexpected(err.into())
}
