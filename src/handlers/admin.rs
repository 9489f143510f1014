use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;

use crate::db::{ObservationFilter, PatientFilter, StudyFilter};
use crate::handlers::ActorContext;
use crate::models::{ExchangeError, ObservationRecord, PatientRecord, StudyRecord};
use crate::pagination::{PageEnvelope, PageParams};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct AdminListQuery {
    pub organization_id: Option<i64>,
    pub study_id: Option<i64>,
    pub patient_id: Option<i64>,
    pub patient_identifier: Option<String>,
    pub observation_id: Option<i64>,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

pub async fn list_patients(
    State(state): State<AppState>,
    ActorContext(actor): ActorContext,
    Query(query): Query<AdminListQuery>,
) -> Result<Json<PageEnvelope<PatientRecord>>, ExchangeError> {
    let params = PageParams::new(query.page, query.page_size);
    let filter = PatientFilter {
        organization_id: query.organization_id,
        study_id: query.study_id,
        patient_id: query.patient_id,
        identifier: query.patient_identifier,
    };
    let (results, count) = state.scoped.list_patients(&actor, &filter, params).await?;
    let base_url = format!("{}/api/v1/patients", state.site_url);
    Ok(Json(PageEnvelope::new(count, params, &base_url, results)))
}

pub async fn get_patient(
    State(state): State<AppState>,
    ActorContext(actor): ActorContext,
    Path(patient_id): Path<i64>,
) -> Result<Json<PatientRecord>, ExchangeError> {
    let patient = state.scoped.get_patient(&actor, patient_id).await?;
    Ok(Json(patient))
}

pub async fn list_studies(
    State(state): State<AppState>,
    ActorContext(actor): ActorContext,
    Query(query): Query<AdminListQuery>,
) -> Result<Json<PageEnvelope<StudyRecord>>, ExchangeError> {
    let params = PageParams::new(query.page, query.page_size);
    let filter = StudyFilter {
        organization_id: query.organization_id,
        study_id: query.study_id,
    };
    let (results, count) = state.scoped.list_studies(&actor, &filter, params).await?;
    let base_url = format!("{}/api/v1/studies", state.site_url);
    Ok(Json(PageEnvelope::new(count, params, &base_url, results)))
}

pub async fn get_study(
    State(state): State<AppState>,
    ActorContext(actor): ActorContext,
    Path(study_id): Path<i64>,
) -> Result<Json<StudyRecord>, ExchangeError> {
    let study = state.scoped.get_study(&actor, study_id).await?;
    Ok(Json(study))
}

pub async fn list_observations(
    State(state): State<AppState>,
    ActorContext(actor): ActorContext,
    Query(query): Query<AdminListQuery>,
) -> Result<Json<PageEnvelope<ObservationRecord>>, ExchangeError> {
    let params = PageParams::new(query.page, query.page_size);
    let filter = ObservationFilter {
        organization_id: query.organization_id,
        study_id: query.study_id,
        patient_id: query.patient_id,
        patient_identifier: query.patient_identifier,
        observation_id: query.observation_id,
        ..Default::default()
    };
    let (results, count) = state
        .scoped
        .list_observations(&actor, &filter, params)
        .await?;
    let base_url = format!("{}/api/v1/observations", state.site_url);
    Ok(Json(PageEnvelope::new(count, params, &base_url, results)))
}

pub async fn get_observation(
    State(state): State<AppState>,
    ActorContext(actor): ActorContext,
    Path(observation_id): Path<i64>,
) -> Result<Json<ObservationRecord>, ExchangeError> {
    let observation = state.scoped.get_observation(&actor, observation_id).await?;
    Ok(Json(observation))
}
