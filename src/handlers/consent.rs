use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::handlers::ActorContext;
use crate::models::{ExchangeError, PatientRecord, ScopeCode, ScopeConsentRecord};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ConsentQuery {
    pub reset: Option<bool>,
}

/// Consent overview for one patient: what they have agreed to share overall,
/// what each study still waits on, and what each study has on record.
#[derive(Debug, Serialize)]
pub struct ConsentOverview {
    pub patient: PatientRecord,
    pub consolidated_consented_scopes: Vec<ScopeCode>,
    pub studies_pending_consent: Vec<StudyPendingGroup>,
    pub studies: Vec<StudyConsentGroup>,
}

#[derive(Debug, Serialize)]
pub struct StudyPendingGroup {
    pub id: i64,
    pub name: String,
    pub scope_requests: Vec<ScopeRequestView>,
}

#[derive(Debug, Serialize)]
pub struct ScopeRequestView {
    pub code: ScopeCode,
    pub scope_actions: String,
}

#[derive(Debug, Serialize)]
pub struct StudyConsentGroup {
    pub id: i64,
    pub name: String,
    pub scope_consents: Vec<ScopeConsentView>,
}

#[derive(Debug, Serialize)]
pub struct ScopeConsentView {
    pub code: ScopeCode,
    pub scope_actions: String,
    pub consented: bool,
    pub consented_time: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct ConsentWriteBody {
    pub study_scope_consents: Vec<StudyScopeConsents>,
}

#[derive(Debug, Deserialize)]
pub struct StudyScopeConsents {
    pub study_id: i64,
    pub scope_consents: Vec<ScopeConsentInput>,
}

#[derive(Debug, Deserialize)]
pub struct ScopeConsentInput {
    pub coding_system: String,
    pub coding_code: String,
    #[serde(default = "default_consented")]
    pub consented: bool,
}

fn default_consented() -> bool {
    true
}

pub async fn get_consents(
    State(state): State<AppState>,
    ActorContext(actor): ActorContext,
    Path(patient_id): Path<i64>,
    Query(query): Query<ConsentQuery>,
) -> Result<Response, ExchangeError> {
    // Visibility check doubles as the authorization gate.
    let patient = state.scoped.get_patient(&actor, patient_id).await?;

    if query.reset.unwrap_or(false) {
        let removed = state.consent.reset_consents(patient_id).await?;
        tracing::info!(patient_id, removed, "consents reset");
        return Ok(Json(serde_json::json!({ "reset_count": removed })).into_response());
    }

    let consolidated = state.consent.consolidated_scopes(patient_id).await?;
    let pending = state.consent.pending_scopes(patient_id).await?;
    let granted = state.consent.granted_scopes(patient_id).await?;

    let mut studies_pending_consent: Vec<StudyPendingGroup> = Vec::new();
    for scope in pending {
        let view = ScopeRequestView {
            code: scope.scope,
            scope_actions: scope.scope_actions,
        };
        match studies_pending_consent
            .iter_mut()
            .find(|group| group.id == scope.study_id)
        {
            Some(group) => group.scope_requests.push(view),
            None => studies_pending_consent.push(StudyPendingGroup {
                id: scope.study_id,
                name: scope.study_name,
                scope_requests: vec![view],
            }),
        }
    }

    let mut studies: Vec<StudyConsentGroup> = Vec::new();
    for scope in granted {
        let view = ScopeConsentView {
            code: scope.scope,
            scope_actions: scope.scope_actions,
            consented: scope.consented,
            consented_time: scope.consented_time,
        };
        match studies.iter_mut().find(|group| group.id == scope.study_id) {
            Some(group) => group.scope_consents.push(view),
            None => studies.push(StudyConsentGroup {
                id: scope.study_id,
                name: scope.study_name,
                scope_consents: vec![view],
            }),
        }
    }

    Ok(Json(ConsentOverview {
        patient,
        consolidated_consented_scopes: consolidated,
        studies_pending_consent,
        studies,
    })
    .into_response())
}

pub async fn apply_consents(
    State(state): State<AppState>,
    ActorContext(actor): ActorContext,
    Path(patient_id): Path<i64>,
    Json(body): Json<ConsentWriteBody>,
) -> Result<Json<Vec<ScopeConsentRecord>>, ExchangeError> {
    let mut applied = Vec::new();
    for study in &body.study_scope_consents {
        for consent in &study.scope_consents {
            let record = state
                .consent
                .set_consent(
                    &actor,
                    study.study_id,
                    patient_id,
                    &consent.coding_system,
                    &consent.coding_code,
                    consent.consented,
                )
                .await?;
            applied.push(record);
        }
    }
    Ok(Json(applied))
}

pub async fn delete_consents(
    State(state): State<AppState>,
    ActorContext(actor): ActorContext,
    Path(patient_id): Path<i64>,
    Json(body): Json<ConsentWriteBody>,
) -> Result<Json<serde_json::Value>, ExchangeError> {
    let mut removed = 0;
    for study in &body.study_scope_consents {
        for consent in &study.scope_consents {
            state
                .consent
                .remove_consent(
                    &actor,
                    study.study_id,
                    patient_id,
                    &consent.coding_system,
                    &consent.coding_code,
                )
                .await?;
            removed += 1;
        }
    }
    Ok(Json(serde_json::json!({ "removed": removed })))
}
