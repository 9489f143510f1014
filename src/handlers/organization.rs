use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use crate::handlers::ActorContext;
use crate::models::{
    ExchangeError, OrganizationNode, OrganizationRecord, OrganizationUserRecord,
    PractitionerRecord, Role,
};
use crate::AppState;

/// Membership change body: exactly one of `practitioner_id` (with a role)
/// or `patient_id`.
#[derive(Debug, Deserialize)]
pub struct MembershipBody {
    pub practitioner_id: Option<i64>,
    pub role: Option<String>,
    pub patient_id: Option<i64>,
}

pub async fn list_organizations(
    State(state): State<AppState>,
    ActorContext(_actor): ActorContext,
) -> Result<Json<Vec<OrganizationRecord>>, ExchangeError> {
    let organizations = state.organizations.list().await?;
    Ok(Json(organizations))
}

pub async fn get_organization(
    State(state): State<AppState>,
    ActorContext(_actor): ActorContext,
    Path(organization_id): Path<i64>,
) -> Result<Json<OrganizationRecord>, ExchangeError> {
    let organization = state.organizations.get(organization_id).await?;
    Ok(Json(organization))
}

pub async fn delete_organization(
    State(state): State<AppState>,
    ActorContext(actor): ActorContext,
    Path(organization_id): Path<i64>,
) -> Result<StatusCode, ExchangeError> {
    state.organizations.delete(&actor, organization_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_tree(
    State(state): State<AppState>,
    ActorContext(_actor): ActorContext,
    Path(organization_id): Path<i64>,
) -> Result<Json<OrganizationNode>, ExchangeError> {
    let tree = state.organizations.tree(organization_id).await?;
    Ok(Json(tree))
}

pub async fn get_practitioner(
    State(state): State<AppState>,
    ActorContext(_actor): ActorContext,
    Path(practitioner_id): Path<i64>,
) -> Result<Json<PractitionerRecord>, ExchangeError> {
    let practitioner = state.organizations.get_practitioner(practitioner_id).await?;
    Ok(Json(practitioner))
}

pub async fn list_users(
    State(state): State<AppState>,
    ActorContext(_actor): ActorContext,
    Path(organization_id): Path<i64>,
) -> Result<Json<Vec<OrganizationUserRecord>>, ExchangeError> {
    let users = state.organizations.list_users(organization_id).await?;
    Ok(Json(users))
}

pub async fn add_user(
    State(state): State<AppState>,
    ActorContext(actor): ActorContext,
    Path(organization_id): Path<i64>,
    Json(body): Json<MembershipBody>,
) -> Result<StatusCode, ExchangeError> {
    match (body.practitioner_id, body.patient_id) {
        (Some(practitioner_id), None) => {
            let role = body
                .role
                .as_deref()
                .and_then(Role::parse)
                .ok_or_else(|| {
                    ExchangeError::validation(
                        "Adding a practitioner needs a role of manager, member or viewer.",
                    )
                })?;
            state
                .organizations
                .add_practitioner(&actor, organization_id, practitioner_id, role)
                .await?;
        }
        (None, Some(patient_id)) => {
            state
                .organizations
                .add_patient(&actor, organization_id, patient_id)
                .await?;
        }
        _ => {
            return Err(ExchangeError::validation(
                "Provide exactly one of practitioner_id or patient_id.",
            ))
        }
    }
    Ok(StatusCode::CREATED)
}

pub async fn remove_user(
    State(state): State<AppState>,
    ActorContext(actor): ActorContext,
    Path(organization_id): Path<i64>,
    Json(body): Json<MembershipBody>,
) -> Result<StatusCode, ExchangeError> {
    match (body.practitioner_id, body.patient_id) {
        (Some(practitioner_id), None) => {
            state
                .organizations
                .remove_practitioner(&actor, organization_id, practitioner_id)
                .await?;
        }
        (None, Some(patient_id)) => {
            state
                .organizations
                .remove_patient(&actor, organization_id, patient_id)
                .await?;
        }
        _ => {
            return Err(ExchangeError::validation(
                "Provide exactly one of practitioner_id or patient_id.",
            ))
        }
    }
    Ok(StatusCode::NO_CONTENT)
}
