use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use sqlx::PgPool;

use crate::models::{Actor, ExchangeError, Role};

/// Administrative resource kinds the resolver knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Organization,
    Practitioner,
    Patient,
    Study,
    DataSource,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Organization => "organization",
            ResourceKind::Practitioner => "practitioner",
            ResourceKind::Patient => "patient",
            ResourceKind::Study => "study",
            ResourceKind::DataSource => "data_source",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Manage,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Manage => "manage",
        }
    }
}

/// Role→permission mapping as data. Permissions are `{resource}.{action}`
/// strings; anything not listed is denied.
fn role_permissions() -> &'static HashMap<Role, HashSet<&'static str>> {
    static TABLE: OnceLock<HashMap<Role, HashSet<&'static str>>> = OnceLock::new();
    TABLE.get_or_init(|| {
        HashMap::from([
            (
                Role::Manager,
                HashSet::from([
                    "organization.manage",
                    "practitioner.manage",
                    "patient.manage",
                    "study.manage",
                    "data_source.manage",
                ]),
            ),
            (
                Role::Member,
                HashSet::from(["patient.manage", "study.manage", "data_source.manage"]),
            ),
            (Role::Viewer, HashSet::new()),
        ])
    })
}

/// Pure table lookup, independent of any storage.
pub fn role_allows(role: Role, resource: ResourceKind, action: Action) -> bool {
    let permission = format!("{}.{}", resource.as_str(), action.as_str());
    role_permissions()
        .get(&role)
        .map(|set| set.contains(permission.as_str()))
        .unwrap_or(false)
}

/// Resolves an actor's acting role for one organization and answers
/// allow/deny. Membership is looked up on the exact organization; access is
/// never inherited through the tree.
#[derive(Clone)]
pub struct RbacResolver {
    pool: PgPool,
}

impl RbacResolver {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Raw membership role string for a practitioner on one organization, if
    /// any. Re-read per request; stale-permission windows are not cached
    /// over.
    pub async fn membership_role(
        &self,
        practitioner_id: i64,
        organization_id: i64,
    ) -> Result<Option<String>, ExchangeError> {
        let role: Option<String> = sqlx::query_scalar(
            "SELECT role FROM practitioner_organization
             WHERE practitioner_id = $1 AND organization_id = $2",
        )
        .bind(practitioner_id)
        .bind(organization_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(role)
    }

    /// Parsed role, failing closed on unknown role strings.
    pub async fn resolved_role(
        &self,
        practitioner_id: i64,
        organization_id: i64,
    ) -> Result<Option<Role>, ExchangeError> {
        match self.membership_role(practitioner_id, organization_id).await? {
            None => Ok(None),
            Some(raw) => match Role::parse(&raw) {
                Some(role) => Ok(Some(role)),
                None => {
                    tracing::warn!(
                        practitioner_id,
                        organization_id,
                        role = %raw,
                        "unknown membership role, denying"
                    );
                    Ok(None)
                }
            },
        }
    }

    /// Allow/deny for one actor, resource kind, action and resolved
    /// organization. Denials are a 403-class error, never an empty result.
    pub async fn authorize(
        &self,
        actor: &Actor,
        resource: ResourceKind,
        action: Action,
        organization_id: i64,
    ) -> Result<(), ExchangeError> {
        if actor.is_superuser() {
            return Ok(());
        }
        let practitioner_id = match actor.practitioner_id() {
            Some(id) => id,
            None => {
                return Err(ExchangeError::permission_denied(format!(
                    "Only practitioners may {} {} resources.",
                    action.as_str(),
                    resource.as_str()
                )))
            }
        };
        let role = self
            .resolved_role(practitioner_id, organization_id)
            .await?
            .ok_or_else(|| {
                ExchangeError::permission_denied(format!(
                    "Practitioner has no membership in organization {organization_id}."
                ))
            })?;
        if !role_allows(role, resource, action) {
            tracing::debug!(
                practitioner_id,
                organization_id,
                role = role.as_str(),
                resource = resource.as_str(),
                action = action.as_str(),
                "rbac deny"
            );
            return Err(ExchangeError::permission_denied(format!(
                "Role '{}' may not {} {} resources in organization {organization_id}.",
                role.as_str(),
                action.as_str(),
                resource.as_str()
            )));
        }
        Ok(())
    }
}
