use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Practitioner role within one organization membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Manager,
    Member,
    Viewer,
}

impl Role {
    /// Unknown role strings map to `None`; the RBAC resolver fails closed on
    /// them.
    pub fn parse(value: &str) -> Option<Role> {
        match value {
            "manager" => Some(Role::Manager),
            "member" => Some(Role::Member),
            "viewer" => Some(Role::Viewer),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Manager => "manager",
            Role::Member => "member",
            Role::Viewer => "viewer",
        }
    }
}

/// Node in the organization tree. The root has no `part_of`.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct OrganizationRecord {
    pub id: i64,
    pub name: String,
    #[serde(rename = "type")]
    #[sqlx(rename = "type")]
    pub org_type: String,
    pub part_of: Option<i64>,
}

/// Organization with its recursively collected children, for tree display.
/// Access control stays flat regardless of this structure.
#[derive(Debug, Clone, Serialize)]
pub struct OrganizationNode {
    #[serde(flatten)]
    pub organization: OrganizationRecord,
    pub children: Vec<OrganizationNode>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PractitionerRecord {
    pub id: i64,
    pub identifier: Option<String>,
    pub name_family: Option<String>,
    pub name_given: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub telecom_phone: Option<String>,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PatientRecord {
    pub id: i64,
    pub identifier: Option<String>,
    pub name_family: String,
    pub name_given: String,
    pub birth_date: NaiveDate,
    pub telecom_phone: Option<String>,
    pub telecom_email: Option<String>,
    pub last_updated: DateTime<Utc>,
}

/// Study row joined with its owning organization, as the admin list returns
/// it.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct StudyRecord {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub organization_id: i64,
    pub icon_url: Option<String>,
    pub organization_name: String,
    #[serde(rename = "organization_type")]
    pub organization_type: String,
}

/// A coded clinical data type (scope). `(coding_system, coding_code)` is
/// unique; rows are effectively static reference data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ScopeCode {
    pub id: i64,
    pub coding_system: String,
    pub coding_code: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DataSourceRecord {
    pub id: i64,
    pub name: String,
    #[serde(rename = "type")]
    #[sqlx(rename = "type")]
    pub source_type: String,
}

/// Observation row as the scoped admin list returns it: the coded scope and
/// the subject's name are denormalized onto the row.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ObservationRecord {
    pub id: i64,
    pub subject_patient_id: i64,
    pub status: String,
    pub coding_system: String,
    pub coding_code: String,
    pub coding_text: String,
    pub patient_name_family: String,
    pub patient_name_given: String,
    pub value_attachment_data: serde_json::Value,
    pub last_updated: DateTime<Utc>,
}

/// Practitioner listed under an organization, with the membership role
/// resolved.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct OrganizationUserRecord {
    pub practitioner_id: i64,
    pub identifier: Option<String>,
    pub name_family: Option<String>,
    pub name_given: Option<String>,
    pub role: String,
}

/// A scope some enrolled study requests but the patient has not yet decided
/// on.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct PendingScope {
    pub study_id: i64,
    pub study_name: String,
    pub scope_actions: String,
    #[sqlx(flatten)]
    pub scope: ScopeCode,
}

/// A scope the patient has decided on (granted or refused) for one
/// enrollment.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct GrantedScope {
    pub study_id: i64,
    pub study_name: String,
    pub scope_actions: String,
    #[sqlx(flatten)]
    pub scope: ScopeCode,
    pub consented: bool,
    pub consented_time: DateTime<Utc>,
}

/// Applied consent row, echoed back from consent writes.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ScopeConsentRecord {
    pub id: i64,
    pub study_patient_id: i64,
    pub scope_code_id: i64,
    pub consented: bool,
    pub consented_time: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_parsing_is_closed() {
        assert_eq!(Role::parse("manager"), Some(Role::Manager));
        assert_eq!(Role::parse("member"), Some(Role::Member));
        assert_eq!(Role::parse("viewer"), Some(Role::Viewer));
        assert_eq!(Role::parse("Manager"), None);
        assert_eq!(Role::parse("admin"), None);
        assert_eq!(Role::parse(""), None);
    }

    #[test]
    fn role_round_trip() {
        for role in [Role::Manager, Role::Member, Role::Viewer] {
            assert_eq!(Role::parse(role.as_str()), Some(role));
        }
    }
}
