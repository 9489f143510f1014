use sqlx::{PgPool, Postgres, QueryBuilder};

use crate::models::{
    Actor, ExchangeError, ObservationRecord, PatientRecord, StudyRecord,
};
use crate::pagination::PageParams;

/// Optional narrowing filters for patient queries. Absent fields do not
/// widen anything; the actor's visibility scope is always applied.
#[derive(Debug, Default, Clone)]
pub struct PatientFilter {
    pub organization_id: Option<i64>,
    pub study_id: Option<i64>,
    pub patient_id: Option<i64>,
    pub identifier: Option<String>,
}

#[derive(Debug, Default, Clone)]
pub struct StudyFilter {
    pub organization_id: Option<i64>,
    pub study_id: Option<i64>,
}

#[derive(Debug, Default, Clone)]
pub struct ObservationFilter {
    pub organization_id: Option<i64>,
    pub study_id: Option<i64>,
    pub patient_id: Option<i64>,
    pub patient_identifier: Option<String>,
    pub observation_id: Option<i64>,
    /// Coding filters use LIKE; an absent half of the pair matches anything.
    pub coding_system: Option<String>,
    pub coding_code: Option<String>,
}

/// Authorization-scoped reads. Every query carries the actor's visibility
/// join; filters narrow within it and never widen past it.
///
/// Practitioners see rows reachable through their exact organization
/// memberships (membership is not inherited through the organization tree).
/// Patients see only themselves. Superusers see everything.
#[derive(Clone)]
pub struct ScopedQueries {
    pool: PgPool,
}

impl ScopedQueries {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn list_patients(
        &self,
        actor: &Actor,
        filter: &PatientFilter,
        params: PageParams,
    ) -> Result<(Vec<PatientRecord>, i64), ExchangeError> {
        let mut query = QueryBuilder::<Postgres>::new(
            "SELECT DISTINCT p.id, p.identifier, p.name_family, p.name_given, p.birth_date,
                    p.telecom_phone, p.telecom_email, p.last_updated FROM patient p",
        );
        push_patient_scope(&mut query, actor, filter);
        query
            .push(" ORDER BY p.name_family ASC, p.name_given ASC, p.id ASC LIMIT ")
            .push_bind(params.limit())
            .push(" OFFSET ")
            .push_bind(params.offset());
        let rows = query
            .build_query_as::<PatientRecord>()
            .fetch_all(&self.pool)
            .await?;

        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(DISTINCT p.id) FROM patient p");
        push_patient_scope(&mut count, actor, filter);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;
        Ok((rows, total))
    }

    pub async fn get_patient(
        &self,
        actor: &Actor,
        patient_id: i64,
    ) -> Result<PatientRecord, ExchangeError> {
        let filter = PatientFilter {
            patient_id: Some(patient_id),
            ..Default::default()
        };
        let (mut rows, _) = self
            .list_patients(actor, &filter, PageParams::new(Some(1), Some(1)))
            .await?;
        rows.pop().ok_or_else(|| {
            ExchangeError::permission_denied(format!("Patient {patient_id} is not accessible."))
        })
    }

    pub async fn list_studies(
        &self,
        actor: &Actor,
        filter: &StudyFilter,
        params: PageParams,
    ) -> Result<(Vec<StudyRecord>, i64), ExchangeError> {
        let mut query = QueryBuilder::<Postgres>::new(
            "SELECT DISTINCT s.id, s.name, s.description, s.organization_id, s.icon_url,
                    o.name AS organization_name, o.type AS organization_type
             FROM study s JOIN organization o ON o.id = s.organization_id",
        );
        push_study_scope(&mut query, actor, filter);
        query
            .push(" ORDER BY s.name ASC, s.id ASC LIMIT ")
            .push_bind(params.limit())
            .push(" OFFSET ")
            .push_bind(params.offset());
        let rows = query
            .build_query_as::<StudyRecord>()
            .fetch_all(&self.pool)
            .await?;

        let mut count = QueryBuilder::<Postgres>::new(
            "SELECT COUNT(DISTINCT s.id) FROM study s JOIN organization o ON o.id = s.organization_id",
        );
        push_study_scope(&mut count, actor, filter);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;
        Ok((rows, total))
    }

    pub async fn get_study(&self, actor: &Actor, study_id: i64) -> Result<StudyRecord, ExchangeError> {
        let filter = StudyFilter {
            study_id: Some(study_id),
            ..Default::default()
        };
        let (mut rows, _) = self
            .list_studies(actor, &filter, PageParams::new(Some(1), Some(1)))
            .await?;
        rows.pop().ok_or_else(|| {
            ExchangeError::permission_denied(format!("Study {study_id} is not accessible."))
        })
    }

    pub async fn list_observations(
        &self,
        actor: &Actor,
        filter: &ObservationFilter,
        params: PageParams,
    ) -> Result<(Vec<ObservationRecord>, i64), ExchangeError> {
        let mut query = QueryBuilder::<Postgres>::new(
            "SELECT DISTINCT ob.id, ob.subject_patient_id, ob.status,
                    cc.coding_system, cc.coding_code, cc.text AS coding_text,
                    p.name_family AS patient_name_family, p.name_given AS patient_name_given,
                    ob.value_attachment_data, ob.last_updated
             FROM observation ob
             JOIN patient p ON p.id = ob.subject_patient_id
             JOIN codeable_concept cc ON cc.id = ob.codeable_concept_id",
        );
        push_observation_scope(&mut query, actor, filter);
        query
            .push(" ORDER BY ob.last_updated DESC, ob.id ASC LIMIT ")
            .push_bind(params.limit())
            .push(" OFFSET ")
            .push_bind(params.offset());
        let rows = query
            .build_query_as::<ObservationRecord>()
            .fetch_all(&self.pool)
            .await?;

        let mut count = QueryBuilder::<Postgres>::new(
            "SELECT COUNT(DISTINCT ob.id)
             FROM observation ob
             JOIN patient p ON p.id = ob.subject_patient_id
             JOIN codeable_concept cc ON cc.id = ob.codeable_concept_id",
        );
        push_observation_scope(&mut count, actor, filter);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;
        Ok((rows, total))
    }

    pub async fn get_observation(
        &self,
        actor: &Actor,
        observation_id: i64,
    ) -> Result<ObservationRecord, ExchangeError> {
        let filter = ObservationFilter {
            observation_id: Some(observation_id),
            ..Default::default()
        };
        let (mut rows, _) = self
            .list_observations(actor, &filter, PageParams::new(Some(1), Some(1)))
            .await?;
        rows.pop().ok_or_else(|| {
            ExchangeError::permission_denied(format!(
                "Observation {observation_id} is not accessible."
            ))
        })
    }

    /// True when the practitioner shares at least one organization with the
    /// patient.
    pub async fn practitioner_authorized_for_patient(
        &self,
        practitioner_id: i64,
        patient_id: i64,
    ) -> Result<bool, ExchangeError> {
        let authorized: bool = sqlx::query_scalar(
            "SELECT EXISTS (
                 SELECT 1 FROM patient_organization po
                 JOIN practitioner_organization pro
                      ON pro.organization_id = po.organization_id
                 WHERE po.patient_id = $1 AND pro.practitioner_id = $2)",
        )
        .bind(patient_id)
        .bind(practitioner_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(authorized)
    }

    /// True when the practitioner is a member of the study's owning
    /// organization.
    pub async fn practitioner_authorized_for_study(
        &self,
        practitioner_id: i64,
        study_id: i64,
    ) -> Result<bool, ExchangeError> {
        let authorized: bool = sqlx::query_scalar(
            "SELECT EXISTS (
                 SELECT 1 FROM study s
                 JOIN practitioner_organization pro
                      ON pro.organization_id = s.organization_id
                 WHERE s.id = $1 AND pro.practitioner_id = $2)",
        )
        .bind(study_id)
        .bind(practitioner_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(authorized)
    }

    pub async fn study_has_patient(
        &self,
        study_id: i64,
        patient_id: i64,
    ) -> Result<bool, ExchangeError> {
        let enrolled: bool = sqlx::query_scalar(
            "SELECT EXISTS (
                 SELECT 1 FROM study_patient WHERE study_id = $1 AND patient_id = $2)",
        )
        .bind(study_id)
        .bind(patient_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(enrolled)
    }
}

fn push_patient_scope(
    query: &mut QueryBuilder<'_, Postgres>,
    actor: &Actor,
    filter: &PatientFilter,
) {
    // Patients see themselves on the pk match alone; no membership needed.
    if matches!(actor, Actor::Practitioner { .. }) || filter.organization_id.is_some() {
        query.push(" JOIN patient_organization po ON po.patient_id = p.id");
    }
    if filter.study_id.is_some() {
        query.push(" JOIN study_patient sp ON sp.patient_id = p.id");
    }
    query.push(" WHERE TRUE");
    match actor {
        Actor::Superuser => {}
        Actor::Patient { id } => {
            query.push(" AND p.id = ").push_bind(*id);
        }
        Actor::Practitioner { id } => {
            query
                .push(
                    " AND po.organization_id IN (
                         SELECT organization_id FROM practitioner_organization
                         WHERE practitioner_id = ",
                )
                .push_bind(*id)
                .push(")");
        }
    }
    if let Some(organization_id) = filter.organization_id {
        query.push(" AND po.organization_id = ").push_bind(organization_id);
    }
    if let Some(study_id) = filter.study_id {
        query.push(" AND sp.study_id = ").push_bind(study_id);
    }
    if let Some(patient_id) = filter.patient_id {
        query.push(" AND p.id = ").push_bind(patient_id);
    }
    if let Some(identifier) = &filter.identifier {
        query.push(" AND p.identifier = ").push_bind(identifier.clone());
    }
}

fn push_study_scope(
    query: &mut QueryBuilder<'_, Postgres>,
    actor: &Actor,
    filter: &StudyFilter,
) {
    query.push(" WHERE TRUE");
    match actor {
        Actor::Superuser => {}
        Actor::Patient { id } => {
            query
                .push(
                    " AND s.id IN (SELECT study_id FROM study_patient WHERE patient_id = ",
                )
                .push_bind(*id)
                .push(")");
        }
        Actor::Practitioner { id } => {
            query
                .push(
                    " AND s.organization_id IN (
                         SELECT organization_id FROM practitioner_organization
                         WHERE practitioner_id = ",
                )
                .push_bind(*id)
                .push(")");
        }
    }
    if let Some(organization_id) = filter.organization_id {
        query.push(" AND s.organization_id = ").push_bind(organization_id);
    }
    if let Some(study_id) = filter.study_id {
        query.push(" AND s.id = ").push_bind(study_id);
    }
}

fn push_observation_scope(
    query: &mut QueryBuilder<'_, Postgres>,
    actor: &Actor,
    filter: &ObservationFilter,
) {
    if filter.organization_id.is_some() || matches!(actor, Actor::Practitioner { .. }) {
        query.push(" JOIN patient_organization po ON po.patient_id = p.id");
    }
    if filter.study_id.is_some() {
        query.push(" JOIN study_patient sp ON sp.patient_id = p.id");
    }
    query.push(" WHERE TRUE");
    match actor {
        Actor::Superuser => {}
        Actor::Patient { id } => {
            query.push(" AND ob.subject_patient_id = ").push_bind(*id);
        }
        Actor::Practitioner { id } => {
            query
                .push(
                    " AND po.organization_id IN (
                         SELECT organization_id FROM practitioner_organization
                         WHERE practitioner_id = ",
                )
                .push_bind(*id)
                .push(")");
        }
    }
    if let Some(organization_id) = filter.organization_id {
        query.push(" AND po.organization_id = ").push_bind(organization_id);
    }
    if let Some(study_id) = filter.study_id {
        query.push(" AND sp.study_id = ").push_bind(study_id);
    }
    if let Some(patient_id) = filter.patient_id {
        query.push(" AND ob.subject_patient_id = ").push_bind(patient_id);
    }
    if let Some(identifier) = &filter.patient_identifier {
        query.push(" AND p.identifier = ").push_bind(identifier.clone());
    }
    if let Some(observation_id) = filter.observation_id {
        query.push(" AND ob.id = ").push_bind(observation_id);
    }
    if let Some(system) = &filter.coding_system {
        query.push(" AND cc.coding_system LIKE ").push_bind(system.clone());
    }
    if let Some(code) = &filter.coding_code {
        query.push(" AND cc.coding_code LIKE ").push_bind(code.clone());
    }
}
