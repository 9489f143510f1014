use chrono::Utc;
use sqlx::PgPool;

use crate::models::{
    Actor, ExchangeError, GrantedScope, PendingScope, Role, ScopeCode, ScopeConsentRecord,
};

/// Per-patient, per-study, per-scope consent ledger.
///
/// Every read goes to the database; consent state is never cached, so a
/// revocation takes effect on the next write attempt.
#[derive(Clone)]
pub struct ConsentLedger {
    pool: PgPool,
}

impl ConsentLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Scope requests from the patient's enrolled studies that have no
    /// consent decision yet. Anti-join on the consent table.
    pub async fn pending_scopes(&self, patient_id: i64) -> Result<Vec<PendingScope>, ExchangeError> {
        let rows = sqlx::query_as::<_, PendingScope>(
            "SELECT s.id AS study_id, s.name AS study_name, ssr.scope_actions,
                    cc.id, cc.coding_system, cc.coding_code, cc.text
             FROM study_patient sp
             JOIN study s ON s.id = sp.study_id
             JOIN study_scope_request ssr ON ssr.study_id = s.id
             JOIN codeable_concept cc ON cc.id = ssr.scope_code_id
             LEFT JOIN study_patient_scope_consent spsc
                    ON spsc.study_patient_id = sp.id
                   AND spsc.scope_code_id = ssr.scope_code_id
             WHERE sp.patient_id = $1 AND spsc.id IS NULL
             ORDER BY s.name ASC, s.id ASC, cc.coding_code ASC",
        )
        .bind(patient_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Scope requests the patient has decided on, granted or refused.
    pub async fn granted_scopes(&self, patient_id: i64) -> Result<Vec<GrantedScope>, ExchangeError> {
        let rows = sqlx::query_as::<_, GrantedScope>(
            "SELECT s.id AS study_id, s.name AS study_name, ssr.scope_actions,
                    cc.id, cc.coding_system, cc.coding_code, cc.text,
                    spsc.consented, spsc.consented_time
             FROM study_patient sp
             JOIN study s ON s.id = sp.study_id
             JOIN study_scope_request ssr ON ssr.study_id = s.id
             JOIN codeable_concept cc ON cc.id = ssr.scope_code_id
             JOIN study_patient_scope_consent spsc
                    ON spsc.study_patient_id = sp.id
                   AND spsc.scope_code_id = ssr.scope_code_id
             WHERE sp.patient_id = $1
             ORDER BY s.name ASC, s.id ASC, cc.coding_code ASC",
        )
        .bind(patient_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Distinct consented scope codes across every enrollment. Consent
    /// granted through any one study admits writes for that scope regardless
    /// of which study requested it.
    pub async fn consolidated_scopes(&self, patient_id: i64) -> Result<Vec<ScopeCode>, ExchangeError> {
        let rows = sqlx::query_as::<_, ScopeCode>(
            "SELECT DISTINCT cc.id, cc.coding_system, cc.coding_code, cc.text
             FROM study_patient sp
             JOIN study_patient_scope_consent spsc ON spsc.study_patient_id = sp.id
             JOIN codeable_concept cc ON cc.id = spsc.scope_code_id
             WHERE sp.patient_id = $1 AND spsc.consented = TRUE
             ORDER BY cc.coding_code ASC, cc.id ASC",
        )
        .bind(patient_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Records a consent decision for one (enrollment, scope) pair. Repeated
    /// calls update the decision and restamp the time.
    pub async fn set_consent(
        &self,
        actor: &Actor,
        study_id: i64,
        patient_id: i64,
        coding_system: &str,
        coding_code: &str,
        consented: bool,
    ) -> Result<ScopeConsentRecord, ExchangeError> {
        let enrollment = self.resolve_enrollment(study_id, patient_id).await?;
        self.authorize_consent_write(actor, study_id, patient_id).await?;
        let scope = self.resolve_scope(coding_system, coding_code).await?;

        let requested: Option<String> = sqlx::query_scalar(
            "SELECT scope_actions FROM study_scope_request
             WHERE study_id = $1 AND scope_code_id = $2",
        )
        .bind(study_id)
        .bind(scope.id)
        .fetch_optional(&self.pool)
        .await?;
        let scope_actions = requested.ok_or_else(|| {
            ExchangeError::validation(format!(
                "Study {study_id} does not request scope {coding_system}|{coding_code}."
            ))
        })?;

        let record = sqlx::query_as::<_, ScopeConsentRecord>(
            "INSERT INTO study_patient_scope_consent
                 (study_patient_id, scope_code_id, scope_actions, consented, consented_time)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (study_patient_id, scope_code_id)
             DO UPDATE SET consented = EXCLUDED.consented,
                           consented_time = EXCLUDED.consented_time
             RETURNING id, study_patient_id, scope_code_id, consented, consented_time",
        )
        .bind(enrollment)
        .bind(scope.id)
        .bind(&scope_actions)
        .bind(consented)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;
        Ok(record)
    }

    /// Removes the consent decision entirely; the scope becomes pending
    /// again.
    pub async fn remove_consent(
        &self,
        actor: &Actor,
        study_id: i64,
        patient_id: i64,
        coding_system: &str,
        coding_code: &str,
    ) -> Result<(), ExchangeError> {
        let enrollment = self.resolve_enrollment(study_id, patient_id).await?;
        self.authorize_consent_write(actor, study_id, patient_id).await?;
        let scope = self.resolve_scope(coding_system, coding_code).await?;

        let result = sqlx::query(
            "DELETE FROM study_patient_scope_consent
             WHERE study_patient_id = $1 AND scope_code_id = $2",
        )
        .bind(enrollment)
        .bind(scope.id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(ExchangeError::not_found(format!(
                "No consent recorded for scope {coding_system}|{coding_code} in study {study_id}."
            )));
        }
        Ok(())
    }

    /// Wipes every consent decision for one patient and reports how many
    /// rows went away. Exposed behind a testing flag only.
    pub async fn reset_consents(&self, patient_id: i64) -> Result<u64, ExchangeError> {
        let result = sqlx::query(
            "DELETE FROM study_patient_scope_consent
             WHERE study_patient_id IN
                   (SELECT id FROM study_patient WHERE patient_id = $1)",
        )
        .bind(patient_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn resolve_enrollment(&self, study_id: i64, patient_id: i64) -> Result<i64, ExchangeError> {
        let id: Option<i64> = sqlx::query_scalar(
            "SELECT id FROM study_patient WHERE study_id = $1 AND patient_id = $2",
        )
        .bind(study_id)
        .bind(patient_id)
        .fetch_optional(&self.pool)
        .await?;
        id.ok_or_else(|| {
            ExchangeError::not_found(format!(
                "Patient {patient_id} is not enrolled in study {study_id}."
            ))
        })
    }

    async fn resolve_scope(
        &self,
        coding_system: &str,
        coding_code: &str,
    ) -> Result<ScopeCode, ExchangeError> {
        let scope = sqlx::query_as::<_, ScopeCode>(
            "SELECT id, coding_system, coding_code, text FROM codeable_concept
             WHERE coding_system = $1 AND coding_code = $2",
        )
        .bind(coding_system)
        .bind(coding_code)
        .fetch_optional(&self.pool)
        .await?;
        scope.ok_or_else(|| {
            ExchangeError::not_found(format!(
                "Unknown scope coding {coding_system}|{coding_code}."
            ))
        })
    }

    /// Consent writes are allowed for the subject patient themself, a
    /// superuser, or a practitioner holding manager or member on the study's
    /// owning organization. The elevated practitioner path is logged.
    async fn authorize_consent_write(
        &self,
        actor: &Actor,
        study_id: i64,
        patient_id: i64,
    ) -> Result<(), ExchangeError> {
        match actor {
            Actor::Superuser => Ok(()),
            Actor::Patient { id } if *id == patient_id => Ok(()),
            Actor::Patient { .. } => Err(ExchangeError::permission_denied(
                "Patients may only manage their own consents.",
            )),
            Actor::Practitioner { id } => {
                let role: Option<String> = sqlx::query_scalar(
                    "SELECT po.role
                     FROM study s
                     JOIN practitioner_organization po
                          ON po.organization_id = s.organization_id
                     WHERE s.id = $1 AND po.practitioner_id = $2",
                )
                .bind(study_id)
                .bind(*id)
                .fetch_optional(&self.pool)
                .await?;
                let allowed = role
                    .as_deref()
                    .and_then(Role::parse)
                    .map(|role| matches!(role, Role::Manager | Role::Member))
                    .unwrap_or(false);
                if !allowed {
                    return Err(ExchangeError::permission_denied(format!(
                        "Practitioner {id} may not manage consents for study {study_id}."
                    )));
                }
                tracing::info!(
                    practitioner_id = *id,
                    study_id,
                    patient_id,
                    "practitioner writing consent on behalf of patient"
                );
                Ok(())
            }
        }
    }
}
