use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::{ConsentLedger, ObservationFilter, PatientFilter, ScopedQueries};
use crate::models::fhir::{
    Attachment, Coding, CodeableConcept, ContactPoint, FhirObservation, FhirPatient, HumanName,
    Identifier, Meta, Reference,
};
use crate::models::{Actor, ExchangeError, ObservationRecord, PatientRecord, ScopeCode};
use crate::pagination::PageParams;

/// Structured-schema validation of decoded observation payloads. The schema
/// registry itself lives outside this crate; implementations answer for one
/// payload at a time.
pub trait PayloadValidator: Send + Sync {
    fn validate(&self, scope: &ScopeCode, payload: &Value) -> Result<(), String>;
}

/// Default validator: the payload must be an object carrying a `header`
/// object with a parseable `uuid`, and a `body` object. Enough for tests and
/// standalone deployments without a schema registry.
pub struct StructuralValidator;

impl PayloadValidator for StructuralValidator {
    fn validate(&self, _scope: &ScopeCode, payload: &Value) -> Result<(), String> {
        let object = payload
            .as_object()
            .ok_or_else(|| "payload is not a JSON object".to_string())?;
        let header = object
            .get("header")
            .and_then(Value::as_object)
            .ok_or_else(|| "payload is missing a header object".to_string())?;
        let uuid = header
            .get("uuid")
            .and_then(Value::as_str)
            .ok_or_else(|| "payload header is missing a uuid".to_string())?;
        Uuid::parse_str(uuid).map_err(|_| format!("payload header uuid '{uuid}' is malformed"))?;
        object
            .get("body")
            .and_then(Value::as_object)
            .ok_or_else(|| "payload is missing a body object".to_string())?;
        Ok(())
    }
}

/// Translates between stored rows and FHIR R5 resource shapes, and runs the
/// gated create pipeline.
#[derive(Clone)]
pub struct Translator {
    pool: PgPool,
    scoped: ScopedQueries,
    consent: ConsentLedger,
    validator: Arc<dyn PayloadValidator>,
}

impl Translator {
    pub fn new(pool: PgPool, validator: Arc<dyn PayloadValidator>) -> Self {
        let scoped = ScopedQueries::new(pool.clone());
        let consent = ConsentLedger::new(pool.clone());
        Self {
            pool,
            scoped,
            consent,
            validator,
        }
    }

    /// FHIR Patient search. One of `study_id` or `identifier` is required;
    /// study access is checked before any row is read.
    pub async fn search_patients(
        &self,
        actor: &Actor,
        study_id: Option<i64>,
        identifier: Option<&str>,
        params: PageParams,
    ) -> Result<(Vec<FhirPatient>, i64), ExchangeError> {
        if study_id.is_none() && identifier.is_none() {
            return Err(ExchangeError::validation(
                "Provide _has:_group:member:_id or identifier to search patients.",
            ));
        }
        if let (Some(study_id), Some(practitioner_id)) = (study_id, actor.practitioner_id()) {
            if !self
                .scoped
                .practitioner_authorized_for_study(practitioner_id, study_id)
                .await?
            {
                return Err(ExchangeError::permission_denied(format!(
                    "Study {study_id} is not accessible."
                )));
            }
        }
        let filter = PatientFilter {
            study_id,
            identifier: identifier.map(str::to_string),
            ..Default::default()
        };
        let (records, total) = self.scoped.list_patients(actor, &filter, params).await?;
        let resources = records
            .into_iter()
            .map(|record| revalidate(patient_to_fhir(record)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok((resources, total))
    }

    /// FHIR Observation search. The subject scope must be pinned by a study,
    /// a patient id, or a patient identifier.
    pub async fn search_observations(
        &self,
        actor: &Actor,
        filter: ObservationFilter,
        params: PageParams,
    ) -> Result<(Vec<FhirObservation>, i64), ExchangeError> {
        if filter.study_id.is_none()
            && filter.patient_id.is_none()
            && filter.patient_identifier.is_none()
            && filter.observation_id.is_none()
        {
            return Err(ExchangeError::validation(
                "Provide a study, patient or patient.identifier to search observations.",
            ));
        }
        if let (Some(study_id), Some(practitioner_id)) = (filter.study_id, actor.practitioner_id())
        {
            if !self
                .scoped
                .practitioner_authorized_for_study(practitioner_id, study_id)
                .await?
            {
                return Err(ExchangeError::permission_denied(format!(
                    "Study {study_id} is not accessible."
                )));
            }
        }
        if let (Some(study_id), Some(patient_id)) = (filter.study_id, filter.patient_id) {
            if !self.scoped.study_has_patient(study_id, patient_id).await? {
                return Err(ExchangeError::validation(format!(
                    "Patient {patient_id} is not enrolled in study {study_id}."
                )));
            }
        }
        let (records, total) = self.scoped.list_observations(actor, &filter, params).await?;
        let identifiers = self.identifiers_for(&records).await?;
        let resources = records
            .into_iter()
            .map(|record| {
                let ids = identifiers
                    .iter()
                    .filter(|(observation_id, _)| *observation_id == record.id)
                    .map(|(_, identifier)| identifier.clone())
                    .collect::<Vec<_>>();
                observation_to_fhir(record, ids).and_then(revalidate)
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok((resources, total))
    }

    /// Gated create pipeline. Fails with exactly one error kind per step;
    /// persistence is a single transaction that re-checks consent right
    /// before commit.
    pub async fn create_observation(
        &self,
        actor: &Actor,
        resource: &Value,
    ) -> Result<i64, ExchangeError> {
        let observation: FhirObservation = serde_json::from_value(resource.clone())
            .map_err(|err| ExchangeError::validation(format!("Malformed Observation: {err}")))?;
        if observation.resource_type != "Observation" {
            return Err(ExchangeError::validation(format!(
                "Expected an Observation resource, got '{}'.",
                observation.resource_type
            )));
        }

        let subject_reference = observation
            .subject
            .as_ref()
            .and_then(|subject| subject.reference.as_deref())
            .ok_or_else(|| ExchangeError::validation("Observation is missing subject.reference."))?;
        let patient_id = parse_reference("Patient", subject_reference)?;
        let patient_exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM patient WHERE id = $1)")
                .bind(patient_id)
                .fetch_one(&self.pool)
                .await?;
        if !patient_exists {
            return Err(ExchangeError::validation(format!(
                "Subject patient {patient_id} does not exist."
            )));
        }

        match actor {
            Actor::Superuser => {}
            Actor::Patient { id } => {
                if *id != patient_id {
                    return Err(ExchangeError::permission_denied(
                        "Patients may only submit observations about themselves.",
                    ));
                }
            }
            Actor::Practitioner { id } => {
                if !self
                    .scoped
                    .practitioner_authorized_for_patient(*id, patient_id)
                    .await?
                {
                    return Err(ExchangeError::permission_denied(format!(
                        "Patient {patient_id} is not accessible."
                    )));
                }
            }
        }

        let identifiers = declared_identifiers(&observation);
        for (system, value) in &identifiers {
            let taken: bool = sqlx::query_scalar(
                "SELECT EXISTS (
                     SELECT 1 FROM observation_identifier WHERE system = $1 AND value = $2)",
            )
            .bind(system)
            .bind(value)
            .fetch_one(&self.pool)
            .await?;
            if taken {
                return Err(ExchangeError::conflict(format!(
                    "Observation identifier {system}|{value} already exists."
                )));
            }
        }

        let device_reference = observation
            .device
            .as_ref()
            .and_then(|device| device.reference.as_deref())
            .ok_or_else(|| {
                ExchangeError::validation(
                    "Device is required and must reference a data source id.",
                )
            })?;
        let data_source_id = parse_reference("Device", device_reference)?;
        let known: bool = sqlx::query_scalar(
            "SELECT EXISTS (
                 SELECT 1 FROM data_source
                 WHERE id = $1 AND type IN ('personal_device', 'device'))",
        )
        .bind(data_source_id)
        .fetch_one(&self.pool)
        .await?;
        if !known {
            return Err(ExchangeError::validation(format!(
                "Device {data_source_id} is not a known data source."
            )));
        }

        let codings = observation
            .code
            .as_ref()
            .and_then(|code| code.coding.as_ref())
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        let coding = match codings {
            [only] => only,
            _ => {
                return Err(ExchangeError::validation(format!(
                    "Observation.code must carry exactly one coding, got {}.",
                    codings.len()
                )))
            }
        };
        let (coding_system, coding_code) = match (&coding.system, &coding.code) {
            (Some(system), Some(code)) => (system.as_str(), code.as_str()),
            _ => {
                return Err(ExchangeError::validation(
                    "Observation coding needs both system and code.",
                ))
            }
        };
        let scope = sqlx::query_as::<_, ScopeCode>(
            "SELECT id, coding_system, coding_code, text FROM codeable_concept
             WHERE coding_system = $1 AND coding_code = $2",
        )
        .bind(coding_system)
        .bind(coding_code)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| {
            ExchangeError::validation(format!(
                "Unknown observation coding {coding_system}|{coding_code}."
            ))
        })?;

        let consented = self
            .consent
            .consolidated_scopes(patient_id)
            .await?
            .iter()
            .any(|granted| granted.id == scope.id);
        if !consented {
            return Err(ExchangeError::permission_denied(format!(
                "Patient {patient_id} has not consented to share {coding_system}|{coding_code}."
            )));
        }

        let encoded = observation
            .value_attachment
            .as_ref()
            .and_then(|attachment| attachment.data.as_deref())
            .ok_or_else(|| {
                ExchangeError::validation("Observation is missing valueAttachment.data.")
            })?;
        let decoded = STANDARD.decode(encoded).map_err(|err| {
            ExchangeError::validation(format!("valueAttachment.data is not valid base64: {err}"))
        })?;
        let payload: Value = serde_json::from_slice(&decoded).map_err(|err| {
            ExchangeError::validation(format!("valueAttachment.data is not valid JSON: {err}"))
        })?;
        self.validator
            .validate(&scope, &payload)
            .map_err(ExchangeError::validation)?;

        let status = observation.status.as_deref().unwrap_or("final");

        let mut tx = self.pool.begin().await?;
        let still_consented: bool = sqlx::query_scalar(
            "SELECT EXISTS (
                 SELECT 1 FROM study_patient sp
                 JOIN study_patient_scope_consent spsc ON spsc.study_patient_id = sp.id
                 WHERE sp.patient_id = $1 AND spsc.scope_code_id = $2
                   AND spsc.consented = TRUE)",
        )
        .bind(patient_id)
        .bind(scope.id)
        .fetch_one(&mut *tx)
        .await?;
        if !still_consented {
            return Err(ExchangeError::permission_denied(format!(
                "Patient {patient_id} has not consented to share {coding_system}|{coding_code}."
            )));
        }

        let observation_id: i64 = sqlx::query_scalar(
            "INSERT INTO observation
                 (subject_patient_id, codeable_concept_id, data_source_id, status,
                  value_attachment_data, last_updated)
             VALUES ($1, $2, $3, $4, $5, NOW())
             RETURNING id",
        )
        .bind(patient_id)
        .bind(scope.id)
        .bind(data_source_id)
        .bind(status)
        .bind(&payload)
        .fetch_one(&mut *tx)
        .await?;
        for (system, value) in &identifiers {
            sqlx::query(
                "INSERT INTO observation_identifier (observation_id, system, value)
                 VALUES ($1, $2, $3)",
            )
            .bind(observation_id)
            .bind(system)
            .bind(value)
            .execute(&mut *tx)
            .await
            .map_err(|err| map_unique_violation(err, system, value))?;
        }
        tx.commit().await?;

        tracing::debug!(observation_id, patient_id, code = coding_code, "observation created");
        Ok(observation_id)
    }

    /// Re-reads one observation through the search translation, as the
    /// create endpoint returns it.
    pub async fn read_observation(
        &self,
        actor: &Actor,
        observation_id: i64,
    ) -> Result<FhirObservation, ExchangeError> {
        let filter = ObservationFilter {
            observation_id: Some(observation_id),
            ..Default::default()
        };
        let (mut resources, _) = self
            .search_observations(actor, filter, PageParams::new(Some(1), Some(1)))
            .await?;
        resources.pop().ok_or_else(|| {
            ExchangeError::permission_denied(format!(
                "Observation {observation_id} is not accessible."
            ))
        })
    }

    async fn identifiers_for(
        &self,
        records: &[ObservationRecord],
    ) -> Result<Vec<(i64, Identifier)>, ExchangeError> {
        if records.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<i64> = records.iter().map(|record| record.id).collect();
        let rows: Vec<(i64, String, String)> = sqlx::query_as(
            "SELECT observation_id, system, value FROM observation_identifier
             WHERE observation_id = ANY($1) ORDER BY id ASC",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(observation_id, system, value)| {
                (
                    observation_id,
                    Identifier {
                        system: Some(system),
                        value: Some(value),
                    },
                )
            })
            .collect())
    }
}

/// Parses `{kind}/{id}` into the numeric id.
pub fn parse_reference(kind: &str, reference: &str) -> Result<i64, ExchangeError> {
    let id = reference
        .strip_prefix(kind)
        .and_then(|rest| rest.strip_prefix('/'))
        .and_then(|id| id.parse::<i64>().ok());
    id.ok_or_else(|| {
        ExchangeError::validation(format!(
            "Reference '{reference}' is not of the form {kind}/<id>."
        ))
    })
}

fn declared_identifiers(observation: &FhirObservation) -> Vec<(String, String)> {
    observation
        .identifier
        .as_deref()
        .unwrap_or(&[])
        .iter()
        .filter_map(|identifier| match (&identifier.system, &identifier.value) {
            (Some(system), Some(value)) => Some((system.clone(), value.clone())),
            _ => None,
        })
        .collect()
}

fn patient_to_fhir(record: PatientRecord) -> FhirPatient {
    let mut telecom = Vec::new();
    if let Some(email) = record.telecom_email {
        telecom.push(ContactPoint {
            system: Some("email".to_string()),
            value: Some(email),
        });
    }
    if let Some(phone) = record.telecom_phone {
        telecom.push(ContactPoint {
            system: Some("phone".to_string()),
            value: Some(phone),
        });
    }
    FhirPatient {
        id: Some(record.id.to_string()),
        resource_type: "Patient".to_string(),
        meta: Some(Meta {
            version_id: None,
            last_updated: Some(record.last_updated),
        }),
        identifier: record.identifier.map(|value| {
            vec![Identifier {
                system: None,
                value: Some(value),
            }]
        }),
        name: Some(vec![HumanName {
            family: Some(record.name_family),
            given: Some(vec![record.name_given]),
            text: None,
            extra: Default::default(),
        }]),
        birth_date: Some(record.birth_date),
        telecom: if telecom.is_empty() { None } else { Some(telecom) },
        extra: Default::default(),
    }
}

fn observation_to_fhir(
    record: ObservationRecord,
    identifiers: Vec<Identifier>,
) -> Result<FhirObservation, ExchangeError> {
    let payload = serde_json::to_vec(&record.value_attachment_data)
        .map_err(|err| ExchangeError::Unexpected(err.into()))?;
    Ok(FhirObservation {
        id: Some(record.id.to_string()),
        resource_type: "Observation".to_string(),
        meta: Some(Meta {
            version_id: None,
            last_updated: Some(record.last_updated),
        }),
        identifier: if identifiers.is_empty() {
            None
        } else {
            Some(identifiers)
        },
        status: Some(record.status),
        code: Some(CodeableConcept {
            coding: Some(vec![Coding {
                system: Some(record.coding_system),
                code: Some(record.coding_code),
                display: Some(record.coding_text),
            }]),
            text: None,
        }),
        subject: Some(Reference {
            reference: Some(format!("Patient/{}", record.subject_patient_id)),
        }),
        device: None,
        value_attachment: Some(Attachment {
            content_type: Some("application/json".to_string()),
            data: Some(STANDARD.encode(payload)),
        }),
        extra: Default::default(),
    })
}

/// Serialize-then-deserialize round trip. A produced resource that cannot
/// survive it is a server defect.
fn revalidate<T>(resource: T) -> Result<T, ExchangeError>
where
    T: serde::Serialize + serde::de::DeserializeOwned,
{
    let value = serde_json::to_value(&resource)
        .map_err(|err| ExchangeError::Unexpected(err.into()))?;
    serde_json::from_value(value).map_err(|err| ExchangeError::Unexpected(err.into()))
}

fn map_unique_violation(err: sqlx::Error, system: &str, value: &str) -> ExchangeError {
    if let Some(db_err) = err.as_database_error() {
        if db_err.code().as_deref() == Some("23505") {
            return ExchangeError::conflict(format!(
                "Observation identifier {system}|{value} already exists."
            ));
        }
    }
    err.into()
}
