use serde_json::Value;

use crate::models::fhir::{Bundle, BundleEntry, BundleEntryResponse, OperationOutcome};
use crate::models::{Actor, ExchangeError};

use super::translate::Translator;

/// Processes batch Bundles of Observation creates: one envelope check up
/// front, then sequential, independent per-entry execution. A failed entry
/// never rolls back its siblings.
#[derive(Clone)]
pub struct BatchProcessor {
    translator: Translator,
}

impl BatchProcessor {
    pub fn new(translator: Translator) -> Self {
        Self { translator }
    }

    pub async fn process(&self, actor: &Actor, bundle: &Value) -> Result<Bundle, ExchangeError> {
        let entries = bundle
            .get("entry")
            .and_then(Value::as_array)
            .ok_or_else(|| ExchangeError::validation("Bundle has no entry array."))?;
        validate_envelope(entries)?;

        let mut responses = Vec::with_capacity(entries.len());
        for entry in entries {
            responses.push(self.process_entry(actor, entry).await);
        }
        Ok(Bundle::batch_response(responses))
    }

    async fn process_entry(&self, actor: &Actor, entry: &Value) -> BundleEntry {
        if !entry_is_observation_post(entry) {
            return error_entry(
                "400 Bad Request",
                "invalid",
                "Batch entries must POST an Observation resource.",
            );
        }
        let resource = match entry.get("resource") {
            Some(resource) => resource,
            None => {
                return error_entry("400 Bad Request", "invalid", "Batch entry has no resource.")
            }
        };
        match self.translator.create_observation(actor, resource).await {
            Ok(observation_id) => BundleEntry {
                response: Some(BundleEntryResponse {
                    status: "201 Created".to_string(),
                    outcome: None,
                }),
                resource: Some(serde_json::json!({
                    "resourceType": "Observation",
                    "id": observation_id.to_string(),
                })),
                ..Default::default()
            },
            Err(err) => {
                let (status, code) = match &err {
                    ExchangeError::Conflict(_) => ("409 Conflict", err.issue_code()),
                    ExchangeError::PermissionDenied(_) => ("403 Forbidden", err.issue_code()),
                    ExchangeError::Validation(_) => ("400 Bad Request", err.issue_code()),
                    // Absent references read as client input faults here.
                    ExchangeError::NotFound(_) => ("400 Bad Request", "invalid"),
                    ExchangeError::Unexpected(inner) => {
                        tracing::error!(error = %inner, "batch entry failed unexpectedly");
                        ("422 Unprocessable Entity", err.issue_code())
                    }
                };
                error_entry(status, code, &err.to_string())
            }
        }
    }
}

/// All-or-nothing envelope check: every entry must carry a non-null
/// `resource.valueAttachment.data` before any entry runs.
fn validate_envelope(entries: &[Value]) -> Result<(), ExchangeError> {
    for (index, entry) in entries.iter().enumerate() {
        let data = entry
            .get("resource")
            .and_then(|resource| resource.get("valueAttachment"))
            .and_then(|attachment| attachment.get("data"));
        match data {
            Some(value) if !value.is_null() => {}
            _ => {
                return Err(ExchangeError::validation(format!(
                    "Bundle entry {index} is missing valueAttachment.data."
                )))
            }
        }
    }
    Ok(())
}

fn entry_is_observation_post(entry: &Value) -> bool {
    let is_observation = entry
        .get("resource")
        .and_then(|resource| resource.get("resourceType"))
        .and_then(Value::as_str)
        == Some("Observation");
    let is_post = entry
        .get("request")
        .and_then(|request| request.get("method"))
        .and_then(Value::as_str)
        == Some("POST");
    is_observation && is_post
}

fn error_entry(status: &str, code: &str, message: &str) -> BundleEntry {
    BundleEntry {
        response: Some(BundleEntryResponse {
            status: status.to_string(),
            outcome: Some(OperationOutcome::error(code, message)),
        }),
        ..Default::default()
    }
}
