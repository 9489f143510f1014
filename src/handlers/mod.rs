pub mod admin;
pub mod consent;
pub mod data_source;
pub mod error;
pub mod exchange;
pub mod organization;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::models::{Actor, ExchangeError};

/// Authenticated caller, resolved from `x-actor-kind` / `x-actor-id`
/// headers. Session and token mechanics live in front of this service; the
/// headers stand in for whatever gateway performs authentication.
#[derive(Debug, Clone)]
pub struct ActorContext(pub Actor);

#[axum::async_trait]
impl<S> FromRequestParts<S> for ActorContext
where
    S: Send + Sync,
{
    type Rejection = ExchangeError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let kind = parts
            .headers
            .get("x-actor-kind")
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| ExchangeError::permission_denied("Missing x-actor-kind header."))?;
        let actor = match kind {
            "superuser" => Actor::Superuser,
            "practitioner" | "patient" => {
                let id = parts
                    .headers
                    .get("x-actor-id")
                    .and_then(|value| value.to_str().ok())
                    .and_then(|value| value.parse::<i64>().ok())
                    .ok_or_else(|| {
                        ExchangeError::permission_denied("Missing or malformed x-actor-id header.")
                    })?;
                if kind == "practitioner" {
                    Actor::Practitioner { id }
                } else {
                    Actor::Patient { id }
                }
            }
            other => {
                return Err(ExchangeError::permission_denied(format!(
                    "Unknown actor kind '{other}'."
                )))
            }
        };
        Ok(ActorContext(actor))
    }
}

pub async fn health() -> &'static str {
    "OK"
}
