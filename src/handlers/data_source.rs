use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;

use crate::handlers::ActorContext;
use crate::models::{DataSourceRecord, ExchangeError, ScopeCode};
use crate::AppState;

/// Data source with the scopes it can produce, as the catalog listing
/// returns it.
#[derive(Debug, Serialize)]
pub struct DataSourceWithScopes {
    #[serde(flatten)]
    pub source: DataSourceRecord,
    pub supported_scopes: Vec<ScopeCode>,
}

pub async fn list_data_sources(
    State(state): State<AppState>,
    ActorContext(_actor): ActorContext,
) -> Result<Json<Vec<DataSourceWithScopes>>, ExchangeError> {
    let sources = state.data_sources.list().await?;
    let mut listed = Vec::with_capacity(sources.len());
    for source in sources {
        let supported_scopes = state.data_sources.supported_scopes(source.id).await?;
        listed.push(DataSourceWithScopes {
            source,
            supported_scopes,
        });
    }
    Ok(Json(listed))
}

pub async fn get_data_source(
    State(state): State<AppState>,
    ActorContext(_actor): ActorContext,
    Path(data_source_id): Path<i64>,
) -> Result<Json<DataSourceWithScopes>, ExchangeError> {
    let source = state.data_sources.get(data_source_id).await?;
    let supported_scopes = state.data_sources.supported_scopes(data_source_id).await?;
    Ok(Json(DataSourceWithScopes {
        source,
        supported_scopes,
    }))
}

pub async fn all_scopes(
    State(state): State<AppState>,
    ActorContext(_actor): ActorContext,
) -> Result<Json<Vec<ScopeCode>>, ExchangeError> {
    let scopes = state.data_sources.all_scopes().await?;
    Ok(Json(scopes))
}

/// Data sources linked to one study; access follows the study itself.
pub async fn study_data_sources(
    State(state): State<AppState>,
    ActorContext(actor): ActorContext,
    Path(study_id): Path<i64>,
) -> Result<Json<Vec<DataSourceWithScopes>>, ExchangeError> {
    state.scoped.get_study(&actor, study_id).await?;
    let sources = state.data_sources.for_study(study_id).await?;
    let mut listed = Vec::with_capacity(sources.len());
    for source in sources {
        let supported_scopes = state.data_sources.supported_scopes(source.id).await?;
        listed.push(DataSourceWithScopes {
            source,
            supported_scopes,
        });
    }
    Ok(Json(listed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listing_flattens_source_fields() {
        let listed = DataSourceWithScopes {
            source: DataSourceRecord {
                id: 70001,
                name: "CuffLink BP Monitor".to_string(),
                source_type: "personal_device".to_string(),
            },
            supported_scopes: vec![ScopeCode {
                id: 60001,
                coding_system: "https://w3id.org/openmhealth".to_string(),
                coding_code: "omh:blood-pressure:4.0".to_string(),
                text: "Blood pressure".to_string(),
            }],
        };
        let json = serde_json::to_value(&listed).unwrap();
        assert_eq!(json["id"], 70001);
        assert_eq!(json["type"], "personal_device");
        assert_eq!(
            json["supported_scopes"][0]["coding_code"],
            "omh:blood-pressure:4.0"
        );
        assert!(json.get("source").is_none());
    }
}
