use sqlx::PgPool;

use crate::models::{DataSourceRecord, ExchangeError, ScopeCode};

/// Read access to the data source catalog: which device types exist, which
/// scopes each can produce, and which a study has linked. Small, admin
/// managed reference data.
#[derive(Clone)]
pub struct DataSourceStore {
    pool: PgPool,
}

impl DataSourceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn list(&self) -> Result<Vec<DataSourceRecord>, ExchangeError> {
        let rows = sqlx::query_as::<_, DataSourceRecord>(
            "SELECT id, name, type FROM data_source ORDER BY name ASC, id ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn get(&self, data_source_id: i64) -> Result<DataSourceRecord, ExchangeError> {
        sqlx::query_as::<_, DataSourceRecord>(
            "SELECT id, name, type FROM data_source WHERE id = $1",
        )
        .bind(data_source_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| {
            ExchangeError::not_found(format!("Data source {data_source_id} does not exist."))
        })
    }

    /// Scopes one data source can produce.
    pub async fn supported_scopes(
        &self,
        data_source_id: i64,
    ) -> Result<Vec<ScopeCode>, ExchangeError> {
        let rows = sqlx::query_as::<_, ScopeCode>(
            "SELECT cc.id, cc.coding_system, cc.coding_code, cc.text
             FROM codeable_concept cc
             JOIN data_source_supported_scope dsss ON dsss.scope_code_id = cc.id
             WHERE dsss.data_source_id = $1
             ORDER BY cc.text ASC, cc.id ASC",
        )
        .bind(data_source_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Data sources a study has linked for its collection protocol.
    pub async fn for_study(&self, study_id: i64) -> Result<Vec<DataSourceRecord>, ExchangeError> {
        let rows = sqlx::query_as::<_, DataSourceRecord>(
            "SELECT ds.id, ds.name, ds.type
             FROM data_source ds
             JOIN study_data_source sds ON sds.data_source_id = ds.id
             WHERE sds.study_id = $1
             ORDER BY ds.name ASC, ds.id ASC",
        )
        .bind(study_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// The whole scope catalog, for configuration screens.
    pub async fn all_scopes(&self) -> Result<Vec<ScopeCode>, ExchangeError> {
        let rows = sqlx::query_as::<_, ScopeCode>(
            "SELECT id, coding_system, coding_code, text FROM codeable_concept
             ORDER BY text ASC, id ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
