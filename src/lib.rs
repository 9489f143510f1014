pub mod config;
pub mod db;
pub mod exchange;
pub mod handlers;
pub mod models;
pub mod pagination;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use sqlx::PgPool;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::db::{ConsentLedger, DataSourceStore, OrganizationStore, ScopedQueries};
use crate::exchange::{BatchProcessor, PayloadValidator, Translator};

/// Shared per-request state: the pool plus the engines built over it.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub site_url: String,
    pub scoped: ScopedQueries,
    pub consent: ConsentLedger,
    pub organizations: OrganizationStore,
    pub data_sources: DataSourceStore,
    pub translator: Translator,
    pub batch: BatchProcessor,
}

impl AppState {
    pub fn new(pool: PgPool, site_url: String, validator: Arc<dyn PayloadValidator>) -> Self {
        let scoped = ScopedQueries::new(pool.clone());
        let consent = ConsentLedger::new(pool.clone());
        let organizations = OrganizationStore::new(pool.clone());
        let data_sources = DataSourceStore::new(pool.clone());
        let translator = Translator::new(pool.clone(), validator);
        let batch = BatchProcessor::new(translator.clone());
        Self {
            pool,
            site_url,
            scoped,
            consent,
            organizations,
            data_sources,
            translator,
            batch,
        }
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/v1/patients", get(handlers::admin::list_patients))
        .route("/api/v1/patients/:id", get(handlers::admin::get_patient))
        .route(
            "/api/v1/patients/:id/consents",
            get(handlers::consent::get_consents)
                .post(handlers::consent::apply_consents)
                .patch(handlers::consent::apply_consents)
                .delete(handlers::consent::delete_consents),
        )
        .route("/api/v1/studies", get(handlers::admin::list_studies))
        .route("/api/v1/studies/:id", get(handlers::admin::get_study))
        .route(
            "/api/v1/studies/:id/data_sources",
            get(handlers::data_source::study_data_sources),
        )
        .route(
            "/api/v1/data_sources",
            get(handlers::data_source::list_data_sources),
        )
        .route(
            "/api/v1/data_sources/all_scopes",
            get(handlers::data_source::all_scopes),
        )
        .route(
            "/api/v1/data_sources/:id",
            get(handlers::data_source::get_data_source),
        )
        .route(
            "/api/v1/practitioners/:id",
            get(handlers::organization::get_practitioner),
        )
        .route(
            "/api/v1/observations",
            get(handlers::admin::list_observations),
        )
        .route(
            "/api/v1/observations/:id",
            get(handlers::admin::get_observation),
        )
        .route(
            "/api/v1/organizations",
            get(handlers::organization::list_organizations),
        )
        .route(
            "/api/v1/organizations/:id",
            get(handlers::organization::get_organization)
                .delete(handlers::organization::delete_organization),
        )
        .route(
            "/api/v1/organizations/:id/tree",
            get(handlers::organization::get_tree),
        )
        .route(
            "/api/v1/organizations/:id/users",
            get(handlers::organization::list_users)
                .post(handlers::organization::add_user)
                .delete(handlers::organization::remove_user),
        )
        .route("/fhir/r5/Patient", get(handlers::exchange::search_patients))
        .route(
            "/fhir/r5/Observation",
            get(handlers::exchange::search_observations)
                .post(handlers::exchange::create_observation),
        )
        .route("/fhir/r5", post(handlers::exchange::process_batch))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
