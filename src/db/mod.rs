pub mod consent;
pub mod data_sources;
pub mod organizations;
pub mod rbac;
pub mod scoped;

pub use consent::ConsentLedger;
pub use data_sources::DataSourceStore;
pub use organizations::OrganizationStore;
pub use rbac::{role_allows, Action, RbacResolver, ResourceKind};
pub use scoped::{ObservationFilter, PatientFilter, ScopedQueries, StudyFilter};
