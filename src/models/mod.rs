pub mod actor;
pub mod domain;
pub mod error;
pub mod fhir;

pub use actor::Actor;
pub use domain::{
    DataSourceRecord, GrantedScope, ObservationRecord, OrganizationNode, OrganizationRecord,
    OrganizationUserRecord, PatientRecord, PendingScope, PractitionerRecord, Role,
    ScopeCode, ScopeConsentRecord, StudyRecord,
};
pub use error::ExchangeError;
