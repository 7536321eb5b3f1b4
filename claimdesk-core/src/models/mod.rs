pub mod customer;
pub mod edit;
pub mod result;
pub mod session;

pub use customer::{Customer, CustomerFollowUp, DEFAULT_FOLLOW_UP_STATUS};
pub use edit::{AppliedEdit, AuditedEdit, EditHistoryEntry, ResultEdit};
pub use result::{
    format_yen, normalize_result, AssessmentResult, InsuranceLikelihood, ModelError,
    ResultColumns, MAX_SEVERITY, RESULT_SCHEMA_VERSION,
};
pub use session::{report_object_name, Contact, Session, SessionDraft, SessionRow};
