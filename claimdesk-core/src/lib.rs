pub mod assessment;
pub mod config;
pub mod db;
pub mod error;
pub mod messaging;
pub mod models;
pub mod object_store;
pub mod report;
pub mod store;

pub use assessment::{AssessmentBackend, AssessmentError, VisionAssessmentClient};
pub use config::{ClaimdeskConfig, Secrets};
pub use error::ClaimdeskError;
pub use messaging::{LineReplyClient, LogReplySender, ReplyError, ReplyMessage, ReplySender};
pub use models::{AssessmentResult, Contact, InsuranceLikelihood, Session};
pub use object_store::{HttpObjectStore, InMemoryObjectStore, ObjectRef, ObjectStore, ObjectStoreError};
pub use report::{RenderError, RenderedReport, ReportRenderer};
pub use store::{
    AttemptCharge, MemorySessionStore, PgSessionStore, SessionCounts, SessionStore, StoreError,
};
