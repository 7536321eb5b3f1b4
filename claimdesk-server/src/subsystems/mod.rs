pub mod admin;
pub mod allocator;
pub mod lifecycle;
pub mod redemption;

pub use admin::{
    AdminError, AdminService, CustomerDetail, CustomerListing, Dashboard, EditRequest,
    SessionDetail, SessionSummary,
};
pub use allocator::{AllocationError, ClaimCodeAllocator, CodeGenerator, RandomCodes, SeededCodes};
pub use lifecycle::{
    Collaborators, Lifecycle, ReportError, SubmissionError, SubmissionReceipt, SubmissionRequest,
};
pub use redemption::{RedemptionOutcome, Redeemer, SignatureError};
