pub mod audit;
pub mod decision;
pub mod embed;
pub mod label;
pub mod redact;
pub mod retrieve;
pub mod session;
pub mod types;

pub use decision::Decision;
pub use label::Label;
pub use types::{DocumentId, FragmentCandidate, SubjectId, Subject, SubjectAttrs, TenantId};
