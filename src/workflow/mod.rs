pub mod orchestrator;
pub mod trail;
pub mod types;

pub use orchestrator::{route_after_verify, Orchestrator, VerifyRoute};
pub use trail::{validate_trail, TrailError};
pub use types::{
    ArticleRequest, Finding, Phase, RunFailure, RunId, RunMetadata, RunSuccess,
    VerificationIssue, VerificationStatus, WorkflowState,
};
