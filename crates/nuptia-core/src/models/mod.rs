pub mod batch;
pub mod direct_upload;
pub mod upload;

pub use batch::{BatchState, FileStatus};
pub use direct_upload::{
    BrokerEnvelope, CancelRequest, ConfirmRequest, ConfirmResponse, NegotiationRequest,
    NegotiationResponse, SessionState, SessionStatus,
};
pub use upload::{
    FileKind, RetryState, UploadCategory, UploadEvent, UploadFile, UploadPhase, UploadProgress,
    UploadResult, UploadSession, WriteTarget,
};
