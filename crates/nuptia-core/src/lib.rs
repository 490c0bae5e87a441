//! Nuptia Core Library
//!
//! This crate provides the domain models, broker wire types, error taxonomy,
//! configuration and validation limits shared by the upload pipeline and the
//! frame sampler.

pub mod config;
pub mod constants;
pub mod error;
pub mod models;
pub mod validation;

// Re-export commonly used types
pub use config::{FrameConfig, FrameFormat, UploadConfig};
pub use error::{
    BrokerError, BrokerErrorKind, Classify, FailureClass, TransportError, TransportErrorKind,
    UploadError,
};
pub use models::{
    BatchState, FileKind, FileStatus, RetryState, UploadCategory, UploadEvent, UploadFile,
    UploadPhase, UploadProgress, UploadResult, UploadSession, WriteTarget,
};
pub use validation::{KindLimits, UploadLimits};
