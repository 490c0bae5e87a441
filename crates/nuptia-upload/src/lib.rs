//! Direct-to-object-storage uploads.
//!
//! A file moves through three calls: the broker issues a time-boxed write
//! credential (`UploadSessionNegotiator`), the bytes are written straight to the
//! object store (`StreamingUploader`), and the broker turns the session into a
//! durable record (`ConfirmationHandshake`). `UploadPipeline` runs the three for
//! one file; `BatchScheduler` paces many files in concurrency-bounded waves.

pub mod batch;
pub mod broker;
pub mod confirmation;
pub mod events;
pub mod negotiator;
pub mod pipeline;
pub mod progress;
pub mod retry;
pub mod transport;
pub mod uploader;

pub use batch::{BatchOptions, BatchReport, BatchScheduler, BatchSuccess};
pub use broker::{HttpBroker, StorageBroker};
pub use confirmation::ConfirmationHandshake;
pub use events::UploadEvents;
pub use negotiator::UploadSessionNegotiator;
pub use pipeline::UploadPipeline;
pub use progress::ProgressWindow;
pub use retry::{RetryCoordinator, RetryDecision, RetryFailure, RetryPolicy};
pub use transport::{HttpTransport, ObjectTransport, SentBytes};
pub use uploader::StreamingUploader;
