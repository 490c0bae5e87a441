use tokio::sync::mpsc;

use nuptia_core::{RetryState, UploadEvent, UploadPhase, UploadProgress};

/// Sink for per-file upload events.
///
/// Sending never blocks the upload; events are dropped once the receiver is gone.
#[derive(Clone, Debug, Default)]
pub struct UploadEvents {
    sender: Option<mpsc::UnboundedSender<UploadEvent>>,
}

impl UploadEvents {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<UploadEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self {
                sender: Some(sender),
            },
            receiver,
        )
    }

    /// A sink that discards everything.
    pub fn disabled() -> Self {
        Self { sender: None }
    }

    pub fn emit(&self, event: UploadEvent) {
        if let Some(sender) = &self.sender {
            let _ = sender.send(event);
        }
    }

    pub fn phase(&self, file_id: &str, phase: UploadPhase) {
        self.emit(UploadEvent::Phase {
            file_id: file_id.to_string(),
            phase,
        });
    }

    pub fn progress(&self, file_id: &str, progress: UploadProgress) {
        self.emit(UploadEvent::Progress {
            file_id: file_id.to_string(),
            progress,
        });
    }

    pub fn retry(&self, file_id: &str, state: &RetryState) {
        self.emit(UploadEvent::Retry {
            file_id: file_id.to_string(),
            state: state.clone(),
        });
    }
}
