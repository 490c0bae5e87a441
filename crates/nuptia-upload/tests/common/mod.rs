//! In-memory broker and object store used by the pipeline and batch tests.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use tokio::sync::Notify;

use nuptia_core::models::{
    CancelRequest, ConfirmRequest, ConfirmResponse, NegotiationRequest, NegotiationResponse,
    SessionState, SessionStatus,
};
use nuptia_core::{BrokerError, TransportError, UploadConfig, UploadEvent, WriteTarget};
use nuptia_upload::{ObjectTransport, SentBytes, StorageBroker};

pub fn test_config() -> UploadConfig {
    UploadConfig {
        broker_url: "http://broker.test/api".to_string(),
        retry_base_delay: Duration::from_millis(100),
        ..UploadConfig::default()
    }
}

pub struct FakeBroker {
    pub negotiate_calls: AtomicUsize,
    pub confirm_calls: AtomicUsize,
    pub cancelled_sessions: Mutex<Vec<String>>,
    negotiate_errors: Mutex<VecDeque<BrokerError>>,
    confirm_errors: Mutex<VecDeque<BrokerError>>,
    sessions: Mutex<HashMap<String, NegotiationRequest>>,
    session_ttl: chrono::Duration,
    size_skew: AtomicU64,
}

impl FakeBroker {
    pub fn new() -> Arc<Self> {
        Self::with_ttl(chrono::Duration::hours(1))
    }

    pub fn with_ttl(session_ttl: chrono::Duration) -> Arc<Self> {
        Arc::new(Self {
            negotiate_calls: AtomicUsize::new(0),
            confirm_calls: AtomicUsize::new(0),
            cancelled_sessions: Mutex::new(Vec::new()),
            negotiate_errors: Mutex::new(VecDeque::new()),
            confirm_errors: Mutex::new(VecDeque::new()),
            sessions: Mutex::new(HashMap::new()),
            session_ttl,
            size_skew: AtomicU64::new(0),
        })
    }

    pub fn fail_next_negotiation(&self, error: BrokerError) {
        self.negotiate_errors.lock().unwrap().push_back(error);
    }

    pub fn fail_next_confirmation(&self, error: BrokerError) {
        self.confirm_errors.lock().unwrap().push_back(error);
    }

    /// Record `extra` more bytes than were confirmed.
    pub fn misreport_size(&self, extra: u64) {
        self.size_skew.store(extra, Ordering::SeqCst);
    }

    pub fn negotiations(&self) -> usize {
        self.negotiate_calls.load(Ordering::SeqCst)
    }

    pub fn confirmations(&self) -> usize {
        self.confirm_calls.load(Ordering::SeqCst)
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.cancelled_sessions.lock().unwrap().clone()
    }
}

#[async_trait]
impl StorageBroker for FakeBroker {
    async fn negotiate(
        &self,
        request: &NegotiationRequest,
    ) -> Result<NegotiationResponse, BrokerError> {
        let n = self.negotiate_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(error) = self.negotiate_errors.lock().unwrap().pop_front() {
            return Err(error);
        }

        let session_id = format!("session-{}", n);
        let object_key = format!("{}/{}/{}", request.file_type, request.category, request.file_name);
        self.sessions
            .lock()
            .unwrap()
            .insert(session_id.clone(), request.clone());

        Ok(NegotiationResponse {
            presigned_url: format!("https://objects.test/{}/{}", session_id, request.file_name),
            upload_session_id: session_id,
            object_key,
            expires_at: Utc::now() + self.session_ttl,
            required_headers: vec![],
        })
    }

    async fn confirm(&self, request: &ConfirmRequest) -> Result<ConfirmResponse, BrokerError> {
        self.confirm_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.confirm_errors.lock().unwrap().pop_front() {
            return Err(error);
        }

        let sessions = self.sessions.lock().unwrap();
        let negotiated = sessions
            .get(&request.upload_session_id)
            .ok_or_else(|| BrokerError::from_status(404, "upload session not found"))?;

        Ok(ConfirmResponse {
            file_id: format!("file-{}", request.upload_session_id),
            filename: format!("stored-{}", negotiated.file_name),
            original_name: negotiated.file_name.clone(),
            file_size: request.actual_file_size + self.size_skew.load(Ordering::SeqCst),
            url: format!("https://cdn.test/{}", negotiated.file_name),
            file_type: negotiated.file_type,
            uploaded_at: Utc::now(),
            category: negotiated.category.to_string(),
        })
    }

    async fn cancel(&self, request: &CancelRequest) -> Result<(), BrokerError> {
        self.cancelled_sessions
            .lock()
            .unwrap()
            .push(request.upload_session_id.clone());
        Ok(())
    }

    async fn session_status(&self, session_id: &str) -> Result<SessionStatus, BrokerError> {
        let sessions = self.sessions.lock().unwrap();
        let negotiated = sessions
            .get(session_id)
            .ok_or_else(|| BrokerError::not_found("upload session not found"))?;
        Ok(SessionStatus {
            upload_session_id: session_id.to_string(),
            status: SessionState::Pending,
            file_name: negotiated.file_name.clone(),
            file_size: negotiated.file_size,
            file_type: negotiated.file_type,
            created_at: Utc::now(),
            expires_at: Utc::now() + self.session_ttl,
        })
    }
}

/// Scripted behaviour of one `put`.
pub enum PutBehavior {
    Succeed,
    /// Send part of the body, then fail.
    Fail(TransportError),
    /// Send part of the body, then never finish.
    Hang,
}

/// Sets the flag when the in-flight `put` future is dropped before finishing.
struct AbortProbe(Arc<AtomicBool>);

impl Drop for AbortProbe {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

pub struct FakeTransport {
    script: Mutex<VecDeque<PutBehavior>>,
    failing_files: Mutex<HashMap<String, TransportError>>,
    chunk_delay: Duration,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    pub targets: Mutex<Vec<String>>,
    pub received: Mutex<Vec<Bytes>>,
    pub aborted: Arc<AtomicBool>,
    pub hanging: Notify,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Self::with_chunk_delay(Duration::from_millis(50))
    }

    pub fn with_chunk_delay(chunk_delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            failing_files: Mutex::new(HashMap::new()),
            chunk_delay,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            targets: Mutex::new(Vec::new()),
            received: Mutex::new(Vec::new()),
            aborted: Arc::new(AtomicBool::new(false)),
            hanging: Notify::new(),
        })
    }

    pub fn script(&self, behaviors: impl IntoIterator<Item = PutBehavior>) {
        self.script.lock().unwrap().extend(behaviors);
    }

    /// Every upload of `file_name` fails with `error`.
    pub fn always_fail(&self, file_name: &str, error: TransportError) {
        self.failing_files
            .lock()
            .unwrap()
            .insert(file_name.to_string(), error);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn was_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    fn behavior_for(&self, url: &str) -> PutBehavior {
        let failing = self.failing_files.lock().unwrap();
        if let Some((_, error)) = failing
            .iter()
            .find(|(name, _)| url.ends_with(&format!("/{}", name)))
        {
            return PutBehavior::Fail(error.clone());
        }
        drop(failing);
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(PutBehavior::Succeed)
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ObjectTransport for FakeTransport {
    async fn put(
        &self,
        target: &WriteTarget,
        _content_type: &str,
        body: Bytes,
        sent: SentBytes,
    ) -> Result<(), TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.targets.lock().unwrap().push(target.url.clone());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _in_flight = InFlight(&self.in_flight);

        let behavior = self.behavior_for(&target.url);
        let total = body.len() as u64;
        let quarter = total / 4;

        match behavior {
            PutBehavior::Succeed => {
                for _ in 0..4 {
                    tokio::time::sleep(self.chunk_delay).await;
                    sent.add(quarter);
                }
                sent.set(total);
                self.received.lock().unwrap().push(body);
                Ok(())
            }
            PutBehavior::Fail(error) => {
                tokio::time::sleep(self.chunk_delay).await;
                sent.add(quarter * 2);
                tokio::time::sleep(self.chunk_delay).await;
                Err(error)
            }
            PutBehavior::Hang => {
                let _probe = AbortProbe(self.aborted.clone());
                sent.add(quarter * 2);
                self.hanging.notify_one();
                std::future::pending::<()>().await;
                Ok(())
            }
        }
    }
}

pub fn drain(receiver: &mut tokio::sync::mpsc::UnboundedReceiver<UploadEvent>) -> Vec<UploadEvent> {
    let mut events = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        events.push(event);
    }
    events
}
