//! One upload attempt of one batch.
//!
//! The uploader frames the batch, sends it through a [`Transport`] with a
//! bounded timeout, and classifies the result:
//!
//! | outcome                 | cause                                         |
//! |-------------------------|-----------------------------------------------|
//! | success                 | 2xx                                           |
//! | retryable failure       | unreachable, timeout, 5xx, 429, cancellation  |
//! | non-retryable failure   | other 4xx, 3xx, framed body over the limit    |
//!
//! An attempt is cancelled when consent is revoked while it is in flight or
//! when the caller's shutdown flag is raised. A cancelled attempt is always
//! retryable so its batch is never deleted on the strength of it.

pub mod framing;
pub mod transport;

pub use framing::PayloadFraming;
#[cfg(feature = "http")]
pub use transport::UreqTransport;
pub use transport::{Transport, TransportError, TransportRequest, TransportResponse};

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;
use tq_common::{ConsentState, Error};
use tq_config::UploadSettings;
use tq_store::{Batch, ConsentGate};
use tracing::debug;

/// How long past its own timeout a transport may run before it is abandoned.
const WATCHDOG_GRACE: Duration = Duration::from_millis(250);

/// Polling interval for cancellation while a send is in flight.
const CANCEL_POLL: Duration = Duration::from_millis(20);

/// Result of one attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum UploadOutcome {
    Success { status: u16 },
    RetryableFailure { reason: FailureReason },
    NonRetryableFailure { reason: FailureReason },
}

impl UploadOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, UploadOutcome::Success { .. })
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, UploadOutcome::RetryableFailure { .. })
    }

    pub fn reason(&self) -> Option<&FailureReason> {
        match self {
            UploadOutcome::Success { .. } => None,
            UploadOutcome::RetryableFailure { reason }
            | UploadOutcome::NonRetryableFailure { reason } => Some(reason),
        }
    }

    fn retryable(reason: FailureReason) -> Self {
        UploadOutcome::RetryableFailure { reason }
    }

    fn rejected(reason: FailureReason) -> Self {
        UploadOutcome::NonRetryableFailure { reason }
    }
}

/// Why an attempt did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    Unreachable { message: String },
    Transport { message: String },
    Timeout { secs: u64 },
    ServerError { status: u16 },
    RateLimited { status: u16 },
    Rejected { status: u16 },
    Redirect { status: u16 },
    PayloadTooLarge { size: u64, limit: u64 },
    /// Consent revoked or shutdown requested mid-flight.
    Cancelled,
    /// Upload attempted while consent was not granted; nothing was sent.
    ConsentViolation { state: ConsentState },
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Unreachable { message } => write!(f, "unreachable: {}", message),
            FailureReason::Transport { message } => write!(f, "transport: {}", message),
            FailureReason::Timeout { secs } => write!(f, "timed out after {}s", secs),
            FailureReason::ServerError { status } => write!(f, "server error (HTTP {})", status),
            FailureReason::RateLimited { status } => write!(f, "rate limited (HTTP {})", status),
            FailureReason::Rejected { status } => write!(f, "rejected (HTTP {})", status),
            FailureReason::Redirect { status } => write!(f, "unexpected redirect (HTTP {})", status),
            FailureReason::PayloadTooLarge { size, limit } => {
                write!(f, "payload of {} bytes exceeds limit of {}", size, limit)
            }
            FailureReason::Cancelled => write!(f, "cancelled"),
            FailureReason::ConsentViolation { state } => {
                write!(f, "consent is {}", state)
            }
        }
    }
}

impl From<&FailureReason> for Error {
    fn from(reason: &FailureReason) -> Self {
        match reason {
            FailureReason::Timeout { secs } => Error::UploadTimeout { seconds: *secs },
            FailureReason::Rejected { status } | FailureReason::Redirect { status } => {
                Error::Rejected {
                    status: Some(*status),
                    reason: reason.to_string(),
                }
            }
            FailureReason::PayloadTooLarge { .. } => Error::Rejected {
                status: None,
                reason: reason.to_string(),
            },
            FailureReason::ConsentViolation { state } => Error::ConsentViolation { state: *state },
            FailureReason::Unreachable { .. }
            | FailureReason::Transport { .. }
            | FailureReason::ServerError { .. }
            | FailureReason::RateLimited { .. }
            | FailureReason::Cancelled => Error::Transport(reason.to_string()),
        }
    }
}

/// Map an HTTP status onto the outcome taxonomy.
pub fn classify_status(status: u16) -> UploadOutcome {
    match status {
        200..=299 => UploadOutcome::Success { status },
        429 => UploadOutcome::retryable(FailureReason::RateLimited { status }),
        500..=599 => UploadOutcome::retryable(FailureReason::ServerError { status }),
        300..=399 => UploadOutcome::rejected(FailureReason::Redirect { status }),
        _ => UploadOutcome::rejected(FailureReason::Rejected { status }),
    }
}

fn classify_error(error: TransportError, timeout: Duration) -> UploadOutcome {
    let reason = match error {
        TransportError::Unreachable(message) => FailureReason::Unreachable { message },
        TransportError::Timeout => FailureReason::Timeout {
            secs: timeout.as_secs(),
        },
        TransportError::Other(message) => FailureReason::Transport { message },
    };
    UploadOutcome::retryable(reason)
}

/// Uploader settings.
#[derive(Debug, Clone)]
pub struct UploaderConfig {
    pub endpoint: String,
    pub timeout: Duration,
    pub max_payload_bytes: u64,
    pub content_type: String,
    pub headers: Vec<(String, String)>,
    pub framing: PayloadFraming,
}

impl UploaderConfig {
    pub fn from_settings(settings: &UploadSettings) -> Self {
        UploaderConfig {
            endpoint: settings.endpoint.clone(),
            timeout: settings.timeout(),
            max_payload_bytes: settings.max_payload_bytes,
            content_type: settings.content_type.clone(),
            headers: settings
                .headers
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            framing: PayloadFraming::from_settings(&settings.format),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_payload(mut self, bytes: u64) -> Self {
        self.max_payload_bytes = bytes;
        self
    }
}

impl Default for UploaderConfig {
    fn default() -> Self {
        Self::from_settings(&UploadSettings::default())
    }
}

/// Performs upload attempts.
pub struct Uploader {
    config: UploaderConfig,
    transport: Arc<dyn Transport>,
    gate: Option<Arc<ConsentGate>>,
}

impl Uploader {
    pub fn new(config: UploaderConfig, transport: Arc<dyn Transport>) -> Self {
        Uploader {
            config,
            transport,
            gate: None,
        }
    }

    /// Refuse to send unless `gate` is granted, and cancel on revocation.
    pub fn with_consent(mut self, gate: Arc<ConsentGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn config(&self) -> &UploaderConfig {
        &self.config
    }

    /// Upload `batch` to `endpoint`.
    pub fn upload(&self, batch: &Batch, endpoint: &str) -> UploadOutcome {
        self.upload_until(batch, endpoint, &AtomicBool::new(false))
    }

    /// Upload `batch`, abandoning the attempt if `shutdown` is raised.
    pub fn upload_until(&self, batch: &Batch, endpoint: &str, shutdown: &AtomicBool) -> UploadOutcome {
        let epoch = self.gate.as_ref().map(|gate| gate.revocation_epoch());
        self.upload_since(batch, endpoint, shutdown, epoch)
    }

    /// Upload a batch that was read from the store while the revocation
    /// epoch was `read_epoch`.
    ///
    /// Any revocation after the read cancels the attempt, including one that
    /// has since been followed by a new grant: the purge it triggered covered
    /// this batch.
    pub fn upload_since(
        &self,
        batch: &Batch,
        endpoint: &str,
        shutdown: &AtomicBool,
        read_epoch: Option<u64>,
    ) -> UploadOutcome {
        if let Some(gate) = &self.gate {
            let state = gate.current_state();
            if !state.allows_upload() {
                return UploadOutcome::retryable(FailureReason::ConsentViolation { state });
            }
        }

        let size = self.config.framing.framed_len(batch);
        if size > self.config.max_payload_bytes {
            return UploadOutcome::rejected(FailureReason::PayloadTooLarge {
                size,
                limit: self.config.max_payload_bytes,
            });
        }

        let revoked = || match (&self.gate, read_epoch) {
            (Some(gate), Some(epoch)) => gate.revocation_epoch() != epoch,
            _ => false,
        };
        if revoked() {
            return UploadOutcome::retryable(FailureReason::Cancelled);
        }
        let cancelled = || shutdown.load(Ordering::Acquire) || revoked();

        let request = TransportRequest {
            endpoint: endpoint.to_string(),
            body: self.config.framing.frame(batch),
            content_type: self.config.content_type.clone(),
            headers: self.config.headers.clone(),
            timeout: self.config.timeout,
        };

        let outcome = match self.send_bounded(request, &cancelled) {
            Some(Ok(response)) => classify_status(response.status),
            Some(Err(error)) => classify_error(error, self.config.timeout),
            None => UploadOutcome::retryable(FailureReason::Cancelled),
        };

        // A revocation that raced the response still voids the attempt.
        if outcome.is_success() && revoked() {
            return UploadOutcome::retryable(FailureReason::Cancelled);
        }
        outcome
    }

    /// Run the send on its own thread so a hung transport cannot hold the
    /// caller past the timeout. Returns `None` when cancelled.
    fn send_bounded(
        &self,
        request: TransportRequest,
        cancelled: &dyn Fn() -> bool,
    ) -> Option<Result<TransportResponse, TransportError>> {
        let deadline = Instant::now() + request.timeout + WATCHDOG_GRACE;
        let (tx, rx) = mpsc::channel();
        let transport = Arc::clone(&self.transport);

        let spawned = thread::Builder::new()
            .name("tq-upload-send".to_string())
            .spawn(move || {
                let _ = tx.send(transport.send(&request));
            });
        if let Err(e) = spawned {
            return Some(Err(TransportError::Other(format!(
                "failed to spawn send thread: {}",
                e
            ))));
        }

        loop {
            if cancelled() {
                debug!("Abandoning in-flight send");
                return None;
            }
            let now = Instant::now();
            if now >= deadline {
                return Some(Err(TransportError::Timeout));
            }
            match rx.recv_timeout(CANCEL_POLL.min(deadline - now)) {
                Ok(result) => return Some(result),
                Err(mpsc::RecvTimeoutError::Timeout) => continue,
                Err(mpsc::RecvTimeoutError::Disconnected) => {
                    return Some(Err(TransportError::Other(
                        "send thread exited without a result".to_string(),
                    )));
                }
            }
        }
    }
}
