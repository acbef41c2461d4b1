//! Outbound transport seam.
//!
//! The uploader only needs "send these bytes to this endpoint, tell me the
//! status or why there is none". TLS, DNS and connection reuse belong to the
//! implementation.

use std::time::Duration;

use thiserror::Error;

/// One HTTP POST.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub endpoint: String,
    pub body: Vec<u8>,
    pub content_type: String,
    /// Extra headers, sent after `Content-Type`.
    pub headers: Vec<(String, String)>,
    pub timeout: Duration,
}

/// What the intake answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
}

/// The request produced no HTTP status.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// DNS failure, refused connection, no route.
    #[error("endpoint unreachable: {0}")]
    Unreachable(String),

    #[error("request timed out")]
    Timeout,

    #[error("transport error: {0}")]
    Other(String),
}

/// Sends framed batches to the intake.
///
/// Implementations must honour `request.timeout`; the uploader additionally
/// abandons a send that overruns it.
pub trait Transport: Send + Sync {
    fn send(&self, request: &TransportRequest) -> Result<TransportResponse, TransportError>;
}

/// Blocking HTTP transport backed by `ureq`.
///
/// Redirects are not followed: a 3xx is reported to the uploader as is.
#[cfg(feature = "http")]
pub struct UreqTransport {
    agent: ureq::Agent,
}

#[cfg(feature = "http")]
impl UreqTransport {
    pub fn new() -> Self {
        UreqTransport {
            agent: ureq::AgentBuilder::new().redirects(0).build(),
        }
    }
}

#[cfg(feature = "http")]
impl Default for UreqTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "http")]
impl Transport for UreqTransport {
    fn send(&self, request: &TransportRequest) -> Result<TransportResponse, TransportError> {
        let mut req = self
            .agent
            .post(&request.endpoint)
            .timeout(request.timeout)
            .set("Content-Type", &request.content_type);
        for (name, value) in &request.headers {
            req = req.set(name, value);
        }

        match req.send_bytes(&request.body) {
            Ok(response) => Ok(TransportResponse {
                status: response.status(),
            }),
            Err(ureq::Error::Status(status, _)) => Ok(TransportResponse { status }),
            Err(ureq::Error::Transport(transport)) => Err(map_transport_error(&transport)),
        }
    }
}

#[cfg(feature = "http")]
fn map_transport_error(error: &ureq::Transport) -> TransportError {
    use std::error::Error as _;

    let timed_out = error
        .source()
        .and_then(|source| source.downcast_ref::<std::io::Error>())
        .is_some_and(|io| {
            matches!(
                io.kind(),
                std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
            )
        });
    if timed_out {
        return TransportError::Timeout;
    }

    match error.kind() {
        ureq::ErrorKind::Dns | ureq::ErrorKind::ConnectionFailed => {
            TransportError::Unreachable(error.to_string())
        }
        _ => TransportError::Other(error.to_string()),
    }
}

#[cfg(all(test, feature = "http"))]
mod tests {
    use super::*;

    #[test]
    fn test_unreachable_endpoint_is_classified() {
        // Port 1 on loopback is closed on any sane test host.
        let transport = UreqTransport::new();
        let result = transport.send(&TransportRequest {
            endpoint: "http://127.0.0.1:1/v1/input".to_string(),
            body: b"[]".to_vec(),
            content_type: "application/json".to_string(),
            headers: Vec::new(),
            timeout: Duration::from_secs(2),
        });
        assert!(matches!(
            result,
            Err(TransportError::Unreachable(_)) | Err(TransportError::Timeout)
        ));
    }
}
