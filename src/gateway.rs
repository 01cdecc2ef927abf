use thiserror::Error;

/// Failure of an outbound call to Green API or DeepSeek.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("request timed out")]
    Timeout,
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("upstream returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid upstream response: {0}")]
    Decode(String),
    #[error("{0} circuit breaker is open")]
    CircuitOpen(&'static str),
    #[error("not configured: {0}")]
    NotConfigured(String),
    #[error("request failed: {0}")]
    Request(String),
}

impl GatewayError {
    /// Transient errors are retried and count against the circuit breaker.
    pub fn is_transient(&self) -> bool {
        match self {
            GatewayError::Timeout | GatewayError::Connect(_) => true,
            GatewayError::Status { status, .. } => *status >= 500 || *status == 429,
            GatewayError::Decode(_)
            | GatewayError::CircuitOpen(_)
            | GatewayError::NotConfigured(_)
            | GatewayError::Request(_) => false,
        }
    }

    pub fn status(status: reqwest::StatusCode, body: impl Into<String>) -> Self {
        let mut body = body.into();
        if body.len() > 512 {
            let mut cut = 512;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            body.truncate(cut);
        }
        GatewayError::Status {
            status: status.as_u16(),
            body,
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GatewayError::Timeout
        } else if err.is_connect() {
            GatewayError::Connect(err.to_string())
        } else if err.is_decode() {
            GatewayError::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            GatewayError::status(status, err.to_string())
        } else {
            GatewayError::Request(err.to_string())
        }
    }
}
