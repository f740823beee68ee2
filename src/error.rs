use thiserror::Error;

/// Type alias for Result with GmailError
pub type Result<T> = std::result::Result<T, GmailError>;

/// Error types for the Gmail labeller
#[derive(Error, Debug)]
pub enum GmailError {
    /// Gmail API returned an error
    #[error("Gmail API error: {0}")]
    ApiError(String),

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    AuthError(String),

    /// Rate limit exceeded - should retry after specified seconds
    #[error("Rate limit exceeded, retry after {retry_after} seconds")]
    RateLimitExceeded { retry_after: u64 },

    /// Network-related error (connection issues, timeouts, etc.)
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Server returned 5xx error
    #[error("Server error (HTTP {status}): {message}")]
    ServerError { status: u16, message: String },

    /// Resource not found (404)
    #[error("Message not found: {0}")]
    MessageNotFound(String),

    /// Bad request (400)
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Forbidden (403)
    #[error("Access forbidden: {0}")]
    Forbidden(String),

    /// The resource already exists (409)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Invalid message format or parsing error
    #[error("Invalid message format: {0}")]
    InvalidMessageFormat(String),

    /// A header value did not contain a usable mailbox address
    #[error("Malformed address: {0}")]
    MalformedAddress(String),

    /// A label ID is missing from the loaded label listing
    #[error("Unknown label ID: {0}")]
    UnknownLabelId(String),

    /// Label-related errors
    #[error("Label error: {0}")]
    LabelError(String),

    /// The rule script failed to load, compile or run
    #[error("Script error: {0}")]
    ScriptError(String),

    /// IO error (file operations, etc.)
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Generic catch-all error
    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl GmailError {
    /// Check if the error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            GmailError::RateLimitExceeded { .. }
                | GmailError::ServerError { .. }
                | GmailError::NetworkError(_)
        )
    }

    /// Check if the error is permanent and should not be retried
    pub fn is_permanent(&self) -> bool {
        !self.is_transient()
    }

    /// Check if the error came from talking to the mail provider
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            GmailError::ApiError(_)
                | GmailError::AuthError(_)
                | GmailError::RateLimitExceeded { .. }
                | GmailError::NetworkError(_)
                | GmailError::ServerError { .. }
                | GmailError::MessageNotFound(_)
                | GmailError::BadRequest(_)
                | GmailError::Forbidden(_)
                | GmailError::Conflict(_)
        )
    }
}

/// Parse the Retry-After header from an HTTP response
///
/// The Retry-After header can be specified in two formats:
/// 1. Delay-seconds: An integer indicating seconds to wait (e.g., "120")
/// 2. HTTP-date: An HTTP date format (e.g., "Wed, 21 Oct 2015 07:28:00 GMT")
///
/// Returns the number of seconds to wait. If the header is missing or invalid,
/// returns a default of 5 seconds.
fn parse_retry_after_header<B>(response: &hyper::Response<B>) -> u64 {
    const DEFAULT_RETRY_AFTER: u64 = 5;

    if let Some(retry_after_value) = response.headers().get("retry-after") {
        if let Ok(retry_after_str) = retry_after_value.to_str() {
            if let Ok(seconds) = retry_after_str.parse::<u64>() {
                return seconds;
            }

            if let Ok(http_date) = httpdate::parse_http_date(retry_after_str) {
                let now = std::time::SystemTime::now();
                if let Ok(duration) = http_date.duration_since(now) {
                    return duration.as_secs();
                }
            }
        }
    }

    DEFAULT_RETRY_AFTER
}

impl From<google_gmail1::Error> for GmailError {
    fn from(error: google_gmail1::Error) -> Self {
        match error {
            google_gmail1::Error::Failure(ref response) => {
                let status = response.status();
                let status_code = status.as_u16();
                let message = format!(
                    "HTTP {}: {}",
                    status_code,
                    status.canonical_reason().unwrap_or("Unknown")
                );

                match status_code {
                    429 => {
                        let retry_after = parse_retry_after_header(response);
                        GmailError::RateLimitExceeded { retry_after }
                    }
                    404 => GmailError::MessageNotFound("Resource not found".to_string()),
                    400 => GmailError::BadRequest(message),
                    403 => GmailError::Forbidden(message),
                    409 => GmailError::Conflict(message),
                    500..=599 => GmailError::ServerError {
                        status: status_code,
                        message,
                    },
                    _ => GmailError::ApiError(message),
                }
            }
            google_gmail1::Error::BadRequest(ref err) => GmailError::BadRequest(format!("{}", err)),
            google_gmail1::Error::HttpError(ref err) => {
                GmailError::NetworkError(format!("Connection error: {}", err))
            }
            google_gmail1::Error::Io(err) => GmailError::NetworkError(err.to_string()),
            _ => GmailError::ApiError(error.to_string()),
        }
    }
}

impl From<Box<rhai::EvalAltResult>> for GmailError {
    fn from(error: Box<rhai::EvalAltResult>) -> Self {
        GmailError::ScriptError(error.to_string())
    }
}

impl From<rhai::ParseError> for GmailError {
    fn from(error: rhai::ParseError) -> Self {
        GmailError::ScriptError(format!("failed to parse script: {}", error))
    }
}
