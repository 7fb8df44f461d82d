use std::fmt;

/// Why a count (or feed) request did not produce a usable response.
///
/// `Cancelled` is kept separate from the failure variants: the poller never
/// backs off or touches state because of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// The request was aborted by its cancellation token.
    Cancelled,
    /// The request did not complete within the allowed time.
    Timeout,
    /// Transport-level failure (DNS, connect, reset, ...).
    Network(String),
    /// The server answered with a non-2xx status.
    Status(u16),
    /// The body was not valid JSON.
    Decode(String),
}

impl FetchError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, FetchError::Cancelled)
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchError::Cancelled => f.write_str("request cancelled"),
            FetchError::Timeout => f.write_str("request timed out"),
            FetchError::Network(msg) => write!(f, "network error: {msg}"),
            FetchError::Status(code) => write!(f, "unexpected status {code}"),
            FetchError::Decode(msg) => write!(f, "invalid response body: {msg}"),
        }
    }
}

impl std::error::Error for FetchError {}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout
        } else if let Some(status) = err.status() {
            FetchError::Status(status.as_u16())
        } else if err.is_decode() {
            FetchError::Decode(err.to_string())
        } else {
            FetchError::Network(err.to_string())
        }
    }
}

/// Failure reading or writing the acknowledgment store.
///
/// The poller swallows these; they only surface to direct store users.
#[derive(Debug)]
pub enum StorageError {
    Io(std::io::Error),
    Corrupt(String),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::Io(err) => write!(f, "storage io error: {err}"),
            StorageError::Corrupt(msg) => write!(f, "storage file is corrupt: {msg}"),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StorageError::Io(err) => Some(err),
            StorageError::Corrupt(_) => None,
        }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err)
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Corrupt(err.to_string())
    }
}
