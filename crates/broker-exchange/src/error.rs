use thiserror::Error;

/// A venue-reported rejection on submit. The sub-order transitions to
/// `Rejected` and is never retried.
#[derive(Debug, Error)]
#[error("venue rejected submit: {0}")]
pub struct SubmitError(pub String);

/// Transient I/O against a venue. The enclosing reconciler loop logs and
/// ticks again; nothing mutates on this path.
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("http error talking to venue: {0}")]
    Http(String),
    #[error("unexpected venue response: {0}")]
    Protocol(String),
}

impl From<reqwest::Error> for ExchangeError {
    fn from(e: reqwest::Error) -> Self {
        ExchangeError::Http(e.to_string())
    }
}
