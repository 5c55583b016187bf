use thiserror::Error;

/// Every on-chain write aborts *before* broadcast on these; the caller's
/// reconciler loop simply retries at its next tick.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("fast gas price {gwei} gwei exceeds the 300 gwei cap")]
    GasPriceTooHigh { gwei: u64 },
    #[error("no address mapped for asset symbol {0:?}")]
    UnknownAsset(String),
    #[error("gateway returned no nonce for {0}")]
    NonceUnavailable(String),
    #[error("gateway http error: {0}")]
    Http(String),
    #[error("malformed gateway response: {0}")]
    Protocol(String),
}

impl From<reqwest::Error> for ChainError {
    fn from(e: reqwest::Error) -> Self {
        ChainError::Http(e.to_string())
    }
}
