use thiserror::Error;

#[derive(Debug, Error)]
pub enum HubError {
    #[error("hub transport error: {0}")]
    Transport(String),
    #[error("malformed hub payload: {0}")]
    Protocol(String),
}
