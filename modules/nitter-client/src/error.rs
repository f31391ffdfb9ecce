use thiserror::Error;

pub type Result<T> = std::result::Result<T, NitterError>;

#[derive(Debug, Error)]
pub enum NitterError {
    #[error("No Nitter instances configured")]
    NoInstances,

    #[error("All {tried} Nitter instances failed, last error: {last_error}")]
    AllInstancesFailed { tried: usize, last_error: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Instance error (status {status})")]
    Api { status: u16 },
}

impl From<reqwest::Error> for NitterError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            NitterError::Timeout
        } else {
            NitterError::Network(err.to_string())
        }
    }
}
