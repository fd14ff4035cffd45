use thiserror::Error;

/// Why an address could not be geolocated.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolutionFailure {
    #[error("local address")]
    LocalAddress,

    #[error("{provider}: {message}")]
    Provider { provider: String, message: String },

    #[error("cancelled")]
    Cancelled,

    #[error("all providers failed: {last_error}")]
    Exhausted { last_error: String },
}

impl ResolutionFailure {
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }
}
