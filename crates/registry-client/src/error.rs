use crate::bootstrap::LifecycleState;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid registry url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("invalid service data: {0}")]
    InvalidServiceData(String),

    #[error("registry responded with status {0}")]
    UnexpectedStatus(u16),

    #[error("registration of {0} was rejected")]
    RegistrationRejected(String),

    #[error("lifecycle cannot start from state {0:?}")]
    InvalidState(LifecycleState),
}

pub type Result<T> = std::result::Result<T, RegistryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(
            RegistryError::UnexpectedStatus(404).to_string(),
            "registry responded with status 404"
        );
        assert_eq!(
            RegistryError::RegistrationRejected("SayHello:1".to_string()).to_string(),
            "registration of SayHello:1 was rejected"
        );
        assert_eq!(
            RegistryError::InvalidState(LifecycleState::Stopped).to_string(),
            "lifecycle cannot start from state Stopped"
        );
    }
}
