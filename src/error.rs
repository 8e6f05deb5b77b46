use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Registry error: {0}")]
    Registry(#[from] crate::registry::RegistryError),

    #[error("Readiness error: {0}")]
    Readiness(#[from] crate::readiness::ReadinessError),

    #[error("Agent error: {0}")]
    Agent(#[from] crate::agent::AgentError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
