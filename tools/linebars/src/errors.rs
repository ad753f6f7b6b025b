use thiserror::Error;

#[derive(Debug, Error)]
pub enum LinebarsError {
    #[error("io error: {0}")]
    Io(String),
    #[error("config parse error: {0}")]
    ConfigParse(String),
    #[error("invalid configuration: {0}")]
    Configuration(String),
    #[error("cli error: {0}")]
    Cli(String),
    #[error("terminal error: {0}")]
    Terminal(String),
    #[error("channel error: {0}")]
    Channel(String),
    #[error("worker error: {0}")]
    Worker(String),
    #[error("interrupted")]
    Interrupted,
}
