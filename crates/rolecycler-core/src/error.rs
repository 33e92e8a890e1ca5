use thiserror::Error;

#[derive(Debug, Error)]
pub enum CyclerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CyclerError {
    /// Short stable code for logs and CLI exit messages.
    pub fn code(&self) -> &'static str {
        match self {
            CyclerError::Config(_) => "CONFIG_ERROR",
            CyclerError::Io(_) => "IO_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, CyclerError>;
